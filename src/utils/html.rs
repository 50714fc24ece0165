//! Static inspection of diff pages.
//!
//! Used by the `inspect` command to judge a diff without a browser. The
//! renderer-side collection in `services::capture` reads the same classes.

use scraper::{Html, Selector};

use crate::error::{AppError, Result};

/// Classes holding changed text on a wiki diff page.
pub const FRAGMENT_SELECTORS: [&str; 3] =
    [".diff-addedline", ".diff-deletedline", ".diffchange-inline"];

/// Collect the text of every changed fragment in a diff page.
pub fn diff_fragments(document: &Html) -> Result<Vec<String>> {
    let mut fragments = Vec::new();
    for raw in FRAGMENT_SELECTORS {
        let selector = parse_selector(raw)?;
        fragments.extend(
            document
                .select(&selector)
                .map(|element| element.text().collect::<String>()),
        );
    }
    Ok(fragments)
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::validation(format!("invalid selector '{s}': {e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF_PAGE: &str = r#"
        <table class="diff">
          <tr>
            <td class="diff-deletedline"><div>Sie ist Mitglied der <del class="diffchange diffchange-inline">Partei</del>.</div></td>
            <td class="diff-addedline"><div>[[Kategorie:Politiker]]</div></td>
          </tr>
        </table>
    "#;

    #[test]
    fn test_collects_all_fragment_kinds() {
        let document = Html::parse_document(DIFF_PAGE);
        let fragments = diff_fragments(&document).unwrap();

        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0], "[[Kategorie:Politiker]]");
        assert_eq!(fragments[1], "Sie ist Mitglied der Partei.");
        assert_eq!(fragments[2], "Partei");
    }

    #[test]
    fn test_page_without_diff_has_no_fragments() {
        let document = Html::parse_document("<p>Keine Unterschiede</p>");
        assert!(diff_fragments(&document).unwrap().is_empty());
    }
}
