//! Watched subjects (politicians).

use serde::{Deserialize, Serialize};

/// One watched entity, keyed by its article title.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subject {
    /// Exact article title on the watched wiki
    pub page_title: String,

    #[serde(default)]
    pub article_url: String,

    /// Full name as the directory spells it
    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub first_name: String,

    #[serde(default)]
    pub last_name: String,

    /// Party or group, without a leading '#'
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation_tag: Option<String>,
}

/// A raw directory row before names are inferred.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubjectRecord {
    pub title: String,

    #[serde(default)]
    pub article_url: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub first_name: String,

    #[serde(default)]
    pub last_name: String,

    #[serde(default)]
    pub party_hashtag: String,

    #[serde(default)]
    pub party_handle: String,

    #[serde(default)]
    pub party_short_name: String,
}

impl SubjectRecord {
    /// Affiliation tag: hashtag, then social handle, then short name.
    pub fn affiliation(&self) -> Option<String> {
        let tag = if !self.party_hashtag.is_empty() {
            self.party_hashtag.trim_start_matches('#')
        } else if !self.party_handle.is_empty() {
            self.party_handle.as_str()
        } else {
            self.party_short_name.as_str()
        };

        let tag = tag.trim();
        (!tag.is_empty()).then(|| tag.to_string())
    }

    /// Build a subject, filling missing name parts from the full name.
    pub fn into_subject(self) -> Subject {
        let affiliation_tag = self.affiliation();
        let mut first_name = self.first_name.trim().to_string();
        let mut last_name = self.last_name.trim().to_string();
        let name = self.name.trim();

        if first_name.is_empty() && !last_name.is_empty() {
            first_name = name
                .strip_suffix(last_name.as_str())
                .unwrap_or(name)
                .trim()
                .to_string();
        }
        if last_name.is_empty() && !first_name.is_empty() {
            last_name = name
                .strip_prefix(first_name.as_str())
                .unwrap_or(name)
                .trim()
                .to_string();
        }
        if first_name.is_empty() && last_name.is_empty() {
            let words: Vec<&str> = name.split_whitespace().collect();
            if let [first, last] = words.as_slice() {
                first_name = first.to_string();
                last_name = last.to_string();
            }
        }

        Subject {
            page_title: self.title,
            article_url: self.article_url,
            display_name: name.to_string(),
            first_name,
            last_name,
            affiliation_tag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, first: &str, last: &str) -> SubjectRecord {
        SubjectRecord {
            title: name.to_string(),
            name: name.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            ..SubjectRecord::default()
        }
    }

    #[test]
    fn test_infer_first_name_from_full_name() {
        let subject = record("Karl-Theodor zu Guttenberg", "", "zu Guttenberg").into_subject();
        assert_eq!(subject.first_name, "Karl-Theodor");
        assert_eq!(subject.last_name, "zu Guttenberg");
    }

    #[test]
    fn test_infer_last_name_from_full_name() {
        let subject = record("Olaf Scholz", "Olaf", "").into_subject();
        assert_eq!(subject.last_name, "Scholz");
    }

    #[test]
    fn test_split_two_word_name() {
        let subject = record("Angela Merkel", "", "").into_subject();
        assert_eq!(subject.first_name, "Angela");
        assert_eq!(subject.last_name, "Merkel");
    }

    #[test]
    fn test_three_word_name_stays_unsplit() {
        let subject = record("Anna Maria Beispiel", "", "").into_subject();
        assert!(subject.first_name.is_empty());
        assert!(subject.last_name.is_empty());
        assert_eq!(subject.display_name, "Anna Maria Beispiel");
    }

    #[test]
    fn test_affiliation_priority() {
        let mut r = record("Angela Merkel", "Angela", "Merkel");
        r.party_short_name = "CDU".to_string();
        r.party_handle = "CDU_Bund".to_string();
        assert_eq!(r.affiliation().as_deref(), Some("CDU_Bund"));

        r.party_hashtag = "#CDU".to_string();
        assert_eq!(r.affiliation().as_deref(), Some("CDU"));

        let none = record("Angela Merkel", "Angela", "Merkel");
        assert_eq!(none.affiliation(), None);
    }
}
