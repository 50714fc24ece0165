//! Utility functions and helpers.

pub mod html;
pub mod http;

use url::{Url, form_urlencoded};

/// Decode a percent-encoded path segment.
///
/// `+` and `&` are literal in a path, so they are protected before form
/// decoding.
pub fn decode_path_segment(segment: &str) -> String {
    let protected = segment.replace('+', "%2B").replace('&', "%26");
    form_urlencoded::parse(format!("s={protected}").as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| segment.to_string())
}

/// Recover the page slug of an edit.
///
/// Prefers everything after `/wiki/` in the event's source URI, so titles
/// containing `/` stay whole, then the last path segment, and finally the
/// title with spaces turned into underscores.
pub fn page_slug(uri: &str, title: &str) -> Option<String> {
    let from_uri = Url::parse(uri)
        .ok()
        .and_then(|u| match u.path().strip_prefix("/wiki/") {
            Some(rest) => Some(rest.to_string()),
            None => u
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string)),
        })
        .map(|path| decode_path_segment(&path))
        .filter(|slug| !slug.trim().is_empty());

    from_uri.or_else(|| {
        let title = title.trim();
        (!title.is_empty()).then(|| title.replace(' ', "_"))
    })
}

/// Build the diff-only URL for a revision pair.
pub fn diff_url(host: &str, slug: &str, old_revision: u64, new_revision: u64) -> Option<String> {
    let mut url = Url::parse(&format!("https://{host}/w/index.php")).ok()?;
    url.query_pairs_mut()
        .append_pair("title", slug)
        .append_pair("diff", &new_revision.to_string())
        .append_pair("oldid", &old_revision.to_string())
        .append_pair("diffonly", "yes");
    Some(url.to_string())
}
