//! URL scanning over the raw message text.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;
use url::Url;

use crate::model::attachment::UrlCandidate;

/// Path suffixes that are never submitted (inline images, tracking pixels).
const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif"];

/// Trailing characters that end a sentence rather than a URL.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', '\'', '"'];

fn url_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bhttps?://[^\s<>"'(){}\[\]\\^`|]+"#).expect("URL token regex is valid")
    })
}

/// Remove quoted-printable soft line breaks (`=` at end of line).
fn join_soft_breaks(text: &str) -> String {
    text.replace("=\r\n", "").replace("=\n", "")
}

/// Extract submittable URLs from `raw`, in discovery order, without duplicates.
///
/// `exclusions` are matched against the normalized URL; build them
/// case-insensitive (see [`crate::config::FilterConfig::url_exclusions`]).
pub fn extract_urls(raw: &[u8], exclusions: &[Regex]) -> Vec<UrlCandidate> {
    let text = join_soft_breaks(&String::from_utf8_lossy(raw));
    let mut seen = HashSet::new();
    let mut result = Vec::new();

    for token in url_token_regex().find_iter(&text) {
        let token = token.as_str().trim_end_matches(TRAILING_PUNCTUATION);
        let Ok(url) = Url::parse(token) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        let path = url.path().to_ascii_lowercase();
        if IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
            continue;
        }
        let normalized = url.as_str();
        if exclusions.iter().any(|re| re.is_match(normalized)) {
            debug!(url = normalized, "URL matches exclusion pattern");
            continue;
        }
        if seen.insert(normalized.to_string()) {
            result.push(UrlCandidate(normalized.to_string()));
        }
    }
    result
}
