//! URL canonicalization used as the article deduplication key.

use url::Url;

/// Query parameters that only carry campaign or click tracking.
const TRACKING_PARAMS: &[&str] = &[
    "gclid", "fbclid", "msclkid", "mc_eid", "yclid", "ref", "_ga",
];

fn is_tracking_param(name: &str) -> bool {
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name)
}

/// Strips tracking parameters and tracking-style fragments from `url`.
///
/// Unparseable input is returned unchanged. Canonicalizing an already
/// canonical URL yields the same string.
pub fn canonicalize_url(url: &str) -> String {
    let mut parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return url.to_string(),
    };

    if parsed.query().is_some() {
        let kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(name, _)| !is_tracking_param(name))
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();

        if kept.is_empty() {
            parsed.set_query(None);
        } else {
            parsed.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    if parsed.fragment().is_some_and(|fragment| fragment.contains('=')) {
        parsed.set_fragment(None);
    }

    parsed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_tracking_params() {
        assert_eq!(
            canonicalize_url("https://example.com/story?utm_source=x&utm_medium=email&id=7"),
            "https://example.com/story?id=7"
        );
        assert_eq!(
            canonicalize_url("https://example.com/story?gclid=abc&fbclid=def&ref=home"),
            "https://example.com/story"
        );
        assert_eq!(
            canonicalize_url("https://example.com/a?_ga=1&mc_eid=2&yclid=3&msclkid=4&page=2"),
            "https://example.com/a?page=2"
        );
    }

    #[test]
    fn test_keeps_non_tracking_params_in_order() {
        assert_eq!(
            canonicalize_url("https://example.com/?b=2&utm_campaign=z&a=1"),
            "https://example.com/?b=2&a=1"
        );
        // Only exact names are tracking; lookalikes survive.
        assert_eq!(
            canonicalize_url("https://example.com/?referrer=x"),
            "https://example.com/?referrer=x"
        );
    }

    #[test]
    fn test_fragment_handling() {
        assert_eq!(
            canonicalize_url("https://example.com/story#xtor=RSS-1"),
            "https://example.com/story"
        );
        assert_eq!(
            canonicalize_url("https://example.com/story#section-2"),
            "https://example.com/story#section-2"
        );
    }

    #[test]
    fn test_unparseable_input_is_returned_unchanged() {
        assert_eq!(canonicalize_url("not a url"), "not a url");
        assert_eq!(canonicalize_url(""), "");
        assert_eq!(canonicalize_url("/relative/path?utm_source=x"), "/relative/path?utm_source=x");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "https://Example.com/a/../b?utm_source=x&q=rust+lang#frag=1",
            "https://example.com/story?id=7&ref=abc",
            "http://example.com",
            "https://example.com/path with space?x=%20y",
            "mailto:someone@example.com",
            "garbage ::: input",
        ];
        for input in inputs {
            let once = canonicalize_url(input);
            assert_eq!(canonicalize_url(&once), once, "not idempotent for {}", input);
        }
    }
}
