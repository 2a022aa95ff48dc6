//! URL Canonicalizer. Produces the deterministic string form used as the
//! dedup key throughout the rest of the pipeline.

use unicode_normalization::UnicodeNormalization;
use url::Url;

/// Tracking query parameters stripped during canonicalization.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "utm_id",
    "fbclid",
    "gclid",
    "igshid",
    "mc_cid",
    "mc_eid",
    "ref",
    "ref_src",
    "spm",
];

/// Produces the canonical string form of `raw`, or `None` if it cannot be
/// canonicalized (empty input, or any parse failure).
pub fn canonicalize(raw: &str) -> Option<String> {
    // Step 1: trim + NFC normalize.
    let trimmed: String = raw.trim().nfc().collect();
    if trimmed.is_empty() {
        return None;
    }

    // Step 2: prepend a default scheme if none matching https?:// is present.
    let with_scheme = if has_http_scheme(&trimmed) {
        trimmed
    } else {
        format!("https://{trimmed}")
    };

    // Step 3: parse.
    let mut url = Url::parse(&with_scheme).ok()?;

    // Step 4: lowercase scheme and host.
    let scheme_lower = url.scheme().to_ascii_lowercase();
    if url.set_scheme(&scheme_lower).is_err() {
        return None;
    }
    if let Some(host) = url.host_str() {
        let host_lower = host.to_ascii_lowercase();
        if url.set_host(Some(&host_lower)).is_err() {
            return None;
        }
    }

    // Step 5: strip default ports.
    let default_port = match url.scheme() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    if url.port() == default_port {
        let _ = url.set_port(None);
    }

    // Step 6: discard fragment.
    url.set_fragment(None);

    // Step 7 + 8: filter tracking params, sort the rest.
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.to_ascii_lowercase().as_str()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort_by(|a, b| a.0.cmp(&b.0));

    if params.is_empty() {
        url.set_query(None);
    } else {
        let query: String = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    // Step 9: trailing-slash path normalization.
    let path = url.path().to_string();
    if path != "/" && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    // Step 10: reassemble, dropping the bare root slash when nothing follows
    // it (a root path immediately before a query string is kept).
    let mut result = url.to_string();
    if url.path() == "/" && url.query().is_none() {
        result.pop();
    }
    Some(result)
}

fn has_http_scheme(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_and_case_normalized() {
        assert_eq!(
            canonicalize("HTTP://Example.COM:80/a/"),
            Some("http://example.com/a".to_string())
        );
    }

    #[test]
    fn bare_host_gets_https_scheme() {
        assert_eq!(canonicalize("example.com"), Some("https://example.com".to_string()));
    }

    #[test]
    fn query_sorted_and_fragment_dropped() {
        assert_eq!(
            canonicalize("https://x.test/?b=2&a=1#frag"),
            Some("https://x.test/?a=1&b=2".to_string())
        );
    }

    #[test]
    fn empty_and_absent_input_is_none() {
        assert_eq!(canonicalize(""), None);
        assert_eq!(canonicalize("   "), None);
    }

    #[test]
    fn idempotent() {
        let once = canonicalize("HTTP://Example.COM:80/a/?b=2&a=1&utm_source=x#frag").unwrap();
        let twice = canonicalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn tracking_params_stripped_regardless_of_subset() {
        let base = canonicalize("https://ex.test/a").unwrap();
        let with_utm = canonicalize("https://ex.test/a?utm_source=x").unwrap();
        let with_all = canonicalize(
            "https://ex.test/a?utm_source=x&fbclid=y&gclid=z&mc_cid=w&ref=v&spm=u",
        )
        .unwrap();
        assert_eq!(base, with_utm);
        assert_eq!(base, with_all);
    }

    #[test]
    fn non_tracking_params_are_preserved() {
        assert_eq!(
            canonicalize("https://ex.test/a?id=42&utm_source=x"),
            Some("https://ex.test/a?id=42".to_string())
        );
    }

    #[test]
    fn root_path_collapses_to_bare_host() {
        assert_eq!(canonicalize("https://x.test/"), Some("https://x.test".to_string()));
    }

    #[test]
    fn root_path_before_query_keeps_slash() {
        assert_eq!(
            canonicalize("https://x.test/?b=2&a=1"),
            Some("https://x.test/?a=1&b=2".to_string())
        );
    }

    #[test]
    fn malformed_input_is_none() {
        assert_eq!(canonicalize("https://"), None);
    }
}
