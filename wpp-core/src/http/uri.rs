//! URI sanitization (§3 "Request context" invariants, §4.4 "Safety
//! rewrites").

use crate::consts::MAX_URI_LEN;

/// Splits `raw` (the request-line target) into its path and query suffix.
pub fn split_query(raw: &str) -> (&str, Option<&str>) {
    match raw.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (raw, None),
    }
}

/// Percent-decodes and sanitizes a URI path per §3: every surviving byte is
/// drawn from `[0-9A-Za-z._~:/-]`; everything else becomes `_`. `%XX`
/// triplets collapse to `_` except `%2E` -> `.` and `%2F` -> `/`, which are
/// restored to their literal characters before the alphabet filter runs
/// (so a path-traversal attempt encoded as `%2e%2e` still sanitizes to
/// `..` and is then rejected by `is_forbidden_segment`/414 checks upstream,
/// never silently smuggled through as an opaque `_`).
pub fn sanitize(raw_path: &str) -> Option<String> {
    if raw_path.len() > MAX_URI_LEN {
        return None;
    }
    if !raw_path.starts_with('/') {
        return None;
    }

    let bytes = raw_path.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = &raw_path[i + 1..i + 3];
            match hex.to_ascii_uppercase().as_str() {
                "2E" => {
                    out.push('.');
                    i += 3;
                    continue;
                }
                "2F" => {
                    out.push('/');
                    i += 3;
                    continue;
                }
                _ => {
                    if u8::from_str_radix(hex, 16).is_ok() {
                        out.push('_');
                        i += 3;
                        continue;
                    }
                }
            }
        }
        let c = bytes[i] as char;
        if c.is_ascii_alphanumeric() || "._~:/-".contains(c) {
            out.push(c);
        } else {
            out.push('_');
        }
        i += 1;
    }
    Some(out)
}

/// §4.4 "Safety rewrites": a segment beginning with `/.` or `/-` is
/// forbidden except for the prefix `/.well-known/` (still disallowing
/// `/..`).
pub fn is_forbidden(path: &str) -> bool {
    if path.contains("/..") {
        return true;
    }
    if path.starts_with("/.well-known/") {
        return false;
    }
    path.split('/').skip(1).any(|seg| seg.starts_with('.') || seg.starts_with('-'))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn collapses_unsafe_bytes_to_underscore() {
        assert_eq!(sanitize("/a b").as_deref(), Some("/a_b"));
    }

    #[test]
    fn percent_2e_and_2f_are_restored() {
        assert_eq!(sanitize("/a%2Eb%2Fc").as_deref(), Some("/a.b/c"));
    }

    #[test]
    fn other_percent_triplets_collapse() {
        assert_eq!(sanitize("/a%41b").as_deref(), Some("/a_b"));
    }

    #[test]
    fn requires_leading_slash() {
        assert_eq!(sanitize("no-leading-slash"), None);
    }

    #[test]
    fn oversized_uri_rejected() {
        let long = format!("/{}", "a".repeat(MAX_URI_LEN + 1));
        assert_eq!(sanitize(&long), None);
    }

    #[test]
    fn forbids_dotfile_segments_except_well_known() {
        assert!(is_forbidden("/.git/config"));
        assert!(!is_forbidden("/.well-known/acme-challenge/x"));
        assert!(is_forbidden("/a/../b"));
        assert!(is_forbidden("/-rf"));
    }

    #[test]
    fn splits_query_suffix() {
        assert_eq!(split_query("/a?b=c"), ("/a", Some("b=c")));
        assert_eq!(split_query("/a"), ("/a", None));
    }
}
