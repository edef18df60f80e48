//! Virtual-host directory resolution (§4.4 "Resource resolution", §9
//! "Virtual-host resolution via string mangling").

/// Mangles `host` into the alphabet used for vhost directory names:
/// non-alphanumeric bytes fold to `_`, everything is case-folded to
/// lowercase. Idempotent by construction, since its output is already
/// entirely drawn from the alphabet it maps onto (§9's property test).
pub fn mangle(host: &str) -> String {
    let host = host.split(':').next().unwrap_or(host); // strip an explicit port
    host.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

/// `<mangled-host>.website`, the directory name the original looks for
/// under the document root (§4.4 "Resource resolution").
pub fn normalize(host: &str) -> String {
    format!("{}.website", mangle(host))
}

/// Resolves the vhost directory to use for `host` under `root`: the
/// normalized `<host>.website` directory if it exists, else
/// `default.website`, else `root` itself (§4.4).
pub fn resolve_dir(root: &std::path::Path, host: Option<&str>, default_vhost: &str) -> std::path::PathBuf {
    if let Some(host) = host {
        let candidate = root.join(normalize(host));
        if candidate.is_dir() {
            return candidate;
        }
    }
    let fallback = root.join(default_vhost);
    if fallback.is_dir() {
        return fallback;
    }
    root.to_path_buf()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mangles_non_alnum_to_underscore_and_lowercases() {
        assert_eq!(normalize("Example.com"), "example_com.website");
    }

    #[test]
    fn strips_explicit_port() {
        assert_eq!(normalize("example.com:8080"), "example_com.website");
    }

    #[test]
    fn mangle_is_idempotent() {
        for host in ["Example.com", "a--b..c", "ALLCAPS", "already_mangled"] {
            let once = mangle(host);
            assert_eq!(mangle(&once), once);
        }
    }

    #[test]
    fn mangle_output_is_alphabet_restricted() {
        let out = mangle("Weird!Host@Name#1");
        assert!(out.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }
}
