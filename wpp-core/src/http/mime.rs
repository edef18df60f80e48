//! Static extension -> MIME-type lookup table (§1 "Out of scope", carried
//! here as a small static table per SPEC_FULL.md's ambient-stack note).

pub fn lookup(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "txt" => "text/plain; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_extensions_resolve() {
        assert_eq!(lookup("/a.html"), "text/html; charset=utf-8");
        assert_eq!(lookup("/a.b.json"), "application/json");
    }

    #[test]
    fn unknown_extension_is_octet_stream() {
        assert_eq!(lookup("/a.unknownext"), "application/octet-stream");
    }

    #[test]
    fn no_extension_is_octet_stream() {
        assert_eq!(lookup("/noext"), "application/octet-stream");
    }
}
