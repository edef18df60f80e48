//! Response framing: status-line/header writing, the standard caching
//! headers, and the fixed HTML error-page template (§6.2, §1 "Out of
//! scope: specific HTML rendering of error pages").

use std::io::{self, Write};

use chrono::Utc;

use crate::consts::SERVER_SOFTWARE;

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        414 => "URI Too Long",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        _ => "Error",
    }
}

/// RFC 1123 `Date` header value, used both for `Date:` and for comparing
/// against `If-Modified-Since` (§4.4 "Caching").
pub fn http_date_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn http_date(secs: u64) -> String {
    chrono::DateTime::<Utc>::from_timestamp(secs as i64, 0)
        .map(|d| d.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
        .unwrap_or_else(http_date_now)
}

/// Writes a status line plus the headers every response carries
/// (`Date`, `Server`, `Connection`), followed by the caller's extra
/// headers, the blank line, and nothing else.
pub fn write_head<W: Write>(
    w: &mut W,
    status: u16,
    headers: &[(&str, String)],
    keep_alive: bool,
) -> io::Result<()> {
    write!(w, "HTTP/1.1 {status} {}\r\n", reason_phrase(status))?;
    write!(w, "Date: {}\r\n", http_date_now())?;
    write!(w, "Server: {SERVER_SOFTWARE}\r\n")?;
    write!(w, "Connection: {}\r\n", if keep_alive { "keep-alive" } else { "close" })?;
    if status >= 400 {
        write!(w, "Cache-Control: no-cache, no-store, must-revalidate\r\n")?;
        write!(w, "Pragma: no-cache\r\n")?;
        write!(w, "Expires: 0\r\n")?;
    }
    for (name, value) in headers {
        write!(w, "{name}: {value}\r\n")?;
    }
    write!(w, "\r\n")
}

/// A minimal fixed HTML body for an error status (§1: the exact rendering
/// is out of scope; this is the concrete, fixed template used here).
pub fn error_body(status: u16) -> Vec<u8> {
    format!(
        "<!DOCTYPE html><html><head><title>{status} {reason}</title></head>\
         <body><h1>{status} {reason}</h1></body></html>\n",
        status = status,
        reason = reason_phrase(status),
    )
    .into_bytes()
}

/// Sends a complete error response: headers plus the fixed HTML body.
/// Per §7, any response >= 400 forces `Connection: close` regardless of
/// what the client requested.
pub fn send_error<W: Write>(w: &mut W, status: u16) -> io::Result<()> {
    let body = error_body(status);
    write_head(w, status, &[("Content-Type".into(), "text/html; charset=utf-8".to_string()), ("Content-Length".into(), body.len().to_string())], false)?;
    w.write_all(&body)
}

/// Sends a `Location:`-bearing redirect with an empty body.
pub fn send_redirect<W: Write>(w: &mut W, status: u16, location: &str, keep_alive: bool) -> io::Result<()> {
    write_head(w, status, &[("Location".into(), location.to_string()), ("Content-Length".into(), "0".to_string())], keep_alive)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_body_mentions_status_and_reason() {
        let body = String::from_utf8(error_body(404)).unwrap();
        assert!(body.contains("404"));
        assert!(body.contains("Not Found"));
    }

    #[test]
    fn error_status_always_carries_no_cache_headers() {
        let mut buf = Vec::new();
        // write_head honors the caller's keep_alive flag; the pipeline is
        // responsible for passing `false` whenever status >= 400.
        write_head(&mut buf, 404, &[], false).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Connection: close"));
        assert!(text.contains("Cache-Control: no-cache"));
    }
}
