//! Request-line and header parsing into a typed context (§3 "Request
//! context", §4.4 "Reading-request-line -> Reading-headers").

use std::net::SocketAddr;

use super::uri;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Head,
}

impl Method {
    fn parse(word: &str) -> Option<Method> {
        match word {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "HEAD" => Some(Method::Head),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
        }
    }
}

/// Either a plain HTTP method or an `SQTP-<VERB>` request line (§6.3).
#[derive(Debug, Clone)]
pub enum RequestKind {
    Http(Method),
    Sqtp(wpp_protocol::SqtpVerb),
}

/// A case-insensitive, order-preserving header list. Kept small and
/// list-based rather than a `HashMap` because request headers are few and
/// the pipeline only ever needs `get`/`get_all`.
#[derive(Debug, Clone, Default)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn push(&mut self, name: &str, value: &str) {
        self.0.push((name.to_ascii_lowercase(), value.trim().to_string()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.0.iter().find(|(k, _)| *k == name).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// The per-request state a freshly parsed request line + header block
/// yields, before resource resolution (§3 "Request context").
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub kind: RequestKind,
    pub raw_uri: String,
    pub path: String,
    pub query: Option<String>,
    pub http_version: String,
    pub headers: Headers,
    pub peer: SocketAddr,
}

/// What request-line parsing decided, short of a fully dispatchable
/// context: either a context ready for body-reading/dispatch, or a status
/// code the pipeline should respond with immediately and close.
pub enum ParseOutcome {
    Ok(RequestContext),
    Reject(u16),
}

impl RequestContext {
    /// Parses the request line plus the already-split header lines
    /// (without their trailing CRLF) into a `RequestContext`, applying the
    /// sanitization and length checks from §4.4 "Safety rewrites".
    pub fn parse(request_line: &str, header_lines: &[String], peer: SocketAddr) -> ParseOutcome {
        let mut parts = request_line.split_ascii_whitespace();
        let (Some(word), Some(raw_uri), Some(version)) = (parts.next(), parts.next(), parts.next())
        else {
            return ParseOutcome::Reject(400);
        };

        let kind = if let Some(verb) = wpp_protocol::SqtpVerb::parse(word) {
            RequestKind::Sqtp(verb)
        } else if let Some(method) = Method::parse(word) {
            RequestKind::Http(method)
        } else {
            return ParseOutcome::Reject(501);
        };

        if raw_uri.len() > crate::consts::MAX_URI_LEN {
            return ParseOutcome::Reject(414);
        }

        let (raw_path, query) = uri::split_query(raw_uri);
        let Some(path) = uri::sanitize(raw_path) else {
            return ParseOutcome::Reject(400);
        };
        if uri::is_forbidden(&path) {
            return ParseOutcome::Reject(404);
        }

        let mut headers = Headers::default();
        for line in header_lines {
            match line.split_once(':') {
                Some((name, value)) => headers.push(name, value),
                None => return ParseOutcome::Reject(400),
            }
        }

        ParseOutcome::Ok(RequestContext {
            kind,
            raw_uri: raw_uri.to_string(),
            path,
            query: query.map(str::to_string),
            http_version: version.to_string(),
            headers,
            peer,
        })
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers.get("content-length").and_then(|v| v.parse().ok())
    }

    pub fn host(&self) -> Option<&str> {
        self.headers.get("host")
    }

    /// Whether the client asked to keep the connection open, honoring the
    /// version default (1.1 keep-alive, 1.0 close) per §6.2.
    pub fn wants_keep_alive(&self) -> bool {
        match self.headers.get("connection").map(str::to_ascii_lowercase) {
            Some(v) if v == "close" => false,
            Some(v) if v == "keep-alive" => true,
            _ => self.http_version.trim() == "HTTP/1.1",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    #[test]
    fn parses_a_plain_get() {
        let lines = vec!["Host: example.com".to_string(), "Accept-Encoding: gzip".to_string()];
        match RequestContext::parse("GET /a/b?x=1 HTTP/1.1", &lines, peer()) {
            ParseOutcome::Ok(ctx) => {
                assert!(matches!(ctx.kind, RequestKind::Http(Method::Get)));
                assert_eq!(ctx.path, "/a/b");
                assert_eq!(ctx.query.as_deref(), Some("x=1"));
                assert_eq!(ctx.host(), Some("example.com"));
            }
            ParseOutcome::Reject(_) => panic!("expected Ok"),
        }
    }

    #[test]
    fn recognizes_sqtp_verb() {
        match RequestContext::parse("SQTP-SELECT / SQTP/1.0", &[], peer()) {
            ParseOutcome::Ok(ctx) => {
                assert!(matches!(ctx.kind, RequestKind::Sqtp(wpp_protocol::SqtpVerb::Select)));
            }
            ParseOutcome::Reject(_) => panic!("expected Ok"),
        }
    }

    #[test]
    fn unknown_method_is_rejected_as_not_implemented() {
        match RequestContext::parse("PATCH / HTTP/1.1", &[], peer()) {
            ParseOutcome::Reject(501) => {}
            _ => panic!("expected 501"),
        }
    }

    #[test]
    fn malformed_request_line_is_bad_request() {
        match RequestContext::parse("garbage", &[], peer()) {
            ParseOutcome::Reject(400) => {}
            _ => panic!("expected 400"),
        }
    }

    #[test]
    fn keep_alive_defaults_by_version() {
        let lines = vec![];
        let ParseOutcome::Ok(ctx11) = RequestContext::parse("GET / HTTP/1.1", &lines, peer()) else {
            panic!()
        };
        assert!(ctx11.wants_keep_alive());
        let ParseOutcome::Ok(ctx10) = RequestContext::parse("GET / HTTP/1.0", &lines, peer()) else {
            panic!()
        };
        assert!(!ctx10.wants_keep_alive());
    }
}
