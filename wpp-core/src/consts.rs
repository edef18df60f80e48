use std::time;

/// Buffer size used for CGI pipe and static-file copy loops.
pub const BUF_SIZE: usize = 1024 * 16;

/// Per-request timeout budget (§4.4).
pub const FIRST_REQUEST_HEADER_TIMEOUT: time::Duration = time::Duration::from_secs(10);
pub const SUBSEQUENT_HEADER_TIMEOUT: time::Duration = time::Duration::from_secs(5);
pub const POST_BODY_BASE_TIMEOUT: time::Duration = time::Duration::from_secs(15);
pub const POST_BODY_PER_2KB: time::Duration = time::Duration::from_secs(1);
pub const OVERALL_DECODE_TIMEOUT: time::Duration = time::Duration::from_secs(30);
pub const STATIC_SEND_BASE_TIMEOUT: time::Duration = time::Duration::from_secs(30);

/// `30 + size/2000` seconds, per §4.4 "static file send".
pub fn static_send_timeout(size: u64) -> time::Duration {
    STATIC_SEND_BASE_TIMEOUT + time::Duration::from_secs(size / 2000)
}

/// `15s + 1s per 2KB`, per §4.4 "POST bodies".
pub fn post_body_timeout(content_length: u64) -> time::Duration {
    POST_BODY_BASE_TIMEOUT + POST_BODY_PER_2KB * ((content_length / 2048) as u32)
}

/// Default per-connection request cap before a forced close (§4.4 Keep-alive).
pub const MAX_REQUESTS_PER_CONNECTION: u32 = 101;

/// Default value for `--max-child` (§4.6).
pub const DEFAULT_MAX_CHILD: usize = 1000;

/// Maximum URI length before a 414 is returned (§4.4 Safety rewrites).
pub const MAX_URI_LEN: usize = 9990;

/// Default pidfile name (§6.6, matches the original's `PID_FILE`).
pub const DEFAULT_PID_FILE: &str = ".pid";

/// Default start page opened by the single-instance browser launch.
pub const DEFAULT_START_PAGE: &str = "/hello.html";

/// How long `--stop` polls for the target process to exit before escalating
/// from SIGTERM to SIGKILL (§4.6 "Graceful stop").
pub const STOP_GRACE_PERIOD: time::Duration = time::Duration::from_secs(5);
pub const STOP_POLL_INTERVAL: time::Duration = time::Duration::from_millis(100);

/// DJB2 hash parameters (§3, §GLOSSARY).
pub const DJB2_INITIAL: u32 = 5381;

/// Build-time threshold above which the built-ins index uses a hash table
/// instead of a binary search (§4.1 "Lookup").
pub const HASH_TABLE_THRESHOLD: usize = 50;

/// `SERVER_SOFTWARE` advertised to CGI children and, doubled as, the
/// server's own identity (§6.5; matches the original's literal string).
pub const SERVER_SOFTWARE: &str = "wpp-httpd/1.0";

/// CGI/1.0 `GATEWAY_INTERFACE` value (§6.5).
pub const GATEWAY_INTERFACE: &str = "CGI/1.0";

/// Default index file names tried, in order, when a URI resolves to a
/// directory (§4.4 "Resource resolution", outcome 2).
pub const INDEX_NAMES: &[&str] = &["home", "index", "index.html", "index.cgi", "not-found.html"];

/// Name of the per-directory "not found" fallback probed while walking
/// back toward the root on an unresolved segment (§4.4, outcome 3).
pub const NOT_FOUND_NAME: &str = "not-found.html";

/// Upper bound on a request body (`Content-Length`), rejected with 400
/// before it is read (§4.4 "Safety rewrites"). The original leaves the
/// exact figure unspecified; this is an implementation parameter.
pub const MAX_CONTENT_LENGTH: u64 = 10 * 1024 * 1024;
