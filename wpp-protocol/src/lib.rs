//! wpp-protocol defines the SQTP wire vocabulary: the verb set, the
//! header-typed request descriptor, and the JSON rendering discipline used
//! to turn query results into response bodies. It is shared between the
//! HTTP request pipeline (which recognizes `SQTP-<VERB>` request lines) and
//! the SQL translator (which builds statements from the parsed headers).

use std::fmt;

use serde_derive::{Deserialize, Serialize};

pub mod json;
pub mod sqtp;

pub use json::{json_escape, JsonValue};
pub use sqtp::{SqtpHeaders, SqtpVerb};

/// A database URI as found on an SQTP request line, already classified
/// into one of the three forms described in the data model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUri {
    /// The empty path: the shared in-memory database.
    SharedMemory,
    /// The literal `.db`: an auto-created file in the working directory.
    AutoCreateFile,
    /// Any other path: must refer to an existing file, never auto-created.
    ExistingFile(String),
}

impl DatabaseUri {
    pub fn parse(uri: &str) -> DatabaseUri {
        match uri {
            "" | "/" => DatabaseUri::SharedMemory,
            ".db" | "/.db" => DatabaseUri::AutoCreateFile,
            other => DatabaseUri::ExistingFile(other.trim_start_matches('/').to_string()),
        }
    }

    /// The `sqlite3_open_v2`-equivalent connection string/flags pair.
    pub fn open_spec(&self) -> (&str, bool /* create */) {
        match self {
            DatabaseUri::SharedMemory => ("file:shm?mode=memory&cache=shared", true),
            DatabaseUri::AutoCreateFile => (".db", true),
            DatabaseUri::ExistingFile(path) => (path.as_str(), false),
        }
    }
}

/// `X-SQTP-Protocol` header value advertised on every non-error response.
pub const SQTP_PROTOCOL_VERSION: &str = "SQTP/1.0";

/// A JSON error body as rendered by `sqtp_send_error` in the original
/// implementation: `{"error": "...", "code": N}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqtpError {
    pub error: String,
    pub code: u16,
}

impl fmt::Display for SqtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl SqtpError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        SqtpError { error: message.into(), code }
    }

    pub fn to_json(&self) -> String {
        let mut out = String::with_capacity(32 + self.error.len());
        out.push_str("{\"error\":");
        json_escape(&self.error, &mut out);
        out.push_str(",\"code\":");
        out.push_str(&self.code.to_string());
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn database_uri_classification() {
        assert_eq!(DatabaseUri::parse(""), DatabaseUri::SharedMemory);
        assert_eq!(DatabaseUri::parse(".db"), DatabaseUri::AutoCreateFile);
        assert_eq!(
            DatabaseUri::parse("/var/data/app.sqlite"),
            DatabaseUri::ExistingFile("var/data/app.sqlite".to_string())
        );
    }

    #[test]
    fn error_json_round_trip_shape() {
        let err = SqtpError::new(400, "Missing table name (FROM or TABLE header)");
        let json = err.to_json();
        assert!(json.starts_with("{\"error\":\"Missing"));
        assert!(json.ends_with("\"code\":400}\n"));
    }
}
