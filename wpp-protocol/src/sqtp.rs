//! The SQTP header-typed request descriptor and its line-oriented parser.

use std::collections::HashMap;
use std::fmt;

/// The verb named in an `SQTP-<VERB>` request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqtpVerb {
    Select,
    Insert,
    Update,
    Delete,
    Upsert,
    Reset,
    Begin,
    Commit,
    Rollback,
    Savepoint,
    Create,
    Drop,
    Alter,
}

impl SqtpVerb {
    pub fn parse(word: &str) -> Option<SqtpVerb> {
        let verb = word.strip_prefix("SQTP-")?;
        Some(match verb.to_ascii_uppercase().as_str() {
            "SELECT" => SqtpVerb::Select,
            "INSERT" => SqtpVerb::Insert,
            "UPDATE" => SqtpVerb::Update,
            "DELETE" => SqtpVerb::Delete,
            "UPSERT" => SqtpVerb::Upsert,
            "RESET" => SqtpVerb::Reset,
            "BEGIN" => SqtpVerb::Begin,
            "COMMIT" => SqtpVerb::Commit,
            "ROLLBACK" => SqtpVerb::Rollback,
            "SAVEPOINT" => SqtpVerb::Savepoint,
            "CREATE" => SqtpVerb::Create,
            "DROP" => SqtpVerb::Drop,
            "ALTER" => SqtpVerb::Alter,
            _ => return None,
        })
    }
}

impl fmt::Display for SqtpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SqtpVerb::Select => "SELECT",
            SqtpVerb::Insert => "INSERT",
            SqtpVerb::Update => "UPDATE",
            SqtpVerb::Delete => "DELETE",
            SqtpVerb::Upsert => "UPSERT",
            SqtpVerb::Reset => "RESET",
            SqtpVerb::Begin => "BEGIN",
            SqtpVerb::Commit => "COMMIT",
            SqtpVerb::Rollback => "ROLLBACK",
            SqtpVerb::Savepoint => "SAVEPOINT",
            SqtpVerb::Create => "CREATE",
            SqtpVerb::Drop => "DROP",
            SqtpVerb::Alter => "ALTER",
        };
        f.write_str(s)
    }
}

/// The parsed header block of an SQTP request. Single-valued headers keep
/// only their last occurrence; list-valued headers (`WHERE`, `WHERE-IN`,
/// `COLUMN`, `UNIQUE-CONSTRAINT`, `FOREIGN-KEY`) accumulate in order.
#[derive(Debug, Clone, Default)]
pub struct SqtpHeaders {
    pub table: Option<String>,
    pub from: Option<String>,
    pub columns: Option<String>,
    pub where_clauses: Vec<String>,
    pub where_in: Vec<String>,
    pub order_by: Option<String>,
    pub group_by: Option<String>,
    pub having: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub join: Option<String>,
    pub on_conflict: Option<String>,
    pub name: Option<String>,
    pub r#type: Option<String>,
    pub if_not_exists: Option<String>,
    pub if_exists: Option<String>,
    pub without_rowid: Option<String>,
    pub unique: Option<String>,
    pub primary_key: Option<String>,
    pub autoinc: Option<String>,
    pub not_null: Option<String>,
    pub column_defs: Vec<String>,
    pub unique_constraints: Vec<String>,
    pub foreign_keys: Vec<String>,
    pub timing: Option<String>,
    pub event: Option<String>,
    pub for_each_row: Option<String>,
    pub when: Option<String>,
    pub update_of: Option<String>,
    pub action: Option<String>,
    pub new_name: Option<String>,
    pub content_length: Option<usize>,
    pub content_type: Option<String>,
    /// Any header not covered by the dedicated fields above; kept for
    /// completeness, ignored by every generator per the parsing invariant.
    pub unknown: HashMap<String, String>,
}

impl SqtpHeaders {
    /// Parses one `KEY: value` header line (without the trailing CRLF),
    /// folding it into the descriptor. Unknown header names are recorded
    /// but never consulted by a generator, matching "unknown headers are
    /// ignored".
    pub fn apply_line(&mut self, line: &str) {
        let Some((key, value)) = line.split_once(':') else { return };
        let key = key.trim().to_ascii_uppercase();
        let value = value.trim().to_string();

        match key.as_str() {
            "TABLE" => self.table = Some(value),
            "FROM" => self.from = Some(value),
            "COLUMNS" => self.columns = Some(value),
            "WHERE" => self.where_clauses.push(value),
            "WHERE-IN" => self.where_in.push(value),
            "ORDER-BY" => self.order_by = Some(value),
            "GROUP-BY" => self.group_by = Some(value),
            "HAVING" => self.having = Some(value),
            "LIMIT" => self.limit = Some(value),
            "OFFSET" => self.offset = Some(value),
            "JOIN" => self.join = Some(value),
            "ON-CONFLICT" => self.on_conflict = Some(value),
            "NAME" => self.name = Some(value),
            "TYPE" => self.r#type = Some(value),
            "IF-NOT-EXISTS" => self.if_not_exists = Some(value),
            "IF-EXISTS" => self.if_exists = Some(value),
            "WITHOUT-ROWID" => self.without_rowid = Some(value),
            "UNIQUE" => self.unique = Some(value),
            "PRIMARY-KEY" => self.primary_key = Some(value),
            "AUTOINC" => self.autoinc = Some(value),
            "NOT-NULL" => self.not_null = Some(value),
            "COLUMN" => self.column_defs.push(value),
            "UNIQUE-CONSTRAINT" => self.unique_constraints.push(value),
            "FOREIGN-KEY" => self.foreign_keys.push(value),
            "TIMING" => self.timing = Some(value),
            "EVENT" => self.event = Some(value),
            "FOR-EACH-ROW" => self.for_each_row = Some(value),
            "WHEN" => self.when = Some(value),
            "UPDATE-OF" => self.update_of = Some(value),
            "ACTION" => self.action = Some(value),
            "NEW-NAME" => self.new_name = Some(value),
            "CONTENT-LENGTH" => self.content_length = value.parse().ok(),
            "CONTENT-TYPE" => self.content_type = Some(value),
            other => {
                self.unknown.insert(other.to_string(), value);
            }
        }
    }

    /// Parses an entire CRLF- or LF-terminated header block (everything
    /// between the request line and the blank line that ends it).
    pub fn parse_block(block: &str) -> SqtpHeaders {
        let mut headers = SqtpHeaders::default();
        for line in block.lines() {
            if line.is_empty() {
                continue;
            }
            headers.apply_line(line);
        }
        headers
    }

    /// `TABLE`/`FROM` resolution used by SELECT/INSERT/UPDATE/DELETE/UPSERT:
    /// `FROM` takes priority over `TABLE` when both are present.
    pub fn table_name(&self) -> Option<&str> {
        self.from.as_deref().or(self.table.as_deref())
    }

    /// True when the sole WHERE clause is the literal bypass token `*`,
    /// which disables the clause entirely and is the only way to request
    /// an unconditional UPDATE/DELETE.
    pub fn where_is_wildcard_bypass(&self) -> bool {
        self.where_clauses.len() == 1 && self.where_clauses[0].trim() == "*"
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_verb_prefix() {
        assert_eq!(SqtpVerb::parse("SQTP-SELECT"), Some(SqtpVerb::Select));
        assert_eq!(SqtpVerb::parse("SQTP-select"), Some(SqtpVerb::Select));
        assert_eq!(SqtpVerb::parse("GET"), None);
        assert_eq!(SqtpVerb::parse("SQTP-FROBNICATE"), None);
    }

    #[test]
    fn where_accumulates_as_a_list() {
        let headers = SqtpHeaders::parse_block("TABLE: users\r\nWHERE: id = 1\r\nWHERE: active = 1\r\n");
        assert_eq!(headers.where_clauses, vec!["id = 1", "active = 1"]);
        assert_eq!(headers.table_name(), Some("users"));
    }

    #[test]
    fn from_overrides_table() {
        let headers = SqtpHeaders::parse_block("TABLE: old\r\nFROM: users\r\n");
        assert_eq!(headers.table_name(), Some("users"));
    }

    #[test]
    fn wildcard_where_bypass_is_detected_only_when_sole_clause() {
        let headers = SqtpHeaders::parse_block("WHERE: *\r\n");
        assert!(headers.where_is_wildcard_bypass());

        let headers = SqtpHeaders::parse_block("WHERE: *\r\nWHERE: id = 1\r\n");
        assert!(!headers.where_is_wildcard_bypass());
    }

    #[test]
    fn unknown_headers_are_recorded_but_not_in_a_typed_field() {
        let headers = SqtpHeaders::parse_block("X-CUSTOM: whatever\r\n");
        assert_eq!(headers.unknown.get("X-CUSTOM").map(String::as_str), Some("whatever"));
    }
}
