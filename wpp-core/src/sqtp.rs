//! SQL-over-HTTP: translates a parsed `SqtpHeaders` descriptor plus a JSON
//! request body into SQL executed against the embedded engine (§6.3, §6.4).
//!
//! Every value that comes from the JSON body or from a COLUMNS list paired
//! with body positions is bound as a `rusqlite` parameter. Only text that
//! comes from headers naming SQL keywords/identifiers themselves (table and
//! column names, WHERE fragments, ORDER BY expressions, trigger bodies) is
//! assembled into the statement text, the same way the original server
//! does it — those are schema-shaped tokens, not data.

use rusqlite::{Connection, OpenFlags};
use serde_json::Value as Json;
use tracing::instrument;

use wpp_protocol::{json_escape, DatabaseUri, JsonValue, SqtpHeaders, SqtpVerb, SQTP_PROTOCOL_VERSION};

/// A fully rendered SQTP response: the caller (the HTTP pipeline) is
/// responsible for the status line and `X-SQTP-Protocol` framing; this is
/// everything downstream of that.
pub struct SqtpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub extra_headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl SqtpResponse {
    fn json(status: u16, body: String) -> Self {
        SqtpResponse { status, content_type: "application/json; charset=utf-8", extra_headers: Vec::new(), body: body.into_bytes() }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        let mut body = String::new();
        body.push_str("{\"error\":");
        json_escape(&message.into(), &mut body);
        body.push_str(&format!(",\"code\":{status}}}\n"));
        Self::json(status, body)
    }

    fn with_changes(mut self, changes: i64) -> Self {
        self.extra_headers.push(("X-SQTP-Changes".to_string(), changes.to_string()));
        self
    }
}

/// Entry point called by the HTTP pipeline for every `SQTP-<VERB>` request.
/// `object_path` is the request path with any leading vhost/document-root
/// segments already stripped — the part CREATE/DROP inspect for a trailing
/// `table`/`index`/`trigger` object-type segment.
#[instrument(skip_all, fields(verb = %verb))]
pub fn dispatch(verb: SqtpVerb, db_uri: &DatabaseUri, object_path: &str, headers: &SqtpHeaders, body: &[u8]) -> SqtpResponse {
    match verb {
        SqtpVerb::Select => handle_select(db_uri, headers),
        SqtpVerb::Insert => handle_insert(db_uri, headers, body),
        SqtpVerb::Update => handle_update(db_uri, headers, body),
        SqtpVerb::Delete => handle_delete(db_uri, headers),
        SqtpVerb::Upsert => handle_upsert(db_uri, headers, body),
        SqtpVerb::Reset => handle_reset(db_uri, headers, body),
        SqtpVerb::Begin => handle_transaction_verb(db_uri, "BEGIN"),
        SqtpVerb::Commit => handle_transaction_verb(db_uri, "COMMIT"),
        SqtpVerb::Rollback => handle_transaction_verb(db_uri, "ROLLBACK"),
        SqtpVerb::Savepoint => SqtpResponse::error(501, "SAVEPOINT not fully implemented - use NAME header for savepoint name"),
        SqtpVerb::Create => handle_create(db_uri, object_path, headers),
        SqtpVerb::Drop => handle_drop(db_uri, object_path, headers),
        SqtpVerb::Alter => handle_alter(db_uri, headers),
    }
}

pub const PROTOCOL_VERSION: &str = SQTP_PROTOCOL_VERSION;

/// Whether the on-disk database this URI names is there to open (§ data
/// model, three-way rule: shared memory and the auto-create `.db` path are
/// always "there"; anything else must already exist).
fn database_exists(uri: &DatabaseUri) -> bool {
    match uri {
        DatabaseUri::SharedMemory | DatabaseUri::AutoCreateFile => true,
        DatabaseUri::ExistingFile(path) => std::path::Path::new(path).exists(),
    }
}

/// Opens the database this SQTP request names, mapping the three-way rule
/// onto `SQLITE_OPEN_CREATE` and returning the 404-vs-500 split the
/// original performs before every verb handler.
fn open_database(uri: &DatabaseUri) -> Result<Connection, SqtpResponse> {
    let (conn_str, create) = uri.open_spec();
    let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    if create {
        flags |= OpenFlags::SQLITE_OPEN_CREATE;
    }
    Connection::open_with_flags(conn_str, flags).map_err(|_| {
        if database_exists(uri) {
            SqtpResponse::error(500, "Failed to open database")
        } else {
            SqtpResponse::error(404, "Database not found")
        }
    })
}

/// Renders a single ` WHERE ...` clause from the accumulated fragments,
/// honoring the `WHERE: *` full-table bypass token for verbs that require
/// one. Returns an empty string when there is nothing to append.
fn where_clause(headers: &SqtpHeaders) -> String {
    if headers.where_clauses.is_empty() || headers.where_is_wildcard_bypass() {
        return String::new();
    }
    let joined = headers
        .where_clauses
        .iter()
        .map(|clause| format!("({clause})"))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(" WHERE {joined}")
}

/// Splits a `COLUMNS: a, b, c` header value into trimmed column names, the
/// same `strtok`-on-comma behavior the original uses for UPDATE/UPSERT.
fn split_columns(columns: &str) -> Vec<&str> {
    columns.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
}

/// Binds one JSON body value as a `rusqlite::ToSql` parameter, covering the
/// same four JSON kinds the original's literal-embedding switch handles
/// (string/number/null/bool) — bound instead of spliced into SQL text.
fn to_sql_param(value: &Json) -> Box<dyn rusqlite::ToSql> {
    match value {
        Json::String(s) => Box::new(s.clone()),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Box::new(i)
            } else {
                Box::new(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::Bool(b) => Box::new(*b as i64),
        Json::Null | Json::Array(_) | Json::Object(_) => Box::new(Option::<i64>::None),
    }
}

fn bind_params(values: &[Json]) -> Vec<Box<dyn rusqlite::ToSql>> {
    values.iter().map(to_sql_param).collect()
}

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(", ")
}

// ---------------------------------------------------------------- SELECT

fn handle_select(db_uri: &DatabaseUri, headers: &SqtpHeaders) -> SqtpResponse {
    let Some(table) = headers.table_name() else {
        return SqtpResponse::error(400, "Missing table name (FROM or TABLE header)");
    };
    let conn = match open_database(db_uri) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let columns = headers.columns.as_deref().filter(|c| !c.is_empty()).unwrap_or("*");
    let mut sql = format!("SELECT {columns} FROM {table}");
    sql.push_str(&where_clause(headers));
    if let Some(order_by) = &headers.order_by {
        sql.push_str(&format!(" ORDER BY {order_by}"));
    }
    if let Some(limit) = &headers.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = &headers.offset {
        sql.push_str(&format!(" OFFSET {offset}"));
    }

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return SqtpResponse::error(500, e.to_string()),
    };
    let col_count = stmt.column_count();
    let col_names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();

    let mut rows = match stmt.query([]) {
        Ok(r) => r,
        Err(e) => return SqtpResponse::error(500, e.to_string()),
    };

    let mut body = String::from("[");
    let mut row_count = 0;
    loop {
        let row = match rows.next() {
            Ok(Some(row)) => row,
            Ok(None) => break,
            Err(e) => return SqtpResponse::error(500, e.to_string()),
        };
        if row_count > 0 {
            body.push(',');
        }
        body.push_str("\n  {");
        for i in 0..col_count {
            if i > 0 {
                body.push(',');
            }
            body.push('"');
            body.push_str(&col_names[i]);
            body.push_str("\":");
            column_value(row, i).write_to(&mut body);
        }
        body.push('}');
        row_count += 1;
    }
    body.push_str("\n]\n");

    SqtpResponse::json(200, body)
}

fn column_value(row: &rusqlite::Row<'_>, idx: usize) -> JsonValue {
    use rusqlite::types::ValueRef;
    match row.get_ref_unwrap(idx) {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::Integer(i),
        ValueRef::Real(f) => JsonValue::Float(f),
        ValueRef::Text(t) => JsonValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => JsonValue::Null,
    }
}

// ---------------------------------------------------------------- INSERT

/// True when `root` is a non-empty JSON array whose first element is
/// itself an array — the batch-insert shape, vs. a single flat row.
fn is_array_of_arrays(root: &Json) -> bool {
    matches!(root, Json::Array(rows) if rows.first().is_some_and(Json::is_array))
}

fn insert_one_row(conn: &Connection, table: &str, columns: &str, values: &[Json]) -> rusqlite::Result<usize> {
    let sql = format!("INSERT INTO {table} ({columns}) VALUES ({})", placeholders(values.len()));
    let params = bind_params(values);
    let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    conn.execute(&sql, refs.as_slice())
}

fn handle_insert(db_uri: &DatabaseUri, headers: &SqtpHeaders, body: &[u8]) -> SqtpResponse {
    let Some(table) = &headers.table else {
        return SqtpResponse::error(400, "Missing TABLE header");
    };
    let Some(columns) = headers.columns.as_deref().filter(|c| !c.is_empty()) else {
        return SqtpResponse::error(400, "Missing COLUMNS header");
    };
    let root: Json = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => return SqtpResponse::error(400, "Invalid JSON in request body"),
    };

    let conn = match open_database(db_uri) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let mut inserted = 0i64;
    let mut last_error = None;
    let _ = conn.execute_batch("BEGIN");
    if is_array_of_arrays(&root) {
        for row in root.as_array().unwrap() {
            let Some(values) = row.as_array() else { continue };
            match insert_one_row(&conn, table, columns, values) {
                Ok(_) => inserted += 1,
                Err(e) => last_error = Some(e.to_string()),
            }
        }
    } else if let Some(values) = root.as_array() {
        match insert_one_row(&conn, table, columns, values) {
            Ok(_) => inserted = 1,
            Err(e) => last_error = Some(e.to_string()),
        }
    }
    let _ = conn.execute_batch("COMMIT");

    if inserted > 0 {
        SqtpResponse::json(201, format!("{{\"inserted\":{inserted}}}\n")).with_changes(inserted)
    } else {
        SqtpResponse::error(500, last_error.unwrap_or_else(|| "Insert failed".to_string()))
    }
}

// ---------------------------------------------------------------- UPDATE

fn handle_update(db_uri: &DatabaseUri, headers: &SqtpHeaders, body: &[u8]) -> SqtpResponse {
    let Some(table) = &headers.table else {
        return SqtpResponse::error(400, "Missing TABLE header");
    };
    let Some(columns) = headers.columns.as_deref().filter(|c| !c.is_empty()) else {
        return SqtpResponse::error(400, "Missing COLUMNS header");
    };
    if headers.where_clauses.is_empty() {
        return SqtpResponse::error(400, "WHERE clause required for UPDATE (use WHERE: * for full-table update)");
    }
    let root: Json = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => return SqtpResponse::error(400, "Invalid JSON in request body"),
    };
    let Some(values) = root.as_array() else {
        return SqtpResponse::error(400, "Request body must be a JSON array");
    };

    let conn = match open_database(db_uri) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let cols = split_columns(columns);
    let n = cols.len().min(values.len());
    let set_clause = cols[..n].iter().map(|c| format!("{c} = ?")).collect::<Vec<_>>().join(", ");
    let sql = format!("UPDATE {table} SET {set_clause}{}", where_clause(headers));

    let params = bind_params(&values[..n]);
    let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    match conn.execute(&sql, refs.as_slice()) {
        Ok(changes) => SqtpResponse::json(200, format!("{{\"updated\":{changes}}}\n")).with_changes(changes as i64),
        Err(e) => SqtpResponse::error(500, e.to_string()),
    }
}

// ---------------------------------------------------------------- DELETE

fn handle_delete(db_uri: &DatabaseUri, headers: &SqtpHeaders) -> SqtpResponse {
    let Some(table) = &headers.table else {
        return SqtpResponse::error(400, "Missing TABLE header");
    };
    if headers.where_clauses.is_empty() {
        return SqtpResponse::error(400, "WHERE clause required for DELETE (use WHERE: * for full-table delete)");
    }

    let conn = match open_database(db_uri) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let sql = format!("DELETE FROM {table}{}", where_clause(headers));
    match conn.execute(&sql, []) {
        Ok(changes) => SqtpResponse::json(200, format!("{{\"deleted\":{changes}}}\n")).with_changes(changes as i64),
        Err(e) => SqtpResponse::error(500, e.to_string()),
    }
}

// ---------------------------------------------------------------- UPSERT

fn handle_upsert(db_uri: &DatabaseUri, headers: &SqtpHeaders, body: &[u8]) -> SqtpResponse {
    let Some(table) = &headers.table else {
        return SqtpResponse::error(400, "Missing TABLE header");
    };
    let Some(columns) = headers.columns.as_deref().filter(|c| !c.is_empty()) else {
        return SqtpResponse::error(400, "Missing COLUMNS header");
    };
    let root: Json = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => return SqtpResponse::error(400, "Invalid JSON in request body"),
    };
    let Some(values) = root.as_array() else {
        return SqtpResponse::error(400, "Request body must be a JSON array");
    };

    let conn = match open_database(db_uri) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let cols = split_columns(columns);
    let set_clause = cols.iter().map(|c| format!("{c} = excluded.{c}")).collect::<Vec<_>>().join(", ");
    let sql = format!(
        "INSERT INTO {table} ({columns}) VALUES ({}) ON CONFLICT DO UPDATE SET {set_clause}",
        placeholders(values.len())
    );
    let params = bind_params(values);
    let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    match conn.execute(&sql, refs.as_slice()) {
        Ok(changes) => SqtpResponse::json(200, format!("{{\"upserted\":{changes}}}\n")).with_changes(changes as i64),
        Err(e) => SqtpResponse::error(500, e.to_string()),
    }
}

// ----------------------------------------------------------------- RESET

/// DELETE then INSERT in one transaction (§6.4 "RESET"). Unlike UPDATE and
/// DELETE, the delete phase here runs with whatever WHERE fragments are
/// given verbatim and is simply skipped when there are none — RESET has no
/// `WHERE: *` bypass convention of its own to honor.
fn handle_reset(db_uri: &DatabaseUri, headers: &SqtpHeaders, body: &[u8]) -> SqtpResponse {
    let Some(table) = &headers.table else {
        return SqtpResponse::error(400, "Missing TABLE header");
    };
    let Some(columns) = headers.columns.as_deref().filter(|c| !c.is_empty()) else {
        return SqtpResponse::error(400, "Missing COLUMNS header");
    };
    let root: Json = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => return SqtpResponse::error(400, "Invalid JSON in request body"),
    };

    let conn = match open_database(db_uri) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let _ = conn.execute_batch("BEGIN");

    let mut deleted = 0i64;
    if !headers.where_clauses.is_empty() {
        let joined = headers.where_clauses.iter().map(|c| format!("({c})")).collect::<Vec<_>>().join(" AND ");
        let sql = format!("DELETE FROM {table} WHERE {joined}");
        match conn.execute(&sql, []) {
            Ok(changes) => deleted = changes as i64,
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                return SqtpResponse::error(500, e.to_string());
            }
        }
    }

    let mut inserted = 0i64;
    if is_array_of_arrays(&root) {
        for row in root.as_array().unwrap() {
            let Some(values) = row.as_array() else { continue };
            if insert_one_row(&conn, table, columns, values).is_ok() {
                inserted += 1;
            }
        }
    } else if let Some(values) = root.as_array() {
        if insert_one_row(&conn, table, columns, values).is_ok() {
            inserted = 1;
        }
    }
    let _ = conn.execute_batch("COMMIT");

    SqtpResponse::json(200, format!("{{\"deleted\":{deleted},\"inserted\":{inserted}}}\n")).with_changes(inserted)
}

// ------------------------------------------------------- BEGIN/COMMIT/ROLLBACK

/// BEGIN/COMMIT/ROLLBACK are scoped to this single request's connection
/// (§ Open Questions: the per-process, fork-per-connection architecture
/// gives each request its own `Connection`, so there is no notion of a
/// transaction surviving across requests the way a long-lived connection
/// would allow — each of these verbs opens, performs its one statement,
/// and closes).
fn handle_transaction_verb(db_uri: &DatabaseUri, sql: &str) -> SqtpResponse {
    let conn = match open_database(db_uri) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match conn.execute_batch(sql) {
        Ok(()) => SqtpResponse::json(200, String::new()),
        Err(e) => SqtpResponse::error(500, format!("{sql} failed: {e}")),
    }
}

// ----------------------------------------------------------------- CREATE

/// `table`/`index`/`trigger`, however the caller settled on it (URI path
/// tail takes priority over the `TYPE` header, matching the original).
enum ObjectKind {
    Table,
    Index,
    Trigger,
}

impl ObjectKind {
    fn parse(word: &str) -> Option<ObjectKind> {
        match word.to_ascii_lowercase().as_str() {
            "table" => Some(ObjectKind::Table),
            "index" => Some(ObjectKind::Index),
            "trigger" => Some(ObjectKind::Trigger),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::Index => "index",
            ObjectKind::Trigger => "trigger",
        }
    }
}

/// The trailing path segment (`/db/main/table` -> `table`), with any query
/// string or fragment stripped, as used by CREATE/DROP to name the object
/// type.
fn last_path_segment(path: &str) -> &str {
    let tail = path.rsplit('/').next().unwrap_or("");
    let tail = tail.split('?').next().unwrap_or(tail);
    tail.split('#').next().unwrap_or(tail)
}

fn handle_create(db_uri: &DatabaseUri, object_path: &str, headers: &SqtpHeaders) -> SqtpResponse {
    let Some(name) = headers.name.as_deref().filter(|n| !n.is_empty()) else {
        return SqtpResponse::error(400, "NAME header is required for CREATE");
    };

    let object_kind = ObjectKind::parse(last_path_segment(object_path))
        .or_else(|| headers.r#type.as_deref().and_then(ObjectKind::parse));
    let Some(object_kind) = object_kind else {
        return SqtpResponse::error(400, "Object type (table, index, or trigger) must be specified in URI path (e.g., /db/main/table) or TYPE header");
    };

    let conn = match open_database(db_uri) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let sql = match object_kind {
        ObjectKind::Table => create_table_sql(headers),
        ObjectKind::Index => create_index_sql(headers),
        ObjectKind::Trigger => create_trigger_sql(headers),
    };
    let sql = match sql {
        Ok(sql) => sql,
        Err(resp) => return resp,
    };

    if let Err(e) = conn.execute_batch(&sql) {
        return SqtpResponse::error(500, format!("SQLite error: {e}"));
    }

    let status = if headers.if_not_exists.is_some() { 200 } else { 201 };
    let mut body = String::from("{\"created\":1,\"type\":\"");
    body.push_str(object_kind.as_str());
    body.push_str("\",\"name\":");
    json_escape(name, &mut body);
    body.push_str("}\n");
    SqtpResponse::json(status, body)
}

fn create_table_sql(headers: &SqtpHeaders) -> Result<String, SqtpResponse> {
    let name = headers.name.as_deref().unwrap_or_default();
    if headers.column_defs.is_empty() {
        return Err(SqtpResponse::error(400, "At least one COLUMN header is required for CREATE TABLE"));
    }

    let mut sql = String::from("CREATE ");
    if headers.r#type.as_deref().is_some_and(|t| t.eq_ignore_ascii_case("temporary")) {
        sql.push_str("TEMPORARY ");
    }
    sql.push_str("TABLE ");
    if headers.if_not_exists.is_some() {
        sql.push_str("IF NOT EXISTS ");
    }
    sql.push_str(name);
    sql.push_str(" (");

    // A single-column PRIMARY KEY gets folded into that column's
    // definition (enabling AUTOINCREMENT); a multi-column key becomes a
    // trailing table constraint instead.
    let single_pk_col = headers.primary_key.as_deref().filter(|pk| !pk.contains(',')).and_then(|pk| {
        headers.column_defs.iter().position(|def| {
            def.split_whitespace().next().is_some_and(|col_name| col_name.eq_ignore_ascii_case(pk))
        })
    });

    for (i, def) in headers.column_defs.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(def);
        if Some(i) == single_pk_col {
            sql.push_str(" PRIMARY KEY");
            if headers.autoinc.as_deref().is_some_and(|v| v.eq_ignore_ascii_case("true")) {
                sql.push_str(" AUTOINCREMENT");
            }
        }
    }

    if let Some(pk) = &headers.primary_key {
        if single_pk_col.is_none() {
            sql.push_str(&format!(", PRIMARY KEY ({pk})"));
        }
    }
    for unique in &headers.unique_constraints {
        sql.push_str(&format!(", UNIQUE ({unique})"));
    }
    for fk in &headers.foreign_keys {
        sql.push_str(&format!(", FOREIGN KEY {fk}"));
    }
    sql.push(')');

    if headers.without_rowid.as_deref().is_some_and(|v| v.eq_ignore_ascii_case("true")) {
        sql.push_str(" WITHOUT ROWID");
    }

    Ok(sql)
}

fn create_index_sql(headers: &SqtpHeaders) -> Result<String, SqtpResponse> {
    let name = headers.name.as_deref().unwrap_or_default();
    let Some(table) = headers.table.as_deref().filter(|t| !t.is_empty()) else {
        return Err(SqtpResponse::error(400, "TABLE header is required for CREATE INDEX"));
    };
    if headers.column_defs.is_empty() {
        return Err(SqtpResponse::error(400, "At least one COLUMN header is required for CREATE INDEX"));
    }

    let mut sql = String::from("CREATE ");
    if headers.unique.as_deref().is_some_and(|v| v.eq_ignore_ascii_case("true")) {
        sql.push_str("UNIQUE ");
    }
    sql.push_str("INDEX ");
    if headers.if_not_exists.is_some() {
        sql.push_str("IF NOT EXISTS ");
    }
    sql.push_str(&format!("{name} ON {table} ("));
    sql.push_str(&headers.column_defs.join(", "));
    sql.push(')');

    if !headers.where_clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&headers.where_clauses.join(" AND "));
    }

    Ok(sql)
}

fn create_trigger_sql(headers: &SqtpHeaders) -> Result<String, SqtpResponse> {
    let name = headers.name.as_deref().unwrap_or_default();
    let Some(table) = headers.table.as_deref().filter(|t| !t.is_empty()) else {
        return Err(SqtpResponse::error(400, "TABLE header is required for CREATE TRIGGER"));
    };
    let Some(timing) = headers.timing.as_deref().filter(|t| !t.is_empty()) else {
        return Err(SqtpResponse::error(400, "TIMING header is required for CREATE TRIGGER (BEFORE/AFTER/INSTEAD OF)"));
    };
    let Some(event) = headers.event.as_deref().filter(|e| !e.is_empty()) else {
        return Err(SqtpResponse::error(400, "EVENT header is required for CREATE TRIGGER (INSERT/UPDATE/DELETE)"));
    };
    let mut sql = String::from("CREATE ");
    if headers.r#type.as_deref().is_some_and(|t| t.eq_ignore_ascii_case("temporary")) {
        sql.push_str("TEMPORARY ");
    }
    sql.push_str("TRIGGER ");
    if headers.if_not_exists.is_some() {
        sql.push_str("IF NOT EXISTS ");
    }
    sql.push_str(&format!("{name} {timing} {event} "));
    if let Some(update_of) = headers.update_of.as_deref().filter(|u| !u.is_empty()) {
        sql.push_str(&format!("OF {update_of} "));
    }
    sql.push_str(&format!("ON {table} "));
    if headers.for_each_row.as_deref().map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(true) {
        sql.push_str("FOR EACH ROW ");
    }
    if let Some(when) = headers.when.as_deref().filter(|w| !w.is_empty()) {
        sql.push_str(&format!("WHEN {when} "));
    }
    sql.push_str("BEGIN ");
    for action in trigger_actions(headers) {
        sql.push_str(action);
        sql.push_str("; ");
    }
    sql.push_str("END");

    Ok(sql)
}

/// `ACTION` headers are a list-valued header in the original C descriptor;
/// this descriptor carries them through `unknown` only if the caller used
/// a different casing, but the canonical spelling is list-valued like
/// `COLUMN`/`WHERE` — surfaced here as its own accessor so
/// `create_trigger_sql` has at least one action to require and render.
fn trigger_actions(headers: &SqtpHeaders) -> Vec<&str> {
    headers
        .action
        .as_deref()
        .map(|a| a.split(';').map(str::trim).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

// ------------------------------------------------------------------- DROP

fn handle_drop(db_uri: &DatabaseUri, object_path: &str, headers: &SqtpHeaders) -> SqtpResponse {
    let Some(name) = headers.name.as_deref().filter(|n| !n.is_empty()) else {
        return SqtpResponse::error(400, "NAME header is required for DROP");
    };
    let Some(object_kind) = ObjectKind::parse(last_path_segment(object_path)) else {
        return SqtpResponse::error(400, "Object type (table, index, or trigger) must be specified in URI path (e.g., /db/main/table)");
    };

    let conn = match open_database(db_uri) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let mut sql = String::from("DROP ");
    sql.push_str(match object_kind {
        ObjectKind::Table => "TABLE ",
        ObjectKind::Index => "INDEX ",
        ObjectKind::Trigger => "TRIGGER ",
    });
    if headers.if_exists.is_some() {
        sql.push_str("IF EXISTS ");
    }
    sql.push_str(name);

    if let Err(e) = conn.execute_batch(&sql) {
        return SqtpResponse::error(500, format!("SQLite error: {e}"));
    }

    let mut body = String::from("{\"dropped\":1,\"type\":\"");
    body.push_str(object_kind.as_str());
    body.push_str("\",\"name\":");
    json_escape(name, &mut body);
    body.push_str("}\n");
    SqtpResponse::json(200, body)
}

// ------------------------------------------------------------------ ALTER

fn handle_alter(db_uri: &DatabaseUri, headers: &SqtpHeaders) -> SqtpResponse {
    let Some(name) = headers.name.as_deref().filter(|n| !n.is_empty()) else {
        return SqtpResponse::error(400, "NAME header is required for ALTER TABLE");
    };
    let Some(action) = headers.action.as_deref().filter(|a| !a.is_empty()) else {
        return SqtpResponse::error(400, "ACTION header is required for ALTER TABLE");
    };

    let conn = match open_database(db_uri) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let sql = match action.to_ascii_uppercase().as_str() {
        "RENAME-TABLE" => {
            let Some(new_name) = headers.new_name.as_deref().filter(|n| !n.is_empty()) else {
                return SqtpResponse::error(400, "NEW-NAME header is required for RENAME-TABLE");
            };
            format!("ALTER TABLE {name} RENAME TO {new_name}")
        }
        "ADD-COLUMN" => {
            let Some(def) = headers.column_defs.first() else {
                return SqtpResponse::error(400, "COLUMN header is required for ADD-COLUMN");
            };
            format!("ALTER TABLE {name} ADD COLUMN {def}")
        }
        "RENAME-COLUMN" => {
            let Some(old) = headers.column_defs.first() else {
                return SqtpResponse::error(400, "COLUMN header is required for RENAME-COLUMN (old column name)");
            };
            let Some(new_name) = headers.new_name.as_deref().filter(|n| !n.is_empty()) else {
                return SqtpResponse::error(400, "NEW-NAME header is required for RENAME-COLUMN");
            };
            format!("ALTER TABLE {name} RENAME COLUMN {old} TO {new_name}")
        }
        "DROP-COLUMN" => {
            let Some(col) = headers.column_defs.first() else {
                return SqtpResponse::error(400, "COLUMN header is required for DROP-COLUMN");
            };
            format!("ALTER TABLE {name} DROP COLUMN {col}")
        }
        _ => return SqtpResponse::error(400, "Invalid ACTION - must be RENAME-TABLE, ADD-COLUMN, RENAME-COLUMN, or DROP-COLUMN"),
    };

    if let Err(e) = conn.execute_batch(&sql) {
        return SqtpResponse::error(500, format!("SQLite error: {e}"));
    }

    let mut body = String::from("{\"altered\":1,\"table\":");
    json_escape(name, &mut body);
    body.push_str(",\"action\":");
    json_escape(action, &mut body);
    body.push_str("}\n");
    SqtpResponse::json(200, body)
}

#[cfg(test)]
mod test {
    use super::*;

    fn headers_from(block: &str) -> SqtpHeaders {
        SqtpHeaders::parse_block(block)
    }

    fn fresh_memory_db() -> DatabaseUri {
        // Each test needs its own isolated in-memory database, not the
        // shared-cache one `DatabaseUri::SharedMemory` resolves to, so
        // exercise `open_database` directly against a private `:memory:`.
        DatabaseUri::ExistingFile(":memory:".to_string())
    }

    fn open_direct(uri: &DatabaseUri) -> Connection {
        let (conn_str, _) = uri.open_spec();
        Connection::open(conn_str).unwrap()
    }

    #[test]
    fn select_requires_table_name() {
        let resp = handle_select(&fresh_memory_db(), &headers_from(""));
        assert_eq!(resp.status, 400);
    }

    #[test]
    fn insert_then_select_round_trips_through_bound_params() {
        let uri = DatabaseUri::ExistingFile(":memory:".to_string());
        let conn = open_direct(&uri);
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)").unwrap();
        drop(conn);

        // :memory: databases are per-connection; this test only exercises
        // SQL generation, not persistence, so build against one open
        // connection via the lower-level helpers directly instead.
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)").unwrap();
        let values: Vec<Json> = serde_json::from_str(r#"[1, "Alice"]"#).unwrap();
        insert_one_row(&conn, "t", "id, name", &values).unwrap();
        let got: String = conn.query_row("SELECT name FROM t WHERE id = 1", [], |r| r.get(0)).unwrap();
        assert_eq!(got, "Alice");
    }

    #[test]
    fn update_requires_where_clause() {
        let resp = handle_update(&fresh_memory_db(), &headers_from("TABLE: t\r\nCOLUMNS: name\r\n"), b"[\"x\"]");
        assert_eq!(resp.status, 400);
    }

    #[test]
    fn delete_allows_wildcard_bypass() {
        let headers = headers_from("TABLE: t\r\nWHERE: *\r\n");
        assert!(headers.where_is_wildcard_bypass());
        assert_eq!(where_clause(&headers), "");
    }

    #[test]
    fn where_clause_ands_multiple_fragments() {
        let headers = headers_from("WHERE: id = 1\r\nWHERE: active = 1\r\n");
        assert_eq!(where_clause(&headers), " WHERE (id = 1) AND (active = 1)");
    }

    #[test]
    fn array_of_arrays_is_detected_for_batch_insert() {
        let batch: Json = serde_json::from_str("[[1, \"a\"], [2, \"b\"]]").unwrap();
        let single: Json = serde_json::from_str("[1, \"a\"]").unwrap();
        assert!(is_array_of_arrays(&batch));
        assert!(!is_array_of_arrays(&single));
    }

    #[test]
    fn last_path_segment_strips_query_and_fragment() {
        assert_eq!(last_path_segment("/db/main/table?x=1"), "table");
        assert_eq!(last_path_segment("/db/main/index#frag"), "index");
    }

    #[test]
    fn create_table_folds_single_column_primary_key() {
        let headers = headers_from("NAME: t\r\nCOLUMN: id INTEGER\r\nCOLUMN: name TEXT\r\nPRIMARY-KEY: id\r\nAUTOINC: true\r\n");
        let sql = create_table_sql(&headers).unwrap();
        assert!(sql.contains("id INTEGER PRIMARY KEY AUTOINCREMENT"));
    }

    #[test]
    fn create_table_uses_table_constraint_for_multi_column_key() {
        let headers = headers_from("NAME: t\r\nCOLUMN: a INTEGER\r\nCOLUMN: b INTEGER\r\nPRIMARY-KEY: a, b\r\n");
        let sql = create_table_sql(&headers).unwrap();
        assert!(sql.contains("PRIMARY KEY (a, b)"));
    }

    #[test]
    fn alter_rename_table_requires_new_name() {
        let headers = headers_from("NAME: t\r\nACTION: RENAME-TABLE\r\n");
        let resp = handle_alter(&fresh_memory_db(), &headers);
        assert_eq!(resp.status, 400);
    }
}
