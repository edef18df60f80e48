//! JSON rendering for SQTP result sets: a minimal value type plus the exact
//! escape discipline conformance tests depend on.

use std::fmt::Write as _;

/// A rendered SQL column value, typed the way the embedded engine reports
/// it (`sqlite3_column_type`'s INTEGER/FLOAT/TEXT/NULL, the BLOB case is
/// rendered as a base64-free `null` per the SELECT generator, matching
/// the original's column-type switch which has no BLOB arm).
#[derive(Debug, Clone, PartialEq)]
pub enum JsonValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl JsonValue {
    pub fn write_to(&self, out: &mut String) {
        match self {
            JsonValue::Null => out.push_str("null"),
            JsonValue::Integer(i) => {
                let _ = write!(out, "{i}");
            }
            JsonValue::Float(f) => {
                let _ = write!(out, "{}", format_float(*f));
            }
            JsonValue::Text(s) => json_escape(s, out),
        }
    }
}

/// Shortest round-trip `%g`-equivalent formatting: integral floats render
/// without a trailing `.0` the way sqlite's `%g` does for whole numbers.
fn format_float(f: f64) -> String {
    if f.is_finite() && f == f.trunc() && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

/// Escapes `input` into `out` as a JSON string literal (including the
/// surrounding quotes), following the original `sqtp_json_escape` exactly:
/// `"` and `\` get a two-character escape, `\b`/`\f`/`\n`/`\r`/`\t` get
/// their named escapes, any other byte below 0x20 becomes `\u00XX` in
/// lowercase hex, and everything else passes through unchanged.
pub fn json_escape(input: &str, out: &mut String) {
    out.push('"');
    for c in input.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Convenience wrapper returning a freshly allocated escaped literal.
pub fn json_escape_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 2);
    json_escape(input, &mut out);
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn escapes_quote_and_backslash() {
        assert_eq!(json_escape_string("a\"b\\c"), "\"a\\\"b\\\\c\"");
    }

    #[test]
    fn escapes_named_control_chars() {
        assert_eq!(json_escape_string("a\nb\tc\rd"), "\"a\\nb\\tc\\rd\"");
    }

    #[test]
    fn escapes_other_control_bytes_as_u00xx() {
        assert_eq!(json_escape_string("a\u{1}b"), "\"a\\u0001b\"");
    }

    #[test]
    fn passes_through_plain_text() {
        assert_eq!(json_escape_string("Alice"), "\"Alice\"");
    }

    #[test]
    fn integer_floats_render_without_decimal() {
        assert_eq!(format_float(30.0), "30");
        assert_eq!(format_float(30.5), "30.5");
    }
}
