//! T-SQL to SQLite rewriting

use tdsodbc_core::sqltext;
use tdsodbc_core::wire::EnvChange;

use crate::catalog;

const INFORMATION_SCHEMA: &str = "INFORMATION_SCHEMA.";

fn is_ident(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'@' | b'#' | b'$') || byte >= 0x80
}

/// End (exclusive) of a run delimited by `close` starting at `open`; a
/// doubled delimiter is an escape
fn delimited_end(bytes: &[u8], open: usize, close: u8) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Rewrite a statement for SQLite.
///
/// `catalog` is the database name the `INFORMATION_SCHEMA` views report.
pub fn translate(sql: &str, catalog: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;
    while i < bytes.len() {
        let rest = &sql[i..];
        let after_ident = i > 0 && is_ident(bytes[i - 1]);
        let byte = bytes[i];

        if byte == b'\'' || byte == b'"' {
            let end = delimited_end(bytes, i, byte);
            out.push_str(&sql[i..end]);
            i = end;
            continue;
        }
        if rest.starts_with("--") {
            let end = rest.find('\n').map_or(sql.len(), |n| i + n);
            out.push_str(&sql[i..end]);
            i = end;
            continue;
        }
        if rest.starts_with("/*") {
            let end = rest.find("*/").map_or(sql.len(), |n| i + n + 2);
            out.push_str(&sql[i..end]);
            i = end;
            continue;
        }
        if matches!(byte, b'N' | b'n') && bytes.get(i + 1) == Some(&b'\'') && !after_ident {
            i += 1;
            continue;
        }
        if byte == b'[' {
            let end = delimited_end(bytes, i, b']');
            let inner_end = if bytes.get(end - 1) == Some(&b']') && end - 1 > i {
                end - 1
            } else {
                end
            };
            let name = sql[i + 1..inner_end].replace("]]", "]").replace('"', "\"\"");
            out.push('"');
            out.push_str(&name);
            out.push('"');
            i = end;
            continue;
        }
        if byte == b'0' && matches!(bytes.get(i + 1), Some(b'x' | b'X')) && !after_ident {
            let digits = rest[2..]
                .bytes()
                .take_while(u8::is_ascii_hexdigit)
                .count();
            if digits > 0 {
                let hex = &rest[2..2 + digits];
                out.push_str("X'");
                if digits % 2 == 1 {
                    out.push('0');
                }
                out.push_str(hex);
                out.push('\'');
                i += 2 + digits;
                continue;
            }
        }
        if byte == b'(' {
            if let Some(close) = rest.find(')') {
                if rest[1..close].trim().eq_ignore_ascii_case("max") {
                    i += close + 1;
                    continue;
                }
            }
        }
        if !after_ident
            && rest
                .get(..INFORMATION_SCHEMA.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(INFORMATION_SCHEMA))
        {
            let name_start = INFORMATION_SCHEMA.len();
            let name_len = rest[name_start..].bytes().take_while(|b| is_ident(*b)).count();
            let name = &rest[name_start..name_start + name_len];
            if let Some(body) = catalog::view(name, catalog) {
                out.push('(');
                out.push_str(&body);
                out.push(')');
                i += name_start + name_len;
                continue;
            }
        }

        let Some(ch) = rest.chars().next() else {
            break;
        };
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Transaction boundary a statement sets
pub(crate) fn transaction_change(sql: &str) -> Option<EnvChange> {
    let words: Vec<String> = sql
        .split_whitespace()
        .take(2)
        .map(|w| w.trim_end_matches(';').to_ascii_uppercase())
        .collect();
    match sqltext::leading_keyword(sql).as_str() {
        "BEGIN" if words.get(1).is_some_and(|w| w.starts_with("TRAN")) => {
            Some(EnvChange::BeginTransaction)
        }
        "COMMIT" => Some(EnvChange::CommitTransaction),
        "ROLLBACK" => Some(EnvChange::RollbackTransaction),
        _ => None,
    }
}

/// Target of an `INSERT ... VALUES` whose values are all parameter markers
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct InsertTarget {
    pub(crate) table: String,
    /// Explicit column list, when given
    pub(crate) columns: Option<Vec<String>>,
    pub(crate) markers: usize,
}

fn unquote(name: &str) -> String {
    name.trim()
        .trim_start_matches(['[', '"', '`'])
        .trim_end_matches([']', '"', '`'])
        .to_string()
}

/// Recognize `INSERT [INTO] table [(cols)] VALUES (?, ...)`
pub(crate) fn insert_target(sql: &str) -> Option<InsertTarget> {
    let rest = sql.trim_start();
    let rest = strip_keyword(rest, "INSERT")?;
    let rest = strip_keyword(rest, "INTO").unwrap_or(rest);
    let name_len = rest
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(rest.len());
    let table = rest[..name_len].rsplit('.').next().map(unquote)?;
    let mut rest = rest[name_len..].trim_start();

    let mut columns = None;
    if let Some(list) = rest.strip_prefix('(') {
        let close = list.find(')')?;
        columns = Some(list[..close].split(',').map(unquote).collect::<Vec<_>>());
        rest = list[close + 1..].trim_start();
    }

    let values = strip_keyword(rest, "VALUES")?.trim_start().strip_prefix('(')?;
    let close = values.rfind(')')?;
    if !values[close + 1..].trim().trim_end_matches(';').trim().is_empty() {
        return None;
    }
    let items: Vec<&str> = values[..close].split(',').map(str::trim).collect();
    if items.iter().any(|item| *item != "?") {
        return None;
    }
    if columns.as_ref().is_some_and(|c: &Vec<String>| c.len() != items.len()) {
        return None;
    }
    Some(InsertTarget {
        table,
        columns,
        markers: items.len(),
    })
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len())?;
    let boundary = text[keyword.len()..]
        .chars()
        .next()
        .is_none_or(|c| !c.is_ascii_alphanumeric() && c != '_');
    (head.eq_ignore_ascii_case(keyword) && boundary).then(|| text[keyword.len()..].trim_start())
}
