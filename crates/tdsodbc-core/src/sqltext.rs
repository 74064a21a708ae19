//! Lexical helpers over SQL text

use crate::error::{OdbcError, Result};

/// Call `visit` with the offset of every byte outside string literals,
/// quoted and bracketed identifiers, and comments
fn scan_code(sql: &str, mut visit: impl FnMut(usize, u8)) {
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => i = skip_quoted(bytes, i, quote),
            b'[' => i = skip_quoted(bytes, i, b']'),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            }
            byte => visit(i, byte),
        }
        i += 1;
    }
}

/// Byte offsets of `?` parameter markers, skipping string literals, quoted
/// and bracketed identifiers, and comments
pub fn placeholders(sql: &str) -> Vec<usize> {
    let mut found = Vec::new();
    scan_code(sql, |offset, byte| {
        if byte == b'?' {
            found.push(offset);
        }
    });
    found
}

/// Split a batch at `;` separators outside literals and comments.
/// Blank statements are dropped; the rest are trimmed.
pub fn split_statements(sql: &str) -> Vec<&str> {
    let mut bounds = Vec::new();
    scan_code(sql, |offset, byte| {
        if byte == b';' {
            bounds.push(offset);
        }
    });
    let mut statements = Vec::with_capacity(bounds.len() + 1);
    let mut start = 0;
    for end in bounds.into_iter().chain(std::iter::once(sql.len())) {
        let statement = sql[start..end].trim();
        if !statement.is_empty() {
            statements.push(statement);
        }
        start = end + 1;
    }
    statements
}

/// Index of the closing delimiter; a doubled delimiter is an escape
fn skip_quoted(bytes: &[u8], open: usize, close: u8) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i;
        }
        i += 1;
    }
    bytes.len()
}

/// Leading keyword, uppercased
pub fn leading_keyword(sql: &str) -> String {
    sql.trim_start_matches(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

/// Scalar functions whose escape name differs from the backend's
const FUNCTION_NAMES: &[(&str, &str)] = &[
    ("UCASE", "UPPER"),
    ("LCASE", "LOWER"),
    ("LENGTH", "LEN"),
    ("IFNULL", "ISNULL"),
    ("NOW", "GETDATE"),
    ("DATABASE", "DB_NAME"),
    ("USER", "USER_NAME"),
    ("LOCATE", "CHARINDEX"),
];

/// Rewrite `{...}` escape clauses into backend syntax, innermost first
pub fn native_sql(sql: &str) -> Result<String> {
    let mut text = sql.to_string();
    loop {
        let mut open = None;
        let mut clause = None;
        let mut stray = None;
        scan_code(&text, |offset, byte| {
            if clause.is_some() {
                return;
            }
            match byte {
                b'{' => open = Some(offset),
                b'}' => match open {
                    Some(start) => clause = Some((start, offset)),
                    None => stray = stray.or(Some(offset)),
                },
                _ => {}
            }
        });
        let (start, end) = match (clause, stray, open) {
            (Some(span), _, _) => span,
            (None, Some(offset), _) => {
                return Err(OdbcError::Syntax(format!("unmatched '}}' at offset {offset}")));
            }
            (None, None, Some(offset)) => {
                return Err(OdbcError::Syntax(format!("unterminated escape clause at offset {offset}")));
            }
            (None, None, None) => return Ok(text),
        };
        let rewritten = rewrite_escape(&text[start + 1..end])?;
        text.replace_range(start..=end, &rewritten);
    }
}

fn rewrite_escape(body: &str) -> Result<String> {
    let body = body.trim();
    let keyword_len = body
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '?' && c != '=')
        .unwrap_or(body.len());
    let keyword = body[..keyword_len].to_ascii_lowercase();
    let rest = body[keyword_len..].trim_start();
    match keyword.as_str() {
        "fn" => Ok(rename_function(rest)),
        "d" | "t" | "ts" => Ok(rest.to_string()),
        "oj" => Ok(rest.to_string()),
        "escape" => Ok(format!("ESCAPE {rest}")),
        "call" => Ok(procedure_call(rest, None)),
        _ if body.starts_with('?') => {
            let call = body[1..].trim_start().strip_prefix('=').map(str::trim_start);
            match call.and_then(|call| strip_word(call, "call")) {
                Some(rest) => Ok(procedure_call(rest, Some("?"))),
                None => Err(OdbcError::Syntax(format!("unknown escape clause '{{{body}}}'"))),
            }
        }
        _ => Err(OdbcError::Syntax(format!("unknown escape clause '{{{body}}}'"))),
    }
}

fn strip_word<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    let head = text.get(..word.len())?;
    let after = &text[word.len()..];
    (head.eq_ignore_ascii_case(word) && !after.starts_with(|c: char| c.is_ascii_alphanumeric()))
        .then(|| after.trim_start())
}

fn rename_function(call: &str) -> String {
    let name_len = call
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(call.len());
    let name = &call[..name_len];
    match FUNCTION_NAMES
        .iter()
        .find(|(escape, _)| escape.eq_ignore_ascii_case(name))
    {
        Some((_, native)) => format!("{native}{}", &call[name_len..]),
        None => call.to_string(),
    }
}

/// `p(a, b)` becomes `EXEC p a, b`; `result` receives the return status
fn procedure_call(call: &str, result: Option<&str>) -> String {
    let (name, args) = match call.find('(') {
        Some(open) => {
            let close = call.rfind(')').filter(|close| *close > open).unwrap_or(call.len());
            (call[..open].trim(), call[open + 1..close].trim())
        }
        None => (call.trim(), ""),
    };
    let mut out = String::from("EXEC ");
    if let Some(result) = result {
        out.push_str(result);
        out.push_str(" = ");
    }
    out.push_str(name);
    if !args.is_empty() {
        out.push(' ');
        out.push_str(args);
    }
    out
}
