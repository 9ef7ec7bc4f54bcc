// Statement splitting for multi-statement query strings.
//
// - scanner: comment detection used to recognise statements with nothing to run
//
// Splitting tracks quotes and parentheses only. A semicolon inside a quoted region or inside
// parentheses belongs to the statement; anywhere else it ends one.

mod scanner;

/// Split a batch into trimmed statement texts, in source order.
///
/// Whitespace-only and comment-only statements are kept; see [`is_blank_statement`].
///
/// ```rust
/// use embedded_sql_driver::split::split_statements;
///
/// assert_eq!(split_statements("a;b;c"), vec!["a", "b", "c"]);
/// assert_eq!(split_statements("INSERT INTO t VALUES (\"a;b\")").len(), 1);
/// ```
#[must_use]
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut stack: Vec<char> = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;

    for (idx, ch) in sql.char_indices() {
        match stack.last().copied() {
            None => match ch {
                '(' | '"' | '\'' | '`' => stack.push(ch),
                ';' => {
                    statements.push(sql[start..idx].trim().to_string());
                    start = idx + ch.len_utf8();
                }
                _ => {}
            },
            Some(quote @ ('"' | '\'' | '`')) => {
                if ch == quote && prev != Some('\\') {
                    stack.pop();
                }
            }
            Some(_) => match ch {
                ')' => {
                    stack.pop();
                }
                '(' | '"' | '\'' | '`' => stack.push(ch),
                _ => {}
            },
        }
        prev = Some(ch);
    }

    let rest = sql[start..].trim();
    if !rest.is_empty() {
        statements.push(rest.to_string());
    }
    statements
}

/// True for statements with nothing to execute: empty, whitespace, or only comments.
#[must_use]
pub fn is_blank_statement(sql: &str) -> bool {
    scanner::only_comments(sql)
}
