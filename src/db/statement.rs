/// Whether a statement reads rows or changes data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Read,
    Write,
}

/// Classify `sql` by its leading keyword.
///
/// Leading whitespace, `--` line comments, `/* */` block comments and opening
/// parentheses are skipped first. `SELECT` and `WITH` are reads; anything
/// else, including an empty statement, is a write.
pub fn classify(sql: &str) -> StatementKind {
    let keyword: String = skip_preamble(sql)
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();

    if keyword.eq_ignore_ascii_case("select") || keyword.eq_ignore_ascii_case("with") {
        StatementKind::Read
    } else {
        StatementKind::Write
    }
}

fn skip_preamble(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start();
        if let Some(comment) = trimmed.strip_prefix("--") {
            rest = comment.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(comment) = trimmed.strip_prefix("/*") {
            rest = comment.split_once("*/").map_or("", |(_, tail)| tail);
        } else if let Some(tail) = trimmed.strip_prefix('(') {
            rest = tail;
        } else {
            return trimmed;
        }
    }
}
