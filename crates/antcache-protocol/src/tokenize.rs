//! Command-line tokenizer with shell-style quoting.
//!
//! Rules:
//! - space and tab separate tokens; runs of whitespace collapse,
//! - a token starting with `"` or `'` is quoted until the matching
//!   close quote; the other quote character is literal inside it,
//! - inside quotes, `\n \t \r \\ \" \'` produce their escaped
//!   character; any other `\X` keeps both characters literally.

/// Splits a command line into tokens.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    let mut chars = input.trim().chars().peekable();
    while let Some(ch) = chars.next() {
        match quote {
            None => match ch {
                '"' | '\'' => quote = Some(ch),
                ' ' | '\t' => {
                    if !current.is_empty() {
                        parts.push(std::mem::take(&mut current));
                    }
                }
                _ => current.push(ch),
            },
            Some(open) => {
                if ch == open {
                    quote = None;
                } else if ch == '\\' {
                    match chars.next() {
                        Some('n') => current.push('\n'),
                        Some('t') => current.push('\t'),
                        Some('r') => current.push('\r'),
                        Some('\\') => current.push('\\'),
                        Some('"') => current.push('"'),
                        Some('\'') => current.push('\''),
                        Some(other) => {
                            current.push('\\');
                            current.push(other);
                        }
                        None => current.push('\\'),
                    }
                } else {
                    current.push(ch);
                }
            }
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Formats tokens back into a line: one-space separation, quoting any
/// token that contains whitespace or quote characters. The counterpart
/// used by clients and tests to build well-formed lines.
pub fn format_tokens(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|token| quote_token(token))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_token(token: &str) -> String {
    let needs_quotes = token.is_empty()
        || token
            .chars()
            .any(|c| matches!(c, ' ' | '\t' | '\n' | '\r' | '"' | '\'' | '\\'));
    if !needs_quotes {
        return token.to_string();
    }

    let mut out = String::with_capacity(token.len() + 2);
    out.push('"');
    for ch in token.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}
