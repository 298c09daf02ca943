//! Small text helpers shared by the deck normalizer
//!
//! SPICE decks are whitespace- and case-insensitive, so everything here
//! compares ASCII case-insensitively and leaves the original casing alone.

/// Case-insensitive prefix test.
pub fn starts_with_ci(line: &str, prefix: &str) -> bool {
    line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Case-insensitive substring test.
pub fn contains_ci(line: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    line.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
}

/// True if the token is wrapped in double quotes.
pub fn is_quoted(token: &str) -> bool {
    token.len() >= 2 && token.starts_with('"') && token.ends_with('"')
}

/// Strip one layer of double quotes, if present.
pub fn unquote(token: &str) -> &str {
    if is_quoted(token) {
        &token[1..token.len() - 1]
    } else {
        token
    }
}

/// Re-wrap a value in double quotes when the original token carried them.
pub fn maybe_quote(value: &str, quoted: bool) -> String {
    if quoted {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}
