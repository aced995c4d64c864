//! Quote- and nesting-aware scanning shared by the path and condition parsers.

/// Splits `text` at every occurrence of `delimiter` that is outside string
/// literals, parentheses and square brackets.
///
/// Returns the reason as a string when quotes or brackets are unbalanced so
/// that callers can wrap it in the error kind of their context.
pub(crate) fn split_top_level<'a>(text: &'a str, delimiter: &str) -> Result<Vec<&'a str>, String> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth: usize = 0;
    let mut start = 0;

    for (index, ch) in text.char_indices() {
        if index < start {
            continue;
        }
        if let Some(open) = quote {
            if ch == open {
                quote = None;
            }
            continue;
        }
        if depth == 0 && text[index..].starts_with(delimiter) {
            parts.push(&text[start..index]);
            start = index + delimiter.len();
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '(' | '[' => depth += 1,
            ')' | ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| format!("unbalanced `{ch}`"))?;
            }
            _ => {}
        }
    }

    if let Some(open) = quote {
        return Err(format!("unterminated {open}-quoted literal"));
    }
    if depth != 0 {
        return Err("unbalanced brackets".to_string());
    }

    parts.push(&text[start..]);
    Ok(parts)
}

/// Given `text` starting with `open`, returns the byte index of the
/// character that closes it.
pub(crate) fn closing_index(text: &str, open: char, close: char) -> Option<usize> {
    if !text.starts_with(open) {
        return None;
    }

    let mut quote: Option<char> = None;
    let mut depth: usize = 0;
    for (index, ch) in text.char_indices() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

/// If `text` is exactly `name(...)` (whitespace allowed before the
/// parenthesis), returns the text between the parentheses.
pub(crate) fn strip_call<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(name)?.trim_start();
    let close = closing_index(rest, '(', ')')?;
    if close + 1 == rest.len() {
        Some(&rest[1..close])
    } else {
        None
    }
}

/// Parses a single- or double-quoted string literal, returning its content.
pub(crate) fn parse_literal(text: &str) -> Option<&str> {
    let text = text.trim();
    let quote = text.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let inner = text.strip_prefix(quote)?.strip_suffix(quote)?;
    if text.len() < 2 || inner.contains(quote) {
        return None;
    }
    Some(inner)
}
