use std::borrow::Cow;

/// Remove terminal control characters and ANSI escape sequences from text.
///
/// Category and feed names end up in terminal output (the CLI tree view) and
/// in log lines, so anything that could move the cursor or recolor the
/// terminal is dropped. Tab, newline and carriage return survive.
///
/// Returns `Cow::Borrowed` when nothing needs removing.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            match chars.peek() {
                // CSI: parameters run until a final byte in 0x40..=0x7e
                Some('[') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('\x40'..='\x7e').contains(&c) {
                            break;
                        }
                    }
                }
                // OSC: runs until BEL or ST (ESC \)
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\x07' {
                            break;
                        }
                        if c == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
        } else if !is_stripped(c) {
            out.push(c);
        }
    }

    Cow::Owned(out)
}

fn is_stripped(c: char) -> bool {
    c == '\x1b' || c == '\x7f' || (c < '\x20' && !matches!(c, '\t' | '\n' | '\r'))
}

/// Sanitize a user-supplied display name.
///
/// Strips control characters, trims whitespace and returns `None` when
/// nothing printable is left.
pub fn normalize_name(name: &str) -> Option<String> {
    let stripped = strip_control_chars(name);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

/// Case-insensitive substring test.
///
/// `needle_lower` must already be lowercased; callers filtering many items
/// lowercase the query once.
pub fn contains_folded(haystack: &str, needle_lower: &str) -> bool {
    if needle_lower.is_empty() {
        return true;
    }
    haystack.to_lowercase().contains(needle_lower)
}
