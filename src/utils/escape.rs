//! Delimiter escaping for flat text encodings
//!
//! Reserved characters are prefixed with a backslash, and the backslash
//! escapes itself, so `unescape(escape(s)) == s` for every input and an
//! escaped value never contains a bare delimiter.

pub const ESCAPE: char = '\\';

/// Escape `ESCAPE` and every character in `reserved`
pub fn escape(raw: &str, reserved: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == ESCAPE || reserved.contains(&c) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

/// Drop escape prefixes. A trailing lone escape is kept literally.
pub fn unescape(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len());
    let mut chars = encoded.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push(ESCAPE),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Split on `sep` wherever it is not escaped. Pieces stay escaped.
pub fn split_unescaped(encoded: &str, sep: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut escaped = false;

    for (i, c) in encoded.char_indices() {
        if escaped {
            escaped = false;
        } else if c == ESCAPE {
            escaped = true;
        } else if c == sep {
            pieces.push(&encoded[start..i]);
            start = i + c.len_utf8();
        }
    }
    pieces.push(&encoded[start..]);
    pieces
}
