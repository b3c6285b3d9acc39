//! Percent escaping for baggage keys and values.
//!
//! Only the three characters that carry meaning in the single-string format
//! are escaped: `%` → `%25`, `&` → `%26`, `=` → `%3D`. The header codec also
//! writes `%73`/`%53` for a leading `s`/`S` (see [`escape_leading`]).
//! Unescaping accepts either hex case and leaves any other `%` sequence
//! untouched.

use std::borrow::Cow;

pub fn escape(raw: &str) -> Cow<'_, str> {
    if !raw.contains(['%', '&', '=']) {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len() + 8);
    for ch in raw.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            _ => out.push(ch),
        }
    }
    Cow::Owned(out)
}

/// Escapes `raw`, additionally hex-encoding its first character.
///
/// Only `s` and `S` are supported; any other leading character is escaped as
/// by [`escape`].
pub fn escape_leading(raw: &str) -> Cow<'_, str> {
    let mut chars = raw.chars();
    let code = match chars.next() {
        Some('s') => "%73",
        Some('S') => "%53",
        _ => return escape(raw),
    };
    Cow::Owned(format!("{code}{}", escape(chars.as_str())))
}

pub fn unescape(escaped: &str) -> Cow<'_, str> {
    if !escaped.contains('%') {
        return Cow::Borrowed(escaped);
    }

    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let decoded = match tail.get(1..3) {
            Some("25") => Some('%'),
            Some("26") => Some('&'),
            Some(code) if code.eq_ignore_ascii_case("3d") => Some('='),
            Some("73") => Some('s'),
            Some("53") => Some('S'),
            _ => None,
        };
        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &tail[3..];
            }
            None => {
                out.push('%');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}
