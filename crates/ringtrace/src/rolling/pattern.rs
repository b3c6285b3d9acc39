use super::StoreError;
use chrono::NaiveDateTime;
use std::fmt::{self, Write as _};

/// A `SimpleDateFormat`-style file suffix pattern, e.g. `'.'yyyy-MM-dd_HH`,
/// compiled to a chrono format string.
///
/// Supported letters: `yyyy yy MM dd HH hh mm ss SSS a ww E D`. Text inside
/// single quotes is literal, `''` is a literal quote, and every other
/// non-letter character is copied verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatePattern {
    source: String,
    format: String,
}

impl DatePattern {
    pub fn parse(source: &str) -> Result<Self, StoreError> {
        let invalid = |reason: String| StoreError::InvalidPattern {
            pattern: source.to_string(),
            reason,
        };

        let chars: Vec<char> = source.chars().collect();
        let mut format = String::with_capacity(source.len() * 2);
        let mut i = 0;

        while i < chars.len() {
            let ch = chars[i];
            if ch == '\'' {
                if chars.get(i + 1) == Some(&'\'') {
                    format.push('\'');
                    i += 2;
                    continue;
                }
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(invalid("unterminated quote".to_string())),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            format.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(&lit) => {
                            push_literal(&mut format, lit);
                            i += 1;
                        }
                    }
                }
            } else if ch.is_ascii_alphabetic() {
                let run = chars[i..].iter().take_while(|&&c| c == ch).count();
                let spec = match (ch, run) {
                    ('y', 2) => "%y",
                    ('y', _) => "%Y",
                    ('M', 1 | 2) => "%m",
                    ('M', 3) => "%b",
                    ('M', _) => "%B",
                    ('d', _) => "%d",
                    ('H', _) => "%H",
                    ('h', _) => "%I",
                    ('m', _) => "%M",
                    ('s', _) => "%S",
                    ('S', _) => "%3f",
                    ('a', _) => "%p",
                    ('w', _) => "%W",
                    ('E', 1..=3) => "%a",
                    ('E', _) => "%A",
                    ('D', _) => "%j",
                    _ => return Err(invalid(format!("unsupported field '{ch}'"))),
                };
                format.push_str(spec);
                i += run;
            } else {
                push_literal(&mut format, ch);
                i += 1;
            }
        }

        Ok(Self {
            source: source.to_string(),
            format,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The equivalent chrono format string.
    pub fn chrono_format(&self) -> &str {
        &self.format
    }

    pub fn format(&self, at: &NaiveDateTime) -> String {
        let mut out = String::new();
        let _ = write!(out, "{}", at.format(&self.format));
        out
    }
}

impl fmt::Display for DatePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn push_literal(format: &mut String, ch: char) {
    if ch == '%' {
        format.push_str("%%");
    } else {
        format.push(ch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_daily_and_hourly() {
        let daily = DatePattern::parse("'.'yyyy-MM-dd").unwrap();
        let hourly = DatePattern::parse("'.'yyyy-MM-dd_HH").unwrap();
        let t = at(2024, 7, 9, 5, 30, 0);

        assert_eq!(daily.chrono_format(), ".%Y-%m-%d");
        assert_eq!(daily.format(&t), ".2024-07-09");
        assert_eq!(hourly.format(&t), ".2024-07-09_05");
    }

    #[test]
    fn test_literals_and_quotes() {
        let p = DatePattern::parse("'log''s at 100%' HH:mm:ss a").unwrap();
        assert_eq!(p.format(&at(2024, 1, 1, 13, 4, 5)), "log's at 100% 13:04:05 PM");
    }

    #[test]
    fn test_rejects_bad_patterns() {
        assert!(matches!(
            DatePattern::parse("yyyy-MM-dd 'open"),
            Err(StoreError::InvalidPattern { .. })
        ));
        assert!(matches!(
            DatePattern::parse("yyyy-QQ"),
            Err(StoreError::InvalidPattern { .. })
        ));
    }
}
