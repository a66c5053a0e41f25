//! Tolerant date parsing for OCR-extracted fields
//!
//! Accepted shapes: `DD/MM/YYYY`, `MM/DD/YYYY` (year >= 1900),
//! `Month DD, YYYY`, `DD Month YYYY`, `YYYY-MM-DD`. Ambiguity rules:
//! day-first wins when the first number exceeds 12; an alphabetic month is
//! unambiguous; otherwise the date parses month-first with its confidence
//! multiplier capped at 0.5.

use chrono::NaiveDate;

/// Earliest plausible year on an identity document
const MIN_YEAR: i32 = 1900;

/// A parsed date plus the confidence multiplier its shape earned
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedDate {
    pub date: NaiveDate,
    /// 1.0 for unambiguous shapes, <= 0.5 for ambiguous numeric dates
    pub confidence: f64,
}

/// Parse a date string tolerantly; None when no shape matches
pub fn parse_date(raw: &str) -> Option<ParsedDate> {
    let cleaned = raw.trim().trim_matches(|c: char| c == '.' || c == ',');
    if cleaned.is_empty() {
        return None;
    }

    // ISO: YYYY-MM-DD
    if let Ok(date) = NaiveDate::parse_from_str(cleaned, "%Y-%m-%d") {
        if year_ok(date) {
            return Some(ParsedDate {
                date,
                confidence: 1.0,
            });
        }
    }

    // Alphabetic month: "January 15, 1990" / "Jan 15, 1990" / "15 January 1990"
    for format in ["%B %d, %Y", "%b %d, %Y", "%B %d %Y", "%b %d %Y", "%d %B %Y", "%d %b %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(cleaned, format) {
            if year_ok(date) {
                return Some(ParsedDate {
                    date,
                    confidence: 1.0,
                });
            }
        }
    }

    // Numeric with separators: a/b/yyyy or a-b-yyyy
    parse_numeric(cleaned)
}

fn parse_numeric(cleaned: &str) -> Option<ParsedDate> {
    let parts: Vec<&str> = cleaned
        .split(|c: char| c == '/' || c == '-' || c == '.')
        .map(str::trim)
        .collect();
    if parts.len() != 3 {
        return None;
    }

    let a: u32 = parts[0].parse().ok()?;
    let b: u32 = parts[1].parse().ok()?;
    let year: i32 = parts[2].parse().ok()?;
    if year < MIN_YEAR {
        return None;
    }

    if a > 12 && b <= 12 {
        // Day-first is the only reading
        let date = NaiveDate::from_ymd_opt(year, b, a)?;
        return Some(ParsedDate {
            date,
            confidence: 1.0,
        });
    }
    if b > 12 && a <= 12 {
        // Month-first is the only reading
        let date = NaiveDate::from_ymd_opt(year, a, b)?;
        return Some(ParsedDate {
            date,
            confidence: 1.0,
        });
    }

    // Both readings plausible: take month-first, cap confidence
    let date = NaiveDate::from_ymd_opt(year, a, b)?;
    Some(ParsedDate {
        date,
        confidence: 0.5,
    })
}

fn year_ok(date: NaiveDate) -> bool {
    use chrono::Datelike;
    date.year() >= MIN_YEAR
}
