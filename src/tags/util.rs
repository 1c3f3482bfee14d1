//! Small parsing helpers shared by the codecs.

use super::TrackNumber;
use std::time::Duration;

/// Parse strings like:
/// - "3" -> (Some(3), None)
/// - "3/12" -> (Some(3), Some(12))
pub(crate) fn parse_slash_pair_u32(s: Option<&str>) -> (Option<u32>, Option<u32>) {
    let Some(s) = s else { return (None, None) };
    let s = s.trim();
    if s.is_empty() {
        return (None, None);
    }

    let mut parts = s.split('/');
    let a = parts.next().and_then(|p| p.trim().parse::<u32>().ok());
    let b = parts.next().and_then(|p| p.trim().parse::<u32>().ok());
    (a, b)
}

/// Build a track number from a "n" / "n/total" value plus an optional
/// separately stored total. A total without a number is meaningless and dropped.
pub(crate) fn track_from_parts(value: Option<&str>, total: Option<&str>) -> Option<TrackNumber> {
    let (number, inline_total) = parse_slash_pair_u32(value);
    let separate_total = total.and_then(|t| t.trim().parse::<u32>().ok());
    let number = number.filter(|n| *n > 0)?;
    Some(TrackNumber {
        number,
        total: inline_total.or(separate_total).filter(|t| *t > 0),
    })
}

/// Year from a date-ish value: "1970", "1970-05-01", "1970-05-01T10:00:00".
pub(crate) fn parse_year(s: &str) -> Option<i32> {
    let s = s.trim();
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return None;
    }
    digits[..4].parse().ok()
}

/// `units / per_second` seconds, or `None` when the rate is zero or the
/// result doesn't fit a `Duration`.
pub(crate) fn duration_from_units(units: f64, per_second: f64) -> Option<Duration> {
    if per_second <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(units / per_second).ok()
}

/// Trimmed text, with empty values treated as absent.
pub(crate) fn clean_text(s: &str) -> Option<String> {
    let s = s.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
