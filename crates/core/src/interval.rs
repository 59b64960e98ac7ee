//! Human-readable interval parsing and formatting.
//!
//! Policy documents write posting intervals and grace periods as compact
//! strings: `Xd` (days), `Xh` (hours), `Xm` (minutes), `Xs` (seconds),
//! combined freely ("1d12h", "2h30m") or as a bare number of seconds.

use chrono::Duration;

use crate::error::CoreError;

/// Parse an interval string into a [`Duration`].
///
/// Returns `None` if the string is empty or unparseable.
pub fn parse_interval(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_secs: i64 = 0;
    let mut num_buf = String::new();
    let mut found_unit = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
        } else if ch.is_whitespace() {
            continue;
        } else {
            let n: i64 = num_buf.parse().ok()?;
            num_buf.clear();
            match ch {
                'd' => total_secs += n * 86_400,
                'h' => total_secs += n * 3_600,
                'm' => total_secs += n * 60,
                's' => total_secs += n,
                _ => return None,
            }
            found_unit = true;
        }
    }

    // A trailing number is only valid on its own ("120" = 120 seconds).
    if !num_buf.is_empty() {
        if found_unit {
            return None;
        }
        total_secs = num_buf.parse().ok()?;
    }

    Some(Duration::seconds(total_secs))
}

/// Render an interval in the compact form accepted by [`parse_interval`].
pub fn compact_interval(d: Duration) -> String {
    let mut secs = d.num_seconds().max(0);
    if secs == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    for (unit, size) in [('d', 86_400), ('h', 3_600), ('m', 60), ('s', 1)] {
        let n = secs / size;
        if n > 0 {
            out.push_str(&format!("{n}{unit}"));
            secs -= n * size;
        }
    }
    out
}

/// Render an interval for people: "1 day, 2 hours and 30 minutes".
pub fn humanize_interval(d: Duration) -> String {
    let mut secs = d.num_seconds().max(0);
    let mut parts = Vec::new();
    for (name, size) in [("day", 86_400), ("hour", 3_600), ("minute", 60), ("second", 1)] {
        let n = secs / size;
        if n > 0 {
            parts.push(format!("{n} {name}{}", if n == 1 { "" } else { "s" }));
            secs -= n * size;
        }
    }
    match parts.len() {
        0 => "0 seconds".to_string(),
        1 => parts.remove(0),
        _ => {
            let last = parts.pop().unwrap_or_default();
            format!("{} and {}", parts.join(", "), last)
        }
    }
}

/// Serde adapter: intervals are (de)serialized as compact strings, with bare
/// integers accepted as seconds.
pub mod serde_interval {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{compact_interval, parse_interval};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&compact_interval(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Secs(n) => Ok(Duration::seconds(n)),
            Raw::Text(text) => parse_interval(&text)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid interval '{text}'"))),
        }
    }
}

/// Like [`parse_interval`] but with a descriptive error.
pub fn require_interval(s: &str) -> Result<Duration, CoreError> {
    parse_interval(s).ok_or_else(|| CoreError::InvalidInterval(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_units() {
        assert_eq!(parse_interval("30m"), Some(Duration::minutes(30)));
        assert_eq!(parse_interval("1h"), Some(Duration::hours(1)));
        assert_eq!(parse_interval("2d"), Some(Duration::days(2)));
        assert_eq!(parse_interval("90s"), Some(Duration::seconds(90)));
    }

    #[test]
    fn parse_combined_and_spaced() {
        assert_eq!(parse_interval("1d12h"), Some(Duration::hours(36)));
        assert_eq!(parse_interval("2h 30m"), Some(Duration::minutes(150)));
    }

    #[test]
    fn parse_bare_number_as_seconds() {
        assert_eq!(parse_interval("120"), Some(Duration::seconds(120)));
        assert_eq!(parse_interval("0"), Some(Duration::zero()));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_interval(""), None);
        assert_eq!(parse_interval("abc"), None);
        assert_eq!(parse_interval("30m15"), None);
        assert!(require_interval("1w").is_err());
    }

    #[test]
    fn compact_matches_parse() {
        assert_eq!(compact_interval(Duration::hours(36)), "1d12h");
        assert_eq!(compact_interval(Duration::zero()), "0s");
        assert_eq!(parse_interval(&compact_interval(Duration::minutes(95))), Some(Duration::minutes(95)));
    }

    #[test]
    fn humanize_lists_components() {
        assert_eq!(humanize_interval(Duration::hours(24)), "1 day");
        assert_eq!(humanize_interval(Duration::minutes(150)), "2 hours and 30 minutes");
        assert_eq!(
            humanize_interval(Duration::seconds(86_400 + 3_600 + 61)),
            "1 day, 1 hour, 1 minute and 1 second"
        );
    }
}
