use chrono::{DateTime, SecondsFormat, Utc};

/// Sentinel used for "indefinite" mutes and the disband visibility floor.
/// Lexicographically greater than any real timestamp this system produces.
pub const FAR_FUTURE: &str = "9999-12-31T23:59:59.999999Z";

/// Current UTC time as fixed-width RFC3339 with microseconds.
/// All timestamps in the store use this format, so string comparison
/// equals chronological comparison.
pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp back into a DateTime. Falls back to the epoch
/// on corrupt data rather than failing a whole listing.
pub fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn string_order_matches_time_order() {
        let a = format_ts(Utc::now());
        let b = format_ts(Utc::now() + Duration::seconds(1));
        assert!(a < b);
        assert!(b.as_str() < FAR_FUTURE);
    }

    #[test]
    fn roundtrip() {
        let now = now_ts();
        assert_eq!(format_ts(parse_ts(&now)), now);
    }
}
