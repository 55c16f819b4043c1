//! Utility functions for regcoord

use chrono::{DateTime, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

/// Parse duration string (e.g., "500ms", "30s", "5m", "1h", "7d")
pub fn parse_duration(s: &str) -> crate::Result<std::time::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::InvalidConfig("empty duration".into()));
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| crate::Error::InvalidConfig(format!("missing duration unit: {}", s)))?;
    let (num_str, unit) = s.split_at(split);

    let num: u64 = num_str
        .parse()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let secs_per_unit = match unit {
        "ms" => return Ok(std::time::Duration::from_millis(num)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => {
            return Err(crate::Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };
    let secs = num
        .checked_mul(secs_per_unit)
        .ok_or_else(|| crate::Error::InvalidConfig(format!("duration out of range: {}", s)))?;

    Ok(std::time::Duration::from_secs(secs))
}

/// Whole milliseconds of `d`, for config fields kept in millis
pub fn duration_millis(d: std::time::Duration) -> crate::Result<u64> {
    u64::try_from(d.as_millis())
        .map_err(|_| crate::Error::InvalidConfig(format!("duration out of range: {:?}", d)))
}

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Epoch milliseconds of a timestamp
pub fn to_millis(at: &DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Validate a node id, data center or data id
pub fn validate_id(kind: &str, id: &str) -> crate::Result<()> {
    if id.is_empty() {
        return Err(crate::Error::InvalidConfig(format!(
            "{} cannot be empty",
            kind
        )));
    }

    if id.len() > 256 {
        return Err(crate::Error::InvalidConfig(format!(
            "{} too long (max 256 bytes)",
            kind
        )));
    }

    if id.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(crate::Error::InvalidConfig(format!(
            "{} contains invalid characters",
            kind
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(
            parse_duration("500ms").unwrap(),
            std::time::Duration::from_millis(500)
        );
        assert_eq!(
            parse_duration("30s").unwrap(),
            std::time::Duration::from_secs(30)
        );
        assert_eq!(
            parse_duration("5m").unwrap(),
            std::time::Duration::from_secs(300)
        );
        assert_eq!(
            parse_duration("1h").unwrap(),
            std::time::Duration::from_secs(3600)
        );
        assert_eq!(
            parse_duration("7d").unwrap(),
            std::time::Duration::from_secs(604800)
        );
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("15").is_err());
    }

    #[test]
    fn test_parse_duration_overflow() {
        let huge = format!("{}d", u64::MAX / 2);
        assert!(matches!(
            parse_duration(&huge),
            Err(crate::Error::InvalidConfig(_))
        ));
        assert!(parse_duration(&format!("{}h", u64::MAX)).is_err());
        assert!(parse_duration(&format!("{}ms", u64::MAX)).is_ok());

        assert_eq!(
            duration_millis(std::time::Duration::from_secs(15)).unwrap(),
            15_000
        );
        let too_long = parse_duration(&format!("{}s", u64::MAX)).unwrap();
        assert!(duration_millis(too_long).is_err());
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("node id", "meta-1").is_ok());
        assert!(validate_id("node id", "10.0.0.1:9615").is_ok());
        assert!(validate_id("node id", "").is_err());
        assert!(validate_id("node id", "meta 1").is_err());
        assert!(validate_id("node id", &"x".repeat(300)).is_err());
    }

    #[test]
    fn test_to_millis() {
        let at = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(to_millis(&at), 1_700_000_000_123);
    }
}
