//! TTL flag value parsing.
//!
//! The `-t` flag accepts a bare integer (seconds) or `<N><unit>` with
//! units `s`, `m`, `h`, `d` (86400 s), `y` (31,536,000 s).

use std::time::Duration;

use crate::error::ProtocolError;

const DAY_SECS: u64 = 86_400;
const YEAR_SECS: u64 = 365 * DAY_SECS;

/// Parses a TTL value. An empty string means no TTL.
pub fn parse_ttl(input: &str) -> Result<Duration, ProtocolError> {
    if input.is_empty() {
        return Ok(Duration::ZERO);
    }

    // bare integer defaults to seconds
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    if !input.is_ascii() {
        return Err(ProtocolError::InvalidTtl(input.to_string()));
    }
    let lower = input.to_ascii_lowercase();
    let (num_str, unit) = lower.split_at(lower.len().saturating_sub(1));
    if num_str.is_empty() || !num_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidTtl(input.to_string()));
    }
    let num: u64 = num_str
        .parse()
        .map_err(|_| ProtocolError::InvalidTtl(input.to_string()))?;

    let secs = match unit {
        "s" => num,
        "m" => num.saturating_mul(60),
        "h" => num.saturating_mul(3_600),
        "d" => num.saturating_mul(DAY_SECS),
        "y" => num.saturating_mul(YEAR_SECS),
        _ => return Err(ProtocolError::InvalidTtl(input.to_string())),
    };
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(parse_ttl("").unwrap(), Duration::ZERO);
    }

    #[test]
    fn bare_integer_is_seconds() {
        assert_eq!(parse_ttl("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_ttl("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn unit_suffixes() {
        assert_eq!(parse_ttl("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_ttl("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_ttl("1h").unwrap(), Duration::from_secs(3_600));
        assert_eq!(parse_ttl("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_ttl("1y").unwrap(), Duration::from_secs(31_536_000));
    }

    #[test]
    fn units_are_case_insensitive() {
        assert_eq!(parse_ttl("5S").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_ttl("1D").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn garbage_is_rejected() {
        for bad in ["abc", "5x", "s", "-5", "1.5h", "5 s", "h5"] {
            assert!(parse_ttl(bad).is_err(), "{bad} should not parse");
        }
    }
}
