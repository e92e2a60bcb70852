//! Human-readable durations for command-line options.

use std::time::Duration;

/// Parse a duration such as `50ms`, `2s`, `1m` or `1h`.
///
/// A bare number is taken as seconds.
///
/// # Examples
/// ```
/// use scale_bridge::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("50ms").unwrap(), Duration::from_millis(50));
/// assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let split = src
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(src.len());
    let (number, unit) = src.split_at(split);
    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration: {src}"))?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(format!("unknown duration unit {other:?} in {src}")),
    }
}
