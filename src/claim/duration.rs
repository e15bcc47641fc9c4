//! Duration strings as written in claims (`"500ms"`, `"1m30s"`, `"1.5h"`).

use crate::error::ConfigError;
use std::time::Duration;

/// Parse a duration made of one or more `<number><unit>` parts.
///
/// Units: `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`. A bare `"0"` is accepted.
/// Signs are not.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(input.to_string());
    let text = input.trim();
    if text.is_empty() {
        return Err(invalid());
    }
    if text == "0" {
        return Ok(Duration::ZERO);
    }

    let mut rest = text;
    let mut nanos: u64 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_nanos = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];

        let part = (value * unit_nanos).round();
        if !part.is_finite() || part > u64::MAX as f64 {
            return Err(invalid());
        }
        nanos = nanos.checked_add(part as u64).ok_or_else(invalid)?;
    }
    Ok(Duration::from_nanos(nanos))
}

/// Like [`parse_duration`], but an empty string means "not set".
pub fn parse_optional_duration(input: &str) -> Result<Option<Duration>, ConfigError> {
    if input.trim().is_empty() {
        return Ok(None);
    }
    parse_duration(input).map(Some)
}
