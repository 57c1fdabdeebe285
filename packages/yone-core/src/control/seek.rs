//! Time spec parsing for seek, rewind and forward.

use crate::error::{ControlError, ControlResult};

/// Parses a time spec into seconds.
///
/// Two forms are accepted:
/// - unit form: `1h2m3s`, `2m`, `90s` (each unit at most once, not all zero)
/// - colon form: `H:M:S`, `M:S` or `S`
///
/// Spaces are ignored and units are case-insensitive.
pub fn parse_seek_time(text: &str) -> ControlResult<u64> {
    let spec: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();

    let seconds = if spec.contains(['h', 'm', 's']) {
        parse_units(&spec)
    } else {
        parse_colons(&spec)
    };
    seconds.ok_or_else(|| ControlError::InvalidTime(text.trim().to_string()))
}

fn parse_units(spec: &str) -> Option<u64> {
    let mut values: [Option<u64>; 3] = [None; 3];
    let mut digits = String::new();

    for c in spec.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let slot = match c {
            'h' => 0,
            'm' => 1,
            's' => 2,
            _ => return None,
        };
        if digits.is_empty() || values[slot].is_some() {
            return None;
        }
        values[slot] = Some(digits.parse().ok()?);
        digits.clear();
    }
    // Trailing digits without a unit.
    if !digits.is_empty() {
        return None;
    }

    let [h, m, s] = values.map(|v| v.unwrap_or(0));
    if h == 0 && m == 0 && s == 0 {
        return None;
    }
    Some(h * 3600 + m * 60 + s)
}

fn parse_colons(spec: &str) -> Option<u64> {
    let clean: String = spec
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ':')
        .collect();
    let parts = clean
        .split(':')
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;

    match parts.as_slice() {
        [s] => Some(*s),
        [m, s] => Some(m * 60 + s),
        [h, m, s] => Some(h * 3600 + m * 60 + s),
        _ => None,
    }
}
