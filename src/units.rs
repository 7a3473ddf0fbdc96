use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitsError {
    #[error("invalid duration {0:?}")]
    InvalidDuration(String),
    #[error("negative duration {0:?}")]
    NegativeDuration(String),
    #[error("invalid size {0:?}")]
    InvalidSize(String),
}

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;
const NANOS_PER_MIN: u128 = 60 * NANOS_PER_SEC;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MIN;

fn duration_unit(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        // micro sign and greek mu are both seen in the wild
        "us" | "\u{00b5}s" | "\u{03bc}s" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(NANOS_PER_MIN),
        "h" => Some(NANOS_PER_HOUR),
        _ => None,
    }
}

/// Parses a duration written as a sequence of decimal numbers with unit
/// suffixes, such as `300ms`, `1.5s` or `2h45m`. A bare `0` is accepted.
///
/// Negative durations are rejected: a workload cannot run for less than
/// nothing.
pub fn parse_duration(input: &str) -> Result<Duration, UnitsError> {
    let trimmed = input.trim();
    if let Some(magnitude) = trimmed.strip_prefix('-') {
        // "-0" and "-0s" are zero, anything larger is negative
        return match parse_magnitude(input, magnitude)? {
            Duration::ZERO => Ok(Duration::ZERO),
            _ => Err(UnitsError::NegativeDuration(input.to_string())),
        };
    }
    parse_magnitude(input, trimmed.strip_prefix('+').unwrap_or(trimmed))
}

fn parse_magnitude(input: &str, mut rest: &str) -> Result<Duration, UnitsError> {
    let invalid = || UnitsError::InvalidDuration(input.to_string());
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let int_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let (int_part, after_int) = rest.split_at(int_len);
        let (frac_part, after_num) = match after_int.strip_prefix('.') {
            Some(after_dot) => {
                let frac_len = after_dot
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(after_dot.len());
                after_dot.split_at(frac_len)
            }
            None => ("", after_int),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let unit_len = after_num
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after_num.len());
        let (unit, after_unit) = after_num.split_at(unit_len);
        let scale = duration_unit(unit).ok_or_else(invalid)?;

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid())?
        };
        let mut nanos = whole.checked_mul(scale).ok_or_else(invalid)?;
        if !frac_part.is_empty() {
            // digits beyond nanosecond precision do not change the result
            let digits = &frac_part[..frac_part.len().min(18)];
            let frac: u128 = digits.parse().map_err(|_| invalid())?;
            let denom = 10u128.pow(digits.len() as u32);
            nanos = nanos.checked_add(frac * scale / denom).ok_or_else(invalid)?;
        }
        total = total.checked_add(nanos).ok_or_else(invalid)?;
        rest = after_unit;
    }

    let total = u64::try_from(total).map_err(|_| invalid())?;
    Ok(Duration::from_nanos(total))
}

fn fraction(value: u128, unit: u128, width: usize) -> String {
    let whole = value / unit;
    let rem = value % unit;
    if rem == 0 {
        return whole.to_string();
    }
    let digits = format!("{rem:0width$}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

/// Formats a duration the way [`parse_duration`] reads it: `0s`, `750ns`,
/// `1.5µs`, `100ms`, `1.5s`, `2m0s`, `1h2m3s`.
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < NANOS_PER_MICRO {
        return format!("{nanos}ns");
    }
    if nanos < NANOS_PER_MILLI {
        return format!("{}\u{00b5}s", fraction(nanos, NANOS_PER_MICRO, 3));
    }
    if nanos < NANOS_PER_SEC {
        return format!("{}ms", fraction(nanos, NANOS_PER_MILLI, 6));
    }

    let hours = nanos / NANOS_PER_HOUR;
    let minutes = (nanos % NANOS_PER_HOUR) / NANOS_PER_MIN;
    let seconds = fraction(nanos % NANOS_PER_MIN, NANOS_PER_SEC, 9);
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// A number of bytes, read and written with 1024-based units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub const B: u64 = 1;
    pub const KB: u64 = 1 << 10;
    pub const MB: u64 = 1 << 20;
    pub const GB: u64 = 1 << 30;
    pub const TB: u64 = 1 << 40;
    pub const PB: u64 = 1 << 50;
    pub const EB: u64 = 1 << 60;

    pub fn bytes(self) -> u64 {
        self.0
    }
}

fn size_unit(unit: &str) -> Option<u64> {
    match unit.to_ascii_uppercase().as_str() {
        "B" | "BYTE" | "BYTES" => Some(ByteSize::B),
        "K" | "KB" | "KILOBYTE" | "KILOBYTES" => Some(ByteSize::KB),
        "M" | "MB" | "MEGABYTE" | "MEGABYTES" => Some(ByteSize::MB),
        "G" | "GB" | "GIGABYTE" | "GIGABYTES" => Some(ByteSize::GB),
        "T" | "TB" | "TERABYTE" | "TERABYTES" => Some(ByteSize::TB),
        "P" | "PB" | "PETABYTE" | "PETABYTES" => Some(ByteSize::PB),
        "E" | "EB" | "EXABYTE" | "EXABYTES" => Some(ByteSize::EB),
        _ => None,
    }
}

impl FromStr for ByteSize {
    type Err = UnitsError;

    /// Accepts `10MB`, `1.5 GB`, `512kilobytes` or a bare byte count.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || UnitsError::InvalidSize(s.to_string());
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }

        let Some(split) = trimmed.find(|c: char| !c.is_ascii_digit() && c != '.') else {
            return trimmed.parse::<u64>().map(ByteSize).map_err(|_| invalid());
        };
        let (number, unit) = trimmed.split_at(split);
        let multiplier = size_unit(unit.trim()).ok_or_else(invalid)?;
        let value: f64 = number.trim().parse().map_err(|_| invalid())?;
        let bytes = value * multiplier as f64;
        if !bytes.is_finite() || bytes >= u64::MAX as f64 {
            return Err(invalid());
        }
        Ok(ByteSize(bytes as u64))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (unit, suffix) = match self.0 {
            n if n >= Self::EB => (Self::EB, "EB"),
            n if n >= Self::PB => (Self::PB, "PB"),
            n if n >= Self::TB => (Self::TB, "TB"),
            n if n >= Self::GB => (Self::GB, "GB"),
            n if n >= Self::MB => (Self::MB, "MB"),
            n if n >= Self::KB => (Self::KB, "KB"),
            _ => (Self::B, "B"),
        };
        write!(f, "{:.2}{}", self.0 as f64 / unit as f64, suffix)
    }
}
