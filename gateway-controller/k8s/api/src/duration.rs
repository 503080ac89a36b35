use std::{fmt, str::FromStr, time::Duration};

/// A duration written in Go's `time.ParseDuration` format, e.g. `2500ms` or
/// `1h30m`.
///
/// Go durations are signed while [`Duration`] is not, so the sign is tracked
/// separately and callers decide whether a negative value is meaningful.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct GoDuration {
    duration: Duration,
    is_negative: bool,
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("empty duration")]
    Empty,

    #[error("invalid unit {0:?}: {EXPECTED_UNITS}")]
    InvalidUnit(String),

    #[error("missing a unit: {EXPECTED_UNITS}")]
    NoUnit,

    #[error("invalid number: {0}")]
    NotANumber(#[from] std::num::ParseFloatError),

    #[error("duration out of range")]
    OutOfRange,
}

const EXPECTED_UNITS: &str = "expected one of 'ns', 'us', '\u{00b5}s', 'ms', 's', 'm', or 'h'";

// === impl GoDuration ===

impl GoDuration {
    #[inline]
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.is_negative
    }

    /// Returns the duration if it is not negative.
    pub fn non_negative(self) -> Option<Duration> {
        if self.is_negative && !self.duration.is_zero() {
            return None;
        }
        Some(self.duration)
    }
}

impl From<Duration> for GoDuration {
    fn from(duration: Duration) -> Self {
        Self {
            duration,
            is_negative: false,
        }
    }
}

impl fmt::Debug for GoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for GoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negative {
            f.write_str("-")?;
        }
        fmt::Debug::fmt(&self.duration, f)
    }
}

impl FromStr for GoDuration {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn unit_nanos(unit: &str) -> Result<f64, ParseError> {
            const SECOND: f64 = 1_000_000_000.0;
            let nanos = match unit {
                "ns" => 1.0,
                // U+00B5 is the micro sign, U+03BC is the Greek letter mu.
                "us" | "\u{00b5}s" | "\u{03bc}s" => 1_000.0,
                "ms" => 1_000_000.0,
                "s" => SECOND,
                "m" => 60.0 * SECOND,
                "h" => 3_600.0 * SECOND,
                _ => return Err(ParseError::InvalidUnit(unit.to_string())),
            };
            Ok(nanos)
        }

        let is_negative = s.starts_with('-');
        let mut rest = s.strip_prefix(['-', '+']).unwrap_or(s);
        if rest.is_empty() {
            return Err(ParseError::Empty);
        }
        if rest == "0" {
            return Ok(Self {
                duration: Duration::ZERO,
                is_negative,
            });
        }

        let mut duration = Duration::ZERO;
        while !rest.is_empty() {
            let unit_start = rest
                .find(|c: char| c.is_alphabetic())
                .ok_or(ParseError::NoUnit)?;
            let (value, tail) = rest.split_at(unit_start);
            if value.is_empty() {
                return Err(ParseError::NoUnit);
            }
            let value = value.parse::<f64>()?;

            let unit_end = tail
                .find(|c: char| !c.is_alphabetic())
                .unwrap_or(tail.len());
            let (unit, tail) = tail.split_at(unit_end);
            let nanos = (unit_nanos(unit)? * value).round();
            if !nanos.is_finite() || nanos < 0.0 || nanos >= u64::MAX as f64 {
                return Err(ParseError::OutOfRange);
            }
            duration = duration
                .checked_add(Duration::from_nanos(nanos as u64))
                .ok_or(ParseError::OutOfRange)?;
            rest = tail;
        }

        Ok(Self {
            duration,
            is_negative,
        })
    }
}
