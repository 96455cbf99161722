//! Exact Kubernetes resource quantities
//!
//! `k8s_openapi` models a quantity as an opaque string. Gang sizing needs to
//! add quantities together exactly, so this module parses the Kubernetes
//! quantity grammar into a fixed-point value (nano-units held in an `i128`)
//! and formats sums back into canonical strings such as `3Gi`, `2` or `500m`.
//!
//! Values finer than one nano-unit are rounded up, matching the API server.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use thiserror::Error;

const NANOS_PER_UNIT: i128 = 1_000_000_000;

/// Largest number of significant digits accepted before the decimal point
/// and after it combined.
const MAX_DIGITS: usize = 30;

const DECIMAL_SUFFIXES: &[(&str, u32)] = &[
    ("E", 6),
    ("P", 5),
    ("T", 4),
    ("G", 3),
    ("M", 2),
    ("k", 1),
];
const BINARY_SUFFIXES: &[(&str, u32)] = &[
    ("Ei", 6),
    ("Pi", 5),
    ("Ti", 4),
    ("Gi", 3),
    ("Mi", 2),
    ("Ki", 1),
];

/// Notation a quantity was written in; sums keep the notation of their first term.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QuantityFormat {
    /// Powers of ten: `m`, `k`, `M`, `G`, ...
    #[default]
    DecimalSI,
    /// Powers of two: `Ki`, `Mi`, `Gi`, ...
    BinarySI,
    /// Scientific notation: `1e3`, `5E-1`
    DecimalExponent,
}

/// Reasons a quantity string is rejected
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    /// The input was empty or whitespace
    #[error("quantity is empty")]
    Empty,
    /// The numeric part is missing or malformed
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    /// The suffix is not a known SI, binary or exponent suffix
    #[error("unknown suffix '{0}'")]
    UnknownSuffix(String),
    /// The value does not fit the fixed-point representation
    #[error("quantity out of range")]
    OutOfRange,
}

#[derive(Clone, Copy)]
enum Multiplier {
    Decimal(i32),
    Binary(u32),
}

/// A Kubernetes quantity with exact arithmetic.
///
/// Equality and ordering compare numeric value only; `1Gi == 1073741824`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParsedQuantity {
    nanos: i128,
    format: QuantityFormat,
}

impl ParsedQuantity {
    /// Parse a quantity string (`"1.5"`, `"500m"`, `"2Gi"`, `"1e3"`)
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(QuantityError::Empty);
        }

        let (negative, unsigned) = match input.as_bytes()[0] {
            b'-' => (true, &input[1..]),
            b'+' => (false, &input[1..]),
            _ => (false, input),
        };

        let number_end = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(number_end);

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(QuantityError::InvalidNumber(input.to_string()));
        }
        if whole.len() + fraction.len() > MAX_DIGITS {
            return Err(QuantityError::OutOfRange);
        }

        let mut mantissa: i128 = 0;
        for digit in whole.bytes().chain(fraction.bytes()) {
            mantissa = mantissa * 10 + i128::from(digit - b'0');
        }
        let scale = fraction.len() as i32;

        let (format, multiplier) = parse_suffix(suffix)?;
        let magnitude = scale_to_nanos(mantissa, scale, multiplier)?;

        Ok(Self {
            nanos: if negative { -magnitude } else { magnitude },
            format,
        })
    }

    /// Build a quantity from whole units in decimal notation
    pub fn from_units(units: i64) -> Self {
        Self {
            nanos: i128::from(units) * NANOS_PER_UNIT,
            format: QuantityFormat::DecimalSI,
        }
    }

    /// Value in nano-units
    pub fn as_nanos(&self) -> i128 {
        self.nanos
    }

    /// Notation used when formatting
    pub fn format(&self) -> QuantityFormat {
        self.format
    }

    /// Multiply by a non-negative count
    pub fn scaled(self, count: u32) -> Self {
        Self {
            nanos: self.nanos.saturating_mul(i128::from(count)),
            format: self.format,
        }
    }

    /// Canonical `k8s_openapi` quantity
    pub fn to_quantity(&self) -> Quantity {
        Quantity(self.to_string())
    }
}

fn parse_suffix(suffix: &str) -> Result<(QuantityFormat, Multiplier), QuantityError> {
    let decimal = |exp: i32| -> Result<(QuantityFormat, Multiplier), QuantityError> {
        Ok((QuantityFormat::DecimalSI, Multiplier::Decimal(exp)))
    };
    match suffix {
        "" => decimal(0),
        "n" => decimal(-9),
        "u" => decimal(-6),
        "m" => decimal(-3),
        "k" => decimal(3),
        "M" => decimal(6),
        "G" => decimal(9),
        "T" => decimal(12),
        "P" => decimal(15),
        "E" => decimal(18),
        _ => {
            if let Some((_, power)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
                return Ok((QuantityFormat::BinarySI, Multiplier::Binary(*power)));
            }
            if let Some(exp) = suffix.strip_prefix(|c| c == 'e' || c == 'E') {
                let exp: i32 = exp
                    .parse()
                    .map_err(|_| QuantityError::UnknownSuffix(suffix.to_string()))?;
                return Ok((QuantityFormat::DecimalExponent, Multiplier::Decimal(exp)));
            }
            Err(QuantityError::UnknownSuffix(suffix.to_string()))
        }
    }
}

fn scale_to_nanos(
    mantissa: i128,
    scale: i32,
    multiplier: Multiplier,
) -> Result<i128, QuantityError> {
    match multiplier {
        Multiplier::Decimal(exp) => {
            let shift = exp.saturating_add(9).saturating_sub(scale);
            if shift >= 0 {
                let factor = 10i128
                    .checked_pow(shift.unsigned_abs())
                    .ok_or(QuantityError::OutOfRange)?;
                mantissa.checked_mul(factor).ok_or(QuantityError::OutOfRange)
            } else {
                match 10i128.checked_pow(shift.unsigned_abs()) {
                    Some(divisor) => ceil_div(mantissa, divisor),
                    // Smaller than one nano-unit; rounds up to the smallest step.
                    None => Ok(i128::from(mantissa > 0)),
                }
            }
        }
        Multiplier::Binary(power) => {
            let factor = 1024i128.pow(power) * NANOS_PER_UNIT;
            let numerator = mantissa
                .checked_mul(factor)
                .ok_or(QuantityError::OutOfRange)?;
            let divisor = 10i128
                .checked_pow(scale.unsigned_abs())
                .ok_or(QuantityError::OutOfRange)?;
            ceil_div(numerator, divisor)
        }
    }
}

/// Division rounding up; `divisor` is positive
fn ceil_div(numerator: i128, divisor: i128) -> Result<i128, QuantityError> {
    let quotient = numerator.div_euclid(divisor);
    if numerator.rem_euclid(divisor) == 0 {
        return Ok(quotient);
    }
    quotient.checked_add(1).ok_or(QuantityError::OutOfRange)
}

impl PartialEq for ParsedQuantity {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for ParsedQuantity {}

impl PartialOrd for ParsedQuantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParsedQuantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl Add for ParsedQuantity {
    type Output = ParsedQuantity;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            nanos: self.nanos.saturating_add(rhs.nanos),
            format: self.format,
        }
    }
}

impl fmt::Display for ParsedQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return f.write_str("0");
        }
        if self.nanos < 0 {
            f.write_str("-")?;
        }
        let abs = self.nanos.unsigned_abs() as i128;

        if abs % NANOS_PER_UNIT == 0 {
            let units = abs / NANOS_PER_UNIT;
            let (base, suffixes) = match self.format {
                QuantityFormat::BinarySI => (1024i128, BINARY_SUFFIXES),
                _ => (1000i128, DECIMAL_SUFFIXES),
            };
            for (suffix, power) in suffixes {
                let step = base.pow(*power);
                if units % step == 0 {
                    return write!(f, "{}{}", units / step, suffix);
                }
            }
            return write!(f, "{units}");
        }

        if abs % 1_000_000 == 0 {
            write!(f, "{}m", abs / 1_000_000)
        } else if abs % 1_000 == 0 {
            write!(f, "{}u", abs / 1_000)
        } else {
            write!(f, "{abs}n")
        }
    }
}
