//! Exact fee arithmetic on 256-bit integers.
//!
//! Multipliers are fixed-point decimals with [`MAX_MULTIPLIER_DECIMALS`] fractional digits.
//! Inputs needing more precision are rejected instead of being rounded.

use std::{fmt, str::FromStr};

use alloy::primitives::U256;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EngineError;

/// Fractional digits a multiplier may carry.
pub const MAX_MULTIPLIER_DECIMALS: u32 = 4;

const SCALE: U256 = U256::from_limbs([10_000, 0, 0, 0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum RoundingMode {
    #[default]
    RoundUp,
    RoundDown,
    /// Half rounds away from zero
    RoundNearest,
}

/// A non-negative decimal multiplier, stored as `value * 10^MAX_MULTIPLIER_DECIMALS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Multiplier {
    scaled: U256,
}

impl Multiplier {
    pub const IDENTITY: Self = Self { scaled: SCALE };

    /// `numerator / denominator`, which must terminate within the decimal budget.
    pub fn from_rational(numerator: U256, denominator: U256) -> Result<Self, EngineError> {
        if denominator.is_zero() {
            return Err(EngineError::InvalidMultiplierError {
                message: "denominator must not be zero".to_string(),
            });
        }
        let scaled_numerator =
            numerator
                .checked_mul(SCALE)
                .ok_or_else(|| EngineError::FeeOverflowError {
                    message: format!("multiplier {numerator}/{denominator} is too large"),
                })?;
        if !(scaled_numerator % denominator).is_zero() {
            return Err(EngineError::MultiplierPrecisionError {
                multiplier: format!("{numerator}/{denominator}"),
                max_decimals: MAX_MULTIPLIER_DECIMALS,
            });
        }
        Ok(Self {
            scaled: scaled_numerator / denominator,
        })
    }

    /// Parse a plain decimal such as `1.15`.
    pub fn from_decimal_str(value: &str) -> Result<Self, EngineError> {
        let invalid = || EngineError::InvalidMultiplierError {
            message: format!("`{value}` is not a non-negative decimal number"),
        };

        let trimmed = value.trim();
        let (integer, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
        if (integer.is_empty() && fraction.is_empty())
            || !integer.bytes().all(|b| b.is_ascii_digit())
            || !fraction.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let fraction = fraction.trim_end_matches('0');
        if fraction.len() > MAX_MULTIPLIER_DECIMALS as usize {
            return Err(EngineError::MultiplierPrecisionError {
                multiplier: trimmed.to_string(),
                max_decimals: MAX_MULTIPLIER_DECIMALS,
            });
        }

        let integer = if integer.is_empty() {
            U256::ZERO
        } else {
            U256::from_str_radix(integer, 10).map_err(|_| invalid())?
        };
        let padded = format!("{fraction:0<width$}", width = MAX_MULTIPLIER_DECIMALS as usize);
        let fraction = U256::from_str_radix(&padded, 10).map_err(|_| invalid())?;

        let scaled = integer
            .checked_mul(SCALE)
            .and_then(|v| v.checked_add(fraction))
            .ok_or_else(|| EngineError::FeeOverflowError {
                message: format!("multiplier {trimmed} is too large"),
            })?;
        Ok(Self { scaled })
    }

    /// Convert through the shortest decimal string that round-trips `value`.
    pub fn from_f64(value: f64) -> Result<Self, EngineError> {
        if !value.is_finite() || value < 0.0 {
            return Err(EngineError::InvalidMultiplierError {
                message: format!("{value} is not a finite non-negative number"),
            });
        }
        Self::from_decimal_str(&value.to_string())
    }

    pub fn numerator(&self) -> U256 {
        self.scaled
    }

    pub fn denominator(&self) -> U256 {
        SCALE
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// `base * self`, rounded per `mode`.
    pub fn apply(&self, base: U256, mode: RoundingMode) -> Result<U256, EngineError> {
        let product = base
            .checked_mul(self.scaled)
            .ok_or_else(|| EngineError::FeeOverflowError {
                message: format!("{base} * {self} overflows 256 bits"),
            })?;
        let (quotient, remainder) = product.div_rem(SCALE);
        let round_up = match mode {
            RoundingMode::RoundDown => false,
            RoundingMode::RoundUp => !remainder.is_zero(),
            RoundingMode::RoundNearest => remainder >= SCALE / U256::from(2),
        };
        Ok(if round_up {
            quotient + U256::from(1)
        } else {
            quotient
        })
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (integer, fraction) = self.scaled.div_rem(SCALE);
        let fraction = format!(
            "{:0>width$}",
            fraction.to_string(),
            width = MAX_MULTIPLIER_DECIMALS as usize
        );
        let fraction = fraction.trim_end_matches('0');
        if fraction.is_empty() {
            write!(f, "{integer}")
        } else {
            write!(f, "{integer}.{fraction}")
        }
    }
}

impl FromStr for Multiplier {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_decimal_str(s)
    }
}

impl TryFrom<f64> for Multiplier {
    type Error = EngineError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::from_f64(value)
    }
}

impl Serialize for Multiplier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Multiplier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Self::from_f64(value),
            Repr::Text(value) => Self::from_decimal_str(&value),
        }
        .map_err(serde::de::Error::custom)
    }
}

/// Multiply `base` by a float multiplier without losing precision silently.
pub fn bigint_multiply(base: U256, multiplier: f64, mode: RoundingMode) -> Result<U256, EngineError> {
    Multiplier::from_f64(multiplier)?.apply(base, mode)
}

/// Clamp `value` into `[min, max]`; either bound may be absent.
pub fn bigint_clamp(value: U256, min: Option<U256>, max: Option<U256>) -> Result<U256, EngineError> {
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(EngineError::ValidationError {
                message: format!("lower bound {min} is greater than upper bound {max}"),
            });
        }
    }
    let value = min.map_or(value, |min| value.max(min));
    Ok(max.map_or(value, |max| value.min(max)))
}

/// `value * (100 + percent) / 100`, rounded down.
pub fn bigint_percent_increase(value: U256, percent: u32) -> Result<U256, EngineError> {
    let hundred = U256::from(100);
    value
        .checked_mul(hundred + U256::from(percent))
        .map(|v| v / hundred)
        .ok_or_else(|| EngineError::FeeOverflowError {
            message: format!("{value} increased by {percent}% overflows 256 bits"),
        })
}
