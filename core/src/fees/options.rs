use alloy::primitives::U256;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    error::EngineError,
    fees::math::{Multiplier, RoundingMode, bigint_clamp, bigint_percent_increase},
};

pub const MIN_PERCENTAGE: u32 = 1;
pub const MAX_PERCENTAGE: u32 = 1000;

/// Policy for one gas or fee field.
///
/// The multiplier or percentage is applied to the estimate first, then the result is clamped
/// to `min`/`max`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeeOptionsField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub min: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub max: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<f64>")]
    pub multiplier: Option<Multiplier>,
    /// Increase by this many percent, 1 to 1000
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u32>,
}

impl FeeOptionsField {
    pub fn with_multiplier(multiplier: Multiplier) -> Self {
        Self {
            multiplier: Some(multiplier),
            ..Default::default()
        }
    }

    pub fn with_percentage(percentage: u32) -> Self {
        Self {
            percentage: Some(percentage),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.multiplier.is_some() && self.percentage.is_some() {
            return Err(EngineError::ValidationError {
                message: "fee option cannot set both multiplier and percentage".to_string(),
            });
        }
        if let Some(percentage) = self.percentage {
            if !(MIN_PERCENTAGE..=MAX_PERCENTAGE).contains(&percentage) {
                return Err(EngineError::ValidationError {
                    message: format!(
                        "fee option percentage {percentage} is outside {MIN_PERCENTAGE}..={MAX_PERCENTAGE}"
                    ),
                });
            }
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(EngineError::ValidationError {
                    message: format!("fee option min {min} is greater than max {max}"),
                });
            }
        }
        Ok(())
    }

    /// Scale `estimate`, then clamp.
    pub fn apply(&self, estimate: U256) -> Result<U256, EngineError> {
        self.validate()?;
        let scaled = match (self.multiplier, self.percentage) {
            (Some(multiplier), _) => multiplier.apply(estimate, RoundingMode::RoundUp)?,
            (None, Some(percentage)) => bigint_percent_increase(estimate, percentage)?,
            (None, None) => estimate,
        };
        bigint_clamp(scaled, self.min, self.max)
    }
}

/// Per-field fee policies for a UserOperation
///
/// Accepts snake_case keys too, as written in config files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationFeeOptions {
    #[serde(default, alias = "max_fee_per_gas", skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<FeeOptionsField>,
    #[serde(default, alias = "max_priority_fee_per_gas", skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<FeeOptionsField>,
    #[serde(default, alias = "call_gas_limit", skip_serializing_if = "Option::is_none")]
    pub call_gas_limit: Option<FeeOptionsField>,
    #[serde(default, alias = "verification_gas_limit", skip_serializing_if = "Option::is_none")]
    pub verification_gas_limit: Option<FeeOptionsField>,
    #[serde(default, alias = "pre_verification_gas", skip_serializing_if = "Option::is_none")]
    pub pre_verification_gas: Option<FeeOptionsField>,
    #[serde(default, alias = "paymaster_verification_gas_limit", skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<FeeOptionsField>,
    #[serde(default, alias = "paymaster_post_op_gas_limit", skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<FeeOptionsField>,
}

impl UserOperationFeeOptions {
    pub fn validate(&self) -> Result<(), EngineError> {
        [
            &self.max_fee_per_gas,
            &self.max_priority_fee_per_gas,
            &self.call_gas_limit,
            &self.verification_gas_limit,
            &self.pre_verification_gas,
            &self.paymaster_verification_gas_limit,
            &self.paymaster_post_op_gas_limit,
        ]
        .into_iter()
        .flatten()
        .try_for_each(FeeOptionsField::validate)
    }
}

/// An override for a single field: a fixed value, or a multiplier on the estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueOrMultiplier {
    Value(U256),
    Multiplier {
        multiplier: Multiplier,
    },
}

impl ValueOrMultiplier {
    pub fn multiplier(multiplier: Multiplier) -> Self {
        ValueOrMultiplier::Multiplier { multiplier }
    }
}

/// Missing option passes `value` through; missing value falls back to `min`, then zero.
pub fn apply_fee_option(
    value: Option<U256>,
    option: Option<&FeeOptionsField>,
) -> Result<U256, EngineError> {
    match (value, option) {
        (value, None) => Ok(value.unwrap_or_default()),
        (None, Some(option)) => Ok(option.min.unwrap_or_default()),
        (Some(value), Some(option)) => option.apply(value),
    }
}

pub fn apply_override(
    value: Option<U256>,
    user_override: &ValueOrMultiplier,
) -> Result<U256, EngineError> {
    match user_override {
        ValueOrMultiplier::Value(fixed) => Ok(*fixed),
        ValueOrMultiplier::Multiplier { multiplier } => {
            multiplier.apply(value.unwrap_or_default(), RoundingMode::RoundUp)
        }
    }
}

/// An override always wins over the fee option.
pub fn apply_override_or_fee_option(
    value: Option<U256>,
    user_override: Option<&ValueOrMultiplier>,
    option: Option<&FeeOptionsField>,
) -> Result<U256, EngineError> {
    match user_override {
        Some(user_override) => apply_override(value, user_override),
        None => apply_fee_option(value, option),
    }
}
