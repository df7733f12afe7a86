pub mod defaults;
pub mod math;
pub mod options;

pub use defaults::{FeePolicyTable, default_fee_options};
pub use math::{
    MAX_MULTIPLIER_DECIMALS, Multiplier, RoundingMode, bigint_clamp, bigint_multiply,
    bigint_percent_increase,
};
pub use options::{
    FeeOptionsField, UserOperationFeeOptions, ValueOrMultiplier, apply_fee_option,
    apply_override, apply_override_or_fee_option,
};
