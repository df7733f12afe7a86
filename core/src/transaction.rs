use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// A call the smart account makes on the sender's behalf
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub target: Address,

    #[serde(default)]
    pub data: Bytes,

    #[serde(default)]
    pub value: U256,
}

/// What the UserOperation executes
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum UserOperationCallData {
    /// Calldata already encoded for the account
    Raw { raw: Bytes },
    Batch(Vec<Call>),
    Single(Call),
}
