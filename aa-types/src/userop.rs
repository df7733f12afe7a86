use alloy::{
    core::sol_types::SolValue,
    primitives::{Address, B256, Bytes, ChainId, U256, keccak256},
    rpc::types::{PackedUserOperation, UserOperation},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// EntryPoint version a UserOperation is built for
#[derive(Deserialize, Serialize, Debug, JsonSchema, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntrypointVersion {
    #[serde(rename = "0.6")]
    V0_6,
    #[serde(rename = "0.7")]
    V0_7,
}

/// UserOp version enum
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VersionedUserOp {
    V0_6(UserOperation),
    V0_7(PackedUserOperation),
}

/// Error type for UserOp operations
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserOpError {
    #[error("Field `{field}` is unresolved")]
    UnresolvedField { field: String },

    #[error("Inconsistent user operation fields: {message}")]
    InconsistentFields { message: String },

    #[error("Nonce key {key} exceeds the maximum of 2^152 - 1")]
    InvalidNonceKey {
        #[schemars(with = "String")]
        key: U256,
    },

    #[error("Unexpected error: {message}")]
    UnexpectedError { message: String },
}

impl UserOpError {
    fn unresolved(field: &str) -> Self {
        UserOpError::UnresolvedField {
            field: field.to_string(),
        }
    }
}

/// A UserOperation under construction.
///
/// Middleware stages fill the optional fields in; [`UserOperationStruct::into_versioned`] is
/// the only way out and fails on anything still unresolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationStruct {
    pub sender: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub factory: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub factory_data: Option<Bytes>,
    #[serde(default)]
    pub call_data: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_gas_limit: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_gas_limit: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_verification_gas: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paymaster_data: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Bytes>,
    /// The paymaster fields came from a stub the paymaster marked final. Build-local, never
    /// serialized.
    #[serde(skip)]
    pub paymaster_is_final: bool,
}

fn required<T: Clone>(value: &Option<T>, field: &str) -> Result<T, UserOpError> {
    value.clone().ok_or_else(|| UserOpError::unresolved(field))
}

/// Split `address ‖ data` into its parts. Empty input means "none".
fn split_address_prefixed(bytes: &Bytes) -> Result<Option<(Address, Bytes)>, UserOpError> {
    match bytes.len() {
        0 => Ok(None),
        len if len < 20 => Err(UserOpError::InconsistentFields {
            message: format!("address-prefixed field is {len} bytes, expected at least 20"),
        }),
        _ => Ok(Some((
            Address::from_slice(&bytes[..20]),
            Bytes::copy_from_slice(&bytes[20..]),
        ))),
    }
}

impl UserOperationStruct {
    /// v0.6 `initCode`: `factory ‖ factoryData`, empty when the account is deployed.
    pub fn init_code(&self) -> Bytes {
        match self.factory {
            Some(factory) => [
                factory.as_slice(),
                self.factory_data.as_ref().map_or(&[][..], |d| &d[..]),
            ]
            .concat()
            .into(),
            None => Bytes::new(),
        }
    }

    /// v0.6 `paymasterAndData`: `paymaster ‖ paymasterData`.
    pub fn paymaster_and_data(&self) -> Bytes {
        match self.paymaster {
            Some(paymaster) => [
                paymaster.as_slice(),
                self.paymaster_data.as_ref().map_or(&[][..], |d| &d[..]),
            ]
            .concat()
            .into(),
            None => Bytes::new(),
        }
    }

    /// Set the paymaster fields from a v0.6 style `paymasterAndData` blob.
    pub fn set_paymaster_and_data(&mut self, paymaster_and_data: &Bytes) -> Result<(), UserOpError> {
        match split_address_prefixed(paymaster_and_data)? {
            Some((paymaster, data)) => {
                self.paymaster = Some(paymaster);
                self.paymaster_data = Some(data);
            }
            None => self.clear_paymaster(),
        }
        Ok(())
    }

    pub fn clear_paymaster(&mut self) {
        self.paymaster = None;
        self.paymaster_data = None;
        self.paymaster_verification_gas_limit = None;
        self.paymaster_post_op_gas_limit = None;
        self.paymaster_is_final = false;
    }

    fn check_consistency(&self, version: EntrypointVersion) -> Result<(), UserOpError> {
        if self.factory.is_none() && self.factory_data.as_ref().is_some_and(|d| !d.is_empty()) {
            return Err(UserOpError::InconsistentFields {
                message: "factoryData is set without a factory".to_string(),
            });
        }
        if self.paymaster.is_none() && self.paymaster_data.as_ref().is_some_and(|d| !d.is_empty())
        {
            return Err(UserOpError::InconsistentFields {
                message: "paymasterData is set without a paymaster".to_string(),
            });
        }
        if version == EntrypointVersion::V0_7 && self.paymaster.is_some() {
            required(
                &self.paymaster_verification_gas_limit,
                "paymasterVerificationGasLimit",
            )?;
            required(&self.paymaster_post_op_gas_limit, "paymasterPostOpGasLimit")?;
        }
        Ok(())
    }

    /// Convert to the typed operation, failing on the first unresolved field.
    pub fn into_versioned(&self, version: EntrypointVersion) -> Result<VersionedUserOp, UserOpError> {
        self.check_consistency(version)?;

        let nonce = required(&self.nonce, "nonce")?;
        let call_gas_limit = required(&self.call_gas_limit, "callGasLimit")?;
        let verification_gas_limit =
            required(&self.verification_gas_limit, "verificationGasLimit")?;
        let pre_verification_gas = required(&self.pre_verification_gas, "preVerificationGas")?;
        let max_fee_per_gas = required(&self.max_fee_per_gas, "maxFeePerGas")?;
        let max_priority_fee_per_gas =
            required(&self.max_priority_fee_per_gas, "maxPriorityFeePerGas")?;
        let signature = required(&self.signature, "signature")?;

        Ok(match version {
            EntrypointVersion::V0_6 => VersionedUserOp::V0_6(UserOperation {
                sender: self.sender,
                nonce,
                init_code: self.init_code(),
                call_data: self.call_data.clone(),
                call_gas_limit,
                verification_gas_limit,
                pre_verification_gas,
                max_fee_per_gas,
                max_priority_fee_per_gas,
                paymaster_and_data: self.paymaster_and_data(),
                signature,
            }),
            EntrypointVersion::V0_7 => VersionedUserOp::V0_7(PackedUserOperation {
                sender: self.sender,
                nonce,
                factory: self.factory,
                factory_data: self.factory.map(|_| self.factory_data.clone().unwrap_or_default()),
                call_data: self.call_data.clone(),
                call_gas_limit,
                verification_gas_limit,
                pre_verification_gas,
                max_fee_per_gas,
                max_priority_fee_per_gas,
                paymaster: self.paymaster,
                paymaster_verification_gas_limit: self
                    .paymaster
                    .and(self.paymaster_verification_gas_limit),
                paymaster_post_op_gas_limit: self.paymaster.and(self.paymaster_post_op_gas_limit),
                paymaster_data: self
                    .paymaster
                    .map(|_| self.paymaster_data.clone().unwrap_or_default()),
                signature,
            }),
        })
    }

    /// Same as [`Self::into_versioned`] but with zero for every unresolved gas and fee field,
    /// the shape bundlers and paymasters expect for estimation requests.
    pub fn with_placeholders(&self, version: EntrypointVersion) -> Result<VersionedUserOp, UserOpError> {
        let mut placeholder = self.clone();
        for field in [
            &mut placeholder.call_gas_limit,
            &mut placeholder.verification_gas_limit,
            &mut placeholder.pre_verification_gas,
            &mut placeholder.max_fee_per_gas,
            &mut placeholder.max_priority_fee_per_gas,
        ] {
            field.get_or_insert(U256::ZERO);
        }
        if placeholder.paymaster.is_some() {
            placeholder
                .paymaster_verification_gas_limit
                .get_or_insert(U256::ZERO);
            placeholder
                .paymaster_post_op_gas_limit
                .get_or_insert(U256::ZERO);
        }
        placeholder.into_versioned(version)
    }

    pub fn is_resolved(&self, version: EntrypointVersion) -> bool {
        self.into_versioned(version).is_ok()
    }
}

impl VersionedUserOp {
    pub fn version(&self) -> EntrypointVersion {
        match self {
            VersionedUserOp::V0_6(_) => EntrypointVersion::V0_6,
            VersionedUserOp::V0_7(_) => EntrypointVersion::V0_7,
        }
    }

    pub fn sender(&self) -> Address {
        match self {
            VersionedUserOp::V0_6(op) => op.sender,
            VersionedUserOp::V0_7(op) => op.sender,
        }
    }

    pub fn nonce(&self) -> U256 {
        match self {
            VersionedUserOp::V0_6(op) => op.nonce,
            VersionedUserOp::V0_7(op) => op.nonce,
        }
    }

    pub fn max_fee_per_gas(&self) -> U256 {
        match self {
            VersionedUserOp::V0_6(op) => op.max_fee_per_gas,
            VersionedUserOp::V0_7(op) => op.max_fee_per_gas,
        }
    }

    pub fn max_priority_fee_per_gas(&self) -> U256 {
        match self {
            VersionedUserOp::V0_6(op) => op.max_priority_fee_per_gas,
            VersionedUserOp::V0_7(op) => op.max_priority_fee_per_gas,
        }
    }

    pub fn pre_verification_gas(&self) -> U256 {
        match self {
            VersionedUserOp::V0_6(op) => op.pre_verification_gas,
            VersionedUserOp::V0_7(op) => op.pre_verification_gas,
        }
    }

    pub fn signature(&self) -> &Bytes {
        match self {
            VersionedUserOp::V0_6(op) => &op.signature,
            VersionedUserOp::V0_7(op) => &op.signature,
        }
    }

    pub fn set_signature(&mut self, signature: Bytes) {
        match self {
            VersionedUserOp::V0_6(op) => op.signature = signature,
            VersionedUserOp::V0_7(op) => op.signature = signature,
        }
    }

    /// EntryPoint `getUserOpHash` for this operation.
    pub fn hash(&self, entrypoint: Address, chain_id: ChainId) -> Result<B256, UserOpError> {
        match self {
            VersionedUserOp::V0_6(op) => compute_user_op_v06_hash(op, entrypoint, chain_id),
            VersionedUserOp::V0_7(op) => compute_user_op_v07_hash(op, entrypoint, chain_id),
        }
    }

    /// Back to the partial form, keeping every field resolved.
    pub fn to_struct(&self) -> Result<UserOperationStruct, UserOpError> {
        match self {
            VersionedUserOp::V0_6(op) => {
                let mut uo = UserOperationStruct {
                    sender: op.sender,
                    nonce: Some(op.nonce),
                    call_data: op.call_data.clone(),
                    call_gas_limit: Some(op.call_gas_limit),
                    verification_gas_limit: Some(op.verification_gas_limit),
                    pre_verification_gas: Some(op.pre_verification_gas),
                    max_fee_per_gas: Some(op.max_fee_per_gas),
                    max_priority_fee_per_gas: Some(op.max_priority_fee_per_gas),
                    signature: Some(op.signature.clone()),
                    ..Default::default()
                };
                if let Some((factory, data)) = split_address_prefixed(&op.init_code)? {
                    uo.factory = Some(factory);
                    uo.factory_data = Some(data);
                }
                uo.set_paymaster_and_data(&op.paymaster_and_data)?;
                Ok(uo)
            }
            VersionedUserOp::V0_7(op) => Ok(UserOperationStruct {
                sender: op.sender,
                nonce: Some(op.nonce),
                factory: op.factory,
                factory_data: op.factory_data.clone(),
                call_data: op.call_data.clone(),
                call_gas_limit: Some(op.call_gas_limit),
                verification_gas_limit: Some(op.verification_gas_limit),
                pre_verification_gas: Some(op.pre_verification_gas),
                max_fee_per_gas: Some(op.max_fee_per_gas),
                max_priority_fee_per_gas: Some(op.max_priority_fee_per_gas),
                paymaster: op.paymaster,
                paymaster_data: op.paymaster_data.clone(),
                paymaster_verification_gas_limit: op.paymaster_verification_gas_limit,
                paymaster_post_op_gas_limit: op.paymaster_post_op_gas_limit,
                signature: Some(op.signature.clone()),
                paymaster_is_final: false,
            }),
        }
    }
}

fn to_u128(value: U256, field: &str) -> Result<u128, UserOpError> {
    value.try_into().map_err(|_| UserOpError::UnexpectedError {
        message: format!("{field} does not fit in 128 bits"),
    })
}

/// Two 128-bit values packed into one word, `high ‖ low`.
fn pack_u128_pair(high: u128, low: u128) -> B256 {
    let mut word = [0u8; 32];
    word[0..16].copy_from_slice(&high.to_be_bytes());
    word[16..32].copy_from_slice(&low.to_be_bytes());
    B256::from(word)
}

fn entrypoint_hash(inner_hash: B256, entrypoint: Address, chain_id: ChainId) -> B256 {
    keccak256((inner_hash, entrypoint, U256::from(chain_id)).abi_encode())
}

/// Compute UserOperation v0.6 hash
pub fn compute_user_op_v06_hash(
    op: &UserOperation,
    entrypoint: Address,
    chain_id: ChainId,
) -> Result<B256, UserOpError> {
    // signature is excluded
    let inner = (
        op.sender,
        op.nonce,
        keccak256(&op.init_code),
        keccak256(&op.call_data),
        op.call_gas_limit,
        op.verification_gas_limit,
        op.pre_verification_gas,
        op.max_fee_per_gas,
        op.max_priority_fee_per_gas,
        keccak256(&op.paymaster_and_data),
    );

    Ok(entrypoint_hash(
        keccak256(inner.abi_encode()),
        entrypoint,
        chain_id,
    ))
}

/// Compute UserOperation v0.7 hash
pub fn compute_user_op_v07_hash(
    op: &PackedUserOperation,
    entrypoint: Address,
    chain_id: ChainId,
) -> Result<B256, UserOpError> {
    let init_code: Bytes = match op.factory {
        Some(factory) if factory != Address::ZERO => [
            factory.as_slice(),
            op.factory_data.as_ref().map_or(&[][..], |d| &d[..]),
        ]
        .concat()
        .into(),
        Some(_) => op.factory_data.clone().unwrap_or_default(),
        None => Bytes::new(),
    };

    let account_gas_limits = pack_u128_pair(
        to_u128(op.verification_gas_limit, "verification_gas_limit")?,
        to_u128(op.call_gas_limit, "call_gas_limit")?,
    );
    let gas_fees = pack_u128_pair(
        to_u128(op.max_priority_fee_per_gas, "max_priority_fee_per_gas")?,
        to_u128(op.max_fee_per_gas, "max_fee_per_gas")?,
    );

    let paymaster_and_data: Bytes = match op.paymaster {
        Some(paymaster) if paymaster != Address::ZERO => {
            let verification = to_u128(
                op.paymaster_verification_gas_limit.unwrap_or_default(),
                "paymaster_verification_gas_limit",
            )?;
            let post_op = to_u128(
                op.paymaster_post_op_gas_limit.unwrap_or_default(),
                "paymaster_post_op_gas_limit",
            )?;
            [
                paymaster.as_slice(),
                &verification.to_be_bytes()[..],
                &post_op.to_be_bytes()[..],
                op.paymaster_data.as_ref().map_or(&[][..], |d| &d[..]),
            ]
            .concat()
            .into()
        }
        Some(_) => op.paymaster_data.clone().unwrap_or_default(),
        None => Bytes::new(),
    };

    let inner = (
        op.sender,
        op.nonce,
        keccak256(&init_code),
        keccak256(&op.call_data),
        account_gas_limits,
        op.pre_verification_gas,
        gas_fees,
        keccak256(&paymaster_and_data),
    );

    Ok(entrypoint_hash(
        keccak256(inner.abi_encode()),
        entrypoint,
        chain_id,
    ))
}
