use alloy::{
    primitives::{Address, U256},
    transports::{
        RpcError as AlloyRpcError, TransportErrorKind, http::reqwest::header::InvalidHeaderValue,
    },
};
use opkit_aa_types::{UserOpError, UserOperationStruct};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcErrorKind {
    /// Server returned an error response.
    #[error("server returned an error response: {0}")]
    ErrorResp(RpcErrorResponse),

    /// Server returned a null response when a non-null response was expected.
    #[error("server returned a null response when a non-null response was expected")]
    NullResp,

    /// Rpc server returned an unsupported feature.
    #[error("unsupported feature: {message}")]
    UnsupportedFeature { message: String },

    /// Returned when a local pre-processing step fails.
    #[error("local usage error: {message}")]
    InternalError { message: String },

    /// JSON serialization error.
    #[error("serialization error: {message}")]
    SerError { message: String },

    /// JSON deserialization error.
    #[error("deserialization error: {message}, text: {text}")]
    DeserError { message: String, text: String },

    #[error("HTTP error {status}")]
    TransportHttpError { status: u16, body: String },

    #[error("Other transport error: {message}")]
    OtherTransportError { message: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct RpcErrorResponse {
    /// The error code.
    pub code: i64,
    /// The error message (if any).
    pub message: String,
    /// The error data (if any).
    pub data: Option<String>,
}

impl std::fmt::Display for RpcErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)?;
        if let Some(data) = &self.data {
            write!(f, ", data: {data}")?;
        }
        Ok(())
    }
}

/// A serializable contract interaction error type
#[derive(Debug, Error, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractInteractionErrorKind {
    /// The contract returned no data.
    #[error(
        "contract call to `{function}` returned no data (\"0x\"); the called address might not be a contract"
    )]
    ZeroData { function: String },

    /// An error occurred ABI encoding or decoding.
    #[error("ABI error: {message}")]
    AbiError { message: String },
}

#[derive(Error, Debug, Serialize, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "type")]
pub enum EngineError {
    #[error("Could not find an account to execute with this action")]
    AccountNotFoundError,

    #[error("Invalid user operation: {message}")]
    #[serde(rename_all = "camelCase")]
    InvalidUserOperationError {
        message: String,
        /// The partially built operation, for debugging
        #[schemars(with = "serde_json::Value")]
        user_operation: Box<UserOperationStruct>,
    },

    #[error("Nonce key {key} exceeds the maximum of 2^152 - 1")]
    InvalidNonceKeyError {
        #[schemars(with = "String")]
        key: U256,
    },

    #[error("Invalid aggregated signature: {message}")]
    InvalidAggregatedSignatureError { message: String },

    #[error("Invalid multisig context signature: {message}")]
    InvalidContextSignatureError { message: String },

    #[error("At least one signature is required to combine multisig signatures")]
    MultisigMissingSignatureError,

    #[error("Expected a multisig account for this action")]
    MultisigAccountExpectedError,

    #[error("Multisig threshold not met: {collected} of {threshold} signatures")]
    MultisigThresholdNotMetError { collected: u64, threshold: u64 },

    #[error("No default entrypoint {version} known for chain {chain_id}")]
    #[serde(rename_all = "camelCase")]
    EntrypointNotFoundError { chain_id: u64, version: String },

    #[error("Multiplier {multiplier} needs more than {max_decimals} decimal places")]
    #[serde(rename_all = "camelCase")]
    MultiplierPrecisionError { multiplier: String, max_decimals: u32 },

    #[error("Invalid multiplier: {message}")]
    InvalidMultiplierError { message: String },

    #[error("Fee arithmetic overflow: {message}")]
    FeeOverflowError { message: String },

    #[error("RPC error on chain {chain_id} at {rpc_url} calling {method}: {message}")]
    RpcError {
        chain_id: u64,
        rpc_url: String,
        method: String,
        params: String,
        message: String,
        kind: RpcErrorKind,
    },

    #[error("Paymaster error on chain {chain_id} at {rpc_url} calling {method}: {message}")]
    PaymasterError {
        chain_id: u64,
        rpc_url: String,
        method: String,
        params: String,
        message: String,
        kind: RpcErrorKind,
    },

    #[error("Bundler error on chain {chain_id} at {rpc_url} calling {method}: {message}")]
    BundlerError {
        chain_id: u64,
        rpc_url: String,
        method: String,
        params: String,
        message: String,
        kind: RpcErrorKind,
    },

    #[error("Contract interaction error: {message}")]
    #[serde(rename_all = "camelCase")]
    ContractInteractionError {
        #[schemars(with = "Option<String>")]
        contract_address: Option<Address>,
        chain_id: u64,
        message: String,
        kind: ContractInteractionErrorKind,
    },

    #[error("Signer error: {message}")]
    SignerError { message: String },

    #[error("Bad RPC configuration: {message}")]
    RpcConfigError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl EngineError {
    /// Wrap a validation failure of `user_operation`, keeping the partial struct around.
    pub fn invalid_user_operation(err: UserOpError, user_operation: &UserOperationStruct) -> Self {
        match err {
            UserOpError::InvalidNonceKey { key } => EngineError::InvalidNonceKeyError { key },
            err => EngineError::InvalidUserOperationError {
                message: err.to_string(),
                user_operation: Box::new(user_operation.clone()),
            },
        }
    }

    pub fn contract_decoding_error(
        contract_address: Option<Address>,
        chain_id: u64,
        message: String,
    ) -> Self {
        EngineError::ContractInteractionError {
            contract_address,
            chain_id,
            message: message.clone(),
            kind: ContractInteractionErrorKind::AbiError { message },
        }
    }
}

impl From<UserOpError> for EngineError {
    fn from(err: UserOpError) -> Self {
        match err {
            UserOpError::InvalidNonceKey { key } => EngineError::InvalidNonceKeyError { key },
            err => EngineError::ValidationError {
                message: err.to_string(),
            },
        }
    }
}

impl From<InvalidHeaderValue> for EngineError {
    fn from(err: InvalidHeaderValue) -> Self {
        EngineError::RpcConfigError {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::ConfigError {
            message: err.to_string(),
        }
    }
}

/// Where a failed JSON-RPC call was headed and what it carried
#[derive(Debug, Clone)]
pub struct RpcCallContext<'a> {
    pub chain_id: u64,
    pub rpc_url: &'a str,
    pub method: &'a str,
    pub params: String,
}

impl<'a> RpcCallContext<'a> {
    pub fn new(chain_id: u64, rpc_url: &'a str, method: &'a str, params: &impl Serialize) -> Self {
        Self {
            chain_id,
            rpc_url,
            method,
            params: serde_json::to_string(params).unwrap_or_default(),
        }
    }
}

pub trait AlloyRpcErrorToEngineError {
    fn to_engine_error(&self, context: RpcCallContext<'_>) -> EngineError;
    fn to_engine_bundler_error(&self, context: RpcCallContext<'_>) -> EngineError;
    fn to_engine_paymaster_error(&self, context: RpcCallContext<'_>) -> EngineError;
}

fn to_engine_rpc_error_kind(err: &AlloyRpcError<TransportErrorKind>) -> RpcErrorKind {
    match err {
        AlloyRpcError::ErrorResp(err) => RpcErrorKind::ErrorResp(RpcErrorResponse {
            code: err.code,
            message: err.message.to_string(),
            data: err.data.as_ref().map(|data| data.to_string()),
        }),
        AlloyRpcError::NullResp => RpcErrorKind::NullResp,
        AlloyRpcError::UnsupportedFeature(feature) => RpcErrorKind::UnsupportedFeature {
            message: feature.to_string(),
        },
        AlloyRpcError::LocalUsageError(err) => RpcErrorKind::InternalError {
            message: err.to_string(),
        },
        AlloyRpcError::SerError(err) => RpcErrorKind::SerError {
            message: err.to_string(),
        },
        AlloyRpcError::DeserError { err, text } => RpcErrorKind::DeserError {
            message: err.to_string(),
            text: text.to_string(),
        },
        AlloyRpcError::Transport(TransportErrorKind::HttpError(err)) => {
            RpcErrorKind::TransportHttpError {
                status: err.status,
                body: err.body.to_string(),
            }
        }
        AlloyRpcError::Transport(err) => RpcErrorKind::OtherTransportError {
            message: err.to_string(),
        },
    }
}

impl AlloyRpcErrorToEngineError for AlloyRpcError<TransportErrorKind> {
    fn to_engine_error(&self, context: RpcCallContext<'_>) -> EngineError {
        EngineError::RpcError {
            chain_id: context.chain_id,
            rpc_url: context.rpc_url.to_string(),
            method: context.method.to_string(),
            params: context.params,
            message: self.to_string(),
            kind: to_engine_rpc_error_kind(self),
        }
    }

    fn to_engine_bundler_error(&self, context: RpcCallContext<'_>) -> EngineError {
        EngineError::BundlerError {
            chain_id: context.chain_id,
            rpc_url: context.rpc_url.to_string(),
            method: context.method.to_string(),
            params: context.params,
            message: self.to_string(),
            kind: to_engine_rpc_error_kind(self),
        }
    }

    fn to_engine_paymaster_error(&self, context: RpcCallContext<'_>) -> EngineError {
        EngineError::PaymasterError {
            chain_id: context.chain_id,
            rpc_url: context.rpc_url.to_string(),
            method: context.method.to_string(),
            params: context.params,
            message: self.to_string(),
            kind: to_engine_rpc_error_kind(self),
        }
    }
}

pub trait ContractErrorToEngineError {
    fn to_engine_error(self, chain_id: u64, contract_address: Option<Address>) -> EngineError;
}

impl ContractErrorToEngineError for alloy::sol_types::Error {
    fn to_engine_error(self, chain_id: u64, contract_address: Option<Address>) -> EngineError {
        EngineError::contract_decoding_error(contract_address, chain_id, self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_serialize_with_a_type_tag() {
        let err = EngineError::InvalidNonceKeyError {
            key: U256::from(1) << 152,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "INVALID_NONCE_KEY_ERROR");

        let json = serde_json::to_value(EngineError::MultisigMissingSignatureError).unwrap();
        assert_eq!(json["type"], "MULTISIG_MISSING_SIGNATURE_ERROR");
    }

    #[test]
    fn unresolved_fields_keep_the_partial_operation() {
        let partial = UserOperationStruct::default();
        let err = EngineError::invalid_user_operation(
            UserOpError::UnresolvedField {
                field: "nonce".to_string(),
            },
            &partial,
        );
        match err {
            EngineError::InvalidUserOperationError {
                message,
                user_operation,
            } => {
                assert!(message.contains("nonce"));
                assert_eq!(*user_operation, partial);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn schema_lists_every_tagged_variant() {
        let schema = serde_json::to_value(schemars::schema_for!(EngineError)).unwrap();
        let variants = schema["oneOf"].as_array().unwrap();
        let tags: Vec<&str> = variants
            .iter()
            .filter_map(|variant| variant["properties"]["type"]["enum"][0].as_str())
            .collect();
        assert_eq!(tags.len(), variants.len());
        for tag in [
            "ACCOUNT_NOT_FOUND_ERROR",
            "INVALID_NONCE_KEY_ERROR",
            "BUNDLER_ERROR",
            "PAYMASTER_ERROR",
            "CONTRACT_INTERACTION_ERROR",
        ] {
            assert!(tags.contains(&tag), "{tag} missing from {tags:?}");
        }

        let nonce_key = variants
            .iter()
            .find(|variant| variant["properties"]["type"]["enum"][0] == "INVALID_NONCE_KEY_ERROR")
            .unwrap();
        assert_eq!(nonce_key["properties"]["key"]["type"], "string");
    }
}
