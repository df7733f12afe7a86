use std::collections::HashMap;

use alloy::{
    primitives::{Address, B256, U256},
    rpc::{
        client::RpcClient,
        json_rpc::{RpcRecv, RpcSend},
        types::UserOperationReceipt,
    },
    transports::{IntoBoxTransport, http::reqwest::Url},
};
use opkit_aa_types::VersionedUserOp;
use serde::{Deserialize, Serialize};

use crate::error::{AlloyRpcErrorToEngineError, EngineError, RpcCallContext};

/// State overrides passed through to `eth_estimateUserOperationGas`
pub type StateOverrides = HashMap<Address, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UseropGasEstimation {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    #[serde(default, alias = "paymasterVerificationGas")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, alias = "paymasterPostOpGas")]
    pub paymaster_post_op_gas_limit: Option<U256>,
}

/// Result of `eth_getUserOperationByHash`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationByHash {
    pub user_operation: VersionedUserOp,
    pub entry_point: Address,
    pub block_number: Option<U256>,
    pub block_hash: Option<B256>,
    pub transaction_hash: Option<B256>,
}

/// Serializes as `[]`; some bundlers reject requests without a params array.
pub(crate) fn no_params() -> Vec<()> {
    Vec::new()
}

/// The ERC-4337 bundler JSON-RPC surface
pub trait BundlerRpc: Send + Sync {
    fn estimate_user_operation_gas(
        &self,
        user_op: &VersionedUserOp,
        entrypoint: Address,
        state_overrides: Option<&StateOverrides>,
    ) -> impl Future<Output = Result<UseropGasEstimation, EngineError>> + Send;

    fn send_user_operation(
        &self,
        user_op: &VersionedUserOp,
        entrypoint: Address,
    ) -> impl Future<Output = Result<B256, EngineError>> + Send;

    fn get_user_operation_receipt(
        &self,
        user_op_hash: B256,
    ) -> impl Future<Output = Result<Option<UserOperationReceipt>, EngineError>> + Send;

    fn get_user_operation_by_hash(
        &self,
        user_op_hash: B256,
    ) -> impl Future<Output = Result<Option<UserOperationByHash>, EngineError>> + Send;

    fn supported_entrypoints(&self) -> impl Future<Output = Result<Vec<Address>, EngineError>> + Send;

    /// `rundler_maxPriorityFeePerGas`
    fn max_priority_fee_per_gas(&self) -> impl Future<Output = Result<U256, EngineError>> + Send;
}

/// A JSON-RPC client for interacting with an ERC-4337 bundler
#[derive(Debug, Clone)]
pub struct BundlerClient {
    inner: RpcClient,
    chain_id: u64,
    url: Url,
}

impl BundlerClient {
    pub fn new(transport: impl IntoBoxTransport, chain_id: u64, url: Url) -> Self {
        let client = RpcClient::builder().transport(transport, false);

        Self {
            inner: client,
            chain_id,
            url,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn request<P: RpcSend, R: RpcRecv>(
        &self,
        method: &'static str,
        params: P,
    ) -> Result<R, EngineError> {
        self.inner
            .request(method, params.clone())
            .await
            .map_err(|err| {
                let err = err.to_engine_bundler_error(RpcCallContext::new(
                    self.chain_id,
                    self.url.as_str(),
                    method,
                    &params,
                ));
                tracing::debug!(error = ?err, method, "bundler request failed");
                err
            })
    }
}

impl BundlerRpc for BundlerClient {
    async fn estimate_user_operation_gas(
        &self,
        user_op: &VersionedUserOp,
        entrypoint: Address,
        state_overrides: Option<&StateOverrides>,
    ) -> Result<UseropGasEstimation, EngineError> {
        match state_overrides {
            Some(overrides) => {
                self.request(
                    "eth_estimateUserOperationGas",
                    (user_op.clone(), entrypoint, overrides.clone()),
                )
                .await
            }
            None => {
                self.request("eth_estimateUserOperationGas", (user_op.clone(), entrypoint))
                    .await
            }
        }
    }

    async fn send_user_operation(
        &self,
        user_op: &VersionedUserOp,
        entrypoint: Address,
    ) -> Result<B256, EngineError> {
        self.request("eth_sendUserOperation", (user_op.clone(), entrypoint))
            .await
    }

    async fn get_user_operation_receipt(
        &self,
        user_op_hash: B256,
    ) -> Result<Option<UserOperationReceipt>, EngineError> {
        self.request("eth_getUserOperationReceipt", (user_op_hash,))
            .await
    }

    async fn get_user_operation_by_hash(
        &self,
        user_op_hash: B256,
    ) -> Result<Option<UserOperationByHash>, EngineError> {
        self.request("eth_getUserOperationByHash", (user_op_hash,))
            .await
    }

    async fn supported_entrypoints(&self) -> Result<Vec<Address>, EngineError> {
        self.request("eth_supportedEntryPoints", no_params()).await
    }

    async fn max_priority_fee_per_gas(&self) -> Result<U256, EngineError> {
        self.request("rundler_maxPriorityFeePerGas", no_params())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_estimation_accepts_both_paymaster_field_spellings() {
        let v07: UseropGasEstimation = serde_json::from_str(
            r#"{"callGasLimit":"0x1","verificationGasLimit":"0x2","preVerificationGas":"0x3","paymasterVerificationGas":"0x4","paymasterPostOpGas":"0x5"}"#,
        )
        .unwrap();
        assert_eq!(v07.paymaster_verification_gas_limit, Some(U256::from(4)));
        assert_eq!(v07.paymaster_post_op_gas_limit, Some(U256::from(5)));

        let v06: UseropGasEstimation = serde_json::from_str(
            r#"{"callGasLimit":"0x1","verificationGasLimit":"0x2","preVerificationGas":"0x3"}"#,
        )
        .unwrap();
        assert_eq!(v06.paymaster_verification_gas_limit, None);
    }
}
