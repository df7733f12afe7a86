use alloy::{
    primitives::{Address, Bytes, U64, U256},
    rpc::client::RpcClient,
    transports::{IntoBoxTransport, http::reqwest::Url},
};
use opkit_aa_types::VersionedUserOp;
use serde::{Deserialize, Serialize};

use crate::error::{AlloyRpcErrorToEngineError, EngineError, RpcCallContext};

/// Sponsor metadata a paymaster service may attach
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymasterSponsor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// `pm_getPaymasterStubData` result.
///
/// v0.6 paymasters answer with `paymasterAndData`, v0.7 ones with the split fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterStubData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsor: Option<PaymasterSponsor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_data: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_and_data: Option<Bytes>,
    /// The stub is already the final paymaster data
    #[serde(default)]
    pub is_final: bool,
}

/// `pm_getPaymasterData` result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_data: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_and_data: Option<Bytes>,
}

/// ERC-7677 paymaster web service capability
pub trait PaymasterRpc: Send + Sync {
    fn get_paymaster_stub_data(
        &self,
        user_op: &VersionedUserOp,
        entrypoint: Address,
        chain_id: u64,
        context: &serde_json::Value,
    ) -> impl Future<Output = Result<PaymasterStubData, EngineError>> + Send;

    fn get_paymaster_data(
        &self,
        user_op: &VersionedUserOp,
        entrypoint: Address,
        chain_id: u64,
        context: &serde_json::Value,
    ) -> impl Future<Output = Result<PaymasterData, EngineError>> + Send;
}

/// A JSON-RPC client for an ERC-7677 paymaster service
#[derive(Debug, Clone)]
pub struct PaymasterClient {
    inner: RpcClient,
    url: Url,
}

impl PaymasterClient {
    pub fn new(transport: impl IntoBoxTransport, url: Url) -> Self {
        let client = RpcClient::builder().transport(transport, false);
        Self { inner: client, url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn call<R: alloy::rpc::json_rpc::RpcRecv>(
        &self,
        method: &'static str,
        user_op: &VersionedUserOp,
        entrypoint: Address,
        chain_id: u64,
        context: &serde_json::Value,
    ) -> Result<R, EngineError> {
        // chain id goes over the wire as a hex quantity
        let params = (user_op.clone(), entrypoint, U64::from(chain_id), context.clone());
        self.inner
            .request(method, params.clone())
            .await
            .map_err(|err| {
                err.to_engine_paymaster_error(RpcCallContext::new(
                    chain_id,
                    self.url.as_str(),
                    method,
                    &params,
                ))
            })
    }
}

impl PaymasterRpc for PaymasterClient {
    async fn get_paymaster_stub_data(
        &self,
        user_op: &VersionedUserOp,
        entrypoint: Address,
        chain_id: u64,
        context: &serde_json::Value,
    ) -> Result<PaymasterStubData, EngineError> {
        self.call(
            "pm_getPaymasterStubData",
            user_op,
            entrypoint,
            chain_id,
            context,
        )
        .await
    }

    async fn get_paymaster_data(
        &self,
        user_op: &VersionedUserOp,
        entrypoint: Address,
        chain_id: u64,
        context: &serde_json::Value,
    ) -> Result<PaymasterData, EngineError> {
        self.call("pm_getPaymasterData", user_op, entrypoint, chain_id, context)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_v06_and_v07_stub_responses() {
        let v06: PaymasterStubData =
            serde_json::from_str(r#"{"paymasterAndData":"0xdeadbeef","isFinal":true}"#).unwrap();
        assert_eq!(
            v06.paymaster_and_data,
            Some(Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]))
        );
        assert!(v06.is_final);

        let v07: PaymasterStubData = serde_json::from_str(
            r#"{"sponsor":{"name":"acme"},"paymaster":"0x1111111111111111111111111111111111111111","paymasterData":"0x","paymasterVerificationGasLimit":"0x100","paymasterPostOpGasLimit":"0x10"}"#,
        )
        .unwrap();
        assert_eq!(v07.paymaster_post_op_gas_limit, Some(U256::from(16)));
        assert!(!v07.is_final);

        assert!(serde_json::from_str::<PaymasterData>(r#"{"paymasterData":"0xzz"}"#).is_err());
    }
}
