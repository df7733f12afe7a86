use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, Bytes, U256, aliases::U192},
    providers::{Provider, RootProvider},
    rpc::{client::RpcClient, types::TransactionRequest},
    sol,
    sol_types::SolCall,
    transports::{IntoBoxTransport, http::reqwest::Url},
};

use crate::error::{
    AlloyRpcErrorToEngineError, ContractErrorToEngineError, EngineError, RpcCallContext,
};

sol! {
    interface IEntryPoint {
        function getNonce(address sender, uint192 key) external view returns (uint256 nonce);
    }
}

/// Read access to the chain's public JSON-RPC
pub trait PublicRpc: Send + Sync {
    fn chain_id(&self) -> u64;

    fn get_code(&self, address: Address) -> impl Future<Output = Result<Bytes, EngineError>> + Send;

    /// Base fee of the latest block
    fn base_fee_per_gas(&self) -> impl Future<Output = Result<U256, EngineError>> + Send;

    /// `eth_maxPriorityFeePerGas`
    fn max_priority_fee_per_gas(&self) -> impl Future<Output = Result<U256, EngineError>> + Send;

    /// `eth_call` against the latest block
    fn call(&self, to: Address, data: Bytes) -> impl Future<Output = Result<Bytes, EngineError>> + Send;
}

/// EntryPoint `getNonce(sender, key)`.
pub async fn get_entrypoint_nonce(
    public: &impl PublicRpc,
    entrypoint: Address,
    sender: Address,
    key: U256,
) -> Result<U256, EngineError> {
    if key.bit_len() > U192::BITS {
        return Err(EngineError::ValidationError {
            message: format!("nonce key {key} does not fit in 192 bits"),
        });
    }
    let limbs = key.as_limbs();
    let key = U192::from_limbs([limbs[0], limbs[1], limbs[2]]);
    let data = IEntryPoint::getNonceCall { sender, key }.abi_encode();
    let output = public.call(entrypoint, data.into()).await?;
    IEntryPoint::getNonceCall::abi_decode_returns(&output)
        .map_err(|e| e.to_engine_error(public.chain_id(), Some(entrypoint)))
}

/// [`PublicRpc`] over an alloy HTTP provider
#[derive(Debug, Clone)]
pub struct ProviderClient {
    provider: RootProvider,
    chain_id: u64,
    url: Url,
}

impl ProviderClient {
    pub fn new(transport: impl IntoBoxTransport, chain_id: u64, url: Url) -> Self {
        let provider = RootProvider::new(RpcClient::builder().transport(transport, false));
        Self {
            provider,
            chain_id,
            url,
        }
    }

    pub fn provider(&self) -> &RootProvider {
        &self.provider
    }

    fn context<'a>(&'a self, method: &'a str, params: &impl serde::Serialize) -> RpcCallContext<'a> {
        RpcCallContext::new(self.chain_id, self.url.as_str(), method, params)
    }
}

impl PublicRpc for ProviderClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, EngineError> {
        self.provider
            .get_code_at(address)
            .await
            .map_err(|e| e.to_engine_error(self.context("eth_getCode", &(address, "latest"))))
    }

    async fn base_fee_per_gas(&self) -> Result<U256, EngineError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(|e| {
                e.to_engine_error(self.context("eth_getBlockByNumber", &("latest", false)))
            })?
            .ok_or_else(|| EngineError::RpcError {
                chain_id: self.chain_id,
                rpc_url: self.url.to_string(),
                method: "eth_getBlockByNumber".to_string(),
                params: "[\"latest\",false]".to_string(),
                message: "latest block not found".to_string(),
                kind: crate::error::RpcErrorKind::NullResp,
            })?;

        block
            .header
            .base_fee_per_gas
            .map(U256::from)
            .ok_or_else(|| EngineError::ValidationError {
                message: format!("chain {} does not report a base fee", self.chain_id),
            })
    }

    async fn max_priority_fee_per_gas(&self) -> Result<U256, EngineError> {
        self.provider
            .get_max_priority_fee_per_gas()
            .await
            .map(U256::from)
            .map_err(|e| e.to_engine_error(self.context("eth_maxPriorityFeePerGas", &())))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, EngineError> {
        let request = TransactionRequest::default().to(to).input(data.clone().into());
        self.provider
            .call(request)
            .await
            .map_err(|e| e.to_engine_error(self.context("eth_call", &(to, data))))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use alloy::{
        primitives::address,
        sol_types::SolValue,
    };

    use super::*;

    const ENTRYPOINT: Address = address!("0x0000000071727De22E5E9d8BAf0edAc6f37da032");
    const SENDER: Address = address!("0x00000000000000000000000000000000000a11ce");

    /// Answers `getNonce` with `key + 1` and records every call target and key
    #[derive(Default)]
    struct NonceNode {
        calls: Mutex<Vec<(Address, U192)>>,
    }

    impl PublicRpc for NonceNode {
        fn chain_id(&self) -> u64 {
            1
        }

        async fn get_code(&self, _address: Address) -> Result<Bytes, EngineError> {
            Ok(Bytes::new())
        }

        async fn base_fee_per_gas(&self) -> Result<U256, EngineError> {
            Ok(U256::ZERO)
        }

        async fn max_priority_fee_per_gas(&self) -> Result<U256, EngineError> {
            Ok(U256::ZERO)
        }

        async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, EngineError> {
            let call = IEntryPoint::getNonceCall::abi_decode(&data).unwrap();
            assert_eq!(call.sender, SENDER);
            self.calls.lock().unwrap().push((to, call.key));
            let nonce = U256::from(call.key) + U256::from(1);
            Ok(nonce.abi_encode().into())
        }
    }

    #[tokio::test]
    async fn reads_nonce_for_default_key() {
        let node = NonceNode::default();
        let nonce = get_entrypoint_nonce(&node, ENTRYPOINT, SENDER, U256::ZERO)
            .await
            .unwrap();

        assert_eq!(nonce, U256::from(1));
        assert_eq!(*node.calls.lock().unwrap(), vec![(ENTRYPOINT, U192::ZERO)]);
    }

    #[tokio::test]
    async fn passes_wide_keys_through_unchanged() {
        let node = NonceNode::default();
        let key = (U256::from(1) << 191) | U256::from(0xabcdef);
        let nonce = get_entrypoint_nonce(&node, ENTRYPOINT, SENDER, key)
            .await
            .unwrap();

        assert_eq!(nonce, key + U256::from(1));
        let (_, sent) = node.calls.lock().unwrap()[0];
        assert_eq!(U256::from(sent), key);
    }

    #[tokio::test]
    async fn rejects_keys_wider_than_192_bits() {
        let node = NonceNode::default();
        let err = get_entrypoint_nonce(&node, ENTRYPOINT, SENDER, U256::from(1) << 192)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::ValidationError { .. }));
        assert!(node.calls.lock().unwrap().is_empty());
    }
}
