use alloy::transports::http::reqwest::{
    ClientBuilder as HttpClientBuilder, Url,
    header::{HeaderMap, HeaderName, HeaderValue},
};

use crate::{
    entrypoint::EntrypointDetails,
    error::EngineError,
    fees::{UserOperationFeeOptions, default_fee_options},
    rpc_clients::{
        BundlerClient, BundlerRpc, PaymasterClient, PaymasterRpc, ProviderClient, PublicRpc,
        transport::SharedTransportBuilder,
    },
};

/// Everything a UserOperation build needs to talk to one chain
pub trait Chain: Send + Sync {
    type Bundler: BundlerRpc;
    type Paymaster: PaymasterRpc;
    type Public: PublicRpc;

    fn chain_id(&self) -> u64;

    fn bundler_client(&self) -> &Self::Bundler;

    /// `None` when the chain has no paymaster service configured
    fn paymaster_client(&self) -> Option<&Self::Paymaster>;

    fn public_client(&self) -> &Self::Public;

    fn entrypoint(&self) -> &EntrypointDetails;

    /// Fee policy applied when the caller passes no fee options
    fn fee_options(&self) -> UserOperationFeeOptions {
        default_fee_options(self.chain_id())
    }
}

pub trait ChainService {
    fn get_chain(&self, chain_id: u64) -> Result<impl Chain, EngineError>;
}

/// Where a chain's services live
#[derive(Debug, Clone)]
pub struct ChainEndpoints {
    pub rpc_url: Url,
    pub bundler_url: Url,
    pub paymaster_url: Option<Url>,
    /// Sent with every bundler and paymaster request
    pub headers: HeaderMap,
}

/// A [`Chain`] over HTTP JSON-RPC. All clients share one connection pool.
#[derive(Debug, Clone)]
pub struct RpcChain {
    chain_id: u64,
    entrypoint: EntrypointDetails,
    fee_options: Option<UserOperationFeeOptions>,

    pub bundler_client: BundlerClient,
    pub paymaster_client: Option<PaymasterClient>,
    pub public_client: ProviderClient,
}

impl RpcChain {
    pub fn connect(
        chain_id: u64,
        endpoints: ChainEndpoints,
        entrypoint: EntrypointDetails,
    ) -> Result<Self, EngineError> {
        let http_client =
            HttpClientBuilder::new()
                .build()
                .map_err(|e| EngineError::RpcConfigError {
                    message: format!("Failed to build HTTP client: {e}"),
                })?;
        let transports = SharedTransportBuilder::new(http_client);

        let bundler_client = BundlerClient::new(
            transports.with_headers(endpoints.bundler_url.clone(), endpoints.headers.clone()),
            chain_id,
            endpoints.bundler_url,
        );
        let paymaster_client = endpoints.paymaster_url.map(|url| {
            PaymasterClient::new(
                transports.with_headers(url.clone(), endpoints.headers.clone()),
                url,
            )
        });
        let public_client = ProviderClient::new(
            transports.plain(endpoints.rpc_url.clone()),
            chain_id,
            endpoints.rpc_url,
        );

        tracing::debug!(
            chain_id,
            entrypoint = %entrypoint.address,
            paymaster = paymaster_client.is_some(),
            "connected chain"
        );

        Ok(Self {
            chain_id,
            entrypoint,
            fee_options: None,
            bundler_client,
            paymaster_client,
            public_client,
        })
    }

    /// Use `fee_options` for this chain instead of the process-wide default.
    pub fn with_fee_options(mut self, fee_options: UserOperationFeeOptions) -> Self {
        self.fee_options = Some(fee_options);
        self
    }
}

impl Chain for RpcChain {
    type Bundler = BundlerClient;
    type Paymaster = PaymasterClient;
    type Public = ProviderClient;

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn bundler_client(&self) -> &BundlerClient {
        &self.bundler_client
    }

    fn paymaster_client(&self) -> Option<&PaymasterClient> {
        self.paymaster_client.as_ref()
    }

    fn public_client(&self) -> &ProviderClient {
        &self.public_client
    }

    fn entrypoint(&self) -> &EntrypointDetails {
        &self.entrypoint
    }

    fn fee_options(&self) -> UserOperationFeeOptions {
        self.fee_options
            .clone()
            .unwrap_or_else(|| default_fee_options(self.chain_id))
    }
}

/// Parse configured header pairs into a [`HeaderMap`].
pub fn header_map<'a>(
    headers: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> Result<HeaderMap, EngineError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            EngineError::RpcConfigError {
                message: format!("Invalid header name {name}: {e}"),
            }
        })?;
        map.insert(name, HeaderValue::from_str(value)?);
    }
    Ok(map)
}
