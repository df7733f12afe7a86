use std::{collections::HashMap, env, path::Path};

use alloy::{primitives::Address, transports::http::reqwest::Url};
use config::{Config, File};
use opkit_aa_types::EntrypointVersion;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    chain::{ChainEndpoints, ChainService, RpcChain, header_map},
    entrypoint::{EntrypointDetails, EntrypointOptions},
    error::EngineError,
    fees::{FeePolicyTable, UserOperationFeeOptions},
};

/// Connection settings for one chain.
///
/// Keys are snake_case.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub bundler_url: String,
    #[serde(default)]
    pub paymaster_url: Option<String>,
    /// Extra headers for bundler and paymaster requests, usually credentials
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub entrypoint_address: Option<Address>,
    #[serde(default)]
    pub entrypoint_version: Option<EntrypointVersion>,
    /// Replaces the built-in fee policy for this chain
    #[serde(default)]
    pub fee_options: Option<UserOperationFeeOptions>,
}

fn parse_url(kind: &str, url: &str) -> Result<Url, EngineError> {
    Url::parse(url).map_err(|e| EngineError::RpcConfigError {
        message: format!("Failed to parse {kind} URL {url}: {e}"),
    })
}

impl ChainConfig {
    pub fn entrypoint_options(&self) -> EntrypointOptions {
        EntrypointOptions {
            address: self.entrypoint_address,
            version: self.entrypoint_version,
        }
    }

    pub fn to_chain(&self) -> Result<RpcChain, EngineError> {
        let entrypoint = EntrypointDetails::resolve(self.chain_id, &self.entrypoint_options())?;
        let endpoints = ChainEndpoints {
            rpc_url: parse_url("RPC", &self.rpc_url)?,
            bundler_url: parse_url("bundler", &self.bundler_url)?,
            paymaster_url: self
                .paymaster_url
                .as_deref()
                .map(|url| parse_url("paymaster", url))
                .transpose()?,
            headers: header_map(&self.headers)?,
        };

        let chain = RpcChain::connect(self.chain_id, endpoints, entrypoint)?;
        Ok(match &self.fee_options {
            Some(fee_options) => chain.with_fee_options(fee_options.clone()),
            None => chain,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct OpkitConfig {
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

impl OpkitConfig {
    /// Layer `opkit_base.yaml`, `opkit_{environment}.yaml` and `OPKIT__*` variables.
    ///
    /// The environment is read from `OPKIT_ENVIRONMENT` and defaults to `local`.
    pub fn load(directory: impl AsRef<Path>) -> Result<Self, EngineError> {
        let directory = directory.as_ref();
        let environment = env::var("OPKIT_ENVIRONMENT").unwrap_or_else(|_| "local".into());
        let environment = Environment::try_from(environment)?;

        let config = Config::builder()
            .add_source(File::from(directory.join("opkit_base.yaml")))
            .add_source(
                File::from(directory.join(format!("opkit_{}.yaml", environment.as_str())))
                    .required(false),
            )
            .add_source(config::Environment::with_prefix("opkit").separator("__"))
            .build()?;

        let config: OpkitConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        for chain in &self.chains {
            if let Some(fee_options) = &chain.fee_options {
                fee_options.validate()?;
            }
            if self
                .chains
                .iter()
                .filter(|other| other.chain_id == chain.chain_id)
                .count()
                > 1
            {
                return Err(EngineError::ConfigError {
                    message: format!("chain {} is configured more than once", chain.chain_id),
                });
            }
        }
        Ok(())
    }

    /// Built-in fee policies with the per-chain fee options of this config applied.
    pub fn fee_policies(&self) -> Result<FeePolicyTable, EngineError> {
        FeePolicyTable::builtin().with_overrides(self.chains.iter().filter_map(|chain| {
            chain
                .fee_options
                .clone()
                .map(|fee_options| (chain.chain_id, fee_options))
        }))
    }

    /// Install [`OpkitConfig::fee_policies`] as the process-wide default.
    pub fn install_fee_policies(&self) -> Result<(), EngineError> {
        FeePolicyTable::install(self.fee_policies()?)
    }
}

impl ChainService for OpkitConfig {
    fn get_chain(&self, chain_id: u64) -> Result<RpcChain, EngineError> {
        self.chains
            .iter()
            .find(|chain| chain.chain_id == chain_id)
            .ok_or_else(|| EngineError::ConfigError {
                message: format!("chain {chain_id} is not configured"),
            })?
            .to_chain()
    }
}

/// Runtime environment selecting the config overlay
pub enum Environment {
    Local,
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(EngineError::ConfigError {
                message: format!(
                    "{other} is not a supported environment. Use either `local`, `development`, or `production`."
                ),
            }),
        }
    }
}
