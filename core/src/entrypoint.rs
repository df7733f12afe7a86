use alloy::primitives::Address;
use opkit_aa_types::EntrypointVersion;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    constants::{CANONICAL_ENTRYPOINT_CHAINS, ENTRYPOINT_ADDRESS_V0_6, ENTRYPOINT_ADDRESS_V0_7},
    error::EngineError,
};

/// The EntryPoint a chain submits UserOperations to
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrypointDetails {
    #[serde(rename = "entrypointAddress")]
    pub address: Address,

    #[serde(rename = "entrypointVersion")]
    pub version: EntrypointVersion,
}

/// # EntryPoint Options
///
/// Both fields are optional:
///
/// 1. **Version**: used as given, otherwise inferred from a known `entrypointAddress`,
///    otherwise 0.7.
/// 2. **Address**: used as given, otherwise the canonical address of the version, which is
///    only available on chains where the canonical EntryPoint is deployed.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
pub struct EntrypointOptions {
    /// # Entrypoint Contract Address
    ///
    /// Known addresses:
    ///
    /// - V0.6: 0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789
    ///
    /// - V0.7: 0x0000000071727De22E5E9d8BAf0edAc6f37da032
    #[serde(rename = "entrypointAddress", default)]
    #[schemars(with = "Option<String>")]
    pub address: Option<Address>,

    /// # Entrypoint Version
    #[serde(rename = "entrypointVersion", default)]
    pub version: Option<EntrypointVersion>,
}

impl EntrypointDetails {
    pub fn v0_6() -> Self {
        Self {
            address: ENTRYPOINT_ADDRESS_V0_6,
            version: EntrypointVersion::V0_6,
        }
    }

    pub fn v0_7() -> Self {
        Self {
            address: ENTRYPOINT_ADDRESS_V0_7,
            version: EntrypointVersion::V0_7,
        }
    }

    fn canonical_address(version: EntrypointVersion) -> Address {
        match version {
            EntrypointVersion::V0_6 => ENTRYPOINT_ADDRESS_V0_6,
            EntrypointVersion::V0_7 => ENTRYPOINT_ADDRESS_V0_7,
        }
    }

    fn infer_version(address: &Address) -> Option<EntrypointVersion> {
        if *address == ENTRYPOINT_ADDRESS_V0_6 {
            Some(EntrypointVersion::V0_6)
        } else if *address == ENTRYPOINT_ADDRESS_V0_7 {
            Some(EntrypointVersion::V0_7)
        } else {
            None
        }
    }

    /// Resolve the EntryPoint for `chain_id`.
    ///
    /// Fails with [`EngineError::EntrypointNotFoundError`] when no address is given and the
    /// chain has no canonical deployment.
    pub fn resolve(chain_id: u64, options: &EntrypointOptions) -> Result<Self, EngineError> {
        let version = options
            .version
            .or_else(|| options.address.as_ref().and_then(Self::infer_version))
            .unwrap_or(EntrypointVersion::V0_7);

        let address = match options.address {
            Some(address) => address,
            None if CANONICAL_ENTRYPOINT_CHAINS.contains(&chain_id) => {
                Self::canonical_address(version)
            }
            None => {
                return Err(EngineError::EntrypointNotFoundError {
                    chain_id,
                    version: version_label(version).to_string(),
                });
            }
        };

        Ok(Self { address, version })
    }
}

pub fn version_label(version: EntrypointVersion) -> &'static str {
    match version {
        EntrypointVersion::V0_6 => "0.6",
        EntrypointVersion::V0_7 => "0.7",
    }
}

impl<'de> Deserialize<'de> for EntrypointDetails {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let options = EntrypointOptions::deserialize(deserializer)?;
        let version = options
            .version
            .or_else(|| options.address.as_ref().and_then(Self::infer_version))
            .unwrap_or(EntrypointVersion::V0_7);
        Ok(Self {
            address: options
                .address
                .unwrap_or_else(|| Self::canonical_address(version)),
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;

    #[test]
    fn infers_version_from_address() {
        let details = EntrypointDetails::resolve(
            1,
            &EntrypointOptions {
                address: Some(ENTRYPOINT_ADDRESS_V0_6),
                version: None,
            },
        )
        .unwrap();
        assert_eq!(details, EntrypointDetails::v0_6());
    }

    #[test]
    fn unknown_chain_needs_an_explicit_address() {
        let err = EntrypointDetails::resolve(999_999, &EntrypointOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::EntrypointNotFoundError { chain_id: 999_999, .. }
        ));

        let custom = address!("0x1234567890123456789012345678901234567890");
        let details = EntrypointDetails::resolve(
            999_999,
            &EntrypointOptions {
                address: Some(custom),
                version: Some(EntrypointVersion::V0_6),
            },
        )
        .unwrap();
        assert_eq!(details.address, custom);
        assert_eq!(details.version, EntrypointVersion::V0_6);
    }

    #[test]
    fn deserializes_with_defaults() {
        let details: EntrypointDetails =
            serde_json::from_str(r#"{"entrypointVersion":"0.6"}"#).unwrap();
        assert_eq!(details, EntrypointDetails::v0_6());
    }
}
