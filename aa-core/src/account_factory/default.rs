use alloy::primitives::{Address, Bytes};
use opkit_aa_types::EntrypointVersion;
use opkit_core::{
    constants::{
        DEFAULT_FACTORY_ADDRESS_V0_6, DEFAULT_FACTORY_ADDRESS_V0_7,
        DEFAULT_IMPLEMENTATION_ADDRESS_V0_6, DEFAULT_IMPLEMENTATION_ADDRESS_V0_7,
    },
    error::EngineError,
};

use super::{AccountFactory, utils};

/// A factory deploying minimal proxies to a known implementation, so addresses can be
/// predicted offline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultAccountFactory {
    pub factory_address: Address,
    pub implementation_address: Address,
}

impl DefaultAccountFactory {
    pub fn v0_6() -> Self {
        Self::with_addresses(
            DEFAULT_FACTORY_ADDRESS_V0_6,
            DEFAULT_IMPLEMENTATION_ADDRESS_V0_6,
        )
    }

    pub fn v0_7() -> Self {
        Self::with_addresses(
            DEFAULT_FACTORY_ADDRESS_V0_7,
            DEFAULT_IMPLEMENTATION_ADDRESS_V0_7,
        )
    }

    pub fn for_version(version: EntrypointVersion) -> Self {
        match version {
            EntrypointVersion::V0_6 => Self::v0_6(),
            EntrypointVersion::V0_7 => Self::v0_7(),
        }
    }

    pub fn with_addresses(factory_address: Address, implementation_address: Address) -> Self {
        Self {
            factory_address,
            implementation_address,
        }
    }

    pub fn predict_address_sync(&self, owner: &Address, salt_data: &Bytes) -> Address {
        utils::predict_proxy_address(
            self.implementation_address,
            utils::account_salt(owner, salt_data),
            self.factory_address,
        )
    }
}

impl AccountFactory for DefaultAccountFactory {
    fn factory_address(&self) -> Address {
        self.factory_address
    }

    async fn predict_address(&self, owner: &Address, salt_data: &Bytes) -> Result<Address, EngineError> {
        Ok(self.predict_address_sync(owner, salt_data))
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;

    const OWNER: Address = address!("0xbe2D2B388635D33b0C9C6d60dE9853716e4b51A3");

    #[test]
    fn predicts_v07_accounts() {
        assert_eq!(
            DefaultAccountFactory::v0_7().predict_address_sync(&OWNER, &Bytes::new()),
            address!("0xDA15403AF9690C74f30eCC9cCa686fCAD2C897f8")
        );
    }

    #[test]
    fn predicts_v06_accounts() {
        assert_eq!(
            DefaultAccountFactory::for_version(EntrypointVersion::V0_6)
                .predict_address_sync(&OWNER, &Bytes::new()),
            address!("0xB7E052ec0BC8B741Ce7cA7B7dFBaECb4B234ffBE")
        );
    }

    #[test]
    fn salt_data_changes_the_address() {
        let factory = DefaultAccountFactory::v0_7();
        assert_ne!(
            factory.predict_address_sync(&OWNER, &Bytes::new()),
            factory.predict_address_sync(&OWNER, &Bytes::from_static(b"wallet-2"))
        );
    }
}
