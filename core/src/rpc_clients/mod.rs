mod bundler;
mod paymaster;
mod public;
pub mod transport;

pub use bundler::{
    BundlerClient, BundlerRpc, StateOverrides, UseropGasEstimation, UserOperationByHash,
};
pub use paymaster::{
    PaymasterClient, PaymasterData, PaymasterRpc, PaymasterSponsor, PaymasterStubData,
};
pub use public::{ProviderClient, PublicRpc, get_entrypoint_nonce};
