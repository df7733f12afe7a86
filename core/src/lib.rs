pub mod chain;
pub mod config;
pub mod constants;
pub mod entrypoint;
pub mod error;
pub mod fees;
pub mod rpc_clients;
pub mod signer;
pub mod transaction;
