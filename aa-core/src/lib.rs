pub mod account_factory;
pub mod multisig;
pub mod smart_account;
pub mod userop;
