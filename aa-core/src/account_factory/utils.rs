use alloy::{
    hex,
    primitives::{Address, B256, Bytes, keccak256},
    sol_types::SolValue,
};

/// CREATE2 salt the default factory derives from the owner and the caller's salt data
pub fn account_salt(owner: &Address, salt_data: &Bytes) -> B256 {
    keccak256((owner, salt_data).abi_encode_params())
}

/// Address of an EIP-1167 minimal proxy to `implementation` deployed by `deployer` with CREATE2.
pub fn predict_proxy_address(implementation: Address, salt: B256, deployer: Address) -> Address {
    const PROXY_PREFIX: [u8; 20] = hex!("0x3d602d80600a3d3981f3363d3d373d3d3d363d73");
    const PROXY_SUFFIX: [u8; 15] = hex!("0x5af43d82803e903d91602b57fd5bf3");

    let init_code = [&PROXY_PREFIX[..], implementation.as_slice(), &PROXY_SUFFIX[..]].concat();
    deployer.create2(salt, keccak256(&init_code))
}
