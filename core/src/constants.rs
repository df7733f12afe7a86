use alloy::primitives::{Address, address};

pub const ENTRYPOINT_ADDRESS_V0_6: Address =
    address!("0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789");

pub const ENTRYPOINT_ADDRESS_V0_7: Address =
    address!("0x0000000071727De22E5E9d8BAf0edAc6f37da032");

pub const DEFAULT_FACTORY_ADDRESS_V0_7: Address =
    address!("0x4bE0ddfebcA9A5A4a617dee4DeCe99E7c862dceb");

pub const DEFAULT_IMPLEMENTATION_ADDRESS_V0_7: Address =
    address!("0x94eC38a5d2EDA5A543Ab4c08D998338D4082beb2");

pub const DEFAULT_FACTORY_ADDRESS_V0_6: Address =
    address!("0x85e23b94e7F5E9cC1fF78BCe78cfb15B81f0DF00");

pub const DEFAULT_IMPLEMENTATION_ADDRESS_V0_6: Address =
    address!("0xf22175c80c6e074C171811C59C6c0087e2a6a346");

pub const LOCAL_CHAIN_ID: u64 = 31337;

/// Chains where both canonical EntryPoints are deployed at their deterministic addresses.
pub const CANONICAL_ENTRYPOINT_CHAINS: &[u64] = &[
    1,        // mainnet
    11155111, // sepolia
    17000,    // holesky
    10,       // optimism
    11155420, // optimism sepolia
    42161,    // arbitrum one
    42170,    // arbitrum nova
    421614,   // arbitrum sepolia
    8453,     // base
    84532,    // base sepolia
    137,      // polygon
    80002,    // polygon amoy
    56,       // bnb smart chain
    43114,    // avalanche
    100,      // gnosis
    59144,    // linea
    534352,   // scroll
    7777777,  // zora
    LOCAL_CHAIN_ID,
];

/// Arbitrum and Optimism families, whose L1 data fee lands in preVerificationGas.
pub const L1_DATA_FEE_CHAINS: &[u64] = &[42161, 421614, 10, 11155420];
