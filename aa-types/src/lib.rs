pub mod nonce;
pub mod userop;

pub use nonce::{MAX_NONCE_KEY, NonceKey};
pub use userop::{
    EntrypointVersion, UserOpError, UserOperationStruct, VersionedUserOp, compute_user_op_v06_hash,
    compute_user_op_v07_hash,
};
