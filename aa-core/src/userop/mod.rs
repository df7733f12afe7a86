pub mod builder;
pub mod drop_and_replace;
pub mod middleware;

pub use builder::{SentUserOperation, StateObserver, UserOpBuilder, UserOperationRequest};
pub use drop_and_replace::{bump_fee, drop_and_replace};
pub use middleware::{
    BuildState, DefaultFeeEstimator, DefaultGasEstimator, DefaultUserOpSigner,
    Erc7677PaymasterData, Erc7677StubData, Middleware, MiddlewareArgs, MiddlewareStack,
    NonceResolver, PaymasterOverride, UserOperationOverrides, erc7677_middleware,
};
