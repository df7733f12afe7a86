use std::sync::Arc;

use alloy::primitives::B256;
use opkit_aa_types::{UserOperationStruct, VersionedUserOp};
use opkit_core::{
    chain::Chain,
    error::EngineError,
    fees::UserOperationFeeOptions,
    rpc_clients::BundlerRpc,
    transaction::UserOperationCallData,
};
use serde::{Deserialize, Serialize};

use super::middleware::{
    BuildState, Middleware, MiddlewareArgs, MiddlewareStack, UserOperationOverrides,
};
use crate::smart_account::SmartAccount;

/// Called on every [`BuildState`] a build enters
pub type StateObserver = Arc<dyn Fn(BuildState) + Send + Sync>;

/// What to build
#[derive(Debug, Clone)]
pub struct UserOperationRequest<'a, A> {
    pub account: Option<&'a A>,
    pub call_data: UserOperationCallData,
    pub overrides: UserOperationOverrides,
    /// Falls back to the chain's fee policy
    pub fee_options: Option<UserOperationFeeOptions>,
}

impl<'a, A> UserOperationRequest<'a, A> {
    pub fn new(account: &'a A, call_data: UserOperationCallData) -> Self {
        Self {
            account: Some(account),
            call_data,
            overrides: UserOperationOverrides::default(),
            fee_options: None,
        }
    }

    pub fn with_overrides(mut self, overrides: UserOperationOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_fee_options(mut self, fee_options: UserOperationFeeOptions) -> Self {
        self.fee_options = Some(fee_options);
        self
    }
}

/// A UserOperation the bundler accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentUserOperation {
    pub hash: B256,
    pub user_operation: VersionedUserOp,
}

/// Runs a [`MiddlewareStack`] against one chain.
///
/// Stages are awaited one after another. The first stage error fails the build and is returned
/// as is.
pub struct UserOpBuilder<'c, C, A> {
    chain: &'c C,
    stack: MiddlewareStack<C, A>,
    observer: Option<StateObserver>,
}

impl<'c, C: Chain + 'static, A: SmartAccount + 'static> UserOpBuilder<'c, C, A> {
    /// Builder with [`MiddlewareStack::standard`]
    pub fn standard(chain: &'c C, paymaster_context: serde_json::Value) -> Self {
        Self::new(chain, MiddlewareStack::standard(paymaster_context))
    }
}

impl<'c, C: Chain, A: SmartAccount> UserOpBuilder<'c, C, A> {
    pub fn new(chain: &'c C, stack: MiddlewareStack<C, A>) -> Self {
        Self {
            chain,
            stack,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Replace the signing stage, e.g. with a multisig signer.
    pub fn with_signer(mut self, signer: impl Middleware<C, A> + 'static) -> Self {
        self.stack.replace(signer);
        self
    }

    pub fn chain(&self) -> &C {
        self.chain
    }

    pub fn stack(&self) -> &MiddlewareStack<C, A> {
        &self.stack
    }

    fn enter(&self, state: BuildState) {
        tracing::debug!(%state, "build state");
        if let Some(observer) = &self.observer {
            observer(state);
        }
    }

    fn fail(&self, state: BuildState, stage: &str, error: EngineError) -> EngineError {
        tracing::error!(error = ?error, %state, stage, "user operation build failed");
        self.enter(BuildState::Failed);
        error
    }

    /// Build and sign, stopping before submission.
    #[tracing::instrument(skip_all, fields(chain_id = self.chain.chain_id(), sender = ?request.account.map(|a| a.address())))]
    pub async fn build(
        &self,
        request: &UserOperationRequest<'_, A>,
    ) -> Result<VersionedUserOp, EngineError> {
        self.enter(BuildState::Init);
        let Some(account) = request.account else {
            return Err(self.fail(BuildState::Init, "init", EngineError::AccountNotFoundError));
        };
        let uo = match self.init(account, &request.call_data).await {
            Ok(uo) => uo,
            Err(e) => return Err(self.fail(BuildState::Init, "init", e)),
        };
        self.run_stack(uo, account, &request.overrides, request.fee_options.as_ref())
            .await
    }

    /// Run the stack on an operation the caller started. Fields already set are kept unless a
    /// stage resolves them again.
    #[tracing::instrument(skip_all, fields(chain_id = self.chain.chain_id(), sender = %uo.sender))]
    pub async fn build_from(
        &self,
        uo: UserOperationStruct,
        account: Option<&A>,
        overrides: &UserOperationOverrides,
        fee_options: Option<&UserOperationFeeOptions>,
    ) -> Result<VersionedUserOp, EngineError> {
        self.enter(BuildState::Init);
        let Some(account) = account else {
            return Err(self.fail(BuildState::Init, "init", EngineError::AccountNotFoundError));
        };
        let uo = UserOperationStruct {
            signature: uo.signature.or_else(|| Some(account.dummy_signature())),
            ..uo
        };
        self.run_stack(uo, account, overrides, fee_options).await
    }

    /// Build, sign and submit with `eth_sendUserOperation`.
    pub async fn send(
        &self,
        request: &UserOperationRequest<'_, A>,
    ) -> Result<SentUserOperation, EngineError> {
        let user_operation = self.build(request).await?;
        self.submit(user_operation).await
    }

    /// Submit a built operation once.
    pub async fn submit(
        &self,
        user_operation: VersionedUserOp,
    ) -> Result<SentUserOperation, EngineError> {
        self.enter(BuildState::Submitting);
        let entrypoint = self.chain.entrypoint().address;
        let hash = match self
            .chain
            .bundler_client()
            .send_user_operation(&user_operation, entrypoint)
            .await
        {
            Ok(hash) => hash,
            Err(e) => return Err(self.fail(BuildState::Submitting, "submit", e)),
        };

        tracing::info!(
            user_op_hash = %hash,
            sender = %user_operation.sender(),
            nonce = %user_operation.nonce(),
            "user operation submitted"
        );
        self.enter(BuildState::Submitted);
        Ok(SentUserOperation {
            hash,
            user_operation,
        })
    }

    async fn init(
        &self,
        account: &A,
        call_data: &UserOperationCallData,
    ) -> Result<UserOperationStruct, EngineError> {
        let mut uo = UserOperationStruct {
            sender: account.address(),
            call_data: account.encode_call_data(call_data),
            signature: Some(account.dummy_signature()),
            ..Default::default()
        };
        if let Some((factory, factory_data)) = account.get_init_code(self.chain).await? {
            tracing::debug!(%factory, "account not deployed, adding init code");
            uo.factory = Some(factory);
            uo.factory_data = Some(factory_data);
        }
        Ok(uo)
    }

    async fn run_stack(
        &self,
        mut uo: UserOperationStruct,
        account: &A,
        overrides: &UserOperationOverrides,
        fee_options: Option<&UserOperationFeeOptions>,
    ) -> Result<VersionedUserOp, EngineError> {
        let chain_fee_options;
        let fee_options = match fee_options {
            Some(fee_options) => fee_options,
            None => {
                chain_fee_options = self.chain.fee_options();
                &chain_fee_options
            }
        };
        let args = MiddlewareArgs {
            account,
            chain: self.chain,
            overrides,
            fee_options,
        };

        let mut state = BuildState::Init;
        for stage in self.stack.stages() {
            if stage.state() != state {
                state = stage.state();
                self.enter(state);
            }
            uo = match stage.run(uo, &args).await {
                Ok(uo) => uo,
                Err(e) => return Err(self.fail(state, stage.name(), e)),
            };
        }

        let version = self.chain.entrypoint().version;
        uo.into_versioned(version).map_err(|e| {
            let error = EngineError::invalid_user_operation(e, &uo);
            self.fail(BuildState::Signing, "finalize", error)
        })
    }
}
