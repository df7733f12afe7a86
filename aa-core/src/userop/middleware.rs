use std::{fmt, sync::Arc};

use alloy::primitives::U256;
use futures::future::BoxFuture;
use opkit_aa_types::{EntrypointVersion, NonceKey, UserOperationStruct, VersionedUserOp};
use opkit_core::{
    chain::Chain,
    entrypoint::EntrypointDetails,
    error::EngineError,
    fees::{
        UserOperationFeeOptions, ValueOrMultiplier, apply_fee_option, apply_override,
        apply_override_or_fee_option,
    },
    rpc_clients::{BundlerRpc, PaymasterData, PaymasterRpc, PublicRpc, StateOverrides},
};
use serde::{Deserialize, Serialize};

use crate::smart_account::SmartAccount;

/// Where a build is. Stages run in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildState {
    Init,
    ResolvingNonce,
    EstimatingGas,
    ResolvingPaymaster,
    ResolvingFees,
    Signing,
    Submitting,
    Submitted,
    Failed,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildState::Init => "init",
            BuildState::ResolvingNonce => "resolving_nonce",
            BuildState::EstimatingGas => "estimating_gas",
            BuildState::ResolvingPaymaster => "resolving_paymaster",
            BuildState::ResolvingFees => "resolving_fees",
            BuildState::Signing => "signing",
            BuildState::Submitting => "submitting",
            BuildState::Submitted => "submitted",
            BuildState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Paymaster handling for one build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymasterOverride {
    /// Pay from the account, even if the chain has a paymaster service
    Bypass,
    /// Use this paymaster data and skip the paymaster service
    Sponsored(PaymasterData),
}

/// Per-call overrides. Gas and fee fields take a fixed value or a multiplier on the estimate
/// and win over fee options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationOverrides {
    #[serde(default)]
    pub call_gas_limit: Option<ValueOrMultiplier>,
    #[serde(default)]
    pub verification_gas_limit: Option<ValueOrMultiplier>,
    #[serde(default)]
    pub pre_verification_gas: Option<ValueOrMultiplier>,
    #[serde(default)]
    pub max_fee_per_gas: Option<ValueOrMultiplier>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<ValueOrMultiplier>,
    #[serde(default)]
    pub paymaster_verification_gas_limit: Option<ValueOrMultiplier>,
    #[serde(default)]
    pub paymaster_post_op_gas_limit: Option<ValueOrMultiplier>,
    /// Nonce key, at most 2^152 - 1
    #[serde(default)]
    pub nonce_key: Option<U256>,
    /// Skips the EntryPoint nonce lookup
    #[serde(default)]
    pub nonce: Option<U256>,
    #[serde(default)]
    pub paymaster: Option<PaymasterOverride>,
    #[serde(default)]
    pub state_overrides: Option<StateOverrides>,
}

/// Read-only inputs every stage of one build sees
pub struct MiddlewareArgs<'a, C, A> {
    pub account: &'a A,
    pub chain: &'a C,
    pub overrides: &'a UserOperationOverrides,
    pub fee_options: &'a UserOperationFeeOptions,
}

impl<C: Chain, A> MiddlewareArgs<'_, C, A> {
    pub fn entrypoint(&self) -> &EntrypointDetails {
        self.chain.entrypoint()
    }

    pub fn version(&self) -> EntrypointVersion {
        self.chain.entrypoint().version
    }

    /// `uo` with zero in every unresolved gas and fee field
    pub fn estimation_request(&self, uo: &UserOperationStruct) -> Result<VersionedUserOp, EngineError> {
        uo.with_placeholders(self.version())
            .map_err(|e| EngineError::invalid_user_operation(e, uo))
    }
}

/// One step of a build. A stage takes the partial operation and hands back a more resolved one.
pub trait Middleware<C, A>: Send + Sync {
    fn name(&self) -> &'static str;

    fn state(&self) -> BuildState;

    fn run<'a>(
        &'a self,
        uo: UserOperationStruct,
        args: &'a MiddlewareArgs<'a, C, A>,
    ) -> BoxFuture<'a, Result<UserOperationStruct, EngineError>>;
}

/// Stages in non-decreasing [`BuildState`] order, between `ResolvingNonce` and `Signing`
pub struct MiddlewareStack<C, A> {
    stages: Vec<Box<dyn Middleware<C, A>>>,
}

impl<C, A> Default for MiddlewareStack<C, A> {
    fn default() -> Self {
        Self { stages: Vec::new() }
    }
}

impl<C: Chain + 'static, A: SmartAccount + 'static> MiddlewareStack<C, A> {
    /// Nonce, ERC-7677 paymaster, gas, fees and the account's own signature.
    pub fn standard(paymaster_context: serde_json::Value) -> Self {
        let (stub_data, paymaster_data) = erc7677_middleware(paymaster_context);
        Self {
            stages: vec![
                Box::new(NonceResolver),
                Box::new(stub_data),
                Box::new(DefaultGasEstimator),
                Box::new(paymaster_data),
                Box::new(DefaultFeeEstimator),
                Box::new(DefaultUserOpSigner),
            ],
        }
    }
}

impl<C, A> MiddlewareStack<C, A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `stage`; it may not run in an earlier state than the last stage.
    pub fn push(&mut self, stage: impl Middleware<C, A> + 'static) -> Result<(), EngineError> {
        let state = stage.state();
        if !(BuildState::ResolvingNonce..=BuildState::Signing).contains(&state) {
            return Err(EngineError::ValidationError {
                message: format!("middleware {} cannot run while {state}", stage.name()),
            });
        }
        if let Some(last) = self.stages.last() {
            if state < last.state() {
                return Err(EngineError::ValidationError {
                    message: format!(
                        "middleware {} ({state}) cannot follow {} ({})",
                        stage.name(),
                        last.name(),
                        last.state()
                    ),
                });
            }
        }
        self.stages.push(Box::new(stage));
        Ok(())
    }

    /// Swap every stage of `stage.state()` for `stage`.
    pub fn replace(&mut self, stage: impl Middleware<C, A> + 'static) {
        let state = stage.state();
        let position = self
            .stages
            .iter()
            .position(|existing| existing.state() >= state)
            .unwrap_or(self.stages.len());
        self.stages.retain(|existing| existing.state() != state);
        self.stages
            .insert(position.min(self.stages.len()), Box::new(stage));
    }

    pub fn stages(&self) -> impl Iterator<Item = &dyn Middleware<C, A>> {
        self.stages.iter().map(|stage| stage.as_ref())
    }

    pub fn states(&self) -> Vec<BuildState> {
        self.stages.iter().map(|stage| stage.state()).collect()
    }
}

/// `overrides.nonce` as is, otherwise the EntryPoint nonce for `overrides.nonce_key`
pub struct NonceResolver;

impl<C: Chain, A: SmartAccount> Middleware<C, A> for NonceResolver {
    fn name(&self) -> &'static str {
        "nonce_resolver"
    }

    fn state(&self) -> BuildState {
        BuildState::ResolvingNonce
    }

    fn run<'a>(
        &'a self,
        mut uo: UserOperationStruct,
        args: &'a MiddlewareArgs<'a, C, A>,
    ) -> BoxFuture<'a, Result<UserOperationStruct, EngineError>> {
        Box::pin(async move {
            let key = NonceKey::new(args.overrides.nonce_key.unwrap_or_default())?;
            let nonce = match args.overrides.nonce {
                Some(nonce) => nonce,
                None => args.account.get_nonce(args.chain, key).await?,
            };
            tracing::debug!(%nonce, "nonce resolved");
            uo.nonce = Some(nonce);
            Ok(uo)
        })
    }
}

/// `pm_getPaymasterStubData` before gas estimation. Records the stub's finality on the
/// operation being built.
pub struct Erc7677StubData {
    context: Arc<serde_json::Value>,
}

/// `pm_getPaymasterData` once gas limits are known, skipped when the stub was final
pub struct Erc7677PaymasterData {
    context: Arc<serde_json::Value>,
}

/// The two ERC-7677 stages, sharing `context`.
pub fn erc7677_middleware(context: serde_json::Value) -> (Erc7677StubData, Erc7677PaymasterData) {
    let context = Arc::new(context);
    (
        Erc7677StubData {
            context: context.clone(),
        },
        Erc7677PaymasterData { context },
    )
}

/// Write paymaster fields into `uo`; `paymasterAndData` wins over the split fields.
fn apply_paymaster_fields(
    uo: &mut UserOperationStruct,
    paymaster: Option<alloy::primitives::Address>,
    paymaster_data: Option<&alloy::primitives::Bytes>,
    paymaster_and_data: Option<&alloy::primitives::Bytes>,
) -> Result<(), EngineError> {
    match (paymaster_and_data, paymaster) {
        (Some(packed), _) => uo
            .set_paymaster_and_data(packed)
            .map_err(|e| EngineError::invalid_user_operation(e, uo)),
        (None, Some(paymaster)) => {
            uo.paymaster = Some(paymaster);
            uo.paymaster_data = Some(paymaster_data.cloned().unwrap_or_default());
            Ok(())
        }
        (None, None) => {
            uo.clear_paymaster();
            Ok(())
        }
    }
}

fn sponsored(uo: &mut UserOperationStruct, data: &PaymasterData) -> Result<(), EngineError> {
    apply_paymaster_fields(
        uo,
        data.paymaster,
        data.paymaster_data.as_ref(),
        data.paymaster_and_data.as_ref(),
    )
}

impl<C: Chain, A: SmartAccount> Middleware<C, A> for Erc7677StubData {
    fn name(&self) -> &'static str {
        "erc7677_stub_data"
    }

    fn state(&self) -> BuildState {
        BuildState::EstimatingGas
    }

    fn run<'a>(
        &'a self,
        mut uo: UserOperationStruct,
        args: &'a MiddlewareArgs<'a, C, A>,
    ) -> BoxFuture<'a, Result<UserOperationStruct, EngineError>> {
        Box::pin(async move {
            uo.paymaster_is_final = false;

            match &args.overrides.paymaster {
                Some(PaymasterOverride::Bypass) => {
                    uo.clear_paymaster();
                    return Ok(uo);
                }
                Some(PaymasterOverride::Sponsored(data)) => {
                    sponsored(&mut uo, data)?;
                    return Ok(uo);
                }
                None => {}
            }
            let Some(paymaster) = args.chain.paymaster_client() else {
                return Ok(uo);
            };

            let request = args.estimation_request(&uo)?;
            let stub = paymaster
                .get_paymaster_stub_data(
                    &request,
                    args.entrypoint().address,
                    args.chain.chain_id(),
                    &self.context,
                )
                .await?;

            apply_paymaster_fields(
                &mut uo,
                stub.paymaster,
                stub.paymaster_data.as_ref(),
                stub.paymaster_and_data.as_ref(),
            )?;
            if uo.paymaster.is_some() {
                uo.paymaster_verification_gas_limit = stub
                    .paymaster_verification_gas_limit
                    .or(uo.paymaster_verification_gas_limit);
                uo.paymaster_post_op_gas_limit = stub
                    .paymaster_post_op_gas_limit
                    .or(uo.paymaster_post_op_gas_limit);
            }
            uo.paymaster_is_final = uo.paymaster.is_some() && stub.is_final;

            tracing::debug!(
                paymaster = ?uo.paymaster,
                is_final = stub.is_final,
                sponsor = ?stub.sponsor.as_ref().map(|s| &s.name),
                "paymaster stub data resolved"
            );
            Ok(uo)
        })
    }
}

impl<C: Chain, A: SmartAccount> Middleware<C, A> for Erc7677PaymasterData {
    fn name(&self) -> &'static str {
        "erc7677_paymaster_data"
    }

    fn state(&self) -> BuildState {
        BuildState::ResolvingPaymaster
    }

    fn run<'a>(
        &'a self,
        mut uo: UserOperationStruct,
        args: &'a MiddlewareArgs<'a, C, A>,
    ) -> BoxFuture<'a, Result<UserOperationStruct, EngineError>> {
        Box::pin(async move {
            if args.overrides.paymaster.is_some()
                || uo.paymaster.is_none()
                || uo.paymaster_is_final
            {
                return Ok(uo);
            }
            let Some(paymaster) = args.chain.paymaster_client() else {
                return Ok(uo);
            };

            let request = args.estimation_request(&uo)?;
            let data = paymaster
                .get_paymaster_data(
                    &request,
                    args.entrypoint().address,
                    args.chain.chain_id(),
                    &self.context,
                )
                .await?;

            let gas_limits = (
                uo.paymaster_verification_gas_limit,
                uo.paymaster_post_op_gas_limit,
            );
            sponsored(&mut uo, &data)?;
            if uo.paymaster.is_some() {
                (
                    uo.paymaster_verification_gas_limit,
                    uo.paymaster_post_op_gas_limit,
                ) = gas_limits;
            }

            tracing::debug!(paymaster = ?uo.paymaster, "paymaster data resolved");
            Ok(uo)
        })
    }
}

fn fixed_value(value: Option<&ValueOrMultiplier>) -> Option<U256> {
    match value {
        Some(ValueOrMultiplier::Value(value)) => Some(*value),
        _ => None,
    }
}

/// `eth_estimateUserOperationGas`, then overrides or fee options per gas field.
///
/// The bundler is not called when every gas field has a fixed override.
pub struct DefaultGasEstimator;

impl<C: Chain, A: SmartAccount> Middleware<C, A> for DefaultGasEstimator {
    fn name(&self) -> &'static str {
        "default_gas_estimator"
    }

    fn state(&self) -> BuildState {
        BuildState::EstimatingGas
    }

    fn run<'a>(
        &'a self,
        mut uo: UserOperationStruct,
        args: &'a MiddlewareArgs<'a, C, A>,
    ) -> BoxFuture<'a, Result<UserOperationStruct, EngineError>> {
        Box::pin(async move {
            let overrides = args.overrides;
            let options = args.fee_options;
            let needs_paymaster_gas =
                uo.paymaster.is_some() && args.version() == EntrypointVersion::V0_7;

            let all_fixed = fixed_value(overrides.call_gas_limit.as_ref()).is_some()
                && fixed_value(overrides.verification_gas_limit.as_ref()).is_some()
                && fixed_value(overrides.pre_verification_gas.as_ref()).is_some()
                && (!needs_paymaster_gas
                    || (fixed_value(overrides.paymaster_verification_gas_limit.as_ref())
                        .is_some()
                        && fixed_value(overrides.paymaster_post_op_gas_limit.as_ref())
                            .is_some()));

            let (call, verification, pvg, pm_verification, pm_post_op) = if all_fixed {
                tracing::debug!("all gas limits overridden, skipping estimation");
                (None, None, None, None, None)
            } else {
                let request = args.estimation_request(&uo)?;
                let estimate = args
                    .chain
                    .bundler_client()
                    .estimate_user_operation_gas(
                        &request,
                        args.entrypoint().address,
                        overrides.state_overrides.as_ref(),
                    )
                    .await?;
                (
                    Some(estimate.call_gas_limit),
                    Some(estimate.verification_gas_limit),
                    Some(estimate.pre_verification_gas),
                    estimate.paymaster_verification_gas_limit,
                    estimate.paymaster_post_op_gas_limit,
                )
            };

            uo.call_gas_limit = Some(apply_override_or_fee_option(
                call,
                overrides.call_gas_limit.as_ref(),
                options.call_gas_limit.as_ref(),
            )?);
            uo.verification_gas_limit = Some(apply_override_or_fee_option(
                verification,
                overrides.verification_gas_limit.as_ref(),
                options.verification_gas_limit.as_ref(),
            )?);
            uo.pre_verification_gas = Some(apply_override_or_fee_option(
                pvg,
                overrides.pre_verification_gas.as_ref(),
                options.pre_verification_gas.as_ref(),
            )?);

            if needs_paymaster_gas {
                uo.paymaster_verification_gas_limit = Some(apply_override_or_fee_option(
                    pm_verification.or(uo.paymaster_verification_gas_limit),
                    overrides.paymaster_verification_gas_limit.as_ref(),
                    options.paymaster_verification_gas_limit.as_ref(),
                )?);
                uo.paymaster_post_op_gas_limit = Some(apply_override_or_fee_option(
                    pm_post_op.or(uo.paymaster_post_op_gas_limit),
                    overrides.paymaster_post_op_gas_limit.as_ref(),
                    options.paymaster_post_op_gas_limit.as_ref(),
                )?);
            }

            tracing::debug!(
                call_gas_limit = ?uo.call_gas_limit,
                verification_gas_limit = ?uo.verification_gas_limit,
                pre_verification_gas = ?uo.pre_verification_gas,
                "gas limits resolved"
            );
            Ok(uo)
        })
    }
}

/// Priority fee from `eth_maxPriorityFeePerGas`, or `rundler_maxPriorityFeePerGas` when the
/// node does not serve it.
async fn estimate_priority_fee(chain: &impl Chain) -> Result<U256, EngineError> {
    match chain.public_client().max_priority_fee_per_gas().await {
        Ok(fee) => Ok(fee),
        Err(node_error) => {
            tracing::debug!(error = ?node_error, "falling back to the bundler priority fee");
            chain.bundler_client().max_priority_fee_per_gas().await
        }
    }
}

/// `maxPriorityFeePerGas` from the priority fee estimate; `maxFeePerGas` is the base fee after
/// fee options plus the priority fee.
pub struct DefaultFeeEstimator;

impl<C: Chain, A: SmartAccount> Middleware<C, A> for DefaultFeeEstimator {
    fn name(&self) -> &'static str {
        "default_fee_estimator"
    }

    fn state(&self) -> BuildState {
        BuildState::ResolvingFees
    }

    fn run<'a>(
        &'a self,
        mut uo: UserOperationStruct,
        args: &'a MiddlewareArgs<'a, C, A>,
    ) -> BoxFuture<'a, Result<UserOperationStruct, EngineError>> {
        Box::pin(async move {
            let overrides = args.overrides;
            let options = args.fee_options;

            let (base_fee, priority_estimate) = tokio::try_join!(
                args.chain.public_client().base_fee_per_gas(),
                estimate_priority_fee(args.chain),
            )?;

            let max_priority_fee_per_gas = apply_override_or_fee_option(
                Some(priority_estimate),
                overrides.max_priority_fee_per_gas.as_ref(),
                options.max_priority_fee_per_gas.as_ref(),
            )?;

            let max_fee_per_gas = match overrides.max_fee_per_gas.as_ref() {
                Some(user_override) => {
                    let estimate = base_fee.checked_add(max_priority_fee_per_gas);
                    apply_override(estimate, user_override)?
                }
                None => apply_fee_option(Some(base_fee), options.max_fee_per_gas.as_ref())?
                    .checked_add(max_priority_fee_per_gas)
                    .ok_or_else(|| EngineError::FeeOverflowError {
                        message: "maxFeePerGas exceeds 256 bits".to_string(),
                    })?,
            };

            tracing::debug!(
                %base_fee,
                %max_fee_per_gas,
                %max_priority_fee_per_gas,
                "fees resolved"
            );
            uo.max_fee_per_gas = Some(max_fee_per_gas);
            uo.max_priority_fee_per_gas = Some(max_priority_fee_per_gas);
            Ok(uo)
        })
    }
}

/// Validate, hash and sign with the account's key
pub struct DefaultUserOpSigner;

impl<C: Chain, A: SmartAccount> Middleware<C, A> for DefaultUserOpSigner {
    fn name(&self) -> &'static str {
        "default_user_op_signer"
    }

    fn state(&self) -> BuildState {
        BuildState::Signing
    }

    fn run<'a>(
        &'a self,
        mut uo: UserOperationStruct,
        args: &'a MiddlewareArgs<'a, C, A>,
    ) -> BoxFuture<'a, Result<UserOperationStruct, EngineError>> {
        Box::pin(async move {
            let request = uo
                .into_versioned(args.version())
                .map_err(|e| EngineError::invalid_user_operation(e, &uo))?;
            let hash = request.hash(args.entrypoint().address, args.chain.chain_id())?;
            let signature = args.account.sign_user_operation_hash(hash).await?;

            tracing::debug!(%hash, "user operation signed");
            uo.signature = Some(signature);
            Ok(uo)
        })
    }
}
