//! Facilitator-side payment verification and settlement for the EIP-7702
//! delegated-transfer scheme.
//!
//! Settlement re-runs [`verify_eip7702_payment`] with the nonce consumed, then dispatches
//! the delegate call one of two ways depending on whether the buyer's account already
//! carries the delegate's code: a plain call (simulated first, since the account already
//! behaves like any other contract-backed wallet) when it does, or a Type-4 transaction
//! carrying the [`alloy_rpc_types_eth::SignedAuthorization`] (never simulated, since the
//! account doesn't yet run as the delegate and `eth_call` can't attach an authorization
//! list) when it doesn't.

pub mod shared;

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use alloy_provider::Provider;
use serde::Deserialize;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use x402_types::chain::{ChainId, ChainProviderOps};
use x402_types::nonce::NonceArbiter;
use x402_types::proto;
use x402_types::proto::{PaymentVerificationError, v2};
use x402_types::scheme::{
    X402SchemeFacilitator, X402SchemeFacilitatorBuilder, X402SchemeFacilitatorError,
};
use x402_types::timestamp::UnixTimestamp;

use crate::Eip7702Delegate;
use crate::chain::{ChecksummedAddress, Eip155ChainReference, Eip155MetaTransactionProvider, MetaTransaction};
use crate::chain::erc20::IERC20;
use crate::eip7702::facilitator::shared::{
    Eip7702Error, IEip7702Delegate, delegate_domain, erc20_intent_hash, native_intent_hash,
    recover_and_check_signature, recover_authorization,
};
use crate::eip7702::types::{Eip7702Intent, Eip7702Scheme, PaymentPayload, PaymentRequirements, VerifyRequest};

/// Grace window subtracted from an intent's deadline before it is treated as expired.
///
/// Settlement takes at least one block to land; without this margin an intent signed
/// with a deadline a few seconds out could expire between `verify` and `settle`.
const EXPIRY_GRACE_SECONDS: i64 = 6;

/// Configuration for the EIP-7702 scheme: the delegate contract this facilitator trusts.
///
/// Supplied as the scheme's `config` blob when the facilitator is assembled; there is no
/// sensible default; a facilitator that executed delegate calls against an address it had
/// never agreed to would be dispatching to attacker-controlled code.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Eip7702Config {
    delegate_address: ChecksummedAddress,
}

impl<P> X402SchemeFacilitatorBuilder<P> for Eip7702Delegate
where
    P: Eip155MetaTransactionProvider + ChainProviderOps + Send + Sync + 'static,
    Eip7702Error: From<P::Error>,
{
    fn build(
        &self,
        provider: P,
        config: Option<serde_json::Value>,
    ) -> Result<Box<dyn X402SchemeFacilitator>, Box<dyn std::error::Error>> {
        let config: Eip7702Config = match config {
            Some(value) => serde_json::from_value(value)?,
            None => return Err("eip7702 scheme requires a delegateAddress config".into()),
        };
        Ok(Box::new(Eip7702Facilitator::new(
            provider,
            config.delegate_address.into(),
        )))
    }
}

/// Facilitator for the EIP-7702 delegated-transfer scheme.
pub struct Eip7702Facilitator<P> {
    provider: P,
    delegate_address: Address,
    nonce_arbiter: NonceArbiter,
}

impl<P> Eip7702Facilitator<P> {
    pub fn new(provider: P, delegate_address: Address) -> Self {
        Self {
            provider,
            delegate_address,
            nonce_arbiter: NonceArbiter::new(),
        }
    }
}

/// A payment that passed every precondition: the recovered payer and the intent it signed.
struct Verified {
    payer: Address,
    intent: Eip7702Intent,
}

/// Checks the `accepted` copy the buyer's payload embeds against the canonical
/// requirements the resource server declared: scheme, network, asset, and recipient must
/// match exactly, but the accepted amount may exceed the required one.
fn assert_accepted_matches(
    accepted: &PaymentRequirements,
    payment_requirements: &PaymentRequirements,
) -> Result<(), PaymentVerificationError> {
    if accepted.network != payment_requirements.network
        || accepted.pay_to != payment_requirements.pay_to
        || accepted.asset != payment_requirements.asset
    {
        return Err(PaymentVerificationError::AcceptedRequirementsMismatch);
    }
    let accepted_amount: U256 = accepted.amount.into();
    let required_amount: U256 = payment_requirements.amount.into();
    if accepted_amount < required_amount {
        return Err(PaymentVerificationError::AcceptedRequirementsMismatch);
    }
    Ok(())
}

/// Runs the full precondition pipeline (steps 1-8) and returns the recovered payer and
/// intent.
///
/// `consume` selects step 7's nonce check: `false` (from `verify()`) only peeks via
/// [`NonceArbiter::has`], `true` (from `settle()`) atomically claims the nonce via
/// [`NonceArbiter::check_and_mark`]. Both callers run the identical pipeline in the
/// identical order so that the nonce check always happens before the balance check.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err))]
async fn verify_eip7702_payment<P: Eip155MetaTransactionProvider + ChainProviderOps>(
    provider: &P,
    delegate_address: Address,
    nonce_arbiter: &NonceArbiter,
    consume: bool,
    payment_payload: &PaymentPayload,
    payment_requirements: &PaymentRequirements,
) -> Result<Verified, X402SchemeFacilitatorError>
where
    Eip7702Error: From<P::Error>,
{
    let accepted = &payment_payload.accepted;
    assert_accepted_matches(accepted, payment_requirements).map_err(Eip7702Error::from)?;

    let payload = &payment_payload.payload;
    let chain_reference = Eip155ChainReference::try_from(&payment_requirements.network)
        .map_err(|_| Eip7702Error::from(PaymentVerificationError::ChainIdMismatch))?;
    if payload.authorization.chain_id != chain_reference.inner() {
        return Err(Eip7702Error::from(PaymentVerificationError::ChainIdMismatch).into());
    }

    if payload.authorization.contract_address != delegate_address.into() {
        return Err(Eip7702Error::from(PaymentVerificationError::UntrustedDelegate).into());
    }
    let (_signed_authorization, authority) = recover_authorization(&payload.authorization)?;

    let domain = delegate_domain(chain_reference.inner(), authority);
    let hash = match &payload.intent {
        Eip7702Intent::Erc20(intent) => erc20_intent_hash(&domain, intent),
        Eip7702Intent::Native(intent) => native_intent_hash(&domain, intent),
    };
    recover_and_check_signature(&payload.signature, authority, &hash)
        .map_err(Eip7702Error::from)?;

    if payload.intent.to() != accepted.pay_to.into() {
        return Err(Eip7702Error::from(PaymentVerificationError::RecipientMismatch).into());
    }
    let intent_amount: U256 = payload.intent.amount().into();
    let required_amount: U256 = accepted.amount.into();
    if intent_amount < required_amount {
        return Err(Eip7702Error::from(PaymentVerificationError::InsufficientPaymentAmount).into());
    }
    match payload.intent.token() {
        Some(token) if token == accepted.asset.into() => {}
        Some(_) => return Err(Eip7702Error::from(PaymentVerificationError::AssetMismatch).into()),
        None if accepted.asset.0 != Address::ZERO => {
            return Err(Eip7702Error::from(PaymentVerificationError::AssetMismatch).into());
        }
        None => {}
    }

    let deadline = payload.intent.deadline();
    let now = UnixTimestamp::now();
    if deadline.as_secs() < now.as_secs() + EXPIRY_GRACE_SECONDS as u64 {
        return Err(Eip7702Error::from(PaymentVerificationError::Expired).into());
    }

    let nonce_key = intent_nonce_key(authority, &payload.intent);
    let nonce_ok = if consume {
        nonce_arbiter.check_and_mark(&nonce_key)
    } else {
        !nonce_arbiter.has(&nonce_key)
    };
    if !nonce_ok {
        return Err(Eip7702Error::from(PaymentVerificationError::NonceUsed).into());
    }

    match payload.intent.token() {
        Some(token) => {
            let token_contract = IERC20::new(token, provider.inner());
            let balance = token_contract
                .balanceOf(authority)
                .call()
                .await
                .map_err(Eip7702Error::from)?;
            if balance < intent_amount {
                return Err(Eip7702Error::from(PaymentVerificationError::InsufficientFunds).into());
            }
        }
        None => {
            let balance = provider
                .inner()
                .get_balance(authority)
                .await
                .map_err(Eip7702Error::from)?;
            if balance < intent_amount {
                return Err(Eip7702Error::from(PaymentVerificationError::InsufficientFunds).into());
            }
        }
    }

    Ok(Verified {
        payer: authority,
        intent: payload.intent.clone(),
    })
}

fn intent_nonce_key(authority: Address, intent: &Eip7702Intent) -> String {
    let nonce = match intent {
        Eip7702Intent::Erc20(intent) => intent.nonce.to_string(),
        Eip7702Intent::Native(intent) => intent.nonce.to_string(),
    };
    format!("eip7702:{authority}:{nonce}")
}

#[async_trait::async_trait]
impl<P> X402SchemeFacilitator for Eip7702Facilitator<P>
where
    P: Eip155MetaTransactionProvider + ChainProviderOps + Send + Sync,
    P::Inner: Provider,
    Eip7702Error: From<P::Error>,
{
    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<proto::VerifyResponse, X402SchemeFacilitatorError> {
        let parsed = VerifyRequest::from_proto(request.clone())?;
        let verified = verify_eip7702_payment(
            &self.provider,
            self.delegate_address,
            &self.nonce_arbiter,
            false,
            &parsed.payment_payload,
            &parsed.payment_requirements,
        )
        .await?;
        Ok(v2::VerifyResponse::valid(verified.payer.to_string()).into())
    }

    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<proto::SettleResponse, X402SchemeFacilitatorError> {
        let parsed = VerifyRequest::from_proto(request.clone())?;
        let payload = &parsed.payment_payload.payload;
        let accepted = &parsed.payment_payload.accepted;

        let verified = verify_eip7702_payment(
            &self.provider,
            self.delegate_address,
            &self.nonce_arbiter,
            true,
            &parsed.payment_payload,
            &parsed.payment_requirements,
        )
        .await?;

        let delegate_contract = IEip7702Delegate::new(verified.payer, self.provider.inner());
        let calldata = match &verified.intent {
            Eip7702Intent::Erc20(intent) => {
                let sol_intent = IEip7702Delegate::Intent {
                    token: intent.token.into(),
                    amount: intent.amount.into(),
                    to: intent.to.into(),
                    nonce: intent.nonce.into(),
                    deadline: U256::from(intent.deadline.as_secs()),
                };
                delegate_contract
                    .transfer(sol_intent, payload.signature.clone())
                    .calldata()
                    .clone()
            }
            Eip7702Intent::Native(intent) => {
                let sol_intent = IEip7702Delegate::NativeIntent {
                    amount: intent.amount.into(),
                    to: intent.to.into(),
                    nonce: intent.nonce.into(),
                    deadline: U256::from(intent.deadline.as_secs()),
                };
                delegate_contract
                    .transferEth(sol_intent, payload.signature.clone())
                    .calldata()
                    .clone()
            }
        };

        let code = self
            .provider
            .inner()
            .get_code_at(verified.payer)
            .await
            .map_err(Eip7702Error::from)?;
        let already_delegated = is_delegation_designator_for(&code, self.delegate_address);

        // The delegate moves the buyer's own balance; the call carries no `msg.value`.
        let value = U256::ZERO;

        let receipt = if already_delegated {
            let tx = MetaTransaction {
                to: verified.payer,
                calldata,
                confirmations: 1,
                value,
                authorization: None,
            };
            self.provider
                .simulate(&tx)
                .await
                .map_err(|e| Eip7702Error::from(PaymentVerificationError::TransactionSimulation(
                    Eip7702Error::from(e).to_string(),
                )))?;
            self.provider.send_transaction(tx).await.map_err(Eip7702Error::from)?
        } else {
            let (signed_authorization, _) = recover_authorization(&payload.authorization)?;
            let tx = MetaTransaction {
                to: verified.payer,
                calldata,
                confirmations: 1,
                value,
                authorization: Some(signed_authorization),
            };
            self.provider.send_transaction(tx).await.map_err(Eip7702Error::from)?
        };

        if !receipt.status() {
            return Err(Eip7702Error::from(PaymentVerificationError::TransactionReverted(
                receipt.transaction_hash.to_string(),
            ))
            .into());
        }

        Ok(v2::SettleResponse::Success {
            payer: verified.payer.to_string(),
            transaction: receipt.transaction_hash.to_string(),
            network: accepted.network.to_string(),
        }
        .into())
    }

    async fn supported(&self) -> Result<proto::SupportedResponse, X402SchemeFacilitatorError> {
        let chain_id: ChainId = self.provider.chain_id();
        let kinds = vec![proto::SupportedPaymentKind {
            x402_version: v2::X402Version2.into(),
            scheme: Eip7702Scheme.to_string(),
            network: chain_id.clone().into(),
            extra: None,
        }];
        let signers = {
            let mut signers = HashMap::with_capacity(1);
            signers.insert(chain_id, self.provider.signer_addresses());
            signers
        };
        Ok(proto::SupportedResponse {
            kinds,
            extensions: Vec::new(),
            signers,
        })
    }

    async fn native_balance(&self) -> Option<String> {
        let relayer: Address = self.provider.signer_addresses().first()?.parse().ok()?;
        let balance = self.provider.inner().get_balance(relayer).await.ok()?;
        Some(balance.to_string())
    }
}

/// Checks whether `code` is the EIP-7702 delegation designator (`0xef0100 || address`)
/// naming `delegate`.
fn is_delegation_designator_for(code: &alloy_primitives::Bytes, delegate: Address) -> bool {
    let mut expected = [0u8; 23];
    expected[0] = 0xef;
    expected[1] = 0x01;
    expected[2] = 0x00;
    expected[3..].copy_from_slice(delegate.as_slice());
    code.as_ref() as &[u8] == expected.as_slice()
}
