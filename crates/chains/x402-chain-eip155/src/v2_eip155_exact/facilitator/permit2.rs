//! Facilitator-side payment verification and settlement for Permit2 witness transfers.
//!
//! Permit2 payments authorize a fixed transfer via a signed `PermitWitnessTransferFrom`
//! message rather than calling the token contract directly. The buyer grants an allowance
//! to the canonical Permit2 contract once (out of band) and then signs a witness-bound
//! transfer per payment; the facilitator submits that signature through the
//! `ExactPermit2Proxy` contract, which is the only address the signature names as spender.

use alloy_primitives::{Address, B256, U256};
use alloy_provider::Provider;
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};

#[cfg(feature = "telemetry")]
use tracing::Instrument;
#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::chain::erc20::IERC20;
use crate::chain::permit2::{EXACT_PERMIT2_PROXY_ADDRESS, PERMIT2_ADDRESS};
use crate::chain::{Eip155MetaTransactionProvider, MetaTransaction};
use x402_types::chain::ChainProviderOps;
use x402_types::proto::{PaymentVerificationError, v2};
use x402_types::scheme::X402SchemeFacilitatorError;

use crate::v2_eip155_exact::facilitator::eip3009::assert_requirements_match;
use crate::v2_eip155_exact::facilitator::shared::{Eip155ExactError, StructuredSignature};
use crate::v2_eip155_exact::types::{Permit2PaymentPayload, Permit2PaymentRequirements};

sol!(
    /// The facilitator-operated proxy that Permit2 authorizations name as `spender`.
    ///
    /// It forwards the witness-bound transfer to the Permit2 contract on the caller's
    /// behalf and pays out to the witness-bound recipient once the signature checks out.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IExactPermit2Proxy {
        function transferWithAuthorization(
            address owner,
            address token,
            uint256 amount,
            uint256 nonce,
            uint256 deadline,
            address to,
            uint256 validAfter,
            bytes calldata extra,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
    }
);

sol! {
    #[derive(Debug)]
    struct PermitWitnessTransferFrom {
        TokenPermissions permitted;
        address spender;
        uint256 nonce;
        uint256 deadline;
        Witness witness;
    }

    #[derive(Debug)]
    struct TokenPermissions {
        address token;
        uint256 amount;
    }

    #[derive(Debug)]
    struct Witness {
        address to;
        uint256 validAfter;
        bytes extra;
    }
}

fn permit2_domain(chain_id: u64) -> Eip712Domain {
    eip712_domain! {
        name: "Permit2",
        chain_id: chain_id,
        verifying_contract: PERMIT2_ADDRESS,
    }
}

/// Reconstructs the witness-transfer signing hash and checks the buyer's signature over it.
fn witness_transfer_hash(
    chain_id: u64,
    authorization: &crate::chain::permit2::Permit2Authorization,
) -> B256 {
    let transfer = PermitWitnessTransferFrom {
        permitted: TokenPermissions {
            token: authorization.permitted.token.into(),
            amount: authorization.permitted.amount,
        },
        spender: EXACT_PERMIT2_PROXY_ADDRESS,
        nonce: authorization.nonce,
        deadline: U256::from(authorization.deadline.as_secs()),
        witness: Witness {
            to: authorization.witness.to.into(),
            validAfter: U256::from(authorization.witness.valid_after.as_secs()),
            extra: authorization.witness.extra.clone(),
        },
    };
    transfer.eip712_signing_hash(&permit2_domain(chain_id))
}

#[cfg_attr(feature = "telemetry", instrument(skip_all, err))]
pub async fn verify_permit2_payment<P: Eip155MetaTransactionProvider + ChainProviderOps>(
    provider: &P,
    payment_payload: &Permit2PaymentPayload,
    payment_requirements: &Permit2PaymentRequirements,
) -> Result<v2::VerifyResponse, X402SchemeFacilitatorError> {
    let accepted = &payment_payload.accepted;
    assert_offchain(payment_payload, payment_requirements)?;

    let authorization = &payment_payload.payload.permit_2_authorization;
    let payer: Address = authorization.from.into();
    let required_amount: U256 = accepted.amount.into();
    let asset_address: Address = accepted.asset.into();

    let token_contract = IERC20::new(asset_address, provider.inner());
    assert_onchain_allowance(&token_contract, payer, required_amount).await?;
    assert_onchain_balance(&token_contract, payer, required_amount).await?;

    let hash = witness_transfer_hash(provider.chain().inner(), authorization);
    StructuredSignature::try_from_bytes(
        payment_payload.payload.signature.clone(),
        payer,
        &hash,
    )?;

    Ok(v2::VerifyResponse::valid(payer.to_string()))
}

#[cfg_attr(feature = "telemetry", instrument(skip_all, err))]
pub async fn settle_permit2_payment<P>(
    provider: &P,
    payment_payload: &Permit2PaymentPayload,
    payment_requirements: &Permit2PaymentRequirements,
) -> Result<v2::SettleResponse, X402SchemeFacilitatorError>
where
    P: Eip155MetaTransactionProvider + ChainProviderOps,
    Eip155ExactError: From<P::Error>,
{
    let accepted = &payment_payload.accepted;
    assert_offchain(payment_payload, payment_requirements)?;

    let authorization = &payment_payload.payload.permit_2_authorization;
    let payer: Address = authorization.from.into();
    let required_amount: U256 = accepted.amount.into();
    let asset_address: Address = accepted.asset.into();

    let token_contract = IERC20::new(asset_address, provider.inner());
    assert_onchain_allowance(&token_contract, payer, required_amount).await?;
    assert_onchain_balance(&token_contract, payer, required_amount).await?;

    let hash = witness_transfer_hash(provider.chain().inner(), authorization);
    let structured = StructuredSignature::try_from_bytes(
        payment_payload.payload.signature.clone(),
        payer,
        &hash,
    )?;
    let sig = structured.as_sig();
    let v: u8 = 27 + u8::from(sig.v());

    let proxy = IExactPermit2Proxy::new(EXACT_PERMIT2_PROXY_ADDRESS, provider.inner());
    let call = proxy.transferWithAuthorization(
        payer,
        authorization.permitted.token.into(),
        authorization.permitted.amount,
        authorization.nonce,
        U256::from(authorization.deadline.as_secs()),
        authorization.witness.to.into(),
        U256::from(authorization.witness.valid_after.as_secs()),
        authorization.witness.extra.clone(),
        v,
        B256::from(sig.r().to_be_bytes()),
        B256::from(sig.s().to_be_bytes()),
    );
    let calldata = call.calldata().clone();

    let receipt = provider
        .send_transaction(MetaTransaction {
            to: EXACT_PERMIT2_PROXY_ADDRESS,
            calldata,
            confirmations: 1,
            value: U256::ZERO,
            authorization: None,
        })
        .await
        .map_err(Eip155ExactError::from)?;
    if !receipt.status() {
        return Err(Eip155ExactError::from(PaymentVerificationError::TransactionReverted(
            receipt.transaction_hash.to_string(),
        ))
        .into());
    }

    Ok(v2::SettleResponse::Success {
        payer: payer.to_string(),
        transaction: receipt.transaction_hash.to_string(),
        network: accepted.network.to_string(),
    })
}

fn assert_offchain(
    payment_payload: &Permit2PaymentPayload,
    payment_requirements: &Permit2PaymentRequirements,
) -> Result<(), PaymentVerificationError> {
    let payload = &payment_payload.payload;
    let accepted = &payment_payload.accepted;
    assert_requirements_match(accepted, payment_requirements)?;

    let authorization = &payload.permit_2_authorization;
    if authorization.spender.0 != EXACT_PERMIT2_PROXY_ADDRESS {
        return Err(PaymentVerificationError::RecipientMismatch);
    }

    let witness = &authorization.witness;
    if witness.to != accepted.pay_to {
        return Err(PaymentVerificationError::RecipientMismatch);
    }

    crate::v2_eip155_exact::facilitator::shared::assert_time(
        witness.valid_after,
        authorization.deadline,
    )?;

    let amount_required: U256 = accepted.amount.into();
    crate::v2_eip155_exact::facilitator::shared::assert_enough_value(
        authorization.permitted.amount,
        amount_required,
    )?;

    if authorization.permitted.token != accepted.asset {
        return Err(PaymentVerificationError::AssetMismatch);
    }
    Ok(())
}

pub async fn assert_onchain_allowance<P: Provider>(
    token_contract: &IERC20::IERC20Instance<P>,
    payer: Address,
    required_amount: U256,
) -> Result<(), Eip155ExactError> {
    let allowance_call = token_contract.allowance(payer, PERMIT2_ADDRESS);
    let allowance_fut = allowance_call.call();
    #[cfg(feature = "telemetry")]
    let allowance = allowance_fut
        .instrument(tracing::info_span!(
            "fetch_permit2_allowance",
            token_contract = %token_contract.address(),
            sender = %payer,
            otel.kind = "client"
        ))
        .await?;
    #[cfg(not(feature = "telemetry"))]
    let allowance = allowance_fut.await?;
    if allowance < required_amount {
        return Err(PaymentVerificationError::InsufficientAllowance.into());
    }
    Ok(())
}

pub async fn assert_onchain_balance<P: Provider>(
    token_contract: &IERC20::IERC20Instance<P>,
    payer: Address,
    required_amount: U256,
) -> Result<(), Eip155ExactError> {
    let balance_call = token_contract.balanceOf(payer);
    let balance_fut = balance_call.call();
    #[cfg(feature = "telemetry")]
    let balance = balance_fut
        .instrument(tracing::info_span!(
            "fetch_balance",
            token_contract = %token_contract.address(),
            sender = %payer,
            otel.kind = "client"
        ))
        .await?;
    #[cfg(not(feature = "telemetry"))]
    let balance = balance_fut.await?;
    if balance < required_amount {
        return Err(PaymentVerificationError::InsufficientFunds.into());
    }
    Ok(())
}
