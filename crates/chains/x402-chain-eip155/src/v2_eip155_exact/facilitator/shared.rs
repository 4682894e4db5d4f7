//! Facilitator-side payment verification and settlement for ERC-3009 `transferWithAuthorization`.
//!
//! Shared by [`crate::v2_eip155_exact::facilitator::eip3009`]: verification reconstructs the
//! EIP-712 `TransferWithAuthorization` struct and checks the buyer's signature over it plus
//! the on-chain authorization state; settlement submits the same authorization as a
//! `transferWithAuthorization` call.

use alloy_contract::Error as ContractError;
use alloy_primitives::{Address, B256, Bytes, Signature, U256};
use alloy_provider::Provider;
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};
use alloy_transport::TransportError;
use thiserror::Error;
use x402_types::proto::PaymentVerificationError;
use x402_types::scheme::X402SchemeFacilitatorError;
use x402_types::timestamp::UnixTimestamp;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::chain::{
    Eip155ChainReference, Eip155MetaTransactionProvider, MetaTransaction, MetaTransactionSendError,
};
use crate::v2_eip155_exact::types::PaymentRequirementsExtra;

sol!(
    /// Minimal ERC-3009 surface needed to verify and settle a `transferWithAuthorization` call.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IEIP3009 {
        function name() external view returns (string);
        function version() external view returns (string);
        function balanceOf(address account) external view returns (uint256);
        function authorizationState(address authorizer, bytes32 nonce) external view returns (bool);
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
    }
);

sol! {
    #[derive(Debug)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

/// Errors produced while verifying or settling an ERC-3009 "exact" payment.
#[derive(Debug, Error)]
pub enum Eip155ExactError {
    #[error(transparent)]
    Verification(#[from] PaymentVerificationError),
    #[error("on-chain call failed: {0}")]
    Contract(#[from] ContractError),
    #[error("rpc transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("meta-transaction send failed: {0}")]
    Send(#[from] MetaTransactionSendError),
}

impl From<Eip155ExactError> for X402SchemeFacilitatorError {
    fn from(error: Eip155ExactError) -> Self {
        match error {
            Eip155ExactError::Verification(reason) => reason.into(),
            other => X402SchemeFacilitatorError::OnchainFailure(other.to_string()),
        }
    }
}

/// A normalized ERC-3009 authorization, ready for signing-hash reconstruction and settlement.
#[derive(Debug, Clone)]
pub struct ExactEvmPayment {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: B256,
    pub signature: Bytes,
}

/// An authorization signature that has been shown to originate from its claimed signer.
///
/// Only the externally-owned-account (EOA) shape is supported: the facilitator recovers
/// the signer from `(r, s, v)` and checks it against the authorization's `from` address.
#[derive(Debug, Clone, Copy)]
pub enum StructuredSignature {
    EOA(Signature),
}

impl StructuredSignature {
    /// Parses `signature` as a 64- or 65-byte EOA signature and checks it was produced
    /// by `payer` over `hash`.
    pub fn try_from_bytes(
        signature: Bytes,
        payer: Address,
        hash: &B256,
    ) -> Result<Self, Eip155ExactError> {
        let sig = Signature::from_raw(&signature).map_err(|e| {
            PaymentVerificationError::InvalidSignature(format!("malformed signature: {e}"))
        })?;
        let recovered = sig.recover_address_from_prehash(hash).map_err(|e| {
            PaymentVerificationError::InvalidSignature(format!(
                "could not recover signer: {e}"
            ))
        })?;
        if recovered != payer {
            return Err(PaymentVerificationError::InvalidSignature(
                "signature does not match the claimed payer".to_string(),
            )
            .into());
        }
        Ok(StructuredSignature::EOA(sig))
    }

    pub fn as_sig(&self) -> &Signature {
        let StructuredSignature::EOA(sig) = self;
        sig
    }
}

/// Checks that `now` falls within `[valid_after, valid_before)`.
pub fn assert_time(
    valid_after: UnixTimestamp,
    valid_before: UnixTimestamp,
) -> Result<(), PaymentVerificationError> {
    let now = UnixTimestamp::now();
    if now < valid_after {
        return Err(PaymentVerificationError::Early);
    }
    if now >= valid_before {
        return Err(PaymentVerificationError::Expired);
    }
    Ok(())
}

/// Checks that the signed `value` covers the `amount_required` by the resource server.
pub fn assert_enough_value(
    value: U256,
    amount_required: U256,
) -> Result<(), PaymentVerificationError> {
    if value < amount_required {
        Err(PaymentVerificationError::InsufficientPaymentAmount)
    } else {
        Ok(())
    }
}

/// Checks the payer's on-chain token balance covers `amount_required`.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err))]
pub async fn assert_enough_balance<P: Provider>(
    contract: &IEIP3009::IEIP3009Instance<P>,
    from: &Address,
    amount_required: U256,
) -> Result<(), Eip155ExactError> {
    let balance = contract.balanceOf(*from).call().await?;
    if balance < amount_required {
        return Err(PaymentVerificationError::InsufficientFunds.into());
    }
    Ok(())
}

/// Resolves the EIP-712 domain used to sign the authorization.
///
/// If the resource server supplied `extra.{name, version}`, those are used directly,
/// avoiding a round trip to the chain. Otherwise the token contract's `name()`/`version()`
/// views are queried.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err))]
pub async fn assert_domain<P: Provider>(
    chain: &Eip155ChainReference,
    contract: &IEIP3009::IEIP3009Instance<P>,
    verifying_contract: &Address,
    extra: &Option<PaymentRequirementsExtra>,
) -> Result<Eip712Domain, Eip155ExactError> {
    let (name, version) = match extra {
        Some(extra) => (extra.name.clone(), extra.version.clone()),
        None => {
            let name = contract.name().call().await?;
            let version = contract.version().call().await?;
            (name, version)
        }
    };
    Ok(eip712_domain! {
        name: name,
        version: version,
        chain_id: chain.inner(),
        verifying_contract: *verifying_contract,
    })
}

/// Verifies the payer's signature over the reconstructed `TransferWithAuthorization` struct
/// and that the authorization has not already been consumed on-chain.
///
/// Returns the verified payer address on success.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err))]
pub async fn verify_payment<P: Provider>(
    _provider: P,
    contract: &IEIP3009::IEIP3009Instance<P>,
    payment: &ExactEvmPayment,
    domain: &Eip712Domain,
) -> Result<Address, Eip155ExactError> {
    let transfer = TransferWithAuthorization {
        from: payment.from,
        to: payment.to,
        value: payment.value,
        validAfter: U256::from(payment.valid_after.as_secs()),
        validBefore: U256::from(payment.valid_before.as_secs()),
        nonce: payment.nonce,
    };
    let hash = transfer.eip712_signing_hash(domain);
    StructuredSignature::try_from_bytes(payment.signature.clone(), payment.from, &hash)?;

    let used = contract
        .authorizationState(payment.from, payment.nonce)
        .call()
        .await?;
    if used {
        return Err(PaymentVerificationError::NonceUsed.into());
    }
    Ok(payment.from)
}

/// Submits the `transferWithAuthorization` call on-chain and waits for its receipt.
#[cfg_attr(feature = "telemetry", instrument(skip(provider, contract, domain), err))]
pub async fn settle_payment<P>(
    provider: &P,
    contract: &IEIP3009::IEIP3009Instance<P::Inner>,
    payment: &ExactEvmPayment,
    domain: &Eip712Domain,
) -> Result<B256, Eip155ExactError>
where
    P: Eip155MetaTransactionProvider,
    Eip155ExactError: From<P::Error>,
{
    let transfer = TransferWithAuthorization {
        from: payment.from,
        to: payment.to,
        value: payment.value,
        validAfter: U256::from(payment.valid_after.as_secs()),
        validBefore: U256::from(payment.valid_before.as_secs()),
        nonce: payment.nonce,
    };
    let hash = transfer.eip712_signing_hash(domain);
    let structured =
        StructuredSignature::try_from_bytes(payment.signature.clone(), payment.from, &hash)?;
    let sig = structured.as_sig();
    let v: u8 = 27 + u8::from(sig.v());

    let call = contract.transferWithAuthorization(
        payment.from,
        payment.to,
        payment.value,
        U256::from(payment.valid_after.as_secs()),
        U256::from(payment.valid_before.as_secs()),
        payment.nonce,
        v,
        B256::from(sig.r().to_be_bytes()),
        B256::from(sig.s().to_be_bytes()),
    );
    let calldata = call.calldata().clone();
    let to = *contract.address();

    let receipt = provider
        .send_transaction(MetaTransaction {
            to,
            calldata,
            confirmations: 1,
            value: U256::ZERO,
            authorization: None,
        })
        .await?;
    if !receipt.status() {
        return Err(
            PaymentVerificationError::TransactionReverted(receipt.transaction_hash.to_string())
                .into(),
        );
    }
    Ok(receipt.transaction_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    #[test]
    fn assert_time_rejects_before_valid_after() {
        let now = UnixTimestamp::now();
        let result = assert_time(now + 60, now + 120);
        assert!(matches!(result, Err(PaymentVerificationError::Early)));
    }

    #[test]
    fn assert_time_rejects_at_or_after_valid_before() {
        let now = UnixTimestamp::now();
        let valid_after = UnixTimestamp::from_secs(now.as_secs().saturating_sub(3600));
        let valid_before = UnixTimestamp::from_secs(now.as_secs().saturating_sub(1));
        let result = assert_time(valid_after, valid_before);
        assert!(matches!(result, Err(PaymentVerificationError::Expired)));
    }

    #[test]
    fn assert_time_accepts_within_window() {
        let now = UnixTimestamp::now();
        let valid_after = UnixTimestamp::from_secs(now.as_secs().saturating_sub(60));
        assert!(assert_time(valid_after, now + 60).is_ok());
    }

    #[test]
    fn assert_enough_value_rejects_short_payment() {
        let result = assert_enough_value(U256::from(99), U256::from(100));
        assert!(matches!(
            result,
            Err(PaymentVerificationError::InsufficientPaymentAmount)
        ));
    }

    #[test]
    fn assert_enough_value_accepts_exact_and_over_payment() {
        assert!(assert_enough_value(U256::from(100), U256::from(100)).is_ok());
        assert!(assert_enough_value(U256::from(101), U256::from(100)).is_ok());
    }

    #[test]
    fn structured_signature_accepts_matching_payer() {
        let wallet = PrivateKeySigner::random();
        let hash = B256::repeat_byte(0x42);
        let signature = wallet.sign_hash_sync(&hash).unwrap();
        let bytes: Bytes = signature.as_bytes().into();

        assert!(StructuredSignature::try_from_bytes(bytes, wallet.address(), &hash).is_ok());
    }

    #[test]
    fn structured_signature_rejects_wrong_payer() {
        let wallet = PrivateKeySigner::random();
        let someone_else = PrivateKeySigner::random();
        let hash = B256::repeat_byte(0x42);
        let signature = wallet.sign_hash_sync(&hash).unwrap();
        let bytes: Bytes = signature.as_bytes().into();

        let result = StructuredSignature::try_from_bytes(bytes, someone_else.address(), &hash);
        assert!(matches!(
            result,
            Err(Eip155ExactError::Verification(
                PaymentVerificationError::InvalidSignature(_)
            ))
        ));
    }
}
