//! Shared helpers for the EIP-7702 delegated-transfer mechanism: authorization recovery,
//! intent signing-hash reconstruction, and the delegate contract's calldata encoding.

use alloy_contract::Error as ContractError;
use alloy_primitives::{Address, Signature, U256};
use alloy_rpc_types_eth::{Authorization, SignedAuthorization};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};
use alloy_transport::TransportError;
use thiserror::Error;
use x402_types::proto::PaymentVerificationError;
use x402_types::scheme::X402SchemeFacilitatorError;

use crate::chain::MetaTransactionSendError;
use crate::eip7702::types::{Eip7702Authorization, Erc20Intent, NativeIntent};

sol!(
    /// The trusted delegate contract a buyer's EOA temporarily adopts via EIP-7702.
    ///
    /// Once the account runs as delegate code, `msg.sender` inside the call equals the
    /// buyer's own address, so these functions move the buyer's own funds on their behalf.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IEip7702Delegate {
        struct Intent {
            address token;
            uint256 amount;
            address to;
            uint256 nonce;
            uint256 deadline;
        }

        struct NativeIntent {
            uint256 amount;
            address to;
            uint256 nonce;
            uint256 deadline;
        }

        function transfer(Intent calldata intent, bytes calldata signature) external;
        function transferEth(NativeIntent calldata intent, bytes calldata signature) external;
    }
);

/// Errors produced while verifying or settling an EIP-7702 delegated-transfer payment.
#[derive(Debug, Error)]
pub enum Eip7702Error {
    #[error(transparent)]
    Verification(#[from] PaymentVerificationError),
    #[error("on-chain call failed: {0}")]
    Contract(#[from] ContractError),
    #[error("rpc transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("meta-transaction send failed: {0}")]
    Send(#[from] MetaTransactionSendError),
}

impl From<Eip7702Error> for X402SchemeFacilitatorError {
    fn from(error: Eip7702Error) -> Self {
        match error {
            Eip7702Error::Verification(reason) => reason.into(),
            other => X402SchemeFacilitatorError::OnchainFailure(other.to_string()),
        }
    }
}

/// Reconstructs the EIP-7702 `SignedAuthorization` from its wire tuple and recovers the
/// EOA that produced it.
pub fn recover_authorization(
    authorization: &Eip7702Authorization,
) -> Result<(SignedAuthorization, Address), Eip7702Error> {
    let unsigned = Authorization {
        chain_id: U256::from(authorization.chain_id),
        address: authorization.contract_address.into(),
        nonce: authorization.nonce,
    };
    let y_parity = authorization.y_parity != 0;
    let signature = Signature::new(
        U256::from_be_bytes(authorization.r.0),
        U256::from_be_bytes(authorization.s.0),
        y_parity,
    );
    let signed = unsigned.into_signed(signature);
    let recovered = signed
        .recover_authority()
        .map_err(|_| PaymentVerificationError::UntrustedDelegate)?;
    Ok((signed, recovered))
}

/// Builds the EIP-712 domain the intent is signed under: the buyer's own (recovered) EOA
/// stands in as `verifyingContract`, since the delegate runs in the buyer's account context.
pub fn delegate_domain(chain_id: u64, verifying_contract: Address) -> Eip712Domain {
    eip712_domain! {
        name: "Delegate",
        version: "1.0",
        chain_id: chain_id,
        verifying_contract: verifying_contract,
    }
}

/// Reconstructs the signing hash for an ERC-20 intent.
pub fn erc20_intent_hash(domain: &Eip712Domain, intent: &Erc20Intent) -> alloy_primitives::B256 {
    let sol_intent = IEip7702Delegate::Intent {
        token: intent.token.into(),
        amount: intent.amount.into(),
        to: intent.to.into(),
        nonce: intent.nonce.into(),
        deadline: U256::from(intent.deadline.as_secs()),
    };
    sol_intent.eip712_signing_hash(domain)
}

/// Reconstructs the signing hash for a native-value intent.
pub fn native_intent_hash(domain: &Eip712Domain, intent: &NativeIntent) -> alloy_primitives::B256 {
    let sol_intent = IEip7702Delegate::NativeIntent {
        amount: intent.amount.into(),
        to: intent.to.into(),
        nonce: intent.nonce.into(),
        deadline: U256::from(intent.deadline.as_secs()),
    };
    sol_intent.eip712_signing_hash(domain)
}

/// Parses `signature` as a 64- or 65-byte EOA signature and checks it was produced by
/// `expected_signer` over `hash`.
pub fn recover_and_check_signature(
    signature: &alloy_primitives::Bytes,
    expected_signer: Address,
    hash: &alloy_primitives::B256,
) -> Result<Signature, PaymentVerificationError> {
    let sig = Signature::from_raw(signature).map_err(|e| {
        PaymentVerificationError::InvalidSignature(format!("malformed signature: {e}"))
    })?;
    let recovered = sig
        .recover_address_from_prehash(hash)
        .map_err(|e| PaymentVerificationError::InvalidSignature(format!(
            "could not recover signer: {e}"
        )))?;
    if recovered != expected_signer {
        return Err(PaymentVerificationError::InvalidSignature(
            "intent signature does not match the authorization signer".to_string(),
        ));
    }
    Ok(sig)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Bytes, U256 as AU256};
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;
    use x402_types::timestamp::UnixTimestamp;

    use crate::chain::{ChecksummedAddress, TokenAmount};

    fn signer() -> PrivateKeySigner {
        PrivateKeySigner::random()
    }

    #[test]
    fn recover_authorization_yields_signer_address() {
        let wallet = signer();
        let delegate = Address::repeat_byte(0x11);
        let unsigned = Authorization {
            chain_id: U256::from(8453u64),
            address: delegate,
            nonce: 0,
        };
        let signed = wallet.sign_hash_sync(&unsigned.signature_hash()).unwrap();
        let signed_auth = unsigned.clone().into_signed(signed);

        let wire = Eip7702Authorization {
            contract_address: ChecksummedAddress(delegate),
            chain_id: 8453,
            nonce: 0,
            r: signed.r().into(),
            s: signed.s().into(),
            y_parity: signed.v() as u8,
        };
        let (reconstructed, recovered) = recover_authorization(&wire).unwrap();
        assert_eq!(recovered, wallet.address());
        assert_eq!(
            reconstructed.recover_authority().unwrap(),
            signed_auth.recover_authority().unwrap()
        );
    }

    #[test]
    fn recover_and_check_signature_accepts_matching_signer() {
        let wallet = signer();
        let domain = delegate_domain(8453, wallet.address());
        let intent = Erc20Intent {
            token: ChecksummedAddress(Address::repeat_byte(0x22)),
            amount: TokenAmount(AU256::from(1000u64)),
            to: ChecksummedAddress(Address::repeat_byte(0x33)),
            nonce: TokenAmount(AU256::from(1u64)),
            deadline: UnixTimestamp::from_secs(9999999999),
        };
        let hash = erc20_intent_hash(&domain, &intent);
        let signature = wallet.sign_hash_sync(&hash).unwrap();
        let signature_bytes: Bytes = signature.as_bytes().into();

        let recovered =
            recover_and_check_signature(&signature_bytes, wallet.address(), &hash).unwrap();
        assert_eq!(
            recovered.recover_address_from_prehash(&hash).unwrap(),
            wallet.address()
        );
    }

    #[test]
    fn recover_and_check_signature_rejects_wrong_signer() {
        let wallet = signer();
        let impostor = signer();
        let domain = delegate_domain(8453, wallet.address());
        let intent = NativeIntent {
            amount: TokenAmount(AU256::from(1000u64)),
            to: ChecksummedAddress(Address::repeat_byte(0x44)),
            nonce: TokenAmount(AU256::from(1u64)),
            deadline: UnixTimestamp::from_secs(9999999999),
        };
        let hash = native_intent_hash(&domain, &intent);
        let signature = impostor.sign_hash_sync(&hash).unwrap();
        let signature_bytes: Bytes = signature.as_bytes().into();

        let result = recover_and_check_signature(&signature_bytes, wallet.address(), &hash);
        assert!(matches!(
            result,
            Err(PaymentVerificationError::InvalidSignature(_))
        ));
    }

    #[test]
    fn erc20_and_native_intent_hashes_differ_under_same_domain() {
        let domain = delegate_domain(8453, Address::repeat_byte(0x55));
        let erc20 = Erc20Intent {
            token: ChecksummedAddress(Address::repeat_byte(0x22)),
            amount: TokenAmount(AU256::from(1000u64)),
            to: ChecksummedAddress(Address::repeat_byte(0x33)),
            nonce: TokenAmount(AU256::from(1u64)),
            deadline: UnixTimestamp::from_secs(9999999999),
        };
        let native = NativeIntent {
            amount: TokenAmount(AU256::from(1000u64)),
            to: ChecksummedAddress(Address::repeat_byte(0x33)),
            nonce: TokenAmount(AU256::from(1u64)),
            deadline: UnixTimestamp::from_secs(9999999999),
        };
        assert_ne!(
            erc20_intent_hash(&domain, &erc20),
            native_intent_hash(&domain, &native)
        );
    }
}
