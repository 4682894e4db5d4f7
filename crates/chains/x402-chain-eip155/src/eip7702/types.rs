//! Wire types for the EIP-7702 delegated-transfer settlement mechanism.
//!
//! A buyer temporarily adopts the code of a trusted delegate contract via an EIP-7702
//! authorization, and separately signs an intent describing the transfer the delegate
//! should perform once it runs in the buyer's own account context.

use alloy_primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};
use x402_types::proto::v2;
use x402_types::timestamp::UnixTimestamp;

use crate::chain::{ChecksummedAddress, TokenAmount};

x402_types::lit_str!(Eip7702Scheme, "eip7702");

/// An EIP-7702 authorization tuple, as signed by the buyer EOA.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Eip7702Authorization {
    pub contract_address: ChecksummedAddress,
    pub chain_id: u64,
    pub nonce: u64,
    pub r: B256,
    pub s: B256,
    pub y_parity: u8,
}

/// An intent to move `amount` of `token` to `to`, signed separately from the authorization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Erc20Intent {
    pub token: ChecksummedAddress,
    pub amount: TokenAmount,
    pub to: ChecksummedAddress,
    pub nonce: TokenAmount,
    pub deadline: UnixTimestamp,
}

/// An intent to move native value to `to`, signed separately from the authorization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NativeIntent {
    pub amount: TokenAmount,
    pub to: ChecksummedAddress,
    pub nonce: TokenAmount,
    pub deadline: UnixTimestamp,
}

/// The buyer's intent, narrowed to ERC-20 or native transfer by whether it carries `token`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Eip7702Intent {
    Erc20(Erc20Intent),
    Native(NativeIntent),
}

impl Eip7702Intent {
    pub fn to(&self) -> Address {
        match self {
            Eip7702Intent::Erc20(intent) => intent.to.into(),
            Eip7702Intent::Native(intent) => intent.to.into(),
        }
    }

    pub fn amount(&self) -> TokenAmount {
        match self {
            Eip7702Intent::Erc20(intent) => intent.amount,
            Eip7702Intent::Native(intent) => intent.amount,
        }
    }

    pub fn deadline(&self) -> UnixTimestamp {
        match self {
            Eip7702Intent::Erc20(intent) => intent.deadline,
            Eip7702Intent::Native(intent) => intent.deadline,
        }
    }

    pub fn token(&self) -> Option<Address> {
        match self {
            Eip7702Intent::Erc20(intent) => Some(intent.token.into()),
            Eip7702Intent::Native(_) => None,
        }
    }
}

/// The signed payload for the EIP-7702 delegated-transfer mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip7702Payload {
    pub authorization: Eip7702Authorization,
    pub intent: Eip7702Intent,
    pub signature: Bytes,
}

/// Payment requirements for the EIP-7702 mechanism. `asset` is the zero address for a
/// native-value requirement, or the ERC-20 token address otherwise.
pub type PaymentRequirements = v2::PaymentRequirements<Eip7702Scheme, TokenAmount, ChecksummedAddress>;

/// Payment payload for the EIP-7702 mechanism.
pub type PaymentPayload = v2::PaymentPayload<PaymentRequirements, Eip7702Payload>;

/// Verify/settle request body for the EIP-7702 mechanism.
pub type VerifyRequest = v2::VerifyRequest<PaymentPayload, PaymentRequirements>;
pub type SettleRequest = VerifyRequest;

#[cfg(test)]
mod tests {
    use super::*;

    fn native_intent_json() -> serde_json::Value {
        serde_json::json!({
            "amount": "1000000000000000000",
            "to": "0x0000000000000000000000000000000000000001",
            "nonce": "1",
            "deadline": "9999999999",
        })
    }

    fn erc20_intent_json() -> serde_json::Value {
        let mut value = native_intent_json();
        value["token"] = serde_json::json!("0x0000000000000000000000000000000000000002");
        value
    }

    #[test]
    fn intent_without_token_deserializes_as_native() {
        let intent: Eip7702Intent = serde_json::from_value(native_intent_json()).unwrap();
        assert!(matches!(intent, Eip7702Intent::Native(_)));
        assert_eq!(intent.token(), None);
    }

    #[test]
    fn intent_with_token_deserializes_as_erc20() {
        let intent: Eip7702Intent = serde_json::from_value(erc20_intent_json()).unwrap();
        assert!(matches!(intent, Eip7702Intent::Erc20(_)));
        assert!(intent.token().is_some());
    }

    #[test]
    fn intent_accessors_agree_across_variants() {
        let native: Eip7702Intent = serde_json::from_value(native_intent_json()).unwrap();
        let erc20: Eip7702Intent = serde_json::from_value(erc20_intent_json()).unwrap();
        assert_eq!(native.amount(), erc20.amount());
        assert_eq!(native.to(), erc20.to());
        assert_eq!(native.deadline(), erc20.deadline());
    }
}
