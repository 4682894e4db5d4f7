//! Wire types for the V2 "exact" scheme on EVM chains.
//!
//! The scheme accepts two asset transfer methods, distinguished by the
//! `assetTransferMethod` tag carried in [`AssetTransferMethod`]: ERC-3009
//! `transferWithAuthorization` and Permit2 witness transfers. Both share the
//! outer V2 envelope ([`PaymentPayload`], [`PaymentRequirements`]); this
//! module also defines the narrowed, method-specific shapes
//! ([`Eip3009PaymentPayload`], [`Permit2PaymentPayload`], ...) that the
//! facilitator logic operates on once the method has been resolved.

use alloy_primitives::{B256, Bytes};
use serde::{Deserialize, Serialize};
use x402_types::proto;
use x402_types::proto::{PaymentVerificationError, v2};
use x402_types::scheme::X402SchemeFacilitatorError;
use x402_types::timestamp::UnixTimestamp;

use crate::chain::permit2::Permit2Payload;
use crate::chain::{AssetTransferMethod, ChecksummedAddress, TokenAmount};

x402_types::lit_str!(ExactScheme, "exact");

/// EIP-712 domain parameters carried alongside an ERC-3009 requirement, so the
/// facilitator can sign against the token's domain without an extra RPC round trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirementsExtra {
    pub name: String,
    pub version: String,
}

/// An ERC-3009 `transferWithAuthorization` authorization, in its wire shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Eip3009Authorization {
    pub from: ChecksummedAddress,
    pub to: ChecksummedAddress,
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: B256,
}

/// The signed ERC-3009 payload: the authorization plus the buyer's signature over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip3009Payload {
    pub authorization: Eip3009Authorization,
    pub signature: Bytes,
}

/// The signed payload for the "exact" scheme, dispatching on whichever asset
/// transfer method the payload actually carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExactEvmPayload {
    Eip3009(Eip3009Payload),
    Permit2(Permit2Payload),
}

/// Generic "exact" payment requirements, before the asset transfer method has been resolved.
pub type PaymentRequirements =
    v2::PaymentRequirements<ExactScheme, TokenAmount, ChecksummedAddress, AssetTransferMethod>;

/// Generic "exact" payment payload, before the asset transfer method has been resolved.
pub type PaymentPayload = v2::PaymentPayload<PaymentRequirements, ExactEvmPayload>;

/// Generic verify/settle request body, before the asset transfer method has been resolved.
pub type VerifyRequest = v2::VerifyRequest<PaymentPayload, PaymentRequirements>;
pub type SettleRequest = VerifyRequest;

/// Payment requirements narrowed to the ERC-3009 asset transfer method.
pub type Eip3009PaymentRequirements =
    v2::PaymentRequirements<ExactScheme, TokenAmount, ChecksummedAddress, PaymentRequirementsExtra>;

/// Payment payload narrowed to the ERC-3009 asset transfer method.
pub type Eip3009PaymentPayload = v2::PaymentPayload<Eip3009PaymentRequirements, Eip3009Payload>;

/// Payment requirements narrowed to the Permit2 asset transfer method.
pub type Permit2PaymentRequirements =
    v2::PaymentRequirements<ExactScheme, TokenAmount, ChecksummedAddress>;

/// Payment payload narrowed to the Permit2 asset transfer method.
pub type Permit2PaymentPayload = v2::PaymentPayload<Permit2PaymentRequirements, Permit2Payload>;

fn eip3009_requirements(
    requirements: &PaymentRequirements,
    extra: PaymentRequirementsExtra,
) -> Eip3009PaymentRequirements {
    Eip3009PaymentRequirements {
        scheme: ExactScheme,
        network: requirements.network.clone(),
        amount: requirements.amount,
        pay_to: requirements.pay_to,
        max_timeout_seconds: requirements.max_timeout_seconds,
        asset: requirements.asset,
        extra,
    }
}

fn permit2_requirements(requirements: &PaymentRequirements) -> Permit2PaymentRequirements {
    Permit2PaymentRequirements {
        scheme: ExactScheme,
        network: requirements.network.clone(),
        amount: requirements.amount,
        pay_to: requirements.pay_to,
        max_timeout_seconds: requirements.max_timeout_seconds,
        asset: requirements.asset,
        extra: None,
    }
}

/// A verify or settle request, narrowed to a single resolved asset transfer method.
///
/// Parsing a request once into the generic [`VerifyRequest`] and then dispatching on
/// `payment_payload.accepted.extra` avoids the ambiguity of trying two speculative,
/// method-specific deserializations against the same JSON body.
pub enum FacilitatorVerifyRequest {
    Eip3009 {
        x402_version: v2::X402Version2,
        payment_payload: Eip3009PaymentPayload,
        payment_requirements: Eip3009PaymentRequirements,
    },
    Permit2 {
        x402_version: v2::X402Version2,
        payment_payload: Permit2PaymentPayload,
        payment_requirements: Permit2PaymentRequirements,
    },
}

/// Settle requests carry the same shape as verify requests.
pub type FacilitatorSettleRequest = FacilitatorVerifyRequest;

/// Checks that any `extra` object naming the `eip3009` asset transfer method (whether
/// tagged or implicit) carries both `name` and `version` before the untagged
/// [`AssetTransferMethod`] deserialization runs, so a missing field is reported as
/// [`PaymentVerificationError::InvalidPayload`] rather than a generic parse failure.
fn check_eip3009_extra_present(value: &serde_json::Value) -> Result<(), X402SchemeFacilitatorError> {
    for extra in [
        value.pointer("/paymentRequirements/extra"),
        value.pointer("/paymentPayload/accepted/extra"),
    ]
    .into_iter()
    .flatten()
    {
        let is_permit2 = extra.get("assetTransferMethod").and_then(|v| v.as_str()) == Some("permit2");
        if is_permit2 {
            continue;
        }
        let has_name = extra.get("name").and_then(|v| v.as_str()).is_some();
        let has_version = extra.get("version").and_then(|v| v.as_str()).is_some();
        if !has_name || !has_version {
            return Err(PaymentVerificationError::InvalidPayload(
                "extra.name and extra.version are required for the eip3009 asset transfer method"
                    .to_string(),
            )
            .into());
        }
    }
    Ok(())
}

impl TryFrom<proto::VerifyRequest> for FacilitatorVerifyRequest {
    type Error = X402SchemeFacilitatorError;

    fn try_from(request: proto::VerifyRequest) -> Result<Self, Self::Error> {
        check_eip3009_extra_present(&request.clone().into_json())?;
        let parsed = VerifyRequest::from_proto(request)?;
        let accepted = parsed.payment_payload.accepted.clone();
        match (accepted.extra.clone(), parsed.payment_payload.payload) {
            (AssetTransferMethod::Eip3009 { name, version }, ExactEvmPayload::Eip3009(payload)) => {
                let extra = PaymentRequirementsExtra { name, version };
                Ok(FacilitatorVerifyRequest::Eip3009 {
                    x402_version: parsed.x402_version,
                    payment_requirements: eip3009_requirements(
                        &parsed.payment_requirements,
                        extra.clone(),
                    ),
                    payment_payload: Eip3009PaymentPayload {
                        accepted: eip3009_requirements(&accepted, extra),
                        payload,
                        resource: parsed.payment_payload.resource,
                        x402_version: parsed.payment_payload.x402_version,
                    },
                })
            }
            (AssetTransferMethod::Permit2, ExactEvmPayload::Permit2(payload)) => {
                Ok(FacilitatorVerifyRequest::Permit2 {
                    x402_version: parsed.x402_version,
                    payment_requirements: permit2_requirements(&parsed.payment_requirements),
                    payment_payload: Permit2PaymentPayload {
                        accepted: permit2_requirements(&accepted),
                        payload,
                        resource: parsed.payment_payload.resource,
                        x402_version: parsed.payment_payload.x402_version,
                    },
                })
            }
            _ => Err(PaymentVerificationError::InvalidPayload(
                "asset transfer method does not match payload shape".to_string(),
            )
            .into()),
        }
    }
}
