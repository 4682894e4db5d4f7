//! EIP-7702 delegated-transfer payment mechanism for EVM chains.
//!
//! A buyer authorizes a trusted delegate contract to run as their own account code for
//! one transaction (EIP-7702), then signs an intent describing the transfer the delegate
//! should carry out. The facilitator submits both together: a Type-4 transaction carrying
//! the authorization when the buyer's account has not adopted the delegate yet, or an
//! ordinary call to the buyer's own (already-delegated) address otherwise.

pub mod types;

#[cfg(feature = "facilitator")]
pub mod facilitator;

use alloy_primitives::{Address, U256};
use x402_types::chain::{ChainId, DeployedTokenAmount};
use x402_types::proto::v2;
use x402_types::scheme::X402SchemeId;

use crate::chain::{ChecksummedAddress, Eip155TokenDeployment};
use types::Eip7702Scheme;

#[allow(unused)]
pub use types::*;

pub struct Eip7702Delegate;

impl Eip7702Delegate {
    #[allow(dead_code)] // Public for consumption by downstream crates.
    pub fn price_tag<A: Into<ChecksummedAddress>>(
        pay_to: A,
        asset: DeployedTokenAmount<U256, Eip155TokenDeployment>,
    ) -> v2::PriceTag {
        let chain_id: ChainId = asset.token.chain_reference.into();
        let requirements = v2::PaymentRequirements {
            scheme: Eip7702Scheme.to_string(),
            pay_to: pay_to.into().to_string(),
            asset: asset.token.address.to_string(),
            network: chain_id,
            amount: asset.amount.to_string(),
            max_timeout_seconds: 300,
            extra: None,
        };
        v2::PriceTag {
            requirements,
            enricher: None,
        }
    }

    /// A price tag for a native-value requirement: `asset` is the zero address.
    #[allow(dead_code)]
    pub fn native_price_tag<A: Into<ChecksummedAddress>>(
        pay_to: A,
        chain_id: ChainId,
        amount: U256,
    ) -> v2::PriceTag {
        let requirements = v2::PaymentRequirements {
            scheme: Eip7702Scheme.to_string(),
            pay_to: pay_to.into().to_string(),
            asset: ChecksummedAddress::from(Address::ZERO).to_string(),
            network: chain_id,
            amount: amount.to_string(),
            max_timeout_seconds: 300,
            extra: None,
        };
        v2::PriceTag {
            requirements,
            enricher: None,
        }
    }
}

impl X402SchemeId for Eip7702Delegate {
    fn namespace(&self) -> &str {
        "eip155"
    }

    fn scheme(&self) -> &str {
        types::Eip7702Scheme.as_ref()
    }
}
