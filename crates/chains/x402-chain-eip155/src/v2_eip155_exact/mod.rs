//! V2 EIP-155 "exact" payment scheme implementation.
//!
//! Implements the "exact" payment scheme for EVM chains using the V2 x402 protocol,
//! which identifies chains by CAIP-2 id rather than network name. The scheme accepts
//! two asset transfer methods ([`AssetTransferMethod`](crate::chain::AssetTransferMethod)):
//! ERC-3009 `transferWithAuthorization` (module [`facilitator::eip3009`]) and Permit2
//! witness transfers (module [`facilitator::permit2`]).
//!
//! # Usage
//!
//! ```ignore
//! use x402_chain_eip155::v2_eip155_exact::V2Eip155Exact;
//! use x402_chain_eip155::networks::{KnownNetworkEip155, USDC};
//!
//! // Create a price tag for 1 USDC on Base
//! let usdc = USDC::base();
//! let price = V2Eip155Exact::price_tag(
//!     "0x1234...",
//!     usdc.amount(1_000_000u64),
//! );
//! ```

pub mod types;

#[cfg(feature = "facilitator")]
pub mod facilitator;

use alloy_primitives::U256;
use x402_types::chain::{ChainId, DeployedTokenAmount};
use x402_types::proto::v2;
use x402_types::scheme::X402SchemeId;

use crate::chain::{AssetTransferMethod, ChecksummedAddress, Eip155TokenDeployment};
use types::ExactScheme;

#[allow(unused)]
pub use types::*;

pub struct V2Eip155Exact;

impl V2Eip155Exact {
    #[allow(dead_code)] // Public for consumption by downstream crates.
    pub fn price_tag<A: Into<ChecksummedAddress>>(
        pay_to: A,
        asset: DeployedTokenAmount<U256, Eip155TokenDeployment>,
    ) -> v2::PriceTag {
        let chain_id: ChainId = asset.token.chain_reference.into();
        let extra = match &asset.token.transfer_method {
            AssetTransferMethod::Eip3009 { name, version } => serde_json::to_value(
                crate::v2_eip155_exact::types::PaymentRequirementsExtra {
                    name: name.clone(),
                    version: version.clone(),
                },
            )
            .ok(),
            AssetTransferMethod::Permit2 => None,
        };
        let requirements = v2::PaymentRequirements {
            scheme: ExactScheme.to_string(),
            pay_to: pay_to.into().to_string(),
            asset: asset.token.address.to_string(),
            network: chain_id,
            amount: asset.amount.to_string(),
            max_timeout_seconds: 300,
            extra,
        };
        v2::PriceTag {
            requirements,
            enricher: None,
        }
    }
}

impl X402SchemeId for V2Eip155Exact {
    fn namespace(&self) -> &str {
        "eip155"
    }

    fn scheme(&self) -> &str {
        types::ExactScheme.as_ref()
    }
}
