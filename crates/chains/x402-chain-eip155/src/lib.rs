//! EIP-155 (EVM) chain support for the x402 payment protocol.
//!
//! This crate implements the x402 protocol's V2 wire format (CAIP-2 chain ids)
//! for EVM-compatible chains, with two settlement mechanisms for the "exact"
//! payment amount: ERC-3009 `transferWithAuthorization` / Permit2 witness
//! transfers (module [`v2_eip155_exact`]), and EIP-7702 delegated transfers
//! through a trusted delegate contract (module [`eip7702`]).
//!
//! # Features
//!
//! - **ERC-3009 and Permit2 Payments**: gasless token transfers authorized
//!   off-chain and settled by the facilitator
//! - **EIP-7702 Delegated Transfers**: a buyer temporarily delegates their EOA
//!   to a trusted contract and signs an intent the facilitator executes
//! - **Multiple Signers**: round-robin signer selection for load distribution
//! - **Nonce Management**: in-memory nonce tracking to prevent double-settlement
//!
//! # Architecture
//!
//! - [`chain`] - Core EVM chain types, providers, and configuration
//! - [`v2_eip155_exact`] - "exact" scheme: ERC-3009 and Permit2 settlement
//! - [`eip7702`] - delegated-transfer settlement via EIP-7702 authorizations
//!
//! # Feature Flags
//!
//! - `server` - Server-side price tag generation
//! - `facilitator` - Facilitator-side payment verification and settlement
//! - `telemetry` - OpenTelemetry tracing support
//!
//! # Usage Example
//!
//! ```ignore
//! use x402_chain_eip155::{V2Eip155Exact, Eip155ChainProvider};
//! use x402_types::scheme::X402SchemeFacilitatorBuilder;
//!
//! let provider = Eip155ChainProvider::from_config(&config).await?;
//! let facilitator = V2Eip155Exact.build(provider, None)?;
//!
//! let verify_response = facilitator.verify(&verify_request).await?;
//! let settle_response = facilitator.settle(&settle_request).await?;
//! ```

pub mod chain;
pub mod eip7702;
pub mod v2_eip155_exact;

mod networks;
pub use networks::*;

pub use eip7702::Eip7702Delegate;
pub use v2_eip155_exact::V2Eip155Exact;
