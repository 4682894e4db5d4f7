//! Local facilitator implementation for x402 payments.
//!
//! This module provides [`FacilitatorLocal`], a [`Facilitator`](x402_types::facilitator::Facilitator) implementation that
//! validates x402 payment payloads and performs on-chain settlements using the
//! registered scheme handlers.
//!
//! # Architecture
//!
//! The local facilitator delegates payment processing to scheme handlers registered
//! in a [`SchemeRegistry`](x402_types::scheme::SchemeRegistry). Each handler is responsible for:
//!
//! - Verifying payment signatures and requirements
//! - Checking on-chain balances
//! - Executing settlement transactions
//!
//! # Example
//!
//! ```ignore
//! use x402_facilitator_local::FacilitatorLocal;
//! use x402_types::scheme::SchemeRegistry;
//!
//! let registry = SchemeRegistry::build(chain_registry, scheme_blueprints, &config);
//! let facilitator = FacilitatorLocal::new(registry);
//! ```
//!
//! # Scheme Routing
//!
//! The facilitator routes requests to the appropriate scheme handler based on the
//! payment's chain ID and scheme name. The scheme handler slug is extracted from
//! the request and used to look up the handler in the registry.
//!
//! If no matching handler is found, the request returns an error with
//! [`PaymentVerificationError::UnsupportedScheme`](x402_types::proto::PaymentVerificationError::UnsupportedScheme).

use std::collections::HashMap;
use x402_types::discovery::{DiscoveryCatalog, DiscoveryRecord};
use x402_types::facilitator::Facilitator;
use x402_types::proto;
use x402_types::proto::PaymentVerificationError;
use x402_types::scheme::{SchemeRegistry, X402SchemeFacilitatorError};
use x402_types::timestamp::UnixTimestamp;

/// A local [`Facilitator`](x402_types::facilitator::Facilitator) implementation that delegates to scheme handlers.
///
/// This type wraps a [`SchemeRegistry`](x402_types::scheme::SchemeRegistry) and routes payment verification and
/// settlement requests to the appropriate scheme handler based on the payment's
/// chain ID and scheme name.
///
/// # Type Parameter
///
/// - `A` - The handler registry type (typically [`SchemeRegistry`](x402_types::scheme::SchemeRegistry))
///
/// # Example
///
/// ```ignore
/// use x402_facilitator_local::FacilitatorLocal;
/// use x402_types::scheme::SchemeRegistry;
///
/// let scheme_registry = SchemeRegistry::build(chain_registry, scheme_blueprints, &config);
/// let facilitator = FacilitatorLocal::new(scheme_registry);
///
/// // Use the facilitator to verify payments
/// let response = facilitator.verify(&verify_request).await?;
/// ```
pub struct FacilitatorLocal<A> {
    handlers: A,
    discovery: DiscoveryCatalog,
}

impl<A> FacilitatorLocal<A> {
    /// Creates a new [`FacilitatorLocal`] with the given scheme handler registry.
    ///
    /// # Arguments
    ///
    /// - `handlers` - The scheme registry containing all registered payment handlers
    ///
    /// # Example
    ///
    /// ```ignore
    /// use x402_facilitator_local::FacilitatorLocal;
    /// use x402_types::scheme::SchemeRegistry;
    ///
    /// let scheme_registry = SchemeRegistry::build(chain_registry, scheme_blueprints, &config);
    /// let facilitator = FacilitatorLocal::new(scheme_registry);
    /// ```
    pub fn new(handlers: A) -> Self {
        FacilitatorLocal {
            handlers,
            discovery: DiscoveryCatalog::new(),
        }
    }
}

impl FacilitatorLocal<SchemeRegistry> {
    async fn relayer_info_inner(
        &self,
        chain_id_filter: Option<&x402_types::chain::ChainId>,
    ) -> Vec<RelayerInfo> {
        let chain_ids = match chain_id_filter {
            Some(chain_id) => vec![chain_id.clone()],
            None => self.handlers.chain_ids(),
        };
        let mut infos = Vec::with_capacity(chain_ids.len());
        for chain_id in chain_ids {
            let Some(handler) = self.handlers.by_chain(&chain_id) else {
                continue;
            };
            let address = match handler.supported().await {
                Ok(supported) => supported
                    .signers
                    .get(&chain_id)
                    .and_then(|addresses| addresses.first())
                    .cloned(),
                Err(_) => None,
            };
            let native_balance = handler.native_balance().await;
            infos.push(RelayerInfo {
                chain_id,
                address,
                native_balance,
            });
        }
        infos
    }
}

/// Relayer address and native balance reported for a single chain by `/info`.
pub struct RelayerInfo {
    pub chain_id: x402_types::chain::ChainId,
    pub address: Option<String>,
    pub native_balance: Option<String>,
}

/// Discovery and relayer introspection, split out from [`Facilitator`] since those
/// endpoints are specific to this crate's [`FacilitatorLocal`] rather than part of the
/// core x402 protocol surface every facilitator implements.
pub trait FacilitatorExtras {
    /// Returns the discovery catalog this facilitator populates from successful settlements.
    fn discovery(&self) -> &DiscoveryCatalog;

    /// Returns the relayer address and live native balance for every configured chain,
    /// or just `chain_id_filter` if given.
    fn relayer_info(
        &self,
        chain_id_filter: Option<&x402_types::chain::ChainId>,
    ) -> impl Future<Output = Vec<RelayerInfo>> + Send;
}

impl FacilitatorExtras for FacilitatorLocal<SchemeRegistry> {
    fn discovery(&self) -> &DiscoveryCatalog {
        &self.discovery
    }

    fn relayer_info(
        &self,
        chain_id_filter: Option<&x402_types::chain::ChainId>,
    ) -> impl Future<Output = Vec<RelayerInfo>> + Send {
        self.relayer_info_inner(chain_id_filter)
    }
}

impl<T: FacilitatorExtras + Sync> FacilitatorExtras for std::sync::Arc<T> {
    fn discovery(&self) -> &DiscoveryCatalog {
        self.as_ref().discovery()
    }

    fn relayer_info(
        &self,
        chain_id_filter: Option<&x402_types::chain::ChainId>,
    ) -> impl Future<Output = Vec<RelayerInfo>> + Send {
        self.as_ref().relayer_info(chain_id_filter)
    }
}

/// Inspects a settle request and response and, if the settlement succeeded and the
/// request named a `resource.url`, upserts a [`DiscoveryRecord`] for it.
fn record_discovery(discovery: &DiscoveryCatalog, request: &proto::SettleRequest, response: &proto::SettleResponse) {
    let Some(true) = response.0.get("success").and_then(serde_json::Value::as_bool) else {
        return;
    };
    let request_json = request.clone().into_json();
    let payment_payload = &request_json["paymentPayload"];
    let Some(url) = payment_payload["resource"]["url"].as_str() else {
        return;
    };
    let x402_version = payment_payload["x402Version"].as_u64().unwrap_or(2) as u8;
    let method = payment_payload["resource"]["method"]
        .as_str()
        .map(str::to_string);
    let accepted = payment_payload["accepted"].clone();
    discovery.upsert(DiscoveryRecord {
        resource: url.to_string(),
        kind: "http".to_string(),
        method,
        x402_version,
        accepts: vec![accepted],
        last_updated: UnixTimestamp::now(),
        metadata: None,
    });
}

impl Facilitator for FacilitatorLocal<SchemeRegistry> {
    type Error = FacilitatorLocalError;

    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<proto::VerifyResponse, Self::Error> {
        let handler = request
            .scheme_handler_slug()
            .and_then(|slug| self.handlers.by_slug(&slug))
            .ok_or(FacilitatorLocalError::Verification(
                PaymentVerificationError::UnsupportedScheme.into(),
            ))?;
        let response = handler
            .verify(request)
            .await
            .map_err(FacilitatorLocalError::Verification)?;
        Ok(response)
    }

    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<proto::SettleResponse, Self::Error> {
        let handler = request
            .scheme_handler_slug()
            .and_then(|slug| self.handlers.by_slug(&slug))
            .ok_or(FacilitatorLocalError::Verification(
                PaymentVerificationError::UnsupportedScheme.into(),
            ))?;
        let response = handler
            .settle(request)
            .await
            .map_err(FacilitatorLocalError::Settlement)?;
        record_discovery(&self.discovery, request, &response);
        Ok(response)
    }

    async fn supported(&self) -> Result<proto::SupportedResponse, Self::Error> {
        let mut kinds = vec![];
        let mut signers = HashMap::new();
        for provider in self.handlers.values() {
            let supported = provider.supported().await.ok();
            if let Some(mut supported) = supported {
                kinds.append(&mut supported.kinds);
                for (chain_id, signer_addresses) in supported.signers {
                    signers.entry(chain_id).or_insert(signer_addresses);
                }
            }
        }
        Ok(proto::SupportedResponse {
            kinds,
            extensions: Vec::new(),
            signers,
        })
    }
}

/// Errors that can occur during local facilitator operations.
///
/// These errors wrap the underlying scheme handler errors and distinguish between
/// verification failures (which occur during the `/verify` step) and settlement
/// failures (which occur during the `/settle` step).
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorLocalError {
    /// Payment verification failed.
    ///
    /// This error occurs when the scheme handler fails to verify a payment,
    /// typically due to invalid signatures, unsupported schemes, or insufficient funds.
    #[error(transparent)]
    Verification(X402SchemeFacilitatorError),
    /// Payment settlement failed.
    ///
    /// This error occurs when the scheme handler fails to settle a payment on-chain,
    /// typically due to transaction failures or network issues.
    #[error(transparent)]
    Settlement(X402SchemeFacilitatorError),
}
