//! Payment scheme / mechanism system for extensible payment methods.
//!
//! This module provides the extensible scheme system that allows different
//! payment mechanisms to be plugged into the x402 protocol. Each mechanism
//! defines how payments are authorized, verified, and settled for a given
//! chain family.
//!
//! # Architecture
//!
//! The scheme system has three main components:
//!
//! 1. **Blueprints** ([`SchemeBlueprints`]) - Factories that build mechanism handlers from
//!    a chain provider
//! 2. **Handlers** ([`X402SchemeFacilitator`]) - Process verify/settle requests
//! 3. **Registry** ([`SchemeRegistry`]) - Maps chain+scheme combinations to handlers
//!
//! # Implementing a Mechanism
//!
//! 1. Implement [`X402SchemeId`] to identify the mechanism (namespace + scheme name).
//! 2. Implement [`X402SchemeFacilitatorBuilder<TProvider>`] to build a handler from a
//!    chain provider.
//! 3. Implement [`X402SchemeFacilitator`] for the actual verification/settlement logic.
//! 4. Register the blueprint with [`SchemeBlueprints::register`].

use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;

use crate::chain::{ChainId, ChainIdPattern, ChainProviderOps, ChainRegistry};
use crate::proto;
use crate::proto::{AsPaymentProblem, ErrorReason, PaymentProblem, PaymentVerificationError};

/// Trait for scheme handlers that process payment verification and settlement.
///
/// Implementations of this trait hold everything needed to process a single
/// chain+mechanism combination: verifying that payments are valid, and
/// settling them on-chain.
#[async_trait::async_trait]
pub trait X402SchemeFacilitator: Send + Sync {
    /// Verifies a payment authorization without settling it.
    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<proto::VerifyResponse, X402SchemeFacilitatorError>;

    /// Settles a verified payment on-chain.
    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<proto::SettleResponse, X402SchemeFacilitatorError>;

    /// Returns the payment methods supported by this handler.
    async fn supported(&self) -> Result<proto::SupportedResponse, X402SchemeFacilitatorError>;

    /// Returns the relayer's native-currency balance as a decimal string, if this
    /// handler's provider exposes one. Defaults to `None` for handlers with no
    /// natural notion of a balance-bearing signer.
    async fn native_balance(&self) -> Option<String> {
        None
    }
}

/// Marker trait for types that are both identifiable and buildable for a given
/// chain provider type `TProvider`.
pub trait X402SchemeBlueprint<TProvider>:
    X402SchemeId + X402SchemeFacilitatorBuilder<TProvider>
{
}
impl<T, TProvider> X402SchemeBlueprint<TProvider> for T where
    T: X402SchemeId + X402SchemeFacilitatorBuilder<TProvider>
{
}

/// Trait for identifying a payment scheme.
///
/// Each scheme has a unique identifier composed of the protocol version,
/// chain namespace, and scheme name.
pub trait X402SchemeId {
    /// Returns the x402 protocol version (1 or 2).
    fn x402_version(&self) -> u8 {
        2
    }
    /// Returns the chain namespace (e.g., "eip155").
    fn namespace(&self) -> &str;
    /// Returns the scheme name (e.g., "exact", "eip7702").
    fn scheme(&self) -> &str;
    /// Returns the full scheme identifier (e.g., "v2-eip155-exact").
    fn id(&self) -> String {
        format!(
            "v{}-{}-{}",
            self.x402_version(),
            self.namespace(),
            self.scheme(),
        )
    }
}

/// Trait for building scheme handlers from a chain provider.
///
/// Generic over `TProvider` so that `x402_types` does not need to depend on
/// any particular chain family's crate: each chain crate implements this for
/// its own provider type.
pub trait X402SchemeFacilitatorBuilder<TProvider> {
    /// Creates a new scheme handler for the given chain provider.
    fn build(
        &self,
        provider: TProvider,
        config: Option<serde_json::Value>,
    ) -> Result<Box<dyn X402SchemeFacilitator>, Box<dyn std::error::Error>>;
}

/// Errors that can occur during scheme operations.
#[derive(Debug, thiserror::Error)]
pub enum X402SchemeFacilitatorError {
    /// Payment verification failed.
    #[error(transparent)]
    PaymentVerification(#[from] PaymentVerificationError),
    /// On-chain operation failed.
    #[error("Onchain error: {0}")]
    OnchainFailure(String),
}

impl AsPaymentProblem for X402SchemeFacilitatorError {
    fn as_payment_problem(&self) -> PaymentProblem {
        match self {
            X402SchemeFacilitatorError::PaymentVerification(e) => e.as_payment_problem(),
            X402SchemeFacilitatorError::OnchainFailure(e) => {
                PaymentProblem::new(ErrorReason::UnexpectedError, e.to_string())
            }
        }
    }
}

/// Registry of scheme blueprints (factories), parameterized by the chain
/// provider type they build handlers from.
pub struct SchemeBlueprints<TProvider>(HashMap<String, Box<dyn X402SchemeBlueprint<TProvider>>>);

impl<TProvider> Default for SchemeBlueprints<TProvider> {
    fn default() -> Self {
        Self(HashMap::new())
    }
}

impl<TProvider> Debug for SchemeBlueprints<TProvider> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let slugs: Vec<String> = self.0.keys().map(|s| s.to_string()).collect();
        f.debug_tuple("SchemeBlueprints").field(&slugs).finish()
    }
}

impl<TProvider> SchemeBlueprints<TProvider> {
    /// Creates an empty blueprint registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a blueprint and returns self for chaining.
    pub fn and_register<B: X402SchemeBlueprint<TProvider> + 'static>(
        mut self,
        blueprint: B,
    ) -> Self {
        self.register(blueprint);
        self
    }

    /// Registers a scheme blueprint.
    pub fn register<B: X402SchemeBlueprint<TProvider> + 'static>(&mut self, blueprint: B) {
        self.0.insert(blueprint.id(), Box::new(blueprint));
    }

    /// Gets a blueprint by its ID.
    pub fn get(&self, id: &str) -> Option<&dyn X402SchemeBlueprint<TProvider>> {
        self.0.get(id).map(|v| v.deref())
    }
}

/// Unique identifier for a scheme handler instance.
///
/// Combines the chain ID, protocol version, and scheme name to uniquely
/// identify a handler that can process payments for a specific combination.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct SchemeHandlerSlug {
    /// The chain this handler operates on.
    pub chain_id: ChainId,
    /// The x402 protocol version.
    pub x402_version: u8,
    /// The scheme name (e.g., "exact").
    pub name: String,
}

impl SchemeHandlerSlug {
    /// Creates a new scheme handler slug.
    pub fn new(chain_id: ChainId, x402_version: u8, name: String) -> Self {
        Self {
            chain_id,
            x402_version,
            name,
        }
    }
}

impl Display for SchemeHandlerSlug {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:v{}:{}",
            self.chain_id.namespace, self.chain_id.reference, self.x402_version, self.name
        )
    }
}

/// Declares a mechanism as active for a set of chains.
///
/// Entries are matched against registered blueprints by `id` and expanded
/// against every chain provider that matches `chains`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemeConfig {
    /// The blueprint id to register, e.g. `"v2-eip155-exact"`.
    pub id: String,
    /// Which configured chains this scheme should be built for.
    pub chains: ChainIdPattern,
    /// Whether this scheme is active. Disabled entries are skipped at build time.
    #[serde(default = "SchemeConfig::default_enabled")]
    pub enabled: bool,
    /// Scheme-specific configuration, passed verbatim to the blueprint's `build`.
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

impl SchemeConfig {
    fn default_enabled() -> bool {
        true
    }
}

/// Registry of active scheme handlers.
///
/// Maps chain+scheme combinations to their handlers. Built from blueprints
/// and chain providers based on configuration.
#[derive(Default)]
pub struct SchemeRegistry(HashMap<SchemeHandlerSlug, Box<dyn X402SchemeFacilitator>>);

impl Debug for SchemeRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let slugs: Vec<String> = self.0.keys().map(|s| s.to_string()).collect();
        f.debug_tuple("SchemeRegistry").field(&slugs).finish()
    }
}

impl SchemeRegistry {
    /// Builds a scheme registry from blueprints and configuration.
    ///
    /// For each enabled scheme in the config, this finds the matching blueprint
    /// and chain provider(s), then builds a handler for each match.
    pub fn build<TProvider>(
        chains: ChainRegistry<TProvider>,
        blueprints: SchemeBlueprints<TProvider>,
        config: &[SchemeConfig],
    ) -> Self
    where
        TProvider: ChainProviderOps + Clone,
    {
        let mut handlers = HashMap::with_capacity(config.len());
        for entry in config {
            if !entry.enabled {
                tracing::info!(
                    "Skipping disabled scheme {} for chains {}",
                    entry.id,
                    entry.chains
                );
                continue;
            }
            let blueprint = match blueprints.get(&entry.id) {
                Some(blueprint) => blueprint,
                None => {
                    tracing::warn!("No scheme registered: {}", entry.id);
                    continue;
                }
            };
            let chain_providers = chains.by_chain_id_pattern(&entry.chains);
            if chain_providers.is_empty() {
                tracing::warn!("No chain provider found for {}", entry.chains);
                continue;
            }

            for chain_provider in chain_providers {
                let chain_id = chain_provider.chain_id();
                let handler = match blueprint.build(chain_provider.clone(), entry.config.clone()) {
                    Ok(handler) => handler,
                    Err(err) => {
                        tracing::error!("Error building scheme handler for {}: {}", entry.id, err);
                        continue;
                    }
                };
                let slug = SchemeHandlerSlug::new(
                    chain_id.clone(),
                    blueprint.x402_version(),
                    blueprint.scheme().to_string(),
                );
                tracing::info!(chain_id = %chain_id, scheme = %blueprint.scheme(), id = blueprint.id(), "Registered scheme handler");
                handlers.insert(slug, handler);
            }
        }
        Self(handlers)
    }

    /// Gets a handler by its slug.
    pub fn by_slug(&self, slug: &SchemeHandlerSlug) -> Option<&dyn X402SchemeFacilitator> {
        let handler = self.0.get(slug)?.deref();
        Some(handler)
    }

    /// Returns an iterator over all registered handlers.
    pub fn values(&self) -> impl Iterator<Item = &dyn X402SchemeFacilitator> {
        self.0.values().map(|v| v.deref())
    }

    /// Returns the first registered handler for `chain_id`, regardless of scheme.
    ///
    /// Used by `/info` to report a single relayer address and balance per chain even
    /// when more than one scheme is registered for it.
    pub fn by_chain(&self, chain_id: &ChainId) -> Option<&dyn X402SchemeFacilitator> {
        self.0
            .iter()
            .find(|(slug, _)| &slug.chain_id == chain_id)
            .map(|(_, handler)| handler.deref())
    }

    /// Returns the distinct chain IDs with at least one registered handler.
    pub fn chain_ids(&self) -> Vec<ChainId> {
        let mut seen = Vec::new();
        for slug in self.0.keys() {
            if !seen.contains(&slug.chain_id) {
                seen.push(slug.chain_id.clone());
            }
        }
        seen
    }
}
