//! x402 Facilitator HTTP entrypoint.
//!
//! This binary launches an Axum-based HTTP server that exposes the x402 protocol interface
//! for payment verification and settlement via EIP-7702 delegated transfers and the
//! EIP-3009/Permit2 "exact" scheme on EVM-compatible networks.
//!
//! Endpoints:
//! - `GET /verify` – Supported verification schema
//! - `POST /verify` – Verify a payment payload against requirements
//! - `GET /settle` – Supported settlement schema
//! - `POST /settle` – Settle an accepted payment payload on-chain
//! - `GET /supported` – List supported payment kinds (version/scheme/network)
//! - `GET /healthcheck` – Liveness probe
//! - `GET /discovery/resources` – Resources previously paid for through this facilitator
//! - `GET /info` – Relayer address, native balance, and uptime per chain
//!
//! This server includes:
//! - OpenTelemetry tracing via `TraceLayer`
//! - CORS support for cross-origin clients
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT`, `RELAYER_PRIVATE_KEY`, `DELEGATE_ADDRESS`, `RPC_URL_<chainId>`
//! - `OTEL_*` variables enable tracing to systems like Honeycomb

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;

use x402_chain_eip155::{Eip7702Delegate, V2Eip155Exact};
use x402_facilitator_local::handlers::{self, AppState};
use x402_facilitator_local::util::SigDown;
use x402_facilitator_local::FacilitatorLocal;
use x402_types::chain::ChainIdPattern;
use x402_types::scheme::{SchemeBlueprints, SchemeConfig, SchemeRegistry, X402SchemeId};

#[cfg(feature = "telemetry")]
use x402_facilitator_local::util::Telemetry;

use crate::chain::build_chain_registry;
use crate::config::Config;

/// Initializes the x402 facilitator server.
///
/// - Loads `.env` variables.
/// - Initializes OpenTelemetry tracing.
/// - Connects to EVM providers for every configured chain.
/// - Starts an Axum HTTP server with the x402 protocol handlers.
///
/// Binds to the address specified by the `HOST` and `PORT` env vars.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider())
        .expect("Failed to initialize rustls crypto provider");

    dotenv().ok();

    #[cfg(feature = "telemetry")]
    let telemetry_layer = {
        let telemetry = Telemetry::new()
            .with_name(env!("CARGO_PKG_NAME"))
            .with_version(env!("CARGO_PKG_VERSION"))
            .register();
        telemetry.http_tracing()
    };

    let config = Config::load()?;

    let chain_registry = build_chain_registry(&config).await?;
    let scheme_blueprints = SchemeBlueprints::new()
        .and_register(V2Eip155Exact)
        .and_register(Eip7702Delegate);
    let scheme_configs = vec![
        SchemeConfig {
            id: V2Eip155Exact.id(),
            chains: ChainIdPattern::wildcard("eip155"),
            enabled: true,
            config: None,
        },
        SchemeConfig {
            id: Eip7702Delegate.id(),
            chains: ChainIdPattern::wildcard("eip155"),
            enabled: true,
            config: Some(json!({
                "delegateAddress": config.delegate_address().to_string(),
            })),
        },
    ];
    let scheme_registry = SchemeRegistry::build(chain_registry, scheme_blueprints, &scheme_configs);

    let facilitator = FacilitatorLocal::new(scheme_registry);
    let axum_state = AppState::new(Arc::new(facilitator));

    let http_endpoints = Router::new().merge(handlers::routes().with_state(axum_state));
    #[cfg(feature = "telemetry")]
    let http_endpoints = http_endpoints.layer(telemetry_layer);
    let http_endpoints = http_endpoints.layer(
        cors::CorsLayer::new()
            .allow_origin(cors::Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(cors::Any),
    );

    let addr = SocketAddr::new(config.host(), config.port());
    #[cfg(feature = "telemetry")]
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await;
    #[cfg(feature = "telemetry")]
    let listener = listener.inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e));
    let listener = listener?;

    let sig_down = SigDown::try_new()?;
    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    Ok(())
}
