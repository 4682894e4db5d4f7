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

mod chain;
mod config;
mod run;

use std::process;

use crate::run::run;

#[tokio::main]
async fn main() {
    let result = run().await;
    if let Err(e) = result {
        println!("{e}");
        process::exit(1)
    }
}
