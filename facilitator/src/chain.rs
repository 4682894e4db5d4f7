//! Chain provider construction for the x402 facilitator.
//!
//! Every configured chain is an EIP-155 (EVM) chain; the facilitator's own relayer
//! private key is used as the sole signer on each one.

use std::collections::HashMap;
use std::sync::Arc;

use x402_chain_eip155::chain::Eip155ChainProvider;
use x402_chain_eip155::chain::config::{
    Eip155ChainConfig, Eip155ChainConfigInner, Eip155SignersConfig,
};
use x402_types::chain::{ChainProviderOps, ChainRegistry, FromConfig};
use x402_types::config::{LiteralOrEnv, RpcConfig};

use crate::config::Config;

/// Builds a [`ChainRegistry`] of EVM providers, one per `--rpc-url`/`RPC_URL_*` entry,
/// all signing with the facilitator's single relayer key.
pub async fn build_chain_registry(
    config: &Config,
) -> Result<ChainRegistry<Arc<Eip155ChainProvider>>, Box<dyn std::error::Error>> {
    let mut providers = HashMap::with_capacity(config.rpc_endpoints().len());
    for endpoint in config.rpc_endpoints() {
        let chain_reference = endpoint.chain_id.clone().try_into().map_err(|e| {
            format!("invalid chain id {}: {}", endpoint.chain_id, e)
        })?;
        let signers: Eip155SignersConfig =
            vec![LiteralOrEnv::from_literal(config.relayer_private_key())];
        let chain_config = Eip155ChainConfig {
            chain_reference,
            inner: Eip155ChainConfigInner {
                eip1559: true,
                flashblocks: false,
                signers,
                rpc: vec![RpcConfig {
                    http: endpoint.url.clone(),
                    rate_limit: None,
                }],
                receipt_timeout_secs: 30,
            },
        };
        let provider = Eip155ChainProvider::from_config(&chain_config).await?;
        providers.insert(provider.chain_id(), Arc::new(provider));
    }
    Ok(ChainRegistry::new(providers))
}
