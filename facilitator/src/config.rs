//! Configuration for the x402 facilitator binary.
//!
//! Configuration comes entirely from CLI flags and environment variables; there is no
//! JSON config file. A single relayer key and delegate contract are shared across every
//! configured chain; per-chain configuration is limited to its RPC endpoint.

use std::net::IpAddr;
use std::str::FromStr;

use clap::Parser;
use url::Url;

use x402_chain_eip155::chain::ChecksummedAddress;
use x402_chain_eip155::chain::config::EvmPrivateKey;
use x402_types::chain::ChainId;

/// CLI arguments for the x402 facilitator server.
#[derive(Parser, Debug)]
#[command(name = "x402-facilitator")]
#[command(about = "Self-hosted x402 payment facilitator")]
struct CliArgs {
    /// Port to bind the HTTP server to.
    #[arg(long, env = "PORT", default_value_t = config_defaults::DEFAULT_PORT)]
    port: u16,
    /// Address to bind the HTTP server to.
    #[arg(long, env = "HOST", default_value = config_defaults::DEFAULT_HOST)]
    host: IpAddr,
    /// Private key of the relayer account that pays gas for settlements.
    #[arg(long = "relayer-private-key", env = "RELAYER_PRIVATE_KEY")]
    relayer_private_key: String,
    /// Address of the trusted EIP-7702 delegate contract.
    #[arg(long = "delegate-address", env = "DELEGATE_ADDRESS")]
    delegate_address: String,
    /// RPC endpoint for a chain, given as `chainId=url`. Repeatable.
    #[arg(long = "rpc-url", value_name = "chainId=url")]
    rpc_url: Vec<String>,
}

mod config_defaults {
    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: &str = "0.0.0.0";
}

/// One chain this facilitator has an RPC endpoint for.
#[derive(Debug, Clone)]
pub struct RpcEndpoint {
    pub chain_id: ChainId,
    pub url: Url,
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no --rpc-url given; at least one chain must be configured")]
    NoRpcEndpoints,
    #[error("malformed --rpc-url entry {0:?}, expected chainId=url")]
    MalformedRpcUrl(String),
    #[error("invalid chain id in --rpc-url entry {0:?}")]
    InvalidChainId(String),
    #[error("invalid url in --rpc-url entry {0:?}: {1}")]
    InvalidUrl(String, url::ParseError),
    #[error("invalid --relayer-private-key: {0}")]
    InvalidPrivateKey(String),
    #[error("invalid --delegate-address: {0}")]
    InvalidDelegateAddress(String),
}

/// Parsed, validated configuration for a single facilitator process.
pub struct Config {
    port: u16,
    host: IpAddr,
    relayer_private_key: EvmPrivateKey,
    delegate_address: ChecksummedAddress,
    rpc_endpoints: Vec<RpcEndpoint>,
}

impl Config {
    /// Loads configuration from CLI arguments and environment variables.
    ///
    /// Every flag except `--rpc-url` falls back to its matching environment variable via
    /// `clap`'s `env` attribute. `--rpc-url` additionally merges in any `RPC_URL_<chainId>`
    /// variables (colons replaced with underscores, since POSIX environment variable names
    /// can't contain `:`) for chains not already given on the command line.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        Self::from_cli_args(cli_args)
    }

    fn from_cli_args(cli_args: CliArgs) -> Result<Self, ConfigError> {
        let relayer_private_key = EvmPrivateKey::from_str(&cli_args.relayer_private_key)
            .map_err(ConfigError::InvalidPrivateKey)?;
        let delegate_address = ChecksummedAddress::from_str(&cli_args.delegate_address)
            .map_err(|e| ConfigError::InvalidDelegateAddress(e.to_string()))?;

        let mut rpc_endpoints = Vec::with_capacity(cli_args.rpc_url.len());
        for entry in &cli_args.rpc_url {
            rpc_endpoints.push(parse_rpc_url_entry(entry)?);
        }
        for (chain_id, url) in rpc_urls_from_env() {
            if rpc_endpoints.iter().any(|e| e.chain_id == chain_id) {
                continue;
            }
            rpc_endpoints.push(RpcEndpoint { chain_id, url });
        }
        if rpc_endpoints.is_empty() {
            return Err(ConfigError::NoRpcEndpoints);
        }

        Ok(Config {
            port: cli_args.port,
            host: cli_args.host,
            relayer_private_key,
            delegate_address,
            rpc_endpoints,
        })
    }

    /// Get the port value.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the host value as an IpAddr.
    pub fn host(&self) -> IpAddr {
        self.host
    }

    /// Get the relayer's private key, shared across every configured chain.
    pub fn relayer_private_key(&self) -> EvmPrivateKey {
        self.relayer_private_key
    }

    /// Get the trusted EIP-7702 delegate contract address.
    pub fn delegate_address(&self) -> ChecksummedAddress {
        self.delegate_address
    }

    /// Get the configured RPC endpoints, one per chain.
    pub fn rpc_endpoints(&self) -> &[RpcEndpoint] {
        &self.rpc_endpoints
    }
}

fn parse_rpc_url_entry(entry: &str) -> Result<RpcEndpoint, ConfigError> {
    let (chain_id, url) = entry
        .split_once('=')
        .ok_or_else(|| ConfigError::MalformedRpcUrl(entry.to_string()))?;
    let chain_id =
        ChainId::from_str(chain_id).map_err(|_| ConfigError::InvalidChainId(entry.to_string()))?;
    let url = Url::parse(url).map_err(|e| ConfigError::InvalidUrl(entry.to_string(), e))?;
    Ok(RpcEndpoint { chain_id, url })
}

/// Scans the environment for `RPC_URL_<chainId>` entries not already given via `--rpc-url`.
///
/// Invalid entries (bad chain id or bad url) are skipped rather than rejected, since an
/// unrelated `RPC_URL_`-prefixed variable in the environment shouldn't fail startup.
fn rpc_urls_from_env() -> Vec<(ChainId, Url)> {
    std::env::vars()
        .filter_map(|(key, value)| {
            let suffix = key.strip_prefix("RPC_URL_")?;
            let chain_id = ChainId::from_str(&suffix.replacen('_', ":", 1)).ok()?;
            let url = Url::parse(&value).ok()?;
            Some((chain_id, url))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rpc_url_entry_accepts_well_formed_pair() {
        let endpoint = parse_rpc_url_entry("eip155:8453=https://mainnet.base.org").unwrap();
        assert_eq!(endpoint.chain_id, ChainId::from_str("eip155:8453").unwrap());
        assert_eq!(endpoint.url.as_str(), "https://mainnet.base.org/");
    }

    #[test]
    fn parse_rpc_url_entry_rejects_missing_equals() {
        assert!(matches!(
            parse_rpc_url_entry("eip155:8453"),
            Err(ConfigError::MalformedRpcUrl(_))
        ));
    }

    #[test]
    fn parse_rpc_url_entry_rejects_bad_chain_id() {
        assert!(matches!(
            parse_rpc_url_entry("not-a-chain-id=https://example.com"),
            Err(ConfigError::InvalidChainId(_))
        ));
    }

    #[test]
    fn parse_rpc_url_entry_rejects_bad_url() {
        assert!(matches!(
            parse_rpc_url_entry("eip155:8453=not a url"),
            Err(ConfigError::InvalidUrl(_, _))
        ));
    }
}
