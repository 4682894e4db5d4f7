use alloy_primitives::Address;
use alloy_provider::Provider;
use alloy_provider::fillers::NonceManager;
use alloy_transport::TransportResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A nonce manager that caches nonces locally and checks pending transactions on initialization.
///
/// The relayer account is the sole sender on each configured chain, so a single cached
/// nonce per address is sufficient to serialize submissions without querying the RPC on
/// every send.
///
/// - **First call for an address**: fetches the nonce using `.pending()`, which includes
///   transactions still in the mempool.
/// - **Subsequent calls**: increments the cached nonce locally.
/// - **On failure**: [`reset_nonce`](Self::reset_nonce) forces the next call to requery,
///   since a failed submission leaves the on-chain nonce state uncertain.
#[derive(Clone, Debug, Default)]
pub struct PendingNonceManager {
    nonces: Arc<DashMap<Address, Arc<Mutex<u64>>>>,
}

#[async_trait]
impl NonceManager for PendingNonceManager {
    async fn get_next_nonce<P, N>(&self, provider: &P, address: Address) -> TransportResult<u64>
    where
        P: Provider<N>,
        N: alloy_network::Network,
    {
        const NONE: u64 = u64::MAX;

        let nonce = {
            let rm = self
                .nonces
                .entry(address)
                .or_insert_with(|| Arc::new(Mutex::new(NONE)));
            Arc::clone(rm.value())
        };

        let mut nonce = nonce.lock().await;
        let new_nonce = if *nonce == NONE {
            tracing::trace!(%address, "fetching nonce");
            provider.get_transaction_count(address).pending().await?
        } else {
            tracing::trace!(%address, current_nonce = *nonce, "incrementing nonce");
            *nonce + 1
        };
        *nonce = new_nonce;
        Ok(new_nonce)
    }
}

impl PendingNonceManager {
    /// Resets the cached nonce for `address`, forcing a fresh `.pending()` query on next use.
    pub async fn reset_nonce(&self, address: Address) {
        if let Some(nonce_lock) = self.nonces.get(&address) {
            let mut nonce = nonce_lock.lock().await;
            *nonce = u64::MAX;
            tracing::debug!(%address, "reset nonce cache, will requery on next use");
        }
    }
}
