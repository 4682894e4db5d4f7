//! In-memory, process-lifetime nonce arbiter.
//!
//! Guards against replay of a signed intent: once a nonce is marked, no
//! later `settle` (or the `verify` that runs inside it) may accept it again.
//! Marking is permanent for the lifetime of the process, including for
//! nonces whose transaction later reverted on-chain — see
//! [`NonceArbiter::check_and_mark`].

use dashmap::DashSet;
use std::sync::Arc;

/// Tracks intent nonces that have already been accepted for settlement.
///
/// Backed by a [`DashSet`], which shards its internal locking so concurrent
/// `check_and_mark` calls on different nonces do not contend, while calls
/// racing on the *same* nonce are still linearizable: `DashSet::insert`
/// returns `true` exactly once for a given key, no matter how many callers
/// race it.
#[derive(Debug, Default, Clone)]
pub struct NonceArbiter {
    used: Arc<DashSet<String>>,
}

impl NonceArbiter {
    /// Creates an empty arbiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-mutating check for whether `nonce` has already been consumed.
    ///
    /// Used by read-only `verify` paths; never call this from `settle` in
    /// place of [`Self::check_and_mark`], or replay protection is lost.
    pub fn has(&self, nonce: &str) -> bool {
        self.used.contains(nonce)
    }

    /// Atomically marks `nonce` as used.
    ///
    /// Returns `true` if this call newly inserted the nonce (the caller may
    /// proceed with settlement), or `false` if it was already present (the
    /// caller must reject with `NonceUsed`). Exactly one concurrent caller
    /// observes `true` for a given nonce.
    pub fn check_and_mark(&self, nonce: &str) -> bool {
        self.used.insert(nonce.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    #[test]
    fn has_is_false_until_marked() {
        let arbiter = NonceArbiter::new();
        assert!(!arbiter.has("n1"));
        assert!(arbiter.check_and_mark("n1"));
        assert!(arbiter.has("n1"));
    }

    #[test]
    fn check_and_mark_rejects_repeat() {
        let arbiter = NonceArbiter::new();
        assert!(arbiter.check_and_mark("n1"));
        assert!(!arbiter.check_and_mark("n1"));
    }

    #[test]
    fn distinct_nonces_are_independent() {
        let arbiter = NonceArbiter::new();
        assert!(arbiter.check_and_mark("a"));
        assert!(arbiter.check_and_mark("b"));
        assert!(arbiter.has("a"));
        assert!(arbiter.has("b"));
        assert!(!arbiter.has("c"));
    }

    #[tokio::test]
    async fn concurrent_check_and_mark_is_linearizable() {
        let arbiter = NonceArbiter::new();
        let winners = StdArc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..64 {
            let arbiter = arbiter.clone();
            let winners = StdArc::clone(&winners);
            tasks.push(tokio::spawn(async move {
                if arbiter.check_and_mark("race") {
                    winners.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(winners.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
