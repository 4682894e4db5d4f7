//! In-memory catalog of resources that have been paid for through this facilitator.
//!
//! Populated only from the post-settle hook ([`crate::facilitator::Facilitator`]
//! implementations call [`DiscoveryCatalog::upsert`] after a successful settle whose
//! payload names a `resource.url`), and read back through the `/discovery/resources`
//! endpoint. Scope is process-lifetime and non-persistent, same as [`crate::nonce::NonceArbiter`].

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::timestamp::UnixTimestamp;

/// A single entry in the discovery catalog: the payment requirements accepted the last
/// time a buyer successfully paid for this resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRecord {
    /// The normalized resource URL (origin + path, query and fragment stripped).
    pub resource: String,
    /// The resource kind. Always `"http"` for resources reached through this facilitator.
    #[serde(rename = "type")]
    pub kind: String,
    /// The HTTP method the resource is served under, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// The x402 protocol version under which this resource was last paid for.
    pub x402_version: u8,
    /// The payment requirements a buyer accepted for this resource.
    pub accepts: Vec<serde_json::Value>,
    /// When this record was last refreshed.
    pub last_updated: UnixTimestamp,
    /// Scheme- or resource-specific metadata, passed through as-is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A page of [`DiscoveryRecord`]s plus the total number of records matching the query.
pub struct DiscoveryPage {
    pub items: Vec<DiscoveryRecord>,
    pub total: usize,
}

/// Catalog of resources paid for through this facilitator, keyed by normalized resource URL.
///
/// Backed by a [`DashMap`] so concurrent settle requests can upsert without contending on a
/// single lock; `list` takes a point-in-time snapshot rather than holding a lock across
/// the sort and paginate steps.
#[derive(Debug, Default, Clone)]
pub struct DiscoveryCatalog {
    records: Arc<DashMap<String, DiscoveryRecord>>,
}

impl DiscoveryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the record for `record.resource`.
    pub fn upsert(&self, record: DiscoveryRecord) {
        self.records.insert(record.resource.clone(), record);
    }

    /// Returns up to `limit` records starting at `offset`, most recently updated first.
    ///
    /// `type_filter`, if given, restricts the result to records whose `kind` matches
    /// exactly. `total` in the returned page counts all records matching the filter,
    /// not just the returned page.
    pub fn list(&self, limit: usize, offset: usize, type_filter: Option<&str>) -> DiscoveryPage {
        let mut matching: Vec<DiscoveryRecord> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|record| type_filter.is_none_or(|kind| record.kind == kind))
            .collect();
        matching.sort_by(|a, b| b.last_updated.as_secs().cmp(&a.last_updated.as_secs()));
        let total = matching.len();
        let items = matching.into_iter().skip(offset).take(limit).collect();
        DiscoveryPage { items, total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(resource: &str, last_updated: u64) -> DiscoveryRecord {
        DiscoveryRecord {
            resource: resource.to_string(),
            kind: "http".to_string(),
            method: Some("GET".to_string()),
            x402_version: 2,
            accepts: vec![],
            last_updated: UnixTimestamp::from_secs(last_updated),
            metadata: None,
        }
    }

    #[test]
    fn upsert_overwrites_prior_record() {
        let catalog = DiscoveryCatalog::new();
        catalog.upsert(record("https://example.com/a", 1));
        catalog.upsert(record("https://example.com/a", 2));
        let page = catalog.list(10, 0, None);
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].last_updated.as_secs(), 2);
    }

    #[test]
    fn list_sorts_by_last_updated_descending_and_paginates() {
        let catalog = DiscoveryCatalog::new();
        catalog.upsert(record("https://example.com/a", 1));
        catalog.upsert(record("https://example.com/b", 3));
        catalog.upsert(record("https://example.com/c", 2));

        let page = catalog.list(2, 0, None);
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].resource, "https://example.com/b");
        assert_eq!(page.items[1].resource, "https://example.com/c");

        let page = catalog.list(2, 2, None);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].resource, "https://example.com/a");
    }

    #[test]
    fn list_filters_by_type() {
        let catalog = DiscoveryCatalog::new();
        catalog.upsert(record("https://example.com/a", 1));
        let mut other = record("https://example.com/b", 2);
        other.kind = "other".to_string();
        catalog.upsert(other);

        let page = catalog.list(10, 0, Some("http"));
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].resource, "https://example.com/a");
    }
}
