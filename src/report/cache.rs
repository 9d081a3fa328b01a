//! Result cache manager
//!
//! Keys merged, pre-pagination result sets by a canonical hash of the
//! report configuration and stores them under a global memory budget with
//! TTL- and size-based eviction. The cache is the only mutable shared
//! resource in the engine: one `set` or eviction pass is atomic behind the
//! lock, and reads never observe a partially written entry.

use crate::error::EngineResult;
use crate::types::{OrgContext, ReportConfig, Row};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache sizing and default TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Global memory ceiling over all cached entries
    pub max_total_bytes: usize,
    /// Single-entry ceiling; larger results are silently not cached so one
    /// huge report cannot starve the cache
    pub max_entry_bytes: usize,
    /// TTL applied when the report config does not specify one
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_total_bytes: 50 * 1024 * 1024,
            max_entry_bytes: 10 * 1024 * 1024,
            default_ttl_secs: 300,
        }
    }
}

struct CacheEntry {
    data: Vec<Row>,
    inserted_at: Instant,
    ttl: Duration,
    byte_size: usize,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Keys in insertion order; the front is the eviction candidate
    order: VecDeque<String>,
}

impl CacheState {
    fn total_bytes(&self) -> usize {
        self.entries.values().map(|e| e.byte_size).sum()
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.order.retain(|k| k != key);
        self.entries.remove(key)
    }

    fn evict_oldest(&mut self) -> Option<String> {
        let key = self.order.pop_front()?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// TTL- and budget-bounded store of report results.
///
/// Explicitly constructed, one instance per engine; lifecycle is
/// init (empty), operate, optional explicit clear.
pub struct ReportCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl ReportCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Look up a result. A miss occurs both when the key is absent and when
    /// the entry's TTL has lapsed; an expired entry is evicted on read.
    pub fn get(&self, key: &str) -> Option<Vec<Row>> {
        let mut state = self.state.lock().expect("cache lock poisoned");
        let expired = state
            .entries
            .get(key)
            .map(|entry| entry.is_expired(Instant::now()))?;

        if expired {
            state.remove(key);
            debug!(key, "cache entry expired on read");
            return None;
        }
        state.entries.get(key).map(|entry| entry.data.clone())
    }

    /// Store a result. Oversized entries are rejected as a no-op; expired
    /// entries are dropped and then the oldest entries are evicted until
    /// the newcomer fits the global ceiling, all before it is inserted.
    pub fn set(&self, key: impl Into<String>, data: &[Row], ttl_secs: Option<u64>) {
        let key = key.into();
        let byte_size = match serde_json::to_vec(data) {
            Ok(bytes) => bytes.len(),
            Err(_) => return,
        };

        // An entry no amount of eviction could fit must not drain the cache
        if byte_size > self.config.max_entry_bytes || byte_size > self.config.max_total_bytes {
            debug!(key, byte_size, "result too large to cache, skipping");
            return;
        }

        let ttl = Duration::from_secs(ttl_secs.unwrap_or(self.config.default_ttl_secs));
        let mut state = self.state.lock().expect("cache lock poisoned");
        let now = Instant::now();

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in expired {
            state.remove(&k);
        }

        // Replacing an existing key keeps one copy and refreshes its slot
        state.remove(&key);

        // Make room first so the fresh entry can never evict itself
        while state.total_bytes() + byte_size > self.config.max_total_bytes {
            match state.evict_oldest() {
                Some(evicted) => debug!(key = %evicted, "evicted oldest cache entry"),
                None => break,
            }
        }

        state.entries.insert(
            key.clone(),
            CacheEntry {
                data: data.to_vec(),
                inserted_at: now,
                ttl,
                byte_size,
            },
        );
        state.order.push_back(key);
    }

    /// Clear all entries, or only those whose key contains `pattern`
    pub fn invalidate(&self, pattern: Option<&str>) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        match pattern {
            None => {
                state.entries.clear();
                state.order.clear();
            }
            Some(pattern) => {
                let matching: Vec<String> = state
                    .entries
                    .keys()
                    .filter(|k| k.contains(pattern))
                    .cloned()
                    .collect();
                for key in matching {
                    state.remove(&key);
                }
            }
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.state.lock().expect("cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes currently cached
    pub fn total_bytes(&self) -> usize {
        self.state.lock().expect("cache lock poisoned").total_bytes()
    }
}

/// Canonical cache key for a report configuration within an organization.
///
/// Pagination is excluded so requests differing only by page/limit share
/// one cached superset. Object keys are serialized in sorted order (fixing
/// spurious misses from construction-order differences); array order stays
/// semantic, since source order and sort order affect the result. The key
/// is prefixed with the organization id so `invalidate("org-x")` can drop
/// everything for one organization.
pub fn cache_key(config: &ReportConfig, org: &OrgContext) -> EngineResult<String> {
    let mut value = serde_json::to_value(config)?;
    if let Value::Object(map) = &mut value {
        map.remove("pagination");
        map.insert(
            "organizationId".to_string(),
            Value::String(org.organization_id.clone()),
        );
    }

    // serde_json maps iterate key-sorted, so this serialization is canonical
    let canonical = serde_json::to_string(&value)?;
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(format!("{}:{:x}", org.organization_id, digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows_of_size(marker: &str, approx_bytes: usize) -> Vec<Row> {
        let mut row = Row::new();
        row.insert("id".to_string(), json!(marker));
        row.insert("pad".to_string(), json!("x".repeat(approx_bytes)));
        vec![row]
    }

    fn small_cache() -> ReportCache {
        ReportCache::new(CacheConfig {
            max_total_bytes: 1000,
            max_entry_bytes: 500,
            default_ttl_secs: 300,
        })
    }

    fn sample_config() -> ReportConfig {
        ReportConfig {
            data_sources: vec!["assets".into(), "inventory_items".into()],
            columns: vec!["assets.name".into()],
            filters: vec![],
            sorts: vec![],
            asset_types: None,
            aggregations: None,
            calculations: None,
            pagination: None,
            caching: None,
        }
    }

    #[test]
    fn test_get_miss_on_absent_key() {
        let cache = small_cache();
        assert!(cache.get("nope").is_none());
    }

    #[test]
    fn test_set_then_get() {
        let cache = small_cache();
        let data = rows_of_size("a", 50);
        cache.set("k1", &data, None);
        assert_eq!(cache.get("k1"), Some(data));
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let cache = small_cache();
        cache.set("k1", &rows_of_size("a", 50), Some(0));
        assert!(cache.get("k1").is_none());
        // Expired entry was evicted on read
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let cache = small_cache();
        cache.set("big", &rows_of_size("a", 600), None);
        assert!(cache.get("big").is_none());
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn test_eviction_oldest_first_under_pressure() {
        let cache = small_cache();
        cache.set("k1", &rows_of_size("a", 330), None);
        cache.set("k2", &rows_of_size("b", 330), None);
        cache.set("k3", &rows_of_size("c", 330), None);

        // Three ~350-byte entries exceed the 1000-byte ceiling; k1 goes
        assert!(cache.get("k1").is_none());
        assert!(cache.get("k2").is_some());
        assert!(cache.get("k3").is_some());
        assert!(cache.total_bytes() <= 1000);
    }

    #[test]
    fn test_entry_over_total_budget_never_drains_cache() {
        // Per-entry ceiling above the total ceiling: an entry that no
        // amount of eviction could fit must leave existing entries alone
        let cache = ReportCache::new(CacheConfig {
            max_total_bytes: 400,
            max_entry_bytes: 10_000,
            default_ttl_secs: 300,
        });
        cache.set("k1", &rows_of_size("a", 100), None);
        cache.set("huge", &rows_of_size("b", 600), None);

        assert!(cache.get("huge").is_none());
        assert!(cache.get("k1").is_some());
    }

    #[test]
    fn test_total_never_exceeds_ceiling_after_set() {
        let cache = small_cache();
        for i in 0..20 {
            cache.set(format!("k{}", i), &rows_of_size(&i.to_string(), 200), None);
            assert!(cache.total_bytes() <= 1000);
        }
    }

    #[test]
    fn test_replacing_key_keeps_single_copy() {
        let cache = small_cache();
        cache.set("k1", &rows_of_size("a", 100), None);
        cache.set("k1", &rows_of_size("b", 100), None);
        assert_eq!(cache.len(), 1);
        let got = cache.get("k1").unwrap();
        assert_eq!(got[0]["id"], json!("b"));
    }

    #[test]
    fn test_invalidate_all() {
        let cache = small_cache();
        cache.set("org1:a", &rows_of_size("a", 50), None);
        cache.set("org2:b", &rows_of_size("b", 50), None);
        cache.invalidate(None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_pattern() {
        let cache = small_cache();
        cache.set("org1:a", &rows_of_size("a", 50), None);
        cache.set("org1:b", &rows_of_size("b", 50), None);
        cache.set("org2:c", &rows_of_size("c", 50), None);
        cache.invalidate(Some("org1"));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("org2:c").is_some());
    }

    #[test]
    fn test_cache_key_ignores_pagination() {
        let org = OrgContext::new("org-1");
        let mut with_page = sample_config();
        with_page.pagination = Some(crate::types::PaginationConfig { page: 2, limit: 10 });

        let k1 = cache_key(&sample_config(), &org).unwrap();
        let k2 = cache_key(&with_page, &org).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_cache_key_differs_per_org() {
        let k1 = cache_key(&sample_config(), &OrgContext::new("org-1")).unwrap();
        let k2 = cache_key(&sample_config(), &OrgContext::new("org-2")).unwrap();
        assert_ne!(k1, k2);
        assert!(k1.starts_with("org-1:"));
        assert!(k2.starts_with("org-2:"));
    }

    #[test]
    fn test_cache_key_sensitive_to_source_order() {
        let mut reordered = sample_config();
        reordered.data_sources.reverse();
        let org = OrgContext::new("org-1");
        assert_ne!(
            cache_key(&sample_config(), &org).unwrap(),
            cache_key(&reordered, &org).unwrap()
        );
    }

    #[test]
    fn test_cache_key_sensitive_to_filter_order() {
        use crate::types::{FilterOperator, FilterRule};

        let filters = vec![
            FilterRule {
                field: "assets.status".into(),
                operator: FilterOperator::Equals,
                value: json!("active"),
                second_value: None,
                case_sensitive: None,
            },
            FilterRule {
                field: "assets.quantity".into(),
                operator: FilterOperator::GreaterThan,
                value: json!(5),
                second_value: None,
                case_sensitive: None,
            },
        ];

        let mut ordered = sample_config();
        ordered.filters = filters.clone();
        let mut reordered = sample_config();
        reordered.filters = filters.into_iter().rev().collect();

        let org = OrgContext::new("org-1");
        assert_ne!(
            cache_key(&ordered, &org).unwrap(),
            cache_key(&reordered, &org).unwrap()
        );
    }

    #[test]
    fn test_cache_key_deterministic() {
        let org = OrgContext::new("org-1");
        let k1 = cache_key(&sample_config(), &org).unwrap();
        let k2 = cache_key(&sample_config(), &org).unwrap();
        assert_eq!(k1, k2);
    }
}
