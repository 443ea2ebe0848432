//! Typed request payloads for the QMS endpoints.
//!
//! Requests are ephemeral: built per call, serialized, and discarded.
//! Key selection is a strategy injected per scenario so deterministic
//! functional runs and randomized stress runs share the same builders.

use rand::Rng;
use serde::Serialize;

use crate::config::KeyPool;

/// Identifies a logical quota bucket on the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaKey {
    pub namespace: String,
    pub resource: String,
}

impl QuotaKey {
    /// A key from the provisioned pools: `namespace{ns}/resource{res}`.
    pub fn numbered(ns: u32, res: u32) -> Self {
        Self {
            namespace: format!("namespace{ns}"),
            resource: format!("resource{res}"),
        }
    }

    /// The `unknown/unknown` sentinel for not-found probes.
    pub fn unknown() -> Self {
        Self {
            namespace: "unknown".to_string(),
            resource: "unknown".to_string(),
        }
    }
}

/// Key-selection strategy for a scenario.
///
/// `Fixed` always yields the same key (deterministic functional tests);
/// `UniformPool` draws uniformly from a bounded pool so stress load is
/// spread across buckets instead of hammering a single key.
#[derive(Debug, Clone)]
pub enum KeySelector {
    Fixed(QuotaKey),
    UniformPool(KeyPool),
}

impl KeySelector {
    /// Build the selector implied by a key pool: a 1x1 pool is the fixed
    /// `namespace1/resource1` key, anything larger is uniform-random.
    pub fn from_pool(pool: KeyPool) -> Self {
        if pool.namespaces <= 1 && pool.resources <= 1 {
            Self::Fixed(QuotaKey::numbered(1, 1))
        } else {
            Self::UniformPool(pool)
        }
    }

    /// Pick the next key.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> QuotaKey {
        match self {
            Self::Fixed(key) => key.clone(),
            Self::UniformPool(pool) => QuotaKey::numbered(
                rng.random_range(1..=pool.namespaces),
                rng.random_range(1..=pool.resources),
            ),
        }
    }
}

/// Body of a `POST /api/v1/allow` call.
#[derive(Debug, Clone, Serialize)]
pub struct AllowRequest {
    pub namespace: String,
    pub resource: String,
    pub tokens: u64,
}

impl AllowRequest {
    /// Build an allow request; tokens default to 1.
    pub fn new(key: QuotaKey) -> Self {
        Self::with_tokens(key, 1)
    }

    pub fn with_tokens(key: QuotaKey, tokens: u64) -> Self {
        Self {
            namespace: key.namespace,
            resource: key.resource,
            tokens,
        }
    }
}

/// Body of a `POST /api/v1/alloc` or `POST /api/v1/free` call.
///
/// The `version` field carries the optimistic-concurrency counter. The
/// harness always sends `0` (first-touch); a mismatch comes back as the
/// ordinary not-found/conflict branch, not a harness failure.
#[derive(Debug, Clone, Serialize)]
pub struct AllocRequest {
    pub namespace: String,
    pub resource: String,
    pub tokens: u64,
    pub version: u64,
}

impl AllocRequest {
    pub fn new(key: QuotaKey) -> Self {
        Self::with_tokens(key, 1)
    }

    pub fn with_tokens(key: QuotaKey, tokens: u64) -> Self {
        Self {
            namespace: key.namespace,
            resource: key.resource,
            tokens,
            version: 0,
        }
    }
}

/// `free` shares the alloc wire shape.
pub type FreeRequest = AllocRequest;

/// Body of a `POST /api/v1/view` call. Read-only; no tokens or version.
#[derive(Debug, Clone, Serialize)]
pub struct ViewRequest {
    pub namespace: String,
    pub resource: String,
}

impl ViewRequest {
    pub fn new(key: QuotaKey) -> Self {
        Self {
            namespace: key.namespace,
            resource: key.resource,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_numbered_key() {
        let key = QuotaKey::numbered(2, 7);
        assert_eq!(key.namespace, "namespace2");
        assert_eq!(key.resource, "resource7");
    }

    #[test]
    fn test_unknown_key() {
        let key = QuotaKey::unknown();
        assert_eq!(key.namespace, "unknown");
        assert_eq!(key.resource, "unknown");
    }

    #[test]
    fn test_fixed_selector_from_unit_pool() {
        let selector = KeySelector::from_pool(KeyPool::fixed());
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        for _ in 0..10 {
            assert_eq!(selector.pick(&mut rng), QuotaKey::numbered(1, 1));
        }
    }

    #[test]
    fn test_uniform_selector_stays_in_pool() {
        let selector = KeySelector::from_pool(KeyPool {
            namespaces: 3,
            resources: 10,
        });
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let key = selector.pick(&mut rng);
            let ns: u32 = key.namespace.strip_prefix("namespace").unwrap().parse().unwrap();
            let res: u32 = key.resource.strip_prefix("resource").unwrap().parse().unwrap();
            assert!((1..=3).contains(&ns), "namespace out of pool: {}", key.namespace);
            assert!((1..=10).contains(&res), "resource out of pool: {}", key.resource);
        }
    }

    #[test]
    fn test_uniform_selector_spreads_load() {
        let selector = KeySelector::from_pool(KeyPool {
            namespaces: 3,
            resources: 10,
        });
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let distinct: std::collections::HashSet<_> = (0..300)
            .map(|_| {
                let k = selector.pick(&mut rng);
                (k.namespace, k.resource)
            })
            .collect();
        assert!(
            distinct.len() > 10,
            "expected load spread across buckets, got {} distinct keys",
            distinct.len()
        );
    }

    #[test]
    fn test_allow_request_defaults_to_one_token() {
        let req = AllowRequest::new(QuotaKey::numbered(1, 1));
        assert_eq!(req.tokens, 1);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"namespace": "namespace1", "resource": "resource1", "tokens": 1})
        );
    }

    #[test]
    fn test_alloc_request_always_sends_version_zero() {
        let req = AllocRequest::new(QuotaKey::numbered(1, 3));
        assert_eq!(req.version, 0);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["version"], 0);
        assert_eq!(json["tokens"], 1);
    }

    #[test]
    fn test_view_request_has_no_tokens_or_version() {
        let req = ViewRequest::new(QuotaKey::numbered(1, 1));
        let json = serde_json::to_value(&req).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert!(obj.contains_key("namespace"));
        assert!(obj.contains_key("resource"));
    }
}
