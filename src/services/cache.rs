// Content-addressed result caching.
//
// Signatures are deterministic addresses derived from a class tag and
// identifying key material; invalidation purges whole class namespaces
// because individual result signatures cannot be enumerated in advance.
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::registry::AncestryResolver;
use crate::services::adapter::CacheStore;

/// Reserved class tag for results that resolve to no entity class.
pub const UNTYPED_RESULT_TAG: &str = "__sqlResult";

/// A deterministic cache address: class tag plus content hash.
///
/// Signatures travel as structured data; the rendered `"tag/hash"` form is
/// only ever produced for the external store, never parsed back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheSignature {
    class_tag: String,
    hash: String,
}

impl CacheSignature {
    pub fn new(class_tag: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            class_tag: class_tag.into(),
            hash: hash.into(),
        }
    }

    pub fn class_tag(&self) -> &str {
        &self.class_tag
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Display for CacheSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class_tag, self.hash)
    }
}

/// Identifying key material a signature is computed from.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyMaterial {
    /// Primary-key tuple of an identified entity.
    PrimaryKey(Vec<Value>),
    /// Normalized SQL text and ordered bound parameters of a query.
    Query { sql: String, bindings: Vec<Value> },
}

impl KeyMaterial {
    fn canonical(&self) -> Value {
        match self {
            KeyMaterial::PrimaryKey(values) => Value::Array(values.clone()),
            KeyMaterial::Query { sql, bindings } => Value::Array(vec![
                Value::String(sql.clone()),
                Value::Array(bindings.clone()),
            ]),
        }
    }
}

/// Rebuild a JSON value with object keys in sorted order so logically
/// identical key material always serializes identically regardless of
/// construction order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by_key(|(k, _)| k.as_str());
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Compute the signature for key material under a class tag.
///
/// Pure and infallible. Tag priority: explicit tag, else the reserved
/// untyped-result tag; callers resolving a query pass the statement's
/// table-owning class as the explicit tag.
pub fn signature_for(key: &KeyMaterial, class_tag: Option<&str>) -> CacheSignature {
    let tag = class_tag
        .filter(|t| !t.is_empty())
        .unwrap_or(UNTYPED_RESULT_TAG);
    let canonical = canonicalize(&key.canonical());
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    CacheSignature::new(tag, hex::encode(hasher.finalize()))
}

/// Per-operation caching directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Bypass the cache entirely.
    Skip,
    /// Cache with the configured default TTL.
    Default,
    /// Cache with an explicit TTL in seconds.
    Ttl(u64),
}

impl CachePolicy {
    pub fn eligible(self) -> bool {
        self != CachePolicy::Skip
    }
}

/// The caching layer composed into the facade.
///
/// Caching is never a correctness dependency: a missing store, a disabled
/// flag, or any store failure degrades to the primary data source.
pub struct CacheEngine {
    store: Option<Arc<dyn CacheStore>>,
    enabled: bool,
    /// Logical partition + namespace prefix folded into every store address.
    key: String,
    prefix: String,
    default_ttl_secs: u64,
}

impl CacheEngine {
    pub fn new(store: Option<Arc<dyn CacheStore>>, config: &CacheConfig) -> Self {
        Self {
            store,
            enabled: config.enabled,
            key: config.key.clone(),
            prefix: config.prefix.clone(),
            default_ttl_secs: config.expiry_secs,
        }
    }

    /// An engine that never caches; useful when no store is wired up.
    pub fn disabled() -> Self {
        Self {
            store: None,
            enabled: false,
            key: String::new(),
            prefix: String::new(),
            default_ttl_secs: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.store.is_some()
    }

    /// Store-facing namespace for a class tag.
    fn namespace(&self, class_tag: &str) -> String {
        format!("{}/{}{}", self.key, self.prefix, class_tag)
    }

    /// Qualify a signature with the configured partition and prefix.
    fn qualified(&self, signature: &CacheSignature) -> CacheSignature {
        CacheSignature::new(self.namespace(signature.class_tag()), signature.hash())
    }

    pub fn fetch(&self, signature: &CacheSignature, policy: CachePolicy) -> Option<Value> {
        if !self.is_enabled() || !policy.eligible() {
            return None;
        }
        let store = self.store.as_ref()?;
        match store.get(&self.qualified(signature)) {
            Some(payload) => {
                tracing::debug!("cache hit for signature {}", signature);
                Some(payload)
            }
            None => {
                tracing::debug!("cache miss for signature {}", signature);
                None
            }
        }
    }

    pub fn store(&self, signature: &CacheSignature, payload: &Value, policy: CachePolicy) -> bool {
        if !self.is_enabled() || !policy.eligible() {
            return false;
        }
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        let ttl_secs = match policy {
            CachePolicy::Skip => return false,
            CachePolicy::Default => self.default_ttl_secs,
            CachePolicy::Ttl(secs) => secs,
        };
        let ttl = (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs));
        let stored = store.set(&self.qualified(signature), payload, ttl);
        if !stored {
            tracing::warn!("could not cache result with signature {}", signature);
        }
        stored
    }

    /// Purge every class namespace a write to `class_name` can affect.
    pub fn invalidate(&self, resolver: &AncestryResolver<'_>, class_name: &str) {
        if !self.is_enabled() {
            return;
        }
        let Some(store) = self.store.as_ref() else {
            return;
        };
        for class in invalidation_graph(resolver, class_name) {
            let purged = store.delete_namespace(&self.namespace(&class));
            tracing::debug!(
                "purged cache namespace {}: {}",
                class,
                if purged { "ok" } else { "failed" }
            );
        }
    }
}

/// Classes whose cached results a write to `class_name` can invalidate:
/// the table-owning class plus the targets of its directly declared
/// aggregate and composite relations. One hop only, not transitive.
pub fn invalidation_graph(resolver: &AncestryResolver<'_>, class_name: &str) -> Vec<String> {
    let mut graph = Vec::new();
    let owner = resolver
        .table_class(class_name)
        .unwrap_or_else(|| class_name.to_string());
    graph.push(owner);
    for relation in resolver.aggregates(class_name).values() {
        if !graph.contains(&relation.class) {
            graph.push(relation.class.clone());
        }
    }
    for relation in resolver.composites(class_name).values() {
        if !graph.contains(&relation.class) {
            graph.push(relation.class.clone());
        }
    }
    graph
}
