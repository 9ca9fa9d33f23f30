use crate::model::{ComponentDefinition, Id, SchemaDocument};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Root document plus component definitions of one service
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSchema {
    pub document: SchemaDocument,
    pub components: Vec<ComponentDefinition>,
}

/// Cache port for per-service schema data, keyed by service id
pub trait SchemaCache: Send + Sync {
    fn get(&self, service_id: &Id) -> Option<CachedSchema>;
    fn put(&self, service_id: &Id, schema: CachedSchema);
    fn invalidate(&self, service_id: &Id);
}

/// Cache entry for a service schema
#[derive(Clone, Debug)]
struct CacheEntry {
    schema: CachedSchema,
    last_accessed: Instant,
}

/// In-memory schema cache with TTL
#[derive(Debug)]
pub struct InMemorySchemaCache {
    /// Cache entries keyed by service ID
    entries: RwLock<HashMap<Id, CacheEntry>>,
    /// Time-to-live for cache entries
    ttl: Duration,
}

impl InMemorySchemaCache {
    /// Create a new cache with 1-hour TTL
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(3600))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all expired entries from cache
    pub fn clear_expired(&self) {
        let mut entries = self.entries.write();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.last_accessed.elapsed() <= ttl);
    }

    /// Clear the entire cache
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for InMemorySchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaCache for InMemorySchemaCache {
    /// Get a schema from cache if present and not expired
    fn get(&self, service_id: &Id) -> Option<CachedSchema> {
        let mut entries = self.entries.write();

        let entry = entries.get_mut(service_id)?;
        // Check if entry has expired
        if entry.last_accessed.elapsed() > self.ttl {
            entries.remove(service_id);
            return None;
        }

        // Update access time
        entry.last_accessed = Instant::now();
        Some(entry.schema.clone())
    }

    fn put(&self, service_id: &Id, schema: CachedSchema) {
        self.entries.write().insert(
            service_id.clone(),
            CacheEntry {
                schema,
                last_accessed: Instant::now(),
            },
        );
    }

    fn invalidate(&self, service_id: &Id) {
        self.entries.write().remove(service_id);
    }
}

/// Cache that never holds anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSchemaCache;

impl SchemaCache for NoopSchemaCache {
    fn get(&self, _service_id: &Id) -> Option<CachedSchema> {
        None
    }

    fn put(&self, _service_id: &Id, _schema: CachedSchema) {}

    fn invalidate(&self, _service_id: &Id) {}
}
