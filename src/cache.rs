use anyhow::Result;
use indexmap::map::Entry;
use indexmap::IndexMap;
use tracing::debug;

/// Composite cache key: schema, query and an optional lookup field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub schema: String,
    pub query: String,
    pub lookup_field: Option<String>,
}

impl QueryKey {
    pub fn new(schema: impl Into<String>, query: impl Into<String>) -> Self {
        Self { schema: schema.into(), query: query.into(), lookup_field: None }
    }

    pub fn with_lookup(mut self, field: impl Into<String>) -> Self {
        self.lookup_field = Some(field.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Pull-through cache of query details (column metadata, lookups).
///
/// Entries only leave through explicit invalidation.
#[derive(Debug, Clone)]
pub struct QueryDetailsCache<V> {
    entries: IndexMap<QueryKey, V>,
    stats: CacheStats,
}

impl<V> Default for QueryDetailsCache<V> {
    fn default() -> Self {
        Self { entries: IndexMap::new(), stats: CacheStats::default() }
    }
}

impl<V> QueryDetailsCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &QueryKey) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: QueryKey, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    /// Return the cached value, loading and storing it on a miss.
    /// A failed load leaves the cache untouched.
    pub fn get_or_load<F>(&mut self, key: QueryKey, loader: F) -> Result<&V>
    where
        F: FnOnce(&QueryKey) -> Result<V>,
    {
        match self.entries.entry(key) {
            Entry::Occupied(entry) => {
                self.stats.hits += 1;
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => {
                debug!(schema = %entry.key().schema, query = %entry.key().query, "query details cache miss");
                let value = loader(entry.key())?;
                self.stats.misses += 1;
                Ok(entry.insert(value))
            }
        }
    }

    pub fn invalidate(&mut self, key: &QueryKey) -> bool {
        self.entries.shift_remove(key).is_some()
    }

    /// Drop every entry of a schema; returns how many were removed
    pub fn invalidate_schema(&mut self, schema: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.schema != schema);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn make_cache() -> QueryDetailsCache<Vec<String>> {
        let mut cache = QueryDetailsCache::new();
        cache.insert(QueryKey::new("study", "Physical"), vec!["Weight".to_string()]);
        cache.insert(QueryKey::new("study", "Lab").with_lookup("Analyte"), vec!["Result".to_string()]);
        cache.insert(QueryKey::new("lists", "Cohorts"), vec!["Label".to_string()]);
        cache
    }

    #[test]
    fn test_get_or_load_pulls_through_once() {
        let mut cache = QueryDetailsCache::new();
        let mut calls = 0;
        for _ in 0..2 {
            let value = cache
                .get_or_load(QueryKey::new("study", "Physical"), |key| {
                    calls += 1;
                    Ok(format!("{}.{}", key.schema, key.query))
                })
                .unwrap();
            assert_eq!(value, "study.Physical");
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn test_failed_load_is_not_cached() {
        let mut cache: QueryDetailsCache<String> = QueryDetailsCache::new();
        let key = QueryKey::new("study", "Missing");
        assert!(cache.get_or_load(key.clone(), |_| Err(anyhow!("Query not found"))).is_err());
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lookup_field_is_part_of_the_key() {
        let cache = make_cache();
        assert!(cache.get(&QueryKey::new("study", "Lab")).is_none());
        assert!(cache.get(&QueryKey::new("study", "Lab").with_lookup("Analyte")).is_some());
    }

    #[test]
    fn test_invalidation() {
        let mut cache = make_cache();
        assert!(cache.invalidate(&QueryKey::new("lists", "Cohorts")));
        assert!(!cache.invalidate(&QueryKey::new("lists", "Cohorts")));
        assert_eq!(cache.invalidate_schema("study"), 2);
        assert!(cache.is_empty());

        let mut cache = make_cache();
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
