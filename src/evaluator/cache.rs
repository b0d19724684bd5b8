//! Compiled query cache
//!
//! Bounded map from query fingerprint (plus the UDF digest of the registry
//! it was compiled with) to a shared compiled program. When full, the
//! oldest entry is evicted.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::errors::{EvaluationError, EvaluationResult};
use super::fingerprint::fingerprint;
use super::program::CompiledQuery;
use crate::functions::FunctionRegistry;
use crate::planner::Query;

#[derive(Default)]
struct Entries {
    programs: HashMap<String, Arc<CompiledQuery>>,
    order: VecDeque<String>,
}

pub struct CompiledQueryCache {
    capacity: usize,
    entries: RwLock<Entries>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CompiledQueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(Entries::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn key(query: &Query, registry: &FunctionRegistry) -> String {
        format!("{}:{}", fingerprint(query), registry.fingerprint())
    }

    /// Returns the cached program for `query`, compiling it on a miss.
    ///
    /// The flag reports whether the program came from the cache.
    pub fn get_or_compile(
        &self,
        query: &Query,
        registry: &FunctionRegistry,
    ) -> EvaluationResult<(Arc<CompiledQuery>, bool)> {
        let key = Self::key(query, registry);
        {
            let entries = self
                .entries
                .read()
                .map_err(|_| EvaluationError::evaluation_failed("Compiled query cache lock poisoned"))?;
            if let Some(program) = entries.programs.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok((program.clone(), true));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let program = Arc::new(CompiledQuery::compile(query, registry)?);

        let mut entries = self
            .entries
            .write()
            .map_err(|_| EvaluationError::evaluation_failed("Compiled query cache lock poisoned"))?;
        if let Some(existing) = entries.programs.get(&key) {
            return Ok((existing.clone(), false));
        }
        while entries.order.len() >= self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.programs.remove(&oldest);
            }
        }
        entries.order.push_back(key.clone());
        entries.programs.insert(key, program.clone());
        Ok((program, false))
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.programs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryOptions;
    use crate::planner::prepare_job_query;
    use crate::schema::{ColumnSchema, TableSchema};
    use crate::value::ValueType;

    fn query(source: &str) -> Query {
        let schema = TableSchema::new(vec![
            ColumnSchema::new("a", ValueType::Int64).sorted(),
            ColumnSchema::new("b", ValueType::Int64),
        ])
        .unwrap();
        prepare_job_query(source, Arc::new(schema), &FunctionRegistry::builtin(), &QueryOptions::default()).unwrap()
    }

    #[test]
    fn test_hit_for_permuted_conjuncts() {
        let cache = CompiledQueryCache::new(4);
        let registry = FunctionRegistry::builtin();
        let (first, hit) = cache.get_or_compile(&query("a, b where a > 1 and b < 5"), &registry).unwrap();
        assert!(!hit);
        let (second, hit) = cache.get_or_compile(&query("a, b where b < 5 and a > 1"), &registry).unwrap();
        assert!(hit);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_eviction() {
        let cache = CompiledQueryCache::new(2);
        let registry = FunctionRegistry::builtin();
        for bound in 0..3 {
            cache
                .get_or_compile(&query(&format!("a where a > {}", bound)), &registry)
                .unwrap();
        }
        assert_eq!(cache.len(), 2);
        let (_, hit) = cache.get_or_compile(&query("a where a > 0"), &registry).unwrap();
        assert!(!hit);
    }
}
