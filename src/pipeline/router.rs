//! Entity key routing
//!
//! Every record maps to exactly one key, and every key to exactly one worker
//! partition. The partition hash is FNV-1a so assignments are stable across
//! processes and compiler versions.

use super::types::DomainRecord;
use fnv::FnvHasher;
use std::hash::Hasher;

#[derive(Debug, Clone, Copy)]
pub struct KeyRouter {
    partitions: usize,
}

impl KeyRouter {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
        }
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Entity key scoping all state for `record`
    pub fn route<'a>(&self, record: &'a DomainRecord) -> &'a str {
        &record.entity_key
    }

    /// Worker partition owning `entity_key`
    pub fn partition(&self, entity_key: &str) -> usize {
        let mut hasher = FnvHasher::default();
        hasher.write(entity_key.as_bytes());
        (hasher.finish() % self.partitions as u64) as usize
    }

    pub fn partition_of(&self, record: &DomainRecord) -> usize {
        self.partition(self.route(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_route_is_entity_key() {
        let router = KeyRouter::new(4);
        let record = DomainRecord::new("TSLA", Utc::now());

        assert_eq!(router.route(&record), "TSLA");
    }

    #[test]
    fn test_partition_is_deterministic_and_bounded() {
        let router = KeyRouter::new(4);

        for key in ["AAPL", "MSFT", "GOOGL", "AMZN", "TSLA", "NVDA", "META", "NFLX"] {
            let first = router.partition(key);
            assert!(first < 4);
            assert_eq!(first, router.partition(key));
            assert_eq!(first, KeyRouter::new(4).partition(key));
        }
    }

    #[test]
    fn test_single_partition() {
        let router = KeyRouter::new(0);

        assert_eq!(router.partitions(), 1);
        assert_eq!(router.partition("anything"), 0);
    }

    #[test]
    fn test_keys_spread_over_partitions() {
        let router = KeyRouter::new(4);
        let used: std::collections::HashSet<usize> =
            (0..64).map(|i| router.partition(&format!("sensor-{}", i))).collect();

        assert!(used.len() > 1);
    }
}
