//! Component A: delimiter auto-detection with an LRU memoization layer.
//!
//! Grounded on the LRU usage in `xsv`'s `partition` command (capped
//! `lru::LruCache` keyed by a derived fingerprint); the detection algorithm
//! itself follows spec §4.A's single-pass scan with a stable tie-break.

use std::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::options::DEFAULT_DELIMITER;

/// Default LRU capacity for the delimiter cache (spec §4.A: "capacity `M`
/// (default 100)").
pub const DEFAULT_CAPACITY: usize = 100;

/// `{hits, misses, evictions, size, hitRate}` surface from §4.A/§4.G.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DelimiterCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

impl DelimiterCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// `(fingerprint, candidates)` cache key. The fingerprint is a 32-bit hash
/// of the first 1,000 characters of the sample, per §3's Delimiter Cache
/// Entry definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    fingerprint: u32,
    candidates: Vec<char>,
}

fn fingerprint(sample: &str) -> u32 {
    let truncated: String = sample.chars().take(1_000).collect();
    let mut hasher = DefaultHasher::new();
    truncated.hash(&mut hasher);
    (hasher.finish() & 0xFFFF_FFFF) as u32
}

/// LRU-memoized delimiter detector. The identity-keyed weak-mapping layer
/// named in §4.A has no Rust analogue (no object identity for owned
/// strings) and is intentionally not implemented; see DESIGN.md.
pub struct DelimiterCache {
    capacity: NonZeroUsize,
    entries: LruCache<CacheKey, char>,
    stats: DelimiterCacheStats,
}

impl DelimiterCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            capacity,
            entries: LruCache::new(capacity),
            stats: DelimiterCacheStats::default(),
        }
    }

    /// Detects the delimiter for `sample` among `candidates`, consulting
    /// the LRU cache first when `use_cache` is true.
    pub fn detect(&mut self, sample: &str, candidates: &[char], use_cache: bool) -> char {
        self.get_or_detect(sample, candidates, use_cache, || {
            detect_uncached(sample, candidates)
        })
    }

    /// Consults the cache using `sample`/`candidates` as the key, falling
    /// back to `compute` on a miss (or when `use_cache` is false). Lets
    /// callers plug in their own detection algorithm — e.g. the fast-path
    /// engine's variance-scored classifier — while still sharing this
    /// cache's memoization and hit/miss/eviction counters.
    pub fn get_or_detect(
        &mut self,
        sample: &str,
        candidates: &[char],
        use_cache: bool,
        compute: impl FnOnce() -> char,
    ) -> char {
        if !use_cache {
            return compute();
        }
        let key = CacheKey {
            fingerprint: fingerprint(sample),
            candidates: candidates.to_vec(),
        };
        if let Some(delimiter) = self.entries.get(&key) {
            self.stats.hits += 1;
            log::debug!("delimiter cache hit for fingerprint {}", key.fingerprint);
            return *delimiter;
        }
        self.stats.misses += 1;
        let delimiter = compute();
        if self.entries.len() == self.capacity.get() && !self.entries.contains(&key) {
            self.stats.evictions += 1;
        }
        self.entries.put(key, delimiter);
        self.stats.size = self.entries.len();
        delimiter
    }

    pub fn get_stats(&self) -> DelimiterCacheStats {
        let mut stats = self.stats;
        stats.size = self.entries.len();
        stats
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.stats = DelimiterCacheStats::default();
    }
}

impl Default for DelimiterCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Pure detection, no cache involved. Scans the first non-empty logical
/// line and returns the candidate with the strict maximum occurrence
/// count, tie-breaking to `;` per §4.A.
pub fn detect_uncached(sample: &str, candidates: &[char]) -> char {
    let first_line = sample.lines().find(|line| !line.trim().is_empty());
    let Some(line) = first_line else {
        return DEFAULT_DELIMITER;
    };

    let mut best = DEFAULT_DELIMITER;
    let mut best_count = 0usize;
    let mut tied = false;
    for &candidate in candidates {
        let count = line.chars().filter(|&c| c == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
            tied = false;
        } else if count == best_count && count > 0 {
            tied = true;
        }
    }
    if best_count == 0 || tied {
        DEFAULT_DELIMITER
    } else {
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_strict_maximum_candidate() {
        assert_eq!(detect_uncached("a;b,c;d", &[',', ';']), ';');
        assert_eq!(detect_uncached("a,b,c", &[',', ';']), ',');
    }

    #[test]
    fn ties_and_empty_input_fall_back_to_semicolon() {
        assert_eq!(detect_uncached("a,b;c", &[',', ';']), ';');
        assert_eq!(detect_uncached("", &[',', ';']), ';');
        assert_eq!(detect_uncached("   \n  ", &[',', ';']), ';');
    }

    #[test]
    fn repeated_lookup_with_identical_key_is_a_cache_hit() {
        let mut cache = DelimiterCache::new(DEFAULT_CAPACITY);
        let candidates = [',', ';'];
        assert_eq!(cache.detect("a;b\n1;2", &candidates, true), ';');
        assert_eq!(cache.get_stats().misses, 1);
        assert_eq!(cache.detect("a;b\n1;2", &candidates, true), ';');
        let stats = cache.get_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn eviction_count_equals_inserts_beyond_capacity() {
        crate::init_test_logging();
        let mut cache = DelimiterCache::new(2);
        let candidates = [',', ';'];
        cache.detect("a,b1", &candidates, true);
        cache.detect("a,b2", &candidates, true);
        cache.detect("a,b3", &candidates, true);
        cache.detect("a,b4", &candidates, true);
        assert_eq!(cache.get_stats().evictions, 2);
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn disabling_cache_never_populates_it() {
        let mut cache = DelimiterCache::new(DEFAULT_CAPACITY);
        cache.detect("a,b", &[',', ';'], false);
        assert_eq!(cache.size(), 0);
    }
}
