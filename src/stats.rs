//! Component G: the aggregated statistics surface.
//!
//! `{delimiterCache, fastPath, plugins}` per §4.G. The individual counters
//! live on their owning components ([`crate::delimiter_cache::DelimiterCache`],
//! [`crate::fast_path::FastPathEngine`], [`crate::plugin::PluginManager`]);
//! this module only aggregates read-only snapshots and supplies the
//! `reset()` convenience named in SPEC_FULL.md §B.

use crate::delimiter_cache::{DelimiterCache, DelimiterCacheStats};
use crate::fast_path::{FastPathEngine, FastPathStats};
use crate::plugin::{PluginManager, PluginStats};

/// Read-only snapshot of every component's counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub delimiter_cache: DelimiterCacheStats,
    pub fast_path: FastPathStats,
    pub plugins: PluginStats,
}

/// Borrows the three long-lived components and produces snapshots or full
/// resets on demand. Hosts that keep a single engine/cache/manager alive
/// for the process lifetime (the terminal UI, the web demo) can hold one
/// of these alongside them.
pub struct StatsHandle<'a> {
    pub delimiter_cache: &'a mut DelimiterCache,
    pub fast_path: &'a mut FastPathEngine,
    pub plugins: &'a mut PluginManager,
}

impl<'a> StatsHandle<'a> {
    pub fn new(
        delimiter_cache: &'a mut DelimiterCache,
        fast_path: &'a mut FastPathEngine,
        plugins: &'a mut PluginManager,
    ) -> Self {
        Self {
            delimiter_cache,
            fast_path,
            plugins,
        }
    }

    pub fn snapshot(&self) -> Stats {
        Stats {
            delimiter_cache: self.delimiter_cache.get_stats(),
            fast_path: self.fast_path.get_stats(),
            plugins: self.plugins.get_stats(),
        }
    }

    /// Zeroes every counter across all three components. The delimiter and
    /// parser caches are also cleared, matching each component's own
    /// `reset`/`clear` contract; the plugin registry itself is left intact
    /// (`reset` zeroes counters, it does not unregister plugins).
    pub fn reset(&mut self) {
        self.delimiter_cache.clear();
        self.fast_path.reset();
        self.plugins.clear_counters();
    }
}
