//! Tuning knobs for the persistent tables.
//!
//! Defaults suit the small per-graph tables of a netlist. `from_env` lets a
//! pass driver resize them without recompiling:
//! - `LGDB_INITIAL_CAPACITY`: slots allocated by a fresh table (default 1024)
//! - `LGDB_MAX_LOAD_FACTOR`: occupancy that triggers a rehash (default 0.75)
//! - `LGDB_TEXT_INITIAL_BYTES`: initial text segment size (default 4096)

use serde::{Deserialize, Serialize};

/// Smallest capacity a table is ever created with.
pub const MIN_CAPACITY: usize = 16;

/// Configuration shared by every table opened through the same owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Slot count of a freshly created (or recreated) table. Rounded up to a
    /// power of two, never below [`MIN_CAPACITY`].
    pub initial_capacity: usize,
    /// Fraction of occupied slots (live + tombstones) above which the table
    /// rehashes. Clamped to `0.1..=0.95`.
    pub max_load_factor: f64,
    /// Initial data size of a text segment in bytes.
    pub text_initial_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            initial_capacity: 1024,
            max_load_factor: 0.75,
            text_initial_bytes: 4096,
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by the `LGDB_*` environment variables.
    /// Values that fail to parse are ignored.
    pub fn from_env() -> Self {
        let mut config = StoreConfig::default();
        if let Some(v) = env_parse::<usize>("LGDB_INITIAL_CAPACITY") {
            config.initial_capacity = v;
        }
        if let Some(v) = env_parse::<f64>("LGDB_MAX_LOAD_FACTOR") {
            config.max_load_factor = v;
        }
        if let Some(v) = env_parse::<usize>("LGDB_TEXT_INITIAL_BYTES") {
            config.text_initial_bytes = v;
        }
        config
    }

    /// Initial capacity after rounding.
    pub fn slot_capacity(&self) -> usize {
        self.initial_capacity.max(MIN_CAPACITY).next_power_of_two()
    }

    /// Load factor after clamping.
    pub fn load_factor(&self) -> f64 {
        if self.max_load_factor.is_nan() {
            return StoreConfig::default().max_load_factor;
        }
        self.max_load_factor.clamp(0.1, 0.95)
    }

    /// Maximum number of occupied slots a table of `capacity` slots may hold.
    pub(crate) fn occupancy_limit(&self, capacity: usize) -> usize {
        ((capacity as f64) * self.load_factor()) as usize
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}
