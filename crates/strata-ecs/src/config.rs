//! Store configuration parameters.

use serde::{Deserialize, Serialize};
use strata_buffer::DEFAULT_CAPACITY;

/// Configuration for a [`Store`](crate::Store).
///
/// Both capacities double on exhaustion, so they only set the starting size.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// Row slots allocated when an archetype is created.
    ///
    /// Default: 16.
    pub initial_capacity: usize,

    /// Slots allocated in each entity location table.
    ///
    /// Default: 16.
    pub location_capacity: usize,
}

impl StoreConfig {
    /// Parse a JSON config; absent fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_CAPACITY,
            location_capacity: DEFAULT_CAPACITY,
        }
    }
}
