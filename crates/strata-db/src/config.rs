//! Database configuration parameters.

use serde::{Deserialize, Serialize};
use strata_ecs::StoreConfig;

/// Configuration for a [`ReconcilingDatabase`](crate::ReconcilingDatabase).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Initial capacities of the underlying store.
    pub store: StoreConfig,

    /// Compare each replayed entry's redo log with the log recorded when it
    /// first ran, and warn on any difference.
    ///
    /// Replay relies on transaction functions being deterministic; this
    /// makes violations visible. Default: false.
    pub verify_replay: bool,
}

impl DatabaseConfig {
    /// Parse a JSON config; absent fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_store_config() {
        let config = DatabaseConfig::from_json(
            r#"{ "verifyReplay": true, "store": { "locationCapacity": 64 } }"#,
        )
        .unwrap();
        assert!(config.verify_replay);
        assert_eq!(config.store.location_capacity, 64);
        assert_eq!(config.store.initial_capacity, 16);

        assert_eq!(DatabaseConfig::from_json("{}").unwrap(), DatabaseConfig::default());
    }
}
