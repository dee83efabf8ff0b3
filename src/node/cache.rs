//! Persisted node cache blob.
//!
//! Querying a node at startup costs several radio round-trips (and a
//! battery-operated node may not even be awake), so everything `load`
//! discovers is serialised into an opaque blob the caller can stash on
//! disk and hand back next session. The blob carries a schema version;
//! a mismatch just means a full re-query.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Current cache schema version.
pub const SCHEMA_VERSION: &str = "1";

/// Snapshot of the node state captured by `load`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCache {
    pub schema_version: String,
    pub node_id: u8,
    pub listening: bool,
    pub basic_class: u8,
    pub generic_class: u8,
    pub specific_class: u8,
    pub command_classes: Vec<u8>,
    pub control_command_classes: Vec<u8>,
    pub manufacturer_id: u16,
    pub product_type: u16,
    pub product_id: u16,
}

impl NodeCache {
    /// Serialises the cache into its on-disk form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Cache {
            message: e.to_string(),
        })
    }

    /// Parses a cache blob, checking the schema version and owning node.
    pub fn from_bytes(blob: &[u8], node_id: u8) -> Result<Self> {
        let cache: Self = serde_json::from_slice(blob).map_err(|e| Error::Cache {
            message: e.to_string(),
        })?;

        if cache.schema_version != SCHEMA_VERSION {
            return Err(Error::Cache {
                message: format!("unsupported schema version: {}", cache.schema_version),
            });
        }
        if cache.node_id != node_id {
            return Err(Error::Cache {
                message: format!("cache is for node {}, not {node_id}", cache.node_id),
            });
        }

        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NodeCache {
        NodeCache {
            schema_version: SCHEMA_VERSION.to_owned(),
            node_id: 5,
            listening: true,
            basic_class: 0x04,
            generic_class: 0x10,
            specific_class: 0x01,
            command_classes: vec![0x25, 0x27, 0x72, 0x86],
            control_command_classes: vec![0x20],
            manufacturer_id: 0x0086,
            product_type: 0x0003,
            product_id: 0x000B,
        }
    }

    #[test]
    fn test_round_trip() {
        let cache = sample();
        let blob = cache.to_bytes().unwrap();
        let parsed = NodeCache::from_bytes(&blob, 5).unwrap();
        assert_eq!(parsed, cache);
    }

    #[test]
    fn test_rejects_wrong_schema_version() {
        let mut cache = sample();
        cache.schema_version = "0".to_owned();
        let blob = cache.to_bytes().unwrap();
        assert!(matches!(
            NodeCache::from_bytes(&blob, 5),
            Err(Error::Cache { .. })
        ));
    }

    #[test]
    fn test_rejects_wrong_node() {
        let blob = sample().to_bytes().unwrap();
        assert!(matches!(
            NodeCache::from_bytes(&blob, 6),
            Err(Error::Cache { .. })
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(NodeCache::from_bytes(b"not json", 5).is_err());
    }
}
