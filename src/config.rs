//! Process-wide configuration for a map type's write state.
//!
//! Mirrors the shape of a production state-engine handle: values that are
//! "process-wide" per §9's Design Notes (never read from a global
//! singleton) but deserializable from the caller's own config file via
//! `serde`, the way the corpus wires CLI/config surfaces.

use serde::{Deserialize, Serialize};

use crate::error::WriteError;

/// Tuning knobs the embedding state engine supplies at construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Byte budget the shard sizer keeps each shard under (§4.1).
    pub target_max_shard_bytes: u64,
    /// Load factor used to derive `hashTableSize` (§4.2). Must be in
    /// `(0.0, 1.0)` -- this is what guarantees every map's bucket array has
    /// at least one empty slot.
    pub load_factor: f64,
    /// When `Some`, `numShards` never changes regardless of `can_reshard`
    /// passed to `prepare_for_write` -- the caller has frozen the shard
    /// count (e.g. to match a previously published delta chain).
    pub pinned_num_shards: Option<u32>,
}

impl WriterConfig {
    pub fn new(target_max_shard_bytes: u64, load_factor: f64) -> crate::error::Result<Self> {
        let config = Self {
            target_max_shard_bytes,
            load_factor,
            pinned_num_shards: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_pinned_shards(mut self, num_shards: u32) -> crate::error::Result<Self> {
        if !num_shards.is_power_of_two() {
            return Err(WriteError::InvalidConfig(format!(
                "pinned shard count {num_shards} is not a power of two"
            )));
        }
        self.pinned_num_shards = Some(num_shards);
        Ok(self)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.target_max_shard_bytes == 0 {
            return Err(WriteError::InvalidConfig(
                "target_max_shard_bytes must be nonzero".to_string(),
            ));
        }
        if !(self.load_factor > 0.0 && self.load_factor < 1.0) {
            return Err(WriteError::InvalidConfig(format!(
                "load_factor must be in (0.0, 1.0), got {}",
                self.load_factor
            )));
        }
        if let Some(n) = self.pinned_num_shards {
            if !n.is_power_of_two() {
                return Err(WriteError::InvalidConfig(format!(
                    "pinned shard count {n} is not a power of two"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_load_factor() {
        assert!(WriterConfig::new(1 << 20, 1.0).is_err());
        assert!(WriterConfig::new(1 << 20, 0.0).is_err());
        assert!(WriterConfig::new(1 << 20, 0.75).is_ok());
    }

    #[test]
    fn rejects_zero_byte_budget() {
        assert!(WriterConfig::new(0, 0.75).is_err());
    }

    #[test]
    fn rejects_non_power_of_two_pin() {
        let config = WriterConfig::new(1 << 20, 0.75).unwrap();
        assert!(config.with_pinned_shards(3).is_err());
        assert!(config.with_pinned_shards(4).is_ok());
    }

    #[test]
    fn deserializes_from_json() {
        let json = r#"{"target_max_shard_bytes": 1048576, "load_factor": 0.75, "pinned_num_shards": null}"#;
        let config: WriterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.target_max_shard_bytes, 1 << 20);
        assert!(config.validate().is_ok());
    }
}
