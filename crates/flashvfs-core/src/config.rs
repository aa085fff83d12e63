// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mount configuration

use serde::{Deserialize, Serialize};

/// Parameters fixed at mount time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountOptions {
    /// Reject every mutating operation with a read-only failure.
    pub read_only: bool,
    /// Longest path segment accepted; bytes past the cap are dropped from
    /// the name but still consumed from the input.
    pub max_name_length: usize,
    /// Resolution budget for symlink chains. Exhausting it fails the lookup
    /// instead of recursing through a cyclic chain forever.
    pub max_link_depth: u32,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            max_name_length: 255,
            max_link_depth: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_serde() {
        let options = MountOptions::default();
        let json = serde_json::to_string(&options).unwrap();
        let back: MountOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, options);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let options: MountOptions = serde_json::from_str(r#"{"read_only":true}"#).unwrap();
        assert!(options.read_only);
        assert_eq!(options.max_name_length, 255);
        assert_eq!(options.max_link_depth, 8);
    }
}
