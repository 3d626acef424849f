//! # Configuration
//!
//! Engine settings are managed by [`confique`], layered from highest to lowest
//! priority:
//!
//! 1. **Environment variables**: `ATTRKIT_MAX_LAZY_DEPTH`, `ATTRKIT_WRAP_SCALARS`,
//!    `ATTRKIT_STRICT_FIELDS`.
//! 2. **TOML file**: an optional path handed to [`EngineConfig::load`].
//! 3. **Compiled defaults**: via `#[config(default = ...)]`.
//!
//! ## Available Settings
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | `max_lazy_depth` | `32` | How deep a lazy value may nest before resolution fails |
//! | `wrap_scalars` | `true` | Assigning a bare scalar to a list or set wraps it |
//! | `strict_fields` | `true` | Unknown keys in a map assigned to a record are failures |
//!
//! The configuration is carried by a [`TypeRegistry`](crate::TypeRegistry)
//! into every type and record type it builds. There is no global state.

use std::path::Path;

use confique::Config;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::lazy::DEFAULT_MAX_LAZY_DEPTH;

#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum nesting of lazy values resolved in one read.
    // confique takes a literal here; it must equal `DEFAULT_MAX_LAZY_DEPTH`.
    #[config(default = 32, env = "ATTRKIT_MAX_LAZY_DEPTH")]
    pub max_lazy_depth: usize,

    /// Wrap bare scalars assigned to list and set fields.
    #[config(default = true, env = "ATTRKIT_WRAP_SCALARS")]
    pub wrap_scalars: bool,

    /// Reject unknown keys when a map is assigned to a record field.
    /// When false they are dropped with a warning.
    #[config(default = true, env = "ATTRKIT_STRICT_FIELDS")]
    pub strict_fields: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_lazy_depth: DEFAULT_MAX_LAZY_DEPTH,
            wrap_scalars: true,
            strict_fields: true,
        }
    }
}

impl EngineConfig {
    /// Load from the environment, then `path` if given, then compiled defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Self::builder().env();
        if let Some(path) = path {
            builder = builder.file(path);
        }
        Ok(builder.load()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_lazy_depth, DEFAULT_MAX_LAZY_DEPTH);
        assert!(config.wrap_scalars);
        assert!(config.strict_fields);
    }

    #[test]
    fn test_compiled_defaults_match_default_impl() {
        // No env layer, so this only sees the `#[config(default)]` values.
        let compiled = EngineConfig::builder().load().unwrap();
        assert_eq!(compiled, EngineConfig::default());
        assert_eq!(compiled.max_lazy_depth, DEFAULT_MAX_LAZY_DEPTH);
    }

    #[test]
    fn test_serializes_to_toml_shape() {
        let config = EngineConfig {
            strict_fields: false,
            ..Default::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["strict_fields"], serde_json::json!(false));
        assert_eq!(json["max_lazy_depth"], serde_json::json!(32));
    }
}
