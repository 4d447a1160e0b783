// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Policy files.
//!
//! Only the data part of a policy can live in a file; transforms, overrides
//! and listeners are code and are registered on [`crate::Policy`] directly.
//!
//! ```toml
//! blacklist = ["child_process"]
//! whitelist = []
//! allow_external_modules = true
//! search_paths = ["vendor"]
//! reload = false
//! use_copy = false
//! ```

use crate::error::{ModgateError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Data-only policy settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Identifiers that never load
    pub blacklist: Vec<String>,

    /// If non-empty, the only identifiers that may load
    pub whitelist: Vec<String>,

    /// Whether modules outside the native set may load
    pub allow_external_modules: bool,

    /// Extra search folders for bare specifiers
    pub search_paths: Vec<PathBuf>,

    /// Re-execute non-native modules on every request
    pub reload: bool,

    /// Return deep copies instead of the cached instance
    pub use_copy: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            blacklist: Vec::new(),
            whitelist: Vec::new(),
            allow_external_modules: true,
            search_paths: Vec::new(),
            reload: false,
            use_copy: false,
        }
    }
}

impl PolicyConfig {
    /// Load a policy file. Relative search paths are taken relative to the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        if let Some(base) = path.parent() {
            for search_path in &mut config.search_paths {
                if search_path.is_relative() {
                    *search_path = base.join(&*search_path);
                }
            }
        }
        Ok(config)
    }

    /// Parse policy settings from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ModgateError::Config(e.to_string()))
    }

    /// Default per-user policy file location
    pub fn user_config_path(config_dir: &Path) -> PathBuf {
        config_dir.join("modgate").join("policy.toml")
    }
}
