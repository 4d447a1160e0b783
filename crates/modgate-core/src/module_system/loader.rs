// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Default loader - resolves, reads, compiles and caches modules

use crate::error::{ModgateError, Result};
use crate::module_system::cache::CachedModule;
use crate::module_system::compiler::{CompileUnit, Require};
use crate::module_system::resolver::{ModuleResolver, ResolveResult};
use crate::module_system::system::{LoadEntry, ModuleSystem};
use crate::value::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Compile step registered for one file suffix
pub type ExtensionFn = dyn Fn(&ModuleSystem, &Path) -> Result<Value> + Send + Sync;

/// Handle to an entry of the extension-handler table
#[derive(Clone)]
pub struct ExtensionHandler(Arc<ExtensionFn>);

impl ExtensionHandler {
    /// Wrap a compile step
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&ModuleSystem, &Path) -> Result<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(func))
    }

    /// Load the module at `location`
    pub fn call(&self, system: &ModuleSystem, location: &Path) -> Result<Value> {
        (self.0)(system, location)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &ExtensionHandler) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ExtensionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExtensionHandler")
    }
}

/// Suffix to compile-step table, in registration order
#[derive(Debug, Clone, Default)]
pub struct ExtensionTable {
    entries: Vec<(String, ExtensionHandler)>,
}

impl ExtensionTable {
    /// The stock `.js`, `.json` and `.node` handlers
    pub fn defaults() -> Self {
        let mut table = Self::default();
        table.set(".js", ExtensionHandler::new(|system, location| system.compile_file(location)));
        table.set(".json", ExtensionHandler::new(compile_json));
        table.set(".node", ExtensionHandler::new(reject_native_addon));
        table
    }

    /// Handler registered for `ext`
    pub fn get(&self, ext: &str) -> Option<&ExtensionHandler> {
        self.entries
            .iter()
            .find(|(key, _)| key == ext)
            .map(|(_, handler)| handler)
    }

    /// Register or replace the handler for `ext`
    pub fn set(&mut self, ext: impl Into<String>, handler: ExtensionHandler) {
        let ext = ext.into();
        match self.entries.iter_mut().find(|(key, _)| *key == ext) {
            Some(entry) => entry.1 = handler,
            None => self.entries.push((ext, handler)),
        }
    }

    /// Registered suffixes, in probe order
    pub fn extensions(&self) -> Vec<String> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Number of registered suffixes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Same suffixes in the same order, bound to the same handlers
    pub fn same_as(&self, other: &ExtensionTable) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(&other.entries)
                .all(|((a, ha), (b, hb))| a == b && ha.ptr_eq(hb))
    }

    /// Handler for a file, falling back to `.js` for unknown suffixes
    pub fn handler_for(&self, path: &Path) -> Option<&ExtensionHandler> {
        path.extension()
            .and_then(|ext| self.get(&format!(".{}", ext.to_string_lossy())))
            .or_else(|| self.get(".js"))
    }
}

/// The pristine load entry: resolve, read, compile, cache
pub fn default_entry() -> LoadEntry {
    LoadEntry::new(|system, identifier, parent| system.load_default(identifier, parent))
}

/// Reject empty module requests
pub(crate) fn verify_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() {
        return Err(ModgateError::InvalidIdentifier(
            "module identifier must be a non-empty string".to_string(),
        ));
    }
    Ok(())
}

/// Strip a leading UTF-8 byte-order mark
pub fn strip_bom(source: &str) -> &str {
    source.strip_prefix('\u{feff}').unwrap_or(source)
}

/// Decode raw module bytes as UTF-8 text without a byte-order mark
pub fn source_text(bytes: &[u8]) -> String {
    strip_bom(&String::from_utf8_lossy(bytes)).to_string()
}

impl ModuleSystem {
    /// Resolve an identifier the way the default loader does
    pub fn resolve(&self, identifier: &str, parent: &Path) -> Result<ResolveResult> {
        ModuleResolver::new(self.extension_table().extensions(), self.global_paths())
            .resolve(identifier, parent)
    }

    /// Default resolve + read + compile + cache path
    pub fn load_default(&self, identifier: &str, parent: &Path) -> Result<Value> {
        verify_identifier(identifier)?;
        let resolved = self.resolve(identifier, parent)?;
        self.load_resolved(&resolved, parent)
    }

    /// Load an already-resolved module
    pub fn load_resolved(&self, resolved: &ResolveResult, parent: &Path) -> Result<Value> {
        match resolved {
            ResolveResult::BuiltIn(name) => Ok(self.native_exports(name)),
            ResolveResult::File(path) => self.load_file(path, parent),
        }
    }

    fn load_file(&self, path: &Path, parent: &Path) -> Result<Value> {
        if let Some(cached) = self.cache().get(path) {
            if !cached.loaded {
                debug!("Circular require of {}, returning partial exports", path.display());
            }
            return Ok(cached.exports);
        }

        self.cache()
            .set(path.to_path_buf(), CachedModule::loading(path, Some(parent)));

        let handler = self.extension_table().handler_for(path).cloned();
        let result = match handler {
            Some(handler) => handler.call(self, path),
            None => self.compile_file(path),
        };

        match result {
            Ok(exports) => {
                debug!("Loaded {}", path.display());
                self.cache().set(
                    path.to_path_buf(),
                    CachedModule {
                        exports: exports.clone(),
                        filename: path.to_path_buf(),
                        loaded: true,
                        parent: Some(parent.to_path_buf()),
                    },
                );
                Ok(exports)
            }
            Err(err) => {
                self.cache().delete(path);
                Err(err)
            }
        }
    }

    /// Read raw module bytes
    pub fn read_raw(&self, location: &Path) -> Result<Vec<u8>> {
        Ok(std::fs::read(location)?)
    }

    /// Read module source as text, byte-order mark stripped
    pub fn read_source(&self, location: &Path) -> Result<String> {
        Ok(source_text(&self.read_raw(location)?))
    }

    /// Compile source as a new module instance at `location` (not cached)
    pub fn compile(&self, source: &str, location: &Path) -> Result<Value> {
        let unit = CompileUnit {
            source,
            location,
            require: Require::new(self.clone(), location),
        };
        self.compiler().compile(&unit)
    }

    /// Read and compile the file at `location`
    pub fn compile_file(&self, location: &Path) -> Result<Value> {
        let source = self.read_source(location)?;
        self.compile(&source, location)
    }
}

fn compile_json(system: &ModuleSystem, location: &Path) -> Result<Value> {
    let source = system.read_source(location)?;
    let json: serde_json::Value = serde_json::from_str(&source)
        .map_err(|e| ModgateError::compilation(location, e.to_string()))?;
    Ok(Value::from_json(&json))
}

fn reject_native_addon(_system: &ModuleSystem, location: &Path) -> Result<Value> {
    Err(ModgateError::UnsupportedModule {
        module: location.display().to_string(),
        reason: "Native addons (.node) are not supported".to_string(),
    })
}
