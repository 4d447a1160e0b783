// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Compile step of the default loader and the `require` handle given to
//! compiled modules.

use crate::error::{ModgateError, Result};
use crate::module_system::ModuleSystem;
use crate::value::Value;
use std::path::{Path, PathBuf};

/// One module source handed to a [`Compiler`]
pub struct CompileUnit<'a> {
    /// Source text (byte-order mark already stripped)
    pub source: &'a str,
    /// Absolute module location
    pub location: &'a Path,
    /// `require` bound to this module, for nested loads
    pub require: Require,
}

impl CompileUnit<'_> {
    /// Directory containing the module
    pub fn dirname(&self) -> &Path {
        self.location.parent().unwrap_or(Path::new("."))
    }
}

/// Turns module source into module exports
pub trait Compiler: Send + Sync {
    /// Compile and evaluate one module
    fn compile(&self, unit: &CompileUnit<'_>) -> Result<Value>;
}

impl<F> Compiler for F
where
    F: Fn(&CompileUnit<'_>) -> Result<Value> + Send + Sync,
{
    fn compile(&self, unit: &CompileUnit<'_>) -> Result<Value> {
        self(unit)
    }
}

/// Compiler for hosts without an engine attached: exports the final source
/// text and location as `{ source, filename }`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughCompiler;

impl Compiler for PassthroughCompiler {
    fn compile(&self, unit: &CompileUnit<'_>) -> Result<Value> {
        Ok(Value::object([
            ("source", Value::from(unit.source)),
            ("filename", Value::from(unit.location.display().to_string())),
        ]))
    }
}

/// `require()` bound to a requesting module.
///
/// Calls go through the target system's current load entry, so nested loads
/// re-enter an installed interception pipeline.
#[derive(Clone)]
pub struct Require {
    system: ModuleSystem,
    parent: PathBuf,
}

impl Require {
    /// Bind `require` to `parent` on `system`
    pub fn new(system: ModuleSystem, parent: impl Into<PathBuf>) -> Self {
        Self {
            system,
            parent: parent.into(),
        }
    }

    /// Load a module relative to the bound parent
    pub fn call(&self, identifier: &str) -> Result<Value> {
        self.system.require_from(identifier, &self.parent)
    }

    /// Load a module from a runtime value, rejecting non-text identifiers
    pub fn call_value(&self, identifier: &Value) -> Result<Value> {
        match identifier {
            Value::String(id) => self.call(id),
            other => Err(ModgateError::InvalidIdentifier(format!(
                "expected string, got {}",
                other.type_of()
            ))),
        }
    }

    /// require.resolve() - the resolved location without loading
    pub fn resolve(&self, identifier: &str) -> Result<PathBuf> {
        self.system
            .resolve(identifier, &self.parent)
            .map(|resolved| resolved.location())
    }

    /// The requesting module
    pub fn parent(&self) -> &Path {
        &self.parent
    }

    /// The module system this handle loads through
    pub fn system(&self) -> &ModuleSystem {
        &self.system
    }
}

impl std::fmt::Debug for Require {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Require")
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}
