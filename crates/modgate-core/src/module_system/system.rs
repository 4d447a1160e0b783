// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The target module system: load entry slot, extension-handler table,
//! search-path value, cache and native module registry.

use crate::error::{ModgateError, Result};
use crate::intercept::install::RestorePoint;
use crate::module_system::cache::ModuleCache;
use crate::module_system::compiler::{CompileUnit, Compiler, PassthroughCompiler, Require};
use crate::module_system::loader::{default_entry, ExtensionTable};
use crate::module_system::resolver::is_builtin;
use crate::value::Value;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Environment variable seeding the process-wide system's search path
pub const SEARCH_PATH_ENV: &str = "MODGATE_PATH";

/// Signature of a load entry point: `(system, identifier, requesting module)`
pub type LoadFn = dyn Fn(&ModuleSystem, &str, &Path) -> Result<Value> + Send + Sync;

/// Handle to the function installed in a system's load slot
#[derive(Clone)]
pub struct LoadEntry(Arc<LoadFn>);

impl LoadEntry {
    /// Wrap a load function
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&ModuleSystem, &str, &Path) -> Result<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(func))
    }

    /// Load `identifier` as requested from `parent`
    pub fn call(&self, system: &ModuleSystem, identifier: &str, parent: &Path) -> Result<Value> {
        (self.0)(system, identifier, parent)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &LoadEntry) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for LoadEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LoadEntry")
    }
}

struct SystemInner {
    entry: RwLock<LoadEntry>,
    extensions: RwLock<ExtensionTable>,
    search_path: RwLock<Option<OsString>>,
    global_paths: RwLock<Vec<PathBuf>>,
    cache: ModuleCache,
    natives: DashMap<String, Value>,
    compiler: Arc<dyn Compiler>,
    cwd: PathBuf,
    installed: AtomicBool,
    restore_point: OnceLock<RestorePoint>,
}

/// A module system that load interception can be installed on.
///
/// Cloning yields another handle to the same system; use
/// [`ModuleSystem::detached_copy`] for an independent one.
#[derive(Clone)]
pub struct ModuleSystem {
    inner: Arc<SystemInner>,
}

static GLOBAL: OnceLock<ModuleSystem> = OnceLock::new();

impl ModuleSystem {
    /// Create a standalone system with the default compiler
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a system
    pub fn builder() -> ModuleSystemBuilder {
        ModuleSystemBuilder::default()
    }

    /// The process-wide module system
    pub fn global() -> &'static ModuleSystem {
        GLOBAL.get_or_init(|| {
            let mut builder = Self::builder();
            if let Some(value) = std::env::var_os(SEARCH_PATH_ENV) {
                builder = builder.search_path(value);
            }
            builder.build()
        })
    }

    /// Whether this handle is the process-wide system
    pub fn is_global(&self) -> bool {
        GLOBAL.get().is_some_and(|global| global.ptr_eq(self))
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &ModuleSystem) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Load a module relative to the working directory
    pub fn require(&self, identifier: &str) -> Result<Value> {
        self.require_from(identifier, &self.root_parent())
    }

    /// Load a module as requested by the module at `parent`
    pub fn require_from(&self, identifier: &str, parent: &Path) -> Result<Value> {
        let entry = self.entry();
        entry.call(self, identifier, parent)
    }

    /// A `require` handle bound to `parent`
    pub fn require_handle(&self, parent: impl Into<PathBuf>) -> Require {
        Require::new(self.clone(), parent)
    }

    /// Pseudo-module standing for top-level requests from the working directory
    pub fn root_parent(&self) -> PathBuf {
        self.inner.cwd.join("[modgate]")
    }

    /// Working directory used for top-level requests
    pub fn cwd(&self) -> &Path {
        &self.inner.cwd
    }

    /// The current load entry point
    pub fn entry(&self) -> LoadEntry {
        self.inner.entry.read().clone()
    }

    pub(crate) fn set_entry(&self, entry: LoadEntry) {
        *self.inner.entry.write() = entry;
    }

    /// Snapshot of the extension-handler table
    pub fn extension_table(&self) -> ExtensionTable {
        self.inner.extensions.read().clone()
    }

    pub(crate) fn set_extension_table(&self, table: ExtensionTable) {
        *self.inner.extensions.write() = table;
    }

    /// The search-path value (platform path-list syntax)
    pub fn search_path(&self) -> Option<OsString> {
        self.inner.search_path.read().clone()
    }

    pub(crate) fn set_search_path(&self, value: Option<OsString>) {
        *self.inner.search_path.write() = value;
        self.init_paths();
    }

    /// Parsed search folders for bare specifiers
    pub fn global_paths(&self) -> Vec<PathBuf> {
        self.inner.global_paths.read().clone()
    }

    fn init_paths(&self) {
        let paths = match self.search_path() {
            Some(value) => std::env::split_paths(&value)
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| if p.is_absolute() { p } else { self.inner.cwd.join(p) })
                .collect(),
            None => Vec::new(),
        };
        *self.inner.global_paths.write() = paths;
    }

    /// The module cache
    pub fn cache(&self) -> &ModuleCache {
        &self.inner.cache
    }

    /// The compile step
    pub fn compiler(&self) -> &dyn Compiler {
        self.inner.compiler.as_ref()
    }

    /// Provide exports for a member of the native module set
    pub fn register_native(&self, name: &str, exports: Value) -> Result<()> {
        if !is_builtin(name) {
            return Err(ModgateError::type_error(format!(
                "'{}' is not a native module",
                name
            )));
        }
        let name = name.strip_prefix("node:").unwrap_or(name);
        self.inner.natives.insert(name.to_string(), exports);
        Ok(())
    }

    pub(crate) fn native_exports(&self, name: &str) -> Value {
        self.inner
            .natives
            .entry(name.to_string())
            .or_insert_with(|| Value::object([("builtin", Value::from(name))]))
            .value()
            .clone()
    }

    /// Whether load interception is installed on this system
    pub fn is_installed(&self) -> bool {
        self.inner.installed.load(Ordering::SeqCst)
    }

    /// Set the installed marker; false when it was already set
    pub(crate) fn mark_installed(&self) -> bool {
        self.inner
            .installed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Clear the installed marker; false when it was not set
    pub(crate) fn clear_installed(&self) -> bool {
        self.inner
            .installed
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn capture_restore_point(
        &self,
        capture: impl FnOnce() -> RestorePoint,
    ) -> &RestorePoint {
        self.inner.restore_point.get_or_init(capture)
    }

    pub(crate) fn restore_point(&self) -> Option<&RestorePoint> {
        self.inner.restore_point.get()
    }

    /// Independent copy of this system in its pristine state.
    ///
    /// When interception is installed the copy starts from the restore point,
    /// otherwise from the current slots. The copy is not installed and has no
    /// restore point of its own until it is installed on.
    pub fn detached_copy(&self) -> ModuleSystem {
        let (entry, search_path, extensions) = match self.restore_point() {
            Some(point) if self.is_installed() => (
                point.entry().clone(),
                point.search_path().cloned(),
                point.extensions().clone(),
            ),
            _ => (self.entry(), self.search_path(), self.extension_table()),
        };

        let natives = DashMap::new();
        for item in self.inner.natives.iter() {
            natives.insert(item.key().clone(), item.value().deep_copy());
        }

        let copy = ModuleSystem {
            inner: Arc::new(SystemInner {
                entry: RwLock::new(entry),
                extensions: RwLock::new(extensions),
                search_path: RwLock::new(search_path),
                global_paths: RwLock::new(Vec::new()),
                cache: self.inner.cache.deep_copy(),
                natives,
                compiler: Arc::clone(&self.inner.compiler),
                cwd: self.inner.cwd.clone(),
                installed: AtomicBool::new(false),
                restore_point: OnceLock::new(),
            }),
        };
        copy.init_paths();
        copy
    }
}

impl Default for ModuleSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ModuleSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSystem")
            .field("cwd", &self.inner.cwd)
            .field("installed", &self.is_installed())
            .field("extensions", &self.extension_table().extensions())
            .field("cached", &self.cache().len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ModuleSystem`]
pub struct ModuleSystemBuilder {
    compiler: Arc<dyn Compiler>,
    cwd: Option<PathBuf>,
    search_path: Option<OsString>,
}

impl Default for ModuleSystemBuilder {
    fn default() -> Self {
        Self {
            compiler: Arc::new(PassthroughCompiler),
            cwd: None,
            search_path: None,
        }
    }
}

impl ModuleSystemBuilder {
    /// Compile step used for module source
    pub fn compiler<C: Compiler + 'static>(mut self, compiler: C) -> Self {
        self.compiler = Arc::new(compiler);
        self
    }

    /// Compile step given as a closure
    pub fn compiler_fn<F>(self, func: F) -> Self
    where
        F: Fn(&CompileUnit<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.compiler(func)
    }

    /// Working directory for top-level requests
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Initial search-path value (platform path-list syntax)
    pub fn search_path(mut self, value: impl Into<OsString>) -> Self {
        self.search_path = Some(value.into());
        self
    }

    /// Build the system
    pub fn build(self) -> ModuleSystem {
        let cwd = self
            .cwd
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let system = ModuleSystem {
            inner: Arc::new(SystemInner {
                entry: RwLock::new(default_entry()),
                extensions: RwLock::new(ExtensionTable::defaults()),
                search_path: RwLock::new(self.search_path),
                global_paths: RwLock::new(Vec::new()),
                cache: ModuleCache::new(),
                natives: DashMap::new(),
                compiler: self.compiler,
                cwd,
                installed: AtomicBool::new(false),
                restore_point: OnceLock::new(),
            }),
        };
        system.init_paths();
        system
    }
}
