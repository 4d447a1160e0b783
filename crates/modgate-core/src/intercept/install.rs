// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Installing the load orchestrator on a module system and restoring the
//! pristine mechanism.

use crate::error::{ModgateError, Result};
use crate::intercept::orchestrator;
use crate::intercept::transform::chain_handler;
use crate::module_system::{ExtensionTable, LoadEntry, ModuleSystem, Require};
use crate::policy::SharedPolicy;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Slots of a module system as they were before its first installation
#[derive(Debug, Clone)]
pub struct RestorePoint {
    entry: LoadEntry,
    search_path: Option<OsString>,
    extensions: ExtensionTable,
}

impl RestorePoint {
    fn capture(system: &ModuleSystem) -> Self {
        Self {
            entry: system.entry(),
            search_path: system.search_path(),
            extensions: system.extension_table(),
        }
    }

    /// The original load entry
    pub fn entry(&self) -> &LoadEntry {
        &self.entry
    }

    /// The original search-path value
    pub fn search_path(&self) -> Option<&OsString> {
        self.search_path.as_ref()
    }

    /// The original extension-handler table
    pub fn extensions(&self) -> &ExtensionTable {
        &self.extensions
    }
}

fn extended_search_path(base: Option<&OsString>, extra: &[PathBuf]) -> Result<Option<OsString>> {
    if extra.is_empty() {
        return Ok(base.cloned());
    }
    let mut paths: Vec<PathBuf> = match base {
        Some(value) => std::env::split_paths(value).collect(),
        None => Vec::new(),
    };
    for path in extra {
        if !paths.contains(path) {
            paths.push(path.clone());
        }
    }
    std::env::join_paths(paths)
        .map(Some)
        .map_err(|e| ModgateError::Config(format!("invalid search path: {}", e)))
}

/// Install `policy` on `system`.
///
/// Returns `Ok(false)` when interception is already installed. The first
/// installation on a system records its restore point; later installations
/// after a [`restore`] reuse it.
pub fn install(system: &ModuleSystem, policy: &SharedPolicy) -> Result<bool> {
    if system.is_installed() {
        debug!("Interception already installed, ignoring");
        return Ok(false);
    }

    let point = system.capture_restore_point(|| RestorePoint::capture(system)).clone();
    let snapshot = policy.snapshot();
    let search_path = extended_search_path(point.search_path(), snapshot.search_paths())?;

    if !system.mark_installed() {
        return Ok(false);
    }

    system.set_search_path(search_path);

    let mut table = point.extensions().clone();
    for ext in snapshot.extensions() {
        let fallback = point.extensions().get(ext).cloned();
        table.set(ext, chain_handler(ext.to_string(), policy.clone(), fallback));
    }
    system.set_extension_table(table);

    let original = point.entry().clone();
    let policy = policy.clone();
    system.set_entry(LoadEntry::new(move |system, identifier, parent| {
        let snapshot = policy.snapshot();
        orchestrator::load(system, identifier, parent, &snapshot, &original)
    }));

    info!(
        "Installed load interception ({} search paths, {} extensions)",
        snapshot.search_paths().len(),
        snapshot.extensions().count()
    );
    Ok(true)
}

/// Put back the restore point of `system`. Returns false when nothing was installed.
pub fn restore(system: &ModuleSystem) -> bool {
    if !system.is_installed() {
        return false;
    }
    let Some(point) = system.restore_point() else {
        return false;
    };

    system.set_extension_table(point.extensions().clone());
    system.set_search_path(point.search_path().cloned());
    system.set_entry(point.entry().clone());
    system.clear_installed();

    info!("Restored original module loading");
    true
}

/// Install `policy` on the process-wide module system
pub fn upgrade_global(policy: &SharedPolicy) -> Result<bool> {
    install(ModuleSystem::global(), policy)
}

/// Restore the process-wide module system
pub fn restore_global() -> bool {
    restore(ModuleSystem::global())
}

/// A pristine copy of the process-wide system with `policy` installed.
/// The process-wide system and its restore point are left alone.
pub fn upgraded_system(policy: &SharedPolicy) -> Result<ModuleSystem> {
    let system = ModuleSystem::global().detached_copy();
    install(&system, policy)?;
    Ok(system)
}

/// `require` bound to `parent` on an [`upgraded_system`]
pub fn advanced_require(parent: impl AsRef<Path>, policy: &SharedPolicy) -> Result<Require> {
    Ok(upgraded_system(policy)?.require_handle(parent.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::transform::Transform;
    use crate::policy::Policy;

    #[test]
    fn test_install_is_idempotent() {
        let system = ModuleSystem::new();
        let policy = SharedPolicy::default();
        assert!(install(&system, &policy).unwrap());
        let entry = system.entry();
        assert!(!install(&system, &policy).unwrap());
        assert!(system.entry().ptr_eq(&entry));
    }

    #[test]
    fn test_restore_round_trip() {
        let system = ModuleSystem::builder().search_path("/base").build();
        let entry = system.entry();
        let table = system.extension_table();
        let search_path = system.search_path();

        let mut policy = Policy::new();
        policy.add_path("/extra").unwrap();
        policy
            .add_extension(".txt", Transform::text(|s, _| Ok(s.to_uppercase())))
            .unwrap();
        let policy = SharedPolicy::new(policy);

        assert!(install(&system, &policy).unwrap());
        assert!(system.is_installed());
        assert!(!system.entry().ptr_eq(&entry));
        assert!(system.extension_table().get(".txt").is_some());
        assert!(system.global_paths().contains(&PathBuf::from("/extra")));

        assert!(restore(&system));
        assert!(!system.is_installed());
        assert!(system.entry().ptr_eq(&entry));
        assert!(system.extension_table().same_as(&table));
        assert_eq!(system.search_path(), search_path);
        assert!(!restore(&system));
    }

    #[test]
    fn test_restore_without_install_is_noop() {
        let system = ModuleSystem::new();
        assert!(!restore(&system));
    }

    #[test]
    fn test_reinstall_keeps_first_restore_point() {
        let system = ModuleSystem::new();
        let entry = system.entry();
        let policy = SharedPolicy::default();

        install(&system, &policy).unwrap();
        restore(&system);
        install(&system, &policy).unwrap();
        assert!(system.restore_point().unwrap().entry().ptr_eq(&entry));
        restore(&system);
        assert!(system.entry().ptr_eq(&entry));
    }

    #[test]
    fn test_search_path_extension() {
        let extra = vec![PathBuf::from("/b"), PathBuf::from("/a")];
        let base = std::env::join_paths(["/a"]).unwrap();
        let joined = extended_search_path(Some(&base), &extra).unwrap().unwrap();
        let parts: Vec<PathBuf> = std::env::split_paths(&joined).collect();
        assert_eq!(parts, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(extended_search_path(None, &[]).unwrap(), None);
    }
}
