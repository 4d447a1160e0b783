// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Operator-facing load policy.
//!
//! A [`Policy`] holds the access lists, transforms, overrides, flags and
//! lifecycle listeners consulted by the interception pipeline. Installed
//! systems share it through a [`SharedPolicy`] and take a snapshot per load,
//! so edits made after installation apply to the next request.

use crate::config::PolicyConfig;
use crate::error::Result;
use crate::intercept::events::{EventKind, Listener, Listeners};
use crate::intercept::overrides::OverrideHandler;
use crate::intercept::transform::{validate_extension, Transform};
use crate::module_system::verify_identifier;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Load policy
#[derive(Clone)]
pub struct Policy {
    blacklist: BTreeSet<String>,
    whitelist: BTreeSet<String>,
    allow_external_modules: bool,
    search_paths: Vec<PathBuf>,
    extension_handlers: BTreeMap<String, Vec<Transform>>,
    override_handlers: HashMap<String, OverrideHandler>,
    reload: bool,
    use_copy: bool,
    listeners: Listeners,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            blacklist: BTreeSet::new(),
            whitelist: BTreeSet::new(),
            allow_external_modules: true,
            search_paths: Vec::new(),
            extension_handlers: BTreeMap::new(),
            override_handlers: HashMap::new(),
            reload: false,
            use_copy: false,
            listeners: Listeners::default(),
        }
    }
}

impl Policy {
    /// Permissive policy: no lists, external modules allowed, nothing registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a policy from the data-only part of a policy file
    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        let mut policy = Self::new();
        policy.apply_config(config)?;
        Ok(policy)
    }

    /// Merge a policy file into this policy. Lists are added to, flags replaced.
    pub fn apply_config(&mut self, config: &PolicyConfig) -> Result<()> {
        for id in &config.blacklist {
            self.add_blacklist(id.as_str())?;
        }
        for id in &config.whitelist {
            self.add_whitelist(id.as_str())?;
        }
        self.add_paths(&config.search_paths)?;
        self.allow_external_modules = config.allow_external_modules;
        self.reload = config.reload;
        self.use_copy = config.use_copy;
        Ok(())
    }

    /// The data-only part of this policy
    pub fn to_config(&self) -> PolicyConfig {
        PolicyConfig {
            blacklist: self.blacklist.iter().cloned().collect(),
            whitelist: self.whitelist.iter().cloned().collect(),
            allow_external_modules: self.allow_external_modules,
            search_paths: self.search_paths.clone(),
            reload: self.reload,
            use_copy: self.use_copy,
        }
    }

    // ==================== Access lists ====================

    /// Deny `identifier` outright
    pub fn add_blacklist(&mut self, identifier: impl Into<String>) -> Result<bool> {
        let identifier = identifier.into();
        verify_identifier(&identifier)?;
        Ok(self.blacklist.insert(identifier))
    }

    /// Remove a blacklist entry
    pub fn remove_blacklist(&mut self, identifier: &str) -> bool {
        self.blacklist.remove(identifier)
    }

    /// Blacklisted identifiers
    pub fn blacklist(&self) -> &BTreeSet<String> {
        &self.blacklist
    }

    /// Whether `identifier` is blacklisted
    pub fn is_blacklisted(&self, identifier: &str) -> bool {
        self.blacklist.contains(identifier)
    }

    /// Allow `identifier`; a non-empty whitelist denies everything else
    pub fn add_whitelist(&mut self, identifier: impl Into<String>) -> Result<bool> {
        let identifier = identifier.into();
        verify_identifier(&identifier)?;
        Ok(self.whitelist.insert(identifier))
    }

    /// Remove a whitelist entry
    pub fn remove_whitelist(&mut self, identifier: &str) -> bool {
        self.whitelist.remove(identifier)
    }

    /// Whitelisted identifiers
    pub fn whitelist(&self) -> &BTreeSet<String> {
        &self.whitelist
    }

    /// Whether `identifier` is whitelisted
    pub fn is_whitelisted(&self, identifier: &str) -> bool {
        self.whitelist.contains(identifier)
    }

    /// Allow or forbid modules outside the native set
    pub fn set_allow_external_modules(&mut self, allow: bool) -> &mut Self {
        self.allow_external_modules = allow;
        self
    }

    /// Whether modules outside the native set may load
    pub fn allows_external_modules(&self) -> bool {
        self.allow_external_modules
    }

    // ==================== Search paths ====================

    /// Add a search folder, made absolute against the current directory.
    /// Returns false for a path that is already registered.
    pub fn add_path(&mut self, path: impl AsRef<Path>) -> Result<bool> {
        let path = std::path::absolute(path.as_ref())?;
        if self.search_paths.contains(&path) {
            return Ok(false);
        }
        self.search_paths.push(path);
        Ok(true)
    }

    /// Add several search folders
    pub fn add_paths<I, P>(&mut self, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            self.add_path(path)?;
        }
        Ok(())
    }

    /// Registered search folders, in order
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    // ==================== Extension transforms ====================

    /// Append a transform to the chain for `ext`. Registering the same
    /// transform handle twice is a no-op and returns false.
    pub fn add_extension(&mut self, ext: &str, transform: Transform) -> Result<bool> {
        validate_extension(ext)?;
        let chain = self.extension_handlers.entry(ext.to_string()).or_default();
        if chain.iter().any(|t| t.ptr_eq(&transform)) {
            return Ok(false);
        }
        chain.push(transform);
        Ok(true)
    }

    /// Register several transforms, in iteration order
    pub fn add_extension_list<I, S>(&mut self, transforms: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, Transform)>,
        S: AsRef<str>,
    {
        for (ext, transform) in transforms {
            self.add_extension(ext.as_ref(), transform)?;
        }
        Ok(())
    }

    /// Remove one transform from `ext`, or the whole chain when `transform` is `None`
    pub fn remove_extension(&mut self, ext: &str, transform: Option<&Transform>) -> bool {
        match transform {
            None => self.extension_handlers.remove(ext).is_some(),
            Some(transform) => {
                let Some(chain) = self.extension_handlers.get_mut(ext) else {
                    return false;
                };
                let before = chain.len();
                chain.retain(|t| !t.ptr_eq(transform));
                let removed = chain.len() != before;
                if chain.is_empty() {
                    self.extension_handlers.remove(ext);
                }
                removed
            }
        }
    }

    /// Transform chain registered for `ext`
    pub fn transforms(&self, ext: &str) -> &[Transform] {
        self.extension_handlers
            .get(ext)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Suffixes with at least one transform
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.extension_handlers
            .iter()
            .filter(|(_, chain)| !chain.is_empty())
            .map(|(ext, _)| ext.as_str())
    }

    // ==================== Overrides ====================

    /// Register the override for `identifier`, replacing any previous one
    pub fn add_override(
        &mut self,
        identifier: impl Into<String>,
        handler: OverrideHandler,
    ) -> Result<Option<OverrideHandler>> {
        let identifier = identifier.into();
        verify_identifier(&identifier)?;
        Ok(self.override_handlers.insert(identifier, handler))
    }

    /// Register several overrides
    pub fn add_override_list<I, S>(&mut self, handlers: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, OverrideHandler)>,
        S: Into<String>,
    {
        for (identifier, handler) in handlers {
            self.add_override(identifier, handler)?;
        }
        Ok(())
    }

    /// Remove the override for `identifier`. With `Some(handler)` it is only
    /// removed when that handle is the one registered.
    pub fn remove_override(&mut self, identifier: &str, handler: Option<&OverrideHandler>) -> bool {
        let matches = match (self.override_handlers.get(identifier), handler) {
            (Some(_), None) => true,
            (Some(current), Some(expected)) => current.ptr_eq(expected),
            (None, _) => false,
        };
        if matches {
            self.override_handlers.remove(identifier);
        }
        matches
    }

    /// Override registered for `identifier`
    pub fn override_for(&self, identifier: &str) -> Option<&OverrideHandler> {
        self.override_handlers.get(identifier)
    }

    /// Identifiers with an override, sorted
    pub fn overridden(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.override_handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    // ==================== Flags ====================

    /// Bypass the module cache for non-native modules
    pub fn set_reload(&mut self, reload: bool) -> &mut Self {
        self.reload = reload;
        self
    }

    /// Whether non-native modules are re-executed on every request
    pub fn reload(&self) -> bool {
        self.reload
    }

    /// Return independent copies and drop the cached instance
    pub fn set_use_copy(&mut self, use_copy: bool) -> &mut Self {
        self.use_copy = use_copy;
        self
    }

    /// Whether results are deep-copied
    pub fn use_copy(&self) -> bool {
        self.use_copy
    }

    // ==================== Lifecycle listeners ====================

    /// Register a listener by event name, e.g. `"onLoad"` or `"onBeforeRequire"`
    pub fn on(&mut self, event: &str, listener: Listener) -> Result<bool> {
        let kind: EventKind = event.parse()?;
        Ok(self.add_listener(kind, listener))
    }

    /// Register a listener; the same handle is only kept once per event
    pub fn add_listener(&mut self, kind: EventKind, listener: Listener) -> bool {
        self.listeners.add(kind, listener)
    }

    /// Unregister a listener handle
    pub fn remove_listener(&mut self, kind: EventKind, listener: &Listener) -> bool {
        self.listeners.remove(kind, listener)
    }

    /// Listeners for one event, in registration order
    pub fn listeners(&self, kind: EventKind) -> &[Listener] {
        self.listeners.get(kind)
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("blacklist", &self.blacklist)
            .field("whitelist", &self.whitelist)
            .field("allow_external_modules", &self.allow_external_modules)
            .field("search_paths", &self.search_paths)
            .field("extensions", &self.extensions().collect::<Vec<_>>())
            .field("overrides", &self.overridden())
            .field("reload", &self.reload)
            .field("use_copy", &self.use_copy)
            .finish()
    }
}

/// A policy shared between the operator and installed systems
#[derive(Clone, Default)]
pub struct SharedPolicy(Arc<RwLock<Policy>>);

impl SharedPolicy {
    /// Share `policy`
    pub fn new(policy: Policy) -> Self {
        Self(Arc::new(RwLock::new(policy)))
    }

    /// Read access
    pub fn read(&self) -> RwLockReadGuard<'_, Policy> {
        self.0.read()
    }

    /// Write access. Do not hold the guard across a module load.
    pub fn write(&self) -> RwLockWriteGuard<'_, Policy> {
        self.0.write()
    }

    /// Copy of the current policy for a single load
    pub fn snapshot(&self) -> Policy {
        self.0.read().clone()
    }
}

impl From<Policy> for SharedPolicy {
    fn from(policy: Policy) -> Self {
        Self::new(policy)
    }
}

impl fmt::Debug for SharedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.read(), f)
    }
}
