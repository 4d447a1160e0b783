// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module cache keyed by absolute module location

use crate::value::Value;
use dashmap::DashMap;
use std::path::{Path, PathBuf};

/// Cached module entry
#[derive(Debug, Clone)]
pub struct CachedModule {
    /// The module's exports
    pub exports: Value,
    /// The module's filename
    pub filename: PathBuf,
    /// Whether the module has finished loading
    pub loaded: bool,
    /// Module that first required this one
    pub parent: Option<PathBuf>,
}

impl CachedModule {
    /// Entry for a module that is still compiling
    pub fn loading(filename: &Path, parent: Option<&Path>) -> Self {
        Self {
            exports: Value::object(Vec::<(String, Value)>::new()),
            filename: filename.to_path_buf(),
            loaded: false,
            parent: parent.map(Path::to_path_buf),
        }
    }
}

/// Thread-safe module cache
#[derive(Debug, Default)]
pub struct ModuleCache {
    /// Cache mapping absolute paths to cached modules
    cache: DashMap<PathBuf, CachedModule>,
}

impl ModuleCache {
    /// Create a new empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cached module by path
    pub fn get(&self, path: &Path) -> Option<CachedModule> {
        self.cache.get(path).map(|entry| entry.clone())
    }

    /// Check if a module is cached
    pub fn has(&self, path: &Path) -> bool {
        self.cache.contains_key(path)
    }

    /// Add a module to the cache
    pub fn set(&self, path: PathBuf, module: CachedModule) {
        self.cache.insert(path, module);
    }

    /// Remove a module from the cache
    pub fn delete(&self, path: &Path) -> Option<CachedModule> {
        self.cache.remove(path).map(|(_, v)| v)
    }

    /// Clear the entire cache
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Get all cached module paths
    pub fn keys(&self) -> Vec<PathBuf> {
        let mut keys: Vec<PathBuf> = self.cache.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Get the number of cached modules
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Independent copy with deep-copied exports
    pub fn deep_copy(&self) -> Self {
        let copy = Self::new();
        for entry in self.cache.iter() {
            let mut module = entry.value().clone();
            module.exports = module.exports.deep_copy();
            copy.cache.insert(entry.key().clone(), module);
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, exports: Value) -> CachedModule {
        CachedModule {
            exports,
            filename: PathBuf::from(name),
            loaded: true,
            parent: None,
        }
    }

    #[test]
    fn test_set_get_delete() {
        let cache = ModuleCache::new();
        let path = PathBuf::from("/app/a.js");
        cache.set(path.clone(), entry("/app/a.js", Value::from("a")));

        assert!(cache.has(&path));
        assert_eq!(cache.get(&path).unwrap().exports, Value::from("a"));
        assert_eq!(cache.len(), 1);

        assert!(cache.delete(&path).is_some());
        assert!(cache.delete(&path).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_keys_sorted() {
        let cache = ModuleCache::new();
        cache.set(PathBuf::from("/b.js"), entry("/b.js", Value::Null));
        cache.set(PathBuf::from("/a.js"), entry("/a.js", Value::Null));
        assert_eq!(cache.keys(), vec![PathBuf::from("/a.js"), PathBuf::from("/b.js")]);
    }

    #[test]
    fn test_deep_copy_detaches_exports() {
        let cache = ModuleCache::new();
        let path = PathBuf::from("/app/config.json");
        let exports = Value::object([("debug", Value::Boolean(false))]);
        cache.set(path.clone(), entry("/app/config.json", exports.clone()));

        let copy = cache.deep_copy();
        let copied = copy.get(&path).unwrap().exports;
        assert!(!copied.same(&exports));
        copied.as_object().unwrap().set("debug", Value::Boolean(true));
        assert_eq!(exports.get("debug"), Some(Value::Boolean(false)));
    }

    #[test]
    fn test_loading_entry() {
        let module = CachedModule::loading(Path::new("/x.js"), Some(Path::new("/main.js")));
        assert!(!module.loaded);
        assert_eq!(module.parent, Some(PathBuf::from("/main.js")));
    }
}
