// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module path resolution (Node.js algorithm)

use crate::error::{ModgateError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// The fixed set of native modules shipped with the runtime
pub const BUILTIN_MODULES: &[&str] = &[
    "assert",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "dns",
    "domain",
    "events",
    "fs",
    "http",
    "https",
    "module",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "repl",
    "stream",
    "string_decoder",
    "sys",
    "timers",
    "tls",
    "tty",
    "url",
    "util",
    "v8",
    "vm",
    "worker_threads",
    "zlib",
];

/// Check if a module identifier names a native module (`node:` prefix allowed)
pub fn is_builtin(name: &str) -> bool {
    let name = name.strip_prefix("node:").unwrap_or(name);
    BUILTIN_MODULES.contains(&name)
}

/// Result of module resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveResult {
    /// Native module (fs, path, http, etc.)
    BuiltIn(String),
    /// File module (absolute path)
    File(PathBuf),
}

impl ResolveResult {
    /// Location label used for cache keys and event reporting
    pub fn location(&self) -> PathBuf {
        match self {
            ResolveResult::BuiltIn(name) => PathBuf::from(name),
            ResolveResult::File(path) => path.clone(),
        }
    }
}

/// Module resolver implementing the Node.js resolution algorithm
#[derive(Debug, Clone)]
pub struct ModuleResolver {
    /// File extensions to probe, in order
    extensions: Vec<String>,
    /// Extra lookup folders for bare specifiers
    search_paths: Vec<PathBuf>,
}

impl ModuleResolver {
    /// Create a resolver probing the given extensions and search folders
    pub fn new(extensions: Vec<String>, search_paths: Vec<PathBuf>) -> Self {
        Self {
            extensions,
            search_paths,
        }
    }

    /// Resolve a module specifier requested from `parent_path`
    pub fn resolve(&self, specifier: &str, parent_path: &Path) -> Result<ResolveResult> {
        if is_builtin(specifier) {
            let name = specifier.strip_prefix("node:").unwrap_or(specifier);
            return Ok(ResolveResult::BuiltIn(name.to_string()));
        }

        if specifier.starts_with("./")
            || specifier.starts_with("../")
            || specifier == "."
            || specifier == ".."
            || Path::new(specifier).is_absolute()
        {
            let parent_dir = parent_path.parent().unwrap_or(Path::new("."));
            return self
                .resolve_target(&parent_dir.join(specifier))
                .ok_or_else(|| ModgateError::module_not_found(specifier));
        }

        self.resolve_package(specifier, parent_path)
            .ok_or_else(|| ModgateError::module_not_found(specifier))
    }

    /// Try a path as a file, then with each extension, then as a directory
    fn resolve_target(&self, path: &Path) -> Option<ResolveResult> {
        self.resolve_file(path)
            .or_else(|| path.is_dir().then(|| self.resolve_directory(path)).flatten())
    }

    /// Resolve an exact file or the file with an extension appended
    fn resolve_file(&self, path: &Path) -> Option<ResolveResult> {
        if path.is_file() {
            return Some(categorize(path));
        }

        let file_name = path.file_name()?.to_string_lossy().to_string();
        self.extensions.iter().find_map(|ext| {
            let candidate = path.with_file_name(format!("{}{}", file_name, ext));
            candidate.is_file().then(|| categorize(&candidate))
        })
    }

    /// Resolve a directory (package.json main, then index files)
    fn resolve_directory(&self, dir: &Path) -> Option<ResolveResult> {
        let package_json_path = dir.join("package.json");
        if let Some(main) = read_package_main(&package_json_path) {
            let main_path = dir.join(&main);
            if let Some(found) = self.resolve_file(&main_path) {
                return Some(found);
            }
            if main_path.is_dir() {
                if let Some(found) = self.resolve_index(&main_path) {
                    return Some(found);
                }
            }
        }

        self.resolve_index(dir)
    }

    fn resolve_index(&self, dir: &Path) -> Option<ResolveResult> {
        self.extensions.iter().find_map(|ext| {
            let index = dir.join(format!("index{}", ext));
            index.is_file().then(|| categorize(&index))
        })
    }

    /// Resolve a bare specifier from node_modules, then the search paths
    fn resolve_package(&self, specifier: &str, parent_path: &Path) -> Option<ResolveResult> {
        let (package_name, subpath) = parse_package_specifier(specifier);

        let mut current = parent_path.parent();
        while let Some(dir) = current {
            let node_modules = dir.join("node_modules");
            if let Some(found) = self.resolve_in(&node_modules, package_name, subpath) {
                return Some(found);
            }
            current = dir.parent();
        }

        self.search_paths
            .iter()
            .find_map(|base| self.resolve_in(base, package_name, subpath))
    }

    /// Resolve `package_name[/subpath]` inside one lookup folder
    fn resolve_in(
        &self,
        base: &Path,
        package_name: &str,
        subpath: Option<&str>,
    ) -> Option<ResolveResult> {
        let package_dir = base.join(package_name);
        match subpath {
            Some(sub) => self.resolve_target(&package_dir.join(sub)),
            None => self.resolve_target(&package_dir),
        }
    }
}

/// Parse a package specifier into name and optional subpath
fn parse_package_specifier(specifier: &str) -> (&str, Option<&str>) {
    if let Some(scoped) = specifier.strip_prefix('@') {
        // Scoped package: @scope/name or @scope/name/subpath
        if let Some(slash_pos) = scoped.find('/') {
            let after_scope = &scoped[slash_pos + 1..];
            if let Some(subpath_pos) = after_scope.find('/') {
                let name_end = slash_pos + 2 + subpath_pos;
                return (&specifier[..name_end], Some(&specifier[name_end + 1..]));
            }
        }
        (specifier, None)
    } else if let Some(slash_pos) = specifier.find('/') {
        (&specifier[..slash_pos], Some(&specifier[slash_pos + 1..]))
    } else {
        (specifier, None)
    }
}

fn categorize(path: &Path) -> ResolveResult {
    ResolveResult::File(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()))
}

/// Minimal package.json structure for resolution
#[derive(Debug, Deserialize)]
struct PackageJson {
    main: Option<String>,
}

fn read_package_main(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let pkg: PackageJson = serde_json::from_str(&content).ok()?;
    pkg.main.filter(|main| !main.is_empty())
}
