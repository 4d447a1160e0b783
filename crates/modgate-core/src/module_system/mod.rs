// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The default module system that interception wraps.
//!
//! - Node.js-style resolution (relative paths, `node_modules`, search paths)
//! - Extension-handler table (`.js`, `.json`, `.node` by default)
//! - Module cache keyed by absolute location
//! - Pluggable compile step ([`Compiler`])

mod cache;
mod compiler;
mod loader;
mod resolver;
mod system;

pub use cache::{CachedModule, ModuleCache};
pub use compiler::{CompileUnit, Compiler, PassthroughCompiler, Require};
pub use loader::{
    default_entry, source_text, strip_bom, ExtensionFn, ExtensionHandler, ExtensionTable,
};
pub(crate) use loader::verify_identifier;
pub use resolver::{is_builtin, ModuleResolver, ResolveResult, BUILTIN_MODULES};
pub use system::{LoadEntry, LoadFn, ModuleSystem, ModuleSystemBuilder, SEARCH_PATH_ENV};
