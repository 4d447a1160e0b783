// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # modgate-core
//!
//! Programmable module loading. A [`Policy`] installed on a [`ModuleSystem`]
//! puts every `require` through:
//!
//! - access control (blacklist, whitelist, native-only gate)
//! - per-module override handlers that can supply source or finished exports
//! - per-suffix source transform chains ahead of compilation
//! - reload and copy-on-return cache handling
//! - `beforeLoad` / `onLoad` / `afterLoad` lifecycle listeners
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modgate_core::{install, ModuleSystem, Policy, SharedPolicy, Transform};
//!
//! fn main() -> modgate_core::Result<()> {
//!     let mut policy = Policy::new();
//!     policy.add_blacklist("child_process")?;
//!     policy.add_extension(".txt", Transform::text(|src, _| Ok(src.to_uppercase())))?;
//!
//!     let system = ModuleSystem::new();
//!     install(&system, &SharedPolicy::new(policy))?;
//!     let notes = system.require("./notes.txt")?;
//!     println!("{}", notes);
//!     Ok(())
//! }
//! ```
//!
//! The process-wide system is available through [`ModuleSystem::global`],
//! [`upgrade_global`] and [`restore_global`]; tests and embedders usually
//! build their own systems instead.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod intercept;
pub mod module_system;
pub mod policy;
pub mod value;

// Re-exports
pub use config::PolicyConfig;
pub use error::{DenyRule, ModgateError, Result};
pub use intercept::{
    advanced_require, install, restore, restore_global, upgrade_global, upgraded_system,
    EventKind, Listener, OverrideHandler, OverrideOutcome, OverrideRequest, Transform,
    TransformOutput,
};
pub use module_system::{CompileUnit, Compiler, ModuleSystem, Require, BUILTIN_MODULES};
pub use policy::{Policy, SharedPolicy};
pub use value::Value;

/// Version of modgate-core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
