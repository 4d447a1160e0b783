// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Load interception.
//!
//! [`install`] swaps a [`crate::ModuleSystem`]'s load entry for the
//! [`orchestrator`], which runs every request through access control,
//! override dispatch and the extension transform chain before handing it to
//! the default loader. [`restore`] puts the original mechanism back.

pub mod access;
pub mod events;
pub mod install;
pub mod orchestrator;
pub mod overrides;
pub mod transform;

pub use access::{check_access, AccessDecision};
pub use events::{EventKind, LifecycleEvent, Listener, Listeners};
pub use install::{
    advanced_require, install, restore, restore_global, upgrade_global, upgraded_system,
    RestorePoint,
};
pub use overrides::{OriginalLoader, OverrideHandler, OverrideOutcome, OverrideRequest};
pub use transform::{
    extension_of, run_chain, validate_extension, ChainOutcome, Transform, TransformOutput,
};
