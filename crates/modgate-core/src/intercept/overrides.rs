// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Override dispatch: per-identifier handlers that may preempt normal loading

use crate::error::Result;
use crate::module_system::{LoadEntry, ModuleSystem};
use crate::policy::Policy;
use crate::value::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// What an override handler decided
#[derive(Debug, Clone)]
pub enum OverrideOutcome {
    /// Compile this text as the module's source at its resolved location
    ReplacementSource(String),
    /// Use this value as the module's exports; nothing is read or compiled
    FinishedResult(Value),
    /// Fall through to normal loading
    NoOverride,
}

impl OverrideOutcome {
    fn normalize(self) -> Self {
        match self {
            OverrideOutcome::FinishedResult(value) if value.is_nullish() => {
                OverrideOutcome::NoOverride
            }
            other => other,
        }
    }
}

/// The load function that was in place before interception, bound to the
/// requesting module
#[derive(Clone)]
pub struct OriginalLoader {
    system: ModuleSystem,
    entry: LoadEntry,
    parent: PathBuf,
}

impl OriginalLoader {
    pub(crate) fn new(system: ModuleSystem, entry: LoadEntry, parent: impl Into<PathBuf>) -> Self {
        Self {
            system,
            entry,
            parent: parent.into(),
        }
    }

    /// Load through the original mechanism, bypassing the policy
    pub fn load(&self, identifier: &str) -> Result<Value> {
        self.entry.call(&self.system, identifier, &self.parent)
    }

    /// The requesting module
    pub fn parent(&self) -> &Path {
        &self.parent
    }
}

impl fmt::Debug for OriginalLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OriginalLoader")
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}

/// Arguments handed to an override handler
#[derive(Debug)]
pub struct OverrideRequest<'a> {
    /// Requested identifier
    pub identifier: &'a str,
    /// Resolved absolute location, or empty when resolution failed
    pub location: &'a str,
    /// Normal loading, for handlers that want to delegate
    pub original: OriginalLoader,
}

/// Override handler signature
pub type OverrideFn = dyn Fn(&OverrideRequest<'_>) -> Result<OverrideOutcome> + Send + Sync;

/// A registered override handler
#[derive(Clone)]
pub struct OverrideHandler(Arc<OverrideFn>);

impl OverrideHandler {
    /// Wrap a handler function
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&OverrideRequest<'_>) -> Result<OverrideOutcome> + Send + Sync + 'static,
    {
        Self(Arc::new(func))
    }

    /// Handler that always supplies `value` as the finished result
    pub fn result(value: Value) -> Self {
        Self::new(move |_| Ok(OverrideOutcome::FinishedResult(value.clone())))
    }

    /// Handler that always supplies `source` as the module source
    pub fn source(source: impl Into<String>) -> Self {
        let source = source.into();
        Self::new(move |_| Ok(OverrideOutcome::ReplacementSource(source.clone())))
    }

    /// Invoke the handler
    pub fn call(&self, request: &OverrideRequest<'_>) -> Result<OverrideOutcome> {
        (self.0)(request)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &OverrideHandler) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for OverrideHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OverrideHandler")
    }
}

/// Give the handler registered for the request's identifier first right of refusal
pub fn dispatch(request: &OverrideRequest<'_>, policy: &Policy) -> Result<OverrideOutcome> {
    let Some(handler) = policy.override_for(request.identifier) else {
        return Ok(OverrideOutcome::NoOverride);
    };

    let outcome = handler.call(request)?.normalize();
    match &outcome {
        OverrideOutcome::ReplacementSource(_) => {
            debug!("Override supplied replacement source for {}", request.identifier)
        }
        OverrideOutcome::FinishedResult(_) => {
            debug!("Override supplied finished result for {}", request.identifier)
        }
        OverrideOutcome::NoOverride => {
            debug!("Override for {} declined", request.identifier)
        }
    }
    Ok(outcome)
}
