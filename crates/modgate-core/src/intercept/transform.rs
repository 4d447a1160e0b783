// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Extension transform chain.
//!
//! Transforms are registered per file suffix and run in registration order
//! over the module source. A transform either hands text to the next one or
//! halts the chain with finished exports, in which case nothing is compiled.

use crate::error::{ModgateError, Result};
use crate::module_system::{source_text, ExtensionHandler};
use crate::policy::SharedPolicy;
use crate::value::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// What a single transform produced
#[derive(Debug, Clone)]
pub enum TransformOutput {
    /// New source text for the next transform. Empty text means no change.
    Source(String),
    /// Leave the current text as it is
    Unchanged,
    /// Finished exports; the chain halts here
    Exports(Value),
}

impl From<String> for TransformOutput {
    fn from(text: String) -> Self {
        TransformOutput::Source(text)
    }
}

impl From<Value> for TransformOutput {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => TransformOutput::Source(text),
            Value::Undefined | Value::Null => TransformOutput::Unchanged,
            other => TransformOutput::Exports(other),
        }
    }
}

/// Transform signature: `(current source, absolute location)`
pub type TransformFn = dyn Fn(&str, &Path) -> Result<TransformOutput> + Send + Sync;

/// A registered source transform
#[derive(Clone)]
pub struct Transform(Arc<TransformFn>);

impl Transform {
    /// Wrap a transform function
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&str, &Path) -> Result<TransformOutput> + Send + Sync + 'static,
    {
        Self(Arc::new(func))
    }

    /// Transform that always produces text
    pub fn text<F>(func: F) -> Self
    where
        F: Fn(&str, &Path) -> Result<String> + Send + Sync + 'static,
    {
        Self::new(move |source, location| func(source, location).map(TransformOutput::Source))
    }

    /// Run the transform
    pub fn apply(&self, source: &str, location: &Path) -> Result<TransformOutput> {
        (self.0)(source, location)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Transform) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transform")
    }
}

/// Result of running a whole chain
#[derive(Debug, Clone)]
pub enum ChainOutcome {
    /// Text to compile
    Source(String),
    /// A transform halted the chain with finished exports
    Exports(Value),
}

/// Run `transforms` in order over `source`
pub fn run_chain(source: String, location: &Path, transforms: &[Transform]) -> Result<ChainOutcome> {
    let mut current = source;
    for (index, transform) in transforms.iter().enumerate() {
        match transform.apply(&current, location)? {
            TransformOutput::Source(text) if !text.is_empty() => current = text,
            TransformOutput::Source(_) | TransformOutput::Unchanged => {}
            TransformOutput::Exports(value) => {
                debug!(
                    "Transform {} of {} halted the chain for {}",
                    index + 1,
                    transforms.len(),
                    location.display()
                );
                return Ok(ChainOutcome::Exports(value));
            }
        }
    }
    Ok(ChainOutcome::Source(current))
}

/// Check a file suffix such as `.txt`
pub fn validate_extension(ext: &str) -> Result<()> {
    let valid = ext.len() > 1
        && ext.starts_with('.')
        && !ext[1..].contains('.')
        && !ext.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(ModgateError::InvalidExtension(ext.to_string()))
    }
}

/// Suffix of a file location, dot included
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
}

/// Extension-table handler running the live transforms registered for `ext`.
///
/// With no transforms left for the suffix it behaves like `fallback`, or like
/// the default compile step when the suffix had no handler before.
pub(crate) fn chain_handler(
    ext: String,
    policy: SharedPolicy,
    fallback: Option<ExtensionHandler>,
) -> ExtensionHandler {
    ExtensionHandler::new(move |system, location| {
        let transforms = policy.read().transforms(&ext).to_vec();
        if transforms.is_empty() {
            return match &fallback {
                Some(handler) => handler.call(system, location),
                None => system.compile_file(location),
            };
        }

        let source = source_text(&system.read_raw(location)?);
        match run_chain(source, location, &transforms)? {
            ChainOutcome::Source(text) => system.compile(&text, location),
            ChainOutcome::Exports(value) => Ok(value),
        }
    })
}
