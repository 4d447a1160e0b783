// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Lifecycle events emitted around every intercepted load

use crate::error::{ModgateError, Result};
use crate::value::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Lifecycle event names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Before any policy check
    BeforeLoad,
    /// After the module produced a result; listeners may replace it
    OnLoad,
    /// After copy handling, just before the result is returned
    AfterLoad,
}

impl EventKind {
    /// Canonical event name
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::BeforeLoad => "beforeLoad",
            EventKind::OnLoad => "onLoad",
            EventKind::AfterLoad => "afterLoad",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ModgateError;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "beforeload" | "onbeforerequire" | "beforerequire" => Ok(EventKind::BeforeLoad),
            "onload" | "onrequire" | "require" => Ok(EventKind::OnLoad),
            "afterload" | "onafterrequire" | "afterrequire" => Ok(EventKind::AfterLoad),
            _ => Err(ModgateError::InvalidEvent(name.to_string())),
        }
    }
}

/// Payload delivered to listeners
#[derive(Debug)]
pub enum LifecycleEvent<'a> {
    /// `beforeLoad(identifier)`
    BeforeLoad {
        /// Requested identifier
        identifier: &'a str,
    },
    /// `onLoad(identifier, source, result)`
    OnLoad {
        /// Requested identifier
        identifier: &'a str,
        /// Source text the result came from, empty when there was none
        source: &'a str,
        /// Current result (possibly replaced by an earlier listener)
        result: &'a Value,
    },
    /// `afterLoad(result, identifier)`
    AfterLoad {
        /// Final result
        result: &'a Value,
        /// Requested identifier
        identifier: &'a str,
    },
}

impl LifecycleEvent<'_> {
    /// Which event this is
    pub fn kind(&self) -> EventKind {
        match self {
            LifecycleEvent::BeforeLoad { .. } => EventKind::BeforeLoad,
            LifecycleEvent::OnLoad { .. } => EventKind::OnLoad,
            LifecycleEvent::AfterLoad { .. } => EventKind::AfterLoad,
        }
    }

    /// The requested identifier
    pub fn identifier(&self) -> &str {
        match self {
            LifecycleEvent::BeforeLoad { identifier }
            | LifecycleEvent::OnLoad { identifier, .. }
            | LifecycleEvent::AfterLoad { identifier, .. } => identifier,
        }
    }
}

/// Listener signature. The return value only matters for `onLoad`.
pub type ListenerFn = dyn Fn(&LifecycleEvent<'_>) -> Result<Option<Value>> + Send + Sync;

/// A registered lifecycle listener
#[derive(Clone)]
pub struct Listener(Arc<ListenerFn>);

impl Listener {
    /// Listener receiving every event it is registered for
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&LifecycleEvent<'_>) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        Self(Arc::new(func))
    }

    /// `beforeLoad(identifier)` listener
    pub fn before_load<F>(func: F) -> Self
    where
        F: Fn(&str) -> Result<()> + Send + Sync + 'static,
    {
        Self::new(move |event| {
            if let LifecycleEvent::BeforeLoad { identifier } = event {
                func(identifier)?;
            }
            Ok(None)
        })
    }

    /// `onLoad(identifier, source, result)` listener; `Some` replaces the result
    pub fn on_load<F>(func: F) -> Self
    where
        F: Fn(&str, &str, &Value) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        Self::new(move |event| match event {
            LifecycleEvent::OnLoad {
                identifier,
                source,
                result,
            } => func(identifier, source, result),
            _ => Ok(None),
        })
    }

    /// `afterLoad(result, identifier)` listener
    pub fn after_load<F>(func: F) -> Self
    where
        F: Fn(&Value, &str) -> Result<()> + Send + Sync + 'static,
    {
        Self::new(move |event| {
            if let LifecycleEvent::AfterLoad { result, identifier } = event {
                func(result, identifier)?;
            }
            Ok(None)
        })
    }

    /// Deliver an event
    pub fn call(&self, event: &LifecycleEvent<'_>) -> Result<Option<Value>> {
        (self.0)(event)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Listener) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Listener")
    }
}

/// Listener lists per event, in registration order
#[derive(Debug, Clone, Default)]
pub struct Listeners {
    before_load: Vec<Listener>,
    on_load: Vec<Listener>,
    after_load: Vec<Listener>,
}

impl Listeners {
    /// Register a listener; the same handle is only kept once per event
    pub fn add(&mut self, kind: EventKind, listener: Listener) -> bool {
        let list = self.list_mut(kind);
        if list.iter().any(|l| l.ptr_eq(&listener)) {
            return false;
        }
        list.push(listener);
        true
    }

    /// Unregister a listener handle
    pub fn remove(&mut self, kind: EventKind, listener: &Listener) -> bool {
        let list = self.list_mut(kind);
        let before = list.len();
        list.retain(|l| !l.ptr_eq(listener));
        list.len() != before
    }

    /// Listeners for one event
    pub fn get(&self, kind: EventKind) -> &[Listener] {
        match kind {
            EventKind::BeforeLoad => &self.before_load,
            EventKind::OnLoad => &self.on_load,
            EventKind::AfterLoad => &self.after_load,
        }
    }

    fn list_mut(&mut self, kind: EventKind) -> &mut Vec<Listener> {
        match kind {
            EventKind::BeforeLoad => &mut self.before_load,
            EventKind::OnLoad => &mut self.on_load,
            EventKind::AfterLoad => &mut self.after_load,
        }
    }
}

/// Emit `beforeLoad`; return values are ignored
pub fn emit_before_load(listeners: &[Listener], identifier: &str) -> Result<()> {
    let event = LifecycleEvent::BeforeLoad { identifier };
    for listener in listeners {
        listener.call(&event)?;
    }
    Ok(())
}

/// Emit `onLoad` as a sequential reduction over the result
pub fn emit_on_load(
    listeners: &[Listener],
    identifier: &str,
    source: &str,
    mut result: Value,
) -> Result<Value> {
    for listener in listeners {
        let replacement = listener.call(&LifecycleEvent::OnLoad {
            identifier,
            source,
            result: &result,
        })?;
        if let Some(value) = replacement.filter(|value| !value.is_nullish()) {
            debug!("onLoad listener replaced result of {}", identifier);
            result = value;
        }
    }
    Ok(result)
}

/// Emit `afterLoad`; return values are ignored
pub fn emit_after_load(listeners: &[Listener], result: &Value, identifier: &str) -> Result<()> {
    let event = LifecycleEvent::AfterLoad { result, identifier };
    for listener in listeners {
        listener.call(&event)?;
    }
    Ok(())
}
