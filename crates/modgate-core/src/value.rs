// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module export values.
//!
//! Objects and arrays are shared references: cloning a [`Value`] hands out
//! another handle to the same live instance, the way a module cache hands the
//! same `exports` to every requester. [`Value::deep_copy`] is the explicit,
//! type-aware copy used by the `use_copy` policy.

use crate::error::Result;
use parking_lot::RwLock;
use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Rendering of a container already being rendered further up
const CIRCULAR: &str = "[Circular]";

thread_local! {
    // containers currently being debug-formatted on this thread
    static FORMATTING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Format a container unless it is already being formatted further up
fn fmt_guarded(
    addr: usize,
    f: &mut fmt::Formatter<'_>,
    body: impl FnOnce(&mut fmt::Formatter<'_>) -> fmt::Result,
) -> fmt::Result {
    if FORMATTING.with(|stack| stack.borrow().contains(&addr)) {
        return f.write_str(CIRCULAR);
    }
    FORMATTING.with(|stack| stack.borrow_mut().push(addr));
    let result = body(f);
    FORMATTING.with(|stack| stack.borrow_mut().pop());
    result
}

/// Signature of a native function stored in module exports
pub type NativeFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

/// A module export value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// undefined
    #[default]
    Undefined,
    /// null
    Null,
    /// Boolean value
    Boolean(bool),
    /// Number (IEEE 754 double)
    Number(f64),
    /// String
    String(String),
    /// Shared array
    Array(Array),
    /// Shared object
    Object(Object),
    /// Native function
    Function(Function),
    /// Opaque host resource (open handle, bound state)
    Opaque(Opaque),
}

/// Shared, mutable property map
#[derive(Clone, Default)]
pub struct Object(Arc<RwLock<BTreeMap<String, Value>>>);

impl Object {
    /// Create an empty object
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an object from existing properties
    pub fn from_map(map: BTreeMap<String, Value>) -> Self {
        Self(Arc::new(RwLock::new(map)))
    }

    /// Read a property
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.read().get(key).cloned()
    }

    /// Write a property, returning the previous value
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.write().insert(key.into(), value)
    }

    /// Delete a property
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.write().remove(key)
    }

    /// Property names in order
    pub fn keys(&self) -> Vec<String> {
        self.0.read().keys().cloned().collect()
    }

    /// Number of properties
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Whether the object has no properties
    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Copy of the current properties (values are shallow handles)
    pub fn entries(&self) -> BTreeMap<String, Value> {
        self.0.read().clone()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Some(map) => {
                fmt_guarded(self.addr(), f, |f| f.debug_map().entries(map.iter()).finish())
            }
            None => f.write_str("{<locked>}"),
        }
    }
}

/// Shared, mutable array
#[derive(Clone, Default)]
pub struct Array(Arc<RwLock<Vec<Value>>>);

impl Array {
    /// Create an array from elements
    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    /// Read an element
    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.read().get(index).cloned()
    }

    /// Append an element
    pub fn push(&self, value: Value) {
        self.0.write().push(value);
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Whether the array is empty
    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Copy of the current elements (values are shallow handles)
    pub fn items(&self) -> Vec<Value> {
        self.0.read().clone()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Array) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Some(items) => {
                fmt_guarded(self.addr(), f, |f| f.debug_list().entries(items.iter()).finish())
            }
            None => f.write_str("[<locked>]"),
        }
    }
}

/// A named native function
#[derive(Clone)]
pub struct Function {
    name: Option<String>,
    func: Arc<NativeFn>,
}

impl Function {
    /// Wrap a closure as a native function
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: Some(name.into()),
            func: Arc::new(func),
        }
    }

    /// Function name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Invoke the function
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "[Function: {}]", name),
            None => write!(f, "[Function (anonymous)]"),
        }
    }
}

/// Host resource that cannot be duplicated. Copies share the handle.
#[derive(Clone)]
pub struct Opaque(Arc<dyn Any + Send + Sync>);

impl Opaque {
    /// Wrap a host resource
    pub fn new<T: Any + Send + Sync>(resource: T) -> Self {
        Self(Arc::new(resource))
    }

    /// Borrow the resource as `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Opaque) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[Opaque]")
    }
}

impl Value {
    /// Build an object value from key/value pairs
    pub fn object<K, I>(props: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(Object::from_map(
            props.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Build an array value
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Array::from_vec(items))
    }

    /// Returns true if this value is nullish (null or undefined).
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// String contents, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Object handle, if this is an object
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Property lookup on objects; `None` for every other kind
    pub fn get(&self, key: &str) -> Option<Value> {
        self.as_object().and_then(|obj| obj.get(key))
    }

    /// Converts the value to a boolean (ToBoolean).
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => !n.is_nan() && *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Opaque(_) => true,
        }
    }

    /// Returns the type of this value as a string.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) | Value::Object(_) | Value::Opaque(_) => "object",
            Value::Function(_) => "function",
        }
    }

    /// Whether both values are the same live instance (or equal primitives)
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Opaque(a), Value::Opaque(b)) => a.ptr_eq(b),
            (Value::Object(_) | Value::Array(_), _) | (_, Value::Object(_) | Value::Array(_)) => {
                false
            }
            _ => self == other,
        }
    }

    /// Independent copy of this value.
    ///
    /// Objects and arrays are duplicated recursively, preserving internal
    /// aliasing and cycles. Functions and opaque resources are shared: they
    /// have no sound generic duplicate.
    pub fn deep_copy(&self) -> Value {
        let mut seen = HashMap::new();
        self.copy_into(&mut seen)
    }

    fn copy_into(&self, seen: &mut HashMap<usize, Value>) -> Value {
        match self {
            Value::Object(obj) => {
                if let Some(copy) = seen.get(&obj.addr()) {
                    return copy.clone();
                }
                let copy = Object::new();
                seen.insert(obj.addr(), Value::Object(copy.clone()));
                for (key, value) in obj.entries() {
                    copy.set(key, value.copy_into(seen));
                }
                Value::Object(copy)
            }
            Value::Array(arr) => {
                if let Some(copy) = seen.get(&arr.addr()) {
                    return copy.clone();
                }
                let copy = Array::default();
                seen.insert(arr.addr(), Value::Array(copy.clone()));
                for item in arr.items() {
                    copy.push(item.copy_into(seen));
                }
                Value::Array(copy)
            }
            other => other.clone(),
        }
    }

    /// Convert serde_json::Value to a module value
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(arr) => {
                Value::array(arr.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::object(obj.iter().map(|(k, v)| (k.clone(), Value::from_json(v))))
            }
        }
    }

    /// Render as JSON for display. Functions and resources become
    /// descriptive strings, `undefined` becomes `null`, and a container that
    /// contains itself renders as `"[Circular]"` where it repeats.
    pub fn to_json(&self) -> serde_json::Value {
        self.json_within(&mut Vec::new())
    }

    fn json_within(&self, ancestors: &mut Vec<usize>) -> serde_json::Value {
        let addr = match self {
            Value::Array(arr) => Some(arr.addr()),
            Value::Object(obj) => Some(obj.addr()),
            _ => None,
        };
        if let Some(addr) = addr {
            if ancestors.contains(&addr) {
                return serde_json::Value::String(CIRCULAR.to_string());
            }
            ancestors.push(addr);
        }

        let json = match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER => {
                serde_json::Value::from(*n as i64)
            }
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(arr) => serde_json::Value::Array(
                arr.items()
                    .iter()
                    .map(|item| item.json_within(ancestors))
                    .collect(),
            ),
            Value::Object(obj) => serde_json::Value::Object(
                obj.entries()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.json_within(ancestors)))
                    .collect(),
            ),
            Value::Function(func) => serde_json::Value::String(format!("{:?}", func)),
            Value::Opaque(_) => serde_json::Value::String("[Opaque]".to_string()),
        };

        if addr.is_some() {
            ancestors.pop();
        }
        json
    }

    /// Structural equality. A pair of containers met again while already
    /// being compared counts as equal.
    fn eq_within(&self, other: &Value, comparing: &mut HashSet<(usize, usize)>) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => {
                if a.ptr_eq(b) || !comparing.insert((a.addr(), b.addr())) {
                    return true;
                }
                let (left, right) = (a.items(), b.items());
                left.len() == right.len()
                    && left.iter().zip(&right).all(|(x, y)| x.eq_within(y, comparing))
            }
            (Value::Object(a), Value::Object(b)) => {
                if a.ptr_eq(b) || !comparing.insert((a.addr(), b.addr())) {
                    return true;
                }
                let (left, right) = (a.entries(), b.entries());
                left.len() == right.len()
                    && left.iter().zip(&right).all(|((ka, va), (kb, vb))| {
                        ka == kb && va.eq_within(vb, comparing)
                    })
            }
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Opaque(a), Value::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.eq_within(other, &mut HashSet::new())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(_) | Value::Object(_) => write!(f, "{}", self.to_json()),
            Value::Function(func) => write!(f, "{:?}", func),
            Value::Opaque(_) => write!(f, "[Opaque]"),
        }
    }
}
