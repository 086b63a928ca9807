//! The value model carried by the wire codec.
//!
//! A [`Value`] is a tree of primitives and containers plus [`Value::Handle`],
//! the one runtime-only variant standing for a live object (a local export or
//! a remote proxy). Containers are shared and interiorly mutable so that a
//! sequence can be held by several values at once, exactly like the object
//! graphs the runtime mirrors; that is also why the encoder has to watch for
//! cycles instead of assuming a tree.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::object::Handle;

/// A shared, mutable ordered sequence of values.
#[derive(Clone, Default)]
pub struct List(Arc<RwLock<Vec<Value>>>);

/// A shared, mutable mapping with insertion-ordered `(key, value)` pairs.
///
/// Keys are unique under deep equality; `insert` replaces the value of an
/// existing key in place.
#[derive(Clone, Default)]
pub struct Dict(Arc<RwLock<Vec<(Value, Value)>>>);

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl List {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        List(Arc::new(RwLock::new(items)))
    }

    pub fn len(&self) -> usize {
        read(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.0).is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        read(&self.0).get(index).cloned()
    }

    pub fn set(&self, index: usize, value: Value) -> bool {
        let mut items = write(&self.0);
        match items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn push(&self, value: Value) {
        write(&self.0).push(value);
    }

    pub fn remove(&self, index: usize) -> Option<Value> {
        let mut items = write(&self.0);
        if index < items.len() {
            Some(items.remove(index))
        } else {
            None
        }
    }

    /// Clones the current contents. Elements that are themselves containers
    /// stay shared with the original.
    pub fn snapshot(&self) -> Vec<Value> {
        read(&self.0).clone()
    }

    /// Stable identity of the underlying storage, used for cycle detection.
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: Vec<(Value, Value)>) -> Self {
        Dict(Arc::new(RwLock::new(pairs)))
    }

    pub fn len(&self) -> usize {
        read(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.0).is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        read(&self.0)
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Inserts or replaces the entry for `key`, returning the prior value.
    pub fn insert(&self, key: Value, value: Value) -> Option<Value> {
        let mut pairs = write(&self.0);
        for (k, v) in pairs.iter_mut() {
            if *k == key {
                return Some(std::mem::replace(v, value));
            }
        }
        pairs.push((key, value));
        None
    }

    pub fn remove(&self, key: &Value) -> Option<Value> {
        let mut pairs = write(&self.0);
        let pos = pairs.iter().position(|(k, _)| k == key)?;
        Some(pairs.remove(pos).1)
    }

    pub fn snapshot(&self) -> Vec<(Value, Value)> {
        read(&self.0).clone()
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

/// A nomir value.
///
/// All variants except [`Value::Handle`] have a direct wire form; a handle is
/// shipped through the reference fallback of the codec.
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Text(String),
    List(List),
    Map(Dict),
    Handle(Handle),
}

impl Value {
    /// Wraps a live object into a value.
    pub fn object<T: crate::object::MirrorObject + 'static>(obj: T) -> Value {
        Value::Handle(Arc::new(obj))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::List(_) => "sequence",
            Value::Map(_) => "mapping",
            Value::Handle(_) => "object",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Dict> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Value::Handle(h) => Some(h),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(List::from_vec(items))
    }
}

impl From<List> for Value {
    fn from(l: List) -> Self {
        Value::List(l)
    }
}

impl From<Dict> for Value {
    fn from(d: Dict) -> Self {
        Value::Map(d)
    }
}

impl From<Handle> for Value {
    fn from(h: Handle) -> Self {
        Value::Handle(h)
    }
}

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        let a = self.snapshot();
        let b = other.snapshot();
        a == b
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        let a = self.snapshot();
        let b = other.snapshot();
        a == b
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Handle(a), Value::Handle(b)) => match (a.remote_ref(), b.remote_ref()) {
                (Some(ra), Some(rb)) => ra == rb,
                (None, None) => Arc::ptr_eq(a, b),
                _ => false,
            },
            _ => false,
        }
    }
}

const FMT_DEPTH_LIMIT: usize = 8;

fn fmt_value(v: &Value, f: &mut fmt::Formatter<'_>, depth: usize, quote_text: bool) -> fmt::Result {
    if depth > FMT_DEPTH_LIMIT {
        return f.write_str("...");
    }
    match v {
        Value::Nil => f.write_str("nil"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::Int(n) => write!(f, "{n}"),
        Value::Float(x) => write!(f, "{x}"),
        Value::Bytes(b) => write!(f, "bytes[{}]", b.len()),
        Value::Text(s) => {
            if quote_text {
                write!(f, "{s:?}")
            } else {
                f.write_str(s)
            }
        }
        Value::List(items) => {
            f.write_str("[")?;
            for (i, item) in items.snapshot().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                fmt_value(item, f, depth + 1, true)?;
            }
            f.write_str("]")
        }
        Value::Map(pairs) => {
            f.write_str("{")?;
            for (i, (k, val)) in pairs.snapshot().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                fmt_value(k, f, depth + 1, true)?;
                f.write_str(": ")?;
                fmt_value(val, f, depth + 1, true)?;
            }
            f.write_str("}")
        }
        Value::Handle(h) => match h.remote_ref() {
            Some((peer, id)) => write!(f, "<remote {peer}#{id}>"),
            None => f.write_str("<object>"),
        },
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_value(self, f, 0, false)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_value(self, f, 0, true)
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "List(len={})", self.len())
    }
}

impl fmt::Debug for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dict(len={})", self.len())
    }
}

/// Convenience constructor for argument lists in tests and call sites.
pub fn list(items: impl IntoIterator<Item = Value>) -> Value {
    Value::List(List::from_vec(items.into_iter().collect()))
}

/// Convenience constructor for a mapping with text keys.
pub fn dict(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    let pairs = pairs
        .into_iter()
        .map(|(k, v)| (Value::from(k), v))
        .collect();
    Value::Map(Dict::from_pairs(pairs))
}

/// True if `key` already occurs among the pairs; the decoder uses this for
/// duplicate-key rejection.
pub(crate) fn contains_key(seen: &[(Value, Value)], key: &Value) -> bool {
    seen.iter().any(|(k, _)| k == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_equality_follows_contents() {
        let a = list([Value::Int(1), Value::from("x")]);
        let b = list([Value::Int(1), Value::from("x")]);
        assert_eq!(a, b);

        let c = list([Value::Int(2)]);
        assert_ne!(a, c);
    }

    #[test]
    fn shared_lists_alias() {
        let inner = List::from_vec(vec![Value::Int(1)]);
        let a = Value::List(inner.clone());
        inner.push(Value::Int(2));
        assert_eq!(a.as_list().unwrap().len(), 2);
    }

    #[test]
    fn dict_insert_replaces_by_key() {
        let d = Dict::new();
        assert!(d.insert(Value::from("k"), Value::Int(1)).is_none());
        assert_eq!(
            d.insert(Value::from("k"), Value::Int(2)),
            Some(Value::Int(1))
        );
        assert_eq!(d.len(), 1);
        assert_eq!(d.get(&Value::from("k")), Some(Value::Int(2)));
    }

    #[test]
    fn float_keys_compare_bitwise() {
        let a = Value::Float(f64::NAN);
        let b = Value::Float(f64::NAN);
        assert_eq!(a, b);
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
    }

    #[test]
    fn display_quotes_text_only_inside_containers() {
        assert_eq!(Value::from("plain").to_string(), "plain");
        assert_eq!(list([Value::from("x")]).to_string(), "[\"x\"]");
        assert_eq!(
            dict([("a", Value::Int(1))]).to_string(),
            "{\"a\": 1}"
        );
    }

    #[test]
    fn display_survives_cycles() {
        let l = List::new();
        l.push(Value::List(l.clone()));
        // Bounded output rather than infinite recursion.
        let rendered = Value::List(l).to_string();
        assert!(rendered.contains("..."));
    }

    #[test]
    fn accessors_reject_other_variants() {
        assert_eq!(Value::Int(3).as_int(), Some(3));
        assert!(Value::Int(3).as_text().is_none());
        assert!(Value::Nil.is_nil());
        assert_eq!(Value::from("t").type_name(), "text");
    }
}
