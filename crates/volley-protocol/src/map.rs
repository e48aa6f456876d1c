//! Typed key/value maps.
//!
//! Application payloads, room configuration, and room/participant
//! properties are all string-keyed maps of a small set of scalar types.
//! [`TypedMap`] is the in-memory form; on the wire each pair becomes a
//! [`MapEntry`].
//!
//! ## Integer encoding
//!
//! The application never says whether an integer is signed. The writer
//! infers it from the value: non-negative integers use the unsigned
//! varint encoding, negative ones the zigzag (`sint`) encoding. The reader
//! maps every 32-bit encoding to [`Value::I32`] and every 64-bit encoding
//! to [`Value::I64`], so `U32(u32::MAX)` comes back as `I32(-1)`. Peers
//! rely on this exact behavior, so it is kept even though it is lossy.

use std::collections::BTreeMap;
use std::collections::btree_map;

use prost::encoding::encoded_len_varint;
use serde::{Deserialize, Serialize};

use crate::types::{EntryValue, MapEntry};

/// Fixed per-entry overhead counted by [`TypedMap::serialized_size`].
const ENTRY_OVERHEAD: usize = 4;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A single typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Converts this value to a wire entry named `key`.
    pub fn to_entry(&self, key: &str) -> MapEntry {
        let value = match self {
            Self::I32(v) if *v >= 0 => EntryValue::Uint32(*v as u32),
            Self::I32(v) => EntryValue::Sint32(*v),
            Self::U32(v) => EntryValue::Uint32(*v),
            Self::I64(v) if *v >= 0 => EntryValue::Uint64(*v as u64),
            Self::I64(v) => EntryValue::Sint64(*v),
            Self::U64(v) => EntryValue::Uint64(*v),
            Self::F64(v) => EntryValue::Double(*v),
            Self::Bool(v) => EntryValue::Bool(*v),
            Self::Str(v) => EntryValue::Str(v.clone()),
            Self::Bytes(v) => EntryValue::Bytes(v.clone()),
        };
        MapEntry {
            name: key.to_owned(),
            value: Some(value),
        }
    }

    /// Reads the value of a wire entry. Returns `None` for a void entry.
    pub fn from_entry(entry: &MapEntry) -> Option<Self> {
        let value = match entry.value.as_ref()? {
            EntryValue::Int32(v) | EntryValue::Sint32(v) => Self::I32(*v),
            EntryValue::Uint32(v) => Self::I32(*v as i32),
            EntryValue::Int64(v) | EntryValue::Sint64(v) => Self::I64(*v),
            EntryValue::Uint64(v) => Self::I64(*v as i64),
            EntryValue::Double(v) => Self::F64(*v),
            EntryValue::Bool(v) => Self::Bool(*v),
            EntryValue::Str(v) => Self::Str(v.clone()),
            EntryValue::Bytes(v) => Self::Bytes(v.clone()),
        };
        Some(value)
    }

    /// Encoded length of the value alone, using the encoding
    /// [`Value::to_entry`] would pick.
    pub fn serialized_size(&self) -> usize {
        match self {
            Self::I32(v) if *v >= 0 => encoded_len_varint(*v as u64),
            Self::I32(v) => encoded_len_varint(zigzag32(*v) as u64),
            Self::U32(v) => encoded_len_varint(*v as u64),
            Self::I64(v) if *v >= 0 => encoded_len_varint(*v as u64),
            Self::I64(v) => encoded_len_varint(zigzag64(*v)),
            Self::U64(v) => encoded_len_varint(*v),
            Self::F64(_) => 8,
            Self::Bool(_) => 1,
            Self::Str(s) => len_delimited(s.len()),
            Self::Bytes(b) => len_delimited(b.len()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I32(v) => Some(i64::from(*v)),
            Self::U32(v) => Some(i64::from(*v)),
            Self::I64(v) => Some(*v),
            Self::U64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }
}

fn zigzag32(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

fn zigzag64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn len_delimited(len: usize) -> usize {
    len + encoded_len_varint(len as u64)
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::U64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

// ---------------------------------------------------------------------------
// TypedMap
// ---------------------------------------------------------------------------

/// An ordered, string-keyed map of [`Value`]s.
///
/// Keys iterate in sorted order, which keeps the wire form deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypedMap {
    entries: BTreeMap<String, Value>,
}

impl TypedMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, or removes it when `value` is `None`.
    /// Returns the previous value.
    pub fn put(
        &mut self,
        key: impl Into<String>,
        value: Option<Value>,
    ) -> Option<Value> {
        let key = key.into();
        match value {
            Some(value) => self.entries.insert(key, value),
            None => self.entries.remove(&key),
        }
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Estimated encoded size, used to enforce payload ceilings before
    /// anything is sent.
    ///
    /// Each entry counts its key (with a varint length prefix), its value
    /// (see [`Value::serialized_size`]) and a fixed overhead of 4 bytes.
    pub fn serialized_size(&self) -> usize {
        self.entries
            .iter()
            .map(|(key, value)| {
                ENTRY_OVERHEAD + len_delimited(key.len()) + value.serialized_size()
            })
            .sum()
    }

    /// Converts the map to wire entries, in key order.
    pub fn to_wire(&self) -> Vec<MapEntry> {
        self.entries
            .iter()
            .map(|(key, value)| value.to_entry(key))
            .collect()
    }

    /// Builds a map from wire entries. Void entries are skipped; a repeated
    /// key keeps its last value.
    pub fn from_wire(entries: &[MapEntry]) -> Self {
        entries
            .iter()
            .filter_map(|entry| {
                Value::from_entry(entry).map(|value| (entry.name.clone(), value))
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for TypedMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a TypedMap {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
