//! Key/value endpoint contract.
//!
//! Links move values between keys held in each node's local store. The
//! store itself lives outside this crate; nodes talk to it through
//! [`KvStore`]. [`MemoryStore`] is a small in-process implementation used by
//! the node binary and by tests.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Element type of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ValueType {
    Bool = 0,
    U8 = 1,
    I8 = 2,
    U16 = 3,
    I16 = 4,
    U32 = 5,
    I32 = 6,
    F32 = 7,
    U64 = 8,
    I64 = 9,
    F64 = 10,
}

impl ValueType {
    /// Wire representation.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::Bool | Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    /// Whether MIN/MAX/SUM/AVG make sense for this type.
    pub const fn is_numeric(self) -> bool {
        !matches!(self, Self::Bool)
    }
}

impl TryFrom<u8> for ValueType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Bool,
            1 => Self::U8,
            2 => Self::I8,
            3 => Self::U16,
            4 => Self::I16,
            5 => Self::U32,
            6 => Self::I32,
            7 => Self::F32,
            8 => Self::U64,
            9 => Self::I64,
            10 => Self::F64,
            other => return Err(Error::UnknownValueType(other)),
        })
    }
}

/// Shape of a stored key: element type and element count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyMeta {
    pub ty: ValueType,
    pub count: u8,
}

impl KeyMeta {
    /// Payload size in bytes.
    pub const fn byte_len(&self) -> usize {
        self.ty.size() * self.count as usize
    }
}

/// A typed value: `count` little-endian elements of `ty`.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    meta: KeyMeta,
    data: Vec<u8>,
}

impl Value {
    /// Wrap raw little-endian bytes, checking the length against the shape.
    pub fn new(ty: ValueType, count: u8, data: Vec<u8>) -> Result<Self> {
        let meta = KeyMeta { ty, count };
        if data.len() != meta.byte_len() {
            return Err(Error::ValueLength {
                expected: meta.byte_len(),
                actual: data.len(),
            });
        }
        Ok(Self { meta, data })
    }

    /// A single numeric element, converted into `ty` (saturating).
    pub fn from_f64(ty: ValueType, x: f64) -> Self {
        let data = match ty {
            ValueType::Bool => vec![(x != 0.0) as u8],
            ValueType::U8 => (x as u8).to_le_bytes().to_vec(),
            ValueType::I8 => (x as i8).to_le_bytes().to_vec(),
            ValueType::U16 => (x as u16).to_le_bytes().to_vec(),
            ValueType::I16 => (x as i16).to_le_bytes().to_vec(),
            ValueType::U32 => (x as u32).to_le_bytes().to_vec(),
            ValueType::I32 => (x as i32).to_le_bytes().to_vec(),
            ValueType::F32 => (x as f32).to_le_bytes().to_vec(),
            ValueType::U64 => (x as u64).to_le_bytes().to_vec(),
            ValueType::I64 => (x as i64).to_le_bytes().to_vec(),
            ValueType::F64 => x.to_le_bytes().to_vec(),
        };
        Self {
            meta: KeyMeta { ty, count: 1 },
            data,
        }
    }

    pub fn from_u32(x: u32) -> Self {
        Self {
            meta: KeyMeta { ty: ValueType::U32, count: 1 },
            data: x.to_le_bytes().to_vec(),
        }
    }

    pub fn from_bool(x: bool) -> Self {
        Self {
            meta: KeyMeta { ty: ValueType::Bool, count: 1 },
            data: vec![x as u8],
        }
    }

    pub const fn meta(&self) -> KeyMeta {
        self.meta
    }

    pub const fn ty(&self) -> ValueType {
        self.meta.ty
    }

    pub const fn count(&self) -> u8 {
        self.meta.count
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The first element as `f64`, if there is one.
    pub fn to_f64(&self) -> Option<f64> {
        let d = &self.data;
        if d.len() < self.meta.ty.size() {
            return None;
        }
        Some(match self.meta.ty {
            ValueType::Bool => f64::from(d[0] != 0),
            ValueType::U8 => f64::from(d[0]),
            ValueType::I8 => f64::from(d[0] as i8),
            ValueType::U16 => f64::from(u16::from_le_bytes([d[0], d[1]])),
            ValueType::I16 => f64::from(i16::from_le_bytes([d[0], d[1]])),
            ValueType::U32 => f64::from(u32::from_le_bytes([d[0], d[1], d[2], d[3]])),
            ValueType::I32 => f64::from(i32::from_le_bytes([d[0], d[1], d[2], d[3]])),
            ValueType::F32 => f64::from(f32::from_le_bytes([d[0], d[1], d[2], d[3]])),
            ValueType::U64 => u64::from_le_bytes(first8(d)) as f64,
            ValueType::I64 => i64::from_le_bytes(first8(d)) as f64,
            ValueType::F64 => f64::from_le_bytes(first8(d)),
        })
    }
}

fn first8(d: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&d[..8]);
    out
}

/// Local key/value store backing link endpoints.
pub trait KvStore: Send + Sync {
    /// Shape of a key.
    fn meta(&self, key: u32) -> Result<KeyMeta>;

    /// Current value of a key.
    fn get(&self, key: u32) -> Result<Value>;

    /// Write a key. The value must match the key's shape if it exists.
    fn set(&self, key: u32, value: Value) -> Result<()>;
}

/// In-memory [`KvStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<u32, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a key regardless of its previous shape.
    pub fn define(&self, key: u32, value: Value) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryStore {
    fn meta(&self, key: u32) -> Result<KeyMeta> {
        self.get(key).map(|v| v.meta())
    }

    fn get(&self, key: u32) -> Result<Value> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
            .ok_or(Error::UnknownKey(key))
    }

    fn set(&self, key: u32, value: Value) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = entries.get(&key) {
            if existing.meta() != value.meta() {
                return Err(Error::TypeMismatch {
                    key,
                    expected: existing.meta(),
                    actual: value.meta(),
                });
            }
        }
        entries.insert(key, value);
        Ok(())
    }
}
