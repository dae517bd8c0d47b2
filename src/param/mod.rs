// Versioned key-value parameter records.
//
// FileId (file-creation parameters) and OpenOption (query-open parameters)
// share this mechanism: a layout map selected by a 32-bit version number
// describes the well-known keys; anything outside the layout lives in an
// auxiliary hash. Both parts serialize. On load the layout is selected by
// the version tag recorded in the bytes, not by the newest version the
// code knows, so records round-trip byte-for-byte across versions.

pub mod file_id;
pub mod open_option;

use crate::error::{DbError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key of a parameter entry: a well-known key number plus an array index
/// (0 for scalar keys).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ParamKey {
    pub key: i32,
    pub index: i32,
}

impl ParamKey {
    pub fn scalar(key: i32) -> Self {
        Self { key, index: 0 }
    }

    pub fn indexed(key: i32, index: i32) -> Self {
        Self { key, index }
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index == 0 {
            write!(f, "{}", self.key)
        } else {
            write!(f, "{}[{}]", self.key, self.index)
        }
    }
}

/// Value kinds a parameter record can hold. `Object` is an opaque handle
/// that is never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    String(String),
    Integer(i32),
    LongLong(i64),
    Boolean(bool),
    Double(f64),
    Nested(Box<RecordContent>),
    #[serde(skip)]
    Object(u64),
}

impl ParamValue {
    fn kind(&self) -> SlotKind {
        match self {
            ParamValue::String(_) => SlotKind::String,
            ParamValue::Integer(_) => SlotKind::Integer,
            ParamValue::LongLong(_) => SlotKind::LongLong,
            ParamValue::Boolean(_) => SlotKind::Boolean,
            ParamValue::Double(_) => SlotKind::Double,
            ParamValue::Nested(_) => SlotKind::Nested,
            ParamValue::Object(_) => SlotKind::Object,
        }
    }
}

/// Type tag of a layout entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    String,
    Integer,
    LongLong,
    Boolean,
    Double,
    Nested,
    Object,
}

/// One well-known key in a versioned layout.
#[derive(Debug, Clone, Copy)]
pub struct LayoutEntry {
    pub key: i32,
    pub kind: SlotKind,
    pub is_array: bool,
}

impl LayoutEntry {
    pub const fn new(key: i32, kind: SlotKind, is_array: bool) -> Self {
        Self {
            key,
            kind,
            is_array,
        }
    }
}

/// Layout selector: given a version number, the ordered list of well-known
/// keys for that version. Implemented per record family (FileId,
/// OpenOption).
pub trait LayoutProvider: Send + Sync {
    /// Highest version this provider knows.
    fn current_version(&self) -> u32;
    /// Layout for an exact version; `None` for unknown versions.
    fn layout(&self, version: u32) -> Option<&'static [LayoutEntry]>;
}

/// Serialized portion of a record. Also the in-memory content; keeping the
/// two identical is what makes round-trips exact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordContent {
    pub version: u32,
    /// Values for keys the record's layout knows, keyed by (key, index).
    pub entries: BTreeMap<ParamKey, ParamValue>,
    /// Values for keys outside the layout.
    pub extras: BTreeMap<ParamKey, ParamValue>,
}

/// A thread-safe versioned parameter record. Instances are freely shared;
/// every read and write serializes on the per-instance latch.
pub struct ParamRecord {
    provider: &'static dyn LayoutProvider,
    inner: Mutex<RecordContent>,
}

impl ParamRecord {
    pub fn new(provider: &'static dyn LayoutProvider) -> Self {
        let version = provider.current_version();
        Self {
            provider,
            inner: Mutex::new(RecordContent {
                version,
                entries: BTreeMap::new(),
                extras: BTreeMap::new(),
            }),
        }
    }

    pub fn with_version(provider: &'static dyn LayoutProvider, version: u32) -> Result<Self> {
        if provider.layout(version).is_none() {
            return Err(DbError::BadArgument(format!(
                "unknown parameter layout version {}",
                version
            )));
        }
        Ok(Self {
            provider,
            inner: Mutex::new(RecordContent {
                version,
                entries: BTreeMap::new(),
                extras: BTreeMap::new(),
            }),
        })
    }

    pub fn version(&self) -> u32 {
        self.inner.lock().version
    }

    fn layout_entry(&self, version: u32, key: i32) -> Option<LayoutEntry> {
        self.provider
            .layout(version)?
            .iter()
            .find(|e| e.key == key)
            .copied()
    }

    fn set(&self, key: ParamKey, value: ParamValue) {
        let mut inner = self.inner.lock();
        match self.layout_entry(inner.version, key.key) {
            Some(entry) if entry.kind == value.kind() && (entry.is_array || key.index == 0) => {
                inner.entries.insert(key, value);
            }
            // Type or arity mismatch against the layout, or an unknown
            // key: the auxiliary hash keeps it.
            _ => {
                inner.extras.insert(key, value);
            }
        }
    }

    fn get(&self, key: ParamKey) -> Option<ParamValue> {
        let inner = self.inner.lock();
        inner
            .entries
            .get(&key)
            .or_else(|| inner.extras.get(&key))
            .cloned()
    }

    pub fn set_string(&self, key: ParamKey, value: impl Into<String>) {
        self.set(key, ParamValue::String(value.into()));
    }

    pub fn set_integer(&self, key: ParamKey, value: i32) {
        self.set(key, ParamValue::Integer(value));
    }

    pub fn set_longlong(&self, key: ParamKey, value: i64) {
        self.set(key, ParamValue::LongLong(value));
    }

    pub fn set_boolean(&self, key: ParamKey, value: bool) {
        self.set(key, ParamValue::Boolean(value));
    }

    pub fn set_double(&self, key: ParamKey, value: f64) {
        self.set(key, ParamValue::Double(value));
    }

    pub fn set_object(&self, key: ParamKey, handle: u64) {
        self.set(key, ParamValue::Object(handle));
    }

    pub fn set_nested(&self, key: ParamKey, content: RecordContent) {
        self.set(key, ParamValue::Nested(Box::new(content)));
    }

    pub fn get_string(&self, key: ParamKey) -> Option<String> {
        match self.get(key) {
            Some(ParamValue::String(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_integer(&self, key: ParamKey) -> Option<i32> {
        match self.get(key) {
            Some(ParamValue::Integer(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_longlong(&self, key: ParamKey) -> Option<i64> {
        match self.get(key) {
            Some(ParamValue::LongLong(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_boolean(&self, key: ParamKey) -> Option<bool> {
        match self.get(key) {
            Some(ParamValue::Boolean(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_double(&self, key: ParamKey) -> Option<f64> {
        match self.get(key) {
            Some(ParamValue::Double(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_object(&self, key: ParamKey) -> Option<u64> {
        match self.get(key) {
            Some(ParamValue::Object(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_nested(&self, key: ParamKey) -> Option<RecordContent> {
        match self.get(key) {
            Some(ParamValue::Nested(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn remove(&self, key: ParamKey) {
        let mut inner = self.inner.lock();
        inner.entries.remove(&key);
        inner.extras.remove(&key);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.extras.clear();
    }

    /// Count of array elements present for a key (dense prefix assumed).
    pub fn array_len(&self, key: i32) -> usize {
        let inner = self.inner.lock();
        let mut n = 0;
        while inner
            .entries
            .contains_key(&ParamKey::indexed(key, n as i32))
            || inner.extras.contains_key(&ParamKey::indexed(key, n as i32))
        {
            n += 1;
        }
        n
    }

    /// Serialize with the record's own version. Object handles are
    /// dropped; everything else is kept verbatim.
    pub fn store(&self) -> Result<Vec<u8>> {
        let inner = self.inner.lock();
        let wire = RecordContent {
            version: inner.version,
            entries: inner
                .entries
                .iter()
                .filter(|(_, v)| v.kind() != SlotKind::Object)
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            extras: inner
                .extras
                .iter()
                .filter(|(_, v)| v.kind() != SlotKind::Object)
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
        };
        Ok(bincode::serde::encode_to_vec(
            &wire,
            bincode::config::standard(),
        )?)
    }

    /// Load from bytes. The version recorded in the bytes selects the
    /// layout: keys that layout knows become entries, everything else goes
    /// to the auxiliary hash, so a later store reproduces the content.
    pub fn load(provider: &'static dyn LayoutProvider, bytes: &[u8]) -> Result<Self> {
        let (wire, _): (RecordContent, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        if provider.layout(wire.version).is_none() {
            return Err(DbError::Serialization(format!(
                "unknown parameter layout version {}",
                wire.version
            )));
        }
        let record = Self {
            provider,
            inner: Mutex::new(RecordContent {
                version: wire.version,
                entries: BTreeMap::new(),
                extras: BTreeMap::new(),
            }),
        };
        for (k, v) in wire.entries.into_iter().chain(wire.extras) {
            record.set(k, v);
        }
        Ok(record)
    }

    /// Re-home the record under another known version. Entries the new
    /// layout does not know move to the auxiliary hash and survive the
    /// next store/load cycle; auxiliary keys the new layout does know move
    /// back into entries. Content is preserved either way.
    pub fn migrate(&self, version: u32) -> Result<()> {
        if self.provider.layout(version).is_none() {
            return Err(DbError::BadArgument(format!(
                "unknown parameter layout version {}",
                version
            )));
        }
        let mut inner = self.inner.lock();
        let all: Vec<(ParamKey, ParamValue)> = inner
            .entries
            .iter()
            .chain(inner.extras.iter())
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        inner.version = version;
        inner.entries.clear();
        inner.extras.clear();
        drop(inner);
        for (k, v) in all {
            self.set(k, v);
        }
        Ok(())
    }

    /// Snapshot of the content (for nesting into another record).
    pub fn content(&self) -> RecordContent {
        self.inner.lock().clone()
    }

    /// Key-wise equality, ignoring which side of the layout/extra split a
    /// value sits on.
    pub fn content_equals(&self, other: &ParamRecord) -> bool {
        let a = self.inner.lock();
        let b = other.inner.lock();
        let merge = |c: &RecordContent| -> BTreeMap<ParamKey, ParamValue> {
            c.entries
                .iter()
                .chain(c.extras.iter())
                .filter(|(_, v)| v.kind() != SlotKind::Object)
                .map(|(k, v)| (*k, v.clone()))
                .collect()
        };
        merge(&a) == merge(&b)
    }

    /// Human-readable dump.
    pub fn dump(&self) -> String {
        let inner = self.inner.lock();
        serde_json::to_string(&*inner).unwrap_or_else(|_| String::from("{}"))
    }
}

impl Clone for ParamRecord {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider,
            inner: Mutex::new(self.inner.lock().clone()),
        }
    }
}

impl fmt::Debug for ParamRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamRecord")
            .field("content", &*self.inner.lock())
            .finish()
    }
}
