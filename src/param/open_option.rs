// OpenOption: the versioned record passed to a driver's open() that
// parameterizes a specific scan.

use super::{LayoutEntry, LayoutProvider, ParamKey, ParamRecord, SlotKind};
use crate::error::{DbError, Result};

/// Well-known OpenOption keys. Numbers are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum OpenOptionKey {
    OpenMode = 0,
    ReadSubMode = 1,
    FetchFieldNumber = 2,
    FetchFieldIndex = 3,
    SearchFieldNumber = 4,
    SearchFieldIndex = 5,
    SearchStart = 6,
    SearchStop = 7,
    SearchStartOpe = 8,
    SearchStopOpe = 9,
    SortKey = 10,
    SortReverse = 11,
    Escape = 12,
    GetByBitSet = 13,
    CacheAllObject = 14,
    FieldSelect = 15,
    TargetFieldNumber = 16,
    TargetFieldIndex = 17,
    Limit = 18,
    Offset = 19,
}

/// Primary open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Search,
    Update,
}

impl OpenMode {
    pub fn from_code(code: i32) -> Result<OpenMode> {
        Ok(match code {
            0 => OpenMode::Read,
            1 => OpenMode::Search,
            2 => OpenMode::Update,
            _ => return Err(DbError::BadArgument(format!("bad open mode {}", code))),
        })
    }

    pub fn code(self) -> i32 {
        match self {
            OpenMode::Read => 0,
            OpenMode::Search => 1,
            OpenMode::Update => 2,
        }
    }
}

/// Sub-kind of a Read open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSubMode {
    Scan,
    Fetch,
}

impl ReadSubMode {
    pub fn from_code(code: i32) -> Result<ReadSubMode> {
        Ok(match code {
            0 => ReadSubMode::Scan,
            1 => ReadSubMode::Fetch,
            _ => return Err(DbError::BadArgument(format!("bad read sub mode {}", code))),
        })
    }

    pub fn code(self) -> i32 {
        match self {
            ReadSubMode::Scan => 0,
            ReadSubMode::Fetch => 1,
        }
    }
}

/// Comparison operator of a search bound. There is no NotEquals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Equals,
    GreaterThan,
    GreaterThanEquals,
    LessThan,
    LessThanEquals,
    EqualsToNull,
    Like,
}

impl CompOp {
    pub fn from_code(code: i32) -> Result<CompOp> {
        Ok(match code {
            0 => CompOp::Equals,
            1 => CompOp::GreaterThan,
            2 => CompOp::GreaterThanEquals,
            3 => CompOp::LessThan,
            4 => CompOp::LessThanEquals,
            5 => CompOp::EqualsToNull,
            6 => CompOp::Like,
            _ => return Err(DbError::BadArgument(format!("bad operator {}", code))),
        })
    }

    pub fn code(self) -> i32 {
        match self {
            CompOp::Equals => 0,
            CompOp::GreaterThan => 1,
            CompOp::GreaterThanEquals => 2,
            CompOp::LessThan => 3,
            CompOp::LessThanEquals => 4,
            CompOp::EqualsToNull => 5,
            CompOp::Like => 6,
        }
    }
}

/// Sort key selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKeySpec {
    ObjectId,
    KeyField,
}

impl SortKeySpec {
    pub fn from_code(code: i32) -> Result<SortKeySpec> {
        Ok(match code {
            0 => SortKeySpec::ObjectId,
            1 => SortKeySpec::KeyField,
            _ => return Err(DbError::BadArgument(format!("bad sort key {}", code))),
        })
    }

    pub fn code(self) -> i32 {
        match self {
            SortKeySpec::ObjectId => 0,
            SortKeySpec::KeyField => 1,
        }
    }
}

const fn scalar(key: OpenOptionKey, kind: SlotKind) -> LayoutEntry {
    LayoutEntry::new(key as i32, kind, false)
}

const fn array(key: OpenOptionKey, kind: SlotKind) -> LayoutEntry {
    LayoutEntry::new(key as i32, kind, true)
}

static LAYOUT_V1: &[LayoutEntry] = &[
    scalar(OpenOptionKey::OpenMode, SlotKind::Integer),
    scalar(OpenOptionKey::ReadSubMode, SlotKind::Integer),
    scalar(OpenOptionKey::FetchFieldNumber, SlotKind::Integer),
    array(OpenOptionKey::FetchFieldIndex, SlotKind::Integer),
    scalar(OpenOptionKey::SearchFieldNumber, SlotKind::Integer),
    array(OpenOptionKey::SearchFieldIndex, SlotKind::Integer),
    array(OpenOptionKey::SearchStart, SlotKind::String),
    array(OpenOptionKey::SearchStop, SlotKind::String),
    array(OpenOptionKey::SearchStartOpe, SlotKind::Integer),
    array(OpenOptionKey::SearchStopOpe, SlotKind::Integer),
    scalar(OpenOptionKey::SortKey, SlotKind::Integer),
    scalar(OpenOptionKey::SortReverse, SlotKind::Boolean),
    scalar(OpenOptionKey::Escape, SlotKind::String),
    scalar(OpenOptionKey::GetByBitSet, SlotKind::Boolean),
    scalar(OpenOptionKey::CacheAllObject, SlotKind::Boolean),
    scalar(OpenOptionKey::FieldSelect, SlotKind::Boolean),
    scalar(OpenOptionKey::TargetFieldNumber, SlotKind::Integer),
    array(OpenOptionKey::TargetFieldIndex, SlotKind::Integer),
    scalar(OpenOptionKey::Limit, SlotKind::Integer),
    scalar(OpenOptionKey::Offset, SlotKind::Integer),
];

pub const CURRENT_VERSION: u32 = 1;

struct OpenOptionLayouts;

impl LayoutProvider for OpenOptionLayouts {
    fn current_version(&self) -> u32 {
        CURRENT_VERSION
    }

    fn layout(&self, version: u32) -> Option<&'static [LayoutEntry]> {
        match version {
            1 => Some(LAYOUT_V1),
            _ => None,
        }
    }
}

static PROVIDER: OpenOptionLayouts = OpenOptionLayouts;

pub fn provider() -> &'static dyn LayoutProvider {
    &PROVIDER
}

/// Typed facade over an open-option record. Created per query and consumed
/// by the driver's open().
#[derive(Debug, Clone)]
pub struct OpenOption {
    record: ParamRecord,
}

impl Default for OpenOption {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenOption {
    pub fn new() -> Self {
        Self {
            record: ParamRecord::new(provider()),
        }
    }

    pub fn record(&self) -> &ParamRecord {
        &self.record
    }

    pub fn store(&self) -> Result<Vec<u8>> {
        self.record.store()
    }

    pub fn load(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            record: ParamRecord::load(provider(), bytes)?,
        })
    }

    pub fn set_open_mode(&self, mode: OpenMode) {
        self.record
            .set_integer(ParamKey::scalar(OpenOptionKey::OpenMode as i32), mode.code());
    }

    pub fn open_mode(&self) -> Option<OpenMode> {
        self.record
            .get_integer(ParamKey::scalar(OpenOptionKey::OpenMode as i32))
            .and_then(|c| OpenMode::from_code(c).ok())
    }

    pub fn set_read_sub_mode(&self, mode: ReadSubMode) {
        self.record.set_integer(
            ParamKey::scalar(OpenOptionKey::ReadSubMode as i32),
            mode.code(),
        );
    }

    pub fn read_sub_mode(&self) -> Option<ReadSubMode> {
        self.record
            .get_integer(ParamKey::scalar(OpenOptionKey::ReadSubMode as i32))
            .and_then(|c| ReadSubMode::from_code(c).ok())
    }

    pub fn set_fetch_field_number(&self, n: i32) {
        self.record
            .set_integer(ParamKey::scalar(OpenOptionKey::FetchFieldNumber as i32), n);
    }

    pub fn fetch_field_number(&self) -> Option<i32> {
        self.record
            .get_integer(ParamKey::scalar(OpenOptionKey::FetchFieldNumber as i32))
    }

    pub fn set_fetch_field_index(&self, i: i32, field: i32) {
        self.record.set_integer(
            ParamKey::indexed(OpenOptionKey::FetchFieldIndex as i32, i),
            field,
        );
    }

    pub fn fetch_field_index(&self, i: i32) -> Option<i32> {
        self.record
            .get_integer(ParamKey::indexed(OpenOptionKey::FetchFieldIndex as i32, i))
    }

    pub fn set_search_field_number(&self, n: i32) {
        self.record
            .set_integer(ParamKey::scalar(OpenOptionKey::SearchFieldNumber as i32), n);
    }

    pub fn search_field_number(&self) -> Option<i32> {
        self.record
            .get_integer(ParamKey::scalar(OpenOptionKey::SearchFieldNumber as i32))
    }

    pub fn set_search_field_index(&self, i: i32, field: i32) {
        self.record.set_integer(
            ParamKey::indexed(OpenOptionKey::SearchFieldIndex as i32, i),
            field,
        );
    }

    pub fn search_field_index(&self, i: i32) -> Option<i32> {
        self.record
            .get_integer(ParamKey::indexed(OpenOptionKey::SearchFieldIndex as i32, i))
    }

    pub fn set_search_start(&self, i: i32, value: &str) {
        self.record
            .set_string(ParamKey::indexed(OpenOptionKey::SearchStart as i32, i), value);
    }

    pub fn search_start(&self, i: i32) -> Option<String> {
        self.record
            .get_string(ParamKey::indexed(OpenOptionKey::SearchStart as i32, i))
    }

    pub fn set_search_stop(&self, i: i32, value: &str) {
        self.record
            .set_string(ParamKey::indexed(OpenOptionKey::SearchStop as i32, i), value);
    }

    pub fn search_stop(&self, i: i32) -> Option<String> {
        self.record
            .get_string(ParamKey::indexed(OpenOptionKey::SearchStop as i32, i))
    }

    pub fn set_search_start_ope(&self, i: i32, op: CompOp) {
        self.record.set_integer(
            ParamKey::indexed(OpenOptionKey::SearchStartOpe as i32, i),
            op.code(),
        );
    }

    pub fn search_start_ope(&self, i: i32) -> Option<CompOp> {
        self.record
            .get_integer(ParamKey::indexed(OpenOptionKey::SearchStartOpe as i32, i))
            .and_then(|c| CompOp::from_code(c).ok())
    }

    pub fn set_search_stop_ope(&self, i: i32, op: CompOp) {
        self.record.set_integer(
            ParamKey::indexed(OpenOptionKey::SearchStopOpe as i32, i),
            op.code(),
        );
    }

    pub fn search_stop_ope(&self, i: i32) -> Option<CompOp> {
        self.record
            .get_integer(ParamKey::indexed(OpenOptionKey::SearchStopOpe as i32, i))
            .and_then(|c| CompOp::from_code(c).ok())
    }

    pub fn set_sort_key(&self, key: SortKeySpec) {
        self.record
            .set_integer(ParamKey::scalar(OpenOptionKey::SortKey as i32), key.code());
    }

    pub fn sort_key(&self) -> Option<SortKeySpec> {
        self.record
            .get_integer(ParamKey::scalar(OpenOptionKey::SortKey as i32))
            .and_then(|c| SortKeySpec::from_code(c).ok())
    }

    pub fn set_sort_reverse(&self, reverse: bool) {
        self.record
            .set_boolean(ParamKey::scalar(OpenOptionKey::SortReverse as i32), reverse);
    }

    pub fn sort_reverse(&self) -> bool {
        self.record
            .get_boolean(ParamKey::scalar(OpenOptionKey::SortReverse as i32))
            .unwrap_or(false)
    }

    pub fn set_escape(&self, escape: &str) {
        self.record
            .set_string(ParamKey::scalar(OpenOptionKey::Escape as i32), escape);
    }

    pub fn escape(&self) -> Option<String> {
        self.record
            .get_string(ParamKey::scalar(OpenOptionKey::Escape as i32))
    }

    pub fn set_get_by_bitset(&self, on: bool) {
        self.record
            .set_boolean(ParamKey::scalar(OpenOptionKey::GetByBitSet as i32), on);
    }

    pub fn get_by_bitset(&self) -> bool {
        self.record
            .get_boolean(ParamKey::scalar(OpenOptionKey::GetByBitSet as i32))
            .unwrap_or(false)
    }

    pub fn set_cache_all_object(&self, on: bool) {
        self.record
            .set_boolean(ParamKey::scalar(OpenOptionKey::CacheAllObject as i32), on);
    }

    pub fn cache_all_object(&self) -> bool {
        self.record
            .get_boolean(ParamKey::scalar(OpenOptionKey::CacheAllObject as i32))
            .unwrap_or(false)
    }

    pub fn set_field_select(&self, on: bool) {
        self.record
            .set_boolean(ParamKey::scalar(OpenOptionKey::FieldSelect as i32), on);
    }

    pub fn field_select(&self) -> bool {
        self.record
            .get_boolean(ParamKey::scalar(OpenOptionKey::FieldSelect as i32))
            .unwrap_or(false)
    }

    pub fn set_target_field_number(&self, n: i32) {
        self.record
            .set_integer(ParamKey::scalar(OpenOptionKey::TargetFieldNumber as i32), n);
    }

    pub fn target_field_number(&self) -> Option<i32> {
        self.record
            .get_integer(ParamKey::scalar(OpenOptionKey::TargetFieldNumber as i32))
    }

    pub fn set_target_field_index(&self, i: i32, field: i32) {
        self.record.set_integer(
            ParamKey::indexed(OpenOptionKey::TargetFieldIndex as i32, i),
            field,
        );
    }

    pub fn target_field_index(&self, i: i32) -> Option<i32> {
        self.record
            .get_integer(ParamKey::indexed(OpenOptionKey::TargetFieldIndex as i32, i))
    }

    /// Target field list, if projection was compiled in.
    pub fn target_fields(&self) -> Option<Vec<i32>> {
        let n = self.target_field_number()?;
        let mut v = Vec::with_capacity(n as usize);
        for i in 0..n {
            v.push(self.target_field_index(i)?);
        }
        Some(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() -> Result<()> {
        let opt = OpenOption::new();
        opt.set_open_mode(OpenMode::Search);
        opt.set_search_field_number(2);
        opt.set_search_field_index(0, 1);
        opt.set_search_start(0, "10");
        opt.set_search_start_ope(0, CompOp::Equals);
        opt.set_search_field_index(1, 2);
        opt.set_search_start(1, "20");
        opt.set_search_start_ope(1, CompOp::GreaterThan);
        opt.set_escape("\\");

        let again = OpenOption::load(&opt.store()?)?;
        assert_eq!(again.open_mode(), Some(OpenMode::Search));
        assert_eq!(again.search_field_number(), Some(2));
        assert_eq!(again.search_start_ope(1), Some(CompOp::GreaterThan));
        assert_eq!(again.escape().as_deref(), Some("\\"));
        Ok(())
    }
}
