// FileId: the versioned record that fully describes a file's schema and
// storage parameters.

use super::{LayoutEntry, LayoutProvider, ParamKey, ParamRecord, SlotKind};
use crate::common::{DataType, FileIdentity};
use crate::error::{DbError, Result};
use once_cell::sync::Lazy;

/// Well-known FileId keys. Numbers are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FileIdKey {
    Mounted = 0,
    Area = 1,
    Temporary = 2,
    ReadOnly = 3,
    PageSize = 4,
    FieldNumber = 5,
    FieldType = 6,
    FieldLength = 7,
    FieldFraction = 8,
    FieldFixed = 9,
    ElementType = 10,
    ElementLength = 11,
    ElementFixed = 12,
    KeyFieldNumber = 13,
    Unique = 14,
    Version = 15,
    SchemaDatabaseId = 16,
    SchemaTableId = 17,
    SchemaFileObjectId = 18,
    FieldEncodingForm = 19,
    FieldCollation = 20,
}

/// Unique constraint mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UniqueMode {
    #[default]
    None,
    Object,
    KeyField,
}

impl UniqueMode {
    pub fn from_code(code: i32) -> UniqueMode {
        match code {
            1 => UniqueMode::Object,
            2 => UniqueMode::KeyField,
            _ => UniqueMode::None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            UniqueMode::None => 0,
            UniqueMode::Object => 1,
            UniqueMode::KeyField => 2,
        }
    }
}

const fn scalar(key: FileIdKey, kind: SlotKind) -> LayoutEntry {
    LayoutEntry::new(key as i32, kind, false)
}

const fn array(key: FileIdKey, kind: SlotKind) -> LayoutEntry {
    LayoutEntry::new(key as i32, kind, true)
}

// Version 1 predates per-field encoding form and collation.
static LAYOUT_V1: &[LayoutEntry] = &[
    scalar(FileIdKey::Mounted, SlotKind::Boolean),
    array(FileIdKey::Area, SlotKind::String),
    scalar(FileIdKey::Temporary, SlotKind::Boolean),
    scalar(FileIdKey::ReadOnly, SlotKind::Boolean),
    scalar(FileIdKey::PageSize, SlotKind::Integer),
    scalar(FileIdKey::FieldNumber, SlotKind::Integer),
    array(FileIdKey::FieldType, SlotKind::Integer),
    array(FileIdKey::FieldLength, SlotKind::Integer),
    array(FileIdKey::FieldFraction, SlotKind::Integer),
    array(FileIdKey::FieldFixed, SlotKind::Boolean),
    array(FileIdKey::ElementType, SlotKind::Integer),
    array(FileIdKey::ElementLength, SlotKind::Integer),
    array(FileIdKey::ElementFixed, SlotKind::Boolean),
    scalar(FileIdKey::KeyFieldNumber, SlotKind::Integer),
    scalar(FileIdKey::Unique, SlotKind::Integer),
    scalar(FileIdKey::Version, SlotKind::Integer),
    scalar(FileIdKey::SchemaDatabaseId, SlotKind::LongLong),
    scalar(FileIdKey::SchemaTableId, SlotKind::LongLong),
    scalar(FileIdKey::SchemaFileObjectId, SlotKind::LongLong),
];

static LAYOUT_V2: Lazy<Vec<LayoutEntry>> = Lazy::new(|| {
    let mut v = LAYOUT_V1.to_vec();
    v.push(array(FileIdKey::FieldEncodingForm, SlotKind::Integer));
    v.push(array(FileIdKey::FieldCollation, SlotKind::Integer));
    v
});

pub const CURRENT_VERSION: u32 = 2;

struct FileIdLayouts;

impl LayoutProvider for FileIdLayouts {
    fn current_version(&self) -> u32 {
        CURRENT_VERSION
    }

    fn layout(&self, version: u32) -> Option<&'static [LayoutEntry]> {
        match version {
            1 => Some(LAYOUT_V1),
            2 => Some(&LAYOUT_V2),
            _ => None,
        }
    }
}

static PROVIDER: FileIdLayouts = FileIdLayouts;

pub fn provider() -> &'static dyn LayoutProvider {
    &PROVIDER
}

/// Typed facade over a FileId parameter record.
#[derive(Debug, Clone)]
pub struct FileId {
    record: ParamRecord,
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl FileId {
    pub fn new() -> Self {
        let record = ParamRecord::new(provider());
        record.set_integer(
            ParamKey::scalar(FileIdKey::Version as i32),
            CURRENT_VERSION as i32,
        );
        Self { record }
    }

    pub fn from_record(record: ParamRecord) -> Self {
        Self { record }
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

    pub fn set_page_size(&self, bytes: i32) {
        self.record
            .set_integer(ParamKey::scalar(FileIdKey::PageSize as i32), bytes);
    }

    pub fn page_size(&self) -> i32 {
        self.record
            .get_integer(ParamKey::scalar(FileIdKey::PageSize as i32))
            .unwrap_or(4096)
    }

    pub fn set_mounted(&self, mounted: bool) {
        self.record
            .set_boolean(ParamKey::scalar(FileIdKey::Mounted as i32), mounted);
    }

    pub fn is_mounted(&self) -> bool {
        self.record
            .get_boolean(ParamKey::scalar(FileIdKey::Mounted as i32))
            .unwrap_or(false)
    }

    pub fn set_temporary(&self, temporary: bool) {
        self.record
            .set_boolean(ParamKey::scalar(FileIdKey::Temporary as i32), temporary);
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.record
            .set_boolean(ParamKey::scalar(FileIdKey::ReadOnly as i32), read_only);
    }

    pub fn set_area(&self, index: i32, path: &str) {
        self.record
            .set_string(ParamKey::indexed(FileIdKey::Area as i32, index), path);
    }

    pub fn set_field_number(&self, n: i32) {
        self.record
            .set_integer(ParamKey::scalar(FileIdKey::FieldNumber as i32), n);
    }

    pub fn field_number(&self) -> i32 {
        self.record
            .get_integer(ParamKey::scalar(FileIdKey::FieldNumber as i32))
            .unwrap_or(0)
    }

    pub fn set_key_field_number(&self, n: i32) {
        self.record
            .set_integer(ParamKey::scalar(FileIdKey::KeyFieldNumber as i32), n);
    }

    pub fn key_field_number(&self) -> i32 {
        self.record
            .get_integer(ParamKey::scalar(FileIdKey::KeyFieldNumber as i32))
            .unwrap_or(0)
    }

    pub fn set_field_type(&self, index: i32, ty: DataType) {
        self.record.set_integer(
            ParamKey::indexed(FileIdKey::FieldType as i32, index),
            data_type_code(ty),
        );
    }

    pub fn field_type(&self, index: i32) -> Result<DataType> {
        let code = self
            .record
            .get_integer(ParamKey::indexed(FileIdKey::FieldType as i32, index))
            .ok_or_else(|| DbError::BadArgument(format!("no field type at {}", index)))?;
        data_type_from_code(code)
    }

    pub fn set_field_length(&self, index: i32, len: i32) {
        self.record
            .set_integer(ParamKey::indexed(FileIdKey::FieldLength as i32, index), len);
    }

    pub fn field_length(&self, index: i32) -> i32 {
        self.record
            .get_integer(ParamKey::indexed(FileIdKey::FieldLength as i32, index))
            .unwrap_or(0)
    }

    pub fn set_field_fixed(&self, index: i32, fixed: bool) {
        self.record
            .set_boolean(ParamKey::indexed(FileIdKey::FieldFixed as i32, index), fixed);
    }

    pub fn field_fixed(&self, index: i32) -> bool {
        self.record
            .get_boolean(ParamKey::indexed(FileIdKey::FieldFixed as i32, index))
            .unwrap_or(false)
    }

    pub fn set_element_type(&self, index: i32, ty: DataType) {
        self.record.set_integer(
            ParamKey::indexed(FileIdKey::ElementType as i32, index),
            data_type_code(ty),
        );
    }

    pub fn element_type(&self, index: i32) -> Option<DataType> {
        self.record
            .get_integer(ParamKey::indexed(FileIdKey::ElementType as i32, index))
            .and_then(|c| data_type_from_code(c).ok())
    }

    pub fn set_element_length(&self, index: i32, len: i32) {
        self.record.set_integer(
            ParamKey::indexed(FileIdKey::ElementLength as i32, index),
            len,
        );
    }

    pub fn set_unique(&self, mode: UniqueMode) {
        self.record
            .set_integer(ParamKey::scalar(FileIdKey::Unique as i32), mode.code());
    }

    pub fn unique(&self) -> UniqueMode {
        UniqueMode::from_code(
            self.record
                .get_integer(ParamKey::scalar(FileIdKey::Unique as i32))
                .unwrap_or(0),
        )
    }

    pub fn set_identity(&self, identity: FileIdentity) {
        self.record.set_longlong(
            ParamKey::scalar(FileIdKey::SchemaDatabaseId as i32),
            identity.database_id as i64,
        );
        self.record.set_longlong(
            ParamKey::scalar(FileIdKey::SchemaTableId as i32),
            identity.table_id as i64,
        );
        self.record.set_longlong(
            ParamKey::scalar(FileIdKey::SchemaFileObjectId as i32),
            identity.file_id as i64,
        );
    }

    pub fn identity(&self) -> Result<FileIdentity> {
        let get = |k: FileIdKey| {
            self.record
                .get_longlong(ParamKey::scalar(k as i32))
                .ok_or_else(|| DbError::BadArgument(format!("missing schema id key {:?}", k)))
        };
        Ok(FileIdentity::new(
            get(FileIdKey::SchemaDatabaseId)? as u64,
            get(FileIdKey::SchemaTableId)? as u64,
            get(FileIdKey::SchemaFileObjectId)? as u64,
        ))
    }
}

pub fn data_type_code(ty: DataType) -> i32 {
    match ty {
        DataType::Integer => 1,
        DataType::BigInt => 2,
        DataType::Unsigned => 3,
        DataType::Double => 4,
        DataType::String => 5,
        DataType::Binary => 6,
        DataType::Boolean => 7,
        DataType::Array => 8,
    }
}

pub fn data_type_from_code(code: i32) -> Result<DataType> {
    Ok(match code {
        1 => DataType::Integer,
        2 => DataType::BigInt,
        3 => DataType::Unsigned,
        4 => DataType::Double,
        5 => DataType::String,
        6 => DataType::Binary,
        7 => DataType::Boolean,
        8 => DataType::Array,
        _ => {
            return Err(DbError::BadArgument(format!(
                "unknown field type code {}",
                code
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_roundtrip() -> Result<()> {
        let id = FileId::new();
        id.set_identity(FileIdentity::new(2, 11, 42));
        id.set_field_number(3);
        id.set_key_field_number(1);
        id.set_field_type(0, DataType::Unsigned);
        id.set_field_type(1, DataType::Integer);
        id.set_field_type(2, DataType::String);

        let again = FileId::load(&id.store()?)?;
        assert_eq!(again.identity()?, FileIdentity::new(2, 11, 42));
        assert_eq!(again.field_type(2)?, DataType::String);
        Ok(())
    }
}
