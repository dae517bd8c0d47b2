// Decoded per-file parameter block, constructed once from a FileId and
// immutable for the life of the file handle.

use crate::common::DataType;
use crate::common::FileIdentity;
use crate::error::{DbError, Result};
use crate::param::file_id::{FileId, UniqueMode};

/// Variable-length fields at most this wide are stored in-line; anything
/// wider spills to an outside object.
pub const VARIABLE_FIELD_INSIDE_THRESHOLD: usize = 8;

/// Keys whose total fixed width fits here live in the node's key info
/// slots; wider keys are stored as key objects.
pub const KEY_INFO_LIMIT: usize = 12;

/// Per-key declared sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Where key values physically live inside a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPosition {
    KeyInfo,
    KeyObject,
}

/// Buffering class derived from the FileId flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferingStrategy {
    Normal,
    ReadOnly,
    Temporary,
}

/// Immutable description of a file's field layout. Field 0 is always the
/// object-id pseudo field; fields 1..=key_num are keys; the rest are
/// values.
#[derive(Debug, Clone)]
pub struct FileParameter {
    pub identity: FileIdentity,
    pub page_size: usize,
    pub buffering: BufferingStrategy,
    pub unique: UniqueMode,
    pub field_num: usize,
    pub key_num: usize,
    pub top_value_index: usize,
    pub field_types: Vec<DataType>,
    pub is_fixed: Vec<bool>,
    pub max_lengths: Vec<usize>,
    pub is_outside: Vec<bool>,
    pub is_array: Vec<bool>,
    pub element_types: Vec<Option<DataType>>,
    pub key_sort_orders: Vec<Option<SortOrder>>,
    pub key_position: KeyPosition,
    /// Deferred-update entries a delta area may hold before the file asks
    /// for a merge.
    pub merge_threshold: usize,
}

impl FileParameter {
    pub fn from_file_id(file_id: &FileId) -> Result<Self> {
        let field_num = file_id.field_number() as usize;
        let key_num = file_id.key_field_number() as usize;
        if field_num < 2 {
            return Err(DbError::BadArgument(format!(
                "a file needs the object-id field and at least one more, got {}",
                field_num
            )));
        }
        if key_num < 1 || key_num >= field_num {
            return Err(DbError::BadArgument(format!(
                "bad key field count {} for {} fields",
                key_num, field_num
            )));
        }

        let mut field_types = Vec::with_capacity(field_num);
        let mut is_fixed = Vec::with_capacity(field_num);
        let mut max_lengths = Vec::with_capacity(field_num);
        let mut is_outside = Vec::with_capacity(field_num);
        let mut is_array = Vec::with_capacity(field_num);
        let mut element_types = Vec::with_capacity(field_num);

        for i in 0..field_num {
            let ty = file_id.field_type(i as i32)?;
            let fixed = file_id.field_fixed(i as i32) || ty.fixed_width().is_some();
            let declared_len = file_id.field_length(i as i32) as usize;
            let max_len = ty.fixed_width().unwrap_or(declared_len);
            field_types.push(ty);
            is_fixed.push(fixed);
            max_lengths.push(max_len);
            is_outside.push(!fixed && max_len > VARIABLE_FIELD_INSIDE_THRESHOLD);
            let array = ty == DataType::Array;
            is_array.push(array);
            element_types.push(if array {
                file_id.element_type(i as i32)
            } else {
                None
            });
        }

        if field_types[0] != DataType::Unsigned {
            return Err(DbError::BadArgument(
                "field 0 must be the unsigned object-id field".into(),
            ));
        }

        // Sort order defaults to ascending for every key field. A
        // descending key is declared by a negative field length marker in
        // the FileId (fixed types carry no meaningful declared length).
        let mut key_sort_orders = vec![None; field_num];
        for (i, order) in key_sort_orders.iter_mut().enumerate().take(key_num + 1).skip(1) {
            let declared = file_id.field_length(i as i32);
            *order = Some(if declared < 0 {
                SortOrder::Descending
            } else {
                SortOrder::Ascending
            });
        }

        let fixed_key_width = (1..=key_num)
            .map(|i| field_types[i].fixed_width().unwrap_or(usize::MAX / 64))
            .fold(0usize, |acc, w| acc.saturating_add(w));
        let key_position = if fixed_key_width <= KEY_INFO_LIMIT {
            KeyPosition::KeyInfo
        } else {
            KeyPosition::KeyObject
        };

        let buffering = if file_id
            .record()
            .get_boolean(crate::param::ParamKey::scalar(
                crate::param::file_id::FileIdKey::Temporary as i32,
            ))
            .unwrap_or(false)
        {
            BufferingStrategy::Temporary
        } else if file_id
            .record()
            .get_boolean(crate::param::ParamKey::scalar(
                crate::param::file_id::FileIdKey::ReadOnly as i32,
            ))
            .unwrap_or(false)
        {
            BufferingStrategy::ReadOnly
        } else {
            BufferingStrategy::Normal
        };

        Ok(Self {
            identity: file_id.identity()?,
            page_size: file_id.page_size() as usize,
            buffering,
            unique: file_id.unique(),
            field_num,
            key_num,
            top_value_index: key_num + 1,
            field_types,
            is_fixed,
            max_lengths,
            is_outside,
            is_array,
            element_types,
            key_sort_orders,
            key_position,
            merge_threshold: 64,
        })
    }

    pub fn field_type(&self, index: usize) -> Result<DataType> {
        self.field_types
            .get(index)
            .copied()
            .ok_or_else(|| DbError::BadArgument(format!("field index {} out of range", index)))
    }

    pub fn is_binary_field(&self, index: usize) -> bool {
        matches!(self.field_types.get(index), Some(DataType::Binary))
    }

    pub fn is_key_field(&self, index: usize) -> bool {
        index >= 1 && index <= self.key_num
    }

    pub fn key_sort_order(&self, index: usize) -> Option<SortOrder> {
        self.key_sort_orders.get(index).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::file_id::FileId;

    pub(crate) fn sample_file_id(key_types: &[DataType], value_types: &[DataType]) -> FileId {
        let id = FileId::new();
        id.set_identity(FileIdentity::new(1, 2, 3));
        let field_num = 1 + key_types.len() + value_types.len();
        id.set_field_number(field_num as i32);
        id.set_key_field_number(key_types.len() as i32);
        id.set_field_type(0, DataType::Unsigned);
        for (i, ty) in key_types.iter().chain(value_types.iter()).enumerate() {
            id.set_field_type(i as i32 + 1, *ty);
            if *ty == DataType::String {
                id.set_field_length(i as i32 + 1, 64);
            }
        }
        id.set_page_size(4096);
        id
    }

    #[test]
    fn test_from_file_id() -> Result<()> {
        let id = sample_file_id(
            &[DataType::Integer, DataType::Integer],
            &[DataType::String],
        );
        let param = FileParameter::from_file_id(&id)?;
        assert_eq!(param.field_num, 4);
        assert_eq!(param.key_num, 2);
        assert_eq!(param.top_value_index, 3);
        assert_eq!(param.key_position, KeyPosition::KeyInfo);
        assert_eq!(param.key_sort_order(1), Some(SortOrder::Ascending));
        assert!(param.is_outside[3]);
        Ok(())
    }

    #[test]
    fn test_wide_keys_use_key_object() -> Result<()> {
        let id = sample_file_id(
            &[DataType::BigInt, DataType::BigInt],
            &[DataType::Integer],
        );
        let param = FileParameter::from_file_id(&id)?;
        assert_eq!(param.key_position, KeyPosition::KeyObject);
        Ok(())
    }

    #[test]
    fn test_rejects_missing_keys() {
        let id = sample_file_id(&[], &[DataType::Integer]);
        assert!(FileParameter::from_file_id(&id).is_err());
    }
}
