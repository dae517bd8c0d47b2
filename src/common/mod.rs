// Common types shared by every layer: stable identifiers, field values and
// the typed comparisons the open-option compiler relies on.

pub mod bitset;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Page identifier inside one file.
pub type PageId = u32;

/// Marker for "no page".
pub const INVALID_PAGE: PageId = 0xFFFF_FFFF;

/// Row identifier, stable within a file's lifetime. Row id 0 is the
/// object-id pseudo field in projection/search indexes.
pub type RowId = u32;

/// Opaque pointer-sized token identifying a lock holder.
pub type OwnerToken = u64;

/// Stable identity of a logical file, derived once at attach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    pub database_id: u64,
    pub table_id: u64,
    pub file_id: u64,
}

impl FileIdentity {
    pub fn new(database_id: u64, table_id: u64, file_id: u64) -> Self {
        Self {
            database_id,
            table_id,
            file_id,
        }
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.database_id, self.table_id, self.file_id)
    }
}

/// Field type enumeration. Binary fields may be stored but never searched
/// or fetched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    BigInt,
    Unsigned,
    Double,
    String,
    Binary,
    Boolean,
    Array,
}

impl DataType {
    /// Byte width of a fixed-size field, if the type has one.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            DataType::Integer | DataType::Unsigned => Some(4),
            DataType::BigInt | DataType::Double => Some(8),
            DataType::Boolean => Some(1),
            _ => None,
        }
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i32),
    BigInt(i64),
    Unsigned(u32),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    Boolean(bool),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Parse the string form used by search conditions into a typed value.
    pub fn parse_typed(ty: DataType, text: &str) -> crate::Result<Value> {
        let v = match ty {
            DataType::Integer => Value::Integer(text.parse().map_err(|_| {
                crate::DbError::BadArgument(format!("not an integer: {}", text))
            })?),
            DataType::BigInt => Value::BigInt(text.parse().map_err(|_| {
                crate::DbError::BadArgument(format!("not a bigint: {}", text))
            })?),
            DataType::Unsigned => Value::Unsigned(text.parse().map_err(|_| {
                crate::DbError::BadArgument(format!("not an unsigned: {}", text))
            })?),
            DataType::Double => Value::Double(text.parse().map_err(|_| {
                crate::DbError::BadArgument(format!("not a double: {}", text))
            })?),
            DataType::String => Value::String(text.to_string()),
            DataType::Boolean => Value::Boolean(text == "true" || text == "1"),
            DataType::Binary | DataType::Array => {
                return Err(crate::DbError::BadArgument(format!(
                    "type cannot be parsed from text: {:?}",
                    ty
                )))
            }
        };
        Ok(v)
    }

    /// Total order used for key comparison. Null sorts first; values of
    /// mismatched kinds compare by kind tag so ordering stays total.
    pub fn compare(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Integer(_) => 1,
                Value::BigInt(_) => 1,
                Value::Unsigned(_) => 1,
                Value::Double(_) => 1,
                Value::String(_) => 2,
                Value::Binary(_) => 3,
                Value::Boolean(_) => 4,
                Value::Array(_) => 5,
            }
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::BigInt(a), Value::BigInt(b)) => a.cmp(b),
            (Value::Unsigned(a), Value::Unsigned(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Value::Integer(a), Value::BigInt(b)) => (*a as i64).cmp(b),
            (Value::BigInt(a), Value::Integer(b)) => a.cmp(&(*b as i64)),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Binary(a), Value::Binary(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let c = x.compare(y);
                    if c != Ordering::Equal {
                        return c;
                    }
                }
                a.len().cmp(&b.len())
            }
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "(null)"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Unsigned(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Binary(v) => write!(f, "<{} bytes>", v.len()),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Array(v) => {
                write!(f, "[")?;
                for (i, e) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// One row as exchanged between drivers, collections and iterators.
pub type Tuple = Vec<Value>;

/// Tuple wrapper with a total order, usable as an ordered-map key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdTuple(pub Tuple);

impl Eq for OrdTuple {}

impl PartialOrd for OrdTuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdTuple {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_tuples(&self.0, &other.0)
    }
}

/// Compare two tuples field-wise over a key prefix.
pub fn compare_tuples(a: &Tuple, b: &Tuple) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let c = x.compare(y);
        if c != Ordering::Equal {
            return c;
        }
    }
    a.len().cmp(&b.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_parse_and_compare() -> crate::Result<()> {
        let a = Value::parse_typed(DataType::Integer, "10")?;
        let b = Value::parse_typed(DataType::Integer, "5")?;
        assert_eq!(a.compare(&b), Ordering::Greater);

        // string comparison is lexicographic, so "10" < "5"
        let a = Value::parse_typed(DataType::String, "10")?;
        let b = Value::parse_typed(DataType::String, "5")?;
        assert_eq!(a.compare(&b), Ordering::Less);
        Ok(())
    }

    #[test]
    fn test_null_sorts_first() {
        let v = Value::Integer(0);
        assert_eq!(Value::Null.compare(&v), Ordering::Less);
        assert_eq!(v.compare(&Value::Null), Ordering::Greater);
    }

    #[test]
    fn test_tuple_compare_prefix() {
        let a = vec![Value::Integer(1), Value::Integer(2)];
        let b = vec![Value::Integer(1)];
        assert_eq!(compare_tuples(&a, &b), Ordering::Greater);
        assert_eq!(compare_tuples(&b, &a), Ordering::Less);
    }
}
