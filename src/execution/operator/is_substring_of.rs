// IsSubstringOf: true when array A occurs as a contiguous sub-sequence of
// array B, element equality by the element type. Empty arrays never
// match, on either side.

use crate::common::{Tuple, Value};
use crate::error::{DbError, Result};
use crate::execution::operator::Operator;
use crate::execution::program::Program;
use crate::execution::status::Status;
use std::cmp::Ordering;

pub struct IsSubstringOf {
    /// Tuple position of the candidate sub-sequence.
    needle_position: usize,
    /// Tuple position of the containing array.
    haystack_position: usize,
}

impl IsSubstringOf {
    pub fn new(needle_position: usize, haystack_position: usize) -> Self {
        Self {
            needle_position,
            haystack_position,
        }
    }

    fn array_at(tuple: &Tuple, position: usize) -> Result<&[Value]> {
        match tuple.get(position) {
            Some(Value::Array(items)) => Ok(items),
            other => Err(DbError::BadArgument(format!(
                "expected an array, got {:?}",
                other
            ))),
        }
    }

    fn contains(haystack: &[Value], needle: &[Value]) -> bool {
        if needle.is_empty() || haystack.is_empty() || needle.len() > haystack.len() {
            return false;
        }
        haystack.windows(needle.len()).any(|window| {
            window
                .iter()
                .zip(needle.iter())
                .all(|(a, b)| a.compare(b) == Ordering::Equal)
        })
    }
}

impl Operator for IsSubstringOf {
    fn execute(&mut self, _program: &Program, tuple: &Tuple) -> Result<Status> {
        let needle = Self::array_at(tuple, self.needle_position)?;
        let haystack = Self::array_at(tuple, self.haystack_position)?;
        if Self::contains(haystack, needle) {
            Ok(Status::Success)
        } else {
            Ok(Status::False)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arr(values: &[i32]) -> Value {
        Value::Array(values.iter().map(|&v| Value::Integer(v)).collect())
    }

    fn check(needle: &[i32], haystack: &[i32]) -> Result<bool> {
        let program = Program::new();
        let mut op = IsSubstringOf::new(0, 1);
        let tuple = vec![arr(needle), arr(haystack)];
        Ok(op.execute(&program, &tuple)? == Status::Success)
    }

    #[test]
    fn test_contiguous_subsequence() -> Result<()> {
        assert!(check(&[2, 3], &[1, 2, 3, 4])?);
        assert!(check(&[1], &[1])?);
        assert!(!check(&[2, 4], &[1, 2, 3, 4])?);
        assert!(!check(&[3, 2], &[1, 2, 3])?);
        assert!(!check(&[1, 2, 3], &[1, 2])?);
        Ok(())
    }

    #[test]
    fn test_empty_arrays_never_match() -> Result<()> {
        assert!(!check(&[], &[1, 2])?);
        assert!(!check(&[1], &[])?);
        assert!(!check(&[], &[])?);
        Ok(())
    }
}
