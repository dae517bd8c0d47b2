// Collections: tuple stores between iterators.
//
// Every collection exposes two half-interfaces. Put: `put_data` returns
// false when the caller must `shift()` before retrying (capped or
// spillable stores); `finish_put` flushes. Get: sequential `get_data`,
// optional positional access, and `reset_get` to restart.

use crate::common::bitset::BitSet;
use crate::common::{compare_tuples, RowId, Tuple, Value};
use crate::error::{DbError, Result};
use std::cmp::Ordering;
use std::collections::VecDeque;

pub trait Collection: Send {
    fn clear(&mut self);
    fn is_empty(&self) -> bool;
    fn len(&self) -> usize;

    /// Whether this collection yields an aggregate row for empty input.
    fn is_empty_grouping(&self) -> bool {
        false
    }

    /// Whether a feeding iterator should keep supplying tuples after one
    /// was accepted.
    fn is_get_next_operand(&self) -> bool {
        true
    }

    /// Store a tuple. False means the store is full and the caller must
    /// `shift()` before retrying.
    fn put_data(&mut self, tuple: &Tuple) -> Result<bool>;

    /// Make room after a refused put.
    fn shift(&mut self) -> Result<()> {
        Ok(())
    }

    /// Flush after the last put (sort, spill, group finalization).
    fn finish_put(&mut self) -> Result<()> {
        Ok(())
    }

    /// Position of the most recently stored tuple, for random-probe
    /// consumers.
    fn last_position(&self) -> Option<usize> {
        None
    }

    fn get_data(&mut self, tuple: &mut Tuple) -> Result<bool>;

    /// Random access; optional.
    fn get_data_at(&mut self, _tuple: &mut Tuple, _position: usize) -> Result<bool> {
        Err(DbError::NotSupported("positional get".into()))
    }

    fn reset_get(&mut self);

    /// Membership probe; optional.
    fn probe(&mut self, _tuple: &Tuple) -> Result<bool> {
        Err(DbError::NotSupported("probe".into()))
    }
}

// ----------------------------------------------------------------------
// Queue
// ----------------------------------------------------------------------

/// FIFO store, optionally capped. A capped queue refuses puts when full;
/// `shift` drops the oldest tuple.
pub struct QueueCollection {
    items: VecDeque<Tuple>,
    capacity: Option<usize>,
    read: usize,
}

impl QueueCollection {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
            capacity: None,
            read: 0,
        }
    }

    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: Some(capacity),
            read: 0,
        }
    }
}

impl Default for QueueCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl Collection for QueueCollection {
    fn clear(&mut self) {
        self.items.clear();
        self.read = 0;
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn put_data(&mut self, tuple: &Tuple) -> Result<bool> {
        if let Some(cap) = self.capacity {
            if self.items.len() >= cap {
                return Ok(false);
            }
        }
        self.items.push_back(tuple.clone());
        Ok(true)
    }

    fn shift(&mut self) -> Result<()> {
        if self.items.pop_front().is_some() && self.read > 0 {
            self.read -= 1;
        }
        Ok(())
    }

    fn last_position(&self) -> Option<usize> {
        self.items.len().checked_sub(1)
    }

    fn get_data(&mut self, tuple: &mut Tuple) -> Result<bool> {
        match self.items.get(self.read) {
            Some(item) => {
                *tuple = item.clone();
                self.read += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get_data_at(&mut self, tuple: &mut Tuple, position: usize) -> Result<bool> {
        match self.items.get(position) {
            Some(item) => {
                *tuple = item.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn reset_get(&mut self) {
        self.read = 0;
    }

    fn probe(&mut self, tuple: &Tuple) -> Result<bool> {
        Ok(self.items.iter().any(|t| t == tuple))
    }
}

// ----------------------------------------------------------------------
// Sort
// ----------------------------------------------------------------------

/// Accumulates tuples and sorts them on `finish_put`. Keys are
/// `(position, descending)` pairs.
pub struct SortCollection {
    items: Vec<Tuple>,
    keys: Vec<(usize, bool)>,
    sorted: bool,
    read: usize,
}

impl SortCollection {
    pub fn new(keys: Vec<(usize, bool)>) -> Self {
        Self {
            items: Vec::new(),
            keys,
            sorted: false,
            read: 0,
        }
    }

    fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering {
        for &(pos, descending) in &self.keys {
            let left = a.get(pos).unwrap_or(&Value::Null);
            let right = b.get(pos).unwrap_or(&Value::Null);
            let mut ord = left.compare(right);
            if descending {
                ord = ord.reverse();
            }
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl Collection for SortCollection {
    fn clear(&mut self) {
        self.items.clear();
        self.sorted = false;
        self.read = 0;
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn put_data(&mut self, tuple: &Tuple) -> Result<bool> {
        self.items.push(tuple.clone());
        self.sorted = false;
        Ok(true)
    }

    fn finish_put(&mut self) -> Result<()> {
        if !self.sorted {
            let keys = std::mem::take(&mut self.keys);
            self.items.sort_by(|a, b| {
                for &(pos, descending) in &keys {
                    let left = a.get(pos).unwrap_or(&Value::Null);
                    let right = b.get(pos).unwrap_or(&Value::Null);
                    let mut ord = left.compare(right);
                    if descending {
                        ord = ord.reverse();
                    }
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
            self.keys = keys;
            self.sorted = true;
        }
        Ok(())
    }

    fn last_position(&self) -> Option<usize> {
        self.items.len().checked_sub(1)
    }

    fn get_data(&mut self, tuple: &mut Tuple) -> Result<bool> {
        match self.items.get(self.read) {
            Some(item) => {
                *tuple = item.clone();
                self.read += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get_data_at(&mut self, tuple: &mut Tuple, position: usize) -> Result<bool> {
        match self.items.get(position) {
            Some(item) => {
                *tuple = item.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn reset_get(&mut self) {
        self.read = 0;
    }

    fn probe(&mut self, tuple: &Tuple) -> Result<bool> {
        if self.sorted && !self.keys.is_empty() {
            return Ok(self
                .items
                .binary_search_by(|probe| self.compare(probe, tuple))
                .is_ok());
        }
        Ok(self
            .items
            .iter()
            .any(|t| compare_tuples(t, tuple) == Ordering::Equal))
    }
}

// ----------------------------------------------------------------------
// Grouping
// ----------------------------------------------------------------------

/// Groups rows by a key prefix and emits one row per group: the key
/// fields, the first row's remaining fields, and a trailing row count.
/// With no key positions the whole input is one group, and one aggregate
/// row comes out even for empty input.
pub struct GroupingCollection {
    key_positions: Vec<usize>,
    groups: Vec<(Tuple, Tuple, i64)>,
    finished: bool,
    read: usize,
}

impl GroupingCollection {
    pub fn new(key_positions: Vec<usize>) -> Self {
        Self {
            key_positions,
            groups: Vec::new(),
            finished: false,
            read: 0,
        }
    }

    fn key_of(&self, tuple: &Tuple) -> Tuple {
        self.key_positions
            .iter()
            .map(|&p| tuple.get(p).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

impl Collection for GroupingCollection {
    fn clear(&mut self) {
        self.groups.clear();
        self.finished = false;
        self.read = 0;
    }

    fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn len(&self) -> usize {
        self.groups.len()
    }

    fn is_empty_grouping(&self) -> bool {
        self.key_positions.is_empty()
    }

    fn put_data(&mut self, tuple: &Tuple) -> Result<bool> {
        let key = self.key_of(tuple);
        if let Some(group) = self.groups.iter_mut().find(|(k, _, _)| *k == key) {
            group.2 += 1;
        } else {
            self.groups.push((key, tuple.clone(), 1));
        }
        Ok(true)
    }

    fn finish_put(&mut self) -> Result<()> {
        if self.is_empty_grouping() && self.groups.is_empty() {
            // Aggregate over nothing still yields one row.
            self.groups.push((Tuple::new(), Tuple::new(), 0));
        }
        self.finished = true;
        Ok(())
    }

    fn get_data(&mut self, tuple: &mut Tuple) -> Result<bool> {
        match self.groups.get(self.read) {
            Some((key, first, count)) => {
                let mut out = key.clone();
                out.extend(first.iter().skip(self.key_positions.len()).cloned());
                out.push(Value::BigInt(*count));
                *tuple = out;
                self.read += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn reset_get(&mut self) {
        self.read = 0;
    }
}

// ----------------------------------------------------------------------
// Bitset
// ----------------------------------------------------------------------

/// Row-id set. Accepts row-id tuples or row-id arrays; yields one row-id
/// tuple per set bit.
pub struct BitsetCollection {
    set: BitSet,
    cursor: Option<Vec<RowId>>,
    read: usize,
}

impl BitsetCollection {
    pub fn new() -> Self {
        Self {
            set: BitSet::new(),
            cursor: None,
            read: 0,
        }
    }

    pub fn bitset(&self) -> &BitSet {
        &self.set
    }

    fn row_ids(tuple: &Tuple) -> Result<Vec<RowId>> {
        match tuple.first() {
            Some(Value::Unsigned(id)) => Ok(vec![*id]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::Unsigned(id) => Ok(*id),
                    other => Err(DbError::BadArgument(format!(
                        "not a row id: {:?}",
                        other
                    ))),
                })
                .collect(),
            other => Err(DbError::BadArgument(format!("not a row id: {:?}", other))),
        }
    }
}

impl Default for BitsetCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl Collection for BitsetCollection {
    fn clear(&mut self) {
        self.set.clear();
        self.cursor = None;
        self.read = 0;
    }

    fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    fn len(&self) -> usize {
        self.set.len()
    }

    fn put_data(&mut self, tuple: &Tuple) -> Result<bool> {
        for id in Self::row_ids(tuple)? {
            self.set.set(id);
        }
        self.cursor = None;
        Ok(true)
    }

    fn get_data(&mut self, tuple: &mut Tuple) -> Result<bool> {
        if self.cursor.is_none() {
            self.cursor = Some(self.set.iter().collect());
        }
        let ids = self.cursor.as_ref().unwrap();
        match ids.get(self.read) {
            Some(&id) => {
                *tuple = vec![Value::Unsigned(id)];
                self.read += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn reset_get(&mut self) {
        self.read = 0;
    }

    fn probe(&mut self, tuple: &Tuple) -> Result<bool> {
        let ids = Self::row_ids(tuple)?;
        Ok(ids.iter().all(|&id| self.set.test(id)))
    }
}

// ----------------------------------------------------------------------
// Array
// ----------------------------------------------------------------------

/// Flat store with random access, for probe consumers that address tuples
/// by position.
pub struct ArrayCollection {
    items: Vec<Tuple>,
    read: usize,
}

impl ArrayCollection {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            read: 0,
        }
    }
}

impl Default for ArrayCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl Collection for ArrayCollection {
    fn clear(&mut self) {
        self.items.clear();
        self.read = 0;
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn put_data(&mut self, tuple: &Tuple) -> Result<bool> {
        self.items.push(tuple.clone());
        Ok(true)
    }

    fn last_position(&self) -> Option<usize> {
        self.items.len().checked_sub(1)
    }

    fn get_data(&mut self, tuple: &mut Tuple) -> Result<bool> {
        match self.items.get(self.read) {
            Some(item) => {
                *tuple = item.clone();
                self.read += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get_data_at(&mut self, tuple: &mut Tuple, position: usize) -> Result<bool> {
        match self.items.get(position) {
            Some(item) => {
                *tuple = item.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn reset_get(&mut self) {
        self.read = 0;
    }

    fn probe(&mut self, tuple: &Tuple) -> Result<bool> {
        Ok(self
            .items
            .iter()
            .any(|t| compare_tuples(t, tuple) == Ordering::Equal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(n: i32) -> Tuple {
        vec![Value::Integer(n)]
    }

    #[test]
    fn test_capped_queue_needs_shift() -> Result<()> {
        let mut q = QueueCollection::with_capacity_limit(2);
        assert!(q.put_data(&t(1))?);
        assert!(q.put_data(&t(2))?);
        assert!(!q.put_data(&t(3))?);
        q.shift()?;
        assert!(q.put_data(&t(3))?);
        let mut out = Tuple::new();
        assert!(q.get_data(&mut out)?);
        assert_eq!(out, t(2));
        Ok(())
    }

    #[test]
    fn test_sort_flushes_on_finish() -> Result<()> {
        let mut s = SortCollection::new(vec![(0, false)]);
        s.put_data(&t(3))?;
        s.put_data(&t(1))?;
        s.put_data(&t(2))?;
        s.finish_put()?;
        let mut out = Tuple::new();
        let mut got = Vec::new();
        while s.get_data(&mut out)? {
            got.push(out[0].clone());
        }
        assert_eq!(
            got,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
        );
        Ok(())
    }

    #[test]
    fn test_empty_grouping_emits_aggregate_row() -> Result<()> {
        let mut g = GroupingCollection::new(Vec::new());
        assert!(g.is_empty_grouping());
        g.finish_put()?;
        let mut out = Tuple::new();
        assert!(g.get_data(&mut out)?);
        assert_eq!(out, vec![Value::BigInt(0)]);
        assert!(!g.get_data(&mut out)?);
        Ok(())
    }

    #[test]
    fn test_grouping_counts_rows() -> Result<()> {
        let mut g = GroupingCollection::new(vec![0]);
        g.put_data(&vec![Value::Integer(1), Value::String("a".into())])?;
        g.put_data(&vec![Value::Integer(1), Value::String("b".into())])?;
        g.put_data(&vec![Value::Integer(2), Value::String("c".into())])?;
        g.finish_put()?;
        let mut out = Tuple::new();
        assert!(g.get_data(&mut out)?);
        assert_eq!(
            out,
            vec![
                Value::Integer(1),
                Value::String("a".into()),
                Value::BigInt(2)
            ]
        );
        Ok(())
    }

    #[test]
    fn test_bitset_collection() -> Result<()> {
        let mut b = BitsetCollection::new();
        b.put_data(&vec![Value::Unsigned(5)])?;
        b.put_data(&vec![Value::Array(vec![
            Value::Unsigned(1),
            Value::Unsigned(5),
        ])])?;
        assert_eq!(b.len(), 2);
        assert!(b.probe(&vec![Value::Unsigned(1)])?);
        assert!(!b.probe(&vec![Value::Unsigned(2)])?);
        let mut out = Tuple::new();
        assert!(b.get_data(&mut out)?);
        assert_eq!(out, vec![Value::Unsigned(1)]);
        Ok(())
    }
}
