// RowIDCheck: pre-materializes an inner iterator, then answers membership
// probes by row id.
//
// A rowid-only inner operand builds a bitset; an inner operand producing
// full tuples builds rowid → position over a side collection, and a probe
// hit can hand the matching tuple to a variable. An empty build short-
// circuits every probe to NeverTrue.

use crate::common::bitset::BitSet;
use crate::common::{RowId, Tuple, Value};
use crate::error::{DbError, Result};
use crate::execution::operator::Operator;
use crate::execution::program::Program;
use crate::execution::status::Status;
use crate::execution::{CollectionId, IteratorId, VariableId};
use std::collections::HashMap;

enum Built {
    /// Inner rows were rowid-only.
    Bits(BitSet),
    /// Inner rows were full tuples, stored at positions in the side
    /// collection.
    Positions(HashMap<RowId, usize>),
}

pub struct RowIdCheck {
    inner: IteratorId,
    /// Position of the probe row id in the host tuple.
    probe_position: usize,
    /// Side store for full inner tuples.
    collection: Option<CollectionId>,
    /// Receives the matching tuple on a hit, if set.
    target: Option<VariableId>,
    built: Option<Built>,
    never_true: bool,
}

impl RowIdCheck {
    pub fn new(inner: IteratorId, probe_position: usize) -> Self {
        Self {
            inner,
            probe_position,
            collection: None,
            target: None,
            built: None,
            never_true: false,
        }
    }

    pub fn with_collection(
        inner: IteratorId,
        probe_position: usize,
        collection: CollectionId,
        target: Option<VariableId>,
    ) -> Self {
        Self {
            inner,
            probe_position,
            collection: Some(collection),
            target,
            built: None,
            never_true: false,
        }
    }

    fn row_id_at(tuple: &Tuple, position: usize) -> Result<RowId> {
        match tuple.get(position) {
            Some(Value::Unsigned(id)) => Ok(*id),
            other => Err(DbError::BadArgument(format!(
                "probe position holds {:?}, not a row id",
                other
            ))),
        }
    }

    fn build(&mut self, program: &Program) -> Result<()> {
        program.initialize_iterator(self.inner)?;
        let mut bits = BitSet::new();
        let mut positions: HashMap<RowId, usize> = HashMap::new();
        let mut any_wide = false;

        while let Some(tuple) = program.next_tuple(self.inner)? {
            let row_id = Self::row_id_at(&tuple, 0)?;
            if tuple.len() == 1 && self.collection.is_none() {
                bits.set(row_id);
                continue;
            }
            any_wide = true;
            let collection = self.collection.ok_or_else(|| {
                DbError::BadArgument("wide inner tuples need a side collection".into())
            })?;
            let slot = program.collection(collection)?;
            let mut c = slot.lock();
            while !c.put_data(&tuple)? {
                c.shift()?;
            }
            let position = c
                .last_position()
                .ok_or_else(|| DbError::Unexpected("put left no position".into()))?;
            positions.insert(row_id, position);
        }

        self.built = Some(if any_wide {
            Built::Positions(positions)
        } else {
            Built::Bits(bits)
        });
        match self.built.as_ref().unwrap() {
            Built::Bits(b) => self.never_true = b.is_empty(),
            Built::Positions(p) => self.never_true = p.is_empty(),
        }
        Ok(())
    }
}

impl Operator for RowIdCheck {
    fn initialize(&mut self, program: &Program) -> Result<()> {
        program.initialize_iterator(self.inner)
    }

    fn execute(&mut self, program: &Program, tuple: &Tuple) -> Result<Status> {
        if self.built.is_none() {
            self.build(program)?;
        }
        if self.never_true {
            return Ok(Status::False);
        }

        let probe = Self::row_id_at(tuple, self.probe_position)?;
        match self.built.as_ref().unwrap() {
            Built::Bits(bits) => {
                if bits.test(probe) {
                    Ok(Status::Success)
                } else {
                    Ok(Status::False)
                }
            }
            Built::Positions(positions) => match positions.get(&probe) {
                Some(&position) => {
                    if let (Some(target), Some(collection)) = (self.target, self.collection) {
                        let slot = program.collection(collection)?;
                        let mut matched = Tuple::new();
                        if slot.lock().get_data_at(&mut matched, position)? {
                            *program.variable(target)?.lock() = Value::Array(matched);
                        }
                    }
                    Ok(Status::Success)
                }
                None => Ok(Status::False),
            },
        }
    }

    fn finish(&mut self, program: &Program) -> Result<()> {
        self.built = None;
        self.never_true = false;
        program.finish_iterator(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::collection::ArrayCollection;
    use crate::execution::iterator::tuples::Tuples;
    use crate::execution::iterator::IteratorNode;

    fn rid(id: u32) -> Tuple {
        vec![Value::Unsigned(id)]
    }

    #[test]
    fn test_bitset_mode_filters_by_row_id() -> Result<()> {
        let program = Program::new();
        let inner = program.register_iterator(Box::new(Tuples::new(vec![rid(1), rid(3)])));
        let check = program.register_action(Box::new(RowIdCheck::new(inner, 0)));

        let mut source = Tuples::new(vec![rid(1), rid(2), rid(3), rid(4)]);
        source.add_action(check);
        let id = program.register_iterator(Box::new(source));

        program.initialize_iterator(id)?;
        let mut got = Vec::new();
        while let Some(t) = program.next_tuple(id)? {
            got.push(t[0].clone());
        }
        assert_eq!(got, vec![Value::Unsigned(1), Value::Unsigned(3)]);
        Ok(())
    }

    #[test]
    fn test_empty_inner_is_never_true() -> Result<()> {
        let program = Program::new();
        let inner = program.register_iterator(Box::new(Tuples::new(Vec::new())));
        let check = program.register_action(Box::new(RowIdCheck::new(inner, 0)));

        let mut source = Tuples::new(vec![rid(1), rid(2)]);
        source.add_action(check);
        let id = program.register_iterator(Box::new(source));

        program.initialize_iterator(id)?;
        assert_eq!(program.next_tuple(id)?, None);
        Ok(())
    }

    #[test]
    fn test_collection_mode_hands_back_the_match() -> Result<()> {
        let program = Program::new();
        let inner = program.register_iterator(Box::new(Tuples::new(vec![
            vec![Value::Unsigned(2), Value::String("two".into())],
            vec![Value::Unsigned(5), Value::String("five".into())],
        ])));
        let side = program.register_collection(Box::new(ArrayCollection::new()));
        let target = program.add_variable(Value::Null);
        let check = program.register_action(Box::new(RowIdCheck::with_collection(
            inner,
            0,
            side,
            Some(target),
        )));

        let mut source = Tuples::new(vec![rid(5), rid(7)]);
        source.add_action(check);
        let id = program.register_iterator(Box::new(source));

        program.initialize_iterator(id)?;
        let mut got = Vec::new();
        while let Some(t) = program.next_tuple(id)? {
            got.push(t[0].clone());
        }
        assert_eq!(got, vec![Value::Unsigned(5)]);
        let slot = program.variable(target)?;
        assert_eq!(
            &*slot.lock(),
            &Value::Array(vec![Value::Unsigned(5), Value::String("five".into())])
        );
        Ok(())
    }
}
