// MergeSort: k-way merge of sorted operands into one globally sorted
// stream. Operands fill lazily on the first next().

use crate::common::{Tuple, Value};
use crate::error::{DbError, Result};
use crate::execution::iterator::{IterBase, IteratorNode};
use crate::execution::program::Program;
use crate::execution::IteratorId;
use std::cmp::Ordering;

/// One sort key: tuple position and direction (true = descending).
#[derive(Debug, Clone, Copy)]
pub struct SortKey {
    pub position: usize,
    pub descending: bool,
}

struct OperandState {
    id: IteratorId,
    has_data: bool,
    tuple: Tuple,
}

pub struct MergeSort {
    base: IterBase,
    operands: Vec<OperandState>,
    keys: Vec<SortKey>,
    started: bool,
}

impl MergeSort {
    pub fn new(operands: Vec<IteratorId>, keys: Vec<SortKey>) -> Result<Self> {
        if keys.is_empty() {
            return Err(DbError::BadArgument("merge sort without keys".into()));
        }
        Ok(Self {
            base: IterBase::new(),
            operands: operands
                .into_iter()
                .map(|id| OperandState {
                    id,
                    has_data: false,
                    tuple: Tuple::new(),
                })
                .collect(),
            keys,
            started: false,
        })
    }

    fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering {
        for key in &self.keys {
            let left = a.get(key.position).unwrap_or(&Value::Null);
            let right = b.get(key.position).unwrap_or(&Value::Null);
            let mut ord = left.compare(right);
            if key.descending {
                ord = ord.reverse();
            }
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    fn advance(&mut self, program: &Program, position: usize) -> Result<()> {
        let state = &mut self.operands[position];
        match program.next_tuple(state.id)? {
            Some(tuple) => {
                state.tuple = tuple;
                state.has_data = true;
            }
            None => {
                state.has_data = false;
                state.tuple.clear();
            }
        }
        Ok(())
    }
}

impl IteratorNode for MergeSort {
    fn base(&self) -> &IterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IterBase {
        &mut self.base
    }

    fn initialize(&mut self, program: &Program) -> Result<()> {
        if !self.base.initialized {
            for state in &self.operands {
                program.initialize_iterator(state.id)?;
            }
            self.base.initialized = true;
        }
        Ok(())
    }

    fn produce(&mut self, program: &Program) -> Result<bool> {
        if !self.started {
            for i in 0..self.operands.len() {
                self.advance(program, i)?;
            }
            self.started = true;
        }

        let mut winner: Option<usize> = None;
        for (i, state) in self.operands.iter().enumerate() {
            if !state.has_data {
                continue;
            }
            winner = match winner {
                None => Some(i),
                Some(w) => {
                    if self.compare(&state.tuple, &self.operands[w].tuple) == Ordering::Less {
                        Some(i)
                    } else {
                        Some(w)
                    }
                }
            };
        }

        match winner {
            Some(w) => {
                self.base.data = self.operands[w].tuple.clone();
                self.advance(program, w)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn reset(&mut self, program: &Program) -> Result<()> {
        for state in &mut self.operands {
            state.has_data = false;
            state.tuple.clear();
        }
        let ids: Vec<IteratorId> = self.operands.iter().map(|s| s.id).collect();
        for id in ids {
            program.reset_iterator(id)?;
        }
        self.started = false;
        self.base.reset_state();
        Ok(())
    }

    fn finish(&mut self, program: &Program) -> Result<()> {
        for state in &self.operands {
            program.finish_iterator(state.id)?;
        }
        self.finish_actions(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::iterator::tuples::Tuples;

    fn t(n: i32) -> Tuple {
        vec![Value::Integer(n)]
    }

    #[test]
    fn test_merges_sorted_streams() -> Result<()> {
        let program = Program::new();
        let a = program.register_iterator(Box::new(Tuples::new(vec![t(1), t(4), t(9)])));
        let b = program.register_iterator(Box::new(Tuples::new(vec![t(2), t(3)])));
        let merge = program.register_iterator(Box::new(MergeSort::new(
            vec![a, b],
            vec![SortKey {
                position: 0,
                descending: false,
            }],
        )?));

        program.initialize_iterator(merge)?;
        let mut got = Vec::new();
        while let Some(row) = program.next_tuple(merge)? {
            got.push(row[0].clone());
        }
        assert_eq!(
            got,
            vec![
                Value::Integer(1),
                Value::Integer(2),
                Value::Integer(3),
                Value::Integer(4),
                Value::Integer(9)
            ]
        );
        Ok(())
    }

    #[test]
    fn test_reset_replays_the_stream() -> Result<()> {
        let program = Program::new();
        let a = program.register_iterator(Box::new(Tuples::new(vec![t(5), t(6)])));
        let merge = program.register_iterator(Box::new(MergeSort::new(
            vec![a],
            vec![SortKey {
                position: 0,
                descending: false,
            }],
        )?));
        program.initialize_iterator(merge)?;
        let mut first = Vec::new();
        while let Some(row) = program.next_tuple(merge)? {
            first.push(row);
        }
        program.reset_iterator(merge)?;
        let mut second = Vec::new();
        while let Some(row) = program.next_tuple(merge)? {
            second.push(row);
        }
        assert_eq!(first, second);
        Ok(())
    }
}
