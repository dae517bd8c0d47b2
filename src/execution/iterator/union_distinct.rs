// UnionDistinct: k-way merge over operands already sorted by a key
// prefix. Operands sharing the winning key contribute their value fields;
// the rest contribute their declared defaults. Stable: operand order
// breaks ties.

use crate::common::{compare_tuples, Tuple, Value};
use crate::error::{DbError, Result};
use crate::execution::iterator::{IterBase, IteratorNode};
use crate::execution::program::Program;
use crate::execution::IteratorId;
use std::cmp::Ordering;

struct OperandState {
    id: IteratorId,
    has_data: bool,
    tuple: Tuple,
    /// Values contributed when another operand wins the key.
    default: Tuple,
}

pub struct UnionDistinct {
    base: IterBase,
    operands: Vec<OperandState>,
    key_len: usize,
    /// Operand positions ordered by current key; exhausted operands sink
    /// to the tail.
    order: Vec<usize>,
    started: bool,
}

impl UnionDistinct {
    /// `defaults[i]` supplies operand i's value fields when it does not
    /// share the winning key.
    pub fn new(operands: Vec<IteratorId>, key_len: usize, defaults: Vec<Tuple>) -> Result<Self> {
        if operands.len() != defaults.len() {
            return Err(DbError::BadArgument(
                "one default per union operand".into(),
            ));
        }
        Ok(Self {
            base: IterBase::new(),
            operands: operands
                .into_iter()
                .zip(defaults)
                .map(|(id, default)| OperandState {
                    id,
                    has_data: false,
                    tuple: Tuple::new(),
                    default,
                })
                .collect(),
            key_len,
            order: Vec::new(),
            started: false,
        })
    }

    fn key_of(&self, tuple: &Tuple) -> Tuple {
        tuple.iter().take(self.key_len).cloned().collect()
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

    fn sort_order(&mut self) {
        let operands = &self.operands;
        let key_len = self.key_len;
        self.order.sort_by(|&a, &b| {
            let oa = &operands[a];
            let ob = &operands[b];
            match (oa.has_data, ob.has_data) {
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => a.cmp(&b),
                (true, true) => {
                    let ka: Vec<Value> = oa.tuple.iter().take(key_len).cloned().collect();
                    let kb: Vec<Value> = ob.tuple.iter().take(key_len).cloned().collect();
                    compare_tuples(&ka, &kb).then(a.cmp(&b))
                }
            }
        });
    }
}

impl IteratorNode for UnionDistinct {
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
        let n = self.operands.len();
        if n == 0 {
            return Ok(false);
        }

        if !self.started {
            for i in 0..n {
                self.advance(program, i)?;
            }
            self.order = (0..n).collect();
            self.sort_order();
            self.started = true;
        }

        let top = self.order[0];
        if !self.operands[top].has_data {
            return Ok(false);
        }

        let key = self.key_of(&self.operands[top].tuple);

        // Collect contributions; operands with the winning key advance.
        let mut out = key.clone();
        let mut consumed = Vec::new();
        for &pos in &self.order {
            let state = &self.operands[pos];
            if state.has_data && self.key_of(&state.tuple) == key {
                consumed.push(pos);
            }
        }
        for i in 0..n {
            let state = &self.operands[i];
            if consumed.contains(&i) {
                out.extend(state.tuple.iter().skip(self.key_len).cloned());
            } else {
                out.extend(state.default.iter().cloned());
            }
        }

        for pos in consumed {
            self.advance(program, pos)?;
        }
        self.sort_order();

        self.base.data = out;
        Ok(true)
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
        self.order.clear();
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

    fn kv(k: i32, v: &str) -> Tuple {
        vec![Value::Integer(k), Value::String(v.into())]
    }

    #[test]
    fn test_merges_and_dedupes() -> Result<()> {
        let program = Program::new();
        let left = program.register_iterator(Box::new(Tuples::new(vec![
            kv(1, "l1"),
            kv(3, "l3"),
        ])));
        let right = program.register_iterator(Box::new(Tuples::new(vec![
            kv(1, "r1"),
            kv(2, "r2"),
        ])));
        let union = program.register_iterator(Box::new(UnionDistinct::new(
            vec![left, right],
            1,
            vec![vec![Value::Null], vec![Value::Null]],
        )?));

        program.initialize_iterator(union)?;
        let mut rows = Vec::new();
        while let Some(t) = program.next_tuple(union)? {
            rows.push(t);
        }

        assert_eq!(rows.len(), 3);
        // key 1 present in both: both contribute values
        assert_eq!(
            rows[0],
            vec![
                Value::Integer(1),
                Value::String("l1".into()),
                Value::String("r1".into())
            ]
        );
        // key 2 only in right: left falls back to its default
        assert_eq!(
            rows[1],
            vec![Value::Integer(2), Value::Null, Value::String("r2".into())]
        );
        assert_eq!(
            rows[2],
            vec![Value::Integer(3), Value::String("l3".into()), Value::Null]
        );
        Ok(())
    }

    #[test]
    fn test_all_empty_operands() -> Result<()> {
        let program = Program::new();
        let a = program.register_iterator(Box::new(Tuples::new(Vec::new())));
        let b = program.register_iterator(Box::new(Tuples::new(Vec::new())));
        let union = program.register_iterator(Box::new(UnionDistinct::new(
            vec![a, b],
            1,
            vec![Vec::new(), Vec::new()],
        )?));
        program.initialize_iterator(union)?;
        assert_eq!(program.next_tuple(union)?, None);
        Ok(())
    }
}
