// CascadeInput: concatenates its operands in declared order.

use crate::error::Result;
use crate::execution::iterator::{IterBase, IteratorNode};
use crate::execution::program::Program;
use crate::execution::IteratorId;

pub struct CascadeInput {
    base: IterBase,
    operands: Vec<IteratorId>,
    current: usize,
}

impl CascadeInput {
    pub fn new(operands: Vec<IteratorId>) -> Self {
        Self {
            base: IterBase::new(),
            operands,
            current: 0,
        }
    }
}

impl IteratorNode for CascadeInput {
    fn base(&self) -> &IterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IterBase {
        &mut self.base
    }

    fn initialize(&mut self, program: &Program) -> Result<()> {
        if !self.base.initialized {
            for &id in &self.operands {
                program.initialize_iterator(id)?;
            }
            self.base.initialized = true;
        }
        Ok(())
    }

    fn produce(&mut self, program: &Program) -> Result<bool> {
        while self.current < self.operands.len() {
            if let Some(tuple) = program.next_tuple(self.operands[self.current])? {
                self.base.data = tuple;
                return Ok(true);
            }
            self.current += 1;
        }
        Ok(false)
    }

    fn reset(&mut self, program: &Program) -> Result<()> {
        for &id in &self.operands {
            program.reset_iterator(id)?;
        }
        self.current = 0;
        self.base.reset_state();
        Ok(())
    }

    fn finish(&mut self, program: &Program) -> Result<()> {
        for &id in &self.operands {
            program.finish_iterator(id)?;
        }
        self.finish_actions(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Value;
    use crate::execution::iterator::tuples::Tuples;

    #[test]
    fn test_concatenates_in_order() -> Result<()> {
        let program = Program::new();
        let a = program.register_iterator(Box::new(Tuples::new(vec![
            vec![Value::Integer(1)],
            vec![Value::Integer(2)],
        ])));
        let b = program.register_iterator(Box::new(Tuples::new(vec![vec![Value::Integer(3)]])));
        let cascade = program.register_iterator(Box::new(CascadeInput::new(vec![a, b])));

        program.initialize_iterator(cascade)?;
        let mut got = Vec::new();
        while let Some(row) = program.next_tuple(cascade)? {
            got.push(row[0].clone());
        }
        assert_eq!(
            got,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
        );
        Ok(())
    }
}
