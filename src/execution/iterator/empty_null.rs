// EmptyNull: passes the operand through; if the operand turns out to be
// empty, emits one default tuple instead.

use crate::common::Tuple;
use crate::error::Result;
use crate::execution::iterator::{IterBase, IteratorNode};
use crate::execution::program::Program;
use crate::execution::IteratorId;

pub struct EmptyNull {
    base: IterBase,
    operand: IteratorId,
    default: Tuple,
    produced_any: bool,
    default_emitted: bool,
}

impl EmptyNull {
    pub fn new(operand: IteratorId, default: Tuple) -> Self {
        Self {
            base: IterBase::new(),
            operand,
            default,
            produced_any: false,
            default_emitted: false,
        }
    }
}

impl IteratorNode for EmptyNull {
    fn base(&self) -> &IterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IterBase {
        &mut self.base
    }

    fn initialize(&mut self, program: &Program) -> Result<()> {
        if !self.base.initialized {
            program.initialize_iterator(self.operand)?;
            self.base.initialized = true;
        }
        Ok(())
    }

    fn produce(&mut self, program: &Program) -> Result<bool> {
        if let Some(tuple) = program.next_tuple(self.operand)? {
            self.produced_any = true;
            self.base.data = tuple;
            return Ok(true);
        }
        if !self.produced_any && !self.default_emitted {
            self.default_emitted = true;
            self.base.data = self.default.clone();
            return Ok(true);
        }
        Ok(false)
    }

    fn reset(&mut self, program: &Program) -> Result<()> {
        program.reset_iterator(self.operand)?;
        self.produced_any = false;
        self.default_emitted = false;
        self.base.reset_state();
        Ok(())
    }

    fn finish(&mut self, program: &Program) -> Result<()> {
        program.finish_iterator(self.operand)?;
        self.finish_actions(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Value;
    use crate::execution::iterator::tuples::Tuples;

    #[test]
    fn test_passthrough_when_operand_has_rows() -> Result<()> {
        let program = Program::new();
        let operand =
            program.register_iterator(Box::new(Tuples::new(vec![vec![Value::Integer(1)]])));
        let it = program.register_iterator(Box::new(EmptyNull::new(
            operand,
            vec![Value::Null],
        )));
        program.initialize_iterator(it)?;
        assert_eq!(program.next_tuple(it)?, Some(vec![Value::Integer(1)]));
        assert_eq!(program.next_tuple(it)?, None);
        Ok(())
    }

    #[test]
    fn test_default_on_empty_operand() -> Result<()> {
        let program = Program::new();
        let operand = program.register_iterator(Box::new(Tuples::new(Vec::new())));
        let it = program.register_iterator(Box::new(EmptyNull::new(
            operand,
            vec![Value::Null, Value::Null],
        )));
        program.initialize_iterator(it)?;
        assert_eq!(
            program.next_tuple(it)?,
            Some(vec![Value::Null, Value::Null])
        );
        assert_eq!(program.next_tuple(it)?, None);
        Ok(())
    }
}
