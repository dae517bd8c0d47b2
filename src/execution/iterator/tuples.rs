// Constant-row iterator: yields a compile-time list of rows in order.

use crate::common::Tuple;
use crate::error::Result;
use crate::execution::iterator::{IterBase, IteratorNode};
use crate::execution::program::Program;

pub struct Tuples {
    base: IterBase,
    rows: Vec<Tuple>,
    position: usize,
}

impl Tuples {
    pub fn new(rows: Vec<Tuple>) -> Self {
        Self {
            base: IterBase::new(),
            rows,
            position: 0,
        }
    }
}

impl IteratorNode for Tuples {
    fn base(&self) -> &IterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IterBase {
        &mut self.base
    }

    fn produce(&mut self, _program: &Program) -> Result<bool> {
        match self.rows.get(self.position) {
            Some(row) => {
                self.base.data = row.clone();
                self.position += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn reset(&mut self, _program: &Program) -> Result<()> {
        self.position = 0;
        self.base.reset_state();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Value;

    #[test]
    fn test_yields_rows_then_resets() -> Result<()> {
        let program = Program::new();
        let mut it = Tuples::new(vec![
            vec![Value::Integer(1)],
            vec![Value::Integer(2)],
        ]);
        it.initialize(&program)?;
        assert!(it.next(&program)?);
        assert_eq!(it.current(), &vec![Value::Integer(1)]);
        assert!(it.next(&program)?);
        assert!(!it.next(&program)?);
        // end is sticky
        assert!(!it.next(&program)?);

        it.reset(&program)?;
        assert!(it.next(&program)?);
        assert_eq!(it.current(), &vec![Value::Integer(1)]);
        Ok(())
    }
}
