// Output: writes the host's current tuple into a target collection. The
// array variant accumulates into an array variable for in-memory
// consumption.

use crate::common::{Tuple, Value};
use crate::error::{DbError, Result};
use crate::execution::operator::Operator;
use crate::execution::program::Program;
use crate::execution::status::Status;
use crate::execution::{CollectionId, VariableId};

pub struct Output {
    collection: CollectionId,
}

impl Output {
    pub fn new(collection: CollectionId) -> Self {
        Self { collection }
    }
}

impl Operator for Output {
    fn execute(&mut self, program: &Program, tuple: &Tuple) -> Result<Status> {
        let slot = program.collection(self.collection)?;
        let mut collection = slot.lock();
        while !collection.put_data(tuple)? {
            collection.shift()?;
        }
        Ok(Status::Success)
    }

    fn finish(&mut self, program: &Program) -> Result<()> {
        let slot = program.collection(self.collection)?;
        let result = slot.lock().finish_put();
        result
    }
}

/// Accumulates each tuple into an array-valued variable.
pub struct ArrayOutput {
    variable: VariableId,
}

impl ArrayOutput {
    pub fn new(variable: VariableId) -> Self {
        Self { variable }
    }
}

impl Operator for ArrayOutput {
    fn execute(&mut self, program: &Program, tuple: &Tuple) -> Result<Status> {
        let element = if tuple.len() == 1 {
            tuple[0].clone()
        } else {
            Value::Array(tuple.clone())
        };
        let slot = program.variable(self.variable)?;
        let mut value = slot.lock();
        match &mut *value {
            Value::Array(items) => items.push(element),
            other => {
                return Err(DbError::BadArgument(format!(
                    "array output into a non-array variable: {:?}",
                    other
                )))
            }
        }
        Ok(Status::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::iterator::tuples::Tuples;
    use crate::execution::iterator::IteratorNode;

    #[test]
    fn test_array_output_accumulates() -> Result<()> {
        let program = Program::new();
        let var = program.add_variable(Value::Array(Vec::new()));
        let rows = vec![vec![Value::Integer(4)], vec![Value::Integer(5)]];
        let mut source = Tuples::new(rows);
        let action = program.register_action(Box::new(ArrayOutput::new(var)));
        source.add_action(action);
        let id = program.register_iterator(Box::new(source));

        program.initialize_iterator(id)?;
        while program.next_iterator(id)? {}

        let slot = program.variable(var)?;
        assert_eq!(
            &*slot.lock(),
            &Value::Array(vec![Value::Integer(4), Value::Integer(5)])
        );
        Ok(())
    }
}
