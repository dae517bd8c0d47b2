// Iterate: drives an inner iterator from an action slot.

use crate::common::Tuple;
use crate::error::Result;
use crate::execution::operator::Operator;
use crate::execution::program::Program;
use crate::execution::status::Status;
use crate::execution::IteratorId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterateMode {
    /// Call the inner iterator's next exactly once.
    Once,
    /// Drain the inner iterator.
    All,
    /// Re-run the inner start-up, then drain.
    RuntimeStartup,
    /// Fully reset the inner iterator, then drain. For nested loops.
    NestedAll,
}

pub struct Iterate {
    target: IteratorId,
    mode: IterateMode,
}

impl Iterate {
    pub fn new(target: IteratorId, mode: IterateMode) -> Self {
        Self { target, mode }
    }

    pub fn once(target: IteratorId) -> Self {
        Self::new(target, IterateMode::Once)
    }

    pub fn all(target: IteratorId) -> Self {
        Self::new(target, IterateMode::All)
    }
}

impl Operator for Iterate {
    fn initialize(&mut self, program: &Program) -> Result<()> {
        program.initialize_iterator(self.target)
    }

    fn execute(&mut self, program: &Program, _tuple: &Tuple) -> Result<Status> {
        match self.mode {
            IterateMode::Once => {
                program.next_iterator(self.target)?;
            }
            IterateMode::All => {
                while program.next_iterator(self.target)? {}
            }
            IterateMode::RuntimeStartup => {
                let status = program.start_up_iterator(self.target)?;
                if status != Status::Break {
                    while program.next_iterator(self.target)? {}
                }
            }
            IterateMode::NestedAll => {
                program.reset_iterator(self.target)?;
                while program.next_iterator(self.target)? {}
            }
        }
        Ok(Status::Success)
    }

    fn finish(&mut self, program: &Program) -> Result<()> {
        program.finish_iterator(self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Value;
    use crate::execution::collection::QueueCollection;
    use crate::execution::iterator::tuples::Tuples;
    use crate::execution::iterator::IteratorNode;
    use crate::execution::operator::output::Output;

    #[test]
    fn test_once_calls_next_exactly_once() -> Result<()> {
        let program = Program::new();
        let sink = program.register_collection(Box::new(QueueCollection::new()));
        let inner_rows = vec![
            vec![Value::Integer(1)],
            vec![Value::Integer(2)],
            vec![Value::Integer(3)],
        ];
        let mut inner = Tuples::new(inner_rows);
        let out = program.register_action(Box::new(Output::new(sink)));
        inner.add_action(out);
        let inner = program.register_iterator(Box::new(inner));

        // Outer: a one-row constant source with Iterate.Once attached.
        let mut outer = Tuples::new(vec![vec![Value::Integer(0)]]);
        let action = program.register_action(Box::new(Iterate::once(inner)));
        outer.add_action(action);
        let outer = program.register_iterator(Box::new(outer));

        program.execute_iterator(outer)?;

        // The inner iterator advanced exactly once.
        let slot = program.collection(sink)?;
        assert_eq!(slot.lock().len(), 1);
        Ok(())
    }

    #[test]
    fn test_all_drains_inner() -> Result<()> {
        let program = Program::new();
        let sink = program.register_collection(Box::new(QueueCollection::new()));
        let mut inner = Tuples::new(vec![vec![Value::Integer(1)], vec![Value::Integer(2)]]);
        let out = program.register_action(Box::new(Output::new(sink)));
        inner.add_action(out);
        let inner = program.register_iterator(Box::new(inner));

        let mut outer = Tuples::new(vec![vec![Value::Integer(0)]]);
        let action = program.register_action(Box::new(Iterate::all(inner)));
        outer.add_action(action);
        let outer = program.register_iterator(Box::new(outer));

        program.execute_iterator(outer)?;
        let slot = program.collection(sink)?;
        assert_eq!(slot.lock().len(), 2);
        Ok(())
    }
}
