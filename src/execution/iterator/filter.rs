// Filter: one operand filtered through a collection.
//
// In predicate mode the collection is a membership table and only operand
// tuples it contains pass through. In aggregation mode the operand is
// drained into a grouping collection at start-up and the groups come out;
// an empty grouping still emits its single aggregate row on empty input.

use crate::common::Tuple;
use crate::error::Result;
use crate::execution::iterator::{IterBase, IteratorNode};
use crate::execution::program::Program;
use crate::execution::status::Status;
use crate::execution::{CollectionId, IteratorId};

pub struct Filter {
    base: IterBase,
    operand: IteratorId,
    collection: CollectionId,
    aggregation: bool,
}

impl Filter {
    pub fn new(operand: IteratorId, collection: CollectionId) -> Self {
        Self {
            base: IterBase::new(),
            operand,
            collection,
            aggregation: false,
        }
    }

    pub fn aggregating(operand: IteratorId, collection: CollectionId) -> Self {
        Self {
            base: IterBase::new(),
            operand,
            collection,
            aggregation: true,
        }
    }
}

impl IteratorNode for Filter {
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

    fn start_up(&mut self, program: &Program) -> Result<Status> {
        let actions = self.base().startup_actions.clone();
        for id in actions {
            let slot = program.action(id)?;
            let status = slot.lock().execute(program, &Tuple::new())?;
            if status == Status::Break || status == Status::False {
                return Ok(status);
            }
        }
        if self.aggregation {
            // Materialize the groups before the first next().
            while let Some(tuple) = program.next_tuple(self.operand)? {
                let slot = program.collection(self.collection)?;
                let mut collection = slot.lock();
                while !collection.put_data(&tuple)? {
                    collection.shift()?;
                }
            }
            let slot = program.collection(self.collection)?;
            slot.lock().finish_put()?;
        }
        Ok(Status::Success)
    }

    fn produce(&mut self, program: &Program) -> Result<bool> {
        if self.aggregation {
            let slot = program.collection(self.collection)?;
            let mut collection = slot.lock();
            return collection.get_data(&mut self.base.data);
        }
        while let Some(tuple) = program.next_tuple(self.operand)? {
            let keep = {
                let slot = program.collection(self.collection)?;
                let mut collection = slot.lock();
                collection.probe(&tuple)?
            };
            if keep {
                self.base.data = tuple;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn reset(&mut self, program: &Program) -> Result<()> {
        program.reset_iterator(self.operand)?;
        let slot = program.collection(self.collection)?;
        slot.lock().reset_get();
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
    use crate::execution::collection::{ArrayCollection, Collection, GroupingCollection};
    use crate::execution::iterator::tuples::Tuples;

    #[test]
    fn test_predicate_filter() -> Result<()> {
        let program = Program::new();
        let rows = vec![
            vec![Value::Integer(1)],
            vec![Value::Integer(2)],
            vec![Value::Integer(3)],
        ];
        let operand = program.register_iterator(Box::new(Tuples::new(rows)));
        let mut table = ArrayCollection::new();
        table.put_data(&vec![Value::Integer(2)])?;
        let table_id = program.register_collection(Box::new(table));
        let filter = program.register_iterator(Box::new(Filter::new(operand, table_id)));

        program.initialize_iterator(filter)?;
        program.start_up_iterator(filter)?;
        assert_eq!(
            program.next_tuple(filter)?,
            Some(vec![Value::Integer(2)])
        );
        assert_eq!(program.next_tuple(filter)?, None);
        Ok(())
    }

    #[test]
    fn test_empty_grouping_aggregates_empty_input() -> Result<()> {
        let program = Program::new();
        let operand = program.register_iterator(Box::new(Tuples::new(Vec::new())));
        let group = program.register_collection(Box::new(GroupingCollection::new(Vec::new())));
        let filter = program.register_iterator(Box::new(Filter::aggregating(operand, group)));

        program.initialize_iterator(filter)?;
        program.start_up_iterator(filter)?;
        let row = program.next_tuple(filter)?.expect("one aggregate row");
        assert_eq!(row, vec![Value::BigInt(0)]);
        assert_eq!(program.next_tuple(filter)?, None);
        Ok(())
    }
}
