// CollectionCheck: membership probe against a side collection, for EXISTS
// and IN sub-queries.

use crate::common::Tuple;
use crate::error::Result;
use crate::execution::operator::Operator;
use crate::execution::program::Program;
use crate::execution::status::Status;
use crate::execution::CollectionId;

pub struct CollectionCheck {
    collection: CollectionId,
    negated: bool,
}

impl CollectionCheck {
    pub fn new(collection: CollectionId) -> Self {
        Self {
            collection,
            negated: false,
        }
    }

    /// NOT IN / NOT EXISTS form.
    pub fn negated(collection: CollectionId) -> Self {
        Self {
            collection,
            negated: true,
        }
    }
}

impl Operator for CollectionCheck {
    fn execute(&mut self, program: &Program, tuple: &Tuple) -> Result<Status> {
        let slot = program.collection(self.collection)?;
        let found = slot.lock().probe(tuple)?;
        if found != self.negated {
            Ok(Status::Success)
        } else {
            Ok(Status::False)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Value;
    use crate::execution::collection::{ArrayCollection, Collection};
    use crate::execution::iterator::tuples::Tuples;
    use crate::execution::iterator::IteratorNode;

    #[test]
    fn test_membership_filters_rows() -> Result<()> {
        let program = Program::new();
        let mut side = ArrayCollection::new();
        side.put_data(&vec![Value::Integer(2)])?;
        side.put_data(&vec![Value::Integer(4)])?;
        let side = program.register_collection(Box::new(side));

        let rows: Vec<Tuple> = (1..=5).map(|i| vec![Value::Integer(i)]).collect();
        let mut source = Tuples::new(rows);
        let check = program.register_action(Box::new(CollectionCheck::new(side)));
        source.add_action(check);
        let id = program.register_iterator(Box::new(source));

        program.initialize_iterator(id)?;
        let mut got = Vec::new();
        while let Some(t) = program.next_tuple(id)? {
            got.push(t[0].clone());
        }
        assert_eq!(got, vec![Value::Integer(2), Value::Integer(4)]);
        Ok(())
    }
}
