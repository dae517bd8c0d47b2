// Input: reads tuples out of one collection. The threaded variant starts
// a producer at start-up that fills the collection in parallel; the
// consumer drains what is there and joins the producer when it catches
// up.

use crate::common::Tuple;
use crate::error::Result;
use crate::execution::iterator::{IterBase, IteratorNode};
use crate::execution::program::Program;
use crate::execution::status::Status;
use crate::execution::{CollectionId, ThreadId};

pub struct Input {
    base: IterBase,
    collection: CollectionId,
    thread: Option<ThreadId>,
    joined: bool,
}

impl Input {
    pub fn new(collection: CollectionId) -> Self {
        Self {
            base: IterBase::new(),
            collection,
            thread: None,
            joined: false,
        }
    }

    pub fn with_thread(collection: CollectionId, thread: ThreadId) -> Self {
        Self {
            base: IterBase::new(),
            collection,
            thread: Some(thread),
            joined: false,
        }
    }
}

impl IteratorNode for Input {
    fn base(&self) -> &IterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IterBase {
        &mut self.base
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
        if let Some(thread) = self.thread {
            program.thread(thread)?.lock().start()?;
            self.joined = false;
        }
        Ok(Status::Success)
    }

    fn produce(&mut self, program: &Program) -> Result<bool> {
        loop {
            let got = {
                let slot = program.collection(self.collection)?;
                let mut collection = slot.lock();
                collection.get_data(&mut self.base.data)?
            };
            if got {
                return Ok(true);
            }
            match self.thread {
                Some(thread) if !self.joined => {
                    // Consumer caught up with the producer: wait it out,
                    // then read whatever remains.
                    program.thread(thread)?.lock().join()?;
                    self.joined = true;
                }
                _ => return Ok(false),
            }
        }
    }

    fn reset(&mut self, program: &Program) -> Result<()> {
        let slot = program.collection(self.collection)?;
        slot.lock().reset_get();
        self.base.reset_state();
        Ok(())
    }

    fn finish(&mut self, program: &Program) -> Result<()> {
        if let Some(thread) = self.thread {
            if !self.joined {
                program.thread(thread)?.lock().join()?;
                self.joined = true;
            }
        }
        self.finish_actions(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Tuple, Value};
    use crate::execution::collection::QueueCollection;
    use crate::execution::iterator::tuples::Tuples;
    use crate::execution::thread::ProducerThread;
    use std::sync::Arc;

    #[test]
    fn test_reads_collection() -> Result<()> {
        let program = Program::new();
        let collection = program.register_collection(Box::new(QueueCollection::new()));
        {
            let slot = program.collection(collection)?;
            let mut c = slot.lock();
            c.put_data(&vec![Value::Integer(7)])?;
            c.put_data(&vec![Value::Integer(8)])?;
        }
        let id = program.register_iterator(Box::new(Input::new(collection)));
        program.initialize_iterator(id)?;
        assert_eq!(
            program.next_tuple(id)?,
            Some(vec![Value::Integer(7)])
        );
        assert_eq!(
            program.next_tuple(id)?,
            Some(vec![Value::Integer(8)])
        );
        assert_eq!(program.next_tuple(id)?, None);
        Ok(())
    }

    #[test]
    fn test_threaded_input_sees_all_rows() -> Result<()> {
        let program = Arc::new(Program::new());
        let rows: Vec<Tuple> = (0..100).map(|i| vec![Value::Integer(i)]).collect();
        let source = program.register_iterator(Box::new(Tuples::new(rows)));
        let shared = program.register_collection(Box::new(QueueCollection::new()));
        let thread = program.register_thread(ProducerThread::new(
            Arc::clone(&program),
            source,
            shared,
        ));
        let input = program.register_iterator(Box::new(Input::with_thread(shared, thread)));

        program.initialize_iterator(input)?;
        assert_ne!(program.start_up_iterator(input)?, Status::Break);
        let mut count = 0;
        while program.next_iterator(input)? {
            count += 1;
        }
        program.finish_iterator(input)?;
        assert_eq!(count, 100);
        Ok(())
    }
}
