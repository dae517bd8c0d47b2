// Producer threads: an input iterator can fill its collection from a
// second thread while the consumer drains it. The handle reports the
// producer's terminal result through a channel so join surfaces errors.

use crate::error::{DbError, Result};
use crate::execution::program::Program;
use crate::execution::{CollectionId, IteratorId};
use crossbeam::channel::{bounded, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

enum State {
    Idle,
    Running {
        handle: JoinHandle<()>,
        done: Receiver<Result<()>>,
    },
    Finished,
}

/// Drives `source` to completion on its own thread, putting every tuple
/// into `sink`.
pub struct ProducerThread {
    program: Arc<Program>,
    source: IteratorId,
    sink: CollectionId,
    state: State,
}

impl ProducerThread {
    pub fn new(program: Arc<Program>, source: IteratorId, sink: CollectionId) -> Self {
        Self {
            program,
            source,
            sink,
            state: State::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }

    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let program = Arc::clone(&self.program);
        let source = self.source;
        let sink = self.sink;
        let (tx, rx) = bounded(1);

        let handle = std::thread::Builder::new()
            .name("input-producer".into())
            .spawn(move || {
                let outcome = (|| -> Result<()> {
                    program.initialize_iterator(source)?;
                    while let Some(tuple) = program.next_tuple(source)? {
                        let slot = program.collection(sink)?;
                        let mut collection = slot.lock();
                        while !collection.put_data(&tuple)? {
                            collection.shift()?;
                        }
                    }
                    program.finish_iterator(source)?;
                    let slot = program.collection(sink)?;
                    let result = slot.lock().finish_put();
                    result
                })();
                debug!(ok = outcome.is_ok(), "producer thread finished");
                let _ = tx.send(outcome);
            })
            .map_err(|e| DbError::Internal(format!("spawning producer thread: {}", e)))?;

        self.state = State::Running { handle, done: rx };
        Ok(())
    }

    /// Wait for the producer and surface its result.
    pub fn join(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Finished) {
            State::Running { handle, done } => {
                let outcome = done
                    .recv()
                    .unwrap_or_else(|_| Err(DbError::Internal("producer thread lost".into())));
                let _ = handle.join();
                outcome
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Tuple, Value};
    use crate::execution::collection::QueueCollection;
    use crate::execution::iterator::tuples::Tuples;

    #[test]
    fn test_producer_fills_collection() -> Result<()> {
        let program = Arc::new(Program::new());
        let rows: Vec<Tuple> = (0..5).map(|i| vec![Value::Integer(i)]).collect();
        let source = program.register_iterator(Box::new(Tuples::new(rows)));
        let sink = program.register_collection(Box::new(QueueCollection::new()));

        let mut producer = ProducerThread::new(Arc::clone(&program), source, sink);
        producer.start()?;
        producer.join()?;

        let slot = program.collection(sink)?;
        assert_eq!(slot.lock().len(), 5);
        Ok(())
    }
}
