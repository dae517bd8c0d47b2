// The Program: registered graph of everything one query execution needs.
//
// Nodes hold integer ids, never references to each other; every method
// call receives the program and resolves ids through it. That keeps the
// ownership a plain tree with the Program at the root.

use crate::common::{Tuple, Value};
use crate::driver::Locator;
use crate::error::{DbError, Result};
use crate::execution::collection::Collection;
use crate::execution::file_access::{FileAccess, Locker};
use crate::execution::iterator::IteratorNode;
use crate::execution::operator::Operator;
use crate::execution::status::Status;
use crate::execution::thread::ProducerThread;
use crate::execution::timestamp::StatementTimestamp;
use crate::execution::{
    ActionId, CollectionId, FileAccessId, IteratorId, LockerId, ThreadId, VariableId,
};
use crate::transaction::Transaction;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::warn;

type Slot<T> = Arc<Mutex<T>>;

/// One executable query graph.
pub struct Program {
    iterators: RwLock<Vec<Slot<Box<dyn IteratorNode>>>>,
    collections: RwLock<Vec<Slot<Box<dyn Collection>>>>,
    actions: RwLock<Vec<Slot<Box<dyn Operator>>>>,
    file_accesses: RwLock<Vec<Slot<FileAccess>>>,
    lockers: RwLock<Vec<Slot<Locker>>>,
    locators: RwLock<Vec<Slot<Box<dyn Locator>>>>,
    threads: RwLock<Vec<Slot<ProducerThread>>>,
    variables: RwLock<Vec<Slot<Value>>>,
    timestamp: StatementTimestamp,
    transaction: RwLock<Option<Arc<Transaction>>>,
    database_id: RwLock<Option<u64>>,
    is_update: RwLock<bool>,
    batch_mode: RwLock<bool>,
    /// Iterators initialized so far, for LIFO cleanup.
    executed: Mutex<Vec<IteratorId>>,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    pub fn new() -> Self {
        Self {
            iterators: RwLock::new(Vec::new()),
            collections: RwLock::new(Vec::new()),
            actions: RwLock::new(Vec::new()),
            file_accesses: RwLock::new(Vec::new()),
            lockers: RwLock::new(Vec::new()),
            locators: RwLock::new(Vec::new()),
            threads: RwLock::new(Vec::new()),
            variables: RwLock::new(Vec::new()),
            timestamp: StatementTimestamp::new(),
            transaction: RwLock::new(None),
            database_id: RwLock::new(None),
            is_update: RwLock::new(false),
            batch_mode: RwLock::new(false),
            executed: Mutex::new(Vec::new()),
        }
    }

    // ------------------------------------------------------------------
    // context
    // ------------------------------------------------------------------

    pub fn set_transaction(&self, trans: Arc<Transaction>) {
        *self.transaction.write() = Some(trans);
    }

    pub fn transaction(&self) -> Option<Arc<Transaction>> {
        self.transaction.read().clone()
    }

    pub fn set_database_id(&self, id: u64) {
        *self.database_id.write() = Some(id);
    }

    pub fn database_id(&self) -> Option<u64> {
        *self.database_id.read()
    }

    pub fn set_is_update(&self, flag: bool) {
        *self.is_update.write() = flag;
    }

    pub fn is_update(&self) -> bool {
        *self.is_update.read()
    }

    pub fn set_batch_mode(&self, flag: bool) {
        *self.batch_mode.write() = flag;
    }

    pub fn is_batch_mode(&self) -> bool {
        *self.batch_mode.read()
    }

    pub fn timestamp(&self) -> &StatementTimestamp {
        &self.timestamp
    }

    /// Cooperative cancellation; checked at iterator loop tops.
    pub fn check_canceled(&self) -> Result<()> {
        match self.transaction() {
            Some(trans) => trans.check_canceled(),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // registration
    // ------------------------------------------------------------------

    pub fn register_iterator(&self, node: Box<dyn IteratorNode>) -> IteratorId {
        let mut v = self.iterators.write();
        v.push(Arc::new(Mutex::new(node)));
        v.len() - 1
    }

    pub fn register_collection(&self, collection: Box<dyn Collection>) -> CollectionId {
        let mut v = self.collections.write();
        v.push(Arc::new(Mutex::new(collection)));
        v.len() - 1
    }

    pub fn register_action(&self, action: Box<dyn Operator>) -> ActionId {
        let mut v = self.actions.write();
        v.push(Arc::new(Mutex::new(action)));
        v.len() - 1
    }

    pub fn register_file_access(&self, access: FileAccess) -> FileAccessId {
        let mut v = self.file_accesses.write();
        v.push(Arc::new(Mutex::new(access)));
        v.len() - 1
    }

    pub fn register_locker(&self, locker: Locker) -> LockerId {
        let mut v = self.lockers.write();
        v.push(Arc::new(Mutex::new(locker)));
        v.len() - 1
    }

    pub fn register_locator(&self, locator: Box<dyn Locator>) -> super::LocatorId {
        let mut v = self.locators.write();
        v.push(Arc::new(Mutex::new(locator)));
        v.len() - 1
    }

    pub fn register_thread(&self, thread: ProducerThread) -> ThreadId {
        let mut v = self.threads.write();
        v.push(Arc::new(Mutex::new(thread)));
        v.len() - 1
    }

    pub fn add_variable(&self, value: Value) -> VariableId {
        let mut v = self.variables.write();
        v.push(Arc::new(Mutex::new(value)));
        v.len() - 1
    }

    // ------------------------------------------------------------------
    // resolution
    // ------------------------------------------------------------------

    pub fn iterator(&self, id: IteratorId) -> Result<Slot<Box<dyn IteratorNode>>> {
        self.iterators
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::BadArgument(format!("no iterator {}", id)))
    }

    pub fn collection(&self, id: CollectionId) -> Result<Slot<Box<dyn Collection>>> {
        self.collections
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::BadArgument(format!("no collection {}", id)))
    }

    pub fn action(&self, id: ActionId) -> Result<Slot<Box<dyn Operator>>> {
        self.actions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::BadArgument(format!("no action {}", id)))
    }

    pub fn file_access(&self, id: FileAccessId) -> Result<Slot<FileAccess>> {
        self.file_accesses
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::BadArgument(format!("no file access {}", id)))
    }

    pub fn locker(&self, id: LockerId) -> Result<Slot<Locker>> {
        self.lockers
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::BadArgument(format!("no locker {}", id)))
    }

    pub fn locator(&self, id: super::LocatorId) -> Result<Slot<Box<dyn Locator>>> {
        self.locators
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::BadArgument(format!("no locator {}", id)))
    }

    pub fn thread(&self, id: ThreadId) -> Result<Slot<ProducerThread>> {
        self.threads
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::BadArgument(format!("no thread {}", id)))
    }

    pub fn variable(&self, id: VariableId) -> Result<Slot<Value>> {
        self.variables
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::BadArgument(format!("no variable {}", id)))
    }

    // ------------------------------------------------------------------
    // iterator driving
    // ------------------------------------------------------------------

    pub fn initialize_iterator(&self, id: IteratorId) -> Result<()> {
        let slot = self.iterator(id)?;
        let mut node = slot.lock();
        node.initialize(self)?;
        let mut executed = self.executed.lock();
        if !executed.contains(&id) {
            executed.push(id);
        }
        Ok(())
    }

    pub fn start_up_iterator(&self, id: IteratorId) -> Result<Status> {
        let slot = self.iterator(id)?;
        let mut node = slot.lock();
        node.start_up(self)
    }

    /// Advance an iterator one tuple; false at end of data.
    pub fn next_iterator(&self, id: IteratorId) -> Result<bool> {
        let slot = self.iterator(id)?;
        let mut node = slot.lock();
        node.next(self)
    }

    /// Advance and clone the produced tuple.
    pub fn next_tuple(&self, id: IteratorId) -> Result<Option<Tuple>> {
        let slot = self.iterator(id)?;
        let mut node = slot.lock();
        if node.next(self)? {
            Ok(Some(node.current().clone()))
        } else {
            Ok(None)
        }
    }

    /// Current output tuple of an iterator, without advancing.
    pub fn current_tuple(&self, id: IteratorId) -> Result<Tuple> {
        let slot = self.iterator(id)?;
        let node = slot.lock();
        Ok(node.current().clone())
    }

    pub fn reset_iterator(&self, id: IteratorId) -> Result<()> {
        let slot = self.iterator(id)?;
        let mut node = slot.lock();
        node.reset(self)
    }

    pub fn finish_iterator(&self, id: IteratorId) -> Result<()> {
        let slot = self.iterator(id)?;
        let mut node = slot.lock();
        node.finish(self)
    }

    pub fn terminate_iterator(&self, id: IteratorId) {
        if let Ok(slot) = self.iterator(id) {
            let mut node = slot.lock();
            node.terminate(self);
        }
    }

    /// Run one iterator to completion: initialize, start up, drain, finish,
    /// terminate. On error, finish hooks still run for every initialized
    /// iterator in LIFO order, then terminate; the first error wins.
    pub fn execute_iterator(&self, id: IteratorId) -> Result<()> {
        let result = (|| -> Result<()> {
            self.initialize_iterator(id)?;
            let status = self.start_up_iterator(id)?;
            if status != Status::Break {
                while self.next_iterator(id)? {}
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.finish_iterator(id)?;
                self.cleanup();
                Ok(())
            }
            Err(e) => {
                // Cancellation and failures unwind through finish but must
                // never skip terminate.
                let executed: Vec<IteratorId> =
                    self.executed.lock().iter().rev().copied().collect();
                for it in &executed {
                    if let Err(inner) = self.finish_iterator(*it) {
                        warn!(iterator = it, error = %inner, "finish failed during unwind");
                    }
                }
                self.cleanup();
                Err(e)
            }
        }
    }

    /// Terminate every initialized iterator, LIFO.
    fn cleanup(&self) {
        let executed: Vec<IteratorId> = {
            let mut guard = self.executed.lock();
            let v = guard.iter().rev().copied().collect();
            guard.clear();
            v
        };
        for id in executed {
            self.terminate_iterator(id);
        }
    }

    /// Clear execution state so a prepared program can run again.
    pub fn clear(&self) {
        self.executed.lock().clear();
        self.timestamp.reset();
    }
}
