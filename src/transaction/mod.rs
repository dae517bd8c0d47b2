// Transactions and the intent-lock table.
//
// The execution core needs three things from a transaction: a linearizable
// view per worker (one transaction per session statement), cooperative
// cancellation checked at loop tops, and timed lock acquisition so
// background work can skip instead of blocking.

use crate::common::FileIdentity;
use crate::error::{DbError, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub type TransactionId = u64;

/// Read-write class of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    ReadOnly,
    ReadWrite,
}

/// Isolation level. Background merges run ReadCommitted; user transactions
/// choose per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Lock modes over schema objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    IntentShared,
    IntentExclusive,
    Shared,
    Exclusive,
}

impl LockMode {
    /// Standard multi-granularity compatibility.
    pub fn is_compatible(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (IntentShared, Exclusive) | (Exclusive, IntentShared) => false,
            (IntentShared, _) | (_, IntentShared) => true,
            (IntentExclusive, IntentExclusive) => true,
            (IntentExclusive, _) | (_, IntentExclusive) => false,
            (Shared, Shared) => true,
            _ => false,
        }
    }
}

/// How long a lock is meant to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDuration {
    /// Released at the end of the enclosing operation.
    Inside,
    /// Released at statement end.
    Statement,
    /// Released at commit/rollback.
    Transaction,
}

/// Lockable resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockTarget {
    Database(u64),
    Table(u64, u64),
    File(FileIdentity),
}

/// Logical log records the core emits. Only the kinds the core itself
/// writes are modeled; the log writer below is out of scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogRecord {
    /// A deferred-update merge is about to run against this file.
    Merge {
        file: FileIdentity,
        stamp: DateTime<Utc>,
    },
    Commit {
        transaction: TransactionId,
        stamp: DateTime<Utc>,
    },
    Rollback {
        transaction: TransactionId,
        stamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
    RolledBack,
}

/// Shared lock table with blocking, timed acquisition.
#[derive(Default)]
pub struct LockTable {
    entries: Mutex<HashMap<LockTarget, Vec<(TransactionId, LockMode)>>>,
    released: Condvar,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_grant(
        &self,
        entries: &mut HashMap<LockTarget, Vec<(TransactionId, LockMode)>>,
        txn: TransactionId,
        target: LockTarget,
        mode: LockMode,
    ) -> bool {
        let holders = entries.entry(target).or_default();
        if holders
            .iter()
            .all(|&(id, held)| id == txn || mode.is_compatible(held))
        {
            if !holders.iter().any(|&(id, held)| id == txn && held == mode) {
                holders.push((txn, mode));
            }
            true
        } else {
            false
        }
    }

    /// Acquire with a deadline; `DbError::LockTimeout` when it passes.
    pub fn acquire(
        &self,
        txn: TransactionId,
        target: LockTarget,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut entries = self.entries.lock();
        loop {
            if self.try_grant(&mut entries, txn, target, mode) {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(?target, ?mode, "lock acquisition timed out");
                return Err(DbError::LockTimeout);
            }
            if self
                .released
                .wait_until(&mut entries, deadline)
                .timed_out()
            {
                // One last try before giving up; the holder may have left
                // exactly at the deadline.
                if self.try_grant(&mut entries, txn, target, mode) {
                    return Ok(());
                }
                return Err(DbError::LockTimeout);
            }
        }
    }

    /// Drop every lock a transaction holds.
    pub fn release_all(&self, txn: TransactionId) {
        let mut entries = self.entries.lock();
        entries.retain(|_, holders| {
            holders.retain(|&(id, _)| id != txn);
            !holders.is_empty()
        });
        self.released.notify_all();
    }

    pub fn holds(&self, txn: TransactionId, target: LockTarget) -> bool {
        let entries = self.entries.lock();
        entries
            .get(&target)
            .map(|h| h.iter().any(|&(id, _)| id == txn))
            .unwrap_or(false)
    }
}

/// One transaction. Created by the manager, shared by reference through
/// the program being executed.
pub struct Transaction {
    id: TransactionId,
    database_id: u64,
    category: Category,
    isolation: IsolationLevel,
    canceled: AtomicBool,
    state: Mutex<TxnState>,
    locks: Arc<LockTable>,
    log: Mutex<Vec<LogRecord>>,
}

impl Transaction {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn database_id(&self) -> u64 {
        self.database_id
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Cooperative cancellation flag, checked at operator loop tops.
    pub fn is_canceled_statement(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    /// Clear the flag when a new statement starts on the session.
    pub fn reset_cancel(&self) {
        self.canceled.store(false, Ordering::Release);
    }

    /// Bail out with `Cancel` if the statement was canceled.
    pub fn check_canceled(&self) -> Result<()> {
        if self.is_canceled_statement() {
            Err(DbError::Cancel)
        } else {
            Ok(())
        }
    }

    pub fn is_active(&self) -> bool {
        *self.state.lock() == TxnState::Active
    }

    pub fn lock(
        &self,
        target: LockTarget,
        mode: LockMode,
        _duration: LockDuration,
        timeout: Duration,
    ) -> Result<()> {
        if self.category == Category::ReadOnly && mode != LockMode::IntentShared
            && mode != LockMode::Shared
        {
            return Err(DbError::BadArgument(
                "write lock requested by a read-only transaction".into(),
            ));
        }
        self.locks.acquire(self.id, target, mode, timeout)
    }

    pub fn holds(&self, target: LockTarget) -> bool {
        self.locks.holds(self.id, target)
    }

    /// Append a logical log record.
    pub fn store_log(&self, record: LogRecord) {
        self.log.lock().push(record);
    }

    /// Records written so far (recovery collaborators read these).
    pub fn log_records(&self) -> Vec<LogRecord> {
        self.log.lock().clone()
    }

    pub fn commit(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != TxnState::Active {
            return Err(DbError::BadArgument("transaction is not active".into()));
        }
        *state = TxnState::Committed;
        drop(state);
        self.store_log(LogRecord::Commit {
            transaction: self.id,
            stamp: Utc::now(),
        });
        self.locks.release_all(self.id);
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != TxnState::Active {
            return Err(DbError::BadArgument("transaction is not active".into()));
        }
        *state = TxnState::RolledBack;
        drop(state);
        self.store_log(LogRecord::Rollback {
            transaction: self.id,
            stamp: Utc::now(),
        });
        self.locks.release_all(self.id);
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // An abandoned active transaction must not leave locks behind.
        if *self.state.lock() == TxnState::Active {
            self.locks.release_all(self.id);
        }
    }
}

/// Hands out transactions over one shared lock table.
pub struct TransactionManager {
    next_id: AtomicU64,
    locks: Arc<LockTable>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            locks: Arc::new(LockTable::new()),
        }
    }

    pub fn begin(
        &self,
        database_id: u64,
        category: Category,
        isolation: IsolationLevel,
    ) -> Arc<Transaction> {
        Arc::new(Transaction {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            database_id,
            category,
            isolation,
            canceled: AtomicBool::new(false),
            state: Mutex::new(TxnState::Active),
            locks: Arc::clone(&self.locks),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn lock_table(&self) -> Arc<LockTable> {
        Arc::clone(&self.locks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_compatibility() {
        use LockMode::*;
        assert!(IntentShared.is_compatible(IntentShared));
        assert!(IntentShared.is_compatible(Shared));
        assert!(IntentShared.is_compatible(IntentExclusive));
        assert!(!IntentShared.is_compatible(Exclusive));
        assert!(!Shared.is_compatible(Exclusive));
        assert!(!Exclusive.is_compatible(Exclusive));
    }

    #[test]
    fn test_timed_acquisition() -> Result<()> {
        let mgr = TransactionManager::new();
        let a = mgr.begin(1, Category::ReadWrite, IsolationLevel::ReadCommitted);
        let b = mgr.begin(1, Category::ReadWrite, IsolationLevel::ReadCommitted);

        a.lock(
            LockTarget::Database(1),
            LockMode::Exclusive,
            LockDuration::Transaction,
            Duration::from_millis(100),
        )?;

        let err = b
            .lock(
                LockTarget::Database(1),
                LockMode::IntentShared,
                LockDuration::Inside,
                Duration::from_millis(50),
            )
            .unwrap_err();
        assert!(matches!(err, DbError::LockTimeout));

        a.commit()?;
        b.lock(
            LockTarget::Database(1),
            LockMode::IntentShared,
            LockDuration::Inside,
            Duration::from_millis(50),
        )?;
        Ok(())
    }

    #[test]
    fn test_cancel_flag() {
        let mgr = TransactionManager::new();
        let t = mgr.begin(1, Category::ReadOnly, IsolationLevel::ReadCommitted);
        assert!(t.check_canceled().is_ok());
        t.cancel();
        assert!(matches!(t.check_canceled(), Err(DbError::Cancel)));
        t.reset_cancel();
        assert!(t.check_canceled().is_ok());
    }

    #[test]
    fn test_rollback_releases_locks() -> Result<()> {
        let mgr = TransactionManager::new();
        let a = mgr.begin(1, Category::ReadWrite, IsolationLevel::ReadCommitted);
        a.lock(
            LockTarget::Table(1, 2),
            LockMode::Exclusive,
            LockDuration::Transaction,
            Duration::from_millis(50),
        )?;
        assert!(a.holds(LockTarget::Table(1, 2)));
        a.rollback()?;
        assert!(!a.holds(LockTarget::Table(1, 2)));
        Ok(())
    }
}
