// Deferred-update merge scheduling.
//
// Writers enqueue (file, element) entries when a delta area fills; one
// daemon thread per index family drains the queue, applying each delta to
// the main structure under its own short transaction. The queue dedupes:
// re-pushing an entry refreshes its timestamp and re-links it at the tail,
// so a file only merges after its update burst has gone quiet.

pub mod control;

use crate::common::FileIdentity;
use crate::error::{DbError, Result};
use crate::schema::SchemaCache;
use crate::transaction::{
    Category, IsolationLevel, LockDuration, LockMode, LockTarget, TransactionManager,
};
use control::{DaemonCategory, DaemonControl};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub use crate::transaction::LogRecord;

/// A deferred-update file the daemon can merge.
pub trait MergeFile: Send + Sync {
    fn identity(&self) -> FileIdentity;
    /// Open the file for merging; at most one merge open at a time.
    fn open_for_merge(&self, trans: &crate::transaction::Transaction) -> Result<()>;
    /// Apply one delta list to the main structure. True while more lists
    /// remain.
    fn merge_list(&self) -> Result<bool>;
    /// Merge the vector/posting tail after all lists are applied.
    fn merge_vector(&self) -> Result<()>;
    fn close_for_merge(&self);
}

/// One queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MergeEntry {
    pub file: FileIdentity,
    pub element: usize,
}

#[derive(Debug, Default)]
struct ReserveInner {
    list: VecDeque<MergeEntry>,
    touched: HashMap<MergeEntry, Instant>,
}

/// FIFO of merge entries with a dedupe hash and a wake-up event.
pub struct MergeReserve {
    inner: Mutex<ReserveInner>,
    event: Condvar,
    interval: Duration,
}

impl MergeReserve {
    pub fn new(interval: Duration) -> Self {
        Self {
            inner: Mutex::new(ReserveInner::default()),
            event: Condvar::new(),
            interval,
        }
    }

    /// Append an entry. Returns true if it was new; an entry already
    /// present just gets its timestamp refreshed and moves to the tail.
    pub fn push_back(&self, file: FileIdentity, element: usize) -> bool {
        let entry = MergeEntry { file, element };
        let mut inner = self.inner.lock();
        let inserted = if inner.touched.contains_key(&entry) {
            if let Some(pos) = inner.list.iter().position(|e| *e == entry) {
                inner.list.remove(pos);
            }
            inner.list.push_back(entry);
            inner.touched.insert(entry, Instant::now());
            false
        } else {
            inner.touched.insert(entry, Instant::now());
            inner.list.push_back(entry);
            true
        };
        drop(inner);
        self.event.notify_one();
        inserted
    }

    /// Front entry, but only once its quiet interval has elapsed.
    pub fn eligible_front(&self) -> Option<MergeEntry> {
        let inner = self.inner.lock();
        let entry = *inner.list.front()?;
        let touched = *inner.touched.get(&entry)?;
        if touched.elapsed() > self.interval {
            Some(entry)
        } else {
            None
        }
    }

    /// Remove the front entry.
    pub fn pop_front(&self) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.list.pop_front() {
            inner.touched.remove(&entry);
        }
    }

    /// Remove a specific entry wherever it sits.
    pub fn erase(&self, file: FileIdentity, element: usize) {
        let entry = MergeEntry { file, element };
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.list.iter().position(|e| *e == entry) {
            inner.list.remove(pos);
        }
        inner.touched.remove(&entry);
    }

    /// Sleep until something is pushed or the timeout passes.
    pub fn wait(&self, timeout: Duration) {
        let mut inner = self.inner.lock();
        self.event.wait_for(&mut inner, timeout);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, file: FileIdentity, element: usize) -> bool {
        self.inner
            .lock()
            .touched
            .contains_key(&MergeEntry { file, element })
    }

    /// Age of an entry's last touch, for tests and introspection.
    pub fn touched_elapsed(&self, file: FileIdentity, element: usize) -> Option<Duration> {
        self.inner
            .lock()
            .touched
            .get(&MergeEntry { file, element })
            .map(|t| t.elapsed())
    }
}

/// Tuning knobs for one scheduler.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Quiet time an entry must accumulate before it may merge.
    pub interval: Duration,
    /// Condition-variable re-check timeout.
    pub poll: Duration,
    /// Database/table lock deadline; timing out skips the merge.
    pub lock_timeout: Duration,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            poll: Duration::from_millis(500),
            lock_timeout: Duration::from_secs(1),
        }
    }
}

/// Per-index-kind merge daemon: owns the reserve queue and a worker
/// thread.
pub struct MergeScheduler {
    reserve: Arc<MergeReserve>,
    schema: Arc<SchemaCache>,
    transactions: Arc<TransactionManager>,
    daemons: Arc<DaemonControl>,
    config: MergeConfig,
    aborted: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MergeScheduler {
    pub fn new(
        schema: Arc<SchemaCache>,
        transactions: Arc<TransactionManager>,
        daemons: Arc<DaemonControl>,
        config: MergeConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            reserve: Arc::new(MergeReserve::new(config.interval)),
            schema,
            transactions,
            daemons,
            config,
            aborted: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        })
    }

    pub fn reserve(&self) -> Arc<MergeReserve> {
        Arc::clone(&self.reserve)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Start the worker thread. The merge daemon would starve under write
    /// load at normal priority; platforms without a priority API run it
    /// as-is.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *worker = Some(
            std::thread::Builder::new()
                .name("merge-daemon".into())
                .spawn(move || this.run())
                .expect("spawning the merge daemon"),
        );
    }

    /// Request shutdown and join the worker. In-flight entries are not
    /// popped; they are re-discovered on restart.
    pub fn stop(&self) {
        self.aborted.store(true, Ordering::Release);
        self.event_kick();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    fn event_kick(&self) {
        // Waking the queue is enough; the wait loop re-checks the flag.
        self.reserve.event.notify_one();
    }

    fn run(self: Arc<Self>) {
        info!("merge daemon started");
        loop {
            let entry = loop {
                if self.is_aborted() {
                    info!("merge daemon stopping");
                    return;
                }
                if let Some(entry) = self.reserve.eligible_front() {
                    break entry;
                }
                self.reserve.wait(self.config.poll);
            };

            match self.merge_one(entry) {
                Ok(()) => {
                    self.reserve.pop_front();
                }
                Err(DbError::LockTimeout) => {
                    // Skip without popping; retried on the next cycle.
                    info!(file = %entry.file, "merge skipped on lock timeout");
                }
                Err(DbError::Cancel) => {
                    info!("merge daemon canceled");
                    return;
                }
                Err(e) if e.is_vanished_object() => {
                    info!(file = %entry.file, error = %e, "merge target vanished");
                    self.reserve.pop_front();
                }
                Err(e) => {
                    error!(file = %entry.file, error = %e, "merge failed");
                    self.reserve.pop_front();
                }
            }
        }
    }

    /// One merge execution. Errors classify the outcome: LockTimeout
    /// retries later, vanished objects drop the entry, Cancel stops the
    /// daemon.
    fn merge_one(&self, entry: MergeEntry) -> Result<()> {
        // Heavy page traffic ahead: hold both checkpoint daemons off.
        let _sync_off = self.daemons.disable(DaemonCategory::FileSynchronizer);
        let _exec_off = self.daemons.disable(DaemonCategory::Executor);

        let trans = self.transactions.begin(
            entry.file.database_id,
            Category::ReadWrite,
            IsolationLevel::ReadCommitted,
        );

        let database = self
            .schema
            .database(entry.file.database_id)
            .ok_or_else(|| DbError::DatabaseNotFound(format!("ID={}", entry.file.database_id)))?;

        trans.lock(
            LockTarget::Database(entry.file.database_id),
            LockMode::IntentShared,
            LockDuration::Inside,
            self.config.lock_timeout,
        )?;

        if database.is_superuser_mode() {
            info!(file = %entry.file, "database in maintenance mode, merge dropped");
            trans.rollback()?;
            return Ok(());
        }
        if !database.is_available() {
            warn!(file = %entry.file, "database unavailable, merge dropped");
            trans.rollback()?;
            return Ok(());
        }

        // Log first so recovery can replay or ignore the merge as a unit.
        trans.store_log(LogRecord::Merge {
            file: entry.file,
            stamp: chrono::Utc::now(),
        });

        // Batch inserts take the table too; locking it here keeps the two
        // from interleaving.
        trans.lock(
            LockTarget::Table(entry.file.database_id, entry.file.table_id),
            LockMode::IntentShared,
            LockDuration::Inside,
            self.config.lock_timeout,
        )?;

        let table = database
            .table(entry.file.table_id)
            .ok_or_else(|| DbError::TableNotFound(format!("ID={}", entry.file.table_id)))?;
        let file = table
            .merge_file(entry.file.file_id)
            .ok_or_else(|| DbError::FileNotFound(format!("ID={}", entry.file.file_id)))?;

        info!(file = %entry.file, "start index merge");

        file.open_for_merge(&trans)?;
        let merged = (|| -> Result<()> {
            while file.merge_list()? {
                if self.is_aborted() {
                    return Err(DbError::Cancel);
                }
            }
            file.merge_vector()
        })();
        file.close_for_merge();
        merged?;

        trans.commit()?;
        info!(file = %entry.file, "end index merge");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(n: u64) -> FileIdentity {
        FileIdentity::new(1, 2, n)
    }

    #[test]
    fn test_push_dedupes_and_refreshes() {
        let reserve = MergeReserve::new(Duration::from_secs(30));
        assert!(reserve.push_back(file(1), 0));
        std::thread::sleep(Duration::from_millis(20));
        let before = reserve.touched_elapsed(file(1), 0).unwrap();
        assert!(before >= Duration::from_millis(20));

        // Second push: rejected, but timestamp refreshed.
        assert!(!reserve.push_back(file(1), 0));
        assert_eq!(reserve.len(), 1);
        let after = reserve.touched_elapsed(file(1), 0).unwrap();
        assert!(after < before);
    }

    #[test]
    fn test_relink_moves_entry_to_tail() {
        let reserve = MergeReserve::new(Duration::from_millis(0));
        reserve.push_back(file(1), 0);
        reserve.push_back(file(2), 0);
        reserve.push_back(file(1), 0);
        std::thread::sleep(Duration::from_millis(5));
        // file 2 is now the front
        assert_eq!(reserve.eligible_front().unwrap().file, file(2));
        reserve.pop_front();
        assert_eq!(reserve.eligible_front().unwrap().file, file(1));
    }

    #[test]
    fn test_front_waits_out_the_interval() {
        let reserve = MergeReserve::new(Duration::from_secs(3600));
        reserve.push_back(file(1), 0);
        assert!(reserve.eligible_front().is_none());

        let eager = MergeReserve::new(Duration::from_millis(0));
        eager.push_back(file(1), 0);
        std::thread::sleep(Duration::from_millis(5));
        assert!(eager.eligible_front().is_some());
    }

    #[test]
    fn test_erase() {
        let reserve = MergeReserve::new(Duration::from_millis(0));
        reserve.push_back(file(1), 0);
        reserve.push_back(file(1), 1);
        reserve.erase(file(1), 0);
        assert_eq!(reserve.len(), 1);
        assert!(reserve.contains(file(1), 1));
        assert!(!reserve.contains(file(1), 0));
    }
}
