// Sessions, instance managers and workers.
//
// A session is one client authentication boundary: it owns a transaction,
// a prepared-statement cache and at most one crypto key. An
// InstanceManager owns the sessions of one client connection and tracks
// the workers running on its behalf. A worker serves one request at a
// time; a second statement entering a busy session is refused with
// SessionBusy.

pub mod protocol;

use crate::error::{DbError, Result};
use crate::execution::{IteratorId, Program};
use crate::transaction::{Category, IsolationLevel, Transaction, TransactionManager};
use dashmap::DashMap;
use parking_lot::Mutex;
use protocol::{Request, Response};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub type SessionId = u64;
pub type WorkerId = u64;

pub const PRODUCT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One client session.
pub struct Session {
    id: SessionId,
    tag: Uuid,
    database: String,
    user: String,
    busy: Mutex<bool>,
    crypto_key: Mutex<Option<Vec<u8>>>,
    prepared: Mutex<HashMap<i32, String>>,
    next_prepare_id: Mutex<i32>,
    transaction: Mutex<Option<Arc<Transaction>>>,
    variables: Mutex<HashMap<String, crate::common::Value>>,
    explaining: Mutex<bool>,
}

impl Session {
    fn new(id: SessionId, database: String, user: String) -> Arc<Self> {
        Arc::new(Self {
            id,
            tag: Uuid::new_v4(),
            database,
            user,
            busy: Mutex::new(false),
            crypto_key: Mutex::new(None),
            prepared: Mutex::new(HashMap::new()),
            next_prepare_id: Mutex::new(1),
            transaction: Mutex::new(None),
            variables: Mutex::new(HashMap::new()),
            explaining: Mutex::new(false),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn tag(&self) -> Uuid {
        self.tag
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Set the shared key negotiated at handshake. Allowed once.
    pub fn set_crypto_key(&self, key: Vec<u8>) -> Result<()> {
        let mut slot = self.crypto_key.lock();
        if slot.is_some() {
            return Err(DbError::BadArgument(
                "session key is already set".into(),
            ));
        }
        *slot = Some(key);
        Ok(())
    }

    pub fn has_crypto_key(&self) -> bool {
        self.crypto_key.lock().is_some()
    }

    pub fn push_prepared(&self, statement: String) -> i32 {
        let mut next = self.next_prepare_id.lock();
        let id = *next;
        *next += 1;
        self.prepared.lock().insert(id, statement);
        id
    }

    pub fn prepared(&self, id: i32) -> Option<String> {
        self.prepared.lock().get(&id).cloned()
    }

    pub fn erase_prepared(&self, id: i32) -> bool {
        self.prepared.lock().remove(&id).is_some()
    }

    pub fn declare_variable(&self, name: String) {
        self.variables
            .lock()
            .entry(name)
            .or_insert(crate::common::Value::Null);
    }

    pub fn variable(&self, name: &str) -> Option<crate::common::Value> {
        self.variables.lock().get(name).cloned()
    }

    pub fn set_variable(&self, name: &str, value: crate::common::Value) -> Result<()> {
        let mut variables = self.variables.lock();
        match variables.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(DbError::BadArgument(format!(
                "variable {} is not declared",
                name
            ))),
        }
    }

    pub fn set_explaining(&self, on: bool) {
        *self.explaining.lock() = on;
    }

    pub fn is_explaining(&self) -> bool {
        *self.explaining.lock()
    }

    pub fn set_transaction(&self, trans: Arc<Transaction>) {
        *self.transaction.lock() = Some(trans);
    }

    pub fn transaction(&self) -> Option<Arc<Transaction>> {
        self.transaction.lock().clone()
    }

    /// Cancel the statement currently running on this session.
    pub fn cancel_statement(&self) {
        if let Some(trans) = self.transaction() {
            trans.cancel();
        }
    }

    fn try_acquire(&self) -> Result<()> {
        let mut busy = self.busy.lock();
        if *busy {
            return Err(DbError::SessionBusy);
        }
        *busy = true;
        Ok(())
    }

    fn release(&self) {
        *self.busy.lock() = false;
    }
}

/// Owns the sessions of one client and tracks its running workers.
pub struct InstanceManager {
    client_id: u64,
    next_session: AtomicU64,
    inner: Mutex<ManagerInner>,
}

#[derive(Default)]
struct ManagerInner {
    sessions: HashMap<SessionId, Arc<Session>>,
    workers: HashMap<WorkerId, Arc<AtomicBool>>,
}

impl InstanceManager {
    pub fn new(client_id: u64) -> Arc<Self> {
        Arc::new(Self {
            client_id,
            next_session: AtomicU64::new(1),
            inner: Mutex::new(ManagerInner::default()),
        })
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    pub fn begin_session(&self, database: String, user: String) -> Arc<Session> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let session = Session::new(id, database, user);
        self.inner.lock().sessions.insert(id, Arc::clone(&session));
        info!(session = id, user = %session.user, "session started");
        session
    }

    pub fn session(&self, id: SessionId) -> Result<Arc<Session>> {
        self.inner
            .lock()
            .sessions
            .get(&id)
            .cloned()
            .ok_or(DbError::SessionNotExist(id))
    }

    /// Claim a session for one statement; a concurrent statement is
    /// refused with SessionBusy.
    pub fn lock_session(&self, id: SessionId) -> Result<Arc<Session>> {
        let session = self.session(id)?;
        session.try_acquire()?;
        Ok(session)
    }

    pub fn unlock_session(&self, session: &Session) {
        session.release();
    }

    pub fn end_session(&self, id: SessionId) -> Result<()> {
        let session = self
            .inner
            .lock()
            .sessions
            .remove(&id)
            .ok_or(DbError::SessionNotExist(id))?;
        if let Some(trans) = session.transaction() {
            if trans.is_active() {
                let _ = trans.rollback();
            }
        }
        info!(session = id, "session ended");
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    fn register_worker(&self, id: WorkerId, cancel: Arc<AtomicBool>) {
        self.inner.lock().workers.insert(id, cancel);
    }

    fn report_end_worker(&self, id: WorkerId) {
        self.inner.lock().workers.remove(&id);
    }

    /// Ask a running worker to stop cooperatively.
    pub fn cancel_worker(&self, id: WorkerId) {
        if let Some(flag) = self.inner.lock().workers.get(&id) {
            flag.store(true, Ordering::Release);
        }
    }

    /// Abort every session of this client (disconnect path).
    pub fn terminate_sessions(&self) {
        let sessions: Vec<Arc<Session>> =
            self.inner.lock().sessions.values().cloned().collect();
        for session in sessions {
            session.cancel_statement();
        }
    }
}

/// Process-wide client-id → instance-manager table.
#[derive(Default)]
pub struct InstanceManagerTable {
    map: DashMap<u64, Arc<InstanceManager>>,
    next_client: AtomicU64,
}

impl InstanceManagerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self) -> Arc<InstanceManager> {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed) + 1;
        let manager = InstanceManager::new(id);
        self.map.insert(id, Arc::clone(&manager));
        manager
    }

    pub fn get(&self, client_id: u64) -> Result<Arc<InstanceManager>> {
        self.map
            .get(&client_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(DbError::ConnectionNotExist(client_id))
    }

    pub fn detach(&self, client_id: u64) -> Result<()> {
        let (_, manager) = self
            .map
            .remove(&client_id)
            .ok_or(DbError::ConnectionNotExist(client_id))?;
        manager.terminate_sessions();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

static NEXT_WORKER: AtomicU64 = AtomicU64::new(1);

/// Serves one client request at a time on behalf of a session.
pub struct Worker {
    id: WorkerId,
    manager: Arc<InstanceManager>,
    transactions: Arc<TransactionManager>,
    schema: Option<Arc<crate::schema::SchemaCache>>,
    cancel: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(manager: Arc<InstanceManager>, transactions: Arc<TransactionManager>) -> Self {
        let id = NEXT_WORKER.fetch_add(1, Ordering::Relaxed);
        let cancel = Arc::new(AtomicBool::new(false));
        manager.register_worker(id, Arc::clone(&cancel));
        Self {
            id,
            manager,
            transactions,
            schema: None,
            cancel,
        }
    }

    /// Attach the schema cache so corrupting errors can quarantine their
    /// database.
    pub fn with_schema(mut self, schema: Arc<crate::schema::SchemaCache>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Run one program on a session, translating errors to a wire
    /// response. finish/terminate run in LIFO order for every initialized
    /// iterator even on failure.
    pub fn run_program(
        &self,
        session_id: SessionId,
        program: &Program,
        root: IteratorId,
    ) -> Response {
        let session = match self.manager.lock_session(session_id) {
            Ok(s) => s,
            Err(e) => return Response::error(&e),
        };

        let trans = match session.transaction() {
            Some(t) => t,
            None => {
                let t = self.transactions.begin(
                    program.database_id().unwrap_or(0),
                    Category::ReadWrite,
                    IsolationLevel::ReadCommitted,
                );
                session.set_transaction(Arc::clone(&t));
                t
            }
        };
        trans.reset_cancel();
        if self.cancel.load(Ordering::Acquire) {
            trans.cancel();
        }
        program.set_transaction(trans);

        let outcome = program.execute_iterator(root);
        self.manager.unlock_session(&session);

        match outcome {
            Ok(()) => Response::success(Vec::new()),
            Err(DbError::Cancel) => {
                debug!(worker = self.id, "statement canceled");
                Response::canceled()
            }
            Err(e) => {
                // A broken invariant poisons the database until an
                // administrator steps in; later opens fail fast.
                if e.is_corrupting() {
                    if let (Some(schema), Some(db)) = (&self.schema, program.database_id()) {
                        schema.quarantine(db);
                    }
                }
                Response::error(&e)
            }
        }
    }

    /// Dispatch one lifecycle request. Statement execution arrives through
    /// `run_program`; catalog-changing kinds are served by layers above
    /// this crate.
    pub fn dispatch(&self, request: Request) -> Response {
        match request {
            Request::BeginSession { database, user } => {
                let session = self.manager.begin_session(database, user);
                Response::success(vec![vec![crate::common::Value::Unsigned(
                    session.id() as u32,
                )]])
            }
            Request::EndSession { session } => match self.manager.end_session(session) {
                Ok(()) => Response::success(Vec::new()),
                Err(e) => Response::error(&e),
            },
            Request::PrepareStatement { session, statement } => {
                match self.manager.session(session) {
                    Ok(s) => {
                        let id = s.push_prepared(statement);
                        Response::success(vec![vec![crate::common::Value::Integer(id)]])
                    }
                    Err(e) => Response::error(&e),
                }
            }
            Request::ErasePrepareStatement {
                session,
                prepare_id,
            } => match self.manager.session(session) {
                Ok(s) => {
                    if s.erase_prepared(prepare_id) {
                        Response::success(Vec::new())
                    } else {
                        Response::error(&DbError::BadArgument(format!(
                            "no prepared statement {}",
                            prepare_id
                        )))
                    }
                }
                Err(e) => Response::error(&e),
            },
            Request::DeclareVariable { session, name } => {
                match self.manager.session(session) {
                    Ok(s) => {
                        s.declare_variable(name);
                        Response::success(Vec::new())
                    }
                    Err(e) => Response::error(&e),
                }
            }
            Request::StartExplain { session } => match self.manager.session(session) {
                Ok(s) => {
                    s.set_explaining(true);
                    Response::success(Vec::new())
                }
                Err(e) => Response::error(&e),
            },
            Request::EndExplain { session } => match self.manager.session(session) {
                Ok(s) => {
                    s.set_explaining(false);
                    Response::success(Vec::new())
                }
                Err(e) => Response::error(&e),
            },
            Request::Sync | Request::Checkpoint => Response::success(Vec::new()),
            Request::Disconnect => {
                self.manager.terminate_sessions();
                Response::success(Vec::new())
            }
            Request::QueryProductVersion => Response::success(vec![vec![
                crate::common::Value::String(PRODUCT_VERSION.to_string()),
            ]]),
            other => Response::error(&DbError::NotSupported(format!("{:?}", other))),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.manager.report_end_worker(self.id);
    }
}
