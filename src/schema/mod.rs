// Narrow schema collaborator.
//
// The real catalog lives outside this crate; the core only needs to
// resolve (database, table, file) ids at open time, consult maintenance
// and availability flags, and reach registered driver instances.

use crate::driver::FileDriver;
use crate::error::{DbError, Result};
use crate::merge::MergeFile;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One table: a bag of logical files.
pub struct Table {
    id: u64,
    name: String,
    drivers: RwLock<HashMap<u64, Arc<dyn FileDriver>>>,
    merge_files: RwLock<HashMap<u64, Arc<dyn MergeFile>>>,
}

impl Table {
    pub fn new(id: u64, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.into(),
            drivers: RwLock::new(HashMap::new()),
            merge_files: RwLock::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn register_driver(&self, file_id: u64, driver: Arc<dyn FileDriver>) {
        self.drivers.write().insert(file_id, driver);
    }

    pub fn register_merge_file(&self, file_id: u64, file: Arc<dyn MergeFile>) {
        self.merge_files.write().insert(file_id, file);
    }

    pub fn driver(&self, file_id: u64) -> Option<Arc<dyn FileDriver>> {
        self.drivers.read().get(&file_id).cloned()
    }

    pub fn merge_file(&self, file_id: u64) -> Option<Arc<dyn MergeFile>> {
        self.merge_files.read().get(&file_id).cloned()
    }

    pub fn drop_file(&self, file_id: u64) {
        self.drivers.write().remove(&file_id);
        self.merge_files.write().remove(&file_id);
    }
}

/// One database with its availability and maintenance flags.
pub struct Database {
    id: u64,
    name: String,
    superuser_mode: AtomicBool,
    available: AtomicBool,
    tables: RwLock<HashMap<u64, Arc<Table>>>,
}

impl Database {
    pub fn new(id: u64, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.into(),
            superuser_mode: AtomicBool::new(false),
            available: AtomicBool::new(true),
            tables: RwLock::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exclusive-maintenance mode; background work skips the database.
    pub fn is_superuser_mode(&self) -> bool {
        self.superuser_mode.load(Ordering::Acquire)
    }

    pub fn set_superuser_mode(&self, on: bool) {
        self.superuser_mode.store(on, Ordering::Release);
    }

    /// Cleared by corrupting errors; opens fail fast until an
    /// administrator intervenes.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn set_available(&self, on: bool) {
        self.available.store(on, Ordering::Release);
    }

    pub fn add_table(&self, table: Arc<Table>) {
        self.tables.write().insert(table.id(), table);
    }

    pub fn table(&self, table_id: u64) -> Option<Arc<Table>> {
        self.tables.read().get(&table_id).cloned()
    }

    pub fn drop_table(&self, table_id: u64) {
        self.tables.write().remove(&table_id);
    }
}

/// Process-wide id → database map.
#[derive(Default)]
pub struct SchemaCache {
    databases: RwLock<HashMap<u64, Arc<Database>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_database(&self, database: Arc<Database>) {
        self.databases.write().insert(database.id(), database);
    }

    pub fn database(&self, id: u64) -> Option<Arc<Database>> {
        self.databases.read().get(&id).cloned()
    }

    pub fn drop_database(&self, id: u64) {
        self.databases.write().remove(&id);
    }

    /// Open-time gate: resolve and verify availability.
    pub fn checked_database(&self, id: u64) -> Result<Arc<Database>> {
        let db = self
            .database(id)
            .ok_or_else(|| DbError::DatabaseNotFound(format!("ID={}", id)))?;
        if !db.is_available() {
            return Err(DbError::Unavailable(db.name().to_string()));
        }
        Ok(db)
    }

    /// Mark a database unavailable after a corrupting error.
    pub fn quarantine(&self, id: u64) {
        if let Some(db) = self.database(id) {
            db.set_available(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_flags() {
        let cache = SchemaCache::new();
        let db = Database::new(7, "main");
        db.add_table(Table::new(1, "t"));
        cache.add_database(db);

        let db = cache.checked_database(7).unwrap();
        assert_eq!(db.table(1).unwrap().name(), "t");
        assert!(db.table(2).is_none());

        cache.quarantine(7);
        assert!(matches!(
            cache.checked_database(7),
            Err(DbError::Unavailable(_))
        ));
    }
}
