// FileAccess: a driver handle bound into a program, with its open option,
// an optional locker, and an optional row-id filter injected before open.

use crate::common::bitset::BitSet;
use crate::common::{FileIdentity, OwnerToken, PageId, RowId, Tuple, Value};
use crate::driver::FileDriver;
use crate::error::{DbError, Result};
use crate::execution::program::Program;
use crate::lockmap::PageLockRegistry;
use crate::param::open_option::OpenOption;
use crate::execution::LockerId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(0x4000_0000);

/// Registers the pages a scan touches in the shared page-lock registry so
/// background work can steer around them. Lock granularity follows the
/// open option: with CacheAllObject the whole result is materialized at
/// open and row locks are pointless; with GetByBitSet the result shape is
/// a bitset and only its delivery page matters.
pub struct Locker {
    registry: Arc<PageLockRegistry>,
    file: FileIdentity,
    owner: OwnerToken,
    rows_per_page: usize,
    pages: Vec<PageId>,
}

impl Locker {
    pub fn new(registry: Arc<PageLockRegistry>, file: FileIdentity, rows_per_page: usize) -> Self {
        Self {
            registry,
            file,
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
            rows_per_page: rows_per_page.max(1),
            pages: Vec::new(),
        }
    }

    pub fn owner(&self) -> OwnerToken {
        self.owner
    }

    fn page_of(&self, row: RowId) -> PageId {
        (row as usize / self.rows_per_page) as PageId
    }

    /// Register the page holding a row; idempotent per page.
    pub fn lock_row(&mut self, row: RowId) {
        let page = self.page_of(row);
        if !self.pages.contains(&page) {
            self.registry.insert(self.file, page, self.owner);
            self.pages.push(page);
        }
    }

    pub fn unlock_all(&mut self) {
        for page in self.pages.drain(..) {
            self.registry.erase(self.file, page, self.owner);
        }
    }

    pub fn held_pages(&self) -> &[PageId] {
        &self.pages
    }
}

impl Drop for Locker {
    fn drop(&mut self) {
        self.unlock_all();
    }
}

/// A driver handle plus everything needed to open it. At most one open at
/// a time; row-id filters must be injected before `open`.
pub struct FileAccess {
    driver: Arc<dyn FileDriver>,
    open_option: OpenOption,
    locker: Option<LockerId>,
    filter: Option<BitSet>,
    opened: bool,
}

impl FileAccess {
    pub fn new(driver: Arc<dyn FileDriver>, open_option: OpenOption) -> Self {
        Self {
            driver,
            open_option,
            locker: None,
            filter: None,
            opened: false,
        }
    }

    pub fn open_option(&self) -> &OpenOption {
        &self.open_option
    }

    pub fn driver(&self) -> &Arc<dyn FileDriver> {
        &self.driver
    }

    pub fn set_locker(&mut self, locker: LockerId) {
        self.locker = Some(locker);
    }

    /// Restrict the scan to the given row ids. Only valid before open.
    pub fn set_bitset_filter(&mut self, filter: BitSet) -> Result<()> {
        if self.opened {
            return Err(DbError::IllegalMode(
                "bitset filter after open".into(),
            ));
        }
        self.filter = Some(filter);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn open(&mut self, program: &Program) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        let trans = program
            .transaction()
            .ok_or_else(|| DbError::BadArgument("file access without a transaction".into()))?;
        self.driver.open(&trans, &self.open_option)?;
        self.opened = true;
        Ok(())
    }

    pub fn close(&mut self, program: &Program) {
        if self.opened {
            self.driver.close();
            self.opened = false;
            if let Some(locker) = self.locker {
                if let Ok(slot) = program.locker(locker) {
                    slot.lock().unlock_all();
                }
            }
        }
    }

    /// Next tuple through the filter, registering row locks as rows
    /// surface.
    pub fn get_data(&mut self, program: &Program, tuple: &mut Tuple) -> Result<bool> {
        if !self.opened {
            return Err(DbError::IllegalMode("get before open".into()));
        }
        loop {
            program.check_canceled()?;
            if !self.driver.get(tuple)? {
                return Ok(false);
            }
            let row_id = match tuple.first() {
                Some(Value::Unsigned(id)) => Some(*id),
                _ => None,
            };
            if let (Some(filter), Some(id)) = (&self.filter, row_id) {
                if !filter.test(id) {
                    continue;
                }
            }
            if let (Some(locker), Some(id)) = (self.locker, row_id) {
                program.locker(locker)?.lock().lock_row(id);
            }
            return Ok(true);
        }
    }

    pub fn insert(&mut self, tuple: &mut Tuple) -> Result<()> {
        self.driver.insert(tuple)
    }

    pub fn update(&mut self, key: &Tuple, tuple: &mut Tuple) -> Result<()> {
        self.driver.update(key, tuple)
    }

    pub fn expunge(&mut self, key: &Tuple) -> Result<()> {
        self.driver.expunge(key)
    }

    pub fn fetch(&mut self, key: &Tuple) -> Result<()> {
        self.driver.fetch(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DataType;
    use crate::driver::btree::BtreeFile;
    use crate::param::file_id::FileId;
    use crate::param::open_option::OpenMode;
    use crate::transaction::{Category, IsolationLevel, TransactionManager};

    fn sample_driver(registry: Arc<PageLockRegistry>) -> Arc<BtreeFile> {
        let id = FileId::new();
        id.set_identity(FileIdentity::new(1, 1, 1));
        id.set_field_number(3);
        id.set_key_field_number(1);
        id.set_field_type(0, DataType::Unsigned);
        id.set_field_type(1, DataType::Integer);
        id.set_field_type(2, DataType::String);
        id.set_field_length(2, 32);
        Arc::new(BtreeFile::new(id, registry).unwrap())
    }

    #[test]
    fn test_bitset_pushdown_filters_rows() -> Result<()> {
        let registry = Arc::new(PageLockRegistry::new());
        let driver = sample_driver(Arc::clone(&registry));
        let mgr = TransactionManager::new();
        let trans = mgr.begin(1, Category::ReadWrite, IsolationLevel::ReadCommitted);
        driver.create(&trans)?;

        let opt = OpenOption::new();
        opt.set_open_mode(OpenMode::Update);
        driver.open(&trans, &opt)?;
        for i in 0..4 {
            let mut t = vec![
                Value::Null,
                Value::Integer(i),
                Value::String(format!("r{}", i)),
            ];
            driver.insert(&mut t)?;
        }
        driver.close();

        let program = Program::new();
        program.set_transaction(trans);

        let opt = OpenOption::new();
        driver.get_search_parameter(None, &opt)?;
        let mut access = FileAccess::new(driver, opt);
        let mut filter = BitSet::new();
        filter.set(1);
        filter.set(3);
        access.set_bitset_filter(filter)?;

        access.open(&program)?;
        let mut t = Tuple::new();
        let mut rows = Vec::new();
        while access.get_data(&program, &mut t)? {
            rows.push(t[0].clone());
        }
        access.close(&program);
        assert_eq!(rows, vec![Value::Unsigned(1), Value::Unsigned(3)]);
        Ok(())
    }

    #[test]
    fn test_locker_registers_pages() -> Result<()> {
        let registry = Arc::new(PageLockRegistry::new());
        let file = FileIdentity::new(9, 9, 9);
        let mut locker = Locker::new(Arc::clone(&registry), file, 10);
        locker.lock_row(5);
        locker.lock_row(7);
        locker.lock_row(25);
        assert_eq!(locker.held_pages(), &[0, 2]);
        assert!(registry.is_page_held(file, 0));
        locker.unlock_all();
        assert!(!registry.is_page_held(file, 0));
        Ok(())
    }
}
