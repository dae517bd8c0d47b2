// Logical-file drivers.
//
// Every index kind is presented through one trait: create/destroy,
// mount/unmount, open/close, tuple manipulation, fetch, verification,
// backup, move, sync, locators. The open-option compiler translates
// predicate trees into the typed open options the drivers consume.

pub mod btree;
pub mod compiler;
pub mod file_param;
pub mod inverted;
pub mod treenode;

use crate::common::{RowId, Tuple};
use crate::error::{DbError, Result};
use crate::param::file_id::FileId;
use crate::param::open_option::OpenOption;
use crate::transaction::Transaction;
use self::treenode::TreeNode;

/// Bit masks for operations that require the file latch.
pub mod operation {
    pub type Value = u32;

    pub const NONE: Value = 0;
    pub const OPEN: Value = 1;
    pub const CLOSE: Value = OPEN << 1;
    pub const RESET: Value = CLOSE << 1;
    pub const GET_PROCESS_COST: Value = RESET << 1;
    pub const GET_OVERHEAD: Value = GET_PROCESS_COST << 1;
    pub const FETCH: Value = GET_OVERHEAD << 1;
    pub const GET_DATA: Value = FETCH << 1;
    pub const UPDATE: Value = GET_DATA << 1;
}

/// Bit masks for optional driver capabilities.
pub mod capability {
    pub type Value = u32;

    pub const NONE: Value = 0;
    /// Driver can undo expunge/update itself.
    pub const UNDO: Value = 1;
    /// Driver can estimate a result count from a condition.
    pub const ESTIMATE_COUNT: Value = 1 << 1;
}

/// How thorough a verification pass should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyTreatment {
    ReadOnly,
    Correct,
}

/// Accumulated verification outcome.
#[derive(Debug, Default)]
pub struct VerifyProgress {
    pub examined: u64,
    pub corrected: u64,
    pub messages: Vec<String>,
}

impl VerifyProgress {
    pub fn is_good(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn note(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }
}

/// A driver-provided handle to one row's binary payload, supporting
/// partial read and partial overwrite.
pub trait Locator: Send {
    fn length(&self) -> Result<usize>;
    fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>>;
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()>;
    fn append(&mut self, data: &[u8]) -> Result<()>;
    fn truncate(&mut self, len: usize) -> Result<()>;
}

/// The polymorphic base of every index kind.
///
/// After a successful `open` one of three modes is active (Read, Search or
/// Update, as recorded in the open option). A driver signals
/// failed-to-narrow by returning false from `get_search_parameter`, never
/// by erroring once scanning has begun.
pub trait FileDriver: Send + Sync {
    /// Whether the backing store exists.
    fn is_accessible(&self) -> bool;
    /// Whether the file is mounted.
    fn is_mounted(&self, trans: &Transaction) -> bool;

    fn file_id(&self) -> &FileId;
    fn get_size(&self, trans: &Transaction) -> Result<u64>;
    fn get_count(&self) -> Result<i64>;

    /// Cost of opening the file, in arbitrary cost units.
    fn get_overhead(&self) -> f64;
    /// Cost of moving one tuple in or out.
    fn get_process_cost(&self) -> f64;

    /// Decide whether a predicate maps onto indexed access, filling the
    /// open option on success. Returning true with SearchFieldNumber = 0
    /// means the predicate is known unsatisfiable and open+get must yield
    /// zero rows without error.
    fn get_search_parameter(&self, condition: Option<&TreeNode>, opt: &OpenOption)
        -> Result<bool>;
    fn get_projection_parameter(&self, fields: &[i32], opt: &OpenOption) -> Result<bool>;
    fn get_update_parameter(&self, fields: &[i32], opt: &OpenOption) -> Result<bool>;
    fn get_sort_parameter(&self, keys: &[i32], orders: &[i32], opt: &OpenOption) -> Result<bool>;
    /// Record a limit/offset hint; drivers that cannot push it down say so.
    fn get_limit_parameter(&self, _spec: &[i32], _opt: &OpenOption) -> Result<bool> {
        Ok(false)
    }

    fn create(&self, trans: &Transaction) -> Result<FileId>;
    fn destroy(&self, trans: &Transaction) -> Result<()>;
    fn mount(&self, trans: &Transaction) -> Result<FileId>;
    fn unmount(&self, trans: &Transaction) -> Result<FileId>;
    fn flush(&self, trans: &Transaction) -> Result<()>;

    fn start_backup(&self, trans: &Transaction, restorable: bool) -> Result<()>;
    fn end_backup(&self, trans: &Transaction) -> Result<()>;
    fn recover(&self, trans: &Transaction, point: u64) -> Result<()>;
    fn restore(&self, trans: &Transaction, point: u64) -> Result<()>;

    fn verify(
        &self,
        trans: &Transaction,
        treatment: VerifyTreatment,
        progress: &mut VerifyProgress,
    ) -> Result<()>;

    fn open(&self, trans: &Transaction, opt: &OpenOption) -> Result<()>;
    fn close(&self);

    /// Produce the next tuple into `tuple`; false at end of data.
    fn get(&self, tuple: &mut Tuple) -> Result<bool>;
    fn insert(&self, tuple: &mut Tuple) -> Result<()>;
    fn update(&self, key: &Tuple, tuple: &mut Tuple) -> Result<()>;
    fn expunge(&self, key: &Tuple) -> Result<()>;
    /// Set the key for subsequent fetch-mode gets.
    fn fetch(&self, option: &Tuple) -> Result<()>;

    /// Remember the cursor position.
    fn mark(&self) -> Result<()>;
    /// Return to the remembered position.
    fn rewind(&self) -> Result<()>;
    /// Reset the cursor to the start of the scan.
    fn reset(&self) -> Result<()>;

    fn sync(&self, trans: &Transaction, incomplete: &mut bool, modified: &mut bool)
        -> Result<()>;
    fn move_file(&self, trans: &Transaction, areas: &[String]) -> Result<()>;

    fn get_property(&self, _keys: &mut Tuple, _values: &mut Tuple) -> Result<()> {
        Ok(())
    }

    fn get_locator(&self, _key: &Tuple) -> Result<Option<Box<dyn Locator>>> {
        Ok(None)
    }

    fn undo_update(&self, _key: &Tuple) -> Result<()> {
        Err(DbError::NotSupported("undoUpdate".into()))
    }

    fn undo_expunge(&self, _key: &Tuple) -> Result<()> {
        Err(DbError::NotSupported("undoExpunge".into()))
    }

    fn compact(
        &self,
        _trans: &Transaction,
        _incomplete: &mut bool,
        _modified: &mut bool,
    ) -> Result<()> {
        Ok(())
    }

    /// Operations this driver can execute without the file latch.
    fn no_latch_operations(&self) -> operation::Value {
        operation::GET_PROCESS_COST | operation::GET_OVERHEAD | operation::FETCH
    }

    /// Optional capabilities.
    fn capabilities(&self) -> capability::Value {
        capability::NONE
    }
}

/// Helper shared by drivers: extract the `(row_id)` key used by expunge and
/// update paths.
pub fn row_id_of(key: &Tuple) -> Result<RowId> {
    match key.first() {
        Some(crate::common::Value::Unsigned(id)) => Ok(*id),
        other => Err(DbError::BadArgument(format!(
            "expected a row-id key, got {:?}",
            other
        ))),
    }
}
