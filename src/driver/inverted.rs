// Delayed-merge inverted driver.
//
// Updates land in a delta area instead of the main posting structure; a
// filled delta is sealed and the file enqueues itself on the merge
// reserve. The daemon later applies sealed deltas (`merge_list`) and folds
// the row vector tail (`merge_vector`) under its own transaction. Readers
// see main plus every delta, merged or not.

use crate::common::bitset::BitSet;
use crate::common::{FileIdentity, RowId, Tuple, Value};
use crate::driver::compiler::OpenOptionCompiler;
use crate::driver::file_param::FileParameter;
use crate::driver::treenode::TreeNode;
use crate::driver::{capability, row_id_of, FileDriver, VerifyProgress, VerifyTreatment};
use crate::error::{DbError, Result};
use crate::merge::{MergeFile, MergeReserve};
use crate::param::file_id::FileId;
use crate::param::open_option::{OpenMode, OpenOption, ReadSubMode};
use crate::transaction::Transaction;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// One buffered batch of postings updates.
#[derive(Debug, Default, Clone)]
struct Delta {
    inserts: Vec<(String, RowId)>,
    expunges: Vec<(String, RowId)>,
}

impl Delta {
    fn len(&self) -> usize {
        self.inserts.len() + self.expunges.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct InvStore {
    created: bool,
    mounted: bool,
    /// Merged row vector.
    rows: BTreeMap<RowId, Tuple>,
    /// Rows inserted since the last vector merge.
    vector_tail: BTreeMap<RowId, Tuple>,
    next_row_id: RowId,
    /// Merged postings.
    main: BTreeMap<String, BitSet>,
    /// Sealed deltas awaiting the daemon.
    sealed: VecDeque<Delta>,
    /// Open delta receiving current updates.
    current: Delta,
    merge_open: bool,
}

impl InvStore {
    fn posting(&self, term: &str) -> BitSet {
        let mut set = self.main.get(term).cloned().unwrap_or_default();
        for delta in self.sealed.iter().chain(std::iter::once(&self.current)) {
            for (t, id) in &delta.inserts {
                if t == term {
                    set.set(*id);
                }
            }
            for (t, id) in &delta.expunges {
                if t == term {
                    set.reset(*id);
                }
            }
        }
        set
    }

    fn row(&self, id: RowId) -> Option<&Tuple> {
        self.rows.get(&id).or_else(|| self.vector_tail.get(&id))
    }

    fn apply(main: &mut BTreeMap<String, BitSet>, delta: &Delta) {
        for (term, id) in &delta.inserts {
            main.entry(term.clone()).or_default().set(*id);
        }
        for (term, id) in &delta.expunges {
            if let Some(set) = main.get_mut(term) {
                set.reset(*id);
                if set.is_empty() {
                    main.remove(term);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Closed,
    Read,
    Search,
    Update,
}

#[derive(Debug)]
struct Cursor {
    mode: Mode,
    selected: Vec<RowId>,
    position: usize,
    by_bitset: bool,
    bitset_delivered: bool,
    term: Option<String>,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            mode: Mode::Closed,
            selected: Vec::new(),
            position: 0,
            by_bitset: false,
            bitset_delivered: false,
            term: None,
        }
    }
}

/// Inverted index file with deferred updates. Field 1 is the indexed text
/// key; further fields are stored values.
pub struct InvertedFile {
    file_id: FileId,
    param: FileParameter,
    reserve: Option<Arc<MergeReserve>>,
    store: RwLock<InvStore>,
    cursor: Mutex<Cursor>,
}

impl InvertedFile {
    pub fn new(file_id: FileId, reserve: Option<Arc<MergeReserve>>) -> Result<Self> {
        let param = FileParameter::from_file_id(&file_id)?;
        if param.field_types[1] != crate::common::DataType::String {
            return Err(DbError::BadArgument(
                "an inverted file indexes a string key field".into(),
            ));
        }
        Ok(Self {
            file_id,
            param,
            reserve,
            store: RwLock::new(InvStore::default()),
            cursor: Mutex::new(Cursor::default()),
        })
    }

    pub fn parameter(&self) -> &FileParameter {
        &self.param
    }

    pub fn identity(&self) -> FileIdentity {
        self.param.identity
    }

    /// Sealed deltas not yet merged; introspection for tests and stats.
    pub fn pending_deltas(&self) -> usize {
        self.store.read().sealed.len()
    }

    fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split_whitespace().map(|t| t.to_lowercase())
    }

    /// Seal the open delta once it crosses the threshold and book a merge.
    fn maybe_seal(&self, store: &mut InvStore) {
        if store.current.len() >= self.param.merge_threshold {
            let sealed = std::mem::take(&mut store.current);
            store.sealed.push_back(sealed);
            if let Some(reserve) = &self.reserve {
                reserve.push_back(self.param.identity, 0);
            }
            debug!(identity = %self.param.identity, pending = store.sealed.len(), "delta sealed");
        }
    }
}

impl FileDriver for InvertedFile {
    fn is_accessible(&self) -> bool {
        self.store.read().created
    }

    fn is_mounted(&self, _trans: &Transaction) -> bool {
        self.store.read().mounted
    }

    fn file_id(&self) -> &FileId {
        &self.file_id
    }

    fn get_size(&self, _trans: &Transaction) -> Result<u64> {
        let store = self.store.read();
        Ok(((store.rows.len() + store.vector_tail.len()) * self.param.page_size / 16) as u64)
    }

    fn get_count(&self) -> Result<i64> {
        let store = self.store.read();
        Ok((store.rows.len() + store.vector_tail.len()) as i64)
    }

    fn get_overhead(&self) -> f64 {
        2.0
    }

    fn get_process_cost(&self) -> f64 {
        // Delta lookups make reads costlier than a plain ordered file.
        1.0 + self.store.read().sealed.len() as f64 * 0.1
    }

    fn get_search_parameter(
        &self,
        condition: Option<&TreeNode>,
        opt: &OpenOption,
    ) -> Result<bool> {
        OpenOptionCompiler::new(&self.param).compile_search(condition, opt)
    }

    fn get_projection_parameter(&self, fields: &[i32], opt: &OpenOption) -> Result<bool> {
        OpenOptionCompiler::new(&self.param).compile_target(fields, opt, OpenMode::Read)
    }

    fn get_update_parameter(&self, fields: &[i32], opt: &OpenOption) -> Result<bool> {
        OpenOptionCompiler::new(&self.param).compile_target(fields, opt, OpenMode::Update)
    }

    fn get_sort_parameter(&self, _keys: &[i32], _orders: &[i32], _opt: &OpenOption) -> Result<bool> {
        // Postings come back in row-id order only.
        Ok(false)
    }

    fn create(&self, _trans: &Transaction) -> Result<FileId> {
        let mut store = self.store.write();
        store.created = true;
        store.mounted = true;
        self.file_id.set_mounted(true);
        Ok(self.file_id.clone())
    }

    fn destroy(&self, _trans: &Transaction) -> Result<()> {
        let mut store = self.store.write();
        *store = InvStore::default();
        Ok(())
    }

    fn mount(&self, _trans: &Transaction) -> Result<FileId> {
        self.store.write().mounted = true;
        self.file_id.set_mounted(true);
        Ok(self.file_id.clone())
    }

    fn unmount(&self, _trans: &Transaction) -> Result<FileId> {
        self.store.write().mounted = false;
        self.file_id.set_mounted(false);
        Ok(self.file_id.clone())
    }

    fn flush(&self, _trans: &Transaction) -> Result<()> {
        Ok(())
    }

    fn start_backup(&self, _trans: &Transaction, _restorable: bool) -> Result<()> {
        Ok(())
    }

    fn end_backup(&self, _trans: &Transaction) -> Result<()> {
        Ok(())
    }

    fn recover(&self, _trans: &Transaction, _point: u64) -> Result<()> {
        Ok(())
    }

    fn restore(&self, _trans: &Transaction, _point: u64) -> Result<()> {
        Ok(())
    }

    fn verify(
        &self,
        _trans: &Transaction,
        _treatment: VerifyTreatment,
        progress: &mut VerifyProgress,
    ) -> Result<()> {
        let store = self.store.read();
        for (term, set) in store.main.iter() {
            progress.examined += 1;
            for id in set.iter() {
                if store.row(id).is_none() {
                    progress.note(format!("posting '{}' references missing row {}", term, id));
                }
            }
        }
        Ok(())
    }

    fn open(&self, trans: &Transaction, opt: &OpenOption) -> Result<()> {
        trans.check_canceled()?;
        let mut cursor = self.cursor.lock();
        if cursor.mode != Mode::Closed {
            return Err(DbError::IllegalMode("already open".into()));
        }
        if !self.store.read().mounted {
            return Err(DbError::FileNotFound(self.param.identity.to_string()));
        }

        let mode = opt
            .open_mode()
            .ok_or_else(|| DbError::BadArgument("open without an open mode".into()))?;

        let mut next = Cursor {
            by_bitset: opt.get_by_bitset(),
            ..Cursor::default()
        };

        match mode {
            OpenMode::Update => next.mode = Mode::Update,
            OpenMode::Read => {
                next.mode = Mode::Read;
                if opt.read_sub_mode() != Some(ReadSubMode::Fetch) {
                    let store = self.store.read();
                    next.selected = store
                        .rows
                        .keys()
                        .chain(store.vector_tail.keys())
                        .copied()
                        .collect();
                    next.selected.sort_unstable();
                }
            }
            OpenMode::Search => {
                next.mode = Mode::Search;
                if opt.search_field_number() == Some(0) {
                    next.selected = Vec::new();
                } else {
                    // A single equality on the term key is the indexed
                    // form this driver understands.
                    let term = opt
                        .search_start(0)
                        .ok_or_else(|| DbError::BadArgument("search without a term".into()))?;
                    let store = self.store.read();
                    let posting = store.posting(&term.to_lowercase());
                    next.selected = posting.iter().collect();
                    next.term = Some(term);
                }
            }
        }

        *cursor = next;
        Ok(())
    }

    fn close(&self) {
        *self.cursor.lock() = Cursor::default();
    }

    fn get(&self, tuple: &mut Tuple) -> Result<bool> {
        let mut cursor = self.cursor.lock();
        if cursor.mode == Mode::Closed || cursor.mode == Mode::Update {
            return Err(DbError::IllegalMode("get outside a read open".into()));
        }

        if cursor.by_bitset {
            if cursor.bitset_delivered {
                return Ok(false);
            }
            cursor.bitset_delivered = true;
            *tuple = vec![Value::Array(
                cursor.selected.iter().copied().map(Value::Unsigned).collect(),
            )];
            return Ok(true);
        }

        let store = self.store.read();
        while cursor.position < cursor.selected.len() {
            let id = cursor.selected[cursor.position];
            cursor.position += 1;
            if let Some(row) = store.row(id) {
                *tuple = row.clone();
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn insert(&self, tuple: &mut Tuple) -> Result<()> {
        {
            let cursor = self.cursor.lock();
            if cursor.mode != Mode::Update {
                return Err(DbError::IllegalMode("insert outside an update open".into()));
            }
        }
        if tuple.len() != self.param.field_num {
            return Err(DbError::BadArgument(format!(
                "expected {} fields, got {}",
                self.param.field_num,
                tuple.len()
            )));
        }
        let text = match &tuple[1] {
            Value::String(s) => s.clone(),
            other => {
                return Err(DbError::BadArgument(format!(
                    "indexed key must be a string, got {:?}",
                    other
                )))
            }
        };

        let mut store = self.store.write();
        let id = store.next_row_id;
        store.next_row_id += 1;
        tuple[0] = Value::Unsigned(id);
        for term in Self::tokenize(&text) {
            store.current.inserts.push((term, id));
        }
        store.vector_tail.insert(id, tuple.clone());
        self.maybe_seal(&mut store);
        Ok(())
    }

    fn update(&self, key: &Tuple, tuple: &mut Tuple) -> Result<()> {
        let id = row_id_of(key)?;
        self.expunge(key)?;
        let mut store = self.store.write();
        let text = match &tuple[1] {
            Value::String(s) => s.clone(),
            other => {
                return Err(DbError::BadArgument(format!(
                    "indexed key must be a string, got {:?}",
                    other
                )))
            }
        };
        tuple[0] = Value::Unsigned(id);
        for term in Self::tokenize(&text) {
            store.current.inserts.push((term, id));
        }
        store.vector_tail.insert(id, tuple.clone());
        self.maybe_seal(&mut store);
        Ok(())
    }

    fn expunge(&self, key: &Tuple) -> Result<()> {
        {
            let cursor = self.cursor.lock();
            if cursor.mode != Mode::Update {
                return Err(DbError::IllegalMode("expunge outside an update open".into()));
            }
        }
        let id = row_id_of(key)?;
        let mut store = self.store.write();
        let old = store
            .rows
            .remove(&id)
            .or_else(|| store.vector_tail.remove(&id))
            .ok_or_else(|| DbError::BadArgument(format!("no row {}", id)))?;
        if let Value::String(text) = &old[1] {
            for term in Self::tokenize(text) {
                store.current.expunges.push((term, id));
            }
        }
        self.maybe_seal(&mut store);
        Ok(())
    }

    fn fetch(&self, option: &Tuple) -> Result<()> {
        let mut cursor = self.cursor.lock();
        if cursor.mode != Mode::Read && cursor.mode != Mode::Search {
            return Err(DbError::IllegalMode("fetch outside a read open".into()));
        }
        let term = match option.first() {
            Some(Value::String(s)) => s.to_lowercase(),
            other => {
                return Err(DbError::BadArgument(format!(
                    "fetch key must be a term, got {:?}",
                    other
                )))
            }
        };
        let store = self.store.read();
        cursor.selected = store.posting(&term).iter().collect();
        cursor.position = 0;
        cursor.bitset_delivered = false;
        cursor.term = Some(term);
        Ok(())
    }

    fn mark(&self) -> Result<()> {
        Ok(())
    }

    fn rewind(&self) -> Result<()> {
        self.reset()
    }

    fn reset(&self) -> Result<()> {
        let mut cursor = self.cursor.lock();
        cursor.position = 0;
        cursor.bitset_delivered = false;
        Ok(())
    }

    fn sync(
        &self,
        _trans: &Transaction,
        incomplete: &mut bool,
        modified: &mut bool,
    ) -> Result<()> {
        let store = self.store.read();
        *incomplete = !store.sealed.is_empty();
        *modified = !store.current.is_empty();
        Ok(())
    }

    fn move_file(&self, _trans: &Transaction, _areas: &[String]) -> Result<()> {
        Ok(())
    }

    fn capabilities(&self) -> capability::Value {
        capability::NONE
    }
}

impl MergeFile for InvertedFile {
    fn identity(&self) -> FileIdentity {
        self.param.identity
    }

    fn open_for_merge(&self, trans: &Transaction) -> Result<()> {
        trans.check_canceled()?;
        let mut store = self.store.write();
        if store.merge_open {
            return Err(DbError::IllegalMode("merge already open".into()));
        }
        if !store.mounted {
            return Err(DbError::FileNotFound(self.param.identity.to_string()));
        }
        // Whatever is buffered now belongs to this merge; seal it.
        if !store.current.is_empty() {
            let sealed = std::mem::take(&mut store.current);
            store.sealed.push_back(sealed);
        }
        store.merge_open = true;
        Ok(())
    }

    fn merge_list(&self) -> Result<bool> {
        let mut store = self.store.write();
        if !store.merge_open {
            return Err(DbError::IllegalMode("merge is not open".into()));
        }
        match store.sealed.pop_front() {
            Some(delta) => {
                let mut main = std::mem::take(&mut store.main);
                InvStore::apply(&mut main, &delta);
                store.main = main;
                Ok(!store.sealed.is_empty())
            }
            None => Ok(false),
        }
    }

    fn merge_vector(&self) -> Result<()> {
        let mut store = self.store.write();
        if !store.merge_open {
            return Err(DbError::IllegalMode("merge is not open".into()));
        }
        let tail = std::mem::take(&mut store.vector_tail);
        store.rows.extend(tail);
        Ok(())
    }

    fn close_for_merge(&self) {
        self.store.write().merge_open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DataType;
    use crate::common::FileIdentity;
    use crate::driver::treenode::NodeType;
    use crate::transaction::{Category, IsolationLevel, TransactionManager};
    use std::time::Duration;

    fn make_file(reserve: Option<Arc<MergeReserve>>) -> InvertedFile {
        let id = FileId::new();
        id.set_identity(FileIdentity::new(1, 2, 5));
        id.set_field_number(3);
        id.set_key_field_number(1);
        id.set_field_type(0, DataType::Unsigned);
        id.set_field_type(1, DataType::String);
        id.set_field_length(1, 256);
        id.set_field_type(2, DataType::Integer);
        InvertedFile::new(id, reserve).unwrap()
    }

    fn doc(text: &str, n: i32) -> Tuple {
        vec![Value::Null, Value::String(text.into()), Value::Integer(n)]
    }

    fn insert_docs(file: &InvertedFile, docs: &[(&str, i32)]) {
        let mgr = TransactionManager::new();
        let trans = mgr.begin(1, Category::ReadWrite, IsolationLevel::ReadCommitted);
        file.create(&trans).unwrap();
        let opt = OpenOption::new();
        opt.set_open_mode(OpenMode::Update);
        file.open(&trans, &opt).unwrap();
        for (text, n) in docs {
            let mut t = doc(text, *n);
            file.insert(&mut t).unwrap();
        }
        file.close();
    }

    #[test]
    fn test_term_search_sees_unmerged_deltas() -> Result<()> {
        let file = make_file(None);
        insert_docs(&file, &[("red apple", 1), ("green apple", 2), ("red door", 3)]);

        let mgr = TransactionManager::new();
        let trans = mgr.begin(1, Category::ReadOnly, IsolationLevel::ReadCommitted);
        let cond = TreeNode::comparison(
            NodeType::Equals,
            TreeNode::field(1),
            TreeNode::constant("apple"),
        );
        let opt = OpenOption::new();
        assert!(file.get_search_parameter(Some(&cond), &opt)?);
        file.open(&trans, &opt)?;
        let mut t = Tuple::new();
        let mut seen = Vec::new();
        while file.get(&mut t)? {
            seen.push(t[2].clone());
        }
        file.close();
        assert_eq!(seen, vec![Value::Integer(1), Value::Integer(2)]);
        Ok(())
    }

    #[test]
    fn test_merge_folds_deltas_into_main() -> Result<()> {
        let reserve = Arc::new(MergeReserve::new(Duration::from_millis(0)));
        let file = make_file(Some(Arc::clone(&reserve)));
        insert_docs(&file, &[("alpha beta", 1), ("beta gamma", 2)]);

        let mgr = TransactionManager::new();
        let trans = mgr.begin(1, Category::ReadWrite, IsolationLevel::ReadCommitted);
        file.open_for_merge(&trans)?;
        while file.merge_list()? {}
        file.merge_vector()?;
        file.close_for_merge();

        let store = file.store.read();
        assert!(store.sealed.is_empty());
        assert!(store.vector_tail.is_empty());
        assert_eq!(store.rows.len(), 2);
        let beta = store.main.get("beta").unwrap();
        assert_eq!(beta.len(), 2);
        Ok(())
    }

    #[test]
    fn test_threshold_seals_and_enqueues() -> Result<()> {
        let reserve = Arc::new(MergeReserve::new(Duration::from_secs(30)));
        let file = make_file(Some(Arc::clone(&reserve)));

        let mgr = TransactionManager::new();
        let trans = mgr.begin(1, Category::ReadWrite, IsolationLevel::ReadCommitted);
        file.create(&trans)?;
        let opt = OpenOption::new();
        opt.set_open_mode(OpenMode::Update);
        file.open(&trans, &opt)?;
        // merge_threshold is 64 terms; 70 single-term docs cross it.
        for i in 0..70 {
            let mut t = doc("word", i);
            file.insert(&mut t)?;
        }
        file.close();

        assert!(file.pending_deltas() >= 1);
        assert!(reserve.contains(file.identity(), 0));
        Ok(())
    }

    #[test]
    fn test_expunge_hides_row_from_search() -> Result<()> {
        let file = make_file(None);
        insert_docs(&file, &[("target word", 1), ("other word", 2)]);

        let mgr = TransactionManager::new();
        let trans = mgr.begin(1, Category::ReadWrite, IsolationLevel::ReadCommitted);
        let opt = OpenOption::new();
        opt.set_open_mode(OpenMode::Update);
        file.open(&trans, &opt)?;
        file.expunge(&vec![Value::Unsigned(0)])?;
        file.close();

        let cond = TreeNode::comparison(
            NodeType::Equals,
            TreeNode::field(1),
            TreeNode::constant("word"),
        );
        let opt = OpenOption::new();
        assert!(file.get_search_parameter(Some(&cond), &opt)?);
        file.open(&trans, &opt)?;
        let mut t = Tuple::new();
        let mut seen = Vec::new();
        while file.get(&mut t)? {
            seen.push(t[0].clone());
        }
        file.close();
        assert_eq!(seen, vec![Value::Unsigned(1)]);
        Ok(())
    }
}
