// B+tree driver skeleton.
//
// Keys are the fields 1..=key_num, values the rest; field 0 is the
// driver-assigned object id. The store itself is an ordered map; what this
// skeleton exercises is the full driver surface: open modes, compiled
// search ranges, fetch, projection, unique constraints, cursor marks and
// page-lock registration.

use crate::common::{FileIdentity, OrdTuple, PageId, RowId, Tuple, Value};
use crate::driver::compiler::OpenOptionCompiler;
use crate::driver::file_param::FileParameter;
use crate::driver::treenode::TreeNode;
use crate::driver::{capability, row_id_of, FileDriver, VerifyProgress, VerifyTreatment};
use crate::error::{DbError, Result};
use crate::lockmap::PageLockRegistry;
use crate::param::file_id::{FileId, UniqueMode};
use crate::param::open_option::{CompOp, OpenMode, OpenOption, ReadSubMode, SortKeySpec};
use crate::transaction::Transaction;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::debug;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// One decoded search bound.
#[derive(Debug, Clone)]
struct Bound {
    field: usize,
    start: Option<(CompOp, String)>,
    stop: Option<(CompOp, String)>,
}

#[derive(Debug, Default)]
struct Store {
    created: bool,
    mounted: bool,
    areas: Vec<String>,
    rows: BTreeMap<RowId, Tuple>,
    key_index: BTreeMap<OrdTuple, Vec<RowId>>,
    next_row_id: RowId,
}

impl Store {
    fn key_of(&self, tuple: &Tuple, key_num: usize) -> Tuple {
        tuple[1..=key_num].to_vec()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Closed,
    Scan,
    Fetch,
    Search,
    Update,
}

#[derive(Debug)]
struct Cursor {
    mode: Mode,
    /// Row ids satisfying the open, in delivery order.
    selected: Vec<RowId>,
    position: usize,
    marked: usize,
    bounds: Vec<Bound>,
    projection: Option<Vec<usize>>,
    fetch_fields: Vec<usize>,
    fetch_key: Option<Tuple>,
    fetch_served: usize,
    by_bitset: bool,
    bitset_delivered: bool,
    reverse: bool,
    locked_page: Option<PageId>,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            mode: Mode::Closed,
            selected: Vec::new(),
            position: 0,
            marked: 0,
            bounds: Vec::new(),
            projection: None,
            fetch_fields: Vec::new(),
            fetch_key: None,
            fetch_served: 0,
            by_bitset: false,
            bitset_delivered: false,
            reverse: false,
            locked_page: None,
        }
    }
}

/// In-memory B+tree-shaped logical file.
pub struct BtreeFile {
    file_id: FileId,
    param: FileParameter,
    registry: Arc<PageLockRegistry>,
    owner: u64,
    store: Arc<RwLock<Store>>,
    cursor: Mutex<Cursor>,
}

/// Partial read/overwrite handle onto one row's binary field.
struct FieldLocator {
    store: Arc<RwLock<Store>>,
    row_id: RowId,
    field: usize,
}

impl FieldLocator {
    fn with_bytes<T>(&self, f: impl FnOnce(&Vec<u8>) -> Result<T>) -> Result<T> {
        let store = self.store.read();
        match store.rows.get(&self.row_id).and_then(|r| r.get(self.field)) {
            Some(Value::Binary(bytes)) => f(bytes),
            _ => Err(DbError::BadArgument(format!(
                "row {} has no binary field {}",
                self.row_id, self.field
            ))),
        }
    }

    fn with_bytes_mut<T>(&self, f: impl FnOnce(&mut Vec<u8>) -> Result<T>) -> Result<T> {
        let mut store = self.store.write();
        match store
            .rows
            .get_mut(&self.row_id)
            .and_then(|r| r.get_mut(self.field))
        {
            Some(Value::Binary(bytes)) => f(bytes),
            _ => Err(DbError::BadArgument(format!(
                "row {} has no binary field {}",
                self.row_id, self.field
            ))),
        }
    }
}

impl crate::driver::Locator for FieldLocator {
    fn length(&self) -> Result<usize> {
        self.with_bytes(|b| Ok(b.len()))
    }

    fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.with_bytes(|b| {
            if offset > b.len() {
                return Err(DbError::BadArgument(format!(
                    "read at {} past end {}",
                    offset,
                    b.len()
                )));
            }
            let end = (offset + len).min(b.len());
            Ok(b[offset..end].to_vec())
        })
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.with_bytes_mut(|b| {
            if offset > b.len() {
                return Err(DbError::BadArgument(format!(
                    "write at {} past end {}",
                    offset,
                    b.len()
                )));
            }
            let end = offset + data.len();
            if end > b.len() {
                b.resize(end, 0);
            }
            b[offset..end].copy_from_slice(data);
            Ok(())
        })
    }

    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.with_bytes_mut(|b| {
            b.extend_from_slice(data);
            Ok(())
        })
    }

    fn truncate(&mut self, len: usize) -> Result<()> {
        self.with_bytes_mut(|b| {
            if len < b.len() {
                b.truncate(len);
            }
            Ok(())
        })
    }
}

impl BtreeFile {
    pub fn new(file_id: FileId, registry: Arc<PageLockRegistry>) -> Result<Self> {
        let param = FileParameter::from_file_id(&file_id)?;
        Ok(Self {
            file_id,
            param,
            registry,
            owner: NEXT_OWNER.fetch_add(1, AtomicOrdering::Relaxed),
            store: Arc::new(RwLock::new(Store::default())),
            cursor: Mutex::new(Cursor::default()),
        })
    }

    pub fn parameter(&self) -> &FileParameter {
        &self.param
    }

    pub fn identity(&self) -> FileIdentity {
        self.param.identity
    }

    fn rows_per_page(&self) -> usize {
        (self.param.page_size / 64).max(1)
    }

    fn page_of(&self, row: RowId) -> PageId {
        (row as usize / self.rows_per_page()) as PageId
    }

    fn decode_bounds(&self, opt: &OpenOption) -> Result<Vec<Bound>> {
        let n = opt.search_field_number().unwrap_or(0);
        let mut bounds = Vec::with_capacity(n as usize);
        for i in 0..n {
            let field = opt
                .search_field_index(i)
                .ok_or_else(|| DbError::BadArgument("missing search field index".into()))?
                as usize;
            let start = match opt.search_start_ope(i) {
                Some(op) => Some((
                    op,
                    opt.search_start(i).unwrap_or_default(),
                )),
                None => None,
            };
            let stop = match opt.search_stop_ope(i) {
                Some(op) => Some((op, opt.search_stop(i).unwrap_or_default())),
                None => None,
            };
            bounds.push(Bound { field, start, stop });
        }
        Ok(bounds)
    }

    fn like_regex(&self, pattern: &str, escape: Option<&str>) -> Result<Regex> {
        let escape_char = escape.and_then(|e| e.chars().next());
        let mut out = String::from("^");
        let mut escaped = false;
        for c in pattern.chars() {
            if !escaped && Some(c) == escape_char {
                escaped = true;
                continue;
            }
            if escaped {
                out.push_str(&regex::escape(&c.to_string()));
                escaped = false;
                continue;
            }
            match c {
                '%' => out.push_str(".*"),
                '_' => out.push('.'),
                other => out.push_str(&regex::escape(&other.to_string())),
            }
        }
        out.push('$');
        Regex::new(&out).map_err(|e| DbError::BadArgument(format!("bad like pattern: {}", e)))
    }

    fn bound_matches(&self, bound: &Bound, tuple: &Tuple, escape: Option<&str>) -> Result<bool> {
        let field_value = tuple
            .get(bound.field)
            .ok_or_else(|| DbError::Unexpected("tuple narrower than its layout".into()))?;
        let ty = self.param.field_type(bound.field)?;

        if let Some((op, text)) = &bound.start {
            let ok = match op {
                CompOp::EqualsToNull => field_value.is_null(),
                CompOp::Like => match field_value {
                    Value::String(s) => self.like_regex(text, escape)?.is_match(s),
                    _ => false,
                },
                _ => {
                    if field_value.is_null() {
                        false
                    } else {
                        let boundary = Value::parse_typed(ty, text)?;
                        let cmp = field_value.compare(&boundary);
                        match op {
                            CompOp::Equals => cmp == Ordering::Equal,
                            CompOp::GreaterThan => cmp == Ordering::Greater,
                            CompOp::GreaterThanEquals => cmp != Ordering::Less,
                            CompOp::LessThan => cmp == Ordering::Less,
                            CompOp::LessThanEquals => cmp != Ordering::Greater,
                            _ => false,
                        }
                    }
                }
            };
            if !ok {
                return Ok(false);
            }
        }

        if let Some((op, text)) = &bound.stop {
            if field_value.is_null() {
                return Ok(false);
            }
            let boundary = Value::parse_typed(ty, text)?;
            let cmp = field_value.compare(&boundary);
            let ok = match op {
                CompOp::LessThan => cmp == Ordering::Less,
                CompOp::LessThanEquals => cmp != Ordering::Greater,
                _ => false,
            };
            if !ok {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Materialize the row ids an open should deliver, in order.
    fn select_rows(&self, cursor: &Cursor, escape: Option<&str>) -> Result<Vec<RowId>> {
        let store = self.store.read();
        let mut out = Vec::new();
        for (key, ids) in store.key_index.iter() {
            let mut keep = true;
            // key tuple is fields 1..=key_num; synthesize the full prefix
            // with a placeholder object id for bound evaluation.
            let mut probe: Tuple = Vec::with_capacity(key.0.len() + 1);
            probe.push(Value::Unsigned(0));
            probe.extend(key.0.iter().cloned());
            for bound in &cursor.bounds {
                if !self.bound_matches(bound, &probe, escape)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                out.extend(ids.iter().copied());
            }
        }
        if cursor.reverse {
            out.reverse();
        }
        Ok(out)
    }

    fn project(&self, cursor: &Cursor, tuple: Tuple) -> Tuple {
        match &cursor.projection {
            None => tuple,
            Some(fields) => fields
                .iter()
                .map(|&i| tuple.get(i).cloned().unwrap_or(Value::Null))
                .collect(),
        }
    }

    fn deliver(&self, cursor: &mut Cursor, out: &mut Tuple) -> Result<bool> {
        let store = self.store.read();
        while cursor.position < cursor.selected.len() {
            let row_id = cursor.selected[cursor.position];
            cursor.position += 1;
            if let Some(row) = store.rows.get(&row_id) {
                // Track the page under the scan in the shared registry so
                // background work can see it.
                let page = self.page_of(row_id);
                if cursor.locked_page != Some(page) {
                    if let Some(old) = cursor.locked_page.take() {
                        self.registry.erase(self.param.identity, old, self.owner);
                    }
                    self.registry.insert(self.param.identity, page, self.owner);
                    cursor.locked_page = Some(page);
                }
                *out = self.project(cursor, row.clone());
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn check_unique(&self, store: &Store, tuple: &Tuple) -> Result<()> {
        if self.param.unique == UniqueMode::KeyField {
            let key = store.key_of(tuple, self.param.key_num);
            if store.key_index.contains_key(&OrdTuple(key)) {
                return Err(DbError::BadArgument("duplicate key".into()));
            }
        }
        Ok(())
    }
}

impl FileDriver for BtreeFile {
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
        let pages = store.rows.len() / self.rows_per_page() + 1;
        Ok((pages * self.param.page_size) as u64)
    }

    fn get_count(&self) -> Result<i64> {
        Ok(self.store.read().rows.len() as i64)
    }

    fn get_overhead(&self) -> f64 {
        // One root-to-leaf descent.
        let count = self.store.read().rows.len().max(1) as f64;
        count.log2().max(1.0)
    }

    fn get_process_cost(&self) -> f64 {
        1.0
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

    fn get_sort_parameter(&self, keys: &[i32], orders: &[i32], opt: &OpenOption) -> Result<bool> {
        OpenOptionCompiler::new(&self.param).compile_sort(keys, orders, opt)
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
        *store = Store::default();
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
        treatment: VerifyTreatment,
        progress: &mut VerifyProgress,
    ) -> Result<()> {
        let mut store = self.store.write();
        let key_num = self.param.key_num;
        let mut rebuilt: BTreeMap<OrdTuple, Vec<RowId>> = BTreeMap::new();
        for (&row_id, tuple) in store.rows.iter() {
            progress.examined += 1;
            rebuilt
                .entry(OrdTuple(store.key_of(tuple, key_num)))
                .or_default()
                .push(row_id);
        }
        if rebuilt != store.key_index {
            progress.note(format!("key index out of sync for {}", self.param.identity));
            if treatment == VerifyTreatment::Correct {
                store.key_index = rebuilt;
                progress.corrected += 1;
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

        let open_mode = opt
            .open_mode()
            .ok_or_else(|| DbError::BadArgument("open without an open mode".into()))?;

        let mut next = Cursor {
            reverse: opt.sort_key() == Some(SortKeySpec::KeyField) && opt.sort_reverse(),
            by_bitset: opt.get_by_bitset(),
            ..Cursor::default()
        };
        if let Some(fields) = opt.target_fields() {
            next.projection = Some(fields.iter().map(|&f| f as usize).collect());
        }

        match open_mode {
            OpenMode::Update => {
                next.mode = Mode::Update;
            }
            OpenMode::Read => match opt.read_sub_mode() {
                Some(ReadSubMode::Fetch) => {
                    let n = opt.fetch_field_number().unwrap_or(0);
                    for i in 0..n {
                        next.fetch_fields.push(
                            opt.fetch_field_index(i).ok_or_else(|| {
                                DbError::BadArgument("missing fetch field index".into())
                            })? as usize,
                        );
                    }
                    next.mode = Mode::Fetch;
                }
                _ => {
                    next.mode = Mode::Scan;
                    next.selected = {
                        let store = self.store.read();
                        let mut ids: Vec<RowId> = Vec::with_capacity(store.rows.len());
                        if opt.sort_key() == Some(SortKeySpec::ObjectId) {
                            ids.extend(store.rows.keys().copied());
                            if opt.sort_reverse() {
                                ids.reverse();
                            }
                        } else {
                            for ids_of_key in store.key_index.values() {
                                ids.extend(ids_of_key.iter().copied());
                            }
                            if next.reverse {
                                ids.reverse();
                            }
                        }
                        ids
                    };
                }
            },
            OpenMode::Search => {
                next.bounds = self.decode_bounds(opt)?;
                next.mode = Mode::Search;
                // SearchFieldNumber = 0 is the compiler's empty-set
                // conclusion: open succeeds and yields nothing.
                if opt.search_field_number() == Some(0) {
                    next.selected = Vec::new();
                } else {
                    next.selected = self.select_rows(&next, opt.escape().as_deref())?;
                }
                if opt.read_sub_mode() == Some(ReadSubMode::Fetch) {
                    let n = opt.fetch_field_number().unwrap_or(0);
                    for i in 0..n {
                        next.fetch_fields.push(
                            opt.fetch_field_index(i).ok_or_else(|| {
                                DbError::BadArgument("missing fetch field index".into())
                            })? as usize,
                        );
                    }
                }
            }
        }

        *cursor = next;
        Ok(())
    }

    fn close(&self) {
        let mut cursor = self.cursor.lock();
        if let Some(page) = cursor.locked_page.take() {
            self.registry.erase(self.param.identity, page, self.owner);
        }
        *cursor = Cursor::default();
    }

    fn get(&self, tuple: &mut Tuple) -> Result<bool> {
        let mut cursor = self.cursor.lock();
        match cursor.mode {
            Mode::Closed | Mode::Update => {
                Err(DbError::IllegalMode("get outside a read open".into()))
            }
            Mode::Scan | Mode::Search => {
                if !cursor.fetch_fields.is_empty() {
                    // Search + Fetch: deliver only rows matching the key.
                    return self.fetch_next(&mut cursor, tuple);
                }
                if cursor.by_bitset {
                    if cursor.bitset_delivered {
                        return Ok(false);
                    }
                    let store = self.store.read();
                    let mut set = crate::common::bitset::BitSet::new();
                    for &id in &cursor.selected {
                        if store.rows.contains_key(&id) {
                            set.set(id);
                        }
                    }
                    drop(store);
                    cursor.bitset_delivered = true;
                    *tuple = vec![Value::Array(
                        set.iter().map(Value::Unsigned).collect(),
                    )];
                    return Ok(true);
                }
                self.deliver(&mut cursor, tuple)
            }
            Mode::Fetch => self.fetch_next(&mut cursor, tuple),
        }
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
        let mut store = self.store.write();
        self.check_unique(&store, tuple)?;
        let row_id = store.next_row_id;
        store.next_row_id += 1;
        tuple[0] = Value::Unsigned(row_id);
        let key = store.key_of(tuple, self.param.key_num);
        store.rows.insert(row_id, tuple.clone());
        store.key_index.entry(OrdTuple(key)).or_default().push(row_id);
        Ok(())
    }

    fn update(&self, key: &Tuple, tuple: &mut Tuple) -> Result<()> {
        {
            let cursor = self.cursor.lock();
            if cursor.mode != Mode::Update {
                return Err(DbError::IllegalMode("update outside an update open".into()));
            }
        }
        let row_id = row_id_of(key)?;
        let mut store = self.store.write();
        let old = store
            .rows
            .get(&row_id)
            .cloned()
            .ok_or_else(|| DbError::BadArgument(format!("no row {}", row_id)))?;

        let old_key = OrdTuple(store.key_of(&old, self.param.key_num));
        let mut new_row = old.clone();
        // A full-width tuple replaces every field; a narrower one carries
        // the projected update targets in declaration order after the id.
        if tuple.len() == self.param.field_num {
            new_row = tuple.clone();
            new_row[0] = Value::Unsigned(row_id);
        } else {
            for (offset, value) in tuple.iter().enumerate() {
                let target = offset + 1;
                if target < new_row.len() {
                    new_row[target] = value.clone();
                }
            }
        }

        let new_key = OrdTuple(store.key_of(&new_row, self.param.key_num));
        if new_key != old_key {
            if self.param.unique == UniqueMode::KeyField
                && store.key_index.contains_key(&new_key)
            {
                return Err(DbError::BadArgument("duplicate key".into()));
            }
            if let Some(ids) = store.key_index.get_mut(&old_key) {
                ids.retain(|&id| id != row_id);
                if ids.is_empty() {
                    store.key_index.remove(&old_key);
                }
            }
            store.key_index.entry(new_key).or_default().push(row_id);
        }
        store.rows.insert(row_id, new_row);
        Ok(())
    }

    fn expunge(&self, key: &Tuple) -> Result<()> {
        {
            let cursor = self.cursor.lock();
            if cursor.mode != Mode::Update {
                return Err(DbError::IllegalMode("expunge outside an update open".into()));
            }
        }
        let row_id = row_id_of(key)?;
        let mut store = self.store.write();
        let old = store
            .rows
            .remove(&row_id)
            .ok_or_else(|| DbError::BadArgument(format!("no row {}", row_id)))?;
        let old_key = OrdTuple(store.key_of(&old, self.param.key_num));
        if let Some(ids) = store.key_index.get_mut(&old_key) {
            ids.retain(|&id| id != row_id);
            if ids.is_empty() {
                store.key_index.remove(&old_key);
            }
        }
        Ok(())
    }

    fn fetch(&self, option: &Tuple) -> Result<()> {
        let mut cursor = self.cursor.lock();
        if cursor.mode != Mode::Fetch && cursor.mode != Mode::Search {
            return Err(DbError::IllegalMode("fetch outside a fetch open".into()));
        }
        cursor.fetch_key = Some(option.clone());
        cursor.fetch_served = 0;
        cursor.position = 0;
        Ok(())
    }

    fn mark(&self) -> Result<()> {
        let mut cursor = self.cursor.lock();
        cursor.marked = cursor.position;
        Ok(())
    }

    fn rewind(&self) -> Result<()> {
        let mut cursor = self.cursor.lock();
        cursor.position = cursor.marked;
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        let mut cursor = self.cursor.lock();
        cursor.position = 0;
        cursor.fetch_served = 0;
        cursor.bitset_delivered = false;
        Ok(())
    }

    fn sync(
        &self,
        _trans: &Transaction,
        incomplete: &mut bool,
        modified: &mut bool,
    ) -> Result<()> {
        *incomplete = false;
        *modified = false;
        Ok(())
    }

    fn move_file(&self, _trans: &Transaction, areas: &[String]) -> Result<()> {
        self.store.write().areas = areas.to_vec();
        debug!(identity = %self.param.identity, ?areas, "moved");
        Ok(())
    }

    fn get_locator(&self, key: &Tuple) -> Result<Option<Box<dyn crate::driver::Locator>>> {
        let row_id = row_id_of(key)?;
        let store = self.store.read();
        let row = match store.rows.get(&row_id) {
            Some(r) => r,
            None => return Ok(None),
        };
        // The locator addresses the row's binary payload field.
        let field = match row.iter().position(|v| matches!(v, Value::Binary(_))) {
            Some(f) => f,
            None => return Ok(None),
        };
        drop(store);
        Ok(Some(Box::new(FieldLocator {
            store: Arc::clone(&self.store),
            row_id,
            field,
        })))
    }

    fn capabilities(&self) -> capability::Value {
        capability::ESTIMATE_COUNT
    }
}

impl BtreeFile {
    /// Serve one row for the pending fetch key.
    fn fetch_next(&self, cursor: &mut Cursor, out: &mut Tuple) -> Result<bool> {
        // FetchFieldNumber = 0 means there is nothing to match: zero rows.
        if cursor.fetch_fields.is_empty() {
            return Ok(false);
        }
        let key = match cursor.fetch_key.clone() {
            Some(k) => k,
            None => return Ok(false),
        };
        if key.len() != cursor.fetch_fields.len() {
            return Err(DbError::BadArgument(format!(
                "fetch key has {} fields, open declared {}",
                key.len(),
                cursor.fetch_fields.len()
            )));
        }

        let store = self.store.read();

        // Fetch by object id.
        if cursor.fetch_fields == [0] {
            if cursor.fetch_served > 0 {
                return Ok(false);
            }
            let row_id = row_id_of(&key)?;
            if let Some(row) = store.rows.get(&row_id) {
                cursor.fetch_served += 1;
                let row = row.clone();
                drop(store);
                *out = self.project(cursor, row);
                return Ok(true);
            }
            return Ok(false);
        }

        // Fetch by key fields: walk candidates, honoring any search bounds
        // already restricting the open.
        let candidates: Vec<RowId> = if cursor.mode == Mode::Search {
            cursor.selected.clone()
        } else {
            store.rows.keys().copied().collect()
        };

        while cursor.position < candidates.len() {
            let row_id = candidates[cursor.position];
            cursor.position += 1;
            let row = match store.rows.get(&row_id) {
                Some(r) => r,
                None => continue,
            };
            let matches = cursor
                .fetch_fields
                .iter()
                .zip(key.iter())
                .all(|(&field, expected)| {
                    row.get(field)
                        .map(|v| v.compare(expected) == Ordering::Equal)
                        .unwrap_or(false)
                });
            if matches {
                cursor.fetch_served += 1;
                let row = row.clone();
                drop(store);
                *out = self.project(cursor, row);
                return Ok(true);
            }
        }
        Ok(false)
    }
}
