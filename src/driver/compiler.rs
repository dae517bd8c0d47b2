// Open-option compiler.
//
// Walks a predicate tree against a file's key layout and decides whether
// the driver can serve the query as a key-prefix range, emitting the typed
// open option the driver consumes. Returning Ok(false) means the caller
// must fall back to a full scan; emitting SearchFieldNumber = 0 means the
// predicate is known unsatisfiable and the driver must yield zero rows.

use crate::common::Value;
use crate::driver::file_param::{FileParameter, SortOrder};
use crate::driver::treenode::{NodeType, TreeNode};
use crate::error::{DbError, Result};
use crate::param::open_option::{CompOp, OpenMode, OpenOption, ReadSubMode, SortKeySpec};
use tracing::debug;

/// Outcome of validating one piece of a compound condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    /// Serveable as compiled so far.
    Regular,
    /// Cannot be served by a key-prefix range; caller falls back to scan.
    Illegal,
    /// Provably empty result set.
    NullOut,
}

/// Accumulated bounds for one key field while compiling a conjunction.
#[derive(Debug, Clone, Default)]
struct ConditionItem {
    start: String,
    start_ope: Option<CompOp>,
    stop: String,
    stop_ope: Option<CompOp>,
}

/// Compiles predicate/projection/sort requests into open options for one
/// file.
pub struct OpenOptionCompiler<'a> {
    param: &'a FileParameter,
}

impl<'a> OpenOptionCompiler<'a> {
    pub fn new(param: &'a FileParameter) -> Self {
        Self { param }
    }

    /// Compile a search condition. `None` means scan. Returns false when
    /// the predicate cannot be served without a full scan; the open option
    /// is left untouched in that case (apart from CacheAllObject, which is
    /// always recorded as false for this driver family).
    pub fn compile_search(
        &self,
        condition: Option<&TreeNode>,
        opt: &OpenOption,
    ) -> Result<bool> {
        opt.set_cache_all_object(false);

        let condition = match condition {
            None => return Ok(self.set_scan_parameter(opt)),
            Some(c) => c,
        };

        match condition.node_type() {
            NodeType::Fetch => self.set_fetch_parameter(condition, opt),
            NodeType::Like => self.set_like_parameter(condition, opt),
            NodeType::Equals
            | NodeType::GreaterThan
            | NodeType::GreaterThanEquals
            | NodeType::LessThan
            | NodeType::LessThanEquals => self.set_single_parameter(condition, opt),
            NodeType::EqualsToNull => self.set_equals_to_null_parameter(condition, opt),
            NodeType::And | NodeType::List => self.set_multi_parameter(condition, opt),
            other => {
                debug!(?other, "unknown node type in search condition");
                Ok(false)
            }
        }
    }

    /// Compile the projection/update target list.
    pub fn compile_target(
        &self,
        target_fields: &[i32],
        opt: &OpenOption,
        open_mode: OpenMode,
    ) -> Result<bool> {
        if opt.get_by_bitset() {
            if target_fields.len() != 1 {
                return Err(DbError::BadArgument(
                    "bitset delivery takes exactly one target field".into(),
                ));
            }
            let ty = self.param.field_type(target_fields[0] as usize)?;
            if ty != crate::common::DataType::Unsigned {
                return Err(DbError::BadArgument(
                    "bitset delivery needs an unsigned row-id field".into(),
                ));
            }
        }

        if target_fields.is_empty() || target_fields.len() > self.param.field_num {
            return Err(DbError::BadArgument(format!(
                "bad target field count {}",
                target_fields.len()
            )));
        }

        // Validate everything before touching the open option.
        for &field in target_fields {
            if field < 0 || field as usize >= self.param.field_num {
                return Err(DbError::BadArgument(format!(
                    "target field index {} out of range",
                    field
                )));
            }
            if open_mode == OpenMode::Update && field == 0 {
                debug!("object id cannot be updated");
                return Ok(false);
            }
        }

        let current = opt.open_mode();
        if open_mode == OpenMode::Read
            && current != Some(OpenMode::Read)
            && current != Some(OpenMode::Search)
        {
            if current == Some(OpenMode::Update) {
                return Err(DbError::BadArgument(
                    "projection requested on a file opened for update".into(),
                ));
            }
            opt.set_open_mode(OpenMode::Read);
        }
        if open_mode == OpenMode::Update {
            opt.set_open_mode(OpenMode::Update);
        }

        opt.set_field_select(true);
        opt.set_target_field_number(target_fields.len() as i32);
        for (i, &field) in target_fields.iter().enumerate() {
            opt.set_target_field_index(i as i32, field);
        }
        Ok(true)
    }

    /// Compile a sort request. `keys` are field indexes (0 is object id),
    /// `orders` 0 for ascending and 1 for descending.
    pub fn compile_sort(&self, keys: &[i32], orders: &[i32], opt: &OpenOption) -> Result<bool> {
        if keys.len() != orders.len() || keys.is_empty() {
            return Err(DbError::BadArgument("sort keys and orders mismatch".into()));
        }

        let (established_search, object_id_search) = self.check_search_field(opt)?;

        let sort_key;
        let mut sort_reverse = false;

        if keys[0] == 0 {
            // Object id is the sort key; it must be alone, and it cannot
            // coexist with a key-range search.
            if keys.len() > 1 {
                return Ok(false);
            }
            if established_search && !object_id_search {
                return Ok(false);
            }
            sort_key = SortKeySpec::ObjectId;
            if orders[0] == 1 {
                sort_reverse = true;
            }
        } else {
            if established_search && object_id_search {
                return Ok(false);
            }

            sort_key = SortKeySpec::KeyField;
            let first_declared = match self.param.key_sort_order(1) {
                Some(o) => o,
                None => return Ok(false),
            };
            let first_declared_code = if first_declared == SortOrder::Ascending {
                0
            } else {
                1
            };
            if first_declared_code != orders[0] {
                sort_reverse = true;
            }

            for i in 1..keys.len() {
                let declared = match self.param.key_sort_order(keys[i] as usize) {
                    Some(o) => o,
                    None => return Ok(false),
                };
                let declared_code = if declared == SortOrder::Ascending { 0 } else { 1 };
                if sort_reverse {
                    if orders[i] == declared_code {
                        return Ok(false);
                    }
                } else if orders[i] != declared_code {
                    return Ok(false);
                }
            }
        }

        opt.set_sort_key(sort_key);
        opt.set_sort_reverse(sort_reverse);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // scan / fetch
    // ------------------------------------------------------------------

    fn set_scan_parameter(&self, opt: &OpenOption) -> bool {
        // Scan opens as Read; the sub mode tells it apart from Fetch.
        opt.set_open_mode(OpenMode::Read);
        opt.set_read_sub_mode(ReadSubMode::Scan);
        true
    }

    fn set_fetch_parameter(&self, condition: &TreeNode, opt: &OpenOption) -> Result<bool> {
        // With search parameters already compiled this becomes
        // Search + Fetch, which accepts a different column shape.
        let fetch_only = opt.open_mode() != Some(OpenMode::Search);

        let columns = match condition.option_at(0) {
            Some(c) if c.operand_size() > 0 => c,
            _ => {
                debug!("fetch without fetched columns");
                return Ok(false);
            }
        };

        let mut fetch_fields: Vec<i32> = Vec::with_capacity(columns.operand_size());

        if fetch_only {
            let (established_sort, sort_is_object_id) = self.check_sort_key(opt)?;

            let mut set_top = false;
            for (i, column) in columns.operands().iter().enumerate() {
                let field_index = column.value_as_int();

                if i == 0 && field_index == 0 {
                    // Fetch by object id: must be the only fetch column
                    // and agrees only with object-id sort.
                    if established_sort && !sort_is_object_id {
                        return Ok(false);
                    }
                    if columns.operand_size() > 1 {
                        debug!("cannot fetch by object id and key together");
                        return Ok(false);
                    }
                    fetch_fields.push(0);
                    break;
                }

                if established_sort && sort_is_object_id {
                    return Ok(false);
                }
                if field_index < 0 || field_index as usize >= self.param.field_num {
                    debug!(field_index, "bad fetch field index");
                    return Ok(false);
                }
                if self.param.is_binary_field(field_index as usize) {
                    debug!("cannot fetch by a binary field");
                    return Ok(false);
                }
                if field_index as usize == i + 1 {
                    set_top = true;
                } else if !set_top {
                    // Fetch keys must begin at the leading key field.
                    debug!(field_index, "fetch fields must start at the leading key");
                    return Ok(false);
                }
                fetch_fields.push(field_index);
            }
        } else {
            // Search + Fetch. A search already concluded empty keeps its
            // zero marker and needs nothing from us.
            if opt.search_field_number() == Some(0) {
                return Ok(true);
            }
            for column in columns.operands() {
                let field_index = column.value_as_int();
                if field_index == 0 {
                    debug!("cannot search by key and fetch by object id");
                    return Ok(false);
                }
                if field_index < 0 || field_index as usize >= self.param.field_num {
                    return Ok(false);
                }
                if self.param.is_binary_field(field_index as usize) {
                    return Ok(false);
                }
                fetch_fields.push(field_index);
            }
        }

        if fetch_only {
            opt.set_open_mode(OpenMode::Read);
        }
        opt.set_read_sub_mode(ReadSubMode::Fetch);
        opt.set_fetch_field_number(fetch_fields.len() as i32);
        for (i, &field) in fetch_fields.iter().enumerate() {
            opt.set_fetch_field_index(i as i32, field);
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // like
    // ------------------------------------------------------------------

    fn set_like_parameter(&self, node: &TreeNode, opt: &OpenOption) -> Result<bool> {
        if self.param.field_type(1)? != crate::common::DataType::String {
            debug!("like needs a string leading key");
            return Ok(false);
        }
        if node.operand_size() != 2 {
            return Ok(false);
        }

        // Either operand order is accepted.
        let first_type = node.operand_at(0).map(|n| n.node_type());
        let pattern_index = if matches!(
            first_type,
            Some(NodeType::ConstantValue) | Some(NodeType::Variable)
        ) {
            0
        } else {
            1
        };
        let field_index_in_node = 1 - pattern_index;

        let field_node = node.operand_at(field_index_in_node).unwrap();
        if field_node.node_type() != NodeType::Field {
            return Ok(false);
        }
        if field_node.value_as_int() != 1 {
            debug!("like is only served on the leading key field");
            return Ok(false);
        }

        let pattern_node = node.operand_at(pattern_index).unwrap();
        if !matches!(
            pattern_node.node_type(),
            NodeType::ConstantValue | NodeType::Variable
        ) {
            return Ok(false);
        }
        let pattern = pattern_node.value().to_string();
        if pattern.is_empty() {
            return Ok(false);
        }

        // A leading wildcard defeats the index.
        let first_char = pattern.chars().next().unwrap();
        if first_char == '%' || first_char == '_' {
            debug!("leading wildcard cannot be served");
            return Ok(false);
        }

        let mut escape = None;
        match node.option_size() {
            0 => {}
            1 => {
                let escape_node = node.option_at(0).unwrap();
                if !matches!(
                    escape_node.node_type(),
                    NodeType::ConstantValue | NodeType::Variable
                ) {
                    return Ok(false);
                }
                escape = Some(escape_node.value().to_string());
            }
            _ => {
                // Only the escape option is understood here.
                debug!("too many like options");
                return Ok(false);
            }
        }

        opt.set_open_mode(OpenMode::Search);
        opt.set_search_field_number(1);
        opt.set_search_field_index(0, 1);
        opt.set_search_start(0, &pattern);
        opt.set_search_start_ope(0, CompOp::Like);
        if let Some(escape) = escape {
            opt.set_escape(&escape);
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // single comparison
    // ------------------------------------------------------------------

    fn set_single_parameter(&self, condition: &TreeNode, opt: &OpenOption) -> Result<bool> {
        if condition.operand_size() != 2 {
            return Ok(false);
        }

        // The field node may be either operand.
        let mut field_node_index = None;
        let mut constant_checked = false;
        let first = condition.operand_at(0).unwrap();
        match first.node_type() {
            NodeType::Field => field_node_index = Some(0),
            NodeType::ConstantValue | NodeType::Variable => {
                constant_checked = true;
                if condition.operand_at(1).unwrap().node_type() == NodeType::Field {
                    field_node_index = Some(1);
                }
            }
            _ => {}
        }
        let field_node_index = match field_node_index {
            Some(i) => i,
            None => return Ok(false),
        };
        let field_node = condition.operand_at(field_node_index).unwrap();

        // A single comparison is only served on the leading key field.
        // Object-id search in particular does not exist (fetch does).
        let field_index = field_node.value_as_int();
        if field_index != 1 {
            debug!(field_index, "single condition not on the leading key");
            return Ok(false);
        }
        if self.param.is_binary_field(field_index as usize) {
            return Ok(false);
        }

        let (_, sort_is_object_id) = self.check_sort_key(opt)?;
        if sort_is_object_id {
            debug!("cannot search by key under object-id sort");
            return Ok(false);
        }

        let constant_index = 1 - field_node_index;
        let constant_node = condition.operand_at(constant_index).unwrap();
        if !constant_checked
            && !matches!(
                constant_node.node_type(),
                NodeType::ConstantValue | NodeType::Variable
            )
        {
            return Ok(false);
        }

        let search_value = constant_node.value().to_string();
        let ope = Self::operator_of(condition.node_type())?;

        opt.set_open_mode(OpenMode::Search);
        opt.set_search_field_number(1);
        opt.set_search_field_index(0, field_index);
        opt.set_search_start(0, &search_value);
        opt.set_search_start_ope(0, ope);
        Ok(true)
    }

    fn set_equals_to_null_parameter(
        &self,
        condition: &TreeNode,
        opt: &OpenOption,
    ) -> Result<bool> {
        if condition.operand_size() != 1 {
            return Ok(false);
        }
        let field_node = condition.operand_at(0).unwrap();
        if field_node.node_type() != NodeType::Field {
            return Ok(false);
        }
        if field_node.value_as_int() != 1 {
            return Ok(false);
        }

        let (_, sort_is_object_id) = self.check_sort_key(opt)?;
        if sort_is_object_id {
            // Object ids are never null.
            return Ok(false);
        }

        opt.set_open_mode(OpenMode::Search);
        opt.set_search_field_number(1);
        opt.set_search_field_index(0, 1);
        opt.set_search_start(0, "0");
        opt.set_search_start_ope(0, CompOp::EqualsToNull);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // conjunction
    // ------------------------------------------------------------------

    fn set_multi_parameter(&self, condition: &TreeNode, opt: &OpenOption) -> Result<bool> {
        let target_field_num = self.param.key_num + 1;
        let mut items: Vec<ConditionItem> = vec![ConditionItem::default(); target_field_num];

        let mut decision = self.collect_multi(condition, &mut items, target_field_num)?;
        if decision == Decision::Illegal {
            return Ok(false);
        }
        if decision == Decision::Regular {
            decision = self.check_multi_condition(&mut items, opt)?;
            if decision == Decision::Illegal {
                return Ok(false);
            }
        }

        if decision == Decision::Regular {
            self.emit_multi(&items, opt);
        } else {
            Self::emit_empty(opt);
        }
        Ok(true)
    }

    fn collect_multi(
        &self,
        condition: &TreeNode,
        items: &mut [ConditionItem],
        target_field_num: usize,
    ) -> Result<Decision> {
        for operand in condition.operands() {
            let decision = match operand.node_type() {
                NodeType::And | NodeType::List => {
                    self.collect_multi(operand, items, target_field_num)?
                }
                NodeType::Equals
                | NodeType::GreaterThan
                | NodeType::GreaterThanEquals
                | NodeType::LessThan
                | NodeType::LessThanEquals
                | NodeType::EqualsToNull => {
                    self.collect_single(operand, items, target_field_num)
                }
                other => {
                    debug!(?other, "unknown node type in conjunction");
                    return Ok(Decision::Illegal);
                }
            };
            if decision != Decision::Regular {
                return Ok(decision);
            }
        }
        Ok(Decision::Regular)
    }

    fn collect_single(
        &self,
        condition: &TreeNode,
        items: &mut [ConditionItem],
        target_field_num: usize,
    ) -> Decision {
        let field_index = Self::operand_value(condition, NodeType::Field)
            .parse::<i32>()
            .unwrap_or(-1);
        if field_index < 1 || field_index as usize >= target_field_num {
            debug!(field_index, "search field out of key range");
            return Decision::Illegal;
        }
        if self.param.is_binary_field(field_index as usize) {
            return Decision::Illegal;
        }

        let data = Self::operand_value(condition, NodeType::ConstantValue);
        let item = &mut items[field_index as usize];

        match condition.node_type() {
            NodeType::LessThan | NodeType::LessThanEquals => Self::check_and_set_condition(
                condition.node_type(),
                &data,
                &mut item.stop_ope,
                &mut item.stop,
            ),
            _ => Self::check_and_set_condition(
                condition.node_type(),
                &data,
                &mut item.start_ope,
                &mut item.start,
            ),
        }
    }

    /// Record a new bound for one side of a field, merging with whatever
    /// is already there.
    fn check_and_set_condition(
        op_type: NodeType,
        data: &str,
        ope: &mut Option<CompOp>,
        text: &mut String,
    ) -> Decision {
        match ope {
            None => {
                *text = data.to_string();
                *ope = Self::operator_of(op_type).ok();
                Decision::Regular
            }
            Some(existing) if text == data => Self::contradiction(op_type, existing),
            Some(existing) => {
                // Different constants: with equality on either side the
                // two can never both hold; otherwise which bound is
                // tighter is type-dependent, so refuse.
                if *existing == CompOp::Equals || op_type == NodeType::Equals {
                    Decision::NullOut
                } else {
                    Decision::Illegal
                }
            }
        }
    }

    /// Same-constant operator merge table. Rows are the incoming operator,
    /// columns the one already recorded.
    fn contradiction(op_type: NodeType, ope: &mut CompOp) -> Decision {
        #[derive(Clone, Copy)]
        enum Act {
            Ill,
            Nll,
            Equ,
            Ovr,
            Kep,
        }
        use Act::*;

        let row = match op_type {
            NodeType::Equals => 0,
            NodeType::GreaterThan => 1,
            NodeType::GreaterThanEquals => 2,
            NodeType::LessThan => 3,
            NodeType::LessThanEquals => 4,
            NodeType::EqualsToNull => 5,
            _ => return Decision::Illegal,
        };
        let col = ope.code() as usize;
        if col >= 6 {
            return Decision::Illegal;
        }

        //                EQ   GT   GE   LT   LE   EN
        const TABLE: [[Act; 6]; 6] = [
            /* EQ */ [Kep, Nll, Ovr, Nll, Ovr, Ill],
            /* GT */ [Nll, Kep, Ovr, Nll, Nll, Ill],
            /* GE */ [Equ, Kep, Kep, Nll, Equ, Ill],
            /* LT */ [Nll, Nll, Nll, Kep, Ovr, Ill],
            /* LE */ [Equ, Nll, Equ, Kep, Kep, Ill],
            /* EN */ [Ill, Ill, Ill, Ill, Ill, Kep],
        ];

        match TABLE[row][col] {
            Ill => Decision::Illegal,
            Nll => Decision::NullOut,
            Equ => {
                *ope = CompOp::Equals;
                Decision::Regular
            }
            Ovr => {
                *ope = Self::operator_of(op_type).unwrap_or(*ope);
                Decision::Regular
            }
            Kep => Decision::Regular,
        }
    }

    fn check_multi_condition(
        &self,
        items: &mut [ConditionItem],
        opt: &OpenOption,
    ) -> Result<Decision> {
        let (_, sort_is_object_id) = self.check_sort_key(opt)?;
        if sort_is_object_id {
            debug!("cannot search by key under object-id sort");
            return Ok(Decision::Illegal);
        }

        // The leading key field must carry at least one bound. Operators
        // are tested rather than bound text because EqualsToNull carries
        // no search data of its own.
        if items[1].start_ope.is_none() && items[1].stop_ope.is_none() {
            debug!("no condition on the leading key field");
            return Ok(Decision::Illegal);
        }

        let mut except_eq = false;
        for field_index in 1..items.len() {
            let item = &mut items[field_index];

            if item.start_ope.is_none() {
                if item.stop_ope.is_none() {
                    continue;
                }
                // Only an upper bound: normalize it into the start slot so
                // the driver always reads [start, stop].
                item.start = std::mem::take(&mut item.stop);
                item.start_ope = item.stop_ope.take();
            }

            // A non-equality bound must be the trailing bounded field.
            if except_eq {
                debug!("bounded field after a non-equality bound");
                return Ok(Decision::Illegal);
            }
            if item.start_ope != Some(CompOp::Equals) {
                except_eq = true;
            }

            if !item.start.is_empty() && !item.stop.is_empty() {
                if !self.span_is_searchable(item, field_index)? {
                    debug!("range start exceeds stop");
                    return Ok(Decision::NullOut);
                }

                if item.start == item.stop {
                    let start_ok = matches!(
                        item.start_ope,
                        Some(CompOp::GreaterThanEquals) | Some(CompOp::Equals)
                    );
                    if start_ok && item.stop_ope == Some(CompOp::LessThanEquals) {
                        // f >= c and f <= c collapses to f = c.
                        item.stop.clear();
                        item.stop_ope = None;
                        item.start_ope = Some(CompOp::Equals);
                    } else {
                        debug!("degenerate range cannot match");
                        return Ok(Decision::NullOut);
                    }
                } else if !matches!(
                    item.start_ope,
                    Some(CompOp::GreaterThan) | Some(CompOp::GreaterThanEquals)
                ) {
                    // e.g. f = c1 and f < c2: not a range the driver reads.
                    debug!("lower bound operator does not form a range");
                    return Ok(Decision::Illegal);
                }
            }
        }

        Ok(Decision::Regular)
    }

    /// Typed comparison of a two-sided range; false when start > stop.
    fn span_is_searchable(&self, item: &ConditionItem, field_index: usize) -> Result<bool> {
        let ty = self.param.field_type(field_index)?;
        let start = Value::parse_typed(ty, &item.start)?;
        let stop = Value::parse_typed(ty, &item.stop)?;
        Ok(start.compare(&stop) != std::cmp::Ordering::Greater)
    }

    fn emit_multi(&self, items: &[ConditionItem], opt: &OpenOption) {
        opt.set_open_mode(OpenMode::Search);

        let mut array_index = 0;
        for (field_index, item) in items.iter().enumerate() {
            let mut emitted = false;

            if let Some(start_ope) = item.start_ope {
                opt.set_search_field_index(array_index, field_index as i32);
                if start_ope == CompOp::EqualsToNull {
                    // No search data exists for a null bound; the driver
                    // expects the placeholder.
                    opt.set_search_start(array_index, "0");
                } else {
                    opt.set_search_start(array_index, &item.start);
                }
                opt.set_search_start_ope(array_index, start_ope);
                emitted = true;
            }

            if let Some(stop_ope) = item.stop_ope {
                opt.set_search_stop(array_index, &item.stop);
                opt.set_search_stop_ope(array_index, stop_ope);
                emitted = true;
            }

            if emitted {
                array_index += 1;
            }
        }

        opt.set_search_field_number(array_index);
    }

    fn emit_empty(opt: &OpenOption) {
        opt.set_open_mode(OpenMode::Search);
        opt.set_search_field_number(0);
    }

    // ------------------------------------------------------------------
    // cross-parameter consistency
    // ------------------------------------------------------------------

    /// Whether a sort key is already recorded, and whether it is the
    /// object id.
    fn check_sort_key(&self, opt: &OpenOption) -> Result<(bool, bool)> {
        match opt.sort_key() {
            Some(SortKeySpec::ObjectId) => Ok((true, true)),
            Some(SortKeySpec::KeyField) => Ok((true, false)),
            None => Ok((false, false)),
        }
    }

    /// Whether search/fetch parameters are already recorded, and whether
    /// they address the object id.
    fn check_search_field(&self, opt: &OpenOption) -> Result<(bool, bool)> {
        let mut established = false;
        let mut object_id_search = false;

        if let Some(n) = opt.search_field_number() {
            if n < 0 {
                return Err(DbError::BadArgument("negative search field count".into()));
            }
            established = true;
            if n > 0 {
                match opt.search_field_index(0) {
                    Some(i) if i >= 1 => {}
                    _ => {
                        return Err(DbError::BadArgument(
                            "search parameters without a leading key index".into(),
                        ))
                    }
                }
            }
        }

        if let Some(n) = opt.fetch_field_number() {
            if n < 1 {
                return Err(DbError::BadArgument("empty fetch field list".into()));
            }
            let first = opt
                .fetch_field_index(0)
                .ok_or_else(|| DbError::BadArgument("missing fetch field index".into()))?;
            if first < 0 {
                return Err(DbError::BadArgument("negative fetch field index".into()));
            }
            if first == 0 {
                if established && !object_id_search {
                    return Err(DbError::BadArgument(
                        "object-id fetch conflicts with key search".into(),
                    ));
                }
                object_id_search = true;
            } else if established && object_id_search {
                return Err(DbError::BadArgument(
                    "key fetch conflicts with object-id search".into(),
                ));
            }
            established = true;
        }

        Ok((established, object_id_search))
    }

    // ------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------

    /// Value of the first operand matching the wanted node type. Asking
    /// for a constant also accepts a variable. "-1" when absent.
    fn operand_value(condition: &TreeNode, wanted: NodeType) -> String {
        for operand in condition.operands() {
            let ty = operand.node_type();
            if wanted == NodeType::ConstantValue {
                if ty == NodeType::ConstantValue || ty == NodeType::Variable {
                    return operand.value().to_string();
                }
            } else if ty == wanted {
                return operand.value().to_string();
            }
        }
        String::from("-1")
    }

    fn operator_of(op_type: NodeType) -> Result<CompOp> {
        Ok(match op_type {
            NodeType::Equals => CompOp::Equals,
            NodeType::GreaterThan => CompOp::GreaterThan,
            NodeType::GreaterThanEquals => CompOp::GreaterThanEquals,
            NodeType::LessThan => CompOp::LessThan,
            NodeType::LessThanEquals => CompOp::LessThanEquals,
            NodeType::EqualsToNull => CompOp::EqualsToNull,
            other => {
                return Err(DbError::Unexpected(format!(
                    "no operator for node type {:?}",
                    other
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DataType;
    use crate::param::file_id::FileId;
    use crate::common::FileIdentity;

    fn make_param(key_types: &[DataType], value_types: &[DataType]) -> FileParameter {
        let id = FileId::new();
        id.set_identity(FileIdentity::new(1, 2, 3));
        let field_num = 1 + key_types.len() + value_types.len();
        id.set_field_number(field_num as i32);
        id.set_key_field_number(key_types.len() as i32);
        id.set_field_type(0, DataType::Unsigned);
        for (i, ty) in key_types.iter().chain(value_types.iter()).enumerate() {
            id.set_field_type(i as i32 + 1, *ty);
            if *ty == DataType::String {
                id.set_field_length(i as i32 + 1, 64);
            }
        }
        FileParameter::from_file_id(&id).unwrap()
    }

    fn two_int_keys() -> FileParameter {
        make_param(&[DataType::Integer, DataType::Integer], &[DataType::String])
    }

    fn cmp(op: NodeType, field: i32, constant: &str) -> TreeNode {
        TreeNode::comparison(op, TreeNode::field(field), TreeNode::constant(constant))
    }

    #[test]
    fn test_scan() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);
        let opt = OpenOption::new();
        assert!(compiler.compile_search(None, &opt)?);
        assert_eq!(opt.open_mode(), Some(OpenMode::Read));
        assert_eq!(opt.read_sub_mode(), Some(ReadSubMode::Scan));
        assert_eq!(opt.search_field_number(), None);
        assert!(!opt.cache_all_object());
        Ok(())
    }

    #[test]
    fn test_single_equality() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);
        let opt = OpenOption::new();
        let cond = cmp(NodeType::Equals, 1, "10");
        assert!(compiler.compile_search(Some(&cond), &opt)?);
        assert_eq!(opt.open_mode(), Some(OpenMode::Search));
        assert_eq!(opt.search_field_number(), Some(1));
        assert_eq!(opt.search_field_index(0), Some(1));
        assert_eq!(opt.search_start(0).as_deref(), Some("10"));
        assert_eq!(opt.search_start_ope(0), Some(CompOp::Equals));
        Ok(())
    }

    #[test]
    fn test_single_on_non_leading_key_is_refused() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);
        let opt = OpenOption::new();
        let cond = cmp(NodeType::Equals, 2, "10");
        assert!(!compiler.compile_search(Some(&cond), &opt)?);
        assert_eq!(opt.search_field_number(), None);
        Ok(())
    }

    #[test]
    fn test_contradictory_range_is_empty_set() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);
        let opt = OpenOption::new();
        let cond = TreeNode::and(vec![
            cmp(NodeType::GreaterThanEquals, 1, "10"),
            cmp(NodeType::LessThanEquals, 1, "5"),
        ]);
        assert!(compiler.compile_search(Some(&cond), &opt)?);
        assert_eq!(opt.open_mode(), Some(OpenMode::Search));
        assert_eq!(opt.search_field_number(), Some(0));
        Ok(())
    }

    #[test]
    fn test_range_rewrites_to_equality() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);
        let opt = OpenOption::new();
        let cond = TreeNode::and(vec![
            cmp(NodeType::GreaterThanEquals, 1, "10"),
            cmp(NodeType::LessThanEquals, 1, "10"),
        ]);
        assert!(compiler.compile_search(Some(&cond), &opt)?);
        assert_eq!(opt.search_field_number(), Some(1));
        assert_eq!(opt.search_field_index(0), Some(1));
        assert_eq!(opt.search_start(0).as_deref(), Some("10"));
        assert_eq!(opt.search_start_ope(0), Some(CompOp::Equals));
        assert_eq!(opt.search_stop(0), None);
        assert_eq!(opt.search_stop_ope(0), None);
        Ok(())
    }

    #[test]
    fn test_multi_field_prefix() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);
        let opt = OpenOption::new();
        let cond = TreeNode::and(vec![
            cmp(NodeType::Equals, 1, "10"),
            cmp(NodeType::GreaterThan, 2, "20"),
        ]);
        assert!(compiler.compile_search(Some(&cond), &opt)?);
        assert_eq!(opt.search_field_number(), Some(2));
        assert_eq!(opt.search_field_index(0), Some(1));
        assert_eq!(opt.search_start_ope(0), Some(CompOp::Equals));
        assert_eq!(opt.search_field_index(1), Some(2));
        assert_eq!(opt.search_start(1).as_deref(), Some("20"));
        assert_eq!(opt.search_start_ope(1), Some(CompOp::GreaterThan));
        Ok(())
    }

    #[test]
    fn test_non_equality_must_be_trailing() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);
        let opt = OpenOption::new();
        let cond = TreeNode::and(vec![
            cmp(NodeType::GreaterThan, 1, "10"),
            cmp(NodeType::Equals, 2, "20"),
        ]);
        assert!(!compiler.compile_search(Some(&cond), &opt)?);
        Ok(())
    }

    #[test]
    fn test_leading_key_must_be_bounded() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);
        let opt = OpenOption::new();
        let cond = TreeNode::and(vec![cmp(NodeType::Equals, 2, "20")]);
        assert!(!compiler.compile_search(Some(&cond), &opt)?);
        Ok(())
    }

    #[test]
    fn test_upper_bound_normalizes_into_start() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);
        let opt = OpenOption::new();
        let cond = TreeNode::and(vec![cmp(NodeType::LessThan, 1, "7")]);
        assert!(compiler.compile_search(Some(&cond), &opt)?);
        assert_eq!(opt.search_field_number(), Some(1));
        assert_eq!(opt.search_start(0).as_deref(), Some("7"));
        assert_eq!(opt.search_start_ope(0), Some(CompOp::LessThan));
        assert_eq!(opt.search_stop_ope(0), None);
        Ok(())
    }

    #[test]
    fn test_same_constant_merges() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);

        // GT then GE on the same constant keeps GT.
        let opt = OpenOption::new();
        let cond = TreeNode::and(vec![
            cmp(NodeType::GreaterThan, 1, "10"),
            cmp(NodeType::GreaterThanEquals, 1, "10"),
        ]);
        assert!(compiler.compile_search(Some(&cond), &opt)?);
        assert_eq!(opt.search_start_ope(0), Some(CompOp::GreaterThan));

        // EQ then GT on the same constant is empty.
        let opt = OpenOption::new();
        let cond = TreeNode::and(vec![
            cmp(NodeType::Equals, 1, "10"),
            cmp(NodeType::GreaterThan, 1, "10"),
        ]);
        assert!(compiler.compile_search(Some(&cond), &opt)?);
        assert_eq!(opt.search_field_number(), Some(0));
        Ok(())
    }

    #[test]
    fn test_different_constant_equality_is_empty() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);
        let opt = OpenOption::new();
        let cond = TreeNode::and(vec![
            cmp(NodeType::Equals, 1, "10"),
            cmp(NodeType::Equals, 1, "11"),
        ]);
        assert!(compiler.compile_search(Some(&cond), &opt)?);
        assert_eq!(opt.search_field_number(), Some(0));
        Ok(())
    }

    #[test]
    fn test_different_constant_same_side_is_illegal() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);
        let opt = OpenOption::new();
        let cond = TreeNode::and(vec![
            cmp(NodeType::GreaterThan, 1, "10"),
            cmp(NodeType::GreaterThanEquals, 1, "20"),
        ]);
        assert!(!compiler.compile_search(Some(&cond), &opt)?);
        Ok(())
    }

    #[test]
    fn test_equals_to_null_on_leading_key() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);
        let opt = OpenOption::new();
        let cond = TreeNode::equals_to_null(TreeNode::field(1));
        assert!(compiler.compile_search(Some(&cond), &opt)?);
        assert_eq!(opt.search_start_ope(0), Some(CompOp::EqualsToNull));
        assert_eq!(opt.search_start(0).as_deref(), Some("0"));

        let opt = OpenOption::new();
        let cond = TreeNode::equals_to_null(TreeNode::field(2));
        assert!(!compiler.compile_search(Some(&cond), &opt)?);
        Ok(())
    }

    #[test]
    fn test_like_on_string_leading_key() -> Result<()> {
        let param = make_param(&[DataType::String], &[DataType::Integer]);
        let compiler = OpenOptionCompiler::new(&param);
        let opt = OpenOption::new();
        let cond = TreeNode::like(
            TreeNode::field(1),
            TreeNode::constant("abc%"),
            Some(TreeNode::constant("\\")),
        );
        assert!(compiler.compile_search(Some(&cond), &opt)?);
        assert_eq!(opt.search_start_ope(0), Some(CompOp::Like));
        assert_eq!(opt.search_start(0).as_deref(), Some("abc%"));
        assert_eq!(opt.escape().as_deref(), Some("\\"));

        // leading wildcard defeats the index
        let opt = OpenOption::new();
        let cond = TreeNode::like(TreeNode::field(1), TreeNode::constant("%abc"), None);
        assert!(!compiler.compile_search(Some(&cond), &opt)?);

        // like on a numeric key cannot be served
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);
        let opt = OpenOption::new();
        let cond = TreeNode::like(TreeNode::field(1), TreeNode::constant("abc"), None);
        assert!(!compiler.compile_search(Some(&cond), &opt)?);
        Ok(())
    }

    #[test]
    fn test_fetch_by_object_id_must_be_alone() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);

        let opt = OpenOption::new();
        let cond = TreeNode::fetch(vec![TreeNode::field(0)]);
        assert!(compiler.compile_search(Some(&cond), &opt)?);
        assert_eq!(opt.open_mode(), Some(OpenMode::Read));
        assert_eq!(opt.read_sub_mode(), Some(ReadSubMode::Fetch));
        assert_eq!(opt.fetch_field_number(), Some(1));
        assert_eq!(opt.fetch_field_index(0), Some(0));

        let opt = OpenOption::new();
        let cond = TreeNode::fetch(vec![TreeNode::field(0), TreeNode::field(1)]);
        assert!(!compiler.compile_search(Some(&cond), &opt)?);
        Ok(())
    }

    #[test]
    fn test_fetch_keys_must_start_at_leading_key() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);

        let opt = OpenOption::new();
        let cond = TreeNode::fetch(vec![TreeNode::field(1), TreeNode::field(2)]);
        assert!(compiler.compile_search(Some(&cond), &opt)?);
        assert_eq!(opt.fetch_field_number(), Some(2));

        let opt = OpenOption::new();
        let cond = TreeNode::fetch(vec![TreeNode::field(2)]);
        assert!(!compiler.compile_search(Some(&cond), &opt)?);
        Ok(())
    }

    #[test]
    fn test_search_then_fetch() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);
        let opt = OpenOption::new();
        let search = cmp(NodeType::Equals, 1, "10");
        assert!(compiler.compile_search(Some(&search), &opt)?);

        // object-id fetch is refused once a key search is in place
        let fetch = TreeNode::fetch(vec![TreeNode::field(0)]);
        assert!(!compiler.compile_search(Some(&fetch), &opt)?);

        let fetch = TreeNode::fetch(vec![TreeNode::field(2)]);
        assert!(compiler.compile_search(Some(&fetch), &opt)?);
        assert_eq!(opt.open_mode(), Some(OpenMode::Search));
        assert_eq!(opt.read_sub_mode(), Some(ReadSubMode::Fetch));
        assert_eq!(opt.fetch_field_index(0), Some(2));
        Ok(())
    }

    #[test]
    fn test_sort_consistency() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);

        // object-id sort after a key search is refused
        let opt = OpenOption::new();
        let search = cmp(NodeType::Equals, 1, "10");
        assert!(compiler.compile_search(Some(&search), &opt)?);
        assert!(!compiler.compile_sort(&[0], &[0], &opt)?);

        // key sort along the declared orders is accepted
        assert!(compiler.compile_sort(&[1, 2], &[0, 0], &opt)?);
        assert_eq!(opt.sort_key(), Some(SortKeySpec::KeyField));
        assert!(!opt.sort_reverse());

        // fully reversed request flips the direction
        let opt = OpenOption::new();
        assert!(compiler.compile_sort(&[1, 2], &[1, 1], &opt)?);
        assert!(opt.sort_reverse());

        // mixed directions cannot be served
        let opt = OpenOption::new();
        assert!(!compiler.compile_sort(&[1, 2], &[0, 1], &opt)?);

        // sort by object id then search by key is refused
        let opt = OpenOption::new();
        assert!(compiler.compile_sort(&[0], &[0], &opt)?);
        let search = cmp(NodeType::Equals, 1, "10");
        assert!(!compiler.compile_search(Some(&search), &opt)?);
        Ok(())
    }

    #[test]
    fn test_projection_targets() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);
        let opt = OpenOption::new();
        assert!(compiler.compile_target(&[2, 3], &opt, OpenMode::Read)?);
        assert!(opt.field_select());
        assert_eq!(opt.target_fields(), Some(vec![2, 3]));
        assert_eq!(opt.open_mode(), Some(OpenMode::Read));

        // updating the object id is refused
        let opt = OpenOption::new();
        assert!(!compiler.compile_target(&[0], &opt, OpenMode::Update)?);

        // out-of-range index is a caller error
        let opt = OpenOption::new();
        assert!(compiler.compile_target(&[9], &opt, OpenMode::Read).is_err());
        Ok(())
    }

    #[test]
    fn test_unserveable_leaves_option_unchanged() -> Result<()> {
        let param = two_int_keys();
        let compiler = OpenOptionCompiler::new(&param);
        let opt = OpenOption::new();
        let cond = TreeNode::and(vec![
            cmp(NodeType::GreaterThan, 1, "10"),
            cmp(NodeType::LessThan, 2, "20"),
        ]);
        assert!(!compiler.compile_search(Some(&cond), &opt)?);
        assert_eq!(opt.open_mode(), None);
        assert_eq!(opt.search_field_number(), None);
        Ok(())
    }
}
