// End-to-end tests across the driver, compiler, merge and execution
// layers.

use std::sync::Arc;
use std::time::Duration;

use trellis_db::common::{DataType, FileIdentity, Tuple, Value};
use trellis_db::driver::btree::BtreeFile;
use trellis_db::driver::inverted::InvertedFile;
use trellis_db::driver::treenode::{NodeType, TreeNode};
use trellis_db::driver::FileDriver;
use trellis_db::execution::collection::QueueCollection;
use trellis_db::execution::file_access::FileAccess;
use trellis_db::execution::iterator::file_input::FileInput;
use trellis_db::execution::iterator::input::Input;
use trellis_db::execution::iterator::IteratorNode;
use trellis_db::execution::operator::limit::Limit;
use trellis_db::execution::operator::output::Output;
use trellis_db::execution::Program;
use trellis_db::lockmap::PageLockRegistry;
use trellis_db::merge::control::DaemonControl;
use trellis_db::merge::{MergeConfig, MergeFile, MergeReserve, MergeScheduler};
use trellis_db::param::file_id::FileId;
use trellis_db::param::open_option::{CompOp, OpenMode, OpenOption, ReadSubMode};
use trellis_db::schema::{Database, SchemaCache, Table};
use trellis_db::server::protocol::WireStatus;
use trellis_db::server::{InstanceManagerTable, Worker};
use trellis_db::transaction::{Category, IsolationLevel, TransactionManager};

fn btree_two_keys() -> Arc<BtreeFile> {
    let id = FileId::new();
    id.set_identity(FileIdentity::new(1, 2, 3));
    id.set_field_number(4);
    id.set_key_field_number(2);
    id.set_field_type(0, DataType::Unsigned);
    id.set_field_type(1, DataType::Integer);
    id.set_field_type(2, DataType::Integer);
    id.set_field_type(3, DataType::String);
    id.set_field_length(3, 64);
    Arc::new(BtreeFile::new(id, Arc::new(PageLockRegistry::new())).unwrap())
}

fn cmp(op: NodeType, field: i32, constant: &str) -> TreeNode {
    TreeNode::comparison(op, TreeNode::field(field), TreeNode::constant(constant))
}

#[test]
fn compiler_scenarios_against_the_driver() {
    let file = btree_two_keys();

    // Scan: no predicate.
    let opt = OpenOption::new();
    assert!(file.get_search_parameter(None, &opt).unwrap());
    assert_eq!(opt.open_mode(), Some(OpenMode::Read));
    assert_eq!(opt.read_sub_mode(), Some(ReadSubMode::Scan));
    assert_eq!(opt.search_field_number(), None);

    // Single equality: a = 10.
    let opt = OpenOption::new();
    let cond = cmp(NodeType::Equals, 1, "10");
    assert!(file.get_search_parameter(Some(&cond), &opt).unwrap());
    assert_eq!(opt.search_field_number(), Some(1));
    assert_eq!(opt.search_field_index(0), Some(1));
    assert_eq!(opt.search_start(0).as_deref(), Some("10"));
    assert_eq!(opt.search_start_ope(0), Some(CompOp::Equals));

    // Contradictory range: a >= 10 and a <= 5.
    let opt = OpenOption::new();
    let cond = TreeNode::and(vec![
        cmp(NodeType::GreaterThanEquals, 1, "10"),
        cmp(NodeType::LessThanEquals, 1, "5"),
    ]);
    assert!(file.get_search_parameter(Some(&cond), &opt).unwrap());
    assert_eq!(opt.open_mode(), Some(OpenMode::Search));
    assert_eq!(opt.search_field_number(), Some(0));

    // Range rewritten to equality: a >= 10 and a <= 10.
    let opt = OpenOption::new();
    let cond = TreeNode::and(vec![
        cmp(NodeType::GreaterThanEquals, 1, "10"),
        cmp(NodeType::LessThanEquals, 1, "10"),
    ]);
    assert!(file.get_search_parameter(Some(&cond), &opt).unwrap());
    assert_eq!(opt.search_field_index(0), Some(1));
    assert_eq!(opt.search_start(0).as_deref(), Some("10"));
    assert_eq!(opt.search_start_ope(0), Some(CompOp::Equals));
    assert_eq!(opt.search_stop(0), None);

    // Multi-field prefix: a = 10 and b > 20.
    let opt = OpenOption::new();
    let cond = TreeNode::and(vec![
        cmp(NodeType::Equals, 1, "10"),
        cmp(NodeType::GreaterThan, 2, "20"),
    ]);
    assert!(file.get_search_parameter(Some(&cond), &opt).unwrap());
    assert_eq!(opt.search_field_number(), Some(2));
    assert_eq!(opt.search_start_ope(1), Some(CompOp::GreaterThan));
}

#[test]
fn merge_reserve_dedupes_and_refreshes() {
    let reserve = MergeReserve::new(Duration::from_secs(30));
    let file = FileIdentity::new(1, 2, 9);

    assert!(reserve.push_back(file, 0));
    std::thread::sleep(Duration::from_millis(15));
    let age_before = reserve.touched_elapsed(file, 0).unwrap();

    // The second push is refused but refreshes the timestamp.
    assert!(!reserve.push_back(file, 0));
    assert_eq!(reserve.len(), 1);
    let age_after = reserve.touched_elapsed(file, 0).unwrap();
    assert!(age_after < age_before);
}

#[test]
fn merge_daemon_applies_deltas() {
    let identity = FileIdentity::new(1, 2, 3);
    let schema = Arc::new(SchemaCache::new());
    let transactions = Arc::new(TransactionManager::new());
    let daemons = Arc::new(DaemonControl::new());

    let config = MergeConfig {
        interval: Duration::from_millis(1),
        poll: Duration::from_millis(10),
        lock_timeout: Duration::from_millis(200),
    };
    let scheduler = MergeScheduler::new(
        Arc::clone(&schema),
        Arc::clone(&transactions),
        daemons,
        config,
    );

    let id = FileId::new();
    id.set_identity(identity);
    id.set_field_number(3);
    id.set_key_field_number(1);
    id.set_field_type(0, DataType::Unsigned);
    id.set_field_type(1, DataType::String);
    id.set_field_length(1, 256);
    id.set_field_type(2, DataType::Integer);
    let file = Arc::new(InvertedFile::new(id, Some(scheduler.reserve())).unwrap());

    let database = Database::new(1, "main");
    let table = Table::new(2, "docs");
    table.register_merge_file(3, Arc::clone(&file) as Arc<dyn MergeFile>);
    database.add_table(table);
    schema.add_database(database);

    // Enough single-term documents to seal a delta and enqueue the file.
    let trans = transactions.begin(1, Category::ReadWrite, IsolationLevel::ReadCommitted);
    file.create(&trans).unwrap();
    let opt = OpenOption::new();
    opt.set_open_mode(OpenMode::Update);
    file.open(&trans, &opt).unwrap();
    for i in 0..70 {
        let mut t = vec![
            Value::Null,
            Value::String("merge target".into()),
            Value::Integer(i),
        ];
        file.insert(&mut t).unwrap();
    }
    file.close();
    trans.commit().unwrap();
    assert!(file.pending_deltas() >= 1);

    scheduler.start();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while file.pending_deltas() > 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    scheduler.stop();

    assert_eq!(file.pending_deltas(), 0);
    // Merged postings answer searches without consulting deltas.
    let trans = transactions.begin(1, Category::ReadOnly, IsolationLevel::ReadCommitted);
    let cond = cmp(NodeType::Equals, 1, "merge");
    let opt = OpenOption::new();
    assert!(file.get_search_parameter(Some(&cond), &opt).unwrap());
    file.open(&trans, &opt).unwrap();
    let mut t = Tuple::new();
    let mut count = 0;
    while file.get(&mut t).unwrap() {
        count += 1;
    }
    file.close();
    assert_eq!(count, 70);
}

#[test]
fn pipeline_scan_into_limited_output() {
    let file = btree_two_keys();
    let transactions = TransactionManager::new();
    let trans = transactions.begin(1, Category::ReadWrite, IsolationLevel::ReadCommitted);
    file.create(&trans).unwrap();
    let opt = OpenOption::new();
    opt.set_open_mode(OpenMode::Update);
    file.open(&trans, &opt).unwrap();
    for i in 0..10 {
        let mut t = vec![
            Value::Null,
            Value::Integer(i),
            Value::Integer(i * 2),
            Value::String(format!("row{}", i)),
        ];
        file.insert(&mut t).unwrap();
    }
    file.close();

    // Scan the file into a collection, then read it back with a limit.
    let program = Program::new();
    program.set_transaction(trans);

    let opt = OpenOption::new();
    file.get_search_parameter(None, &opt).unwrap();
    let access = program.register_file_access(FileAccess::new(
        Arc::clone(&file) as Arc<dyn FileDriver>,
        opt,
    ));
    let staging = program.register_collection(Box::new(QueueCollection::new()));
    let mut scan = FileInput::new(access);
    let out = program.register_action(Box::new(Output::new(staging)));
    scan.add_action(out);
    let scan = program.register_iterator(Box::new(scan));
    program.execute_iterator(scan).unwrap();

    let mut reader = Input::new(staging);
    let limit = program.register_action(Box::new(Limit::new(2, 3)));
    reader.add_action(limit);
    let reader = program.register_iterator(Box::new(reader));
    program.initialize_iterator(reader).unwrap();
    let mut rows = Vec::new();
    while let Some(t) = program.next_tuple(reader).unwrap() {
        rows.push(t);
    }

    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][1], Value::Integer(2));
    assert_eq!(rows[2][1], Value::Integer(4));
}

#[test]
fn worker_translates_cancellation() {
    let table = InstanceManagerTable::new();
    let manager = table.attach();
    let transactions = Arc::new(TransactionManager::new());
    let session = manager.begin_session("main".into(), "frank".into());
    let worker = Worker::new(Arc::clone(&manager), Arc::clone(&transactions));

    let program = Program::new();
    let rows: Vec<Tuple> = (0..100).map(|i| vec![Value::Integer(i)]).collect();
    let root = program.register_iterator(Box::new(
        trellis_db::execution::iterator::tuples::Tuples::new(rows),
    ));

    // A cancel request arriving before the statement runs surfaces as a
    // Canceled status, not an error.
    manager.cancel_worker(worker.id());
    let response = worker.run_program(session.id(), &program, root);
    assert_eq!(response.status, WireStatus::Canceled);
}
