use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use tempfile::NamedTempFile;

use cobaltdb::storage::buffer::BufferPoolManager;
use cobaltdb::transaction::{
    IsolationLevel, LockManager, LockManagerConfig, TransactionManager, TransactionState,
};
use cobaltdb::execution::{Catalog, DataValue, Executor, ExecutorContext, Schema, Tuple};
use cobaltdb::execution::operators::{
    AggregateExecutor, AggregateExpr, AggregateFunction, DeleteExecutor, IndexScanExecutor,
    InsertExecutor, JoinType, NestedLoopJoinExecutor, OrderDirection, SeqScanExecutor, SortExecutor,
};

mod common;
use common::create_test_buffer_pool;

struct TestDb {
    buffer_pool: Arc<BufferPoolManager>,
    catalog: Arc<Catalog>,
    lock_manager: Arc<LockManager>,
    txn_manager: Arc<TransactionManager>,
    _temp_file: NamedTempFile,
}

fn setup() -> Result<TestDb> {
    let (buffer_pool, temp_file) = create_test_buffer_pool(128)?;
    let catalog = Arc::new(Catalog::new(buffer_pool.clone()));
    let lock_manager = Arc::new(LockManager::new(LockManagerConfig {
        detection_interval: Duration::from_millis(20),
    }));
    let txn_manager = Arc::new(TransactionManager::new(lock_manager.clone()));
    Ok(TestDb {
        buffer_pool,
        catalog,
        lock_manager,
        txn_manager,
        _temp_file: temp_file,
    })
}

fn ctx(db: &TestDb, isolation: IsolationLevel) -> ExecutorContext {
    ExecutorContext::new(
        db.catalog.clone(),
        db.lock_manager.clone(),
        db.txn_manager.begin(isolation),
    )
}

fn row(id: i64, name: &str, value: f64) -> Tuple {
    Tuple::new(vec![
        DataValue::Integer(id),
        DataValue::Text(name.to_string()),
        DataValue::Float(value),
    ])
}

fn items_schema() -> Schema {
    Schema::new(vec!["id".into(), "name".into(), "value".into()])
}

fn insert_rows(db: &TestDb, table: &str, rows: Vec<Tuple>) -> Result<i64> {
    let ctx = ctx(db, IsolationLevel::RepeatableRead);
    let txn = ctx.txn.clone();
    let mut executor = Executor::Insert(InsertExecutor::new(ctx, table, rows)?);
    executor.init()?;
    let (out, _) = executor.next()?.expect("insert emits a count");
    db.txn_manager.commit(&txn)?;
    match out.value(0) {
        Some(DataValue::Integer(n)) => Ok(*n),
        _ => panic!("unexpected insert output"),
    }
}

fn collect(executor: &mut Executor) -> Result<Vec<Tuple>> {
    let mut rows = Vec::new();
    while let Some((tuple, _rid)) = executor.next()? {
        rows.push(tuple);
    }
    Ok(rows)
}

#[test]
fn test_insert_and_seq_scan() -> Result<()> {
    let db = setup()?;
    db.catalog.create_table("items", items_schema())?;

    let inserted = insert_rows(
        &db,
        "items",
        vec![row(1, "a", 1.5), row(2, "b", 2.5), row(3, "c", 3.5)],
    )?;
    assert_eq!(inserted, 3);

    let scan_ctx = ctx(&db, IsolationLevel::RepeatableRead);
    let txn = scan_ctx.txn.clone();
    let table_id = db.catalog.table("items")?.table_id;

    let mut scan = Executor::SeqScan(SeqScanExecutor::new(scan_ctx, "items")?);
    scan.init()?;
    let rows = collect(&mut scan)?;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].value(0), Some(&DataValue::Integer(1)));

    // Repeatable-read keeps IS on the table and S on every scanned row
    assert!(txn.intention_shared_table_locks().contains(&table_id));
    assert_eq!(txn.shared_row_locks(table_id).len(), 3);

    db.txn_manager.commit(&txn)?;
    Ok(())
}

#[test]
fn test_read_committed_releases_row_locks_as_scan_advances() -> Result<()> {
    let db = setup()?;
    db.catalog.create_table("items", items_schema())?;
    insert_rows(&db, "items", vec![row(1, "a", 1.0), row(2, "b", 2.0)])?;

    let scan_ctx = ctx(&db, IsolationLevel::ReadCommitted);
    let txn = scan_ctx.txn.clone();
    let table_id = db.catalog.table("items")?.table_id;

    let mut scan = Executor::SeqScan(SeqScanExecutor::new(scan_ctx, "items")?);
    scan.init()?;

    scan.next()?.expect("first row");
    assert_eq!(txn.shared_row_locks(table_id).len(), 1);

    // Consuming the second row releases the first row's S lock
    scan.next()?.expect("second row");
    assert_eq!(txn.shared_row_locks(table_id).len(), 1);

    db.txn_manager.commit(&txn)?;
    Ok(())
}

#[test]
fn test_read_uncommitted_scan_takes_no_locks() -> Result<()> {
    let db = setup()?;
    db.catalog.create_table("items", items_schema())?;
    insert_rows(&db, "items", vec![row(1, "a", 1.0)])?;

    let scan_ctx = ctx(&db, IsolationLevel::ReadUncommitted);
    let txn = scan_ctx.txn.clone();
    let table_id = db.catalog.table("items")?.table_id;

    let mut scan = Executor::SeqScan(SeqScanExecutor::new(scan_ctx, "items")?);
    scan.init()?;
    let rows = collect(&mut scan)?;
    assert_eq!(rows.len(), 1);

    assert!(txn.intention_shared_table_locks().is_empty());
    assert!(txn.shared_row_locks(table_id).is_empty());

    db.txn_manager.commit(&txn)?;
    Ok(())
}

#[test]
fn test_index_scan_reads_through_heap() -> Result<()> {
    let db = setup()?;
    db.catalog.create_table("items", items_schema())?;
    insert_rows(
        &db,
        "items",
        vec![row(30, "c", 3.0), row(10, "a", 1.0), row(20, "b", 2.0)],
    )?;
    db.catalog.create_index("items", "items_by_id", 0)?;

    let scan_ctx = ctx(&db, IsolationLevel::RepeatableRead);
    let txn = scan_ctx.txn.clone();

    // Full index scan comes back in key order
    let mut scan = Executor::IndexScan(IndexScanExecutor::new(
        scan_ctx.clone(),
        "items",
        "items_by_id",
        None,
    )?);
    scan.init()?;
    let rows = collect(&mut scan)?;
    let ids: Vec<_> = rows
        .iter()
        .map(|t| match t.value(0) {
            Some(DataValue::Integer(id)) => *id,
            _ => panic!("bad id"),
        })
        .collect();
    assert_eq!(ids, vec![10, 20, 30]);

    // Range scan from a lower bound
    let mut scan = Executor::IndexScan(IndexScanExecutor::new(
        scan_ctx,
        "items",
        "items_by_id",
        Some(15),
    )?);
    scan.init()?;
    let rows = collect(&mut scan)?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].value(0), Some(&DataValue::Integer(20)));

    db.txn_manager.commit(&txn)?;
    Ok(())
}

#[test]
fn test_delete_removes_rows_and_index_entries() -> Result<()> {
    let db = setup()?;
    db.catalog.create_table("items", items_schema())?;
    insert_rows(
        &db,
        "items",
        vec![row(1, "a", 1.0), row(2, "b", 2.0), row(3, "c", 3.0)],
    )?;
    db.catalog.create_index("items", "items_by_id", 0)?;

    let delete_ctx = ctx(&db, IsolationLevel::RepeatableRead);
    let txn = delete_ctx.txn.clone();

    let child = Executor::SeqScan(SeqScanExecutor::new(delete_ctx.clone(), "items")?);
    let mut delete = Executor::Delete(DeleteExecutor::new(delete_ctx, "items", Box::new(child))?);
    delete.init()?;
    let (out, _) = delete.next()?.expect("delete emits a count");
    assert_eq!(out.value(0), Some(&DataValue::Integer(3)));
    db.txn_manager.commit(&txn)?;

    // Both the heap and the index are empty afterwards
    let scan_ctx = ctx(&db, IsolationLevel::RepeatableRead);
    let txn = scan_ctx.txn.clone();
    let mut scan = Executor::SeqScan(SeqScanExecutor::new(scan_ctx.clone(), "items")?);
    scan.init()?;
    assert!(collect(&mut scan)?.is_empty());

    let mut index_scan = Executor::IndexScan(IndexScanExecutor::new(
        scan_ctx,
        "items",
        "items_by_id",
        None,
    )?);
    index_scan.init()?;
    assert!(collect(&mut index_scan)?.is_empty());

    db.txn_manager.commit(&txn)?;
    Ok(())
}

#[test]
fn test_sort_descending() -> Result<()> {
    let db = setup()?;
    db.catalog.create_table("items", items_schema())?;
    insert_rows(
        &db,
        "items",
        vec![row(2, "b", 2.0), row(3, "c", 3.0), row(1, "a", 1.0)],
    )?;

    let sort_ctx = ctx(&db, IsolationLevel::RepeatableRead);
    let txn = sort_ctx.txn.clone();

    let child = Executor::SeqScan(SeqScanExecutor::new(sort_ctx, "items")?);
    let mut sort = Executor::Sort(SortExecutor::new(
        Box::new(child),
        vec![(0, OrderDirection::Descending)],
    ));
    sort.init()?;
    let rows = collect(&mut sort)?;
    let ids: Vec<_> = rows
        .iter()
        .map(|t| match t.value(0) {
            Some(DataValue::Integer(id)) => *id,
            _ => panic!("bad id"),
        })
        .collect();
    assert_eq!(ids, vec![3, 2, 1]);

    db.txn_manager.commit(&txn)?;
    Ok(())
}

#[test]
fn test_aggregation_with_groups() -> Result<()> {
    let db = setup()?;
    db.catalog.create_table("items", items_schema())?;
    insert_rows(
        &db,
        "items",
        vec![
            row(1, "red", 10.0),
            row(2, "red", 20.0),
            row(3, "blue", 5.0),
        ],
    )?;

    let agg_ctx = ctx(&db, IsolationLevel::RepeatableRead);
    let txn = agg_ctx.txn.clone();

    let child = Executor::SeqScan(SeqScanExecutor::new(agg_ctx, "items")?);
    let mut agg = Executor::Aggregate(AggregateExecutor::new(
        Box::new(child),
        vec![1], // group by name
        vec![
            AggregateExpr { function: AggregateFunction::CountStar, column: 0 },
            AggregateExpr { function: AggregateFunction::Sum, column: 2 },
            AggregateExpr { function: AggregateFunction::Min, column: 0 },
            AggregateExpr { function: AggregateFunction::Max, column: 0 },
        ],
    ));
    agg.init()?;
    let rows = collect(&mut agg)?;
    assert_eq!(rows.len(), 2);

    let red = rows
        .iter()
        .find(|t| t.value(0) == Some(&DataValue::Text("red".into())))
        .expect("red group");
    assert_eq!(red.value(1), Some(&DataValue::Integer(2)));
    assert_eq!(red.value(2), Some(&DataValue::Float(30.0)));
    assert_eq!(red.value(3), Some(&DataValue::Integer(1)));
    assert_eq!(red.value(4), Some(&DataValue::Integer(2)));

    db.txn_manager.commit(&txn)?;
    Ok(())
}

#[test]
fn test_aggregation_over_empty_input() -> Result<()> {
    let db = setup()?;
    db.catalog.create_table("items", items_schema())?;

    // No group-by: one tuple, count(*) = 0 and NULL elsewhere
    let agg_ctx = ctx(&db, IsolationLevel::RepeatableRead);
    let txn = agg_ctx.txn.clone();
    let child = Executor::SeqScan(SeqScanExecutor::new(agg_ctx.clone(), "items")?);
    let mut agg = Executor::Aggregate(AggregateExecutor::new(
        Box::new(child),
        vec![],
        vec![
            AggregateExpr { function: AggregateFunction::CountStar, column: 0 },
            AggregateExpr { function: AggregateFunction::Sum, column: 2 },
        ],
    ));
    agg.init()?;
    let rows = collect(&mut agg)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value(0), Some(&DataValue::Integer(0)));
    assert_eq!(rows[0].value(1), Some(&DataValue::Null));

    // With group-by columns an empty input stays empty
    let child = Executor::SeqScan(SeqScanExecutor::new(agg_ctx, "items")?);
    let mut agg = Executor::Aggregate(AggregateExecutor::new(
        Box::new(child),
        vec![1],
        vec![AggregateExpr { function: AggregateFunction::CountStar, column: 0 }],
    ));
    agg.init()?;
    assert!(collect(&mut agg)?.is_empty());

    db.txn_manager.commit(&txn)?;
    Ok(())
}

#[test]
fn test_nested_loop_join() -> Result<()> {
    let db = setup()?;
    db.catalog.create_table("left_t", Schema::new(vec!["id".into(), "tag".into()]))?;
    db.catalog.create_table("right_t", Schema::new(vec!["id".into(), "score".into()]))?;

    insert_rows(
        &db,
        "left_t",
        vec![
            Tuple::new(vec![DataValue::Integer(1), DataValue::Text("a".into())]),
            Tuple::new(vec![DataValue::Integer(2), DataValue::Text("b".into())]),
            Tuple::new(vec![DataValue::Integer(3), DataValue::Text("c".into())]),
        ],
    )?;
    insert_rows(
        &db,
        "right_t",
        vec![
            Tuple::new(vec![DataValue::Integer(1), DataValue::Float(0.5)]),
            Tuple::new(vec![DataValue::Integer(3), DataValue::Float(0.7)]),
        ],
    )?;

    let join_ctx = ctx(&db, IsolationLevel::RepeatableRead);
    let txn = join_ctx.txn.clone();

    let on_id = |l: &Tuple, r: &Tuple| l.value(0) == r.value(0);

    // Inner join keeps only matching ids
    let left = Executor::SeqScan(SeqScanExecutor::new(join_ctx.clone(), "left_t")?);
    let right = Executor::SeqScan(SeqScanExecutor::new(join_ctx.clone(), "right_t")?);
    let mut join = Executor::NestedLoopJoin(NestedLoopJoinExecutor::new(
        Box::new(left),
        Box::new(right),
        JoinType::Inner,
        Box::new(on_id),
        2,
    ));
    join.init()?;
    let rows = collect(&mut join)?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].values.len(), 4);

    // Left join pads unmatched left rows with NULLs
    let left = Executor::SeqScan(SeqScanExecutor::new(join_ctx.clone(), "left_t")?);
    let right = Executor::SeqScan(SeqScanExecutor::new(join_ctx, "right_t")?);
    let mut join = Executor::NestedLoopJoin(NestedLoopJoinExecutor::new(
        Box::new(left),
        Box::new(right),
        JoinType::Left,
        Box::new(on_id),
        2,
    ));
    join.init()?;
    let rows = collect(&mut join)?;
    assert_eq!(rows.len(), 3);
    let unmatched = rows
        .iter()
        .find(|t| t.value(0) == Some(&DataValue::Integer(2)))
        .expect("left row 2 present");
    assert_eq!(unmatched.value(2), Some(&DataValue::Null));
    assert_eq!(unmatched.value(3), Some(&DataValue::Null));

    db.txn_manager.commit(&txn)?;
    Ok(())
}

#[test]
fn test_lock_failure_aborts_through_executor() -> Result<()> {
    let db = setup()?;
    db.catalog.create_table("items", items_schema())?;
    insert_rows(&db, "items", vec![row(1, "a", 1.0)])?;

    // Drive the transaction into shrinking, then let a scan trip over it
    let scan_ctx = ctx(&db, IsolationLevel::RepeatableRead);
    let txn = scan_ctx.txn.clone();
    let other_table = 77;
    db.lock_manager
        .lock_table(&txn, cobaltdb::transaction::LockMode::Shared, other_table)?;
    db.lock_manager.unlock_table(&txn, other_table)?;
    assert_eq!(txn.state(), TransactionState::Shrinking);

    let mut scan = Executor::SeqScan(SeqScanExecutor::new(scan_ctx, "items")?);
    assert!(scan.init().is_err());
    assert_eq!(txn.state(), TransactionState::Aborted);
    db.txn_manager.abort(&txn)?;

    Ok(())
}

#[test]
fn test_insert_visible_after_commit_only_via_fresh_scan() -> Result<()> {
    let db = setup()?;
    db.catalog.create_table("items", items_schema())?;
    insert_rows(&db, "items", vec![row(1, "a", 1.0)])?;

    // The buffer pool still serves consistent data after a flush cycle
    db.buffer_pool.flush_all_pages()?;

    let scan_ctx = ctx(&db, IsolationLevel::RepeatableRead);
    let txn = scan_ctx.txn.clone();
    let mut scan = Executor::SeqScan(SeqScanExecutor::new(scan_ctx, "items")?);
    scan.init()?;
    assert_eq!(collect(&mut scan)?.len(), 1);
    db.txn_manager.commit(&txn)?;
    Ok(())
}
