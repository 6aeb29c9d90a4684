//! End-to-end scenarios driven through the SQL front end and the
//! engine, against a real on-disk database in a temp directory.

use liminaldb_core::db::ops::OpResult;
use liminaldb_core::error::{ConstraintError, DBError, TableError};
use liminaldb_core::sql;
use liminaldb_core::{DbPath, Engine};
use liminaldb_lib::value::Value;
use std::thread;

struct Fixture {
    _dir: tempfile::TempDir,
    db: DbPath,
    engine: Engine,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db = DbPath::new(dir.path().join("db"));
    let engine = Engine::start(db.clone()).unwrap();
    Fixture { _dir: dir, db, engine }
}

/// Runs a batch and returns the structured per-operation outcomes.
fn run(engine: &Engine, text: &str) -> Vec<Result<OpResult, DBError>> {
    let batch = sql::compile_batch(text).unwrap();
    engine.exec(batch.ops, batch.finish).unwrap()
}

fn ok(engine: &Engine, text: &str) -> Vec<OpResult> {
    run(engine, text)
        .into_iter()
        .map(|r| r.expect("operation should succeed"))
        .collect()
}

fn query_rows(result: &OpResult) -> &[Vec<Value>] {
    match result {
        OpResult::Query { rows, .. } => rows,
        OpResult::Snapshot(table) => &table.rows,
        other => panic!("expected a query result, got {other:?}"),
    }
}

#[test]
fn create_insert_select() {
    let f = fixture();
    ok(&f.engine, "CREATE TABLE users (id int primary key, name string(50))");
    ok(&f.engine, "INSERT INTO users (id, name) VALUES (1, 'Alice')");

    let results = ok(&f.engine, "SELECT id, name FROM users WHERE id = 1");
    let OpResult::Query { columns, rows } = &results[0] else {
        panic!("expected query result");
    };
    assert_eq!(columns, &["id".to_string(), "name".to_string()]);
    assert_eq!(rows, &[vec![Value::Int64(1), Value::Str("Alice".into())]]);

    // Metadata: pk int64 non-null, name nullable string(50).
    let results = ok(&f.engine, "SHOW COLUMNS FROM users");
    let OpResult::Metadata(schema) = &results[0] else {
        panic!("expected metadata");
    };
    assert!(schema.columns[0].primary_key && !schema.columns[0].nullable);
    assert_eq!(schema.columns[1].type_name(), "string(50)");
    assert!(schema.columns[1].nullable);
}

#[test]
fn duplicate_primary_key_is_rejected() {
    let f = fixture();
    ok(&f.engine, "CREATE TABLE users (id int primary key, name string(50))");
    ok(&f.engine, "INSERT INTO users (id, name) VALUES (1, 'Alice')");

    let results = run(&f.engine, "INSERT INTO users (id, name) VALUES (1, 'Bob')");
    assert!(matches!(
        results[0],
        Err(DBError::Constraint(ConstraintError::PrimaryKeyViolation { .. }))
    ));

    let results = ok(&f.engine, "SELECT * FROM users");
    assert_eq!(query_rows(&results[0]).len(), 1);
    assert_eq!(query_rows(&results[0])[0][1], Value::Str("Alice".into()));
}

#[test]
fn foreign_key_blocks_delete() {
    let f = fixture();
    ok(&f.engine, "CREATE TABLE customers (cid int primary key, name string(20))");
    ok(
        &f.engine,
        "CREATE TABLE orders (oid int primary key, customer_id int, \
         FOREIGN KEY (customer_id) REFERENCES customers(cid))",
    );
    ok(&f.engine, "INSERT INTO customers (cid, name) VALUES (1, 'Acme')");
    ok(&f.engine, "INSERT INTO orders (oid, customer_id) VALUES (10, 1)");

    let results = run(&f.engine, "DELETE FROM customers WHERE cid = 1");
    assert!(matches!(
        results[0],
        Err(DBError::Constraint(ConstraintError::ForeignKeyDelete { .. }))
    ));

    let results = ok(&f.engine, "SELECT * FROM customers");
    assert_eq!(query_rows(&results[0]).len(), 1, "customer row remains");

    // Dropping the constraint unblocks the delete.
    ok(&f.engine, "ALTER TABLE orders DROP CONSTRAINT fk_orders_customers");
    let results = ok(&f.engine, "DELETE FROM customers WHERE cid = 1");
    assert!(matches!(results[0], OpResult::RowsAffected(1)));
}

#[test]
fn foreign_key_blocks_insert_without_parent() {
    let f = fixture();
    ok(&f.engine, "CREATE TABLE customers (cid int primary key)");
    ok(
        &f.engine,
        "CREATE TABLE orders (oid int primary key, customer_id int, \
         FOREIGN KEY (customer_id) REFERENCES customers(cid))",
    );
    let results = run(&f.engine, "INSERT INTO orders (oid, customer_id) VALUES (10, 7)");
    assert!(matches!(
        results[0],
        Err(DBError::Constraint(ConstraintError::ForeignKeyInsert { .. }))
    ));
}

#[test]
fn transaction_commit_persists() {
    let f = fixture();
    ok(
        &f.engine,
        "BEGIN TRAN; CREATE TABLE tx_users (id int primary key, name string(50)); \
         INSERT INTO tx_users (id, name) VALUES (1, 'Alice'); COMMIT",
    );
    assert!(f.db.table_file("tx_users").exists());

    let results = ok(&f.engine, "SELECT * FROM tx_users");
    assert_eq!(
        query_rows(&results[0]),
        &[vec![Value::Int64(1), Value::Str("Alice".into())]]
    );
}

#[test]
fn transaction_rollback_discards() {
    let f = fixture();
    ok(
        &f.engine,
        "BEGIN TRAN; CREATE TABLE tx_users (id int primary key, name string(50)); \
         INSERT INTO tx_users (id, name) VALUES (1, 'Alice'); ROLLBACK",
    );
    assert!(!f.db.table_file("tx_users").exists());

    let results = run(&f.engine, "SELECT * FROM tx_users");
    assert!(matches!(
        results[0],
        Err(DBError::Table(TableError::NotFound(_)))
    ));
}

#[test]
fn rollback_leaves_files_byte_identical() {
    let f = fixture();
    ok(&f.engine, "CREATE TABLE t (id int primary key, name string(20))");
    ok(&f.engine, "INSERT INTO t (id, name) VALUES (1, 'before')");
    let before = std::fs::read(f.db.table_file("t")).unwrap();

    ok(
        &f.engine,
        "BEGIN TRAN; INSERT INTO t (id, name) VALUES (2, 'after'); \
         UPDATE t SET name = 'changed' WHERE id = 1; ROLLBACK",
    );
    assert_eq!(std::fs::read(f.db.table_file("t")).unwrap(), before);
}

#[test]
fn error_mid_batch_rolls_back_earlier_work() {
    let f = fixture();
    ok(&f.engine, "CREATE TABLE t (id int primary key)");
    // Second insert violates the primary key; the first must not stick.
    let results = run(
        &f.engine,
        "INSERT INTO t (id) VALUES (1); INSERT INTO t (id) VALUES (1); INSERT INTO t (id) VALUES (2)",
    );
    assert_eq!(results.len(), 2, "execution stops at the failing op");
    assert!(results[0].is_ok());
    assert!(results[1].is_err());

    let results = ok(&f.engine, "SELECT * FROM t");
    assert_eq!(query_rows(&results[0]).len(), 0);
}

#[test]
fn fifty_concurrent_inserts_all_land() {
    let f = fixture();
    ok(&f.engine, "CREATE TABLE counters (id int primary key, label string(16))");

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let engine = f.engine.clone();
            thread::spawn(move || {
                let text = format!("INSERT INTO counters (id, label) VALUES ({i}, 'worker-{i}')");
                let batch = sql::compile_batch(&text).unwrap();
                let results = engine.exec(batch.ops, batch.finish).unwrap();
                assert!(results[0].is_ok(), "insert {i} failed: {:?}", results[0]);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let results = ok(&f.engine, "SELECT * FROM counters");
    let rows = query_rows(&results[0]);
    assert_eq!(rows.len(), 50);
    let mut ids: Vec<i64> = rows
        .iter()
        .map(|row| match row[0] {
            Value::Int64(v) => v,
            ref other => panic!("unexpected id {other:?}"),
        })
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..50).collect::<Vec<i64>>());
}

#[test]
fn expression_precedence() {
    let f = fixture();
    ok(&f.engine, "CREATE TABLE nums (value int primary key)");
    ok(&f.engine, "INSERT INTO nums (value) VALUES (10), (14), (26)");

    let results = ok(&f.engine, "SELECT value FROM nums WHERE value = 2 + 3 * 4");
    assert_eq!(query_rows(&results[0]), &[vec![Value::Int64(14)]]);

    let results = ok(&f.engine, "SELECT value FROM nums WHERE value = 2 * 3 + 4 * 5");
    assert_eq!(query_rows(&results[0]), &[vec![Value::Int64(26)]]);
}

#[test]
fn update_rewrites_rows_and_indexes() {
    let f = fixture();
    ok(&f.engine, "CREATE TABLE t (id int primary key, name string(20))");
    ok(&f.engine, "INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'b'), (3, 'c')");

    let results = ok(&f.engine, "UPDATE t SET name = 'z' WHERE id > 1");
    assert!(matches!(results[0], OpResult::RowsAffected(2)));

    // Changing a primary key rebuilds the pk index; the new key is findable.
    ok(&f.engine, "UPDATE t SET id = 9 WHERE id = 3");
    let results = ok(&f.engine, "SELECT name FROM t WHERE id = 9");
    assert_eq!(query_rows(&results[0]), &[vec![Value::Str("z".into())]]);

    // And updating into a duplicate key is a constraint error.
    let results = run(&f.engine, "UPDATE t SET id = 1 WHERE id = 2");
    assert!(matches!(
        results[0],
        Err(DBError::Constraint(ConstraintError::PrimaryKeyViolation { .. }))
    ));
}

#[test]
fn delete_renumbers_and_rebuilds_indexes() {
    let f = fixture();
    ok(&f.engine, "CREATE TABLE t (id int primary key, name string(20))");
    ok(
        &f.engine,
        "INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'b'), (3, 'c'), (4, 'd')",
    );
    let results = ok(&f.engine, "DELETE FROM t WHERE id = 2");
    assert!(matches!(results[0], OpResult::RowsAffected(1)));

    // Every surviving row is reachable through the renumbered pk index.
    for (id, name) in [(1, "a"), (3, "c"), (4, "d")] {
        let results = ok(&f.engine, &format!("SELECT name FROM t WHERE id = {id}"));
        assert_eq!(query_rows(&results[0]), &[vec![Value::Str(name.into())]], "id {id}");
    }
    let results = ok(&f.engine, "SELECT * FROM t");
    assert_eq!(query_rows(&results[0]).len(), 3);
}

#[test]
fn secondary_unique_index_enforced() {
    let f = fixture();
    ok(&f.engine, "CREATE TABLE users (id int primary key, email string(50))");
    ok(&f.engine, "CREATE UNIQUE INDEX ix_users_email ON users (email)");
    ok(&f.engine, "INSERT INTO users (id, email) VALUES (1, 'a@x')");

    let results = run(&f.engine, "INSERT INTO users (id, email) VALUES (2, 'a@x')");
    assert!(matches!(
        results[0],
        Err(DBError::Constraint(ConstraintError::UniqueViolation { .. }))
    ));

    // Equality on the indexed column still returns the one row.
    let results = ok(&f.engine, "SELECT id FROM users WHERE email = 'a@x'");
    assert_eq!(query_rows(&results[0]), &[vec![Value::Int64(1)]]);
}

#[test]
fn creating_a_unique_index_over_duplicates_fails() {
    let f = fixture();
    ok(&f.engine, "CREATE TABLE t (id int primary key, tag string(8))");
    ok(&f.engine, "INSERT INTO t (id, tag) VALUES (1, 'x'), (2, 'x')");
    let results = run(&f.engine, "CREATE UNIQUE INDEX ix_t_tag ON t (tag)");
    assert!(matches!(
        results[0],
        Err(DBError::Constraint(ConstraintError::UniqueViolation { .. }))
    ));
}

#[test]
fn index_lifecycle() {
    let f = fixture();
    ok(&f.engine, "CREATE TABLE t (id int primary key, tag string(8))");
    ok(&f.engine, "CREATE INDEX ix_t_tag ON t (tag)");

    let results = ok(&f.engine, "SHOW INDEXES FROM t");
    let OpResult::Indexes(indexes) = &results[0] else {
        panic!("expected indexes");
    };
    let names: Vec<_> = indexes.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["pk_t", "ix_t_tag"]);
    assert!(f.db.index_file("t", "ix_t_tag").exists());

    ok(&f.engine, "DROP INDEX ix_t_tag");
    assert!(!f.db.index_file("t", "ix_t_tag").exists());

    // The auto-created primary index may not be dropped.
    let results = run(&f.engine, "DROP INDEX pk_t");
    assert!(results[0].is_err());
}

#[test]
fn add_columns_backfills() {
    let f = fixture();
    ok(&f.engine, "CREATE TABLE t (id int primary key)");
    ok(&f.engine, "INSERT INTO t (id) VALUES (1)");

    ok(&f.engine, "ALTER TABLE t ADD COLUMN score int DEFAULT 7");
    ok(&f.engine, "ALTER TABLE t ADD COLUMN note string(20)");
    let results = ok(&f.engine, "SELECT * FROM t");
    assert_eq!(
        query_rows(&results[0]),
        &[vec![Value::Int64(1), Value::Int64(7), Value::Null]]
    );

    // A non-nullable column without a default cannot be added to a
    // populated table.
    let results = run(&f.engine, "ALTER TABLE t ADD COLUMN strict int NOT NULL");
    assert!(results[0].is_err());
}

#[test]
fn drop_table_removes_directory() {
    let f = fixture();
    ok(&f.engine, "CREATE TABLE gone (id int primary key)");
    assert!(f.db.table_dir("gone").exists());
    ok(&f.engine, "DROP TABLE gone");
    assert!(!f.db.table_dir("gone").exists());

    let results = run(&f.engine, "SELECT * FROM gone");
    assert!(matches!(results[0], Err(DBError::Table(TableError::NotFound(_)))));
}

#[test]
fn datetime_values_roundtrip_through_sql() {
    let f = fixture();
    ok(&f.engine, "CREATE TABLE events (id int primary key, at datetime)");
    ok(
        &f.engine,
        "INSERT INTO events (id, at) VALUES (1, '2024-05-01 12:30:00')",
    );
    let rendered = sql::execute_sql(&f.engine, "SELECT at FROM events WHERE id = 1").unwrap();
    assert!(rendered.contains("2024-05-01 12:30:00"), "got: {rendered}");

    // A string literal against a datetime column compares by seconds.
    let results = ok(&f.engine, "SELECT id FROM events WHERE at = '2024-05-01 12:30:00'");
    assert_eq!(query_rows(&results[0]), &[vec![Value::Int64(1)]]);
}

#[test]
fn string_overflow_is_rejected() {
    let f = fixture();
    ok(&f.engine, "CREATE TABLE t (id int primary key, s string(3))");
    let results = run(&f.engine, "INSERT INTO t (id, s) VALUES (1, 'toolong')");
    assert!(matches!(results[0], Err(DBError::Data(_))));
}

#[test]
fn concurrent_reader_sees_pre_or_post_state_only() {
    let f = fixture();
    ok(&f.engine, "CREATE TABLE t (id int primary key)");

    let writer = {
        let engine = f.engine.clone();
        thread::spawn(move || {
            let text = "INSERT INTO t (id) VALUES (1), (2), (3)";
            let batch = sql::compile_batch(text).unwrap();
            engine.exec(batch.ops, batch.finish).unwrap();
        })
    };
    // Readers may run before or after the writer's transaction but must
    // never observe a partial batch.
    for _ in 0..10 {
        let results = ok(&f.engine, "SELECT * FROM t");
        let seen = query_rows(&results[0]).len();
        assert!(seen == 0 || seen == 3, "partial state observed: {seen} rows");
    }
    writer.join().unwrap();

    let results = ok(&f.engine, "SELECT * FROM t");
    assert_eq!(query_rows(&results[0]).len(), 3);
}
