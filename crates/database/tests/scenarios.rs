//! End-to-end statement scenarios driven through a session, covering
//! the create/insert/select, index-range, update-arithmetic, grouped
//! aggregate, abort-rollback, and wait-die flows.

use std::sync::Arc;

use catalog::ColDef;
use common::{Config, DbError, RecordBatch};
use database::ast::*;
use database::{Engine, Session, StatementResult};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use types::{ColType, Value};

fn engine() -> (TempDir, Arc<Engine>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config::builder()
        .root_dir(dir.path().to_path_buf())
        .buffer_pool_pages(512)
        .build();
    let engine = Engine::bootstrap(&cfg, "testdb").unwrap();
    (dir, engine)
}

fn create_table(session: &mut Session, name: &str, cols: Vec<(&str, ColType, usize)>) {
    let cols = cols
        .into_iter()
        .map(|(n, ty, len)| ColDef { name: n.into(), ty, len })
        .collect();
    session
        .execute(Statement::CreateTable { tab_name: name.into(), cols })
        .unwrap();
}

fn insert(session: &mut Session, tab: &str, values: Vec<Value>) -> Result<StatementResult, DbError> {
    session.execute(Statement::Insert { tab_name: tab.into(), values })
}

fn select(session: &mut Session, stmt: SelectStmt) -> RecordBatch {
    match session.execute(Statement::Select(stmt)).unwrap() {
        StatementResult::Batch(batch) => batch,
        other => panic!("expected a batch, got {other:?}"),
    }
}

#[test]
fn s1_create_insert_select_with_filter() {
    let (_dir, engine) = engine();
    let mut session = engine.session();
    create_table(
        &mut session,
        "t",
        vec![("id", ColType::Int, 4), ("name", ColType::Str, 8)],
    );
    insert(&mut session, "t", vec![Value::Int(1), Value::Str("alice".into())]).unwrap();
    insert(&mut session, "t", vec![Value::Int(2), Value::Str("bob".into())]).unwrap();

    let mut stmt = SelectStmt::from_tables(vec!["t".into()]);
    stmt.conds
        .push(RawCond::col_val(RawCol::unqualified("id"), CompOp::Gt, Value::Int(1)));
    let batch = select(&mut session, stmt);

    assert_eq!(batch.len(), 1);
    assert_eq!(batch.rows[0], vec![Value::Int(2), Value::Str("bob".into())]);
    engine.shutdown().unwrap();
}

#[test]
fn s2_index_range_with_residual_filter() {
    let (_dir, engine) = engine();
    let mut session = engine.session();
    create_table(&mut session, "t", vec![("k", ColType::Int, 4), ("v", ColType::Int, 4)]);
    for (k, v) in [(1, 10), (2, 20), (3, 30)] {
        insert(&mut session, "t", vec![Value::Int(k), Value::Int(v)]).unwrap();
    }
    session
        .execute(Statement::CreateIndex { tab_name: "t".into(), col_names: vec!["k".into()] })
        .unwrap();

    let mut stmt = SelectStmt::from_tables(vec!["t".into()]);
    stmt.sel_items = vec![SelItem::Col(RawCol::unqualified("v"))];
    stmt.conds
        .push(RawCond::col_val(RawCol::unqualified("k"), CompOp::Ge, Value::Int(2)));
    stmt.conds
        .push(RawCond::col_val(RawCol::unqualified("k"), CompOp::Lt, Value::Int(3)));
    let batch = select(&mut session, stmt);

    assert_eq!(batch.columns, vec!["v".to_string()]);
    assert_eq!(batch.rows, vec![vec![Value::Int(20)]]);
    engine.shutdown().unwrap();
}

#[test]
fn s3_update_with_arithmetic() {
    let (_dir, engine) = engine();
    let mut session = engine.session();
    create_table(&mut session, "s", vec![("id", ColType::Int, 4), ("score", ColType::Float, 4)]);
    insert(&mut session, "s", vec![Value::Int(1), Value::Float(50.0)]).unwrap();

    let result = session
        .execute(Statement::Update {
            tab_name: "s".into(),
            set_clauses: vec![RawSetClause {
                col_name: "score".into(),
                value: Value::Float(5.5),
                is_add: true,
            }],
            conds: vec![RawCond::col_val(RawCol::unqualified("id"), CompOp::Eq, Value::Int(1))],
        })
        .unwrap();
    assert_eq!(result, StatementResult::Affected(1));

    let mut stmt = SelectStmt::from_tables(vec!["s".into()]);
    stmt.sel_items = vec![SelItem::Col(RawCol::unqualified("score"))];
    let batch = select(&mut session, stmt);
    assert_eq!(batch.rows, vec![vec![Value::Float(55.5)]]);
    // The wire format prints six decimals.
    assert_eq!(common::pretty::format_row(&batch.rows[0]), "55.500000");
    engine.shutdown().unwrap();
}

#[test]
fn s4_group_by_having() {
    let (_dir, engine) = engine();
    let mut session = engine.session();
    create_table(&mut session, "g", vec![("dept", ColType::Str, 4), ("sal", ColType::Int, 4)]);
    for (dept, sal) in [("eng", 100), ("eng", 200), ("hr", 50)] {
        insert(&mut session, "g", vec![Value::Str(dept.into()), Value::Int(sal)]).unwrap();
    }

    let mut stmt = SelectStmt::from_tables(vec!["g".into()]);
    stmt.sel_items = vec![
        SelItem::Col(RawCol::unqualified("dept")),
        SelItem::Agg {
            func: AggFunc::Sum,
            target: AggTarget::Col(RawCol::unqualified("sal")),
            alias: Some("s".into()),
        },
    ];
    stmt.group_by = vec![RawCol::unqualified("dept")];
    stmt.having = vec![RawCond {
        lhs: RawCondLhs::Agg {
            func: AggFunc::Sum,
            target: AggTarget::Col(RawCol::unqualified("sal")),
        },
        op: CompOp::Gt,
        rhs: RawExpr::Value(Value::Int(100)),
    }];
    let batch = select(&mut session, stmt);

    assert_eq!(batch.columns, vec!["dept".to_string(), "s".to_string()]);
    assert_eq!(batch.rows, vec![vec![Value::Str("eng".into()), Value::Int(300)]]);
    engine.shutdown().unwrap();
}

#[test]
fn s5_abort_rolls_back_partial_transaction() {
    let (_dir, engine) = engine();
    let mut session = engine.session();
    create_table(&mut session, "t", vec![("id", ColType::Int, 4), ("name", ColType::Str, 8)]);
    session
        .execute(Statement::CreateIndex { tab_name: "t".into(), col_names: vec!["id".into()] })
        .unwrap();

    session.execute(Statement::Begin).unwrap();
    insert(&mut session, "t", vec![Value::Int(9), Value::Str("x".into())]).unwrap();
    // Duplicate key on the unique index: the statement fails and the
    // driver aborts the whole transaction.
    let err = insert(&mut session, "t", vec![Value::Int(9), Value::Str("y".into())]).unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey));
    // An explicit ABORT afterwards is a no-op on the dead transaction.
    session.execute(Statement::Abort).unwrap();

    let mut stmt = SelectStmt::from_tables(vec!["t".into()]);
    stmt.conds
        .push(RawCond::col_val(RawCol::unqualified("id"), CompOp::Eq, Value::Int(9)));
    let batch = select(&mut session, stmt);
    assert!(batch.is_empty());
    engine.shutdown().unwrap();
}

#[test]
fn s5b_explicit_abort_undoes_inserts_and_deletes() {
    let (_dir, engine) = engine();
    let mut session = engine.session();
    create_table(&mut session, "t", vec![("id", ColType::Int, 4), ("name", ColType::Str, 8)]);
    insert(&mut session, "t", vec![Value::Int(1), Value::Str("keep".into())]).unwrap();

    session.execute(Statement::Begin).unwrap();
    insert(&mut session, "t", vec![Value::Int(2), Value::Str("gone".into())]).unwrap();
    session
        .execute(Statement::Delete {
            tab_name: "t".into(),
            conds: vec![RawCond::col_val(RawCol::unqualified("id"), CompOp::Eq, Value::Int(1))],
        })
        .unwrap();
    session.execute(Statement::Abort).unwrap();

    let batch = select(&mut session, SelectStmt::from_tables(vec!["t".into()]));
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.rows[0][1], Value::Str("keep".into()));
    engine.shutdown().unwrap();
}

#[test]
fn s6_wait_die_aborts_the_younger_writer() {
    let (_dir, engine) = engine();
    let mut setup = engine.session();
    create_table(&mut setup, "t", vec![("k", ColType::Int, 4), ("v", ColType::Int, 4)]);
    insert(&mut setup, "t", vec![Value::Int(1), Value::Int(100)]).unwrap();

    let update = |tab: &str| Statement::Update {
        tab_name: tab.into(),
        set_clauses: vec![RawSetClause { col_name: "v".into(), value: Value::Int(1), is_add: true }],
        conds: vec![RawCond::col_val(RawCol::unqualified("k"), CompOp::Eq, Value::Int(1))],
    };

    let mut t1 = engine.session();
    let mut t2 = engine.session();
    t1.execute(Statement::Begin).unwrap();
    t2.execute(Statement::Begin).unwrap();

    // T1 (older) takes the record X lock.
    t1.execute(update("t")).unwrap();
    // T2 (younger) conflicts and dies instead of waiting.
    let err = t2.execute(update("t")).unwrap_err();
    assert!(matches!(err, DbError::WaitDie(_)));

    t1.execute(Statement::Commit).unwrap();

    let batch = select(&mut setup, SelectStmt::from_tables(vec!["t".into()]));
    assert_eq!(batch.rows, vec![vec![Value::Int(1), Value::Int(101)]]);
    engine.shutdown().unwrap();
}

#[test]
fn serializes_conflicting_writers_across_threads() {
    let (_dir, engine) = engine();
    let mut setup = engine.session();
    create_table(&mut setup, "t", vec![("k", ColType::Int, 4), ("v", ColType::Int, 4)]);
    insert(&mut setup, "t", vec![Value::Int(1), Value::Int(0)]).unwrap();

    // Older writer first takes the lock, then a younger thread retries
    // its increment until the older commit releases it.
    let mut older = engine.session();
    older.execute(Statement::Begin).unwrap();
    older
        .execute(Statement::Update {
            tab_name: "t".into(),
            set_clauses: vec![RawSetClause {
                col_name: "v".into(),
                value: Value::Int(1),
                is_add: true,
            }],
            conds: vec![],
        })
        .unwrap();

    let engine2 = Arc::clone(&engine);
    let younger = std::thread::spawn(move || {
        let mut session = engine2.session();
        loop {
            let result = session.execute(Statement::Update {
                tab_name: "t".into(),
                set_clauses: vec![RawSetClause {
                    col_name: "v".into(),
                    value: Value::Int(1),
                    is_add: true,
                }],
                conds: vec![],
            });
            match result {
                Ok(_) => return,
                Err(err) if err.is_abort() => {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
    });

    std::thread::sleep(std::time::Duration::from_millis(30));
    older.execute(Statement::Commit).unwrap();
    younger.join().unwrap();

    let batch = select(&mut setup, SelectStmt::from_tables(vec!["t".into()]));
    assert_eq!(batch.rows, vec![vec![Value::Int(1), Value::Int(2)]]);
    engine.shutdown().unwrap();
}

#[test]
fn order_by_desc_with_limit() {
    let (_dir, engine) = engine();
    let mut session = engine.session();
    create_table(&mut session, "t", vec![("id", ColType::Int, 4), ("v", ColType::Int, 4)]);
    for i in 0..10 {
        insert(&mut session, "t", vec![Value::Int(i), Value::Int(100 - i)]).unwrap();
    }

    let mut stmt = SelectStmt::from_tables(vec!["t".into()]);
    stmt.sel_items = vec![SelItem::Col(RawCol::unqualified("id"))];
    stmt.order_by = vec![RawOrderBy { col: RawCol::unqualified("v"), desc: true }];
    stmt.limit = 3;
    let batch = select(&mut session, stmt);
    assert_eq!(
        batch.rows,
        vec![vec![Value::Int(0)], vec![Value::Int(1)], vec![Value::Int(2)]]
    );
    engine.shutdown().unwrap();
}

#[test]
fn join_on_two_tables() {
    let (_dir, engine) = engine();
    let mut session = engine.session();
    create_table(&mut session, "emp", vec![("id", ColType::Int, 4), ("dept", ColType::Str, 8)]);
    create_table(&mut session, "dept", vec![("name", ColType::Str, 8), ("floor", ColType::Int, 4)]);
    insert(&mut session, "emp", vec![Value::Int(1), Value::Str("eng".into())]).unwrap();
    insert(&mut session, "emp", vec![Value::Int(2), Value::Str("hr".into())]).unwrap();
    insert(&mut session, "dept", vec![Value::Str("eng".into()), Value::Int(3)]).unwrap();

    let mut stmt = SelectStmt::from_tables(vec!["emp".into(), "dept".into()]);
    stmt.sel_items = vec![
        SelItem::Col(RawCol::qualified("emp", "id")),
        SelItem::Col(RawCol::qualified("dept", "floor")),
    ];
    stmt.conds.push(RawCond::col_col(
        RawCol::qualified("emp", "dept"),
        CompOp::Eq,
        RawCol::qualified("dept", "name"),
    ));
    let batch = select(&mut session, stmt);
    assert_eq!(batch.rows, vec![vec![Value::Int(1), Value::Int(3)]]);
    engine.shutdown().unwrap();
}

#[test]
fn datetime_round_trip_and_comparison() {
    let (_dir, engine) = engine();
    let mut session = engine.session();
    create_table(&mut session, "ev", vec![("id", ColType::Int, 4), ("at", ColType::Datetime, 8)]);
    insert(
        &mut session,
        "ev",
        vec![Value::Int(1), Value::Str("2024-02-29 12:00:00".into())],
    )
    .unwrap();
    insert(
        &mut session,
        "ev",
        vec![Value::Int(2), Value::Str("2024-03-01 08:30:00".into())],
    )
    .unwrap();
    // An invalid calendar date is rejected at conversion.
    assert!(matches!(
        insert(
            &mut session,
            "ev",
            vec![Value::Int(3), Value::Str("2023-02-29 00:00:00".into())],
        ),
        Err(DbError::TypeOverflow { .. })
    ));

    let mut stmt = SelectStmt::from_tables(vec!["ev".into()]);
    stmt.sel_items = vec![SelItem::Col(RawCol::unqualified("id"))];
    stmt.conds.push(RawCond::col_val(
        RawCol::unqualified("at"),
        CompOp::Gt,
        Value::Str("2024-02-29 23:59:59".into()),
    ));
    let batch = select(&mut session, stmt);
    assert_eq!(batch.rows, vec![vec![Value::Int(2)]]);
    engine.shutdown().unwrap();
}

#[test]
fn catalog_views_render() {
    let (_dir, engine) = engine();
    let mut session = engine.session();
    create_table(&mut session, "t", vec![("id", ColType::Int, 4), ("name", ColType::Str, 8)]);
    session
        .execute(Statement::CreateIndex { tab_name: "t".into(), col_names: vec!["id".into()] })
        .unwrap();

    let StatementResult::Batch(tables) = session.execute(Statement::ShowTables).unwrap() else {
        panic!("batch expected");
    };
    assert_eq!(tables.rows, vec![vec![Value::Str("t".into())]]);

    let StatementResult::Batch(desc) =
        session.execute(Statement::DescTable { tab_name: "t".into() }).unwrap()
    else {
        panic!("batch expected");
    };
    assert_eq!(desc.rows[0][0], Value::Str("id".into()));
    assert_eq!(desc.rows[0][2], Value::Str("YES".into()));
    assert_eq!(desc.rows[1][1], Value::Str("CHAR(8)".into()));

    let StatementResult::Batch(index) =
        session.execute(Statement::ShowIndex { tab_name: "t".into() }).unwrap()
    else {
        panic!("batch expected");
    };
    assert_eq!(index.rows, vec![vec![Value::Str("t".into()), Value::Str("(id)".into())]]);

    let rendered = database::pretty::render_record_batch(
        &tables,
        database::pretty::TableStyleKind::Ascii,
    );
    assert!(rendered.contains("Tables"));
    engine.shutdown().unwrap();
}

#[test]
fn load_then_query_with_fast_count() {
    let (_dir, engine) = engine();
    let mut session = engine.session();
    create_table(&mut session, "big", vec![("id", ColType::Int, 4), ("tag", ColType::Str, 8)]);
    session
        .execute(Statement::CreateIndex { tab_name: "big".into(), col_names: vec!["id".into()] })
        .unwrap();

    let csv = _dir.path().join("big.csv");
    let mut text = String::from("id,tag\n");
    for i in (0..500).rev() {
        text.push_str(&format!("{i},t{}\n", i % 7));
    }
    std::fs::write(&csv, text).unwrap();

    session
        .execute(Statement::Load {
            file_path: csv.to_str().unwrap().into(),
            tab_name: "big".into(),
        })
        .unwrap();

    // COUNT(*) goes through the per-page fast path and gates on the
    // load pool, so it observes the finished load.
    let mut stmt = SelectStmt::from_tables(vec!["big".into()]);
    stmt.sel_items = vec![SelItem::Agg {
        func: AggFunc::Count,
        target: AggTarget::Star,
        alias: Some("n".into()),
    }];
    let batch = select(&mut session, stmt);
    assert_eq!(batch.rows, vec![vec![Value::Int(500)]]);

    // Point query through the freshly built index.
    let mut stmt = SelectStmt::from_tables(vec!["big".into()]);
    stmt.conds
        .push(RawCond::col_val(RawCol::unqualified("id"), CompOp::Eq, Value::Int(123)));
    let batch = select(&mut session, stmt);
    assert_eq!(batch.rows, vec![vec![Value::Int(123), Value::Str("t4".into())]]);
    engine.shutdown().unwrap();
}

#[test]
fn data_survives_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config::builder()
        .root_dir(dir.path().to_path_buf())
        .buffer_pool_pages(128)
        .build();
    {
        let engine = Engine::bootstrap(&cfg, "persist").unwrap();
        let mut session = engine.session();
        create_table(&mut session, "t", vec![("id", ColType::Int, 4), ("name", ColType::Str, 8)]);
        session
            .execute(Statement::CreateIndex { tab_name: "t".into(), col_names: vec!["id".into()] })
            .unwrap();
        for i in 0..20 {
            insert(&mut session, "t", vec![Value::Int(i), Value::Str(format!("n{i}"))]).unwrap();
        }
        engine.shutdown().unwrap();
    }

    let engine = Engine::bootstrap(&cfg, "persist").unwrap();
    let mut session = engine.session();
    let mut stmt = SelectStmt::from_tables(vec!["t".into()]);
    stmt.conds
        .push(RawCond::col_val(RawCol::unqualified("id"), CompOp::Eq, Value::Int(13)));
    let batch = select(&mut session, stmt);
    assert_eq!(batch.rows, vec![vec![Value::Int(13), Value::Str("n13".into())]]);
    engine.shutdown().unwrap();
}
