//! End-to-end reconciliation scenarios against in-memory documents.

use std::cell::RefCell;
use std::rc::Rc;

use tecdb_backup::{AgentSync, DocumentMode, Engine, EngineConfig, parse_document};
use tecdb_db::{CfgRequest, Database, OpRecord, RegisterRequest};
use tecdb_error::{CfgError, Result};
use tecdb_types::{CfgValue, Oid, ValueType};

fn oid(s: &str) -> Oid {
    Oid::new(s).unwrap()
}

fn register(db: &mut Database, o: &str, tweak: impl FnOnce(&mut RegisterRequest)) {
    let mut req = RegisterRequest::plain(oid(o));
    tweak(&mut req);
    db.process(CfgRequest::Register(req), true).unwrap();
}

fn add(db: &mut Database, o: &str, value: CfgValue) {
    db.process(
        CfgRequest::Add {
            oid: oid(o),
            value,
            local: false,
        },
        true,
    )
    .unwrap();
}

fn add_dependency(db: &mut Database, dependant: &str, target: &str) {
    db.process(
        CfgRequest::AddDependency {
            dependant: oid(dependant),
            target: oid(target),
            object_wide: false,
        },
        true,
    )
    .unwrap();
}

/// Agent synchroniser that records every call and runs a script against the
/// database.
struct ScriptedSync<F> {
    calls: Rc<RefCell<Vec<String>>>,
    script: F,
}

impl<F: FnMut(&mut Database, &str) -> Result<()>> ScriptedSync<F> {
    fn new(script: F) -> (Self, Rc<RefCell<Vec<String>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        (
            Self {
                calls: Rc::clone(&calls),
                script,
            },
            calls,
        )
    }
}

impl<F: FnMut(&mut Database, &str) -> Result<()>> AgentSync for ScriptedSync<F> {
    fn sync(&mut self, db: &mut Database, prefix: &str) -> Result<()> {
        self.calls.borrow_mut().push(prefix.to_owned());
        (self.script)(db, prefix)
    }
}

fn recorder() -> (Box<dyn AgentSync>, Rc<RefCell<Vec<String>>>) {
    let (sync, calls) = ScriptedSync::new(|_db: &mut Database, _prefix: &str| Ok(()));
    (Box::new(sync), calls)
}

fn restore_document(engine: &mut Engine, text: &str) -> Result<()> {
    let root = parse_document(text).unwrap();
    engine.process_backup_document(&root, DocumentMode::Restore, &[])
}

#[test]
fn s1_empty_backup_deletes_live_instance() {
    let mut db = Database::new();
    register(&mut db, "/a", |r| r.value_type = ValueType::Int32);
    add(&mut db, "/a:x", CfgValue::Int32(1));
    db.drain_op_log();

    let (sync, _) = recorder();
    let mut engine = Engine::with_sync(db, sync);
    restore_document(
        &mut engine,
        r#"<backup><object oid="/a" access="read_create" type="int32"/></backup>"#,
    )
    .unwrap();

    assert_eq!(engine.db().store().size(), 1, "only the root remains");
    let log = engine.db_mut().drain_op_log();
    assert_eq!(log.len(), 1);
    assert!(matches!(&log[0], OpRecord::Del { oid, .. } if oid == "/a:x"));
}

#[test]
fn s2_pure_add() {
    let mut db = Database::new();
    register(&mut db, "/a", |r| r.value_type = ValueType::Int32);
    db.drain_op_log();

    let (sync, calls) = recorder();
    let mut engine = Engine::with_sync(db, sync);
    restore_document(
        &mut engine,
        r#"<backup><instance oid="/a:1" value="7"/></backup>"#,
    )
    .unwrap();

    let log = engine.db_mut().drain_op_log();
    assert_eq!(log.len(), 1);
    assert!(matches!(
        &log[0],
        OpRecord::Add { oid, local: false, .. } if oid == "/a:1"
    ));
    let h = engine.db().store().find("/a:1").unwrap();
    assert_eq!(
        engine.db().store().get(h).unwrap().value,
        CfgValue::Int32(7)
    );
    assert!(calls.borrow().is_empty(), "no dependants, no sync");
}

#[test]
fn s3_unit_commit() {
    let mut db = Database::new();
    register(&mut db, "/u", |r| r.unit = true);
    register(&mut db, "/u/x", |r| r.value_type = ValueType::Int32);
    register(&mut db, "/u/y", |r| r.value_type = ValueType::Int32);
    db.drain_op_log();

    let (sync, _) = recorder();
    let mut engine = Engine::with_sync(db, sync);
    restore_document(
        &mut engine,
        r#"<backup>
  <instance oid="/u:1"/>
  <instance oid="/u:1/x:1" value="1"/>
  <instance oid="/u:1/y:1" value="2"/>
</backup>"#,
    )
    .unwrap();

    let log = engine.db_mut().drain_op_log();
    let adds: Vec<_> = log
        .iter()
        .filter_map(|r| match r {
            OpRecord::Add { oid, local, .. } => Some((oid.clone(), *local)),
            _ => None,
        })
        .collect();
    let commits: Vec<_> = log
        .iter()
        .filter_map(|r| match r {
            OpRecord::Commit { oid } => Some(oid.clone()),
            _ => None,
        })
        .collect();

    // Every write inside the unit is local and a single commit flushes them.
    assert_eq!(adds.len(), 3);
    assert!(adds.iter().all(|(_, local)| *local));
    assert_eq!(adds[0].0, "/u:1");
    assert_eq!(commits, ["/u:1"]);
    assert!(matches!(log.last().unwrap(), OpRecord::Commit { .. }));

    // The committed instances are fully added.
    for o in ["/u:1", "/u:1/x:1", "/u:1/y:1"] {
        let h = engine.db().store().find(o).unwrap();
        let inst = engine.db().store().get(h).unwrap();
        assert!(inst.added, "{o} must be flushed");
        assert!(!inst.local);
    }
}

#[test]
fn s4_dependency_cascade_triggers_sync_and_second_pass() {
    let mut db = Database::new();
    register(&mut db, "/a", |r| r.value_type = ValueType::Int32);
    register(&mut db, "/b", |_| {});
    // /b depends on /a: changing /a:1 may invalidate instances of /b.
    add_dependency(&mut db, "/b", "/a");
    add(&mut db, "/a:1", CfgValue::Int32(1));
    add(&mut db, "/b:1", CfgValue::None);
    db.drain_op_log();

    let (sync, calls) = recorder();
    let mut engine = Engine::with_sync(db, sync);
    restore_document(
        &mut engine,
        r#"<backup>
  <instance oid="/a:1" value="2"/>
  <instance oid="/b:1"/>
</backup>"#,
    )
    .unwrap();

    let log = engine.db_mut().drain_op_log();
    assert_eq!(log.len(), 1);
    assert!(matches!(&log[0], OpRecord::Set { oid, .. } if oid == "/a:1"));
    // The change fired the dependency: one sync, then a quiet second pass.
    assert_eq!(calls.borrow().as_slice(), ["/:"]);
}

#[test]
fn s5_missing_parent_recovers_on_next_inner_pass() {
    let mut db = Database::new();
    register(&mut db, "/p", |_| {});
    // Opted out of ordinal maintenance: later bumps of /p leave /p/c behind.
    register(&mut db, "/p/c", |r| r.no_parent_dep = true);
    register(&mut db, "/x", |_| {});
    register(&mut db, "/y", |_| {});
    add_dependency(&mut db, "/x", "/y");
    add_dependency(&mut db, "/p", "/x");

    // The inversion the inner loop exists for: the child object now ranks
    // below its parent.
    let reg = db.registry();
    let ord = |o: &str| reg.get(reg.find(o).unwrap()).ordinal;
    assert!(ord("/p/c") < ord("/p"));
    db.drain_op_log();

    let (sync, _) = recorder();
    let mut engine = Engine::with_sync(db, sync);
    restore_document(
        &mut engine,
        r#"<backup>
  <instance oid="/p:1/c:1"/>
  <instance oid="/p:1"/>
</backup>"#,
    )
    .unwrap();

    // First walk: the child's ADD fails with ENOENT, the parent's succeeds;
    // the second walk creates the child.
    let log = engine.db_mut().drain_op_log();
    let adds: Vec<&str> = log
        .iter()
        .filter_map(|r| match r {
            OpRecord::Add { oid, .. } => Some(oid.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(adds, ["/p:1", "/p:1/c:1"]);
    assert!(engine.db().store().find("/p:1/c:1").is_some());
}

#[test]
fn s6_mutual_flip_hits_pass_bound_then_succeeds() {
    let mut db = Database::new();
    register(&mut db, "/a", |r| r.value_type = ValueType::Int32);
    register(&mut db, "/b", |r| r.value_type = ValueType::Int32);
    // Mutually dependent classes; the registry warns about the loop but
    // keeps both edges, so both classes have dependants.
    add_dependency(&mut db, "/a", "/b");
    add_dependency(&mut db, "/b", "/a");
    add(&mut db, "/a:1", CfgValue::Int32(0));
    add(&mut db, "/b:1", CfgValue::Int32(0));
    db.drain_op_log();

    // Every sync flips both instances away from the desired values, so
    // every outer pass finds divergence again.
    let (sync, calls) = ScriptedSync::new(|db: &mut Database, _prefix: &str| {
        for o in ["/a:1", "/b:1"] {
            let handle = db.store().find(o).unwrap();
            db.process(
                CfgRequest::Set {
                    handle,
                    value: CfgValue::Int32(0),
                    local: false,
                },
                true,
            )?;
        }
        Ok(())
    });
    let mut engine = Engine::with_sync(db, Box::new(sync));

    restore_document(
        &mut engine,
        r#"<backup>
  <instance oid="/a:1" value="1"/>
  <instance oid="/b:1" value="1"/>
</backup>"#,
    )
    .unwrap();

    // Exactly the configured bound of outer passes ran, each ending in a
    // sync; every desired entry had converged within its pass, so the
    // operation still reports success.
    assert_eq!(calls.borrow().len(), 10);
}

#[test]
fn s6_variant_honours_configured_bound() {
    let mut db = Database::new();
    register(&mut db, "/a", |r| r.value_type = ValueType::Int32);
    register(&mut db, "/b", |_| {});
    add_dependency(&mut db, "/b", "/a");
    add(&mut db, "/a:1", CfgValue::Int32(0));
    db.drain_op_log();

    let (sync, calls) = ScriptedSync::new(|db: &mut Database, _prefix: &str| {
        let handle = db.store().find("/a:1").unwrap();
        db.process(
            CfgRequest::Set {
                handle,
                value: CfgValue::Int32(0),
                local: false,
            },
            true,
        )?;
        Ok(())
    });
    let mut engine = Engine::with_sync(db, Box::new(sync)).with_config(EngineConfig {
        max_restore_passes: 3,
    });

    restore_document(
        &mut engine,
        r#"<backup><instance oid="/a:1" value="1"/></backup>"#,
    )
    .unwrap();
    assert_eq!(calls.borrow().len(), 3);
}

#[test]
fn restore_fails_when_parent_never_appears() {
    let mut db = Database::new();
    register(&mut db, "/p", |_| {});
    register(&mut db, "/p/c", |_| {});

    let (sync, _) = recorder();
    let mut engine = Engine::with_sync(db, sync);
    // The backup names the child only; its parent instance does not exist
    // and nothing will create it.
    let err = restore_document(
        &mut engine,
        r#"<backup><instance oid="/p:1/c:1"/></backup>"#,
    )
    .unwrap_err();
    assert!(matches!(err, CfgError::ConvergenceFailed));
}

#[test]
fn idempotence_second_restore_is_quiet() {
    let mut db = Database::new();
    register(&mut db, "/a", |r| r.value_type = ValueType::Int32);
    register(&mut db, "/a/b", |r| r.value_type = ValueType::String);
    register(&mut db, "/u", |r| r.unit = true);
    register(&mut db, "/u/k", |r| r.value_type = ValueType::Int32);

    let (sync, _) = recorder();
    let mut engine = Engine::with_sync(db, sync);
    let doc = r#"<backup>
  <instance oid="/a:1" value="5"/>
  <instance oid="/a:1/b:x" value="hello"/>
  <instance oid="/u:1"/>
  <instance oid="/u:1/k:1" value="9"/>
</backup>"#;

    restore_document(&mut engine, doc).unwrap();
    engine.db_mut().drain_op_log();

    restore_document(&mut engine, doc).unwrap();
    let log = engine.db_mut().drain_op_log();
    assert!(
        log.is_empty(),
        "second restore must issue no messages, got {log:?}"
    );
}

#[test]
fn restore_orders_adds_by_ordinal() {
    let mut db = Database::new();
    for o in ["/a", "/b", "/c"] {
        register(&mut db, o, |_| {});
    }
    // /a depends on /b, /b depends on /c: restore must create /c:1 first,
    // /a:1 last.
    add_dependency(&mut db, "/a", "/b");
    add_dependency(&mut db, "/b", "/c");
    db.drain_op_log();

    let (sync, _) = recorder();
    let mut engine = Engine::with_sync(db, sync);
    restore_document(
        &mut engine,
        r#"<backup>
  <instance oid="/a:1"/>
  <instance oid="/b:1"/>
  <instance oid="/c:1"/>
</backup>"#,
    )
    .unwrap();

    let log = engine.db_mut().drain_op_log();
    let ordinals: Vec<u32> = log
        .iter()
        .filter_map(|r| match r {
            OpRecord::Add { ordinal, .. } | OpRecord::Set { ordinal, .. } => Some(*ordinal),
            _ => None,
        })
        .collect();
    assert_eq!(ordinals.len(), 3);
    assert!(
        ordinals.windows(2).all(|w| w[0] <= w[1]),
        "ADD ordinals must be non-decreasing: {ordinals:?}"
    );
}

#[test]
fn delete_orders_by_descending_ordinal() {
    let mut db = Database::new();
    for o in ["/a", "/b", "/c"] {
        register(&mut db, o, |_| {});
    }
    add_dependency(&mut db, "/a", "/b");
    add_dependency(&mut db, "/b", "/c");
    for o in ["/a:1", "/b:1", "/c:1"] {
        add(&mut db, o, CfgValue::None);
    }
    db.drain_op_log();

    let (sync, _) = recorder();
    let mut engine = Engine::with_sync(db, sync);
    // Keep nothing.
    restore_document(&mut engine, "<backup><!-- empty --></backup>").unwrap();

    let log = engine.db_mut().drain_op_log();
    let ordinals: Vec<u32> = log
        .iter()
        .filter_map(|r| match r {
            OpRecord::Del { ordinal, .. } => Some(*ordinal),
            _ => None,
        })
        .collect();
    assert_eq!(ordinals.len(), 3);
    assert!(
        ordinals.windows(2).all(|w| w[0] >= w[1]),
        "DEL ordinals must be non-increasing: {ordinals:?}"
    );
}

#[test]
fn initial_config_mode_registers_and_syncs_first() {
    let db = Database::new();
    let (sync, calls) = recorder();
    let mut engine = Engine::with_sync(db, sync);

    let root = parse_document(
        r#"<backup>
  <object oid="/a" access="read_create" type="int32"/>
  <instance oid="/a:1" value="4"/>
</backup>"#,
    )
    .unwrap();
    engine
        .process_backup_document(&root, DocumentMode::InitialConfig, &[])
        .unwrap();

    assert!(engine.db().registry().find("/a").is_some());
    assert!(engine.db().store().find("/a:1").is_some());
    // The pre-restore synchronisation happened before any reconciliation
    // pass asked for one.
    assert_eq!(calls.borrow().first().map(String::as_str), Some("/:"));
}

#[test]
fn empty_document_is_a_no_op() {
    let db = Database::new();
    let (sync, calls) = recorder();
    let mut engine = Engine::with_sync(db, sync);
    let root = parse_document("<backup></backup>").unwrap();
    engine
        .process_backup_document(&root, DocumentMode::InitialConfig, &[])
        .unwrap();
    assert!(calls.borrow().is_empty());
}

#[test]
fn subtree_filter_scopes_deletion() {
    let mut db = Database::new();
    register(&mut db, "/a", |_| {});
    register(&mut db, "/b", |_| {});
    add(&mut db, "/a:1", CfgValue::None);
    add(&mut db, "/b:1", CfgValue::None);
    db.drain_op_log();

    let (sync, _) = recorder();
    let mut engine = Engine::with_sync(db, sync);
    let root = parse_document("<backup><!-- nothing desired --></backup>").unwrap();
    engine
        .process_backup_document(&root, DocumentMode::Restore, &[oid("/a:1")])
        .unwrap();

    assert_eq!(engine.db().store().find("/a:1"), None);
    assert!(engine.db().store().find("/b:1").is_some());
}
