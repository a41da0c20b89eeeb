//! Deletion planner: remove live instances the backup no longer wants.
//!
//! Candidates are collected from the store's slot table, restricted to
//! fully-added read-create instances inside the requested subtrees, and
//! deleted in descending ordinal order so that dependants collapse before
//! the instances they depend on. Each deletion recurses son-first.

use tecdb_db::{AccessMode, CfgRequest, Database, Handle};
use tecdb_error::{ErrorCode, Result};
use tecdb_types::{Oid, contained_in};
use tracing::error;

use crate::desired::DesiredList;

/// Delete every live instance that is not mentioned in the desired list and
/// sits inside the subtree filter. `has_deps` is raised when any deleted
/// instance's class has dependants, meaning the deletes may have invalidated
/// instances elsewhere.
pub fn remove_excessive(
    db: &mut Database,
    list: &DesiredList,
    subtrees: &[Oid],
    has_deps: &mut bool,
) -> Result<()> {
    let mut candidates: Vec<usize> = (0..db.store().slot_count())
        .filter(|&i| {
            db.store().slot(i).is_some_and(|inst| {
                inst.added
                    && db.registry().get(inst.object).access == AccessMode::ReadCreate
                    && contained_in(subtrees, &inst.oid)
            })
        })
        .collect();

    // Descending ordinal: dependants go first.
    candidates.sort_by(|&a, &b| {
        let ord = |i: usize| {
            db.store()
                .slot(i)
                .map_or(0, |inst| db.registry().get(inst.object).ordinal)
        };
        ord(b).cmp(&ord(a))
    });

    for slot in candidates {
        // The slot may have been collapsed by an earlier recursive delete.
        let Some(inst) = db.store().slot(slot) else {
            continue;
        };
        if list.find_by_oid(inst.oid.as_str()).is_some() {
            continue;
        }
        delete_with_children(db, inst.handle, has_deps)?;
    }
    Ok(())
}

/// Delete an instance and all of its descendants, sons first.
///
/// Volatile instances and instances of non-read-create classes are left
/// alone. `ENOENT` from the store is reported loudly and still returned:
/// it usually means the instance was already collapsed by a previous
/// delete, but silently swallowing it has hidden real bugs before.
pub fn delete_with_children(db: &mut Database, handle: Handle, has_deps: &mut bool) -> Result<()> {
    let Some(inst) = db.store().get(handle) else {
        return Ok(());
    };
    if db.is_volatile(inst) {
        return Ok(());
    }
    let object = db.registry().get(inst.object);
    if object.access != AccessMode::ReadCreate {
        return Ok(());
    }
    if object.has_dependants() {
        *has_deps = true;
    }
    let oid = inst.oid.as_str().to_owned();

    let mut son = inst.son;
    while let Some(s) = son {
        let next = db.store().get(s).and_then(|i| i.brother);
        delete_with_children(db, s, has_deps)?;
        son = next;
    }

    match db.process(CfgRequest::Del { handle, local: false }, true) {
        Ok(_) => Ok(()),
        Err(err) => {
            if err.error_code() == ErrorCode::NoEnt {
                error!(
                    oid,
                    "store returned ENOENT for a delete; previously this was \
                     silently ignored, now it is reported to the caller"
                );
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use tecdb_db::{Handle, OpRecord, RegisterRequest};
    use tecdb_types::{CfgValue, Oid, ValueType};

    use super::*;
    use crate::desired::DesiredList;

    fn oid(s: &str) -> Oid {
        Oid::new(s).unwrap()
    }

    fn db_with(objects: &[(&str, ValueType, AccessMode, bool)]) -> Database {
        let mut db = Database::new();
        for &(o, ty, access, volatile) in objects {
            let mut req = RegisterRequest::plain(oid(o));
            req.value_type = ty;
            req.access = access;
            req.volatile = volatile;
            db.process(CfgRequest::Register(req), true).unwrap();
        }
        db
    }

    fn add(db: &mut Database, o: &str, value: CfgValue) -> Handle {
        db.process(
            CfgRequest::Add {
                oid: oid(o),
                value,
                local: false,
            },
            true,
        )
        .unwrap()
        .handle()
        .unwrap()
    }

    #[test]
    fn deletes_undesired_instances() {
        let mut db = db_with(&[("/a", ValueType::Int32, AccessMode::ReadCreate, false)]);
        add(&mut db, "/a:x", CfgValue::Int32(1));
        add(&mut db, "/a:y", CfgValue::Int32(2));
        db.drain_op_log();

        let mut list = DesiredList::new();
        list.push(
            oid("/a:y"),
            db.registry().root(),
            CfgValue::None,
            Handle::INVALID,
        );

        let mut has_deps = false;
        remove_excessive(&mut db, &list, &[], &mut has_deps).unwrap();

        assert_eq!(db.store().find("/a:x"), None);
        assert!(db.store().find("/a:y").is_some());
        assert!(!has_deps);
    }

    #[test]
    fn subtree_filter_limits_deletion() {
        let mut db = db_with(&[
            ("/a", ValueType::None, AccessMode::ReadCreate, false),
            ("/b", ValueType::None, AccessMode::ReadCreate, false),
        ]);
        add(&mut db, "/a:x", CfgValue::None);
        add(&mut db, "/b:x", CfgValue::None);

        let list = DesiredList::new();
        let filter = [oid("/a:x")];
        let mut has_deps = false;
        remove_excessive(&mut db, &list, &filter, &mut has_deps).unwrap();

        assert_eq!(db.store().find("/a:x"), None);
        assert!(db.store().find("/b:x").is_some());
    }

    #[test]
    fn children_collapse_before_parents() {
        let mut db = db_with(&[
            ("/a", ValueType::None, AccessMode::ReadCreate, false),
            ("/a/b", ValueType::None, AccessMode::ReadCreate, false),
        ]);
        add(&mut db, "/a:1", CfgValue::None);
        add(&mut db, "/a:1/b:1", CfgValue::None);
        add(&mut db, "/a:1/b:2", CfgValue::None);
        db.drain_op_log();

        let list = DesiredList::new();
        let mut has_deps = false;
        remove_excessive(&mut db, &list, &[], &mut has_deps).unwrap();
        assert_eq!(db.store().size(), 1);

        // /a has dependants via the implicit parent edge of /a/b.
        assert!(has_deps);

        // Every DEL for /a/b instances precedes the DEL for /a:1.
        let log = db.drain_op_log();
        let dels: Vec<String> = log
            .iter()
            .filter_map(|r| match r {
                OpRecord::Del { oid, .. } => Some(oid.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(dels.len(), 3);
        assert_eq!(dels.last().unwrap(), "/a:1");
    }

    #[test]
    fn volatile_and_foreign_access_skipped() {
        let mut db = db_with(&[
            ("/v", ValueType::None, AccessMode::ReadCreate, true),
            ("/w", ValueType::None, AccessMode::ReadWrite, false),
        ]);
        add(&mut db, "/v:1", CfgValue::None);
        add(&mut db, "/w:1", CfgValue::None);

        let list = DesiredList::new();
        let mut has_deps = false;
        remove_excessive(&mut db, &list, &[], &mut has_deps).unwrap();

        // Volatile instances are never deleted; nor are non-read-create ones.
        assert!(db.store().find("/v:1").is_some());
        assert!(db.store().find("/w:1").is_some());
    }
}
