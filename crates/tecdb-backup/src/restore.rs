//! Convergent restore: add or update desired instances in dependency order.
//!
//! Two nested convergences. The inner loop walks the topologically sorted
//! list within one fixed live snapshot, retrying entries whose prerequisites
//! appeared later in the same walk. The outer loop re-runs the whole
//! reconciliation whenever dependency edges may have fired, with an agent
//! sync between passes to republish live truth, bounded by configuration.

use tecdb_db::{CfgRequest, Database, Handle};
use tecdb_error::{CfgError, Result};
use tecdb_types::{Oid, ValueType};
use tracing::{error, trace, warn};

use crate::desired::DesiredList;
use crate::family::fill_children;
use crate::prune::remove_excessive;
use crate::toposort::topo_sort;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on outer reconciliation passes. When the bound is hit a
    /// dependency loop is suspected; the operation still succeeds if every
    /// desired instance converged.
    pub max_restore_passes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_restore_passes: 10,
        }
    }
}

/// Agent synchroniser: refreshes the live store from the remote agents
/// under the given OID prefix.
pub trait AgentSync {
    fn sync(&mut self, db: &mut Database, prefix: &str) -> Result<()>;
}

/// No-op synchroniser for agentless deployments and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSync;

impl AgentSync for NullSync {
    fn sync(&mut self, _db: &mut Database, _prefix: &str) -> Result<()> {
        Ok(())
    }
}

/// Reconcile live state onto the desired list.
///
/// On success every desired instance ended up `added`. `ENOENT` means the
/// loop could not converge: either a pass made no progress while instances
/// were still missing, or the outer bound was hit with entries unresolved.
pub fn restore_entries(
    db: &mut Database,
    sync: &mut dyn AgentSync,
    list: &mut DesiredList,
    subtrees: &[Oid],
    config: &EngineConfig,
) -> Result<()> {
    // Lists parsed from a backup document carry no family links; units are
    // committed together with their children, so the links are needed
    // before the first pass.
    fill_children(list)?;
    topo_sort(list, db.registry());

    let mut deps_might_fire = true;
    let mut passes = 0u32;

    while deps_might_fire {
        if passes >= config.max_restore_passes {
            warn!("loop dependency suspected, aborting");
            break;
        }
        passes += 1;
        deps_might_fire = false;

        remove_excessive(db, list, subtrees, &mut deps_might_fire)?;

        loop {
            let mut change_made = false;
            let mut need_retry = false;

            let mut cur = list.head();
            while let Some(i) = cur {
                cur = list.get(i).next;
                if list.get(i).added || db.registry().get(list.get(i).object).unit_part {
                    continue;
                }
                trace!(oid = list.get(i).oid.as_str(), "restoring instance");
                restore_entry(db, list, i, &mut need_retry, &mut change_made, &mut deps_might_fire)?;
            }

            if !(change_made && need_retry) {
                if need_retry {
                    return Err(CfgError::ConvergenceFailed);
                }
                break;
            }
        }

        if deps_might_fire {
            if let Err(err) = sync.sync(db, "/:") {
                warn!(%err, "agent synchronisation failed between restore passes");
            }
        }
    }

    if list.iter().all(|e| e.added) {
        Ok(())
    } else {
        Err(CfgError::ConvergenceFailed)
    }
}

/// Restore one entry. Instances of `unit` objects are the commit boundary:
/// the whole subtree is updated with local changes and flushed by a single
/// COMMIT; a unit whose recursion changed nothing commits nothing.
fn restore_entry(
    db: &mut Database,
    list: &mut DesiredList,
    index: usize,
    need_retry: &mut bool,
    change_made: &mut bool,
    has_deps: &mut bool,
) -> Result<()> {
    let unit = db.registry().get(list.get(index).object).unit;
    let mut change_made_aux = false;

    restore_entry_aux(db, list, index, unit, need_retry, &mut change_made_aux, has_deps)?;

    if change_made_aux {
        *change_made = true;
    }
    if !unit || !change_made_aux {
        return Ok(());
    }

    db.process(
        CfgRequest::Commit {
            oid: list.get(index).oid.clone(),
        },
        true,
    )?;
    Ok(())
}

/// Add or update one entry; with `local` set, recurse through the family
/// links so the whole unit subtree lands in the same commit group.
fn restore_entry_aux(
    db: &mut Database,
    list: &mut DesiredList,
    index: usize,
    local: bool,
    need_retry: &mut bool,
    change_made: &mut bool,
    has_deps: &mut bool,
) -> Result<()> {
    match add_or_set(db, list, index, local, has_deps, change_made) {
        Ok(()) => list.get_mut(index).added = true,
        Err(err) if err.is_retryable() => {
            *need_retry = true;
        }
        Err(err) => {
            error!(
                oid = list.get(index).oid.as_str(),
                %err,
                "failed to add/set instance"
            );
            return Err(err);
        }
    }

    if !local {
        return Ok(());
    }

    let mut child = list.get(index).son;
    while let Some(c) = child {
        child = list.get(c).brother;
        restore_entry_aux(db, list, c, local, need_retry, change_made, has_deps)?;
    }
    Ok(())
}

/// Issue the ADD or SET bringing one instance to its desired value.
///
/// Agent roots are managed out-of-band and always succeed without action.
/// A stale handle is re-resolved by OID first; the entry may have appeared
/// after the addition of previous ones.
fn add_or_set(
    db: &mut Database,
    list: &mut DesiredList,
    index: usize,
    local: bool,
    has_deps: &mut bool,
    change_made: &mut bool,
) -> Result<()> {
    if list.get(index).oid.is_agent_root() {
        return Ok(());
    }

    if db.store().get(list.get(index).handle).is_none() {
        let found = db
            .store()
            .find(list.get(index).oid.as_str())
            .unwrap_or(Handle::INVALID);
        list.get_mut(index).handle = found;
    }

    let entry = list.get(index);
    let object = db.registry().get(entry.object);
    let value_type = object.value_type;
    let has_dependants = object.has_dependants();

    if let Some(live) = db.store().get(entry.handle) {
        if matches!(value_type, ValueType::None | ValueType::Unspecified)
            || live.value == entry.value
        {
            return Ok(());
        }
        if has_dependants {
            *has_deps = true;
        }
        let request = CfgRequest::Set {
            handle: entry.handle,
            value: entry.value.clone(),
            local,
        };
        db.process(request, true)?;
        *change_made = true;
        Ok(())
    } else {
        if has_dependants {
            *has_deps = true;
        }
        let request = CfgRequest::Add {
            oid: entry.oid.clone(),
            value: entry.value.clone(),
            local,
        };
        db.process(request, true)?;
        *change_made = true;
        Ok(())
    }
}
