//! The backup operations surface.
//!
//! [`Engine`] owns the database and the agent synchroniser and dispatches
//! the four backup operations (verify / restore / create / composite) that
//! arrive packaged as `Backup` requests, plus the agent-subtree maintenance
//! entry points built on the same machinery.

use std::fs;
use std::path::Path;

use tecdb_db::{AccessMode, BackupOp, BackupRequest, CfgReply, CfgRequest, Database};
use tecdb_error::{CfgError, Result};
use tecdb_types::{Oid, ValueType, contained_in};
use tracing::{error, info, warn};

use crate::codec::{parse_instances, register_objects, write_backup, write_filter};
use crate::desired::DesiredList;
use crate::doc::{Node, parse_document};
use crate::restore::{AgentSync, EngineConfig, NullSync, restore_entries};

/// How a backup document is being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentMode {
    /// Initial configuration load: object entries are registered and the
    /// agents are synchronised before reconciling.
    InitialConfig,
    /// Restore of a previously created backup: the schema is already live,
    /// object entries are skipped.
    Restore,
}

/// The backup/restore engine.
pub struct Engine {
    db: Database,
    sync: Box<dyn AgentSync>,
    config: EngineConfig,
}

impl Engine {
    /// Engine over a fresh database with no agent synchroniser.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sync(Database::new(), Box::new(NullSync))
    }

    #[must_use]
    pub fn with_sync(db: Database, sync: Box<dyn AgentSync>) -> Self {
        Self {
            db,
            sync,
            config: EngineConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    /// Process one request: backup operations are handled here, everything
    /// else goes straight to the database.
    pub fn process(&mut self, req: CfgRequest, synchronous: bool) -> Result<CfgReply> {
        match req {
            CfgRequest::Backup(backup) => {
                self.handle_backup(&backup)?;
                Ok(CfgReply::None)
            }
            other => self.db.process(other, synchronous),
        }
    }

    fn handle_backup(&mut self, req: &BackupRequest) -> Result<()> {
        match req.op {
            BackupOp::Verify => self.verify_file(&req.filename, &req.subtrees),
            BackupOp::RestoreNohistory => self.restore_file(&req.filename, &req.subtrees),
            BackupOp::Create => self.create_file(&req.filename, &req.subtrees),
            BackupOp::VerifyAndRestore => self.verify_and_restore(&req.filename, &req.subtrees),
        }
    }

    /// Process a parsed `<backup>` document: register or skip the object
    /// entries, build the desired-state list, reconcile. An empty document
    /// is a no-op.
    pub fn process_backup_document(
        &mut self,
        root: &Node,
        mode: DocumentMode,
        subtrees: &[Oid],
    ) -> Result<()> {
        if root.name != "backup" {
            return Err(CfgError::UnexpectedTag {
                tag: root.name.clone(),
            });
        }
        if root.children.is_empty() {
            return Ok(());
        }
        info!("processing backup document");

        let register = mode == DocumentMode::InitialConfig;
        let first_instance = register_objects(&mut self.db, &root.children, register)?;
        let mut list = parse_instances(&self.db, &root.children[first_instance..])?;

        if mode == DocumentMode::InitialConfig {
            if let Err(err) = self.sync.sync(&mut self.db, "/:") {
                error!(%err, "cannot synchronise database with test agents");
                return Err(err);
            }
        }

        restore_entries(
            &mut self.db,
            self.sync.as_mut(),
            &mut list,
            subtrees,
            &self.config,
        )
    }

    /// Reconcile live state onto a backup file (RESTORE_NOHISTORY).
    pub fn restore_file(&mut self, path: &Path, subtrees: &[Oid]) -> Result<()> {
        let text = fs::read_to_string(path)?;
        let root = parse_document(&text)?;
        self.process_backup_document(&root, DocumentMode::Restore, subtrees)
    }

    /// Write a backup file describing live state (CREATE).
    pub fn create_file(&mut self, path: &Path, subtrees: &[Oid]) -> Result<()> {
        let text = write_backup(&self.db, subtrees)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Check that live state matches a backup file (VERIFY).
    ///
    /// Divergence in either direction fails: a desired instance that is
    /// missing or carries a different value, or a live fully-added
    /// read-create instance inside the filter that the backup does not
    /// mention.
    pub fn verify_file(&mut self, path: &Path, subtrees: &[Oid]) -> Result<()> {
        let text = fs::read_to_string(path)?;
        let root = parse_document(&text)?;
        if root.name != "backup" {
            return Err(CfgError::UnexpectedTag {
                tag: root.name.clone(),
            });
        }
        let first_instance = register_objects(&mut self.db, &root.children, false)?;
        let list = parse_instances(&self.db, &root.children[first_instance..])?;
        self.verify_list(&list, subtrees)
    }

    fn verify_list(&self, list: &DesiredList, subtrees: &[Oid]) -> Result<()> {
        for entry in list.iter() {
            if !contained_in(subtrees, &entry.oid) || entry.oid.is_agent_root() {
                continue;
            }
            let Some(handle) = self.db.store().find(entry.oid.as_str()) else {
                return Err(CfgError::diverged(format!(
                    "instance {} is missing",
                    entry.oid
                )));
            };
            let live = self
                .db
                .store()
                .get(handle)
                .ok_or_else(|| CfgError::not_found(entry.oid.as_str()))?;
            let value_type = self.db.registry().get(entry.object).value_type;
            if matches!(value_type, ValueType::None | ValueType::Unspecified) {
                continue;
            }
            if live.value != entry.value {
                return Err(CfgError::diverged(format!(
                    "instance {} has value '{}', backup wants '{}'",
                    entry.oid,
                    live.value.to_text(),
                    entry.value.to_text(),
                )));
            }
        }

        for (_, inst) in self.db.store().all() {
            if inst.handle == self.db.store().root()
                || inst.oid.is_agent_root()
                || !inst.added
                || self.db.registry().get(inst.object).access != AccessMode::ReadCreate
                || self.db.is_volatile(inst)
                || !contained_in(subtrees, &inst.oid)
            {
                continue;
            }
            if list.find_by_oid(inst.oid.as_str()).is_none() {
                return Err(CfgError::diverged(format!(
                    "live instance {} is not in the backup",
                    inst.oid
                )));
            }
        }
        Ok(())
    }

    /// Composite operation: verify, restore on mismatch, verify again.
    pub fn verify_and_restore(&mut self, path: &Path, subtrees: &[Oid]) -> Result<()> {
        let Err(err) = self.verify_file(path, subtrees) else {
            return Ok(());
        };
        warn!(%err, "configuration differs from backup, trying to restore");

        if let Err(err) = self.restore_file(path, subtrees) {
            error!(%err, "failed to restore from the backup");
            return Err(err);
        }

        if let Err(err) = self.verify_file(path, subtrees) {
            error!(%err, "configuration still diverges after restore");
            return Err(err);
        }
        Ok(())
    }

    /// Composite verify/restore limited to the subtrees of the named agents.
    /// An empty agent list is a no-op.
    pub fn verify_and_restore_agent_subtrees(
        &mut self,
        path: &Path,
        agents: &[String],
    ) -> Result<()> {
        if agents.is_empty() {
            return Ok(());
        }
        let subtrees = agents
            .iter()
            .map(|ta| Oid::new(format!("/agent:{ta}")))
            .collect::<Result<Vec<Oid>>>()?;
        self.verify_and_restore(path, &subtrees)
    }

    /// Snapshot the live subtree of one agent, resynchronise, and reconcile
    /// the agent back onto the snapshot.
    ///
    /// The prune phase is scoped to the agent's subtree so that state of
    /// other agents is left untouched.
    pub fn restore_agent(&mut self, ta: &str) -> Result<()> {
        let prefix = Oid::new(format!("/agent:{ta}"))?;

        let mut list = DesiredList::new();
        for (_, inst) in self.db.store().all() {
            if !prefix.is_prefix_of(&inst.oid) {
                continue;
            }
            list.push(
                inst.oid.clone(),
                inst.object,
                inst.value.clone(),
                inst.handle,
            );
        }

        if let Err(err) = self.sync.sync(&mut self.db, prefix.as_str()) {
            error!(%err, agent = ta, "cannot synchronise agent before restore");
            return Err(err);
        }

        let subtrees = [prefix];
        restore_entries(
            &mut self.db,
            self.sync.as_mut(),
            &mut list,
            &subtrees,
            &self.config,
        )
    }

    /// Write a filter document naming the given subtrees.
    pub fn create_filter_file(&self, path: &Path, subtrees: &[Oid]) -> Result<()> {
        fs::write(path, write_filter(subtrees))?;
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("db", &self.db)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
