//! The tecdb configuration database: object registry, instance store and
//! the message surface tying them together.
//!
//! The database is single-writer: all mutation goes through
//! [`Database::process`], which serialises requests the way the message
//! queue in front of it delivers them. Reads are plain method calls.

pub mod instance;
pub mod message;
pub mod object;

use tecdb_error::{CfgError, Result};
use tecdb_types::Oid;
use tracing::{debug, trace};

pub use instance::{Handle, Instance, InstanceStore};
pub use message::{BackupOp, BackupRequest, CfgReply, CfgRequest, RegisterRequest};
pub use object::{AccessMode, DepScope, Dependency, Object, ObjectId, ObjectRegistry};

/// A successfully processed mutation, as observed on the message surface.
///
/// The record log exists for harnesses and tests that assert on message
/// ordering (topological restore/delete); production callers simply never
/// drain it past its small rotation cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpRecord {
    Add { oid: String, ordinal: u32, local: bool },
    Set { oid: String, ordinal: u32, local: bool },
    Del { oid: String, ordinal: u32 },
    Commit { oid: String },
}

const OP_LOG_CAP: usize = 4096;

/// The configuration database.
#[derive(Debug)]
pub struct Database {
    registry: ObjectRegistry,
    store: InstanceStore,
    op_log: Vec<OpRecord>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    #[must_use]
    pub fn new() -> Self {
        let registry = ObjectRegistry::new();
        let store = InstanceStore::new(registry.root());
        Self {
            registry,
            store,
            op_log: Vec::new(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> &InstanceStore {
        &self.store
    }

    /// True when the instance sits in a volatile subtree (its object or any
    /// ancestor object is volatile).
    #[must_use]
    pub fn is_volatile(&self, inst: &Instance) -> bool {
        self.registry.is_volatile_subtree(inst.object)
    }

    /// Drain the mutation record log.
    pub fn drain_op_log(&mut self) -> Vec<OpRecord> {
        std::mem::take(&mut self.op_log)
    }

    fn record(&mut self, rec: OpRecord) {
        if self.op_log.len() >= OP_LOG_CAP {
            self.op_log.remove(0);
        }
        self.op_log.push(rec);
    }

    /// Process one request.
    ///
    /// `synchronous` is part of the wire contract; the in-process store
    /// completes every request before returning, so the flag only shows up
    /// in traces.
    pub fn process(&mut self, req: CfgRequest, synchronous: bool) -> Result<CfgReply> {
        trace!(?req, synchronous, "processing request");
        match req {
            CfgRequest::Register(reg) => {
                self.registry.register(&reg)?;
                debug!(oid = reg.oid.as_str(), "registered object");
                Ok(CfgReply::None)
            }
            CfgRequest::AddDependency {
                dependant,
                target,
                object_wide,
            } => {
                let scope = if object_wide {
                    DepScope::ObjectWide
                } else {
                    DepScope::Instance
                };
                self.registry.add_dependency(&dependant, &target, scope)?;
                Ok(CfgReply::None)
            }
            CfgRequest::Add { oid, value, local } => {
                let handle = self.store.add(&self.registry, &oid, value, local)?;
                let ordinal = self.ordinal_of(&oid);
                self.record(OpRecord::Add {
                    oid: oid.as_str().to_owned(),
                    ordinal,
                    local,
                });
                Ok(CfgReply::Handle(handle))
            }
            CfgRequest::Set {
                handle,
                value,
                local,
            } => {
                self.store.set(&self.registry, handle, value, local)?;
                let (oid, ordinal) = self.describe(handle);
                self.record(OpRecord::Set {
                    oid,
                    ordinal,
                    local,
                });
                Ok(CfgReply::None)
            }
            CfgRequest::Del { handle, local: _ } => {
                let (oid, ordinal) = self.describe(handle);
                self.store.del(&self.registry, handle)?;
                self.record(OpRecord::Del { oid, ordinal });
                Ok(CfgReply::None)
            }
            CfgRequest::Commit { oid } => {
                self.store.commit(&oid)?;
                self.record(OpRecord::Commit {
                    oid: oid.as_str().to_owned(),
                });
                Ok(CfgReply::None)
            }
            CfgRequest::Backup(_) => Err(CfgError::UnexpectedTag {
                tag: "backup".to_owned(),
            }),
        }
    }

    fn ordinal_of(&self, oid: &Oid) -> u32 {
        self.registry
            .find_for_instance(oid)
            .map_or(0, |id| self.registry.get(id).ordinal)
    }

    fn describe(&self, handle: Handle) -> (String, u32) {
        self.store.get(handle).map_or_else(
            || (String::new(), 0),
            |inst| {
                (
                    inst.oid.as_str().to_owned(),
                    self.registry.get(inst.object).ordinal,
                )
            },
        )
    }
}
