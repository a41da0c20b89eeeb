//! The message surface of the database.
//!
//! Every mutation of live state travels through [`crate::Database::process`]
//! as one of these requests. Each request is a discriminated union whose
//! payload owns its strings; the wire layer serialises them.

use std::path::PathBuf;

use tecdb_types::{CfgValue, Oid, ValueType};

use crate::instance::Handle;
use crate::object::AccessMode;

/// Schema registration payload.
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub oid: Oid,
    pub value_type: ValueType,
    pub access: AccessMode,
    pub volatile: bool,
    pub unit: bool,
    /// Suppress the implicit dependency edge on the parent object.
    pub no_parent_dep: bool,
    /// Textual default value, validated against `value_type` at
    /// registration.
    pub default_value: Option<String>,
    /// Reserved; accepted and ignored.
    pub substitution: bool,
}

impl RegisterRequest {
    /// A read-create, valueless object with no special flags.
    #[must_use]
    pub fn plain(oid: Oid) -> Self {
        Self {
            oid,
            value_type: ValueType::None,
            access: AccessMode::ReadCreate,
            volatile: false,
            unit: false,
            no_parent_dep: false,
            default_value: None,
            substitution: false,
        }
    }
}

/// Discriminator of backup operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupOp {
    /// Check that live state matches the document.
    Verify,
    /// Reconcile live state onto the document.
    RestoreNohistory,
    /// Write a document describing live state.
    Create,
    /// Verify; on mismatch restore and verify again.
    VerifyAndRestore,
}

/// Backup operation payload.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub op: BackupOp,
    pub filename: PathBuf,
    /// Subtree filter; empty means the whole tree.
    pub subtrees: Vec<Oid>,
}

/// A request to the database layer.
#[derive(Debug, Clone)]
pub enum CfgRequest {
    Register(RegisterRequest),
    AddDependency {
        dependant: Oid,
        target: Oid,
        object_wide: bool,
    },
    Add {
        oid: Oid,
        value: CfgValue,
        local: bool,
    },
    Set {
        handle: Handle,
        value: CfgValue,
        local: bool,
    },
    Del {
        handle: Handle,
        local: bool,
    },
    Commit {
        oid: Oid,
    },
    /// Dispatched by the engine layer, not by the database itself.
    Backup(BackupRequest),
}

/// Successful reply to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfgReply {
    None,
    Handle(Handle),
}

impl CfgReply {
    /// The handle carried by the reply, if any.
    #[must_use]
    pub const fn handle(self) -> Option<Handle> {
        match self {
            Self::Handle(h) => Some(h),
            Self::None => None,
        }
    }
}
