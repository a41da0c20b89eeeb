use thiserror::Error;

/// Primary error type for tecdb operations.
///
/// Structured variants for every failure the configuration database and the
/// backup/restore engine can report, each mapped onto one of the numeric wire
/// codes in [`ErrorCode`]. The restore loop additionally distinguishes
/// *retryable* errors (a prerequisite instance may appear on a later pass)
/// from operation-fatal ones; see [`CfgError::is_retryable`].
#[derive(Error, Debug)]
pub enum CfgError {
    // === Registration errors ===
    /// An object with this OID is already registered.
    #[error("object already registered: {oid}")]
    DuplicateObject { oid: String },

    /// The value type name is not recognised by the type map.
    #[error("unsupported object type: {name}")]
    UnknownValueType { name: String },

    /// An attribute carries a value outside its accepted set.
    #[error("bad value '{value}' for attribute '{attr}' of <{tag}>")]
    BadAttribute {
        tag: &'static str,
        attr: &'static str,
        value: String,
    },

    /// A required attribute is absent.
    #[error("missing attribute '{attr}' in <{tag}>")]
    MissingAttribute {
        tag: &'static str,
        attr: &'static str,
    },

    /// The document contains an element the codec does not accept here.
    #[error("unexpected element <{tag}>")]
    UnexpectedTag { tag: String },

    /// An element that must be empty carries children.
    #[error("<{tag}> cannot have children")]
    ElementNotEmpty { tag: &'static str },

    // === OID / shape errors ===
    /// The OID string violates the OID grammar.
    #[error("bad OID '{oid}': {detail}")]
    BadOid { oid: String, detail: String },

    /// No registered object matches the instance OID shape.
    #[error("no object for instance {oid}")]
    ObjectNotFound { oid: String },

    /// The instance does not exist in the store.
    #[error("instance not found: {oid}")]
    InstanceNotFound { oid: String },

    /// The handle refers to a slot that has been freed or reused.
    #[error("stale instance handle {handle:#x}")]
    StaleHandle { handle: u64 },

    /// An instance with this OID already exists (double reserve).
    #[error("instance already exists: {oid}")]
    InstanceExists { oid: String },

    // === Value errors ===
    /// The value text cannot be parsed under the declared type.
    #[error("cannot parse '{text}' as {ty}")]
    ValueParse { ty: &'static str, text: String },

    /// The instance requires a value but none was supplied.
    #[error("value is necessary for {oid}")]
    MissingValue { oid: String },

    /// A value was supplied where the object type is none.
    #[error("value is prohibited for {oid}")]
    ValueProhibited { oid: String },

    /// The supplied value does not match the object's declared type.
    #[error("type mismatch for {oid}: expected {expected}, got {actual}")]
    TypeMismatch {
        oid: String,
        expected: &'static str,
        actual: &'static str,
    },

    // === Family-link errors ===
    /// The desired-state list skips a hierarchy level.
    #[error("instance {oid} has no immediate parent")]
    NoImmediateParent { oid: String },

    /// The computed parent candidate is not actually a prefix of the child.
    #[error("{parent} does not seem to be parent of {child}")]
    NotParent { parent: String, child: String },

    // === Access errors ===
    /// The object's access mode forbids this mutation.
    #[error("object is not writable by the engine: {oid}")]
    ReadOnly { oid: String },

    /// The instance still has live children.
    #[error("instance has children: {oid}")]
    HasChildren { oid: String },

    // === Document errors ===
    /// The document is not well-formed XML.
    #[error("malformed document: {detail}")]
    MalformedDocument { detail: String },

    // === Operation outcomes ===
    /// Live state diverges from the backup during verification.
    #[error("configuration diverges from backup: {detail}")]
    BackupDiverged { detail: String },

    /// The restore loop gave up with desired instances still missing.
    #[error("restore did not converge: instances are still missing")]
    ConvergenceFailed,

    // === Resource errors ===
    /// The store refused an allocation.
    #[error("out of memory")]
    OutOfMemory,

    /// File I/O failed while reading or writing a backup document.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Numeric wire codes carried in message status fields.
///
/// Values follow the errno convention so that traces from the engine line up
/// with traces from the agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Successful result.
    Ok = 0,
    /// Operation not permitted.
    Perm = 1,
    /// No such object or instance.
    NoEnt = 2,
    /// Out of memory.
    NoMem = 12,
    /// Invalid argument.
    Inval = 22,
    /// Malformed input document.
    IlSeq = 84,
    /// Already reserved / already exists.
    Already = 114,
}

impl CfgError {
    /// Map this error to its wire code.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::DuplicateObject { .. }
            | Self::UnknownValueType { .. }
            | Self::BadAttribute { .. }
            | Self::MissingAttribute { .. }
            | Self::UnexpectedTag { .. }
            | Self::ElementNotEmpty { .. }
            | Self::BadOid { .. }
            | Self::ObjectNotFound { .. }
            | Self::ValueParse { .. }
            | Self::ValueProhibited { .. }
            | Self::TypeMismatch { .. }
            | Self::NoImmediateParent { .. }
            | Self::NotParent { .. } => ErrorCode::Inval,
            Self::InstanceNotFound { .. }
            | Self::StaleHandle { .. }
            | Self::MissingValue { .. }
            | Self::BackupDiverged { .. }
            | Self::ConvergenceFailed
            | Self::Io(_) => ErrorCode::NoEnt,
            Self::InstanceExists { .. } => ErrorCode::Already,
            Self::ReadOnly { .. } | Self::HasChildren { .. } => ErrorCode::Perm,
            Self::MalformedDocument { .. } => ErrorCode::IlSeq,
            Self::OutOfMemory => ErrorCode::NoMem,
        }
    }

    /// Whether the restore loop may resolve this error on a later pass.
    ///
    /// True only for the "prerequisite is not there yet" shapes: an ADD whose
    /// father instance has not been created yet, or a handle that went stale
    /// between passes. Schema lookups are not retryable: objects never
    /// appear mid-restore.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InstanceNotFound { .. } | Self::StaleHandle { .. }
        )
    }

    /// Create an instance-not-found error.
    pub fn not_found(oid: impl Into<String>) -> Self {
        Self::InstanceNotFound { oid: oid.into() }
    }

    /// Create a malformed-document error.
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedDocument {
            detail: detail.into(),
        }
    }

    /// Create a verification-divergence error.
    pub fn diverged(detail: impl Into<String>) -> Self {
        Self::BackupDiverged {
            detail: detail.into(),
        }
    }

    /// Create a bad-OID error.
    pub fn bad_oid(oid: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::BadOid {
            oid: oid.into(),
            detail: detail.into(),
        }
    }
}

/// Result type alias using `CfgError`.
pub type Result<T> = std::result::Result<T, CfgError>;
