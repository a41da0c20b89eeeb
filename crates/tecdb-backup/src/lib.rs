//! Backup/restore engine of the tecdb configuration database.
//!
//! A backup document describes a desired state: the schema (objects with
//! their dependencies) followed by the instances with their values. The
//! engine parses documents into desired-state lists, deletes live instances
//! the document no longer wants in reverse-topological order, converges the
//! live database onto the list in dependency order with bounded retries,
//! and emits documents describing live state.

pub mod codec;
pub mod desired;
pub mod doc;
pub mod family;
pub mod ops;
pub mod prune;
pub mod restore;
pub mod toposort;

pub use desired::{DesiredEntry, DesiredList};
pub use doc::{Content, Node, parse_document, xml_escape};
pub use ops::{DocumentMode, Engine};
pub use restore::{AgentSync, EngineConfig, NullSync, restore_entries};
