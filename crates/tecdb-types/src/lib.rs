//! Foundation types of the tecdb configuration database: the OID algebra
//! and the dynamically-typed value model.

pub mod oid;
pub mod value;

pub use oid::{AGENT_PREFIX, Oid, ROOT_INSTANCE, ROOT_OBJECT, cmp_child_first, contained_in};
pub use value::{AddrValue, CfgValue, ValueType};
