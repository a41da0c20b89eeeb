//! Object identifier algebra.
//!
//! OIDs are non-empty `/`-separated paths. Object OIDs name schema nodes
//! (`/agent/interface`); instance OIDs carry a `:name` key on every segment
//! (`/agent:A/interface:eth0`). Three relations matter to the engine:
//! equality, segment-boundary prefix, and the child-first total order used
//! when family links are reconstructed from a flat list.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use tecdb_error::{CfgError, Result};

/// OID of the root object.
pub const ROOT_OBJECT: &str = "/";

/// OID of the root instance.
pub const ROOT_INSTANCE: &str = "/:";

/// Prefix of agent instance OIDs.
pub const AGENT_PREFIX: &str = "/agent:";

/// A validated object or instance identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Oid(String);

impl Oid {
    /// Parse and validate an OID string.
    ///
    /// The string must begin with `/` and contain no empty segments. The two
    /// root forms `/` and `/:` are accepted as-is.
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if s == ROOT_OBJECT || s == ROOT_INSTANCE {
            return Ok(Self(s));
        }
        if !s.starts_with('/') {
            return Err(CfgError::bad_oid(s, "must begin with '/'"));
        }
        if s[1..].split('/').any(str::is_empty) {
            return Err(CfgError::bad_oid(s, "empty segment"));
        }
        Ok(Self(s))
    }

    /// The root object OID, `/`.
    #[must_use]
    pub fn root_object() -> Self {
        Self(ROOT_OBJECT.to_owned())
    }

    /// The root instance OID, `/:`.
    #[must_use]
    pub fn root_instance() -> Self {
        Self(ROOT_INSTANCE.to_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == ROOT_OBJECT || self.0 == ROOT_INSTANCE
    }

    /// Iterate over the `/`-separated segments. The root forms yield their
    /// single (possibly empty) segment.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0[1..].split('/')
    }

    /// Hierarchy depth: the number of `/` characters.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.bytes().filter(|&b| b == b'/').count()
    }

    /// The OID with the last segment dropped; `None` for single-segment OIDs
    /// and the root forms (their parent is the respective root).
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let cut = self.0.rfind('/')?;
        if cut == 0 {
            return None;
        }
        Some(Self(self.0[..cut].to_owned()))
    }

    /// Segment-boundary prefix test: `self` is a prefix of `other` iff
    /// `other` begins with `self` and the next character of `other` is
    /// either absent or `/`. The root object `/` is a prefix of everything.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        if self.0 == ROOT_OBJECT {
            return true;
        }
        match other.0.strip_prefix(self.0.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Strip the `:name` key from every segment, producing the OID of the
    /// object this instance belongs to. `/:` maps to `/`.
    #[must_use]
    pub fn object_oid(&self) -> Self {
        if self.is_root() {
            return Self::root_object();
        }
        let mut out = String::with_capacity(self.0.len());
        for seg in self.segments() {
            out.push('/');
            out.push_str(seg.split_once(':').map_or(seg, |(subid, _)| subid));
        }
        Self(out)
    }

    /// True for agent root instances: `/agent:<name>` with no deeper level.
    #[must_use]
    pub fn is_agent_root(&self) -> bool {
        self.0.starts_with(AGENT_PREFIX) && !self.0[1..].contains('/')
    }

    /// True for object OIDs inside the agent schema subtree (`/agent` and
    /// all of its descendants).
    #[must_use]
    pub fn in_agent_object_subtree(&self) -> bool {
        self.segments().next() == Some("agent")
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Oid {
    type Err = CfgError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for Oid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Oid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Child-first total order on OID strings.
///
/// Byte-wise comparison, except that `/` sorts below every other byte (the
/// terminator aside): when one side reads `/` and the other a different
/// non-terminator byte, the `/` side is less. Under this order an OID is
/// immediately followed by its descendants, before any sibling whose name
/// merely shares a byte prefix:
///
/// `a/b/c` < `a/b/c/y` < `a/b/c-d`
#[must_use]
pub fn cmp_child_first(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let mut i = 0;
    loop {
        let ca = a.get(i).copied().unwrap_or(0);
        let cb = b.get(i).copied().unwrap_or(0);

        if ca == b'/' && cb != b'/' && cb != 0 {
            return Ordering::Less;
        }
        if ca != b'/' && ca != 0 && cb == b'/' {
            return Ordering::Greater;
        }
        match ca.cmp(&cb) {
            Ordering::Equal => {}
            other => return other,
        }
        if ca == 0 {
            return Ordering::Equal;
        }
        i += 1;
    }
}

/// Subtree containment test for partial backup operations.
///
/// An empty filter means "the whole tree": every OID matches. Otherwise the
/// OID must sit under at least one of the subtrees in the segment-boundary
/// prefix sense.
#[must_use]
pub fn contained_in(subtrees: &[Oid], oid: &Oid) -> bool {
    if subtrees.is_empty() {
        return true;
    }
    subtrees.iter().any(|s| s.is_prefix_of(oid))
}
