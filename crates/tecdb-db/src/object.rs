//! Object registry: the schema half of the database.
//!
//! Objects are immutable after registration apart from their dependency
//! lists and ordinals. They live in an arena indexed by [`ObjectId`]; tree
//! and dependency links are indices, never owning pointers.

use std::collections::HashMap;
use std::fmt;

use tecdb_error::{CfgError, Result};
use tecdb_types::{CfgValue, Oid, ValueType};
use tracing::warn;

use crate::message::RegisterRequest;

/// Stable index of an object in the registry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(transparent)]
pub struct ObjectId(u32);

impl ObjectId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// Access mode of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    ReadCreate,
    ReadWrite,
}

impl AccessMode {
    pub fn from_wire(name: &str) -> Result<Self> {
        match name {
            "read_only" => Ok(Self::ReadOnly),
            "read_create" => Ok(Self::ReadCreate),
            "read_write" => Ok(Self::ReadWrite),
            _ => Err(CfgError::BadAttribute {
                tag: "object",
                attr: "access",
                value: name.to_owned(),
            }),
        }
    }

    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::ReadCreate => "read_create",
            Self::ReadWrite => "read_write",
        }
    }
}

/// Scope of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepScope {
    /// Adding or removing any instance of the master may invalidate
    /// instances of the dependant.
    Instance,
    /// The whole dependant class is affected.
    ObjectWide,
}

/// A dependency edge from a dependant object to its master.
#[derive(Debug, Clone, Copy)]
pub struct Dependency {
    pub target: ObjectId,
    pub scope: DepScope,
    /// Recorded by registration for the parent object; never emitted into
    /// backup documents.
    pub implicit_parent: bool,
}

/// A schema node.
#[derive(Debug)]
pub struct Object {
    pub oid: Oid,
    pub value_type: ValueType,
    pub access: AccessMode,
    pub volatile: bool,
    pub unit: bool,
    /// Some ancestor has `unit = true`; such objects are restored only
    /// through their unit root.
    pub unit_part: bool,
    pub no_parent_dep: bool,
    pub default_value: Option<CfgValue>,
    /// Topological rank: strictly greater than the ordinal of every master
    /// this object depends on, and of its parent.
    pub ordinal: u32,
    pub parent: Option<ObjectId>,
    pub first_child: Option<ObjectId>,
    pub next_sibling: Option<ObjectId>,
    /// Masters this object depends on.
    pub depends_on: Vec<Dependency>,
    /// Objects depending on this one.
    pub dependants: Vec<ObjectId>,
}

impl Object {
    #[must_use]
    pub fn has_dependants(&self) -> bool {
        !self.dependants.is_empty()
    }
}

/// The registry arena. Created with the root object `/` at ordinal 0.
#[derive(Debug)]
pub struct ObjectRegistry {
    objects: Vec<Object>,
    by_oid: HashMap<String, ObjectId>,
    root: ObjectId,
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectRegistry {
    #[must_use]
    pub fn new() -> Self {
        let root = Object {
            oid: Oid::root_object(),
            value_type: ValueType::None,
            access: AccessMode::ReadOnly,
            volatile: false,
            unit: false,
            unit_part: false,
            no_parent_dep: true,
            default_value: None,
            ordinal: 0,
            parent: None,
            first_child: None,
            next_sibling: None,
            depends_on: Vec::new(),
            dependants: Vec::new(),
        };
        let root_id = ObjectId(0);
        let mut by_oid = HashMap::new();
        by_oid.insert(root.oid.as_str().to_owned(), root_id);
        Self {
            objects: vec![root],
            by_oid,
            root: root_id,
        }
    }

    #[must_use]
    pub const fn root(&self) -> ObjectId {
        self.root
    }

    #[must_use]
    pub fn get(&self, id: ObjectId) -> &Object {
        &self.objects[id.index()]
    }

    #[must_use]
    pub fn find(&self, oid: &str) -> Option<ObjectId> {
        self.by_oid.get(oid).copied()
    }

    /// Resolve the object an instance OID belongs to by stripping the key
    /// part of every segment.
    #[must_use]
    pub fn find_for_instance(&self, instance_oid: &Oid) -> Option<ObjectId> {
        self.find(instance_oid.object_oid().as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterate over the children of an object, leftmost (most recently
    /// registered) first.
    pub fn children(&self, id: ObjectId) -> impl Iterator<Item = ObjectId> + '_ {
        let mut cur = self.get(id).first_child;
        std::iter::from_fn(move || {
            let id = cur?;
            cur = self.get(id).next_sibling;
            Some(id)
        })
    }

    /// True when the object or any of its ancestors is volatile.
    #[must_use]
    pub fn is_volatile_subtree(&self, id: ObjectId) -> bool {
        let mut cur = Some(id);
        while let Some(id) = cur {
            let obj = self.get(id);
            if obj.volatile {
                return true;
            }
            cur = obj.parent;
        }
        false
    }

    /// Register a new object.
    ///
    /// The parent object (identified by dropping the last OID segment) must
    /// already exist. The provisional ordinal is one above the parent's;
    /// `add_dependency` raises it later when explicit edges demand it.
    /// Unless `no_parent_dep`, a dependency edge on the parent is recorded.
    pub fn register(&mut self, req: &RegisterRequest) -> Result<ObjectId> {
        if self.by_oid.contains_key(req.oid.as_str()) {
            return Err(CfgError::DuplicateObject {
                oid: req.oid.as_str().to_owned(),
            });
        }

        let parent_id = match req.oid.parent() {
            Some(parent_oid) => {
                self.find(parent_oid.as_str())
                    .ok_or_else(|| CfgError::ObjectNotFound {
                        oid: parent_oid.as_str().to_owned(),
                    })?
            }
            None => self.root,
        };

        let default_value = match &req.default_value {
            Some(text) => Some(CfgValue::parse(req.value_type, text)?),
            None => None,
        };

        let parent = self.get(parent_id);
        let ordinal = parent.ordinal + 1;
        let unit_part = parent.unit || parent.unit_part;
        let id = ObjectId(u32::try_from(self.objects.len()).map_err(|_| CfgError::OutOfMemory)?);

        let mut depends_on = Vec::new();
        if !req.no_parent_dep {
            depends_on.push(Dependency {
                target: parent_id,
                scope: DepScope::Instance,
                implicit_parent: true,
            });
        }

        self.objects.push(Object {
            oid: req.oid.clone(),
            value_type: req.value_type,
            access: req.access,
            volatile: req.volatile,
            unit: req.unit,
            unit_part,
            no_parent_dep: req.no_parent_dep,
            default_value,
            ordinal,
            parent: Some(parent_id),
            first_child: None,
            next_sibling: None,
            depends_on,
            dependants: Vec::new(),
        });
        self.by_oid.insert(req.oid.as_str().to_owned(), id);

        let prev_first = self.objects[parent_id.index()].first_child;
        self.objects[id.index()].next_sibling = prev_first;
        self.objects[parent_id.index()].first_child = Some(id);
        if !req.no_parent_dep {
            self.objects[parent_id.index()].dependants.push(id);
        }

        Ok(id)
    }

    /// Record a dependency of `dependant` on `target` and restore ordinal
    /// monotonicity: `ord(target) < ord(dependant)` for every edge.
    pub fn add_dependency(&mut self, dependant: &Oid, target: &Oid, scope: DepScope) -> Result<()> {
        let dep_id = self
            .find(dependant.as_str())
            .ok_or_else(|| CfgError::ObjectNotFound {
                oid: dependant.as_str().to_owned(),
            })?;
        let target_id = self
            .find(target.as_str())
            .ok_or_else(|| CfgError::ObjectNotFound {
                oid: target.as_str().to_owned(),
            })?;
        if dep_id == target_id {
            return Err(CfgError::bad_oid(
                dependant.as_str(),
                "object cannot depend on itself",
            ));
        }

        let already = self.objects[dep_id.index()]
            .depends_on
            .iter()
            .any(|d| d.target == target_id && !d.implicit_parent);
        if already {
            return Ok(());
        }

        self.objects[dep_id.index()].depends_on.push(Dependency {
            target: target_id,
            scope,
            implicit_parent: false,
        });
        self.objects[target_id.index()].dependants.push(dep_id);

        let floor = self.get(target_id).ordinal;
        let mut path = Vec::new();
        self.raise_above(dep_id, floor, &mut path);
        Ok(())
    }

    /// Raise `id`'s ordinal strictly above `floor` and propagate through the
    /// dependants lists. Children registered with the parent dependency are
    /// dependants of their parent and ride along; children registered with
    /// `no_parent_dep` opted out of ordinal maintenance, and the restore
    /// loop's inner retry absorbs the inversions that can produce.
    ///
    /// `path` tracks the active recursion chain: meeting the same object
    /// twice on one chain means the new edge closed a dependency loop, which
    /// cannot be assigned consistent ordinals.
    fn raise_above(&mut self, id: ObjectId, floor: u32, path: &mut Vec<ObjectId>) {
        if path.contains(&id) {
            warn!(
                object = self.get(id).oid.as_str(),
                "dependency loop detected while updating ordinals"
            );
            return;
        }
        if self.get(id).ordinal > floor {
            return;
        }
        let ordinal = floor + 1;
        self.objects[id.index()].ordinal = ordinal;

        path.push(id);
        let dependants = self.get(id).dependants.clone();
        for d in dependants {
            self.raise_above(d, ordinal, path);
        }
        path.pop();
    }
}
