//! Instance store: the live half of the database.
//!
//! Instances occupy slots in an arena; a [`Handle`] packs the slot index
//! with a generation counter so that a handle kept across a delete surfaces
//! as stale instead of aliasing whatever reused the slot. Family links
//! mirror the OID hierarchy and are maintained on every add/delete.

use std::collections::HashMap;
use std::fmt;

use tecdb_error::{CfgError, Result};
use tecdb_types::{CfgValue, Oid};

use crate::object::{AccessMode, ObjectId, ObjectRegistry};

/// Hard cap on live instances; an exhausted store reports `ENOMEM`.
const MAX_INSTANCES: usize = 1 << 20;

/// Opaque stable identifier of a live instance.
///
/// Low 32 bits: slot index; high 32 bits: slot generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(transparent)]
pub struct Handle(u64);

impl Handle {
    /// The invalid handle: never resolves.
    pub const INVALID: Self = Self(u64::MAX);

    const fn new(slot: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | slot as u64)
    }

    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != u64::MAX
    }

    const fn slot(self) -> usize {
        (self.0 & 0xffff_ffff) as usize
    }

    const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{:#x}", self.0)
        } else {
            f.write_str("<invalid>")
        }
    }
}

/// A live object instance.
#[derive(Debug)]
pub struct Instance {
    pub oid: Oid,
    pub object: ObjectId,
    pub value: CfgValue,
    pub handle: Handle,
    /// Fully added: either created non-locally or flushed by a COMMIT.
    pub added: bool,
    /// Carries uncommitted local changes.
    pub local: bool,
    pub father: Option<Handle>,
    pub son: Option<Handle>,
    pub brother: Option<Handle>,
}

/// The live set of instances.
#[derive(Debug)]
pub struct InstanceStore {
    slots: Vec<Option<Instance>>,
    generations: Vec<u32>,
    free: Vec<u32>,
    by_oid: HashMap<String, Handle>,
    root: Handle,
    live: usize,
}

impl InstanceStore {
    /// Create the store with the root instance `/:` bound to `root_object`.
    #[must_use]
    pub fn new(root_object: ObjectId) -> Self {
        let root = Handle::new(0, 0);
        let root_inst = Instance {
            oid: Oid::root_instance(),
            object: root_object,
            value: CfgValue::None,
            handle: root,
            added: true,
            local: false,
            father: None,
            son: None,
            brother: None,
        };
        let mut by_oid = HashMap::new();
        by_oid.insert(root_inst.oid.as_str().to_owned(), root);
        Self {
            slots: vec![Some(root_inst)],
            generations: vec![0],
            free: Vec::new(),
            by_oid,
            root,
            live: 1,
        }
    }

    #[must_use]
    pub const fn root(&self) -> Handle {
        self.root
    }

    /// Number of live instances.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.live
    }

    /// Number of slots ever allocated; slots below this index are stable for
    /// the lifetime of the store.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The instance occupying a slot, if any.
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<&Instance> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Enumerate live instances with their stable slot indices.
    pub fn all(&self) -> impl Iterator<Item = (usize, &Instance)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|inst| (i, inst)))
    }

    #[must_use]
    pub fn find(&self, oid: &str) -> Option<Handle> {
        self.by_oid.get(oid).copied()
    }

    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&Instance> {
        if !handle.is_valid() {
            return None;
        }
        let slot = handle.slot();
        if *self.generations.get(slot)? != handle.generation() {
            return None;
        }
        self.slots.get(slot)?.as_ref()
    }

    fn get_mut(&mut self, handle: Handle) -> Option<&mut Instance> {
        if !handle.is_valid() {
            return None;
        }
        let slot = handle.slot();
        if *self.generations.get(slot)? != handle.generation() {
            return None;
        }
        self.slots.get_mut(slot)?.as_mut()
    }

    /// Add an instance.
    ///
    /// The father instance must already exist; its absence is the `ENOENT`
    /// the restore loop retries on. A `local` add is visible immediately but
    /// stays `added = false` until a COMMIT covers it.
    pub fn add(
        &mut self,
        registry: &ObjectRegistry,
        oid: &Oid,
        value: CfgValue,
        local: bool,
    ) -> Result<Handle> {
        let object = registry
            .find_for_instance(oid)
            .ok_or_else(|| CfgError::ObjectNotFound {
                oid: oid.as_str().to_owned(),
            })?;
        let obj = registry.get(object);
        if !value.matches(obj.value_type) {
            return Err(CfgError::TypeMismatch {
                oid: oid.as_str().to_owned(),
                expected: obj.value_type.wire_name(),
                actual: value.value_type().wire_name(),
            });
        }
        if self.by_oid.contains_key(oid.as_str()) {
            return Err(CfgError::InstanceExists {
                oid: oid.as_str().to_owned(),
            });
        }
        let father = match oid.parent() {
            Some(parent_oid) => self
                .find(parent_oid.as_str())
                .ok_or_else(|| CfgError::not_found(parent_oid.as_str()))?,
            None => self.root,
        };
        if self.live >= MAX_INSTANCES {
            return Err(CfgError::OutOfMemory);
        }

        let handle = match self.free.pop() {
            Some(slot) => Handle::new(slot, self.generations[slot as usize]),
            None => {
                let slot = u32::try_from(self.slots.len()).map_err(|_| CfgError::OutOfMemory)?;
                self.slots.push(None);
                self.generations.push(0);
                Handle::new(slot, 0)
            }
        };

        let brother = self.get(father).and_then(|f| f.son);
        self.slots[handle.slot()] = Some(Instance {
            oid: oid.clone(),
            object,
            value,
            handle,
            added: !local,
            local,
            father: Some(father),
            son: None,
            brother,
        });
        if let Some(f) = self.get_mut(father) {
            f.son = Some(handle);
        }
        self.by_oid.insert(oid.as_str().to_owned(), handle);
        self.live += 1;
        Ok(handle)
    }

    /// Change the value of an instance.
    pub fn set(&mut self, registry: &ObjectRegistry, handle: Handle, value: CfgValue, local: bool) -> Result<()> {
        let object = self
            .get(handle)
            .ok_or(CfgError::StaleHandle {
                handle: handle.raw(),
            })?
            .object;
        let obj = registry.get(object);
        if !value.matches(obj.value_type) {
            let oid = self.get(handle).map_or_else(String::new, |i| i.oid.as_str().to_owned());
            return Err(CfgError::TypeMismatch {
                oid,
                expected: obj.value_type.wire_name(),
                actual: value.value_type().wire_name(),
            });
        }
        let inst = self.get_mut(handle).ok_or(CfgError::StaleHandle {
            handle: handle.raw(),
        })?;
        inst.value = value;
        if local {
            inst.local = true;
        }
        Ok(())
    }

    /// Delete an instance.
    ///
    /// Read-only instances are never deleted by the engine; an instance with
    /// live sons must have them deleted first.
    pub fn del(&mut self, registry: &ObjectRegistry, handle: Handle) -> Result<()> {
        let inst = self.get(handle).ok_or(CfgError::StaleHandle {
            handle: handle.raw(),
        })?;
        if registry.get(inst.object).access == AccessMode::ReadOnly {
            return Err(CfgError::ReadOnly {
                oid: inst.oid.as_str().to_owned(),
            });
        }
        if inst.son.is_some() {
            return Err(CfgError::HasChildren {
                oid: inst.oid.as_str().to_owned(),
            });
        }
        let father = inst.father;
        let brother = inst.brother;
        let oid = inst.oid.as_str().to_owned();

        // Unlink from the father's son chain.
        if let Some(father) = father {
            let first = self.get(father).and_then(|f| f.son);
            if first == Some(handle) {
                if let Some(f) = self.get_mut(father) {
                    f.son = brother;
                }
            } else {
                let mut cur = first;
                while let Some(h) = cur {
                    let next = self.get(h).and_then(|i| i.brother);
                    if next == Some(handle) {
                        if let Some(i) = self.get_mut(h) {
                            i.brother = brother;
                        }
                        break;
                    }
                    cur = next;
                }
            }
        }

        let slot = handle.slot();
        self.slots[slot] = None;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.free.push(u32::try_from(slot).map_err(|_| CfgError::OutOfMemory)?);
        self.by_oid.remove(&oid);
        self.live -= 1;
        Ok(())
    }

    /// Flush local changes under `oid`: every instance in the subtree loses
    /// its `local` mark and becomes `added`. A commit that covers no local
    /// change is a no-op.
    pub fn commit(&mut self, oid: &Oid) -> Result<()> {
        let root = self
            .find(oid.as_str())
            .ok_or_else(|| CfgError::not_found(oid.as_str()))?;
        let mut stack = vec![root];
        while let Some(h) = stack.pop() {
            let Some(inst) = self.get_mut(h) else {
                continue;
            };
            inst.local = false;
            inst.added = true;
            let mut cur = self.get(h).and_then(|i| i.son);
            while let Some(c) = cur {
                stack.push(c);
                cur = self.get(c).and_then(|i| i.brother);
            }
        }
        Ok(())
    }
}
