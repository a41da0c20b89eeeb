//! The desired-state list.
//!
//! Instance descriptors parsed from a backup document, linked in document
//! order and later re-linked by the topological sorter. Descriptors live in
//! an arena and refer to each other by index: the chain link (`next`) and
//! the family links (`father`/`son`/`brother`) are indices, never pointers.

use tecdb_db::{Handle, ObjectId};
use tecdb_types::{CfgValue, Oid};

/// One desired instance.
#[derive(Debug)]
pub struct DesiredEntry {
    pub oid: Oid,
    pub object: ObjectId,
    pub value: CfgValue,
    /// Existing store handle, or [`Handle::INVALID`] when the instance does
    /// not exist yet.
    pub handle: Handle,
    /// Set by the restore loop once the instance exists with the desired
    /// value (or was successfully created this pass).
    pub added: bool,
    pub next: Option<usize>,
    pub father: Option<usize>,
    pub son: Option<usize>,
    pub brother: Option<usize>,
}

/// The list arena. Entries keep their indices for the lifetime of the list;
/// sorting only rewires the `next` chain.
#[derive(Debug, Default)]
pub struct DesiredList {
    entries: Vec<DesiredEntry>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl DesiredList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor at the end of the chain.
    pub fn push(&mut self, oid: Oid, object: ObjectId, value: CfgValue, handle: Handle) -> usize {
        let index = self.entries.len();
        self.entries.push(DesiredEntry {
            oid,
            object,
            value,
            handle,
            added: false,
            next: None,
            father: None,
            son: None,
            brother: None,
        });
        match self.tail {
            Some(tail) => self.entries[tail].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        index
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn head(&self) -> Option<usize> {
        self.head
    }

    #[must_use]
    pub fn get(&self, index: usize) -> &DesiredEntry {
        &self.entries[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut DesiredEntry {
        &mut self.entries[index]
    }

    /// Entry indices in chain order.
    #[must_use]
    pub fn chain(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.entries.len());
        let mut cur = self.head;
        while let Some(i) = cur {
            out.push(i);
            cur = self.entries[i].next;
        }
        out
    }

    /// Rewire the `next` chain to the given order. The order must be a
    /// permutation of all entry indices.
    pub fn relink(&mut self, order: &[usize]) {
        debug_assert_eq!(order.len(), self.entries.len());
        self.head = order.first().copied();
        self.tail = order.last().copied();
        for window in order.windows(2) {
            self.entries[window[0]].next = Some(window[1]);
        }
        if let Some(&last) = order.last() {
            self.entries[last].next = None;
        }
    }

    /// Find the entry with exactly this OID.
    #[must_use]
    pub fn find_by_oid(&self, oid: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.oid.as_str() == oid)
    }

    /// Iterate over entries in chain order.
    pub fn iter(&self) -> impl Iterator<Item = &DesiredEntry> {
        let mut cur = self.head;
        std::iter::from_fn(move || {
            let i = cur?;
            cur = self.entries[i].next;
            Some(&self.entries[i])
        })
    }
}
