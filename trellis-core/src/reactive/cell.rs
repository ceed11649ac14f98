//! Storage Cell
//!
//! A [`Cell`] is the leaf of the tracking graph: one mutable slot holding one
//! value.
//!
//! # How Cells Work
//!
//! 1. Reading a cell while a tracked evaluation is running registers the cell,
//!    with its current revision, in that evaluation's frame.
//!
//! 2. Writing a cell compares the new value against the old one with the
//!    cell's equality predicate. Only a write judged different replaces the
//!    value and bumps the revision.
//!
//! 3. Nobody is notified. Readers find out on their next read, when they
//!    compare the revision they saw against the current one.
//!
//! A cell keeps no list of readers, so dropping a computation never requires
//! unsubscribing from anything.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use super::node::{Dependency, NodeId, Revision, Source};
use super::runtime::Runtime;
use crate::error::{Error, Result};

/// Stability predicate deciding whether a write changes anything.
pub type Equality<T> = Box<dyn Fn(&T, &T) -> bool>;

struct Slot<T> {
    /// Shared so readers can drop the slot borrow before looking at the value.
    value: Option<Rc<T>>,
    revision: Revision,
}

struct CellInner<T> {
    id: NodeId,
    slot: RefCell<Slot<T>>,
    equality: Equality<T>,
}

impl<T: 'static> Source for CellInner<T> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn refresh(&self) -> Result<Revision> {
        Ok(self.slot.borrow().revision)
    }
}

/// A tracked storage cell holding a value of type `T`.
///
/// Cloning a cell clones the handle; both handles share the same slot.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::Cell;
///
/// let count = Cell::new(0);
/// count.set(5);
/// assert_eq!(count.get().unwrap(), 5);
/// ```
pub struct Cell<T: 'static> {
    inner: Rc<CellInner<T>>,
}

impl<T> Cell<T>
where
    T: PartialEq + 'static,
{
    /// Create a cell holding `value`, compared with `PartialEq` on writes.
    pub fn new(value: T) -> Self {
        Self::with_equality(Some(value), Box::new(|old: &T, new: &T| old == new))
    }

    /// Create a cell with no value. Reading it before the first
    /// [`set`](Cell::set) fails with [`Error::UninitializedAccess`].
    pub fn empty() -> Self {
        Self::with_equality(None, Box::new(|old: &T, new: &T| old == new))
    }
}

impl<T: 'static> Cell<T> {
    /// Create a cell with an explicit stability predicate.
    ///
    /// `equality(old, new)` returning true makes a write a no-op.
    pub fn with_equality(initial: Option<T>, equality: Equality<T>) -> Self {
        Self {
            inner: Rc::new(CellInner {
                id: NodeId::new(),
                slot: RefCell::new(Slot {
                    value: initial.map(Rc::new),
                    revision: Revision::INITIAL,
                }),
                equality,
            }),
        }
    }

    /// Create a cell whose every write counts as a change.
    ///
    /// Useful for marker cells that stand for structure rather than a value,
    /// such as the key set of a collection.
    pub fn always_dirty(initial: Option<T>) -> Self {
        Self::with_equality(initial, Box::new(|_: &T, _: &T| false))
    }

    /// Get the cell's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// The revision of the last effective write.
    pub fn revision(&self) -> Revision {
        self.inner.slot.borrow().revision
    }

    /// Whether any handle besides this one is alive.
    pub(crate) fn is_shared(&self) -> bool {
        Rc::strong_count(&self.inner) > 1
    }

    /// Whether the cell has ever held a value.
    pub fn is_initialized(&self) -> bool {
        self.inner.slot.borrow().value.is_some()
    }

    /// Borrow the current value, registering a read.
    ///
    /// The read is registered even when the cell is empty, so a reader that
    /// recovers from [`Error::UninitializedAccess`] still sees the first write.
    /// `f` sees the value as it was when the read happened, even if it writes
    /// this cell.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let (value, revision) = {
            let slot = self.inner.slot.borrow();
            (slot.value.clone(), slot.revision)
        };
        Runtime::register_read(Dependency::new(self.inner.clone(), revision));
        let value = value.ok_or(Error::UninitializedAccess { cell: self.inner.id })?;
        Ok(f(value.as_ref()))
    }

    /// Store `value` unless the equality predicate says nothing changed.
    ///
    /// The first write to an empty cell always counts as a change.
    pub fn set(&self, value: T) {
        let mut slot = self.inner.slot.borrow_mut();
        if let Some(current) = slot.value.as_ref() {
            if (self.inner.equality)(current.as_ref(), &value) {
                trace!(cell = %self.inner.id, "stable write ignored");
                return;
            }
        }
        slot.value = Some(Rc::new(value));
        slot.revision = slot.revision.next();
        debug!(cell = %self.inner.id, revision = slot.revision.raw(), "cell written");
    }

    /// Write a value derived from the current one, with the same stability
    /// rules as [`set`](Cell::set). Does not register a read.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let current = self
            .inner
            .slot
            .borrow()
            .value
            .clone()
            .ok_or(Error::UninitializedAccess { cell: self.inner.id })?;
        self.set(f(current.as_ref()));
        Ok(())
    }
}

impl<T: Clone + 'static> Cell<T> {
    /// Get the current value, registering a read.
    pub fn get(&self) -> Result<T> {
        self.with(T::clone)
    }
}

impl<T: 'static> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id())
            .field("revision", &self.revision())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
