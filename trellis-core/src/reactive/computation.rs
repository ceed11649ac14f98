//! Computation Implementation
//!
//! A [`Computation`] is a cached derived value. It evaluates lazily, remembers
//! what it read, and re-evaluates only when something it read has changed.
//!
//! # How Computations Work
//!
//! 1. Creating a computation does not run it.
//!
//! 2. The first read evaluates the derivation inside a tracking frame. The
//!    frame's reads, with the revision each had, become the snapshot.
//!
//! 3. Later reads walk the snapshot in read order. Each dependency is asked
//!    for its current revision; a computation dependency brings itself up to
//!    date first. The first mismatch triggers a re-evaluation, otherwise the
//!    cached value is returned as is.
//!
//! 4. A re-evaluation that produces a value equal to the cached one (under the
//!    computation's equality predicate) still replaces the cached value but
//!    keeps the computation's revision, so readers further up do not
//!    re-evaluate.
//!
//! Writes never push anything; all of this happens on read. Because a
//! dependency is always refreshed before it is compared, a reader never sees
//! a half-updated graph.
//!
//! # Failures
//!
//! If the derivation fails, the cached value and snapshot stay as they were,
//! the computation stays stale, and the error goes to the caller. The next
//! read tries again.
//!
//! A failed read still entangles the reader, so a derivation that recovers
//! from a dependency's error (falling back to a default, say) is re-evaluated
//! once that dependency can be read again. A dependency that fails while its
//! reader checks for staleness counts as changed, unless it failed on the
//! depth limit.

use std::cell::{Cell as Flag, RefCell};
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::cell::Equality;
use super::node::{Dependency, NodeId, Revision, Source};
use super::runtime::Runtime;
use crate::error::{Error, Result};

type Derivation<T> = Box<dyn Fn() -> Result<T>>;

struct Memo<T> {
    /// `None` until the first successful evaluation. Shared so readers can
    /// release the memo before looking at the value.
    value: Option<Rc<T>>,
    revision: Revision,
    dependencies: SmallVec<[Dependency; 4]>,
    stale: bool,
}

struct ComputationInner<T> {
    id: NodeId,
    compute: Derivation<T>,
    equality: Equality<T>,
    memo: RefCell<Memo<T>>,
    evaluating: Flag<bool>,
}

/// Marks a computation as evaluating for as long as it lives.
struct Evaluating<'a> {
    flag: &'a Flag<bool>,
}

impl<'a> Evaluating<'a> {
    fn enter(flag: &'a Flag<bool>, id: NodeId) -> Result<Self> {
        if flag.replace(true) {
            warn!(node = %id, "dependency cycle detected");
            return Err(Error::Cycle { node: id });
        }
        Ok(Self { flag })
    }
}

impl Drop for Evaluating<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

impl<T: 'static> ComputationInner<T> {
    /// Bring the memo up to date and return the value with its revision.
    fn read(&self) -> Result<(Rc<T>, Revision)> {
        let _evaluating = Evaluating::enter(&self.evaluating, self.id)?;
        let _nesting = Runtime::enter_evaluation()?;

        if !self.needs_recompute()? {
            let memo = self.memo.borrow();
            if let Some(value) = memo.value.as_ref() {
                trace!(node = %self.id, "cache hit");
                return Ok((Rc::clone(value), memo.revision));
            }
        }

        self.recompute()
    }

    fn needs_recompute(&self) -> Result<bool> {
        let dependencies = {
            let memo = self.memo.borrow();
            if memo.stale || memo.value.is_none() {
                return Ok(true);
            }
            memo.dependencies.clone()
        };

        for dependency in &dependencies {
            match dependency.has_changed() {
                Ok(false) => {}
                Ok(true) => {
                    trace!(node = %self.id, dependency = %dependency.id(), "dependency changed");
                    return Ok(true);
                }
                // Re-evaluating would only nest deeper.
                Err(err @ Error::DepthExceeded { .. }) => return Err(err),
                // The derivation reads it again and decides what the error means.
                Err(err) => {
                    debug!(node = %self.id, dependency = %dependency.id(), %err, "dependency failed");
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn recompute(&self) -> Result<(Rc<T>, Revision)> {
        self.memo.borrow_mut().stale = true;

        let (value, reads) = Runtime::run_tracked(|| (self.compute)()).map_err(|err| {
            debug!(node = %self.id, %err, "recomputation failed");
            err
        })?;

        let mut memo = self.memo.borrow_mut();
        let changed = match memo.value.as_ref() {
            Some(previous) => !(self.equality)(previous.as_ref(), &value),
            None => true,
        };
        if changed {
            memo.revision = memo.revision.next();
        }
        debug!(
            node = %self.id,
            changed,
            revision = memo.revision.raw(),
            dependencies = reads.len(),
            "recomputed"
        );

        let value = Rc::new(value);
        memo.value = Some(Rc::clone(&value));
        memo.dependencies = reads.into_dependencies();
        memo.stale = false;
        Ok((value, memo.revision))
    }
}

impl<T: 'static> Source for ComputationInner<T> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn refresh(&self) -> Result<Revision> {
        self.read().map(|(_, revision)| revision)
    }
}

/// A cached derived value that recomputes only when its dependencies change.
///
/// Cloning a computation clones the handle; clones share one cache.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::{Cell, Computation};
///
/// let count = Cell::new(2);
/// let doubled = Computation::new({
///     let count = count.clone();
///     move || Ok(count.get()? * 2)
/// });
///
/// assert_eq!(doubled.get().unwrap(), 4);
/// count.set(5);
/// assert_eq!(doubled.get().unwrap(), 10);
/// ```
pub struct Computation<T: 'static> {
    inner: Rc<ComputationInner<T>>,
}

impl<T> Computation<T>
where
    T: PartialEq + 'static,
{
    /// Create a computation whose results are compared with `PartialEq`.
    ///
    /// The derivation is not run until the first read.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        Self::with_equality(compute, Box::new(|old: &T, new: &T| old == new))
    }
}

impl<T: 'static> Computation<T> {
    /// Create a computation with an explicit equality predicate.
    ///
    /// `equality(old, new)` returning true means a re-evaluation produced
    /// nothing new, and readers of this computation stay cached.
    pub fn with_equality<F>(compute: F, equality: Equality<T>) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        Self {
            inner: Rc::new(ComputationInner {
                id: NodeId::new(),
                compute: Box::new(compute),
                equality,
                memo: RefCell::new(Memo {
                    value: None,
                    revision: Revision::INITIAL,
                    dependencies: SmallVec::new(),
                    stale: true,
                }),
                evaluating: Flag::new(false),
            }),
        }
    }

    /// Get the computation's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Borrow the up-to-date value, registering a read.
    ///
    /// A failed read is registered too, in a way that never matches, so the
    /// reader re-evaluates on its next read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        match self.inner.read() {
            Ok((value, revision)) => {
                Runtime::register_read(Dependency::new(self.inner.clone(), revision));
                Ok(f(value.as_ref()))
            }
            Err(err) => {
                Runtime::register_read(Dependency::new(self.inner.clone(), Revision::FAILED));
                Err(err)
            }
        }
    }

    /// Revision of the last evaluation that produced a new value.
    ///
    /// This is the cached revision; it does not bring the computation up to
    /// date.
    pub fn revision(&self) -> Revision {
        self.inner.memo.borrow().revision
    }

    /// Whether the next read is certain to evaluate the derivation: it never
    /// succeeded, or its last evaluation failed.
    ///
    /// Staleness caused by a changed dependency is only discovered on read.
    pub fn is_stale(&self) -> bool {
        let memo = self.inner.memo.borrow();
        memo.stale || memo.value.is_none()
    }

    /// Number of distinct nodes read by the last successful evaluation.
    pub fn dependency_count(&self) -> usize {
        self.inner.memo.borrow().dependencies.len()
    }
}

impl<T: Clone + 'static> Computation<T> {
    /// Get the current value, recomputing if necessary.
    pub fn get(&self) -> Result<T> {
        self.with(T::clone)
    }
}

impl<T: 'static> Clone for Computation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> fmt::Debug for Computation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("id", &self.id())
            .field("revision", &self.revision())
            .field("stale", &self.is_stale())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}
