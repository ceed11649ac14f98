//! Node identity and revisions.
//!
//! Every cell and computation gets a [`NodeId`] when created. Tracking frames
//! deduplicate reads by this ID, and errors name the node they concern.
//!
//! A [`Revision`] is a per-node change counter. Readers remember the revision
//! they observed and later compare it against the node's current revision to
//! find out whether anything changed, without the node ever knowing who read it.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;

/// Unique identifier for a cell or computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    ///
    /// Uses an atomic counter so IDs stay unique across threads, even though
    /// each thread tracks its own reads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A monotonically increasing change counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Revision(u64);

impl Revision {
    /// The revision of a node that has never changed.
    pub const INITIAL: Revision = Revision(0);

    /// Recorded for reads that failed. No node ever reaches it.
    pub(crate) const FAILED: Revision = Revision(u64::MAX);

    /// The revision following this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Get the raw counter value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A node that can be recorded as a dependency.
///
/// Cells simply report their revision. Computations first bring themselves
/// up to date, which is how staleness resolves bottom-up.
pub(crate) trait Source {
    fn id(&self) -> NodeId;

    /// Bring the node up to date and return its current revision.
    fn refresh(&self) -> Result<Revision>;
}

/// A dependency as observed by a reader: the node plus the revision seen.
#[derive(Clone)]
pub(crate) struct Dependency {
    pub(crate) source: Rc<dyn Source>,
    pub(crate) seen: Revision,
}

impl Dependency {
    pub(crate) fn new(source: Rc<dyn Source>, seen: Revision) -> Self {
        Self { source, seen }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.source.id()
    }

    /// Whether the node moved past the revision this reader saw.
    pub(crate) fn has_changed(&self) -> Result<bool> {
        Ok(self.source.refresh()? != self.seen)
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("id", &self.id())
            .field("seen", &self.seen)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        let id3 = NodeId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn revisions_only_move_forward() {
        let start = Revision::INITIAL;
        let next = start.next();

        assert!(next > start);
        assert_eq!(next.raw(), 1);
        assert_eq!(next.next().raw(), 2);
    }

    struct Failing;

    impl Source for Failing {
        fn id(&self) -> NodeId {
            NodeId::new()
        }

        fn refresh(&self) -> Result<Revision> {
            Err(crate::Error::failed("unreadable"))
        }
    }

    #[test]
    fn failed_reads_never_match() {
        let dependency = Dependency::new(Rc::new(Failing), Revision::FAILED);
        assert!(dependency.has_changed().is_err());
        assert!(Revision::FAILED > Revision::INITIAL.next());
    }
}
