//! Tracking Context Stack
//!
//! The tracking stack records which evaluation is currently running and
//! collects the nodes it reads. Each evaluation owns one frame; nested
//! evaluations (a computation reading another computation) push nested frames.
//!
//! # Implementation
//!
//! A frame is a [`ReadSet`]: reads keyed by node identity, in first-read
//! order, each remembering the revision observed at that first read. Reading
//! the same node twice within one frame keeps the earlier revision, so a
//! write that lands mid-evaluation still marks the reader stale afterwards.
//!
//! The stack itself is a plain value. [`Runtime`](super::Runtime) owns one
//! per thread and is the only place frames get pushed and popped.
//!
//! Besides frames, the stack counts computations that are currently bringing
//! themselves up to date. A computation checking a long chain of cached
//! dependencies nests just as deeply as one evaluating that chain for the
//! first time, but pushes no frames while doing so. Both counts are held to
//! the same limit.

use std::fmt;

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::trace;

use super::node::{Dependency, NodeId};
use super::runtime::RuntimeConfig;
use crate::error::{Error, Result};

/// The set of nodes read during one tracked evaluation.
#[derive(Default, Clone)]
pub struct ReadSet {
    reads: IndexMap<NodeId, Dependency>,
}

impl ReadSet {
    /// Record a read. Returns false if the node was already recorded.
    pub(crate) fn record(&mut self, dependency: Dependency) -> bool {
        let id = dependency.id();
        if self.reads.contains_key(&id) {
            return false;
        }
        self.reads.insert(id, dependency);
        true
    }

    /// Number of distinct nodes read.
    pub fn len(&self) -> usize {
        self.reads.len()
    }

    /// Whether nothing was read.
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    /// Whether the given node was read.
    pub fn contains(&self, id: NodeId) -> bool {
        self.reads.contains_key(&id)
    }

    /// IDs of the nodes read, in first-read order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.reads.keys().copied()
    }

    pub(crate) fn into_dependencies(self) -> SmallVec<[Dependency; 4]> {
        self.reads.into_values().collect()
    }
}

impl fmt::Debug for ReadSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.reads.keys()).finish()
    }
}

/// A stack of tracking frames.
///
/// The depth of the stack is the only state that matters to callers:
/// zero means idle, anything above means a tracked evaluation is running and
/// reads land in the top frame.
#[derive(Debug, Default)]
pub struct TrackingStack {
    frames: SmallVec<[ReadSet; 8]>,
    evaluations: usize,
    config: RuntimeConfig,
}

impl TrackingStack {
    /// Create an empty stack with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty stack with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            frames: SmallVec::new(),
            evaluations: 0,
            config,
        }
    }

    /// Number of active frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Number of computations currently bringing themselves up to date.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Whether a tracked evaluation is running.
    pub fn is_tracking(&self) -> bool {
        !self.frames.is_empty()
    }

    /// The configuration this stack enforces.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn set_config(&mut self, config: RuntimeConfig) {
        self.config = config;
    }

    /// Push an empty frame, returning the new depth.
    pub(crate) fn push(&mut self) -> Result<usize> {
        let limit = self.config.max_depth;
        if self.frames.len() >= limit {
            return Err(Error::DepthExceeded { limit });
        }
        self.frames.push(ReadSet::default());
        Ok(self.frames.len())
    }

    /// Count one more nested computation read.
    pub(crate) fn enter_evaluation(&mut self) -> Result<usize> {
        let limit = self.config.max_depth;
        if self.evaluations >= limit {
            return Err(Error::DepthExceeded { limit });
        }
        self.evaluations += 1;
        Ok(self.evaluations)
    }

    pub(crate) fn exit_evaluation(&mut self) {
        self.evaluations = self.evaluations.saturating_sub(1);
    }

    /// Pop the frame pushed at `depth`.
    ///
    /// A mismatch means a push was not paired with its pop, which breaks
    /// every read set above it. That is an internal bug, so it panics.
    pub(crate) fn pop(&mut self, depth: usize) -> ReadSet {
        assert_eq!(
            self.frames.len(),
            depth,
            "tracking frame corruption: expected depth {}, found {}",
            depth,
            self.frames.len()
        );
        self.frames.pop().unwrap_or_default()
    }

    /// Record a read into the top frame. A no-op when idle.
    pub(crate) fn record(&mut self, dependency: Dependency) {
        let depth = self.frames.len();
        if let Some(frame) = self.frames.last_mut() {
            let id = dependency.id();
            if frame.record(dependency) {
                trace!(node = %id, depth, "registered read");
            }
        }
    }
}
