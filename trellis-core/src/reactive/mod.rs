//! Reactive Primitives
//!
//! This module implements tracked storage: cells, derived computations, and the
//! tracking stack that connects them.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`Cell`] holds one mutable value. Reading it inside a tracked evaluation
//! entangles the evaluation with the cell. Writing it bumps the cell's revision,
//! unless the cell's equality predicate judges the write unchanged.
//!
//! ## Computations
//!
//! A [`Computation`] is a derived value that caches its result. It remembers
//! the revision of everything it read and re-evaluates only when one of them
//! moved on.
//!
//! ## Tracking Stack
//!
//! The [`TrackingStack`] records which evaluation is running. [`Runtime`] owns
//! one per thread and is the single point through which frames are pushed and
//! reads are registered.
//!
//! # Implementation Notes
//!
//! Invalidation is pull-based. Cells keep no subscriber lists and writes notify
//! nobody; a computation discovers that it is stale when it is next read, by
//! comparing revisions. There is no back-reference graph to maintain and
//! nothing to unsubscribe when a computation is dropped.

mod cell;
mod computation;
mod context;
mod node;
mod runtime;

pub use cell::{Cell, Equality};
pub use computation::Computation;
pub use context::{ReadSet, TrackingStack};
pub use node::{NodeId, Revision};
pub use runtime::{Runtime, RuntimeConfig, DEFAULT_MAX_DEPTH};
