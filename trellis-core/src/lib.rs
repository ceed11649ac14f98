//! Trellis Core
//!
//! This crate provides tracked storage for building custom reactive data
//! structures. It implements:
//!
//! - Storage cells whose reads are tracked and whose writes invalidate readers
//! - Lazily recomputed, memoized derived values
//! - A per-thread tracking stack that records what each evaluation reads
//! - Keyed collections built from one cell per entry
//!
//! # Architecture
//!
//! - `reactive`: cells, computations, and the tracking runtime
//! - `collections`: data structures layered on top of cells
//! - `error`: the crate's error type
//!
//! # Example
//!
//! ```rust
//! use trellis_core::reactive::{Cell, Computation};
//!
//! let first = Cell::new(String::from("Ada"));
//! let last = Cell::new(String::from("Lovelace"));
//!
//! let full = Computation::new({
//!     let (first, last) = (first.clone(), last.clone());
//!     move || Ok(format!("{} {}", first.get()?, last.get()?))
//! });
//!
//! assert_eq!(full.get().unwrap(), "Ada Lovelace");
//!
//! last.set(String::from("King"));
//! assert_eq!(full.get().unwrap(), "Ada King");
//! ```

pub mod collections;
pub mod error;
pub mod reactive;

pub use error::{BoxError, Error, Result};
