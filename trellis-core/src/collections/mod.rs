//! Tracked Collections
//!
//! Data structures built from cells. Each collection carries two levels of
//! tracking:
//!
//! 1. One cell per entry: readers of a single key only re-evaluate when that
//!    key is written, inserted, or removed.
//! 2. One structural cell: readers of the key set or the length re-evaluate on
//!    every insert or remove, regardless of which key it touched.

mod map;

pub use map::TrackedMap;
