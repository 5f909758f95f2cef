//! Resizable blocking queue for ElastiPool worker pools.
//!
//! This crate provides [`ResizableQueue`], a bounded FIFO queue of linked
//! nodes whose capacity bound can be changed while producers and consumers
//! are active:
//! - independent put-side and take-side locks so one inserter and one
//!   remover can proceed without contending
//! - blocking, timed, and fail-fast variants of insertion and removal
//! - whole-structure operations (resize, scan, clear) under both locks in
//!   a fixed take-then-put order

mod resizable;

pub use resizable::{Iter, ResizableQueue};
