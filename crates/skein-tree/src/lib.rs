// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Ordered registry: an arena-backed red-black tree map.
//!
//! Stores fixed-size entries keyed by `Ord`, balanced so lookups,
//! inserts, and removals stay logarithmic under any interleaving.
//! Nodes live in a slot arena and link to each other through stable
//! integer handles instead of raw pointers.
//!
//! Components:
//! - `arena` — slot storage with an intrusive free list
//! - `tree`  — the red-black map itself

mod arena;
mod tree;

pub use tree::{Duplicate, RbTree};
