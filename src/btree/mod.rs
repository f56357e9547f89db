//! B+Tree range engine.
//!
//! This module provides an in-memory order-statistic B+Tree that supports:
//! - Point lookups, insertions and deletions
//! - Rank resolution (index_of) and selection (locate)
//! - Exact range counts
//! - Chunked range cursors with optional filtering and deletion

mod cursor;
mod filter;
mod tree;

pub use cursor::{Entries, Entry, RangeCursor};
pub(crate) use cursor::TreeAccess;
pub use filter::{AcceptAll, EntryFilter, FnFilter};
pub use tree::BTree;
