#![forbid(unsafe_code)]

//! Chunked-tree reconciler: a balanced, bounded-fanout tree over a flat
//! ordered sequence of opaque child items.
//!
//! Given a new desired sequence, [`reconcile`] mutates an existing
//! [`BlockTree`] in place until its left-to-right leaf traversal equals the
//! sequence, keeping every chunk's fanout within the configured bound and
//! recording exactly which chunks were touched so a renderer re-paints only
//! those subtrees.
//!
//! - [`BlockItem`] - the item seam: handle identity plus key resolution
//! - [`BlockTree`] - arena-backed tree model with invalidation bookkeeping
//! - [`TreeCursor`] - stateful position; navigation and structural edits
//! - [`reconcile`] / [`ChangeObserver`] - drive a tree to a new sequence
//! - [`TreeRegistry`] - one tree per parent, explicit release
//!
//! # Example
//!
//! ```
//! use blocktree_core::{reconcile, BlockItem, BlockTree, ReconcileOptions};
//! use std::rc::Rc;
//!
//! #[derive(Clone)]
//! struct Block(Rc<u64>);
//!
//! impl BlockItem for Block {
//!     type Key = u64;
//!     fn key(&self) -> u64 {
//!         *self.0
//!     }
//!     fn same(&self, other: &Self) -> bool {
//!         Rc::ptr_eq(&self.0, &other.0)
//!     }
//! }
//!
//! let blocks: Vec<Block> = (0..10).map(|k| Block(Rc::new(k))).collect();
//! let mut tree = BlockTree::new();
//! reconcile(&mut tree, &blocks, ReconcileOptions::new(3), &mut ());
//!
//! let keys: Vec<u64> = tree.leaf_items().iter().map(|b| b.key()).collect();
//! assert_eq!(keys, (0..10).collect::<Vec<_>>());
//! ```
//!
//! # Model
//!
//! Everything is single-threaded and runs to completion; the cursor owns
//! the tree mutably for a whole reconciliation, and callers serialize
//! externally. There are no recoverable errors: precondition violations
//! panic (they indicate a bug in the caller or the engine, not bad data).

pub mod cursor;
pub mod item;
pub mod mutate;
pub mod node;
pub mod reconcile;
pub mod registry;
pub mod tree;
pub mod validate;

#[cfg(test)]
mod test_util;

pub use cursor::{SavedPointer, TreeCursor};
pub use item::BlockItem;
pub use node::{ChunkKey, NodeId};
pub use reconcile::{reconcile, ChangeObserver, ReconcileOptions};
pub use registry::TreeRegistry;
pub use tree::{BlockTree, Leaves};
pub use validate::validate_tree;
