#![forbid(unsafe_code)]

//! The cursor: a stateful position inside the tree.
//!
//! [`TreeCursor`] borrows the tree mutably for the whole of a
//! reconciliation and is the only path to structural edits (the mutator in
//! [`crate::mutate`] is a second `impl` block on this type). It tracks:
//!
//! - `chunk`: the ancestor currently being scanned,
//! - `index`: position within that ancestor's children; `None` means
//!   "before the first child" (the start state, and the state after a
//!   removal emptied everything to the left),
//! - `stack`: the child index at which `chunk` is nested in each of its
//!   ancestors, root-first, giving O(1) exits,
//! - `reached_end`: terminal flag; forward motion past it is a bug,
//! - `cached`: the node currently under the cursor, recomputed lazily and
//!   invalidated on every move.
//!
//! Navigation is O(depth) worst-case per step and O(1) amortized over a
//! full left-to-right traversal.
//!
//! # Saved pointers
//!
//! [`SavedPointer`] captures a position as a value (`Start` or
//! `(chunk, node)`); restoring recomputes the index and ancestor stack by
//! scanning the chunk's child list and walking parent links. Restoration is
//! O(depth · fanout) and is only used at insertion boundaries, never per
//! leaf. It fails fast if the saved chunk is detached or the saved node has
//! left its chunk.

use smallvec::SmallVec;

use crate::item::BlockItem;
use crate::node::NodeId;
use crate::tree::BlockTree;

/// A position in a [`BlockTree`], with exclusive tree access.
pub struct TreeCursor<'t, T: BlockItem> {
    pub(crate) tree: &'t mut BlockTree<T>,
    /// Fanout bound `C` for mutations made through this cursor.
    pub(crate) chunk_size: usize,
    /// Run the full consistency check after every mutation.
    pub(crate) debug: bool,
    /// The ancestor currently being scanned.
    pub(crate) chunk: NodeId,
    /// Index within `chunk`'s children; `None` = before the first child.
    pub(crate) index: Option<usize>,
    /// Child index of `chunk` within each ancestor, root-first.
    pub(crate) stack: SmallVec<[usize; 8]>,
    /// Set once forward traversal runs off the end of the root.
    pub(crate) reached_end: bool,
    /// The node at `(chunk, index)`, or `None` before the first child,
    /// after the end, or when not yet recomputed.
    pub(crate) cached: Option<NodeId>,
}

/// A cursor position captured as a value.
///
/// Node ids stay valid while the nodes are alive; restoration re-derives
/// everything positional.
#[derive(Debug, Clone, Copy)]
pub enum SavedPointer {
    /// Before the first child of the root.
    Start,
    /// On `node`, a child of `chunk`.
    At { chunk: NodeId, node: NodeId },
}

impl<'t, T: BlockItem> TreeCursor<'t, T> {
    /// Create a cursor at the start position `(root, before-first)`.
    ///
    /// # Panics
    /// Panics if `chunk_size < 2` (a fanout bound of 1 cannot form a tree).
    pub fn new(tree: &'t mut BlockTree<T>, chunk_size: usize, debug: bool) -> Self {
        assert!(chunk_size >= 2, "chunk_size must be at least 2");
        let root = tree.root();
        Self {
            tree,
            chunk_size,
            debug,
            chunk: root,
            index: None,
            stack: SmallVec::new(),
            reached_end: false,
            cached: None,
        }
    }

    /// Read-only view of the tree.
    #[inline]
    pub fn tree(&self) -> &BlockTree<T> {
        self.tree
    }

    /// Mutable tree access for in-crate collaborators (the reconciler swaps
    /// leaf items and allocates leaves through this).
    #[inline]
    pub(crate) fn tree_mut(&mut self) -> &mut BlockTree<T> {
        self.tree
    }

    /// The ancestor currently being scanned.
    #[inline]
    pub fn chunk(&self) -> NodeId {
        self.chunk
    }

    /// Index within the current ancestor; `None` = before the first child.
    #[inline]
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// Whether forward traversal has run off the end.
    #[inline]
    pub fn at_end(&self) -> bool {
        self.reached_end
    }

    #[inline]
    pub(crate) fn at_root(&self) -> bool {
        self.tree.is_root(self.chunk)
    }

    #[inline]
    pub(crate) fn children_len(&self) -> usize {
        self.tree.children(self.chunk).len()
    }

    /// The node under the cursor, or `None` at a before-first position or
    /// past the end. Caches the lookup.
    pub fn current(&mut self) -> Option<NodeId> {
        if self.reached_end {
            return None;
        }
        let i = self.index?;
        if self.cached.is_none() {
            self.cached = Some(self.tree.children(self.chunk)[i]);
        }
        self.cached
    }

    // ── Forward / backward motion ───────────────────────────────────────

    /// Advance to the next leaf in document order.
    ///
    /// Returns `None` exactly once, when the traversal runs off the end of
    /// the root; that call sets the terminal flag.
    ///
    /// # Panics
    /// Panics if called again after the end was reached.
    pub fn read_leaf(&mut self) -> Option<NodeId> {
        assert!(!self.reached_end, "read_leaf called past the end of the tree");
        self.cached = None;

        // Step right, exiting chunks whose children are exhausted.
        loop {
            let next = self.index.map_or(0, |i| i + 1);
            if next < self.children_len() {
                self.index = Some(next);
                break;
            }
            if self.at_root() {
                self.reached_end = true;
                return None;
            }
            self.exit_chunk();
        }

        // Settle: descend through chunks until a leaf is under the cursor.
        loop {
            let node = self.tree.children(self.chunk)[self.index.expect("cursor is positioned")];
            if self.tree.is_chunk(node) {
                self.enter_chunk(false);
            } else {
                self.cached = Some(node);
                return Some(node);
            }
        }
    }

    /// Move to the previous leaf in document order.
    ///
    /// From past-the-end this clears the terminal flag and lands on the last
    /// leaf. From before-the-first-leaf it stays put and returns `None`.
    pub fn return_to_previous_leaf(&mut self) -> Option<NodeId> {
        self.cached = None;

        if self.reached_end {
            self.reached_end = false;
            if self.children_len() == 0 {
                // Empty root: the end and the start coincide.
                self.index = None;
                return None;
            }
            // read_leaf exhausted every ancestor up to the root, so the
            // cursor already rests on the root's last child.
            debug_assert!(self.at_root());
            debug_assert_eq!(self.index, Some(self.children_len() - 1));
            return Some(self.descend_to_last());
        }

        loop {
            match self.index {
                Some(i) if i > 0 => {
                    self.index = Some(i - 1);
                    return Some(self.descend_to_last());
                }
                // At the first child or before it: everything in this chunk
                // is at or to the right of the cursor.
                _ => {
                    if self.at_root() {
                        self.index = None;
                        return None;
                    }
                    self.exit_chunk();
                }
            }
        }
    }

    /// Descend through chunks, taking the last child each time, until a
    /// leaf is under the cursor.
    fn descend_to_last(&mut self) -> NodeId {
        loop {
            let node = self.tree.children(self.chunk)[self.index.expect("cursor is positioned")];
            if self.tree.is_chunk(node) {
                self.enter_chunk(true);
            } else {
                self.cached = Some(node);
                return node;
            }
        }
    }

    // ── Chunk entry / exit ──────────────────────────────────────────────

    /// Descend into the chunk under the cursor, landing on its first child
    /// (or last, if `end`).
    ///
    /// # Panics
    /// Panics if the cursor is not on a node, the node is not a chunk, or
    /// the chunk is empty.
    pub fn enter_chunk(&mut self, end: bool) {
        let node = self
            .current()
            .expect("enter_chunk with no node under the cursor");
        assert!(
            self.tree.is_chunk(node),
            "enter_chunk on a leaf node {node:?}"
        );
        let len = self.tree.children(node).len();
        assert!(len > 0, "enter_chunk on an empty chunk {node:?}");

        self.stack
            .push(self.index.expect("current node implies an index"));
        self.chunk = node;
        self.index = Some(if end { len - 1 } else { 0 });
        self.cached = None;
    }

    /// Ascend to the parent ancestor, landing on the chunk just exited.
    ///
    /// # Panics
    /// Panics at the root.
    pub fn exit_chunk(&mut self) {
        assert!(!self.at_root(), "exit_chunk at the root");
        let up_index = self.stack.pop().expect("non-root cursor has a stack frame");
        self.chunk = self
            .tree
            .parent(self.chunk)
            .expect("non-root chunk has a parent");
        self.index = Some(up_index);
        self.cached = None;
    }

    // ── Save / restore ──────────────────────────────────────────────────

    /// Capture the current position as a value.
    ///
    /// # Panics
    /// Panics on a before-first position anywhere but the root (such a
    /// position cannot be re-derived from a node pair).
    pub fn save(&mut self) -> SavedPointer {
        match self.current() {
            Some(node) => SavedPointer::At {
                chunk: self.chunk,
                node,
            },
            None => {
                assert!(
                    self.at_root(),
                    "cannot save a before-first position inside a chunk"
                );
                SavedPointer::Start
            }
        }
    }

    /// Reposition at a saved pointer, recomputing index and ancestor stack.
    ///
    /// Clears the terminal flag: a restored cursor is always somewhere real.
    ///
    /// # Panics
    /// Panics if the saved chunk was freed or detached from the root, or if
    /// the saved node is no longer among the chunk's children.
    pub fn restore(&mut self, saved: SavedPointer) {
        self.cached = None;
        self.reached_end = false;

        match saved {
            SavedPointer::Start => {
                self.chunk = self.tree.root();
                self.index = None;
                self.stack.clear();
            }
            SavedPointer::At { chunk, node } => {
                assert!(
                    self.tree.is_live(chunk),
                    "restored pointer's chunk {chunk:?} was freed"
                );
                let index = self
                    .tree
                    .children(chunk)
                    .iter()
                    .position(|&c| c == node)
                    .unwrap_or_else(|| {
                        panic!("restored pointer's node {node:?} is no longer in its chunk")
                    });

                // Rebuild the ancestor stack by walking parent links; fail
                // fast if the chain does not reach the root.
                let mut frames: SmallVec<[usize; 8]> = SmallVec::new();
                let mut cur = chunk;
                while let Some(parent) = self.tree.parent(cur) {
                    let pos = self
                        .tree
                        .children(parent)
                        .iter()
                        .position(|&c| c == cur)
                        .unwrap_or_else(|| {
                            panic!("restored pointer's chunk {chunk:?} is detached")
                        });
                    frames.push(pos);
                    cur = parent;
                }
                assert!(
                    self.tree.is_root(cur),
                    "restored pointer's chunk {chunk:?} is detached from the root"
                );
                frames.reverse();

                self.chunk = chunk;
                self.index = Some(index);
                self.stack = frames;
                self.cached = Some(node);
            }
        }
    }
}
