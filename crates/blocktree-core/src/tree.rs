#![forbid(unsafe_code)]

//! The chunked tree: a slot arena over ancestor and leaf nodes.
//!
//! [`BlockTree`] owns every node. Storage is a `Vec` of slots with a free
//! list (freed slot indices are reused by later allocations), so node
//! references are compact `u32` ids and parent back-links cannot form
//! ownership cycles.
//!
//! # Invariants
//!
//! After every public mutation of the tree (all of which go through the
//! cursor in [`crate::mutate`]):
//!
//! 1. The left-to-right leaf traversal equals the reconciled child sequence.
//! 2. Every non-root chunk has between 1 and `C` children.
//! 3. For every node `n` with parent `p`, `p`'s children contain `n`.
//! 4. No chunk is empty; emptying a chunk deletes it.
//! 5. A [`ChunkKey`] is assigned at creation and never reused; a leaf's key
//!    equals its item's resolved key.
//! 6. `modified_chunks` is a superset of the ancestors whose descendant set
//!    changed since the last clear.
//!
//! The tree itself only offers storage and bookkeeping; ordered structural
//! edits are the mutator's job.

use std::collections::HashSet;

use crate::item::BlockItem;
use crate::node::{ChunkKey, NodeId, NodePayload, Slot};

/// A chunked tree over one parent's child sequence.
pub struct BlockTree<T: BlockItem> {
    /// Slot storage. `None` marks a free slot.
    slots: Vec<Option<Slot<T>>>,
    /// Free slot indices available for reuse.
    free: Vec<u32>,
    /// Next chunk key to hand out. Monotone; key 0 went to the root.
    next_chunk_key: u64,
    /// Ancestors whose descendant set changed since the last clear.
    modified_chunks: HashSet<ChunkKey>,
    /// Keys of items detected as moved. Reserved for a future moved-key
    /// index: cleared every reconciliation, currently never populated.
    moved_node_keys: HashSet<T::Key>,
}

/// The root always occupies slot 0.
const ROOT_SLOT: NodeId = NodeId(0);

impl<T: BlockItem> BlockTree<T> {
    /// Create an empty tree (a lone root with no children).
    pub fn new() -> Self {
        let root = Slot {
            parent: None,
            payload: NodePayload::Chunk {
                key: ChunkKey::ROOT,
                children: Vec::new(),
            },
        };
        Self {
            slots: vec![Some(root)],
            free: Vec::new(),
            next_chunk_key: 1,
            modified_chunks: HashSet::new(),
            moved_node_keys: HashSet::new(),
        }
    }

    /// The root node id.
    #[inline]
    pub fn root(&self) -> NodeId {
        ROOT_SLOT
    }

    /// Whether `id` is the root.
    #[inline]
    pub fn is_root(&self, id: NodeId) -> bool {
        id == ROOT_SLOT
    }

    // ── Slot access ─────────────────────────────────────────────────────

    #[inline]
    fn slot(&self, id: NodeId) -> &Slot<T> {
        self.slots[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("node {id:?} refers to a freed slot"))
    }

    #[inline]
    fn slot_mut(&mut self, id: NodeId) -> &mut Slot<T> {
        self.slots[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("node {id:?} refers to a freed slot"))
    }

    /// Whether the slot for `id` is currently live.
    #[inline]
    pub(crate) fn is_live(&self, id: NodeId) -> bool {
        self.slots.get(id.index()).is_some_and(|s| s.is_some())
    }

    /// Number of live nodes, the root included.
    pub(crate) fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    // ── Node queries ────────────────────────────────────────────────────

    /// Whether `id` is an ancestor (the root or a chunk).
    #[inline]
    pub fn is_chunk(&self, id: NodeId) -> bool {
        self.slot(id).payload.is_chunk()
    }

    /// Parent of `id`; `None` only for the root.
    #[inline]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slot(id).parent
    }

    /// Ordered children of an ancestor.
    ///
    /// # Panics
    /// Panics if `id` is a leaf.
    #[inline]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.slot(id).payload {
            NodePayload::Chunk { children, .. } => children,
            NodePayload::Leaf { .. } => panic!("node {id:?} is a leaf, not a chunk"),
        }
    }

    /// Stable key of an ancestor.
    ///
    /// # Panics
    /// Panics if `id` is a leaf.
    #[inline]
    pub fn chunk_key(&self, id: NodeId) -> ChunkKey {
        match &self.slot(id).payload {
            NodePayload::Chunk { key, .. } => *key,
            NodePayload::Leaf { .. } => panic!("node {id:?} is a leaf, not a chunk"),
        }
    }

    /// A leaf's resolved item key.
    ///
    /// # Panics
    /// Panics if `id` is not a leaf.
    #[inline]
    pub fn leaf_key(&self, id: NodeId) -> &T::Key {
        match &self.slot(id).payload {
            NodePayload::Leaf { key, .. } => key,
            NodePayload::Chunk { .. } => panic!("node {id:?} is a chunk, not a leaf"),
        }
    }

    /// A leaf's item handle.
    ///
    /// # Panics
    /// Panics if `id` is not a leaf.
    #[inline]
    pub fn leaf_item(&self, id: NodeId) -> &T {
        match &self.slot(id).payload {
            NodePayload::Leaf { item, .. } => item,
            NodePayload::Chunk { .. } => panic!("node {id:?} is a chunk, not a leaf"),
        }
    }

    /// Swap a leaf's item handle in place.
    ///
    /// The replacement must carry the same key as the leaf; an updated item
    /// is a new handle for the same logical child, never a different child.
    ///
    /// # Panics
    /// Panics if `id` is not a leaf or the keys differ.
    pub(crate) fn set_leaf_item(&mut self, id: NodeId, new_item: T) {
        match &mut self.slot_mut(id).payload {
            NodePayload::Leaf { key, item } => {
                assert!(
                    *key == new_item.key(),
                    "in-place update changed the leaf key"
                );
                *item = new_item;
            }
            NodePayload::Chunk { .. } => panic!("node {id:?} is a chunk, not a leaf"),
        }
    }

    // ── Allocation ──────────────────────────────────────────────────────

    fn alloc(&mut self, slot: Slot<T>) -> NodeId {
        match self.free.pop() {
            Some(i) => {
                self.slots[i as usize] = Some(slot);
                NodeId(i)
            }
            None => {
                self.slots.push(Some(slot));
                NodeId((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Allocate a chunk under `parent` with a fresh, never-reused key.
    ///
    /// The new chunk starts empty; the caller must attach at least one child
    /// before the operation returns (invariant 4 holds at operation
    /// boundaries, not mid-construction).
    pub(crate) fn alloc_chunk(&mut self, parent: NodeId) -> NodeId {
        let key = ChunkKey(self.next_chunk_key);
        self.next_chunk_key += 1;
        self.alloc(Slot {
            parent: Some(parent),
            payload: NodePayload::Chunk {
                key,
                children: Vec::new(),
            },
        })
    }

    /// Allocate a detached leaf for `item`, resolving its key once.
    pub(crate) fn alloc_leaf(&mut self, item: T) -> NodeId {
        let key = item.key();
        self.alloc_leaf_keyed(key, item)
    }

    /// Allocate a detached leaf with a key the caller already resolved
    /// (the reconciler's lookahead cache feeds this).
    pub(crate) fn alloc_leaf_keyed(&mut self, key: T::Key, item: T) -> NodeId {
        self.alloc(Slot {
            parent: None,
            payload: NodePayload::Leaf { key, item },
        })
    }

    /// Free a node slot.
    ///
    /// # Panics
    /// Panics if the node is a non-empty chunk (children must be detached or
    /// freed first) or the root.
    pub(crate) fn free(&mut self, id: NodeId) {
        assert!(!self.is_root(id), "the root cannot be freed");
        if let NodePayload::Chunk { children, .. } = &self.slot(id).payload {
            assert!(children.is_empty(), "freed chunk {id:?} still has children");
        }
        self.slots[id.index()] = None;
        self.free.push(id.0);
    }

    // ── Child list edits (mutator plumbing) ─────────────────────────────

    /// Splice `nodes` into `parent`'s children at `at`, re-parenting each.
    pub(crate) fn insert_children(&mut self, parent: NodeId, at: usize, nodes: &[NodeId]) {
        for &n in nodes {
            self.slot_mut(n).parent = Some(parent);
        }
        match &mut self.slot_mut(parent).payload {
            NodePayload::Chunk { children, .. } => {
                children.splice(at..at, nodes.iter().copied());
            }
            NodePayload::Leaf { .. } => panic!("cannot insert children into a leaf"),
        }
    }

    /// Detach and return the child of `parent` at `at`.
    pub(crate) fn remove_child(&mut self, parent: NodeId, at: usize) -> NodeId {
        let removed = match &mut self.slot_mut(parent).payload {
            NodePayload::Chunk { children, .. } => children.remove(at),
            NodePayload::Leaf { .. } => panic!("cannot remove children from a leaf"),
        };
        self.slot_mut(removed).parent = None;
        removed
    }

    /// Swap the child of `parent` at `at` for `replacement`, detaching the
    /// old child.
    pub(crate) fn replace_child(&mut self, parent: NodeId, at: usize, replacement: NodeId) {
        let old = match &mut self.slot_mut(parent).payload {
            NodePayload::Chunk { children, .. } => std::mem::replace(&mut children[at], replacement),
            NodePayload::Leaf { .. } => panic!("cannot replace children of a leaf"),
        };
        self.slot_mut(old).parent = None;
        self.slot_mut(replacement).parent = Some(parent);
    }

    /// Attach an already-built child list to a freshly allocated chunk.
    pub(crate) fn set_children(&mut self, chunk: NodeId, nodes: Vec<NodeId>) {
        for &n in &nodes {
            self.slot_mut(n).parent = Some(chunk);
        }
        match &mut self.slot_mut(chunk).payload {
            NodePayload::Chunk { children, .. } => {
                debug_assert!(children.is_empty(), "set_children on a populated chunk");
                *children = nodes;
            }
            NodePayload::Leaf { .. } => panic!("cannot set children on a leaf"),
        }
    }

    // ── Invalidation bookkeeping ────────────────────────────────────────

    /// Ancestors whose descendant set changed since the last clear.
    ///
    /// Contains [`ChunkKey::ROOT`] when the top-level child list itself
    /// changed.
    #[inline]
    pub fn modified_chunks(&self) -> &HashSet<ChunkKey> {
        &self.modified_chunks
    }

    /// Keys of items detected as moved during the last reconciliation.
    ///
    /// Currently always empty: the moved-key index is a reserved extension.
    /// The clearing contract is live; the population side is not.
    #[inline]
    pub fn moved_node_keys(&self) -> &HashSet<T::Key> {
        &self.moved_node_keys
    }

    pub(crate) fn mark_modified(&mut self, key: ChunkKey) {
        self.modified_chunks.insert(key);
    }

    pub(crate) fn clear_modified(&mut self) {
        self.modified_chunks.clear();
    }

    pub(crate) fn clear_moved_keys(&mut self) {
        self.moved_node_keys.clear();
    }

    // ── Traversal ───────────────────────────────────────────────────────

    /// In-order leaf traversal (left to right).
    pub fn leaves(&self) -> Leaves<'_, T> {
        Leaves {
            tree: self,
            // Root children pushed in reverse so the leftmost pops first.
            stack: self.children(self.root()).iter().rev().copied().collect(),
        }
    }

    /// Item handles in leaf order. Allocates; intended for consumers and
    /// tests, not the reconciliation hot path.
    pub fn leaf_items(&self) -> Vec<T> {
        self.leaves().map(|id| self.leaf_item(id).clone()).collect()
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.leaves().count()
    }

    /// Nested-bracket rendering of the structure with leaf keys, e.g.
    /// `[0, 1, [2, 3]]`. Debug aid; the exact format is not a contract.
    pub fn structure(&self) -> String {
        fn render<T: BlockItem>(tree: &BlockTree<T>, id: NodeId, out: &mut String) {
            if tree.is_chunk(id) {
                out.push('[');
                for (i, &c) in tree.children(id).iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    render(tree, c, out);
                }
                out.push(']');
            } else {
                out.push_str(&format!("{:?}", tree.leaf_key(id)));
            }
        }
        let mut out = String::new();
        render(self, self.root(), &mut out);
        out
    }
}

impl<T: BlockItem> Default for BlockTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over leaf ids in document order.
///
/// Explicit-stack DFS; O(depth) memory beyond the yielded ids.
pub struct Leaves<'t, T: BlockItem> {
    tree: &'t BlockTree<T>,
    stack: Vec<NodeId>,
}

impl<T: BlockItem> Iterator for Leaves<'_, T> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some(id) = self.stack.pop() {
            if self.tree.is_chunk(id) {
                self.stack
                    .extend(self.tree.children(id).iter().rev().copied());
            } else {
                return Some(id);
            }
        }
        None
    }
}
