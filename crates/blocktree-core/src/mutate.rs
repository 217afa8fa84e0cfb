#![forbid(unsafe_code)]

//! The mutator: ordered structural edits at the cursor.
//!
//! A second `impl` block on [`TreeCursor`] adds the four mutations the
//! reconciler needs: `remove`, `insert_after`, `insert_before`, and the
//! chunking primitive `raw_insert_after`. Every mutation
//!
//! - leaves all tree invariants intact before returning,
//! - updates the cursor cache,
//! - records affected ancestors via [`TreeCursor::invalidate_chunk`],
//! - runs the full consistency check afterwards when the cursor was built
//!   with `debug` on.
//!
//! # Insertion shape
//!
//! `insert_after` keeps the tree balanced without ever rewriting existing
//! chunks:
//!
//! 1. *Left adjacency.* While the cursor sits at the last index of a chunk,
//!    the chunk's spare capacity is filled from the front of the list, then
//!    the cursor exits and a `before_depth` accumulator grows. Chunks we
//!    exit at depth `d` mean any bulk insertion next to them must wrap its
//!    leaves at least `d` deep, or repeated small appends would pile
//!    shallow chunks next to deep ones.
//! 2. *Right adjacency.* Mirrored from the back of the list into chunks the
//!    insertion point is left-adjacent to, with an `after_depth`
//!    accumulator. The first such fill receives the final items of the
//!    list, so its position is recorded and the cursor is parked there at
//!    the end.
//! 3. *Bulk.* Whatever remains is wrapped to depth
//!    `max(before_depth, after_depth, depth_for_total)` chunks and spliced
//!    at the saved boundary in one pass. A mid-chunk splice that would
//!    break the fanout bound instead wraps the boundary node and the
//!    leaves into one fresh chunk in the node's old position (order kept,
//!    fanout kept, subtree locally deeper).

use tracing::trace;

use crate::cursor::{SavedPointer, TreeCursor};
use crate::item::BlockItem;
use crate::node::NodeId;
use crate::tree::BlockTree;

impl<T: BlockItem> TreeCursor<'_, T> {
    // ── Invalidation ────────────────────────────────────────────────────

    /// Record the cursor's ancestor path in the tree's modified set.
    ///
    /// Inserts the current ancestor (which may be the root, when an edit
    /// touched the top-level child list directly), then every non-root
    /// chunk above it. Idempotent.
    pub fn invalidate_chunk(&mut self) {
        let key = self.tree.chunk_key(self.chunk);
        self.tree.mark_modified(key);
        let mut cur = self.chunk;
        while let Some(parent) = self.tree.parent(cur) {
            if self.tree.is_root(parent) {
                break;
            }
            let key = self.tree.chunk_key(parent);
            self.tree.mark_modified(key);
            cur = parent;
        }
    }

    // ── Removal ─────────────────────────────────────────────────────────

    /// Delete the node under the cursor.
    ///
    /// The cursor steps back one position (to the before-first sentinel if
    /// the deleted node was first), so a following insertion lands in the
    /// deleted node's place. A chunk emptied by the deletion is deleted
    /// too, recursively up the ancestor chain.
    ///
    /// # Panics
    /// Panics with no node under the cursor, or past the end.
    pub fn remove(&mut self) {
        assert!(!self.reached_end, "remove called past the end of the tree");
        loop {
            let i = self.index.expect("remove with no node under the cursor");
            let detached = self.tree.remove_child(self.chunk, i);
            self.tree.free(detached);
            self.index = i.checked_sub(1);
            self.cached = None;

            // Collapse upward: an emptied chunk is deleted in turn.
            if !self.at_root() && self.children_len() == 0 {
                self.exit_chunk();
                continue;
            }
            break;
        }
        self.invalidate_chunk();
        trace!(chunk = ?self.chunk, index = ?self.index, "removed node at cursor");
        self.maybe_validate();
    }

    // ── Insertion ───────────────────────────────────────────────────────

    /// Insert leaves immediately before the leaf under the cursor, leaving
    /// the cursor back on that leaf.
    pub fn insert_before(&mut self, leaves: Vec<NodeId>) {
        self.return_to_previous_leaf();
        self.insert_after(leaves);
        self.read_leaf();
    }

    /// Insert leaves immediately after the cursor position.
    ///
    /// The cursor ends on the last inserted leaf when an adjacency fill
    /// placed it, otherwise on the last top-level node the bulk insert
    /// produced (the rightmost leaf of that subtree is the last inserted
    /// leaf).
    ///
    /// # Panics
    /// Panics on an empty list, or past the end.
    pub fn insert_after(&mut self, leaves: Vec<NodeId>) {
        assert!(!leaves.is_empty(), "insert_after with an empty leaf list");
        assert!(
            !self.reached_end,
            "insert_after called past the end of the tree"
        );
        trace!(count = leaves.len(), chunk = ?self.chunk, "insert_after");

        // Unplaced window into `leaves`: the front feeds left-adjacency
        // fills, the back feeds right-adjacency fills.
        let mut lo = 0usize;
        let mut hi = leaves.len();

        // 1. Left adjacency.
        let mut before_depth = 0u32;
        while !self.at_root() && self.index == Some(self.children_len() - 1) {
            let spare = self.chunk_size - self.children_len();
            if spare > 0 && lo < hi {
                let take = spare.min(hi - lo);
                self.raw_insert_after(&leaves[lo..lo + take], before_depth);
                lo += take;
                if lo == hi {
                    // Everything fit; cursor is on the last inserted leaf.
                    self.maybe_validate();
                    return;
                }
            }
            self.exit_chunk();
            before_depth += 1;
        }

        // 2. Right adjacency. Advance one leaf; every chunk the insertion
        // point is left-adjacent to can take items from the back.
        let saved = self.save();
        let mut after_depth = 0u32;
        let mut final_pointer: Option<SavedPointer> = None;
        if self.read_leaf().is_some() {
            while !self.at_root() && self.index == Some(0) && lo < hi {
                let spare = self.chunk_size - self.children_len();
                if spare > 0 {
                    let take = spare.min(hi - lo);
                    // Anchor before the first child so the splice lands at
                    // the chunk's front.
                    self.index = None;
                    self.cached = None;
                    self.raw_insert_after(&leaves[hi - take..hi], after_depth);
                    hi -= take;
                    if final_pointer.is_none() {
                        final_pointer = Some(self.save());
                    }
                }
                if lo == hi {
                    break;
                }
                self.exit_chunk();
                after_depth += 1;
            }
        }

        // 3. Bulk insert at the saved boundary.
        if lo < hi {
            self.restore(saved);
            self.bulk_insert_after(&leaves[lo..hi], before_depth.max(after_depth));
        }
        if let Some(pointer) = final_pointer {
            self.restore(pointer);
        }
        self.maybe_validate();
    }

    /// Splice the remaining leaves at the cursor, falling back to wrapping
    /// when the enclosing chunk has no room for the spliced nodes.
    ///
    /// The root takes any splice (its top-level fanout is unbounded, only
    /// its depth bands are kept regular). A mid-chunk splice that would
    /// push the chunk past the fanout bound goes through
    /// [`wrap_insert_after`](Self::wrap_insert_after) instead.
    fn bulk_insert_after(&mut self, leaves: &[NodeId], min_depth: u32) {
        if self.at_root() || self.fits_after_splice(leaves.len(), min_depth) {
            self.raw_insert_after(leaves, min_depth);
        } else {
            self.wrap_insert_after(leaves, min_depth);
        }
    }

    /// Whether splicing `count` leaves at the target depth keeps the
    /// current chunk within the fanout bound.
    fn fits_after_splice(&self, count: usize, min_depth: u32) -> bool {
        let depth = self.target_depth(self.children_len() + count, min_depth);
        let spliced = if depth == 0 {
            count
        } else {
            count.div_ceil(self.chunk_size.pow(depth))
        };
        self.children_len() + spliced <= self.chunk_size
    }

    /// No room beside the cursor's node: wrap that node together with the
    /// leaves into one fresh chunk occupying the node's old position.
    ///
    /// Leaf order and the enclosing chunk's fanout are unchanged; the
    /// subtree just gets locally deeper. Nothing is split or rebalanced.
    fn wrap_insert_after(&mut self, leaves: &[NodeId], min_depth: u32) {
        let i = self.index.expect("wrap target under the cursor");
        let anchor = self.tree.children(self.chunk)[i];

        // Smallest depth at which the wrapped leaves plus the anchor stay
        // within the fanout bound.
        let mut depth = min_depth;
        while leaves.len().div_ceil(self.chunk_size.pow(depth)) > self.chunk_size - 1 {
            depth += 1;
        }

        let wrapper = self.tree.alloc_chunk(self.chunk);
        let mut children = vec![anchor];
        if depth == 0 {
            children.extend_from_slice(leaves);
        } else {
            let per_chunk = self.chunk_size.pow(depth);
            children.extend(group_into_chunks(
                self.tree,
                wrapper,
                leaves,
                per_chunk,
                self.chunk_size,
            ));
        }
        let last = children.len() - 1;
        let last_child = children[last];
        self.tree.replace_child(self.chunk, i, wrapper);
        self.tree.set_children(wrapper, children);

        // Descend onto the wrapper's last child, mirroring a raw splice.
        self.stack.push(i);
        self.chunk = wrapper;
        self.index = Some(last);
        self.cached = Some(last_child);
        self.invalidate_chunk();
        trace!(leaves = leaves.len(), depth, "wrap_insert_after");
    }

    /// Splice leaves right after the cursor, wrapped in chunks at the
    /// target depth, and advance onto the last spliced node.
    ///
    /// The target depth is the larger of `min_depth` and the smallest `d`
    /// with `C^(d+1) ≥ children + leaves`; depth 0 splices the leaves in
    /// directly.
    pub(crate) fn raw_insert_after(&mut self, leaves: &[NodeId], min_depth: u32) {
        debug_assert!(!leaves.is_empty(), "raw_insert_after with no leaves");

        let depth = self.target_depth(self.children_len() + leaves.len(), min_depth);

        let nodes = if depth == 0 {
            leaves.to_vec()
        } else {
            let per_chunk = self.chunk_size.pow(depth);
            group_into_chunks(self.tree, self.chunk, leaves, per_chunk, self.chunk_size)
        };

        let at = self.index.map_or(0, |i| i + 1);
        self.tree.insert_children(self.chunk, at, &nodes);
        self.index = Some(at + nodes.len() - 1);
        self.cached = Some(nodes[nodes.len() - 1]);
        self.invalidate_chunk();
        trace!(
            leaves = leaves.len(),
            depth,
            spliced = nodes.len(),
            "raw_insert_after"
        );
    }

    /// The chunking depth for `total` nodes sharing one ancestor: the
    /// smallest `d` with `C^(d+1) ≥ total`, floored at `min_depth`.
    fn target_depth(&self, total: usize, min_depth: u32) -> u32 {
        let mut depth = 0u32;
        let mut span = self.chunk_size;
        while span < total {
            span = span.saturating_mul(self.chunk_size);
            depth += 1;
        }
        depth.max(min_depth)
    }

    #[inline]
    pub(crate) fn maybe_validate(&self) {
        if self.debug {
            crate::validate::validate_cursor(self);
        }
    }
}

/// Build a balanced chunk forest over `leaves` by recursive subdivision:
/// one chunk per `per_chunk` leaves (at most `chunk_size` of them, by the
/// caller's choice of depth), each subdivided at `per_chunk / chunk_size`.
fn group_into_chunks<T: BlockItem>(
    tree: &mut BlockTree<T>,
    parent: NodeId,
    leaves: &[NodeId],
    per_chunk: usize,
    chunk_size: usize,
) -> Vec<NodeId> {
    leaves
        .chunks(per_chunk)
        .map(|slice| {
            let chunk = tree.alloc_chunk(parent);
            let children = if per_chunk <= chunk_size {
                slice.to_vec()
            } else {
                group_into_chunks(tree, chunk, slice, per_chunk / chunk_size, chunk_size)
            };
            tree.set_children(chunk, children);
            chunk
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::cursor::TreeCursor;
    use crate::item::BlockItem;
    use crate::node::ChunkKey;
    use crate::test_util::{item, items, tree_of, Para};
    use crate::tree::BlockTree;

    /// Append `keys` to an empty tree through the mutator, the way the
    /// reconciler's trailing-append path does.
    fn build(chunk_size: usize, keys: std::ops::Range<u64>) -> BlockTree<Para> {
        let mut tree = BlockTree::new();
        let leaves: Vec<_> = items(keys)
            .into_iter()
            .map(|it| tree.alloc_leaf(it))
            .collect();
        let mut cursor = TreeCursor::new(&mut tree, chunk_size, true);
        assert_eq!(cursor.read_leaf(), None);
        cursor.return_to_previous_leaf();
        cursor.insert_after(leaves);
        tree
    }

    // ─── Bulk insertion shape ─────────────────────────────────────

    #[test]
    fn small_counts_stay_flat() {
        for n in 1..=3 {
            let tree = build(3, 0..n);
            assert_eq!(
                tree.children(tree.root()).len(),
                n as usize,
                "n={n} should be flat"
            );
            let keys: Vec<u64> = tree.leaves().map(|l| *tree.leaf_key(l)).collect();
            assert_eq!(keys, (0..n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn twenty_eight_items_make_a_three_deep_tree() {
        let tree = build(3, 0..28);
        assert_eq!(
            tree.structure(),
            "[[[[0, 1, 2], [3, 4, 5], [6, 7, 8]], [[9, 10, 11], [12, 13, 14], [15, 16, 17]], \
             [[18, 19, 20], [21, 22, 23], [24, 25, 26]]], [[[27]]]]"
        );
    }

    #[test]
    fn append_after_shallow_prefix_wraps_to_computed_depth() {
        // ['a','b'] + 25 appended: two depth-2 layers of nine, then the rest.
        let mut tree = BlockTree::new();
        let a = tree.alloc_leaf(item(100));
        let b = tree.alloc_leaf(item(101));
        let root = tree.root();
        tree.insert_children(root, 0, &[a, b]);

        let leaves: Vec<_> = items(0..25)
            .into_iter()
            .map(|it| tree.alloc_leaf(it))
            .collect();
        let mut cursor = TreeCursor::new(&mut tree, 3, true);
        while cursor.read_leaf().is_some() {}
        cursor.return_to_previous_leaf();
        cursor.insert_after(leaves);

        assert_eq!(
            tree.structure(),
            "[100, 101, [[0, 1, 2], [3, 4, 5], [6, 7, 8]], \
             [[9, 10, 11], [12, 13, 14], [15, 16, 17]], \
             [[18, 19, 20], [21, 22, 23], [24]]]"
        );
    }

    // ─── Adjacency fills ──────────────────────────────────────────

    #[test]
    fn left_capacity_fills_before_new_chunks() {
        // ['0', ['1', '2', ['3', '4']]]: appending 'x' lands inside the
        // innermost chunk, which still has room.
        let mut tree = tree_of(|t| {
            let root = t.root();
            let l0 = t.alloc_leaf(item(0));
            let l1 = t.alloc_leaf(item(1));
            let l2 = t.alloc_leaf(item(2));
            let l3 = t.alloc_leaf(item(3));
            let l4 = t.alloc_leaf(item(4));
            let inner = t.alloc_chunk(root);
            t.set_children(inner, vec![l3, l4]);
            let outer = t.alloc_chunk(root);
            t.set_children(outer, vec![l1, l2, inner]);
            t.insert_children(root, 0, &[l0, outer]);
        });
        let leaf = tree.alloc_leaf(item(5));
        let mut cursor = TreeCursor::new(&mut tree, 3, true);
        while cursor.read_leaf().is_some() {}
        cursor.return_to_previous_leaf();
        cursor.insert_after(vec![leaf]);

        assert_eq!(tree.structure(), "[0, [1, 2, [3, 4, 5]]]");
    }

    #[test]
    fn seam_insert_fills_left_then_right_chunk() {
        // [['a','b'], ['c']] with two items at the seam: the left chunk's
        // spare slot takes the first, the right chunk's front the second.
        let mut tree = tree_of(|t| {
            let root = t.root();
            let a = t.alloc_leaf(item(10));
            let b = t.alloc_leaf(item(11));
            let c = t.alloc_leaf(item(12));
            let left = t.alloc_chunk(root);
            t.set_children(left, vec![a, b]);
            let right = t.alloc_chunk(root);
            t.set_children(right, vec![c]);
            t.insert_children(root, 0, &[left, right]);
        });
        let l0 = tree.alloc_leaf(item(0));
        let l1 = tree.alloc_leaf(item(1));
        let mut cursor = TreeCursor::new(&mut tree, 3, true);
        cursor.read_leaf();
        cursor.read_leaf(); // on 'b', last index of the left chunk
        cursor.insert_after(vec![l0, l1]);

        assert_eq!(cursor.tree().structure(), "[[10, 11, 0], [1, 12]]");
        // Cursor parked on the true last-inserted leaf.
        let under = cursor.current().expect("cursor on a node");
        assert_eq!(*cursor.tree().leaf_key(under), 1);
    }

    // ─── Fanout-preserving wrap ───────────────────────────────────

    #[test]
    fn mid_chunk_insert_into_a_full_chunk_wraps_in_place() {
        // [[0,1,2],[3,4,5]]: inserting between 0 and 1 finds no room in
        // the full chunk; the boundary leaf and the new leaf share a fresh
        // wrapper instead.
        let mut tree = tree_of(|t| {
            let root = t.root();
            let mut chunks = Vec::new();
            for base in [0u64, 3] {
                let leaves: Vec<_> = (base..base + 3).map(|k| t.alloc_leaf(item(k))).collect();
                let chunk = t.alloc_chunk(root);
                t.set_children(chunk, leaves);
                chunks.push(chunk);
            }
            t.insert_children(root, 0, &chunks);
        });
        let fresh = tree.alloc_leaf(item(9));
        let mut cursor = TreeCursor::new(&mut tree, 3, true);
        cursor.read_leaf(); // on '0'
        cursor.insert_after(vec![fresh]);

        assert_eq!(cursor.tree().structure(), "[[[0, 9], 1, 2], [3, 4, 5]]");
        let keys: Vec<u64> = cursor.tree().leaf_items().iter().map(|p| p.key()).collect();
        assert_eq!(keys, vec![0, 9, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn mid_chunk_bulk_insert_wraps_to_depth() {
        // Five leaves after '0' inside a full chunk: the wrapper holds the
        // anchor plus two sub-chunks.
        let mut tree = tree_of(|t| {
            let root = t.root();
            let leaves: Vec<_> = (0..3).map(|k| t.alloc_leaf(item(k))).collect();
            let chunk = t.alloc_chunk(root);
            t.set_children(chunk, leaves);
            t.insert_children(root, 0, &[chunk]);
        });
        let fresh: Vec<_> = items(10..15).into_iter().map(|it| tree.alloc_leaf(it)).collect();
        let mut cursor = TreeCursor::new(&mut tree, 3, true);
        cursor.read_leaf(); // on '0'
        cursor.insert_after(fresh);

        assert_eq!(
            cursor.tree().structure(),
            "[[[0, [10, 11, 12], [13, 14]], 1, 2]]"
        );
    }

    // ─── Removal ──────────────────────────────────────────────────

    #[test]
    fn remove_collapses_emptied_chunks_upward() {
        // ['0', [['1']], '2'] minus '1' leaves ['0', '2'].
        let mut tree = tree_of(|t| {
            let root = t.root();
            let l0 = t.alloc_leaf(item(0));
            let l1 = t.alloc_leaf(item(1));
            let l2 = t.alloc_leaf(item(2));
            let inner = t.alloc_chunk(root);
            t.set_children(inner, vec![l1]);
            let outer = t.alloc_chunk(root);
            t.set_children(outer, vec![inner]);
            t.insert_children(root, 0, &[l0, outer, l2]);
        });
        let live_before = tree.live_count();
        let mut cursor = TreeCursor::new(&mut tree, 3, true);
        cursor.read_leaf();
        cursor.read_leaf(); // on '1'
        cursor.remove();

        assert_eq!(cursor.tree().structure(), "[0, 2]");
        assert!(cursor.tree().modified_chunks().contains(&ChunkKey::ROOT));
        // Leaf plus both chunks were freed.
        assert_eq!(cursor.tree().live_count(), live_before - 3);

        // Traversal continues cleanly from the removal point.
        let next = cursor.read_leaf().expect("leaf after removal point");
        assert_eq!(*cursor.tree().leaf_key(next), 2);
    }

    #[test]
    fn remove_first_child_parks_before_start() {
        let mut tree = tree_of(|t| {
            let root = t.root();
            let l0 = t.alloc_leaf(item(0));
            let l1 = t.alloc_leaf(item(1));
            t.insert_children(root, 0, &[l0, l1]);
        });
        let mut cursor = TreeCursor::new(&mut tree, 3, true);
        cursor.read_leaf();
        cursor.remove();
        assert_eq!(cursor.index(), None);
        // The next read lands on what is now the first leaf.
        let next = cursor.read_leaf().expect("second leaf survives");
        assert_eq!(*cursor.tree().leaf_key(next), 1);
    }

    #[test]
    fn removal_never_merges_underfull_siblings() {
        // Deleting from [[0, 1], [2, 3]] leaves sparse chunks alone.
        let mut tree = tree_of(|t| {
            let root = t.root();
            let l0 = t.alloc_leaf(item(0));
            let l1 = t.alloc_leaf(item(1));
            let l2 = t.alloc_leaf(item(2));
            let l3 = t.alloc_leaf(item(3));
            let left = t.alloc_chunk(root);
            t.set_children(left, vec![l0, l1]);
            let right = t.alloc_chunk(root);
            t.set_children(right, vec![l2, l3]);
            t.insert_children(root, 0, &[left, right]);
        });
        let mut cursor = TreeCursor::new(&mut tree, 2, true);
        cursor.read_leaf();
        cursor.remove(); // drop '0'
        assert_eq!(tree.structure(), "[[1], [2, 3]]");
    }

    // ─── Invalidation ─────────────────────────────────────────────

    #[test]
    fn invalidate_records_chunk_path_without_root() {
        let mut tree = tree_of(|t| {
            let root = t.root();
            let l1 = t.alloc_leaf(item(1));
            let inner = t.alloc_chunk(root);
            t.set_children(inner, vec![l1]);
            let outer = t.alloc_chunk(root);
            t.set_children(outer, vec![inner]);
            t.insert_children(root, 0, &[outer]);
        });
        let inner_key;
        let outer_key;
        {
            let root = tree.root();
            let outer = tree.children(root)[0];
            let inner = tree.children(outer)[0];
            outer_key = tree.chunk_key(outer);
            inner_key = tree.chunk_key(inner);
        }

        let mut cursor = TreeCursor::new(&mut tree, 3, true);
        cursor.read_leaf(); // inside the inner chunk
        cursor.invalidate_chunk();
        cursor.invalidate_chunk(); // idempotent

        assert!(tree.modified_chunks().contains(&inner_key));
        assert!(tree.modified_chunks().contains(&outer_key));
        assert!(!tree.modified_chunks().contains(&ChunkKey::ROOT));
        assert_eq!(tree.modified_chunks().len(), 2);
    }

    // ─── Panics ───────────────────────────────────────────────────

    #[test]
    #[should_panic(expected = "empty leaf list")]
    fn insert_after_rejects_empty_list() {
        let mut tree: BlockTree<Para> = BlockTree::new();
        let mut cursor = TreeCursor::new(&mut tree, 3, false);
        cursor.insert_after(Vec::new());
    }

    #[test]
    #[should_panic(expected = "no node under the cursor")]
    fn remove_at_start_panics() {
        let mut tree: BlockTree<Para> = BlockTree::new();
        let mut cursor = TreeCursor::new(&mut tree, 3, false);
        cursor.remove();
    }
}
