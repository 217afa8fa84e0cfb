#![forbid(unsafe_code)]

//! Consistency checks for debug mode and tests.
//!
//! [`validate_tree`] asserts every structural invariant the tree promises
//! at operation boundaries; `validate_cursor` additionally checks that a
//! cursor's positional state agrees with the tree it points into. Both
//! panic with a message naming the violated invariant.
//!
//! These checks are O(n) and run after *every* mutation when a cursor is
//! built with `debug = true`; they are for tests and bug hunts, never for
//! production paths.

use std::collections::HashSet;

use crate::cursor::TreeCursor;
use crate::item::BlockItem;
use crate::node::NodeId;
use crate::tree::BlockTree;

/// Assert the structural invariants of `tree` under fanout bound
/// `chunk_size`.
///
/// Checked: fanout bounds (1..=C for chunks, unbounded for the root), no
/// empty chunks, parent-link consistency, leaf keys matching their items'
/// resolved keys, and arena accounting (every live slot reachable from the
/// root exactly once).
///
/// # Panics
/// Panics on the first violation.
pub fn validate_tree<T: BlockItem>(tree: &BlockTree<T>, chunk_size: usize) {
    let root = tree.root();
    assert!(
        tree.parent(root).is_none(),
        "invariant violated: root has a parent"
    );

    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<NodeId> = vec![root];
    while let Some(id) = stack.pop() {
        assert!(
            seen.insert(id),
            "invariant violated: node {id:?} reachable twice"
        );
        if !tree.is_chunk(id) {
            let resolved = tree.leaf_item(id).key();
            assert!(
                *tree.leaf_key(id) == resolved,
                "invariant violated: leaf {id:?} key drifted from its item"
            );
            continue;
        }

        let children = tree.children(id);
        if !tree.is_root(id) {
            assert!(
                !children.is_empty(),
                "invariant violated: chunk {id:?} is empty"
            );
            assert!(
                children.len() <= chunk_size,
                "invariant violated: chunk {id:?} fanout {} exceeds {chunk_size}",
                children.len()
            );
        }
        for &child in children {
            assert!(
                tree.parent(child) == Some(id),
                "invariant violated: parent link of {child:?} does not point at {id:?}"
            );
            stack.push(child);
        }
    }

    assert!(
        seen.len() == tree.live_count(),
        "invariant violated: {} live slots but {} reachable from the root",
        tree.live_count(),
        seen.len()
    );
}

/// Assert tree invariants plus cursor coherence: the ancestor stack walks
/// from the root to the cursor's chunk, the index is in bounds, and the
/// cached node is the node actually at the cursor position.
pub(crate) fn validate_cursor<T: BlockItem>(cursor: &TreeCursor<'_, T>) {
    let tree: &BlockTree<T> = cursor.tree;
    validate_tree(tree, cursor.chunk_size);

    // Replay the stack from the root; it must land on the cursor's chunk.
    let mut cur = tree.root();
    for (depth, &frame) in cursor.stack.iter().enumerate() {
        let children = tree.children(cur);
        assert!(
            frame < children.len(),
            "cursor stack frame {depth} ({frame}) out of bounds"
        );
        cur = children[frame];
        assert!(
            tree.is_chunk(cur),
            "cursor stack frame {depth} points at a leaf"
        );
    }
    assert!(
        cur == cursor.chunk,
        "cursor stack does not lead to the cursor's chunk"
    );

    if let Some(i) = cursor.index {
        assert!(
            i < tree.children(cursor.chunk).len(),
            "cursor index {i} out of bounds"
        );
        if let Some(cached) = cursor.cached {
            assert!(
                tree.children(cursor.chunk)[i] == cached,
                "cursor cache is stale: {cached:?} is not the node at the cursor"
            );
        }
    } else {
        assert!(
            cursor.cached.is_none(),
            "cursor cache populated at a before-first position"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{item, tree_of};

    #[test]
    fn valid_tree_passes() {
        let tree = tree_of(|t| {
            let root = t.root();
            let l0 = t.alloc_leaf(item(0));
            let l1 = t.alloc_leaf(item(1));
            let chunk = t.alloc_chunk(root);
            t.set_children(chunk, vec![l1]);
            t.insert_children(root, 0, &[l0, chunk]);
        });
        validate_tree(&tree, 3);
    }

    #[test]
    #[should_panic(expected = "fanout")]
    fn overfull_chunk_is_caught() {
        let tree = tree_of(|t| {
            let root = t.root();
            let leaves: Vec<_> = (0..4).map(|k| t.alloc_leaf(item(k))).collect();
            let chunk = t.alloc_chunk(root);
            t.set_children(chunk, leaves);
            t.insert_children(root, 0, &[chunk]);
        });
        validate_tree(&tree, 3);
    }

    #[test]
    #[should_panic(expected = "is empty")]
    fn empty_chunk_is_caught() {
        let tree = tree_of(|t| {
            let root = t.root();
            let chunk = t.alloc_chunk(root);
            t.insert_children(root, 0, &[chunk]);
        });
        validate_tree(&tree, 3);
    }

    #[test]
    #[should_panic(expected = "reachable from the root")]
    fn orphaned_slot_is_caught() {
        let tree = tree_of(|t| {
            // Allocated but never attached anywhere.
            let _ = t.alloc_leaf(item(0));
        });
        validate_tree(&tree, 3);
    }
}
