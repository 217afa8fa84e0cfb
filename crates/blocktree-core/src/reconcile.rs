#![forbid(unsafe_code)]

//! The reconciler: drive the cursor and mutator from a desired sequence.
//!
//! One call to [`reconcile`] walks the existing leaves left to right and
//! edits the tree until its leaf traversal equals `children`:
//!
//! 1. For each existing leaf, look ahead in the unread suffix of
//!    `children` — first by handle identity (the common unchanged case,
//!    which skips key resolution entirely), then by key (the rewritten
//!    handle case).
//! 2. No match: the leaf's item is gone; remove it.
//! 3. A match at offset `k`: the `k` items before it are new; insert them
//!    as leaves before the matched leaf. A matched item whose handle
//!    differs from the leaf's is swapped in place (same key, new handle)
//!    and its chunk path invalidated.
//! 4. Items still unread after the last existing leaf are appended.
//!
//! A running insertions-minus-removals counter detects matched leaves
//! whose final index shifted; those fire `on_index_change`.
//!
//! Lookahead is deliberately uncapped: a pathological permutation costs a
//! full suffix scan per leaf (quadratic overall), while the interactive
//! case stays at offset 0 or 1. Capping it would change which items match.
//!
//! Observers must not re-enter the reconciler for the same tree.

use tracing::debug;

use crate::cursor::TreeCursor;
use crate::item::BlockItem;
use crate::node::NodeId;
use crate::tree::BlockTree;

/// Reconciliation knobs.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    /// Fanout bound `C`; tree depth is roughly `log_C(n)`. Must be ≥ 2.
    pub chunk_size: usize,
    /// Run the full consistency check after every mutation. No observable
    /// effect when off.
    pub debug: bool,
}

impl ReconcileOptions {
    /// Options with the given fanout bound and debug checks off.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            debug: false,
        }
    }

    /// Enable the per-mutation consistency check.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Change notifications fired during reconciliation.
///
/// All indices are final indices in the new `children` sequence. Default
/// methods are no-ops, so an observer implements only what it needs; `()`
/// is the observer that wants nothing.
pub trait ChangeObserver<T> {
    /// An item newly present in the tree.
    fn on_insert(&mut self, item: &T, index: usize) {
        let _ = (item, index);
    }

    /// A matched item whose handle was swapped into its leaf in place.
    fn on_update(&mut self, item: &T, index: usize) {
        let _ = (item, index);
    }

    /// An already-present item whose final index differs from its
    /// pre-reconciliation index.
    fn on_index_change(&mut self, item: &T, index: usize) {
        let _ = (item, index);
    }
}

impl<T> ChangeObserver<T> for () {}

/// Mutate `tree` in place until its leaves equal `children`.
///
/// Clears `modified_chunks` first, so the set afterwards describes exactly
/// this run; clears `moved_node_keys` last (the moved-key index is a
/// reserved extension — the set never populates, but the lifecycle is
/// contractual).
///
/// # Panics
/// Panics if `options.chunk_size < 2`, and on any internal invariant
/// violation (which indicates a bug, not bad input).
pub fn reconcile<T, O>(
    tree: &mut BlockTree<T>,
    children: &[T],
    options: ReconcileOptions,
    observer: &mut O,
) where
    T: BlockItem,
    O: ChangeObserver<T>,
{
    tree.clear_modified();

    // Sparse per-run cache of resolved keys, filled on first use.
    let mut keys: Vec<Option<T::Key>> = vec![None; children.len()];

    let mut cursor = TreeCursor::new(tree, options.chunk_size, options.debug);
    let mut next_child = 0usize;
    // Insertions minus removals so far; nonzero at a matched leaf means its
    // index moved even though the item itself did not change.
    let mut drift = 0i64;

    while let Some(leaf) = cursor.read_leaf() {
        let Some(offset) = lookahead(cursor.tree(), leaf, children, next_child, &mut keys) else {
            // The leaf's item is absent from the remaining suffix: gone.
            cursor.remove();
            drift -= 1;
            continue;
        };

        if offset > 0 {
            // The items preceding the match are new; splice them in front
            // of the matched leaf.
            let fresh = alloc_leaves(&mut cursor, children, next_child..next_child + offset, &mut keys);
            cursor.insert_before(fresh);
            for i in next_child..next_child + offset {
                observer.on_insert(&children[i], i);
            }
            drift += offset as i64;
        }

        let matched_at = next_child + offset;
        let matched = &children[matched_at];
        if !matched.same(cursor.tree().leaf_item(leaf)) {
            // Same key, rewritten handle: update the leaf in place.
            cursor.tree_mut().set_leaf_item(leaf, matched.clone());
            cursor.invalidate_chunk();
            observer.on_update(matched, matched_at);
        }
        if drift != 0 {
            observer.on_index_change(matched, matched_at);
        }
        next_child = matched_at + 1;
    }

    // Everything still unread is appended after the last surviving leaf.
    if next_child < children.len() {
        let fresh = alloc_leaves(&mut cursor, children, next_child..children.len(), &mut keys);
        cursor.return_to_previous_leaf();
        cursor.insert_after(fresh);
        for i in next_child..children.len() {
            observer.on_insert(&children[i], i);
        }
    }

    drop(cursor);
    tree.clear_moved_keys();
    debug!(
        children = children.len(),
        modified = tree.modified_chunks().len(),
        "reconciled"
    );
}

/// Offset of the leaf's item in `children[from..]`, or `None` if absent.
///
/// Identity wins over key: the unchanged-handle case never resolves a key.
fn lookahead<T: BlockItem>(
    tree: &BlockTree<T>,
    leaf: NodeId,
    children: &[T],
    from: usize,
    keys: &mut [Option<T::Key>],
) -> Option<usize> {
    let leaf_item = tree.leaf_item(leaf);
    if let Some(offset) = children[from..].iter().position(|c| c.same(leaf_item)) {
        return Some(offset);
    }

    let leaf_key = tree.leaf_key(leaf);
    (from..children.len()).find_map(|i| {
        (resolved_key(children, keys, i) == leaf_key).then_some(i - from)
    })
}

/// The key of `children[i]`, resolving and caching it on first use.
fn resolved_key<'k, T: BlockItem>(
    children: &[T],
    keys: &'k mut [Option<T::Key>],
    i: usize,
) -> &'k T::Key {
    if keys[i].is_none() {
        keys[i] = Some(children[i].key());
    }
    keys[i].as_ref().expect("key was just cached")
}

/// Allocate detached leaves for a range of `children`, reusing any keys the
/// lookahead already resolved.
fn alloc_leaves<T: BlockItem>(
    cursor: &mut TreeCursor<'_, T>,
    children: &[T],
    range: std::ops::Range<usize>,
    keys: &mut [Option<T::Key>],
) -> Vec<NodeId> {
    range
        .map(|i| {
            let key = resolved_key(children, keys, i).clone();
            cursor.tree_mut().alloc_leaf_keyed(key, children[i].clone())
        })
        .collect()
}
