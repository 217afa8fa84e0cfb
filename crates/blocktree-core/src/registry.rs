#![forbid(unsafe_code)]

//! The entry point: one tree per parent, keyed by parent identity.
//!
//! [`TreeRegistry`] owns a [`BlockTree`] per parent item, created lazily on
//! first request. Lifetime is explicit: the embedding framework calls
//! [`release`](TreeRegistry::release) when a parent is dropped from the
//! document. Coupling eviction to garbage collection is exactly the trap
//! this design avoids — there is no weak anything here, just a map and a
//! contract.
//!
//! The registry is single-threaded like everything else in this crate;
//! callers serialize externally.

use std::collections::HashMap;

use crate::item::BlockItem;
use crate::reconcile::{reconcile, ChangeObserver, ReconcileOptions};
use crate::tree::BlockTree;

/// Per-parent tree cache with explicit release.
///
/// `P` is the parent item type (keys the cache), `T` the child item type
/// (populates the trees).
pub struct TreeRegistry<P: BlockItem, T: BlockItem> {
    trees: HashMap<P::Key, BlockTree<T>>,
}

impl<P: BlockItem, T: BlockItem> TreeRegistry<P, T> {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            trees: HashMap::new(),
        }
    }

    /// Number of live trees.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    /// Whether the registry holds no trees.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// The tree for `parent`, if one was created.
    #[must_use]
    pub fn get(&self, parent: &P) -> Option<&BlockTree<T>> {
        self.trees.get(&parent.key())
    }

    /// The tree for `parent`, created empty on first request.
    pub fn tree_for(&mut self, parent: &P) -> &mut BlockTree<T> {
        self.trees.entry(parent.key()).or_default()
    }

    /// Get-or-create the tree for `parent` and reconcile it against
    /// `children`, firing `observer` callbacks along the way.
    ///
    /// Returns the reconciled tree; its `modified_chunks` describe exactly
    /// this run.
    pub fn reconcile_children<O>(
        &mut self,
        parent: &P,
        children: &[T],
        options: ReconcileOptions,
        observer: &mut O,
    ) -> &BlockTree<T>
    where
        O: ChangeObserver<T>,
    {
        let tree = self.trees.entry(parent.key()).or_default();
        reconcile(tree, children, options, observer);
        tree
    }

    /// Drop the tree for `parent`. Returns whether one existed.
    ///
    /// Must be called when the parent leaves the document; nothing else
    /// reclaims the tree.
    pub fn release(&mut self, parent: &P) -> bool {
        self.trees.remove(&parent.key()).is_some()
    }
}

impl<P: BlockItem, T: BlockItem> Default for TreeRegistry<P, T> {
    fn default() -> Self {
        Self::new()
    }
}
