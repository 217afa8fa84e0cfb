//! Shared fixtures for unit tests: a refcounted paragraph-like item whose
//! identity is pointer equality, the shape real document handles take.

use std::rc::Rc;

use crate::item::BlockItem;
use crate::tree::BlockTree;

#[derive(Debug)]
struct ParaInner {
    key: u64,
    #[allow(dead_code)]
    text: String,
}

/// A paragraph handle: cheap to clone, identity by `Rc` pointer.
#[derive(Clone, Debug)]
pub(crate) struct Para(Rc<ParaInner>);

impl Para {
    pub(crate) fn new(key: u64, text: impl Into<String>) -> Self {
        Para(Rc::new(ParaInner {
            key,
            text: text.into(),
        }))
    }
}

impl BlockItem for Para {
    type Key = u64;

    fn key(&self) -> u64 {
        self.0.key
    }

    fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// A fresh item with the given key.
pub(crate) fn item(key: u64) -> Para {
    Para::new(key, "")
}

/// Fresh items for each key in the range.
pub(crate) fn items(keys: std::ops::Range<u64>) -> Vec<Para> {
    keys.map(item).collect()
}

/// Build a tree by hand. The closure wires up nodes with the raw arena
/// API; callers are responsible for producing a valid shape.
pub(crate) fn tree_of(build: impl FnOnce(&mut BlockTree<Para>)) -> BlockTree<Para> {
    let mut tree = BlockTree::new();
    build(&mut tree);
    tree
}
