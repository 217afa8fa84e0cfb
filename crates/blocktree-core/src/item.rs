#![forbid(unsafe_code)]

//! The item seam: opaque child handles with identity and key resolution.
//!
//! The engine never looks inside an item. It needs exactly two facts about
//! one:
//!
//! - **identity**: whether two handles refer to the same live object
//!   (`same`). This is reference equality, not structural equality — a
//!   consumer that rewrites an item produces a *different* handle carrying
//!   the *same* key.
//! - **key**: a stable identity token (`key`) resolved by the embedding
//!   document model. Two distinct items never share a key at the same time,
//!   and an item's key never changes while the item is alive.
//!
//! Key resolution may be arbitrarily more expensive than `same` (it can
//! consult external document state), which is why the reconciler resolves
//! keys lazily and caches them per run.

use std::fmt;
use std::hash::Hash;

/// An opaque child item handle.
///
/// `Clone` is expected to be cheap (handles are typically `Rc`/`Arc`
/// wrappers or small ids); the tree stores one clone per leaf.
pub trait BlockItem: Clone {
    /// The stable identity token for an item.
    type Key: Clone + Eq + Hash + fmt::Debug;

    /// Resolve this item's key.
    ///
    /// Must be referentially stable for the lifetime of the item.
    fn key(&self) -> Self::Key;

    /// Identity equality: do `self` and `other` refer to the same handle?
    fn same(&self, other: &Self) -> bool;
}
