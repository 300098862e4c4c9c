//! `Shared<T>` is a heap-allocated smart pointer for sharing data within a single thread.
//! `Shared<T>` provides shared ownership of the data similar to `Rc<T>`, with one difference: a handle may be
//! empty, pointing at nothing, and dereferencing it is then an explicit error instead of being impossible.
//!
//! Every handle created from the same value points at one control block. The block holds the value, a strong
//! count (the number of live `Shared<T>`s) and a weak count (the number of live `Weak<T>`s). The value is
//! dropped when the strong count reaches zero; the block is freed once both counts are zero.
//!
//! A cycle between `Shared` pointers cannot be deallocated as the strong counts will never reach zero. The solution is a `Weak<T>`.
//! A `Weak<T>` is a non-owning reference to the data held by a `Shared<T>`.
//! They break reference cycles by adding a layer of indirection and act as an observer. They cannot access the data directly, and
//! must be promoted back into a `Shared<T>`. `Weak<T>` does not keep the value alive, it only keeps the backing allocation alive.
//!
//! ```
//! use shrc::Shared;
//!
//! let s1 = Shared::new(5);
//! let w = Shared::downgrade(&s1);
//! let s2 = s1.clone();
//! assert_eq!(Shared::use_count(&s2), 2);
//!
//! drop(s1);
//! assert!(!w.expired());
//! drop(s2);
//! assert!(w.expired());
//! assert!(Shared::is_empty(&w.lock()));
//! ```
//!
//! The counts are plain cells: neither handle is [`Send`] or [`Sync`].
//!
//! With the `nostd` feature the crate is `#![no_std]` and only requires `alloc`.

#![cfg_attr(all(feature = "nostd", not(test)), no_std)]

extern crate alloc;

mod block;
pub mod error;
pub mod shared;
pub mod weak;

pub use crate::block::MAX_REFCOUNT;
pub use crate::error::{Error, Result};
pub use crate::shared::Shared;
pub use crate::weak::Weak;

#[cfg(test)]
mod tests;
