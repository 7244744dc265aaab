//! Small, dependency-free container primitives shared by the router core.
//!
//! These mirror the shapes the original C implementation hand-rolled
//! (intrusive list, singly-linked queue, geometrically-growing array) but are
//! expressed the idiomatic Rust way: a generational arena of stable
//! [`Handle`]s instead of raw pointers, `VecDeque` instead of a hand-rolled
//! singly-linked queue, and a thin wrapper over `Vec` for the one spot where
//! the exact growth cadence is externally observable.

mod arena;
mod growable;
mod list;
mod queue;
mod recipient;

pub use arena::{Arena, Handle};
pub use growable::GrowableArray;
pub use list::{HasLinks, IntrusiveList, Links};
pub use queue::Queue;
pub use recipient::RecipientTable;
