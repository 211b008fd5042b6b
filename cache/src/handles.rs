//! The user-facing handles of a coalescer.
//!
//! `Coalescer` blocks the calling thread; `AsyncCoalescer` awaits instead.
//! Both are thin wrappers around the same shared core and convert into each
//! other for free.

#[cfg(feature = "tokio")]
mod futures;
mod sync;

#[cfg(feature = "tokio")]
pub use futures::AsyncCoalescer;
pub use sync::Coalescer;
