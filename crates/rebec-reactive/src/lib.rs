//! Synchronous reactive references for the rebec streaming engine.
//!
//! A [`SharedRef`] is a clonable handle to a single mutable value that can be
//! read at any time (`get`) and whose mutations synchronously notify every
//! registered listener (`on_update`). Listeners can be scoped to a
//! [`CancellationToken`](tokio_util::sync::CancellationToken): cancelling the
//! token (or any of its ancestors) detaches the listener.
//!
//! There is no buffering and no scheduling: the last written value always
//! wins, and notification happens on the caller's thread before `set`
//! returns.

#![forbid(unsafe_code)]

mod shared_ref;

pub use shared_ref::{ListenerHandle, SharedRef};

pub use tokio_util::sync::CancellationToken;
