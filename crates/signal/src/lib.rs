//! Reactive value cells.
//!
//! A [`Signal`] holds one value and a list of watchers. Every [`Signal::set`] is a
//! transition: all active watchers are called with the new value, in registration order,
//! on the calling thread. Watchers are plain callbacks returning [`ControlFlow`]; returning
//! [`ControlFlow::Break`] removes the watcher, and the [`WatchHandle`] returned by
//! [`Signal::watch`] removes it from the outside.
//!
//! ```
//! use std::ops::ControlFlow;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! use quiver_signal::{Signal, WatchOptions};
//!
//! let counter = Signal::new(0u32);
//! let seen = Arc::new(AtomicUsize::new(0));
//! let seen_by_watcher = Arc::clone(&seen);
//! let handle = counter.watch(WatchOptions::immediate(), move |_| {
//! 	seen_by_watcher.fetch_add(1, Ordering::SeqCst);
//! 	ControlFlow::Continue(())
//! });
//!
//! counter.set(1);
//! handle.stop();
//! counter.set(2);
//! assert_eq!(seen.load(Ordering::SeqCst), 2);
//! ```
#![warn(missing_docs)]

pub use std::ops::ControlFlow;

mod signal;
mod watch;

pub use signal::Signal;
pub use watch::{WatchHandle, WatchId, WatchOptions};
