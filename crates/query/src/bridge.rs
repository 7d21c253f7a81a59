//! Settle-once bridge from result/error watchers to a single future.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use quiver_signal::WatchHandle;
use tokio::sync::oneshot;

use crate::QueryError;

pub(crate) type LoadOutcome<D, E> = Result<Option<D>, QueryError<E>>;

/// Shared by the watchers of one `on_loaded` call.
///
/// The first watcher to call [`LoadBridge::settle`] wins: it marks the handler
/// first-loaded, stops every attached watcher and sends the outcome. Later calls
/// are ignored. The watcher closures hold the only strong references, so once
/// every watcher is gone without settling, the receiver observes a closed channel.
pub(crate) struct LoadBridge<D, E> {
	first_loaded: Arc<AtomicBool>,
	state: Mutex<BridgeState<D, E>>,
}

struct BridgeState<D, E> {
	sender: Option<oneshot::Sender<LoadOutcome<D, E>>>,
	watchers: Vec<WatchHandle>,
}

impl<D, E> LoadBridge<D, E> {
	pub fn new(first_loaded: Arc<AtomicBool>) -> (Arc<Self>, oneshot::Receiver<LoadOutcome<D, E>>) {
		let (sender, receiver) = oneshot::channel();
		let bridge = Arc::new(Self {
			first_loaded,
			state: Mutex::new(BridgeState {
				sender: Some(sender),
				watchers: Vec::with_capacity(2),
			}),
		});
		(bridge, receiver)
	}

	/// Keeps `handle` until the bridge settles, or stops it at once if it already has.
	pub fn attach(&self, handle: WatchHandle) {
		let mut state = self.state.lock();
		if state.sender.is_some() {
			state.watchers.push(handle);
			return;
		}
		drop(state);
		handle.stop();
	}

	/// Settles the bridge unless another watcher got there first.
	pub fn settle(&self, outcome: LoadOutcome<D, E>) -> bool {
		let Some((sender, watchers)) = self.take() else {
			return false;
		};
		self.first_loaded.store(true, Ordering::Release);
		for watcher in &watchers {
			watcher.stop();
		}
		let _ = sender.send(outcome);
		true
	}

	/// Stops every watcher without settling.
	pub fn detach(&self) {
		if let Some((_, watchers)) = self.take() {
			for watcher in &watchers {
				watcher.stop();
			}
		}
	}

	#[cfg(test)]
	pub fn attached(&self) -> usize {
		self.state.lock().watchers.len()
	}

	fn take(&self) -> Option<(oneshot::Sender<LoadOutcome<D, E>>, Vec<WatchHandle>)> {
		let mut state = self.state.lock();
		let sender = state.sender.take()?;
		Some((sender, std::mem::take(&mut state.watchers)))
	}
}

/// Held by the `on_loaded` future; detaches the bridge if the future is dropped unsettled.
pub(crate) struct DetachOnDrop<D, E> {
	bridge: Weak<LoadBridge<D, E>>,
}

impl<D, E> DetachOnDrop<D, E> {
	pub fn new(bridge: &Arc<LoadBridge<D, E>>) -> Self {
		Self {
			bridge: Arc::downgrade(bridge),
		}
	}
}

impl<D, E> Drop for DetachOnDrop<D, E> {
	fn drop(&mut self) {
		if let Some(bridge) = self.bridge.upgrade() {
			bridge.detach();
		}
	}
}
