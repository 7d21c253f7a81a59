use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Identifier of a watcher, unique per signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub(crate) u64);

impl fmt::Display for WatchId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "watch#{}", self.0)
	}
}

/// Options for [`Signal::watch`](crate::Signal::watch).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
	/// Call the watcher with the current value while registering it.
	pub immediate: bool,
}

impl WatchOptions {
	/// Options with `immediate` set.
	pub const fn immediate() -> Self {
		Self { immediate: true }
	}
}

/// Removal side of a signal's watcher list, erased over the value type.
pub(crate) trait Registry: Send + Sync {
	fn remove(&self, id: WatchId) -> bool;
}

/// Handle to a registered watcher.
///
/// Dropping the handle does not stop the watcher; call [`WatchHandle::stop`].
pub struct WatchHandle {
	id: WatchId,
	registry: Weak<dyn Registry>,
	active: Arc<AtomicBool>,
}

impl WatchHandle {
	pub(crate) fn new(id: WatchId, registry: Weak<dyn Registry>, active: Arc<AtomicBool>) -> Self {
		Self { id, registry, active }
	}

	/// Returns the watcher's identifier.
	pub fn id(&self) -> WatchId {
		self.id
	}

	/// Returns `true` while the watcher can still be called.
	pub fn is_active(&self) -> bool {
		self.active.load(Ordering::Acquire)
	}

	/// Stops the watcher.
	///
	/// Returns `true` if this call stopped it, `false` if it was already stopped (by an
	/// earlier call, or by its callback returning [`ControlFlow::Break`](std::ops::ControlFlow::Break)).
	pub fn stop(&self) -> bool {
		if !self.active.swap(false, Ordering::AcqRel) {
			return false;
		}
		if let Some(registry) = self.registry.upgrade() {
			registry.remove(self.id);
		}
		true
	}
}

impl fmt::Debug for WatchHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WatchHandle")
			.field("id", &self.id)
			.field("active", &self.is_active())
			.finish_non_exhaustive()
	}
}
