use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::watch::{Registry, WatchHandle, WatchId, WatchOptions};

type Callback<T> = Box<dyn Fn(&T) -> ControlFlow<()> + Send + Sync>;

struct Watcher<T> {
	id: WatchId,
	active: Arc<AtomicBool>,
	/// One past the newest version delivered (or skipped at registration).
	seen: AtomicU64,
	callback: Callback<T>,
}

struct Versioned<T> {
	value: T,
	version: u64,
}

struct Inner<T> {
	value: RwLock<Versioned<T>>,
	watchers: Mutex<Vec<Arc<Watcher<T>>>>,
	next_id: AtomicU64,
}

impl<T> Inner<T> {
	fn deliver(&self, watcher: &Watcher<T>, value: &T, version: u64) {
		if !watcher.active.load(Ordering::Acquire) {
			return;
		}
		if watcher.seen.fetch_max(version + 1, Ordering::AcqRel) > version {
			return;
		}
		if (watcher.callback)(value).is_break() && watcher.active.swap(false, Ordering::AcqRel) {
			self.remove_watcher(watcher.id);
		}
	}

	fn remove_watcher(&self, id: WatchId) -> bool {
		// Dropped after the list lock is released: a callback's captures may touch this signal.
		let removed = {
			let mut watchers = self.watchers.lock();
			watchers.iter().position(|w| w.id == id).map(|pos| watchers.remove(pos))
		};
		removed.is_some()
	}
}

impl<T: Send + Sync> Registry for Inner<T> {
	fn remove(&self, id: WatchId) -> bool {
		self.remove_watcher(id)
	}
}

/// A shared, observable value cell.
///
/// Cloning a signal yields another handle onto the same cell.
///
/// Watchers run synchronously inside [`Signal::set`] / [`Signal::update`] with no signal
/// lock held, so a watcher may read or set any signal (including this one) and stop any
/// [`WatchHandle`]. A watcher stopped while a notification is in progress is not called
/// for the rest of that notification.
///
/// Each transition carries a version, and a watcher is never called twice for the same
/// version or with an older version than one it has already seen. A `set` from inside a
/// watcher therefore supersedes the outer value for watchers not yet reached, and
/// concurrent `set` calls from different threads may skip a value for watchers that
/// already observed a newer one.
pub struct Signal<T> {
	inner: Arc<Inner<T>>,
}

impl<T> Clone for Signal<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T: Default + Clone + Send + Sync + 'static> Default for Signal<T> {
	fn default() -> Self {
		Self::new(T::default())
	}
}

impl<T> Signal<T>
where
	T: Clone + Send + Sync + 'static,
{
	/// Creates a signal holding `value`.
	pub fn new(value: T) -> Self {
		Self {
			inner: Arc::new(Inner {
				value: RwLock::new(Versioned { value, version: 0 }),
				watchers: Mutex::new(Vec::new()),
				next_id: AtomicU64::new(0),
			}),
		}
	}

	/// Returns a clone of the current value.
	pub fn get(&self) -> T {
		self.inner.value.read().value.clone()
	}

	/// Runs `f` against the current value without cloning it.
	///
	/// `f` runs under the value lock and must not set this signal.
	pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
		f(&self.inner.value.read().value)
	}

	/// Replaces the value and notifies every active watcher.
	pub fn set(&self, value: T) {
		self.update(|slot| *slot = value);
	}

	/// Mutates the value in place and notifies every active watcher.
	pub fn update(&self, f: impl FnOnce(&mut T)) {
		let (snapshot, version) = {
			let mut slot = self.inner.value.write();
			f(&mut slot.value);
			slot.version += 1;
			(slot.value.clone(), slot.version)
		};
		self.notify(&snapshot, version);
	}

	/// Registers a watcher.
	///
	/// The watcher is called on every subsequent transition until it returns
	/// [`ControlFlow::Break`] or its handle is stopped. With
	/// [`WatchOptions::immediate`] it is also called once with the current value before
	/// this method returns; breaking there means it is never registered for transitions.
	pub fn watch<F>(&self, options: WatchOptions, callback: F) -> WatchHandle
	where
		F: Fn(&T) -> ControlFlow<()> + Send + Sync + 'static,
	{
		let id = WatchId(self.inner.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1));
		let watcher = Arc::new(Watcher {
			id,
			active: Arc::new(AtomicBool::new(true)),
			seen: AtomicU64::new(0),
			callback: Box::new(callback),
		});
		{
			let mut watchers = self.inner.watchers.lock();
			if !options.immediate {
				// A transition whose value is already written belongs to the past.
				watcher.seen.store(self.inner.value.read().version + 1, Ordering::Release);
			}
			watchers.push(Arc::clone(&watcher));
		}

		let weak = Arc::downgrade(&self.inner);
		let registry: Weak<dyn Registry> = weak;
		let handle = WatchHandle::new(id, registry, Arc::clone(&watcher.active));
		tracing::trace!(watch = %id, immediate = options.immediate, "signal.watch");

		if options.immediate {
			let (current, version) = {
				let slot = self.inner.value.read();
				(slot.value.clone(), slot.version)
			};
			self.inner.deliver(&watcher, &current, version);
		}
		handle
	}

	/// Returns the number of registered watchers.
	pub fn watcher_count(&self) -> usize {
		self.inner.watchers.lock().len()
	}

	fn notify(&self, value: &T, version: u64) {
		let watchers = self.inner.watchers.lock().clone();
		tracing::trace!(watchers = watchers.len(), version, "signal.notify");
		for watcher in &watchers {
			self.inner.deliver(watcher, value, version);
		}
	}
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Signal")
			.field("value", &self.inner.value.read().value)
			.field("watchers", &self.inner.watchers.lock().len())
			.finish()
	}
}
