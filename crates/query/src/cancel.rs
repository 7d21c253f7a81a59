//! Cancellation tracking for one-shot queries.
//!
//! A [`CancelSlot`] holds the token of at most one live query. Issuing a new query
//! cancels the previous token, and a settled query only clears the slot while the slot
//! still holds its own generation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::QueryError;
use crate::engine::EngineFuture;

struct Live {
	generation: u64,
	token: CancellationToken,
}

/// Holder of the single live one-shot query.
#[derive(Default)]
pub(crate) struct CancelSlot {
	generations: AtomicU64,
	live: Mutex<Option<Live>>,
}

impl CancelSlot {
	/// Cancels the live query, if any, and installs a fresh one. Generations start at 1.
	pub fn issue(self: &Arc<Self>) -> InFlight {
		let generation = self.generations.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
		let token = CancellationToken::new();
		let previous = self.live.lock().replace(Live {
			generation,
			token: token.clone(),
		});
		if let Some(previous) = previous {
			tracing::trace!(generation = previous.generation, superseded_by = generation, "cancel_slot.supersede");
			previous.token.cancel();
		}
		InFlight {
			slot: Arc::clone(self),
			generation,
			token,
			settled: false,
		}
	}

	/// Cancels and clears the live query. Returns its generation.
	pub fn cancel(&self) -> Option<u64> {
		let live = self.live.lock().take()?;
		live.token.cancel();
		Some(live.generation)
	}

	/// Clears the slot if it still holds `generation`.
	pub fn release(&self, generation: u64) -> bool {
		let mut live = self.live.lock();
		if live.as_ref().is_some_and(|live| live.generation == generation) {
			*live = None;
			true
		} else {
			false
		}
	}

	/// Generation of the live query.
	pub fn live_generation(&self) -> Option<u64> {
		self.live.lock().as_ref().map(|live| live.generation)
	}
}

/// One issued one-shot query.
///
/// Dropping it before it settles cancels its token. Either way the slot is released.
pub(crate) struct InFlight {
	slot: Arc<CancelSlot>,
	generation: u64,
	token: CancellationToken,
	settled: bool,
}

impl InFlight {
	pub const fn generation(&self) -> u64 {
		self.generation
	}

	/// Token handed to the transport.
	pub fn token(&self) -> CancellationToken {
		self.token.clone()
	}

	/// Drives the engine future until it settles or the token is cancelled.
	///
	/// Cancellation wins when both are ready, so a cancelled call never resolves.
	pub async fn run<T, E>(mut self, pending: EngineFuture<T, E>) -> Result<T, QueryError<E>> {
		let outcome = tokio::select! {
			biased;
			() = self.token.cancelled() => Err(QueryError::Cancelled),
			result = pending => result.map_err(QueryError::Engine),
		};
		self.settled = true;
		outcome
	}
}

impl Drop for InFlight {
	fn drop(&mut self) {
		if !self.settled && !self.token.is_cancelled() {
			tracing::trace!(generation = self.generation, "cancel_slot.abandon");
			self.token.cancel();
		}
		self.slot.release(self.generation);
	}
}
