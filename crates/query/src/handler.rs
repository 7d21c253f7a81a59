//! The query lifecycle manager.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use quiver_signal::{Signal, WatchHandle, WatchOptions};

use crate::bridge::{DetachOnDrop, LoadBridge};
use crate::cancel::CancelSlot;
use crate::engine::{Activation, EngineFuture, QueryClient, QueryHandle, QueryRequest, QueryResponse, ResultSlot};
use crate::{HandlerConfig, Loaded, QueryError};

/// Future returned by [`QueryHandler`] operations.
pub type QueryFuture<T, E> = BoxFuture<'static, Result<T, QueryError<E>>>;

type DataFuture<H> = QueryFuture<Option<<H as QueryHandle>::Data>, <H as QueryHandle>::Error>;

/// Lifecycle manager for one query.
///
/// Owns the engine's continuously-updating [`QueryHandle`] for its whole life and
/// issues imperative one-shot requests through a [`QueryClient`]. Every operation
/// that waits returns a `'static` future; the work it depends on (cancelling the
/// previous one-shot request, registering watchers, calling the engine) happens
/// when the method is called, not when the future is first polled.
pub struct QueryHandler<H, C>
where
	H: QueryHandle,
	C: QueryClient<H> + ?Sized,
{
	handle: H,
	client: Arc<C>,
	config: HandlerConfig,
	cancel: Arc<CancelSlot>,
	first_loaded: Arc<AtomicBool>,
}

impl<H, C> QueryHandler<H, C>
where
	H: QueryHandle,
	C: QueryClient<H> + ?Sized,
{
	/// Creates a handler with the default configuration.
	pub fn new(handle: H, client: Arc<C>) -> Self {
		Self::with_config(handle, client, HandlerConfig::default())
	}

	/// Creates a handler.
	pub fn with_config(handle: H, client: Arc<C>, config: HandlerConfig) -> Self {
		tracing::debug!(query = %config.label, activation = ?handle.activation(), "query.handler.new");
		Self {
			handle,
			client,
			config,
			cancel: Arc::new(CancelSlot::default()),
			first_loaded: Arc::new(AtomicBool::new(false)),
		}
	}

	/// Returns the handler configuration.
	pub fn config(&self) -> &HandlerConfig {
		&self.config
	}

	/// Issues a one-shot request, cancelling the previous one if it is still in flight.
	///
	/// The returned future resolves with the engine response, fails with the engine
	/// error unchanged, or fails with [`QueryError::Cancelled`] once [`Self::cancel`]
	/// is called, a newer `query` is issued, or the future is dropped.
	pub fn query(&self, variables: Option<H::Variables>) -> QueryFuture<QueryResponse<H::Data>, H::Error> {
		let flight = self.cancel.issue();
		tracing::debug!(query = %self.config.label, generation = flight.generation(), "query.issue");
		let pending = self.client.query(QueryRequest {
			document: self.handle.document(),
			variables,
			cancel: flight.token(),
		});
		let label = self.config.label.clone();

		async move {
			let generation = flight.generation();
			let outcome = flight.run(pending).await;
			tracing::debug!(
				query = %label,
				generation,
				ok = outcome.is_ok(),
				cancelled = outcome.as_ref().is_err_and(QueryError::is_cancelled),
				"query.settled"
			);
			outcome
		}
		.boxed()
	}

	/// Cancels the in-flight one-shot request, if any. Does not wait for the transport.
	pub fn cancel(&self) {
		if let Some(generation) = self.cancel.cancel() {
			tracing::debug!(query = %self.config.label, generation, "query.cancel");
		}
	}

	/// Returns `true` while a one-shot request holds the cancel slot.
	pub fn has_pending_query(&self) -> bool {
		self.cancel.live_generation().is_some()
	}

	/// Registration options of the underlying query.
	pub fn options(&self) -> &H::Options {
		self.handle.options()
	}

	/// Reactive view of the current result.
	pub fn result(&self) -> &Signal<ResultSlot<H::Data>> {
		self.handle.result()
	}

	/// Reactive view of the current engine error.
	pub fn error(&self) -> &Signal<Option<H::Error>> {
		self.handle.error()
	}

	/// The underlying continuously-updating query.
	pub fn watch_query(&self) -> &H {
		&self.handle
	}

	/// Feeds a secondary update stream into the query result.
	pub fn subscribe_to_more(&self, options: H::SubscribeOptions) {
		self.handle.subscribe_to_more(options);
	}

	/// Fetches more data into the current result.
	///
	/// Resolves with `None` when the handle cannot fetch more right now. On failure,
	/// fails with the handle's current error rather than the engine's rejection.
	pub fn fetch_more(&self, options: H::FetchMoreOptions) -> DataFuture<H> {
		let pending = self.handle.fetch_more(options);
		self.settle_operation("fetch_more", pending)
	}

	/// Re-runs the query, optionally with new variables.
	///
	/// Same contract as [`Self::fetch_more`].
	pub fn refetch(&self, variables: Option<H::Variables>) -> DataFuture<H> {
		let pending = self.handle.refetch(variables);
		self.settle_operation("refetch", pending)
	}

	/// Activates a lazy query. Returns `false` (and does nothing) for eager handles.
	pub fn load(&self, variables: Option<H::Variables>, options: Option<H::LoadOptions>) -> bool {
		match self.handle.activation() {
			Activation::Lazy => {
				tracing::debug!(query = %self.config.label, "query.load");
				self.handle.load(variables, options);
				true
			}
			Activation::Eager => {
				tracing::debug!(query = %self.config.label, "query.load.unsupported");
				false
			}
		}
	}

	/// Starts the underlying query. Engine errors pass through unchanged.
	pub fn start(&self) -> Result<(), H::Error> {
		tracing::trace!(query = %self.config.label, "query.start");
		self.handle.start()
	}

	/// Stops the underlying query; the next load has to be awaited again.
	pub fn stop(&self) {
		tracing::trace!(query = %self.config.label, "query.stop");
		self.first_loaded.store(false, Ordering::Release);
		self.handle.stop();
	}

	/// Restarts the underlying query.
	///
	/// Does not reset the first-load state. If the restart fails the error is
	/// returned and the handle is left however the engine left it.
	pub fn abort(&self) -> Result<(), H::Error> {
		tracing::debug!(query = %self.config.label, "query.abort");
		self.handle.stop();
		self.handle.start()
	}

	/// Returns `true` once a load settled since construction or the last [`Self::stop`].
	pub fn is_first_loaded(&self) -> bool {
		self.first_loaded.load(Ordering::Acquire)
	}

	/// Waits for the next result or error.
	///
	/// Resolves with the next defined result (`None` when it is empty) or fails with
	/// the next engine error, whichever transition is delivered first. An unset result
	/// (the engine resetting after a variable change) keeps waiting. Both watchers are
	/// removed before the future settles, and also when it is dropped unsettled.
	///
	/// Once the first load happened, `trigger_possible_refetch` turns this into a
	/// [`Self::refetch`] instead of waiting.
	pub fn on_loaded(&self, trigger_possible_refetch: bool) -> DataFuture<H> {
		if trigger_possible_refetch && self.is_first_loaded() {
			tracing::debug!(query = %self.config.label, "query.on_loaded.refetch");
			return self.refetch(None);
		}

		let (bridge, receiver) = LoadBridge::new(Arc::clone(&self.first_loaded));

		let on_result = Arc::clone(&bridge);
		bridge.attach(self.handle.result().watch(WatchOptions::default(), move |slot| match slot {
			ResultSlot::Unset => ControlFlow::Continue(()),
			ResultSlot::Empty => {
				on_result.settle(Ok(None));
				ControlFlow::Break(())
			}
			ResultSlot::Value(data) => {
				on_result.settle(Ok(Some(data.clone())));
				ControlFlow::Break(())
			}
		}));

		let on_error = Arc::clone(&bridge);
		bridge.attach(self.handle.error().watch(WatchOptions::default(), move |error| match error {
			Some(error) => {
				on_error.settle(Err(QueryError::Engine(error.clone())));
				ControlFlow::Break(())
			}
			None => ControlFlow::Continue(()),
		}));

		let guard = DetachOnDrop::new(&bridge);
		drop(bridge);
		let label = self.config.label.clone();

		async move {
			let _guard = guard;
			let outcome = receiver.await.unwrap_or(Err(QueryError::Detached));
			tracing::debug!(query = %label, ok = outcome.is_ok(), "query.on_loaded.settled");
			outcome
		}
		.boxed()
	}

	/// Like [`Self::on_loaded`], but never fails: the failure is returned as a value.
	pub fn loaded_result(&self, trigger_possible_refetch: bool) -> BoxFuture<'static, Loaded<H::Data, H::Error>> {
		self.on_loaded(trigger_possible_refetch).map(Loaded::from).boxed()
	}

	/// Calls `callback` with the first non-empty result, then stops watching.
	///
	/// A result that is already present counts: the callback then runs before this
	/// method returns. The handle can be used to stop waiting early.
	pub fn watch_once_on_result<F>(&self, callback: F) -> WatchHandle
	where
		F: FnOnce(&H::Data) + Send + 'static,
	{
		let callback = Mutex::new(Some(callback));
		self.handle.result().watch(WatchOptions::immediate(), move |slot| {
			let Some(data) = slot.value() else {
				return ControlFlow::Continue(());
			};
			let callback = callback.lock().take();
			if let Some(callback) = callback {
				callback(data);
			}
			ControlFlow::Break(())
		})
	}

	/// Calls `callback` with the current and every later non-empty result.
	pub fn watch_on_result<F>(&self, callback: F) -> WatchHandle
	where
		F: Fn(&H::Data) + Send + Sync + 'static,
	{
		self.handle.result().watch(WatchOptions::immediate(), move |slot| {
			if let Some(data) = slot.value() {
				callback(data);
			}
			ControlFlow::Continue(())
		})
	}

	/// Registers `callback` for every raw engine response, unfiltered.
	///
	/// Stopping the returned handle unregisters it.
	pub fn on_result<F>(&self, callback: F) -> WatchHandle
	where
		F: Fn(&QueryResponse<H::Data>) + Send + Sync + 'static,
	{
		self.handle.on_result(Box::new(callback))
	}

	fn settle_operation(&self, operation: &'static str, pending: Option<EngineFuture<QueryResponse<H::Data>, H::Error>>) -> DataFuture<H> {
		let Some(pending) = pending else {
			tracing::debug!(query = %self.config.label, operation, "query.operation.unavailable");
			return future::ready(Ok(None)).boxed();
		};
		let error = self.handle.error().clone();
		let label = self.config.label.clone();

		async move {
			match pending.await {
				Ok(response) => Ok(response.data),
				Err(_) => {
					let current = error.get();
					tracing::debug!(query = %label, operation, reported = current.is_some(), "query.operation.failed");
					Err(current.map_or(QueryError::Unreported, QueryError::Engine))
				}
			}
		}
		.boxed()
	}
}

impl<H, C> Drop for QueryHandler<H, C>
where
	H: QueryHandle,
	C: QueryClient<H> + ?Sized,
{
	fn drop(&mut self) {
		if !self.config.cancel_on_drop {
			return;
		}
		if let Some(generation) = self.cancel.cancel() {
			tracing::debug!(query = %self.config.label, generation, "query.cancel_on_drop");
		}
	}
}

impl<H, C> fmt::Debug for QueryHandler<H, C>
where
	H: QueryHandle,
	C: QueryClient<H> + ?Sized,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("QueryHandler")
			.field("label", &self.config.label)
			.field("first_loaded", &self.is_first_loaded())
			.field("pending_query", &self.cancel.live_generation())
			.finish_non_exhaustive()
	}
}
