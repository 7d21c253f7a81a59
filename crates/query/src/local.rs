//! In-process query engine.
//!
//! [`LocalQuery`] implements [`QueryHandle`] over a [`LocalDocument`], a named async
//! fetch function. Fetches run as tokio tasks, so lifecycle methods that fetch must be
//! called from within a tokio runtime. [`LocalClient`] is the matching one-shot
//! transport.

use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::future::{self, BoxFuture};
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use quiver_signal::{Signal, WatchHandle, WatchOptions};
use tokio::task::JoinHandle;

use crate::engine::{
	Activation, EngineFuture, NetworkStatus, QueryClient, QueryHandle, QueryRequest, QueryResponse, ResponseCallback,
	ResultSlot,
};

type Fetcher<D, V, E> = dyn Fn(Option<V>) -> BoxFuture<'static, Result<Option<D>, E>> + Send + Sync;

/// A named async fetch function.
pub struct LocalDocument<D, V, E> {
	name: Arc<str>,
	fetcher: Arc<Fetcher<D, V, E>>,
}

impl<D, V, E> Clone for LocalDocument<D, V, E> {
	fn clone(&self) -> Self {
		Self {
			name: Arc::clone(&self.name),
			fetcher: Arc::clone(&self.fetcher),
		}
	}
}

impl<D, V, E> LocalDocument<D, V, E> {
	/// Creates a document from a fetch function.
	pub fn new<F, Fut>(name: impl Into<Arc<str>>, fetch: F) -> Self
	where
		F: Fn(Option<V>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Option<D>, E>> + Send + 'static,
	{
		Self {
			name: name.into(),
			fetcher: Arc::new(move |variables| fetch(variables).boxed()),
		}
	}

	/// Returns the document name.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Runs the fetch function.
	pub fn fetch(&self, variables: Option<V>) -> BoxFuture<'static, Result<Option<D>, E>> {
		(self.fetcher)(variables)
	}
}

impl<D, V, E> fmt::Debug for LocalDocument<D, V, E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LocalDocument").field("name", &self.name).finish_non_exhaustive()
	}
}

/// Whether starting a query that already holds a result fetches again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPolicy {
	/// Keep a present result; only fetch when the result is unset.
	#[default]
	CacheFirst,
	/// Always fetch.
	NetworkOnly,
}

/// Registration options of a [`LocalQuery`].
#[derive(Debug, Clone)]
pub struct LocalOptions<V> {
	/// Fetch policy applied by `start` and `load`.
	pub fetch_policy: FetchPolicy,
	/// Whether the query waits for `load`.
	pub activation: Activation,
	/// Variables used until a refetch or load replaces them.
	pub variables: Option<V>,
}

impl<V> Default for LocalOptions<V> {
	fn default() -> Self {
		Self {
			fetch_policy: FetchPolicy::default(),
			activation: Activation::Eager,
			variables: None,
		}
	}
}

impl<V> LocalOptions<V> {
	/// Set the fetch policy.
	pub fn fetch_policy(mut self, policy: FetchPolicy) -> Self {
		self.fetch_policy = policy;
		self
	}

	/// Make the query lazy.
	pub fn lazy(mut self) -> Self {
		self.activation = Activation::Lazy;
		self
	}

	/// Set the initial variables.
	pub fn variables(mut self, variables: V) -> Self {
		self.variables = Some(variables);
		self
	}
}

type MergeFn<D> = Box<dyn FnOnce(Option<D>, Option<D>) -> Option<D> + Send>;

/// Arguments for [`LocalQuery`]'s fetch-more.
pub struct LocalFetchMore<D, V> {
	variables: Option<V>,
	merge: MergeFn<D>,
}

impl<D, V> LocalFetchMore<D, V> {
	/// Fetches with `variables` and combines the current result with the fetched one.
	pub fn new<F>(variables: Option<V>, merge: F) -> Self
	where
		F: FnOnce(Option<D>, Option<D>) -> Option<D> + Send + 'static,
	{
		Self {
			variables,
			merge: Box::new(merge),
		}
	}
}

type UpdateFn<D> = Box<dyn Fn(Option<D>, D) -> D + Send + Sync>;

/// A stream of updates merged into a [`LocalQuery`]'s result.
pub struct LocalSubscription<D> {
	updates: BoxStream<'static, D>,
	merge: UpdateFn<D>,
}

impl<D> LocalSubscription<D> {
	/// Merges every item of `updates` into the current result with `merge`.
	pub fn new<F>(updates: BoxStream<'static, D>, merge: F) -> Self
	where
		F: Fn(Option<D>, D) -> D + Send + Sync + 'static,
	{
		Self {
			updates,
			merge: Box::new(merge),
		}
	}
}

struct Shared<D, V, E> {
	document: LocalDocument<D, V, E>,
	options: LocalOptions<V>,
	policy: Mutex<FetchPolicy>,
	variables: Mutex<Option<V>>,
	result: Signal<ResultSlot<D>>,
	error: Signal<Option<E>>,
	responses: Signal<Option<QueryResponse<D>>>,
	active: AtomicBool,
	epoch: AtomicU64,
	subscriptions: Mutex<Vec<JoinHandle<()>>>,
}

impl<D, V, E> Shared<D, V, E>
where
	D: Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
	E: Clone + Send + Sync + 'static,
{
	/// Whether work started in `epoch` may still publish.
	fn is_current(&self, epoch: u64) -> bool {
		self.epoch.load(Ordering::Acquire) == epoch
	}

	fn current(&self) -> Option<D> {
		self.result.with(|slot| slot.value().cloned())
	}

	fn respond(&self, data: Option<D>, status: NetworkStatus) {
		self.responses.set(Some(QueryResponse::with_status(data, status)));
	}

	fn publish(&self, epoch: u64, outcome: &Result<Option<D>, E>) {
		if !self.is_current(epoch) {
			tracing::trace!(document = self.document.name(), epoch, "local.publish.stale");
			return;
		}
		match outcome {
			Ok(data) => {
				if self.error.with(Option::is_some) {
					self.error.set(None);
				}
				self.result.set(ResultSlot::from_data(data.clone()));
				self.respond(data.clone(), NetworkStatus::Ready);
			}
			Err(error) => {
				tracing::debug!(document = self.document.name(), "local.publish.error");
				self.error.set(Some(error.clone()));
				self.respond(self.current(), NetworkStatus::Error);
			}
		}
	}
}

/// Continuously-updating query over a [`LocalDocument`].
///
/// Every fetch is reported to [`QueryHandle::on_result`] listeners twice: once with its
/// in-flight [`NetworkStatus`] when it starts, and once with `Ready` or `Error` when
/// it settles. Updates merged by a subscription are reported as `Ready`.
pub struct LocalQuery<D, V, E> {
	shared: Arc<Shared<D, V, E>>,
}

impl<D, V, E> LocalQuery<D, V, E>
where
	D: Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
	E: Clone + Send + Sync + 'static,
{
	/// Creates a stopped query with default options.
	pub fn new(document: LocalDocument<D, V, E>) -> Self {
		Self::with_options(document, LocalOptions::default())
	}

	/// Creates a stopped query.
	pub fn with_options(document: LocalDocument<D, V, E>, options: LocalOptions<V>) -> Self {
		Self {
			shared: Arc::new(Shared {
				document,
				policy: Mutex::new(options.fetch_policy),
				variables: Mutex::new(options.variables.clone()),
				options,
				result: Signal::default(),
				error: Signal::default(),
				responses: Signal::default(),
				active: AtomicBool::new(false),
				epoch: AtomicU64::new(0),
				subscriptions: Mutex::new(Vec::new()),
			}),
		}
	}

	/// Current variables.
	pub fn variables(&self) -> Option<V> {
		self.shared.variables.lock().clone()
	}

	fn fetch(&self, variables: Option<V>, status: NetworkStatus) -> JoinHandle<Result<Option<D>, E>> {
		let shared = Arc::clone(&self.shared);
		let epoch = shared.epoch.load(Ordering::Acquire);
		tracing::trace!(document = shared.document.name(), epoch, ?status, "local.fetch");
		shared.respond(shared.current(), status);
		tokio::spawn(async move {
			let outcome = shared.document.fetch(variables).await;
			shared.publish(epoch, &outcome);
			outcome
		})
	}

	fn activate(&self) {
		let cached = !self.shared.result.with(ResultSlot::is_unset);
		if cached && *self.shared.policy.lock() == FetchPolicy::CacheFirst {
			return;
		}
		let status = if cached {
			NetworkStatus::Refetch
		} else {
			NetworkStatus::Loading
		};
		drop(self.fetch(self.variables(), status));
	}

	/// Stores `variables` and fetches with them, dropping a result loaded for older ones.
	fn set_variables(&self, variables: V) -> JoinHandle<Result<Option<D>, E>> {
		*self.shared.variables.lock() = Some(variables);
		let status = if self.shared.result.with(ResultSlot::is_unset) {
			NetworkStatus::Loading
		} else {
			self.shared.result.set(ResultSlot::Unset);
			NetworkStatus::SetVariables
		};
		self.fetch(self.variables(), status)
	}
}

fn settled<D, E>(task: JoinHandle<Result<Option<D>, E>>) -> EngineFuture<QueryResponse<D>, E>
where
	D: Send + 'static,
	E: Send + 'static,
{
	async move {
		match task.await {
			Ok(outcome) => outcome.map(QueryResponse::ready),
			Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
			// Only runtime shutdown cancels a fetch task.
			Err(_) => future::pending().await,
		}
	}
	.boxed()
}

impl<D, V, E> QueryHandle for LocalQuery<D, V, E>
where
	D: Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
	E: Clone + Send + Sync + 'static,
{
	type Document = LocalDocument<D, V, E>;
	type Variables = V;
	type Data = D;
	type Error = E;
	type Options = LocalOptions<V>;
	type FetchMoreOptions = LocalFetchMore<D, V>;
	type SubscribeOptions = LocalSubscription<D>;
	type LoadOptions = FetchPolicy;

	fn document(&self) -> Self::Document {
		self.shared.document.clone()
	}

	fn options(&self) -> &Self::Options {
		&self.shared.options
	}

	fn result(&self) -> &Signal<ResultSlot<D>> {
		&self.shared.result
	}

	fn error(&self) -> &Signal<Option<E>> {
		&self.shared.error
	}

	fn start(&self) -> Result<(), E> {
		if self.shared.active.swap(true, Ordering::AcqRel) {
			return Ok(());
		}
		if self.shared.options.activation == Activation::Lazy {
			return Ok(());
		}
		self.activate();
		Ok(())
	}

	fn stop(&self) {
		if !self.shared.active.swap(false, Ordering::AcqRel) {
			return;
		}
		self.shared.epoch.fetch_add(1, Ordering::AcqRel);
		let subscriptions = std::mem::take(&mut *self.shared.subscriptions.lock());
		for subscription in subscriptions {
			subscription.abort();
		}
		tracing::trace!(document = self.shared.document.name(), "local.stop");
	}

	fn is_active(&self) -> bool {
		self.shared.active.load(Ordering::Acquire)
	}

	fn refetch(&self, variables: Option<V>) -> Option<EngineFuture<QueryResponse<D>, E>> {
		if !self.is_active() {
			return None;
		}
		let task = match variables {
			Some(variables) => self.set_variables(variables),
			None => self.fetch(self.variables(), NetworkStatus::Refetch),
		};
		Some(settled(task))
	}

	fn fetch_more(&self, options: LocalFetchMore<D, V>) -> Option<EngineFuture<QueryResponse<D>, E>> {
		if !self.is_active() {
			return None;
		}
		let shared = Arc::clone(&self.shared);
		let epoch = shared.epoch.load(Ordering::Acquire);
		let LocalFetchMore { variables, merge } = options;
		let variables = variables.or_else(|| self.variables());
		tracing::trace!(document = shared.document.name(), epoch, "local.fetch_more");
		shared.respond(shared.current(), NetworkStatus::FetchMore);
		let task = tokio::spawn(async move {
			let outcome = shared.document.fetch(variables).await;
			let merged = match &outcome {
				Ok(incoming) => Ok(merge(shared.current(), incoming.clone())),
				Err(error) => Err(error.clone()),
			};
			shared.publish(epoch, &merged);
			outcome
		});
		Some(settled(task))
	}

	fn subscribe_to_more(&self, options: LocalSubscription<D>) {
		if !self.is_active() {
			tracing::debug!(document = self.shared.document.name(), "local.subscribe.inactive");
			return;
		}
		let shared = Arc::clone(&self.shared);
		let epoch = shared.epoch.load(Ordering::Acquire);
		let LocalSubscription { mut updates, merge } = options;
		let task = tokio::spawn(async move {
			while let Some(update) = updates.next().await {
				if !shared.is_current(epoch) {
					tracing::trace!(document = shared.document.name(), epoch, "local.subscribe.stale");
					break;
				}
				let merged = merge(shared.current(), update);
				shared.result.set(ResultSlot::Value(merged.clone()));
				shared.respond(Some(merged), NetworkStatus::Ready);
			}
		});
		let mut subscriptions = self.shared.subscriptions.lock();
		subscriptions.retain(|subscription| !subscription.is_finished());
		subscriptions.push(task);
	}

	fn on_result(&self, callback: ResponseCallback<D>) -> WatchHandle {
		self.shared.responses.watch(WatchOptions::default(), move |response| {
			if let Some(response) = response {
				callback(response);
			}
			ControlFlow::Continue(())
		})
	}

	fn activation(&self) -> Activation {
		self.shared.options.activation
	}

	/// Activates the query. New variables always fetch, whatever the fetch policy;
	/// without them the policy decides whether a present result is kept.
	fn load(&self, variables: Option<V>, policy: Option<FetchPolicy>) {
		if let Some(policy) = policy {
			*self.shared.policy.lock() = policy;
		}
		self.shared.active.store(true, Ordering::Release);
		match variables {
			Some(variables) => drop(self.set_variables(variables)),
			None => self.activate(),
		}
	}
}

impl<D, V, E> fmt::Debug for LocalQuery<D, V, E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LocalQuery")
			.field("document", &self.shared.document)
			.field("active", &self.shared.active.load(Ordering::Acquire))
			.finish_non_exhaustive()
	}
}

/// One-shot transport for [`LocalQuery`] documents.
///
/// Runs the document's fetch function directly, bypassing the query's signals. Once
/// the request's token is cancelled the fetch is dropped and the returned future never
/// settles; the caller observes cancellation through its own token.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClient;

impl<D, V, E> QueryClient<LocalQuery<D, V, E>> for LocalClient
where
	D: Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
	E: Clone + Send + Sync + 'static,
{
	fn query(&self, request: QueryRequest<LocalDocument<D, V, E>, V>) -> EngineFuture<QueryResponse<D>, E> {
		let QueryRequest { document, variables, cancel } = request;
		let fetch = document.fetch(variables);
		async move {
			tokio::select! {
				biased;
				() = cancel.cancelled() => {
					tracing::trace!(document = document.name(), "local.query.aborted");
					future::pending().await
				}
				outcome = fetch => outcome.map(QueryResponse::ready),
			}
		}
		.boxed()
	}
}

#[cfg(test)]
mod tests;
