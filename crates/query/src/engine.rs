//! Interfaces consumed from the underlying query engine.
//!
//! The manager never performs I/O itself. It talks to two engine capabilities:
//! a [`QueryClient`] for imperative one-shot requests, and a [`QueryHandle`] for the
//! continuously-updating query it owns.

use futures::future::BoxFuture;
use quiver_signal::{Signal, WatchHandle};
use tokio_util::sync::CancellationToken;

/// Future returned by engine operations.
pub type EngineFuture<T, E> = BoxFuture<'static, Result<T, E>>;

/// Callback receiving every raw engine response.
pub type ResponseCallback<D> = Box<dyn Fn(&QueryResponse<D>) + Send + Sync>;

/// Network state reported alongside a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkStatus {
	/// First request in flight.
	#[default]
	Loading,
	/// Variables changed and a new request is in flight.
	SetVariables,
	/// A fetch-more request is in flight.
	FetchMore,
	/// A refetch is in flight.
	Refetch,
	/// No request in flight, data is current.
	Ready,
	/// The last request failed.
	Error,
}

impl NetworkStatus {
	/// Returns `true` while a request is in flight.
	pub const fn is_in_flight(self) -> bool {
		!matches!(self, Self::Ready | Self::Error)
	}
}

/// One engine response.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse<D> {
	/// Response payload, absent when the engine produced none.
	pub data: Option<D>,
	/// Whether more data for this request is still loading.
	pub loading: bool,
	/// Network state at the time of the response.
	pub network_status: NetworkStatus,
}

impl<D> QueryResponse<D> {
	/// A response reporting `status`; `loading` follows [`NetworkStatus::is_in_flight`].
	pub fn with_status(data: Option<D>, status: NetworkStatus) -> Self {
		Self {
			data,
			loading: status.is_in_flight(),
			network_status: status,
		}
	}

	/// A settled response carrying `data`.
	pub fn ready(data: Option<D>) -> Self {
		Self::with_status(data, NetworkStatus::Ready)
	}
}

/// Value held by a handle's result signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultSlot<D> {
	/// No result: nothing loaded yet, or the engine reset the slot after a variable change.
	Unset,
	/// The query succeeded without a payload.
	Empty,
	/// The query produced a payload.
	Value(D),
}

impl<D> Default for ResultSlot<D> {
	fn default() -> Self {
		Self::Unset
	}
}

impl<D> ResultSlot<D> {
	/// Returns `true` for [`ResultSlot::Unset`].
	pub const fn is_unset(&self) -> bool {
		matches!(self, Self::Unset)
	}

	/// Returns the payload, if any.
	pub const fn value(&self) -> Option<&D> {
		match self {
			Self::Value(value) => Some(value),
			_ => None,
		}
	}

	/// Converts a response payload into the slot it settles to.
	pub fn from_data(data: Option<D>) -> Self {
		data.map_or(Self::Empty, Self::Value)
	}
}

/// How a handle becomes active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
	/// Activated by [`QueryHandle::start`]; [`QueryHandle::load`] is not supported.
	#[default]
	Eager,
	/// Waits for [`QueryHandle::load`] before producing results.
	Lazy,
}

/// A one-shot request handed to a [`QueryClient`].
#[derive(Debug, Clone)]
pub struct QueryRequest<Doc, V> {
	/// What to fetch.
	pub document: Doc,
	/// Variables for this request.
	pub variables: Option<V>,
	/// Triggered when the caller abandons the request.
	///
	/// Transports should stop work once it fires. Honoring it is best-effort: the
	/// caller already treats a cancelled request as settled.
	pub cancel: CancellationToken,
}

/// Imperative one-shot transport for the queries described by `H`.
pub trait QueryClient<H: QueryHandle + ?Sized>: Send + Sync + 'static {
	/// Issues a single request.
	fn query(&self, request: QueryRequest<H::Document, H::Variables>) -> EngineFuture<QueryResponse<H::Data>, H::Error>;
}

/// The engine's continuously-updating query.
///
/// Implementors own the result and error signals and all network concurrency. The
/// manager only reads the signals and calls the lifecycle methods.
pub trait QueryHandle: Send + Sync + 'static {
	/// Engine-specific description of what to fetch.
	type Document: Clone + Send + Sync + 'static;
	/// Query variables.
	type Variables: Clone + Send + Sync + 'static;
	/// Result payload.
	type Data: Clone + Send + Sync + 'static;
	/// Engine error.
	type Error: Clone + Send + Sync + 'static;
	/// Static options the query was registered with.
	type Options: Send + Sync;
	/// Arguments for [`QueryHandle::fetch_more`].
	type FetchMoreOptions: Send;
	/// Arguments for [`QueryHandle::subscribe_to_more`].
	type SubscribeOptions: Send;
	/// Options accepted by [`QueryHandle::load`].
	type LoadOptions: Send;

	/// Returns the document this handle fetches.
	fn document(&self) -> Self::Document;

	/// Returns the registration options.
	fn options(&self) -> &Self::Options;

	/// Latest result.
	fn result(&self) -> &Signal<ResultSlot<Self::Data>>;

	/// Latest error, `None` while the query is healthy.
	fn error(&self) -> &Signal<Option<Self::Error>>;

	/// Starts producing results. Starting an active handle is a no-op.
	fn start(&self) -> Result<(), Self::Error>;

	/// Stops producing results. Stopping a stopped handle is a no-op.
	fn stop(&self);

	/// Returns `true` while the handle produces results.
	fn is_active(&self) -> bool;

	/// Re-runs the query, optionally with new variables.
	///
	/// Returns `None` when the handle cannot refetch right now (e.g. it is stopped).
	fn refetch(&self, variables: Option<Self::Variables>) -> Option<EngineFuture<QueryResponse<Self::Data>, Self::Error>>;

	/// Fetches additional data and merges it into the current result.
	///
	/// Returns `None` when the handle cannot fetch more right now.
	fn fetch_more(&self, options: Self::FetchMoreOptions) -> Option<EngineFuture<QueryResponse<Self::Data>, Self::Error>>;

	/// Feeds a secondary update stream into this query's result.
	fn subscribe_to_more(&self, options: Self::SubscribeOptions);

	/// Registers a callback for every engine response, loading states included.
	///
	/// Stopping the returned handle unregisters the callback.
	fn on_result(&self, callback: ResponseCallback<Self::Data>) -> WatchHandle;

	/// Reports whether this handle supports [`QueryHandle::load`].
	fn activation(&self) -> Activation {
		Activation::Eager
	}

	/// Activates a lazy handle with the given variables and options.
	///
	/// Only called when [`QueryHandle::activation`] reports [`Activation::Lazy`].
	fn load(&self, _variables: Option<Self::Variables>, _options: Option<Self::LoadOptions>) {}
}
