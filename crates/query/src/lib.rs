//! Cancellable, observable lifecycle manager for queries backed by an asynchronous engine.
//!
//! [`QueryHandler`] sits between an application and a query engine. The engine does the
//! fetching and caching and exposes a continuously-updating [`QueryHandle`]; the handler
//! turns that into a small lifecycle contract:
//!
//! - [`QueryHandler::query`]: imperative one-shot request; issuing a new one cancels the
//!   previous one (last writer wins), and [`QueryHandler::cancel`] aborts it.
//! - [`QueryHandler::start`], [`QueryHandler::stop`], [`QueryHandler::abort`] and
//!   [`QueryHandler::load`]: lifecycle of the continuously-updating query.
//! - [`QueryHandler::on_loaded`] and [`QueryHandler::loaded_result`]: a future for the
//!   next result or error, built from watchers that are removed exactly once.
//! - [`QueryHandler::refetch`] and [`QueryHandler::fetch_more`]: normalized so an
//!   unavailable operation resolves with `None` and a failure carries the handle's
//!   current error.
//! - [`QueryHandler::watch_once_on_result`], [`QueryHandler::watch_on_result`] and
//!   [`QueryHandler::on_result`]: callbacks on results.
//!
//! The [`local`] module provides an in-process engine driven by async fetch functions.
//!
//! ## Logging
//!
//! Events are emitted through [`tracing`] with the handler's
//! [`label`](HandlerConfig::label) in the `query` field. No subscriber is installed.
#![warn(missing_docs)]

mod bridge;
mod cancel;
mod config;
pub mod engine;
mod error;
mod handler;
pub mod local;

pub use config::HandlerConfig;
pub use engine::{
	Activation, EngineFuture, NetworkStatus, QueryClient, QueryHandle, QueryRequest, QueryResponse, ResponseCallback,
	ResultSlot,
};
pub use error::{Loaded, QueryError};
pub use handler::{QueryFuture, QueryHandler};
pub use quiver_signal::{Signal, WatchHandle, WatchOptions};
pub use tokio_util::sync::CancellationToken;

/// A convenient type alias for `Result` with `E` = [`QueryError`].
pub type Result<T, E> = std::result::Result<T, QueryError<E>>;
