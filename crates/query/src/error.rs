/// Failures surfaced by [`QueryHandler`](crate::QueryHandler).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum QueryError<E> {
	/// The engine reported an error.
	#[error("{0}")]
	Engine(E),
	/// A one-shot query was cancelled before it settled.
	#[error("query cancelled")]
	Cancelled,
	/// A refetch or fetch-more failed while the error signal held no error.
	#[error("operation failed without a reported error")]
	Unreported,
	/// The result and error signals went away before a load settled.
	#[error("query handle dropped before the result was loaded")]
	Detached,
}

impl<E> QueryError<E> {
	/// Returns `true` for [`QueryError::Cancelled`].
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}
}

/// Outcome of [`QueryHandler::loaded_result`](crate::QueryHandler::loaded_result).
///
/// Carries either the loaded payload or the failure as a plain value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loaded<D, E> {
	/// The load settled successfully; `None` when the result was empty.
	Data(Option<D>),
	/// The load failed.
	Error(QueryError<E>),
}

impl<D, E> From<Result<Option<D>, QueryError<E>>> for Loaded<D, E> {
	fn from(result: Result<Option<D>, QueryError<E>>) -> Self {
		match result {
			Ok(data) => Self::Data(data),
			Err(error) => Self::Error(error),
		}
	}
}
