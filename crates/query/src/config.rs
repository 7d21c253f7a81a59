//! Handler configuration.

/// Configuration for a [`QueryHandler`](crate::QueryHandler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
	/// Name attached to the handler's tracing events.
	pub label: String,
	/// Cancel an in-flight one-shot query when the handler is dropped.
	pub cancel_on_drop: bool,
}

impl Default for HandlerConfig {
	fn default() -> Self {
		Self {
			label: String::from("query"),
			cancel_on_drop: true,
		}
	}
}

impl HandlerConfig {
	/// Creates a configuration with the given label and default settings.
	pub fn new(label: impl Into<String>) -> Self {
		Self {
			label: label.into(),
			..Self::default()
		}
	}

	/// Set whether dropping the handler cancels its in-flight one-shot query.
	pub fn cancel_on_drop(mut self, cancel: bool) -> Self {
		self.cancel_on_drop = cancel;
		self
	}
}
