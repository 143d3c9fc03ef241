/*! Error types for allink operations. */

use super::{RequestId, TreeId, WindowId};

/// Errors that can occur during allink operations.
///
/// `Timeout` and `StaleRequest` are internal: the connection folds a timeout
/// into `ServiceUnavailable`, and stale requests are dropped or force-resolved.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AllinkError {
  #[error("Accessibility service unavailable")]
  ServiceUnavailable,

  #[error("Invalid argument: {0}")]
  InvalidArgument(String),

  #[error("Query handler already registered for window {window} (tree {tree})")]
  AlreadyRegistered { window: WindowId, tree: TreeId },

  #[error("No query handler registered for window {window}")]
  NotRegistered { window: WindowId },

  #[error("Timed out waiting for the accessibility service to start")]
  Timeout,

  #[error("Stale request: {0}")]
  StaleRequest(RequestId),

  #[error("Remote call failed: {0}")]
  Remote(String),
}

impl AllinkError {
  /// Shorthand for [`AllinkError::InvalidArgument`].
  pub fn invalid(reason: impl Into<String>) -> Self {
    Self::InvalidArgument(reason.into())
  }

  /// Collapse internal variants to what callers are allowed to observe.
  #[must_use]
  pub fn surfaced(self) -> Self {
    match self {
      Self::Timeout | Self::StaleRequest(_) => Self::ServiceUnavailable,
      other => other,
    }
  }
}

/// Result type for allink operations.
pub type AllinkResult<T> = Result<T, AllinkError>;
