/*! Error types for the in-process service. */

use allink::{AllinkError, ConfigItem, ConfigKind, Partition};

/// Errors raised by the service, its registry or its settings store.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
  /// The instance was killed.
  #[error("Accessibility service is not running")]
  Dead,

  /// A stored or written value does not match the item's kind.
  #[error("{item:?} expects {expected:?}, got {actual:?}")]
  WrongKind {
    /// Item being read or written.
    item: ConfigItem,
    /// Kind the item holds.
    expected: ConfigKind,
    /// Kind that was found.
    actual: ConfigKind,
  },

  /// Enable or uninstall named an ability that is not installed.
  #[error("Ability not installed: {0}")]
  UnknownAbility(String),

  /// No window answers queries for this partition.
  #[error("No element operator registered for window {} (tree {})", .0.window, .0.tree)]
  NoOperator(Partition),

  /// A stored value did not parse.
  #[error("Malformed value {raw:?} under {key}")]
  Malformed {
    /// Store key.
    key: String,
    /// Raw stored text.
    raw: String,
  },

  /// A structured value failed JSON encoding or decoding.
  #[error("Could not encode or decode {key}: {source}")]
  Json {
    /// Store key.
    key: String,
    /// Underlying serde error.
    #[source]
    source: serde_json::Error,
  },
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<ServiceError> for AllinkError {
  fn from(e: ServiceError) -> Self {
    match e {
      ServiceError::Dead => AllinkError::ServiceUnavailable,
      ServiceError::WrongKind { .. } | ServiceError::UnknownAbility(_) => {
        AllinkError::InvalidArgument(e.to_string())
      }
      ServiceError::NoOperator(partition) => AllinkError::NotRegistered {
        window: partition.window,
      },
      ServiceError::Malformed { .. } | ServiceError::Json { .. } => AllinkError::Remote(e.to_string()),
    }
  }
}
