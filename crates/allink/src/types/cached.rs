/*!
Cached reads of service-owned state.

Getters never block on the service. They return the last value the client
saw together with whether the link was live at the time of the read, so
callers choose between using stale data and treating it as an error.
*/

use super::{AllinkError, AllinkResult};

/// A value read from the client-side cache.
///
/// # Example
///
/// ```
/// use allink::Cached;
///
/// let live = Cached::live(true);
/// assert_eq!(live.into_result(), Ok(true));
///
/// let stale = Cached::stale(false);
/// assert!(!stale.is_live());
/// assert_eq!(*stale.value(), false);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Cached<T> {
  value: T,
  live: bool,
}

impl<T> Cached<T> {
  /// A value read while connected.
  pub const fn live(value: T) -> Self {
    Self { value, live: true }
  }

  /// A value read while disconnected: the last known good value.
  pub const fn stale(value: T) -> Self {
    Self { value, live: false }
  }

  pub(crate) const fn new(value: T, live: bool) -> Self {
    Self { value, live }
  }

  /// Whether the service was connected when the value was read.
  pub const fn is_live(&self) -> bool {
    self.live
  }

  pub const fn value(&self) -> &T {
    &self.value
  }

  /// The value, whether or not it is stale.
  pub fn into_value(self) -> T {
    self.value
  }

  /// The value if live, `ServiceUnavailable` otherwise.
  pub fn into_result(self) -> AllinkResult<T> {
    if self.live {
      Ok(self.value)
    } else {
      Err(AllinkError::ServiceUnavailable)
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Cached<U> {
    Cached {
      value: f(self.value),
      live: self.live,
    }
  }
}
