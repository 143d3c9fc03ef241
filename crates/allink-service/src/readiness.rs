/*! The "service configuration ready" property. */

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use allink::platform::{ReadinessObserver, ReadinessSignal, WatchToken};

/// Name the property is published under.
pub const READINESS_PROPERTY: &str = "accessibility.config.ready";

/// Boolean system property. Watchers hear each transition to `true`.
#[derive(Default)]
pub struct ReadinessFlag {
  ready: AtomicBool,
  watchers: Mutex<Vec<(WatchToken, Arc<dyn ReadinessObserver>)>>,
  next_token: AtomicU64,
}

impl std::fmt::Debug for ReadinessFlag {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ReadinessFlag")
      .field("name", &READINESS_PROPERTY)
      .field("ready", &self.is_ready())
      .field("watchers", &self.watchers.lock().len())
      .finish()
  }
}

impl ReadinessFlag {
  /// A flag starting at `ready`.
  pub fn new(ready: bool) -> Self {
    Self {
      ready: AtomicBool::new(ready),
      ..Self::default()
    }
  }

  /// Set the property. Watchers are notified only when it turns `true`.
  pub fn set(&self, ready: bool) {
    let was = self.ready.swap(ready, Ordering::SeqCst);
    if was || !ready {
      return;
    }
    log::debug!("[service] {READINESS_PROPERTY} = true");
    let watchers: Vec<_> = self
      .watchers
      .lock()
      .iter()
      .map(|(_, w)| Arc::clone(w))
      .collect();
    for watcher in watchers {
      watcher.on_ready();
    }
  }

  /// Number of live watches.
  pub fn watcher_count(&self) -> usize {
    self.watchers.lock().len()
  }
}

impl ReadinessSignal for ReadinessFlag {
  fn is_ready(&self) -> bool {
    self.ready.load(Ordering::SeqCst)
  }

  fn watch(&self, observer: Arc<dyn ReadinessObserver>) -> WatchToken {
    let token = WatchToken(self.next_token.fetch_add(1, Ordering::SeqCst));
    self.watchers.lock().push((token, observer));
    token
  }

  fn unwatch(&self, token: WatchToken) {
    self.watchers.lock().retain(|(t, _)| *t != token);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  #[derive(Default)]
  struct Count(AtomicUsize);

  impl ReadinessObserver for Count {
    fn on_ready(&self) {
      self.0.fetch_add(1, Ordering::SeqCst);
    }
  }

  #[test]
  fn only_rising_edges_notify() {
    let flag = ReadinessFlag::new(false);
    let count = Arc::new(Count::default());
    let token = flag.watch(Arc::clone(&count) as _);

    flag.set(true);
    flag.set(true);
    flag.set(false);
    flag.set(true);
    assert_eq!(count.0.load(Ordering::SeqCst), 2);

    flag.unwatch(token);
    flag.set(false);
    flag.set(true);
    assert_eq!(count.0.load(Ordering::SeqCst), 2);
    assert_eq!(flag.watcher_count(), 0);
  }

  #[test]
  fn watcher_may_unwatch_itself() {
    struct Once {
      flag: Arc<ReadinessFlag>,
      token: Mutex<Option<WatchToken>>,
    }
    impl ReadinessObserver for Once {
      fn on_ready(&self) {
        if let Some(token) = self.token.lock().take() {
          self.flag.unwatch(token);
        }
      }
    }

    let flag = Arc::new(ReadinessFlag::default());
    let once = Arc::new(Once {
      flag: Arc::clone(&flag),
      token: Mutex::new(None),
    });
    let token = flag.watch(Arc::clone(&once) as _);
    *once.token.lock() = Some(token);

    flag.set(true);
    assert!(flag.is_ready());
    assert_eq!(flag.watcher_count(), 0);
  }
}
