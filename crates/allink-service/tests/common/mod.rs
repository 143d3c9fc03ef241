//! Shared setup for the end-to-end tests.

#![allow(dead_code, unreachable_pub)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use allink::platform::QueryCallback;
use allink::{Allink, ElementQuery, QueryResult, RequestId, Responder, WindowQueryHandler};
use allink_service::{LocalRegistry, MemoryStore, ReadinessFlag, SettingsStore};
use parking_lot::Mutex;

pub const SERVICE_ID: u32 = allink::DEFAULT_SERVICE_ID;

pub struct Harness {
  pub store: Arc<MemoryStore>,
  pub registry: Arc<LocalRegistry>,
  pub readiness: Arc<ReadinessFlag>,
}

impl Harness {
  /// Service optionally running, readiness property at `ready`.
  pub fn new(running: bool, ready: bool) -> Self {
    let store = Arc::new(MemoryStore::new());
    let registry = LocalRegistry::new(SERVICE_ID, Arc::clone(&store) as Arc<dyn SettingsStore>);
    if running {
      registry.start();
    }
    Self {
      store,
      registry,
      readiness: Arc::new(ReadinessFlag::new(ready)),
    }
  }

  pub fn link(&self) -> Allink {
    Allink::builder(
      Arc::clone(&self.registry) as _,
      Arc::clone(&self.readiness) as _,
    )
    .connect_attempts(20)
    .connect_interval(Duration::from_millis(5))
    .start_timeout(Duration::from_millis(500))
    .build()
    .unwrap_or_else(|e| panic!("build failed: {e}"))
  }
}

/// Poll `f` for up to two seconds.
pub fn eventually(f: impl Fn() -> bool) -> bool {
  let deadline = Instant::now() + Duration::from_secs(2);
  while Instant::now() < deadline {
    if f() {
      return true;
    }
    std::thread::sleep(Duration::from_millis(5));
  }
  f()
}

/// Records every answer it is given.
#[derive(Default)]
pub struct Recorder(Mutex<Vec<(RequestId, QueryResult)>>);

impl Recorder {
  pub fn taken(&self) -> Vec<(RequestId, QueryResult)> {
    std::mem::take(&mut *self.0.lock())
  }
}

impl QueryCallback for Recorder {
  fn on_result(&self, request: RequestId, result: QueryResult) {
    self.0.lock().push((request, result));
  }
}

/// Answers every query right away with a fixed result.
pub struct Answering(pub QueryResult);

impl WindowQueryHandler for Answering {
  fn handle(&self, _query: ElementQuery, responder: Responder) {
    responder.respond(self.0.clone());
  }
}

/// Holds responders until the test answers them.
#[derive(Default)]
pub struct Deferred(Mutex<Vec<(ElementQuery, Responder)>>);

impl Deferred {
  pub fn take(&self) -> Vec<(ElementQuery, Responder)> {
    std::mem::take(&mut *self.0.lock())
  }
}

impl WindowQueryHandler for Deferred {
  fn handle(&self, query: ElementQuery, responder: Responder) {
    self.0.lock().push((query, responder));
  }
}
