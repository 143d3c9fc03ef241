/*!
Local service registry.

Hosts at most one [`AccessibilityService`] instance under a service id.
Instances share one settings store, so configuration survives
[`LocalRegistry::restart`]. Killing the instance reports its death to every
liveness watcher.
*/

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use crate::service::AccessibilityService;
use crate::store::SettingsStore;
use allink::platform::{
  LivenessObserver, LivenessToken, LoadObserver, RemoteService, ServiceRegistry, StartRequest,
};
use allink::{AllinkError, AllinkResult};

/// In-process [`ServiceRegistry`].
pub struct LocalRegistry {
  service_id: u32,
  store: Arc<dyn SettingsStore>,
  running: Mutex<Option<Arc<AccessibilityService>>>,
  on_demand: AtomicBool,
  start_requests: AtomicU64,
  next_token: AtomicU64,
  watchers: Mutex<HashMap<LivenessToken, Arc<dyn LivenessObserver>>>,
  me: Weak<LocalRegistry>,
}

impl std::fmt::Debug for LocalRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LocalRegistry")
      .field("service_id", &self.service_id)
      .field("running", &self.running.lock().is_some())
      .field("watchers", &self.watchers.lock().len())
      .finish_non_exhaustive()
  }
}

impl LocalRegistry {
  /// Registry for `service_id` over `store`. Nothing runs until [`start`](Self::start)
  /// or an on-demand start.
  pub fn new(service_id: u32, store: Arc<dyn SettingsStore>) -> Arc<Self> {
    Arc::new_cyclic(|me| Self {
      service_id,
      store,
      running: Mutex::new(None),
      on_demand: AtomicBool::new(true),
      start_requests: AtomicU64::new(0),
      next_token: AtomicU64::new(1),
      watchers: Mutex::new(HashMap::new()),
      me: me.clone(),
    })
  }

  /// Whether `request_start` may launch the service. Default: true.
  pub fn set_on_demand(&self, allowed: bool) {
    self.on_demand.store(allowed, Ordering::SeqCst);
  }

  /// Start the service if it is not running and return the instance.
  pub fn start(&self) -> Arc<AccessibilityService> {
    let mut running = self.running.lock();
    if let Some(service) = running.as_ref() {
      return Arc::clone(service);
    }
    let service = AccessibilityService::start(Arc::clone(&self.store));
    *running = Some(Arc::clone(&service));
    log::info!("[service] service {} started", self.service_id);
    service
  }

  /// Stop the running instance and notify liveness watchers.
  pub fn kill(&self) {
    let Some(service) = self.running.lock().take() else {
      return;
    };
    service.kill();
    log::info!("[service] service {} died", self.service_id);

    let watchers: Vec<_> = self.watchers.lock().drain().collect();
    for (token, observer) in watchers {
      observer.on_remote_died(token);
    }
  }

  /// Kill and start again over the same store.
  pub fn restart(&self) -> Arc<AccessibilityService> {
    self.kill();
    self.start()
  }

  /// The running instance, if any.
  pub fn service(&self) -> Option<Arc<AccessibilityService>> {
    self.running.lock().clone()
  }

  /// How many on-demand starts were requested.
  pub fn start_requests(&self) -> u64 {
    self.start_requests.load(Ordering::SeqCst)
  }

  /// Number of liveness watches on the running instance.
  pub fn watcher_count(&self) -> usize {
    self.watchers.lock().len()
  }

  fn is_running_instance(&self, remote: &Arc<dyn RemoteService>) -> bool {
    self.running.lock().as_ref().is_some_and(|running| {
      Arc::as_ptr(remote).cast::<()>() == Arc::as_ptr(running).cast::<()>()
    })
  }
}

impl ServiceRegistry for LocalRegistry {
  fn lookup(&self, service_id: u32) -> Option<Arc<dyn RemoteService>> {
    if service_id != self.service_id {
      return None;
    }
    self
      .running
      .lock()
      .as_ref()
      .map(|s| Arc::clone(s) as Arc<dyn RemoteService>)
  }

  fn request_start(&self, service_id: u32, on_loaded: Arc<dyn LoadObserver>) -> StartRequest {
    if service_id != self.service_id || !self.on_demand.load(Ordering::SeqCst) {
      return StartRequest::Rejected;
    }
    self.start_requests.fetch_add(1, Ordering::SeqCst);

    let me = self.me.clone();
    let spawned = thread::Builder::new()
      .name("allink-service-start".into())
      .spawn(move || {
        let loaded = me.upgrade().map(|registry| registry.start()).is_some();
        on_loaded.on_load_finished(loaded);
      });
    match spawned {
      Ok(_) => StartRequest::Accepted,
      Err(e) => {
        log::error!("[service] could not spawn start thread: {e}");
        StartRequest::Rejected
      }
    }
  }

  fn watch_liveness(
    &self,
    remote: &Arc<dyn RemoteService>,
    observer: Arc<dyn LivenessObserver>,
  ) -> AllinkResult<LivenessToken> {
    if !self.is_running_instance(remote) {
      return Err(AllinkError::ServiceUnavailable);
    }
    let token = LivenessToken(self.next_token.fetch_add(1, Ordering::SeqCst));
    self.watchers.lock().insert(token, observer);
    Ok(token)
  }

  fn unwatch_liveness(&self, token: LivenessToken) {
    self.watchers.lock().remove(&token);
  }
}
