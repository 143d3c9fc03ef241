/*!
Connection to the remote accessibility service.

Owns the single [`RemoteHandle`] and moves through
`Disconnected -> WatchingForReady -> Connecting -> Connected`. Dependents
never see the handle, only a cloned proxy from [`RemoteAccess`].

```text
start() ── ready? ──yes──> connect
            └─no──> WatchingForReady ── on_ready ──> worker thread ──> connect
connect: lookup × attempts ─miss─> request_start + wait(start_timeout) ─> lookup
remote died (matching token) ─> Disconnected ─> re-arm
```

Connects are serialized by their own mutex. The handle lock is only taken
to install the finished handle, so readers never wait out a lookup retry or
an on-demand start.
*/

use async_broadcast::Sender;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::observers::ConfigObserverRegistry;
use crate::platform::{
  LivenessObserver, LivenessToken, LoadObserver, ReadinessObserver, ReadinessSignal,
  RemoteAbilityObserver, RemoteConfigObserver, RemoteService, ServiceRegistry, StartRequest,
  WatchToken,
};
use crate::types::{ConfigItem, ConfigValue, ConnectionState, Event};

/// System ability id of the accessibility manager.
pub const DEFAULT_SERVICE_ID: u32 = 4702;
/// Lookups before falling back to an on-demand start.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;
/// Pause between lookups.
pub const DEFAULT_CONNECT_INTERVAL_MS: u64 = 100;
/// How long to wait for an on-demand start to load.
pub const DEFAULT_START_TIMEOUT_MS: u64 = 1000;

const WORKER_THREAD_NAME: &str = "allink-connect";

/// Tuning for connect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
  /// System ability id to look up.
  pub service_id: u32,
  /// Lookups before an on-demand start. Zero goes straight to the start.
  pub connect_attempts: u32,
  /// Pause between lookups.
  pub connect_interval: Duration,
  /// Bound on the wait for the load callback.
  pub start_timeout: Duration,
}

impl Default for ConnectionConfig {
  fn default() -> Self {
    Self {
      service_id: DEFAULT_SERVICE_ID,
      connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
      connect_interval: Duration::from_millis(DEFAULT_CONNECT_INTERVAL_MS),
      start_timeout: Duration::from_millis(DEFAULT_START_TIMEOUT_MS),
    }
  }
}

/// Access to a live remote, connecting on demand.
///
/// Implemented by [`ServiceConnection`]; the facade and gateways only see
/// this trait.
pub trait RemoteAccess: Send + Sync {
  /// A live remote, connecting first if needed. `None` if the service cannot
  /// be reached within the configured bounds.
  fn ensure_connected(&self) -> Option<Arc<dyn RemoteService>>;

  /// A live remote if one is held right now. Never blocks on connecting.
  fn current(&self) -> Option<Arc<dyn RemoteService>>;
}

/// Told about handle replacement. Used to re-register window operators.
pub(crate) trait ConnectionListener: Send + Sync {
  fn on_connected(&self, remote: &Arc<dyn RemoteService>);

  fn on_disconnected(&self) {}
}

/// Forwards configuration pushes from one remote into the observer registry.
///
/// Goes quiet once its handle is dropped so a dead remote cannot overwrite
/// state primed from its successor.
struct ConnectionConfigObserver {
  registry: Weak<ConfigObserverRegistry>,
  live: AtomicBool,
}

impl RemoteConfigObserver for ConnectionConfigObserver {
  fn on_config_changed(&self, item: ConfigItem, value: ConfigValue) {
    if !self.live.load(Ordering::SeqCst) {
      log::debug!("[connection] push for {item:?} from a retired handle ignored");
      return;
    }
    if let Some(registry) = self.registry.upgrade() {
      registry.push_change(item, value);
    }
  }
}

struct ConnectionAbilityObserver {
  registry: Weak<ConfigObserverRegistry>,
  live: AtomicBool,
}

impl RemoteAbilityObserver for ConnectionAbilityObserver {
  fn on_enabled_abilities_changed(&self, enabled: Vec<String>) {
    if !self.live.load(Ordering::SeqCst) {
      return;
    }
    if let Some(registry) = self.registry.upgrade() {
      registry.push_enabled_abilities(enabled);
    }
  }

  fn on_installed_abilities_changed(&self) {
    if !self.live.load(Ordering::SeqCst) {
      return;
    }
    if let Some(registry) = self.registry.upgrade() {
      registry.notify_installed_abilities_changed();
    }
  }
}

/// The live link to one remote instance.
struct RemoteHandle {
  remote: Arc<dyn RemoteService>,
  token: LivenessToken,
  config_observer: Arc<ConnectionConfigObserver>,
  ability_observer: Arc<ConnectionAbilityObserver>,
}

impl RemoteHandle {
  fn retire(&self) {
    self.config_observer.live.store(false, Ordering::SeqCst);
    self.ability_observer.live.store(false, Ordering::SeqCst);
  }
}

/// Callbacks registered with the OS hold only a weak reference back.
struct ConnectionCallbacks {
  connection: Weak<ServiceConnection>,
}

impl LivenessObserver for ConnectionCallbacks {
  fn on_remote_died(&self, token: LivenessToken) {
    if let Some(connection) = self.connection.upgrade() {
      connection.on_remote_died(token);
    }
  }
}

impl LoadObserver for ConnectionCallbacks {
  fn on_load_finished(&self, loaded: bool) {
    if let Some(connection) = self.connection.upgrade() {
      connection.on_load_finished(loaded);
    }
  }
}

impl ReadinessObserver for ConnectionCallbacks {
  fn on_ready(&self) {
    if let Some(connection) = self.connection.upgrade() {
      connection.on_readiness_signal();
    }
  }
}

/// Keeps the client connected to the accessibility service.
pub struct ServiceConnection {
  config: ConnectionConfig,
  registry: Arc<dyn ServiceRegistry>,
  readiness: Arc<dyn ReadinessSignal>,
  observers: Arc<ConfigObserverRegistry>,
  events_tx: Sender<Event>,
  callbacks: Arc<ConnectionCallbacks>,

  handle: RwLock<Option<RemoteHandle>>,
  connect: Mutex<()>,
  phase: Mutex<ConnectionState>,
  loaded: Mutex<Option<bool>>,
  load_cv: Condvar,
  readiness_watch: Mutex<Option<WatchToken>>,
  listeners: Mutex<Vec<Weak<dyn ConnectionListener>>>,
  workers: Mutex<Vec<JoinHandle<()>>>,
  shut_down: AtomicBool,
}

impl std::fmt::Debug for ServiceConnection {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ServiceConnection")
      .field("config", &self.config)
      .field("state", &*self.phase.lock())
      .finish_non_exhaustive()
  }
}

impl ServiceConnection {
  /// A disconnected connection. Nothing happens until [`start`](Self::start)
  /// or the first [`RemoteAccess::ensure_connected`].
  pub fn new(
    config: ConnectionConfig,
    registry: Arc<dyn ServiceRegistry>,
    readiness: Arc<dyn ReadinessSignal>,
    observers: Arc<ConfigObserverRegistry>,
    events_tx: Sender<Event>,
  ) -> Arc<Self> {
    Arc::new_cyclic(|me| Self {
      config,
      registry,
      readiness,
      observers,
      events_tx,
      callbacks: Arc::new(ConnectionCallbacks {
        connection: me.clone(),
      }),
      handle: RwLock::new(None),
      connect: Mutex::new(()),
      phase: Mutex::new(ConnectionState::Disconnected),
      loaded: Mutex::new(None),
      load_cv: Condvar::new(),
      readiness_watch: Mutex::new(None),
      listeners: Mutex::new(Vec::new()),
      workers: Mutex::new(Vec::new()),
      shut_down: AtomicBool::new(false),
    })
  }

  /// Current lifecycle phase.
  pub fn state(&self) -> ConnectionState {
    *self.phase.lock()
  }

  /// Whether [`shutdown`](Self::shutdown) has run.
  pub fn is_shut_down(&self) -> bool {
    self.shut_down.load(Ordering::SeqCst)
  }

  pub(crate) fn add_listener(&self, listener: &Arc<dyn ConnectionListener>) {
    let mut listeners = self.listeners.lock();
    listeners.retain(|l| l.strong_count() > 0);
    listeners.push(Arc::downgrade(listener));
  }

  /// Connect now if the service is ready, otherwise wait for it.
  pub fn start(&self) {
    if self.is_shut_down() {
      return;
    }
    if self.readiness.is_ready() {
      log::debug!("[connection] service ready at start, connecting");
      if self.ensure_connected().is_none() {
        log::warn!("[connection] service reported ready but could not be reached");
      }
    } else {
      self.arm_readiness_watch();
    }
  }

  /// Readiness flipped. Connects on a worker thread so the signal's
  /// delivering thread is never blocked.
  pub fn on_readiness_signal(&self) {
    if self.is_shut_down() || self.handle.read().is_some() {
      log::debug!("[connection] readiness signal ignored");
      return;
    }
    self.spawn_connect_worker();
  }

  fn spawn_connect_worker(&self) {
    let connection = Weak::clone(&self.callbacks.connection);
    let spawned = thread::Builder::new()
      .name(WORKER_THREAD_NAME.into())
      .spawn(move || {
        if let Some(connection) = connection.upgrade() {
          if connection.ensure_connected().is_none() {
            log::warn!("[connection] background connect failed");
          }
        }
      });
    match spawned {
      Ok(worker) => {
        let mut workers = self.workers.lock();
        workers.retain(|w| !w.is_finished());
        workers.push(worker);
      }
      Err(e) => log::warn!("[connection] could not spawn connect worker: {e}"),
    }
  }

  fn arm_readiness_watch(&self) {
    {
      let mut watch = self.readiness_watch.lock();
      if watch.is_none() {
        let observer: Arc<dyn ReadinessObserver> = Arc::clone(&self.callbacks) as _;
        *watch = Some(self.readiness.watch(observer));
      }
    }
    self.set_phase(ConnectionState::WatchingForReady);
    // The property may have flipped between the check and the watch.
    if self.readiness.is_ready() {
      self.on_readiness_signal();
    }
  }

  /// Death notice from the registry. Ignored unless `token` belongs to the
  /// handle currently held.
  pub fn on_remote_died(&self, token: LivenessToken) {
    let dropped = {
      let mut handle = self.handle.write();
      match handle.as_ref() {
        Some(held) if held.token == token => handle.take(),
        Some(_) | None => None,
      }
    };
    let Some(dropped) = dropped else {
      log::debug!("[connection] death notice for {token:?} does not match held handle");
      return;
    };

    log::warn!("[connection] accessibility service died");
    self.release(&dropped);
    drop(dropped);

    if self.is_shut_down() {
      return;
    }
    if self.readiness.is_ready() {
      self.spawn_connect_worker();
    } else {
      self.arm_readiness_watch();
    }
  }

  /// Drop the current handle, if any. The next `ensure_connected` reconnects.
  pub fn reset(&self) {
    let dropped = self.handle.write().take();
    if let Some(dropped) = dropped {
      log::debug!("[connection] handle reset");
      self.release(&dropped);
    }
  }

  /// Reset and stop reacting to readiness. No further reconnects.
  pub fn shutdown(&self) {
    if self.shut_down.swap(true, Ordering::SeqCst) {
      return;
    }
    self.reset();
    if let Some(token) = self.readiness_watch.lock().take() {
      self.readiness.unwatch(token);
    }
    self.set_phase(ConnectionState::Disconnected);

    let workers = std::mem::take(&mut *self.workers.lock());
    let me = thread::current().id();
    for worker in workers {
      if worker.thread().id() != me && worker.join().is_err() {
        log::error!("[connection] connect worker panicked");
      }
    }
  }

  fn release(&self, dropped: &RemoteHandle) {
    dropped.retire();
    self.registry.unwatch_liveness(dropped.token);
    self.set_phase(ConnectionState::Disconnected);
    for listener in self.live_listeners() {
      listener.on_disconnected();
    }
  }

  fn on_load_finished(&self, loaded: bool) {
    log::debug!("[connection] on-demand start finished: loaded={loaded}");
    *self.loaded.lock() = Some(loaded);
    self.load_cv.notify_all();
  }

  fn set_phase(&self, state: ConnectionState) {
    {
      let mut phase = self.phase.lock();
      if *phase == state {
        return;
      }
      log::info!("[connection] {:?} -> {state:?}", *phase);
      *phase = state;
    }
    if let Err(e) = self.events_tx.try_broadcast(Event::ConnectionChanged { state }) {
      if e.is_full() {
        log::error!("[connection] Event channel overflow - events are being dropped.");
      }
    }
  }

  fn live_listeners(&self) -> Vec<Arc<dyn ConnectionListener>> {
    let mut listeners = self.listeners.lock();
    let mut live = Vec::with_capacity(listeners.len());
    listeners.retain(|l| match l.upgrade() {
      Some(listener) => {
        live.push(listener);
        true
      }
      None => false,
    });
    live
  }

  fn lookup_with_retry(&self) -> Option<Arc<dyn RemoteService>> {
    for attempt in 0..self.config.connect_attempts {
      if let Some(remote) = self.registry.lookup(self.config.service_id) {
        return Some(remote);
      }
      if attempt + 1 < self.config.connect_attempts {
        thread::sleep(self.config.connect_interval);
      }
    }
    None
  }

  /// Ask the OS to start the service and wait for its load callback.
  fn start_on_demand(&self) -> Option<Arc<dyn RemoteService>> {
    *self.loaded.lock() = None;
    let observer: Arc<dyn LoadObserver> = Arc::clone(&self.callbacks) as _;
    if self.registry.request_start(self.config.service_id, observer) == StartRequest::Rejected {
      log::warn!("[connection] on-demand start rejected");
      return None;
    }

    let deadline = Instant::now() + self.config.start_timeout;
    let loaded = {
      let mut loaded = self.loaded.lock();
      while loaded.is_none() {
        if self.load_cv.wait_until(&mut loaded, deadline).timed_out() {
          break;
        }
      }
      *loaded
    };

    match loaded {
      Some(true) => self.registry.lookup(self.config.service_id),
      Some(false) => {
        log::warn!("[connection] service failed to load");
        None
      }
      None => {
        log::warn!(
          "[connection] service did not load within {:?}",
          self.config.start_timeout
        );
        None
      }
    }
  }

  /// Find the remote and install a handle. Caller holds the connect mutex.
  fn connect_serialized(&self) -> Option<Arc<dyn RemoteService>> {
    self.set_phase(ConnectionState::Connecting);

    let Some(remote) = self.lookup_with_retry().or_else(|| self.start_on_demand()) else {
      self.set_phase(ConnectionState::Disconnected);
      return None;
    };

    // Death notices take the write lock too, so none can slip between the
    // liveness watch and the install.
    let mut slot = self.handle.write();
    if self.is_shut_down() {
      log::debug!("[connection] shut down while connecting");
      self.set_phase(ConnectionState::Disconnected);
      return None;
    }

    let liveness: Arc<dyn LivenessObserver> = Arc::clone(&self.callbacks) as _;
    let token = match self.registry.watch_liveness(&remote, liveness) {
      Ok(token) => token,
      Err(e) => {
        log::warn!("[connection] could not watch service liveness: {e}");
        self.set_phase(ConnectionState::Disconnected);
        return None;
      }
    };

    let config_observer = Arc::new(ConnectionConfigObserver {
      registry: Arc::downgrade(&self.observers),
      live: AtomicBool::new(true),
    });
    let ability_observer = Arc::new(ConnectionAbilityObserver {
      registry: Arc::downgrade(&self.observers),
      live: AtomicBool::new(true),
    });

    let registered = remote
      .register_config_observer(Arc::clone(&config_observer) as _)
      .and_then(|()| remote.register_ability_observer(Arc::clone(&ability_observer) as _));
    if let Err(e) = registered {
      log::warn!("[connection] observer registration failed: {e}");
      config_observer.live.store(false, Ordering::SeqCst);
      ability_observer.live.store(false, Ordering::SeqCst);
      self.registry.unwatch_liveness(token);
      self.set_phase(ConnectionState::Disconnected);
      return None;
    }

    *slot = Some(RemoteHandle {
      remote: Arc::clone(&remote),
      token,
      config_observer,
      ability_observer,
    });
    self.set_phase(ConnectionState::Connected);
    Some(remote)
  }

  /// Pull full state from a freshly connected remote, then tell listeners.
  fn prime(&self, remote: &Arc<dyn RemoteService>) {
    match remote.config_snapshot() {
      Ok(snapshot) => {
        for (item, value) in snapshot.iter() {
          self.observers.push_change(item, value.clone());
        }
      }
      Err(e) => log::warn!("[connection] config snapshot failed: {e}"),
    }
    match remote.enabled_abilities() {
      Ok(enabled) => {
        self.observers.push_enabled_abilities(enabled);
      }
      Err(e) => log::warn!("[connection] ability list failed: {e}"),
    }
    for listener in self.live_listeners() {
      listener.on_connected(remote);
    }
  }
}

impl RemoteAccess for ServiceConnection {
  fn ensure_connected(&self) -> Option<Arc<dyn RemoteService>> {
    if let Some(remote) = self.current() {
      return Some(remote);
    }
    if self.is_shut_down() {
      return None;
    }

    let remote = {
      let _connecting = self.connect.lock();
      if let Some(remote) = self.current() {
        return Some(remote);
      }
      self.connect_serialized()?
    };

    self.prime(&remote);
    Some(remote)
  }

  fn current(&self) -> Option<Arc<dyn RemoteService>> {
    self.handle.read().as_ref().map(|h| Arc::clone(&h.remote))
  }
}


#[cfg(test)]
mod tests {
  use super::testing::*;
  use super::*;

  mod connect_tests {
    use super::*;

    #[test]
    fn connect_primes_cache_from_snapshot() {
      let remote = Arc::new(FakeRemote::default());
      remote
        .snapshot
        .lock()
        .insert(ConfigItem::CaptionState, ConfigValue::Bool(true));
      *remote.enabled.lock() = vec!["com.example/reader".into()];
      let registry = FakeRegistry::running(&remote);
      let readiness = Arc::new(FakeReadiness::default());
      let (connection, observers) = connection(&registry, &readiness);

      assert!(connection.ensure_connected().is_some());
      assert_eq!(connection.state(), ConnectionState::Connected);
      assert_eq!(
        observers.cached(ConfigItem::CaptionState),
        ConfigValue::Bool(true)
      );
      assert_eq!(observers.enabled_abilities(), vec!["com.example/reader"]);
      assert_eq!(remote.config_observers.lock().len(), 1);
      assert_eq!(remote.ability_observers.lock().len(), 1);

      // Fast path: no second connect.
      assert!(connection.ensure_connected().is_some());
      assert_eq!(remote.config_observers.lock().len(), 1);
    }

    #[test]
    fn missing_service_is_started_on_demand() {
      let remote = Arc::new(FakeRemote::default());
      let registry = Arc::new(FakeRegistry::default());
      *registry.startable.lock() = Some(Arc::clone(&remote));
      let readiness = Arc::new(FakeReadiness::default());
      let (connection, _) = connection(&registry, &readiness);

      assert!(connection.ensure_connected().is_some());
      assert!(connection.state().is_connected());
      // Two bounded attempts plus the final lookup after loading.
      assert_eq!(registry.lookups.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn rejected_start_leaves_disconnected() {
      let registry = Arc::new(FakeRegistry::default());
      let readiness = Arc::new(FakeReadiness::default());
      let (connection, _) = connection(&registry, &readiness);

      assert!(connection.ensure_connected().is_none());
      assert!(connection.current().is_none());
      assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn observer_registration_failure_fails_connect() {
      let remote = Arc::new(FakeRemote::default());
      remote.fail_ability_registration.store(true, Ordering::SeqCst);
      let registry = FakeRegistry::running(&remote);
      let readiness = Arc::new(FakeReadiness::default());
      let (connection, _) = connection(&registry, &readiness);

      assert!(connection.ensure_connected().is_none());
      assert!(registry.watchers.lock().is_empty(), "liveness must be unwatched");
      assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn readers_do_not_wait_for_a_slow_connect() {
      let registry = Arc::new(FakeRegistry::default());
      let readiness = Arc::new(FakeReadiness::default());
      let config = ConnectionConfig {
        connect_attempts: 20,
        connect_interval: Duration::from_millis(25),
        ..fast_config()
      };
      let (connection, _) = connection_with(config, &registry, &readiness);

      let connecting = {
        let connection = Arc::clone(&connection);
        thread::spawn(move || connection.ensure_connected().is_some())
      };
      assert!(eventually(|| connection.state() == ConnectionState::Connecting));

      let started = Instant::now();
      assert!(connection.current().is_none());
      assert_eq!(connection.state(), ConnectionState::Connecting);
      connection.on_remote_died(LivenessToken(1));
      connection.reset();
      assert!(started.elapsed() < Duration::from_millis(150));

      assert!(matches!(connecting.join(), Ok(false)));
    }

    #[test]
    fn retired_handle_pushes_are_ignored() {
      let remote = Arc::new(FakeRemote::default());
      let registry = FakeRegistry::running(&remote);
      let readiness = Arc::new(FakeReadiness::default());
      let (connection, observers) = connection(&registry, &readiness);

      assert!(connection.ensure_connected().is_some());
      connection.reset();
      remote.push(ConfigItem::AudioMono, ConfigValue::Bool(true));
      assert_eq!(observers.cached(ConfigItem::AudioMono), ConfigValue::Bool(false));
    }
  }

  mod lifecycle_tests {
    use super::*;

    #[test]
    fn start_waits_for_readiness_then_connects_in_background() {
      let remote = Arc::new(FakeRemote::default());
      let registry = FakeRegistry::running(&remote);
      let readiness = Arc::new(FakeReadiness::default());
      let (connection, _) = connection(&registry, &readiness);

      connection.start();
      assert_eq!(connection.state(), ConnectionState::WatchingForReady);
      assert!(connection.current().is_none());

      readiness.set_ready();
      assert!(eventually(|| connection.state().is_connected()));
    }

    #[test]
    fn start_connects_synchronously_when_ready() {
      let remote = Arc::new(FakeRemote::default());
      let registry = FakeRegistry::running(&remote);
      let readiness = Arc::new(FakeReadiness::default());
      readiness.ready.store(true, Ordering::SeqCst);
      let (connection, _) = connection(&registry, &readiness);

      connection.start();
      assert!(connection.current().is_some());
    }

    #[test]
    fn stale_death_notice_is_ignored() {
      let remote = Arc::new(FakeRemote::default());
      let registry = FakeRegistry::running(&remote);
      let readiness = Arc::new(FakeReadiness::default());
      let (connection, _) = connection(&registry, &readiness);

      assert!(connection.ensure_connected().is_some());
      connection.on_remote_died(LivenessToken(9999));
      assert!(connection.current().is_some());
      assert!(connection.state().is_connected());
    }

    #[test]
    fn death_rearms_readiness_watch() {
      let remote = Arc::new(FakeRemote::default());
      let registry = FakeRegistry::running(&remote);
      let readiness = Arc::new(FakeReadiness::default());
      let (connection, _) = connection(&registry, &readiness);

      assert!(connection.ensure_connected().is_some());
      registry.kill();
      assert!(connection.current().is_none());
      assert_eq!(connection.state(), ConnectionState::WatchingForReady);

      let restarted = Arc::new(FakeRemote::default());
      *registry.running.lock() = Some(Arc::clone(&restarted));
      readiness.set_ready();
      assert!(eventually(|| connection.state().is_connected()));
      assert_eq!(restarted.config_observers.lock().len(), 1);
    }

    #[test]
    fn death_with_ready_service_reconnects_in_background() {
      let remote = Arc::new(FakeRemote::default());
      let registry = FakeRegistry::running(&remote);
      let readiness = Arc::new(FakeReadiness::default());
      readiness.ready.store(true, Ordering::SeqCst);
      let (connection, observers) = connection(&registry, &readiness);
      assert!(connection.ensure_connected().is_some());

      let restarted = Arc::new(FakeRemote::default());
      restarted
        .snapshot
        .lock()
        .insert(ConfigItem::InvertColor, ConfigValue::Bool(true));
      registry.replace(Some(restarted));

      assert!(eventually(|| {
        observers.cached(ConfigItem::InvertColor) == ConfigValue::Bool(true)
      }));
    }

    #[test]
    fn restart_reprimes_with_exactly_one_notification() {
      #[derive(Default)]
      struct Seen(Mutex<Vec<ConfigValue>>);
      impl crate::ConfigObserver for Seen {
        fn on_config_changed(&self, _item: ConfigItem, value: &ConfigValue) {
          self.0.lock().push(value.clone());
        }
      }

      let remote = Arc::new(FakeRemote::default());
      let registry = FakeRegistry::running(&remote);
      let readiness = Arc::new(FakeReadiness::default());
      readiness.ready.store(true, Ordering::SeqCst);
      let (connection, observers) = connection(&registry, &readiness);
      assert!(connection.ensure_connected().is_some());

      let seen = Arc::new(Seen::default());
      let observer: Arc<dyn crate::ConfigObserver> = Arc::clone(&seen) as _;
      observers.subscribe(ConfigItem::ContentTimeout, &observer, false);
      remote.push(ConfigItem::ContentTimeout, ConfigValue::Int(1000));
      assert_eq!(*seen.0.lock(), vec![ConfigValue::Int(1000)]);

      let restarted = Arc::new(FakeRemote::default());
      restarted
        .snapshot
        .lock()
        .insert(ConfigItem::ContentTimeout, ConfigValue::Int(2000));
      registry.replace(Some(Arc::clone(&restarted)));

      assert!(eventually(|| seen.0.lock().len() == 2));
      assert!(eventually(|| restarted.config_observers.lock().len() == 1));
      // A stale push from the dead instance changes nothing.
      remote.push(ConfigItem::ContentTimeout, ConfigValue::Int(3000));
      assert_eq!(
        *seen.0.lock(),
        vec![ConfigValue::Int(1000), ConfigValue::Int(2000)]
      );
      assert_eq!(
        observers.cached(ConfigItem::ContentTimeout),
        ConfigValue::Int(2000)
      );
    }

    #[test]
    fn shutdown_stops_reconnecting() {
      let remote = Arc::new(FakeRemote::default());
      let registry = FakeRegistry::running(&remote);
      let readiness = Arc::new(FakeReadiness::default());
      let (connection, _) = connection(&registry, &readiness);

      connection.start();
      connection.shutdown();
      assert!(readiness.watchers.lock().is_empty());
      assert!(connection.ensure_connected().is_none());
      assert_eq!(connection.state(), ConnectionState::Disconnected);
    }
  }
}
