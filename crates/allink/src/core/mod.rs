/*!
Process-wide link context.

# Module Structure

- `mod.rs` - `Allink` struct, builder, events
- `connection.rs` - connection state machine, `RemoteAccess` seam
- `observers.rs` - per-item config observers, ability-list observers
- `correlation.rs` - request correlation table shared by all gateways
- `gateway.rs` - per-window query gateways
- `facade.rs` - typed config getters/setters

# Example

```ignore
use allink::{Allink, ConfigItem};

let allink = Allink::builder(registry, readiness).build()?;

allink.config().set_caption_state(true)?;
let style = allink.config().caption_style();

let mut events = allink.subscribe();
while let Ok(event) = events.recv().await {
    // handle event
}

allink.shutdown();
```
*/

mod connection;
mod correlation;
mod facade;
mod gateway;
mod observers;

pub use connection::{
  ConnectionConfig, RemoteAccess, ServiceConnection, DEFAULT_CONNECT_ATTEMPTS,
  DEFAULT_CONNECT_INTERVAL_MS, DEFAULT_SERVICE_ID, DEFAULT_START_TIMEOUT_MS,
};
pub use correlation::{PendingRequest, RequestCorrelationTable};
pub use facade::ConfigFacade;
pub use gateway::{Caller, ElementQueryGateway, Responder, WindowGateways, WindowQueryHandler};
pub use observers::{AbilityListObserver, ConfigObserver, ConfigObserverRegistry};

use async_broadcast::{InactiveReceiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use connection::ConnectionListener;
use crate::platform::{ReadinessSignal, ServiceRegistry};
use crate::types::{AllinkError, AllinkResult, ConnectionState, Event, TreeId, WindowId};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Link to the accessibility service - owns the connection, config cache,
/// window gateways and event broadcasting.
///
/// Clone is cheap (Arc bumps) - share freely across threads. Call
/// [`Allink::shutdown`] once the process is done with the service.
#[derive(Clone)]
pub struct Allink {
  events_tx: Sender<Event>,
  events_keepalive: InactiveReceiver<Event>,
  table: Arc<RequestCorrelationTable>,
  connection: Arc<ServiceConnection>,
  gateways: Arc<WindowGateways>,
  config: ConfigFacade,
}

impl std::fmt::Debug for Allink {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Allink")
      .field("state", &self.connection.state())
      .finish_non_exhaustive()
  }
}

/// Builder for an [`Allink`] instance.
///
/// # Example
///
/// ```ignore
/// let allink = Allink::builder(registry, readiness)
///     .connect_attempts(5)
///     .start_timeout(Duration::from_secs(2))
///     .build()?;
/// ```
#[derive(Clone)]
#[must_use = "Builder does nothing until .build() is called"]
pub struct AllinkBuilder {
  registry: Arc<dyn ServiceRegistry>,
  readiness: Arc<dyn ReadinessSignal>,
  table: Option<Arc<RequestCorrelationTable>>,
  config: ConnectionConfig,
  event_capacity: usize,
}

impl std::fmt::Debug for AllinkBuilder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AllinkBuilder")
      .field("config", &self.config)
      .field("event_capacity", &self.event_capacity)
      .finish_non_exhaustive()
  }
}

impl AllinkBuilder {
  /// System ability id to look up. Default: [`DEFAULT_SERVICE_ID`].
  pub const fn service_id(mut self, id: u32) -> Self {
    self.config.service_id = id;
    self
  }

  /// Lookups before asking the OS to start the service. Default: 10.
  pub const fn connect_attempts(mut self, attempts: u32) -> Self {
    self.config.connect_attempts = attempts;
    self
  }

  /// Pause between lookups. Default: 100ms.
  pub const fn connect_interval(mut self, interval: Duration) -> Self {
    self.config.connect_interval = interval;
    self
  }

  /// How long to wait for an on-demand start. Default: 1s.
  pub const fn start_timeout(mut self, timeout: Duration) -> Self {
    self.config.start_timeout = timeout;
    self
  }

  /// Event channel capacity. Oldest events are dropped on overflow.
  pub const fn event_capacity(mut self, capacity: usize) -> Self {
    self.event_capacity = capacity;
    self
  }

  /// Share an existing correlation table instead of creating one.
  pub fn correlation_table(mut self, table: Arc<RequestCorrelationTable>) -> Self {
    self.table = Some(table);
    self
  }

  /// Build the instance and start connecting.
  ///
  /// Connects synchronously if the service is already ready, otherwise
  /// waits for the readiness signal in the background.
  #[must_use = "Allink instance must be stored to keep the link alive"]
  pub fn build(self) -> AllinkResult<Allink> {
    if self.event_capacity == 0 {
      return Err(AllinkError::invalid("event capacity must be at least 1"));
    }
    if self.config.connect_attempts == 0 {
      return Err(AllinkError::invalid("connect attempts must be at least 1"));
    }

    let (mut tx, rx) = async_broadcast::broadcast(self.event_capacity);
    tx.set_overflow(true); // Drop oldest messages when full

    let observers = Arc::new(ConfigObserverRegistry::new(tx.clone()));
    let table = self
      .table
      .unwrap_or_else(|| Arc::new(RequestCorrelationTable::new()));
    let connection = ServiceConnection::new(
      self.config,
      self.registry,
      self.readiness,
      Arc::clone(&observers),
      tx.clone(),
    );
    let remote: Arc<dyn RemoteAccess> = Arc::clone(&connection) as _;
    let gateways = Arc::new(WindowGateways::new(Arc::clone(&table), Arc::clone(&remote)));
    let listener: Arc<dyn ConnectionListener> = Arc::clone(&gateways) as _;
    connection.add_listener(&listener);

    let allink = Allink {
      events_tx: tx,
      events_keepalive: rx.deactivate(),
      table,
      config: ConfigFacade::new(remote, observers),
      connection,
      gateways,
    };

    allink.connection.start();
    Ok(allink)
  }
}

impl Allink {
  /// Create a builder around the OS collaborators.
  pub fn builder(
    registry: Arc<dyn ServiceRegistry>,
    readiness: Arc<dyn ReadinessSignal>,
  ) -> AllinkBuilder {
    AllinkBuilder {
      registry,
      readiness,
      table: None,
      config: ConnectionConfig::default(),
      event_capacity: EVENT_CHANNEL_CAPACITY,
    }
  }

  /// Subscribe to events from this instance.
  pub fn subscribe(&self) -> async_broadcast::Receiver<Event> {
    self.events_keepalive.activate_cloned()
  }

  /// Typed configuration access.
  pub const fn config(&self) -> &ConfigFacade {
    &self.config
  }

  /// Where the connection lifecycle currently is.
  pub fn connection_state(&self) -> ConnectionState {
    self.connection.state()
  }

  /// Whether a live handle is held right now.
  pub fn is_connected(&self) -> bool {
    self.connection.current().is_some()
  }

  /// Connect now if not connected. Returns whether a live link is held afterwards.
  pub fn connect(&self) -> bool {
    self.connection.ensure_connected().is_some()
  }

  /// Drop the current link. The next call that needs the service reconnects.
  pub fn reset_connection(&self) {
    self.connection.reset();
  }

  /// Register `handler` to answer service queries about `(window, tree)`.
  pub fn register_window_query_handler(
    &self,
    window: WindowId,
    tree: TreeId,
    handler: Arc<dyn WindowQueryHandler>,
  ) -> AllinkResult<Arc<ElementQueryGateway>> {
    self.gateways.register(window, tree, handler)
  }

  /// Unregister one tree of `window`, or all of them when `tree` is `None`.
  /// Requests still pending for the window are dropped.
  pub fn unregister_window_query_handler(
    &self,
    window: WindowId,
    tree: Option<TreeId>,
  ) -> AllinkResult<()> {
    self.gateways.unregister(window, tree)
  }

  /// Gateway of a registered `(window, tree)`.
  pub fn gateway(&self, window: WindowId, tree: TreeId) -> Option<Arc<ElementQueryGateway>> {
    self.gateways.get(window, tree)
  }

  /// Number of correlated requests still waiting for an answer, ours and
  /// the service's.
  pub fn pending_requests(&self) -> usize {
    self.table.len() + self.gateways.pending_inbound()
  }

  /// Tear down every gateway and disconnect. No reconnects afterwards.
  pub fn shutdown(&self) {
    log::debug!("[allink] shutting down");
    self.gateways.shutdown();
    self.connection.shutdown();
    if self.events_tx.close() {
      log::debug!("[allink] event channel closed");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::connection::testing::{eventually, FakeReadiness, FakeRegistry, FakeRemote};
  use super::*;
  use crate::types::{ConfigItem, ConfigValue};
  use std::sync::atomic::Ordering;

  fn build(
    remote: &Arc<FakeRemote>,
    ready: bool,
  ) -> (Allink, Arc<FakeRegistry>, Arc<FakeReadiness>) {
    let registry = FakeRegistry::running(remote);
    let readiness = Arc::new(FakeReadiness::default());
    readiness.ready.store(ready, Ordering::SeqCst);
    let allink = Allink::builder(Arc::clone(&registry) as _, Arc::clone(&readiness) as _)
      .connect_attempts(2)
      .connect_interval(Duration::from_millis(1))
      .start_timeout(Duration::from_millis(20))
      .build()
      .unwrap_or_else(|e| panic!("build failed: {e}"));
    (allink, registry, readiness)
  }

  mod builder_tests {
    use super::*;

    #[test]
    fn zero_capacity_is_rejected() {
      let remote = Arc::new(FakeRemote::default());
      let result = Allink::builder(
        FakeRegistry::running(&remote) as _,
        Arc::new(FakeReadiness::default()) as _,
      )
      .event_capacity(0)
      .build();
      assert!(matches!(result, Err(AllinkError::InvalidArgument(_))));
    }

    #[test]
    fn ready_service_connects_during_build() {
      let remote = Arc::new(FakeRemote::default());
      let (allink, _, _) = build(&remote, true);
      assert!(allink.is_connected());
      assert_eq!(allink.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn unready_service_waits_for_signal() {
      let remote = Arc::new(FakeRemote::default());
      let (allink, _, readiness) = build(&remote, false);
      assert_eq!(allink.connection_state(), ConnectionState::WatchingForReady);
      readiness.set_ready();
      assert!(eventually(|| allink.is_connected()));
    }
  }

  mod event_tests {
    use super::*;

    #[test]
    fn pushes_are_broadcast() {
      let remote = Arc::new(FakeRemote::default());
      let (allink, _, _) = build(&remote, true);
      let mut events = allink.subscribe();

      remote.push(ConfigItem::InvertColor, ConfigValue::Bool(true));
      remote.push(ConfigItem::InvertColor, ConfigValue::Bool(true));

      let mut changes = Vec::new();
      while let Ok(event) = events.try_recv() {
        if let Event::ConfigChanged { item, value } = event {
          changes.push((item, value));
        }
      }
      assert_eq!(
        changes,
        vec![(ConfigItem::InvertColor, ConfigValue::Bool(true))]
      );
    }

    #[test]
    fn shutdown_disconnects_and_closes_events() {
      let remote = Arc::new(FakeRemote::default());
      let (allink, registry, _) = build(&remote, true);
      let events = allink.subscribe();

      allink.shutdown();
      assert!(!allink.is_connected());
      assert!(!allink.connect());
      assert!(registry.watchers.lock().is_empty());
      assert!(events.is_closed());
    }
  }
}
