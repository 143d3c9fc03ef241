/*!
Collaborator traits.

These traits define the contract between the link and the system around it:
the OS service registry, the readiness property, and the remote
accessibility service itself. Core code only talks to these traits, never to
a concrete transport. Marshalling is the implementor's concern; values here
are already structured.
*/

use std::sync::Arc;

use crate::types::{
  AbilityInfo, AllinkResult, Capabilities, ConfigItem, ConfigSnapshot, ConfigValue, ElementQuery,
  Partition, QueryResult, RequestId,
};

/// Token identifying one liveness subscription. Equality is identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LivenessToken(pub u64);

/// Token identifying one readiness watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchToken(pub u64);

/// Outcome of asking the OS to start the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRequest {
  /// The OS will start the service and report through the load observer.
  Accepted,
  /// The OS refused; no load callback follows.
  Rejected,
}

/// Notified when a watched remote dies.
pub trait LivenessObserver: Send + Sync {
  /// `token` is the one returned by [`ServiceRegistry::watch_liveness`].
  fn on_remote_died(&self, token: LivenessToken);
}

/// Notified once a requested service start has finished, successfully or not.
pub trait LoadObserver: Send + Sync {
  /// `loaded` is false if the service failed to come up.
  fn on_load_finished(&self, loaded: bool);
}

/// Notified when the readiness property flips to ready.
pub trait ReadinessObserver: Send + Sync {
  /// Called from the property's own thread.
  fn on_ready(&self);
}

/// OS service registry.
pub trait ServiceRegistry: Send + Sync {
  /// Look up a running service. `None` if it is not running.
  fn lookup(&self, service_id: u32) -> Option<Arc<dyn RemoteService>>;

  /// Ask the OS to start the service. `on_loaded` fires asynchronously.
  fn request_start(&self, service_id: u32, on_loaded: Arc<dyn LoadObserver>) -> StartRequest;

  /// Subscribe to death of `remote`.
  fn watch_liveness(
    &self,
    remote: &Arc<dyn RemoteService>,
    observer: Arc<dyn LivenessObserver>,
  ) -> AllinkResult<LivenessToken>;

  /// Stop watching. Unknown tokens are ignored.
  fn unwatch_liveness(&self, token: LivenessToken);
}

/// The "service configuration ready" system property.
pub trait ReadinessSignal: Send + Sync {
  /// Current value of the property.
  fn is_ready(&self) -> bool;

  /// Call `observer` each time the property becomes ready.
  fn watch(&self, observer: Arc<dyn ReadinessObserver>) -> WatchToken;

  /// Drop a watch made with [`watch`](Self::watch).
  fn unwatch(&self, token: WatchToken);
}

/// Receives configuration pushes from the remote. One per connection.
pub trait RemoteConfigObserver: Send + Sync {
  /// `item` now has `value` on the service.
  fn on_config_changed(&self, item: ConfigItem, value: ConfigValue);
}

/// Receives ability-list pushes from the remote. One per connection.
pub trait RemoteAbilityObserver: Send + Sync {
  /// Full list of enabled abilities after the change.
  fn on_enabled_abilities_changed(&self, enabled: Vec<String>);

  /// The installed set changed; fetch it again if needed.
  fn on_installed_abilities_changed(&self);
}

/// Receives the answer to one correlated request.
///
/// `request` is the id the answer belongs to from the receiver's point of view.
pub trait QueryCallback: Send + Sync {
  /// Called at most once per request.
  fn on_result(&self, request: RequestId, result: QueryResult);
}

/// A window's query endpoint as seen by the remote.
pub trait ElementOperator: Send + Sync {
  /// Answer `query` about this window. The answer goes to `reply` under `request`.
  /// `redact` asks for user content to be stripped before it leaves the window.
  fn execute(
    &self,
    query: ElementQuery,
    request: RequestId,
    reply: Arc<dyn QueryCallback>,
    redact: bool,
  );
}

/// The remote accessibility service.
pub trait RemoteService: Send + Sync {
  /// Full configuration state.
  fn config_snapshot(&self) -> AllinkResult<ConfigSnapshot>;

  /// Persist `value` for `item` and push it to every observer.
  fn set_config(&self, item: ConfigItem, value: ConfigValue) -> AllinkResult<()>;

  /// Receive every configuration change from now on.
  fn register_config_observer(&self, observer: Arc<dyn RemoteConfigObserver>)
    -> AllinkResult<()>;

  /// Receive ability-list changes from now on.
  fn register_ability_observer(
    &self,
    observer: Arc<dyn RemoteAbilityObserver>,
  ) -> AllinkResult<()>;

  /// Names of the enabled abilities.
  fn enabled_abilities(&self) -> AllinkResult<Vec<String>>;

  /// Every ability installed on the device.
  fn installed_abilities(&self) -> AllinkResult<Vec<AbilityInfo>>;

  /// Enable an installed ability with `capabilities`.
  fn enable_ability(&self, name: &str, capabilities: Capabilities) -> AllinkResult<()>;

  /// Disable an enabled ability.
  fn disable_ability(&self, name: &str) -> AllinkResult<()>;

  /// Make `operator` the query endpoint for `target`.
  fn register_element_operator(
    &self,
    target: Partition,
    operator: Arc<dyn ElementOperator>,
  ) -> AllinkResult<()>;

  /// Forget the endpoint for `target`. Unknown targets are not an error.
  fn deregister_element_operator(&self, target: Partition) -> AllinkResult<()>;

  /// Forward `query` to the window behind `target`. The answer arrives on
  /// `reply` under `request`.
  fn dispatch_query(
    &self,
    target: Partition,
    query: ElementQuery,
    request: RequestId,
    reply: Arc<dyn QueryCallback>,
  ) -> AllinkResult<()>;
}
