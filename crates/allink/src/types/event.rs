/*! Events broadcast by an `Allink` instance. */

use super::{ConfigItem, ConfigValue};
use serde::Serialize;
use ts_rs::TS;

/// Lifecycle of the link to the accessibility service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ConnectionState {
  /// No handle, nothing in flight.
  Disconnected,
  /// Waiting for the OS to announce the service configuration is ready.
  WatchingForReady,
  /// A bounded connect attempt is running.
  Connecting,
  /// A live handle is held.
  Connected,
}

impl ConnectionState {
  pub const fn is_connected(self) -> bool {
    matches!(self, Self::Connected)
  }
}

/// Events emitted when link or configuration state changes.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(tag = "event", content = "data")]
#[ts(export)]
pub enum Event {
  #[serde(rename = "connection:changed")]
  ConnectionChanged { state: ConnectionState },

  /// Emitted once per delivered (non-duplicate) change.
  #[serde(rename = "config:changed")]
  ConfigChanged { item: ConfigItem, value: ConfigValue },

  #[serde(rename = "abilities:enabled")]
  EnabledAbilitiesChanged { abilities: Vec<String> },

  #[serde(rename = "abilities:installed")]
  InstalledAbilitiesChanged,
}
