/*!
Settings key/value store.

Values are strings. Scalars are stored in their display form; structured
values (lists, caption styles, enum settings) as JSON. Writers choose
whether observers of a key hear about a write.
*/

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{ServiceError, ServiceResult};
use allink::{ConfigKind, ConfigValue};

/// Identifies one `observe` registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(pub u64);

/// Told when a key it observes was written with `notify`.
pub trait StoreObserver: Send + Sync {
  /// `key` was written.
  fn on_changed(&self, key: &str);
}

/// Persistent settings backing the service.
pub trait SettingsStore: Send + Sync {
  /// Raw text under `key`.
  fn get(&self, key: &str) -> Option<String>;

  /// Store `value`; observers of `key` hear about it only when `notify` is set.
  fn put(&self, key: &str, value: String, notify: bool);

  /// Watch `key` for notifying writes.
  fn observe(&self, key: &str, observer: Arc<dyn StoreObserver>) -> ObserverToken;

  /// Drop a registration. Unknown tokens are ignored.
  fn unobserve(&self, token: ObserverToken);

  /// Typed read: `Ok(None)` when absent, `Malformed` when the text does not parse.
  fn get_bool(&self, key: &str) -> ServiceResult<Option<bool>> {
    self.get(key).map(|raw| parse(key, &raw)).transpose()
  }

  /// Typed write, see [`put`](Self::put).
  fn put_bool(&self, key: &str, value: bool, notify: bool) {
    self.put(key, value.to_string(), notify);
  }

  /// Typed read, see [`get_bool`](Self::get_bool).
  fn get_int(&self, key: &str) -> ServiceResult<Option<i32>> {
    self.get(key).map(|raw| parse(key, &raw)).transpose()
  }

  /// Typed write, see [`put`](Self::put).
  fn put_int(&self, key: &str, value: i32, notify: bool) {
    self.put(key, value.to_string(), notify);
  }

  /// Typed read, see [`get_bool`](Self::get_bool).
  fn get_float(&self, key: &str) -> ServiceResult<Option<f32>> {
    self.get(key).map(|raw| parse(key, &raw)).transpose()
  }

  /// Typed write, see [`put`](Self::put).
  fn put_float(&self, key: &str, value: f32, notify: bool) {
    self.put(key, value.to_string(), notify);
  }

  /// Same as [`get`](Self::get).
  fn get_string(&self, key: &str) -> Option<String> {
    self.get(key)
  }

  /// Typed write, see [`put`](Self::put).
  fn put_string(&self, key: &str, value: &str, notify: bool) {
    self.put(key, value.to_owned(), notify);
  }
}

fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> ServiceResult<T> {
  raw.parse().map_err(|_| ServiceError::Malformed {
    key: key.to_owned(),
    raw: raw.to_owned(),
  })
}

pub(crate) fn to_json<T: Serialize>(key: &str, value: &T) -> ServiceResult<String> {
  serde_json::to_string(value).map_err(|source| ServiceError::Json {
    key: key.to_owned(),
    source,
  })
}

pub(crate) fn from_json<T: DeserializeOwned>(key: &str, raw: &str) -> ServiceResult<T> {
  serde_json::from_str(raw).map_err(|source| ServiceError::Json {
    key: key.to_owned(),
    source,
  })
}

/// Store form of `value`.
pub(crate) fn encode(key: &str, value: &ConfigValue) -> ServiceResult<String> {
  match value {
    ConfigValue::Bool(b) => Ok(b.to_string()),
    ConfigValue::Int(n) => Ok(n.to_string()),
    ConfigValue::Float(f) => Ok(f.to_string()),
    ConfigValue::Text(s) => Ok(s.clone()),
    ConfigValue::TextList(list) => to_json(key, list),
    ConfigValue::CaptionStyle(style) => to_json(key, style),
    ConfigValue::DaltonizationFilter(f) => to_json(key, f),
    ConfigValue::ClickResponseTime(t) => to_json(key, t),
    ConfigValue::IgnoreRepeatClickTime(t) => to_json(key, t),
  }
}

/// Read `raw` back as a value of `kind`.
pub(crate) fn decode(key: &str, kind: ConfigKind, raw: &str) -> ServiceResult<ConfigValue> {
  Ok(match kind {
    ConfigKind::Bool => ConfigValue::Bool(parse(key, raw)?),
    ConfigKind::Int => ConfigValue::Int(parse(key, raw)?),
    ConfigKind::Float => ConfigValue::Float(parse(key, raw)?),
    ConfigKind::Text => ConfigValue::Text(raw.to_owned()),
    ConfigKind::TextList => ConfigValue::TextList(from_json(key, raw)?),
    ConfigKind::CaptionStyle => ConfigValue::CaptionStyle(from_json(key, raw)?),
    ConfigKind::DaltonizationFilter => ConfigValue::DaltonizationFilter(from_json(key, raw)?),
    ConfigKind::ClickResponseTime => ConfigValue::ClickResponseTime(from_json(key, raw)?),
    ConfigKind::IgnoreRepeatClickTime => ConfigValue::IgnoreRepeatClickTime(from_json(key, raw)?),
  })
}

/// In-memory [`SettingsStore`]. Outlives service instances, so settings
/// survive a simulated restart.
#[derive(Default)]
pub struct MemoryStore {
  values: Mutex<HashMap<String, String>>,
  observers: Mutex<Vec<(ObserverToken, String, Arc<dyn StoreObserver>)>>,
  next_token: AtomicU64,
}

impl std::fmt::Debug for MemoryStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MemoryStore")
      .field("keys", &self.values.lock().len())
      .field("observers", &self.observers.lock().len())
      .finish()
  }
}

impl MemoryStore {
  /// An empty store.
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of stored keys.
  pub fn len(&self) -> usize {
    self.values.lock().len()
  }

  /// Whether nothing is stored.
  pub fn is_empty(&self) -> bool {
    self.values.lock().is_empty()
  }
}

impl SettingsStore for MemoryStore {
  fn get(&self, key: &str) -> Option<String> {
    self.values.lock().get(key).cloned()
  }

  fn put(&self, key: &str, value: String, notify: bool) {
    self.values.lock().insert(key.to_owned(), value);
    if !notify {
      return;
    }
    let observers: Vec<_> = self
      .observers
      .lock()
      .iter()
      .filter(|(_, k, _)| k == key)
      .map(|(_, _, o)| Arc::clone(o))
      .collect();
    for observer in observers {
      observer.on_changed(key);
    }
  }

  fn observe(&self, key: &str, observer: Arc<dyn StoreObserver>) -> ObserverToken {
    let token = ObserverToken(self.next_token.fetch_add(1, Ordering::SeqCst));
    self.observers.lock().push((token, key.to_owned(), observer));
    token
  }

  fn unobserve(&self, token: ObserverToken) {
    self.observers.lock().retain(|(t, _, _)| *t != token);
  }
}
