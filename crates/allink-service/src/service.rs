/*!
In-process accessibility service.

Owns configuration (persisted in a [`SettingsStore`]), the ability lists,
and the element operators windows registered. Every write goes through the
store with notification on; the service watches each item's key and pushes
the stored value to registered config observers, so writes from outside the
service reach clients too.

A killed instance refuses every call. Start a new one over the same store
to simulate a restart.
*/

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{ServiceError, ServiceResult};
use crate::store::{self, ObserverToken, SettingsStore, StoreObserver};
use allink::platform::{
  ElementOperator, QueryCallback, RemoteAbilityObserver, RemoteConfigObserver, RemoteService,
};
use allink::{
  AbilityInfo, AllinkResult, Capabilities, ConfigItem, ConfigSnapshot, ConfigValue, ElementQuery,
  Partition, RequestId,
};

/// Store key holding the enabled ability names (JSON list).
pub const ENABLED_ABILITIES_KEY: &str = "enabled_accessibility_services";
/// Store key holding installed abilities (JSON list).
pub const INSTALLED_ABILITIES_KEY: &str = "installed_accessibility_abilities";

/// Maps store notifications back to the service.
struct KeyWatcher {
  service: Weak<AccessibilityService>,
}

impl StoreObserver for KeyWatcher {
  fn on_changed(&self, key: &str) {
    if let Some(service) = self.service.upgrade() {
      service.on_store_changed(key);
    }
  }
}

/// The accessibility service, hosted in-process.
pub struct AccessibilityService {
  store: Arc<dyn SettingsStore>,
  alive: AtomicBool,
  store_tokens: Mutex<Vec<ObserverToken>>,
  config_observers: Mutex<Vec<Arc<dyn RemoteConfigObserver>>>,
  ability_observers: Mutex<Vec<Arc<dyn RemoteAbilityObserver>>>,
  operators: Mutex<HashMap<Partition, Arc<dyn ElementOperator>>>,
}

impl std::fmt::Debug for AccessibilityService {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AccessibilityService")
      .field("alive", &self.is_alive())
      .field("operators", &self.operators.lock().len())
      .finish_non_exhaustive()
  }
}

impl AccessibilityService {
  /// Start an instance over `store` and begin watching every item's key.
  pub fn start(store: Arc<dyn SettingsStore>) -> Arc<Self> {
    let service = Arc::new(Self {
      store,
      alive: AtomicBool::new(true),
      store_tokens: Mutex::new(Vec::new()),
      config_observers: Mutex::new(Vec::new()),
      ability_observers: Mutex::new(Vec::new()),
      operators: Mutex::new(HashMap::new()),
    });

    let watcher: Arc<dyn StoreObserver> = Arc::new(KeyWatcher {
      service: Arc::downgrade(&service),
    });
    let tokens = ConfigItem::ALL
      .iter()
      .map(|item| item.settings_key())
      .chain([ENABLED_ABILITIES_KEY, INSTALLED_ABILITIES_KEY])
      .map(|key| service.store.observe(key, Arc::clone(&watcher)))
      .collect();
    *service.store_tokens.lock() = tokens;

    log::debug!("[service] started");
    service
  }

  /// False once killed.
  pub fn is_alive(&self) -> bool {
    self.alive.load(Ordering::SeqCst)
  }

  /// Stop the instance. Registered observers and operators are forgotten.
  pub fn kill(&self) {
    if !self.alive.swap(false, Ordering::SeqCst) {
      return;
    }
    for token in std::mem::take(&mut *self.store_tokens.lock()) {
      self.store.unobserve(token);
    }
    self.config_observers.lock().clear();
    self.ability_observers.lock().clear();
    self.operators.lock().clear();
    log::debug!("[service] killed");
  }

  fn check_alive(&self) -> ServiceResult<()> {
    if self.is_alive() {
      Ok(())
    } else {
      Err(ServiceError::Dead)
    }
  }

  /// Stored value of `item`, or its default if never written.
  pub fn read(&self, item: ConfigItem) -> ServiceResult<ConfigValue> {
    let key = item.settings_key();
    match self.store.get(key) {
      Some(raw) => store::decode(key, item.kind(), &raw),
      None => Ok(item.default_value()),
    }
  }

  fn write(&self, item: ConfigItem, value: &ConfigValue) -> ServiceResult<()> {
    if value.kind() != item.kind() {
      return Err(ServiceError::WrongKind {
        item,
        expected: item.kind(),
        actual: value.kind(),
      });
    }
    let key = item.settings_key();
    self.store.put(key, store::encode(key, value)?, true);
    Ok(())
  }

  fn read_list<T: serde::de::DeserializeOwned>(&self, key: &str) -> ServiceResult<Vec<T>> {
    self
      .store
      .get(key)
      .map_or(Ok(Vec::new()), |raw| store::from_json(key, &raw))
  }

  fn enabled(&self) -> ServiceResult<Vec<String>> {
    self.read_list(ENABLED_ABILITIES_KEY)
  }

  fn installed(&self) -> ServiceResult<Vec<AbilityInfo>> {
    self.read_list(INSTALLED_ABILITIES_KEY)
  }

  fn write_enabled(&self, enabled: &[String]) -> ServiceResult<()> {
    let raw = store::to_json(ENABLED_ABILITIES_KEY, &enabled)?;
    self.store.put(ENABLED_ABILITIES_KEY, raw, true);
    Ok(())
  }

  /// Make `ability` available for enabling. Replaces an ability of the same name.
  pub fn install_ability(&self, ability: AbilityInfo) -> ServiceResult<()> {
    self.check_alive()?;
    let mut installed = self.installed()?;
    installed.retain(|a| a.name != ability.name);
    installed.push(ability);
    let raw = store::to_json(INSTALLED_ABILITIES_KEY, &installed)?;
    self.store.put(INSTALLED_ABILITIES_KEY, raw, true);
    Ok(())
  }

  /// Remove an installed ability, disabling it first.
  pub fn uninstall_ability(&self, name: &str) -> ServiceResult<()> {
    self.check_alive()?;
    let mut installed = self.installed()?;
    let before = installed.len();
    installed.retain(|a| a.name != name);
    if installed.len() == before {
      return Err(ServiceError::UnknownAbility(name.to_owned()));
    }
    let mut enabled = self.enabled()?;
    if enabled.iter().any(|n| n == name) {
      enabled.retain(|n| n != name);
      self.write_enabled(&enabled)?;
    }
    let raw = store::to_json(INSTALLED_ABILITIES_KEY, &installed)?;
    self.store.put(INSTALLED_ABILITIES_KEY, raw, true);
    Ok(())
  }

  /// Send `query` to the operator of `target` on behalf of an ability.
  ///
  /// With `redact`, the window strips user content before answering.
  pub fn query_window(
    &self,
    target: Partition,
    query: ElementQuery,
    request: RequestId,
    reply: Arc<dyn QueryCallback>,
    redact: bool,
  ) -> ServiceResult<()> {
    self.check_alive()?;
    let operator = self
      .operators
      .lock()
      .get(&target)
      .cloned()
      .ok_or(ServiceError::NoOperator(target))?;
    operator.execute(query, request, reply, redact);
    Ok(())
  }

  /// Partitions that currently have an operator.
  pub fn registered_windows(&self) -> Vec<Partition> {
    self.operators.lock().keys().copied().collect()
  }

  fn on_store_changed(&self, key: &str) {
    if !self.is_alive() {
      return;
    }

    if key == ENABLED_ABILITIES_KEY {
      match self.enabled() {
        Ok(enabled) => {
          let observers = self.ability_observers.lock().clone();
          for observer in observers {
            observer.on_enabled_abilities_changed(enabled.clone());
          }
        }
        Err(e) => log::warn!("[service] {e}"),
      }
      return;
    }

    if key == INSTALLED_ABILITIES_KEY {
      let observers = self.ability_observers.lock().clone();
      for observer in observers {
        observer.on_installed_abilities_changed();
      }
      return;
    }

    let Some(item) = ConfigItem::ALL
      .iter()
      .copied()
      .find(|item| item.settings_key() == key)
    else {
      return;
    };
    match self.read(item) {
      Ok(value) => {
        let observers = self.config_observers.lock().clone();
        log::debug!(
          "[service] {item:?} changed, pushing to {} observer(s)",
          observers.len()
        );
        for observer in observers {
          observer.on_config_changed(item, value.clone());
        }
      }
      Err(e) => log::warn!("[service] dropping change to {key}: {e}"),
    }
  }
}

impl RemoteService for AccessibilityService {
  fn config_snapshot(&self) -> AllinkResult<ConfigSnapshot> {
    self.check_alive()?;
    let mut snapshot = ConfigSnapshot::default();
    for item in ConfigItem::ALL {
      snapshot.insert(item, self.read(item)?);
    }
    Ok(snapshot)
  }

  fn set_config(&self, item: ConfigItem, value: ConfigValue) -> AllinkResult<()> {
    self.check_alive()?;
    self.write(item, &value)?;
    Ok(())
  }

  fn register_config_observer(&self, observer: Arc<dyn RemoteConfigObserver>) -> AllinkResult<()> {
    self.check_alive()?;
    self.config_observers.lock().push(observer);
    Ok(())
  }

  fn register_ability_observer(
    &self,
    observer: Arc<dyn RemoteAbilityObserver>,
  ) -> AllinkResult<()> {
    self.check_alive()?;
    self.ability_observers.lock().push(observer);
    Ok(())
  }

  fn enabled_abilities(&self) -> AllinkResult<Vec<String>> {
    self.check_alive()?;
    Ok(self.enabled()?)
  }

  fn installed_abilities(&self) -> AllinkResult<Vec<AbilityInfo>> {
    self.check_alive()?;
    Ok(self.installed()?)
  }

  fn enable_ability(&self, name: &str, capabilities: Capabilities) -> AllinkResult<()> {
    self.check_alive()?;
    let installed = self.installed()?;
    let Some(ability) = installed.iter().find(|a| a.name == name) else {
      return Err(ServiceError::UnknownAbility(name.to_owned()).into());
    };
    if !ability.capabilities.contains(capabilities) {
      return Err(allink::AllinkError::invalid(format!(
        "{name} does not declare capabilities {:#x}",
        capabilities.0
      )));
    }

    let mut enabled = self.enabled()?;
    if enabled.iter().any(|n| n == name) {
      return Ok(());
    }
    enabled.push(name.to_owned());
    self.write_enabled(&enabled)?;
    Ok(())
  }

  fn disable_ability(&self, name: &str) -> AllinkResult<()> {
    self.check_alive()?;
    let mut enabled = self.enabled()?;
    let before = enabled.len();
    enabled.retain(|n| n != name);
    if enabled.len() != before {
      self.write_enabled(&enabled)?;
    }
    Ok(())
  }

  fn register_element_operator(
    &self,
    target: Partition,
    operator: Arc<dyn ElementOperator>,
  ) -> AllinkResult<()> {
    self.check_alive()?;
    self.operators.lock().insert(target, operator);
    Ok(())
  }

  fn deregister_element_operator(&self, target: Partition) -> AllinkResult<()> {
    self.check_alive()?;
    if self.operators.lock().remove(&target).is_none() {
      log::debug!("[service] deregister for unknown {target:?}");
    }
    Ok(())
  }

  fn dispatch_query(
    &self,
    target: Partition,
    query: ElementQuery,
    request: RequestId,
    reply: Arc<dyn QueryCallback>,
  ) -> AllinkResult<()> {
    Ok(self.query_window(target, query, request, reply, false)?)
  }
}
