/*!
Configuration observers.

Per-item subscriber lists with duplicate suppression. Subscribers are held
weakly: subscribing never extends an observer's lifetime, and dropped
observers are pruned on the next delivery.

Two locks, always taken in this order:
- `delivery` (re-entrant) serializes whole pushes, so one subscriber sees an
  item's changes in the order they were pushed.
- `state` guards subscriber lists and values. It is never held while an
  observer runs, so observers may subscribe, unsubscribe or push from inside
  a callback.
*/

use async_broadcast::Sender;
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use crate::types::{ConfigItem, ConfigSnapshot, ConfigValue, Event};

/// Receives configuration changes for the items it subscribed to.
pub trait ConfigObserver: Send + Sync {
  /// Called once per distinct value, outside any registry lock.
  fn on_config_changed(&self, item: ConfigItem, value: &ConfigValue);
}

/// Receives changes to the enabled or installed ability lists.
pub trait AbilityListObserver: Send + Sync {
  /// The enabled list changed to `enabled`.
  fn on_enabled_abilities_changed(&self, _enabled: &[String]) {}

  /// Something was installed or uninstalled.
  fn on_installed_abilities_changed(&self) {}
}

struct ItemState {
  cached: ConfigValue,
  last_notified: ConfigValue,
  subscribers: Vec<Weak<dyn ConfigObserver>>,
}

struct AbilityState {
  enabled: Vec<String>,
  last_notified: Vec<String>,
  subscribers: Vec<Weak<dyn AbilityListObserver>>,
}

struct State {
  items: HashMap<ConfigItem, ItemState>,
  abilities: AbilityState,
}

/// Subscriber lists and client-side cache for every [`ConfigItem`].
pub struct ConfigObserverRegistry {
  state: Mutex<State>,
  delivery: ReentrantMutex<()>,
  events_tx: Sender<Event>,
}

impl std::fmt::Debug for ConfigObserverRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConfigObserverRegistry").finish_non_exhaustive()
  }
}

/// Add `observer` unless an equal pointer is already present. Prunes dead entries.
fn insert_unique<T: ?Sized>(list: &mut Vec<Weak<T>>, observer: &Arc<T>) -> bool {
  list.retain(|w| w.strong_count() > 0);
  let weak = Arc::downgrade(observer);
  if list.iter().any(|w| Weak::ptr_eq(w, &weak)) {
    return false;
  }
  list.push(weak);
  true
}

/// Remove the first entry pointing at `observer`.
fn remove_first<T: ?Sized>(list: &mut Vec<Weak<T>>, observer: &Arc<T>) -> bool {
  let weak = Arc::downgrade(observer);
  match list.iter().position(|w| Weak::ptr_eq(w, &weak)) {
    Some(index) => {
      list.remove(index);
      true
    }
    None => false,
  }
}

/// Upgrade live subscribers, dropping dead ones from the list.
fn live<T: ?Sized>(list: &mut Vec<Weak<T>>) -> Vec<Arc<T>> {
  let mut upgraded = Vec::with_capacity(list.len());
  list.retain(|w| match w.upgrade() {
    Some(observer) => {
      upgraded.push(observer);
      true
    }
    None => false,
  });
  upgraded
}

/// Run `f` for each observer. A panicking observer does not stop the rest.
fn fan_out<T: ?Sized>(what: &str, observers: &[Arc<T>], mut f: impl FnMut(&T)) {
  for observer in observers {
    if catch_unwind(AssertUnwindSafe(|| f(observer))).is_err() {
      log::error!("[observers] {what} observer panicked, continuing with the rest");
    }
  }
}

impl ConfigObserverRegistry {
  /// Registry with every item at its default value.
  pub fn new(events_tx: Sender<Event>) -> Self {
    let items = ConfigItem::ALL
      .iter()
      .map(|&item| {
        let default = item.default_value();
        (
          item,
          ItemState {
            cached: default.clone(),
            last_notified: default,
            subscribers: Vec::new(),
          },
        )
      })
      .collect();

    Self {
      state: Mutex::new(State {
        items,
        abilities: AbilityState {
          enabled: Vec::new(),
          last_notified: Vec::new(),
          subscribers: Vec::new(),
        },
      }),
      delivery: ReentrantMutex::new(()),
      events_tx,
    }
  }

  fn emit(&self, event: Event) {
    if let Err(e) = self.events_tx.try_broadcast(event) {
      if e.is_full() {
        log::error!("[observers] Event channel overflow - events are being dropped.");
      }
    }
  }

  fn with_item<R>(&self, item: ConfigItem, f: impl FnOnce(&mut ItemState) -> R) -> Option<R> {
    self.state.lock().items.get_mut(&item).map(f)
  }

  /// Subscribe `observer` to `item`. Returns `false` if it was already subscribed.
  ///
  /// With `notify_immediately`, the cached value is delivered to this observer
  /// right away, even for a duplicate subscription. Other observers and the
  /// duplicate gate are unaffected.
  pub fn subscribe(
    &self,
    item: ConfigItem,
    observer: &Arc<dyn ConfigObserver>,
    notify_immediately: bool,
  ) -> bool {
    let _delivery = notify_immediately.then(|| self.delivery.lock());

    let Some((added, cached)) = self.with_item(item, |state| {
      (
        insert_unique(&mut state.subscribers, observer),
        state.cached.clone(),
      )
    }) else {
      return false;
    };

    if !added {
      log::debug!("[observers] duplicate subscription to {item:?} ignored");
    }

    if notify_immediately {
      fan_out("config", std::slice::from_ref(observer), |o| {
        o.on_config_changed(item, &cached);
      });
    }
    added
  }

  /// Remove `observer` from `item`. Returns `false` if it was not subscribed.
  pub fn unsubscribe(&self, item: ConfigItem, observer: &Arc<dyn ConfigObserver>) -> bool {
    self
      .with_item(item, |state| remove_first(&mut state.subscribers, observer))
      .unwrap_or(false)
  }

  /// Record a new value for `item` and notify subscribers if it differs from
  /// the last value they were told about. Returns whether anyone was notified.
  pub fn push_change(&self, item: ConfigItem, value: ConfigValue) -> bool {
    if value.kind() != item.kind() {
      log::warn!(
        "[observers] {item:?} expects {:?}, dropping {:?} push",
        item.kind(),
        value.kind()
      );
      return false;
    }

    let _delivery = self.delivery.lock();

    let observers = self.with_item(item, |state| {
      state.cached = value.clone();
      if state.last_notified == value {
        return None;
      }
      state.last_notified = value.clone();
      Some(live(&mut state.subscribers))
    });
    let Some(Some(observers)) = observers else {
      return false;
    };

    log::debug!(
      "[observers] {item:?} changed, notifying {} observer(s)",
      observers.len()
    );
    fan_out("config", &observers, |o| o.on_config_changed(item, &value));
    self.emit(Event::ConfigChanged { item, value });
    true
  }

  /// Optimistic cache write after a successful write-through. Does not notify.
  pub fn update_cached(&self, item: ConfigItem, value: ConfigValue) {
    self.with_item(item, |state| state.cached = value);
  }

  /// Current cached value of `item`.
  pub fn cached(&self, item: ConfigItem) -> ConfigValue {
    self
      .with_item(item, |state| state.cached.clone())
      .unwrap_or_else(|| item.default_value())
  }

  /// Cached value of every item.
  pub fn snapshot(&self) -> ConfigSnapshot {
    let state = self.state.lock();
    let mut snapshot = ConfigSnapshot::default();
    for (item, item_state) in &state.items {
      snapshot.insert(*item, item_state.cached.clone());
    }
    snapshot
  }

  /// Number of live subscribers on `item`.
  pub fn subscriber_count(&self, item: ConfigItem) -> usize {
    self
      .with_item(item, |state| {
        state
          .subscribers
          .iter()
          .filter(|w| w.strong_count() > 0)
          .count()
      })
      .unwrap_or(0)
  }

  /// Watch both ability lists. Returns false if already subscribed.
  pub fn subscribe_abilities(&self, observer: &Arc<dyn AbilityListObserver>) -> bool {
    insert_unique(&mut self.state.lock().abilities.subscribers, observer)
  }

  /// Returns whether `observer` was subscribed.
  pub fn unsubscribe_abilities(&self, observer: &Arc<dyn AbilityListObserver>) -> bool {
    remove_first(&mut self.state.lock().abilities.subscribers, observer)
  }

  /// Record the enabled ability list, notifying on change.
  pub fn push_enabled_abilities(&self, enabled: Vec<String>) -> bool {
    let _delivery = self.delivery.lock();

    let observers = {
      let mut state = self.state.lock();
      let abilities = &mut state.abilities;
      abilities.enabled.clone_from(&enabled);
      if abilities.last_notified == enabled {
        return false;
      }
      abilities.last_notified.clone_from(&enabled);
      live(&mut abilities.subscribers)
    };

    fan_out("ability", &observers, |o| {
      o.on_enabled_abilities_changed(&enabled);
    });
    self.emit(Event::EnabledAbilitiesChanged { abilities: enabled });
    true
  }

  /// Installed abilities are not cached; every push is forwarded.
  pub fn notify_installed_abilities_changed(&self) {
    let _delivery = self.delivery.lock();
    let observers = live(&mut self.state.lock().abilities.subscribers);
    fan_out("ability", &observers, AbilityListObserver::on_installed_abilities_changed);
    self.emit(Event::InstalledAbilitiesChanged);
  }

  /// Cached enabled ability list.
  pub fn enabled_abilities(&self) -> Vec<String> {
    self.state.lock().abilities.enabled.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn registry() -> ConfigObserverRegistry {
    let (mut tx, rx) = async_broadcast::broadcast(64);
    tx.set_overflow(true);
    // No active receiver: emits are dropped, which is fine here.
    drop(rx);
    ConfigObserverRegistry::new(tx)
  }

  #[derive(Default)]
  struct Recorder {
    seen: Mutex<Vec<(ConfigItem, ConfigValue)>>,
  }

  impl ConfigObserver for Recorder {
    fn on_config_changed(&self, item: ConfigItem, value: &ConfigValue) {
      self.seen.lock().push((item, value.clone()));
    }
  }

  impl Recorder {
    fn values(&self) -> Vec<ConfigValue> {
      self.seen.lock().iter().map(|(_, v)| v.clone()).collect()
    }
  }

  fn as_observer(recorder: &Arc<Recorder>) -> Arc<dyn ConfigObserver> {
    Arc::clone(recorder) as Arc<dyn ConfigObserver>
  }

  mod subscribe_tests {
    use super::*;

    #[test]
    fn duplicate_subscribe_is_single_entry() {
      let registry = registry();
      let rec = Arc::new(Recorder::default());
      let obs = as_observer(&rec);

      assert!(registry.subscribe(ConfigItem::InvertColor, &obs, false));
      assert!(!registry.subscribe(ConfigItem::InvertColor, &obs, false));
      assert_eq!(registry.subscriber_count(ConfigItem::InvertColor), 1);

      registry.push_change(ConfigItem::InvertColor, ConfigValue::Bool(true));
      assert_eq!(rec.values(), vec![ConfigValue::Bool(true)]);
    }

    #[test]
    fn caption_state_scenario() {
      let registry = registry();
      let rec = Arc::new(Recorder::default());
      let obs = as_observer(&rec);

      registry.subscribe(ConfigItem::CaptionState, &obs, true);
      assert_eq!(rec.values(), vec![ConfigValue::Bool(false)]);

      assert!(registry.push_change(ConfigItem::CaptionState, ConfigValue::Bool(true)));
      assert!(!registry.push_change(ConfigItem::CaptionState, ConfigValue::Bool(true)));
      assert_eq!(
        rec.values(),
        vec![ConfigValue::Bool(false), ConfigValue::Bool(true)]
      );
    }

    #[test]
    fn immediate_notify_reaches_only_new_observer() {
      let registry = registry();
      let first = Arc::new(Recorder::default());
      let second = Arc::new(Recorder::default());
      registry.subscribe(ConfigItem::AudioMono, &as_observer(&first), false);
      registry.subscribe(ConfigItem::AudioMono, &as_observer(&second), true);

      assert!(first.values().is_empty());
      assert_eq!(second.values(), vec![ConfigValue::Bool(false)]);
    }

    #[test]
    fn unsubscribe_absent_is_noop() {
      let registry = registry();
      let rec = Arc::new(Recorder::default());
      let obs = as_observer(&rec);
      assert!(!registry.unsubscribe(ConfigItem::MouseKey, &obs));

      registry.subscribe(ConfigItem::MouseKey, &obs, false);
      assert!(registry.unsubscribe(ConfigItem::MouseKey, &obs));
      registry.push_change(ConfigItem::MouseKey, ConfigValue::Bool(true));
      assert!(rec.values().is_empty());
    }

    #[test]
    fn subscription_does_not_keep_observer_alive() {
      let registry = registry();
      let rec = Arc::new(Recorder::default());
      registry.subscribe(ConfigItem::ShortKey, &as_observer(&rec), false);
      drop(rec);
      assert_eq!(registry.subscriber_count(ConfigItem::ShortKey), 0);
      assert!(registry.push_change(ConfigItem::ShortKey, ConfigValue::Bool(true)));
    }
  }

  mod push_tests {
    use super::*;

    #[test]
    fn duplicate_push_delivers_once() {
      let registry = registry();
      let rec = Arc::new(Recorder::default());
      registry.subscribe(ConfigItem::ContentTimeout, &as_observer(&rec), false);

      registry.push_change(ConfigItem::ContentTimeout, ConfigValue::Int(5000));
      registry.push_change(ConfigItem::ContentTimeout, ConfigValue::Int(5000));
      assert_eq!(rec.values(), vec![ConfigValue::Int(5000)]);
    }

    #[test]
    fn push_equal_to_default_is_suppressed() {
      let registry = registry();
      let rec = Arc::new(Recorder::default());
      registry.subscribe(ConfigItem::AudioBalance, &as_observer(&rec), false);
      assert!(!registry.push_change(ConfigItem::AudioBalance, ConfigValue::Float(0.0)));
      assert!(rec.values().is_empty());
    }

    #[test]
    fn wrong_kind_is_dropped() {
      let registry = registry();
      assert!(!registry.push_change(ConfigItem::CaptionState, ConfigValue::Int(1)));
      assert_eq!(
        registry.cached(ConfigItem::CaptionState),
        ConfigValue::Bool(false)
      );
    }

    #[test]
    fn optimistic_update_does_not_gate_push() {
      let registry = registry();
      let rec = Arc::new(Recorder::default());
      registry.subscribe(ConfigItem::AnimationOff, &as_observer(&rec), false);

      registry.update_cached(ConfigItem::AnimationOff, ConfigValue::Bool(true));
      assert_eq!(
        registry.cached(ConfigItem::AnimationOff),
        ConfigValue::Bool(true)
      );
      assert!(rec.values().is_empty());

      // The service echoes the write back; subscribers hear about it once.
      assert!(registry.push_change(ConfigItem::AnimationOff, ConfigValue::Bool(true)));
      assert_eq!(rec.values(), vec![ConfigValue::Bool(true)]);
    }

    #[test]
    fn panicking_observer_does_not_block_others() {
      struct Panics;
      impl ConfigObserver for Panics {
        fn on_config_changed(&self, _item: ConfigItem, _value: &ConfigValue) {
          panic!("observer failure");
        }
      }

      let registry = registry();
      let bad: Arc<dyn ConfigObserver> = Arc::new(Panics);
      let good = Arc::new(Recorder::default());
      registry.subscribe(ConfigItem::InvertColor, &bad, false);
      registry.subscribe(ConfigItem::InvertColor, &as_observer(&good), false);

      assert!(registry.push_change(ConfigItem::InvertColor, ConfigValue::Bool(true)));
      assert_eq!(good.values(), vec![ConfigValue::Bool(true)]);
    }

    /// Observers may (un)subscribe from inside a callback without deadlocking.
    #[test]
    fn observer_may_resubscribe_during_delivery() {
      struct Unsubscriber {
        registry: Arc<ConfigObserverRegistry>,
        me: Mutex<Option<Weak<dyn ConfigObserver>>>,
        calls: Mutex<u32>,
      }
      impl ConfigObserver for Unsubscriber {
        fn on_config_changed(&self, item: ConfigItem, _value: &ConfigValue) {
          *self.calls.lock() += 1;
          // Only the first item moves; the immediate AudioMono delivery must
          // not resubscribe again.
          if item != ConfigItem::InvertColor {
            return;
          }
          let me = self.me.lock().as_ref().and_then(Weak::upgrade);
          if let Some(me) = me {
            self.registry.unsubscribe(item, &me);
            self.registry.subscribe(ConfigItem::AudioMono, &me, true);
          }
        }
      }

      let registry = Arc::new(registry());
      let unsub = Arc::new(Unsubscriber {
        registry: Arc::clone(&registry),
        me: Mutex::new(None),
        calls: Mutex::new(0),
      });
      let obs: Arc<dyn ConfigObserver> = Arc::clone(&unsub) as Arc<dyn ConfigObserver>;
      *unsub.me.lock() = Some(Arc::downgrade(&obs));

      registry.subscribe(ConfigItem::InvertColor, &obs, false);
      registry.push_change(ConfigItem::InvertColor, ConfigValue::Bool(true));
      registry.push_change(ConfigItem::InvertColor, ConfigValue::Bool(false));

      // One delivery for the push, one immediate delivery for AudioMono.
      assert_eq!(*unsub.calls.lock(), 2);
      assert_eq!(registry.subscriber_count(ConfigItem::InvertColor), 0);
      assert_eq!(registry.subscriber_count(ConfigItem::AudioMono), 1);
    }
  }

  mod ability_tests {
    use super::*;

    #[derive(Default)]
    struct AbilityRecorder {
      enabled: Mutex<Vec<Vec<String>>>,
      installed: Mutex<u32>,
    }

    impl AbilityListObserver for AbilityRecorder {
      fn on_enabled_abilities_changed(&self, enabled: &[String]) {
        self.enabled.lock().push(enabled.to_vec());
      }

      fn on_installed_abilities_changed(&self) {
        *self.installed.lock() += 1;
      }
    }

    #[test]
    fn enabled_list_is_deduplicated() {
      let registry = registry();
      let rec = Arc::new(AbilityRecorder::default());
      let obs: Arc<dyn AbilityListObserver> = Arc::clone(&rec) as Arc<dyn AbilityListObserver>;
      assert!(registry.subscribe_abilities(&obs));
      assert!(!registry.subscribe_abilities(&obs));

      let list = vec!["com.example/reader".to_owned()];
      assert!(registry.push_enabled_abilities(list.clone()));
      assert!(!registry.push_enabled_abilities(list.clone()));
      assert_eq!(*rec.enabled.lock(), vec![list.clone()]);
      assert_eq!(registry.enabled_abilities(), list);

      registry.notify_installed_abilities_changed();
      registry.notify_installed_abilities_changed();
      assert_eq!(*rec.installed.lock(), 2);

      assert!(registry.unsubscribe_abilities(&obs));
      registry.push_enabled_abilities(Vec::new());
      assert_eq!(rec.enabled.lock().len(), 1);
    }
  }
}
