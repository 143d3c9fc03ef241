//! Config cache behavior against a live in-process service.

mod common;

use std::sync::Arc;

use allink::{
  AbilityInfo, AllinkError, Capabilities, ConfigItem, ConfigObserver, ConfigValue,
  ConnectionState, Event,
};
use allink_service::SettingsStore;
use common::{eventually, Harness};
use parking_lot::Mutex;

#[derive(Default)]
struct Seen(Mutex<Vec<ConfigValue>>);

impl ConfigObserver for Seen {
  fn on_config_changed(&self, _item: ConfigItem, value: &ConfigValue) {
    self.0.lock().push(value.clone());
  }
}

#[test]
fn caption_state_write_notifies_once() {
  let harness = Harness::new(true, true);
  let allink = harness.link();
  assert!(allink.is_connected());

  let seen = Arc::new(Seen::default());
  let observer: Arc<dyn ConfigObserver> = Arc::clone(&seen) as _;
  assert!(allink
    .config()
    .subscribe(ConfigItem::CaptionState, &observer, false));

  assert!(allink.config().set_caption_state(true).is_ok());
  assert!(allink.config().set_caption_state(true).is_ok());

  assert_eq!(*seen.0.lock(), vec![ConfigValue::Bool(true)]);
  let cached = allink.config().caption_state();
  assert!(cached.is_live());
  assert!(*cached.value());
  assert_eq!(
    harness
      .store
      .get_bool(ConfigItem::CaptionState.settings_key())
      .ok()
      .flatten(),
    Some(true)
  );
}

#[test]
fn out_of_range_write_leaves_everything_alone() {
  let harness = Harness::new(true, true);
  let allink = harness.link();

  assert!(matches!(
    allink.config().set_mouse_auto_click(999),
    Err(AllinkError::InvalidArgument(_))
  ));
  assert_eq!(*allink.config().mouse_auto_click().value(), 2000);
  assert!(harness
    .store
    .get(ConfigItem::MouseAutoClick.settings_key())
    .is_none());
}

#[test]
fn restart_reprimes_the_cache() {
  let harness = Harness::new(true, true);
  let allink = harness.link();
  let seen = Arc::new(Seen::default());
  let observer: Arc<dyn ConfigObserver> = Arc::clone(&seen) as _;
  allink
    .config()
    .subscribe(ConfigItem::AudioBalance, &observer, false);

  assert!(allink.config().set_audio_balance(0.25).is_ok());
  assert_eq!(*seen.0.lock(), vec![ConfigValue::Float(0.25)]);

  // Written without notification; only a re-prime can deliver it.
  harness
    .store
    .put_float(ConfigItem::AudioBalance.settings_key(), -0.5, false);
  assert!((*allink.config().audio_balance().value() - 0.25).abs() < f32::EPSILON);

  harness.registry.restart();

  assert!(eventually(|| allink.is_connected()));
  assert!(eventually(|| {
    let balance = allink.config().audio_balance();
    balance.is_live() && (*balance.value() + 0.5).abs() < f32::EPSILON
  }));
  assert_eq!(
    *seen.0.lock(),
    vec![ConfigValue::Float(0.25), ConfigValue::Float(-0.5)]
  );
}

#[test]
fn external_store_write_reaches_the_cache() {
  let harness = Harness::new(true, true);
  let allink = harness.link();

  harness
    .store
    .put_bool(ConfigItem::HighContrastText.settings_key(), true, true);
  assert!(*allink.config().high_contrast_text().value());
}

#[test]
fn readiness_signal_triggers_connect() {
  let harness = Harness::new(true, false);
  let allink = harness.link();
  let mut events = allink.subscribe();
  assert_eq!(allink.connection_state(), ConnectionState::WatchingForReady);
  assert!(!allink.config().caption_state().is_live());

  harness.readiness.set(true);
  assert!(eventually(|| allink.is_connected()));

  let mut states = Vec::new();
  while let Ok(event) = events.try_recv() {
    if let Event::ConnectionChanged { state } = event {
      states.push(state);
    }
  }
  assert_eq!(
    states.last().copied(),
    Some(ConnectionState::Connected)
  );
  allink.shutdown();
}

#[test]
fn service_is_started_on_demand() {
  let harness = Harness::new(false, true);
  let allink = harness.link();

  assert!(allink.is_connected());
  assert_eq!(harness.registry.start_requests(), 1);
  assert!(harness.registry.service().is_some());
}

#[test]
fn refused_start_leaves_link_down() {
  let harness = Harness::new(false, true);
  harness.registry.set_on_demand(false);
  let allink = harness.link();

  assert!(!allink.is_connected());
  assert_eq!(
    allink.config().set_animation_off(true),
    Err(AllinkError::ServiceUnavailable)
  );
}

#[test]
fn ability_lists_follow_the_service() {
  let harness = Harness::new(true, true);
  let allink = harness.link();
  let service = harness
    .registry
    .service()
    .unwrap_or_else(|| panic!("service not running"));
  assert!(service
    .install_ability(AbilityInfo {
      name: "com.example/reader".into(),
      description: "Screen reader".into(),
      capabilities: Capabilities::RETRIEVE,
    })
    .is_ok());

  assert_eq!(
    allink
      .config()
      .installed_abilities()
      .map(|installed| installed.len()),
    Ok(1)
  );
  let reader = "com.example/reader";
  assert!(allink
    .config()
    .enable_ability(reader, Capabilities::RETRIEVE)
    .is_ok());
  assert_eq!(
    allink.config().enabled_abilities().into_value(),
    vec![reader.to_owned()]
  );
  assert!(allink.config().disable_ability(reader).is_ok());
  assert!(allink.config().enabled_abilities().value().is_empty());
  assert!(allink
    .config()
    .enable_ability(reader, Capabilities::RETRIEVE)
    .is_ok());

  // The list is persisted, so the restarted service reports it again.
  harness.registry.restart();
  assert!(eventually(|| {
    let enabled = allink.config().enabled_abilities();
    enabled.is_live() && enabled.value().as_slice() == [reader.to_owned()]
  }));
}

#[test]
fn reset_connection_reconnects_on_next_use() {
  let harness = Harness::new(true, true);
  let allink = harness.link();

  allink.reset_connection();
  assert!(!allink.is_connected());
  assert_eq!(harness.registry.watcher_count(), 0);

  assert!(allink.config().set_audio_mono(true).is_ok());
  assert!(allink.is_connected());
  assert_eq!(harness.registry.watcher_count(), 1);

  harness.registry.set_on_demand(false);
  harness.registry.kill();
  assert!(!allink.is_connected());
}
