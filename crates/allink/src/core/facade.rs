/*!
Typed configuration surface.

Getters read the client-side cache and never block. Setters validate, write
through to the service (connecting on demand), and update the cache only
after the service accepted the write. The service's own change push then
reaches subscribers exactly once.
*/

use std::sync::Arc;

use super::connection::RemoteAccess;
use super::observers::{AbilityListObserver, ConfigObserver, ConfigObserverRegistry};
use crate::types::{
  AbilityInfo, AllinkError, AllinkResult, Cached, Capabilities, CaptionStyle, ClickResponseTime,
  ConfigItem, ConfigSnapshot, ConfigValue, DaltonizationFilter, IgnoreRepeatClickTime,
  AUTO_CLICK_RANGE_MS,
};

/// Rust types a [`ConfigValue`] can be read back into.
trait ConfigType: Sized + Default + Into<ConfigValue> {
  fn extract(value: ConfigValue) -> Option<Self>;
}

macro_rules! config_type {
  ($($ty:ty => $variant:ident),* $(,)?) => {
    $(
      impl ConfigType for $ty {
        fn extract(value: ConfigValue) -> Option<Self> {
          match value {
            ConfigValue::$variant(v) => Some(v),
            _ => None,
          }
        }
      }
    )*
  };
}

config_type! {
  bool => Bool,
  i32 => Int,
  f32 => Float,
  String => Text,
  Vec<String> => TextList,
  CaptionStyle => CaptionStyle,
  DaltonizationFilter => DaltonizationFilter,
  ClickResponseTime => ClickResponseTime,
  IgnoreRepeatClickTime => IgnoreRepeatClickTime,
}

/// Check `value` against the item's kind and range.
fn validate(item: ConfigItem, value: &ConfigValue) -> AllinkResult<()> {
  if value.kind() != item.kind() {
    return Err(AllinkError::invalid(format!(
      "{item:?} expects {:?}, got {:?}",
      item.kind(),
      value.kind()
    )));
  }

  if let ConfigValue::Float(f) = value {
    if !f.is_finite() {
      return Err(AllinkError::invalid(format!("{item:?} must be finite")));
    }
  }

  match (item, value) {
    (ConfigItem::BrightnessDiscount, ConfigValue::Float(f)) if !(0.0..=1.0).contains(f) => Err(
      AllinkError::invalid(format!("brightness discount {f} outside [0, 1]")),
    ),
    (ConfigItem::AudioBalance, ConfigValue::Float(f)) if !(-1.0..=1.0).contains(f) => Err(
      AllinkError::invalid(format!("audio balance {f} outside [-1, 1]")),
    ),
    (ConfigItem::MouseAutoClick, ConfigValue::Int(ms))
      if !(AUTO_CLICK_RANGE_MS.0..=AUTO_CLICK_RANGE_MS.1).contains(ms) =>
    {
      Err(AllinkError::invalid(format!(
        "auto-click delay {ms}ms outside [{}, {}]",
        AUTO_CLICK_RANGE_MS.0, AUTO_CLICK_RANGE_MS.1
      )))
    }
    (ConfigItem::ShortKeyTimeout | ConfigItem::ContentTimeout, ConfigValue::Int(ms)) if *ms < 0 => {
      Err(AllinkError::invalid(format!("{item:?} must not be negative")))
    }
    _ => Ok(()),
  }
}

/// Read and write service-owned accessibility configuration.
#[derive(Clone)]
pub struct ConfigFacade {
  remote: Arc<dyn RemoteAccess>,
  observers: Arc<ConfigObserverRegistry>,
}

impl std::fmt::Debug for ConfigFacade {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConfigFacade").finish_non_exhaustive()
  }
}

macro_rules! accessors {
  ($($(#[$meta:meta])* $item:ident: $ty:ty => $get:ident, $set:ident;)*) => {
    $(
      #[doc = concat!("Cached `", stringify!($item), "`.")]
      $(#[$meta])*
      pub fn $get(&self) -> Cached<$ty> {
        self.typed(ConfigItem::$item)
      }

      #[doc = concat!("Write `", stringify!($item), "` through [`set`](Self::set).")]
      $(#[$meta])*
      pub fn $set(&self, value: $ty) -> AllinkResult<()> {
        self.set(ConfigItem::$item, value.into())
      }
    )*
  };
}

impl ConfigFacade {
  /// Reads come from `observers`; writes go through `remote`.
  pub fn new(remote: Arc<dyn RemoteAccess>, observers: Arc<ConfigObserverRegistry>) -> Self {
    Self { remote, observers }
  }

  fn wrap<T>(&self, value: T) -> Cached<T> {
    if self.remote.current().is_some() {
      Cached::live(value)
    } else {
      Cached::stale(value)
    }
  }

  /// Cached value of `item`.
  pub fn get(&self, item: ConfigItem) -> Cached<ConfigValue> {
    self.wrap(self.observers.cached(item))
  }

  fn typed<T: ConfigType>(&self, item: ConfigItem) -> Cached<T> {
    self
      .get(item)
      .map(|value| T::extract(value).unwrap_or_default())
  }

  /// Cached value of every item.
  pub fn snapshot(&self) -> Cached<ConfigSnapshot> {
    self.wrap(self.observers.snapshot())
  }

  /// Write `value` to the service, then to the cache.
  ///
  /// Fails with `InvalidArgument` before touching anything if the value does
  /// not fit the item, and with `ServiceUnavailable` if the service cannot
  /// be reached. The cache is unchanged on failure.
  pub fn set(&self, item: ConfigItem, value: ConfigValue) -> AllinkResult<()> {
    validate(item, &value)?;
    let remote = self
      .remote
      .ensure_connected()
      .ok_or(AllinkError::ServiceUnavailable)?;
    remote
      .set_config(item, value.clone())
      .map_err(AllinkError::surfaced)?;
    self.observers.update_cached(item, value);
    Ok(())
  }

  accessors! {
    HighContrastText: bool => high_contrast_text, set_high_contrast_text;
    InvertColor: bool => invert_color, set_invert_color;
    DaltonizationState: bool => daltonization_state, set_daltonization_state;
    DaltonizationColorFilter: DaltonizationFilter
      => daltonization_color_filter, set_daltonization_color_filter;
    /// Milliseconds; `0` keeps content until dismissed.
    ContentTimeout: i32 => content_timeout, set_content_timeout;
    AnimationOff: bool => animation_off, set_animation_off;
    /// In `[0, 1]`.
    BrightnessDiscount: f32 => brightness_discount, set_brightness_discount;
    AudioMono: bool => audio_mono, set_audio_mono;
    /// In `[-1, 1]`, left to right.
    AudioBalance: f32 => audio_balance, set_audio_balance;
    MouseKey: bool => mouse_key, set_mouse_key;
    ShortKey: bool => short_key, set_short_key;
    ShortKeyOnLockScreen: bool => short_key_on_lock_screen, set_short_key_on_lock_screen;
    /// Milliseconds the shortcut keys must be held.
    ShortKeyTimeout: i32 => short_key_timeout, set_short_key_timeout;
    ShortKeyTarget: String => short_key_target, set_short_key_target;
    ShortKeyMultiTarget: Vec<String> => short_key_multi_target, set_short_key_multi_target;
    CaptionState: bool => caption_state, set_caption_state;
    CaptionStyle: CaptionStyle => caption_style, set_caption_style;
    ScreenMagnification: bool => screen_magnification, set_screen_magnification;
    /// Dwell time in milliseconds, 1000 to 5000.
    MouseAutoClick: i32 => mouse_auto_click, set_mouse_auto_click;
    ClickResponseTime: ClickResponseTime => click_response_time, set_click_response_time;
    IgnoreRepeatClickState: bool => ignore_repeat_click_state, set_ignore_repeat_click_state;
    IgnoreRepeatClickTime: IgnoreRepeatClickTime
      => ignore_repeat_click_time, set_ignore_repeat_click_time;
  }

  /// See [`ConfigObserverRegistry::subscribe`].
  pub fn subscribe(
    &self,
    item: ConfigItem,
    observer: &Arc<dyn ConfigObserver>,
    notify_immediately: bool,
  ) -> bool {
    self.observers.subscribe(item, observer, notify_immediately)
  }

  /// See [`ConfigObserverRegistry::unsubscribe`].
  pub fn unsubscribe(&self, item: ConfigItem, observer: &Arc<dyn ConfigObserver>) -> bool {
    self.observers.unsubscribe(item, observer)
  }

  /// See [`ConfigObserverRegistry::subscribe_abilities`].
  pub fn subscribe_abilities(&self, observer: &Arc<dyn AbilityListObserver>) -> bool {
    self.observers.subscribe_abilities(observer)
  }

  /// See [`ConfigObserverRegistry::unsubscribe_abilities`].
  pub fn unsubscribe_abilities(&self, observer: &Arc<dyn AbilityListObserver>) -> bool {
    self.observers.unsubscribe_abilities(observer)
  }

  /// Names of the abilities the service reported enabled.
  pub fn enabled_abilities(&self) -> Cached<Vec<String>> {
    self.wrap(self.observers.enabled_abilities())
  }

  /// Installed abilities, asked from the service. Not cached.
  pub fn installed_abilities(&self) -> AllinkResult<Vec<AbilityInfo>> {
    let remote = self
      .remote
      .ensure_connected()
      .ok_or(AllinkError::ServiceUnavailable)?;
    remote.installed_abilities().map_err(AllinkError::surfaced)
  }

  /// Enable `name` on the service. The cached list follows the service's push.
  pub fn enable_ability(&self, name: &str, capabilities: Capabilities) -> AllinkResult<()> {
    if name.is_empty() {
      return Err(AllinkError::invalid("ability name is empty"));
    }
    let remote = self
      .remote
      .ensure_connected()
      .ok_or(AllinkError::ServiceUnavailable)?;
    remote
      .enable_ability(name, capabilities)
      .map_err(AllinkError::surfaced)
  }

  /// Disable `name` on the service.
  pub fn disable_ability(&self, name: &str) -> AllinkResult<()> {
    if name.is_empty() {
      return Err(AllinkError::invalid("ability name is empty"));
    }
    let remote = self
      .remote
      .ensure_connected()
      .ok_or(AllinkError::ServiceUnavailable)?;
    remote.disable_ability(name).map_err(AllinkError::surfaced)
  }
}
