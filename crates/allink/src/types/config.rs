/*!
Service-owned accessibility configuration.

Every setting is a [`ConfigItem`] with a fixed value kind, default value and
settings-store key. Values travel as [`ConfigValue`].
*/

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

/// Kind of value a [`ConfigItem`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum ConfigKind {
  Bool,
  Int,
  Float,
  Text,
  TextList,
  CaptionStyle,
  DaltonizationFilter,
  ClickResponseTime,
  IgnoreRepeatClickTime,
}

/// A named accessibility setting owned by the service.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ConfigItem {
  HighContrastText,
  InvertColor,
  DaltonizationState,
  DaltonizationColorFilter,
  ContentTimeout,
  AnimationOff,
  BrightnessDiscount,
  AudioMono,
  AudioBalance,
  MouseKey,
  ShortKey,
  ShortKeyOnLockScreen,
  ShortKeyTimeout,
  ShortKeyTarget,
  ShortKeyMultiTarget,
  CaptionState,
  CaptionStyle,
  ScreenMagnification,
  MouseAutoClick,
  ClickResponseTime,
  IgnoreRepeatClickState,
  IgnoreRepeatClickTime,
}

/// Default auto-click delay in milliseconds.
pub const DEFAULT_AUTO_CLICK_MS: i32 = 2000;
/// Accepted auto-click delay range in milliseconds.
pub const AUTO_CLICK_RANGE_MS: (i32, i32) = (1000, 5000);
/// Default short-key hold time in milliseconds.
pub const DEFAULT_SHORT_KEY_TIMEOUT_MS: i32 = 3000;

impl ConfigItem {
  /// Every item, in declaration order.
  pub const ALL: [ConfigItem; 22] = [
    ConfigItem::HighContrastText,
    ConfigItem::InvertColor,
    ConfigItem::DaltonizationState,
    ConfigItem::DaltonizationColorFilter,
    ConfigItem::ContentTimeout,
    ConfigItem::AnimationOff,
    ConfigItem::BrightnessDiscount,
    ConfigItem::AudioMono,
    ConfigItem::AudioBalance,
    ConfigItem::MouseKey,
    ConfigItem::ShortKey,
    ConfigItem::ShortKeyOnLockScreen,
    ConfigItem::ShortKeyTimeout,
    ConfigItem::ShortKeyTarget,
    ConfigItem::ShortKeyMultiTarget,
    ConfigItem::CaptionState,
    ConfigItem::CaptionStyle,
    ConfigItem::ScreenMagnification,
    ConfigItem::MouseAutoClick,
    ConfigItem::ClickResponseTime,
    ConfigItem::IgnoreRepeatClickState,
    ConfigItem::IgnoreRepeatClickTime,
  ];

  /// The kind of value this item holds.
  pub const fn kind(self) -> ConfigKind {
    match self {
      Self::HighContrastText
      | Self::InvertColor
      | Self::DaltonizationState
      | Self::AnimationOff
      | Self::AudioMono
      | Self::MouseKey
      | Self::ShortKey
      | Self::ShortKeyOnLockScreen
      | Self::CaptionState
      | Self::ScreenMagnification
      | Self::IgnoreRepeatClickState => ConfigKind::Bool,
      Self::ContentTimeout | Self::ShortKeyTimeout | Self::MouseAutoClick => ConfigKind::Int,
      Self::BrightnessDiscount | Self::AudioBalance => ConfigKind::Float,
      Self::ShortKeyTarget => ConfigKind::Text,
      Self::ShortKeyMultiTarget => ConfigKind::TextList,
      Self::CaptionStyle => ConfigKind::CaptionStyle,
      Self::DaltonizationColorFilter => ConfigKind::DaltonizationFilter,
      Self::ClickResponseTime => ConfigKind::ClickResponseTime,
      Self::IgnoreRepeatClickTime => ConfigKind::IgnoreRepeatClickTime,
    }
  }

  /// Value the service reports before anything was written.
  pub fn default_value(self) -> ConfigValue {
    match self {
      Self::ContentTimeout => ConfigValue::Int(0),
      Self::ShortKeyTimeout => ConfigValue::Int(DEFAULT_SHORT_KEY_TIMEOUT_MS),
      Self::MouseAutoClick => ConfigValue::Int(DEFAULT_AUTO_CLICK_MS),
      Self::BrightnessDiscount => ConfigValue::Float(1.0),
      Self::AudioBalance => ConfigValue::Float(0.0),
      Self::ShortKeyTarget => ConfigValue::Text(String::new()),
      Self::ShortKeyMultiTarget => ConfigValue::TextList(Vec::new()),
      Self::CaptionStyle => ConfigValue::CaptionStyle(CaptionStyle::default()),
      Self::DaltonizationColorFilter => {
        ConfigValue::DaltonizationFilter(DaltonizationFilter::default())
      }
      Self::ClickResponseTime => ConfigValue::ClickResponseTime(ClickResponseTime::default()),
      Self::IgnoreRepeatClickTime => {
        ConfigValue::IgnoreRepeatClickTime(IgnoreRepeatClickTime::default())
      }
      Self::HighContrastText
      | Self::InvertColor
      | Self::DaltonizationState
      | Self::AnimationOff
      | Self::AudioMono
      | Self::MouseKey
      | Self::ShortKey
      | Self::ShortKeyOnLockScreen
      | Self::CaptionState
      | Self::ScreenMagnification
      | Self::IgnoreRepeatClickState => ConfigValue::Bool(false),
    }
  }

  /// Key under which the service persists this item.
  pub const fn settings_key(self) -> &'static str {
    match self {
      Self::HighContrastText => "high_text_contrast_enabled",
      Self::InvertColor => "accessibility_display_inversion_enabled",
      Self::DaltonizationState => "accessibility_display_daltonizer_enabled",
      Self::DaltonizationColorFilter => "accessibility_display_daltonizer",
      Self::ContentTimeout => "accessibility_content_timeout",
      Self::AnimationOff => "animation_off",
      Self::BrightnessDiscount => "accessibility_brightness_discount",
      Self::AudioMono => "master_mono",
      Self::AudioBalance => "master_balance",
      Self::MouseKey => "accessibility_mouse_key",
      Self::ShortKey => "accessibility_shortcut_enabled",
      Self::ShortKeyOnLockScreen => "accessibility_shortcut_enabled_on_lock_screen",
      Self::ShortKeyTimeout => "accessibility_shortcut_timeout",
      Self::ShortKeyTarget => "accessibility_shortcut_target_service",
      Self::ShortKeyMultiTarget => "accessibility_shortcut_target_services",
      Self::CaptionState => "accessibility_captions_enabled",
      Self::CaptionStyle => "accessibility_captions_style",
      Self::ScreenMagnification => "accessibility_display_magnification_enabled",
      Self::MouseAutoClick => "accessibility_mouse_autoclick",
      Self::ClickResponseTime => "accessibility_click_response_time",
      Self::IgnoreRepeatClickState => "accessibility_ignore_repeat_click_switch",
      Self::IgnoreRepeatClickTime => "accessibility_ignore_repeat_click_time",
    }
  }
}

/// Caption rendering preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CaptionStyle {
  pub font_family: String,
  /// Font scale in percent.
  pub font_scale: i32,
  /// ARGB.
  pub font_color: u32,
  pub font_edge_type: String,
  /// ARGB.
  pub background_color: u32,
  /// ARGB.
  pub window_color: u32,
}

impl Default for CaptionStyle {
  fn default() -> Self {
    Self {
      font_family: "default".into(),
      font_scale: 100,
      font_color: 0xFFFF_FFFF,
      font_edge_type: "none".into(),
      background_color: 0xFF00_0000,
      window_color: 0x0000_0000,
    }
  }
}

/// Color-correction filter applied when daltonization is on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum DaltonizationFilter {
  #[default]
  Normal,
  Protanomaly,
  Deuteranomaly,
  Tritanomaly,
}

/// How long a press must last to count as a click.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ClickResponseTime {
  #[default]
  Short,
  Medium,
  Long,
}

/// Window in which repeated clicks are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum IgnoreRepeatClickTime {
  #[default]
  Shortest,
  Short,
  Medium,
  Long,
  Longest,
}

/// Typed value of a configuration item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "value")]
#[ts(export)]
pub enum ConfigValue {
  Bool(bool),
  Int(i32),
  Float(f32),
  Text(String),
  TextList(Vec<String>),
  CaptionStyle(CaptionStyle),
  DaltonizationFilter(DaltonizationFilter),
  ClickResponseTime(ClickResponseTime),
  IgnoreRepeatClickTime(IgnoreRepeatClickTime),
}

impl ConfigValue {
  pub const fn kind(&self) -> ConfigKind {
    match self {
      Self::Bool(_) => ConfigKind::Bool,
      Self::Int(_) => ConfigKind::Int,
      Self::Float(_) => ConfigKind::Float,
      Self::Text(_) => ConfigKind::Text,
      Self::TextList(_) => ConfigKind::TextList,
      Self::CaptionStyle(_) => ConfigKind::CaptionStyle,
      Self::DaltonizationFilter(_) => ConfigKind::DaltonizationFilter,
      Self::ClickResponseTime(_) => ConfigKind::ClickResponseTime,
      Self::IgnoreRepeatClickTime(_) => ConfigKind::IgnoreRepeatClickTime,
    }
  }

  pub const fn as_bool(&self) -> Option<bool> {
    match self {
      Self::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub const fn as_int(&self) -> Option<i32> {
    match self {
      Self::Int(n) => Some(*n),
      _ => None,
    }
  }

  pub const fn as_float(&self) -> Option<f32> {
    match self {
      Self::Float(f) => Some(*f),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::Text(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_list(&self) -> Option<&[String]> {
    match self {
      Self::TextList(list) => Some(list),
      _ => None,
    }
  }

  pub const fn as_caption_style(&self) -> Option<&CaptionStyle> {
    match self {
      Self::CaptionStyle(style) => Some(style),
      _ => None,
    }
  }

  pub const fn as_daltonization_filter(&self) -> Option<DaltonizationFilter> {
    match self {
      Self::DaltonizationFilter(f) => Some(*f),
      _ => None,
    }
  }

  pub const fn as_click_response_time(&self) -> Option<ClickResponseTime> {
    match self {
      Self::ClickResponseTime(t) => Some(*t),
      _ => None,
    }
  }

  pub const fn as_ignore_repeat_click_time(&self) -> Option<IgnoreRepeatClickTime> {
    match self {
      Self::IgnoreRepeatClickTime(t) => Some(*t),
      _ => None,
    }
  }
}

impl From<bool> for ConfigValue {
  fn from(b: bool) -> Self {
    Self::Bool(b)
  }
}

impl From<i32> for ConfigValue {
  fn from(n: i32) -> Self {
    Self::Int(n)
  }
}

impl From<f32> for ConfigValue {
  fn from(f: f32) -> Self {
    Self::Float(f)
  }
}

impl From<String> for ConfigValue {
  fn from(s: String) -> Self {
    Self::Text(s)
  }
}

impl From<&str> for ConfigValue {
  fn from(s: &str) -> Self {
    Self::Text(s.to_owned())
  }
}

impl From<Vec<String>> for ConfigValue {
  fn from(list: Vec<String>) -> Self {
    Self::TextList(list)
  }
}

impl From<CaptionStyle> for ConfigValue {
  fn from(style: CaptionStyle) -> Self {
    Self::CaptionStyle(style)
  }
}

impl From<DaltonizationFilter> for ConfigValue {
  fn from(f: DaltonizationFilter) -> Self {
    Self::DaltonizationFilter(f)
  }
}

impl From<ClickResponseTime> for ConfigValue {
  fn from(t: ClickResponseTime) -> Self {
    Self::ClickResponseTime(t)
  }
}

impl From<IgnoreRepeatClickTime> for ConfigValue {
  fn from(t: IgnoreRepeatClickTime) -> Self {
    Self::IgnoreRepeatClickTime(t)
  }
}

/// Full configuration state as pulled from the service after (re)connect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
  values: BTreeMap<ConfigItem, ConfigValue>,
}

impl ConfigSnapshot {
  /// Snapshot holding every item's default.
  pub fn defaults() -> Self {
    Self {
      values: ConfigItem::ALL
        .iter()
        .map(|&item| (item, item.default_value()))
        .collect(),
    }
  }

  pub fn get(&self, item: ConfigItem) -> Option<&ConfigValue> {
    self.values.get(&item)
  }

  pub fn insert(&mut self, item: ConfigItem, value: ConfigValue) -> Option<ConfigValue> {
    self.values.insert(item, value)
  }

  pub fn iter(&self) -> impl Iterator<Item = (ConfigItem, &ConfigValue)> + '_ {
    self.values.iter().map(|(item, value)| (*item, value))
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }
}

/// Capability bits an accessibility ability may request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Capabilities(pub u32);

impl Capabilities {
  pub const RETRIEVE: Capabilities = Capabilities(1);
  pub const TOUCH_GUIDE: Capabilities = Capabilities(1 << 1);
  pub const KEY_EVENT_OBSERVER: Capabilities = Capabilities(1 << 3);
  pub const ZOOM: Capabilities = Capabilities(1 << 4);
  pub const GESTURE: Capabilities = Capabilities(1 << 5);

  pub const fn union(self, other: Capabilities) -> Self {
    Self(self.0 | other.0)
  }

  pub const fn contains(self, other: Capabilities) -> bool {
    self.0 & other.0 == other.0
  }
}

/// An installed accessibility ability (screen reader, switch access, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AbilityInfo {
  /// Fully qualified name, `bundle/ability`.
  pub name: String,
  pub description: String,
  pub capabilities: Capabilities,
}
