/*! Core types for allink. */

#![allow(missing_docs)]

mod cached;
mod config;
mod element;
mod error;
mod event;
mod ids;

pub use cached::Cached;
pub use config::{
  AbilityInfo, CaptionStyle, Capabilities, ClickResponseTime, ConfigItem, ConfigKind,
  ConfigSnapshot, ConfigValue, DaltonizationFilter, IgnoreRepeatClickTime, AUTO_CLICK_RANGE_MS,
  DEFAULT_AUTO_CLICK_MS, DEFAULT_SHORT_KEY_TIMEOUT_MS,
};
pub use element::{
  ActionType, ElementInfo, ElementQuery, FocusDirection, FocusType, QueryFailure, QueryKind,
  QueryResult, Rect, SearchMode,
};
pub use error::{AllinkError, AllinkResult};
pub use event::{ConnectionState, Event};
pub use ids::{
  ElementId, Partition, RequestId, TreeId, WindowId, CALLER_ID_BITS, CALLER_ID_MASK,
};
