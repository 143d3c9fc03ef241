/*!
Element query requests and their results.

Queries target one window's accessibility tree. Results come back
asynchronously and are matched to the caller through a correlated
[`RequestId`](super::RequestId).
*/

use super::{ElementId, WindowId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

/// Screen rectangle in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Rect {
  pub left: i32,
  pub top: i32,
  pub right: i32,
  pub bottom: i32,
}

/// Accessibility data for one element.
///
/// `text`, `resource_id`, `page_path`, `error_text` and `contents` may carry
/// user content and are cleared for filtered callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ElementInfo {
  pub id: ElementId,
  pub window_id: WindowId,
  pub parent_id: Option<ElementId>,
  pub child_ids: Vec<ElementId>,
  /// Component type, e.g. `Button`, `TextInput`.
  pub component_type: String,
  pub bundle_name: String,
  pub text: String,
  pub hint_text: String,
  pub description: String,
  pub resource_id: String,
  pub page_path: String,
  pub error_text: String,
  pub contents: Vec<String>,
  pub bounds: Rect,
  pub enabled: bool,
  pub focused: bool,
  pub accessibility_focused: bool,
  pub visible: bool,
  pub actions: Vec<ActionType>,
}

impl ElementInfo {
  /// Clear every free-text field that may carry user content.
  pub fn redact(&mut self) {
    self.text.clear();
    self.resource_id.clear();
    self.page_path.clear();
    self.error_text.clear();
    self.contents.clear();
  }
}

/// Which relatives to prefetch alongside a search-by-id hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SearchMode {
  pub predecessors: bool,
  pub siblings: bool,
  pub children: bool,
  pub descendants: bool,
}

/// Focus kind for find-focus queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum FocusType {
  Input,
  Accessibility,
}

/// Direction for focus-move queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum FocusDirection {
  Up,
  Down,
  Left,
  Right,
  Forward,
  Backward,
}

/// Actions an element can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ActionType {
  Focus,
  ClearFocus,
  Select,
  ClearSelection,
  Click,
  LongClick,
  AccessibilityFocus,
  ClearAccessibilityFocus,
  ScrollForward,
  ScrollBackward,
  Copy,
  Paste,
  Cut,
  SetText,
  SetSelection,
}

/// A query against one window's accessibility tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "method", content = "args", rename_all = "snake_case")]
#[ts(export)]
pub enum ElementQuery {
  SearchById {
    element: ElementId,
    mode: SearchMode,
  },
  SearchByText {
    element: ElementId,
    text: String,
  },
  FindFocus {
    element: ElementId,
    focus: FocusType,
  },
  FocusMove {
    element: ElementId,
    direction: FocusDirection,
  },
  ExecuteAction {
    element: ElementId,
    action: ActionType,
    arguments: BTreeMap<String, String>,
  },
  CursorPosition {
    element: ElementId,
  },
  SearchByProperty {
    element: ElementId,
    property: String,
    value: String,
  },
}

/// Discriminant of [`ElementQuery`], kept on pending requests for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum QueryKind {
  SearchById,
  SearchByText,
  FindFocus,
  FocusMove,
  ExecuteAction,
  CursorPosition,
  SearchByProperty,
}

impl ElementQuery {
  pub const fn kind(&self) -> QueryKind {
    match self {
      Self::SearchById { .. } => QueryKind::SearchById,
      Self::SearchByText { .. } => QueryKind::SearchByText,
      Self::FindFocus { .. } => QueryKind::FindFocus,
      Self::FocusMove { .. } => QueryKind::FocusMove,
      Self::ExecuteAction { .. } => QueryKind::ExecuteAction,
      Self::CursorPosition { .. } => QueryKind::CursorPosition,
      Self::SearchByProperty { .. } => QueryKind::SearchByProperty,
    }
  }

  /// Element the query starts from.
  pub const fn element(&self) -> ElementId {
    match self {
      Self::SearchById { element, .. }
      | Self::SearchByText { element, .. }
      | Self::FindFocus { element, .. }
      | Self::FocusMove { element, .. }
      | Self::ExecuteAction { element, .. }
      | Self::CursorPosition { element }
      | Self::SearchByProperty { element, .. } => *element,
    }
  }
}

/// Why a query produced no answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum QueryFailure {
  /// No live connection to the service.
  ServiceUnavailable,
  /// A newer request reused this request's id before it was answered.
  Superseded,
  /// The window's handler could not answer.
  Rejected,
}

/// Result delivered for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
#[ts(export)]
pub enum QueryResult {
  /// Search results (by id, text or property).
  Elements(Vec<ElementInfo>),
  /// Single element (find-focus, focus-move), `None` if nothing matched.
  Element(Option<ElementInfo>),
  /// Outcome of an action.
  Action(bool),
  /// Text cursor position.
  Cursor(i32),
  Failed(QueryFailure),
}

impl QueryResult {
  pub const fn is_failure(&self) -> bool {
    matches!(self, Self::Failed(_))
  }

  /// Clear user content from every element this result carries.
  pub fn redact(&mut self) {
    match self {
      Self::Elements(infos) => infos.iter_mut().for_each(ElementInfo::redact),
      Self::Element(Some(info)) => info.redact(),
      Self::Element(None) | Self::Action(_) | Self::Cursor(_) | Self::Failed(_) => {}
    }
  }
}
