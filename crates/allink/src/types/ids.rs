/*! Branded ID types for windows, subtrees, elements and correlated requests. */

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Window identifier as assigned by the window manager.
///
/// Windows are non-negative 31-bit values on the wire; anything above that
/// is rejected at registration.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  TS,
  Display,
  From,
  Into,
)]
#[ts(export)]
pub struct WindowId(pub u32);

impl WindowId {
  /// Largest window id accepted by the service.
  pub const MAX: WindowId = WindowId(i32::MAX as u32);

  /// Whether this id can be sent to the service.
  pub const fn is_valid(self) -> bool {
    self.0 <= Self::MAX.0
  }
}

/// Identifier of an embedded subtree within a window. `0` is the window's main tree.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  TS,
  Display,
  From,
  Into,
)]
#[ts(export)]
pub struct TreeId(pub u32);

impl TreeId {
  /// The window's main tree.
  pub const MAIN: TreeId = TreeId(0);

  /// Largest tree id that fits in a request partition.
  pub const MAX: TreeId = TreeId(0xFFFF);

  pub const fn is_valid(self) -> bool {
    self.0 <= Self::MAX.0
  }
}

/// Element identifier inside a window's accessibility tree.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, Display, From, Into,
)]
#[ts(export)]
pub struct ElementId(pub i64);

impl ElementId {
  /// The root element of whatever tree a query targets.
  pub const ROOT: ElementId = ElementId(-1);
}

impl Default for ElementId {
  fn default() -> Self {
    Self::ROOT
  }
}

/// Correlated request identifier.
///
/// Layout: bits 0-15 caller id, bits 16-47 window id, bits 48-63 tree id.
/// For the main tree this is simply `(window << 16) | caller`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, Display, From, Into,
)]
#[ts(export)]
pub struct RequestId(pub u64);

/// Bits of a [`RequestId`] reserved for the caller-supplied id.
pub const CALLER_ID_BITS: u32 = 16;
/// Mask applied to caller ids before they are embedded.
pub const CALLER_ID_MASK: u64 = (1 << CALLER_ID_BITS) - 1;
const WINDOW_SHIFT: u32 = CALLER_ID_BITS;
const TREE_SHIFT: u32 = 48;

/// High-order part of a [`RequestId`] owned by one `(window, tree)` gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Partition {
  pub window: WindowId,
  pub tree: TreeId,
}

impl Partition {
  pub const fn new(window: WindowId, tree: TreeId) -> Self {
    Self { window, tree }
  }

  /// Partition of a window's main tree.
  pub const fn main(window: WindowId) -> Self {
    Self::new(window, TreeId::MAIN)
  }

  /// Prefix bits this partition occupies in a request id.
  pub const fn prefix(self) -> u64 {
    ((self.tree.0 as u64 & 0xFFFF) << TREE_SHIFT) | ((self.window.0 as u64) << WINDOW_SHIFT)
  }
}

impl RequestId {
  /// Combine a caller id with a partition. Caller ids are masked to 16 bits.
  pub const fn compose(partition: Partition, caller_id: u64) -> Self {
    Self(partition.prefix() | (caller_id & CALLER_ID_MASK))
  }

  /// The caller-id bits.
  pub const fn caller_bits(self) -> u64 {
    self.0 & CALLER_ID_MASK
  }

  /// The partition embedded in the high bits.
  #[allow(clippy::cast_possible_truncation)]
  pub const fn partition(self) -> Partition {
    Partition {
      window: WindowId((self.0 >> WINDOW_SHIFT) as u32),
      tree: TreeId(((self.0 >> TREE_SHIFT) & 0xFFFF) as u32),
    }
  }
}


#[cfg(test)]
mod proptests {
  use super::*;
  use proptest::prelude::*;

  proptest! {
    /// Distinct (caller, window, tree) triples never share a request id.
    #[test]
    fn no_cross_partition_collisions(
      c1 in 0u64..=CALLER_ID_MASK, w1 in any::<u32>(), t1 in 0u32..=0xFFFF,
      c2 in 0u64..=CALLER_ID_MASK, w2 in any::<u32>(), t2 in 0u32..=0xFFFF,
    ) {
      let a = RequestId::compose(Partition::new(WindowId(w1), TreeId(t1)), c1);
      let b = RequestId::compose(Partition::new(WindowId(w2), TreeId(t2)), c2);
      if (c1, w1, t1) != (c2, w2, t2) {
        prop_assert_ne!(a, b);
      } else {
        prop_assert_eq!(a, b);
      }
    }

    /// The partition and caller bits can always be recovered.
    #[test]
    fn decompose_recovers_parts(c in 0u64..=CALLER_ID_MASK, w in any::<u32>(), t in 0u32..=0xFFFF) {
      let partition = Partition::new(WindowId(w), TreeId(t));
      let id = RequestId::compose(partition, c);
      prop_assert_eq!(id.partition(), partition);
      prop_assert_eq!(id.caller_bits(), c);
    }
  }
}
