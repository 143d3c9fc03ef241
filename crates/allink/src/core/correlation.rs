/*!
Request correlation.

A table maps correlated request ids to the callback waiting on them. Every
gateway mints into the same table, so the window partition is folded into the
id (see [`RequestId::compose`]) rather than keeping one table per window.

Outbound queries use [`mint`](RequestCorrelationTable::mint), keyed by the
caller's own id. Inbound queries live in a separate table and use
[`mint_vacant`](RequestCorrelationTable::mint_vacant), which picks a free id
and never displaces anything.

## Invariants

1. **Exactly once**: an id is live from mint until one `resolve` or `erase`.
   A second `resolve` finds nothing and is a silent no-op.
2. **Never silently dropped**: minting over a live id first completes the old
   entry with `Failed(Superseded)`, then installs the new one.
3. **No callbacks under the lock**: stale callbacks run after the table lock
   is released, so they may call back into the table.
*/

use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use crate::platform::QueryCallback;
use crate::types::{Partition, QueryFailure, QueryKind, QueryResult, RequestId, CALLER_ID_MASK};

/// A request waiting for its answer.
pub struct PendingRequest {
  caller: RequestId,
  callback: Arc<dyn QueryCallback>,
  kind: QueryKind,
  redact: bool,
}

impl std::fmt::Debug for PendingRequest {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PendingRequest")
      .field("caller", &self.caller)
      .field("kind", &self.kind)
      .field("redact", &self.redact)
      .finish_non_exhaustive()
  }
}

impl PendingRequest {
  /// `caller` is the id the callback expects back, before correlation.
  pub fn new(
    caller: RequestId,
    callback: Arc<dyn QueryCallback>,
    kind: QueryKind,
    redact: bool,
  ) -> Self {
    Self {
      caller,
      callback,
      kind,
      redact,
    }
  }

  /// Id handed back to the callback.
  pub const fn caller(&self) -> RequestId {
    self.caller
  }

  /// Kind of query waiting.
  pub const fn kind(&self) -> QueryKind {
    self.kind
  }

  /// Whether results are stripped of user content before delivery.
  pub const fn redacts(&self) -> bool {
    self.redact
  }

  /// Hand `result` to the waiting callback, stripping user content if asked to.
  pub fn complete(self, mut result: QueryResult) {
    if self.redact {
      result.redact();
    }
    self.callback.on_result(self.caller, result);
  }
}

/// Process-wide map from correlated request id to pending callback.
#[derive(Default)]
pub struct RequestCorrelationTable {
  pending: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl std::fmt::Debug for RequestCorrelationTable {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RequestCorrelationTable")
      .field("pending", &self.pending.lock().len())
      .finish()
  }
}

impl RequestCorrelationTable {
  /// An empty table.
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `request` under the id formed from `partition` and its caller id.
  ///
  /// If that id is still pending, the old request is completed with
  /// `Failed(Superseded)` before `request` is installed.
  pub fn mint(&self, partition: Partition, request: PendingRequest) -> RequestId {
    let id = RequestId::compose(partition, request.caller.0);
    loop {
      let stale = {
        let mut pending = self.pending.lock();
        match pending.entry(id) {
          Entry::Vacant(slot) => {
            slot.insert(request);
            return id;
          }
          Entry::Occupied(slot) => slot.remove(),
        }
      };

      // Lock released: the stale handler may re-enter the table.
      log::debug!(
        "[correlation] {id} reissued while pending ({:?}), failing the earlier request",
        stale.kind
      );
      stale.complete(QueryResult::Failed(QueryFailure::Superseded));
    }
  }

  /// Register `request` under the first free id of `partition`, scanning
  /// caller slots upward from `hint`.
  ///
  /// Never supersedes. `None` when all caller slots of `partition` are taken.
  pub fn mint_vacant(
    &self,
    partition: Partition,
    hint: u64,
    request: PendingRequest,
  ) -> Option<RequestId> {
    let mut pending = self.pending.lock();
    let id = (0..=CALLER_ID_MASK)
      .map(|offset| RequestId::compose(partition, hint.wrapping_add(offset)))
      .find(|id| !pending.contains_key(id))?;
    pending.insert(id, request);
    Some(id)
  }

  /// Remove and return the request pending under `id`.
  ///
  /// `None` for duplicate or late deliveries; the remote may answer after
  /// local cancellation.
  pub fn resolve(&self, id: RequestId) -> Option<PendingRequest> {
    let resolved = self.pending.lock().remove(&id);
    if resolved.is_none() {
      log::debug!("[correlation] {id} not pending, dropping delivery");
    }
    resolved
  }

  /// Forget `id` without completing it. Returns whether it was pending.
  pub fn erase(&self, id: RequestId) -> bool {
    self.pending.lock().remove(&id).is_some()
  }

  /// Forget every request minted under `partition`. Returns how many were dropped.
  pub fn erase_partition(&self, partition: Partition) -> usize {
    let mut pending = self.pending.lock();
    let before = pending.len();
    pending.retain(|id, _| id.partition() != partition);
    before - pending.len()
  }

  /// Whether `id` is still pending.
  pub fn contains(&self, id: RequestId) -> bool {
    self.pending.lock().contains_key(&id)
  }

  /// Number of pending requests across every partition.
  pub fn len(&self) -> usize {
    self.pending.lock().len()
  }

  /// Whether nothing is pending.
  pub fn is_empty(&self) -> bool {
    self.pending.lock().is_empty()
  }
}
