/*!
Per-window element query gateways.

A gateway stands for one registered `(window, tree)` pair. Outbound, it sends
queries about that window to the service; inbound, it is the window's
[`ElementOperator`] and hands the service's queries to the local
[`WindowQueryHandler`]. Each gateway owns the id partition of its window and
tree in two [`RequestCorrelationTable`]s: the shared outbound table, keyed by
the caller's id, and an inbound table owned by [`WindowGateways`]. Inbound ids
are allocated locally, so the service's request ids never collide with each
other or with a pending outbound caller. The service's own id only travels
back with the answer.

Tearing a gateway down erases, without completing, every id it minted. A late
answer for an erased id goes nowhere.
*/

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::connection::{ConnectionListener, RemoteAccess};
use super::correlation::{PendingRequest, RequestCorrelationTable};
use crate::platform::{ElementOperator, QueryCallback, RemoteService};
use crate::types::{
  ActionType, AllinkError, AllinkResult, ElementId, ElementQuery, FocusDirection, FocusType,
  Partition, QueryFailure, QueryResult, RequestId, SearchMode, TreeId, WindowId,
};

/// Answers queries about a window's accessibility tree.
///
/// Implemented by the window that registers itself. The answer goes through
/// `responder`, at most once, from any thread.
pub trait WindowQueryHandler: Send + Sync {
  /// Called on the service's thread. May answer later from elsewhere.
  fn handle(&self, query: ElementQuery, responder: Responder);
}

/// One-shot reply slot for an inbound query.
///
/// Dropping it unanswered fails the query with `Rejected`.
pub struct Responder {
  gateway: Option<Weak<ElementQueryGateway>>,
  request: RequestId,
}

impl std::fmt::Debug for Responder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Responder")
      .field("request", &self.request)
      .finish_non_exhaustive()
  }
}

impl Responder {
  /// Local id of the inbound query this responder answers. The service sees
  /// its own id in the reply, never this one.
  pub const fn request(&self) -> RequestId {
    self.request
  }

  /// Send `result` back to the service.
  pub fn respond(mut self, result: QueryResult) {
    self.send(result);
  }

  fn send(&mut self, result: QueryResult) {
    if let Some(gateway) = self.gateway.take().and_then(|g| g.upgrade()) {
      gateway.complete(Direction::Inbound, self.request, result);
    }
  }
}

impl Drop for Responder {
  fn drop(&mut self) {
    if self.gateway.is_some() {
      log::debug!("[gateway] {} dropped without an answer", self.request);
      self.send(QueryResult::Failed(QueryFailure::Rejected));
    }
  }
}

/// Who is waiting for an outbound query.
#[derive(Clone)]
pub struct Caller {
  /// Id the callback expects back.
  pub id: RequestId,
  /// Receives the answer.
  pub callback: Arc<dyn QueryCallback>,
  /// Strip user content from results before they reach `callback`.
  pub redact: bool,
}

impl std::fmt::Debug for Caller {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Caller")
      .field("id", &self.id)
      .field("redact", &self.redact)
      .finish_non_exhaustive()
  }
}

impl Caller {
  /// An unredacted caller.
  pub fn new(id: RequestId, callback: Arc<dyn QueryCallback>) -> Self {
    Self {
      id,
      callback,
      redact: false,
    }
  }

  /// Strip user content from whatever comes back.
  #[must_use]
  pub fn redacted(mut self) -> Self {
    self.redact = true;
    self
  }
}

/// Which table an id was minted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Direction {
  /// Our query, answered by the service.
  Outbound,
  /// The service's query, answered by our handler.
  Inbound,
}

/// Query endpoint for one `(window, tree)`.
pub struct ElementQueryGateway {
  partition: Partition,
  table: Arc<RequestCorrelationTable>,
  inbound: Arc<RequestCorrelationTable>,
  /// Where the next inbound id search starts.
  next_inbound: AtomicU64,
  remote: Arc<dyn RemoteAccess>,
  handler: Arc<dyn WindowQueryHandler>,
  /// Ids minted here and still pending. `None` once torn down.
  tracked: Mutex<Option<HashSet<(Direction, RequestId)>>>,
  me: Weak<ElementQueryGateway>,
}

impl std::fmt::Debug for ElementQueryGateway {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ElementQueryGateway")
      .field("partition", &self.partition)
      .field("pending", &self.pending())
      .finish_non_exhaustive()
  }
}

impl ElementQueryGateway {
  pub(crate) fn new(
    partition: Partition,
    table: Arc<RequestCorrelationTable>,
    inbound: Arc<RequestCorrelationTable>,
    remote: Arc<dyn RemoteAccess>,
    handler: Arc<dyn WindowQueryHandler>,
  ) -> Arc<Self> {
    Arc::new_cyclic(|me| Self {
      partition,
      table,
      inbound,
      next_inbound: AtomicU64::new(0),
      remote,
      handler,
      tracked: Mutex::new(Some(HashSet::new())),
      me: me.clone(),
    })
  }

  /// The `(window, tree)` this gateway serves.
  pub const fn partition(&self) -> Partition {
    self.partition
  }

  /// Shorthand for `partition().window`.
  pub fn window(&self) -> WindowId {
    self.partition.window
  }

  /// Whether the gateway was unregistered. Torn down gateways refuse queries.
  pub fn is_torn_down(&self) -> bool {
    self.tracked.lock().is_none()
  }

  /// Number of ids this gateway minted that are still pending.
  pub fn pending(&self) -> usize {
    self.tracked.lock().as_ref().map_or(0, HashSet::len)
  }

  fn table(&self, direction: Direction) -> &RequestCorrelationTable {
    match direction {
      Direction::Outbound => &self.table,
      Direction::Inbound => &self.inbound,
    }
  }

  /// Mint `request` and remember it. `None` (and nothing minted) once torn
  /// down, or when every inbound id of the partition is in use.
  fn track(&self, direction: Direction, request: PendingRequest) -> Option<RequestId> {
    if self.is_torn_down() {
      return None;
    }
    // Minting may run a superseded callback; keep `tracked` unlocked for it.
    let id = match direction {
      Direction::Outbound => self.table.mint(self.partition, request),
      Direction::Inbound => {
        let hint = self.next_inbound.fetch_add(1, Ordering::Relaxed);
        let Some(id) = self.inbound.mint_vacant(self.partition, hint, request) else {
          log::warn!("[gateway] {:?} has no free inbound id", self.partition);
          return None;
        };
        id
      }
    };
    if let Some(set) = self.tracked.lock().as_mut() {
      set.insert((direction, id));
      return Some(id);
    }
    // Torn down while minting.
    self.table(direction).erase(id);
    None
  }

  fn fail(&self, id: RequestId, failure: QueryFailure) {
    self.deliver(id, QueryResult::Failed(failure));
  }

  fn complete(&self, direction: Direction, id: RequestId, result: QueryResult) {
    if id.partition() != self.partition {
      log::debug!("[gateway] {id} does not belong to {:?}", self.partition);
      return;
    }
    if let Some(set) = self.tracked.lock().as_mut() {
      set.remove(&(direction, id));
    }
    if let Some(pending) = self.table(direction).resolve(id) {
      pending.complete(result);
    }
  }

  /// Send `query` about this window to the service.
  ///
  /// The answer arrives on `caller.callback` under `caller.id`. Without a
  /// live service, or after teardown, the callback gets
  /// `Failed(ServiceUnavailable)` straight away. Returns the correlated id
  /// when the query was dispatched.
  pub fn issue(&self, query: ElementQuery, caller: Caller) -> Option<RequestId> {
    let kind = query.kind();
    let callback = Arc::clone(&caller.callback);
    let pending = PendingRequest::new(caller.id, callback, kind, caller.redact);
    let Some(id) = self.track(Direction::Outbound, pending) else {
      log::debug!("[gateway] {:?} torn down, refusing {kind:?}", self.partition);
      caller
        .callback
        .on_result(caller.id, QueryResult::Failed(QueryFailure::ServiceUnavailable));
      return None;
    };

    let Some(remote) = self.remote.ensure_connected() else {
      self.fail(id, QueryFailure::ServiceUnavailable);
      return None;
    };
    let Some(reply) = self.me.upgrade() else {
      self.fail(id, QueryFailure::ServiceUnavailable);
      return None;
    };

    match remote.dispatch_query(self.partition, query, id, reply as Arc<dyn QueryCallback>) {
      Ok(()) => Some(id),
      Err(e) => {
        log::warn!("[gateway] dispatch of {id} failed: {e}");
        self.fail(id, QueryFailure::ServiceUnavailable);
        None
      }
    }
  }

  /// Elements related to `element` per `mode`.
  pub fn search_by_id(
    &self,
    element: ElementId,
    mode: SearchMode,
    caller: Caller,
  ) -> Option<RequestId> {
    self.issue(ElementQuery::SearchById { element, mode }, caller)
  }

  /// Elements under `element` whose text contains `text`.
  pub fn search_by_text(
    &self,
    element: ElementId,
    text: impl Into<String>,
    caller: Caller,
  ) -> Option<RequestId> {
    let text = text.into();
    self.issue(ElementQuery::SearchByText { element, text }, caller)
  }

  /// The element holding `focus` under `element`.
  pub fn find_focus(
    &self,
    element: ElementId,
    focus: FocusType,
    caller: Caller,
  ) -> Option<RequestId> {
    self.issue(ElementQuery::FindFocus { element, focus }, caller)
  }

  /// The next focusable element from `element` in `direction`.
  pub fn focus_move(
    &self,
    element: ElementId,
    direction: FocusDirection,
    caller: Caller,
  ) -> Option<RequestId> {
    self.issue(ElementQuery::FocusMove { element, direction }, caller)
  }

  /// Run `action` on `element`. Answered with `Action(succeeded)`.
  pub fn execute_action(
    &self,
    element: ElementId,
    action: ActionType,
    arguments: impl IntoIterator<Item = (String, String)>,
    caller: Caller,
  ) -> Option<RequestId> {
    let arguments = arguments.into_iter().collect();
    self.issue(
      ElementQuery::ExecuteAction {
        element,
        action,
        arguments,
      },
      caller,
    )
  }

  /// Text cursor offset inside `element`.
  pub fn cursor_position(&self, element: ElementId, caller: Caller) -> Option<RequestId> {
    self.issue(ElementQuery::CursorPosition { element }, caller)
  }

  /// Elements under `element` with `property` equal to `value`.
  pub fn search_by_property(
    &self,
    element: ElementId,
    property: impl Into<String>,
    value: impl Into<String>,
    caller: Caller,
  ) -> Option<RequestId> {
    let query = ElementQuery::SearchByProperty {
      element,
      property: property.into(),
      value: value.into(),
    };
    self.issue(query, caller)
  }

  /// Complete the outbound query `id` with the service's `result`. Unknown,
  /// foreign or already-resolved ids are ignored.
  pub fn deliver(&self, id: RequestId, result: QueryResult) {
    self.complete(Direction::Outbound, id, result);
  }

  /// Erase every pending id this gateway minted. Idempotent.
  pub fn teardown(&self) {
    let Some(ids) = self.tracked.lock().take() else {
      return;
    };
    let erased = ids
      .into_iter()
      .filter(|(direction, id)| self.table(*direction).erase(*id))
      .count();
    if erased > 0 {
      log::debug!(
        "[gateway] {:?} torn down, erased {erased} pending request(s)",
        self.partition
      );
    }
  }
}

impl Drop for ElementQueryGateway {
  fn drop(&mut self) {
    self.teardown();
  }
}

impl QueryCallback for ElementQueryGateway {
  fn on_result(&self, request: RequestId, result: QueryResult) {
    self.deliver(request, result);
  }
}

impl ElementOperator for ElementQueryGateway {
  fn execute(
    &self,
    query: ElementQuery,
    request: RequestId,
    reply: Arc<dyn QueryCallback>,
    redact: bool,
  ) {
    // Keyed locally; `request` is only echoed back with the answer.
    let pending = PendingRequest::new(request, Arc::clone(&reply), query.kind(), redact);
    let Some(id) = self.track(Direction::Inbound, pending) else {
      reply.on_result(request, QueryResult::Failed(QueryFailure::Rejected));
      return;
    };

    let responder = Responder {
      gateway: Some(Weak::clone(&self.me)),
      request: id,
    };
    let handler = Arc::clone(&self.handler);
    if catch_unwind(AssertUnwindSafe(move || handler.handle(query, responder))).is_err() {
      // The responder was dropped during unwinding and already failed the request.
      log::error!("[gateway] query handler for {:?} panicked", self.partition);
    }
  }
}

/// Every registered gateway, keyed by partition.
pub struct WindowGateways {
  table: Arc<RequestCorrelationTable>,
  inbound: Arc<RequestCorrelationTable>,
  remote: Arc<dyn RemoteAccess>,
  gateways: Mutex<HashMap<Partition, Arc<ElementQueryGateway>>>,
}

impl std::fmt::Debug for WindowGateways {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WindowGateways")
      .field("registered", &self.gateways.lock().len())
      .finish_non_exhaustive()
  }
}

impl WindowGateways {
  /// Outbound queries mint into `table`; inbound ones get a table of their own.
  pub fn new(table: Arc<RequestCorrelationTable>, remote: Arc<dyn RemoteAccess>) -> Self {
    Self {
      table,
      inbound: Arc::new(RequestCorrelationTable::new()),
      remote,
      gateways: Mutex::new(HashMap::new()),
    }
  }

  /// Service queries handed to a local handler and not yet answered.
  pub fn pending_inbound(&self) -> usize {
    self.inbound.len()
  }

  /// Register `handler` as the query endpoint of `(window, tree)`.
  pub fn register(
    &self,
    window: WindowId,
    tree: TreeId,
    handler: Arc<dyn WindowQueryHandler>,
  ) -> AllinkResult<Arc<ElementQueryGateway>> {
    if !window.is_valid() {
      return Err(AllinkError::invalid(format!("window id {window} out of range")));
    }
    if !tree.is_valid() {
      return Err(AllinkError::invalid(format!("tree id {tree} out of range")));
    }
    let partition = Partition::new(window, tree);

    let Some(remote) = self.remote.ensure_connected() else {
      return Err(AllinkError::ServiceUnavailable);
    };

    let gateway = ElementQueryGateway::new(
      partition,
      Arc::clone(&self.table),
      Arc::clone(&self.inbound),
      Arc::clone(&self.remote),
      handler,
    );
    {
      let mut gateways = self.gateways.lock();
      if gateways.contains_key(&partition) {
        return Err(AllinkError::AlreadyRegistered { window, tree });
      }
      gateways.insert(partition, Arc::clone(&gateway));
    }

    let operator = Arc::clone(&gateway) as Arc<dyn ElementOperator>;
    if let Err(e) = remote.register_element_operator(partition, operator) {
      log::warn!("[gateway] registering {partition:?} failed: {e}");
      self.forget(partition, &gateway);
      gateway.teardown();
      return Err(e.surfaced());
    }

    log::debug!("[gateway] registered {partition:?}");
    Ok(gateway)
  }

  /// Remove a gateway unless it was replaced meanwhile.
  fn forget(&self, partition: Partition, gateway: &Arc<ElementQueryGateway>) {
    let mut gateways = self.gateways.lock();
    if gateways
      .get(&partition)
      .is_some_and(|g| Arc::ptr_eq(g, gateway))
    {
      gateways.remove(&partition);
    }
  }

  /// Unregister one tree of `window`, or every tree when `tree` is `None`.
  ///
  /// Local state is torn down even when the service cannot be told.
  pub fn unregister(&self, window: WindowId, tree: Option<TreeId>) -> AllinkResult<()> {
    let removed: Vec<Arc<ElementQueryGateway>> = {
      let mut gateways = self.gateways.lock();
      let partitions: Vec<Partition> = gateways
        .keys()
        .filter(|p| p.window == window && tree.is_none_or(|t| p.tree == t))
        .copied()
        .collect();
      partitions
        .iter()
        .filter_map(|p| gateways.remove(p))
        .collect()
    };
    if removed.is_empty() {
      return Err(AllinkError::NotRegistered { window });
    }

    for gateway in &removed {
      gateway.teardown();
    }

    let Some(remote) = self.remote.current() else {
      log::debug!("[gateway] window {window} torn down locally, service unavailable");
      return Err(AllinkError::ServiceUnavailable);
    };
    let mut result = Ok(());
    for gateway in &removed {
      if let Err(e) = remote.deregister_element_operator(gateway.partition()) {
        log::warn!("[gateway] deregistering {:?} failed: {e}", gateway.partition());
        result = Err(e.surfaced());
      }
    }
    result
  }

  /// The gateway registered for `(window, tree)`, if any.
  pub fn get(&self, window: WindowId, tree: TreeId) -> Option<Arc<ElementQueryGateway>> {
    self
      .gateways
      .lock()
      .get(&Partition::new(window, tree))
      .cloned()
  }

  /// Number of registered gateways.
  pub fn len(&self) -> usize {
    self.gateways.lock().len()
  }

  /// Whether no gateway is registered.
  pub fn is_empty(&self) -> bool {
    self.gateways.lock().is_empty()
  }

  /// Tear down every gateway and sweep anything still pending in their partitions.
  pub fn shutdown(&self) {
    let drained: Vec<_> = self.gateways.lock().drain().collect();
    let remote = self.remote.current();
    for (partition, gateway) in drained {
      gateway.teardown();
      let swept =
        self.table.erase_partition(partition) + self.inbound.erase_partition(partition);
      if swept > 0 {
        log::debug!("[gateway] swept {swept} late request(s) for {partition:?}");
      }
      if let Some(remote) = &remote {
        if let Err(e) = remote.deregister_element_operator(partition) {
          log::debug!("[gateway] deregistering {partition:?} at shutdown failed: {e}");
        }
      }
    }
  }
}

impl ConnectionListener for WindowGateways {
  /// A new remote knows nothing about our windows; register them again.
  fn on_connected(&self, remote: &Arc<dyn RemoteService>) {
    let gateways: Vec<_> = self
      .gateways
      .lock()
      .iter()
      .map(|(p, g)| (*p, Arc::clone(g)))
      .collect();
    for (partition, gateway) in gateways {
      let operator = gateway as Arc<dyn ElementOperator>;
      if let Err(e) = remote.register_element_operator(partition, operator) {
        log::warn!("[gateway] re-registering {partition:?} failed: {e}");
      }
    }
  }
}
