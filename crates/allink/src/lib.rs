/*!
Allink - Accessibility service link

Keeps a client-side cache of the accessibility service's configuration in
sync across service restarts, and correlates element queries between windows
and the service.

```ignore
use allink::{Allink, Caller, ElementId, RequestId, TreeId, WindowId};

// Connects now if the service is ready, otherwise once it announces readiness
let allink = Allink::builder(registry, readiness).build()?;

// Cached reads never block; writes go through the service
let captions = allink.config().caption_state();     // Cached<bool>
allink.config().set_caption_state(true)?;

// Answer the service's queries about a window
let gateway = allink.register_window_query_handler(WindowId(7), TreeId::MAIN, handler)?;

// Or ask about it
gateway.search_by_text(ElementId::ROOT, "OK", Caller::new(RequestId(42), callback));

// Subscribe to events
let mut events = allink.subscribe();
while let Ok(event) = events.recv().await {
    // handle event
}

allink.shutdown();
```
*/

mod core;
pub mod platform;

mod types;
pub use types::*;

pub use crate::core::{
  AbilityListObserver, Allink, AllinkBuilder, Caller, ConfigFacade, ConfigObserver,
  ConfigObserverRegistry, ConnectionConfig, ElementQueryGateway, PendingRequest, RemoteAccess,
  RequestCorrelationTable, Responder, ServiceConnection, WindowGateways, WindowQueryHandler,
  DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_INTERVAL_MS, DEFAULT_SERVICE_ID,
  DEFAULT_START_TIMEOUT_MS,
};
