/*!
In-process accessibility service for allink.

Provides the collaborators an [`allink::Allink`] needs when the service runs
in the same process: a [`LocalRegistry`] that can start, kill and restart an
[`AccessibilityService`], a [`ReadinessFlag`] for the "configuration ready"
property, and a [`SettingsStore`] that persists configuration across
restarts.

```ignore
use allink::Allink;
use allink_service::{LocalRegistry, MemoryStore, ReadinessFlag};

let registry = LocalRegistry::new(allink::DEFAULT_SERVICE_ID, Arc::new(MemoryStore::new()));
registry.start();
let readiness = Arc::new(ReadinessFlag::new(true));

let allink = Allink::builder(registry.clone(), readiness).build()?;

// Simulate a crash; the link reconnects and re-primes its cache
registry.restart();
```
*/

mod error;
mod readiness;
mod registry;
mod service;
mod store;

pub use error::{ServiceError, ServiceResult};
pub use readiness::{ReadinessFlag, READINESS_PROPERTY};
pub use registry::LocalRegistry;
pub use service::{AccessibilityService, ENABLED_ABILITIES_KEY, INSTALLED_ABILITIES_KEY};
pub use store::{MemoryStore, ObserverToken, SettingsStore, StoreObserver};
