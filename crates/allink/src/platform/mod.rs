/*!
Collaborator contracts.

The link never talks to a transport directly; embedders hand it
implementations of these traits (see the `allink-service` crate for an
in-process one).
*/

mod traits;

pub use traits::{
  ElementOperator, LivenessObserver, LivenessToken, LoadObserver, QueryCallback,
  ReadinessObserver, ReadinessSignal, RemoteAbilityObserver, RemoteConfigObserver,
  RemoteService, ServiceRegistry, StartRequest, WatchToken,
};
