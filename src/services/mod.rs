// src/services/mod.rs
pub mod dispatch;
pub mod event_bus;
pub mod fare;
pub mod geo_index;
pub mod ride_state;
pub mod store;

pub use dispatch::{AccountOperations, DispatchCoordinator, DispatchOperations, DispatchSettings};
pub use event_bus::{EventBus, EventSink};
pub use fare::FareCalculator;
pub use geo_index::GeoIndex;
pub use ride_state::{RideStateMachine, RideTx};
pub use store::{MemoryStore, RideStore};
