// src/models/mod.rs
pub mod actor;
pub mod driver;
pub mod events;
pub mod geo;
pub mod ride;
pub mod rider;

pub use actor::*;
pub use driver::*;
pub use events::*;
pub use geo::*;
pub use ride::*;
pub use rider::*;
