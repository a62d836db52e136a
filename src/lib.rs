pub mod errors;
pub mod handlers;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

// Re-export commonly used types
pub use errors::{RideError, RideResult, ValidationError};
pub use state::{AppConfig, AppState};
