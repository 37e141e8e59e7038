pub mod booking;
pub mod clock;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod fleet;
pub mod incident;
pub mod invoice;
pub mod route;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

pub use error::{ErrorKind, ItineraryError, WorkflowError};
pub use service::BookingService;
