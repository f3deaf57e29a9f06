//! Core constants, error types and collaborator traits.

pub mod constants;
mod error;
mod traits;

pub use error::{TransportError, TransportResult};
pub use traits::{DataSink, HalfClose, Network};
