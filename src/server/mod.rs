//! Async runtime for the transport.
//!
//! Drives the sans-IO [`Demultiplexer`](crate::transport::Demultiplexer)
//! from one tokio task over a UDP [`LinkSocket`].

#[allow(clippy::module_inception)]
mod server;
mod socket;

pub use server::*;
pub use socket::*;
