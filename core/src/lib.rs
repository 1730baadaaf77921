//! Domain types shared by the ingestion service.
//!
//! Nothing in here performs I/O: topic strings and payload bytes go in,
//! typed sensor data or a [`MessageError`] comes out.

pub mod error;
mod messaging;
mod sensor;

pub use error::MessageError;
pub use messaging::*;
pub use sensor::*;

pub static CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
