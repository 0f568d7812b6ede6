//! Shared types for the Kelmah real-time channel: wire protocol, data models
//! and protocol-level errors.

pub mod models;
pub mod protocol;
pub mod error;

pub use models::*;
pub use protocol::*;
pub use error::*;
