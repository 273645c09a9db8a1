//! Shared wire types for the chatline realtime protocol.

pub mod error;
pub mod events;

pub use error::*;
pub use events::*;
