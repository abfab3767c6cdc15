pub mod api;
pub mod bridge;
pub mod config;
pub(crate) mod error;

pub use bridge::{Bridge, BridgeBuilder, CallFailure, Envelope};
pub use error::{BridgeError, Result};
