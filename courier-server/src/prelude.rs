//! Prelude module with common imports
//!
//! This module re-exports the most commonly used types and traits
//! from the courier-server crate for ergonomic imports.

// Server types
pub use crate::config::ServerConfig;
pub use crate::server::{Server, ServerBuilder};
pub use crate::state::ServerState;

// Transport selection
pub use courier_transport_tcp::{TransportBackend, TransportPreference};

// Re-export core types
pub use courier_core::prelude::*;
