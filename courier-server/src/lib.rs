//! Courier Server
//!
//! Transport and lifecycle engine for long-lived push-messaging servers:
//! a one-thread acceptor group hands every accepted connection to a worker
//! group, where a freshly assembled pipeline drives it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use courier_server::prelude::*;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Handler for Echo {
//!     async fn on_message(&mut self, ctx: &mut Context, packet: Packet) -> Result<()> {
//!         ctx.write(packet);
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let server = Server::builder()
//!         .bind("0.0.0.0:3000")?
//!         .transport(TransportPreference::Optimized)
//!         .build_with_handler(|| Echo)?;
//!
//!     server.init()?;
//!     // Blocks until another thread calls `server.stop(None)`.
//!     server.start(None)
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/courier-server/")]

// Public modules
pub mod config;
pub mod connection;
pub mod logging;
pub mod server;
pub mod state;

mod group;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use config::{Hook, OptionsHook, RuntimeHook, ServerConfig};
pub use connection::{CloseReason, Connection};
pub use group::{ACCEPTOR_THREAD_NAME, WORKER_THREAD_NAME};
pub use server::{Server, ServerBuilder};
pub use state::{ServerState, StateCell};
