//! Courier Boot
//!
//! Runs a server's startup as an ordered chain of jobs: coordination
//! client first, then the server, then a final marker job.
//!
//! ```rust,no_run
//! use courier_boot::{BootChain, LastBoot, ServerBoot};
//! # fn server() -> std::sync::Arc<courier_server::Server> { unimplemented!() }
//!
//! let server = server();
//! BootChain::new()
//!     .then(ServerBoot::new(server.clone()))
//!     .then(LastBoot)
//!     .run()
//!     .expect("boot failed");
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/courier-boot/")]

pub mod chain;
pub mod error;
pub mod jobs;

pub use chain::{BootChain, BootJob, Next};
pub use error::{BootError, Result};
pub use jobs::{CoordinationBoot, CoordinationClient, LastBoot, ServerBoot};
