//! TCP Transport for Courier
//!
//! Backend selection, listening socket options and the TCP [`Transport`]
//! implementation used by the acceptor.
//!
//! [`Transport`]: courier_core::transport::Transport

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/courier-transport-tcp/")]

pub mod backend;
pub mod options;
pub mod tcp;

// Re-export TCP transport types
pub use backend::{host_os_name, select_backend, TransportBackend, TransportPreference};
pub use options::SocketOptions;
pub use tcp::TcpTransport;

/// Prelude module
pub mod prelude {
    pub use crate::backend::{select_backend, TransportBackend, TransportPreference};
    pub use crate::options::SocketOptions;
    pub use crate::tcp::TcpTransport;
    pub use courier_core::transport::Transport;
}
