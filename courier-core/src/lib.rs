//! # Courier Core
//!
//! Building blocks shared by the Courier transport engine:
//!
//! - Error types and the completion-listener contract
//! - Packets and the default packet codec
//! - Connection pipelines and their assembler
//! - Pooled I/O buffers
//! - The transport abstraction used by the acceptor

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/courier-core/")]

// Core modules
pub mod buffer;
pub mod codec;
pub mod error;
pub mod listener;
pub mod packet;
pub mod pipeline;
pub mod transport;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use buffer::{BufferPolicy, BufferPool, PooledBuffer};
pub use codec::{Decoder, Encoder, PacketDecoder, PacketEncoder};
pub use error::{Cause, CodecError, ConfigError, Error, LifecycleError, Result};
pub use listener::{completion, Completion, CompletionReceiver, Listener};
pub use packet::Packet;
pub use pipeline::{assemble, Context, Handler, Pipeline, PipelineSpec};
pub use transport::Transport;
