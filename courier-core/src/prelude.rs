//! Prelude module for Courier Core
//!
//! This module re-exports commonly used types and traits to make them
//! easily accessible for users of the library.

pub use crate::buffer::{BufferPolicy, BufferPool};
pub use crate::codec::{Decoder, Encoder, PacketDecoder, PacketEncoder};
pub use crate::error::{Cause, Error, LifecycleError, Result};
pub use crate::listener::{completion, from_fn, Listener};
pub use crate::packet::Packet;
pub use crate::pipeline::{Context, Handler, InboundStage, OutboundStage, PipelineSpec};
pub use crate::transport::Transport;

// Re-export commonly used external dependencies
pub use async_trait::async_trait;
pub use bytes::{Bytes, BytesMut};
