//! Listening socket options

use courier_core::buffer::BufferPolicy;

/// Accept backlog used by the portable backend unless configured
pub const DEFAULT_BACKLOG: u32 = 1024;

/// Smallest backlog the optimized backend will listen with
pub const OPTIMIZED_MIN_BACKLOG: u32 = 4096;

/// Options applied to the listener and inherited by accepted sockets
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Enable `SO_KEEPALIVE`
    pub keep_alive: bool,
    /// Disable Nagle on accepted sockets
    pub nodelay: bool,
    /// Enable `SO_REUSEADDR` on the listener
    pub reuse_address: bool,
    /// Accept backlog
    pub backlog: u32,
    /// Buffer policy for accepted connections; the listener itself never
    /// reads, so it has no buffers of its own
    pub child_buffers: BufferPolicy,
}

impl SocketOptions {
    /// Backlog actually used for a backend
    pub fn effective_backlog(&self, optimized: bool) -> u32 {
        if optimized {
            self.backlog.max(OPTIMIZED_MIN_BACKLOG)
        } else {
            self.backlog
        }
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            keep_alive: true,
            nodelay: true,
            reuse_address: true,
            backlog: DEFAULT_BACKLOG,
            child_buffers: BufferPolicy::default(),
        }
    }
}
