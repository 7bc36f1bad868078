//! Server lifecycle state
//!
//! ```text
//! Created -> Initialized -> Starting -> Started -> Shutdown
//!                              |                      ^
//!                              +----------------------+  (bind failed)
//! ```
//!
//! Every edge is a single compare-and-swap, so when several threads race
//! for the same transition exactly one of them wins.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a [`Server`](crate::Server)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    /// Constructed, not yet initialized
    Created = 0,
    /// Initialized and ready to start
    Initialized = 1,
    /// Start in progress
    Starting = 2,
    /// Listening
    Started = 3,
    /// Stopped; terminal
    Shutdown = 4,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Initialized,
            2 => Self::Starting,
            3 => Self::Started,
            _ => Self::Shutdown,
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Atomic holder for [`ServerState`] exposing only the legal transitions
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// New cell in [`ServerState::Created`]
    pub fn new() -> Self {
        Self(AtomicU8::new(ServerState::Created as u8))
    }

    /// Current state
    pub fn get(&self) -> ServerState {
        ServerState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// `Created -> Initialized`
    pub fn initialize(&self) -> bool {
        self.transition(ServerState::Created, ServerState::Initialized)
    }

    /// `Initialized -> Starting`
    pub fn begin_start(&self) -> bool {
        self.transition(ServerState::Initialized, ServerState::Starting)
    }

    /// `Starting -> Started`
    pub fn mark_started(&self) -> bool {
        self.transition(ServerState::Starting, ServerState::Started)
    }

    /// `Starting -> Shutdown`, taken when a start attempt fails
    pub fn abort_start(&self) -> bool {
        self.transition(ServerState::Starting, ServerState::Shutdown)
    }

    /// `Started -> Shutdown`
    pub fn begin_stop(&self) -> bool {
        self.transition(ServerState::Started, ServerState::Shutdown)
    }

    fn transition(&self, from: ServerState, to: ServerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
