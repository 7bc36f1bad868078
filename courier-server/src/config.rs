//! Server configuration
//!
//! This module provides configuration options for the server. A
//! [`ServerConfig`] is immutable once a [`Server`](crate::Server) has been
//! built from it.

use courier_core::buffer::BufferPolicy;
use courier_core::error::{ConfigError, Error};
use courier_core::packet::constants::{DEFAULT_MAX_FRAME_SIZE, HEARTBEAT_BYTE};
use courier_transport_tcp::options::{SocketOptions, DEFAULT_BACKLOG};
use courier_transport_tcp::{host_os_name, TransportPreference};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Builder;

/// Default graceful shutdown window
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

/// Largest body length whose first length byte cannot be mistaken for a
/// heartbeat
pub const MAX_FRAME_SIZE_LIMIT: usize = (HEARTBEAT_BYTE as usize) << 24;

/// Shared configuration callback
pub struct Hook<F: ?Sized>(Arc<F>);

impl<F: ?Sized> Hook<F> {
    /// Wrap an already shared callback
    pub fn new(f: Arc<F>) -> Self {
        Self(f)
    }
}

impl<F: ?Sized> Clone for Hook<F> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<F: ?Sized> Deref for Hook<F> {
    type Target = F;

    fn deref(&self) -> &F {
        &self.0
    }
}

impl<F: ?Sized> fmt::Debug for Hook<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hook(..)")
    }
}

/// Last word on the socket options, applied after the config fields
pub type OptionsHook = Hook<dyn Fn(&mut SocketOptions) + Send + Sync>;

/// Customizes the worker runtime before it is built
pub type RuntimeHook = Hook<dyn Fn(&mut Builder) + Send + Sync>;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listening port; `0` asks the OS for an ephemeral port
    pub port: u16,
    /// Listening interface
    pub host: IpAddr,
    /// Preferred transport backend
    pub transport: TransportPreference,
    /// OS name used for backend selection; `None` means unknown
    pub os_name: Option<String>,
    /// Worker thread count; `None` lets the runtime decide
    pub worker_threads: Option<usize>,
    /// Buffer policy for accepted connections
    pub buffer_policy: BufferPolicy,
    /// Enable TCP keep-alive on accepted sockets
    pub keep_alive: bool,
    /// Accept backlog
    pub backlog: u32,
    /// Maximum packet body size accepted by the default decoder
    pub max_frame_size: usize,
    /// How long shutdown waits for in-flight connections
    pub shutdown_grace: Duration,
    /// Adjusts socket options on every start
    pub options: Option<OptionsHook>,
    /// Adjusts the worker runtime builder on every start
    pub worker_runtime: Option<RuntimeHook>,
}

impl ServerConfig {
    /// Configuration for `port` with every other option at its default
    pub fn new(port: u16) -> Self {
        Self {
            port,
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            transport: TransportPreference::default(),
            os_name: host_os_name(),
            worker_threads: None,
            buffer_policy: BufferPolicy::default(),
            keep_alive: true,
            backlog: DEFAULT_BACKLOG,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            options: None,
            worker_runtime: None,
        }
    }

    /// Address the listener binds to
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Socket options derived from this configuration
    pub fn socket_options(&self) -> SocketOptions {
        let mut options = SocketOptions {
            keep_alive: self.keep_alive,
            backlog: self.backlog,
            child_buffers: self.buffer_policy,
            ..SocketOptions::default()
        };
        if let Some(hook) = &self.options {
            (**hook)(&mut options);
        }
        options
    }

    /// Validate the configuration
    pub fn validate(&self) -> courier_core::Result<()> {
        if self.worker_threads == Some(0) {
            return Err(Error::Config(ConfigError::Validation(
                "worker_threads must be greater than 0".to_string(),
            )));
        }

        if self.max_frame_size == 0 {
            return Err(Error::Config(ConfigError::Validation(
                "max_frame_size must be greater than 0".to_string(),
            )));
        }

        if self.max_frame_size >= MAX_FRAME_SIZE_LIMIT {
            return Err(Error::Config(ConfigError::Validation(format!(
                "max_frame_size must be less than {}",
                MAX_FRAME_SIZE_LIMIT
            ))));
        }

        if self.backlog == 0 {
            return Err(Error::Config(ConfigError::Validation(
                "backlog must be greater than 0".to_string(),
            )));
        }

        if self.buffer_policy.buffer_size() == 0 {
            return Err(Error::Config(ConfigError::Validation(
                "buffer_size must be greater than 0".to_string(),
            )));
        }

        if let BufferPolicy::Pooled { capacity: 0, .. } = self.buffer_policy {
            return Err(Error::Config(ConfigError::Validation(
                "pooled buffer capacity must be greater than 0".to_string(),
            )));
        }

        if self.shutdown_grace.is_zero() {
            return Err(Error::Config(ConfigError::Validation(
                "shutdown_grace must be greater than 0".to_string(),
            )));
        }

        Ok(())
    }
}
