//! Server lifecycle
//!
//! A [`Server`] moves through `Created -> Initialized -> Starting -> Started
//! -> Shutdown`. [`Server::start`] binds the listener and then blocks the
//! calling thread until the listener closes; [`Server::stop`] is called from
//! another thread and blocks until both thread groups are gone.
//!
//! ```rust,no_run
//! use courier_server::prelude::*;
//! use std::sync::Arc;
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
//!     let server = Arc::new(Server::builder().port(3000).build_with_handler(|| Echo)?);
//!     server.init()?;
//!
//!     let (done, port) = completion();
//!     let runner = server.clone();
//!     let thread = std::thread::spawn(move || runner.start(Some(&done)));
//!     println!("listening on {}", port.wait().map_err(|e| Error::Other(e.to_string()))?);
//!
//!     server.stop(None)?;
//!     thread.join().map_err(|_| Error::Other("start thread panicked".into()))??;
//!     Ok(())
//! }
//! ```

use crate::config::{Hook, OptionsHook, RuntimeHook, ServerConfig};
use crate::connection;
use crate::group::EventLoopGroups;
use crate::state::{ServerState, StateCell};
use courier_core::buffer::{BufferPolicy, BufferPool};
use courier_core::error::{ConfigError, LifecycleError};
use courier_core::listener::{notify_failure, notify_success, Listener};
use courier_core::pipeline::{Context, Handler, PipelineSpec};
use courier_core::{Error, Result, Transport};
use courier_transport_tcp::{select_backend, SocketOptions, TcpTransport, TransportPreference};
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Transport server
pub struct Server {
    config: ServerConfig,
    spec: Arc<PipelineSpec>,
    state: StateCell,
    groups: Mutex<Option<EventLoopGroups>>,
    local_addr: Mutex<Option<SocketAddr>>,
    pool: Mutex<Option<BufferPool>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("pipeline", &self.spec)
            .field("state", &self.state.get())
            .field("local_addr", &*self.local_addr.lock())
            .finish()
    }
}

impl Server {
    /// Create a server from a validated configuration and pipeline recipe
    pub fn new(config: ServerConfig, spec: PipelineSpec) -> Result<Self> {
        config.validate()?;
        spec.validate()?;

        let spec = spec.max_frame_size(config.max_frame_size);
        Ok(Self {
            config,
            spec: Arc::new(spec),
            state: StateCell::new(),
            groups: Mutex::new(None),
            local_addr: Mutex::new(None),
            pool: Mutex::new(None),
        })
    }

    /// Create a server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        self.state.get()
    }

    /// Whether the server is accepting connections
    pub fn is_running(&self) -> bool {
        self.state.get() == ServerState::Started
    }

    /// Address the listener is bound to, once bound
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Bound port, or the configured port before binding
    pub fn port(&self) -> u16 {
        self.local_addr().map_or(self.config.port, |addr| addr.port())
    }

    /// Buffer pool of the current or last run
    pub fn buffer_pool(&self) -> Option<BufferPool> {
        self.pool.lock().clone()
    }

    /// Prepare the server for starting
    pub fn init(&self) -> Result<()> {
        if !self.state.initialize() {
            let err = LifecycleError::AlreadyInitialized;
            crate::log_error!("{}", err);
            return Err(Error::Lifecycle(err));
        }
        crate::log_debug!("server initialized for port {}", self.config.port);
        Ok(())
    }

    /// Bind and serve, blocking until the listener closes
    ///
    /// The listener is told the bound port as soon as the server accepts
    /// connections. When the listener closes, because [`Server::stop`] was
    /// called or the accept loop ended, the server is stopped before this
    /// returns.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::NotStartable`] if the server is not initialized or
    /// was started before; [`Error::Service`] if binding failed, in which case
    /// the thread groups are already released and the state is `Shutdown`.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async runtime.
    pub fn start(&self, listener: Option<&dyn Listener>) -> Result<()> {
        if !self.state.begin_start() {
            let err = LifecycleError::NotStartable;
            crate::log_error!("{}", err);
            notify_failure(listener, Arc::new(Error::Lifecycle(err)));
            return Err(Error::Lifecycle(err));
        }

        let _cleanup = StartCleanup { server: self };

        let (port, closed) = match self.bind() {
            Ok(bound) => bound,
            Err(e) => {
                let cause = Arc::new(e);
                let message = format!("server start exception, port={}", self.config.port);
                crate::log_error!("{}: {}", message, cause);
                notify_failure(listener, cause.clone());
                return Err(Error::service(message, cause));
            }
        };

        crate::log_info!("server started on port {}", port);
        notify_success(listener, port);

        // A dropped sender means the accept loop is gone as well.
        let _ = closed.blocking_recv();
        crate::log_info!("listener on port {} closed", port);
        Ok(())
    }

    /// Stop a started server, blocking until both thread groups are down
    ///
    /// Only one caller wins; every other caller, and any call on a server that
    /// is not running, gets [`LifecycleError::AlreadyShutdown`].
    ///
    /// # Panics
    ///
    /// Panics if called from within an async runtime.
    pub fn stop(&self, listener: Option<&dyn Listener>) -> Result<()> {
        if !self.state.begin_stop() {
            let err = LifecycleError::AlreadyShutdown;
            crate::log_warn!("{}", err);
            notify_failure(listener, Arc::new(Error::Lifecycle(err)));
            return Err(Error::Lifecycle(err));
        }

        let port = self.port();
        crate::log_info!("stopping server on port {}", port);

        let groups = self.groups.lock().take();
        if let Some(groups) = groups {
            groups.shutdown(self.config.shutdown_grace);
        }

        crate::log_info!("server on port {} stopped", port);
        notify_success(listener, port);
        Ok(())
    }

    fn bind(&self) -> Result<(u16, oneshot::Receiver<()>)> {
        let backend = select_backend(self.config.transport, self.config.os_name.as_deref());
        let addr = self.config.bind_address();
        crate::log_info!("binding {} using the {} backend", addr, backend);

        let groups = EventLoopGroups::build(self.config.worker_threads, self.config.worker_runtime.as_ref())?;
        let acceptor = groups.acceptor_handle();
        *self.groups.lock() = Some(groups);

        let transport = acceptor.block_on(TcpTransport::bind(addr, backend, &self.config.socket_options()))?;
        let local_addr = transport.local_addr()?;
        let transport_pool = transport.child_pool().clone();
        let (close_tx, close_rx) = oneshot::channel();

        *self.pool.lock() = Some(transport_pool.clone());
        *self.local_addr.lock() = Some(local_addr);

        let mut slot = self.groups.lock();
        let groups = slot.as_mut().ok_or(Error::Closed)?;
        let handoff = Handoff {
            spec: self.spec.clone(),
            pool: transport_pool,
            worker: groups.worker_handle(),
            tracker: groups.tracker(),
            worker_token: groups.worker_token(),
            accept_token: groups.accept_token(),
            local_addr,
        };

        // Handlers must never see a server that is not yet started. The slot
        // stays locked so a concurrent stop waits for the accept loop.
        self.state.mark_started();
        groups.spawn_acceptor(accept_loop(transport, handoff, close_tx));
        Ok((local_addr.port(), close_rx))
    }

    fn release_failed_start(&self) {
        if !self.state.abort_start() {
            return;
        }
        let groups = self.groups.lock().take();
        if let Some(groups) = groups {
            groups.shutdown(self.config.shutdown_grace);
        }
        crate::log_debug!("thread groups released after failed start");
    }
}

// Runs when `start` returns on any path.
struct StartCleanup<'a> {
    server: &'a Server,
}

impl Drop for StartCleanup<'_> {
    fn drop(&mut self) {
        match self.server.state.get() {
            ServerState::Starting => self.server.release_failed_start(),
            ServerState::Started => {
                let _ = self.server.stop(None);
            }
            _ => {}
        }
    }
}

struct Handoff {
    spec: Arc<PipelineSpec>,
    pool: BufferPool,
    worker: Handle,
    tracker: TaskTracker,
    worker_token: CancellationToken,
    accept_token: CancellationToken,
    local_addr: SocketAddr,
}

async fn accept_loop(transport: TcpTransport, handoff: Handoff, close_tx: oneshot::Sender<()>) {
    let mut next_id: u64 = 0;

    loop {
        let accepted = tokio::select! {
            biased;
            _ = handoff.accept_token.cancelled() => break,
            accepted = transport.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                crate::log_error!("accept error: {}", e);
                tokio::select! {
                    _ = handoff.accept_token.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => continue,
                }
            }
        };

        if handoff.worker_token.is_cancelled() {
            crate::log_debug!("dropping connection from {} during shutdown", peer);
            continue;
        }

        // Re-register the socket with the worker group's reactor.
        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(e) => {
                crate::log_warn!("failed to hand off connection from {}: {}", peer, e);
                continue;
            }
        };

        next_id += 1;
        let ctx = Context::new(next_id, peer, handoff.local_addr);
        let spec = handoff.spec.clone();
        let pool = handoff.pool.clone();
        let shutdown = handoff.worker_token.clone();
        crate::log_trace!("accepted connection #{} from {}", next_id, peer);

        handoff.tracker.spawn_on(
            async move {
                match TcpStream::from_std(stream) {
                    Ok(stream) => connection::drive(stream, ctx, spec, pool, shutdown).await,
                    Err(e) => {
                        crate::log_warn!("failed to register connection from {}: {}", peer, e);
                    }
                }
            },
            &handoff.worker,
        );
    }

    drop(transport);
    let _ = close_tx.send(());
}

/// Server builder
#[derive(Debug, Clone, Default)]
pub struct ServerBuilder {
    port: Option<u16>,
    host: Option<IpAddr>,
    transport: TransportPreference,
    os_name: Option<Option<String>>,
    worker_threads: Option<usize>,
    buffer_policy: Option<BufferPolicy>,
    keep_alive: Option<bool>,
    backlog: Option<u32>,
    max_frame_size: Option<usize>,
    shutdown_grace: Option<Duration>,
    options: Option<OptionsHook>,
    worker_runtime: Option<RuntimeHook>,
}

impl ServerBuilder {
    /// Create a new server builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Listening port; `0` picks an ephemeral port
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Listening interface
    pub fn host(mut self, host: IpAddr) -> Self {
        self.host = Some(host);
        self
    }

    /// Bind to the given address
    pub fn bind<A: ToSocketAddrs>(mut self, addr: A) -> Result<Self> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            Error::Config(ConfigError::Validation("Invalid bind address".to_string()))
        })?;
        self.host = Some(addr.ip());
        self.port = Some(addr.port());
        Ok(self)
    }

    /// Preferred transport backend
    pub fn transport(mut self, preference: TransportPreference) -> Self {
        self.transport = preference;
        self
    }

    /// Override the OS name used for backend selection
    pub fn os_name(mut self, name: impl Into<String>) -> Self {
        self.os_name = Some(Some(name.into()));
        self
    }

    /// Treat the host OS as unknown, which always selects the portable backend
    pub fn unknown_os(mut self) -> Self {
        self.os_name = Some(None);
        self
    }

    /// Worker group size
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Buffer policy for accepted connections
    pub fn buffer_policy(mut self, policy: BufferPolicy) -> Self {
        self.buffer_policy = Some(policy);
        self
    }

    /// Enable or disable TCP keep-alive
    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = Some(enabled);
        self
    }

    /// Accept backlog
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = Some(backlog);
        self
    }

    /// Maximum packet body size for the default decoder
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    /// Graceful shutdown window
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = Some(grace);
        self
    }

    /// Adjust the socket options after the other settings were applied
    ///
    /// ```rust
    /// # use courier_server::Server;
    /// let config = Server::builder()
    ///     .port(0)
    ///     .options(|options| options.nodelay = false)
    ///     .into_config()
    ///     .unwrap();
    /// assert!(!config.socket_options().nodelay);
    /// ```
    pub fn options<F>(mut self, configure: F) -> Self
    where
        F: Fn(&mut SocketOptions) + Send + Sync + 'static,
    {
        let hook: Arc<dyn Fn(&mut SocketOptions) + Send + Sync> = Arc::new(configure);
        self.options = Some(Hook::new(hook));
        self
    }

    /// Customize the worker runtime; runs after `worker_threads` is applied
    pub fn worker_runtime<F>(mut self, configure: F) -> Self
    where
        F: Fn(&mut tokio::runtime::Builder) + Send + Sync + 'static,
    {
        let hook: Arc<dyn Fn(&mut tokio::runtime::Builder) + Send + Sync> = Arc::new(configure);
        self.worker_runtime = Some(Hook::new(hook));
        self
    }

    /// Resolve the configuration without building a server
    pub fn into_config(self) -> Result<ServerConfig> {
        let port = self.port.ok_or_else(|| {
            Error::Config(ConfigError::MissingField {
                field: "port".to_string(),
            })
        })?;

        let mut config = ServerConfig::new(port);
        config.transport = self.transport;
        config.worker_threads = self.worker_threads;
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(os_name) = self.os_name {
            config.os_name = os_name;
        }
        if let Some(policy) = self.buffer_policy {
            config.buffer_policy = policy;
        }
        if let Some(keep_alive) = self.keep_alive {
            config.keep_alive = keep_alive;
        }
        if let Some(backlog) = self.backlog {
            config.backlog = backlog;
        }
        if let Some(size) = self.max_frame_size {
            config.max_frame_size = size;
        }
        if let Some(grace) = self.shutdown_grace {
            config.shutdown_grace = grace;
        }
        config.options = self.options;
        config.worker_runtime = self.worker_runtime;

        config.validate()?;
        Ok(config)
    }

    /// Build the server with a pipeline recipe
    pub fn build(self, spec: PipelineSpec) -> Result<Server> {
        Server::new(self.into_config()?, spec)
    }

    /// Build the server with the default codec and a handler factory
    pub fn build_with_handler<F, H>(self, handler: F) -> Result<Server>
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: Handler,
    {
        self.build(PipelineSpec::new(handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use courier_core::Packet;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn on_message(&mut self, ctx: &mut Context, packet: Packet) -> Result<()> {
            ctx.write(packet);
            Ok(())
        }
    }

    #[test]
    fn test_server_builder() {
        let server = ServerBuilder::new()
            .bind("127.0.0.1:8080")
            .unwrap()
            .worker_threads(2)
            .max_frame_size(1024 * 1024)
            .keep_alive(false)
            .build_with_handler(|| Echo)
            .unwrap();

        assert_eq!(server.port(), 8080);
        assert_eq!(server.state(), ServerState::Created);
        assert!(!server.config().keep_alive);
        assert!(server.local_addr().is_none());
    }

    #[test]
    fn test_builder_requires_port() {
        let err = ServerBuilder::new().build_with_handler(|| Echo).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingField { .. })));
    }

    #[test]
    fn test_builder_os_override() {
        let config = ServerBuilder::new()
            .port(0)
            .transport(TransportPreference::Optimized)
            .os_name("Linux")
            .into_config()
            .unwrap();
        assert_eq!(config.os_name.as_deref(), Some("Linux"));

        let config = ServerBuilder::new().port(0).unknown_os().into_config().unwrap();
        assert!(config.os_name.is_none());
    }

    #[test]
    fn test_builder_hooks_reach_config() {
        let config = ServerBuilder::new()
            .port(0)
            .backlog(100)
            .options(|options| options.backlog += 1)
            .worker_runtime(|builder| {
                builder.thread_stack_size(4 * 1024 * 1024);
            })
            .into_config()
            .unwrap();

        assert_eq!(config.socket_options().backlog, 101);
        assert!(config.worker_runtime.is_some());
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        assert!(ServerBuilder::new().port(0).worker_threads(0).build_with_handler(|| Echo).is_err());
        assert!(ServerBuilder::new()
            .port(0)
            .shutdown_grace(Duration::ZERO)
            .build_with_handler(|| Echo)
            .is_err());
    }

    #[test]
    fn test_init_twice_fails() {
        let server = Server::builder().port(0).build_with_handler(|| Echo).unwrap();
        server.init().unwrap();
        let err = server.init().unwrap_err();
        assert!(matches!(err, Error::Lifecycle(LifecycleError::AlreadyInitialized)));
        assert_eq!(server.state(), ServerState::Initialized);
    }

    #[test]
    fn test_start_without_init_fails() {
        let server = Server::builder().port(0).build_with_handler(|| Echo).unwrap();
        let (done, outcome) = courier_core::completion::<u16>();

        let err = server.start(Some(&done)).unwrap_err();
        assert!(matches!(err, Error::Lifecycle(LifecycleError::NotStartable)));
        assert!(outcome.wait().is_err());
        assert_eq!(server.state(), ServerState::Created);
    }

    #[test]
    fn test_stop_before_start_is_reported() {
        let server = Server::builder().port(0).build_with_handler(|| Echo).unwrap();
        server.init().unwrap();
        let (done, outcome) = courier_core::completion::<u16>();

        assert!(server.stop(Some(&done)).is_err());
        let cause = outcome.wait().unwrap_err();
        assert!(matches!(*cause, Error::Lifecycle(LifecycleError::AlreadyShutdown)));
        assert_eq!(server.state(), ServerState::Initialized);
    }
}
