//! Built-in boot jobs

use crate::chain::{BootJob, Next};
use crate::error::BootError;
use courier_core::listener::{from_fn, Listener};
use courier_core::Cause;
use courier_server::Server;
use std::sync::Arc;
use std::thread;

/// Client of the external coordination service
///
/// `start` may complete asynchronously; the listener is told exactly once.
pub trait CoordinationClient: Send + Sync {
    /// Connect the client
    fn start(&self, listener: Arc<dyn Listener<()>>);
}

/// Starts the coordination client
#[derive(Debug)]
pub struct CoordinationBoot<C> {
    client: Arc<C>,
}

impl<C: CoordinationClient + 'static> CoordinationBoot<C> {
    /// Boot job for `client`
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }
}

impl<C: CoordinationClient + 'static> BootJob for CoordinationBoot<C> {
    fn name(&self) -> &str {
        "coordination"
    }

    fn run(&mut self, next: Next) {
        let on_failure = next.clone();
        self.client.start(Arc::new(from_fn(
            move |()| next.proceed(),
            move |cause: Cause| on_failure.abort(BootError::job("init coordination client failure", cause)),
        )));
    }
}

/// Initializes and starts a [`Server`] on its own thread
///
/// The chain continues once the server is listening. The server thread keeps
/// running until the server is stopped.
#[derive(Debug)]
pub struct ServerBoot {
    name: String,
    server: Arc<Server>,
}

impl ServerBoot {
    /// Boot job for `server`
    pub fn new(server: Arc<Server>) -> Self {
        Self {
            name: format!("server:{}", server.config().port),
            server,
        }
    }
}

impl BootJob for ServerBoot {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, next: Next) {
        let server = self.server.clone();
        let spawn_failure = next.clone();

        let spawned = thread::Builder::new()
            .name(format!("courier-boot-{}", self.name))
            .spawn(move || {
                if let Err(e) = server.init() {
                    next.abort(BootError::job("init server failure", Arc::new(e)));
                    return;
                }

                let port = server.config().port;
                let on_failure = next.clone();
                let listener = from_fn(
                    move |bound: u16| {
                        tracing::info!(port = bound, "server started");
                        next.proceed();
                    },
                    move |cause: Cause| {
                        on_failure.abort(BootError::job(format!("start server failure, port={}", port), cause));
                    },
                );

                if let Err(e) = server.start(Some(&listener)) {
                    tracing::error!(port, error = %e, "server exited with error");
                }
            });

        if let Err(e) = spawned {
            spawn_failure.abort(BootError::job(
                "spawn server thread failure",
                Arc::new(courier_core::Error::Io(e)),
            ));
        }
    }
}

/// Final job; logs that the chain completed
#[derive(Debug, Default)]
pub struct LastBoot;

impl BootJob for LastBoot {
    fn name(&self) -> &str {
        "last"
    }

    fn run(&mut self, next: Next) {
        tracing::info!("boot chain complete");
        next.proceed();
    }
}
