//! TCP transport implementation for Courier
//!
//! Binds the listening socket for the selected backend and hands accepted
//! streams to the acceptor loop.

use crate::backend::TransportBackend;
use crate::options::SocketOptions;
use async_trait::async_trait;
use courier_core::buffer::BufferPool;
use courier_core::{transport::Transport, Error, Result};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// TCP listener bound for one server run
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    backend: TransportBackend,
    nodelay: bool,
    child_pool: BufferPool,
}

impl TcpTransport {
    /// Bind a listener on `addr` for the given backend
    ///
    /// Must be called from within a tokio runtime; the listener is registered
    /// with that runtime's reactor.
    pub async fn bind(addr: SocketAddr, backend: TransportBackend, options: &SocketOptions) -> Result<Self> {
        let listener = listen(addr, backend, options).map_err(|source| Error::Bind { addr, source })?;
        let local_addr = listener.local_addr().map_err(Error::Io)?;

        tracing::debug!(
            %local_addr,
            %backend,
            backlog = options.effective_backlog(backend.is_optimized()),
            "listener bound"
        );

        Ok(Self {
            listener,
            local_addr,
            backend,
            nodelay: options.nodelay,
            child_pool: BufferPool::new(options.child_buffers),
        })
    }

    /// Backend this listener was bound with
    pub fn backend(&self) -> TransportBackend {
        self.backend
    }

    /// Buffer pool for accepted connections
    pub fn child_pool(&self) -> &BufferPool {
        &self.child_pool
    }
}

fn listen(addr: SocketAddr, backend: TransportBackend, options: &SocketOptions) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    // Accepted sockets inherit these from the listener.
    socket.set_keepalive(options.keep_alive)?;
    socket.set_reuseaddr(options.reuse_address)?;

    if backend.is_optimized() {
        enable_reuse_port(&socket)?;
    }

    socket.bind(addr)?;
    socket.listen(options.effective_backlog(backend.is_optimized()))
}

#[cfg(target_os = "linux")]
fn enable_reuse_port(socket: &TcpSocket) -> std::io::Result<()> {
    socket.set_reuseport(true)
}

#[cfg(not(target_os = "linux"))]
fn enable_reuse_port(_socket: &TcpSocket) -> std::io::Result<()> {
    tracing::debug!("SO_REUSEPORT not applied on this platform");
    Ok(())
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await.map_err(Error::Io)?;
        if self.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
            }
        }
        Ok((stream, peer))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_bind_ephemeral_and_accept() {
        let transport = TcpTransport::bind(loopback(), TransportBackend::Portable, &SocketOptions::default())
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"ping").await.unwrap();
        });

        let (mut stream, peer) = transport.accept().await.unwrap();
        assert!(peer.ip().is_loopback());

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_error() {
        let first = TcpTransport::bind(loopback(), TransportBackend::Portable, &SocketOptions::default())
            .await
            .unwrap();
        let taken = first.local_addr().unwrap();

        let err = TcpTransport::bind(taken, TransportBackend::Portable, &SocketOptions::default())
            .await
            .unwrap_err();
        match err {
            Error::Bind { addr, .. } => assert_eq!(addr, taken),
            other => panic!("expected bind error, got {other:?}"),
        }
    }

    async fn accepted_keepalive(keep_alive: bool) -> bool {
        let options = SocketOptions {
            keep_alive,
            ..SocketOptions::default()
        };
        let transport = TcpTransport::bind(loopback(), TransportBackend::Portable, &options)
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();

        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (stream, _) = transport.accept().await.unwrap();
        let _client = client.await.unwrap();

        let socket = TcpSocket::from_std_stream(stream.into_std().unwrap());
        socket.keepalive().unwrap()
    }

    #[tokio::test]
    async fn test_accepted_socket_inherits_keep_alive() {
        assert!(accepted_keepalive(true).await);
    }

    #[tokio::test]
    async fn test_accepted_socket_without_keep_alive() {
        assert!(!accepted_keepalive(false).await);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_optimized_backend_binds() {
        let transport = TcpTransport::bind(loopback(), TransportBackend::LinuxOptimized, &SocketOptions::default())
            .await
            .unwrap();
        assert!(transport.backend().is_optimized());
        assert_eq!(transport.child_pool().outstanding(), 0);
    }
}
