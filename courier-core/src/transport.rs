//! Transport layer abstraction
//!
//! This module provides the listening-side abstraction the acceptor works
//! against, so the accept loop does not care which backend produced the
//! listener.

use crate::error::Result;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

/// A bound listener that hands out accepted streams
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The stream type produced by this transport
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Accept an incoming connection
    async fn accept(&self) -> Result<(Self::Stream, SocketAddr)>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::{mpsc, Mutex};

    struct InMemory {
        incoming: Mutex<mpsc::Receiver<DuplexStream>>,
    }

    #[async_trait::async_trait]
    impl Transport for InMemory {
        type Stream = DuplexStream;

        async fn accept(&self) -> Result<(DuplexStream, SocketAddr)> {
            let stream = self
                .incoming
                .lock()
                .await
                .recv()
                .await
                .ok_or(crate::Error::Closed)?;
            Ok((stream, "127.0.0.1:40000".parse().unwrap()))
        }

        fn local_addr(&self) -> Result<SocketAddr> {
            Ok("127.0.0.1:3000".parse().unwrap())
        }
    }

    #[tokio::test]
    async fn test_transport_trait_object_free_accept() {
        let (tx, rx) = mpsc::channel(1);
        let transport = InMemory {
            incoming: Mutex::new(rx),
        };

        let (client, server) = tokio::io::duplex(64);
        tx.send(server).await.unwrap();

        let (mut accepted, peer) = transport.accept().await.unwrap();
        assert_eq!(peer.port(), 40000);

        let mut client = client;
        client.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        drop(tx);
        assert!(matches!(transport.accept().await, Err(crate::Error::Closed)));
    }
}
