//! Connection driving
//!
//! A [`Connection`] owns one accepted stream and its assembled pipeline. It
//! runs on the worker group until the peer closes, a stage asks to close,
//! an error occurs, or the worker group is shutting down. The handler's
//! `on_inactive` runs on every one of those paths.

use courier_core::buffer::{BufferPool, PooledBuffer};
use courier_core::pipeline::{assemble, Context, Pipeline, PipelineSpec};
use courier_core::Result;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Why a connection stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed its side
    Eof,
    /// A pipeline stage requested the close
    Requested,
    /// The worker group is shutting down
    Shutdown,
}

/// One accepted connection bound to its pipeline
pub struct Connection<S> {
    stream: S,
    ctx: Context,
    pipeline: Pipeline,
    pool: BufferPool,
    shutdown: CancellationToken,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Assemble a fresh pipeline for `stream`
    pub fn new(stream: S, ctx: Context, spec: &PipelineSpec, pool: BufferPool, shutdown: CancellationToken) -> Self {
        Self {
            stream,
            ctx,
            pipeline: assemble(spec),
            pool,
            shutdown,
        }
    }

    /// Connection id
    pub fn id(&self) -> u64 {
        self.ctx.id()
    }

    /// Drive the connection to completion
    pub async fn run(mut self) -> Result<CloseReason> {
        let mut read_buf = self.pool.acquire();
        let mut write_buf = self.pool.acquire();

        let result = self.serve(&mut read_buf, &mut write_buf).await;
        self.pipeline.fire_inactive(&mut self.ctx).await;
        let _ = self.stream.shutdown().await;
        result
    }

    async fn serve(&mut self, read_buf: &mut PooledBuffer, write_buf: &mut PooledBuffer) -> Result<CloseReason> {
        self.pipeline.fire_active(&mut self.ctx, write_buf).await?;
        self.write_out(write_buf).await?;

        let buffer_size = self.pool.policy().buffer_size();
        loop {
            if self.ctx.is_close_requested() {
                return Ok(CloseReason::Requested);
            }

            read_buf.reserve(buffer_size);
            let read = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(CloseReason::Shutdown),
                read = self.stream.read_buf(&mut **read_buf) => read?,
            };

            if read == 0 {
                self.pipeline.fire_eof(&mut self.ctx, read_buf, write_buf).await?;
                self.write_out(write_buf).await?;
                return Ok(CloseReason::Eof);
            }

            self.pipeline.fire_read(&mut self.ctx, read_buf, write_buf).await?;
            self.write_out(write_buf).await?;
        }
    }

    async fn write_out(&mut self, write_buf: &mut PooledBuffer) -> Result<()> {
        if write_buf.is_empty() {
            return Ok(());
        }
        self.stream.write_all(&write_buf[..]).await?;
        self.stream.flush().await?;
        write_buf.clear();
        Ok(())
    }
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.ctx.id())
            .field("remote_addr", &self.ctx.remote_addr())
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

/// Task body run on the worker group for each accepted stream
pub(crate) async fn drive<S>(
    stream: S,
    ctx: Context,
    spec: Arc<PipelineSpec>,
    pool: BufferPool,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let id = ctx.id();
    let peer = ctx.remote_addr();

    #[cfg(feature = "metrics")]
    {
        metrics::counter!("courier_connections_opened_total").increment(1);
        metrics::gauge!("courier_connections_active").increment(1.0);
    }

    match Connection::new(stream, ctx, &spec, pool, shutdown).run().await {
        Ok(reason) => {
            crate::log_debug!("connection #{} from {} closed: {:?}", id, peer, reason);
        }
        Err(e) => {
            crate::log_warn!("connection #{} from {} failed: {}", id, peer, e);
        }
    }

    #[cfg(feature = "metrics")]
    {
        metrics::counter!("courier_connections_closed_total").increment(1);
        metrics::gauge!("courier_connections_active").decrement(1.0);
    }
}
