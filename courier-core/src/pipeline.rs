//! Connection pipelines
//!
//! Every accepted connection gets its own [`Pipeline`], assembled from a
//! shared [`PipelineSpec`] by [`assemble`]. The three core stages are always
//! installed in the same order:
//!
//! ```text
//! decoder -> encoder -> handler
//! ```
//!
//! Inbound bytes go through the decoder, then through any inserted inbound
//! stages, then reach the handler. Packets the handler writes go through any
//! inserted outbound stages and then the encoder. Inserted stages never move
//! the core three.

use crate::codec::{Decoder, Encoder, PacketDecoder, PacketEncoder};
use crate::error::{CodecError, ConfigError, Result};
use crate::packet::Packet;
use async_trait::async_trait;
use bytes::BytesMut;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Name of the decoder stage
pub const DECODER: &str = "decoder";
/// Name of the encoder stage
pub const ENCODER: &str = "encoder";
/// Name of the handler stage
pub const HANDLER: &str = "handler";

/// Application handler, the last inbound stage
///
/// One instance is created per connection, so implementations may keep
/// per-connection state in `self`.
#[async_trait]
pub trait Handler: Send + 'static {
    /// Connection became active
    async fn on_active(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    /// A decoded packet arrived
    async fn on_message(&mut self, ctx: &mut Context, packet: Packet) -> Result<()>;

    /// Connection is going away; runs on every close path
    async fn on_inactive(&mut self, _ctx: &mut Context) {}
}

/// Stage inserted between the decoder and the handler
pub trait InboundStage: Send + 'static {
    /// Inspect or transform a decoded packet; `None` swallows it
    fn on_inbound(&mut self, ctx: &mut Context, packet: Packet) -> Option<Packet>;
}

/// Stage inserted between the handler and the encoder
pub trait OutboundStage: Send + 'static {
    /// Inspect or transform an outbound packet; `None` drops it
    fn on_outbound(&mut self, ctx: &mut Context, packet: Packet) -> Option<Packet>;
}

/// Per-connection context handed to every stage
#[derive(Debug)]
pub struct Context {
    id: u64,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    outbound: Vec<Packet>,
    close_requested: bool,
}

impl Context {
    /// Create a context for a connection
    pub fn new(id: u64, remote_addr: SocketAddr, local_addr: SocketAddr) -> Self {
        Self {
            id,
            remote_addr,
            local_addr,
            outbound: Vec::new(),
            close_requested: false,
        }
    }

    /// Connection identifier, unique per server run
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Local address the connection was accepted on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue a packet for the encoder
    pub fn write(&mut self, packet: Packet) {
        self.outbound.push(packet);
    }

    /// Close the connection after pending writes are flushed
    pub fn close(&mut self) {
        self.close_requested = true;
    }

    /// Whether a stage asked to close the connection
    pub fn is_close_requested(&self) -> bool {
        self.close_requested
    }

    /// Number of packets waiting for the encoder
    pub fn pending_writes(&self) -> usize {
        self.outbound.len()
    }
}

type DecoderFactory = Arc<dyn Fn() -> Box<dyn Decoder> + Send + Sync>;
type EncoderFactory = Arc<dyn Fn() -> Box<dyn Encoder> + Send + Sync>;
type HandlerFactory = Arc<dyn Fn() -> Box<dyn Handler> + Send + Sync>;

#[derive(Clone)]
enum StageFactory {
    Inbound(Arc<dyn Fn() -> Box<dyn InboundStage> + Send + Sync>),
    Outbound(Arc<dyn Fn() -> Box<dyn OutboundStage> + Send + Sync>),
}

#[derive(Clone)]
struct StageSpec {
    name: String,
    factory: StageFactory,
}

/// Recipe for building a connection's pipeline
///
/// The handler factory is the only required part; decoder and encoder
/// default to [`PacketDecoder`] and [`PacketEncoder`].
#[derive(Clone)]
pub struct PipelineSpec {
    decoder: DecoderFactory,
    encoder: EncoderFactory,
    handler: HandlerFactory,
    stages: Vec<StageSpec>,
    custom_decoder: bool,
}

impl PipelineSpec {
    /// Create a spec with the default codec and the given handler factory
    pub fn new<F, H>(handler: F) -> Self
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: Handler,
    {
        Self {
            decoder: Arc::new(|| Box::new(PacketDecoder::new()) as Box<dyn Decoder>),
            encoder: Arc::new(|| Box::new(PacketEncoder) as Box<dyn Encoder>),
            handler: Arc::new(move || Box::new(handler()) as Box<dyn Handler>),
            stages: Vec::new(),
            custom_decoder: false,
        }
    }

    /// Replace the decoder factory
    pub fn decoder<F, D>(mut self, factory: F) -> Self
    where
        F: Fn() -> D + Send + Sync + 'static,
        D: Decoder,
    {
        self.decoder = Arc::new(move || Box::new(factory()) as Box<dyn Decoder>);
        self.custom_decoder = true;
        self
    }

    /// Replace the encoder factory
    pub fn encoder<F, E>(mut self, factory: F) -> Self
    where
        F: Fn() -> E + Send + Sync + 'static,
        E: Encoder,
    {
        self.encoder = Arc::new(move || Box::new(factory()) as Box<dyn Encoder>);
        self
    }

    /// Insert an inbound stage, running after the decoder and earlier inserts
    pub fn inbound<F, S>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: InboundStage,
    {
        self.stages.push(StageSpec {
            name: name.into(),
            factory: StageFactory::Inbound(Arc::new(move || {
                Box::new(factory()) as Box<dyn InboundStage>
            })),
        });
        self
    }

    /// Insert an outbound stage, running after the handler and earlier inserts
    pub fn outbound<F, S>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: OutboundStage,
    {
        self.stages.push(StageSpec {
            name: name.into(),
            factory: StageFactory::Outbound(Arc::new(move || {
                Box::new(factory()) as Box<dyn OutboundStage>
            })),
        });
        self
    }

    /// Apply a frame limit to the default decoder; custom decoders are left alone
    pub fn max_frame_size(mut self, max_frame_size: usize) -> Self {
        if !self.custom_decoder {
            self.decoder = Arc::new(move || {
                Box::new(PacketDecoder::with_max_frame_size(max_frame_size)) as Box<dyn Decoder>
            });
        }
        self
    }

    /// Stage names in pipeline order
    pub fn names(&self) -> Vec<&str> {
        let mut names = vec![DECODER, ENCODER];
        names.extend(self.stages.iter().map(|stage| stage.name.as_str()));
        names.push(HANDLER);
        names
    }

    /// Reject inserted stages that reuse a reserved or duplicate name
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let mut seen: Vec<&str> = vec![DECODER, ENCODER, HANDLER];
        for stage in &self.stages {
            if stage.name.is_empty() {
                return Err(ConfigError::Validation(
                    "pipeline stage name must not be empty".to_string(),
                ));
            }
            if seen.contains(&stage.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "pipeline stage".to_string(),
                    value: stage.name.clone(),
                });
            }
            seen.push(&stage.name);
        }
        Ok(())
    }
}

impl fmt::Debug for PipelineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineSpec")
            .field("stages", &self.names())
            .field("custom_decoder", &self.custom_decoder)
            .finish()
    }
}

/// Build a fresh pipeline for one connection
pub fn assemble(spec: &PipelineSpec) -> Pipeline {
    let mut inbound = Vec::new();
    let mut outbound = Vec::new();
    for stage in &spec.stages {
        match &stage.factory {
            StageFactory::Inbound(factory) => inbound.push((stage.name.clone(), factory())),
            StageFactory::Outbound(factory) => outbound.push((stage.name.clone(), factory())),
        }
    }

    Pipeline {
        names: spec.names().into_iter().map(str::to_string).collect(),
        decoder: (spec.decoder)(),
        encoder: (spec.encoder)(),
        inbound,
        outbound,
        handler: (spec.handler)(),
    }
}

/// A connection's assembled stages
pub struct Pipeline {
    names: Vec<String>,
    decoder: Box<dyn Decoder>,
    encoder: Box<dyn Encoder>,
    inbound: Vec<(String, Box<dyn InboundStage>)>,
    outbound: Vec<(String, Box<dyn OutboundStage>)>,
    handler: Box<dyn Handler>,
}

impl Pipeline {
    /// Stage names in pipeline order
    pub fn names(&self) -> Vec<&str> {
        self.names.iter().map(String::as_str).collect()
    }

    /// Notify the handler that the connection is active, then flush its writes
    pub async fn fire_active(&mut self, ctx: &mut Context, dst: &mut BytesMut) -> Result<()> {
        self.handler.on_active(ctx).await?;
        self.flush(ctx, dst)?;
        Ok(())
    }

    /// Decode every complete frame in `src` and run it through the pipeline
    ///
    /// Encoded replies are appended to `dst`. Returns the number of packets
    /// delivered to the handler.
    pub async fn fire_read(
        &mut self,
        ctx: &mut Context,
        src: &mut BytesMut,
        dst: &mut BytesMut,
    ) -> Result<usize> {
        let mut delivered = 0;
        while !ctx.is_close_requested() {
            let Some(packet) = self.decoder.decode(src)? else {
                break;
            };
            if self.dispatch(ctx, packet, dst).await? {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Handle end of stream; leftover bytes are a truncated frame
    pub async fn fire_eof(
        &mut self,
        ctx: &mut Context,
        src: &mut BytesMut,
        dst: &mut BytesMut,
    ) -> Result<()> {
        while let Some(packet) = self.decoder.decode_eof(src)? {
            self.dispatch(ctx, packet, dst).await?;
        }
        Ok(())
    }

    /// Notify the handler that the connection is gone
    pub async fn fire_inactive(&mut self, ctx: &mut Context) {
        self.handler.on_inactive(ctx).await;
    }

    /// Push queued writes through outbound stages and the encoder
    pub fn flush(&mut self, ctx: &mut Context, dst: &mut BytesMut) -> std::result::Result<usize, CodecError> {
        let pending = std::mem::take(&mut ctx.outbound);
        let mut written = 0;
        'packets: for packet in pending {
            let mut packet = packet;
            for (_, stage) in self.outbound.iter_mut() {
                match stage.on_outbound(ctx, packet) {
                    Some(next) => packet = next,
                    None => continue 'packets,
                }
            }
            self.encoder.encode(packet, dst)?;
            written += 1;
        }
        Ok(written)
    }

    async fn dispatch(&mut self, ctx: &mut Context, packet: Packet, dst: &mut BytesMut) -> Result<bool> {
        let mut packet = packet;
        for (_, stage) in self.inbound.iter_mut() {
            match stage.on_inbound(ctx, packet) {
                Some(next) => packet = next,
                None => return Ok(false),
            }
        }
        self.handler.on_message(ctx, packet).await?;
        self.flush(ctx, dst)?;
        Ok(true)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use bytes::Bytes;
    use parking_lot::Mutex;

    type Trace = Arc<Mutex<Vec<String>>>;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn on_message(&mut self, ctx: &mut Context, packet: Packet) -> Result<()> {
            ctx.write(packet);
            Ok(())
        }
    }

    struct TracingDecoder(Trace, PacketDecoder);

    impl Decoder for TracingDecoder {
        fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Packet>, CodecError> {
            let packet = self.1.decode(src)?;
            if packet.is_some() {
                self.0.lock().push(DECODER.to_string());
            }
            Ok(packet)
        }
    }

    struct TracingEncoder(Trace);

    impl Encoder for TracingEncoder {
        fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> std::result::Result<(), CodecError> {
            self.0.lock().push(ENCODER.to_string());
            PacketEncoder.encode(packet, dst)
        }
    }

    struct TracingHandler(Trace);

    #[async_trait]
    impl Handler for TracingHandler {
        async fn on_message(&mut self, ctx: &mut Context, packet: Packet) -> Result<()> {
            self.0.lock().push(HANDLER.to_string());
            ctx.write(packet);
            Ok(())
        }
    }

    struct Marker(Trace, &'static str);

    impl InboundStage for Marker {
        fn on_inbound(&mut self, _ctx: &mut Context, packet: Packet) -> Option<Packet> {
            self.0.lock().push(self.1.to_string());
            Some(packet)
        }
    }

    impl OutboundStage for Marker {
        fn on_outbound(&mut self, _ctx: &mut Context, packet: Packet) -> Option<Packet> {
            self.0.lock().push(self.1.to_string());
            Some(packet)
        }
    }

    struct DropAll;

    impl InboundStage for DropAll {
        fn on_inbound(&mut self, _ctx: &mut Context, _packet: Packet) -> Option<Packet> {
            None
        }
    }

    fn ctx() -> Context {
        Context::new(1, "127.0.0.1:5000".parse().unwrap(), "127.0.0.1:3000".parse().unwrap())
    }

    fn wire(packets: &[Packet]) -> BytesMut {
        let mut buf = BytesMut::new();
        for packet in packets {
            PacketEncoder.encode(packet.clone(), &mut buf).unwrap();
        }
        buf
    }

    fn traced_spec(trace: &Trace) -> PipelineSpec {
        let (d, e, h) = (trace.clone(), trace.clone(), trace.clone());
        PipelineSpec::new(move || TracingHandler(h.clone()))
            .decoder(move || TracingDecoder(d.clone(), PacketDecoder::new()))
            .encoder(move || TracingEncoder(e.clone()))
    }

    #[test]
    fn test_core_stage_order() {
        let spec = PipelineSpec::new(|| Echo);
        let pipeline = assemble(&spec);
        assert_eq!(pipeline.names(), vec![DECODER, ENCODER, HANDLER]);
    }

    #[test]
    fn test_inserted_stages_keep_core_order() {
        let trace: Trace = Arc::default();
        let (a, b) = (trace.clone(), trace.clone());
        let spec = PipelineSpec::new(|| Echo)
            .inbound("auth", move || Marker(a.clone(), "auth"))
            .outbound("stats", move || Marker(b.clone(), "stats"));

        assert!(spec.validate().is_ok());
        assert_eq!(
            assemble(&spec).names(),
            vec![DECODER, ENCODER, "auth", "stats", HANDLER]
        );
    }

    #[test]
    fn test_reserved_and_duplicate_names_rejected() {
        let reserved = PipelineSpec::new(|| Echo).inbound(HANDLER, || DropAll);
        assert!(reserved.validate().is_err());

        let duplicate = PipelineSpec::new(|| Echo)
            .inbound("filter", || DropAll)
            .inbound("filter", || DropAll);
        assert!(duplicate.validate().is_err());
    }

    #[tokio::test]
    async fn test_decoder_runs_before_handler_before_encoder() {
        let trace: Trace = Arc::default();
        let mut pipeline = assemble(&traced_spec(&trace));
        let mut ctx = ctx();
        let mut src = wire(&[Packet::new(1, &b"ping"[..])]);
        let mut dst = BytesMut::new();

        let delivered = pipeline.fire_read(&mut ctx, &mut src, &mut dst).await.unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(*trace.lock(), vec![DECODER, HANDLER, ENCODER]);
        let echoed = PacketDecoder::new().decode(&mut dst).unwrap().unwrap();
        assert_eq!(echoed.body, Bytes::from_static(b"ping"));
    }

    #[tokio::test]
    async fn test_marker_stages_run_in_direction_order() {
        let trace: Trace = Arc::default();
        let (i1, i2, o1) = (trace.clone(), trace.clone(), trace.clone());
        let spec = traced_spec(&trace)
            .inbound("in-1", move || Marker(i1.clone(), "in-1"))
            .outbound("out-1", move || Marker(o1.clone(), "out-1"))
            .inbound("in-2", move || Marker(i2.clone(), "in-2"));
        let mut pipeline = assemble(&spec);
        let mut ctx = ctx();
        let mut src = wire(&[Packet::new(1, &b"a"[..])]);
        let mut dst = BytesMut::new();

        pipeline.fire_read(&mut ctx, &mut src, &mut dst).await.unwrap();

        assert_eq!(
            *trace.lock(),
            vec![DECODER, "in-1", "in-2", HANDLER, "out-1", ENCODER]
        );
    }

    #[tokio::test]
    async fn test_swallowing_stage_skips_handler() {
        let trace: Trace = Arc::default();
        let spec = traced_spec(&trace).inbound("drop", || DropAll);
        let mut pipeline = assemble(&spec);
        let mut ctx = ctx();
        let mut src = wire(&[Packet::new(1, &b"a"[..]), Packet::new(2, &b"b"[..])]);
        let mut dst = BytesMut::new();

        let delivered = pipeline.fire_read(&mut ctx, &mut src, &mut dst).await.unwrap();

        assert_eq!(delivered, 0);
        assert!(dst.is_empty());
        assert!(src.is_empty());
        assert_eq!(*trace.lock(), vec![DECODER, DECODER]);
    }

    #[tokio::test]
    async fn test_each_connection_gets_its_own_handler() {
        struct Counter(u32);

        #[async_trait]
        impl Handler for Counter {
            async fn on_message(&mut self, ctx: &mut Context, _packet: Packet) -> Result<()> {
                self.0 += 1;
                ctx.write(Packet::new(0, self.0.to_be_bytes().to_vec()));
                Ok(())
            }
        }

        let spec = PipelineSpec::new(|| Counter(0));
        let mut first = assemble(&spec);
        let mut second = assemble(&spec);
        let mut dst = BytesMut::new();

        first
            .fire_read(&mut ctx(), &mut wire(&[Packet::new(1, &b"x"[..]), Packet::new(1, &b"y"[..])]), &mut dst)
            .await
            .unwrap();
        dst.clear();
        second
            .fire_read(&mut ctx(), &mut wire(&[Packet::new(1, &b"z"[..])]), &mut dst)
            .await
            .unwrap();

        let reply = PacketDecoder::new().decode(&mut dst).unwrap().unwrap();
        assert_eq!(reply.body.as_ref(), &1u32.to_be_bytes());
    }

    #[tokio::test]
    async fn test_close_request_stops_decoding() {
        struct CloseAfterFirst;

        #[async_trait]
        impl Handler for CloseAfterFirst {
            async fn on_message(&mut self, ctx: &mut Context, _packet: Packet) -> Result<()> {
                ctx.close();
                Ok(())
            }
        }

        let mut pipeline = assemble(&PipelineSpec::new(|| CloseAfterFirst));
        let mut ctx = ctx();
        let mut src = wire(&[Packet::new(1, &b"a"[..]), Packet::new(2, &b"b"[..])]);
        let mut dst = BytesMut::new();

        let delivered = pipeline.fire_read(&mut ctx, &mut src, &mut dst).await.unwrap();
        assert_eq!(delivered, 1);
        assert!(ctx.is_close_requested());
        assert!(!src.is_empty());
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        struct Failing;

        #[async_trait]
        impl Handler for Failing {
            async fn on_message(&mut self, _ctx: &mut Context, _packet: Packet) -> Result<()> {
                Err(Error::Handler("boom".to_string()))
            }
        }

        let mut pipeline = assemble(&PipelineSpec::new(|| Failing));
        let mut src = wire(&[Packet::new(1, &b"a"[..])]);
        let err = pipeline
            .fire_read(&mut ctx(), &mut src, &mut BytesMut::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Handler(_)));
    }

    #[tokio::test]
    async fn test_eof_with_partial_frame_is_an_error() {
        let mut pipeline = assemble(&PipelineSpec::new(|| Echo));
        let mut src = wire(&[Packet::new(1, &b"abcdef"[..])]);
        src.truncate(src.len() - 2);

        let err = pipeline
            .fire_eof(&mut ctx(), &mut src, &mut BytesMut::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Codec(CodecError::Truncated { .. })));
    }
}
