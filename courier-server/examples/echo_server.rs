//! Simple echo server example
//!
//! Starts a server that writes every packet back to its sender and stops it
//! on Ctrl-C.
//!
//! ```text
//! RUST_LOG=debug cargo run -p courier-server --example echo_server
//! ```

use courier_server::logging::init_logging;
use courier_server::prelude::*;
use std::sync::Arc;

struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn on_active(&mut self, ctx: &mut Context) -> Result<()> {
        println!("connection #{} from {}", ctx.id(), ctx.remote_addr());
        Ok(())
    }

    async fn on_message(&mut self, ctx: &mut Context, packet: Packet) -> Result<()> {
        if !packet.is_heartbeat() {
            ctx.write(packet);
        }
        Ok(())
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging()?;

    let server = Arc::new(
        Server::builder()
            .bind("127.0.0.1:3000")?
            .transport(TransportPreference::Optimized)
            .build_with_handler(|| Echo)?,
    );
    server.init()?;

    let stopper = server.clone();
    std::thread::spawn(move || {
        let signal = tokio::runtime::Builder::new_current_thread().enable_all().build();
        if let Ok(rt) = signal {
            let _ = rt.block_on(tokio::signal::ctrl_c());
        }
        let _ = stopper.stop(None);
    });

    let listener = from_fn(
        |port: u16| println!("echo server listening on 127.0.0.1:{}", port),
        |cause: Cause| eprintln!("echo server failed to start: {}", cause),
    );
    server.start(Some(&listener))?;
    Ok(())
}
