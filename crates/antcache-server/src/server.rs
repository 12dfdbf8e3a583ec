//! Per-connection dispatch: one cooperative task per accepted socket.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::connection;
use crate::handler::Shared;

/// Runs the accept loop, spawning a task per connection, until the
/// shutdown signal fires.
pub async fn run_per_connection(
    listener: TcpListener,
    ctx: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!(
        addr = %listener.local_addr()?,
        "per-connection server started"
    );

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = connection::handle(stream, ctx).await {
                        error!("connection error from {peer}: {e}");
                    }
                });
            }
            _ = shutdown.changed() => {
                info!("stopping accept loop");
                return Ok(());
            }
        }
    }
}
