//! Admission-controlled accept loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::context::ServerContext;
use crate::session::Session;

/// Pause before re-checking the connection cap.
pub const CAP_BACKOFF: Duration = Duration::from_millis(100);

/// Accept connections until shutdown begins.
///
/// Before each accept the loop enforces the connection cap and waits for a
/// rate-limiter token. Accept errors are logged and never end the loop. The
/// listener is dropped, and the port released, when the loop returns.
pub async fn run_acceptor(listener: TcpListener, ctx: Arc<ServerContext>) {
    let shutdown = ctx.shutdown_token().clone();
    let config = ctx.config();

    loop {
        if ctx.is_shutting_down() {
            break;
        }

        let active = ctx.connections().len();
        if active >= config.max_connections {
            warn!(
                active,
                max = config.max_connections,
                "Max connections reached"
            );
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(CAP_BACKOFF) => continue,
            }
        }

        tokio::select! {
            () = shutdown.cancelled() => break,
            () = ctx.limiter().acquire() => {}
        }

        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = tokio::time::timeout(config.accept_timeout, listener.accept()) => accepted,
        };

        match accepted {
            Err(_) => continue,
            Ok(Ok((stream, peer))) => spawn_session(&ctx, stream, peer),
            Ok(Err(e)) => {
                if ctx.is_shutting_down() {
                    break;
                }
                warn!(error = %e, "Failed to accept connection");
            }
        }
    }

    drop(listener);
    info!("Listener closed");
}

fn spawn_session(ctx: &Arc<ServerContext>, stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }

    let handle = ctx.connections().register(peer);
    info!(connection_id = handle.id(), peer = %peer, "Connection accepted");

    let session = Session::new(ctx.clone(), handle);
    let (reader, writer) = stream.into_split();
    ctx.tasks().spawn(session.run(reader, writer));
}
