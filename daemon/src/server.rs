//! Unix socket server for the daemon
//!
//! One spawned task per connection; a connection carries any number of
//! JSON-line requests, answered in order. The accept loop wakes on a
//! short tick so that an IPC `Shutdown` (which only flips a flag) takes
//! effect without waiting for one more client to connect.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{error, info, warn};

use keywitness_core::ipc::{IpcMessage, IpcResponse};

use crate::{handlers, DaemonState};

/// Interval at which the accept loop re-checks the shutdown flag.
const ACCEPT_TICK: Duration = Duration::from_millis(500);

/// Run the daemon server until Ctrl+C or an IPC shutdown.
pub async fn run(state: Arc<DaemonState>) -> Result<()> {
    let socket_path = state.socket_path();

    // A socket file left by an unclean exit would block the bind.
    match std::fs::remove_file(&socket_path) {
        Ok(()) => info!("Removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let listener = UnixListener::bind(&socket_path)?;
    info!("Listening on {:?}", socket_path);

    // Ctrl+C flips the same flag the IPC Shutdown message does.
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl+C received");
                state.request_shutdown();
            }
        });
    }

    while !state.should_shutdown() {
        match tokio::time::timeout(ACCEPT_TICK, listener.accept()).await {
            Ok(Ok((stream, _addr))) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, state).await {
                        error!("Connection error: {}", e);
                    }
                });
            }
            Ok(Err(e)) => error!("Accept error: {}", e),
            // Tick elapsed with no client; loop around to re-check the flag.
            Err(_) => {}
        }
    }

    info!("Shutdown requested, stopping server");
    std::fs::remove_file(&socket_path).ok();
    info!("Daemon stopped");
    Ok(())
}

/// Answer JSON-line requests on one connection until the client hangs up.
async fn serve_connection(stream: UnixStream, state: Arc<DaemonState>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut requests = BufReader::new(reader).lines();

    while let Some(line) = requests.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<IpcMessage>(&line) {
            Ok(message) => handlers::handle_message(message, &state).await,
            Err(e) => {
                warn!("Unparseable request: {}", e);
                IpcResponse::Error(format!("Unparseable request: {}", e))
            }
        };

        let mut frame = serde_json::to_vec(&reply)?;
        frame.push(b'\n');
        writer.write_all(&frame).await?;
    }

    Ok(())
}
