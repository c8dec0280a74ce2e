//! Keywitness Daemon (keywitnessd)
//!
//! Long-running service hosting one typing-proof recorder:
//! - Unix socket listener at ~/.keywitness/keywitness.sock
//! - JSON-line messages (IpcMessage/IpcResponse)
//! - All recording flows through the single-writer recorder actor
//!
//! The daemon never persists the chain itself — storage is the caller's
//! concern; `Export` returns the proof JSON for the client to store.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod handlers;
mod server;

use keywitness_core::ipc;
use keywitness_core::recorder::{RecorderConfig, RecorderHandle};

/// Global state for the daemon
pub struct DaemonState {
    /// When the daemon started
    start_time: Instant,

    /// Shutdown signal, flipped by Ctrl+C or an IPC `Shutdown`
    shutdown: AtomicBool,

    /// Path to the keywitness home directory
    home: PathBuf,

    /// The single recorder this daemon hosts
    pub recorder: RecorderHandle,
}

impl DaemonState {
    pub fn new(home: PathBuf, config: RecorderConfig) -> Result<Self> {
        std::fs::create_dir_all(&home)?;
        Ok(Self {
            start_time: Instant::now(),
            shutdown: AtomicBool::new(false),
            home,
            recorder: RecorderHandle::spawn(config),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn socket_path(&self) -> PathBuf {
        self.home.join("keywitness.sock")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("keywitnessd=info,keywitness_core=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("keywitnessd v{} starting", env!("CARGO_PKG_VERSION"));

    let state = Arc::new(DaemonState::new(ipc::home_dir(), RecorderConfig::default())?);
    server::run(state).await
}
