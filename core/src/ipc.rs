//! IPC protocol and client for the Keywitness daemon
//!
//! One JSON request per line, one JSON reply per line, over a Unix
//! socket. The client is synchronous — it backs the CLI, which wants a
//! millisecond-scale round trip, not an async runtime. Liveness is probed
//! by connecting, not by checking the filesystem: a stale socket file
//! left by a crashed daemon should read as "not running", not as an I/O
//! error.

use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{AttestationToken, EventInput};
use crate::proof::{ExportedProof, Fingerprint};
use crate::recorder::{RecordReceipt, RecorderStats};
use crate::verify::{FullVerification, SampledVerification};

/// How long one request round trip may take before the socket read fails.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolve the daemon home directory: `$KEYWITNESS_HOME` or
/// `~/.keywitness`.
pub fn home_dir() -> PathBuf {
    if let Ok(home) = std::env::var("KEYWITNESS_HOME") {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".keywitness")
}

/// Default socket path under the daemon home.
pub fn socket_path() -> PathBuf {
    home_dir().join("keywitness.sock")
}

/// Request from a client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum IpcMessage {
    /// Initialize the recorder; optionally records the attestation as
    /// event #0.
    Initialize {
        fingerprint: Fingerprint,
        attestation: Option<AttestationToken>,
    },

    /// Record one event.
    Record(EventInput),

    /// Record a signed human attestation (event #0 only).
    HumanAttestation(AttestationToken),

    /// Record a pre-export attestation.
    PreExportAttestation(AttestationToken),

    /// Record a full-content snapshot.
    ContentSnapshot { content: String },

    /// Close checkpoints and build the exported proof.
    Export { final_content: String },

    /// Live recorder stats.
    Stats,

    /// Verify the live chain: full, or sampled when `sample` is set.
    Verify {
        sample: Option<usize>,
        seed: Option<u64>,
    },

    /// Health check.
    Ping,

    /// Shut the daemon down.
    Shutdown,
}

/// Response from the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum IpcResponse {
    Ok,
    Error(String),
    Receipt(RecordReceipt),
    Stats(RecorderStats),
    Proof(Box<ExportedProof>),
    FullReport(FullVerification),
    SampledReport(SampledVerification),
    Pong {
        uptime_secs: u64,
        total_events: u64,
    },
}

/// Error type for IPC operations.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Nothing is listening on the daemon socket.
    #[error("daemon not running at {0:?}")]
    NotRunning(PathBuf),

    #[error("socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The response line was missing or not valid protocol JSON.
    #[error("malformed daemon response: {0}")]
    Protocol(String),

    /// The daemon processed the request and answered with an error.
    #[error("daemon rejected the request: {0}")]
    Rejected(String),
}

/// Synchronous client for the daemon socket.
pub struct IpcClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl IpcClient {
    /// Client against the default socket path.
    pub fn new() -> Self {
        Self::at(socket_path())
    }

    /// Client against a specific socket path.
    pub fn at(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether something answers on the daemon socket right now.
    pub fn daemon_available(&self) -> bool {
        self.connect().is_ok()
    }

    fn connect(&self) -> Result<UnixStream, IpcError> {
        match UnixStream::connect(&self.socket_path) {
            Ok(stream) => {
                stream.set_read_timeout(Some(self.timeout))?;
                stream.set_write_timeout(Some(self.timeout))?;
                Ok(stream)
            }
            // No socket file, or a stale one nobody is accepting on.
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
                Err(IpcError::NotRunning(self.socket_path.clone()))
            }
            Err(e) => Err(IpcError::Io(e)),
        }
    }

    /// Send one request and decode the reply line. A daemon-side
    /// `Error` response surfaces as `IpcError::Rejected`.
    pub fn send(&self, message: &IpcMessage) -> Result<IpcResponse, IpcError> {
        let stream = self.connect()?;

        let mut request = BufWriter::new(&stream);
        serde_json::to_writer(&mut request, message)
            .map_err(|e| IpcError::Protocol(format!("encode request: {}", e)))?;
        request.write_all(b"\n")?;
        request.flush()?;
        drop(request);

        let mut line = String::new();
        let read = BufReader::new(&stream).read_line(&mut line)?;
        if read == 0 {
            return Err(IpcError::Protocol("daemon closed without replying".into()));
        }

        match serde_json::from_str(&line) {
            Ok(IpcResponse::Error(reason)) => Err(IpcError::Rejected(reason)),
            Ok(response) => Ok(response),
            Err(e) => Err(IpcError::Protocol(e.to_string())),
        }
    }

    /// Convenience: ping the daemon, returning (uptime, event count).
    pub fn ping(&self) -> Result<(u64, u64), IpcError> {
        match self.send(&IpcMessage::Ping)? {
            IpcResponse::Pong {
                uptime_secs,
                total_events,
            } => Ok((uptime_secs, total_events)),
            other => Err(IpcError::Protocol(format!(
                "unexpected reply to ping: {:?}",
                other
            ))),
        }
    }

    /// Convenience: record one event.
    pub fn record(&self, input: EventInput) -> Result<RecordReceipt, IpcError> {
        match self.send(&IpcMessage::Record(input))? {
            IpcResponse::Receipt(receipt) => Ok(receipt),
            other => Err(IpcError::Protocol(format!(
                "unexpected reply to record: {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_socket_lives_under_home() {
        let path = socket_path();
        assert!(path.ends_with("keywitness.sock"));
    }

    #[test]
    fn test_missing_socket_reads_as_not_running() {
        let client = IpcClient::at(PathBuf::from("/definitely/not/there.sock"));
        assert!(!client.daemon_available());
        match client.send(&IpcMessage::Ping) {
            Err(IpcError::NotRunning(path)) => {
                assert!(path.ends_with("there.sock"));
            }
            other => panic!("expected NotRunning, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_message_roundtrip() {
        let msg = IpcMessage::Verify {
            sample: Some(3),
            seed: Some(7),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"Verify\""));
        let parsed: IpcMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            parsed,
            IpcMessage::Verify {
                sample: Some(3),
                seed: Some(7)
            }
        ));
    }
}
