//! Message handlers for the daemon

use std::sync::Arc;

use tracing::{debug, info};

use keywitness_core::ipc::{IpcMessage, IpcResponse};
use keywitness_core::verify;
use keywitness_core::Error;

use crate::DaemonState;

/// Handle an incoming IPC message
pub async fn handle_message(msg: IpcMessage, state: &Arc<DaemonState>) -> IpcResponse {
    match msg {
        IpcMessage::Ping => {
            debug!("Ping received");
            let total_events = match state.recorder.stats().await {
                Ok(stats) => stats.total_events,
                Err(_) => 0,
            };
            IpcResponse::Pong {
                uptime_secs: state.uptime_secs(),
                total_events,
            }
        }

        IpcMessage::Shutdown => {
            info!("Shutdown requested via IPC");
            state.request_shutdown();
            IpcResponse::Ok
        }

        IpcMessage::Initialize {
            fingerprint,
            attestation,
        } => match state.recorder.initialize(fingerprint, attestation).await {
            Ok(()) => IpcResponse::Ok,
            Err(e) => error_response(e),
        },

        IpcMessage::Record(input) => {
            debug!(kind = ?input.kind, "record");
            match state.recorder.record_event(input).await {
                Ok(receipt) => IpcResponse::Receipt(receipt),
                Err(e) => error_response(e),
            }
        }

        IpcMessage::HumanAttestation(token) => {
            match state.recorder.record_human_attestation(token).await {
                Ok(receipt) => IpcResponse::Receipt(receipt),
                Err(e) => error_response(e),
            }
        }

        IpcMessage::PreExportAttestation(token) => {
            match state.recorder.record_pre_export_attestation(token).await {
                Ok(receipt) => IpcResponse::Receipt(receipt),
                Err(e) => error_response(e),
            }
        }

        IpcMessage::ContentSnapshot { content } => {
            match state.recorder.record_content_snapshot(content).await {
                Ok(receipt) => IpcResponse::Receipt(receipt),
                Err(e) => error_response(e),
            }
        }

        IpcMessage::Export { final_content } => {
            info!("Export requested");
            match state.recorder.export_proof(final_content).await {
                Ok(proof) => IpcResponse::Proof(Box::new(proof)),
                Err(e) => error_response(e),
            }
        }

        IpcMessage::Stats => match state.recorder.stats().await {
            Ok(stats) => IpcResponse::Stats(stats),
            Err(e) => error_response(e),
        },

        IpcMessage::Verify { sample, seed } => {
            let (events, checkpoints) = match state.recorder.snapshot().await {
                Ok(snapshot) => snapshot,
                Err(e) => return error_response(e),
            };
            info!(events = events.len(), ?sample, "verify requested");

            // Recomputing PoSW for a long chain takes real time; keep it
            // off the async workers.
            let report = tokio::task::spawn_blocking(move || match sample {
                Some(count) => Verdict::Sampled(verify::verify_sampled(
                    &events,
                    &checkpoints,
                    count,
                    seed,
                )),
                None => Verdict::Full(verify::verify_full(&events)),
            })
            .await;

            match report {
                Ok(Verdict::Full(report)) => IpcResponse::FullReport(report),
                Ok(Verdict::Sampled(report)) => IpcResponse::SampledReport(report),
                Err(e) => IpcResponse::Error(format!("Verification task failed: {}", e)),
            }
        }
    }
}

enum Verdict {
    Full(verify::FullVerification),
    Sampled(verify::SampledVerification),
}

fn error_response(error: Error) -> IpcResponse {
    IpcResponse::Error(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keywitness_core::event::{EventInput, InputType};
    use keywitness_core::proof::Fingerprint;
    use keywitness_core::recorder::RecorderConfig;
    use std::time::Duration;

    fn test_state() -> Arc<DaemonState> {
        let home = tempfile::tempdir().unwrap().path().to_path_buf();
        let config = RecorderConfig {
            posw_iterations: 3,
            posw_timeout: Duration::from_secs(5),
            ..RecorderConfig::default()
        };
        Arc::new(DaemonState::new(home, config).unwrap())
    }

    #[tokio::test]
    async fn test_record_before_initialize_is_an_error() {
        let state = test_state();
        let response = handle_message(
            IpcMessage::Record(EventInput::content_change(InputType::InsertText, "a")),
            &state,
        )
        .await;
        assert!(matches!(response, IpcResponse::Error(_)));
    }

    #[tokio::test]
    async fn test_initialize_record_verify_roundtrip() {
        let state = test_state();

        let response = handle_message(
            IpcMessage::Initialize {
                fingerprint: Fingerprint::from_hash("f".repeat(64)),
                attestation: None,
            },
            &state,
        )
        .await;
        assert!(matches!(response, IpcResponse::Ok));

        for _ in 0..5 {
            let response = handle_message(
                IpcMessage::Record(EventInput::content_change(InputType::InsertText, "a")),
                &state,
            )
            .await;
            assert!(matches!(response, IpcResponse::Receipt(_)));
        }

        match handle_message(IpcMessage::Verify { sample: None, seed: None }, &state).await {
            IpcResponse::FullReport(report) => {
                assert!(report.valid);
                assert_eq!(report.events_checked, 5);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        match handle_message(
            IpcMessage::Export {
                final_content: "aaaaa".to_string(),
            },
            &state,
        )
        .await
        {
            IpcResponse::Proof(proof) => {
                assert_eq!(proof.proof.total_events, 5);
                assert!(proof.metadata.is_pure_typing);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_flips_flag() {
        let state = test_state();
        assert!(!state.should_shutdown());
        let response = handle_message(IpcMessage::Shutdown, &state).await;
        assert!(matches!(response, IpcResponse::Ok));
        assert!(state.should_shutdown());
    }
}
