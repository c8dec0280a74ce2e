//! Keywitness CLI
//!
//! Offline verification of exported typing proofs, plus a thin client for
//! a running daemon.
//!
//! Commands:
//! - keywitness verify proof.json [--sampled 3] [--seed 7] [--content src.rs]
//! - keywitness stats proof.json
//! - keywitness selftest
//! - keywitness daemon status|stop
//! - keywitness export final.rs [--out proof.json]

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use keywitness_core::canonical;
use keywitness_core::ipc::{IpcClient, IpcMessage, IpcResponse};
use keywitness_core::proof::{self, ExportedProof};
use keywitness_core::stats;
use keywitness_core::verify;

#[derive(Parser)]
#[command(name = "keywitness")]
#[command(about = "Tamper-evident typing proofs: record, export, verify")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify an exported proof file offline
    Verify {
        /// Path to the exported proof JSON
        file: PathBuf,

        /// Sampled verification with this many segments instead of a full
        /// chain walk
        #[arg(long)]
        sampled: Option<usize>,

        /// Fixed seed for reproducible segment selection
        #[arg(long)]
        seed: Option<u64>,

        /// Final source file to check against finalContentHash
        #[arg(long)]
        content: Option<PathBuf>,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Show statistics derived from an exported proof
    Stats {
        /// Path to the exported proof JSON
        file: PathBuf,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Run the canonical-encoding fixture corpus
    Selftest,

    /// Daemon management
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },

    /// Ask a running daemon to export the current chain
    Export {
        /// File holding the final editor content
        content_file: PathBuf,

        /// Write the proof here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Check whether the daemon is running
    Status,

    /// Ask the daemon to shut down
    Stop,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Verify {
            file,
            sampled,
            seed,
            content,
            format,
        } => cmd_verify(file, sampled, seed, content, &format),
        Commands::Stats { file, format } => cmd_stats(file, &format),
        Commands::Selftest => cmd_selftest(),
        Commands::Daemon { command } => match command {
            DaemonCommands::Status => cmd_daemon_status(),
            DaemonCommands::Stop => cmd_daemon_stop(),
        },
        Commands::Export { content_file, out } => cmd_export(content_file, out),
    }
}

fn load_export(file: &PathBuf) -> Result<ExportedProof> {
    let raw = fs::read_to_string(file)
        .with_context(|| format!("read proof file {:?}", file))?;
    serde_json::from_str(&raw).with_context(|| format!("parse proof file {:?}", file))
}

fn cmd_verify(
    file: PathBuf,
    sampled: Option<usize>,
    seed: Option<u64>,
    content: Option<PathBuf>,
    format: &str,
) -> Result<()> {
    let export = load_export(&file)?;
    let content = content
        .map(|path| {
            fs::read_to_string(&path).with_context(|| format!("read content file {:?}", path))
        })
        .transpose()?;

    let bindings = proof::verify_bindings(&export, content.as_deref());

    let (valid, chain_json, failure) = match sampled {
        Some(count) => {
            let report =
                verify::verify_sampled(&export.proof.events, &export.checkpoints, count, seed);
            let failure = report.failure.clone();
            (
                report.valid && bindings.all_valid(),
                serde_json::to_value(&report)?,
                failure,
            )
        }
        None => {
            let report = verify::verify_full(&export.proof.events);
            let failure = report.failure.clone();
            (
                report.valid && bindings.all_valid(),
                serde_json::to_value(&report)?,
                failure,
            )
        }
    };

    if format == "json" {
        let combined = serde_json::json!({
            "valid": valid,
            "chain": chain_json,
            "bindings": bindings,
            "typingProofHash": export.typing_proof_hash,
        });
        println!("{}", serde_json::to_string_pretty(&combined)?);
    } else {
        let mode = match sampled {
            Some(count) => format!("sampled ({} segments)", count),
            None => "full".to_string(),
        };
        println!("Proof:            {:?}", file);
        println!("Typing proof:     {}", export.typing_proof_hash);
        println!("Events:           {}", export.proof.total_events);
        println!("Mode:             {}", mode);
        println!("Chain:            {}", status(chain_json["valid"].as_bool().unwrap_or(false)));
        println!("Proof hash:       {}", status(bindings.typing_proof_hash_valid));
        println!("Self-seal:        {}", status(bindings.seal_valid));
        println!("Chain head:       {}", status(bindings.head_valid));
        match bindings.content_hash_valid {
            Some(ok) => println!("Content hash:     {}", status(ok)),
            None => println!("Content hash:     (no content supplied)"),
        }
        if let Some(failure) = failure {
            println!(
                "Failure:          {:?} at event {}",
                failure.kind, failure.error_at
            );
        }
        println!("Result:           {}", if valid { "VALID" } else { "INVALID" });
    }

    if !valid {
        std::process::exit(1);
    }
    Ok(())
}

fn status(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "FAILED"
    }
}

fn cmd_stats(file: PathBuf, format: &str) -> Result<()> {
    let export = load_export(&file)?;
    let stats = stats::collect(&export.proof.events);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Events:           {}", stats.total_events);
    println!("Typed inserts:    {}", stats.insert_events);
    println!("Deletes:          {}", stats.delete_events);
    println!("Pastes:           {}", stats.paste_events);
    println!("Drops:            {}", stats.drop_events);
    println!("Duration:         {} ms", stats.total_typing_time);
    println!("Avg speed:        {} inserts/min", stats.average_typing_speed);
    println!(
        "Pure typing:      {}",
        stats.paste_events == 0 && stats.drop_events == 0
    );
    for (kind, count) in &stats.event_types {
        println!("  {:24} {}", kind, count);
    }
    Ok(())
}

fn cmd_selftest() -> Result<()> {
    match canonical::self_test() {
        Ok(()) => {
            println!("Canonical encoding fixtures: ok");
            Ok(())
        }
        Err(failure) => {
            eprintln!("Canonical encoding diverged: {}", failure);
            std::process::exit(1);
        }
    }
}

fn cmd_daemon_status() -> Result<()> {
    let client = IpcClient::new();
    match client.ping() {
        Ok((uptime_secs, total_events)) => {
            println!("Daemon running: uptime {}s, {} events", uptime_secs, total_events);
            Ok(())
        }
        Err(e) => {
            eprintln!("Daemon not reachable: {}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_daemon_stop() -> Result<()> {
    let client = IpcClient::new();
    client
        .send(&IpcMessage::Shutdown)
        .context("send shutdown")?;
    println!("Shutdown requested");
    Ok(())
}

fn cmd_export(content_file: PathBuf, out: Option<PathBuf>) -> Result<()> {
    let final_content = fs::read_to_string(&content_file)
        .with_context(|| format!("read content file {:?}", content_file))?;

    let client = IpcClient::new();
    let response = client
        .send(&IpcMessage::Export { final_content })
        .context("export over IPC")?;

    let proof = match response {
        IpcResponse::Proof(proof) => proof,
        other => anyhow::bail!("unexpected daemon response: {:?}", other),
    };

    let json = serde_json::to_string_pretty(&proof)?;
    match out {
        Some(path) => {
            fs::write(&path, json).with_context(|| format!("write proof to {:?}", path))?;
            println!("Proof written to {:?}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}
