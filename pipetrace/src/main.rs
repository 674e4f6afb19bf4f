//! # pipetrace - Main Entry Point
//!
//! Resolves the target process, opens a trace session and writes the stream
//! to `--output` until Ctrl+C, SIGTERM, `--duration`, or the target exits.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use pipetrace::cli::Args;
use pipetrace::config::{load_providers_file, parse_provider_list, Provider, SessionConfig};
use pipetrace::domain::TransportError;
use pipetrace::preflight::check_output_path;
use pipetrace::process_lookup::{list_published, resolve_process};
use pipetrace::session::IpcTransport;
use pipetrace::{StopCondition, TraceCollector};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let permission_denied = err.chain().any(|cause| {
        cause.downcast_ref::<TransportError>().is_some_and(TransportError::is_permission_denied)
    });
    if permission_denied {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

/// Providers from `--providers-file` or `--providers`; `None` means defaults
fn load_providers(args: &Args) -> Result<Option<Vec<Provider>>> {
    if let Some(ref path) = args.providers_file {
        return Ok(Some(load_providers_file(path)?));
    }
    if let Some(ref spec) = args.providers {
        return Ok(Some(parse_provider_list(spec)?));
    }
    Ok(None)
}

fn list_processes(socket_dir: &Path) -> Result<()> {
    let processes = list_published(socket_dir)?;
    if processes.is_empty() {
        println!("no traceable processes found in {}", socket_dir.display());
        return Ok(());
    }
    for process in processes {
        println!("{:>8}  {}", process.pid.0, process.command);
    }
    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn cancel_on_shutdown_signal(token: CancellationToken) {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = interrupt => info!("Received SIGINT, stopping trace..."),
        () = terminate => info!("Received SIGTERM, stopping trace..."),
    }
    token.cancel();
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;
    let transport = IpcTransport::new();

    if args.list {
        return list_processes(transport.socket_dir());
    }

    let selector = args.process.as_deref().unwrap_or_default();
    let target = resolve_process(selector, transport.socket_dir())?;
    check_output_path(&args.output)?;

    let config = SessionConfig::new(Some(target.pid), args.buffer_size, load_providers(&args)?)?
        .with_rundown(!args.no_rundown);

    if !quiet {
        println!("pipetrace v{}", env!("CARGO_PKG_VERSION"));
        println!("pid: {} ({})", target.pid.0, target.command);
        println!("buffer: {} MB", config.circular_buffer_mb());
        for provider in config.providers() {
            println!(
                "provider: {} (level {}, keywords 0x{:X})",
                provider.name,
                provider.level,
                provider.keyword_mask()
            );
        }
        println!("output: {}", args.output.display());
    }

    let token = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown_signal(token.clone()));

    let mut stop = StopCondition::token(token);
    if args.duration > 0 {
        stop = stop.with_deadline(Duration::from_secs(args.duration));
    }

    if !quiet {
        if args.duration > 0 {
            println!("tracing for {}s - press Ctrl+C to stop early...", args.duration);
        } else {
            println!("tracing - press Ctrl+C to stop...");
        }
    }

    let collector = TraceCollector::with_transport(config, transport);
    let summary = collector
        .collect_to_path(&args.output, stop)
        .await
        .with_context(|| format!("Failed to trace process {}", target.pid.0))?;

    if !quiet {
        eprintln!(
            "\n{}: {:.1}s, {} bytes (session {})",
            summary.cause,
            summary.elapsed.as_secs_f64(),
            summary.bytes_written,
            summary.session_id,
        );
    }
    println!("saved: {}", args.output.display());

    Ok(())
}
