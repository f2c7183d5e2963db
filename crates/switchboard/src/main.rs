//! # switchboard
//!
//! Demo server binary: binds the demo functions, starts the server, and
//! publishes a periodic tick until interrupted.

#![deny(unsafe_code)]

mod app;
mod settings;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use switchboard_logging::LogLevel;
use switchboard_server::Switchboard;
use tracing::{info, warn};

use crate::settings::Settings;

/// URI-routed HTTP + `WebSocket` demo server.
#[derive(Parser, Debug)]
#[command(name = "switchboard", about = "URI-routed HTTP + WebSocket demo server")]
struct Cli {
    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// JSON settings file merged over the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Transport option as KEY=VALUE (`listening_ports`, `document_root`,
    /// `num_threads`, `max_request_size`). Repeatable.
    #[arg(long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// Directory served for unhandled URIs.
    #[arg(long)]
    document_root: Option<PathBuf>,

    /// Log level (`RUST_LOG` still wins when set).
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,

    /// Milliseconds between tick broadcasts (0 disables).
    #[arg(long)]
    tick_interval_ms: Option<u64>,
}

impl Cli {
    /// Layer flags over loaded settings. Options go first so explicit flags
    /// win over them.
    fn apply(&self, settings: &mut Settings) -> Result<()> {
        let pairs = settings::option_pairs(&self.options)?;
        settings
            .server
            .apply_options(&pairs)
            .context("invalid --option")?;

        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(root) = &self.document_root {
            settings.server.document_root = Some(root.clone());
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
        if self.log_json {
            settings.logging.json = true;
        }
        if let Some(ms) = self.tick_interval_ms {
            settings.demo.tick_interval_ms = ms;
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings =
        settings::load_settings(cli.config.as_deref()).context("failed to load settings")?;
    cli.apply(&mut settings)?;

    switchboard_logging::init_subscriber(&settings.logging)
        .context("failed to initialize logging")?;

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    let _ = builder.enable_all();
    if let Some(threads) = settings.server.worker_threads {
        let _ = builder.worker_threads(threads);
    }
    let runtime = builder.build().context("failed to build tokio runtime")?;
    runtime.block_on(run(settings))
}

async fn run(settings: Settings) -> Result<()> {
    let builder = app::register(Switchboard::builder(settings.server.clone()));
    let publisher = builder.publisher();
    let handle = builder.start().await.context("failed to start server")?;

    info!("switchboard listening on http://{}", handle.local_addr());

    let ticker = (settings.demo.tick_interval_ms > 0).then(|| {
        tokio::spawn(app::run_ticker(
            publisher,
            settings.demo.tick_uri.clone(),
            Duration::from_millis(settings.demo.tick_interval_ms),
            handle.server().shutdown().token(),
        ))
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    if !handle.shutdown().await {
        warn!("server did not stop within the shutdown timeout");
    }
    if let Some(ticker) = ticker {
        let _ = ticker.await;
    }
    info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("switchboard").chain(args.iter().copied()))
    }

    #[test]
    fn no_flags_leave_settings_alone() {
        let mut settings = Settings::default();
        parse(&[]).apply(&mut settings).unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.logging.level, LogLevel::Info);
        assert_eq!(settings.demo.tick_interval_ms, 1000);
    }

    #[test]
    fn flags_override_settings() {
        let mut settings = Settings::default();
        parse(&[
            "--host",
            "0.0.0.0",
            "--port",
            "9001",
            "--document-root",
            "./public",
            "--log-level",
            "debug",
            "--log-json",
            "--tick-interval-ms",
            "0",
        ])
        .apply(&mut settings)
        .unwrap();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9001);
        assert_eq!(settings.server.document_root, Some(PathBuf::from("./public")));
        assert_eq!(settings.logging.level, LogLevel::Debug);
        assert!(settings.logging.json);
        assert_eq!(settings.demo.tick_interval_ms, 0);
    }

    #[test]
    fn options_apply_and_flags_win() {
        let mut settings = Settings::default();
        parse(&[
            "--option",
            "listening_ports=127.0.0.1:7000",
            "--option",
            "num_threads=2",
            "--port",
            "7100",
        ])
        .apply(&mut settings)
        .unwrap();
        assert_eq!(settings.server.port, 7100);
        assert_eq!(settings.server.worker_threads, Some(2));
    }

    #[test]
    fn malformed_option_is_rejected() {
        let mut settings = Settings::default();
        assert!(parse(&["--option", "num_threads"]).apply(&mut settings).is_err());
        assert!(parse(&["--option", "num_threads=0"]).apply(&mut settings).is_err());
    }

    #[test]
    fn unknown_log_level_fails_to_parse() {
        let result = Cli::try_parse_from(["switchboard", "--log-level", "loud"]);
        assert!(result.is_err());
    }
}
