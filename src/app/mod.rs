pub mod config;
pub mod input;
pub mod logging_system;
pub mod shutdown;

pub use config::{Config, ConfigError, LogFormat, LogLevel};
pub use input::{IncomingReport, ReportDefaults, parse_report_line};
pub use logging_system::{LoggingError, setup_logging};
pub use shutdown::{ShutdownSignal, wait_for_signal};

use crate::pipeline::ErrorReporter;
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

/// Counts for one run of the sidecar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub accepted: usize,
    pub invalid: usize,
}

pub struct App {
    config: Config,
    reporter: ErrorReporter,
}

impl App {
    pub async fn from_args<I, T>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args(args)?;
        Self::from_config(config).await
    }

    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let reporter = ErrorReporter::new(config.to_pipeline_config()).await?;
        Ok(Self { config, reporter })
    }

    pub fn with_reporter(config: Config, reporter: ErrorReporter) -> Self {
        Self { config, reporter }
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    /// Reads reports from stdin until EOF or a shutdown signal.
    pub async fn run(self) -> anyhow::Result<RunSummary> {
        let stdin = BufReader::new(tokio::io::stdin());
        self.run_with_input(stdin, wait_for_signal()).await
    }

    /// Feeds every line of `input` to the reporter, then shuts it down once
    /// input ends or `shutdown` resolves. Lines are captured one at a time, so
    /// a slow collector applies backpressure to the reader.
    pub async fn run_with_input<R, S>(self, input: R, shutdown: S) -> anyhow::Result<RunSummary>
    where
        R: AsyncBufRead + Unpin,
        S: std::future::Future,
    {
        info!(
            endpoint = %self.config.endpoint,
            batch_size = self.config.batch_size,
            offline_queue = self.config.enable_offline_queue,
            "Starting rask-error-forwarder v{}",
            env!("CARGO_PKG_VERSION")
        );
        self.reporter.start();

        let defaults = ReportDefaults {
            environment: self.config.environment.clone(),
            release: self.config.release.clone(),
        };
        let mut summary = RunSummary::default();
        let mut lines = input.lines();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => match parse_report_line(&line, &defaults) {
                        Ok(Some(report)) => {
                            summary.accepted += 1;
                            let outcome = self.reporter.capture(report).await;
                            debug!(?outcome, "Report captured");
                        }
                        Ok(None) => {}
                        Err(e) => {
                            summary.invalid += 1;
                            warn!(error = %e, "Skipping malformed report line");
                        }
                    },
                    Ok(None) => {
                        info!("Input closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read input");
                        break;
                    }
                },
            }
        }

        self.reporter.destroy().await;

        let metrics = self.reporter.metrics();
        info!(
            accepted = summary.accepted,
            invalid = summary.invalid,
            sent = metrics.reports_sent,
            queued = metrics.reports_queued,
            remaining_in_queue = self.reporter.queue_size(),
            "rask-error-forwarder stopped"
        );
        Ok(summary)
    }
}

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && (args[1] == "--version" || args[1] == "-V") {
        println!("rask-error-forwarder {}", get_version());
        return Ok(());
    }
    if args.len() > 1 && (args[1] == "--help" || args[1] == "-h") {
        Config::parse_from(["rask-error-forwarder", "--help"]);
        return Ok(());
    }

    let config = Config::from_args(args)?;
    if let Err(e) = setup_logging(config.log_level, config.log_format) {
        eprintln!("Logging setup failed, continuing without logs: {e}");
    }

    let app = App::from_config(config).await?;
    app.run().await?;
    Ok(())
}
