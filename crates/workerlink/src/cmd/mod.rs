use std::time::Duration;

use clap::{Args, Subcommand};
use workerlink_wire::DEFAULT_MAX_PAYLOAD;

use crate::exit::{io_error, CliError, CliResult, USAGE};
use crate::logging::LogLevel;
use crate::output::OutputFormat;

pub mod call;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a demo worker on stdin/stdout.
    Serve(ServeArgs),
    /// Start a worker, call one operation and print the result.
    Call(CallArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Call(args) => call::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Largest frame accepted or sent, in bytes.
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_frame_size: usize,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Operation to call. Omit to call the worker's default operation.
    pub operation: Option<String>,
    /// JSON payload.
    #[arg(long, conflicts_with = "data")]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with = "json")]
    pub data: Option<String>,
    /// Maximum time to wait for the result (e.g. 5s, 500ms).
    #[arg(long, env = "WORKERLINK_TIMEOUT", default_value = "10s")]
    pub timeout: String,
    /// Log level passed to the default worker.
    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    pub worker_log_level: LogLevel,
    /// Worker program and its arguments. Default: `workerlink serve`.
    #[arg(last = true, value_name = "WORKER")]
    pub worker: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start async runtime", err))
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
