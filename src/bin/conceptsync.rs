//! ConceptSync driver
//!
//! Reads JSON requests (one object per line), runs each through the
//! reference concepts and synchronizations, and prints one JSON response
//! per request.
//!
//! ```text
//! echo '{"path": "/Sessioning/start", "user": "alice"}' \
//!     | conceptsync --passthrough /Sessioning/start
//! ```

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use conceptsync::config::AppConfig;
use conceptsync::engine::runtime::SyncRuntime;
use conceptsync::engine::{InboundRequest, Reaction, SyncEngine};
use conceptsync::error::SyncError;
use conceptsync::{concepts, syncs};

#[derive(Parser, Debug)]
#[command(name = "conceptsync", version)]
#[command(about = "Feed JSON requests through the reference synchronizations")]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, env = "CONCEPTSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// File of JSON requests, one per line ("-" reads stdin)
    #[arg(long, short, default_value = "-")]
    input: String,

    /// Route a path straight to its concept action, e.g. /Sessioning/start
    #[arg(long = "passthrough", value_name = "ROUTE")]
    passthrough: Vec<String>,

    /// Print every record of each reaction to stderr
    #[arg(long)]
    trace: bool,

    /// Log at debug level (RUST_LOG directives still apply)
    #[arg(long, short)]
    verbose: bool,

    /// Append actions to a durable log file instead of keeping them in memory
    #[cfg(feature = "persistent")]
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "conceptsync failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), SyncError> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    config.engine.passthrough.routes.extend(cli.passthrough.iter().cloned());
    config.validate()?;

    let engine = SyncEngine::with_config(concepts::registry()?, syncs::all()?, config.engine)?;
    #[cfg(feature = "persistent")]
    let engine = match &cli.log_file {
        Some(path) => {
            use conceptsync::log::{FileActionLog, FileLogConfig};
            let log = FileActionLog::open(path, FileLogConfig::default())?;
            engine.with_log(std::sync::Arc::new(log))
        }
        None => engine,
    };
    info!(rules = engine.rules().len(), "engine ready");

    let runtime = SyncRuntime::start(engine, &config.runtime)?;
    let reader: Box<dyn BufRead> = if cli.input == "-" {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(&cli.input)
            .map_err(|e| SyncError::internal(format!("cannot open {}: {e}", cli.input)))?;
        Box::new(BufReader::new(file))
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| SyncError::internal(format!("cannot read input: {e}")))?;
        if line.trim().is_empty() {
            continue;
        }
        // Later lines usually depend on earlier ones (a session, a meal
        // id), so requests are answered strictly in input order.
        let answer = match parse(&line) {
            Ok(request) => {
                let reaction = runtime.handle(request)?;
                if cli.trace {
                    trace(&reaction);
                }
                reaction.response.to_json()
            }
            Err(e) => {
                warn!(line = idx + 1, error = %e, "skipping malformed request");
                serde_json::json!({ "error": e.to_string() })
            }
        };
        writeln!(out, "{answer}").map_err(|e| SyncError::internal(format!("cannot write output: {e}")))?;
    }
    Ok(())
}

fn parse(line: &str) -> Result<InboundRequest, SyncError> {
    let json: serde_json::Value = serde_json::from_str(line).map_err(|e| SyncError::internal(e.to_string()))?;
    Ok(InboundRequest::from_json(json)?)
}

fn trace(reaction: &Reaction) {
    let mut err = io::stderr().lock();
    for record in &reaction.records {
        if let Ok(json) = serde_json::to_string(record.as_ref()) {
            let _ = writeln!(err, "{json}");
        }
    }
    for fault in &reaction.faults {
        let _ = writeln!(err, "fault in {}: {}", fault.rule, fault.message);
    }
}
