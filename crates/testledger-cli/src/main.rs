// crates/testledger-cli/src/main.rs
// ============================================================================
// Module: Test Ledger CLI Entry Point
// Description: Command dispatcher for run ingestion and dashboard reads.
// Purpose: Persist runner output and expose read models as JSON.
// Dependencies: clap, serde_json, testledger-config, testledger-store-sqlite,
//               tracing-subscriber
// ============================================================================

//! ## Overview
//! The `testledger` binary ingests runner output documents into the `SQLite`
//! ledger and prints run listings, run details, analytics, and test history
//! as JSON on stdout. Diagnostics and structured logs go to stderr.
//!
//! Inputs are untrusted: documents are read with a hard size limit and
//! validated by the ledger before any write.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use serde::Serialize;
use testledger_config::LedgerConfig;
use testledger_config::LogFormat;
use testledger_config::LoggingConfig;
use testledger_core::AnalyticsKind;
use testledger_core::AnalyticsQuery;
use testledger_core::ReadOutcome;
use testledger_core::RunId;
use testledger_core::RunIngest;
use testledger_core::Slug;
use testledger_core::TestHistoryEntry;
use testledger_core::TestRecord;
use testledger_store_sqlite::DashboardView;
use testledger_store_sqlite::SqliteTestLedger;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of an ingest document.
const MAX_INGEST_BYTES: usize = 64 * 1024 * 1024;
/// Exit code when a run was only partially persisted.
const EXIT_PARTIAL: u8 = 2;
/// Exit code when the datastore could not serve a read.
const EXIT_UNAVAILABLE: u8 = 3;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "testledger", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Path to `testledger.toml` (overrides `TESTLEDGER_CONFIG`).
    #[arg(long, value_name = "PATH", global = true)]
    pub(crate) config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Persist one runner output document.
    Ingest(IngestCommand),
    /// Run listing and detail views.
    Runs {
        /// Selected runs subcommand.
        #[command(subcommand)]
        command: RunsCommand,
    },
    /// Flakiness, regression, health, and daily views.
    Analytics(AnalyticsCommand),
    /// Test identity views.
    Tests {
        /// Selected tests subcommand.
        #[command(subcommand)]
        command: TestsCommand,
    },
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Arguments for `ingest`.
#[derive(Args, Debug)]
pub(crate) struct IngestCommand {
    /// Runner output document (JSON).
    #[arg(long, value_name = "FILE")]
    pub(crate) input: PathBuf,
}

/// Runs subcommands.
#[derive(Subcommand, Debug)]
pub(crate) enum RunsCommand {
    /// List runs newest first.
    List {
        /// Page size.
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Cursor returned by the previous page.
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Show one run with per-suite results.
    Show {
        /// Run identifier.
        #[arg(long)]
        run_id: i64,
    },
}

/// Arguments for `analytics`.
#[derive(Args, Debug)]
pub(crate) struct AnalyticsCommand {
    /// View to compute.
    #[arg(value_enum)]
    pub(crate) kind: AnalyticsKindArg,
    /// Maximum rows.
    #[arg(long)]
    pub(crate) limit: Option<usize>,
    /// Window length in days.
    #[arg(long)]
    pub(crate) window_days: Option<u32>,
    /// Minimum observations for flakiness.
    #[arg(long)]
    pub(crate) min_runs: Option<u32>,
}

impl AnalyticsCommand {
    /// Builds the query, filling unset values with defaults.
    pub(crate) fn query(&self) -> AnalyticsQuery {
        let defaults = AnalyticsQuery::default();
        AnalyticsQuery {
            limit: self.limit.unwrap_or(defaults.limit),
            window_days: self.window_days.unwrap_or(defaults.window_days),
            min_runs: self.min_runs.unwrap_or(defaults.min_runs),
        }
    }
}

/// CLI spelling of [`AnalyticsKind`].
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AnalyticsKindArg {
    /// Flaky tests.
    Flaky,
    /// Recent regressions.
    Regressions,
    /// Health scores.
    Health,
    /// Per-day aggregates.
    DailyStats,
}

impl From<AnalyticsKindArg> for AnalyticsKind {
    fn from(value: AnalyticsKindArg) -> Self {
        match value {
            AnalyticsKindArg::Flaky => Self::Flaky,
            AnalyticsKindArg::Regressions => Self::Regressions,
            AnalyticsKindArg::Health => Self::Health,
            AnalyticsKindArg::DailyStats => Self::DailyStats,
        }
    }
}

/// Tests subcommands.
#[derive(Subcommand, Debug)]
pub(crate) enum TestsCommand {
    /// Show a test identity and its name history.
    Show {
        /// Test slug.
        #[arg(long)]
        slug: String,
    },
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub(crate) enum ConfigCommand {
    /// Validate the configuration and print the effective store settings.
    Validate,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper carrying a rendered message.
#[derive(Debug, Error)]
#[error("{message}")]
pub(crate) struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    pub(crate) const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
pub(crate) type CliResult<T> = Result<T, CliError>;

/// Bounded read failures.
#[derive(Debug, Error)]
pub(crate) enum ReadLimitError {
    /// I/O failure.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// File exceeds the limit.
    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge {
        /// Observed size.
        size: u64,
        /// Allowed size.
        limit: usize,
    },
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run(cli: Cli) -> CliResult<ExitCode> {
    let config = LedgerConfig::load(cli.config.as_deref())
        .map_err(|err| CliError::new(err.to_string()))?;
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Config {
            command: ConfigCommand::Validate,
        } => {
            write_json(&config.store_config())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Ingest(command) => command_ingest(&config, &command),
        Commands::Runs {
            command,
        } => command_runs(&config, command),
        Commands::Analytics(command) => command_analytics(&config, &command),
        Commands::Tests {
            command,
        } => command_tests(&config, command),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Executes `ingest`.
fn command_ingest(config: &LedgerConfig, command: &IngestCommand) -> CliResult<ExitCode> {
    let ingest = read_ingest(&command.input)?;
    let ledger = open_ledger(config)?;
    let summary = ledger
        .persist_run(&ingest.run, &ingest.outcomes)
        .map_err(|err| CliError::new(format!("persist failed: {err}")))?;
    info!(
        run_id = summary.run_id.get(),
        processed = summary.processed_count,
        total = summary.total_count,
        "ingest complete"
    );
    write_json(&summary)?;
    if summary.is_complete() { Ok(ExitCode::SUCCESS) } else { Ok(ExitCode::from(EXIT_PARTIAL)) }
}

/// Executes `runs list` and `runs show`.
fn command_runs(config: &LedgerConfig, command: RunsCommand) -> CliResult<ExitCode> {
    let dashboard = match open_dashboard(config)? {
        ReadOutcome::Available {
            data,
        } => data,
        ReadOutcome::Unavailable {
            reason,
        } => return emit_unavailable(reason),
    };
    match command {
        RunsCommand::List {
            limit,
            cursor,
        } => {
            let page = dashboard.list_runs(limit, cursor.as_deref()).map_err(read_error)?;
            emit_read(&page)
        }
        RunsCommand::Show {
            run_id,
        } => match dashboard.get_run_detail(RunId::new(run_id)).map_err(read_error)? {
            ReadOutcome::Available {
                data: Some(detail),
            } => emit_read(&ReadOutcome::Available {
                data: detail,
            }),
            ReadOutcome::Available {
                data: None,
            } => Err(CliError::new(format!("run {run_id} not found"))),
            unavailable @ ReadOutcome::Unavailable {
                ..
            } => emit_read(&unavailable),
        },
    }
}

/// Executes `analytics`.
fn command_analytics(config: &LedgerConfig, command: &AnalyticsCommand) -> CliResult<ExitCode> {
    let dashboard = match open_dashboard(config)? {
        ReadOutcome::Available {
            data,
        } => data,
        ReadOutcome::Unavailable {
            reason,
        } => return emit_unavailable(reason),
    };
    let report =
        dashboard.get_analytics(command.kind.into(), command.query()).map_err(read_error)?;
    emit_read(&report)
}

/// Test identity with its name history.
#[derive(Debug, Serialize)]
struct TestView {
    /// Current identity row.
    test: TestRecord,
    /// History intervals, oldest first.
    history: Vec<TestHistoryEntry>,
}

/// Executes `tests show`.
fn command_tests(config: &LedgerConfig, command: TestsCommand) -> CliResult<ExitCode> {
    let ledger = open_ledger(config)?;
    match command {
        TestsCommand::Show {
            slug,
        } => {
            let test = ledger
                .test_by_slug(&Slug::new(slug.as_str()))
                .map_err(read_error)?
                .ok_or_else(|| CliError::new(format!("test {slug} not found")))?;
            let history = ledger.test_history(test.test_id).map_err(read_error)?;
            write_json(&TestView {
                test,
                history,
            })?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Installs the stderr log subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(config: &LoggingConfig) -> CliResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.level.trim().to_ascii_lowercase())
            .map_err(|err| CliError::new(format!("invalid log level: {err}")))?,
    };
    let builder =
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| CliError::new(format!("failed to install logger: {err}")))
}

/// Opens the ledger described by `config`.
fn open_ledger(config: &LedgerConfig) -> CliResult<SqliteTestLedger> {
    SqliteTestLedger::open(&config.store_config())
        .map_err(|err| CliError::new(format!("failed to open ledger: {err}")))
}

/// Opens the dashboard view, reporting an unopenable store as unavailable.
pub(crate) fn open_dashboard(config: &LedgerConfig) -> CliResult<ReadOutcome<DashboardView>> {
    DashboardView::open(&config.store_config())
        .map_err(|err| CliError::new(format!("failed to open ledger: {err}")))
}

/// Reads and decodes an ingest document.
pub(crate) fn read_ingest(path: &Path) -> CliResult<RunIngest> {
    let bytes = read_bytes_with_limit(path, MAX_INGEST_BYTES).map_err(|err| {
        CliError::new(format!("failed to read {}: {err}", path.display()))
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|err| CliError::new(format!("invalid ingest document {}: {err}", path.display())))
}

/// Reads a file, failing when it exceeds `max_bytes`.
pub(crate) fn read_bytes_with_limit(
    path: &Path,
    max_bytes: usize,
) -> Result<Vec<u8>, ReadLimitError> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    let limit = u64::try_from(max_bytes).map_err(|_| ReadLimitError::TooLarge {
        size,
        limit: max_bytes,
    })?;
    if size > limit {
        return Err(ReadLimitError::TooLarge {
            size,
            limit: max_bytes,
        });
    }
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1)).read_to_end(&mut bytes)?;
    if bytes.len() > max_bytes {
        return Err(ReadLimitError::TooLarge {
            size: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            limit: max_bytes,
        });
    }
    Ok(bytes)
}

/// Renders a read error.
fn read_error(error: testledger_core::LedgerError) -> CliError {
    CliError::new(format!("read failed: {error}"))
}

/// Prints a degradable read and maps unavailability to an exit code.
fn emit_read<T: Serialize>(outcome: &ReadOutcome<T>) -> CliResult<ExitCode> {
    write_json(outcome)?;
    if outcome.is_unavailable() {
        Ok(ExitCode::from(EXIT_UNAVAILABLE))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Prints an unavailable read.
fn emit_unavailable(reason: String) -> CliResult<ExitCode> {
    emit_read(&ReadOutcome::<()>::Unavailable {
        reason,
    })
}

/// Writes pretty JSON to stdout.
fn write_json<T: Serialize + ?Sized>(value: &T) -> CliResult<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::new(format!("failed to render output: {err}")))?;
    write_stdout_line(&rendered).map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Renders an output stream failure.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write {stream}: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
