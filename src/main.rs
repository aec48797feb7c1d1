// ABOUTME: CLI entry point for db-to-db
// ABOUTME: Parses arguments, resolves connections from the environment and runs the transfer

use anyhow::Context;
use clap::Parser;
use db_to_db::postgres::{ConnectionProvider, TlsPolicy};
use db_to_db::query::RangeFilter;
use db_to_db::request::DEFAULT_BATCH_SIZE;
use db_to_db::{verify, RetryController, TransferRequest, WriteBehavior};

/// Load a filtered slice of a table into a landing table, in batches.
///
/// Connection settings come from SOURCE_* / TARGET_* environment variables
/// (HOST, PORT, DATABASE, USER, PASSWORD, SSLMODE) or <ROLE>_URL.
#[derive(Parser)]
#[command(name = "db-to-db")]
#[command(version)]
struct Cli {
    /// Connection role to read from
    #[arg(long, value_name = "ROLE", default_value = "source")]
    source_connection: String,
    /// Connection role to write to
    #[arg(long, value_name = "ROLE", default_value = "target")]
    target_connection: String,
    /// Table to load data from
    #[arg(long, value_name = "TABLE")]
    source_table: String,
    /// Schema of the source table
    #[arg(long, value_name = "SCHEMA")]
    source_schema: String,
    /// Table to load data into [default: landing__<source_table>]
    #[arg(long, value_name = "TABLE")]
    target_table: Option<String>,
    /// Schema of the target table [default: <source_schema>]
    #[arg(long, value_name = "SCHEMA")]
    target_schema: Option<String>,
    /// Rows per batch
    #[arg(long, value_name = "N", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    /// Column for the lower bound (rows with column >= value)
    #[arg(long, value_name = "COLUMN", help_heading = "Window")]
    gte_column: Option<String>,
    /// Value for the lower bound
    #[arg(long, value_name = "VALUE", help_heading = "Window")]
    gte_value: Option<String>,
    /// Column for the upper bound (rows with column < value)
    #[arg(long, value_name = "COLUMN", help_heading = "Window")]
    lt_column: Option<String>,
    /// Value for the upper bound
    #[arg(long, value_name = "VALUE", help_heading = "Window")]
    lt_value: Option<String>,
    /// What the first batch does when the target table already exists
    #[arg(long, value_enum, default_value = "fail")]
    if_exists: WriteBehavior,
    /// Delete the matching window from the target before loading
    #[arg(long)]
    delete_window: bool,
    /// Empty the target table before loading
    #[arg(long)]
    truncate: bool,
    /// Treat a batch whose raw payload exceeds this many bytes as out of memory
    #[arg(long, value_name = "BYTES", env = "DB_TO_DB_MAX_BATCH_BYTES")]
    max_batch_bytes: Option<usize>,
    /// Compare filtered row counts of source and target after loading
    #[arg(long)]
    verify: bool,
    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json: bool,
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(long = "allow-self-signed-certs", default_value_t = false)]
    allow_self_signed_certs: bool,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    // Everything up to here is configuration; no connection is opened yet
    let filter = RangeFilter::from_pairs(
        cli.gte_column.clone(),
        cli.gte_value.clone(),
        cli.lt_column.clone(),
        cli.lt_value.clone(),
    )?;
    let request = TransferRequest::new(cli.source_schema.clone(), cli.source_table.clone())
        .with_target(cli.target_schema.clone(), cli.target_table.clone())
        .with_filter(filter)
        .with_batch_size(cli.batch_size)
        .with_initial_behavior(cli.if_exists)
        .with_delete_window(cli.delete_window)
        .with_truncate(cli.truncate)
        .with_max_batch_bytes(cli.max_batch_bytes);
    request.validate()?;

    let provider = ConnectionProvider::from_process_env(TlsPolicy {
        allow_self_signed_certs: cli.allow_self_signed_certs,
    });
    let source = provider
        .resolve(&cli.source_connection)
        .context("Failed to resolve source connection")?;
    let target = provider
        .resolve(&cli.target_connection)
        .context("Failed to resolve target connection")?;

    tracing::info!(
        "Loading {} ({}) into {} ({}), window: {}",
        request.source_table,
        source.descriptor(),
        request.target_table,
        target.descriptor(),
        request.filter
    );

    let report = RetryController::new(&source, &target)
        .run_with_retry(&request)
        .await
        .with_context(|| {
            format!(
                "Failed to load {} into {}",
                request.source_table, request.target_table
            )
        })?;

    tracing::info!(
        "Done: {} rows written to {} in {} batches ({} attempt(s))",
        report.rows_written,
        report.target_table,
        report.batches.len(),
        report.attempts
    );

    let verification = if cli.verify {
        Some(
            verify::verify(&source, &target, &request)
                .await
                .context("Failed to verify row counts")?,
        )
    } else {
        None
    };

    if cli.json {
        let summary = serde_json::json!({
            "report": report,
            "verification": verification,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}
