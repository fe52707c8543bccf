//! rowscan - Main entry point.
//!
//! Runs one query against a Postgres or SQLite database and prints every row
//! as a JSON object on its own line.

use clap::Parser;
use rowscan::config::{Config, redact};
use rowscan::db::{DbClient, DynamicMapper, DynamicRow};
use rowscan::{QueryContext, Unmarshaler, impl_family_dispatch, select};
use std::io::Write;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // stdout carries the rows
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    init_tracing(&config);

    let family = config.driver_family()?;
    let options = config.unmarshal_options();
    options.validate()?;

    info!(
        family = %family,
        database = %redact(&config.database),
        "Starting rowscan v{}",
        env!("CARGO_PKG_VERSION")
    );

    let ctx = QueryContext::background();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling query");
            interrupt.cancel();
        }
    });

    let connect_ctx = ctx.child().deadline_in(config.query_timeout_duration());
    let mut client = DbClient::connect(&connect_ctx, family, &config.database).await?;

    let unmarshaler =
        Unmarshaler::new(DynamicMapper::new(config.decode_binary)).with_options(options);
    let mut records: Vec<DynamicRow> = Vec::new();

    let result = impl_family_dispatch!(&mut client, {
        Postgres(pool) => {
            select::pg::select(&ctx, pool, &config.query, &config.params, &mut records, &unmarshaler)
                .await
        },
        Sqlite(pool) => {
            select::sqlite::select(&ctx, pool, &config.query, &config.params, &mut records, &unmarshaler)
                .await
        },
    });
    client.close().await;

    let count = match result {
        Ok(count) => count,
        Err(e) => {
            error!(
                error = %e,
                source = std::error::Error::source(&e).map(tracing::field::display),
                kind = ?e.kind(),
                "Query failed"
            );
            return Err(e.into());
        }
    };

    let mut out = std::io::stdout().lock();
    for record in &records {
        serde_json::to_writer(&mut out, record)?;
        writeln!(out)?;
    }
    out.flush()?;

    info!(rows = count, "Done");
    Ok(())
}
