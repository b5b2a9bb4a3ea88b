//! db-pager - Main entry point.
//!
//! Runs one query and prints one page of its result as JSON lines, followed
//! by the total row count.

use clap::Parser;
use db_pager::config::Config;
use db_pager::db::{ConnectionFactory, PoolConnectionFactory, Transaction, UrlConnectionFactory};
use db_pager::error::DbResult;
use db_pager::page::{QueryBuilder, SqlQueryBuilder};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Rows go to stdout, so logs go to stderr
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

/// Print the requested page of `builder`'s query using a connection from `factory`.
async fn print_page<F: ConnectionFactory>(
    factory: &F,
    builder: &SqlQueryBuilder,
    config: &Config,
) -> DbResult<()> {
    let transaction = factory.new_transaction(false, config.isolation).await?;
    let printed = write_page(&transaction, builder, config).await;
    transaction.close().await;
    printed
}

async fn write_page(
    transaction: &Transaction,
    builder: &SqlQueryBuilder,
    config: &Config,
) -> DbResult<()> {
    let query = builder.build(transaction).await?;
    query
        .set_first_result(config.first_row())
        .set_max_results(Some(config.page_size));

    println!("{}", serde_json::json!({ "columns": query.columns() }));
    for row in query.rows().await? {
        println!("{}", serde_json::json!(row));
    }

    let total = query.result_count().await?;
    println!(
        "{}",
        serde_json::json!({
            "page": config.page,
            "page_size": config.page_size,
            "total": total,
        })
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    if config.page_size == 0 {
        eprintln!("Error: --page-size must be greater than 0");
        std::process::exit(1);
    }

    let url = config.parse_database_url()?;
    let params = config.parse_params()?;
    let builder = SqlQueryBuilder::new(&config.sql)
        .with_params(params)
        .with_cursor_mode(config.cursor_mode);

    info!(
        page = config.page,
        page_size = config.page_size,
        pooled = config.pooled,
        "Starting db-pager v{}",
        env!("CARGO_PKG_VERSION")
    );

    let result = if config.pooled {
        let factory =
            PoolConnectionFactory::connect(&url.connection_string, &url.pool_options).await?;
        let result = print_page(&factory, &builder, &config).await;
        factory.close().await;
        result
    } else {
        let factory = UrlConnectionFactory::new(&url.connection_string)?;
        print_page(&factory, &builder, &config).await
    };

    if let Err(e) = result {
        error!(error = %e, "Query failed");
        if let Some(suggestion) = e.suggestion() {
            eprintln!("Hint: {}", suggestion);
        }
        return Err(e.into());
    }

    Ok(())
}
