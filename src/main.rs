//! Main entry point for the sql-scheduler binary.
//!
//! Loads `.env`, initializes tracing when debug logging is requested,
//! parses the CLI, and always calls `std::process::exit` with the
//! computed code so scripts invoking this binary can rely on it.

use std::env;

use clap::Parser;
use sql_scheduler::commands::Cli;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    if env::var("SQL_SCHEDULER_DEBUG").is_ok() || env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "sql_scheduler=info".into()))
            .init();
    }

    let cli = Cli::parse();
    let code = match cli.run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            1
        }
    };
    std::process::exit(code);
}
