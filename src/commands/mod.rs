//! CLI surface: a single binary with an implicit `execute` operation and an
//! explicit `clear-cache` subcommand.

pub mod clear_cache;
pub mod execute;

use clap::{Parser, Subcommand};

use crate::settings::ExecuteArgs;

#[derive(Debug, Parser)]
#[command(name = "sql-scheduler", version, about = "Dependency-aware batch runner for paired DDL/DML SQL scripts")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub execute_args: ExecuteArgs,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the task graph (the default when no subcommand is given).
    Execute(ExecuteArgs),
    /// Remove every cached dev-stage run record and exit.
    ClearCache,
}

impl Cli {
    /// Dispatches to the requested subcommand, falling back to `execute`
    /// with the top-level flags when none was given.
    pub async fn run(self) -> anyhow::Result<i32> {
        match self.command {
            Some(Commands::Execute(args)) => execute::run(args).await,
            Some(Commands::ClearCache) => clear_cache::run(),
            None => execute::run(self.execute_args).await,
        }
    }
}
