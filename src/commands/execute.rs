//! The `execute` operation: resolve settings, build and run the task
//! graph, render the report, and compute the process exit code.

use crate::orchestrator;
use crate::report;
use crate::settings::{ExecuteArgs, Settings};

pub async fn run(args: ExecuteArgs) -> anyhow::Result<i32> {
    let settings = Settings::resolve(&args)?;
    let check_only = settings.check_only;

    let tasks = orchestrator::run(settings).await?;

    if check_only {
        println!("no cycle found");
        return Ok(0);
    }

    let table = report::render_table(&tasks);
    table.printstd();

    let summary = report::FailureSummary::from_tasks(&tasks);
    summary.print();
    Ok(summary.exit_code())
}
