use crate::cli::load_context;
use crate::collector::RunSummary;
use crate::context::{RunContext, RunError};
use std::path::PathBuf;
use tracing::info;

/// One collection run. Window failures are part of the summary, not an error.
pub async fn run(config_path: Option<PathBuf>) -> Result<RunSummary, RunError> {
    let ctx = load_context(config_path)?;
    run_with_context(&ctx).await
}

pub async fn run_with_context(ctx: &RunContext) -> Result<RunSummary, RunError> {
    info!(
        pipeline = %ctx.pipeline,
        state_file = %ctx.config.general.state_file_path.display(),
        scratch_dir = %ctx.scratch.dir().display(),
        "Initializing collector"
    );

    let mut collector = ctx.build_collector().await?;
    Ok(collector.run().await)
}
