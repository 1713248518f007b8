use crate::cli::load_context;
use crate::context::RunContext;
use crate::pipeline::PipelineIdentity;
use crate::storage::checkpoint::{ResumeOrigin, ResumePoint};
use crate::timestamp::format_instant;
use crate::window::{plan_windows, WindowPlan};
use chrono::{DateTime, Utc};
use std::fmt::Write;
use std::path::PathBuf;

/// Print the windows the next run would collect, without contacting the source.
pub fn plan(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = load_context(config_path)?;
    print!("{}", plan_report(&ctx, Utc::now())?);
    Ok(())
}

pub fn plan_report(ctx: &RunContext, now: DateTime<Utc>) -> Result<String, Box<dyn std::error::Error>> {
    let settings = ctx.settings()?;
    let resume = ctx.checkpoint_manager().load(settings.initial_timestamp);
    let plan = plan_windows(resume.instant, settings.window_minutes, now);
    Ok(render_plan(&ctx.pipeline, &resume, plan))
}

pub fn render_plan(pipeline: &PipelineIdentity, resume: &ResumePoint, plan: WindowPlan) -> String {
    let origin = match resume.origin {
        ResumeOrigin::Checkpoint => "checkpoint",
        ResumeOrigin::InitialTimestamp => "initial_collection_timestamp",
        ResumeOrigin::EpochDefault => "epoch default",
    };

    let mut out = String::new();
    let _ = writeln!(out, "pipeline:    {}", pipeline);
    let _ = writeln!(out, "resume from: {} ({})", format_instant(resume.instant), origin);
    let _ = writeln!(out, "collect to:  {}", format_instant(plan.boundary()));
    let _ = writeln!(out, "windows:     {}", plan.len());
    for window in plan {
        let _ = writeln!(
            out,
            "  {} .. {}",
            format_instant(window.start()),
            format_instant(window.end())
        );
    }
    out
}
