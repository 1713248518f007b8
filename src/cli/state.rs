use crate::cli::load_context;
use crate::storage::checkpoint::{ResumeOrigin, ResumePoint};
use crate::timestamp::{format_instant, parse_instant};
use std::path::PathBuf;

/// Print the stored checkpoint of the configured pipeline.
pub fn show(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = load_context(config_path)?;
    let key = ctx.pipeline.checkpoint_key();

    match ctx.store.load(&ctx.pipeline)? {
        Some(instant) => println!("{}: {}", key, format_instant(instant)),
        None => println!("{}: no checkpoint", key),
    }
    Ok(())
}

/// Overwrite the checkpoint, backwards included.
pub fn reset(config_path: Option<PathBuf>, to: &str) -> Result<(), Box<dyn std::error::Error>> {
    let to = parse_instant(to)?;
    let ctx = load_context(config_path)?;

    let mut manager = ctx.checkpoint_manager();
    let previous = match manager.load(None) {
        ResumePoint {
            instant,
            origin: ResumeOrigin::Checkpoint,
        } => format_instant(instant),
        _ => "none".to_string(),
    };
    manager.reset(to)?;

    println!(
        "{}: {} -> {}",
        ctx.pipeline.checkpoint_key(),
        previous,
        format_instant(to)
    );
    Ok(())
}
