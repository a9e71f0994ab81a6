use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};

/// Log to `path`, truncating it. `verbose` lowers the level to debug.
pub fn init(path: &Path, verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let config = ConfigBuilder::new()
        .set_thread_level(LevelFilter::Debug)
        .set_target_level(LevelFilter::Error)
        .build();

    let file = File::create(path).with_context(|| format!("Failed to create log file {path:?}"))?;
    WriteLogger::init(level, config, file).context("Failed to install logger")?;

    info!("Logging to {path:?} at {level}");
    Ok(())
}
