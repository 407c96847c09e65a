use anyhow::{Context, Result};
use chrono::Local;
use colored::Colorize;
use log::info;

pub mod annotator;
pub mod bundle;
pub mod config;
pub mod fasta;
pub mod flu_report;
pub mod manifest;
pub mod metadata;
pub mod pipeline;
pub mod reconcile;
pub mod report;
pub mod segment;

use crate::annotator::CommandTools;
use crate::config::{InputConfig, JobDescriptor, ToolConfig};
use crate::pipeline::Pipeline;

pub fn run(config: InputConfig) -> Result<()> {
    let job = JobDescriptor::from_path(&config.jfile)?;
    let tool_config = ToolConfig::load(config.config.as_deref())?;

    std::fs::create_dir_all(&config.output)
        .with_context(|| format!("Could not create output directory {}", config.output.display()))?;
    let output_dir = std::fs::canonicalize(&config.output)?;
    info!("Writing results to {}", output_dir.display());

    let tools = CommandTools::new(tool_config.tools);
    let pipeline = Pipeline::new(
        job,
        tool_config.submission,
        &tools,
        &output_dir,
        Local::now().date_naive(),
    );
    let summary = pipeline.run()?;

    println!(
        "{} {} of {} sequences VALID across {} samples, report: {}",
        "✅ Done.".green().bold(),
        summary.valid_rows,
        summary.rows,
        summary.samples_processed,
        summary.report.display()
    );
    Ok(())
}
