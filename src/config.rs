//! # config.rs
//!
//! Configuration for a submission run:
//! - `InputConfig`: command line arguments.
//! - `JobDescriptor`: the JSON job file describing inputs and the submitter.
//! - `ToolConfig`: executables of the external tools and the fixed values of
//!   the generated submission documents, layered from the embedded defaults,
//!   an optional TOML file and `FLU_SUBMISSION__*` environment variables.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use config::Config;
use serde::{Deserialize, Serialize};

use crate::manifest::Submitter;

/// Embedded default tool settings.
pub const DEFAULT_TOOLS_STR: &str = include_str!("../data/tools.toml");

const ENV_PREFIX: &str = "FLU_SUBMISSION";

/// Configuration parsed from CLI input arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "flu-submission",
    version = env!("CARGO_PKG_VERSION"),
    about = "Validates influenza segment sequences with VIGOR4 and FLAN and assembles GenBank submission packages."
)]
pub struct InputConfig {
    /// JSON job file
    #[arg(short, long = "jfile", required = true)]
    pub jfile: PathBuf,
    /// Output directory. Defaults to the current directory.
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,
    /// TOML file overriding the default tool settings
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl InputConfig {
    ///
    /// Parses command-line arguments and checks the job file exists.
    ///
    /// # Errors
    /// Returns an error if the job file is missing or the output path is a file.
    pub fn build() -> Result<InputConfig> {
        let input_config = InputConfig::parse();
        input_config.validate()?;
        Ok(input_config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.jfile.is_file() {
            return Err(anyhow!("Job file {} does not exist", self.jfile.display()));
        }
        if self.output.is_file() {
            return Err(anyhow!(
                "Output path {} is a file, please use a valid directory",
                self.output.display()
            ));
        }
        if let Some(config) = &self.config {
            if !config.is_file() {
                return Err(anyhow!("Config file {} does not exist", config.display()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    /// FASTA fetched from the workspace.
    FastaFile,
    /// FASTA text inlined in the job.
    FastaData,
}

/// The job file handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub input_source: InputSource,
    #[serde(default)]
    pub input_fasta_file: Option<String>,
    #[serde(default)]
    pub input_fasta_data: Option<String>,
    /// Workspace path of the metadata spreadsheet.
    pub metadata: String,
    /// Base name of the run summary file.
    pub output_file: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub affiliation: Option<String>,
    #[serde(default)]
    pub consortium: Option<String>,
}

impl JobDescriptor {
    pub fn from_path(path: &Path) -> Result<JobDescriptor> {
        let file = File::open(path)
            .with_context(|| format!("Error in opening job file {}", path.display()))?;
        let job: JobDescriptor = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Error in parsing job file {}", path.display()))?;
        job.validate()?;
        Ok(job)
    }

    pub fn validate(&self) -> Result<()> {
        match self.input_source {
            InputSource::FastaFile if self.input_fasta_file.is_none() => Err(anyhow!(
                "Job input_source is fasta_file but input_fasta_file is missing"
            )),
            InputSource::FastaData if self.input_fasta_data.is_none() => Err(anyhow!(
                "Job input_source is fasta_data but input_fasta_data is missing"
            )),
            _ => Ok(()),
        }
    }

    pub fn submitter(&self) -> Submitter {
        Submitter {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            affiliation: non_empty(&self.affiliation),
            consortium: non_empty(&self.consortium),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Executables of the external collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    pub structural_annotator: String,
    pub flu_validator: String,
    pub packager: String,
    pub workspace_fetch: String,
}

/// Fixed values written into `submission.xml` and the author template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionSettings {
    pub organization: String,
    pub comment_prefix: String,
    pub spuid_namespace: String,
    pub target_db: String,
    pub wizard: String,
    pub direct_submission_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub tools: ToolPaths,
    pub submission: SubmissionSettings,
}

impl ToolConfig {
    ///
    /// Loads the embedded defaults, then `path` if given, then environment
    /// overrides such as `FLU_SUBMISSION__TOOLS__PACKAGER`.
    pub fn load(path: Option<&Path>) -> Result<ToolConfig> {
        let mut builder = Config::builder().add_source(config::File::from_str(
            DEFAULT_TOOLS_STR,
            config::FileFormat::Toml,
        ));
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let tool_config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize::<ToolConfig>()?;
        #[cfg(debug_assertions)]
        log::debug!("{:?}", &tool_config);
        Ok(tool_config)
    }
}
