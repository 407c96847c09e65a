//! # annotator.rs
//!
//! Adapter around the external command line tools used per sample and per
//! segment:
//! - the structural annotator (VIGOR4), which writes a feature table
//!   (`<prefix>.tbl`) and a coding-sequence description (`<prefix>.cds`),
//! - the flu validator (FLAN), which writes `<prefix>.tbl` and a colorized
//!   `<prefix>.report`,
//! - the packaging tool (tbl2asn) and the workspace fetch utility.
//!
//! All tools sit behind the `ExternalTools` trait so the pipeline can run
//! against fakes. Every invocation receives explicit paths; nothing relies on
//! the process working directory.

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ToolPaths;
use crate::flu_report::{self, FluReport};

static CDS_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\S+)=(?:"([^"]+)"|(\S+))"#).expect("valid CDS token regex")
});

/// Which tool produced an annotation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Annotator {
    #[serde(rename = "structural-annotator")]
    StructuralAnnotator,
    #[serde(rename = "flu-validator")]
    FluValidator,
}

impl Annotator {
    /// Short tag used in the validation report.
    pub fn report_tag(&self) -> &'static str {
        match self {
            Annotator::StructuralAnnotator => "VIGOR",
            Annotator::FluValidator => "FLAN",
        }
    }
}

/// Processing status reported for one annotator on one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnotationStatus {
    /// Feature table produced and non-empty.
    Processed,
    /// Feature table produced but empty.
    NoAnnotation,
    /// Expected output missing.
    Error,
    /// The tool invocation itself failed.
    Failed,
    /// Flu validator verdict `VALID`.
    Valid,
    /// Any other raw verdict token.
    Other(String),
}

impl AnnotationStatus {
    pub fn from_verdict(token: &str) -> AnnotationStatus {
        match token {
            "VALID" => AnnotationStatus::Valid,
            other => AnnotationStatus::Other(other.to_string()),
        }
    }
}

impl Display for AnnotationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            AnnotationStatus::Processed => "Processed",
            AnnotationStatus::NoAnnotation => "No Annotation",
            AnnotationStatus::Error => "Error",
            AnnotationStatus::Failed => "Failed",
            AnnotationStatus::Valid => "VALID",
            AnnotationStatus::Other(raw) => raw,
        };
        write!(f, "{}", status)
    }
}

/// Normalized verdict of one annotator for one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentAnnotationResult {
    pub annotator: Annotator,
    pub status: AnnotationStatus,
    /// Gene (structural annotator) or segment (flu validator) label.
    pub segment: String,
    pub messages: Vec<String>,
    /// Only reported by the flu validator.
    pub serotype: Option<String>,
    /// Whether the tool left parseable output behind.
    pub output_found: bool,
}

impl SegmentAnnotationResult {
    pub fn new(annotator: Annotator, status: AnnotationStatus) -> Self {
        SegmentAnnotationResult {
            annotator,
            status,
            segment: String::new(),
            messages: Vec::new(),
            serotype: None,
            output_found: false,
        }
    }

    pub fn from_flu_report(report: FluReport) -> Self {
        let status = report
            .result
            .as_deref()
            .map(AnnotationStatus::from_verdict)
            .unwrap_or(AnnotationStatus::Error);
        SegmentAnnotationResult {
            annotator: Annotator::FluValidator,
            status,
            segment: report.segment.unwrap_or_default(),
            messages: report.diagnostics,
            serotype: report.serotype,
            output_found: true,
        }
    }
}

/// `key=value` pairs from the first line of a `.cds` file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CdsRecord {
    fields: HashMap<String, String>,
}

impl CdsRecord {
    pub fn parse_line(line: &str) -> CdsRecord {
        let fields = CDS_TOKEN
            .captures_iter(line.trim())
            .map(|caps| {
                let value = caps
                    .get(2)
                    .or_else(|| caps.get(3))
                    .map(|m| m.as_str().replace('"', ""))
                    .unwrap_or_default();
                (caps[1].to_string(), value)
            })
            .collect();
        CdsRecord { fields }
    }

    /// Parses the first line of `path`; a missing file yields an empty record.
    pub fn from_path(path: &Path) -> Result<CdsRecord> {
        if !path.is_file() {
            return Ok(CdsRecord::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read CDS file {}", path.display()))?;
        Ok(CdsRecord::parse_line(text.lines().next().unwrap_or("")))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn gene(&self) -> &str {
        self.get("gene").unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Both annotators' results for one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentAnnotations {
    pub structural: SegmentAnnotationResult,
    pub cds: CdsRecord,
    pub flu: SegmentAnnotationResult,
}

/// The external collaborators of the pipeline.
pub trait ExternalTools {
    /// Copies a workspace file to `local`.
    fn fetch(&self, remote: &str, local: &Path) -> Result<()>;

    /// Runs the structural annotator; outputs are written next to `output_prefix`.
    fn annotate(&self, fasta: &Path, output_prefix: &Path, database: &str) -> Result<()>;

    /// Validates a whole-sample FASTA and returns the validator's stdout.
    fn validate_sample(&self, fasta: &Path) -> Result<String>;

    /// Validates a single-segment FASTA, writing `<output_prefix>.tbl` and `.report`.
    fn validate_segment(&self, fasta: &Path, output_prefix: &Path) -> Result<()>;

    /// Builds `<sample_id>.sqn` inside `bundle_dir` from the `.fsa`, `.sbt` and `.tbl` files there.
    fn package(&self, bundle_dir: &Path, sample_id: &str) -> Result<()>;
}

/// `ExternalTools` backed by real executables.
#[derive(Debug, Clone)]
pub struct CommandTools {
    paths: ToolPaths,
}

impl CommandTools {
    pub fn new(paths: ToolPaths) -> Self {
        CommandTools { paths }
    }
}

fn run_checked(command: &mut Command, tool: &str) -> Result<String> {
    debug!("Running {:?}", command);
    let output = command
        .output()
        .with_context(|| format!("{} could not be started", tool))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(anyhow!("{} failed ({}): {}", tool, output.status, stderr.trim()))
    }
}

impl ExternalTools for CommandTools {
    fn fetch(&self, remote: &str, local: &Path) -> Result<()> {
        run_checked(
            Command::new(&self.paths.workspace_fetch)
                .arg(format!("ws:{}", remote))
                .arg(local),
            &self.paths.workspace_fetch,
        )
        .map(|_| ())
    }

    fn annotate(&self, fasta: &Path, output_prefix: &Path, database: &str) -> Result<()> {
        run_checked(
            Command::new(&self.paths.structural_annotator)
                .arg("-i")
                .arg(fasta)
                .arg("-o")
                .arg(output_prefix)
                .arg("-d")
                .arg(database),
            &self.paths.structural_annotator,
        )
        .map(|_| ())
    }

    fn validate_sample(&self, fasta: &Path) -> Result<String> {
        run_checked(
            Command::new(&self.paths.flu_validator)
                .arg("-fasta")
                .arg(fasta),
            &self.paths.flu_validator,
        )
    }

    fn validate_segment(&self, fasta: &Path, output_prefix: &Path) -> Result<()> {
        run_checked(
            Command::new(&self.paths.flu_validator)
                .arg("-fasta")
                .arg(fasta)
                .arg("-v")
                .arg("-tbl")
                .arg("-o")
                .arg(output_prefix),
            &self.paths.flu_validator,
        )
        .map(|_| ())
    }

    fn package(&self, bundle_dir: &Path, sample_id: &str) -> Result<()> {
        run_checked(
            Command::new(&self.paths.packager)
                .current_dir(bundle_dir)
                .arg("-i")
                .arg(format!("{}.fsa", sample_id))
                .arg("-t")
                .arg(format!("{}.sbt", sample_id))
                .arg("-o")
                .arg(format!("{}.sqn", sample_id))
                .args(["-V", "bvg", "-a", "d", "-X", "C"]),
            &self.paths.packager,
        )
        .map(|_| ())
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn with_extension(prefix: &Path, extension: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// Runs the structural annotator on one segment and derives its status from
/// the feature table it leaves in `work_dir`.
pub fn run_structural_annotator(
    tools: &dyn ExternalTools,
    segment_fasta: &Path,
    work_dir: &Path,
    database: &str,
) -> (SegmentAnnotationResult, CdsRecord) {
    let prefix = work_dir.join(file_stem(segment_fasta));
    let status = match tools.annotate(segment_fasta, &prefix, database) {
        Err(err) => {
            warn!(
                "Structural annotation of {} failed: {:#}",
                segment_fasta.display(),
                err
            );
            AnnotationStatus::Failed
        }
        Ok(()) => match std::fs::metadata(with_extension(&prefix, "tbl")) {
            Ok(meta) if meta.len() > 0 => AnnotationStatus::Processed,
            Ok(_) => AnnotationStatus::NoAnnotation,
            Err(_) => AnnotationStatus::Error,
        },
    };
    let cds = CdsRecord::from_path(&with_extension(&prefix, "cds")).unwrap_or_else(|err| {
        warn!("{:#}", err);
        CdsRecord::default()
    });

    let mut result = SegmentAnnotationResult::new(Annotator::StructuralAnnotator, status);
    result.segment = cds.gene().to_string();
    result.output_found = !cds.is_empty();
    (result, cds)
}

/// Runs the flu validator on one segment and parses its report.
pub fn run_flu_validator(
    tools: &dyn ExternalTools,
    segment_fasta: &Path,
    work_dir: &Path,
) -> SegmentAnnotationResult {
    let prefix = work_dir.join(format!("{}_FLAN", file_stem(segment_fasta)));
    let failed = SegmentAnnotationResult::new(Annotator::FluValidator, AnnotationStatus::Error);

    if let Err(err) = tools.validate_segment(segment_fasta, &prefix) {
        warn!(
            "Flu validation of {} failed: {:#}",
            segment_fasta.display(),
            err
        );
        return failed;
    }

    let table = with_extension(&prefix, "tbl");
    let report = with_extension(&prefix, "report");
    if !(table.is_file() && report.is_file()) {
        warn!(
            "Flu validator left no table/report for {}",
            segment_fasta.display()
        );
        return failed;
    }

    match std::fs::read_to_string(&report) {
        Ok(text) => SegmentAnnotationResult::from_flu_report(flu_report::parse_report(&text)),
        Err(err) => {
            warn!("Could not read flu report {}: {}", report.display(), err);
            failed
        }
    }
}

/// Runs both annotators against one single-segment FASTA file.
pub fn annotate_segment(
    tools: &dyn ExternalTools,
    segment_fasta: &Path,
    work_dir: &Path,
    database: &str,
) -> SegmentAnnotations {
    let (structural, cds) = run_structural_annotator(tools, segment_fasta, work_dir, database);
    let flu = run_flu_validator(tools, segment_fasta, work_dir);
    SegmentAnnotations {
        structural,
        cds,
        flu,
    }
}
