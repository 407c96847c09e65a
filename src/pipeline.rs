//! # pipeline.rs
//!
//! Sequential driver of a submission run. Setup failures (staging, metadata,
//! output layout) and sample-level tool failures abort the run; per-segment
//! tool failures only show up in the validation report.

use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use log::{info, warn};

use crate::annotator::{self, ExternalTools};
use crate::bundle::{self, BundleKind, OutputLayout, SUBMISSION_XML, SampleWorkspace};
use crate::config::{InputSource, JobDescriptor, SubmissionSettings};
use crate::fasta::{self, FastaDemultiplexer};
use crate::manifest::{self, Publication};
use crate::metadata::{ORGANISM, SampleRecord, SampleSheet};
use crate::reconcile;
use crate::report::{REPORT_FILE_NAME, ReportWriter};
use crate::segment;

pub const INPUT_FASTA_FILE_NAME: &str = "input.fasta";
pub const METADATA_FILE_NAME: &str = "metadata.csv";

/// Counters written to `<output_file>.txt` once all samples are processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub samples_processed: usize,
    pub samples_skipped: usize,
    pub rows: usize,
    pub valid_rows: usize,
    pub report: PathBuf,
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Samples processed: {}", self.samples_processed)?;
        writeln!(f, "Samples skipped: {}", self.samples_skipped)?;
        writeln!(f, "Sequences reported: {}", self.rows)?;
        writeln!(f, "Sequences VALID: {}", self.valid_rows)?;
        writeln!(f, "Validation report: {}", self.report.display())
    }
}

pub struct Pipeline<'a> {
    job: JobDescriptor,
    settings: SubmissionSettings,
    tools: &'a dyn ExternalTools,
    layout: OutputLayout,
    submission_date: NaiveDate,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        job: JobDescriptor,
        settings: SubmissionSettings,
        tools: &'a dyn ExternalTools,
        output_dir: &Path,
        submission_date: NaiveDate,
    ) -> Self {
        Pipeline {
            job,
            settings,
            tools,
            layout: OutputLayout::new(output_dir),
            submission_date,
        }
    }

    pub fn run(&self) -> Result<RunSummary> {
        let input_fasta = self.stage_input_fasta()?;
        let metadata = self.stage_metadata()?;
        let sheet = self.load_samples(&input_fasta, &metadata)?;
        if sheet.is_empty() {
            warn!("Metadata file {} lists no samples", metadata.display());
        }
        info!("Loaded {} samples from {}", sheet.len(), metadata.display());

        self.layout.create()?;
        let mut report = ReportWriter::create(&self.layout.root().join(REPORT_FILE_NAME))?;

        let mut summary = RunSummary::default();
        for sample in sheet.samples() {
            if sample.sequences().is_empty() {
                warn!(
                    "Sample {} has no sequences in the input FASTA. Skipping.",
                    sample.sample_id()
                );
                summary.samples_skipped += 1;
                continue;
            }
            info!("Processing sample {}", sample.sample_id());
            self.process_sample(sample, &mut report)
                .with_context(|| format!("Error processing sample {}", sample.sample_id()))?;
            summary.samples_processed += 1;
        }

        summary.rows = report.rows();
        summary.valid_rows = report.valid_rows();
        summary.report = report.close()?;

        let summary_path = self
            .layout
            .root()
            .join(format!("{}.txt", self.job.output_file));
        std::fs::write(&summary_path, summary.to_string())
            .with_context(|| format!("Could not write run summary {}", summary_path.display()))?;
        Ok(summary)
    }

    /// Writes inline FASTA data or fetches the FASTA file from the workspace.
    fn stage_input_fasta(&self) -> Result<PathBuf> {
        let root = self.layout.root();
        let staged = match self.job.input_source {
            InputSource::FastaData => {
                let path = root.join(INPUT_FASTA_FILE_NAME);
                let data = self.job.input_fasta_data.as_deref().unwrap_or_default();
                std::fs::write(&path, data).with_context(|| {
                    format!("Error copying fasta data to input file {}", path.display())
                })?;
                path
            }
            InputSource::FastaFile => {
                let remote = self
                    .job
                    .input_fasta_file
                    .as_deref()
                    .ok_or_else(|| anyhow!("Job has no input_fasta_file"))?;
                let path = if remote.ends_with(".gz") {
                    root.join(format!("{}.gz", INPUT_FASTA_FILE_NAME))
                } else {
                    root.join(INPUT_FASTA_FILE_NAME)
                };
                self.tools
                    .fetch(remote, &path)
                    .context("Error copying fasta file from workspace")?;
                path
            }
        };
        ensure_not_empty(&staged, "Input fasta file")?;
        Ok(staged)
    }

    fn stage_metadata(&self) -> Result<PathBuf> {
        let path = self.layout.root().join(METADATA_FILE_NAME);
        self.tools
            .fetch(&self.job.metadata, &path)
            .context("Error copying metadata file from workspace")?;
        ensure_not_empty(&path, "Metadata file")?;
        Ok(path)
    }

    /// Loads the metadata and attaches every demultiplexed sequence to its sample.
    fn load_samples(&self, input_fasta: &Path, metadata: &Path) -> Result<SampleSheet> {
        let mut sheet = SampleSheet::from_path(metadata)?;
        let reader = fasta::open_fasta_input(input_fasta)?;
        for record in FastaDemultiplexer::new(reader) {
            let record = record?;
            match sheet.get_mut(&record.sample_id) {
                Some(sample) => sample.push_sequence(record),
                None => warn!(
                    "Sequence {} belongs to sample {} which does not exist in the metadata. Passing.",
                    record.sequence_id, record.sample_id
                ),
            }
        }
        Ok(sheet)
    }

    fn process_sample(&self, sample: &SampleRecord, report: &mut ReportWriter) -> Result<()> {
        let sample_id = sample.sample_id();
        let workspace = self.layout.sample(sample_id);
        workspace.create()?;

        let segment_files = bundle::write_sample_fasta_files(&workspace, sample.sequences())?;
        bundle::write_source_table(&workspace, sample.row(), sample.sequences())?;
        workspace.copy_to_manual("src")?;

        let organism = sample.row().value(ORGANISM);
        let database = segment::annotation_database(organism).ok_or_else(|| {
            anyhow!(
                "Unknown organism '{}', expected one of: {}",
                organism,
                segment::ANNOTATION_DATABASES
                    .iter()
                    .map(|(name, _)| *name)
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })?;

        self.validate_whole_sample(&workspace)?;
        self.annotate_whole_sample(&workspace, database)?;

        for (record, segment_fasta) in sample.sequences().iter().zip(&segment_files) {
            let annotations = annotator::annotate_segment(
                self.tools,
                segment_fasta,
                workspace.validation_dir(),
                database,
            );
            let row = reconcile::reconcile(&record.sequence_id, &annotations);
            info!("{}: {} ({})", row.sequence_id, row.status, row.segment);
            report.append(&row)?;
        }

        let submitter = self.job.submitter();
        let publication = Publication::from_metadata(sample.row(), &submitter);
        manifest::write_submit_block(
            &workspace.sample_file(workspace.submission_dir(), "sbt"),
            &submitter,
            &publication,
            &self.settings,
        )?;
        workspace.copy_to_manual("sbt")?;

        self.package(&workspace)?;
        self.finalize(&workspace)
    }

    /// Runs the flu validator over the whole sample and keeps its output as `<sample>.flu`.
    fn validate_whole_sample(&self, workspace: &SampleWorkspace) -> Result<()> {
        let sample_fasta = workspace.sample_file(workspace.validation_dir(), "fasta");
        let output = self
            .tools
            .validate_sample(&sample_fasta)
            .with_context(|| {
                format!("Error running flu validator for {}", sample_fasta.display())
            })?;
        let flu_file = workspace.sample_file(workspace.validation_dir(), "flu");
        std::fs::write(&flu_file, &output)
            .with_context(|| format!("Could not write {}", flu_file.display()))?;
        if output.contains("java") && output.contains("Exception") {
            warn!(
                "Flu validator raised an exception for sample {}, see {}",
                workspace.sample_id(),
                flu_file.display()
            );
        }
        Ok(())
    }

    /// Annotates the whole-sample `.fsa` and copies its feature table to the manual bundle.
    fn annotate_whole_sample(&self, workspace: &SampleWorkspace, database: &str) -> Result<()> {
        let fsa = workspace.sample_file(workspace.manual_dir(), "fsa");
        let prefix = workspace.validation_dir().join(workspace.sample_id());
        self.tools
            .annotate(&fsa, &prefix, database)
            .with_context(|| {
                format!(
                    "Error running structural annotation for {} using database {}",
                    fsa.display(),
                    database
                )
            })?;
        let table = workspace.sample_file(workspace.validation_dir(), "tbl");
        if !table.is_file() {
            return Err(anyhow!(
                "Structural annotation left no feature table {}",
                table.display()
            ));
        }
        let target = workspace.sample_file(workspace.manual_dir(), "tbl");
        std::fs::copy(&table, &target).with_context(|| {
            format!("Could not copy {} to {}", table.display(), target.display())
        })?;
        Ok(())
    }

    fn package(&self, workspace: &SampleWorkspace) -> Result<()> {
        self.tools
            .package(workspace.manual_dir(), workspace.sample_id())
            .context("Error running packaging tool")?;
        let sqn = workspace.sample_file(workspace.manual_dir(), "sqn");
        if !sqn.is_file() {
            return Err(anyhow!("Packaging tool did not produce {}", sqn.display()));
        }
        bundle::remove_packager_side_outputs(workspace)
    }

    /// Zips both bundles, writes the manifest and marks them ready.
    fn finalize(&self, workspace: &SampleWorkspace) -> Result<()> {
        for kind in [BundleKind::Repository, BundleKind::ManualReview] {
            let files = bundle::zip_bundle(workspace.bundle_dir(kind), kind.extensions())?;
            log::debug!("{:?} bundle of {}: {:?}", kind, workspace.sample_id(), files);
        }

        let manifest_path = workspace.submission_dir().join(SUBMISSION_XML);
        manifest::write_submission_manifest(
            &manifest_path,
            &self.settings,
            workspace.sample_id(),
            self.submission_date,
        )?;
        std::fs::copy(&manifest_path, workspace.manual_dir().join(SUBMISSION_XML))
            .with_context(|| format!("Could not copy {}", manifest_path.display()))?;

        for kind in [BundleKind::Repository, BundleKind::ManualReview] {
            bundle::write_ready_marker(workspace.bundle_dir(kind))?;
        }
        Ok(())
    }
}

fn ensure_not_empty(path: &Path, what: &str) -> Result<()> {
    let size = std::fs::metadata(path)
        .with_context(|| format!("{} {} was not created", what, path.display()))?
        .len();
    if size == 0 {
        return Err(anyhow!("{} {} is empty", what, path.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_display() {
        let summary = RunSummary {
            samples_processed: 2,
            samples_skipped: 1,
            rows: 9,
            valid_rows: 8,
            report: PathBuf::from("out/Sequence_Validation_Report.csv"),
        };
        let text = summary.to_string();
        assert!(text.starts_with("Samples processed: 2\nSamples skipped: 1\n"));
        assert!(text.contains("Sequences VALID: 8\n"));
        assert!(text.ends_with("Validation report: out/Sequence_Validation_Report.csv\n"));
    }

    #[test]
    fn test_ensure_not_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.csv");
        assert!(ensure_not_empty(&path, "Metadata file").is_err());
        std::fs::write(&path, "").unwrap();
        let err = ensure_not_empty(&path, "Metadata file").unwrap_err();
        assert!(err.to_string().ends_with("is empty"));
        std::fs::write(&path, "Sample Identifier\n").unwrap();
        assert!(ensure_not_empty(&path, "Metadata file").is_ok());
    }
}
