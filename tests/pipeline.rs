use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use anyhow::{Result, anyhow};
use chrono::NaiveDate;

use flu_submission::annotator::ExternalTools;
use flu_submission::config::{InputSource, JobDescriptor, ToolConfig};
use flu_submission::pipeline::{Pipeline, RunSummary};
use flu_submission::segment;

const METADATA: &str = "Sample Identifier,Organism,Strain Name,Collection Country,Host,\
Collection Date,Isolation Source,Subtype,Authors,Publication Title,Publication PMID\n\
S1,Influenza A virus,A/duck/Ohio/1/2021,USA,Duck,05-Jan-21,cloacal swab,H3N2,\
\"Jane Q Doe, John Smith\",unpublished,\n\
S2,Influenza A virus,A/duck/Ohio/2/2021,USA,Duck,Jan-21,cloacal swab,H3N2,,,\n";

const FASTA: &str = ">Unique_Sample_Identifier:S1|Unique_Sequence_Identifier:S1-4\n\
ACGTACGTAC\nGTACGT\n\
>Unique_Sample_Identifier:S1|Unique_Sequence_Identifier:S1-6\n\
TTGACCA\n\
>Unique_Sample_Identifier:S9|Unique_Sequence_Identifier:S9-1\n\
AAAA\n";

/// How the fake tools misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    None,
    /// Per-segment runs succeed but write nothing.
    SilentSegments,
    /// Whole-sample annotation succeeds without a feature table.
    NoSampleTable,
    PackagerExit,
    PackagerNoRecord,
}

/// Tools that agree on the segment encoded in the file name.
struct FakeTools {
    workspace: HashMap<String, String>,
    fault: Fault,
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn with_suffix(prefix: &Path, extension: &str) -> String {
    format!("{}.{}", prefix.display(), extension)
}

impl ExternalTools for FakeTools {
    fn fetch(&self, remote: &str, local: &Path) -> Result<()> {
        let content = self
            .workspace
            .get(remote)
            .ok_or_else(|| anyhow!("no such workspace file {}", remote))?;
        std::fs::write(local, content)?;
        Ok(())
    }

    fn annotate(&self, fasta: &Path, output_prefix: &Path, _database: &str) -> Result<()> {
        let id = stem(fasta);
        match segment::segment_for_sequence(&id) {
            Some(_) if self.fault == Fault::SilentSegments => {}
            Some(name) => {
                std::fs::write(with_suffix(output_prefix, "tbl"), ">Feature x\n1\t10\tgene\n")?;
                std::fs::write(
                    with_suffix(output_prefix, "cds"),
                    format!(">{}.1 location=1..10 gene=\"{}\" product=\"protein\"\n", id, name),
                )?;
            }
            None if self.fault == Fault::NoSampleTable => {}
            None => std::fs::write(with_suffix(output_prefix, "tbl"), ">Feature x\n")?,
        }
        Ok(())
    }

    fn validate_sample(&self, _fasta: &Path) -> Result<String> {
        Ok("All sequences validated\n".to_string())
    }

    fn validate_segment(&self, fasta: &Path, output_prefix: &Path) -> Result<()> {
        if self.fault == Fault::SilentSegments {
            return Ok(());
        }
        let id = stem(fasta);
        let name = segment::segment_for_sequence(&id).unwrap_or("??");
        std::fs::write(with_suffix(output_prefix, "tbl"), ">Feature x\n")?;
        std::fs::write(
            with_suffix(output_prefix, "report"),
            format!(
                "Fasta {}.fasta\nSerotype: H3N2\n{} \x1b[32mVALID\x1b[0m 10 nt segment [{}]\n",
                id, id, name
            ),
        )?;
        Ok(())
    }

    fn package(&self, bundle_dir: &Path, sample_id: &str) -> Result<()> {
        if self.fault == Fault::PackagerExit {
            return Err(anyhow!("tbl2asn failed (exit status: 1)"));
        }
        let mut outputs = vec!["gbf", "val"];
        if self.fault != Fault::PackagerNoRecord {
            outputs.push("sqn");
        }
        for extension in outputs {
            let path = bundle_dir.join(format!("{}.{}", sample_id, extension));
            std::fs::write(path, "Seq-submit")?;
        }
        Ok(())
    }
}

fn job(fasta: &str) -> JobDescriptor {
    JobDescriptor {
        input_source: InputSource::FastaData,
        input_fasta_file: None,
        input_fasta_data: Some(fasta.to_string()),
        metadata: "/jane@example.org/home/metadata.csv".to_string(),
        output_file: "flu_run".to_string(),
        first_name: "Jane".to_string(),
        last_name: "Doe".to_string(),
        email: "jane@example.org".to_string(),
        affiliation: Some("Example University".to_string()),
        consortium: None,
    }
}

fn tools(metadata: &str, fault: Fault) -> FakeTools {
    FakeTools {
        workspace: HashMap::from([(job(FASTA).metadata, metadata.to_string())]),
        fault,
    }
}

fn run(output: &Path, fasta: &str, tools: &FakeTools) -> Result<RunSummary> {
    let settings = ToolConfig::load(None)?.submission;
    let date = NaiveDate::from_ymd_opt(2025, 3, 14).ok_or_else(|| anyhow!("bad date"))?;
    Pipeline::new(job(fasta), settings, tools, output, date).run()
}

fn zip_names(path: &Path) -> Vec<String> {
    let archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    names
}

const REPORT: &str = "Unique_Sequence_Identifier,Segment,Serotype,Status,Messages\n\
S1-4,HA,H3N2,VALID,\n\
S1-6,NA,H3N2,VALID,\n";

#[test]
fn test_end_to_end_submission() {
    let dir = tempfile::tempdir().unwrap();
    let summary = run(dir.path(), FASTA, &tools(METADATA, Fault::None)).unwrap();
    assert_eq!(summary.samples_processed, 1);
    // S2 has no sequences
    assert_eq!(summary.samples_skipped, 1);
    assert_eq!(summary.rows, 2);
    assert_eq!(summary.valid_rows, 2);

    let report =
        std::fs::read_to_string(dir.path().join("Sequence_Validation_Report.csv")).unwrap();
    assert_eq!(report, REPORT);

    let run_summary = std::fs::read_to_string(dir.path().join("flu_run.txt")).unwrap();
    assert!(run_summary.contains("Sequences VALID: 2"));

    let validation = dir.path().join("SequenceValidation/S1");
    for name in [
        "S1.fasta",
        "S1-4.fasta",
        "S1-6.fasta",
        "S1.flu",
        "S1.tbl",
        "S1-4_FLAN.report",
    ] {
        assert!(validation.join(name).is_file(), "missing {}", name);
    }
    assert!(!dir.path().join("SequenceValidation/S9").exists());

    let submission = dir.path().join("Genbank_submission_files/Submission/S1");
    let manual = dir.path().join("Genbank_submission_files/ManualSubmission/S1");
    assert_eq!(
        zip_names(&submission.join("submission.zip")),
        vec!["S1.fsa", "S1.sbt", "S1.src"]
    );
    assert_eq!(
        zip_names(&manual.join("submission.zip")),
        vec!["S1.fsa", "S1.sbt", "S1.sqn", "S1.src", "S1.tbl"]
    );
    for bundle in [&submission, &manual] {
        assert!(bundle.join("submit.ready").is_file());
        assert!(bundle.join("submission.xml").is_file());
        for extension in ["fsa", "src", "sbt", "tbl", "sqn", "gbf", "val"] {
            assert!(!bundle.join(format!("S1.{}", extension)).exists());
        }
    }

    let xml = std::fs::read_to_string(submission.join("submission.xml")).unwrap();
    assert!(xml.contains("2025-03-14.S1"));
}

#[test]
fn test_rerun_into_existing_output_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    run(dir.path(), FASTA, &tools(METADATA, Fault::None)).unwrap();

    // leftovers of the first run must not pass for fresh tool output
    let err = run(dir.path(), FASTA, &tools(METADATA, Fault::SilentSegments)).unwrap_err();
    assert!(format!("{:#}", err).contains("already exists"));

    let report =
        std::fs::read_to_string(dir.path().join("Sequence_Validation_Report.csv")).unwrap();
    assert_eq!(report, REPORT);
}

#[test]
fn test_silent_segment_tools_are_not_valid() {
    let dir = tempfile::tempdir().unwrap();
    let summary = run(dir.path(), FASTA, &tools(METADATA, Fault::SilentSegments)).unwrap();
    assert_eq!(summary.rows, 2);
    assert_eq!(summary.valid_rows, 0);

    let report =
        std::fs::read_to_string(dir.path().join("Sequence_Validation_Report.csv")).unwrap();
    assert!(report.contains("S1-4,\"VIGOR: , FLAN:\",,\"VIGOR:ERROR, FLAN:Error\",\n"));
}

#[test]
fn test_missing_sample_feature_table_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let err = run(dir.path(), FASTA, &tools(METADATA, Fault::NoSampleTable)).unwrap_err();
    assert!(format!("{:#}", err).contains("left no feature table"));

    let manual = dir.path().join("Genbank_submission_files/ManualSubmission/S1");
    assert!(!manual.join("submit.ready").exists());
    assert!(!manual.join("submission.zip").exists());
}

#[test]
fn test_packager_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let err = run(dir.path(), FASTA, &tools(METADATA, Fault::PackagerExit)).unwrap_err();
    assert!(format!("{:#}", err).contains("Error running packaging tool"));

    let submission = dir.path().join("Genbank_submission_files/Submission/S1");
    assert!(!submission.join("submit.ready").exists());
}

#[test]
fn test_packager_without_record_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let err = run(dir.path(), FASTA, &tools(METADATA, Fault::PackagerNoRecord)).unwrap_err();
    assert!(format!("{:#}", err).contains("did not produce"));

    let manual = dir.path().join("Genbank_submission_files/ManualSubmission/S1");
    assert!(!manual.join("submit.ready").exists());
}

#[test]
fn test_empty_input_fasta_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let err = run(dir.path(), "", &tools(METADATA, Fault::None)).unwrap_err();
    assert!(format!("{:#}", err).contains("Input fasta file"));
    assert!(!dir.path().join("SequenceValidation").exists());
}

#[test]
fn test_unknown_organism_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let metadata = METADATA.replace("Influenza A virus", "Influenza D virus");
    let err = run(dir.path(), FASTA, &tools(&metadata, Fault::None)).unwrap_err();
    assert!(format!("{:#}", err).contains("Unknown organism 'Influenza D virus'"));
}

#[test]
fn test_empty_metadata_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    assert!(run(dir.path(), FASTA, &tools("", Fault::None)).is_err());
    assert!(!dir.path().join("Sequence_Validation_Report.csv").exists());
}
