//! # bundle.rs
//!
//! File choreography for one sample across three directories:
//! - `SequenceValidation/<sample>/`: working files for the annotators, never packaged;
//! - `Genbank_submission_files/Submission/<sample>/`: the repository bundle;
//! - `Genbank_submission_files/ManualSubmission/<sample>/`: the manual-review
//!   bundle, a superset that also carries the feature table and the packaged
//!   record.
//!
//! A bundle is finalized by zipping the files with the bundle's extensions into
//! `submission.zip`, deleting them, and writing the `submit.ready` marker.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use csv::WriterBuilder;
use getset::Getters;
use log::{debug, warn};
use serde::Serialize;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::fasta::{self, SequenceRecord};
use crate::manifest::SUBMISSION_ZIP;
use crate::metadata::{
    COLLECTION_COUNTRY, COLLECTION_DATE, HOST, ISOLATION_SOURCE, MetadataRow, ORGANISM,
    STRAIN_NAME, SUBTYPE,
};

pub const SEQUENCE_VALIDATION_FOLDER_NAME: &str = "SequenceValidation";
pub const GENBANK_SUBMISSION_FOLDER_NAME: &str = "Genbank_submission_files";
pub const SUBMISSION_FOLDER_NAME: &str = "Submission";
pub const MANUAL_SUBMISSION_FOLDER_NAME: &str = "ManualSubmission";
pub const SUBMISSION_XML: &str = "submission.xml";
pub const READY_MARKER: &str = "submit.ready";

/// Side outputs of the packaging tool that are not part of any bundle.
pub const PACKAGER_SIDE_OUTPUTS: [&str; 3] = ["gbf", "t2g", "val"];

/// The two bundle variants built for every sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleKind {
    Repository,
    ManualReview,
}

impl BundleKind {
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            BundleKind::Repository => &["fsa", "src", "sbt"],
            BundleKind::ManualReview => &["fsa", "src", "sbt", "tbl", "sqn"],
        }
    }
}

/// Top-level output directories of a run.
#[derive(Debug, Clone, Getters)]
pub struct OutputLayout {
    #[getset(get = "pub")]
    root: PathBuf,
    #[getset(get = "pub")]
    validation_dir: PathBuf,
    #[getset(get = "pub")]
    submission_dir: PathBuf,
    #[getset(get = "pub")]
    manual_dir: PathBuf,
}

impl OutputLayout {
    pub fn new(root: &Path) -> Self {
        let genbank = root.join(GENBANK_SUBMISSION_FOLDER_NAME);
        OutputLayout {
            root: root.to_path_buf(),
            validation_dir: root.join(SEQUENCE_VALIDATION_FOLDER_NAME),
            submission_dir: genbank.join(SUBMISSION_FOLDER_NAME),
            manual_dir: genbank.join(MANUAL_SUBMISSION_FOLDER_NAME),
        }
    }

    /// Creates the output tree. An existing tree is an error, so leftovers of
    /// an earlier run are never mistaken for fresh tool output.
    pub fn create(&self) -> Result<()> {
        let genbank = self.root.join(GENBANK_SUBMISSION_FOLDER_NAME);
        for dir in [
            &self.validation_dir,
            &genbank,
            &self.submission_dir,
            &self.manual_dir,
        ] {
            create_new_dir(dir)?;
        }
        Ok(())
    }

    pub fn sample(&self, sample_id: &str) -> SampleWorkspace {
        SampleWorkspace {
            sample_id: sample_id.to_string(),
            validation_dir: self.validation_dir.join(sample_id),
            submission_dir: self.submission_dir.join(sample_id),
            manual_dir: self.manual_dir.join(sample_id),
        }
    }
}

fn create_new_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Err(anyhow!(
            "Directory {} already exists, please use an empty output directory",
            dir.display()
        ));
    }
    std::fs::create_dir(dir)
        .with_context(|| format!("Could not create directory {}", dir.display()))
}

/// Directories and file names used for one sample.
#[derive(Debug, Clone, Getters)]
pub struct SampleWorkspace {
    #[getset(get = "pub")]
    sample_id: String,
    #[getset(get = "pub")]
    validation_dir: PathBuf,
    #[getset(get = "pub")]
    submission_dir: PathBuf,
    #[getset(get = "pub")]
    manual_dir: PathBuf,
}

impl SampleWorkspace {
    pub fn create(&self) -> Result<()> {
        for dir in [&self.validation_dir, &self.submission_dir, &self.manual_dir] {
            create_new_dir(dir)?;
        }
        Ok(())
    }

    pub fn bundle_dir(&self, kind: BundleKind) -> &Path {
        match kind {
            BundleKind::Repository => self.submission_dir.as_path(),
            BundleKind::ManualReview => self.manual_dir.as_path(),
        }
    }

    /// `<sample>.<extension>` inside `dir`.
    pub fn sample_file(&self, dir: &Path, extension: &str) -> PathBuf {
        dir.join(format!("{}.{}", self.sample_id, extension))
    }

    pub fn segment_fasta(&self, sequence_id: &str) -> PathBuf {
        self.validation_dir.join(format!("{}.fasta", sequence_id))
    }

    /// Copies `<sample>.<extension>` from the repository bundle to the manual bundle.
    pub fn copy_to_manual(&self, extension: &str) -> Result<()> {
        let from = self.sample_file(&self.submission_dir, extension);
        let to = self.sample_file(&self.manual_dir, extension);
        std::fs::copy(&from, &to)
            .with_context(|| format!("Could not copy {} to {}", from.display(), to.display()))?;
        Ok(())
    }
}

/// Writes the sample FASTA (original headers) and one FASTA per segment into
/// the validation directory, and the `.fsa` (headers = sequence ids) into both
/// bundles. Returns the per-segment FASTA paths in input order.
pub fn write_sample_fasta_files(
    workspace: &SampleWorkspace,
    sequences: &[SequenceRecord],
) -> Result<Vec<PathBuf>> {
    fasta::write_fasta(
        &workspace.sample_file(workspace.validation_dir(), "fasta"),
        sequences
            .iter()
            .map(|r| (r.header.as_str(), r.sequence.as_str())),
    )?;

    let fsa = workspace.sample_file(workspace.manual_dir(), "fsa");
    fasta::write_fasta(
        &fsa,
        sequences
            .iter()
            .map(|r| (r.sequence_id.as_str(), r.sequence.as_str())),
    )?;
    std::fs::copy(&fsa, workspace.sample_file(workspace.submission_dir(), "fsa"))
        .with_context(|| format!("Could not copy {}", fsa.display()))?;

    let mut segment_files = Vec::with_capacity(sequences.len());
    for record in sequences {
        if record.segment_name().is_none() {
            warn!(
                "Sequence {} does not end in a known influenza segment number",
                record.sequence_id
            );
        }
        let path = workspace.segment_fasta(&record.sequence_id);
        fasta::write_fasta(
            &path,
            [(record.sequence_id.as_str(), record.sequence.as_str())],
        )?;
        segment_files.push(path);
    }
    Ok(segment_files)
}

/// One row of the tab-delimited source modifier table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceModifiers<'a> {
    #[serde(rename = "Sequence_ID")]
    pub sequence_id: &'a str,
    #[serde(rename = "Organism")]
    pub organism: &'a str,
    #[serde(rename = "Strain")]
    pub strain: &'a str,
    #[serde(rename = "Country")]
    pub country: &'a str,
    #[serde(rename = "Host")]
    pub host: &'a str,
    #[serde(rename = "Collection-date")]
    pub collection_date: &'a str,
    #[serde(rename = "Isolation-source")]
    pub isolation_source: &'a str,
    #[serde(rename = "Serotype")]
    pub serotype: &'a str,
}

/// Best-effort normalization of metadata collection dates to 4-digit years.
///
/// `05-Jan-21` → `05-Jan-2021`, `Jan-21` → `Jan-2021`, `21` → `2021`; anything
/// else, including the unknown marker `U` and unparseable values, is returned
/// unchanged. Two-digit years `69`-`99` map to the 1900s and `00`-`68` to the
/// 2000s.
pub fn normalize_collection_date(date: &str) -> String {
    let parts: Vec<&str> = date.split('-').collect();
    let parsed = match parts.as_slice() {
        [day, month, year] => expand_year(year).and_then(|year| {
            NaiveDate::parse_from_str(&format!("{}-{}-{}", day, month, year), "%d-%b-%Y")
                .ok()
                .map(|d| d.format("%d-%b-%Y").to_string())
        }),
        [month, year] => expand_year(year).and_then(|year| {
            NaiveDate::parse_from_str(&format!("01-{}-{}", month, year), "%d-%b-%Y")
                .ok()
                .map(|d| d.format("%b-%Y").to_string())
        }),
        [year] if year.chars().count() == 2 && *year != "U" => expand_year(year)
            .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
            .map(|d| d.format("%Y").to_string()),
        _ => return date.to_string(),
    };
    parsed.unwrap_or_else(|| {
        debug!("Leaving collection date '{}' unchanged", date);
        date.to_string()
    })
}

fn expand_year(year: &str) -> Option<i32> {
    if year.is_empty() || year.len() > 2 || !year.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    Some(if year >= 69 { 1900 + year } else { 2000 + year })
}

/// Writes `<sample>.src` into the repository bundle, one row per segment.
pub fn write_source_table(
    workspace: &SampleWorkspace,
    row: &MetadataRow,
    sequences: &[SequenceRecord],
) -> Result<PathBuf> {
    let path = workspace.sample_file(workspace.submission_dir(), "src");
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(&path)
        .with_context(|| format!("Could not create source table {}", path.display()))?;
    let collection_date = normalize_collection_date(row.value(COLLECTION_DATE));
    for record in sequences {
        writer.serialize(SourceModifiers {
            sequence_id: &record.sequence_id,
            organism: row.value(ORGANISM),
            strain: row.value(STRAIN_NAME),
            country: row.value(COLLECTION_COUNTRY),
            host: row.value(HOST),
            collection_date: &collection_date,
            isolation_source: row.value(ISOLATION_SOURCE),
            serotype: row.value(SUBTYPE),
        })?;
    }
    writer.flush()?;
    Ok(path)
}

/// Removes the packaging tool's side outputs from the manual bundle.
pub fn remove_packager_side_outputs(workspace: &SampleWorkspace) -> Result<()> {
    for extension in PACKAGER_SIDE_OUTPUTS {
        let path = workspace.sample_file(workspace.manual_dir(), extension);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Could not remove {}", path.display()))?;
        }
    }
    Ok(())
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.contains(&e))
        .unwrap_or(false)
}

/// Zips every file in `dir` whose extension is in `extensions` into
/// `submission.zip` and deletes the zipped originals. Returns the archived
/// file names in archive order.
pub fn zip_bundle(dir: &Path, extensions: &[&str]) -> Result<Vec<String>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Could not list {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?
        .into_iter()
        .filter(|path| path.is_file() && has_extension(path, extensions))
        .collect();
    files.sort();

    let zip_path = dir.join(SUBMISSION_ZIP);
    let mut zip = ZipWriter::new(
        File::create(&zip_path)
            .with_context(|| format!("Could not create {}", zip_path.display()))?,
    );
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut names = Vec::with_capacity(files.len());
    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("Invalid bundle file {}", path.display()))?;
        zip.start_file(name.as_str(), options)?;
        let mut reader = BufReader::new(File::open(path)?);
        io::copy(&mut reader, &mut zip)?;
        names.push(name);
    }
    zip.finish()?;

    for path in &files {
        std::fs::remove_file(path)
            .with_context(|| format!("Could not remove zipped file {}", path.display()))?;
    }
    Ok(names)
}

pub fn write_ready_marker(dir: &Path) -> Result<()> {
    let marker = dir.join(READY_MARKER);
    File::create(&marker).with_context(|| format!("Could not create {}", marker.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn record(sample: &str, segment: u8, sequence: &str) -> SequenceRecord {
        SequenceRecord {
            sample_id: sample.to_string(),
            sequence_id: format!("{}-{}", sample, segment),
            header: format!(
                "Unique_Sample_Identifier:{}|Unique_Sequence_Identifier:{}-{}",
                sample, sample, segment
            ),
            sequence: sequence.to_string(),
        }
    }

    fn workspace(root: &Path) -> SampleWorkspace {
        let layout = OutputLayout::new(root);
        layout.create().unwrap();
        let workspace = layout.sample("S1");
        workspace.create().unwrap();
        workspace
    }

    #[test]
    fn test_normalize_collection_date() {
        assert_eq!(normalize_collection_date("05-Jan-21"), "05-Jan-2021");
        assert_eq!(normalize_collection_date("Jan-21"), "Jan-2021");
        assert_eq!(normalize_collection_date("21"), "2021");
        assert_eq!(normalize_collection_date("U"), "U");
        assert_eq!(normalize_collection_date("2021"), "2021");
        assert_eq!(normalize_collection_date("2021-01-05"), "2021-01-05");
        assert_eq!(normalize_collection_date("Foo-21"), "Foo-21");
        assert_eq!(normalize_collection_date(""), "");
        assert_eq!(normalize_collection_date("a-b-c-d"), "a-b-c-d");
    }

    #[test]
    fn test_two_digit_year_pivot() {
        assert_eq!(normalize_collection_date("05-Jan-69"), "05-Jan-1969");
        assert_eq!(normalize_collection_date("Dec-99"), "Dec-1999");
        assert_eq!(normalize_collection_date("68"), "2068");
        assert_eq!(normalize_collection_date("00"), "2000");
    }

    #[test]
    fn test_layout_paths() {
        let layout = OutputLayout::new(Path::new("/out"));
        let workspace = layout.sample("S1");
        assert_eq!(
            workspace.validation_dir(),
            Path::new("/out/SequenceValidation/S1")
        );
        assert_eq!(
            workspace.bundle_dir(BundleKind::Repository),
            Path::new("/out/Genbank_submission_files/Submission/S1")
        );
        assert_eq!(
            workspace.bundle_dir(BundleKind::ManualReview),
            Path::new("/out/Genbank_submission_files/ManualSubmission/S1")
        );
        assert_eq!(
            workspace.segment_fasta("S1-4"),
            Path::new("/out/SequenceValidation/S1/S1-4.fasta")
        );
    }

    #[test]
    fn test_write_sample_fasta_files() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace(dir.path());
        let sequences = vec![record("S1", 4, "ACGT"), record("S1", 6, "TTGA")];
        let segments = write_sample_fasta_files(&workspace, &sequences).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(std::fs::read_to_string(&segments[1]).unwrap(), ">S1-6\nTTGA\n");

        let sample_fasta = workspace.sample_file(workspace.validation_dir(), "fasta");
        let sample_fasta = std::fs::read_to_string(sample_fasta).unwrap();
        assert!(sample_fasta.starts_with(
            ">Unique_Sample_Identifier:S1|Unique_Sequence_Identifier:S1-4\nACGT\n"
        ));

        let fsa = workspace.sample_file(workspace.submission_dir(), "fsa");
        let fsa = std::fs::read_to_string(fsa).unwrap();
        assert_eq!(fsa, ">S1-4\nACGT\n>S1-6\nTTGA\n");
        assert!(workspace.sample_file(workspace.manual_dir(), "fsa").exists());
    }

    #[test]
    fn test_write_source_table() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace(dir.path());
        let row = MetadataRow::new(
            [
                (ORGANISM, "Influenza A virus"),
                (STRAIN_NAME, "A/duck/Ohio/1/2021"),
                (COLLECTION_COUNTRY, "USA"),
                (HOST, "Duck"),
                (COLLECTION_DATE, "05-Jan-21"),
                (ISOLATION_SOURCE, "cloacal swab"),
                (SUBTYPE, "H5N1"),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        );
        let path = write_source_table(&workspace, &row, &[record("S1", 4, "A")]).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(
            text,
            "Sequence_ID\tOrganism\tStrain\tCountry\tHost\tCollection-date\tIsolation-source\tSerotype\n\
S1-4\tInfluenza A virus\tA/duck/Ohio/1/2021\tUSA\tDuck\t05-Jan-2021\tcloacal swab\tH5N1\n"
        );
    }

    #[test]
    fn test_zip_bundle_rolls_up_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["S1.sbt", "S1.fsa", "S1.src", "S1.tbl", "notes.txt"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }
        let names = zip_bundle(dir.path(), BundleKind::Repository.extensions()).unwrap();
        assert_eq!(names, vec!["S1.fsa", "S1.sbt", "S1.src"]);
        assert!(!dir.path().join("S1.fsa").exists());
        // not in the repository extension set
        assert!(dir.path().join("S1.tbl").exists());
        assert!(dir.path().join("notes.txt").exists());

        let zipped = File::open(dir.path().join(SUBMISSION_ZIP)).unwrap();
        let mut archive = zip::ZipArchive::new(zipped).unwrap();
        assert_eq!(archive.len(), 3);
        let mut content = String::new();
        archive.by_name("S1.src").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "S1.src");
    }

    #[test]
    fn test_remove_side_outputs_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace(dir.path());
        for ext in ["gbf", "val", "sqn"] {
            std::fs::write(workspace.sample_file(workspace.manual_dir(), ext), "x").unwrap();
        }
        remove_packager_side_outputs(&workspace).unwrap();
        assert!(!workspace.sample_file(workspace.manual_dir(), "gbf").exists());
        assert!(!workspace.sample_file(workspace.manual_dir(), "val").exists());
        assert!(workspace.sample_file(workspace.manual_dir(), "sqn").exists());

        write_ready_marker(workspace.manual_dir()).unwrap();
        let marker = workspace.manual_dir().join(READY_MARKER);
        assert_eq!(std::fs::metadata(marker).unwrap().len(), 0);
    }
}
