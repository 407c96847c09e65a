//! # metadata.rs
//!
//! Loads the per-sample metadata spreadsheet into a `SampleSheet`, keyed by the
//! trimmed `Sample Identifier` column. Each sample starts with an empty sequence
//! list which the driver fills from the demultiplexed FASTA input.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use csv::ReaderBuilder;
use getset::Getters;
use log::warn;

use crate::fasta::SequenceRecord;

pub const SAMPLE_IDENTIFIER: &str = "Sample Identifier";
pub const ORGANISM: &str = "Organism";
pub const STRAIN_NAME: &str = "Strain Name";
pub const COLLECTION_COUNTRY: &str = "Collection Country";
pub const HOST: &str = "Host";
pub const COLLECTION_DATE: &str = "Collection Date";
pub const ISOLATION_SOURCE: &str = "Isolation Source";
pub const SUBTYPE: &str = "Subtype";
pub const AUTHORS: &str = "Authors";
pub const PUBLICATION_TITLE: &str = "Publication Title";
pub const PUBLICATION_PMID: &str = "Publication PMID";

/// Columns the bundle assembler reads for every sample.
pub const REQUIRED_COLUMNS: [&str; 8] = [
    SAMPLE_IDENTIFIER,
    ORGANISM,
    STRAIN_NAME,
    COLLECTION_COUNTRY,
    HOST,
    COLLECTION_DATE,
    ISOLATION_SOURCE,
    SUBTYPE,
];

const BYTE_ORDER_MARK: char = '\u{feff}';

/// One metadata row, column order preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRow {
    fields: Vec<(String, String)>,
}

impl MetadataRow {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        MetadataRow { fields }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    /// Value of `column`, or an empty string when the column is absent.
    pub fn value(&self, column: &str) -> &str {
        self.get(column).unwrap_or("")
    }
}

#[derive(Debug, Clone, Getters)]
pub struct SampleRecord {
    #[getset(get = "pub")]
    sample_id: String,
    #[getset(get = "pub")]
    row: MetadataRow,
    #[getset(get = "pub")]
    sequences: Vec<SequenceRecord>,
}

impl SampleRecord {
    pub fn new(sample_id: String, row: MetadataRow) -> Self {
        SampleRecord {
            sample_id,
            row,
            sequences: Vec::new(),
        }
    }

    pub fn push_sequence(&mut self, record: SequenceRecord) {
        self.sequences.push(record);
    }
}

/// All samples from the metadata file, in file order.
#[derive(Debug, Default)]
pub struct SampleSheet {
    samples: Vec<SampleRecord>,
    index: HashMap<String, usize>,
}

impl SampleSheet {
    /// Reads and parses the metadata file.
    ///
    /// # Errors
    /// Fails if the file is missing, unreadable, empty, not valid CSV, or lacks
    /// one of the required columns.
    pub fn from_path(path: &Path) -> Result<SampleSheet> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read metadata file {}", path.display()))?;
        if text.trim().is_empty() {
            return Err(anyhow!("Metadata file {} is empty", path.display()));
        }
        SampleSheet::from_csv_str(&text)
            .with_context(|| format!("Could not parse metadata file {}", path.display()))
    }

    pub fn from_csv_str(text: &str) -> Result<SampleSheet> {
        let text = text.strip_prefix(BYTE_ORDER_MARK).unwrap_or(text);
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .filter(|column| !headers.iter().any(|h| h == *column))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(anyhow!(
                "Metadata header is missing required column(s): {}",
                missing.join(", ")
            ));
        }

        let mut sheet = SampleSheet::default();
        for result in reader.records() {
            let record = result?;
            let fields = headers
                .iter()
                .cloned()
                .zip(record.iter().map(str::to_string))
                .collect();
            let row = MetadataRow::new(fields);
            let sample_id = row.value(SAMPLE_IDENTIFIER).trim().to_string();
            if sample_id.is_empty() {
                warn!("Skipping metadata row without a sample identifier");
                continue;
            }
            sheet.insert(SampleRecord::new(sample_id, row));
        }
        Ok(sheet)
    }

    fn insert(&mut self, sample: SampleRecord) {
        match self.index.get(&sample.sample_id) {
            Some(&position) => {
                warn!(
                    "Sample {} appears more than once in the metadata, keeping the last row",
                    sample.sample_id
                );
                self.samples[position] = sample;
            }
            None => {
                self.index
                    .insert(sample.sample_id.clone(), self.samples.len());
                self.samples.push(sample);
            }
        }
    }

    pub fn get_mut(&mut self, sample_id: &str) -> Option<&mut SampleRecord> {
        let position = *self.index.get(sample_id)?;
        self.samples.get_mut(position)
    }

    pub fn samples(&self) -> &[SampleRecord] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
