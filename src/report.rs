use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use csv::{Writer, WriterBuilder};

use crate::reconcile::ReportRow;

pub const REPORT_FILE_NAME: &str = "Sequence_Validation_Report.csv";
pub const REPORT_HEADER: [&str; 5] = [
    "Unique_Sequence_Identifier",
    "Segment",
    "Serotype",
    "Status",
    "Messages",
];

/// Append-only writer for the validation report. The header is written on
/// creation and every row is flushed as soon as it is appended.
pub struct ReportWriter {
    path: PathBuf,
    writer: Writer<File>,
    rows: usize,
    valid_rows: usize,
}

impl ReportWriter {
    pub fn create(path: &Path) -> Result<ReportWriter> {
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_path(path)
            .with_context(|| format!("Could not create report {}", path.display()))?;
        writer.write_record(REPORT_HEADER)?;
        writer.flush()?;
        Ok(ReportWriter {
            path: path.to_path_buf(),
            writer,
            rows: 0,
            valid_rows: 0,
        })
    }

    pub fn append(&mut self, row: &ReportRow) -> Result<()> {
        self.writer
            .serialize(row)
            .with_context(|| format!("Could not write to report {}", self.path.display()))?;
        self.writer.flush()?;
        self.rows += 1;
        if row.is_valid() {
            self.valid_rows += 1;
        }
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn valid_rows(&self) -> usize {
        self.valid_rows
    }

    pub fn close(mut self) -> Result<PathBuf> {
        self.writer.flush()?;
        Ok(self.path)
    }
}
