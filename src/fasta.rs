//! # fasta.rs
//!
//! Demultiplexes the submission FASTA input into per-sample `SequenceRecord`s.
//!
//! Every header must carry both identifiers, separated by `|`:
//!
//! ```text
//! >Unique_Sample_Identifier:S1|Unique_Sequence_Identifier:S1-4
//! ```
//!
//! Sequence lines may be wrapped; they are concatenated with spaces and
//! carriage returns removed. A malformed header is fatal and ends the stream.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use bio::io::fasta;
use flate2::read::MultiGzDecoder;

use crate::segment;

pub const SAMPLE_TOKEN: &str = "Unique_Sample_Identifier:";
pub const SEQUENCE_TOKEN: &str = "Unique_Sequence_Identifier:";

/// One demultiplexed FASTA record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    /// Sample the sequence belongs to.
    pub sample_id: String,
    /// `<sample>-<segment-number>`
    pub sequence_id: String,
    /// Header text without the leading `>`.
    pub header: String,
    pub sequence: String,
}

impl SequenceRecord {
    pub fn segment_name(&self) -> Option<&'static str> {
        segment::segment_for_sequence(&self.sequence_id)
    }
}

#[derive(Debug)]
struct PendingHeader {
    header: String,
    sample_id: String,
    sequence_id: String,
}

/// Lazy, single-pass iterator over the records of a FASTA stream.
pub struct FastaDemultiplexer<R> {
    lines: Lines<R>,
    current: Option<PendingHeader>,
    buffer: String,
    finished: bool,
}

impl<R: BufRead> FastaDemultiplexer<R> {
    pub fn new(reader: R) -> Self {
        FastaDemultiplexer {
            lines: reader.lines(),
            current: None,
            buffer: String::new(),
            finished: false,
        }
    }

    fn flush(&mut self, pending: PendingHeader) -> SequenceRecord {
        SequenceRecord {
            sample_id: pending.sample_id,
            sequence_id: pending.sequence_id,
            header: pending.header,
            sequence: std::mem::take(&mut self.buffer),
        }
    }

    fn fail(&mut self, err: anyhow::Error) -> Option<Result<SequenceRecord>> {
        self.finished = true;
        Some(Err(err))
    }
}

impl<R: BufRead> Iterator for FastaDemultiplexer<R> {
    type Item = Result<SequenceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            match self.lines.next() {
                Some(Ok(line)) => {
                    if let Some(header) = line.strip_prefix('>') {
                        let parsed = match parse_header(header) {
                            Ok(parsed) => parsed,
                            Err(err) => return self.fail(err),
                        };
                        if let Some(previous) = self.current.replace(parsed) {
                            return Some(Ok(self.flush(previous)));
                        }
                    } else if self.current.is_some() {
                        append_sequence_line(&mut self.buffer, &line);
                    }
                    // lines before the first header are ignored
                }
                Some(Err(err)) => return self.fail(err.into()),
                None => {
                    self.finished = true;
                    return match self.current.take() {
                        Some(last) => Some(Ok(self.flush(last))),
                        None => Some(Err(anyhow!("No FASTA header found in the input"))),
                    };
                }
            }
        }
    }
}

fn append_sequence_line(buffer: &mut String, line: &str) {
    buffer.extend(line.trim_end().chars().filter(|c| *c != ' ' && *c != '\r'));
}

fn parse_header(raw: &str) -> Result<PendingHeader> {
    let header = raw.trim_end().to_string();
    let mut sample_id = None;
    let mut sequence_id = None;
    for token in header.split('|') {
        let token = token.trim();
        if let Some(id) = token.strip_prefix(SAMPLE_TOKEN) {
            sample_id = Some(id.trim().to_string());
        } else if let Some(id) = token.strip_prefix(SEQUENCE_TOKEN) {
            sequence_id = Some(id.trim().to_string());
        }
    }
    match (sample_id, sequence_id) {
        (Some(sample_id), Some(sequence_id))
            if !sample_id.is_empty() && !sequence_id.is_empty() =>
        {
            Ok(PendingHeader {
                header,
                sample_id,
                sequence_id,
            })
        }
        _ => Err(anyhow!(
            "Malformed FASTA header '>{}': expected '{}<id>|{}<id>'",
            header,
            SAMPLE_TOKEN,
            SEQUENCE_TOKEN
        )),
    }
}

/// Opens a FASTA input, transparently decoding `.gz` files.
pub fn open_fasta_input(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)
        .with_context(|| format!("Could not open FASTA input {}", path.display()))?;
    let is_gzip = path
        .file_name()
        .map(|name| name.to_string_lossy().ends_with(".gz"))
        .unwrap_or(false);
    if is_gzip {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(BufReader::new(
            file,
        )))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Writes `(header, sequence)` pairs to a FASTA file.
pub fn write_fasta<'a, I>(path: &Path, records: I) -> Result<()>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut writer = fasta::Writer::to_file(path)
        .with_context(|| format!("Could not create FASTA file {}", path.display()))?;
    for (header, sequence) in records {
        writer.write(header, None, sequence.as_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn demux(text: &str) -> Vec<Result<SequenceRecord>> {
        FastaDemultiplexer::new(Cursor::new(text.to_string())).collect()
    }

    #[test]
    fn test_wrapped_records_in_order() {
        let wrapped = ["ACGTACGT", "AC GT\r", "TTTT  "];
        let mut text = String::new();
        for i in 1..=3 {
            text.push_str(&format!(
                ">{}S1|{}S1-{}\n",
                SAMPLE_TOKEN, SEQUENCE_TOKEN, i
            ));
            for line in wrapped.iter() {
                text.push_str(line);
                text.push('\n');
            }
        }
        let records: Vec<SequenceRecord> = demux(&text).into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 3);
        let expected: String = wrapped
            .concat()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.sample_id, "S1");
            assert_eq!(record.sequence_id, format!("S1-{}", i + 1));
            assert_eq!(record.sequence, expected);
        }
        assert_eq!(
            records[0].header,
            "Unique_Sample_Identifier:S1|Unique_Sequence_Identifier:S1-1"
        );
        assert_eq!(records[2].segment_name(), Some("PA"));
    }

    #[test]
    fn test_header_tokens_are_trimmed() {
        let text = ">Unique_Sample_Identifier: S9 | Unique_Sequence_Identifier: S9-8 \r\nAC\r\n";
        let records: Vec<SequenceRecord> = demux(text).into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(records[0].sample_id, "S9");
        assert_eq!(records[0].sequence_id, "S9-8");
        assert_eq!(records[0].sequence, "AC");
        assert_eq!(records[0].segment_name(), Some("NS"));
    }

    #[test]
    fn test_malformed_header_is_fatal() {
        let text = format!(
            ">{}S1|{}S1-1\nACGT\n>S1-2\nACGT\n>{}S1|{}S1-3\nACGT\n",
            SAMPLE_TOKEN, SEQUENCE_TOKEN, SAMPLE_TOKEN, SEQUENCE_TOKEN
        );
        let results = demux(&text);
        assert_eq!(results.len(), 1);
        let err = results.into_iter().next().unwrap().unwrap_err();
        assert!(err.to_string().contains("Malformed FASTA header '>S1-2'"));
    }

    #[test]
    fn test_stream_without_header() {
        let results = demux("ACGT\nACGT\n");
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
        assert_eq!(demux("").len(), 1);
    }

    #[test]
    fn test_write_fasta() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fasta");
        write_fasta(&path, vec![("S1-1", "ACGT"), ("S1-2", "TTGG")]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, ">S1-1\nACGT\n>S1-2\nTTGG\n");
    }
}
