//! # flu_report.rs
//!
//! Grammar for the colorized per-segment report written by the flu validator
//! (`<stem>_FLAN.report`). The report has no formal structure, so each line is
//! classified by the first matching rule:
//!
//! 1. `Reset`: the raw line starts with the `ESC[0m` reset sequence.
//! 2. `Blank`: nothing left after trimming.
//! 3. `FastaName`: contains `Fasta`; the echoed input name is the second
//!    space-separated token.
//! 4. `Diagnostic`: contains `WARNING` or `ERROR` (case-sensitive).
//! 5. `Serotype`: contains `serotype` in any case; the value sits after the
//!    first colon.
//! 6. `SegmentResult`: any other line with at least six whitespace tokens;
//!    token 2 is the verdict and token 6 the segment, both stripped of ANSI
//!    codes and brackets.
//!
//! Lines that match no rule are `Unrecognized` and ignored. For the fasta name,
//! serotype and segment result the last matching line wins; diagnostics
//! accumulate in order.

use std::sync::LazyLock;

use log::{debug, warn};
use regex::Regex;

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("valid ANSI regex"));

const RESET_PREFIX: &str = "\x1b[0m";
const RESULT_TOKEN: usize = 1;
const SEGMENT_TOKEN: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum ReportLine {
    Reset,
    Blank,
    FastaName(String),
    Diagnostic(String),
    Serotype(String),
    SegmentResult { result: String, segment: String },
    Unrecognized(String),
}

/// Fields recovered from one flu validator report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FluReport {
    pub fasta_name: Option<String>,
    pub result: Option<String>,
    pub segment: Option<String>,
    pub serotype: Option<String>,
    pub diagnostics: Vec<String>,
    /// Number of lines classified as segment results.
    pub segment_lines: usize,
}

pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

fn clean_diagnostic(line: &str) -> String {
    strip_ansi(line).replace("/0B", "")
}

pub fn classify_line(raw: &str) -> ReportLine {
    if raw.starts_with(RESET_PREFIX) {
        return ReportLine::Reset;
    }
    let trimmed = raw.trim();
    let plain = strip_ansi(trimmed);
    let plain = plain.trim();
    if plain.is_empty() {
        return ReportLine::Blank;
    }

    if plain.contains("Fasta") {
        return match plain.split(' ').nth(1) {
            Some(name) => ReportLine::FastaName(name.to_string()),
            None => ReportLine::Unrecognized(plain.to_string()),
        };
    }
    if plain.contains("WARNING") || plain.contains("ERROR") {
        return ReportLine::Diagnostic(clean_diagnostic(trimmed));
    }
    if plain.to_lowercase().contains("serotype") {
        return match plain.split(':').nth(1) {
            Some(value) => ReportLine::Serotype(value.trim().to_string()),
            None => ReportLine::Unrecognized(plain.to_string()),
        };
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    if tokens.len() <= SEGMENT_TOKEN {
        return ReportLine::Unrecognized(plain.to_string());
    }
    let result = strip_ansi(tokens[RESULT_TOKEN]);
    let segment = strip_ansi(tokens[SEGMENT_TOKEN]).replace(['[', ']'], "");
    ReportLine::SegmentResult { result, segment }
}

pub fn parse_report(text: &str) -> FluReport {
    let mut report = FluReport::default();
    for line in text.lines() {
        match classify_line(line) {
            ReportLine::Reset | ReportLine::Blank => {}
            ReportLine::FastaName(name) => report.fasta_name = Some(name),
            ReportLine::Diagnostic(message) => report.diagnostics.push(message),
            ReportLine::Serotype(serotype) => report.serotype = Some(serotype),
            ReportLine::SegmentResult { result, segment } => {
                report.result = Some(result);
                report.segment = Some(segment);
                report.segment_lines += 1;
            }
            ReportLine::Unrecognized(line) => debug!("Ignoring flu report line: {}", line),
        }
    }
    if report.segment_lines > 1 {
        warn!(
            "Flu report has {} segment result lines, using the last one",
            report.segment_lines
        );
    }
    report
}
