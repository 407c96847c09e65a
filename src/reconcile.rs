//! # reconcile.rs
//!
//! Folds the structural annotator and flu validator verdicts for one segment
//! into a single row of the validation report. The rules are applied in order:
//!
//! 1. Segment identity: the segment number in the sequence id must name the
//!    same segment the flu validator reports. A mismatch adds an `ERROR:`
//!    message and forces the flu validator status to `Failed`.
//! 2. Status: `VALID` only when the structural annotator processed the segment
//!    and the flu validator said `VALID`; otherwise both statuses side by side.
//! 3. Segment: the shared label when both tools agree, otherwise both labels.
//! 4. Without a coding-sequence record from the structural annotator, the row
//!    reports the structural side as empty with an `ERROR` status.
//!
//! `reconcile` is pure; it performs no I/O.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::annotator::{AnnotationStatus, Annotator, SegmentAnnotations};
use crate::segment;

pub const VALID: &str = "VALID";

/// One line of `Sequence_Validation_Report.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow {
    #[serde(rename = "Unique_Sequence_Identifier")]
    pub sequence_id: String,
    #[serde(rename = "Segment")]
    pub segment: String,
    #[serde(rename = "Serotype")]
    pub serotype: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Messages")]
    pub messages: String,
}

impl ReportRow {
    pub fn is_valid(&self) -> bool {
        self.status == VALID
    }
}

/// Returns the diagnostic for a flu validator segment that disagrees with the
/// segment number encoded in `sequence_id`, or `None` when they agree.
pub fn segment_mismatch(sequence_id: &str, reported_segment: &str) -> Option<String> {
    let number = segment::segment_number(sequence_id).unwrap_or("");
    match segment::segment_name(number) {
        Some(expected) if expected == reported_segment => None,
        Some(_) => Some(format!(
            "ERROR: Sequence segment id ({}) doesn't match with flu annotation segment result ({})",
            number, reported_segment
        )),
        None => Some(format!(
            "ERROR: Sequence segment id ({}) is not a known influenza segment number, flu annotation segment result ({})",
            number, reported_segment
        )),
    }
}

fn side_by_side(structural: &str, flu: &str) -> String {
    format!(
        "{}:{}, {}:{}",
        Annotator::StructuralAnnotator.report_tag(),
        structural,
        Annotator::FluValidator.report_tag(),
        flu
    )
}

pub fn reconcile(sequence_id: &str, annotations: &SegmentAnnotations) -> ReportRow {
    let structural = &annotations.structural;
    let flu = &annotations.flu;

    let mut flu_status = flu.status.clone();
    let mut messages = flu.messages.clone();
    if flu.output_found {
        if let Some(mismatch) = segment_mismatch(sequence_id, &flu.segment) {
            messages.push(mismatch);
            flu_status = AnnotationStatus::Failed;
        }
    }

    let (segment, status) = if annotations.cds.is_empty() {
        (
            side_by_side(" ", &flu.segment),
            side_by_side("ERROR", &flu_status.to_string()),
        )
    } else {
        let gene = annotations.cds.gene();
        let segment = if gene == flu.segment {
            flu.segment.clone()
        } else {
            side_by_side(gene, &flu.segment)
        };
        let status = if structural.status == AnnotationStatus::Processed
            && flu_status == AnnotationStatus::Valid
        {
            VALID.to_string()
        } else {
            side_by_side(&structural.status.to_string(), &flu_status.to_string())
        };
        (segment, status)
    };

    ReportRow {
        sequence_id: sequence_id.to_string(),
        segment,
        serotype: flu.serotype.clone().unwrap_or_default(),
        status,
        messages: messages.iter().join(", "),
    }
}
