//! # segment.rs
//!
//! Fixed lookup tables for influenza submissions:
//! - the genomic segment number → segment name table (PB2 … NS),
//! - the organism → structural annotator reference database table.
//!
//! Both tables are immutable constants and are never extended at runtime.

/// Influenza A/B segment numbers and the segment each encodes.
pub const SEGMENTS: [(&str, &str); 8] = [
    ("1", "PB2"),
    ("2", "PB1"),
    ("3", "PA"),
    ("4", "HA"),
    ("5", "NP"),
    ("6", "NA"),
    ("7", "MP"),
    ("8", "NS"),
];

/// Organism name (lowercase) → VIGOR4 reference database.
pub const ANNOTATION_DATABASES: [(&str, &str); 3] = [
    ("influenza a virus", "flua"),
    ("influenza b virus", "flub"),
    ("influenza c virus", "fluc"),
];

/// Returns the segment name for a segment number such as `"4"`.
pub fn segment_name(number: &str) -> Option<&'static str> {
    SEGMENTS
        .iter()
        .find(|(n, _)| *n == number)
        .map(|(_, name)| *name)
}

/// Extracts the segment number from a sequence id of the form `<sample>-<n>`.
///
/// The number is whatever follows the last dash, so sample ids may contain
/// dashes themselves.
pub fn segment_number(sequence_id: &str) -> Option<&str> {
    sequence_id
        .rsplit_once('-')
        .map(|(_, number)| number)
        .filter(|number| !number.is_empty())
}

/// Resolves the segment name for a full sequence id.
pub fn segment_for_sequence(sequence_id: &str) -> Option<&'static str> {
    segment_number(sequence_id).and_then(segment_name)
}

/// Looks up the annotator reference database for an organism, ignoring case.
pub fn annotation_database(organism: &str) -> Option<&'static str> {
    let organism = organism.trim().to_lowercase();
    ANNOTATION_DATABASES
        .iter()
        .find(|(name, _)| *name == organism)
        .map(|(_, db)| *db)
}
