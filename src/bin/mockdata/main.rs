//! Generates a reproducible mock submission job: a multiplexed FASTA file, a
//! matching `metadata.csv` and a `job.json` with the FASTA inlined.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use rand::Rng;
use rand::SeedableRng;
use rand::prelude::IndexedRandom;
use rand_chacha::ChaCha8Rng;
use tap::Pipe;

use flu_submission::config::{InputSource, JobDescriptor};
use flu_submission::fasta::{SAMPLE_TOKEN, SEQUENCE_TOKEN};
use flu_submission::metadata::{
    AUTHORS, COLLECTION_COUNTRY, COLLECTION_DATE, HOST, ISOLATION_SOURCE, ORGANISM,
    PUBLICATION_PMID, PUBLICATION_TITLE, SAMPLE_IDENTIFIER, STRAIN_NAME, SUBTYPE,
};
use flu_submission::segment::SEGMENTS;

const LINE_WIDTH: usize = 70;

/// Approximate influenza A segment lengths, PB2 to NS.
const SEGMENT_LENGTHS: [usize; 8] = [2341, 2341, 2233, 1778, 1565, 1413, 1027, 890];

const HOSTS: [&str; 4] = ["Duck", "Chicken", "Swine", "Homo sapiens"];
const COUNTRIES: [&str; 3] = ["USA", "Canada", "Mexico"];
const SUBTYPES: [&str; 4] = ["H1N1", "H3N2", "H5N1", "H9N2"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(Debug, Parser)]
#[command(name = "mockdata", about = "Generates a mock influenza submission job")]
struct MockConfig {
    /// Number of samples
    #[arg(short, long, default_value_t = 3)]
    samples: usize,
    /// RNG seed
    #[arg(long, default_value_t = 2025)]
    seed: u64,
    /// Output directory
    #[arg(short, long, default_value = "sim_data")]
    output: PathBuf,
}

struct MockSample {
    sample_id: String,
    host: &'static str,
    country: &'static str,
    subtype: &'static str,
    collection_date: String,
    segments: Vec<(String, String)>,
}

fn random_sequence(rng: &mut ChaCha8Rng, length: usize) -> Result<String> {
    let bases = [b'A', b'C', b'G', b'T'];
    (0..length)
        .map(|_| *bases.choose(rng).unwrap_or(&b'N'))
        .collect::<Vec<u8>>()
        .pipe(String::from_utf8)
        .context("Generated sequence is not valid UTF-8")
}

fn mock_sample(rng: &mut ChaCha8Rng, index: usize) -> Result<MockSample> {
    let sample_id = format!("MOCK{:03}", index + 1);
    let mut segments = Vec::with_capacity(SEGMENTS.len());
    for ((number, _), length) in SEGMENTS.iter().zip(SEGMENT_LENGTHS) {
        // trim a few bases to mimic incomplete segment ends
        let length = length - rng.random_range(0..25);
        segments.push((
            format!("{}-{}", sample_id, number),
            random_sequence(rng, length)?,
        ));
    }
    let collection_date = match rng.random_range(0..3) {
        0 => format!(
            "{:02}-{}-{:02}",
            rng.random_range(1..=28),
            MONTHS[rng.random_range(0..12)],
            rng.random_range(18..=24)
        ),
        1 => format!("{}-{:02}", MONTHS[rng.random_range(0..12)], rng.random_range(18..=24)),
        _ => format!("{:02}", rng.random_range(18..=24)),
    };
    Ok(MockSample {
        sample_id,
        host: HOSTS[rng.random_range(0..HOSTS.len())],
        country: COUNTRIES[rng.random_range(0..COUNTRIES.len())],
        subtype: SUBTYPES[rng.random_range(0..SUBTYPES.len())],
        collection_date,
        segments,
    })
}

fn fasta_text(samples: &[MockSample]) -> String {
    let mut text = String::new();
    for sample in samples {
        for (sequence_id, sequence) in &sample.segments {
            text.push_str(&format!(
                ">{}{}|{}{}\n",
                SAMPLE_TOKEN, sample.sample_id, SEQUENCE_TOKEN, sequence_id
            ));
            for line in sequence.as_bytes().chunks(LINE_WIDTH) {
                text.push_str(&String::from_utf8_lossy(line));
                text.push('\n');
            }
        }
    }
    text
}

fn write_metadata(path: &Path, samples: &[MockSample]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Could not create {}", path.display()))?;
    writer.write_record([
        SAMPLE_IDENTIFIER,
        ORGANISM,
        STRAIN_NAME,
        COLLECTION_COUNTRY,
        HOST,
        COLLECTION_DATE,
        ISOLATION_SOURCE,
        SUBTYPE,
        AUTHORS,
        PUBLICATION_TITLE,
        PUBLICATION_PMID,
    ])?;
    for sample in samples {
        let strain = format!(
            "A/{}/{}/{}/20{}",
            sample.host.to_lowercase(),
            sample.country,
            sample.sample_id,
            sample.collection_date.rsplit('-').next().unwrap_or("24")
        );
        writer.write_record([
            sample.sample_id.as_str(),
            "Influenza A virus",
            strain.as_str(),
            sample.country,
            sample.host,
            sample.collection_date.as_str(),
            "swab",
            sample.subtype,
            "Jane Q Doe, John Smith",
            "unpublished",
            "",
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let config = MockConfig::parse();
    std::fs::create_dir_all(&config.output)
        .with_context(|| format!("Could not create {}", config.output.display()))?;

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let samples = (0..config.samples)
        .map(|index| mock_sample(&mut rng, index))
        .collect::<Result<Vec<_>>>()?;

    let fasta = fasta_text(&samples);
    let fasta_path = config.output.join("mockseq.fasta");
    let mut writer = BufWriter::new(File::create(&fasta_path)?);
    writer.write_all(fasta.as_bytes())?;
    writer.flush()?;

    let metadata_path = config.output.join("metadata.csv");
    write_metadata(&metadata_path, &samples)?;

    let job = JobDescriptor {
        input_source: InputSource::FastaData,
        input_fasta_file: None,
        input_fasta_data: Some(fasta),
        metadata: metadata_path.display().to_string(),
        output_file: "mock_run".to_string(),
        first_name: "Jane".to_string(),
        last_name: "Doe".to_string(),
        email: "jane.doe@example.org".to_string(),
        affiliation: Some("Example Institute".to_string()),
        consortium: None,
    };
    let job_path = config.output.join("job.json");
    serde_json::to_writer_pretty(File::create(&job_path)?, &job)?;

    println!(
        "{} {} samples written to {}",
        "✅".green(),
        samples.len(),
        config.output.display()
    );
    Ok(())
}
