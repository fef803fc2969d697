//! Normal-behavior training corpus: JSON Lines of
//! `{"syscalls": [...], "resources": {...}}` samples.
//!
//! Malformed lines are skipped and counted, never fatal — a corpus with a
//! few bad rows still trains.

use std::fmt;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Resource snapshot attached to a corpus sample.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CorpusResources {
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub mem_percent: f64,
    #[serde(default)]
    pub threads: u32,
}

/// One sample of normal behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalSample {
    pub syscalls: Vec<String>,
    #[serde(default)]
    pub resources: Option<CorpusResources>,
}

/// Result of a corpus load: usable samples plus the number of lines that
/// were dropped as malformed or empty.
#[derive(Debug, Clone, Default)]
pub struct CorpusLoad {
    pub samples: Vec<NormalSample>,
    pub skipped: usize,
}

#[derive(Debug)]
pub enum CorpusError {
    Io(std::io::Error),
}

impl fmt::Display for CorpusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "corpus io error: {}", err),
        }
    }
}

impl std::error::Error for CorpusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for CorpusError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

pub fn load_jsonl(path: impl AsRef<Path>) -> Result<CorpusLoad, CorpusError> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut load = CorpusLoad::default();
    for line in reader.lines() {
        let line = line?;
        parse_line(&line, &mut load);
    }
    Ok(load)
}

/// Parse from an in-memory string, same skip semantics as the file path.
pub fn load_str(content: &str) -> CorpusLoad {
    let mut load = CorpusLoad::default();
    for line in content.lines() {
        parse_line(line, &mut load);
    }
    load
}

fn parse_line(line: &str, load: &mut CorpusLoad) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }
    match serde_json::from_str::<NormalSample>(trimmed) {
        Ok(sample) if !sample.syscalls.is_empty() => load.samples.push(sample),
        _ => load.skipped += 1,
    }
}
