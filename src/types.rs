//src/types.rs

use std::fmt;
use std::path::{Path, PathBuf};

/// Length summary of the raw reads, taken once from R1.
/// `total_bp` is R1's base count doubled as a stand-in for the whole pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadStats {
    pub min_len: usize,
    pub max_len: usize,
    pub avg_len: usize,
    pub total_bp: u64,
}

/// Pipeline progress token. The derived ordering is the only order in which
/// stages may be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    RawReads,
    Trimmed,
    ReadCorrected,
    Stitched,
    Assembled,
    Polished,
    Finalized,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::RawReads => "raw reads",
            Stage::Trimmed => "trim",
            Stage::ReadCorrected => "read correction",
            Stage::Stitched => "stitch",
            Stage::Assembled => "assemble",
            Stage::Polished => "polish",
            Stage::Finalized => "finalize",
        };
        f.write_str(name)
    }
}

/// The read files currently feeding the pipeline: a pair plus an optional
/// file of stitched singletons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadSet {
    pub pe1: PathBuf,
    pub pe2: PathBuf,
    pub se: Option<PathBuf>,
}

impl ReadSet {
    pub fn paired(pe1: impl Into<PathBuf>, pe2: impl Into<PathBuf>) -> Self {
        Self {
            pe1: pe1.into(),
            pe2: pe2.into(),
            se: None,
        }
    }

    pub fn with_singletons(mut self, se: impl Into<PathBuf>) -> Self {
        self.se = Some(se.into());
        self
    }

    /// Singleton file, if one exists and holds any bytes.
    pub fn singletons(&self) -> Option<&Path> {
        self.se
            .as_deref()
            .filter(|p| std::fs::metadata(p).map(|m| m.len() > 0).unwrap_or(false))
    }
}

/// Simple length summary of a finished contig set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblySummary {
    pub num_contigs: usize,
    pub total_length: usize,
    pub largest_contig: usize,
    pub n50: usize,
}
