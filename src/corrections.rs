//src/corrections.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ahash::AHashMap;
use regex::Regex;

use crate::error::{Result, ShovillError};

/// Number of polisher changes per contig id.
#[derive(Debug, Clone, Default)]
pub struct CorrectionCounts {
    counts: AHashMap<String, usize>,
}

impl CorrectionCounts {
    pub fn add(&mut self, contig_id: &str) {
        *self.counts.entry(contig_id.to_string()).or_insert(0) += 1;
    }

    /// Changes recorded for `contig_id`, zero if none.
    pub fn get(&self, contig_id: &str) -> usize {
        self.counts.get(contig_id).copied().unwrap_or(0)
    }

    /// Distinct contigs with at least one change.
    pub fn contigs_touched(&self) -> usize {
        self.counts.len()
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Parse a polisher diff report. Lines look like
    /// ```text
    /// NODE_2_length_262460_cov_28.4:1234-1236 NODE_2_length_262460_cov_28.4_pilon:1234 ACG .
    /// ```
    /// Each line whose first field is `<id>:<pos>[-<pos>]` counts once
    /// against `<id>`; anything else is ignored.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let re = Regex::new(r"^(\S+):\d+(?:-\d+)?(?:\s|$)")
            .map_err(|e| ShovillError::parse(e.to_string()))?;

        let mut counts = CorrectionCounts::default();
        for line in reader.lines() {
            let line = line?;
            match re.captures(&line) {
                Some(caps) => counts.add(&caps[1]),
                None => {
                    if !line.trim().is_empty() {
                        log::debug!("Skipping unrecognised change line: {line}");
                    }
                }
            }
        }
        Ok(counts)
    }

    pub fn read_changes<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::parse(BufReader::new(file))
    }
}
