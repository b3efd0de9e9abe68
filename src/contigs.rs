//src/contigs.rs

use std::fmt::Write as FmtWrite;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use ahash::AHashMap;
use regex::Regex;

use crate::config::{BuildInfo, NameFormat};
use crate::corrections::CorrectionCounts;
use crate::error::{Result, ShovillError};
use crate::types::AssemblySummary;

/// Contigs shorter than this are dropped before polishing, whatever the
/// user's `--minlen`.
pub const MIN_POLISH_LEN: usize = 1000;
/// Residues per FASTA sequence line on output.
pub const FASTA_LINE_WIDTH: usize = 60;

/// One assembled sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Contig {
    pub id: String,
    pub seq: String,
    pub coverage: f64,
    pub corrections: usize,
    pub original_id: String,
    /// Free text written after the id on the header line.
    pub description: Option<String>,
}

impl Contig {
    pub fn new(id: impl Into<String>, seq: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            original_id: id.clone(),
            id,
            seq: seq.into(),
            coverage: 0.0,
            corrections: 0,
            description: None,
        }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// True when every residue is the same symbol (an empty sequence counts).
    pub fn is_homopolymer(&self) -> bool {
        let bytes = self.seq.as_bytes();
        match bytes.first() {
            Some(&first) => bytes.iter().all(|&b| b == first),
            None => true,
        }
    }
}

/// Header text with each whitespace run collapsed to a single `_`.
pub fn normalise_id(header: &str) -> String {
    header.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Ordered table of id patterns that carry a coverage figure, one per
/// assembler naming convention. The first match wins.
pub struct CoverageParser {
    patterns: Vec<Regex>,
}

impl CoverageParser {
    pub fn new() -> Result<Self> {
        let patterns = [
            // SPAdes and Velvet: NODE_1_length_1234_cov_45.6
            r"cov_(\d+(?:\.\d+)?)",
            // MEGAHIT: k141_1 flag=1 multi=45.0000 len=1234
            r"multi=(\d+(?:\.\d+)?)",
            // SKESA: Contig_1_45.6
            r"Contig_\d+_(\d+(?:\.\d+)?)",
        ]
        .iter()
        .map(|p| Regex::new(p).map_err(|e| ShovillError::parse(e.to_string())))
        .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Coverage encoded in `id`, or `None` if no pattern matches.
    pub fn extract(&self, id: &str) -> Option<f64> {
        self.patterns.iter().find_map(|re| {
            re.captures(id)
                .and_then(|caps| caps[1].parse::<f64>().ok())
        })
    }
}

/// Why a contig did not make it into the final set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TooShort,
    LowCoverage,
    Homopolymer,
}

/// Thresholds and naming for the final pass.
#[derive(Debug, Clone)]
pub struct FinalFilter<'a> {
    pub minlen: usize,
    pub mincov: f64,
    pub namefmt: &'a NameFormat,
    pub build: &'a BuildInfo,
}

impl FinalFilter<'_> {
    fn verdict(&self, contig: &Contig) -> Option<Rejection> {
        if contig.len() < self.minlen {
            Some(Rejection::TooShort)
        } else if contig.coverage < self.mincov {
            Some(Rejection::LowCoverage)
        } else if contig.is_homopolymer() {
            Some(Rejection::Homopolymer)
        } else {
            None
        }
    }
}

/// Counts from the final pass, for the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterReport {
    pub kept: usize,
    pub too_short: usize,
    pub low_coverage: usize,
    pub homopolymer: usize,
}

/// Contigs keyed by id. Processing order is always longest first.
#[derive(Debug, Clone, Default)]
pub struct ContigSet {
    contigs: AHashMap<String, Contig>,
}

impl ContigSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a contig, refusing duplicate ids.
    pub fn insert(&mut self, contig: Contig) -> Result<()> {
        if self.contigs.contains_key(&contig.id) {
            return Err(ShovillError::parse(format!(
                "duplicate contig id '{}'",
                contig.id
            )));
        }
        self.contigs.insert(contig.id.clone(), contig);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.contigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Contig> {
        self.contigs.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contig> {
        self.contigs.values()
    }

    /// Parse FASTA text. Blank lines are skipped and residues are kept as is.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut set = ContigSet::new();
        let mut current: Option<Contig> = None;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(header) = line.strip_prefix('>') {
                if let Some(done) = current.take() {
                    set.insert(done)?;
                }
                current = Some(Contig::new(normalise_id(header), String::new()));
            } else {
                match current.as_mut() {
                    Some(contig) => contig.seq.push_str(line),
                    None => {
                        return Err(ShovillError::parse(format!(
                            "sequence before first FASTA header at line {}",
                            line_no + 1
                        )))
                    }
                }
            }
        }
        if let Some(done) = current.take() {
            set.insert(done)?;
        }
        Ok(set)
    }

    pub fn read_fasta<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::parse(BufReader::new(file))
    }

    /// Contigs longest first, ties broken by id.
    pub fn by_length(&self) -> Vec<&Contig> {
        let mut sorted: Vec<&Contig> = self.contigs.values().collect();
        sorted.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.id.cmp(&b.id)));
        sorted
    }

    /// Set each contig's coverage from its id, falling back to `default`
    /// when the id carries none. The fallback is an assumed depth, not a
    /// measurement.
    pub fn assign_coverage(&mut self, parser: &CoverageParser, default: f64) -> usize {
        let mut fallbacks = 0;
        for contig in self.contigs.values_mut() {
            contig.coverage = match parser.extract(&contig.original_id) {
                Some(cov) => cov,
                None => {
                    fallbacks += 1;
                    default
                }
            };
        }
        if fallbacks > 0 {
            log::warn!(
                "{fallbacks} contig(s) have no coverage in their name, assuming {default}"
            );
        }
        fallbacks
    }

    /// Drop contigs shorter than `min_len`. Returns how many were removed.
    pub fn retain_min_length(&mut self, min_len: usize) -> usize {
        let before = self.contigs.len();
        self.contigs.retain(|_, c| c.len() >= min_len);
        before - self.contigs.len()
    }

    /// Rename every contig by removing `suffix` from its id, e.g. the
    /// `_pilon` tag added by the polisher.
    pub fn strip_id_suffix(self, suffix: &str) -> Result<Self> {
        let mut set = ContigSet::new();
        for (_, mut contig) in self.contigs {
            if let Some(stripped) = contig.id.strip_suffix(suffix) {
                contig.id = stripped.to_string();
                contig.original_id = contig.id.clone();
            }
            set.insert(contig)?;
        }
        Ok(set)
    }

    /// Copy sequences for ids present in `polished` over this set's
    /// sequences, keeping everything else.
    pub fn update_sequences(&mut self, polished: ContigSet) {
        for (id, contig) in polished.contigs {
            if let Some(existing) = self.contigs.get_mut(&id) {
                existing.seq = contig.seq;
            } else {
                log::warn!("polished contig '{id}' not found in the assembly, skipping");
            }
        }
    }

    /// Merge per-contig correction counts in by id.
    pub fn apply_corrections(&mut self, counts: &CorrectionCounts) {
        for contig in self.contigs.values_mut() {
            contig.corrections = counts.get(&contig.original_id);
        }
    }

    /// Final pass: drop short, low coverage and homopolymer contigs, then
    /// number the survivors from 1 in longest-first order.
    pub fn finalize(&self, filter: &FinalFilter) -> Result<(ContigSet, FilterReport)> {
        let ordered = self.by_length();
        let mut report = FilterReport::default();
        let mut out = ContigSet::new();
        let software = filter.build.software();

        for contig in ordered {
            let verdict = filter.verdict(contig);
            match verdict {
                Some(Rejection::TooShort) => report.too_short += 1,
                Some(Rejection::LowCoverage) => report.low_coverage += 1,
                Some(Rejection::Homopolymer) => report.homopolymer += 1,
                None => {}
            }
            if let Some(reason) = verdict {
                log::debug!(
                    "Removing {} ({} bp, cov {:.1}): {:?}",
                    contig.id,
                    contig.len(),
                    contig.coverage,
                    reason
                );
                continue;
            }

            report.kept += 1;
            let id = filter.namefmt.format(report.kept);
            let description = format!(
                "len={} cov={:.1} corr={} origname={} sw={} date={}",
                contig.len(),
                contig.coverage,
                contig.corrections,
                contig.original_id,
                software,
                filter.build.date
            );
            out.insert(Contig {
                id,
                seq: contig.seq.clone(),
                coverage: contig.coverage,
                corrections: contig.corrections,
                original_id: contig.original_id.clone(),
                description: Some(description),
            })?;
        }
        Ok((out, report))
    }

    /// Ids in output order.
    pub fn sorted_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.contigs.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// FASTA text sorted by id, wrapped at `FASTA_LINE_WIDTH`.
    pub fn to_fasta_string(&self) -> String {
        let mut output = String::new();
        for id in self.sorted_ids() {
            let contig = &self.contigs[id];
            match &contig.description {
                Some(desc) => writeln!(output, ">{} {}", contig.id, desc).unwrap(),
                None => writeln!(output, ">{}", contig.id).unwrap(),
            }
            for chunk in contig.seq.as_bytes().chunks(FASTA_LINE_WIDTH) {
                output.push_str(&String::from_utf8_lossy(chunk));
                output.push('\n');
            }
        }
        output
    }

    pub fn write_fasta<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(self.to_fasta_string().as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Count, total length, largest contig and N50.
    pub fn summary(&self) -> AssemblySummary {
        let mut lengths: Vec<usize> = self.contigs.values().map(Contig::len).collect();
        lengths.sort_unstable_by(|a, b| b.cmp(a));
        let total_length: usize = lengths.iter().sum();

        let mut n50 = 0;
        let mut cumulative = 0;
        for &length in &lengths {
            cumulative += length;
            if cumulative * 2 >= total_length {
                n50 = length;
                break;
            }
        }

        AssemblySummary {
            num_contigs: lengths.len(),
            total_length,
            largest_contig: lengths.first().copied().unwrap_or(0),
            n50,
        }
    }
}
