//src/depth.rs

use std::path::Path;

use regex::Regex;

use crate::config::Resources;
use crate::error::{Result, ShovillError};
use crate::runner::{check_output, CommandRunner, ToolCommand};
use crate::types::ReadSet;

/// k used when counting unique k-mers for the genome size estimate.
pub const KMC_KMER_SIZE: usize = 21;
/// k-mers seen fewer times than this are treated as sequencing errors.
pub const KMC_MIN_COUNT: usize = 10;
/// Depth may exceed the target by this factor before reads are sub-sampled.
pub const SUBSAMPLE_TOLERANCE: f64 = 1.1;

const STAGE: &str = "estimate depth";

/// Pull the "unique counted k-mers" figure out of KMC's report.
pub fn parse_kmc_unique(report: &str) -> Result<u64> {
    let re = Regex::new(r"No\. of unique counted k-mers\s*:\s*(\d+)")
        .map_err(|e| ShovillError::parse(e.to_string()))?;
    re.captures(report)
        .and_then(|caps| caps[1].parse::<u64>().ok())
        .ok_or_else(|| {
            ShovillError::parse("could not find unique k-mer count in k-mer counter output")
        })
}

/// Estimate genome size as the number of solid unique k-mers in R1.
pub fn estimate_genome_size(
    runner: &mut dyn CommandRunner,
    r1: &Path,
    resources: &Resources,
    tmpdir: &Path,
) -> Result<u64> {
    let cmd = ToolCommand::new("kmc")
        .arg("-sm")
        .arg(format!("-m{}", resources.half_ram_gb()))
        .arg(format!("-t{}", resources.cpus))
        .arg(format!("-k{KMC_KMER_SIZE}"))
        .arg(format!("-ci{KMC_MIN_COUNT}"))
        .arg(r1)
        .arg(tmpdir.join("kmc"))
        .arg(tmpdir);

    let out = runner.run(STAGE, &cmd)?;
    // KMC prints its summary on stdout, but older builds used stderr
    parse_kmc_unique(&out.stdout).or_else(|_| parse_kmc_unique(&out.stderr))
}

/// Use the user's genome size if given, else count k-mers.
pub fn resolve_genome_size(
    user: Option<u64>,
    runner: &mut dyn CommandRunner,
    r1: &Path,
    resources: &Resources,
    tmpdir: &Path,
) -> Result<u64> {
    match user {
        Some(size) => {
            log::info!("Using genome size {size} bp");
            Ok(size)
        }
        None => {
            log::info!("Estimating genome size from unique {KMC_KMER_SIZE}-mers in R1");
            let size = estimate_genome_size(runner, r1, resources, tmpdir)?;
            log::info!("Estimated genome size: {size} bp");
            Ok(size)
        }
    }
}

/// Whole-number sequencing depth.
pub fn sequencing_depth(total_bp: u64, genome_size: u64) -> Result<u64> {
    if genome_size == 0 {
        return Err(ShovillError::config("genome size must be greater than zero"));
    }
    Ok(total_bp / genome_size)
}

/// Fraction of reads to keep, or `None` when no sub-sampling is needed.
/// A depth of exactly `SUBSAMPLE_TOLERANCE` times the target is left alone.
pub fn subsample_factor(depth: u64, target: u32) -> Option<f64> {
    if target == 0 || depth as f64 <= SUBSAMPLE_TOLERANCE * target as f64 {
        return None;
    }
    let factor = target as f64 / depth as f64;
    Some((factor * 1000.0).round() / 1000.0)
}

/// Draw `factor` of each mate file independently into `outdir`.
pub fn subsample_reads(
    runner: &mut dyn CommandRunner,
    reads: &ReadSet,
    factor: f64,
    seed: u32,
    outdir: &Path,
) -> Result<ReadSet> {
    let stage = "subsample";
    let sub1 = outdir.join("sub1.fq");
    let sub2 = outdir.join("sub2.fq");

    for (input, output) in [(&reads.pe1, &sub1), (&reads.pe2, &sub2)] {
        let cmd = ToolCommand::new("seqtk")
            .arg("sample")
            .arg(format!("-s{seed}"))
            .arg(input)
            .arg(format!("{factor:.3}"))
            .stdout_to(output);
        runner.run(stage, &cmd)?;
        check_output(stage, output)?;
    }
    Ok(ReadSet::paired(sub1, sub2))
}
