// src/lib.rs
pub mod assemble;
pub mod config;
pub mod contigs;
pub mod corrections;
pub mod deps;
pub mod depth;
pub mod error;
pub mod fastq;
pub mod kmers;
pub mod logging;
pub mod runner;
pub mod stages;
pub mod types;

use std::fmt::Write as FmtWrite;
use std::path::{Path, PathBuf};

use crate::config::RunConfig;
use crate::assemble::Assembler;
use crate::contigs::{ContigSet, CoverageParser, FilterReport, FinalFilter, MIN_POLISH_LEN};
use crate::corrections::CorrectionCounts;
use crate::deps::{check_dependencies, ToolVersion};
use crate::depth::{resolve_genome_size, sequencing_depth, subsample_factor, subsample_reads};
use crate::error::{Result, ShovillError};
use crate::fastq::read_stats;
use crate::kmers::KmerPlan;
use crate::runner::CommandRunner;
use crate::stages::Sequencer;
use crate::types::{AssemblySummary, ReadSet, ReadStats};

/// Suffix the polisher appends to every contig id.
const POLISHER_SUFFIX: &str = "_pilon";

/// Where a finished run left its artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFiles {
    pub contigs: PathBuf,
    pub raw_assembly: PathBuf,
    pub graph: Option<PathBuf>,
    pub corrections: Option<PathBuf>,
}

/// Everything a finished run produced. Text forms are generated on demand.
#[derive(Debug)]
pub struct RunResults {
    pub read_stats: ReadStats,
    pub genome_size: u64,
    /// Depth of the raw reads, before any sub-sampling.
    pub depth: u64,
    pub subsample: Option<f64>,
    pub kmers: KmerPlan,
    pub minlen: usize,

    /// The final, renamed contigs
    pub contigs: ContigSet,
    pub filter_report: FilterReport,
    pub corrections: Option<CorrectionCounts>,
    pub summary: AssemblySummary,
    pub outputs: OutputFiles,
}

impl RunResults {
    /// Final contigs as FASTA
    pub fn get_contigs_fasta(&self) -> String {
        self.contigs.to_fasta_string()
    }

    /// One `key<TAB>value` line per run statistic
    pub fn get_summary_text(&self) -> String {
        let mut output = String::new();
        let rows: [(&str, String); 9] = [
            ("genome_size", self.genome_size.to_string()),
            ("depth", self.depth.to_string()),
            (
                "subsample",
                self.subsample
                    .map(|f| format!("{f:.3}"))
                    .unwrap_or_else(|| "none".to_string()),
            ),
            ("kmers", self.kmers.to_list()),
            ("contigs", self.summary.num_contigs.to_string()),
            ("total_length", self.summary.total_length.to_string()),
            ("largest_contig", self.summary.largest_contig.to_string()),
            ("n50", self.summary.n50.to_string()),
            (
                "corrections",
                self.corrections
                    .as_ref()
                    .map(|c| c.total().to_string())
                    .unwrap_or_else(|| "0".to_string()),
            ),
        ];
        for (key, value) in rows {
            writeln!(output, "{key}\t{value}").unwrap();
        }
        output
    }
}

/// Create the output folder. An existing one is an error unless `force`,
/// in which case it is removed first.
pub fn prepare_outdir(outdir: &Path, force: bool) -> Result<()> {
    if outdir.exists() {
        if !force {
            return Err(ShovillError::config(format!(
                "folder '{}' already exists, use --force to overwrite it",
                outdir.display()
            )));
        }
        log::info!("Removing existing folder {}", outdir.display());
        std::fs::remove_dir_all(outdir)?;
    }
    std::fs::create_dir_all(outdir)?;
    Ok(())
}

/// Check `programs` and only then create the output folder, so a missing
/// tool never costs an existing `--force` target.
pub fn prepare_run(cfg: &RunConfig, programs: &[&str]) -> Result<Vec<ToolVersion>> {
    let tools = check_dependencies(programs)?;
    prepare_outdir(&cfg.outdir, cfg.force)?;
    Ok(tools)
}

/// The user's k-mer list if `assembler` takes one.
pub fn assembler_kmers(assembler: Assembler, kmers: Option<&str>) -> Option<&str> {
    match kmers {
        Some(_) if !assembler.uses_kmers() => {
            log::warn!("{assembler} chooses its own k-mers, ignoring --kmers");
            None
        }
        _ => kmers,
    }
}

/// Contig length floor for the final pass. Zero means half the average
/// read length.
pub fn effective_minlen(minlen: usize, avg_read_len: usize) -> usize {
    if minlen == 0 {
        avg_read_len / 2
    } else {
        minlen
    }
}

/// Run the whole pipeline into `cfg.outdir`, which must already exist.
pub fn run_pipeline(cfg: &RunConfig, runner: &mut dyn CommandRunner) -> Result<RunResults> {
    // 1. Scratch space for tools that want a temp folder
    let tmp_base = cfg.tmpdir.clone().unwrap_or_else(std::env::temp_dir);
    let tmpdir = tempfile::Builder::new()
        .prefix("shovill.")
        .tempdir_in(&tmp_base)?;
    log::info!("Using tmpdir {}", tmpdir.path().display());

    // 2. Read statistics and derived settings
    let stats = read_stats(&cfg.r1)?;
    log::info!(
        "Read stats: min_len={} max_len={} avg_len={} total_bp={}",
        stats.min_len,
        stats.max_len,
        stats.avg_len,
        stats.total_bp
    );
    let plan = KmerPlan::new(stats.avg_len, assembler_kmers(cfg.assembler, cfg.kmers.as_deref()))?;
    log::info!("K-mers: {}", plan.to_list());
    let minlen = effective_minlen(cfg.minlen, stats.avg_len);
    if cfg.minlen == 0 {
        log::info!("Minimum contig length set to {minlen} (half the average read length)");
    }

    // 3. Genome size, depth and sub-sampling
    let genome_size = resolve_genome_size(cfg.gsize, runner, &cfg.r1, &cfg.resources, tmpdir.path())?;
    let depth = sequencing_depth(stats.total_bp, genome_size)?;
    log::info!("Estimated sequencing depth: {depth}x");

    let mut reads = ReadSet::paired(&cfg.r1, &cfg.r2);
    let subsample = subsample_factor(depth, cfg.depth);
    match subsample {
        Some(factor) => {
            log::info!("Sub-sampling reads by factor {factor:.3} to get {}x", cfg.depth);
            reads = subsample_reads(runner, &reads, factor, cfg.seed, &cfg.outdir)?;
        }
        None => log::info!("No read depth reduction requested or necessary"),
    }
    let subsampled = subsample.map(|_| reads.clone());

    // 4. Read preparation and assembly
    let mut seq = Sequencer::new(cfg, runner, reads, tmpdir.path());
    if let Some(sub) = subsampled {
        seq.register_scratch(sub.pe1);
        seq.register_scratch(sub.pe2);
    }
    seq.trim()?;
    seq.correct(genome_size)?;
    seq.stitch(stats.max_len)?;
    let assembly = seq.assemble(&plan)?;

    let raw_assembly = cfg.outdir.join(format!("{}.fasta", cfg.assembler));
    if assembly.contigs != raw_assembly {
        std::fs::copy(&assembly.contigs, &raw_assembly)?;
    }
    let mut contigs = ContigSet::read_fasta(&assembly.contigs)?;
    if contigs.is_empty() {
        return Err(ShovillError::zero_output("assembly produced no contigs"));
    }
    log::info!("Assembler produced {} contigs", contigs.len());

    // 5. Coarse length filter before polishing
    let parser = CoverageParser::new()?;
    contigs.assign_coverage(&parser, cfg.depth as f64);
    let removed = contigs.retain_min_length(MIN_POLISH_LEN);
    log::info!("Removed {removed} contigs shorter than {MIN_POLISH_LEN} bp");
    if contigs.is_empty() {
        return Err(ShovillError::zero_output(format!(
            "assembly produced no contigs of at least {MIN_POLISH_LEN} bp"
        )));
    }

    // 6. Polish
    let mut corrections = None;
    let mut corrections_file = None;
    if cfg.polish {
        let draft = cfg.outdir.join("draft.fa");
        contigs.write_fasta(&draft)?;
        seq.register_scratch(&draft);

        let polished = seq.polish(&draft)?;
        let pilon = ContigSet::read_fasta(&polished.fasta)?.strip_id_suffix(POLISHER_SUFFIX)?;
        contigs.update_sequences(pilon);

        let counts = CorrectionCounts::read_changes(&polished.changes)?;
        log::info!(
            "Polisher made {} corrections in {} contigs",
            counts.total(),
            counts.contigs_touched()
        );
        contigs.apply_corrections(&counts);

        let report = cfg.outdir.join("contigs.corrections");
        std::fs::copy(&polished.changes, &report)?;
        corrections = Some(counts);
        corrections_file = Some(report);
    } else {
        log::info!("Skipping contig polishing");
    }

    // 7. Final filter, rename and write
    let filter = FinalFilter {
        minlen,
        mincov: cfg.mincov,
        namefmt: &cfg.namefmt,
        build: &cfg.build,
    };
    let (final_set, filter_report) = contigs.finalize(&filter)?;
    log::info!(
        "Kept {} contigs; removed {} too short, {} low coverage, {} homopolymer",
        filter_report.kept,
        filter_report.too_short,
        filter_report.low_coverage,
        filter_report.homopolymer
    );
    let contigs_path = cfg.outdir.join("contigs.fa");
    final_set.write_fasta(&contigs_path)?;

    let graph = match (assembly.graph.as_ref(), cfg.assembler.graph_extension()) {
        (Some(source), Some(ext)) => {
            let dest = cfg.outdir.join(format!("contigs.{ext}"));
            std::fs::copy(source, &dest)?;
            Some(dest)
        }
        _ => None,
    };

    seq.finish()?;
    let summary = final_set.summary();
    log::info!(
        "Assembly is {} bp in {} contigs, largest {} bp, N50 {} bp",
        summary.total_length,
        summary.num_contigs,
        summary.largest_contig,
        summary.n50
    );

    // 8. Tidy up
    seq.cleanup();
    log::info!("Final assembly in {}", contigs_path.display());

    Ok(RunResults {
        read_stats: stats,
        genome_size,
        depth,
        subsample,
        kmers: plan,
        minlen,
        contigs: final_set,
        filter_report,
        corrections,
        summary,
        outputs: OutputFiles {
            contigs: contigs_path,
            raw_assembly,
            graph,
            corrections: corrections_file,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::test_support::config_in;
    use crate::runner::testing::{arg_after, ScriptedRunner};
    use crate::runner::ToolOutput;
    use tempfile::tempdir;

    fn fastq_text(reads: usize, len: usize) -> String {
        let seq: String = "ACGT".chars().cycle().take(len).collect();
        let qual = "I".repeat(len);
        let mut text = String::new();
        for i in 0..reads {
            writeln!(text, "@read{i}\n{seq}\n+\n{qual}").unwrap();
        }
        text
    }

    fn dna(len: usize) -> String {
        "ACGGTCAT".chars().cycle().take(len).collect()
    }

    /// Fake tool behaviour for a full default run.
    fn fake_tools(cmd: &crate::runner::ToolCommand) -> Result<ToolOutput> {
        match cmd.program.as_str() {
            "seqtk" => {
                return Ok(ToolOutput {
                    stdout: fastq_text(10, 150),
                    stderr: String::new(),
                })
            }
            "lighter" => {
                let od = arg_after(cmd, "-od").unwrap();
                std::fs::write(od.join("R1.cor.fq"), fastq_text(10, 150))?;
                std::fs::write(od.join("R2.cor.fq"), fastq_text(10, 150))?;
            }
            "flash" => {
                let d = arg_after(cmd, "-d").unwrap();
                for name in [
                    "flash.extendedFrags.fastq.gz",
                    "flash.notCombined_1.fastq.gz",
                    "flash.notCombined_2.fastq.gz",
                ] {
                    std::fs::write(d.join(name), "x")?;
                }
            }
            "spades.py" => {
                let o = arg_after(cmd, "-o").unwrap();
                std::fs::create_dir_all(&o)?;
                let fasta = format!(
                    ">NODE_1_length_1500_cov_30.5\n{}\n>NODE_2_length_1200_cov_1.2\n{}\n\
                     >NODE_3_length_500_cov_40.0\n{}\n>NODE_4_length_1100_cov_50.0\n{}\n",
                    dna(1500),
                    dna(1200),
                    dna(500),
                    "A".repeat(1100)
                );
                std::fs::write(o.join("contigs.fasta"), fasta)?;
                std::fs::write(o.join("assembly_graph_with_scaffolds.gfa"), "H\tVN:Z:1.0\n")?;
            }
            "samtools" => {
                if let Some(bam) = arg_after(cmd, "-o") {
                    std::fs::write(bam, "bam")?;
                }
            }
            "pilon" => {
                let genome = arg_after(cmd, "--genome").unwrap();
                let out = arg_after(cmd, "--outdir").unwrap();
                let draft = std::fs::read_to_string(genome)?;
                let mut polished = String::new();
                for line in draft.lines() {
                    if line.starts_with('>') {
                        writeln!(polished, "{line}_pilon").unwrap();
                    } else {
                        writeln!(polished, "{line}").unwrap();
                    }
                }
                std::fs::write(out.join("pilon.fasta"), polished)?;
                std::fs::write(
                    out.join("pilon.changes"),
                    "NODE_1_length_1500_cov_30.5:10 NODE_1_length_1500_cov_30.5_pilon:10 A G\n\
                     NODE_1_length_1500_cov_30.5:99 NODE_1_length_1500_cov_30.5_pilon:99 . T\n",
                )?;
            }
            _ => {}
        }
        Ok(ToolOutput::default())
    }

    #[test]
    fn test_effective_minlen() {
        assert_eq!(effective_minlen(0, 151), 75);
        assert_eq!(effective_minlen(500, 151), 500);
    }

    #[test]
    fn test_prepare_outdir() {
        let dir = tempdir().unwrap();
        let outdir = dir.path().join("asm");
        prepare_outdir(&outdir, false).unwrap();
        std::fs::write(outdir.join("old.txt"), "x").unwrap();

        let err = prepare_outdir(&outdir, false).unwrap_err();
        assert!(matches!(err, ShovillError::Config(_)));

        prepare_outdir(&outdir, true).unwrap();
        assert!(outdir.is_dir());
        assert!(!outdir.join("old.txt").exists());
    }

    #[test]
    fn test_full_run() {
        let dir = tempdir().unwrap();
        let cfg = config_in(dir.path(), &["--gsize", "1000", "--depth", "10"]);
        std::fs::write(&cfg.r1, fastq_text(100, 150)).unwrap();
        std::fs::write(&cfg.r2, fastq_text(100, 150)).unwrap();

        let mut runner = ScriptedRunner::new(fake_tools);
        let results = run_pipeline(&cfg, &mut runner).unwrap();

        // 2 x 100 x 150 bp over a 1 kb genome
        assert_eq!(results.depth, 30);
        assert_eq!(results.subsample, Some(0.333));
        assert_eq!(results.kmers.kmers(), &[31, 51, 71, 91, 111]);
        assert_eq!(results.minlen, 75);
        assert_eq!(
            runner.programs(),
            vec![
                "seqtk", "seqtk", "lighter", "flash", "spades.py", "bwa", "bwa", "samtools",
                "samtools", "pilon"
            ]
        );

        // NODE_3 goes before polishing, NODE_2 on coverage, NODE_4 as a homopolymer
        assert_eq!(results.contigs.sorted_ids(), vec!["contig00001"]);
        assert_eq!(results.filter_report.low_coverage, 1);
        assert_eq!(results.filter_report.homopolymer, 1);

        let fasta = std::fs::read_to_string(&results.outputs.contigs).unwrap();
        assert!(fasta.starts_with(
            ">contig00001 len=1500 cov=30.5 corr=2 origname=NODE_1_length_1500_cov_30.5 sw=shovill-spades/"
        ));
        assert_eq!(fasta, results.get_contigs_fasta());

        assert_eq!(results.outputs.raw_assembly, cfg.outdir.join("spades.fasta"));
        assert!(results.outputs.raw_assembly.exists());
        assert_eq!(results.outputs.graph, Some(cfg.outdir.join("contigs.gfa")));
        assert!(cfg.outdir.join("contigs.corrections").exists());

        // intermediates are gone
        assert!(!cfg.outdir.join("spades").exists());
        assert!(!cfg.outdir.join("shovill.bam").exists());
        assert!(!cfg.outdir.join("sub1.fq").exists());
        assert!(cfg.r1.exists());

        let summary = results.get_summary_text();
        assert!(summary.contains("n50\t1500\n"));
        assert!(summary.contains("corrections\t2\n"));
    }

    #[test]
    fn test_keepfiles_and_no_polish() {
        let dir = tempdir().unwrap();
        let cfg = config_in(
            dir.path(),
            &["--gsize", "1M", "--nocorr", "--keepfiles", "--minlen", "1000", "--mincov", "0"],
        );
        std::fs::write(&cfg.r1, fastq_text(20, 100)).unwrap();
        std::fs::write(&cfg.r2, fastq_text(20, 100)).unwrap();

        let mut runner = ScriptedRunner::new(fake_tools);
        let results = run_pipeline(&cfg, &mut runner).unwrap();

        assert_eq!(results.subsample, None);
        assert!(results.corrections.is_none());
        assert!(results.outputs.corrections.is_none());
        assert!(!runner.programs().iter().any(|p| p == "pilon" || p == "seqtk"));
        // NODE_1 and NODE_2 survive, renumbered longest first
        assert_eq!(results.contigs.sorted_ids(), vec!["contig00001", "contig00002"]);
        assert!(results.get_contigs_fasta().contains(">contig00002 len=1200 cov=1.2 corr=0"));
        assert!(cfg.outdir.join("spades").is_dir());
    }

    #[test]
    fn test_assembly_without_contigs() {
        let dir = tempdir().unwrap();
        let cfg = config_in(
            dir.path(),
            &["--gsize", "1M", "--assembler", "skesa", "--noreadcorr", "--nostitch"],
        );
        std::fs::write(&cfg.r1, fastq_text(20, 100)).unwrap();
        std::fs::write(&cfg.r2, fastq_text(20, 100)).unwrap();

        let mut runner = ScriptedRunner::new(|cmd| {
            if let Some(out) = arg_after(cmd, "--contigs_out") {
                std::fs::write(out, "")?;
            }
            Ok(ToolOutput::default())
        });
        let err = run_pipeline(&cfg, &mut runner).unwrap_err();
        assert!(matches!(err, ShovillError::ZeroOutput(_)));
        assert!(err.to_string().contains("assembly produced no contigs"));
    }

    #[test]
    fn test_empty_spades_assembly_is_kept() {
        let dir = tempdir().unwrap();
        let cfg = config_in(dir.path(), &["--gsize", "1M", "--noreadcorr", "--nostitch"]);
        std::fs::write(&cfg.r1, fastq_text(20, 100)).unwrap();
        std::fs::write(&cfg.r2, fastq_text(20, 100)).unwrap();

        let mut runner = ScriptedRunner::new(|cmd| {
            if cmd.program == "spades.py" {
                let o = arg_after(cmd, "-o").unwrap();
                std::fs::create_dir_all(&o)?;
                std::fs::write(o.join("contigs.fasta"), "")?;
                return Ok(ToolOutput::default());
            }
            fake_tools(cmd)
        });
        let err = run_pipeline(&cfg, &mut runner).unwrap_err();
        assert!(matches!(err, ShovillError::ZeroOutput(_)));
        assert_eq!(std::fs::read_to_string(cfg.outdir.join("spades.fasta")).unwrap(), "");
    }

    #[test]
    fn test_assembler_kmers() {
        assert_eq!(assembler_kmers(Assembler::Skesa, Some("31,55")), None);
        assert_eq!(assembler_kmers(Assembler::Spades, Some("31,55")), Some("31,55"));
        assert_eq!(assembler_kmers(Assembler::Velvet, None), None);
    }

    #[test]
    fn test_missing_tool_keeps_existing_outdir() {
        let dir = tempdir().unwrap();
        let cfg = config_in(dir.path(), &["--force"]);
        std::fs::write(cfg.outdir.join("previous.fa"), ">a\nACGT\n").unwrap();

        let err = prepare_run(&cfg, &["no-such-tool-shovill-rs"]).unwrap_err();
        assert!(matches!(err, ShovillError::Dependency(_)));
        assert!(cfg.outdir.join("previous.fa").exists());

        // with nothing missing the folder is recreated
        prepare_run(&cfg, &[]).unwrap();
        assert!(cfg.outdir.is_dir());
        assert!(!cfg.outdir.join("previous.fa").exists());
    }

    #[test]
    fn test_only_short_contigs() {
        let dir = tempdir().unwrap();
        let cfg = config_in(
            dir.path(),
            &["--gsize", "1M", "--assembler", "skesa", "--noreadcorr", "--nostitch"],
        );
        std::fs::write(&cfg.r1, fastq_text(20, 100)).unwrap();
        std::fs::write(&cfg.r2, fastq_text(20, 100)).unwrap();

        let mut runner = ScriptedRunner::new(|cmd| {
            if let Some(out) = arg_after(cmd, "--contigs_out") {
                std::fs::write(out, format!(">Contig_1_20.0\n{}\n", dna(900)))?;
            }
            Ok(ToolOutput::default())
        });
        let err = run_pipeline(&cfg, &mut runner).unwrap_err();
        assert!(err.to_string().contains("at least 1000 bp"));
        // the raw assembly is still kept for inspection
        assert!(cfg.outdir.join("skesa.fasta").exists());
    }

    #[test]
    fn test_stage_failure_aborts() {
        let dir = tempdir().unwrap();
        let cfg = config_in(dir.path(), &["--gsize", "1M"]);
        std::fs::write(&cfg.r1, fastq_text(20, 100)).unwrap();
        std::fs::write(&cfg.r2, fastq_text(20, 100)).unwrap();

        let mut runner = ScriptedRunner::new(|cmd| {
            if cmd.program == "flash" {
                return Err(ShovillError::stage("stitch", "'flash' exited with 1"));
            }
            fake_tools(cmd)
        });
        let err = run_pipeline(&cfg, &mut runner).unwrap_err();
        assert!(matches!(err, ShovillError::StageExecution { ref stage, .. } if stage == "stitch"));
        assert_eq!(runner.programs().last().map(String::as_str), Some("flash"));
        assert!(!cfg.outdir.join("contigs.fa").exists());
    }
}
