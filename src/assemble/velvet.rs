use std::path::Path;

use super::{AssemblyOutput, STAGE};
use crate::config::RunConfig;
use crate::error::Result;
use crate::kmers::KmerPlan;
use crate::runner::{check_created, CommandRunner, ToolCommand};
use crate::types::ReadSet;

/// velveth file-format flag for a read file.
fn read_format(path: &Path) -> &'static str {
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        "-fastq.gz"
    } else {
        "-fastq"
    }
}

/// Velvet takes a single k; the middle of the plan is used.
/// Singletons go in as a second short-read library.
pub fn assemble(
    runner: &mut dyn CommandRunner,
    reads: &ReadSet,
    plan: &KmerPlan,
    cfg: &RunConfig,
) -> Result<AssemblyOutput> {
    let workdir = cfg.outdir.join("velvet");
    let k = plan.median();
    log::info!("Velvet will use k={k}");

    let mut hash = ToolCommand::new("velveth")
        .arg(&workdir)
        .arg(k.to_string())
        .arg("-create_binary")
        .arg("-shortPaired")
        .arg(read_format(&reads.pe1))
        .arg("-separate")
        .arg(&reads.pe1)
        .arg(&reads.pe2);
    if let Some(se) = reads.singletons() {
        hash = hash.arg("-short2").arg(read_format(se)).arg(se);
    }
    runner.run(STAGE, &hash)?;

    let graph = ToolCommand::new("velvetg")
        .arg(&workdir)
        .arg("-exp_cov")
        .arg("auto")
        .arg("-cov_cutoff")
        .arg("auto")
        .arg("-very_clean")
        .arg("yes")
        .args(&cfg.opts);
    runner.run(STAGE, &graph)?;

    let contigs = workdir.join("contigs.fa");
    check_created(STAGE, &contigs)?;

    let last_graph = workdir.join("LastGraph");
    Ok(AssemblyOutput {
        contigs,
        graph: last_graph.exists().then_some(last_graph),
        scratch: vec![workdir],
    })
}
