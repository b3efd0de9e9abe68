use std::path::Path;

use super::{AssemblyOutput, STAGE};
use crate::config::RunConfig;
use crate::error::Result;
use crate::kmers::KmerPlan;
use crate::runner::{check_created, CommandRunner, ToolCommand};
use crate::types::ReadSet;

/// SPAdes in isolate mode. Stitched singletons go in via `--merged`.
pub fn assemble(
    runner: &mut dyn CommandRunner,
    reads: &ReadSet,
    plan: &KmerPlan,
    cfg: &RunConfig,
    tmpdir: &Path,
) -> Result<AssemblyOutput> {
    let workdir = cfg.outdir.join("spades");

    let mut cmd = ToolCommand::new("spades.py")
        .arg("-1")
        .arg(&reads.pe1)
        .arg("-2")
        .arg(&reads.pe2);
    if let Some(se) = reads.singletons() {
        cmd = cmd.arg("--merged").arg(se);
    }
    let cmd = cmd
        .arg("--isolate")
        .arg("-o")
        .arg(&workdir)
        .arg("--tmp-dir")
        .arg(tmpdir)
        .arg("-k")
        .arg(plan.to_list())
        .arg("-t")
        .arg(cfg.resources.cpus.to_string())
        .arg("-m")
        .arg(cfg.resources.ram_gb.to_string())
        .args(&cfg.opts);

    runner.run(STAGE, &cmd)?;

    let contigs = workdir.join("contigs.fasta");
    check_created(STAGE, &contigs)?;

    let graph = workdir.join("assembly_graph_with_scaffolds.gfa");
    Ok(AssemblyOutput {
        contigs,
        graph: graph.exists().then_some(graph),
        scratch: vec![workdir],
    })
}
