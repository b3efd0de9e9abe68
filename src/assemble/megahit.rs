use std::path::Path;

use super::{AssemblyOutput, STAGE};
use crate::config::RunConfig;
use crate::error::Result;
use crate::kmers::KmerPlan;
use crate::runner::{check_created, check_output, CommandRunner, ToolCommand};
use crate::types::ReadSet;

/// MEGAHIT, followed by a FASTG conversion of the contigs built at the
/// largest k.
pub fn assemble(
    runner: &mut dyn CommandRunner,
    reads: &ReadSet,
    plan: &KmerPlan,
    cfg: &RunConfig,
    tmpdir: &Path,
) -> Result<AssemblyOutput> {
    // megahit refuses to write into an existing folder
    let workdir = cfg.outdir.join("megahit");
    if workdir.exists() {
        std::fs::remove_dir_all(&workdir)?;
    }

    let mut cmd = ToolCommand::new("megahit")
        .arg("-1")
        .arg(&reads.pe1)
        .arg("-2")
        .arg(&reads.pe2);
    if let Some(se) = reads.singletons() {
        cmd = cmd.arg("-r").arg(se);
    }
    let cmd = cmd
        .arg("--k-list")
        .arg(plan.to_list())
        .arg("--tmp-dir")
        .arg(tmpdir)
        .arg("--memory")
        .arg(cfg.resources.ram_bytes().to_string())
        .arg("--num-cpu-threads")
        .arg(cfg.resources.cpus.to_string())
        .arg("--out-dir")
        .arg(&workdir)
        .args(&cfg.opts);

    runner.run(STAGE, &cmd)?;

    let contigs = workdir.join("final.contigs.fa");
    check_created(STAGE, &contigs)?;
    if std::fs::metadata(&contigs)?.len() == 0 {
        // nothing to convert, the caller reports the empty assembly
        return Ok(AssemblyOutput {
            contigs,
            graph: None,
            scratch: vec![workdir],
        });
    }

    let max_k = plan.largest();
    let graph = cfg.outdir.join("megahit.fastg");
    let convert = ToolCommand::new("megahit_toolkit")
        .arg("contig2fastg")
        .arg(max_k.to_string())
        .arg(workdir.join("intermediate_contigs").join(format!("k{max_k}.contigs.fa")))
        .stdout_to(&graph);
    runner.run(STAGE, &convert)?;
    check_output(STAGE, &graph)?;

    Ok(AssemblyOutput {
        contigs,
        graph: Some(graph.clone()),
        scratch: vec![workdir, graph],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::test_support::config_in;
    use crate::runner::testing::{arg_after, ScriptedRunner};
    use crate::runner::ToolOutput;
    use tempfile::tempdir;

    #[test]
    fn test_megahit_contract() {
        let dir = tempdir().unwrap();
        let cfg = config_in(dir.path(), &["--assembler", "megahit", "--kmers", "31,55,77"]);
        let reads = ReadSet::paired("R1.fq.gz", "R2.fq.gz");
        let plan = KmerPlan::new(150, cfg.kmers.as_deref()).unwrap();

        let mut runner = ScriptedRunner::new(|cmd| {
            if cmd.program == "megahit" {
                let out = arg_after(cmd, "--out-dir").unwrap();
                std::fs::create_dir_all(&out)?;
                std::fs::write(
                    out.join("final.contigs.fa"),
                    ">k77_1 flag=1 multi=12.0000 len=4\nACGT\n",
                )?;
                Ok(ToolOutput::default())
            } else {
                Ok(ToolOutput {
                    stdout: ">EDGE_1_length_4_cov_12.0;\nACGT\n".to_string(),
                    stderr: String::new(),
                })
            }
        });

        let out = assemble(&mut runner, &reads, &plan, &cfg, dir.path()).unwrap();
        assert_eq!(out.contigs, cfg.outdir.join("megahit/final.contigs.fa"));
        assert_eq!(out.graph, Some(cfg.outdir.join("megahit.fastg")));

        assert_eq!(runner.programs(), vec!["megahit", "megahit_toolkit"]);
        assert!(runner.commands[0].contains("--k-list 31,55,77"));
        assert!(!runner.commands[0].contains(" -r "));
        assert!(runner.commands[1].starts_with("megahit_toolkit contig2fastg 77 "));
        assert!(runner.commands[1].contains("intermediate_contigs/k77.contigs.fa"));
    }
}
