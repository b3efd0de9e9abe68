use std::ffi::OsString;

use super::{AssemblyOutput, STAGE};
use crate::config::RunConfig;
use crate::error::Result;
use crate::runner::{check_created, CommandRunner, ToolCommand};
use crate::types::ReadSet;

/// SKESA writes contigs straight to a file and has no graph output.
/// It chooses its own k-mers.
pub fn assemble(
    runner: &mut dyn CommandRunner,
    reads: &ReadSet,
    cfg: &RunConfig,
) -> Result<AssemblyOutput> {
    let contigs = cfg.outdir.join("skesa.fasta");

    let mut pair = OsString::from(&reads.pe1);
    pair.push(",");
    pair.push(&reads.pe2);

    let mut cmd = ToolCommand::new("skesa")
        .arg("--use_paired_ends")
        .arg("--fastq")
        .arg(pair);
    if let Some(se) = reads.singletons() {
        cmd = cmd.arg("--fastq").arg(se);
    }
    let cmd = cmd
        .arg("--contigs_out")
        .arg(&contigs)
        .arg("--min_contig")
        .arg("1")
        .arg("--memory")
        .arg(cfg.resources.ram_gb.to_string())
        .arg("--cores")
        .arg(cfg.resources.cpus.to_string())
        .arg("--vector_percent")
        .arg("1")
        .args(&cfg.opts);

    runner.run(STAGE, &cmd)?;
    check_created(STAGE, &contigs)?;

    Ok(AssemblyOutput {
        contigs,
        graph: None,
        scratch: Vec::new(),
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
    fn test_skesa_contract() {
        let dir = tempdir().unwrap();
        let cfg = config_in(dir.path(), &["--assembler", "skesa"]);
        let se = dir.path().join("se.fq.gz");
        std::fs::write(&se, "x").unwrap();
        let reads = ReadSet::paired("R1.fq.gz", "R2.fq.gz").with_singletons(&se);

        let mut runner = ScriptedRunner::new(|cmd| {
            let out = arg_after(cmd, "--contigs_out").unwrap();
            std::fs::write(out, ">Contig_1_42.5\nACGT\n")?;
            Ok(ToolOutput::default())
        });

        let out = assemble(&mut runner, &reads, &cfg).unwrap();
        assert_eq!(out.contigs, cfg.outdir.join("skesa.fasta"));
        assert_eq!(out.graph, None);
        let line = &runner.commands[0];
        assert!(line.starts_with("skesa --use_paired_ends --fastq R1.fq.gz,R2.fq.gz --fastq"));
        assert!(!line.contains(" -k "));
    }
}
