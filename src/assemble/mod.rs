pub mod megahit;
pub mod skesa;
pub mod spades;
pub mod velvet;

use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;

use crate::config::RunConfig;
use crate::error::Result;
use crate::kmers::KmerPlan;
use crate::runner::CommandRunner;
use crate::types::ReadSet;

pub const STAGE: &str = "assemble";

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Assembler {
    Spades,   // multi-k de Bruijn graph, GFA output
    Skesa,    // conservative, picks its own k-mers
    Megahit,  // succinct de Bruijn graph, FASTG via toolkit
    Velvet,   // single k, LastGraph output
}

impl Assembler {
    pub fn name(&self) -> &'static str {
        match self {
            Assembler::Spades => "spades",
            Assembler::Skesa => "skesa",
            Assembler::Megahit => "megahit",
            Assembler::Velvet => "velvet",
        }
    }

    /// Whether the k-mer plan is passed to this assembler.
    pub fn uses_kmers(&self) -> bool {
        !matches!(self, Assembler::Skesa)
    }

    /// Extension of the genome graph this assembler leaves behind.
    pub fn graph_extension(&self) -> Option<&'static str> {
        match self {
            Assembler::Spades => Some("gfa"),
            Assembler::Skesa => None,
            Assembler::Megahit => Some("fastg"),
            Assembler::Velvet => Some("LastGraph"),
        }
    }

    /// Programs that must be on `PATH` to run this assembler.
    pub fn programs(&self) -> &'static [&'static str] {
        match self {
            Assembler::Spades => &["spades.py"],
            Assembler::Skesa => &["skesa"],
            Assembler::Megahit => &["megahit", "megahit_toolkit"],
            Assembler::Velvet => &["velveth", "velvetg"],
        }
    }
}

impl fmt::Display for Assembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Files an assembler run leaves behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyOutput {
    pub contigs: PathBuf,
    pub graph: Option<PathBuf>,
    /// Working files and folders to remove unless intermediates are kept.
    pub scratch: Vec<PathBuf>,
}

/// Run the configured assembler. Each variant has its own argument and
/// output contract; nothing is shared between them.
pub fn run_assembler(
    runner: &mut dyn CommandRunner,
    reads: &ReadSet,
    plan: &KmerPlan,
    cfg: &RunConfig,
    tmpdir: &Path,
) -> Result<AssemblyOutput> {
    log::info!("Assembling with {}", cfg.assembler);
    match cfg.assembler {
        Assembler::Spades => spades::assemble(runner, reads, plan, cfg, tmpdir),
        Assembler::Skesa => skesa::assemble(runner, reads, cfg),
        Assembler::Megahit => megahit::assemble(runner, reads, plan, cfg, tmpdir),
        Assembler::Velvet => velvet::assemble(runner, reads, plan, cfg),
    }
}
