//src/config.rs

use std::path::PathBuf;

use clap::Parser;

use crate::assemble::Assembler;
use crate::error::{Result, ShovillError};

pub const TOOL_NAME: &str = "shovill";
pub const MIN_RAM_GB: usize = 2;
pub const DEFAULT_SEED: u32 = 11;

/// Command line arguments.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Output folder
    #[arg(long, required_unless_present = "check")]
    pub outdir: Option<PathBuf>,

    /// Read 1 FASTQ
    #[arg(long = "R1", required_unless_present = "check")]
    pub r1: Option<PathBuf>,

    /// Read 2 FASTQ
    #[arg(long = "R2", required_unless_present = "check")]
    pub r2: Option<PathBuf>,

    /// Sub-sample reads to this depth (0 disables sub-sampling)
    #[arg(long, default_value_t = 150)]
    pub depth: u32,

    /// Estimated genome size, e.g. 3.2M (blank = estimate from reads)
    #[arg(long)]
    pub gsize: Option<String>,

    /// Minimum contig length (0 = half the average read length)
    #[arg(long, default_value_t = 0)]
    pub minlen: usize,

    /// Minimum contig coverage
    #[arg(long, default_value_t = 2.0)]
    pub mincov: f64,

    /// Format of contig names, must contain one integer placeholder
    #[arg(long, default_value = "contig%05d")]
    pub namefmt: String,

    /// Assembler to use
    #[arg(long, value_enum, default_value_t = Assembler::Spades)]
    pub assembler: Assembler,

    /// Extra assembler options, whitespace separated
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub opts: String,

    /// K-mers to use (blank = auto)
    #[arg(long)]
    pub kmers: Option<String>,

    /// Number of CPUs to use (0 = all available)
    #[arg(long, default_value_t = 8)]
    pub cpus: usize,

    /// Memory ceiling in GB
    #[arg(long, default_value_t = 16)]
    pub ram: usize,

    /// Fast temporary directory
    #[arg(long)]
    pub tmpdir: Option<PathBuf>,

    /// Adapter FASTA used when trimming
    #[arg(long)]
    pub adapters: Option<PathBuf>,

    /// Seed passed to the read sub-sampler
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u32,

    /// Enable adapter trimming
    #[arg(long)]
    pub trim: bool,

    /// Disable read error correction
    #[arg(long)]
    pub noreadcorr: bool,

    /// Disable read stitching
    #[arg(long)]
    pub nostitch: bool,

    /// Disable post-assembly polishing
    #[arg(long)]
    pub nocorr: bool,

    /// Keep intermediate files
    #[arg(long)]
    pub keepfiles: bool,

    /// Overwrite an existing output folder
    #[arg(long)]
    pub force: bool,

    /// Check dependencies are installed and exit
    #[arg(long)]
    pub check: bool,

    /// Debug level logging
    #[arg(long)]
    pub verbose: bool,
}

/// Fixed CPU and RAM partition, computed once up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resources {
    pub cpus: usize,
    pub ram_gb: usize,
}

impl Resources {
    pub fn new(cpus: usize, ram_gb: usize) -> Self {
        let cpus = if cpus == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            cpus
        };
        Self { cpus, ram_gb }
    }

    /// RAM reserved for k-mer counting.
    pub fn half_ram_gb(&self) -> usize {
        (self.ram_gb / 2).max(1)
    }

    pub fn sort_threads(&self) -> usize {
        (self.cpus / 2).max(1)
    }

    /// Per-thread sort memory in MB.
    pub fn sort_ram_mb(&self) -> usize {
        (self.ram_gb * 1024 / 4 / self.sort_threads()).max(256)
    }

    pub fn ram_bytes(&self) -> u64 {
        self.ram_gb as u64 * 1_000_000_000
    }
}

/// Name, variant, version and date stamped into every output header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub tool: String,
    pub assembler: Assembler,
    pub version: String,
    pub date: String,
}

impl BuildInfo {
    pub fn new(assembler: Assembler) -> Self {
        Self {
            tool: TOOL_NAME.to_string(),
            assembler,
            version: env!("CARGO_PKG_VERSION").to_string(),
            date: chrono::Local::now().format("%Y%m%d").to_string(),
        }
    }

    /// e.g. `shovill-spades/0.1.0`
    pub fn software(&self) -> String {
        format!("{}-{}/{}", self.tool, self.assembler, self.version)
    }
}

/// A printf-like contig name template holding exactly one integer
/// placeholder (`%d`, `%5d` or `%05d`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFormat {
    prefix: String,
    suffix: String,
    width: usize,
    zero_pad: bool,
}

impl NameFormat {
    pub fn parse(template: &str) -> Result<Self> {
        let bad = || {
            ShovillError::config(format!(
                "--namefmt '{template}' must contain one integer placeholder like %05d"
            ))
        };

        let mut parts = template.splitn(2, '%');
        let prefix = parts.next().unwrap_or_default().to_string();
        let rest = parts.next().ok_or_else(bad)?;

        let spec_len = rest.find('d').ok_or_else(bad)?;
        let spec = &rest[..spec_len];
        if !spec.chars().all(|c| c.is_ascii_digit()) {
            return Err(bad());
        }
        let suffix = rest[spec_len + 1..].to_string();
        if suffix.contains('%') {
            return Err(bad());
        }

        let zero_pad = spec.starts_with('0');
        let width = if spec.is_empty() {
            0
        } else {
            spec.parse().map_err(|_| bad())?
        };

        Ok(Self {
            prefix,
            suffix,
            width,
            zero_pad,
        })
    }

    pub fn format(&self, n: usize) -> String {
        let num = if self.zero_pad {
            format!("{:0width$}", n, width = self.width)
        } else {
            format!("{:width$}", n, width = self.width)
        };
        format!("{}{}{}", self.prefix, num, self.suffix)
    }
}

/// Parse a genome size such as `5000000`, `5.2M`, `500k` or `1.1G`.
pub fn parse_genome_size(text: &str) -> Result<u64> {
    let text = text.trim();
    let bad = || ShovillError::config(format!("invalid genome size '{text}'"));

    let (number, multiplier) = match text.chars().last() {
        Some('k') | Some('K') => (&text[..text.len() - 1], 1e3),
        Some('m') | Some('M') => (&text[..text.len() - 1], 1e6),
        Some('g') | Some('G') => (&text[..text.len() - 1], 1e9),
        _ => (text, 1.0),
    };

    let value: f64 = number.parse().map_err(|_| bad())?;
    let size = (value * multiplier).round();
    if !size.is_finite() || size < 1.0 {
        return Err(bad());
    }
    Ok(size as u64)
}

/// Validated, immutable settings for one run. Passed by reference into
/// every component.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub outdir: PathBuf,
    pub r1: PathBuf,
    pub r2: PathBuf,
    pub depth: u32,
    pub gsize: Option<u64>,
    pub minlen: usize,
    pub mincov: f64,
    pub namefmt: NameFormat,
    pub assembler: Assembler,
    pub opts: Vec<String>,
    pub kmers: Option<String>,
    pub resources: Resources,
    pub tmpdir: Option<PathBuf>,
    pub adapters: Option<PathBuf>,
    pub seed: u32,
    pub trim: bool,
    pub read_correction: bool,
    pub stitch: bool,
    pub polish: bool,
    pub keepfiles: bool,
    pub force: bool,
    pub build: BuildInfo,
}

impl RunConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        let outdir = args
            .outdir
            .clone()
            .ok_or_else(|| ShovillError::config("--outdir is required"))?;
        let r1 = args
            .r1
            .clone()
            .ok_or_else(|| ShovillError::config("--R1 is required"))?;
        let r2 = args
            .r2
            .clone()
            .ok_or_else(|| ShovillError::config("--R2 is required"))?;

        for (flag, path) in [("--R1", &r1), ("--R2", &r2)] {
            if !path.is_file() {
                return Err(ShovillError::config(format!(
                    "{flag} file '{}' does not exist",
                    path.display()
                )));
            }
        }

        let gsize = args.gsize.as_deref().map(parse_genome_size).transpose()?;

        if !(args.mincov >= 0.0) {
            return Err(ShovillError::config(format!(
                "--mincov must be zero or positive, got {}",
                args.mincov
            )));
        }
        if args.ram < MIN_RAM_GB {
            return Err(ShovillError::config(format!(
                "--ram must be at least {MIN_RAM_GB} GB"
            )));
        }
        if let Some(dir) = &args.tmpdir {
            if !dir.is_dir() {
                return Err(ShovillError::config(format!(
                    "--tmpdir '{}' is not a directory",
                    dir.display()
                )));
            }
        }
        if args.trim {
            match &args.adapters {
                Some(path) if path.is_file() => {}
                Some(path) => {
                    return Err(ShovillError::config(format!(
                        "adapter file '{}' does not exist",
                        path.display()
                    )))
                }
                None => return Err(ShovillError::config("--trim requires --adapters")),
            }
        }
        Ok(Self {
            outdir,
            r1,
            r2,
            depth: args.depth,
            gsize,
            minlen: args.minlen,
            mincov: args.mincov,
            namefmt: NameFormat::parse(&args.namefmt)?,
            assembler: args.assembler,
            opts: args.opts.split_whitespace().map(str::to_string).collect(),
            kmers: args.kmers.clone(),
            resources: Resources::new(args.cpus, args.ram),
            tmpdir: args.tmpdir.clone(),
            adapters: args.adapters.clone(),
            seed: args.seed,
            trim: args.trim,
            read_correction: !args.noreadcorr,
            stitch: !args.nostitch,
            polish: !args.nocorr,
            keepfiles: args.keepfiles,
            force: args.force,
            build: BuildInfo::new(args.assembler),
        })
    }
}
