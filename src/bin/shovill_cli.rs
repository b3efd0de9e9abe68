use std::process;
use std::time::Instant;

use clap::Parser;

use shovill_rs::config::{Args, RunConfig};
use shovill_rs::deps::{all_programs, check_dependencies, required_programs, ToolVersion};
use shovill_rs::error::Result;
use shovill_rs::logging::{init_logging, RunLog, LOG_FILE};
use shovill_rs::runner::{CancelFlag, ProcessRunner};
use shovill_rs::{prepare_run, run_pipeline};

fn run(cfg: &RunConfig, tools: &[ToolVersion], log: RunLog) -> Result<()> {
    let started = Instant::now();
    log::info!("This is {} {}", cfg.build.tool, cfg.build.version);
    log::info!(
        "Command: {}",
        std::env::args().collect::<Vec<_>>().join(" ")
    );
    log::info!(
        "Using {} cpus and {} GB RAM, assembler {}",
        cfg.resources.cpus,
        cfg.resources.ram_gb,
        cfg.assembler
    );

    for tool in tools {
        log::info!("Using {} {} ({})", tool.program, tool.version, tool.path.display());
    }

    let cancel = CancelFlag::new();
    cancel.install_signal_handlers()?;
    let mut runner = ProcessRunner::new(log).with_cancel(cancel);
    let results = run_pipeline(cfg, &mut runner)?;

    print!("{}", results.get_summary_text());
    log::info!(
        "Done in {:.1} minutes. Results in {}",
        started.elapsed().as_secs_f64() / 60.0,
        cfg.outdir.display()
    );
    Ok(())
}

fn main() {
    let args = Args::parse();

    if args.check {
        init_logging(&RunLog::sink(), args.verbose);
        match check_dependencies(&all_programs()) {
            Ok(tools) => {
                for tool in tools {
                    println!("{}\t{}\t{}", tool.program, tool.version, tool.path.display());
                }
                return;
            }
            Err(e) => {
                log::error!("{e}");
                process::exit(1);
            }
        }
    }

    let cfg = match RunConfig::from_args(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("ERROR: {e}");
            process::exit(1);
        }
    };
    let tools = match prepare_run(&cfg, &required_programs(&cfg)) {
        Ok(tools) => tools,
        Err(e) => {
            eprintln!("ERROR: {e}");
            process::exit(1);
        }
    };
    let log = match RunLog::open(cfg.outdir.join(LOG_FILE)) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("ERROR: cannot open run log: {e}");
            process::exit(1);
        }
    };
    init_logging(&log, args.verbose);

    if let Err(e) = run(&cfg, &tools, log) {
        log::error!("{e}");
        process::exit(1);
    }
}
