//! Command-line front end for pathprof.
//!
//! Reads a program, runs path encoding (or register lowering when an
//! allocation table is given) and writes the instrumented program.

use clap::Parser;
use pathprof::ir::Printer;
use pathprof::{AllocationTable, CompileError, InstrumentOptions, Pipeline, Program};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "pathprof",
    about = "Ball-Larus path instrumentation for structured control units",
    version
)]
struct Cli {
    /// Program to instrument
    input: PathBuf,

    /// Write the instrumented program here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Allocation table (JSON); lowers to physical counters instead of path encoding
    #[arg(long)]
    allocation: Option<PathBuf>,

    /// Count all absent-body switch cases as one shared path
    #[arg(long, default_value_t = false)]
    strict_absent_cases: bool,

    /// Name of the path accumulator
    #[arg(long, default_value = "meta.BL")]
    accumulator: String,

    /// Prefix of physical counter names
    #[arg(long, default_value = "standard_metadata.var_")]
    register_prefix: String,

    /// Number of physical counters (at most 64)
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u8).range(1..=64))]
    counters: u8,

    /// Largest increment an allocation entry may carry
    #[arg(long, default_value_t = u32::MAX as u64)]
    max_increment: u64,

    /// Enumerate every path and check the accumulator numbering
    #[arg(long, default_value_t = false)]
    verify: bool,

    /// Print per-unit statistics to stderr
    #[arg(long, default_value_t = false)]
    stats: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn options(&self) -> InstrumentOptions {
        InstrumentOptions {
            accumulator: self.accumulator.clone(),
            register_prefix: self.register_prefix.clone(),
            strict_absent_cases: self.strict_absent_cases,
            counter_bank_size: self.counters,
            max_increment: self.max_increment,
            ..InstrumentOptions::default()
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();
}

fn run(cli: &Cli) -> Result<(), CompileError> {
    let source = fs::read_to_string(&cli.input).map_err(|source| CompileError::Io {
        path: cli.input.clone(),
        source,
    })?;
    let mut program = Program::parse(&source)?;
    let pipeline = Pipeline::new(cli.options());

    match &cli.allocation {
        Some(path) => {
            let table = AllocationTable::load(path)?;
            for report in pipeline.lower(&mut program, &table)? {
                if cli.stats {
                    eprint!("{}", report.stats);
                    let (written, claimed, total) = report.lowering.counter_usage;
                    eprintln!("  Counters written: {}/{} claimed, {} in bank", written, claimed, total);
                    if !report.lowering.idle_counters.is_empty() {
                        let idle: Vec<String> = report
                            .lowering
                            .idle_counters
                            .iter()
                            .map(|c| pipeline.options().register_name(*c))
                            .collect();
                        eprintln!("  Claimed but unwritten: {}", idle.join(", "));
                    }
                }
            }
        }
        None => {
            let reports = pipeline.instrument(&mut program)?;
            if cli.verify {
                pipeline.verify(&program, &reports)?;
            }
            for report in &reports {
                if !report.injection.aliased.is_empty() {
                    log::warn!(
                        "unit `{}`: path ids through {} stay in range but may collide between call sites",
                        report.unit,
                        report.injection.aliased.join(", ")
                    );
                }
                if cli.stats {
                    eprint!("{}", report.stats);
                }
            }
        }
    }

    let rendered = Printer::new(pipeline.options()).print(&program);
    match &cli.output {
        Some(path) => fs::write(path, rendered).map_err(|source| CompileError::Io {
            path: path.clone(),
            source,
        })?,
        None => print!("{}", rendered),
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(&cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
