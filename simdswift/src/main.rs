//! SIMD-Swift CLI
//!
//! Drives the hardening and analysis passes over IR modules serialized as
//! JSON.
//!
//! # Usage
//!
//! ```text
//! simdswift [OPTIONS] <COMMAND>
//!
//! Commands:
//!   harden   Run a hardening variant over a module
//!   analyze  Print instruction statistics for a module
//!
//! Options:
//!   -v, --verbose  Increase verbosity (can be repeated)
//!   -q, --quiet    Suppress non-error output
//!   -h, --help     Print help information
//!   -V, --version  Print version information
//! ```

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};

use simdswift::harden::{harden_module, run_native, CheckConfig, Mode};
use simdswift::ir::Module;
use simdswift::{analyze, AnalyzeOptions};

/// The SIMD-Swift hardening pass driver.
///
/// Rewrites IR modules so scalar state is replicated across SIMD lanes with
/// majority-voting checks at sync points, tolerating single-event transient
/// faults in datapath state.
#[derive(Parser)]
#[command(name = "simdswift")]
#[command(version)]
#[command(about = "SIMD-based transient-fault hardening passes", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a hardening variant over a module
    ///
    /// Reads a JSON IR module, applies the selected variant, and writes the
    /// transformed module back out.
    Harden(HardenArgs),

    /// Print instruction statistics for a module
    ///
    /// Counts total, vector-touching and inline-assembly instructions per
    /// function and for the whole module.
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Variant {
    /// Replicate all scalar types
    Full,
    /// Replicate only float/double computation
    Fp,
    /// Insert opaque cost markers only (performance baseline)
    Native,
}

#[derive(Args)]
struct HardenArgs {
    /// Input module (JSON)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output path for the transformed module
    #[arg(short, long, value_name = "OUTPUT")]
    output: PathBuf,

    /// Which variant to run
    #[arg(long, value_enum, default_value_t = Variant::Full)]
    variant: Variant,

    /// Disable absolutely all checks
    #[arg(long)]
    no_check_all: bool,

    /// Disable checks on branches
    #[arg(long)]
    no_check_branch: bool,

    /// Disable checks on loads
    #[arg(long)]
    no_check_load: bool,

    /// Disable checks on stores
    #[arg(long)]
    no_check_store: bool,

    /// Disable checks on atomics (cmpxchg, atomicrmw)
    #[arg(long)]
    no_check_atomic: bool,

    /// Disable checks on function calls
    #[arg(long)]
    no_check_call: bool,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Input module (JSON)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// List every vector-touching instruction per function
    #[arg(long)]
    print_vec: bool,

    /// List every inline-assembly call per function
    #[arg(long)]
    print_asm: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Harden(args) => cmd_harden(args),
        Commands::Analyze(args) => cmd_analyze(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_module(path: &PathBuf) -> Result<Module, String> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("cannot parse {}: {}", path.display(), e))
}

fn store_module(path: &PathBuf, module: &Module) -> Result<(), String> {
    let text = serde_json::to_string_pretty(module)
        .map_err(|e| format!("cannot serialize module: {}", e))?;
    fs::write(path, text).map_err(|e| format!("cannot write {}: {}", path.display(), e))
}

fn cmd_harden(args: HardenArgs) -> Result<(), String> {
    let mut module = load_module(&args.input)?;

    let cfg = CheckConfig {
        no_check_all: args.no_check_all,
        no_check_branch: args.no_check_branch,
        no_check_load: args.no_check_load,
        no_check_store: args.no_check_store,
        no_check_atomic: args.no_check_atomic,
        no_check_call: args.no_check_call,
    };

    match args.variant {
        Variant::Full => harden_module(&mut module, Mode::Full, &cfg),
        Variant::Fp => harden_module(&mut module, Mode::FpOnly, &cfg),
        Variant::Native => run_native(&mut module),
    }
    .map_err(|e| e.to_string())?;

    store_module(&args.output, &module)
}

fn cmd_analyze(args: AnalyzeArgs) -> Result<(), String> {
    let module = load_module(&args.input)?;
    let stats = analyze(&module);
    print!(
        "{}",
        stats.report(AnalyzeOptions {
            print_vec: args.print_vec,
            print_asm: args.print_asm,
        })
    );
    Ok(())
}
