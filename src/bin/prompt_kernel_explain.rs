//! Prompt Kernel Explain Binary
//!
//! Runs every compilation stage over a JSON atom file and prints the
//! resulting explain report as JSON on stdout. Logs go to stderr.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `PROMPT_KERNEL_*`: compiler settings (see `prompt_kernel::config`)
//! - `RUST_LOG`: Log level filter (default: warn)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: pretty)
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin prompt_kernel_explain -- atoms.json 4000
//! ```
//!
//! Entries that are `null` or fail to parse are reported as missing atoms
//! rather than aborting the run.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use prompt_kernel::{parse_atom_list, CompilationContext, Compiler, CompilerConfig};

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "prompt_kernel_explain=info,prompt_kernel=warn".into());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .flatten_event(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[derive(Parser)]
#[command(name = "prompt_kernel_explain")]
#[command(about = "Explain how an atom file compiles into a prompt", long_about = None)]
#[command(version)]
struct Args {
    /// JSON array of atoms
    path: PathBuf,

    /// Token budget for the compilation (before reserved output tokens)
    #[arg(allow_negative_numbers = true)]
    budget: Option<i64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Args { path, budget } = Args::parse();
    init_tracing();

    let config = CompilerConfig::from_env();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        path = %path.display(),
        budget = ?budget,
        cycle_policy = ?config.cycle_policy,
        "Explaining atom file"
    );

    let json = std::fs::read_to_string(&path)?;
    let atoms = parse_atom_list(&json)?;

    let mut context = CompilationContext::new("cli");
    if let Some(budget) = budget {
        context = context.with_token_budget(budget);
    }

    let report = Compiler::new(config).explain(atoms, &context)?;
    info!(
        selected = report.selected.len(),
        dropped = report.dropped.len(),
        rejected = report.rejected.len(),
        acyclic = report.is_acyclic(),
        "Explain complete"
    );

    println!("{}", report.to_json_pretty()?);
    Ok(())
}
