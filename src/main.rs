use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use perfshow::{logging, run, RunConfig};

/// Render unified performance data as a Perfetto trace.
#[derive(Debug, Parser)]
#[command(name = "perfshow")]
#[command(version)]
struct Command {
    /// Run configuration (sources, output path and views)
    #[arg(short, long, default_value = "data/show.json")]
    json: PathBuf,
    /// Write diagnostics to this file instead of stderr
    #[arg(long)]
    log: Option<PathBuf>,
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
    /// Trace buffer size in KiB
    #[arg(long, default_value = "4096")]
    buffer_size_kb: usize,
}

fn try_main(opts: &Command) -> Result<()> {
    let config = RunConfig::load(&opts.json)?;
    info!(
        "Rendering {} views from {} sources into {}",
        config.views.len(),
        config.filelist.len(),
        config.output.display()
    );
    let stats = run(&config, opts.buffer_size_kb)?;
    info!("Done: {}", stats);
    Ok(())
}

fn main() {
    let opts = Command::parse();

    if let Err(e) = logging::init(opts.verbose, opts.log.as_deref()) {
        eprintln!("{e:#}");
        process::exit(1);
    }

    if let Err(e) = try_main(&opts) {
        error!("{:#}", e);
        process::exit(1);
    }
}
