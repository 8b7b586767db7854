use std::{
    io::{BufWriter, Write},
    path::PathBuf,
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vector_1brc::{Config, OutputFormat, OversizedKeys};

/// Min, mean and max per station over a `<station>;<measurement>` file,
/// using SIMD parsing over a memory-mapped input split across threads.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Input file, one `<key>;<-?d{1,2}.d>` record per line
    #[arg(default_value = "measurements.txt")]
    path: PathBuf,

    /// Worker threads [default: available parallelism]
    #[arg(short, long)]
    threads: Option<usize>,

    /// Input slices, one worker task each [default: thread count]
    #[arg(short, long)]
    partitions: Option<usize>,

    /// Handling of keys wider than one 32-byte SIMD lane
    #[arg(long, value_enum, default_value_t = OversizedKeys::Reject)]
    oversized_keys: OversizedKeys,

    #[arg(long, value_enum, default_value_t = OutputFormat::Braces)]
    format: OutputFormat,

    /// Fail if any worker is still running after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,
}

impl Args {
    fn config(&self) -> Config {
        let mut config = match self.threads {
            Some(threads) => Config::with_threads(threads),
            None => Config::default(),
        };
        if let Some(partitions) = self.partitions {
            config.partitions = partitions.max(1);
        }
        config.oversized_keys = self.oversized_keys;
        config.deadline = self.deadline_secs.map(Duration::from_secs);
        config
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.config();

    let mut buffered_stdout = BufWriter::with_capacity(2 * 1024 * 1024, std::io::stdout());
    vector_1brc::run(&args.path, &config, args.format, &mut buffered_stdout)
        .with_context(|| format!("failed to process `{}`", args.path.display()))?;
    buffered_stdout.flush().context("failed to flush results")?;
    Ok(())
}
