use std::path::PathBuf;

use clap::Parser;

/// Merges per-CPU block-I/O trace files (or a single interleaved pipe
/// stream) into a time-ordered timeline and reports request lifetimes and
/// throughput.
#[derive(Parser, Debug)]
#[command(name = env!("CARGO_PKG_NAME"), version, about)]
pub struct Cli {
    /// Base path for per-CPU trace files (`<input>.blktrace.<cpu>`), or
    /// `-` to read a single interleaved stream from stdin.
    #[arg(value_name = "INPUT")]
    pub input: String,

    /// Write the rendered timeline here instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Records per batch when reading a piped stream.
    #[arg(short = 'b', long, default_value_t = 1024)]
    pub batch_size: usize,

    /// Collect and report per-process statistics.
    #[arg(short = 'p', long)]
    pub per_process_stats: bool,

    /// Track individual request lifetimes (enables the Lifetime Tracker).
    #[arg(short = 't', long)]
    pub track_ios: bool,

    /// Use the extended dependency graph (implies --track-ios).
    #[arg(long)]
    pub graph: bool,

    /// Suppress the end-of-run aggregate report.
    #[arg(short, long)]
    pub quiet: bool,

    /// Only report events within `start:end` (or `:end`), in
    /// floating-point seconds relative to the trace's genesis time.
    #[arg(short, long, value_name = "START:END")]
    pub stopwatch: Option<String>,

    /// Override the default template for one action letter:
    /// `LETTER:TEMPLATE`. Repeatable.
    #[arg(short = 'f', long = "format-spec", value_name = "LETTER:TEMPLATE")]
    pub format_spec: Vec<String>,

    /// Additionally emit the aggregate report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Increase logging verbosity (repeatable); also controlled by
    /// `RUST_LOG`.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
