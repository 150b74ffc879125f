//! Translates parsed CLI args into a validated, internal configuration —
//! the same `Cli` (raw, borrow-shaped) -> `Config` (owned, validated) split
//! the teacher's `control/interface.rs::Internalize` trait performs, though
//! without the trait itself: this crate has no YAML-manifest layer to
//! justify the `Internalize`/`Require`/`Maybe` zoo, so a single fallible
//! `TryFrom` does the whole job.

use std::convert::TryFrom;
use std::path::PathBuf;

use crate::cli::Cli;
use crate::error::AnalyzerError;
use crate::merger::StopwatchWindow;
use crate::report::VALID_OVERRIDE_LETTERS;

#[derive(Clone, Debug)]
pub enum InputMode {
    Files(PathBuf),
    Pipe,
}

#[derive(Clone, Debug)]
pub struct AnalyzerConfig {
    pub input: InputMode,
    pub output: Option<PathBuf>,
    pub batch_size: usize,
    pub per_process_stats: bool,
    pub track_ios: bool,
    pub graph: bool,
    pub quiet: bool,
    pub stopwatch: StopwatchWindow,
    pub format_specs: Vec<String>,
    pub json: bool,
    pub verbosity: u8,
}

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

impl TryFrom<Cli> for AnalyzerConfig {
    type Error = AnalyzerError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        if cli.batch_size == 0 {
            return Err(AnalyzerError::InvalidArgument("--batch-size must be at least 1".into()));
        }

        let input = if cli.input == "-" {
            InputMode::Pipe
        } else {
            InputMode::Files(PathBuf::from(cli.input))
        };

        let stopwatch = match &cli.stopwatch {
            Some(spec) => parse_stopwatch(spec)?,
            None => StopwatchWindow::default(),
        };

        for spec in &cli.format_spec {
            validate_format_spec(spec)?;
        }

        Ok(AnalyzerConfig {
            input,
            output: cli.output,
            batch_size: cli.batch_size,
            per_process_stats: cli.per_process_stats,
            track_ios: cli.track_ios || cli.graph,
            graph: cli.graph,
            quiet: cli.quiet,
            stopwatch,
            format_specs: cli.format_spec,
            json: cli.json,
            verbosity: cli.verbose,
        })
    }
}

/// `"start:end"` or `":end"`, floating-point seconds, either side
/// inclusive; converted to nanoseconds to match `TraceRecord::time`.
fn parse_stopwatch(spec: &str) -> Result<StopwatchWindow, AnalyzerError> {
    let (start_str, end_str) = spec
        .split_once(':')
        .ok_or_else(|| AnalyzerError::InvalidArgument(format!("bad stopwatch {spec:?} - need ':'")))?;

    let start = if start_str.is_empty() {
        0.0
    } else {
        start_str
            .parse::<f64>()
            .map_err(|_| AnalyzerError::InvalidArgument(format!("bad stopwatch start {start_str:?}")))?
    };
    let end = if end_str.is_empty() {
        f64::MAX
    } else {
        end_str
            .parse::<f64>()
            .map_err(|_| AnalyzerError::InvalidArgument(format!("bad stopwatch end {end_str:?}")))?
    };
    if end < start {
        return Err(AnalyzerError::InvalidArgument(format!("stopwatch end before start in {spec:?}")));
    }

    Ok(StopwatchWindow {
        start: (start * NANOS_PER_SECOND) as u64,
        end: if end == f64::MAX { u64::MAX } else { (end * NANOS_PER_SECOND) as u64 },
    })
}

fn validate_format_spec(spec: &str) -> Result<(), AnalyzerError> {
    let (letter_str, template) = spec
        .split_once(':')
        .ok_or_else(|| AnalyzerError::InvalidArgument(format!("bad format specifier - need ':' in {spec:?}")))?;
    let mut chars = letter_str.chars();
    let letter = chars
        .next()
        .filter(|_| chars.next().is_none())
        .ok_or_else(|| AnalyzerError::InvalidArgument(format!("format specifier letter must be one character: {spec:?}")))?;
    if !VALID_OVERRIDE_LETTERS.contains(letter) {
        return Err(AnalyzerError::InvalidArgument(format!("bad format specifier letter {letter:?}")));
    }
    if template.is_empty() {
        return Err(AnalyzerError::InvalidArgument(format!("format specifier {spec:?} has an empty template")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli(input: &str) -> Cli {
        Cli {
            input: input.to_string(),
            output: None,
            batch_size: 1024,
            per_process_stats: false,
            track_ios: false,
            graph: false,
            quiet: false,
            stopwatch: None,
            format_spec: Vec::new(),
            json: false,
            verbose: 0,
        }
    }

    #[test]
    fn dash_input_selects_pipe_mode() {
        let config = AnalyzerConfig::try_from(base_cli("-")).unwrap();
        assert!(matches!(config.input, InputMode::Pipe));
    }

    #[test]
    fn file_input_keeps_the_base_path() {
        let config = AnalyzerConfig::try_from(base_cli("/tmp/trace")).unwrap();
        match config.input {
            InputMode::Files(path) => assert_eq!(path, PathBuf::from("/tmp/trace")),
            InputMode::Pipe => panic!("expected Files"),
        }
    }

    #[test]
    fn graph_flag_implies_track_ios() {
        let mut cli = base_cli("-");
        cli.graph = true;
        let config = AnalyzerConfig::try_from(cli).unwrap();
        assert!(config.track_ios);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut cli = base_cli("-");
        cli.batch_size = 0;
        assert!(AnalyzerConfig::try_from(cli).is_err());
    }

    #[test]
    fn parses_open_ended_stopwatch() {
        let window = parse_stopwatch(":1.5").unwrap();
        assert_eq!(window.start, 0);
        assert_eq!(window.end, 1_500_000_000);
    }

    #[test]
    fn parses_full_stopwatch_window() {
        let window = parse_stopwatch("0.5:1.5").unwrap();
        assert_eq!(window.start, 500_000_000);
        assert_eq!(window.end, 1_500_000_000);
    }

    #[test]
    fn rejects_end_before_start() {
        assert!(parse_stopwatch("2:1").is_err());
    }

    #[test]
    fn rejects_format_spec_with_invalid_letter() {
        assert!(validate_format_spec("I:foo").is_err());
    }
}
