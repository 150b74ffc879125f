//! Report Emitter: selects a per-action-letter template (sparse overrides
//! over a constant default table) and renders it against each record, plus
//! the end-of-run aggregate tables. Mirrors `fmt_select`/`process_fmt` and
//! `dump_io_stats`/`show_device_and_cpu_stats`/`show_process_stats`.

use std::io::{self, Write};

use log::error;

use crate::accounting::AccountingLayer;
use crate::format::{RenderContext, Template, HEADER};
use crate::record::{major, minor, TraceRecord};
use crate::tracker::Elapsed;

/// Action letters an override may target, matching the original's
/// `VALID_SPECS`. An override of `'M'` additionally applies to `'B'`
/// (back-merge), reproducing `add_format_spec`'s own quirk of pairing
/// those two rather than `'F'`/`'B'` — kept for fidelity rather than
/// "corrected", since nothing in this spec calls for changing it.
pub const VALID_OVERRIDE_LETTERS: &str = "BCDFGMPQRSTU";

fn default_template_source(letter: &str) -> &'static str {
    match letter {
        "Q" => "%S + %n (%8u) [%C]\n",
        "G" | "S" | "R" => "%S + %n [%C]\n",
        "M" | "B" | "F" => "%S + %n [%C]\n",
        "D" | "I" => "%S + %n (%8u) [%C]\n",
        "C" => "%S + %n (%8u) [%e]\n",
        "P" => "[%C]\n",
        "U" | "T" => "[%C] %U\n",
        "X" => "%S / %U [%C]\n",
        _ => "[%C]\n",
    }
}

/// An emitted line's template body is always prefixed by the common
/// header; only the suffix varies by action letter.
fn default_template(letter: &str) -> Template {
    Template::parse(&format!("{HEADER}{}", default_template_source(letter)))
}

pub struct Emitter<W: Write> {
    overrides: std::collections::HashMap<char, Template>,
    output: W,
}

impl<W: Write> Emitter<W> {
    pub fn new(output: W) -> Self {
        Emitter {
            overrides: std::collections::HashMap::new(),
            output,
        }
    }

    /// Parse and install a `"LETTER:TEMPLATE"` override, as accepted
    /// (repeatably) by `-f`/`--format-spec`.
    pub fn add_override(&mut self, spec: &str) -> Result<(), String> {
        let (letter_str, template) = spec
            .split_once(':')
            .ok_or_else(|| format!("bad format specifier - need ':' in {spec:?}"))?;
        let mut chars = letter_str.chars();
        let letter = chars
            .next()
            .filter(|_| chars.next().is_none())
            .ok_or_else(|| format!("bad format specifier {spec:?} - letter must be one character"))?;
        if !VALID_OVERRIDE_LETTERS.contains(letter) {
            return Err(format!("bad format specifier {letter:?}"));
        }
        if template.is_empty() {
            return Err(format!("bad format specifier - need a template after ':' in {spec:?}"));
        }
        let parsed = Template::parse(&format!("{HEADER}{template}"));
        self.overrides.insert(letter, parsed.clone());
        if letter == 'M' {
            self.overrides.insert('B', parsed);
        }
        Ok(())
    }

    /// Render one event. `letter` is the single-character (or, for
    /// two-character labels like none currently in use, first-character)
    /// action mnemonic used to select a template.
    pub fn emit(&mut self, letter: &str, record: &TraceRecord, cpu: u32, elapsed: Elapsed) -> io::Result<()> {
        let template = letter
            .chars()
            .next()
            .and_then(|c| self.overrides.get(&c))
            .cloned()
            .unwrap_or_else(|| default_template(letter));
        let ctx = RenderContext {
            record,
            action_letter: letter,
            cpu,
            elapsed,
        };
        write!(self.output, "{}", template.render(&ctx))
    }

    pub fn emit_diagnostic(&mut self, diagnostic: &crate::error::Diagnostic) {
        error!("{diagnostic}");
    }

    /// The end-of-run aggregate block: per-CPU, per-device, and (if
    /// collected) per-process tables, mirroring `show_device_and_cpu_stats`
    /// and `show_process_stats`.
    pub fn emit_summary(&mut self, accounting: &AccountingLayer) -> io::Result<()> {
        for (&device, stats) in accounting.per_device() {
            writeln!(
                self.output,
                "Device ({:3},{:<3}), events {}, skips {}:",
                major(device),
                minor(device),
                stats.events,
                stats.skips
            )?;
            self.write_io_stats_line(&stats.io_stats)?;
        }
        for (&(device, cpu), stats) in accounting.per_cpu() {
            writeln!(self.output, "  CPU{:>3} ({:3},{:<3}):", cpu, major(device), minor(device))?;
            self.write_io_stats_line(stats)?;
        }

        let processes = accounting.processes_sorted();
        if !processes.is_empty() {
            writeln!(self.output, "\nPer-process statistics:")?;
            for process in processes {
                writeln!(self.output, "{} ({}):", process.comm, process.pid)?;
                self.write_io_stats_line(&process.io_stats)?;
                writeln!(
                    self.output,
                    "  longest allocation wait: {}ns read, {}ns write",
                    process.longest_allocation_wait[0], process.longest_allocation_wait[1]
                )?;
                writeln!(
                    self.output,
                    "  longest dispatch wait: {}ns read, {}ns write",
                    process.longest_dispatch_wait[0], process.longest_dispatch_wait[1]
                )?;
                writeln!(
                    self.output,
                    "  longest completion wait: {}ns read, {}ns write",
                    process.longest_completion_wait[0], process.longest_completion_wait[1]
                )?;
            }
        }
        Ok(())
    }

    fn write_io_stats_line(&mut self, s: &crate::accounting::IoStats) -> io::Result<()> {
        writeln!(
            self.output,
            "  Reads Queued: {:>8}, {:>8}KiB\t Writes Queued: {:>8}, {:>8}KiB",
            s.qreads, s.qread_kb, s.qwrites, s.qwrite_kb
        )?;
        writeln!(
            self.output,
            "  Reads Completed: {:>8}, {:>8}KiB\t Writes Completed: {:>8}, {:>8}KiB",
            s.creads, s.cread_kb, s.cwrites, s.cwrite_kb
        )?;
        writeln!(
            self.output,
            "  Reads Merged: {:>8}, {:>8}KiB\t Writes Merged: {:>8}, {:>8}KiB",
            s.mreads, s.qread_kb, s.mwrites, s.qwrite_kb
        )?;
        writeln!(
            self.output,
            "  Reads Issued: {:>8}, {:>8}KiB\t Writes Issued: {:>8}, {:>8}KiB",
            s.ireads, s.iread_kb, s.iwrites, s.iwrite_kb
        )?;
        writeln!(self.output, "  IO unplugs: {:>8}\t Timer unplugs: {:>8}", s.io_unplugs, s.timer_unplugs)
    }

    /// Serialize the aggregate report as JSON instead of the text tables,
    /// for `--json`.
    pub fn emit_summary_json(&mut self, accounting: &AccountingLayer) -> Result<(), crate::error::AnalyzerError> {
        #[derive(serde::Serialize)]
        struct Report<'a> {
            per_device: &'a std::collections::BTreeMap<u32, crate::accounting::DeviceStats>,
            per_cpu: std::collections::BTreeMap<String, &'a crate::accounting::IoStats>,
            processes: Vec<&'a crate::accounting::ProcessStats>,
        }
        let per_cpu: std::collections::BTreeMap<String, &crate::accounting::IoStats> = accounting
            .per_cpu()
            .iter()
            .map(|(&(device, cpu), stats)| (format!("{}:{}", device, cpu), stats))
            .collect();
        let report = Report {
            per_device: accounting.per_device(),
            per_cpu,
            processes: accounting.processes_sorted(),
        };
        serde_json::to_writer_pretty(&mut self.output, &report)?;
        writeln!(self.output).map_err(crate::error::AnalyzerError::Io)
    }
}
