//! Orchestration: wires the Record Source(s), Time-Ordered Merger, Lifetime
//! Tracker, Accounting Layer, and Report Emitter into the two run modes
//! (file, pipe) described by the CLI. Thin, like the teacher's
//! `backup_device` entry point — almost everything interesting lives in the
//! modules it calls.

pub mod accounting;
pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod merger;
pub mod record;
pub mod report;
pub mod source;
pub mod tracker;

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};

use accounting::AccountingLayer;
use config::{AnalyzerConfig, InputMode};
use error::{AnalyzerError, Diagnostic};
use merger::TimeOrderedMerger;
use record::{ActionCode, TraceRecord};
use report::Emitter;
use source::{discover_files, FileRecordSource, PipeRecordSource, RecordSource};
use tracker::graph::{DependencyGraph, NodeKind};
use tracker::{Elapsed, LifetimeTracker};

/// Runs the analyzer end to end against a validated configuration, writing
/// the per-event report (and, unless `--quiet`, the aggregate summary) to
/// the configured output.
pub fn run(config: AnalyzerConfig) -> Result<(), AnalyzerError> {
    let done = install_shutdown_flag()?;

    let output: Box<dyn Write> = match &config.output {
        Some(path) => Box::new(std::io::BufWriter::new(std::fs::File::create(path)?)),
        None => Box::new(std::io::BufWriter::new(std::io::stdout())),
    };
    let mut emitter = Emitter::new(output);
    for spec in &config.format_specs {
        emitter.add_override(spec).map_err(AnalyzerError::InvalidArgument)?;
    }

    let mut engine = Engine {
        tracker: LifetimeTracker::new(config.track_ios),
        graph: config.graph.then(DependencyGraph::new),
        accounting: AccountingLayer::new(config.per_process_stats),
        emitter: &mut emitter,
    };

    match &config.input {
        InputMode::Files(base) => run_file_mode(base, &config, &mut engine, &done)?,
        InputMode::Pipe => run_pipe_mode(&config, &mut engine, &done)?,
    }

    if !config.quiet {
        engine.emitter.emit_summary(&engine.accounting)?;
        if config.json {
            engine.emitter.emit_summary_json(&engine.accounting)?;
        }
    }
    Ok(())
}

fn install_shutdown_flag() -> Result<Arc<AtomicBool>, AnalyzerError> {
    let done = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM, signal_hook::consts::SIGHUP] {
        signal_hook::flag::register(signal, Arc::clone(&done))?;
    }
    Ok(done)
}

struct Engine<'a, W: Write> {
    tracker: LifetimeTracker,
    graph: Option<DependencyGraph>,
    accounting: AccountingLayer,
    emitter: &'a mut Emitter<W>,
}

impl<'a, W: Write> Engine<'a, W> {
    fn ingest(&mut self, record: TraceRecord) -> Result<(), AnalyzerError> {
        self.accounting.record_event(record.device);
        let (letter, elapsed, diagnostics) = dispatch(&record, &mut self.tracker, &mut self.accounting, &mut self.graph);
        for diagnostic in diagnostics {
            self.emitter.emit_diagnostic(&diagnostic);
        }
        self.emitter.emit(letter, &record, record.cpu, elapsed)?;
        Ok(())
    }

    fn ingest_all(&mut self, records: Vec<TraceRecord>) -> Result<(), AnalyzerError> {
        for record in records {
            self.ingest(record)?;
        }
        Ok(())
    }

    fn report_merge_diagnostic(&mut self, diagnostic: Diagnostic) {
        if let Diagnostic::SequenceGap { device, .. } = diagnostic {
            self.accounting.record_skip(device);
        }
        self.emitter.emit_diagnostic(&diagnostic);
    }
}

/// One request's worth of category/byte/pid context pulled out of a record,
/// to keep the match arms in `dispatch` from repeating `record.foo` on
/// every line.
fn dispatch(
    record: &TraceRecord,
    tracker: &mut LifetimeTracker,
    accounting: &mut AccountingLayer,
    graph: &mut Option<DependencyGraph>,
) -> (&'static str, Elapsed, Vec<Diagnostic>) {
    let category = record.category();
    let is_write = record.is_write();
    let device = record.device;
    let sector = record.sector;
    let bytes = record.bytes;
    let time = record.time;
    let cpu = record.cpu;
    let pid = record.pid;
    let comm = record.comm_str();

    let mut diagnostics = Vec::new();
    let mut elapsed = Elapsed::Unknown;
    let letter = match record.action_code() {
        Some(ActionCode::Queue) => {
            accounting.account_queue(device, cpu, pid, &comm, is_write, bytes);
            ActionCode::Queue.letter()
        }
        Some(ActionCode::GetRQ) => {
            tracker.get_rq(pid, device, sector, time);
            graph_record(graph, NodeKind::Queue, device, sector, time);
            ActionCode::GetRQ.letter()
        }
        Some(ActionCode::SleepRQ) => ActionCode::SleepRQ.letter(),
        Some(ActionCode::Plug) => {
            graph_record(graph, NodeKind::Plug, device, sector, time);
            ActionCode::Plug.letter()
        }
        Some(ActionCode::Insert) => {
            elapsed = tracker.insert(pid, device, sector, time);
            if let Elapsed::Known(ns) = elapsed {
                accounting.note_allocation_wait(pid, is_write, ns);
            }
            graph_record(graph, NodeKind::Insert, device, sector, time);
            ActionCode::Insert.letter()
        }
        Some(ActionCode::BackMerge) => {
            accounting.account_merge(device, cpu, pid, &comm, is_write, bytes);
            graph_record(graph, NodeKind::Merge, device, sector, time);
            ActionCode::BackMerge.letter()
        }
        Some(ActionCode::FrontMerge) => {
            if let Some(diag) = tracker.front_merge(device, sector, bytes) {
                diagnostics.push(diag);
            }
            accounting.account_merge(device, cpu, pid, &comm, is_write, bytes);
            graph_record(graph, NodeKind::Merge, device, sector, time);
            ActionCode::FrontMerge.letter()
        }
        Some(ActionCode::Issue) => {
            let (e, diag) = tracker.issue(category, device, sector, time);
            elapsed = e;
            diagnostics.extend(diag);
            accounting.account_issue(device, cpu, pid, &comm, is_write, bytes);
            if let Elapsed::Known(ns) = elapsed {
                accounting.note_dispatch_wait(pid, is_write, ns);
            }
            graph_record(graph, NodeKind::Dispatch, device, sector, time);
            ActionCode::Issue.letter()
        }
        Some(ActionCode::Complete) => {
            let (e, diag) = tracker.complete(category, device, sector, time);
            elapsed = e;
            diagnostics.extend(diag);
            accounting.account_complete(device, cpu, pid, &comm, is_write, bytes);
            if let Elapsed::Known(ns) = elapsed {
                accounting.note_completion_wait(pid, is_write, ns);
            }
            if let Some(graph) = graph {
                let id = graph.record(NodeKind::Complete, device, sector, time);
                let _ = graph.traverse(id);
            }
            ActionCode::Complete.letter()
        }
        Some(ActionCode::Requeue) => {
            accounting.account_requeue(device, cpu, pid, &comm, is_write, bytes);
            graph_record(graph, NodeKind::Requeue, device, sector, time);
            ActionCode::Requeue.letter()
        }
        Some(ActionCode::UnplugIO) => {
            accounting.account_unplug(device, cpu, false);
            graph_record(graph, NodeKind::Unplug, device, sector, time);
            ActionCode::UnplugIO.letter()
        }
        Some(ActionCode::UnplugTimer) => {
            accounting.account_unplug(device, cpu, true);
            graph_record(graph, NodeKind::Unplug, device, sector, time);
            ActionCode::UnplugTimer.letter()
        }
        Some(ActionCode::Remap) => {
            graph_record(graph, NodeKind::Remap, device, sector, time);
            ActionCode::Remap.letter()
        }
        Some(ActionCode::Split) => {
            graph_record(graph, NodeKind::Split, device, sector, time);
            ActionCode::Split.letter()
        }
        Some(ActionCode::Bounce) => ActionCode::Bounce.letter(),
        Some(ActionCode::Abort) => ActionCode::Abort.letter(),
        None => {
            warn!("unrecognized action code {:#x} on device {},{}", record.action & 0xffff, device >> record::MINOR_BITS, device & record::MINOR_MASK);
            "?"
        }
    };

    (letter, elapsed, diagnostics)
}

fn graph_record(graph: &mut Option<DependencyGraph>, kind: NodeKind, device: u32, sector: u64, time: u64) {
    if let Some(graph) = graph {
        graph.record(kind, device, sector, time);
    }
}

fn run_file_mode<W: Write>(
    base: &std::path::Path,
    config: &AnalyzerConfig,
    engine: &mut Engine<'_, W>,
    done: &Arc<AtomicBool>,
) -> Result<(), AnalyzerError> {
    let files = discover_files(base)?;
    let mut merger = TimeOrderedMerger::new();

    for (cpu, path) in files.iter().enumerate() {
        let cpu = cpu as u32;
        let mut source = match FileRecordSource::open(path, cpu) {
            Ok(source) => source,
            Err(err) => {
                warn!("skipping {}: {err}", path.display());
                continue;
            }
        };
        info!("reading {}", path.display());
        loop {
            let batch = source.read_batch(config.batch_size)?;
            if batch.is_empty() {
                break;
            }
            for record in batch {
                merger.insert(record);
            }
            if source.is_exhausted() {
                break;
            }
            if done.load(Ordering::Relaxed) {
                break;
            }
        }
    }

    let mut diagnostics = Vec::new();
    let ready = merger.drain(false, config.stopwatch, |d| diagnostics.push(d));
    for diagnostic in diagnostics {
        engine.report_merge_diagnostic(diagnostic);
    }
    engine.ingest_all(ready)
}

fn run_pipe_mode<W: Write>(config: &AnalyzerConfig, engine: &mut Engine<'_, W>, done: &Arc<AtomicBool>) -> Result<(), AnalyzerError> {
    let mut source = PipeRecordSource::new();
    let mut merger = TimeOrderedMerger::new();

    loop {
        let batch = source.read_batch(config.batch_size)?;
        for record in batch {
            merger.insert(record);
        }

        let mut diagnostics = Vec::new();
        let ready = merger.drain(true, config.stopwatch, |d| diagnostics.push(d));
        for diagnostic in diagnostics {
            engine.report_merge_diagnostic(diagnostic);
        }
        engine.ingest_all(ready)?;

        if source.is_exhausted() || done.load(Ordering::Relaxed) {
            break;
        }
    }

    let mut diagnostics = Vec::new();
    let remaining = merger.drain(false, config.stopwatch, |d| diagnostics.push(d));
    for diagnostic in diagnostics {
        engine.report_merge_diagnostic(diagnostic);
    }
    engine.ingest_all(remaining)
}
