//! End-to-end scenarios against the merger/tracker/accounting trio, built
//! from constructed records rather than real debugfs captures, exercising
//! the documented numbers a full pipeline run should produce.

use blktrace_analyze::accounting::AccountingLayer;
use blktrace_analyze::error::Diagnostic;
use blktrace_analyze::merger::{StopwatchWindow, TimeOrderedMerger};
use blktrace_analyze::record::{ActionCode, Category, TraceRecord, MINOR_BITS};
use blktrace_analyze::source::discover_files;
use blktrace_analyze::tracker::{Elapsed, LifetimeTracker};

const DEVICE_8_0: u32 = 8 << MINOR_BITS;

fn record(sequence: u32, time: u64, sector: u64, bytes: u32, action: u32, pid: u32, device: u32) -> TraceRecord {
    TraceRecord {
        sequence,
        time,
        sector,
        bytes,
        action,
        pid,
        device,
        cpu: 0,
        error: 0,
        comm: [0u8; 16],
        payload: Vec::new(),
    }
}

#[test]
fn simple_read_reports_documented_elapsed_and_counts() {
    let mut tracker = LifetimeTracker::new(true);
    let mut accounting = AccountingLayer::new(false);
    let (device, sector, bytes, pid) = (DEVICE_8_0, 1000u64, 4096u32, 42u32);

    accounting.account_queue(device, 0, pid, "fio", false, bytes); // Q @ 100
    tracker.get_rq(pid, device, sector, 150); // G @ 150

    let insert_elapsed = tracker.insert(pid, device, sector, 200); // I @ 200
    assert_eq!(insert_elapsed, Elapsed::Known(50));

    let (issue_elapsed, diag) = tracker.issue(Category::FS, device, sector, 500); // D @ 500
    assert!(diag.is_none());
    assert_eq!(issue_elapsed, Elapsed::Known(300));
    accounting.account_issue(device, 0, pid, "fio", false, bytes);

    let (complete_elapsed, diag) = tracker.complete(Category::FS, device, sector, 1500); // C @ 1500
    assert!(diag.is_none());
    assert_eq!(complete_elapsed, Elapsed::Known(1000));
    accounting.account_complete(device, 0, pid, "fio", false, bytes);

    assert_eq!(tracker.open_count(), 0);
    let stats = &accounting.per_device()[&device].io_stats;
    assert_eq!(stats.creads, 1);
    assert_eq!(stats.cread_kb, 4);
    assert_eq!(stats.ireads, 1);
}

#[test]
fn front_merge_rekeys_and_bumps_merge_counter() {
    let mut tracker = LifetimeTracker::new(true);
    let mut accounting = AccountingLayer::new(false);
    let device = DEVICE_8_0;

    tracker.get_rq(7, device, 1008, 0);
    tracker.insert(7, device, 1008, 5);

    let diag = tracker.front_merge(device, 1000, 4096); // 1008 - 4096/512 == 1000
    assert!(diag.is_none());
    accounting.account_merge(device, 0, 7, "fio", false, 4096);

    assert_eq!(accounting.per_device()[&device].io_stats.mreads, 1);
}

#[test]
fn requeue_recredits_completed_bytes_without_double_completing() {
    let mut accounting = AccountingLayer::new(false);
    let device = DEVICE_8_0;

    accounting.account_complete(device, 0, 3, "fio", true, 4096);
    assert_eq!(accounting.per_device()[&device].io_stats.cwrite_kb, 4);
    assert_eq!(accounting.per_device()[&device].io_stats.cwrites, 1);

    accounting.account_requeue(device, 0, 3, "fio", true, 4096);
    assert_eq!(accounting.per_device()[&device].io_stats.cwrite_kb, 0);
    assert_eq!(accounting.per_device()[&device].io_stats.cwrites, 1);
}

#[test]
fn sequence_alias_is_rejected_and_reported_once() {
    let mut merger = TimeOrderedMerger::new();
    let action = (Category::READ.bits() << 16) | ActionCode::Queue as u32;
    assert!(merger.insert(record(0, 100, 0, 0, action, 1, DEVICE_8_0)).is_none());
    let diag = merger.insert(record(0, 100, 0, 0, action, 1, DEVICE_8_0));
    assert_eq!(diag, Some(Diagnostic::SequenceAlias { device: DEVICE_8_0, sequence: 0 }));
    assert_eq!(diag.unwrap().to_string(), "sequence alias (0) on device 8,0");

    let out = merger.drain(false, StopwatchWindow::default(), |_| {});
    assert_eq!(out.len(), 1);
}

#[test]
fn pipe_reorder_tolerance_resolves_without_a_skip() {
    let mut merger = TimeOrderedMerger::new();
    let action = (Category::READ.bits() << 16) | ActionCode::Queue as u32;

    // Batch 1: sequences 1, 2, 4, 5 arrive; 3 is still in flight.
    for (seq, time) in [(1, 10), (2, 20), (4, 40), (5, 50)] {
        merger.insert(record(seq, time, 0, 0, action, 1, DEVICE_8_0));
    }

    let mut diags = Vec::new();
    let batch1 = merger.drain(true, StopwatchWindow::default(), |d| diags.push(d));
    assert_eq!(batch1.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![1, 2]);

    // Batches 2-4: nothing new arrives; the held-back run of 4,5 waits.
    for _ in 0..3 {
        let out = merger.drain(true, StopwatchWindow::default(), |d| diags.push(d));
        assert!(out.is_empty());
    }

    // Batch 5: the missing sequence 3 finally arrives.
    merger.insert(record(3, 30, 0, 0, action, 1, DEVICE_8_0));
    let batch5 = merger.drain(true, StopwatchWindow::default(), |d| diags.push(d));
    assert_eq!(batch5.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![3, 4, 5]);
    assert!(diags.is_empty());
}

#[test]
fn process_longest_write_wait_tracks_the_maximum_gap() {
    let mut accounting = AccountingLayer::new(true);
    accounting.account_queue(DEVICE_8_0, 0, 42, "writer", true, 4096);

    for gap in [100, 300, 200] {
        accounting.note_allocation_wait(42, true, gap);
    }

    let processes = accounting.processes_sorted();
    assert_eq!(processes.len(), 1);
    assert_eq!(processes[0].longest_allocation_wait[1], 300);
}

#[test]
fn empty_input_base_reports_no_files_found() {
    let missing = std::env::temp_dir().join("blktrace-analyze-integration-no-such-base");
    let err = discover_files(&missing).unwrap_err();
    assert!(matches!(err, blktrace_analyze::error::AnalyzerError::NoInputFound(_)));
}

#[test]
fn orphan_front_merge_reports_a_single_diagnostic() {
    let mut tracker = LifetimeTracker::new(true);
    let diag = tracker.front_merge(DEVICE_8_0, 500, 4096);
    assert!(matches!(diag, Some(Diagnostic::OrphanEvent { action: "front merge", .. })));
    // No track existed, so nothing is left open and a subsequent Issue for
    // the same sector still reports as an orphan rather than stale data.
    let (elapsed, issue_diag) = tracker.issue(Category::FS, DEVICE_8_0, 500, 10);
    assert_eq!(elapsed, Elapsed::Unknown);
    assert!(issue_diag.is_some());
}

#[test]
fn sequence_gap_thresholds_match_the_documented_boundary() {
    let action = (Category::READ.bits() << 16) | ActionCode::Queue as u32;

    let mut merger = TimeOrderedMerger::new();
    merger.insert(record(0, 0, 0, 0, action, 1, DEVICE_8_0));
    merger.insert(record(1, 10, 0, 0, action, 1, DEVICE_8_0));
    let mut diags = Vec::new();
    merger.drain(false, StopwatchWindow::default(), |d| diags.push(d));
    assert!(diags.is_empty(), "a gap of exactly 1 must not be reported");

    let mut merger = TimeOrderedMerger::new();
    merger.insert(record(0, 0, 0, 0, action, 1, DEVICE_8_0));
    merger.insert(record(2, 10, 0, 0, action, 1, DEVICE_8_0));
    let mut diags = Vec::new();
    merger.drain(false, StopwatchWindow::default(), |d| diags.push(d));
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0], Diagnostic::SequenceGap { device: DEVICE_8_0, from: 0, to: 2 });
}
