//! Time-Ordered Merger: folds per-CPU (or single interleaved pipe) record
//! streams into one stream ordered by (time, device, sequence), the same
//! key the original tool's rbtree sorted on (`trace_rb_insert`).
//!
//! A `BTreeMap` stands in for that rbtree: same ordering contract, no
//! manual tree surgery.

use std::collections::BTreeMap;

use crate::error::Diagnostic;
use crate::record::TraceRecord;

/// (time, device, sequence) — the merge/sort key `trace_rb_insert` compares
/// on, in the same field priority.
pub type MergeKey = (u64, u32, u32);

pub fn merge_key(record: &TraceRecord) -> MergeKey {
    (record.time, record.device, record.sequence)
}

struct MergedEntry {
    record: TraceRecord,
    /// Pipe-mode only: how many drain attempts have held this entry back
    /// waiting for an in-between sequence number to arrive. Capped at 5
    /// (`show_entries_rb`'s `t->skipped < 5` bound) before it's forced
    /// through with a logged gap instead of waiting indefinitely.
    skipped: u32,
}

#[derive(Default)]
struct DeviceMergeState {
    last_sequence: Option<u32>,
    last_time: Option<u64>,
    skips: u64,
}

/// An inclusive-start, exclusive-end window of post-genesis time to report;
/// everything else is read (to keep per-device sequence state consistent)
/// but dropped before it reaches the tracker/report stages.
#[derive(Clone, Copy, Debug)]
pub struct StopwatchWindow {
    pub start: u64,
    pub end: u64,
}

impl Default for StopwatchWindow {
    fn default() -> Self {
        StopwatchWindow { start: 0, end: u64::MAX }
    }
}

#[derive(Default)]
pub struct TimeOrderedMerger {
    entries: BTreeMap<MergeKey, MergedEntry>,
    genesis_time: Option<u64>,
    per_device: std::collections::HashMap<u32, DeviceMergeState>,
}

impl TimeOrderedMerger {
    pub fn new() -> Self {
        TimeOrderedMerger::default()
    }

    /// Insert one record. Mirrors `trace_rb_insert`: the genesis time is
    /// updated unconditionally, even when the insert itself is rejected as
    /// a duplicate key.
    pub fn insert(&mut self, record: TraceRecord) -> Option<Diagnostic> {
        self.genesis_time = Some(match self.genesis_time {
            Some(g) => g.min(record.time),
            None => record.time,
        });

        let key = merge_key(&record);
        if self.entries.contains_key(&key) {
            return Some(Diagnostic::SequenceAlias {
                device: record.device,
                sequence: record.sequence,
            });
        }
        self.entries.insert(key, MergedEntry { record, skipped: 0 });
        None
    }

    pub fn genesis_time(&self) -> u64 {
        self.genesis_time.unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn skips_for(&self, device: u32) -> u64 {
        self.per_device.get(&device).map(|s| s.skips).unwrap_or(0)
    }

    /// Drain records in merge-key order, applying genesis subtraction and
    /// the stopwatch window, and reporting out-of-order sequence numbers.
    ///
    /// In piped mode (`piped == true`) an out-of-order record is held back
    /// (not removed) up to 5 calls, giving a slightly-late record from
    /// another CPU a chance to arrive and close the gap, before being
    /// forced through with a logged gap — matching `show_entries_rb`'s
    /// `piped && t->skipped < 5` bound. In file mode every record that's
    /// already present is fully sorted, so gaps are reported immediately
    /// and nothing is ever held back.
    pub fn drain(
        &mut self,
        piped: bool,
        window: StopwatchWindow,
        mut on_diagnostic: impl FnMut(Diagnostic),
    ) -> Vec<TraceRecord> {
        let mut out = Vec::new();
        loop {
            let key = match self.entries.keys().next().copied() {
                Some(k) => k,
                None => break,
            };
            let (_, device, sequence) = key;

            let state = self.per_device.entry(device).or_default();
            let is_gap = matches!(state.last_sequence, Some(last) if sequence != last.wrapping_add(1));

            if is_gap {
                let entry = self.entries.get_mut(&key).expect("key just peeked");
                if piped && entry.skipped < 5 {
                    entry.skipped += 1;
                    break;
                }
                on_diagnostic(Diagnostic::SequenceGap {
                    device,
                    from: state.last_sequence.unwrap(),
                    to: sequence,
                });
                state.skips += 1;
            }
            let adjusted_time = key.0.saturating_sub(self.genesis_time.unwrap_or(0));
            if adjusted_time >= window.end {
                // Every remaining entry sorts at or after this one in time,
                // so nothing past here can be in-window either. Leave it
                // in place untouched for a later, wider-windowed drain.
                break;
            }

            state.last_sequence = Some(sequence);
            let mut record = self.entries.remove(&key).expect("key just peeked").record;
            record.time = adjusted_time;

            if adjusted_time < window.start {
                continue;
            }

            if let Some(last_time) = state.last_time {
                if adjusted_time < last_time {
                    on_diagnostic(Diagnostic::TimeWentBackwards {
                        device,
                        from: last_time,
                        to: adjusted_time,
                    });
                }
            }
            state.last_time = Some(adjusted_time);

            out.push(record);
        }
        out
    }
}
