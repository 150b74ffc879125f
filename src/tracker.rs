//! Lifetime Tracker: follows one request from allocation through
//! completion, keyed on (device, sector), mirroring `struct io_track` and
//! the `find_track`/`__find_track`/`log_track_*` family in the original.

use std::collections::BTreeMap;

use crate::error::Diagnostic;
use crate::record::Category;

pub mod graph;

/// How long a lifecycle stage took, or `Unknown` when the matching earlier
/// event was never seen (tracker started mid-stream, or the event was
/// dropped as a sequence alias).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Elapsed {
    Known(u64),
    Unknown,
}

impl Elapsed {
    pub fn from_times(later: Option<u64>, earlier: Option<u64>) -> Self {
        match (later, earlier) {
            (Some(l), Some(e)) if l >= e => Elapsed::Known(l - e),
            _ => Elapsed::Unknown,
        }
    }
}

/// One request's lifecycle timestamps, keyed on (device, sector) in the
/// tracker's map. Re-keyed in place on a front merge.
#[derive(Clone, Debug)]
pub struct RequestTrack {
    pub pid: u32,
    pub device: u32,
    pub sector: u64,
    pub allocation_time: Option<u64>,
    pub queue_time: Option<u64>,
    pub dispatch_time: Option<u64>,
    pub completion_time: Option<u64>,
}

impl RequestTrack {
    fn new(pid: u32, device: u32, sector: u64) -> Self {
        RequestTrack {
            pid,
            device,
            sector,
            allocation_time: None,
            queue_time: None,
            dispatch_time: None,
            completion_time: None,
        }
    }
}

type TrackKey = (u32, u64);

pub struct LifetimeTracker {
    enabled: bool,
    tracks: BTreeMap<TrackKey, RequestTrack>,
}

impl LifetimeTracker {
    pub fn new(enabled: bool) -> Self {
        LifetimeTracker {
            enabled,
            tracks: BTreeMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn open_count(&self) -> usize {
        self.tracks.len()
    }

    fn find(&self, device: u32, sector: u64) -> Option<&RequestTrack> {
        self.tracks.get(&(device, sector))
    }

    fn find_or_create(&mut self, pid: u32, device: u32, sector: u64) -> &mut RequestTrack {
        self.tracks
            .entry((device, sector))
            .or_insert_with(|| RequestTrack::new(pid, device, sector))
    }

    /// `GetRQ`: a request has been allocated. Creates the track if it's the
    /// first event seen for this (device, sector).
    pub fn get_rq(&mut self, pid: u32, device: u32, sector: u64, time: u64) {
        if !self.enabled {
            return;
        }
        self.find_or_create(pid, device, sector).allocation_time = Some(time);
    }

    /// `Insert`: queued onto the request queue. Returns the allocation ->
    /// queue elapsed time.
    pub fn insert(&mut self, pid: u32, device: u32, sector: u64, time: u64) -> Elapsed {
        if !self.enabled {
            return Elapsed::Unknown;
        }
        let track = self.find_or_create(pid, device, sector);
        let elapsed = Elapsed::from_times(Some(time), track.allocation_time);
        track.queue_time = Some(time);
        elapsed
    }

    /// `Issue`: dispatched to the device. Only meaningful for FS-category
    /// traffic (PC/SCSI traffic has its own lifecycle); returns the queue
    /// -> dispatch elapsed time, or `Unknown` with an orphan diagnostic if
    /// no matching queued request is on record.
    pub fn issue(
        &mut self,
        category: Category,
        device: u32,
        sector: u64,
        time: u64,
    ) -> (Elapsed, Option<Diagnostic>) {
        if !self.enabled || !category.contains(Category::FS) {
            return (Elapsed::Unknown, None);
        }
        let Some(track) = self.tracks.get_mut(&(device, sector)) else {
            return (
                Elapsed::Unknown,
                Some(Diagnostic::OrphanEvent { device, sector, action: "issue" }),
            );
        };
        let elapsed = Elapsed::from_times(Some(time), track.queue_time);
        track.dispatch_time = Some(time);
        (elapsed, None)
    }

    /// `Complete`: the device finished the request. FS-gated like `issue`.
    /// Removes the track afterward — nothing past completion is tracked.
    pub fn complete(
        &mut self,
        category: Category,
        device: u32,
        sector: u64,
        time: u64,
    ) -> (Elapsed, Option<Diagnostic>) {
        if !self.enabled || !category.contains(Category::FS) {
            return (Elapsed::Unknown, None);
        }
        let Some(track) = self.tracks.get_mut(&(device, sector)) else {
            return (
                Elapsed::Unknown,
                Some(Diagnostic::OrphanEvent { device, sector, action: "complete" }),
            );
        };
        let elapsed = Elapsed::from_times(Some(time), track.dispatch_time);
        track.completion_time = Some(time);
        self.tracks.remove(&(device, sector));
        (elapsed, None)
    }

    /// `FrontMerge`: the merged-in request's starting sector moves earlier
    /// by `bytes >> 9` sectors; re-key the existing track to follow it.
    /// `sector`/`bytes` are the *merging* request's own fields, so the
    /// track being re-keyed currently lives at `sector + (bytes >> 9)`.
    pub fn front_merge(&mut self, device: u32, sector: u64, bytes: u32) -> Option<Diagnostic> {
        if !self.enabled {
            return None;
        }
        let old_sector = sector + (bytes as u64 >> 9);
        match self.tracks.remove(&(device, old_sector)) {
            Some(mut track) => {
                track.sector = sector;
                self.tracks.insert((device, sector), track);
                None
            }
            None => Some(Diagnostic::OrphanEvent { device, sector: old_sector, action: "front merge" }),
        }
    }
}
