//! Per-CPU, per-device, and per-process throughput counters, mirroring
//! `struct io_stats` and the `account_*`/`find_process_io_stats` family.
//! Counters are strictly additive except Requeue, which re-credits
//! completed-byte counters (the one non-monotone update, §4.5).

use std::collections::BTreeMap;

use serde::Serialize;

/// One set of queue/merge/issue/complete/unplug counters. Byte counts are
/// tracked in 1-KiB units (`bytes >> 10`), matching the original's display
/// units; kept as `i64` rather than `u64` since Requeue can legitimately
/// push a completed-byte counter back down.
#[derive(Clone, Debug, Default, Serialize)]
pub struct IoStats {
    pub qreads: u64,
    pub qwrites: u64,
    pub creads: u64,
    pub cwrites: u64,
    pub mreads: u64,
    pub mwrites: u64,
    pub ireads: u64,
    pub iwrites: u64,
    pub qread_kb: i64,
    pub qwrite_kb: i64,
    pub cread_kb: i64,
    pub cwrite_kb: i64,
    pub iread_kb: i64,
    pub iwrite_kb: i64,
    pub io_unplugs: u64,
    pub timer_unplugs: u64,
}

impl IoStats {
    pub fn account_queue(&mut self, is_write: bool, bytes: u32) {
        if is_write {
            self.qwrites += 1;
            self.qwrite_kb += (bytes >> 10) as i64;
        } else {
            self.qreads += 1;
            self.qread_kb += (bytes >> 10) as i64;
        }
    }

    pub fn account_merge(&mut self, is_write: bool, bytes: u32) {
        if is_write {
            self.mwrites += 1;
            self.qwrite_kb += (bytes >> 10) as i64;
        } else {
            self.mreads += 1;
            self.qread_kb += (bytes >> 10) as i64;
        }
    }

    pub fn account_issue(&mut self, is_write: bool, bytes: u32) {
        if is_write {
            self.iwrites += 1;
            self.iwrite_kb += (bytes >> 10) as i64;
        } else {
            self.ireads += 1;
            self.iread_kb += (bytes >> 10) as i64;
        }
    }

    /// `bytes` is signed: Complete passes the request's own size, Requeue
    /// passes its negation to re-credit what Complete will never now add.
    pub fn account_complete(&mut self, is_write: bool, signed_bytes: i64) {
        if is_write {
            self.cwrites += 1;
            self.cwrite_kb += signed_bytes >> 10;
        } else {
            self.creads += 1;
            self.cread_kb += signed_bytes >> 10;
        }
    }

    /// Requeue only re-credits bytes; it is not itself a completion event,
    /// so unlike `account_complete` it does not bump the c{reads,writes}
    /// counters.
    pub fn account_requeue(&mut self, is_write: bool, bytes: u32) {
        if is_write {
            self.cwrite_kb -= (bytes >> 10) as i64;
        } else {
            self.cread_kb -= (bytes >> 10) as i64;
        }
    }

    pub fn account_unplug(&mut self, timer: bool) {
        if timer {
            self.timer_unplugs += 1;
        } else {
            self.io_unplugs += 1;
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DeviceStats {
    pub io_stats: IoStats,
    pub events: u64,
    pub skips: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ProcessStats {
    pub pid: u32,
    pub comm: String,
    pub io_stats: IoStats,
    /// Indexed `[read, write]`, longest observed allocation->queue wait.
    pub longest_allocation_wait: [u64; 2],
    /// Indexed `[read, write]`, longest observed queue->dispatch wait.
    pub longest_dispatch_wait: [u64; 2],
    /// Indexed `[read, write]`, longest observed dispatch->complete wait.
    pub longest_completion_wait: [u64; 2],
}

#[derive(Default)]
pub struct AccountingLayer {
    per_cpu: BTreeMap<(u32, u32), IoStats>,
    per_device: BTreeMap<u32, DeviceStats>,
    per_process: BTreeMap<u32, ProcessStats>,
    track_per_process: bool,
}

impl AccountingLayer {
    pub fn new(track_per_process: bool) -> Self {
        AccountingLayer {
            track_per_process,
            ..Default::default()
        }
    }

    fn cpu_stats(&mut self, device: u32, cpu: u32) -> &mut IoStats {
        self.per_cpu.entry((device, cpu)).or_default()
    }

    fn device_stats(&mut self, device: u32) -> &mut DeviceStats {
        self.per_device.entry(device).or_default()
    }

    fn process_stats(&mut self, pid: u32, comm: &str) -> Option<&mut ProcessStats> {
        if !self.track_per_process {
            return None;
        }
        let entry = self.per_process.entry(pid).or_insert_with(|| ProcessStats {
            pid,
            comm: comm.to_string(),
            ..Default::default()
        });
        Some(entry)
    }

    pub fn record_event(&mut self, device: u32) {
        self.device_stats(device).events += 1;
    }

    pub fn record_skip(&mut self, device: u32) {
        self.device_stats(device).skips += 1;
    }

    pub fn account_queue(&mut self, device: u32, cpu: u32, pid: u32, comm: &str, is_write: bool, bytes: u32) {
        self.cpu_stats(device, cpu).account_queue(is_write, bytes);
        self.device_stats(device).io_stats.account_queue(is_write, bytes);
        if let Some(p) = self.process_stats(pid, comm) {
            p.io_stats.account_queue(is_write, bytes);
        }
    }

    pub fn account_merge(&mut self, device: u32, cpu: u32, pid: u32, comm: &str, is_write: bool, bytes: u32) {
        self.cpu_stats(device, cpu).account_merge(is_write, bytes);
        self.device_stats(device).io_stats.account_merge(is_write, bytes);
        if let Some(p) = self.process_stats(pid, comm) {
            p.io_stats.account_merge(is_write, bytes);
        }
    }

    pub fn account_issue(&mut self, device: u32, cpu: u32, pid: u32, comm: &str, is_write: bool, bytes: u32) {
        self.cpu_stats(device, cpu).account_issue(is_write, bytes);
        self.device_stats(device).io_stats.account_issue(is_write, bytes);
        if let Some(p) = self.process_stats(pid, comm) {
            p.io_stats.account_issue(is_write, bytes);
        }
    }

    pub fn account_complete(&mut self, device: u32, cpu: u32, pid: u32, comm: &str, is_write: bool, bytes: u32) {
        self.cpu_stats(device, cpu).account_complete(is_write, bytes as i64);
        self.device_stats(device).io_stats.account_complete(is_write, bytes as i64);
        if let Some(p) = self.process_stats(pid, comm) {
            p.io_stats.account_complete(is_write, bytes as i64);
        }
    }

    pub fn account_requeue(&mut self, device: u32, cpu: u32, pid: u32, comm: &str, is_write: bool, bytes: u32) {
        self.cpu_stats(device, cpu).account_requeue(is_write, bytes);
        self.device_stats(device).io_stats.account_requeue(is_write, bytes);
        if let Some(p) = self.process_stats(pid, comm) {
            p.io_stats.account_requeue(is_write, bytes);
        }
    }

    pub fn account_unplug(&mut self, device: u32, cpu: u32, timer: bool) {
        self.cpu_stats(device, cpu).account_unplug(timer);
        self.device_stats(device).io_stats.account_unplug(timer);
    }

    /// Update the appropriate longest-wait bucket for `pid` if `elapsed`
    /// beats what's on record. A no-op if per-process tracking is off or
    /// the process hasn't been seen through an accounting call yet.
    pub fn note_allocation_wait(&mut self, pid: u32, is_write: bool, elapsed: u64) {
        if let Some(p) = self.per_process.get_mut(&pid) {
            let slot = &mut p.longest_allocation_wait[is_write as usize];
            *slot = (*slot).max(elapsed);
        }
    }

    pub fn note_dispatch_wait(&mut self, pid: u32, is_write: bool, elapsed: u64) {
        if let Some(p) = self.per_process.get_mut(&pid) {
            let slot = &mut p.longest_dispatch_wait[is_write as usize];
            *slot = (*slot).max(elapsed);
        }
    }

    pub fn note_completion_wait(&mut self, pid: u32, is_write: bool, elapsed: u64) {
        if let Some(p) = self.per_process.get_mut(&pid) {
            let slot = &mut p.longest_completion_wait[is_write as usize];
            *slot = (*slot).max(elapsed);
        }
    }

    pub fn per_device(&self) -> &BTreeMap<u32, DeviceStats> {
        &self.per_device
    }

    pub fn per_cpu(&self) -> &BTreeMap<(u32, u32), IoStats> {
        &self.per_cpu
    }

    /// Process list in the original's display order: natural (version)
    /// sort of the comm string, PID as a tiebreaker (`ppi_name_compare`'s
    /// `strverscmp` plus PID fallback).
    pub fn processes_sorted(&self) -> Vec<&ProcessStats> {
        let mut procs: Vec<&ProcessStats> = self.per_process.values().collect();
        procs.sort_by(|a, b| natural_compare(&a.comm, &b.comm).then_with(|| a.pid.cmp(&b.pid)));
        procs
    }
}

/// A small natural-order ("version") string comparator: runs of digits
/// compare numerically, everything else compares byte-for-byte. Close
/// enough to glibc's `strverscmp` for process-name sorting purposes.
fn natural_compare(a: &str, b: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let (mut a, mut b) = (a.as_bytes(), b.as_bytes());
    loop {
        match (a.first(), b.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(&ca), Some(&cb)) => {
                if ca.is_ascii_digit() && cb.is_ascii_digit() {
                    let a_run_end = a.iter().position(|c| !c.is_ascii_digit()).unwrap_or(a.len());
                    let b_run_end = b.iter().position(|c| !c.is_ascii_digit()).unwrap_or(b.len());
                    let a_num = std::str::from_utf8(&a[..a_run_end]).unwrap();
                    let b_num = std::str::from_utf8(&b[..b_run_end]).unwrap();
                    let a_value: u128 = a_num.parse().unwrap_or(0);
                    let b_value: u128 = b_num.parse().unwrap_or(0);
                    match a_value.cmp(&b_value) {
                        Ordering::Equal => {
                            match a_run_end.cmp(&b_run_end) {
                                Ordering::Equal => {
                                    a = &a[a_run_end..];
                                    b = &b[b_run_end..];
                                }
                                other => return other,
                            }
                        }
                        other => return other,
                    }
                } else if ca != cb {
                    return ca.cmp(&cb);
                } else {
                    a = &a[1..];
                    b = &b[1..];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_updates_cpu_device_and_process() {
        let mut acct = AccountingLayer::new(true);
        acct.account_queue(0x0800, 0, 42, "fio", true, 4096);

        let device = &acct.per_device().get(&0x0800).unwrap().io_stats;
        assert_eq!(device.qwrites, 1);
        assert_eq!(device.qwrite_kb, 4);

        let cpu = &acct.per_cpu().get(&(0x0800, 0)).unwrap();
        assert_eq!(cpu.qwrites, 1);

        let procs = acct.processes_sorted();
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].io_stats.qwrites, 1);
    }

    #[test]
    fn requeue_decrements_completed_bytes_only() {
        let mut acct = AccountingLayer::new(false);
        acct.account_complete(0x0800, 0, 1, "x", false, 4096);
        assert_eq!(acct.per_device()[&0x0800].io_stats.cread_kb, 4);
        assert_eq!(acct.per_device()[&0x0800].io_stats.creads, 1);

        acct.account_requeue(0x0800, 0, 1, "x", false, 4096);
        assert_eq!(acct.per_device()[&0x0800].io_stats.cread_kb, 0);
        // Requeue is not itself a completion; the read count is untouched.
        assert_eq!(acct.per_device()[&0x0800].io_stats.creads, 1);
    }

    #[test]
    fn longest_wait_tracks_the_max_per_direction() {
        let mut acct = AccountingLayer::new(true);
        acct.account_queue(0x0800, 0, 7, "db", false, 4096);
        acct.note_allocation_wait(7, false, 10);
        acct.note_allocation_wait(7, false, 50);
        acct.note_allocation_wait(7, false, 20);
        acct.note_allocation_wait(7, true, 99);

        let procs = acct.processes_sorted();
        assert_eq!(procs[0].longest_allocation_wait, [50, 99]);
    }

    #[test]
    fn natural_compare_orders_digit_runs_numerically() {
        assert_eq!(natural_compare("proc2", "proc10"), std::cmp::Ordering::Less);
        assert_eq!(natural_compare("proc10", "proc2"), std::cmp::Ordering::Greater);
        assert_eq!(natural_compare("proc", "proc"), std::cmp::Ordering::Equal);
    }

    #[test]
    fn per_process_tracking_can_be_disabled() {
        let mut acct = AccountingLayer::new(false);
        acct.account_queue(0x0800, 0, 1, "x", false, 4096);
        assert!(acct.processes_sorted().is_empty());
    }
}
