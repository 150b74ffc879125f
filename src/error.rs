//! Typed errors and non-fatal diagnostics.
//!
//! The original tool reports most irregularities (sequence gaps, orphaned
//! merge/complete events) to stderr and keeps going; only a handful of
//! conditions are fatal. We keep that split: `AnalyzerError` is for things
//! that stop the run, `Diagnostic` is for things that get logged and
//! counted but don't.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("malformed trace record{}{}: {detail}",
        .cpu.map(|c| format!(" (cpu {c})")).unwrap_or_default(),
        .device.map(|d| format!(" (device {},{})", d >> crate::record::MINOR_BITS, d & crate::record::MINOR_MASK)).unwrap_or_default())]
    MalformedInput {
        detail: String,
        cpu: Option<u32>,
        device: Option<u32>,
    },

    #[error("no trace files found for input {0:?}")]
    NoInputFound(String),

    #[error("exhausted resources tracking device {device}: {detail}")]
    ResourceExhaustion { device: u32, detail: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A non-fatal irregularity surfaced during merge or tracking: logged via
/// `log::warn!` as it's produced and also accumulated so a run summary can
/// report how many of each kind occurred.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    /// A per-device sequence number skipped ahead of the expected next
    /// value. `from`/`to` are the last-seen and newly-seen sequence numbers.
    SequenceGap { device: u32, from: u32, to: u32 },
    /// Two records shared an identical (time, device, sequence) key; the
    /// second was dropped rather than silently overwriting the first.
    SequenceAlias { device: u32, sequence: u32 },
    /// A lifecycle event (front-merge, issue, complete, ...) referenced a
    /// (device, sector) pair the tracker has no open request for.
    OrphanEvent { device: u32, sector: u64, action: &'static str },
    /// A device's emitted time regressed relative to the last record
    /// emitted for it.
    TimeWentBackwards { device: u32, from: u64, to: u64 },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::SequenceGap { device, from, to } => write!(
                f,
                "skipping from {} to {} on device {},{}",
                from,
                to,
                device >> crate::record::MINOR_BITS,
                device & crate::record::MINOR_MASK
            ),
            Diagnostic::SequenceAlias { device, sequence } => write!(
                f,
                "sequence alias ({}) on device {},{}",
                sequence,
                device >> crate::record::MINOR_BITS,
                device & crate::record::MINOR_MASK
            ),
            Diagnostic::OrphanEvent { device, sector, action } => write!(
                f,
                "{} event for device {},{} sector {} has no matching request",
                action,
                device >> crate::record::MINOR_BITS,
                device & crate::record::MINOR_MASK,
                sector
            ),
            Diagnostic::TimeWentBackwards { device, from, to } => write!(
                f,
                "time went backwards on device {},{} ({} -> {})",
                device >> crate::record::MINOR_BITS,
                device & crate::record::MINOR_MASK,
                from,
                to
            ),
        }
    }
}
