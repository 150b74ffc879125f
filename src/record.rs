//! The 48-byte fixed trace record header plus its variable-length payload,
//! and the endian detection/normalization that turns wire bytes into this
//! shape. See `original_source/blktrace.h` for the C layout this mirrors.

use std::convert::TryFrom;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, LittleEndian, NativeEndian, ReadBytesExt};
use bitflags::bitflags;

use crate::error::AnalyzerError;

/// High 24 bits of `magic`; low 8 bits carry the format version.
pub const MAGIC_CONSTANT: u32 = 0x6561_7400;
pub const MAGIC_MASK: u32 = 0xffff_ff00;
pub const SUPPORTED_VERSION: u8 = 0x07;

pub const HEADER_LEN: usize = 48;
pub const COMM_LEN: usize = 16;
pub const TOTAL_HEADER_LEN: usize = HEADER_LEN + COMM_LEN;

bitflags! {
    /// High 16 bits of the `action` field.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Category: u32 {
        const READ     = 1 << 0;
        const WRITE    = 1 << 1;
        const BARRIER  = 1 << 2;
        const SYNC     = 1 << 3;
        const QUEUE    = 1 << 4;
        const REQUEUE  = 1 << 5;
        const ISSUE    = 1 << 6;
        const COMPLETE = 1 << 7;
        const FS       = 1 << 8;
        const PC       = 1 << 9;
        const NOTIFY   = 1 << 10;
        const AHEAD    = 1 << 11;
        const META     = 1 << 12;
        const DISCARD  = 1 << 13;
        const DRVDATA  = 1 << 14;
        const FUA      = 1 << 15;
    }
}

/// Low 16 bits of the `action` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionCode {
    Queue = 0,
    BackMerge = 1,
    FrontMerge = 2,
    GetRQ = 3,
    SleepRQ = 4,
    Requeue = 5,
    Issue = 6,
    Complete = 7,
    Plug = 8,
    UnplugIO = 9,
    UnplugTimer = 10,
    Insert = 11,
    Split = 12,
    Bounce = 13,
    Remap = 14,
    Abort = 15,
}

impl ActionCode {
    /// The single-character mnemonic used by the report emitter (§4.6).
    pub fn letter(self) -> &'static str {
        match self {
            ActionCode::Queue => "Q",
            ActionCode::BackMerge => "M",
            ActionCode::FrontMerge => "F",
            ActionCode::GetRQ => "G",
            ActionCode::SleepRQ => "S",
            ActionCode::Requeue => "R",
            ActionCode::Issue => "D",
            ActionCode::Complete => "C",
            ActionCode::Plug => "P",
            ActionCode::UnplugIO => "U",
            ActionCode::UnplugTimer => "T",
            ActionCode::Insert => "I",
            ActionCode::Split => "X",
            ActionCode::Bounce => "B",
            ActionCode::Remap => "A",
            ActionCode::Abort => "Z",
        }
    }
}

impl TryFrom<u16> for ActionCode {
    type Error = u16;

    fn try_from(code: u16) -> Result<Self, u16> {
        Ok(match code {
            0 => ActionCode::Queue,
            1 => ActionCode::BackMerge,
            2 => ActionCode::FrontMerge,
            3 => ActionCode::GetRQ,
            4 => ActionCode::SleepRQ,
            5 => ActionCode::Requeue,
            6 => ActionCode::Issue,
            7 => ActionCode::Complete,
            8 => ActionCode::Plug,
            9 => ActionCode::UnplugIO,
            10 => ActionCode::UnplugTimer,
            11 => ActionCode::Insert,
            12 => ActionCode::Split,
            13 => ActionCode::Bounce,
            14 => ActionCode::Remap,
            15 => ActionCode::Abort,
            other => return Err(other),
        })
    }
}

/// device field layout: major in the high 12 bits, minor in the low 20.
pub const MINOR_BITS: u32 = 20;
pub const MINOR_MASK: u32 = (1 << MINOR_BITS) - 1;

pub fn major(device: u32) -> u32 {
    device >> MINOR_BITS
}

pub fn minor(device: u32) -> u32 {
    device & MINOR_MASK
}

/// A fully decoded, host-endian trace record plus its payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceRecord {
    pub sequence: u32,
    pub time: u64,
    pub sector: u64,
    pub bytes: u32,
    pub action: u32,
    pub pid: u32,
    pub device: u32,
    pub cpu: u32,
    pub error: u16,
    pub comm: [u8; 16],
    pub payload: Vec<u8>,
}

impl TraceRecord {
    pub fn category(&self) -> Category {
        Category::from_bits_truncate(self.action >> 16)
    }

    pub fn action_code(&self) -> Option<ActionCode> {
        ActionCode::try_from((self.action & 0xffff) as u16).ok()
    }

    pub fn is_write(&self) -> bool {
        self.category().contains(Category::WRITE)
    }

    pub fn comm_str(&self) -> std::borrow::Cow<'_, str> {
        let end = self.comm.iter().position(|&b| b == 0).unwrap_or(self.comm.len());
        String::from_utf8_lossy(&self.comm[..end])
    }
}

/// Per-stream endianness, detected once from the first record's magic and
/// sticky thereafter (§4.2, §9: "prefer treating the byte order as
/// per-stream state, not a global").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Native,
    Reversed,
}

/// Decodes fixed-header + payload records from a byte buffer, remembering
/// the endianness decided for the stream it belongs to (one instance per
/// per-CPU file, or one shared instance for a pipe stream).
pub struct RecordDecoder {
    endian: Option<Endian>,
}

impl RecordDecoder {
    pub fn new() -> Self {
        RecordDecoder { endian: None }
    }

    /// Decode one header+payload record from the front of `buf`. Returns
    /// `Incomplete` rather than an error when `buf` simply doesn't hold a
    /// full record yet — callers reading a live stream top up and retry;
    /// callers with a fully-buffered file treat it as truncation.
    pub fn decode(&mut self, buf: &[u8], cpu: u32) -> Result<DecodeOutcome, AnalyzerError> {
        if buf.len() < TOTAL_HEADER_LEN {
            return Ok(DecodeOutcome::Incomplete(TOTAL_HEADER_LEN - buf.len()));
        }

        let raw_magic = u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let endian = match self.endian {
            Some(e) => e,
            None => {
                let detected = detect_endian(raw_magic).ok_or_else(|| AnalyzerError::MalformedInput {
                    detail: format!("bad magic {:#010x}", raw_magic),
                    cpu: Some(cpu),
                    device: None,
                })?;
                self.endian = Some(detected);
                detected
            }
        };

        let mut cursor = Cursor::new(buf);
        let magic = read_u32(&mut cursor, endian)?;
        if magic & MAGIC_MASK != MAGIC_CONSTANT {
            return Err(AnalyzerError::MalformedInput {
                detail: format!("bad magic {:#010x}", magic),
                cpu: Some(cpu),
                device: None,
            });
        }
        let version = (magic & 0xff) as u8;
        if version != SUPPORTED_VERSION {
            return Err(AnalyzerError::MalformedInput {
                detail: format!("unsupported version {:#04x}", version),
                cpu: Some(cpu),
                device: None,
            });
        }

        let sequence = read_u32(&mut cursor, endian)?;
        let time = read_u64(&mut cursor, endian)?;
        let sector = read_u64(&mut cursor, endian)?;
        let bytes = read_u32(&mut cursor, endian)?;
        let action = read_u32(&mut cursor, endian)?;
        let pid = read_u32(&mut cursor, endian)?;
        let device = read_u32(&mut cursor, endian)?;
        let cpu_field = read_u32(&mut cursor, endian)?;
        let error = read_u16(&mut cursor, endian)?;
        let pdu_len = read_u16(&mut cursor, endian)?;
        let mut comm = [0u8; 16];
        cursor.read_exact(&mut comm).map_err(AnalyzerError::Io)?;

        let pdu_len = pdu_len as usize;
        if buf.len() < TOTAL_HEADER_LEN + pdu_len {
            return Ok(DecodeOutcome::Incomplete(TOTAL_HEADER_LEN + pdu_len - buf.len()));
        }
        let payload = buf[TOTAL_HEADER_LEN..TOTAL_HEADER_LEN + pdu_len].to_vec();

        Ok(DecodeOutcome::Complete(
            TraceRecord {
                sequence,
                time,
                sector,
                bytes,
                action,
                pid,
                device,
                cpu: cpu_field,
                error,
                comm,
                payload,
            },
            TOTAL_HEADER_LEN + pdu_len,
        ))
    }

    /// Like `decode`, but treats `Incomplete` as a genuine error — for
    /// fully-buffered sources (a file read to EOF) there's no more data
    /// coming, so a record that doesn't fit in what's left is truncation.
    pub fn decode_complete(&mut self, buf: &[u8], cpu: u32) -> Result<(TraceRecord, usize), AnalyzerError> {
        match self.decode(buf, cpu)? {
            DecodeOutcome::Complete(record, consumed) => Ok((record, consumed)),
            DecodeOutcome::Incomplete(need) => Err(AnalyzerError::MalformedInput {
                detail: format!("truncated record, {} more byte(s) needed", need),
                cpu: Some(cpu),
                device: None,
            }),
        }
    }
}

/// Result of attempting to decode one record from a byte buffer.
#[derive(Debug)]
pub enum DecodeOutcome {
    Complete(TraceRecord, usize),
    Incomplete(usize),
}

fn detect_endian(raw_magic_native: u32) -> Option<Endian> {
    if raw_magic_native & MAGIC_MASK == MAGIC_CONSTANT {
        Some(Endian::Native)
    } else if raw_magic_native.swap_bytes() & MAGIC_MASK == MAGIC_CONSTANT {
        Some(Endian::Reversed)
    } else {
        None
    }
}

fn read_u16(cursor: &mut Cursor<&[u8]>, endian: Endian) -> Result<u16, AnalyzerError> {
    match endian {
        Endian::Native => cursor.read_u16::<NativeEndian>(),
        Endian::Reversed => {
            if cfg!(target_endian = "little") {
                cursor.read_u16::<BigEndian>()
            } else {
                cursor.read_u16::<LittleEndian>()
            }
        }
    }
    .map_err(AnalyzerError::Io)
}

fn read_u32(cursor: &mut Cursor<&[u8]>, endian: Endian) -> Result<u32, AnalyzerError> {
    match endian {
        Endian::Native => cursor.read_u32::<NativeEndian>(),
        Endian::Reversed => {
            if cfg!(target_endian = "little") {
                cursor.read_u32::<BigEndian>()
            } else {
                cursor.read_u32::<LittleEndian>()
            }
        }
    }
    .map_err(AnalyzerError::Io)
}

fn read_u64(cursor: &mut Cursor<&[u8]>, endian: Endian) -> Result<u64, AnalyzerError> {
    match endian {
        Endian::Native => cursor.read_u64::<NativeEndian>(),
        Endian::Reversed => {
            if cfg!(target_endian = "little") {
                cursor.read_u64::<BigEndian>()
            } else {
                cursor.read_u64::<LittleEndian>()
            }
        }
    }
    .map_err(AnalyzerError::Io)
}
