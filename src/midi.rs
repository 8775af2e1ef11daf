//! Raw MIDI sample types
//!
//! Hardware messages are kept as raw byte triples; the engine never decodes them
//! beyond what is needed to correlate samples of the same physical control.

use std::fmt;

/// Status byte of the MIDI timing clock, a common source of chatter
pub const TIMING_CLOCK: u8 = 0xF8;

/// Status byte of MIDI active sensing
pub const ACTIVE_SENSING: u8 = 0xFE;

/// One hardware message: `(status, data1, data2)`
///
/// Single-byte realtime messages carry no data bytes, two-byte messages
/// (program change, channel pressure) carry no `data2`. Anything past the third
/// byte (SysEx payloads) is not retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    pub status: u8,
    pub data1: Option<u8>,
    pub data2: Option<u8>,
}

impl RawSample {
    pub fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self {
            status,
            data1: Some(data1),
            data2: Some(data2),
        }
    }

    /// Build a sample from the bytes delivered by the driver
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;
        Some(Self {
            status,
            data1: rest.first().copied(),
            data2: rest.get(1).copied(),
        })
    }

    /// Identity of the physical control this sample came from
    pub fn control_key(&self) -> ControlKey {
        ControlKey {
            status: self.status,
            data1: self.data1,
        }
    }

    pub fn kind(&self) -> StatusKind {
        StatusKind::of(self.status)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        [Some(self.status), self.data1, self.data2]
            .into_iter()
            .flatten()
            .collect()
    }
}

impl fmt::Display for RawSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if let Some(d1) = self.data1 {
            write!(f, ",{}", d1)?;
        }
        if let Some(d2) = self.data2 {
            write!(f, ",{}", d2)?;
        }
        Ok(())
    }
}

/// Derived identity `"status-data1"` correlating samples of one control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlKey {
    pub status: u8,
    pub data1: Option<u8>,
}

impl ControlKey {
    pub fn new(status: u8, data1: u8) -> Self {
        Self {
            status,
            data1: Some(data1),
        }
    }
}

impl fmt::Display for ControlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data1 {
            Some(d1) => write!(f, "{}-{}", self.status, d1),
            None => write!(f, "{}", self.status),
        }
    }
}

/// Coarse message class of a status byte, used for diagnostics only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    NoteOff { channel: u8 },
    NoteOn { channel: u8 },
    PolyPressure { channel: u8 },
    ControlChange { channel: u8 },
    ProgramChange { channel: u8 },
    ChannelPressure { channel: u8 },
    PitchBend { channel: u8 },
    SysEx,
    SystemCommon,
    TimingClock,
    Transport,
    ActiveSensing,
    SystemReset,
    /// Data byte in status position (running status)
    Data,
}

impl StatusKind {
    pub fn of(status: u8) -> Self {
        if status < 0x80 {
            return StatusKind::Data;
        }

        let channel = status & 0x0F;
        match status & 0xF0 {
            0x80 => StatusKind::NoteOff { channel },
            0x90 => StatusKind::NoteOn { channel },
            0xA0 => StatusKind::PolyPressure { channel },
            0xB0 => StatusKind::ControlChange { channel },
            0xC0 => StatusKind::ProgramChange { channel },
            0xD0 => StatusKind::ChannelPressure { channel },
            0xE0 => StatusKind::PitchBend { channel },
            _ => match status {
                0xF0 | 0xF7 => StatusKind::SysEx,
                TIMING_CLOCK => StatusKind::TimingClock,
                0xFA..=0xFC => StatusKind::Transport,
                ACTIVE_SENSING => StatusKind::ActiveSensing,
                0xFF => StatusKind::SystemReset,
                _ => StatusKind::SystemCommon,
            },
        }
    }

    /// Check if this is a channel voice message
    pub fn is_channel_message(&self) -> bool {
        matches!(
            self,
            StatusKind::NoteOff { .. }
                | StatusKind::NoteOn { .. }
                | StatusKind::PolyPressure { .. }
                | StatusKind::ControlChange { .. }
                | StatusKind::ProgramChange { .. }
                | StatusKind::ChannelPressure { .. }
                | StatusKind::PitchBend { .. }
        )
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            StatusKind::NoteOff { channel } => write!(f, "NoteOff ch:{}", channel + 1),
            StatusKind::NoteOn { channel } => write!(f, "NoteOn ch:{}", channel + 1),
            StatusKind::PolyPressure { channel } => write!(f, "PolyPressure ch:{}", channel + 1),
            StatusKind::ControlChange { channel } => write!(f, "CC ch:{}", channel + 1),
            StatusKind::ProgramChange { channel } => write!(f, "ProgramChange ch:{}", channel + 1),
            StatusKind::ChannelPressure { channel } => {
                write!(f, "ChannelPressure ch:{}", channel + 1)
            }
            StatusKind::PitchBend { channel } => write!(f, "PitchBend ch:{}", channel + 1),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
