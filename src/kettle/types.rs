//! AppKettle protocol types and constants.

use std::fmt;

use super::codec::{Field, FieldType};
use crate::error::AppError;

// Envelope constants
pub const ENCRYPT_HEADER: [u8; 4] = *b"##80";
pub const PLAIN_HEADER: [u8; 4] = *b"##00";
pub const START_MARKER: [u8; 2] = *b"##";
pub const TERMINATOR: [u8; 2] = *b"&&";
pub const MSG_KEEP_CONNECT: &[u8] = b"##000bKeepConnect&&";
pub const KEEP_CONNECT_TEXT: &str = "KeepConnect";

// AES secrets baked into the kettle firmware
pub const DEFAULT_KEY: &[u8; 16] = b"ay3$&dw*ndAD!9)<";
pub const DEFAULT_IV: &[u8; 16] = b"7e3*WwI(@Dczxcue";
pub const BLOCK_SIZE: usize = 16;

// Frame geometry
pub const HEADER_SIZE: usize = 15;
/// Bytes preceding the counted region: head + 2-byte length.
pub const LENGTH_PREFIX: usize = 3;
/// Smallest `length` that carries an ack byte.
pub const MIN_LEN_WITH_ACK: u16 = 14;
/// Smallest `length` that carries a command payload.
pub const MIN_LEN_WITH_PAYLOAD: u16 = 16;

pub const ACK_OK: u8 = 0xC8;

// Command codes
pub const CMD_STATUS: u8 = 0x36;
pub const CMD_ON: u8 = 0x39;
pub const CMD_OFF: u8 = 0x3A;
pub const CMD_WAKE: u8 = 0x41;
pub const CMD_TIMER1: u8 = 0x43;
pub const CMD_TIMER2: u8 = 0x44;
pub const CMD_INIT: u8 = 0xA4;

/// Layout of the 15-byte message header.
pub const HEADER_LAYOUT: &[Field] = &[
    Field::new("head", FieldType::U8),
    Field::new("length", FieldType::U16),
    Field::new("b03", FieldType::U8),
    Field::new("pad", FieldType::Skip(5)),
    Field::new("b090a", FieldType::U16),
    Field::new("seq", FieldType::U8),
    Field::new("cmd", FieldType::U8),
    Field::new("pad", FieldType::Skip(2)),
];

/// STAT payload: heartbeat sent by the kettle about once a second.
pub const STATUS_LAYOUT: &[Field] = &[
    Field::new("pad", FieldType::Skip(1)),
    Field::new("status", FieldType::U8),
    Field::new("keep_warm_secs", FieldType::U16),
    Field::new("temperature", FieldType::U8),
    Field::new("target_temp", FieldType::U8),
    Field::new("volume", FieldType::U16),
    Field::new("pad", FieldType::Skip(2)),
];

/// K_ON payload.
pub const ON_LAYOUT: &[Field] = &[
    Field::new("target_temp", FieldType::U8),
    Field::new("keep_warm_mins", FieldType::U8),
    Field::new("pad", FieldType::Skip(2)),
];

/// How a command's payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLayout {
    /// Command never carries a payload.
    None,
    /// Fixed binary layout.
    Fields(&'static [Field]),
    /// Payload not understood yet; kept as raw bytes.
    Opaque,
}

/// Command byte at offset 0x0C of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Status,
    On,
    Off,
    Wake,
    Timer1,
    Timer2,
    Init,
    Unknown(u8),
}

impl Command {
    /// Look up a command code. Unlisted codes map to `Unknown`.
    pub fn from_code(code: u8) -> Self {
        match code {
            CMD_STATUS => Self::Status,
            CMD_ON => Self::On,
            CMD_OFF => Self::Off,
            CMD_WAKE => Self::Wake,
            CMD_TIMER1 => Self::Timer1,
            CMD_TIMER2 => Self::Timer2,
            CMD_INIT => Self::Init,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Status => CMD_STATUS,
            Self::On => CMD_ON,
            Self::Off => CMD_OFF,
            Self::Wake => CMD_WAKE,
            Self::Timer1 => CMD_TIMER1,
            Self::Timer2 => CMD_TIMER2,
            Self::Init => CMD_INIT,
            Self::Unknown(code) => code,
        }
    }

    /// Four letter tag used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Status => "STAT",
            Self::On => "K_ON",
            Self::Off => "KOFF",
            Self::Wake => "WAKE",
            Self::Timer1 => "TIM1",
            Self::Timer2 => "TIM2",
            Self::Init => "INIT",
            Self::Unknown(_) => "UNKN",
        }
    }

    pub fn layout(self) -> FrameLayout {
        match self {
            Self::Status => FrameLayout::Fields(STATUS_LAYOUT),
            Self::On => FrameLayout::Fields(ON_LAYOUT),
            Self::Off | Self::Wake | Self::Init => FrameLayout::None,
            // timer related, not explored further
            Self::Timer1 | Self::Timer2 | Self::Unknown(_) => FrameLayout::Opaque,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "UNKN({code:#04x})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Kettle state as reported in the STAT heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KettleStatus {
    NotOnBase,
    Unknown2,
    /// On the base, display off.
    Standby,
    Ready,
    Heating,
    KeepWarm,
}

impl KettleStatus {
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Only `Heating` counts as powered on.
    pub fn power(self) -> Power {
        match self {
            Self::Heating => Power::On,
            _ => Power::Off,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::NotOnBase => "Not on base",
            Self::Unknown2 => "TBD?",
            Self::Standby => "Standby",
            Self::Ready => "Ready",
            Self::Heating => "Heating",
            Self::KeepWarm => "Keep Warm",
        }
    }
}

impl TryFrom<u8> for KettleStatus {
    type Error = AppError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        match index {
            0 => Ok(Self::NotOnBase),
            1 => Ok(Self::Unknown2),
            2 => Ok(Self::Standby),
            3 => Ok(Self::Ready),
            4 => Ok(Self::Heating),
            5 => Ok(Self::KeepWarm),
            other => Err(AppError::InvalidStatus(other)),
        }
    }
}

impl fmt::Display for KettleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Power {
    On,
    #[default]
    Off,
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::On => "ON",
            Self::Off => "OFF",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CODES: [u8; 7] = [CMD_STATUS, CMD_ON, CMD_OFF, CMD_WAKE, CMD_TIMER1, CMD_TIMER2, CMD_INIT];

    #[test]
    fn test_known_codes_roundtrip() {
        for code in ALL_CODES {
            let command = Command::from_code(code);
            assert!(!matches!(command, Command::Unknown(_)));
            assert_eq!(command.code(), code);
        }
    }

    #[test]
    fn test_unknown_code_keeps_raw_byte() {
        let command = Command::from_code(0x99);
        assert_eq!(command, Command::Unknown(0x99));
        assert_eq!(command.name(), "UNKN");
        assert_eq!(command.code(), 0x99);
        assert_eq!(command.to_string(), "UNKN(0x99)");
    }

    #[test]
    fn test_only_heating_is_on() {
        for index in 0..=5u8 {
            let status = KettleStatus::try_from(index).unwrap();
            assert_eq!(status.index(), index);
            let expected = if index == 4 { Power::On } else { Power::Off };
            assert_eq!(status.power(), expected);
        }
        assert!(KettleStatus::try_from(6).is_err());
    }

    #[test]
    fn test_layout_widths() {
        use super::super::codec::layout_width;
        assert_eq!(layout_width(HEADER_LAYOUT), HEADER_SIZE);
        assert_eq!(layout_width(STATUS_LAYOUT), 10);
        assert_eq!(layout_width(ON_LAYOUT), 4);
    }
}
