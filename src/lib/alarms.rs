//! Decoder for the supply's system alarm string.
//!
//! The alarm string lists `BOARD<TAB>fault text` entries separated by `;`.
//! Each known board folds its faults into one bitmask, where bit `i` stands
//! for entry `i` of that board's vocabulary. Decoding never fails as a whole;
//! bad entries are collected next to the masks.

use log::warn;
use std::fmt::Display;
use thiserror::Error;

/// Header the Mercury iPS puts in front of a `READ:SYS:ALRM` reply.
const REPLY_HEADER: &str = "STAT:SYS:ALRM:";

const TEMPERATURE: &[&str] = &[
    "Open circuit",
    "Short circuit",
    "Calibration error",
    "Firmware error",
    "Board not configured",
];

const LEVEL: &[&str] = &[
    "Open circuit",
    "Short circuit",
    "ADC error",
    "Over demand",
    "Over temperature",
    "Firmware error",
    "Board not configured",
    "No reserve",
];

const PRESSURE: &[&str] = &[
    "Open circuit",
    "Short circuit",
    "Calibration error",
    "Firmware error",
    "Board not configured",
    "Over current",
    "Current leakage",
    "Power on fail",
    "Checksum fail",
    "Clock fail",
    "ADC fail",
    "Mains fail",
    "Reference fail",
    "12V fail",
    "-12V fail",
    "8V fail",
    "-8V fail",
    "Amp gain error",
    "Amp offset error",
    "ADC offset error",
    "ADC PGA error",
    "ADC XTAL error",
    "Excitation + error",
    "Excitation - error",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardCategory {
    Temperature,
    Level,
    Pressure,
}

impl BoardCategory {
    pub fn vocabulary(&self) -> &'static [&'static str] {
        match self {
            BoardCategory::Temperature => TEMPERATURE,
            BoardCategory::Level => LEVEL,
            BoardCategory::Pressure => PRESSURE,
        }
    }

    /// Bit index of `text`, compared case-insensitively against the whole entry.
    pub fn fault_bit(&self, text: &str) -> Option<u32> {
        self.vocabulary()
            .iter()
            .position(|fault| fault.eq_ignore_ascii_case(text))
            .map(|i| i as u32)
    }
}

impl Display for BoardCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoardCategory::Temperature => "temperature".fmt(f),
            BoardCategory::Level => "level".fmt(f),
            BoardCategory::Pressure => "pressure".fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Board {
    pub id: &'static str,
    pub category: BoardCategory,
    pub description: &'static str,
}

/// Boards reported by the supply, in output order.
pub static BOARDS: [Board; 4] = [
    Board {
        id: "MB1.T1",
        category: BoardCategory::Temperature,
        description: "magnet temperature",
    },
    Board {
        id: "DB8.T1",
        category: BoardCategory::Temperature,
        description: "10T magnet temperature",
    },
    Board {
        id: "DB1.L1",
        category: BoardCategory::Level,
        description: "cryogen levels",
    },
    Board {
        id: "DB5.P1",
        category: BoardCategory::Pressure,
        description: "pressure",
    },
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed alarm entry {0:?}")]
    MalformedEntry(String),
    #[error("unknown board {0:?}")]
    UnknownBoard(String),
    #[error("unknown fault {fault:?} on {board}")]
    UnknownFault { board: &'static str, fault: String },
}

/// One bitmask per entry of [`BOARDS`], plus whatever went wrong on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlarmMasks {
    masks: [u32; 4],
    pub errors: Vec<DecodeError>,
}

impl AlarmMasks {
    pub fn masks(&self) -> [u32; 4] {
        self.masks
    }

    pub fn mask(&self, board_id: &str) -> Option<u32> {
        BOARDS
            .iter()
            .position(|board| board.id == board_id)
            .map(|i| self.masks[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static Board, u32)> + '_ {
        BOARDS.iter().zip(self.masks.iter().copied())
    }

    pub fn is_clear(&self) -> bool {
        self.masks.iter().all(|&mask| mask == 0)
    }
}

pub fn decode(message: &str) -> AlarmMasks {
    let message = message.trim_end_matches(|c| c == '\r' || c == '\n');
    let message = message.strip_prefix(REPLY_HEADER).unwrap_or(message);
    let mut result = AlarmMasks::default();

    for entry in message.split(';').filter(|entry| !entry.is_empty()) {
        match decode_entry(entry) {
            Ok((index, bit)) => result.masks[index] |= 1 << bit,
            Err(e) => {
                warn!("{}", e);
                result.errors.push(e);
            }
        }
    }

    result
}

fn decode_entry(entry: &str) -> Result<(usize, u32), DecodeError> {
    let (id, text) = entry
        .split_once('\t')
        .ok_or_else(|| DecodeError::MalformedEntry(entry.to_string()))?;
    let index = BOARDS
        .iter()
        .position(|board| board.id == id)
        .ok_or_else(|| DecodeError::UnknownBoard(id.to_string()))?;
    let board = &BOARDS[index];
    let bit = board
        .category
        .fault_bit(text)
        .ok_or_else(|| DecodeError::UnknownFault {
            board: board.id,
            fault: text.to_string(),
        })?;
    Ok((index, bit))
}

/// Fault texts for the set bits of `mask`, lowest bit first. Bits beyond the
/// vocabulary are ignored.
pub fn describe(category: BoardCategory, mask: u32) -> Vec<&'static str> {
    category
        .vocabulary()
        .iter()
        .enumerate()
        .filter(|(i, _)| mask & (1 << i) != 0)
        .map(|(_, text)| *text)
        .collect()
}
