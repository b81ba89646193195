// MIT License - Copyright (c) 2026 Peter Wright
// Programmable outputs

use bitflags::bitflags;

use crate::codec::value::{Record, RecordExt};
use crate::devices::partition::text_field;

bitflags! {
    /// PGM output flags from the RAM status block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PgmFlags: u8 {
        /// Output is active
        const ON              = 1 << 0;
        /// Output runs on a timer
        const TIMER_ACTIVE    = 1 << 1;
        /// Output is disabled in programming
        const DISABLED        = 1 << 2;
        /// Output drives a 2-wire fire loop
        const FIRE_2_WIRES    = 1 << 3;
        /// Relay is normally closed
        const NORMALLY_CLOSED = 1 << 4;
    }
}

/// Names of the PGM flag bits, MSB-first. Three padding bits follow.
pub const PGM_FLAGS: [&str; 5] = [
    "on",
    "timer_active",
    "disabled",
    "fire_2_wires",
    "normally_closed",
];

impl PgmFlags {
    pub fn from_record(rec: &Record) -> Self {
        PGM_FLAGS
            .iter()
            .enumerate()
            .filter(|(_, name)| rec.flag(name))
            .fold(Self::empty(), |acc, (i, _)| acc | Self::from_bits_retain(1 << i))
    }
}

/// A programmable output.
#[derive(Debug, Clone)]
pub struct Pgm {
    pub id: u32,
    pub label: String,
    pub key: String,
    pub flags: PgmFlags,
    pub time_left_seconds: u64,
}

impl Pgm {
    pub fn from_record(id: u32, rec: &Record) -> Self {
        Self {
            id,
            label: text_field(rec, "label").unwrap_or_else(|| format!("Output {id}")),
            key: text_field(rec, "key").unwrap_or_else(|| format!("pgm_{id}")),
            flags: PgmFlags::from_record(rec),
            time_left_seconds: rec.int("time_left_seconds").unwrap_or(0),
        }
    }

    pub fn is_on(&self) -> bool {
        self.flags.contains(PgmFlags::ON)
    }

    /// Whether the output switches back by itself.
    pub fn is_pulsed(&self) -> bool {
        self.flags.contains(PgmFlags::TIMER_ACTIVE) && self.time_left_seconds > 0
    }
}
