// MIT License - Copyright (c) 2026 Peter Wright
// Panel users and their access rights

use bitflags::bitflags;

use crate::codec::value::{Record, RecordExt, Value};
use crate::devices::partition::text_field;

bitflags! {
    /// User option bits from the EEPROM user record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UserOptions: u8 {
        /// User may bypass zones
        const BYPASS          = 1 << 0;
        /// User may stay arm
        const STAY_ARM        = 1 << 1;
        /// User may force arm
        const FORCE_ARM       = 1 << 2;
        /// User may only arm
        const ARM_ONLY        = 1 << 3;
        /// Code activates PGMs only
        const ACTIVATE_PGM    = 1 << 4;
        /// Code triggers a silent duress alarm
        const DURESS          = 1 << 5;
        /// Code is valid with card only
        const CARD_AND_PIN    = 1 << 6;
        /// Master user
        const MASTER          = 1 << 7;
    }
}

/// Names of the user option bits, MSB-first.
pub const USER_OPTION_FLAGS: [&str; 8] = [
    "bypass",
    "stay_arm",
    "force_arm",
    "arm_only",
    "activate_pgm",
    "duress",
    "card_and_pin",
    "master",
];

impl UserOptions {
    pub fn from_record(rec: &Record) -> Self {
        USER_OPTION_FLAGS
            .iter()
            .enumerate()
            .filter(|(_, name)| rec.flag(name))
            .fold(Self::empty(), |acc, (i, _)| acc | Self::from_bits_retain(1 << i))
    }
}

/// Mask a decoded PIN so only its length survives.
///
/// Codes are BCD with `0xA` for zero; nibbles of `0x0` or `0xF` end the code.
pub fn mask_code(raw: &[u8]) -> Option<String> {
    let digits = raw
        .iter()
        .flat_map(|b| [b >> 4, b & 0x0F])
        .take_while(|n| (1..=0x0A).contains(n))
        .count();
    (digits > 0).then(|| "*".repeat(digits))
}

/// A panel user.
#[derive(Debug, Clone)]
pub struct User {
    pub id: u32,
    pub label: String,
    pub key: String,
    /// Masked code, `None` when no code is programmed.
    pub code: Option<String>,
    pub options: UserOptions,
    pub partitions: Vec<u32>,
}

impl User {
    pub fn from_record(id: u32, rec: &Record) -> Self {
        let options = rec
            .get("options")
            .and_then(Value::as_record)
            .map(UserOptions::from_record)
            .unwrap_or(UserOptions::empty());
        let partitions = rec
            .map("partitions")
            .map(|m| {
                m.iter()
                    .filter(|(_, v)| v.as_bool().unwrap_or(false))
                    .map(|(k, _)| *k)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id,
            label: text_field(rec, "label").unwrap_or_else(|| format!("User {id}")),
            key: text_field(rec, "key").unwrap_or_else(|| format!("user_{id}")),
            code: text_field(rec, "code"),
            options,
            partitions,
        }
    }

    pub fn can_access(&self, partition: u32) -> bool {
        self.partitions.contains(&partition)
    }
}
