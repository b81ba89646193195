// MIT License - Copyright (c) 2026 Peter Wright
// Panel product identifiers and shared protocol constants

use std::fmt;

use serde::{Deserialize, Serialize};

/// Command nibbles (high 4 bits of byte 0).
pub mod command {
    pub const LOGIN_CONFIRMATION: u8 = 0x1;
    pub const SET_TIME_DATE: u8 = 0x3;
    pub const ACTION: u8 = 0x4;
    pub const READ_EEPROM: u8 = 0x5;
    pub const ERROR_MESSAGE: u8 = 0x7;
    pub const ZONE_ACTION: u8 = 0xD;
    pub const LIVE_EVENT: u8 = 0xE;
}

/// First byte of `InitiateCommunication` and its response.
pub const INITIATE_COMMUNICATION_BYTE: u8 = 0x72;
/// First byte of `StartCommunication`.
pub const START_COMMUNICATION_BYTE: u8 = 0x5F;
/// Validation byte following `StartCommunication`.
pub const START_COMMUNICATION_VALIDATION: u8 = 0x20;
/// `event_source` of unsolicited live events.
pub const LIVE_EVENT_SOURCE: u8 = 0xFF;

/// Action codes carried in byte 2 of an EVO action frame.
pub mod action {
    pub const PARTITION: u8 = 0x00;
    pub const PGM: u8 = 0x06;
    pub const DOOR: u8 = 0x09;
    pub const PANIC: u8 = 0x0B;
}

/// Panel families sharing a wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelFamily {
    Evo,
    /// Spectra SP and Magellan MG panels
    Spectra,
}

/// Product identifiers reported during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProductId {
    Evo48 = 3,
    Evo96 = 4,
    Evo192 = 5,
    EvoHd = 7,
    Sp5500 = 21,
    Sp6000 = 22,
    Sp7000 = 23,
    Sp4000 = 26,
    Sp65 = 27,
    Mg5000 = 64,
    Mg5050 = 65,
    Mg5075 = 66,
}

impl ProductId {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            3 => Some(Self::Evo48),
            4 => Some(Self::Evo96),
            5 => Some(Self::Evo192),
            7 => Some(Self::EvoHd),
            21 => Some(Self::Sp5500),
            22 => Some(Self::Sp6000),
            23 => Some(Self::Sp7000),
            26 => Some(Self::Sp4000),
            27 => Some(Self::Sp65),
            64 => Some(Self::Mg5000),
            65 => Some(Self::Mg5050),
            66 => Some(Self::Mg5075),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn family(&self) -> PanelFamily {
        match self {
            Self::Evo48 | Self::Evo96 | Self::Evo192 | Self::EvoHd => PanelFamily::Evo,
            _ => PanelFamily::Spectra,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Evo48 => "DIGIPLEX_EVO_48",
            Self::Evo96 => "DIGIPLEX_EVO_96",
            Self::Evo192 => "DIGIPLEX_EVO_192",
            Self::EvoHd => "DIGIPLEX_EVO_HD",
            Self::Sp5500 => "SPECTRA_SP5500",
            Self::Sp6000 => "SPECTRA_SP6000",
            Self::Sp7000 => "SPECTRA_SP7000",
            Self::Sp4000 => "SPECTRA_SP4000",
            Self::Sp65 => "SPECTRA_SP65",
            Self::Mg5000 => "MAGELLAN_MG5000",
            Self::Mg5050 => "MAGELLAN_MG5050",
            Self::Mg5075 => "MAGELLAN_MG5075",
        }
    }

    /// Zones the panel supports.
    pub fn max_zones(&self) -> u32 {
        match self {
            Self::Evo48 => 48,
            Self::Evo96 => 96,
            Self::Evo192 | Self::EvoHd => 192,
            Self::Sp4000 | Self::Sp65 => 16,
            Self::Sp5500 => 16,
            Self::Sp6000 => 32,
            Self::Sp7000 | Self::Mg5000 | Self::Mg5050 | Self::Mg5075 => 32,
        }
    }

    pub fn max_partitions(&self) -> u32 {
        match self.family() {
            PanelFamily::Evo => 8,
            PanelFamily::Spectra => 2,
        }
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-partition command codes of the partition action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionCommand {
    None,
    Arm,
    ArmStay,
    ArmInstant,
    ArmForce,
    Disarm,
    Beep,
}

impl PartitionCommand {
    pub fn code(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Arm => 2,
            Self::ArmStay => 3,
            Self::ArmInstant => 4,
            Self::ArmForce => 5,
            Self::Disarm => 6,
            Self::Beep => 8,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            Self::None,
            Self::Arm,
            Self::ArmStay,
            Self::ArmInstant,
            Self::ArmForce,
            Self::Disarm,
            Self::Beep,
        ]
        .into_iter()
        .find(|c| c.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Arm => "arm",
            Self::ArmStay => "arm_stay",
            Self::ArmInstant => "arm_instant",
            Self::ArmForce => "arm_force",
            Self::Disarm => "disarm",
            Self::Beep => "beep",
        }
    }
}

/// Arming modes offered by the command surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmMode {
    Away,
    Stay,
    Instant,
    Force,
}

impl ArmMode {
    pub fn command(&self) -> PartitionCommand {
        match self {
            Self::Away => PartitionCommand::Arm,
            Self::Stay => PartitionCommand::ArmStay,
            Self::Instant => PartitionCommand::ArmInstant,
            Self::Force => PartitionCommand::ArmForce,
        }
    }
}

/// PGM output commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PgmCommand {
    Release,
    OnOverride,
    OffOverride,
    On,
    Off,
}

impl PgmCommand {
    pub fn code(&self) -> u8 {
        match self {
            Self::Release => 0,
            Self::OnOverride => 1,
            Self::OffOverride => 2,
            Self::On => 3,
            Self::Off => 4,
        }
    }
}

/// Zone flag operations of the zone action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneOperation {
    Set,
    Clear,
}

impl ZoneOperation {
    pub fn code(&self) -> u8 {
        match self {
            Self::Set => 0x08,
            Self::Clear => 0x04,
        }
    }
}

/// Zone flag targeted by a zone action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneFlagTarget {
    Bypassed,
    AlarmMemory,
}

impl ZoneFlagTarget {
    pub fn field(&self) -> &'static str {
        match self {
            Self::Bypassed => "bypassed",
            Self::AlarmMemory => "alarm_memory",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoorCommand {
    Lock,
    Unlock,
}

impl DoorCommand {
    pub fn code(&self) -> u8 {
        match self {
            Self::Lock => 1,
            Self::Unlock => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanicType {
    Emergency,
    Medical,
    Fire,
}

impl PanicType {
    pub fn code(&self) -> u8 {
        match self {
            Self::Emergency => 0,
            Self::Medical => 1,
            Self::Fire => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_ids() {
        for code in 0..=255u8 {
            if let Some(p) = ProductId::from_u8(code) {
                assert_eq!(p.code(), code);
            }
        }
        assert_eq!(ProductId::from_u8(5).map(|p| p.family()), Some(PanelFamily::Evo));
        assert_eq!(ProductId::from_u8(65).map(|p| p.family()), Some(PanelFamily::Spectra));
        assert_eq!(ProductId::from_u8(2), None);
        assert_eq!(ProductId::EvoHd.to_string(), "DIGIPLEX_EVO_HD");
    }

    #[test]
    fn test_partition_command_codes() {
        assert_eq!(PartitionCommand::from_name("arm").map(|c| c.code()), Some(2));
        assert_eq!(PartitionCommand::Beep.code(), 8);
        assert_eq!(ArmMode::Stay.command(), PartitionCommand::ArmStay);
        assert_eq!(PartitionCommand::from_name("arm_sleep"), None);
    }

    #[test]
    fn test_serde_names() {
        let cmd: PgmCommand = serde_json::from_str("\"on_override\"").unwrap();
        assert_eq!(cmd, PgmCommand::OnOverride);
        assert_eq!(serde_json::to_string(&ZoneOperation::Clear).unwrap(), "\"clear\"");
    }
}
