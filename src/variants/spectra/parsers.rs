// MIT License - Copyright (c) 2026 Peter Wright
// Spectra SP and Magellan MG frame layouts and memory maps

use crate::codec::grammar::{
    bits, dict_array, field, flag_array, structure, u16, u8, Field, Grammar,
};
use crate::codec::FrameDef;
use crate::store::Container;
use crate::variants::evo::parsers::{login_result, memory_po};
use crate::variants::memory;
use crate::variants::{
    error_message, label_field, status_bits, DefinitionBlock, EepromMap, LabelBlock, RamBlock,
    Target,
};

/// Every frame is this long, checksum included.
pub const FRAME_LEN: usize = 37;
/// Largest EEPROM address; the upper half of the address space is RAM.
pub const MAX_EEPROM_ADDRESS: u32 = 0x7FFF;
/// First RAM address.
pub const RAM_BASE: u32 = 0x8000;
/// Bytes returned by every memory read.
pub const READ_CHUNK: usize = 32;
/// Zones covered by the RAM status blocks.
pub const RAM_ZONES: usize = 32;

/// Every frame the Spectra variant sends or receives.
#[derive(Debug, Clone)]
pub struct Frames {
    pub login_confirmation: FrameDef,
    pub error_message: FrameDef,
    pub close_connection: FrameDef,
    pub read_eeprom: FrameDef,
    pub read_eeprom_response: FrameDef,
    pub action: FrameDef,
    pub action_response: FrameDef,
    pub set_time_date: FrameDef,
    pub set_time_date_response: FrameDef,
    pub live_event: FrameDef,
}

impl Frames {
    pub fn new() -> Self {
        Self {
            login_confirmation: login_confirmation(),
            error_message: FrameDef::new("ErrorMessage", error_message()),
            close_connection: close_connection(),
            read_eeprom: read_eeprom(),
            read_eeprom_response: read_eeprom_response(),
            action: action(),
            action_response: response("ActionResponse", 0x4, vec![field("command", u8())]),
            set_time_date: set_time_date(),
            set_time_date_response: response("SetTimeDateResponse", 0x3, Vec::new()),
            live_event: live_event(),
        }
    }
}

impl Default for Frames {
    fn default() -> Self {
        Self::new()
    }
}

/// Pad a layout whose fields take `used` bytes out to the fixed frame size.
fn padded(mut fields: Vec<Field>, used: usize) -> Grammar {
    fields.push(field("_not_used", Grammar::Padding(FRAME_LEN - 1 - used)));
    structure(fields)
}

fn login_confirmation() -> FrameDef {
    FrameDef::new(
        "LoginConfirmation",
        padded(
            vec![
                field("po", bits(status_bits(0x1))),
                field("result", login_result()),
                field("callback", u16()),
            ],
            4,
        ),
    )
}

fn close_connection() -> FrameDef {
    FrameDef::new(
        "CloseConnection",
        padded(
            vec![
                field("po", bits(status_bits(0x7))),
                field("length", Grammar::Length),
                field("message", u8()),
            ],
            3,
        ),
    )
}

fn read_eeprom() -> FrameDef {
    FrameDef::new(
        "ReadEEPROM",
        padded(
            vec![
                field("po", Grammar::Const(vec![0x50])),
                field("_not_used0", Grammar::Padding(1)),
                field("address", u16()),
            ],
            4,
        ),
    )
}

fn read_eeprom_response() -> FrameDef {
    FrameDef::new(
        "ReadEEPROMResponse",
        structure(vec![
            field("po", memory_po()),
            field("_not_used0", Grammar::Padding(1)),
            field("address", u16()),
            field("data", Grammar::Bytes(READ_CHUNK)),
        ]),
    )
}

/// One command with a single zero-based object argument.
fn action() -> FrameDef {
    FrameDef::new(
        "PerformAction",
        padded(
            vec![
                field("po", Grammar::Const(vec![0x40])),
                field("_not_used0", Grammar::Padding(1)),
                field("command", u8()),
                field("argument", u8()),
            ],
            4,
        ),
    )
}

fn response(name: &'static str, command: u64, mut body: Vec<Field>) -> FrameDef {
    let mut fields = vec![field("po", bits(status_bits(command)))];
    fields.append(&mut body);
    fields.push(field("_rest", Grammar::Greedy));
    FrameDef::new(name, structure(fields))
}

fn set_time_date() -> FrameDef {
    FrameDef::new(
        "SetTimeDate",
        padded(
            vec![
                field("po", Grammar::Const(vec![0x30])),
                field("_not_used0", Grammar::Padding(3)),
                field("time", Grammar::Date { seconds: false, optional: false }),
            ],
            10,
        ),
    )
}

fn live_event() -> FrameDef {
    FrameDef::new(
        "LiveEvent",
        padded(
            vec![
                field("po", bits(status_bits(0xE))),
                field("time", Grammar::Date { seconds: false, optional: true }),
                field("major", u8()),
                field("minor", u8()),
                field("partition", u8()),
                field("_not_used0", Grammar::Padding(3)),
                field("label_type", u8()),
                label_field("label"),
                field("module_serial", Grammar::Bytes(4)),
            ],
            34,
        ),
    )
}

fn system(key: &'static str, name: &'static str) -> Target {
    Target::System { key, field: Some(name) }
}

fn indexed(container: Container, name: Option<&'static str>) -> Target {
    Target::Indexed { container, field: name }
}

/// Three consecutive 32-byte RAM blocks from `RAM_BASE`.
pub fn ram_blocks() -> Vec<RamBlock> {
    let zones = RAM_ZONES;
    vec![
        RamBlock {
            address: RAM_BASE,
            grammar: structure(vec![
                field("troubles", memory::troubles()),
                field("time", Grammar::Date { seconds: false, optional: true }),
                field("vdc", memory::vdc()),
                field("battery_vdc", memory::battery()),
                field("dc", memory::battery()),
                field("zone_open", flag_array(zones, 1)),
                field("zone_tamper", flag_array(zones, 1)),
                field("zone_low_battery", flag_array(zones, 1)),
                field("_reserved", Grammar::Padding(7)),
            ]),
            targets: vec![
                ("troubles", Target::System { key: "troubles", field: None }),
                ("time", system("date", "time")),
                ("vdc", system("power", "vdc")),
                ("battery_vdc", system("power", "battery_vdc")),
                ("dc", system("power", "dc")),
                ("zone_open", indexed(Container::Zone, Some("open"))),
                ("zone_tamper", indexed(Container::Zone, Some("tamper"))),
                ("zone_low_battery", indexed(Container::Zone, Some("low_battery"))),
            ],
        },
        RamBlock {
            address: RAM_BASE + 0x20,
            grammar: structure(vec![
                field("partition_status", dict_array(2, 1, memory::compact_partition_status())),
                field("zone_status", dict_array(16, 1, memory::zone_status())),
                field("pgm_status", dict_array(8, 1, memory::pgm_flags())),
            ]),
            targets: vec![
                ("partition_status", indexed(Container::Partition, None)),
                ("zone_status", indexed(Container::Zone, None)),
                ("pgm_status", indexed(Container::Pgm, None)),
            ],
        },
        RamBlock {
            address: RAM_BASE + 0x40,
            grammar: structure(vec![
                field("zone_status", dict_array(16, 17, memory::zone_status())),
                field("module_status", dict_array(8, 1, memory::module_status())),
                field("_reserved", Grammar::Padding(8)),
            ]),
            targets: vec![
                ("zone_status", indexed(Container::Zone, None)),
                ("module_status", indexed(Container::Module, None)),
            ],
        },
    ]
}

fn labels(container: Container, address: u32, count: u32) -> LabelBlock {
    LabelBlock {
        container,
        address,
        count,
        stride: 16,
        length: 16,
    }
}

pub fn eeprom_map(max_zones: u32) -> EepromMap {
    EepromMap {
        labels: vec![
            labels(Container::Zone, 0x0010, max_zones),
            labels(Container::Pgm, 0x0210, 16),
            labels(Container::User, 0x0310, 32),
            labels(Container::Module, 0x0510, 16),
            labels(Container::Partition, 0x0650, 2),
        ],
        definitions: vec![DefinitionBlock {
            container: Container::Zone,
            address: 0x0C00,
            count: max_zones,
            record: memory::zone_definition(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_frame_is_37_bytes() {
        let frames = Frames::new();
        for def in [
            &frames.login_confirmation,
            &frames.close_connection,
            &frames.read_eeprom,
            &frames.read_eeprom_response,
            &frames.action,
            &frames.set_time_date,
            &frames.live_event,
        ] {
            assert_eq!(def.size(), Some(FRAME_LEN), "{}", def.name);
        }
    }

    #[test]
    fn test_ram_blocks_are_32_bytes() {
        for block in ram_blocks() {
            assert_eq!(block.grammar.size(), Some(READ_CHUNK), "block {:#x}", block.address);
        }
    }

    #[test]
    fn test_eeprom_map_below_ram() {
        let map = eeprom_map(32);
        for block in &map.labels {
            assert!(block.address as usize + block.span(block.count) <= RAM_BASE as usize);
        }
        for block in &map.definitions {
            assert!(block.address as usize + block.span(block.count) <= RAM_BASE as usize);
        }
    }
}
