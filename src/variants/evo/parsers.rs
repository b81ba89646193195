// MIT License - Copyright (c) 2026 Peter Wright
// DIGIPLEX EVO frame layouts and memory maps

use crate::codec::grammar::{
    bits, const_bits, dict_array, field, flag, flag_array, int_bits, pad_bits, structure, u16, u8,
    Grammar,
};
use crate::codec::FrameDef;
use crate::constants::{action, LIVE_EVENT_SOURCE};
use crate::store::Container;
use crate::variants::memory;
use crate::variants::neutral::version;
use crate::variants::{
    close_connection_def, error_message, label_field, status_bits, DefinitionBlock, EepromMap,
    LabelBlock, RamBlock, Target,
};

/// Largest EEPROM address reachable through `eeprom_address_bits`.
pub const MAX_EEPROM_ADDRESS: u32 = 0x3FFFF;
/// Largest 20-bit RAM address.
pub const MAX_RAM_ADDRESS: u32 = 0xFFFFF;
/// Bytes per memory read.
pub const READ_CHUNK: usize = 64;
/// Zones covered by the RAM status blocks.
pub const RAM_ZONES: usize = 96;

/// Every frame the EVO variant sends or receives.
#[derive(Debug, Clone)]
pub struct Frames {
    pub initialize_communication: FrameDef,
    pub login_confirmation: FrameDef,
    pub error_message: FrameDef,
    pub close_connection: FrameDef,
    pub read_eeprom: FrameDef,
    pub read_eeprom_response: FrameDef,
    pub partition_action: FrameDef,
    pub pgm_action: FrameDef,
    pub door_action: FrameDef,
    pub panic_action: FrameDef,
    pub action_response: FrameDef,
    pub zone_action: FrameDef,
    pub zone_action_response: FrameDef,
    pub set_time_date: FrameDef,
    pub set_time_date_response: FrameDef,
    pub live_event: FrameDef,
    pub request_events: FrameDef,
    pub requested_event_response: FrameDef,
}

impl Frames {
    pub fn new() -> Self {
        Self {
            initialize_communication: initialize_communication(),
            login_confirmation: login_confirmation(),
            error_message: FrameDef::new("ErrorMessage", error_message()),
            close_connection: close_connection_def(),
            read_eeprom: read_eeprom(),
            read_eeprom_response: read_eeprom_response(),
            partition_action: partition_action(),
            pgm_action: pgm_action(),
            door_action: door_action(),
            panic_action: panic_action(),
            action_response: response("ActionResponse", 0x4, vec![field("action", u8())]),
            zone_action: zone_action(),
            zone_action_response: response("ZoneActionResponse", 0xD, Vec::new()),
            set_time_date: set_time_date(),
            set_time_date_response: response("SetTimeDateResponse", 0x3, Vec::new()),
            live_event: live_event(),
            request_events: request_events(),
            requested_event_response: requested_event_response(),
        }
    }
}

impl Default for Frames {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn initialize_communication() -> FrameDef {
    FrameDef::new(
        "InitializeCommunication",
        structure(vec![
            field("po", Grammar::Const(vec![0x00])),
            field("module_address", u8()),
            field("_not_used0", Grammar::Padding(2)),
            field("product_id", u8()),
            field("firmware", version(true)),
            field("panel_id", u16()),
            field("pc_password", Grammar::Bytes(2)),
            field("_not_used1", Grammar::Padding(1)),
            field("source_method", u8()),
            field("user_code", Grammar::Bytes(4)),
            field("_not_used2", Grammar::Padding(15)),
            field("source_id", u8()),
            field("user_id", u16()),
        ]),
    )
}

fn login_confirmation() -> FrameDef {
    FrameDef::new(
        "LoginConfirmation",
        structure(vec![
            field("po", bits(status_bits(0x1))),
            field("length", Grammar::Length),
            field("result", login_result()),
            field("callback", u16()),
        ]),
    )
}

pub(crate) fn login_result() -> Grammar {
    bits(vec![
        pad_bits(4),
        flag("partition_2"),
        pad_bits(1),
        flag("module_trouble"),
        flag("neware_answer"),
    ])
}

pub(crate) fn memory_po() -> Grammar {
    bits(vec![const_bits("command", 4, 0x5), int_bits("block", 4)])
}

fn memory_control() -> Grammar {
    bits(vec![
        flag("ram_access"),
        flag("alarm_reporting_pending"),
        flag("external_tool_a"),
        flag("external_tool_b"),
        pad_bits(2),
        int_bits("eeprom_address_bits", 2),
    ])
}

fn read_eeprom() -> FrameDef {
    FrameDef::new(
        "ReadEEPROM",
        structure(vec![
            field("po", memory_po()),
            field("length", Grammar::Length),
            field("control", memory_control()),
            field("bus_address", u8()),
            field("address", u16()),
            field("read_length", u8()),
        ]),
    )
}

fn read_eeprom_response() -> FrameDef {
    FrameDef::new(
        "ReadEEPROMResponse",
        structure(vec![
            field("po", memory_po()),
            field("length", Grammar::Length),
            field("control", memory_control()),
            field("bus_address", u8()),
            field("address", u16()),
            field("data", Grammar::Greedy),
        ]),
    )
}

fn action_header(code: u8) -> Vec<crate::codec::grammar::Field> {
    vec![
        field("po", Grammar::Const(vec![0x40])),
        field("length", Grammar::Length),
        field("action", Grammar::Const(vec![code])),
    ]
}

fn partition_action() -> FrameDef {
    let mut fields = action_header(action::PARTITION);
    fields.extend([
        field("_not_used0", Grammar::Padding(6)),
        field(
            "commands",
            Grammar::ByteSwapped(Box::new(Grammar::NibbleArray { count: 8, first_index: 1 })),
        ),
        field("_not_used1", Grammar::Padding(1)),
    ]);
    FrameDef::new("PerformPartitionAction", structure(fields))
}

fn pgm_action() -> FrameDef {
    let mut fields = action_header(action::PGM);
    fields.extend([
        field("pgms", flag_array(32, 1)),
        field("_not_used0", Grammar::Padding(7)),
        field("command", u8()),
        field("_not_used1", Grammar::Padding(3)),
    ]);
    FrameDef::new("PerformPGMAction", structure(fields))
}

fn door_action() -> FrameDef {
    let mut fields = action_header(action::DOOR);
    fields.extend([
        field("command", u8()),
        field("user", u16()),
        field("doors", flag_array(32, 1)),
    ]);
    FrameDef::new("PerformDoorAction", structure(fields))
}

fn panic_action() -> FrameDef {
    let mut fields = action_header(action::PANIC);
    fields.extend([
        field("panic_type", u8()),
        field("user", u16()),
        field("partitions", flag_array(8, 1)),
    ]);
    FrameDef::new("PerformPanicAction", structure(fields))
}

fn zone_action() -> FrameDef {
    FrameDef::new(
        "PerformZoneAction",
        structure(vec![
            field("po", Grammar::Const(vec![0xD0])),
            field("length", Grammar::Length),
            field("flags", bits(vec![flag("bypassed"), flag("alarm_memory"), pad_bits(6)])),
            field("operation", u8()),
            field("_not_used0", Grammar::Padding(2)),
            field("zones", flag_array(192, 1)),
        ]),
    )
}

/// Replies carrying only a status nibble, a length and an opaque body.
fn response(name: &'static str, command: u64, mut body: Vec<crate::codec::grammar::Field>) -> FrameDef {
    let mut fields = vec![
        field("po", bits(status_bits(command))),
        field("length", Grammar::Length),
    ];
    fields.append(&mut body);
    fields.push(field("_rest", Grammar::Greedy));
    FrameDef::new(name, structure(fields))
}

fn set_time_date() -> FrameDef {
    FrameDef::new(
        "SetTimeDate",
        structure(vec![
            field("po", Grammar::Const(vec![0x30])),
            field("length", Grammar::Length),
            field("_not_used0", Grammar::Padding(4)),
            field("time", Grammar::Date { seconds: false, optional: false }),
        ]),
    )
}

fn live_event() -> FrameDef {
    FrameDef::new(
        "LiveEvent",
        structure(vec![
            field("po", bits(status_bits(0xE))),
            field("event_source", Grammar::Const(vec![LIVE_EVENT_SOURCE])),
            field("event_nr", u16()),
            field("time", Grammar::Date { seconds: false, optional: true }),
            field("event", Grammar::Event),
            field("module_serial", Grammar::Bytes(4)),
            field("label_type", u8()),
            label_field("label"),
            field("_not_used0", Grammar::Padding(1)),
        ]),
    )
}

fn request_events() -> FrameDef {
    FrameDef::new(
        "RequestedEvent",
        structure(vec![
            field("po", Grammar::Const(vec![0xE0])),
            field("length", Grammar::Length),
            field("event_source", Grammar::Const(vec![0x00])),
            field("_not_used0", Grammar::Padding(1)),
            field("event_nr", u16()),
        ]),
    )
}

fn requested_event_response() -> FrameDef {
    FrameDef::new(
        "RequestedEventResponse",
        structure(vec![
            field("po", bits(status_bits(0xE))),
            field("length", Grammar::Length),
            field("event_source", Grammar::Const(vec![0x00])),
            field("_not_used0", Grammar::Padding(1)),
            field("event_nr", u16()),
            field("events", Grammar::Greedy),
        ]),
    )
}

fn system(key: &'static str, name: &'static str) -> Target {
    Target::System { key, field: Some(name) }
}

fn indexed(container: Container, name: Option<&'static str>) -> Target {
    Target::Indexed { container, field: name }
}

/// RAM blocks 1 to 5, 64 bytes each.
pub fn ram_blocks() -> Vec<RamBlock> {
    let zones = RAM_ZONES;
    vec![
        RamBlock {
            address: 1,
            grammar: structure(vec![
                field("troubles", memory::troubles()),
                field("time", Grammar::Date { seconds: true, optional: true }),
                field("vdc", memory::vdc()),
                field("battery_vdc", memory::battery()),
                field("dc", memory::battery()),
                field("zone_open", flag_array(zones, 1)),
                field("zone_tamper", flag_array(zones, 1)),
                field("zone_low_battery", flag_array(zones, 1)),
                field("event_pointer", u16()),
                field("event_pointer_bus", u16()),
                field("_reserved", Grammar::Padding(10)),
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
                ("event_pointer", system("events", "event_pointer")),
                ("event_pointer_bus", system("events", "event_pointer_bus")),
            ],
        },
        RamBlock {
            address: 2,
            grammar: structure(vec![field("pgm_status", dict_array(16, 1, memory::pgm_status()))]),
            targets: vec![("pgm_status", indexed(Container::Pgm, None))],
        },
        RamBlock {
            address: 3,
            grammar: structure(vec![
                field("partition_status", memory::partition_status(32)),
                field("zone_status", dict_array(32, 1, memory::zone_status())),
            ]),
            targets: vec![
                ("partition_status", indexed(Container::Partition, None)),
                ("zone_status", indexed(Container::Zone, None)),
            ],
        },
        RamBlock {
            address: 4,
            grammar: structure(vec![
                field("partition_status", memory::partition_status(16)),
                field("zone_status", dict_array(48, 33, memory::zone_status())),
            ]),
            targets: vec![
                ("partition_status", indexed(Container::Partition, None)),
                ("zone_status", indexed(Container::Zone, None)),
            ],
        },
        RamBlock {
            address: 5,
            grammar: structure(vec![
                field("zone_status", dict_array(16, 81, memory::zone_status())),
                field("module_status", dict_array(32, 1, memory::module_status())),
                field("_reserved", Grammar::Padding(16)),
            ]),
            targets: vec![
                ("zone_status", indexed(Container::Zone, None)),
                ("module_status", indexed(Container::Module, None)),
            ],
        },
    ]
}

fn labels(container: Container, address: u32, count: u32, stride: u32) -> LabelBlock {
    LabelBlock {
        container,
        address,
        count,
        stride,
        length: 16,
    }
}

pub fn eeprom_map(max_zones: u32) -> EepromMap {
    EepromMap {
        labels: vec![
            labels(Container::Partition, 0x3A6B, 8, 0x6B),
            labels(Container::Zone, 0x0430, max_zones, 16),
            labels(Container::Pgm, 0x8082, 32, 16),
            labels(Container::User, 0x3E47, 999, 16),
            labels(Container::Door, 0x345C, 32, 16),
            labels(Container::Module, 0x9000, 254, 16),
        ],
        definitions: vec![
            DefinitionBlock {
                container: Container::Zone,
                address: 0x1F00,
                count: max_zones,
                record: memory::zone_definition(),
            },
            DefinitionBlock {
                container: Container::User,
                address: 0xA000,
                count: 999,
                record: memory::user_definition(),
            },
        ],
    }
}
