// MIT License - Copyright (c) 2026 Peter Wright
// Handshake frames understood before the product is known

use bytes::Bytes;
use chrono::NaiveDateTime;

use crate::charmap::Charmap;
use crate::codec::grammar::{bits, const_bits, field, int_bits, structure, u16, u8, Grammar};
use crate::codec::value::Record;
use crate::codec::FrameDef;
use crate::constants::{
    ProductId, INITIATE_COMMUNICATION_BYTE, START_COMMUNICATION_BYTE, START_COMMUNICATION_VALIDATION,
};
use crate::error::{FrameError, ParadoxError, Result};
use crate::event_map::{Event, EventTable, LabelProvider};
use crate::variants::{
    close_connection_def, error_message, frame_error, status_bits, Action, EepromMap, Message,
    MessageKind, Panel, RamBlock,
};

/// `source_id` announced in the handshake.
pub const SOURCE_ID: u8 = 0x02;

pub(crate) fn version(with_build: bool) -> Grammar {
    let mut fields = vec![field("version", u8()), field("revision", u8())];
    if with_build {
        fields.push(field("build", u8()));
    }
    structure(fields)
}

pub fn initiate_communication_def() -> FrameDef {
    FrameDef::new(
        "InitiateCommunication",
        structure(vec![
            field("po", Grammar::Const(vec![INITIATE_COMMUNICATION_BYTE])),
            field("_reserved", Grammar::Padding(35)),
        ]),
    )
}

pub fn initiate_communication_response_def() -> FrameDef {
    FrameDef::new(
        "InitiateCommunicationResponse",
        structure(vec![
            field("po", bits(vec![const_bits("command", 4, 0x7), int_bits("message_center", 4)])),
            field("new_protocol", Grammar::Const(vec![0xFF])),
            field("protocol_id", u8()),
            field("protocol", version(true)),
            field("family_id", u8()),
            field("product_id", u8()),
            field("talker", u8()),
            field("application", version(true)),
            field("serial_number", Grammar::Bytes(4)),
            field("hardware", version(false)),
            field(
                "bootloader",
                structure(vec![
                    field("version", u8()),
                    field("revision", u8()),
                    field("build", u8()),
                    field("day", u8()),
                    field("month", u8()),
                    field("year", u8()),
                ]),
            ),
            field("processor_id", u8()),
            field("encryption_id", u8()),
            field("_reserved", Grammar::Bytes(2)),
            field("label", Grammar::Bytes(8)),
        ]),
    )
}

pub fn start_communication_def() -> FrameDef {
    FrameDef::new(
        "StartCommunication",
        structure(vec![
            field("po", Grammar::Const(vec![START_COMMUNICATION_BYTE, START_COMMUNICATION_VALIDATION])),
            field("_not_used", Grammar::Padding(31)),
            field("source_id", u8()),
            field("user_id", u16()),
        ]),
    )
}

pub fn start_communication_response_def() -> FrameDef {
    FrameDef::new(
        "StartCommunicationResponse",
        structure(vec![
            field("po", bits(status_bits(0x0))),
            field("_not_used0", Grammar::Bytes(3)),
            field("product_id", u8()),
            field("firmware", version(true)),
            field("panel_id", u16()),
            field("_not_used1", Grammar::Bytes(5)),
            field(
                "transceiver",
                structure(vec![
                    field("firmware_build", u8()),
                    field("family", u8()),
                    field("firmware_version", u8()),
                    field("firmware_revision", u8()),
                    field("noise_floor_level", u8()),
                    field("status", u8()),
                    field("hardware_revision", u8()),
                ]),
            ),
            field("_not_used2", Grammar::Bytes(14)),
        ]),
    )
}

/// Build `InitiateCommunication` (0x72 and 35 zero bytes).
pub fn initiate_communication() -> Result<Bytes> {
    Ok(initiate_communication_def().build(&Record::new())?)
}

/// Build `StartCommunication` for the default source.
pub fn start_communication() -> Result<Bytes> {
    let fields = crate::codec::value::record([("source_id", SOURCE_ID)]);
    Ok(start_communication_def().build(&fields)?)
}

/// Parses handshake replies and error messages only.
#[derive(Debug)]
pub struct NeutralPanel {
    initiate_response: FrameDef,
    start_response: FrameDef,
    error: FrameDef,
    close: FrameDef,
    charmap: Charmap,
    events: EventTable,
    map: EepromMap,
}

impl NeutralPanel {
    pub fn new() -> Self {
        Self {
            initiate_response: initiate_communication_response_def(),
            start_response: start_communication_response_def(),
            error: FrameDef::new("ErrorMessage", error_message()),
            close: close_connection_def(),
            charmap: Charmap::default(),
            events: EventTable::new(),
            map: EepromMap::default(),
        }
    }

    fn unsupported(&self, what: &str) -> ParadoxError {
        ParadoxError::Unsupported(format!("{what} before the panel is identified"))
    }
}

impl Default for NeutralPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl Panel for NeutralPanel {
    fn product(&self) -> Option<ProductId> {
        None
    }

    fn variable_framing(&self) -> bool {
        true
    }

    fn parse_message(&self, frame: &[u8]) -> std::result::Result<Message, FrameError> {
        let (kind, def) = match frame {
            [INITIATE_COMMUNICATION_BYTE, 0xFF, ..] => {
                (MessageKind::InitiateCommunicationResponse, &self.initiate_response)
            }
            [b, ..] if b >> 4 == 0x7 => (MessageKind::ErrorMessage, &self.error),
            [b, ..] if b >> 4 == 0x0 => (MessageKind::StartCommunicationResponse, &self.start_response),
            _ => return Err(frame_error(frame)),
        };
        Ok(Message::new(kind, def.parse(frame)?, frame))
    }

    fn initialize_communication(&self, _: &Record, _: &str, _: Option<&str>) -> Result<Bytes> {
        Err(self.unsupported("login"))
    }

    fn request_eeprom(&self, _: u32, _: usize) -> Result<Bytes> {
        Err(self.unsupported("memory reads"))
    }

    fn eeprom_chunk(&self) -> usize {
        0
    }

    fn eeprom_map(&self) -> &EepromMap {
        &self.map
    }

    fn ram_blocks(&self) -> &[RamBlock] {
        &[]
    }

    fn request_ram_block(&self, _: u32) -> Result<Bytes> {
        Err(self.unsupported("status polling"))
    }

    fn perform_action(&self, action: &Action) -> Result<Vec<Bytes>> {
        Err(self.unsupported(action.name()))
    }

    fn set_time_date(&self, _: NaiveDateTime) -> Result<Bytes> {
        Err(self.unsupported("set time"))
    }

    fn request_events(&self, _: u16) -> Result<Bytes> {
        Err(self.unsupported("event log"))
    }

    fn close_connection(&self) -> Result<Bytes> {
        let fields = crate::codec::value::record([("message", 0x05u8)]);
        Ok(self.close.build(&fields)?)
    }

    fn charmap(&self) -> &Charmap {
        &self.charmap
    }

    fn event_table(&self) -> &EventTable {
        &self.events
    }

    fn process_event(
        &self,
        msg: &Message,
        _: &dyn LabelProvider,
    ) -> std::result::Result<Vec<Event>, FrameError> {
        Err(FrameError::UnknownCommand(msg.raw.first().copied().unwrap_or(0)))
    }
}
