// MIT License - Copyright (c) 2026 Peter Wright
// DIGIPLEX EVO variant

pub mod events;
pub mod parsers;

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::NaiveDateTime;

use crate::charmap::Charmap;
use crate::codec::grammar::Context;
use crate::codec::value::{record, Record, RecordExt, Value};
use crate::constants::{command, ProductId, LIVE_EVENT_SOURCE};
use crate::error::{FrameError, ParadoxError, Result};
use crate::event_map::{Event, EventTable, LabelProvider, RawEvent};
use crate::variants::neutral::SOURCE_ID;
use crate::variants::{
    frame_error, Action, EepromMap, Message, MessageKind, Panel, RamBlock,
};

use self::parsers::{Frames, MAX_EEPROM_ADDRESS, MAX_RAM_ADDRESS, RAM_ZONES, READ_CHUNK};

/// `source_method` when no user code is configured.
const SOURCE_METHOD_WINLOAD: u8 = 0x00;
/// `source_method` when logging in with a user code.
const SOURCE_METHOD_NEWARE: u8 = 0x55;
/// Bytes in one compressed event-log record.
const COMPRESSED_EVENT_LEN: usize = 12;

/// DIGIPLEX EVO 48/96/192/HD.
#[derive(Debug)]
pub struct EvoPanel {
    product: ProductId,
    charmap: Charmap,
    frames: Frames,
    ram: Vec<RamBlock>,
    map: EepromMap,
    events: EventTable,
}

impl EvoPanel {
    pub fn new(product: ProductId, charmap: Charmap) -> Self {
        Self {
            product,
            charmap,
            frames: Frames::new(),
            ram: parsers::ram_blocks(),
            map: parsers::eeprom_map(product.max_zones()),
            events: events::event_table(),
        }
    }

    /// Replace the event table, e.g. with a modified copy.
    pub fn with_event_table(mut self, events: EventTable) -> Self {
        self.events = events;
        self
    }

    fn read_frame(&self, address: u32, length: usize, ram: bool) -> Result<Bytes> {
        let (max, high) = if ram {
            (MAX_RAM_ADDRESS, address >> 16)
        } else {
            (MAX_EEPROM_ADDRESS, (address >> 16) & 0x3)
        };
        if address > max {
            return Err(FrameError::AddressOutOfRange { address, max }.into());
        }
        if length == 0 || length > READ_CHUNK {
            return Err(FrameError::InvalidValue {
                field: "read_length".to_string(),
                details: format!("{length} not in 1..={READ_CHUNK}"),
            }
            .into());
        }
        let (block, eeprom_bits) = if ram { (high, 0) } else { (0, high) };
        let fields = record([
            ("po", Value::Record(record([("block", block)]))),
            (
                "control",
                Value::Record(record([
                    ("ram_access", Value::Bool(ram)),
                    ("eeprom_address_bits", Value::from(eeprom_bits)),
                ])),
            ),
            ("address", Value::from(address & 0xFFFF)),
            ("read_length", Value::from(length as u32)),
        ]);
        Ok(self.frames.read_eeprom.build(&fields)?)
    }

    fn parse_memory(&self, frame: &[u8]) -> std::result::Result<Record, FrameError> {
        let mut rec = self.frames.read_eeprom_response.parse(frame)?;
        let block = rec.record("po")?.int("block")?;
        let control = rec.record("control")?;
        let ram = control.flag("ram_access");
        let high = if ram { block } else { control.int("eeprom_address_bits")? };
        let address = (high << 16) | rec.int("address")?;
        rec.insert("address".to_string(), Value::Int(address));
        rec.insert("ram_access".to_string(), Value::Bool(ram));
        Ok(rec)
    }

    fn live_event(&self, msg: &Message) -> std::result::Result<RawEvent, FrameError> {
        let mut raw = RawEvent::from_record(&msg.fields)?;
        raw.label = Some(self.charmap.decode(msg.fields.bytes("label")?));
        Ok(raw)
    }

    fn logged_events(&self, msg: &Message) -> std::result::Result<Vec<RawEvent>, FrameError> {
        let data = msg.fields.bytes("events")?;
        data.chunks_exact(COMPRESSED_EVENT_LEN)
            .map(|chunk| {
                let (value, _) = crate::codec::grammar::Grammar::CompressedEvent
                    .parse(chunk, &mut Context::default())?;
                match value {
                    Some(Value::Record(rec)) => RawEvent::from_record(&rec),
                    _ => Err(FrameError::MissingField("event".to_string())),
                }
            })
            .collect()
    }
}

/// Mark `ids` in a 1-based bitmap of `max` entries.
pub(crate) fn bitmap(ids: &[u32], max: u32) -> Result<Value> {
    let mut map = BTreeMap::new();
    for id in ids {
        if *id == 0 || *id > max {
            return Err(ParadoxError::InvalidDeviceId { id: *id, max });
        }
        map.insert(*id, Value::Bool(true));
    }
    Ok(Value::Map(map))
}

/// Pad or cut an encoded PIN to the field width.
fn fit(mut bytes: Vec<u8>, width: usize) -> Value {
    bytes.resize(width, 0);
    Value::Bytes(bytes)
}

/// `InitializeCommunication` fields echoing the `StartCommunication` reply.
pub(crate) fn login_fields(
    panel: &dyn Panel,
    start: &Record,
    pc_password: &str,
    user_code: Option<&str>,
) -> Result<Record> {
    let user = match user_code {
        Some(code) => fit(panel.encode_password(code)?, 4),
        None => fit(Vec::new(), 4),
    };
    let method = if user_code.is_some() { SOURCE_METHOD_NEWARE } else { SOURCE_METHOD_WINLOAD };
    Ok(record([
        ("product_id", start.field("product_id")?.clone()),
        ("firmware", start.field("firmware")?.clone()),
        ("panel_id", start.field("panel_id")?.clone()),
        ("pc_password", fit(panel.encode_password(pc_password)?, 2)),
        ("source_method", Value::from(method)),
        ("user_code", user),
        ("source_id", Value::from(SOURCE_ID)),
    ]))
}

impl Panel for EvoPanel {
    fn product(&self) -> Option<ProductId> {
        Some(self.product)
    }

    fn variable_framing(&self) -> bool {
        true
    }

    fn parse_message(&self, frame: &[u8]) -> std::result::Result<Message, FrameError> {
        let first = *frame.first().ok_or(FrameError::Truncated { needed: 1, available: 0 })?;
        let (kind, fields) = match (first >> 4, frame.get(1)) {
            (command::LOGIN_CONFIRMATION, _) => {
                (MessageKind::LoginConfirmation, self.frames.login_confirmation.parse(frame)?)
            }
            (command::SET_TIME_DATE, _) => {
                (MessageKind::SetTimeDateResponse, self.frames.set_time_date_response.parse(frame)?)
            }
            (command::ACTION, _) => (MessageKind::ActionResponse, self.frames.action_response.parse(frame)?),
            (command::READ_EEPROM, _) => (MessageKind::ReadEepromResponse, self.parse_memory(frame)?),
            (command::ERROR_MESSAGE, _) => (MessageKind::ErrorMessage, self.frames.error_message.parse(frame)?),
            (command::ZONE_ACTION, _) => {
                (MessageKind::ZoneActionResponse, self.frames.zone_action_response.parse(frame)?)
            }
            (command::LIVE_EVENT, Some(&LIVE_EVENT_SOURCE)) => {
                (MessageKind::LiveEvent, self.frames.live_event.parse(frame)?)
            }
            (command::LIVE_EVENT, _) => (
                MessageKind::RequestedEventResponse,
                self.frames.requested_event_response.parse(frame)?,
            ),
            _ => return Err(frame_error(frame)),
        };
        Ok(Message::new(kind, fields, frame))
    }

    fn initialize_communication(
        &self,
        start: &Record,
        pc_password: &str,
        user_code: Option<&str>,
    ) -> Result<Bytes> {
        let fields = login_fields(self, start, pc_password, user_code)?;
        Ok(self.frames.initialize_communication.build(&fields)?)
    }

    fn request_eeprom(&self, address: u32, length: usize) -> Result<Bytes> {
        self.read_frame(address, length, false)
    }

    fn eeprom_chunk(&self) -> usize {
        READ_CHUNK
    }

    fn eeprom_map(&self) -> &EepromMap {
        &self.map
    }

    fn ram_blocks(&self) -> &[RamBlock] {
        &self.ram
    }

    fn polled_zones(&self) -> Option<u32> {
        Some(RAM_ZONES as u32)
    }

    fn request_ram_block(&self, address: u32) -> Result<Bytes> {
        self.read_frame(address, READ_CHUNK, true)
    }

    fn perform_action(&self, action: &Action) -> Result<Vec<Bytes>> {
        let frame = match action {
            Action::Partition(commands) => {
                let mut map = BTreeMap::new();
                for (partition, command) in commands {
                    if *partition == 0 || *partition > self.product.max_partitions() {
                        return Err(ParadoxError::InvalidDeviceId {
                            id: *partition,
                            max: self.product.max_partitions(),
                        });
                    }
                    map.insert(*partition, Value::from(command.code()));
                }
                self.frames
                    .partition_action
                    .build(&record([("commands", Value::Map(map))]))?
            }
            Action::Zone { zones, flag, operation } => self.frames.zone_action.build(&record([
                ("flags", Value::Record(record([(flag.field(), true)]))),
                ("operation", Value::from(operation.code())),
                ("zones", bitmap(zones, self.product.max_zones())?),
            ]))?,
            Action::Pgm { pgms, command } => self.frames.pgm_action.build(&record([
                ("pgms", bitmap(pgms, 32)?),
                ("command", Value::from(command.code())),
            ]))?,
            Action::Door { doors, command, user } => self.frames.door_action.build(&record([
                ("command", Value::from(command.code())),
                ("user", Value::from(*user)),
                ("doors", bitmap(doors, 32)?),
            ]))?,
            Action::Panic { partitions, panic, user } => self.frames.panic_action.build(&record([
                ("panic_type", Value::from(panic.code())),
                ("user", Value::from(*user)),
                ("partitions", bitmap(partitions, self.product.max_partitions())?),
            ]))?,
        };
        Ok(vec![frame])
    }

    fn set_time_date(&self, time: NaiveDateTime) -> Result<Bytes> {
        let fields = record([("time", Value::Time(Some(time)))]);
        Ok(self.frames.set_time_date.build(&fields)?)
    }

    fn request_events(&self, from: u16) -> Result<Bytes> {
        Ok(self.frames.request_events.build(&record([("event_nr", from)]))?)
    }

    fn close_connection(&self) -> Result<Bytes> {
        Ok(self.frames.close_connection.build(&record([("message", 0x05u8)]))?)
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
        labels: &dyn LabelProvider,
    ) -> std::result::Result<Vec<Event>, FrameError> {
        let raws = match msg.kind {
            MessageKind::LiveEvent => vec![self.live_event(msg)?],
            MessageKind::RequestedEventResponse => self.logged_events(msg)?,
            _ => return Err(frame_error(&msg.raw)),
        };
        Ok(raws.into_iter().map(|raw| self.events.render(raw, labels)).collect())
    }
}
