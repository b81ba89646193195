// MIT License - Copyright (c) 2026 Peter Wright
// Spectra SP and Magellan MG variant

pub mod events;
pub mod parsers;

use bytes::Bytes;
use chrono::NaiveDateTime;

use crate::charmap::Charmap;
use crate::codec::value::{record, Record, RecordExt, Value};
use crate::codec::FrameDef;
use crate::constants::{PartitionCommand, PgmCommand, ProductId, ZoneFlagTarget, ZoneOperation};
use crate::error::{FrameError, ParadoxError, Result};
use crate::event_map::{Event, EventTable, LabelProvider, RawEvent};
use crate::variants::evo::login_fields;
use crate::variants::evo::parsers::initialize_communication;
use crate::variants::{frame_error, Action, EepromMap, Message, MessageKind, Panel, RamBlock};

use self::parsers::{Frames, MAX_EEPROM_ADDRESS, RAM_BASE, READ_CHUNK};

/// Highest RAM address a status read may start at.
const MAX_RAM_ADDRESS: u32 = 0xFFFF - READ_CHUNK as u32 + 1;
/// Number of PGMs the action commands address.
const MAX_PGMS: u32 = 16;

/// Spectra SP and Magellan MG panels.
#[derive(Debug)]
pub struct SpectraPanel {
    product: ProductId,
    charmap: Charmap,
    frames: Frames,
    initialize: FrameDef,
    ram: Vec<RamBlock>,
    map: EepromMap,
    events: EventTable,
}

impl SpectraPanel {
    pub fn new(product: ProductId, charmap: Charmap) -> Self {
        Self {
            product,
            charmap,
            frames: Frames::new(),
            initialize: initialize_communication(),
            ram: parsers::ram_blocks(),
            map: parsers::eeprom_map(product.max_zones()),
            events: events::event_table(),
        }
    }

    pub fn with_event_table(mut self, events: EventTable) -> Self {
        self.events = events;
        self
    }

    fn read_frame(&self, address: u32, length: usize) -> Result<Bytes> {
        if address > MAX_RAM_ADDRESS {
            return Err(FrameError::AddressOutOfRange { address, max: MAX_RAM_ADDRESS }.into());
        }
        if length == 0 || length > READ_CHUNK {
            return Err(FrameError::InvalidValue {
                field: "read_length".to_string(),
                details: format!("{length} not in 1..={READ_CHUNK}"),
            }
            .into());
        }
        Ok(self.frames.read_eeprom.build(&record([("address", address)]))?)
    }

    fn parse_memory(&self, frame: &[u8]) -> std::result::Result<Record, FrameError> {
        let mut rec = self.frames.read_eeprom_response.parse(frame)?;
        let ram = rec.int("address")? >= u64::from(RAM_BASE);
        rec.insert("ram_access".to_string(), Value::Bool(ram));
        Ok(rec)
    }

    /// Gather the event bytes into an `event` record like the EVO layout.
    fn parse_live_event(&self, frame: &[u8]) -> std::result::Result<Record, FrameError> {
        let mut rec = self.frames.live_event.parse(frame)?;
        let event = record([
            ("major", Value::from(rec.u8("major")?)),
            ("minor", Value::from(rec.u8("minor")?)),
            ("minor2", Value::from(0u8)),
            ("partition", Value::from(rec.u8("partition")?)),
        ]);
        rec.insert("event".to_string(), Value::Record(event));
        Ok(rec)
    }

    fn partition_code(command: PartitionCommand) -> Option<u8> {
        match command {
            PartitionCommand::None => None,
            PartitionCommand::Arm => Some(0x04),
            PartitionCommand::ArmStay => Some(0x05),
            PartitionCommand::ArmForce => Some(0x06),
            PartitionCommand::ArmInstant => Some(0x07),
            PartitionCommand::Disarm => Some(0x08),
            PartitionCommand::Beep => Some(0x09),
        }
    }

    fn pgm_code(command: PgmCommand) -> Result<u8> {
        match command {
            PgmCommand::OnOverride => Ok(0x30),
            PgmCommand::OffOverride => Ok(0x31),
            PgmCommand::On => Ok(0x32),
            PgmCommand::Off => Ok(0x33),
            PgmCommand::Release => Err(ParadoxError::Unsupported("PGM release".to_string())),
        }
    }

    fn command_frame(&self, command: u8, id: u32, max: u32) -> Result<Bytes> {
        if id == 0 || id > max {
            return Err(ParadoxError::InvalidDeviceId { id, max });
        }
        let fields = record([("command", Value::from(command)), ("argument", Value::from(id - 1))]);
        Ok(self.frames.action.build(&fields)?)
    }
}

impl Panel for SpectraPanel {
    fn product(&self) -> Option<ProductId> {
        Some(self.product)
    }

    fn variable_framing(&self) -> bool {
        false
    }

    fn parse_message(&self, frame: &[u8]) -> std::result::Result<Message, FrameError> {
        let first = *frame.first().ok_or(FrameError::Truncated { needed: 1, available: 0 })?;
        let (kind, fields) = match first >> 4 {
            0x1 => (MessageKind::LoginConfirmation, self.frames.login_confirmation.parse(frame)?),
            0x3 => (MessageKind::SetTimeDateResponse, self.frames.set_time_date_response.parse(frame)?),
            0x4 => (MessageKind::ActionResponse, self.frames.action_response.parse(frame)?),
            0x5 => (MessageKind::ReadEepromResponse, self.parse_memory(frame)?),
            0x7 => (MessageKind::ErrorMessage, self.frames.error_message.parse(frame)?),
            0xE => (MessageKind::LiveEvent, self.parse_live_event(frame)?),
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
        Ok(self.initialize.build(&fields)?)
    }

    fn request_eeprom(&self, address: u32, length: usize) -> Result<Bytes> {
        if address > MAX_EEPROM_ADDRESS {
            return Err(FrameError::AddressOutOfRange { address, max: MAX_EEPROM_ADDRESS }.into());
        }
        self.read_frame(address, length)
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

    fn request_ram_block(&self, address: u32) -> Result<Bytes> {
        if address < RAM_BASE {
            return Err(FrameError::AddressOutOfRange { address, max: MAX_RAM_ADDRESS }.into());
        }
        self.read_frame(address, READ_CHUNK)
    }

    fn perform_action(&self, action: &Action) -> Result<Vec<Bytes>> {
        match action {
            Action::Partition(commands) => commands
                .iter()
                .filter_map(|(id, command)| Self::partition_code(*command).map(|code| (*id, code)))
                .map(|(id, code)| self.command_frame(code, id, self.product.max_partitions()))
                .collect(),
            Action::Pgm { pgms, command } => {
                let code = Self::pgm_code(*command)?;
                pgms.iter().map(|id| self.command_frame(code, *id, MAX_PGMS)).collect()
            }
            Action::Zone { zones, flag: ZoneFlagTarget::Bypassed, operation } => {
                let code = match operation {
                    ZoneOperation::Set => 0x10,
                    ZoneOperation::Clear => 0x11,
                };
                zones
                    .iter()
                    .map(|id| self.command_frame(code, *id, self.product.max_zones()))
                    .collect()
            }
            Action::Zone { flag: ZoneFlagTarget::AlarmMemory, .. } => {
                Err(ParadoxError::Unsupported("clearing zone alarm memory".to_string()))
            }
            Action::Door { .. } | Action::Panic { .. } => Err(ParadoxError::Unsupported(format!(
                "{} actions on {}",
                action.name(),
                self.product.as_str()
            ))),
        }
    }

    fn set_time_date(&self, time: NaiveDateTime) -> Result<Bytes> {
        Ok(self.frames.set_time_date.build(&record([("time", Value::Time(Some(time)))]))?)
    }

    fn request_events(&self, _from: u16) -> Result<Bytes> {
        Err(ParadoxError::Unsupported(format!("event log on {}", self.product.as_str())))
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
        if msg.kind != MessageKind::LiveEvent {
            return Err(frame_error(&msg.raw));
        }
        let mut raw = RawEvent::from_record(&msg.fields)?;
        raw.label = Some(self.charmap.decode(msg.fields.bytes("label")?));
        Ok(vec![self.events.render(raw, labels)])
    }
}
