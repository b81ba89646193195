// MIT License - Copyright (c) 2026 Peter Wright
// Panel variants: per-product grammars, memory maps and event vocabularies

pub mod evo;
pub mod memory;
pub mod neutral;
pub mod spectra;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::NaiveDateTime;

use crate::charmap::{label_key, Charmap};
use crate::codec::grammar::{
    bits, const_bits, field, flag, structure, u8, BitField, Context, Field, Grammar,
};
use crate::codec::value::{Record, RecordExt, Value};
use crate::constants::{
    DoorCommand, PanelFamily, PanicType, PartitionCommand, PgmCommand, ProductId,
    ZoneFlagTarget, ZoneOperation,
};
use crate::devices::user::mask_code;
use crate::error::{FrameError, PanelErrorCode, ParadoxError, Result};
use crate::event_map::{Event, EventTable, LabelProvider};
use crate::store::{Container, Key, Patch, Store};

pub use evo::EvoPanel;
pub use neutral::NeutralPanel;
pub use spectra::SpectraPanel;

/// What a decoded frame is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    InitiateCommunicationResponse,
    StartCommunicationResponse,
    LoginConfirmation,
    ErrorMessage,
    ReadEepromResponse,
    ActionResponse,
    ZoneActionResponse,
    SetTimeDateResponse,
    LiveEvent,
    RequestedEventResponse,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitiateCommunicationResponse => "InitiateCommunicationResponse",
            Self::StartCommunicationResponse => "StartCommunicationResponse",
            Self::LoginConfirmation => "LoginConfirmation",
            Self::ErrorMessage => "ErrorMessage",
            Self::ReadEepromResponse => "ReadEEPROMResponse",
            Self::ActionResponse => "ActionResponse",
            Self::ZoneActionResponse => "ZoneActionResponse",
            Self::SetTimeDateResponse => "SetTimeDateResponse",
            Self::LiveEvent => "LiveEvent",
            Self::RequestedEventResponse => "RequestedEventResponse",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded frame from the panel.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub fields: Record,
    pub raw: Bytes,
}

impl Message {
    pub fn new(kind: MessageKind, fields: Record, raw: &[u8]) -> Self {
        Self {
            kind,
            fields,
            raw: Bytes::copy_from_slice(raw),
        }
    }

    /// High nibble of the first byte.
    pub fn command(&self) -> u8 {
        self.raw.first().map(|b| b >> 4).unwrap_or(0)
    }

    /// The reason code of an `ErrorMessage`.
    pub fn error_code(&self) -> Option<PanelErrorCode> {
        if self.kind != MessageKind::ErrorMessage {
            return None;
        }
        self.fields.u8("message").ok().map(PanelErrorCode::from_code)
    }

    /// Full address of a memory read response.
    pub fn address(&self) -> Option<u32> {
        self.fields.int("address").ok().map(|a| a as u32)
    }

    pub fn is_ram(&self) -> bool {
        self.fields.flag("ram_access")
    }
}

/// A logical action, independent of the variant's wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Per-partition commands; partitions left out get `none`.
    Partition(BTreeMap<u32, PartitionCommand>),
    Zone {
        zones: Vec<u32>,
        flag: ZoneFlagTarget,
        operation: ZoneOperation,
    },
    Pgm {
        pgms: Vec<u32>,
        command: PgmCommand,
    },
    Door {
        doors: Vec<u32>,
        command: DoorCommand,
        user: u16,
    },
    Panic {
        partitions: Vec<u32>,
        panic: PanicType,
        user: u16,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Partition(_) => "partition",
            Self::Zone { .. } => "zone",
            Self::Pgm { .. } => "pgm",
            Self::Door { .. } => "door",
            Self::Panic { .. } => "panic",
        }
    }
}

/// A run of fixed-size labels in EEPROM.
#[derive(Debug, Clone)]
pub struct LabelBlock {
    pub container: Container,
    pub address: u32,
    pub count: u32,
    pub stride: u32,
    pub length: usize,
}

impl LabelBlock {
    /// Bytes to read for the first `count` labels.
    pub fn span(&self, count: u32) -> usize {
        if count == 0 {
            return 0;
        }
        ((count - 1) * self.stride) as usize + self.length
    }
}

/// A run of fixed-size definition records in EEPROM.
#[derive(Debug, Clone)]
pub struct DefinitionBlock {
    pub container: Container,
    pub address: u32,
    pub count: u32,
    pub record: Grammar,
}

impl DefinitionBlock {
    pub fn stride(&self) -> usize {
        self.record.size().unwrap_or(0)
    }

    pub fn span(&self, count: u32) -> usize {
        self.stride() * count as usize
    }
}

/// Locations of labels and definitions in EEPROM.
#[derive(Debug, Clone, Default)]
pub struct EepromMap {
    pub labels: Vec<LabelBlock>,
    pub definitions: Vec<DefinitionBlock>,
}

/// Where a decoded RAM field goes in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A named `system` entry; the value is merged as a record or stored under `field`.
    System {
        key: &'static str,
        field: Option<&'static str>,
    },
    /// A map keyed by object index; each entry is merged as a record or stored under `field`.
    Indexed {
        container: Container,
        field: Option<&'static str>,
    },
}

/// One polled RAM block and where its fields land.
#[derive(Debug, Clone)]
pub struct RamBlock {
    pub address: u32,
    pub grammar: Grammar,
    pub targets: Vec<(&'static str, Target)>,
}

impl RamBlock {
    /// Decode `data` and turn it into store patches.
    ///
    /// Indexed objects the inventory did not load are skipped once the
    /// container has any entries.
    pub fn patches(&self, data: &[u8], store: &Store) -> std::result::Result<Vec<Patch>, FrameError> {
        let size = self.grammar.size().unwrap_or(data.len());
        if data.len() < size {
            return Err(FrameError::Truncated {
                needed: size,
                available: data.len(),
            });
        }
        let (value, _) = self.grammar.parse(&data[..size], &mut Context::default())?;
        let rec = match value {
            Some(Value::Record(rec)) => rec,
            _ => Record::new(),
        };

        let mut merged: BTreeMap<(Container, Key), Record> = BTreeMap::new();
        for (name, target) in &self.targets {
            let Some(value) = rec.get(*name) else {
                continue;
            };
            match *target {
                Target::System { key, field } => {
                    let entry = merged.entry((Container::System, Key::from(key))).or_default();
                    put(entry, field, value);
                }
                Target::Indexed { container, field } => {
                    let map = value.as_map().ok_or_else(|| FrameError::InvalidValue {
                        field: name.to_string(),
                        details: "expected an indexed map".to_string(),
                    })?;
                    let known = store.keys(container);
                    for (index, entry_value) in map {
                        let key = Key::Index(*index);
                        if !known.is_empty() && !known.contains(&key) {
                            continue;
                        }
                        put(merged.entry((container, key)).or_default(), field, entry_value);
                    }
                }
            }
        }
        Ok(merged
            .into_iter()
            .filter(|(_, fields)| !fields.is_empty())
            .map(|((container, key), fields)| Patch { container, key, fields })
            .collect())
    }
}

fn put(entry: &mut Record, field: Option<&str>, value: &Value) {
    match (field, value) {
        (Some(name), v) => {
            entry.insert(name.to_string(), v.clone());
        }
        (None, Value::Record(rec)) => entry.extend(rec.iter().map(|(k, v)| (k.clone(), v.clone()))),
        (None, _) => {}
    }
}

/// Capabilities of one panel variant.
///
/// A [`NeutralPanel`] parses the handshake until the product id selects the
/// real variant.
pub trait Panel: Send + Sync + fmt::Debug {
    fn product(&self) -> Option<ProductId>;

    /// Whether frames after login carry their own length.
    fn variable_framing(&self) -> bool;

    fn parse_message(&self, frame: &[u8]) -> std::result::Result<Message, FrameError>;

    fn encode_password(&self, digits: &str) -> std::result::Result<Vec<u8>, FrameError> {
        encode_password(digits)
    }

    /// Build the login frame from the `StartCommunication` reply.
    fn initialize_communication(
        &self,
        start: &Record,
        pc_password: &str,
        user_code: Option<&str>,
    ) -> Result<Bytes>;

    fn request_eeprom(&self, address: u32, length: usize) -> Result<Bytes>;

    /// Largest EEPROM read per request.
    fn eeprom_chunk(&self) -> usize;

    fn eeprom_map(&self) -> &EepromMap;

    fn ram_blocks(&self) -> &[RamBlock];

    /// Highest zone index the RAM blocks report status for, when that is
    /// below what the EEPROM map lists.
    fn polled_zones(&self) -> Option<u32> {
        None
    }

    fn request_ram_block(&self, address: u32) -> Result<Bytes>;

    /// Frames to send, in order; each expects its own response.
    fn perform_action(&self, action: &Action) -> Result<Vec<Bytes>>;

    fn set_time_date(&self, time: NaiveDateTime) -> Result<Bytes>;

    fn request_events(&self, from: u16) -> Result<Bytes>;

    fn close_connection(&self) -> Result<Bytes>;

    fn charmap(&self) -> &Charmap;

    fn event_table(&self) -> &EventTable;

    /// Decode labels read from `block`, one patch per object.
    fn update_labels(&self, block: &LabelBlock, memory: &[u8], count: u32) -> Vec<Patch> {
        decode_labels(self.charmap(), block, memory, count)
    }

    fn update_definitions(
        &self,
        block: &DefinitionBlock,
        memory: &[u8],
        count: u32,
    ) -> std::result::Result<Vec<Patch>, FrameError> {
        decode_definitions(block, memory, count)
    }

    /// Patches for a memory read response of a polled RAM block.
    fn handle_status_frame(
        &self,
        msg: &Message,
        store: &Store,
    ) -> std::result::Result<Vec<Patch>, FrameError> {
        let address = msg.address().ok_or_else(|| FrameError::MissingField("address".into()))?;
        let block = self
            .ram_blocks()
            .iter()
            .find(|b| b.address == address)
            .ok_or(FrameError::AddressOutOfRange { address, max: 0 })?;
        block.patches(msg.fields.bytes("data")?, store)
    }

    /// Render a live event or every record of an event-log response.
    fn process_event(
        &self,
        msg: &Message,
        labels: &dyn LabelProvider,
    ) -> std::result::Result<Vec<Event>, FrameError>;
}

/// Select the variant for a product id.
pub fn create_panel(product_id: u8, charmap: Charmap) -> Result<Arc<dyn Panel>> {
    let product = ProductId::from_u8(product_id).ok_or(ParadoxError::UnsupportedPanel(product_id))?;
    Ok(match product.family() {
        PanelFamily::Evo => Arc::new(EvoPanel::new(product, charmap)),
        PanelFamily::Spectra => Arc::new(SpectraPanel::new(product, charmap)),
    })
}

/// BCD-encode a PIN. Zero is written as `0xA`; an empty PIN is `00 00`.
///
/// User codes may have an odd number of digits. The last byte then carries
/// a trailing `0x0` nibble, which the panel reads as the end of the code.
pub fn encode_password(digits: &str) -> std::result::Result<Vec<u8>, FrameError> {
    if digits.is_empty() {
        return Ok(vec![0, 0]);
    }
    let nibbles = digits
        .chars()
        .map(|c| match c.to_digit(10) {
            Some(0) => Ok(0x0A),
            Some(d) => Ok(d as u8),
            None => Err(FrameError::InvalidValue {
                field: "password".to_string(),
                details: format!("'{c}' is not a digit"),
            }),
        })
        .collect::<std::result::Result<Vec<u8>, _>>()?;
    Ok(nibbles
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
        .collect())
}

/// Status nibble flags shared by most panel frames.
pub(crate) fn status_bits(command: u64) -> Vec<BitField> {
    vec![
        const_bits("command", 4, command),
        flag("reserved"),
        flag("alarm_reporting_pending"),
        flag("external_tool_a"),
        flag("external_tool_b"),
    ]
}

/// `ErrorMessage` in both sizes: the 4-byte form and the padded 37-byte form.
pub(crate) fn error_message() -> Grammar {
    structure(vec![
        field("po", bits(status_bits(0x7))),
        field("packet_length", u8()),
        field("message", u8()),
        field("_padding", Grammar::Greedy),
    ])
}

/// `ErrorMessage` with code `panel_will_disconnect`, sent to end a session.
pub(crate) fn close_connection_def() -> crate::codec::FrameDef {
    crate::codec::FrameDef::new(
        "CloseConnection",
        structure(vec![
            field("po", bits(status_bits(0x7))),
            field("length", Grammar::Length),
            field("message", u8()),
        ]),
    )
}

/// The 16-byte label layout shared by live events.
pub(crate) fn label_field(name: &'static str) -> Field {
    field(name, Grammar::Bytes(16))
}

pub(crate) fn frame_error(frame: &[u8]) -> FrameError {
    FrameError::UnknownCommand(frame.first().copied().unwrap_or(0))
}

pub fn decode_labels(charmap: &Charmap, block: &LabelBlock, memory: &[u8], count: u32) -> Vec<Patch> {
    (0..count)
        .filter_map(|i| {
            let start = (i * block.stride) as usize;
            let raw = memory.get(start..start + block.length)?;
            let label = charmap.decode(raw);
            let mut fields = Record::new();
            fields.insert("key".to_string(), Value::from(label_key(&label)));
            fields.insert("label".to_string(), Value::from(label));
            Some(Patch::new(block.container, i + 1, fields))
        })
        .collect()
}

pub fn decode_definitions(
    block: &DefinitionBlock,
    memory: &[u8],
    count: u32,
) -> std::result::Result<Vec<Patch>, FrameError> {
    let stride = block.stride();
    let mut patches = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let Some(raw) = memory.get(i * stride..(i + 1) * stride) else {
            break;
        };
        let (value, _) = block.record.parse(raw, &mut Context::default())?;
        let Some(Value::Record(mut rec)) = value else {
            continue;
        };
        if let Some(Value::Bytes(code)) = rec.remove("code") {
            if let Some(masked) = mask_code(&code) {
                rec.insert("code".to_string(), Value::from(masked));
            }
        }
        patches.push(Patch::new(block.container, i as u32 + 1, rec));
    }
    Ok(patches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::grammar::{flag_array, u16};
    use crate::codec::value::record;

    #[test]
    fn test_encode_password() {
        assert_eq!(encode_password("1234").unwrap(), vec![0x12, 0x34]);
        assert_eq!(encode_password("0000").unwrap(), vec![0xAA, 0xAA]);
        assert_eq!(encode_password("102030").unwrap(), vec![0x1A, 0x2A, 0x3A]);
        assert_eq!(encode_password("").unwrap(), vec![0x00, 0x00]);
        assert!(encode_password("12a4").is_err());
    }

    #[test]
    fn test_odd_length_code_ends_with_empty_nibble() {
        assert_eq!(encode_password("12345").unwrap(), vec![0x12, 0x34, 0x50]);
        assert_eq!(encode_password("7").unwrap(), vec![0x70]);
        assert_eq!(encode_password("1020304").unwrap(), vec![0x1A, 0x2A, 0x3A, 0x40]);
    }

    #[test]
    fn test_create_panel_by_product() {
        let evo = create_panel(5, Charmap::default()).unwrap();
        assert_eq!(evo.product(), Some(ProductId::Evo192));
        assert!(evo.variable_framing());
        let mg = create_panel(65, Charmap::default()).unwrap();
        assert!(!mg.variable_framing());
        assert!(matches!(
            create_panel(0x99, Charmap::default()),
            Err(ParadoxError::UnsupportedPanel(0x99))
        ));
    }

    #[test]
    fn test_ram_block_patches_merge_and_filter() {
        let block = RamBlock {
            address: 1,
            grammar: structure(vec![
                field("vdc", u8()),
                field("event_pointer", u16()),
                field("zone_open", flag_array(8, 1)),
                field("zone_tamper", flag_array(8, 1)),
            ]),
            targets: vec![
                ("vdc", Target::System { key: "power", field: Some("vdc") }),
                ("event_pointer", Target::System { key: "events", field: Some("event_pointer") }),
                ("zone_open", Target::Indexed { container: Container::Zone, field: Some("open") }),
                ("zone_tamper", Target::Indexed { container: Container::Zone, field: Some("tamper") }),
            ],
        };
        let mut store = Store::new();
        store
            .update_container_object(Container::Zone, 1, record([("label", "Door")]))
            .unwrap();
        store
            .update_container_object(Container::Zone, 2, record([("label", "Hall")]))
            .unwrap();

        let patches = block.patches(&[12, 0x01, 0x02, 0b0000_0010, 0b0000_0001], &store).unwrap();
        let zone2 = patches
            .iter()
            .find(|p| p.container == Container::Zone && p.key == Key::Index(2))
            .unwrap();
        assert_eq!(zone2.fields, record([("open", true), ("tamper", false)]));
        assert!(!patches.iter().any(|p| p.key == Key::Index(3)));
        let events = patches.iter().find(|p| p.key == Key::from("events")).unwrap();
        assert_eq!(events.fields["event_pointer"], Value::Int(0x0102));
    }

    #[test]
    fn test_decode_labels() {
        let block = LabelBlock {
            container: Container::Zone,
            address: 0,
            count: 2,
            stride: 16,
            length: 16,
        };
        let memory = b"Front door      Garage          ";
        let patches = decode_labels(&Charmap::default(), &block, memory, 2);
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].fields["label"], Value::from("Front door"));
        assert_eq!(patches[0].fields["key"], Value::from("Front_door"));
        assert_eq!(patches[1].key, Key::Index(2));
        assert_eq!(block.span(2), 32);
    }

    #[test]
    fn test_message_error_code() {
        let msg = Message::new(MessageKind::ErrorMessage, record([("message", 0x10u8)]), &[0x70]);
        assert_eq!(msg.error_code(), Some(PanelErrorCode::PanelNotConnected));
        assert_eq!(msg.command(), 0x7);
    }
}
