// MIT License - Copyright (c) 2026 Peter Wright
// Event-code tables and event rendering

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::codec::value::{Record, RecordExt, Value};
use crate::error::FrameError;
use crate::store::{Container, Key, Patch, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Critical,
}

/// The kind of object an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// `minor` is the zone number
    Zone,
    /// The event's partition nibble names the partition
    Partition,
    /// `minor` is the PGM number
    Pgm,
    /// `minor` is the user number
    User,
    /// `minor` is the door number
    Door,
    /// `minor` is the module bus address
    Module,
    /// Panel-wide; changes go to the `troubles` entry
    System,
    /// No object; nothing changes
    Special,
}

impl EventKind {
    pub fn container(&self) -> Option<Container> {
        match self {
            Self::Zone => Some(Container::Zone),
            Self::Partition => Some(Container::Partition),
            Self::Pgm => Some(Container::Pgm),
            Self::User => Some(Container::User),
            Self::Door => Some(Container::Door),
            Self::Module => Some(Container::Module),
            Self::System => Some(Container::System),
            Self::Special => None,
        }
    }
}

/// What the panel means by one event code.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDef {
    pub level: EventLevel,
    pub kind: EventKind,
    /// Message template; `{label}`, `{minor}`, `{minor2}` and `{partition}` are substituted.
    pub message: String,
    pub tags: Vec<String>,
    /// Patch for the object the event is about.
    pub change: Record,
    /// Patch for the event's partition.
    pub partition_change: Record,
}

impl EventDef {
    pub fn new(level: EventLevel, kind: EventKind, message: &str) -> Self {
        Self {
            level,
            kind,
            message: message.to_string(),
            tags: Vec::new(),
            change: Record::new(),
            partition_change: Record::new(),
        }
    }

    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn change(mut self, fields: &[(&str, bool)]) -> Self {
        self.change = flags(fields);
        self
    }

    pub fn partition_change(mut self, fields: &[(&str, bool)]) -> Self {
        self.partition_change = flags(fields);
        self
    }
}

fn flags(fields: &[(&str, bool)]) -> Record {
    fields
        .iter()
        .map(|(name, on)| (name.to_string(), Value::Bool(*on)))
        .collect()
}

/// Immutable `(major, minor)` lookup table owned by a panel variant.
///
/// An entry without a minor matches every minor of its group. Tests build a
/// modified copy with [`EventTable::with`] instead of mutating a shared table.
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    entries: HashMap<(u8, Option<u16>), EventDef>,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, major: u8, minor: Option<u16>, def: EventDef) -> Self {
        self.entries.insert((major, minor), def);
        self
    }

    pub fn lookup(&self, major: u8, minor: u16) -> Option<&EventDef> {
        self.entries
            .get(&(major, Some(minor)))
            .or_else(|| self.entries.get(&(major, None)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render a decoded event and compute the store patches it implies.
    pub fn render(&self, raw: RawEvent, labels: &dyn LabelProvider) -> Event {
        let Some(def) = self.lookup(raw.major, raw.minor) else {
            return Event {
                message: format!("Unknown event {}/{}", raw.major, raw.minor),
                level: EventLevel::Debug,
                kind: None,
                tags: Vec::new(),
                label: raw.label.clone(),
                changes: Vec::new(),
                raw,
            };
        };

        let partition_label = labels.label(Container::Partition, u32::from(raw.partition));
        let object_label = match def.kind {
            EventKind::Partition => partition_label.clone(),
            EventKind::System | EventKind::Special => None,
            kind => raw
                .label
                .clone()
                .filter(|l| !l.is_empty())
                .or_else(|| kind.container().and_then(|c| labels.label(c, u32::from(raw.minor)))),
        };
        let label_text = object_label
            .clone()
            .unwrap_or_else(|| raw.object_index(def.kind).to_string());
        let partition_text = partition_label
            .clone()
            .unwrap_or_else(|| raw.partition.to_string());

        let mut message = def
            .message
            .replace("{label}", &label_text)
            .replace("{minor2}", &raw.minor2.to_string())
            .replace("{minor}", &raw.minor.to_string())
            .replace("{partition}", &partition_text);
        if def.kind == EventKind::Zone {
            if let Some(p) = &partition_label {
                message.push_str(&format!(" in partition {p}"));
            }
        }

        let mut changes = Vec::new();
        if let (false, Some(container)) = (def.change.is_empty(), def.kind.container()) {
            let key = match def.kind {
                EventKind::System => Key::from("troubles"),
                kind => Key::Index(raw.object_index(kind)),
            };
            changes.push(Patch {
                container,
                key,
                fields: def.change.clone(),
            });
        }
        if !def.partition_change.is_empty() && raw.partition > 0 {
            changes.push(Patch::new(
                Container::Partition,
                u32::from(raw.partition),
                def.partition_change.clone(),
            ));
        }

        Event {
            message,
            level: def.level,
            kind: Some(def.kind),
            tags: def.tags.clone(),
            label: object_label,
            changes,
            raw,
        }
    }
}

/// Resolves labels loaded by the inventory.
pub trait LabelProvider {
    fn label(&self, container: Container, index: u32) -> Option<String>;
}

impl LabelProvider for Store {
    fn label(&self, container: Container, index: u32) -> Option<String> {
        Store::label(self, container, index).map(str::to_string)
    }
}

/// Provides no labels.
pub struct NoLabels;

impl LabelProvider for NoLabels {
    fn label(&self, _: Container, _: u32) -> Option<String> {
        None
    }
}

/// An event as decoded from a live-event or event-log frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawEvent {
    pub major: u8,
    pub minor: u16,
    pub minor2: u16,
    pub partition: u8,
    pub time: Option<NaiveDateTime>,
    pub module_serial: Option<String>,
    /// Label carried by the frame itself, already charmap-decoded.
    pub label: Option<String>,
}

impl RawEvent {
    /// Read the `event` and `time` fields of a decoded frame record.
    pub fn from_record(rec: &Record) -> Result<Self, FrameError> {
        let event = rec.record("event")?;
        let narrow = |name: &str| -> Result<u16, FrameError> {
            let v = event.int(name)?;
            u16::try_from(v).map_err(|_| FrameError::InvalidValue {
                field: name.to_string(),
                details: format!("{v} out of range"),
            })
        };
        Ok(Self {
            major: event.u8("major")?,
            minor: narrow("minor")?,
            minor2: narrow("minor2")?,
            partition: event.u8("partition")?,
            time: match rec.get("time") {
                Some(Value::Time(t)) => *t,
                _ => None,
            },
            module_serial: rec
                .get("module_serial")
                .map(|v| match v {
                    Value::Bytes(b) => hex::encode(b),
                    other => other.to_string(),
                }),
            label: None,
        })
    }

    fn object_index(&self, kind: EventKind) -> u32 {
        match kind {
            EventKind::Partition => u32::from(self.partition),
            _ => u32::from(self.minor),
        }
    }
}

/// A rendered event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(flatten)]
    pub raw: RawEvent,
    pub level: EventLevel,
    #[serde(rename = "type")]
    pub kind: Option<EventKind>,
    pub label: Option<String>,
    pub message: String,
    pub tags: Vec<String>,
    /// Store patches implied by the event.
    #[serde(skip)]
    pub changes: Vec<Patch>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::value::record;

    struct Labels;

    impl LabelProvider for Labels {
        fn label(&self, container: Container, index: u32) -> Option<String> {
            match (container, index) {
                (Container::Partition, 1) => Some("First floor".to_string()),
                (Container::Zone, 7) => Some("Kitchen".to_string()),
                _ => None,
            }
        }
    }

    fn table() -> EventTable {
        EventTable::new()
            .with(
                0,
                None,
                EventDef::new(EventLevel::Info, EventKind::Zone, "Zone {label} OK")
                    .change(&[("open", false)]),
            )
            .with(
                2,
                Some(12),
                EventDef::new(EventLevel::Info, EventKind::Partition, "Partition {label} armed")
                    .change(&[("arm", true)]),
            )
    }

    fn raw(major: u8, minor: u16, partition: u8, label: Option<&str>) -> RawEvent {
        RawEvent {
            major,
            minor,
            minor2: 0,
            partition,
            time: None,
            module_serial: None,
            label: label.map(str::to_string),
        }
    }

    #[test]
    fn test_zone_event_appends_partition() {
        let event = table().render(raw(0, 5, 1, Some("Living room")), &Labels);
        assert_eq!(event.message, "Zone Living room OK in partition First floor");
        assert_eq!(event.changes.len(), 1);
        assert_eq!(event.changes[0].container, Container::Zone);
        assert_eq!(event.changes[0].key, Key::Index(5));
        assert_eq!(event.changes[0].fields, record([("open", false)]));
    }

    #[test]
    fn test_zone_label_falls_back_to_store() {
        let event = table().render(raw(0, 7, 2, None), &Labels);
        assert_eq!(event.message, "Zone Kitchen OK");
        let event = table().render(raw(0, 8, 2, Some("")), &NoLabels);
        assert_eq!(event.message, "Zone 8 OK");
    }

    #[test]
    fn test_partition_event_targets_partition_nibble() {
        let event = table().render(raw(2, 12, 1, None), &Labels);
        assert_eq!(event.message, "Partition First floor armed");
        assert_eq!(event.changes[0].key, Key::Index(1));
    }

    #[test]
    fn test_unknown_event() {
        let event = table().render(raw(63, 1, 0, None), &NoLabels);
        assert_eq!(event.message, "Unknown event 63/1");
        assert_eq!(event.level, EventLevel::Debug);
        assert!(event.changes.is_empty());
    }

    #[test]
    fn test_exact_minor_wins_over_group_entry() {
        let table = table().with(
            0,
            Some(9),
            EventDef::new(EventLevel::Warning, EventKind::Zone, "Zone {label} special"),
        );
        assert_eq!(table.lookup(0, 9).map(|d| d.level), Some(EventLevel::Warning));
        assert_eq!(table.lookup(0, 10).map(|d| d.level), Some(EventLevel::Info));
    }

    #[test]
    fn test_partition_recipe() {
        let table = EventTable::new().with(
            24,
            None,
            EventDef::new(EventLevel::Critical, EventKind::Zone, "Zone {label} in alarm")
                .change(&[("presently_in_alarm", true)])
                .partition_change(&[("audible_alarm", true)]),
        );
        let event = table.render(raw(24, 3, 1, None), &NoLabels);
        assert_eq!(event.changes.len(), 2);
        assert_eq!(event.changes[1].container, Container::Partition);
        assert_eq!(event.changes[1].fields, record([("audible_alarm", true)]));
    }

    #[test]
    fn test_raw_event_from_record() {
        let rec = record([
            (
                "event",
                Value::Record(record([
                    ("major", 1u8),
                    ("minor", 5u8),
                    ("minor2", 0u8),
                    ("partition", 1u8),
                ])),
            ),
            ("time", Value::Time(None)),
        ]);
        let raw = RawEvent::from_record(&rec).unwrap();
        assert_eq!((raw.major, raw.minor, raw.partition), (1, 5, 1));
    }
}
