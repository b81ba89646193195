// MIT License - Copyright (c) 2026 Peter Wright
// Zones

use bitflags::bitflags;

use crate::codec::value::{Record, RecordExt, Value};
use crate::devices::partition::text_field;

bitflags! {
    /// Zone runtime flags.
    ///
    /// `open`, `tamper` and `low_battery` come from per-zone bitmaps; the rest
    /// from the per-zone status byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ZoneFlags: u16 {
        /// Zone generated an alarm
        const GENERATED_ALARM             = 1 << 0;
        /// Zone is presently in alarm
        const PRESENTLY_IN_ALARM          = 1 << 1;
        /// Zone started the entry delay
        const ACTIVATED_ENTRY_DELAY       = 1 << 2;
        /// Zone started the intellizone delay
        const ACTIVATED_INTELLIZONE_DELAY = 1 << 3;
        /// Zone is bypassed
        const BYPASSED                    = 1 << 4;
        /// Zone was shut down after too many alarms
        const SHUTTED_DOWN                = 1 << 5;
        /// Transmission delay running
        const TX_DELAY                    = 1 << 6;
        /// Wireless supervision lost
        const SUPERVISION_TROUBLE         = 1 << 7;
        /// Zone is open
        const OPEN                        = 1 << 8;
        /// Zone is tampered
        const TAMPER                      = 1 << 9;
        /// Wireless zone has a low battery
        const LOW_BATTERY                 = 1 << 10;
    }
}

/// Names of the per-zone status byte bits, MSB-first.
pub const ZONE_STATUS_FLAGS: [&str; 8] = [
    "generated_alarm",
    "presently_in_alarm",
    "activated_entry_delay",
    "activated_intellizone_delay",
    "bypassed",
    "shutted_down",
    "tx_delay",
    "supervision_trouble",
];

/// Names of the zone definition option bits, MSB-first.
pub const ZONE_OPTION_FLAGS: [&str; 8] = [
    "auto_zone_shutdown",
    "bypass_enabled",
    "stay_zone",
    "force_zone",
    "intellizone",
    "delay_before_transmission",
    "double_knock",
    "supervised",
];

const ZONE_FLAG_NAMES: [(&str, ZoneFlags); 11] = [
    ("generated_alarm", ZoneFlags::GENERATED_ALARM),
    ("presently_in_alarm", ZoneFlags::PRESENTLY_IN_ALARM),
    ("activated_entry_delay", ZoneFlags::ACTIVATED_ENTRY_DELAY),
    ("activated_intellizone_delay", ZoneFlags::ACTIVATED_INTELLIZONE_DELAY),
    ("bypassed", ZoneFlags::BYPASSED),
    ("shutted_down", ZoneFlags::SHUTTED_DOWN),
    ("tx_delay", ZoneFlags::TX_DELAY),
    ("supervision_trouble", ZoneFlags::SUPERVISION_TROUBLE),
    ("open", ZoneFlags::OPEN),
    ("tamper", ZoneFlags::TAMPER),
    ("low_battery", ZoneFlags::LOW_BATTERY),
];

impl ZoneFlags {
    pub fn from_record(rec: &Record) -> Self {
        ZONE_FLAG_NAMES
            .iter()
            .filter(|(name, _)| rec.flag(name))
            .fold(Self::empty(), |acc, (_, flag)| acc | *flag)
    }

    /// Get the flags that changed between old and new status.
    pub fn changed(old: Self, new: Self) -> Self {
        old ^ new
    }
}

/// Human-readable name of a zone definition code.
pub fn definition_name(code: u8) -> &'static str {
    match code {
        0 => "disabled",
        1 => "entry_delay_1",
        2 => "entry_delay_2",
        3 => "entry_delay_1_full_arm",
        4 => "entry_delay_2_full_arm",
        5 => "follow",
        6 => "follow_full_arm",
        7 => "instant",
        8 => "instant_full_arm",
        9 => "24h_buzzer",
        10 => "24h_burglary",
        11 => "24h_holdup",
        12 => "24h_gas",
        13 => "24h_heat",
        14 => "24h_water",
        15 => "24h_freeze",
        16 => "24h_panic",
        17 => "follow_no_entry_delay",
        18 => "24h_fire_delayed",
        19 => "24h_fire_standard",
        _ => "unknown",
    }
}

/// A single zone as seen by consumers.
#[derive(Debug, Clone)]
pub struct Zone {
    pub id: u32,
    pub label: String,
    pub key: String,
    /// Definition code from EEPROM; 0 means the zone is not used.
    pub definition: u8,
    pub partition: u32,
    pub options: Vec<&'static str>,
    pub flags: ZoneFlags,
}

impl Zone {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            label: format!("Zone {id}"),
            key: format!("zone_{id}"),
            definition: 0,
            partition: 1,
            options: Vec::new(),
            flags: ZoneFlags::empty(),
        }
    }

    pub fn from_record(id: u32, rec: &Record) -> Self {
        let mut zone = Self::new(id);
        if let Some(label) = text_field(rec, "label") {
            zone.label = label;
        }
        if let Some(key) = text_field(rec, "key") {
            zone.key = key;
        }
        zone.definition = rec.u8("definition").unwrap_or(0);
        zone.partition = rec.int("partition").map(|p| p as u32).unwrap_or(1);
        if let Some(options) = rec.get("options").and_then(Value::as_record) {
            zone.options = ZONE_OPTION_FLAGS
                .iter()
                .copied()
                .filter(|name| options.flag(name))
                .collect();
        }
        zone.flags = ZoneFlags::from_record(rec);
        zone
    }

    pub fn definition_name(&self) -> &'static str {
        definition_name(self.definition)
    }

    pub fn is_used(&self) -> bool { self.definition != 0 }
    pub fn is_open(&self) -> bool { self.flags.contains(ZoneFlags::OPEN) }
    pub fn is_tamper(&self) -> bool { self.flags.contains(ZoneFlags::TAMPER) }
    pub fn is_bypassed(&self) -> bool { self.flags.contains(ZoneFlags::BYPASSED) }
    pub fn is_low_battery(&self) -> bool { self.flags.contains(ZoneFlags::LOW_BATTERY) }

    pub fn in_alarm(&self) -> bool {
        self.flags.contains(ZoneFlags::PRESENTLY_IN_ALARM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::value::record;

    #[test]
    fn test_zone_flags_from_record() {
        let rec = record([("open", true), ("bypassed", true), ("tamper", false)]);
        let flags = ZoneFlags::from_record(&rec);
        assert_eq!(flags, ZoneFlags::OPEN | ZoneFlags::BYPASSED);
    }

    #[test]
    fn test_zone_changed_flags() {
        let old = ZoneFlags::OPEN | ZoneFlags::BYPASSED;
        let new = ZoneFlags::BYPASSED | ZoneFlags::TAMPER;
        let changed = ZoneFlags::changed(old, new);
        assert!(changed.contains(ZoneFlags::OPEN));
        assert!(changed.contains(ZoneFlags::TAMPER));
        assert!(!changed.contains(ZoneFlags::BYPASSED));
    }

    #[test]
    fn test_zone_view_from_record() {
        let rec = record([
            ("label", Value::from("Living room")),
            ("key", Value::from("Living_room")),
            ("definition", Value::Int(7)),
            ("partition", Value::Int(2)),
            (
                "options",
                Value::Record(record([("bypass_enabled", true), ("stay_zone", true)])),
            ),
            ("open", Value::Bool(true)),
        ]);
        let zone = Zone::from_record(5, &rec);
        assert_eq!(zone.label, "Living room");
        assert_eq!(zone.partition, 2);
        assert_eq!(zone.definition_name(), "instant");
        assert_eq!(zone.options, vec!["bypass_enabled", "stay_zone"]);
        assert!(zone.is_used());
        assert!(zone.is_open());
        assert!(!zone.in_alarm());
    }

    #[test]
    fn test_unused_zone_defaults() {
        let zone = Zone::from_record(9, &Record::new());
        assert_eq!(zone.key, "zone_9");
        assert!(!zone.is_used());
        assert_eq!(zone.definition_name(), "disabled");
    }
}
