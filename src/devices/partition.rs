// MIT License - Copyright (c) 2026 Peter Wright
// Partitions and their derived arm state

use std::fmt;

use bitflags::bitflags;
use serde::Serialize;

use crate::codec::value::{Record, Value};

bitflags! {
    /// Partition status flags as reported in RAM and by live events.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PartitionFlags: u32 {
        /// Fire alarm in progress
        const FIRE_ALARM       = 1 << 0;
        /// Audible (bell) alarm in progress
        const AUDIBLE_ALARM    = 1 << 1;
        /// Silent alarm in progress
        const SILENT_ALARM     = 1 << 2;
        /// Alarm occurred and has not been cleared by disarming
        const WAS_IN_ALARM     = 1 << 3;
        /// Alarm in memory
        const ALARM_IN_MEMORY  = 1 << 4;
        /// Armed
        const ARM              = 1 << 5;
        /// Stay armed
        const ARM_STAY         = 1 << 6;
        /// Away armed
        const ARM_AWAY         = 1 << 7;
        /// Instant armed
        const ARM_INSTANT      = 1 << 8;
        /// Force armed
        const ARM_FORCE        = 1 << 9;
        /// Armed with entry delays cancelled
        const ARM_NO_ENTRY     = 1 << 10;
        /// Ready to arm
        const READY            = 1 << 11;
        /// Exit delay running
        const EXIT_DELAY       = 1 << 12;
        /// Entry delay running
        const ENTRY_DELAY      = 1 << 13;
        /// Trouble
        const TROUBLE          = 1 << 14;
        /// A zone in the partition is in trouble
        const ZONE_IN_TROUBLE  = 1 << 15;
        /// Programming in progress
        const PROGRAMMING      = 1 << 16;
        /// Keypad lockout
        const LOCKOUT          = 1 << 17;
        /// A zone is bypassed
        const ZONE_BYPASSED    = 1 << 18;
        /// A zone is tampered
        const ZONE_TAMPERED    = 1 << 19;
        /// A zone has a low battery
        const ZONE_LOW_BATTERY = 1 << 20;
        /// Fire loop trouble
        const ZONE_FIRE_LOOP_TROUBLE = 1 << 21;
        /// Zone supervision trouble
        const ZONE_SUPERVISION_TROUBLE = 1 << 22;
        /// Intellizone delay engaged
        const INTELLIZONE_DELAY = 1 << 23;
        /// Auto-arming engaged
        const AUTO_ARMING_ENGAGED = 1 << 24;
        /// Recent closing delay running
        const RECENT_CLOSING_DELAY = 1 << 25;
        /// Ready for stay-instant arming
        const STAY_INSTANT_READY = 1 << 26;
        /// Ready for force arming
        const FORCE_READY      = 1 << 27;
        /// Ready for bypass arming
        const BYPASS_READY     = 1 << 28;
        /// Inhibit ready
        const INHIBIT_READY    = 1 << 29;
        /// All zones closed
        const ALL_ZONES_CLOSED = 1 << 30;
        /// Alarm reporting cancelled on disarm
        const CANCEL_ALARM_REPORTING_ON_DISARMING = 1 << 31;
    }
}

/// Names of the 16 flags in the first half of a partition status entry, MSB-first.
pub const FIRST_HALF_FLAGS: [&str; 16] = [
    "fire_alarm",
    "audible_alarm",
    "silent_alarm",
    "was_in_alarm",
    "alarm_in_memory",
    "arm",
    "arm_stay",
    "arm_away",
    "arm_instant",
    "arm_force",
    "arm_no_entry",
    "ready",
    "exit_delay",
    "entry_delay",
    "trouble",
    "zone_in_trouble",
];

/// Names of the flags leading the last half of a partition status entry, MSB-first.
pub const LAST_HALF_FLAGS: [&str; 16] = [
    "programming",
    "lockout",
    "zone_bypassed",
    "zone_tampered",
    "zone_low_battery",
    "zone_fire_loop_trouble",
    "zone_supervision_trouble",
    "intellizone_delay",
    "auto_arming_engaged",
    "recent_closing_delay",
    "stay_instant_ready",
    "force_ready",
    "bypass_ready",
    "inhibit_ready",
    "all_zones_closed",
    "cancel_alarm_reporting_on_disarming",
];

impl PartitionFlags {
    /// Collect the known flags of a stored partition record.
    pub fn from_record(rec: &Record) -> Self {
        let mut flags = Self::empty();
        for (i, name) in FIRST_HALF_FLAGS.iter().chain(LAST_HALF_FLAGS.iter()).enumerate() {
            if rec.get(*name).and_then(Value::as_bool).unwrap_or(false) {
                flags |= Self::from_bits_retain(1 << i);
            }
        }
        flags
    }

    /// Whether any alarm condition holds.
    pub fn in_alarm(&self) -> bool {
        self.intersects(
            Self::AUDIBLE_ALARM | Self::SILENT_ALARM | Self::FIRE_ALARM | Self::WAS_IN_ALARM,
        )
    }
}

/// Derived partition state, as consumed upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionState {
    Disarmed,
    Pending,
    ArmedAway,
    ArmedHome,
    ArmedNight,
    Triggered,
}

impl PartitionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disarmed => "disarmed",
            Self::Pending => "pending",
            Self::ArmedAway => "armed_away",
            Self::ArmedHome => "armed_home",
            Self::ArmedNight => "armed_night",
            Self::Triggered => "triggered",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            Self::Disarmed,
            Self::Pending,
            Self::ArmedAway,
            Self::ArmedHome,
            Self::ArmedNight,
            Self::Triggered,
        ]
        .into_iter()
        .find(|s| s.as_str() == name)
    }
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute `(current_state, target_state)` from a flag tuple.
///
/// While an exit delay runs the target is the state the partition will be in
/// once the delay expires.
pub fn derive_state(flags: PartitionFlags) -> (PartitionState, PartitionState) {
    if flags.in_alarm() {
        return (PartitionState::Triggered, PartitionState::Triggered);
    }
    if !flags.contains(PartitionFlags::ARM) {
        return (PartitionState::Disarmed, PartitionState::Disarmed);
    }
    let armed = if flags.contains(PartitionFlags::ARM_STAY | PartitionFlags::ARM_NO_ENTRY) {
        PartitionState::ArmedNight
    } else if flags.contains(PartitionFlags::ARM_STAY) {
        PartitionState::ArmedHome
    } else {
        PartitionState::ArmedAway
    };
    if flags.contains(PartitionFlags::EXIT_DELAY) {
        (PartitionState::Pending, armed)
    } else {
        (armed, armed)
    }
}

/// Add `current_state` and `target_state` to a partition patch, computed from
/// the stored record merged with the patch.
pub fn with_derived_state(stored: Option<&Record>, patch: &Record) -> Record {
    let mut merged = stored.cloned().unwrap_or_default();
    merged.extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
    let (current, target) = derive_state(PartitionFlags::from_record(&merged));
    let mut out = patch.clone();
    out.insert("current_state".to_string(), Value::from(current.as_str()));
    out.insert("target_state".to_string(), Value::from(target.as_str()));
    out
}

/// A partition as seen by consumers.
#[derive(Debug, Clone)]
pub struct Partition {
    pub id: u32,
    pub label: String,
    pub key: String,
    pub flags: PartitionFlags,
    pub current_state: PartitionState,
    pub target_state: PartitionState,
}

impl Partition {
    pub fn from_record(id: u32, rec: &Record) -> Self {
        let flags = PartitionFlags::from_record(rec);
        let (derived_current, derived_target) = derive_state(flags);
        let state_of = |name: &str, fallback| {
            rec.get(name)
                .and_then(Value::as_str)
                .and_then(PartitionState::from_name)
                .unwrap_or(fallback)
        };
        Self {
            id,
            label: text_field(rec, "label").unwrap_or_else(|| format!("Partition {id}")),
            key: text_field(rec, "key").unwrap_or_else(|| format!("partition_{id}")),
            flags,
            current_state: state_of("current_state", derived_current),
            target_state: state_of("target_state", derived_target),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.flags.contains(PartitionFlags::ARM)
    }

    pub fn is_ready(&self) -> bool {
        self.flags.contains(PartitionFlags::READY)
    }

    pub fn in_alarm(&self) -> bool {
        self.flags.in_alarm()
    }
}

pub(crate) fn text_field(rec: &Record, name: &str) -> Option<String> {
    rec.get(name).and_then(Value::as_str).map(str::to_string)
}
