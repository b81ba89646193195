// MIT License - Copyright (c) 2026 Peter Wright
// Panel wide trouble and clock status

use chrono::NaiveDateTime;

use crate::codec::value::{Record, RecordExt, Value};

/// Panel-wide trouble names, four groups of eight, MSB-first.
pub const TROUBLE_GROUPS: [[&str; 8]; 4] = [
    [
        "system_trouble",
        "dialer_trouble",
        "module_trouble",
        "bus_trouble",
        "zone_tamper_trouble",
        "zone_low_battery_trouble",
        "zone_fault_trouble",
        "time_lost_trouble",
    ],
    [
        "ac_failure_trouble",
        "battery_failure_trouble",
        "aux_current_limit_trouble",
        "bell_current_limit_trouble",
        "bell_absent_trouble",
        "rom_error_trouble",
        "future_use_trouble",
        "full_event_buffer_trouble",
    ],
    [
        "tlm_trouble",
        "fail_to_communicate_1",
        "fail_to_communicate_2",
        "fail_to_communicate_3",
        "fail_to_communicate_4",
        "fail_to_communicate_pc",
        "gsm_trouble",
        "ip_trouble",
    ],
    [
        "module_tamper_trouble",
        "module_rom_error_trouble",
        "module_tlm_trouble",
        "module_fail_to_communicate_trouble",
        "module_printer_trouble",
        "module_ac_trouble",
        "module_battery_trouble",
        "module_aux_trouble",
    ],
];

/// All trouble names in wire order.
pub fn trouble_names() -> impl Iterator<Item = &'static str> {
    TROUBLE_GROUPS.iter().flat_map(|group| group.iter().copied())
}

/// Panel-wide status assembled from the `system` container.
#[derive(Debug, Clone, Default)]
pub struct SystemStatus {
    pub troubles: Vec<&'static str>,
    pub vdc: Option<f64>,
    pub battery: Option<f64>,
    pub dc: Option<f64>,
    pub time: Option<NaiveDateTime>,
    pub event_pointer: Option<u64>,
}

impl SystemStatus {
    /// Build from the `troubles`, `power`, `date` and `events` entries.
    pub fn from_records(
        troubles: Option<&Record>,
        power: Option<&Record>,
        date: Option<&Record>,
        events: Option<&Record>,
    ) -> Self {
        let voltage = |name: &str| power.and_then(|p| p.get(name)).and_then(Value::as_f64);
        Self {
            troubles: troubles
                .map(|t| trouble_names().filter(|name| t.flag(name)).collect())
                .unwrap_or_default(),
            vdc: voltage("vdc"),
            battery: voltage("battery_vdc"),
            dc: voltage("dc"),
            time: match date.and_then(|d| d.get("time")) {
                Some(Value::Time(t)) => *t,
                _ => None,
            },
            event_pointer: events.and_then(|e| e.int("event_pointer").ok()),
        }
    }

    pub fn has_trouble(&self) -> bool {
        !self.troubles.is_empty()
    }
}
