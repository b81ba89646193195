// MIT License - Copyright (c) 2026 Peter Wright
// Spectra SP and Magellan MG event groups

use crate::event_map::{EventDef, EventKind, EventLevel, EventTable};

use EventKind::{Module, Partition, Special, System, User, Zone};
use EventLevel::{Critical, Debug, Info, Warning};

fn def(level: EventLevel, kind: EventKind, message: &str) -> EventDef {
    EventDef::new(level, kind, message)
}

/// Partition status changes reported by group 2, by minor.
fn partition_status(table: EventTable) -> EventTable {
    let rows: [(u16, EventLevel, &str, &[(&str, bool)]); 10] = [
        (2, Critical, "Silent alarm in partition {label}", &[("silent_alarm", true)]),
        (3, Critical, "Buzzer alarm in partition {label}", &[("audible_alarm", true)]),
        (4, Critical, "Steady alarm in partition {label}", &[("audible_alarm", true)]),
        (5, Critical, "Pulsed alarm in partition {label}", &[("audible_alarm", true)]),
        (6, Critical, "Strobe in partition {label}", &[]),
        (7, Info, "Alarm stopped in partition {label}", &[("audible_alarm", false), ("silent_alarm", false)]),
        (11, Info, "Partition {label} disarmed", &[("arm", false), ("arm_stay", false), ("arm_away", false)]),
        (12, Info, "Partition {label} armed", &[("arm", true)]),
        (13, Info, "Entry delay started in partition {label}", &[("entry_delay", true)]),
        (14, Info, "Exit delay started in partition {label}", &[("exit_delay", true)]),
    ];
    rows.into_iter().fold(
        table.with(2, None, def(Debug, Partition, "Partition {label} status {minor}")),
        |table, (minor, level, message, recipe)| {
            table.with(2, Some(minor), def(level, Partition, message).partition_change(recipe))
        },
    )
}

/// The Spectra/Magellan event table, keyed by group and optionally minor.
pub fn event_table() -> EventTable {
    let table = EventTable::new()
        .with(0, None, def(Debug, Zone, "Zone {label} OK").change(&[("open", false)]))
        .with(1, None, def(Debug, Zone, "Zone {label} open").change(&[("open", true)]))
        .with(3, None, def(Info, Partition, "Bell status {minor} in partition {label}"))
        .with(5, None, def(Debug, Special, "Non-reportable event {minor}"))
        .with(7, None, def(Info, User, "User {label} code entered on keypad"))
        .with(
            9,
            None,
            def(Info, User, "Partition {partition} armed by user {label}")
                .tags(&["arm"])
                .partition_change(&[("arm", true)]),
        )
        .with(
            11,
            None,
            def(Info, User, "Partition {partition} disarmed by user {label}")
                .tags(&["disarm"])
                .partition_change(&[("arm", false)]),
        )
        .with(13, None, def(Info, Zone, "Zone {label} bypassed").change(&[("bypassed", true)]))
        .with(
            14,
            None,
            def(Critical, Zone, "Zone {label} in alarm")
                .tags(&["alarm"])
                .change(&[("presently_in_alarm", true), ("generated_alarm", true)])
                .partition_change(&[("audible_alarm", true)]),
        )
        .with(
            15,
            None,
            def(Critical, Zone, "Zone {label} fire alarm")
                .tags(&["alarm", "fire"])
                .change(&[("presently_in_alarm", true)])
                .partition_change(&[("fire_alarm", true)]),
        )
        .with(16, None, def(Info, Zone, "Zone {label} alarm restored").change(&[("presently_in_alarm", false)]))
        .with(17, None, def(Info, Zone, "Zone {label} fire alarm restored").change(&[("presently_in_alarm", false)]))
        .with(18, None, def(Critical, Partition, "Special alarm {minor} in partition {label}").tags(&["alarm"]))
        .with(19, None, def(Warning, Zone, "Zone {label} shut down").change(&[("shutted_down", true)]))
        .with(20, None, def(Warning, Zone, "Zone {label} tampered").tags(&["tamper"]).change(&[("tamper", true)]))
        .with(21, None, def(Info, Zone, "Zone {label} tamper restored").change(&[("tamper", false)]))
        .with(22, None, def(Warning, System, "Trouble {minor}").tags(&["trouble"]))
        .with(22, Some(1), def(Warning, System, "AC failure trouble").change(&[("ac_failure_trouble", true)]))
        .with(22, Some(2), def(Warning, System, "Battery failure trouble").change(&[("battery_failure_trouble", true)]))
        .with(23, None, def(Info, System, "Trouble {minor} restored"))
        .with(23, Some(1), def(Info, System, "AC failure trouble restored").change(&[("ac_failure_trouble", false)]))
        .with(
            23,
            Some(2),
            def(Info, System, "Battery failure trouble restored").change(&[("battery_failure_trouble", false)]),
        )
        .with(24, None, def(Warning, Module, "Module {label} trouble {minor2}").tags(&["trouble"]))
        .with(25, None, def(Info, Module, "Module {label} trouble {minor2} restored"))
        .with(26, None, def(Warning, Zone, "Zone {label} low battery").change(&[("low_battery", true)]))
        .with(
            27,
            None,
            def(Warning, Zone, "Zone {label} supervision trouble").change(&[("supervision_trouble", true)]),
        )
        .with(28, None, def(Info, Zone, "Zone {label} battery restored").change(&[("low_battery", false)]))
        .with(
            29,
            None,
            def(Info, Zone, "Zone {label} supervision restored").change(&[("supervision_trouble", false)]),
        )
        .with(30, None, def(Info, Special, "Special event {minor}"));
    partition_status(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::value::record;
    use crate::event_map::{NoLabels, RawEvent};
    use crate::store::{Container, Key};

    #[test]
    fn test_partition_status_minor() {
        let raw = RawEvent {
            major: 2,
            minor: 12,
            minor2: 0,
            partition: 1,
            time: None,
            module_serial: None,
            label: None,
        };
        let event = event_table().render(raw, &NoLabels);
        assert_eq!(event.message, "Partition 1 armed");
        assert_eq!(event.changes.len(), 1);
        assert_eq!(event.changes[0].container, Container::Partition);
        assert_eq!(event.changes[0].key, Key::Index(1));
        assert_eq!(event.changes[0].fields, record([("arm", true)]));
    }

    #[test]
    fn test_unlisted_minor_falls_back_to_group() {
        assert_eq!(event_table().lookup(2, 60).map(|d| d.level), Some(EventLevel::Debug));
    }
}
