// MIT License - Copyright (c) 2026 Peter Wright
// DIGIPLEX EVO event groups

use crate::event_map::{EventDef, EventKind, EventLevel, EventTable};

use EventKind::{Door, Module, Partition, Special, System, User, Zone};
use EventLevel::{Critical, Debug, Info, Warning};

/// System troubles reported by group 36 and restored by group 37, by minor.
const TROUBLES: [(u16, &str, &str); 8] = [
    (0, "tlm_trouble", "TLM"),
    (1, "ac_failure_trouble", "AC failure"),
    (2, "battery_failure_trouble", "Battery failure"),
    (3, "aux_current_limit_trouble", "Auxiliary current limit"),
    (4, "bell_current_limit_trouble", "Bell current limit"),
    (5, "bell_absent_trouble", "Bell absent"),
    (6, "time_lost_trouble", "Clock time lost"),
    (7, "fail_to_communicate_pc", "Fail to communicate with PC"),
];

fn def(level: EventLevel, kind: EventKind, message: &str) -> EventDef {
    EventDef::new(level, kind, message)
}

fn arming(table: EventTable, major: u8, how: &str) -> EventTable {
    table.with(
        major,
        None,
        def(Info, User, &format!("Partition {{partition}} armed by user {{label}} {how}"))
            .tags(&["arm"])
            .partition_change(&[("arm", true)]),
    )
}

fn disarming(table: EventTable, major: u8, how: &str, after_alarm: bool) -> EventTable {
    let message = if after_alarm {
        format!("Partition {{partition}} disarmed after alarm by user {{label}} {how}")
    } else {
        format!("Partition {{partition}} disarmed by user {{label}} {how}")
    };
    let mut recipe = vec![("arm", false), ("arm_stay", false), ("arm_away", false)];
    if after_alarm {
        recipe.extend([("audible_alarm", false), ("silent_alarm", false), ("fire_alarm", false)]);
    }
    table.with(
        major,
        None,
        def(Info, User, &message).tags(&["disarm"]).partition_change(&recipe),
    )
}

/// The EVO event table, keyed by group and optionally minor.
pub fn event_table() -> EventTable {
    let mut table = EventTable::new()
        .with(0, None, def(Debug, Zone, "Zone {label} OK").change(&[("open", false)]))
        .with(1, None, def(Debug, Zone, "Zone {label} open").change(&[("open", true)]))
        .with(2, None, def(Warning, Zone, "Zone {label} tampered").tags(&["tamper"]).change(&[("tamper", true)]))
        .with(
            3,
            None,
            def(Warning, Zone, "Zone {label} in fire loop trouble")
                .tags(&["trouble"])
                .change(&[("fire_loop_trouble", true)]),
        )
        .with(4, None, def(Debug, Special, "Non-reportable event {minor}"))
        .with(5, None, def(Info, User, "User {label} code entered on keypad"))
        .with(6, None, def(Info, Door, "User access granted on door {label}").tags(&["access"]))
        .with(7, None, def(Info, User, "User {label} entered bypass programming"));

    table = arming(table, 9, "with master code");
    table = arming(table, 10, "with user code");
    table = table
        .with(11, None, def(Info, Partition, "Partition {label} armed with keyswitch").partition_change(&[("arm", true)]))
        .with(12, None, def(Info, Partition, "Partition {label} special arming {minor}").tags(&["arm"]))
        .with(12, Some(0), def(Info, Partition, "Partition {label} auto armed").partition_change(&[("arm", true)]))
        .with(12, Some(4), def(Info, Partition, "Partition {label} quick armed").partition_change(&[("arm", true)]));
    table = disarming(table, 13, "with master code", false);
    table = disarming(table, 14, "with user code", false);
    table = table.with(
        15,
        None,
        def(Info, Partition, "Partition {label} disarmed with keyswitch").partition_change(&[("arm", false)]),
    );
    table = disarming(table, 16, "with master code", true);
    table = disarming(table, 17, "with user code", true);
    table = table
        .with(
            18,
            None,
            def(Info, Partition, "Partition {label} disarmed after alarm with keyswitch")
                .partition_change(&[("arm", false), ("audible_alarm", false)]),
        )
        .with(19, None, def(Info, User, "Alarm in partition {partition} cancelled by user {label}"))
        .with(20, None, def(Info, User, "Alarm in partition {partition} cancelled by user {label}"))
        .with(21, None, def(Info, Partition, "Alarm in partition {label} cancelled with keyswitch"))
        .with(22, None, def(Info, Partition, "Partition {label} special disarming {minor}"))
        .with(23, None, def(Info, Zone, "Zone {label} bypassed").change(&[("bypassed", true)]))
        .with(
            24,
            None,
            def(Critical, Zone, "Zone {label} in alarm")
                .tags(&["alarm"])
                .change(&[("presently_in_alarm", true), ("generated_alarm", true)])
                .partition_change(&[("audible_alarm", true)]),
        )
        .with(
            25,
            None,
            def(Critical, Zone, "Zone {label} fire alarm")
                .tags(&["alarm", "fire"])
                .change(&[("presently_in_alarm", true), ("generated_alarm", true)])
                .partition_change(&[("fire_alarm", true)]),
        )
        .with(26, None, def(Info, Zone, "Zone {label} alarm restored").change(&[("presently_in_alarm", false)]))
        .with(27, None, def(Info, Zone, "Zone {label} fire alarm restored").change(&[("presently_in_alarm", false)]))
        .with(28, None, def(Info, User, "Early to disarm by user {label}"))
        .with(29, None, def(Info, User, "Late to disarm by user {label}"))
        .with(30, None, def(Critical, Partition, "Special alarm {minor} in partition {label}").tags(&["alarm"]))
        .with(
            30,
            Some(0),
            def(Critical, Partition, "Emergency panic in partition {label}")
                .tags(&["alarm", "panic"])
                .partition_change(&[("audible_alarm", true)]),
        )
        .with(
            30,
            Some(1),
            def(Critical, Partition, "Medical panic in partition {label}")
                .tags(&["alarm", "panic"])
                .partition_change(&[("audible_alarm", true)]),
        )
        .with(
            30,
            Some(2),
            def(Critical, Partition, "Fire panic in partition {label}")
                .tags(&["alarm", "panic", "fire"])
                .partition_change(&[("fire_alarm", true)]),
        )
        .with(
            31,
            None,
            def(Critical, User, "Duress alarm by user {label}")
                .tags(&["alarm", "duress"])
                .partition_change(&[("silent_alarm", true)]),
        )
        .with(32, None, def(Warning, Zone, "Zone {label} shut down").change(&[("shutted_down", true)]))
        .with(33, None, def(Warning, Zone, "Zone {label} tamper").tags(&["tamper"]).change(&[("tamper", true)]))
        .with(34, None, def(Info, Zone, "Zone {label} tamper restored").change(&[("tamper", false)]))
        .with(35, None, def(Warning, Special, "Special tamper {minor}").tags(&["tamper"]))
        .with(36, None, def(Warning, System, "Trouble {minor}").tags(&["trouble"]))
        .with(37, None, def(Info, System, "Trouble {minor} restored"))
        .with(38, None, def(Warning, Module, "Module {label} trouble {minor2}").tags(&["trouble"]))
        .with(39, None, def(Info, Module, "Module {label} trouble {minor2} restored"))
        .with(40, None, def(Warning, Special, "Fail to communicate on telephone number {minor}").tags(&["trouble"]))
        .with(41, None, def(Warning, Zone, "Zone {label} low battery").change(&[("low_battery", true)]))
        .with(
            42,
            None,
            def(Warning, Zone, "Zone {label} supervision trouble").change(&[("supervision_trouble", true)]),
        )
        .with(43, None, def(Info, Zone, "Zone {label} battery restored").change(&[("low_battery", false)]))
        .with(
            44,
            None,
            def(Info, Zone, "Zone {label} supervision restored").change(&[("supervision_trouble", false)]),
        )
        .with(45, None, def(Info, Special, "Special event {minor}"))
        .with(45, Some(0), def(Warning, Special, "Power up after total power down"))
        .with(45, Some(1), def(Info, Special, "Software reset"))
        .with(45, Some(2), def(Info, Special, "Test report"))
        .with(46, None, def(Info, User, "Early to arm by user {label}"))
        .with(47, None, def(Info, User, "Late to arm by user {label}"))
        .with(48, None, def(Info, Special, "Utility key {minor} pressed"))
        .with(49, None, def(Info, Door, "Request for exit on door {label}"))
        .with(50, None, def(Warning, Door, "Access denied on door {label}").tags(&["access"]))
        .with(51, None, def(Warning, Door, "Door {label} left open").change(&[("left_open", true)]))
        .with(52, None, def(Critical, Door, "Door {label} forced").tags(&["alarm"]).change(&[("forced", true)]))
        .with(53, None, def(Info, Door, "Door {label} left open restored").change(&[("left_open", false)]))
        .with(54, None, def(Info, Door, "Door {label} forced restored").change(&[("forced", false)]))
        .with(55, None, def(Info, Zone, "Intellizone {label} triggered"))
        .with(56, None, def(Info, Zone, "Zone {label} excluded on force arming"))
        .with(57, None, def(Info, Zone, "Zone {label} returned to armed status"))
        .with(58, None, def(Info, Module, "New module {label} assigned on bus"))
        .with(59, None, def(Warning, Module, "Module {label} removed from bus"));

    for (minor, name, text) in TROUBLES {
        table = table
            .with(
                36,
                Some(minor),
                def(Warning, System, &format!("{text} trouble")).tags(&["trouble"]).change(&[(name, true)]),
            )
            .with(37, Some(minor), def(Info, System, &format!("{text} trouble restored")).change(&[(name, false)]));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::value::record;
    use crate::event_map::{NoLabels, RawEvent};
    use crate::store::{Container, Key};

    fn raw(major: u8, minor: u16, partition: u8) -> RawEvent {
        RawEvent {
            major,
            minor,
            minor2: 0,
            partition,
            time: None,
            module_serial: None,
            label: None,
        }
    }

    #[test]
    fn test_groups_cover_the_six_bit_range_sparsely() {
        let table = event_table();
        assert!(table.lookup(0, 99).is_some());
        assert!(table.lookup(59, 1).is_some());
        assert!(table.lookup(60, 0).is_none());
    }

    #[test]
    fn test_trouble_changes_system_entry() {
        let event = event_table().render(raw(36, 1, 0), &NoLabels);
        assert_eq!(event.message, "AC failure trouble");
        assert_eq!(event.changes[0].container, Container::System);
        assert_eq!(event.changes[0].key, Key::from("troubles"));
        assert_eq!(event.changes[0].fields, record([("ac_failure_trouble", true)]));
    }

    #[test]
    fn test_arming_by_user_patches_partition() {
        let event = event_table().render(raw(10, 3, 2), &NoLabels);
        assert_eq!(event.message, "Partition 2 armed by user 3 with user code");
        assert_eq!(event.changes.len(), 1);
        assert_eq!(event.changes[0].key, Key::Index(2));
        assert_eq!(event.changes[0].fields, record([("arm", true)]));
    }

    #[test]
    fn test_zone_alarm_recipe() {
        let event = event_table().render(raw(24, 3, 1), &NoLabels);
        assert_eq!(event.level, EventLevel::Critical);
        assert_eq!(event.changes.len(), 2);
        assert_eq!(event.changes[1].fields, record([("audible_alarm", true)]));
    }
}
