// MIT License - Copyright (c) 2026 Peter Wright
// Property checks for frame encoding and state derivation

use std::collections::BTreeMap;

use proptest::prelude::*;

use paradox_bridge::charmap::Charmap;
use paradox_bridge::codec::grammar::{dict_array, flag_array, Context};
use paradox_bridge::codec::value::record;
use paradox_bridge::codec::{checksum, verify_checksum};
use paradox_bridge::devices::partition::derive_state;
use paradox_bridge::devices::{PartitionFlags, PartitionState};
use paradox_bridge::variants::memory::zone_status;
use paradox_bridge::variants::EvoPanel;
use paradox_bridge::{Container, Panel, ProductId, Store, Value};

proptest! {
    #[test]
    fn test_sealed_frames_verify(body in proptest::collection::vec(any::<u8>(), 1..64)) {
        let mut frame = body.clone();
        frame.push(checksum(&body));
        prop_assert!(verify_checksum(&frame).is_ok());

        let last = frame.len() - 1;
        frame[last] = frame[last].wrapping_add(1);
        prop_assert!(verify_checksum(&frame).is_err());
    }

    #[test]
    fn test_eeprom_request_carries_high_address_bits(address in 0u32..=0x3FFFF, length in 1usize..=64) {
        let panel = EvoPanel::new(ProductId::Evo192, Charmap::default());
        let frame = panel.request_eeprom(address, length).unwrap();
        prop_assert_eq!(frame.len(), 8);
        prop_assert_eq!(frame[0], 0x50);
        prop_assert_eq!(frame[2] & 0x80, 0);
        prop_assert_eq!(u32::from(frame[2] & 0x03), (address >> 16) & 0x3);
        prop_assert_eq!(u32::from(frame[4]) << 8 | u32::from(frame[5]), address & 0xFFFF);
        prop_assert_eq!(usize::from(frame[6]), length);
        prop_assert_eq!(frame[7], checksum(&frame[..7]));
    }

    #[test]
    fn test_flag_array_keys_and_bytes(data in proptest::collection::vec(any::<u8>(), 4), first in 1u32..40) {
        let grammar = flag_array(32, first);
        let (value, used) = grammar.parse(&data, &mut Context::default()).unwrap();
        prop_assert_eq!(used, 4);
        let value = value.unwrap();
        let map = value.as_map().unwrap();
        let keys: Vec<u32> = map.keys().copied().collect();
        prop_assert_eq!(keys, (first..first + 32).collect::<Vec<_>>());

        // The first index is the least significant bit of the first byte.
        prop_assert_eq!(map[&first].as_bool(), Some(data[0] & 1 == 1));

        let mut out = Vec::new();
        grammar.build(Some(&value), &mut out, &mut Context::default()).unwrap();
        prop_assert_eq!(out, data);
    }

    #[test]
    fn test_dict_array_keys_and_bytes(data in proptest::collection::vec(any::<u8>(), 6), first in 1u32..100) {
        let grammar = dict_array(6, first, zone_status());
        let (value, used) = grammar.parse(&data, &mut Context::default()).unwrap();
        prop_assert_eq!(used, 6);
        let value = value.unwrap();
        let keys: Vec<u32> = value.as_map().unwrap().keys().copied().collect();
        prop_assert_eq!(keys, (first..first + 6).collect::<Vec<_>>());

        let mut out = Vec::new();
        grammar.build(Some(&value), &mut out, &mut Context::default()).unwrap();
        prop_assert_eq!(out, data);
    }

    #[test]
    fn test_partition_state_table(bits in any::<u32>()) {
        let flags = PartitionFlags::from_bits_truncate(bits);
        let (current, target) = derive_state(flags);
        if flags.in_alarm() {
            prop_assert_eq!((current, target), (PartitionState::Triggered, PartitionState::Triggered));
        } else if !flags.contains(PartitionFlags::ARM) {
            prop_assert_eq!((current, target), (PartitionState::Disarmed, PartitionState::Disarmed));
        } else if flags.contains(PartitionFlags::EXIT_DELAY) {
            prop_assert_eq!(current, PartitionState::Pending);
            prop_assert_ne!(target, PartitionState::Pending);
        } else {
            prop_assert_eq!(current, target);
            prop_assert!(matches!(
                current,
                PartitionState::ArmedAway | PartitionState::ArmedHome | PartitionState::ArmedNight
            ));
        }
    }

    #[test]
    fn test_store_reports_exactly_the_differences(
        first in proptest::collection::btree_map("[a-d]", any::<bool>(), 0..4),
        second in proptest::collection::btree_map("[a-d]", any::<bool>(), 0..4),
    ) {
        let mut store = Store::new();
        let to_record = |m: &BTreeMap<String, bool>| {
            record(m.iter().map(|(k, v)| (k.clone(), Value::Bool(*v))))
        };
        store.update_container_object(Container::Zone, 1u32, to_record(&first)).unwrap();

        let changes = store
            .update_container_object(Container::Zone, 1u32, to_record(&second))
            .unwrap();
        let expected: Vec<&String> = second
            .iter()
            .filter(|(k, v)| first.get(*k) != Some(*v))
            .map(|(k, _)| k)
            .collect();
        match changes {
            None => prop_assert!(expected.is_empty()),
            Some(cs) => {
                let fields: Vec<&String> = cs.changes.iter().map(|c| &c.field).collect();
                prop_assert_eq!(fields, expected);
            }
        }
    }
}
