// MIT License - Copyright (c) 2026 Peter Wright
// Record layouts shared by the EVO and Spectra memory maps

use crate::codec::grammar::{
    bits, field, flag, flag_array, flag_bits, int_bits, pad_bits, structure, u8, Grammar,
    PartitionStatusLayout,
};
use crate::devices::module::MODULE_TROUBLE_FLAGS;
use crate::devices::partition::{FIRST_HALF_FLAGS, LAST_HALF_FLAGS};
use crate::devices::pgm::PGM_FLAGS;
use crate::devices::system::trouble_names;
use crate::devices::user::USER_OPTION_FLAGS;
use crate::devices::zone::{ZONE_OPTION_FLAGS, ZONE_STATUS_FLAGS};

/// Four groups of eight trouble flags.
pub fn troubles() -> Grammar {
    bits(trouble_names().map(flag).collect())
}

/// Main supply voltage.
pub fn vdc() -> Grammar {
    Grammar::Scaled {
        factor: (20.3 - 1.4) / 255.0,
        offset: 1.4,
    }
}

/// Battery and DC output voltages.
pub fn battery() -> Grammar {
    Grammar::Scaled {
        factor: 22.8 / 255.0,
        offset: 0.0,
    }
}

pub fn zone_status() -> Grammar {
    bits(flag_bits(&ZONE_STATUS_FLAGS))
}

/// Flags, a reserved byte and the remaining pulse time.
pub fn pgm_status() -> Grammar {
    let mut fields = flag_bits(&PGM_FLAGS);
    fields.extend([pad_bits(3), pad_bits(8), int_bits("time_left_seconds", 16)]);
    bits(fields)
}

/// The flag byte alone, as the Spectra status blocks carry it.
pub fn pgm_flags() -> Grammar {
    let mut fields = flag_bits(&PGM_FLAGS);
    fields.push(pad_bits(3));
    bits(fields)
}

pub fn module_status() -> Grammar {
    bits(flag_bits(&MODULE_TROUBLE_FLAGS))
}

pub fn partition_status(size: usize) -> Grammar {
    let mut last_half = flag_bits(&LAST_HALF_FLAGS);
    last_half.push(pad_bits(16));
    Grammar::PartitionStatus(Box::new(PartitionStatusLayout {
        size,
        first_half: flag_bits(&FIRST_HALF_FLAGS),
        last_half,
    }))
}

/// Both halves of one partition without the trailing padding.
pub fn compact_partition_status() -> Grammar {
    let mut fields = flag_bits(&FIRST_HALF_FLAGS);
    fields.extend(flag_bits(&LAST_HALF_FLAGS));
    bits(fields)
}

pub fn zone_definition() -> Grammar {
    structure(vec![
        field("definition", u8()),
        field("partition", u8()),
        field("options", bits(flag_bits(&ZONE_OPTION_FLAGS))),
        field("_reserved", Grammar::Padding(1)),
    ])
}

/// PIN digits, option bits, partition access and three reserved bytes.
pub fn user_definition() -> Grammar {
    structure(vec![
        field("code", Grammar::Bytes(3)),
        field("options", bits(flag_bits(&USER_OPTION_FLAGS))),
        field("partitions", flag_array(8, 1)),
        field("_reserved", Grammar::Padding(3)),
    ])
}
