// MIT License - Copyright (c) 2026 Peter Wright
// Bus modules and their trouble bits

use bitflags::bitflags;

use crate::codec::value::{Record, RecordExt};
use crate::devices::partition::text_field;

bitflags! {
    /// Trouble bits reported per bus module.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModuleTroubles: u8 {
        /// Auxiliary output trouble
        const AUX_TROUBLE     = 1 << 0;
        /// Battery failure
        const BATTERY_FAIL    = 1 << 1;
        /// AC power trouble
        const AC_TROUBLE      = 1 << 2;
        /// Printer trouble
        const PRINTER_TROUBLE = 1 << 3;
        /// Failed to communicate
        const FAIL_TO_COMM    = 1 << 4;
        /// Telephone line trouble
        const TLM_TROUBLE     = 1 << 5;
        /// ROM error
        const ROM_ERROR       = 1 << 6;
        /// Enclosure tamper
        const TAMPER          = 1 << 7;
    }
}

/// Names of the module trouble bits, MSB-first.
pub const MODULE_TROUBLE_FLAGS: [&str; 8] = [
    "aux_trouble",
    "battery_fail",
    "ac_trouble",
    "printer_trouble",
    "fail_to_comm",
    "tlm_trouble",
    "rom_error",
    "tamper",
];

impl ModuleTroubles {
    pub fn from_record(rec: &Record) -> Self {
        MODULE_TROUBLE_FLAGS
            .iter()
            .enumerate()
            .filter(|(_, name)| rec.flag(name))
            .fold(Self::empty(), |acc, (i, _)| acc | Self::from_bits_retain(1 << i))
    }
}

/// A module on the panel bus, keyed by bus address.
#[derive(Debug, Clone)]
pub struct Module {
    pub address: u32,
    pub label: String,
    pub key: String,
    pub troubles: ModuleTroubles,
}

impl Module {
    pub fn from_record(address: u32, rec: &Record) -> Self {
        Self {
            address,
            label: text_field(rec, "label").unwrap_or_else(|| format!("Module {address}")),
            key: text_field(rec, "key").unwrap_or_else(|| format!("module_{address}")),
            troubles: ModuleTroubles::from_record(rec),
        }
    }

    pub fn has_trouble(&self) -> bool {
        !self.troubles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::value::record;

    #[test]
    fn test_module_troubles() {
        let rec = record([("ac_trouble", true), ("tamper", true), ("rom_error", false)]);
        let module = Module::from_record(4, &rec);
        assert_eq!(module.troubles, ModuleTroubles::AC_TROUBLE | ModuleTroubles::TAMPER);
        assert!(module.has_trouble());
        assert_eq!(module.key, "module_4");
    }
}
