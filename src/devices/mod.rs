// MIT License - Copyright (c) 2026 Peter Wright
// Typed views of stored panel objects

pub mod module;
pub mod partition;
pub mod pgm;
pub mod system;
pub mod user;
pub mod zone;

pub use module::{Module, ModuleTroubles};
pub use partition::{derive_state, Partition, PartitionFlags, PartitionState};
pub use pgm::{Pgm, PgmFlags};
pub use system::SystemStatus;
pub use user::{User, UserOptions};
pub use zone::{Zone, ZoneFlags};
