// MIT License - Copyright (c) 2026 Peter Wright
// Library for Paradox EVO, Spectra and Magellan panels
//
//! # paradox-bridge
//!
//! Serial-over-IP communication with Paradox alarm panels
//! (DIGIPLEX EVO 48/96/192/HD, Spectra SP and Magellan MG).
//!
//! The library logs in with the PC password, downloads labels and
//! definitions from EEPROM, polls the RAM status blocks and renders live
//! events. Every observed change reaches subscribers as a [`PanelEvent`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use paradox_bridge::{ArmMode, PanelConfig, PanelCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PanelConfig::builder()
//!         .host("192.168.0.50")
//!         .port(10000)
//!         .pc_password("0000")
//!         .build();
//!
//!     let panel = PanelCoordinator::new(config)?;
//!     let identity = panel.connect().await?;
//!     println!("Connected to {} ({})", identity.product, identity.serial_number);
//!
//!     let mut events = panel.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     panel.arm(1, ArmMode::Away).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     panel.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod charmap;
pub mod codec;
pub mod comm;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod devices;
pub mod error;
pub mod event;
pub mod event_map;
pub mod manager;
pub mod store;
pub mod transport;
pub mod variants;

// Re-exports for convenience
pub use codec::value::{Record, Value};
pub use config::{InventoryLimits, PanelConfig, PanelConfigBuilder};
pub use constants::{ArmMode, DoorCommand, PanicType, PartitionCommand, PgmCommand, ProductId};
pub use coordinator::PanelCoordinator;
pub use devices::{Module, Partition, PartitionState, Pgm, SystemStatus, User, Zone};
pub use error::{PanelErrorCode, ParadoxError, Result};
pub use event::{ConnectionState, EventReceiver, PanelEvent, PanelIdentity};
pub use event_map::{Event, EventLevel};
pub use store::{ChangeSet, Container, FieldChange, Key, Patch, Store};
pub use variants::{Action, Message, MessageKind, Panel};
