// MIT License - Copyright (c) 2026 Peter Wright
// Events published to subscribers

use std::fmt;

use serde::Serialize;

use crate::event_map::Event;
use crate::store::ChangeSet;

/// Coordinator lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    LoggingIn,
    DownloadingInventory,
    Running,
    Disconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::LoggingIn => "logging_in",
            Self::DownloadingInventory => "downloading_inventory",
            Self::Running => "running",
            Self::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the panel reported during login.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelIdentity {
    pub product: String,
    pub product_id: u8,
    pub panel_id: u16,
    pub firmware: String,
    pub serial_number: String,
}

/// All events that can be emitted by the coordinator.
///
/// Users subscribe via `coordinator.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<PanelEvent>`.
#[derive(Debug, Clone)]
pub enum PanelEvent {
    /// Coordinator moved to a new lifecycle state
    StateChanged(ConnectionState),
    /// Login accepted by the panel
    Connected(PanelIdentity),
    /// Labels and definitions loaded, polling starts
    InventoryComplete,
    /// An object in the store took new values
    Change(ChangeSet),
    /// A live event rendered through the variant's event table
    Live(Event),
    /// Session ended, with the reason when it was not an orderly shutdown
    Disconnected { reason: Option<String> },
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<PanelEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<PanelEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
