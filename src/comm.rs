// MIT License - Copyright (c) 2026 Peter Wright
// Login handshake, memory reads and inventory download

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::NaiveDateTime;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::charmap::Charmap;
use crate::codec::value::{Record, RecordExt, Value};
use crate::config::PanelConfig;
use crate::error::{PanelErrorCode, ParadoxError, Result};
use crate::event::{ConnectionState, PanelIdentity};
use crate::manager::MessageManager;
use crate::store::{Container, Patch};
use crate::transport::{Connection, PanelStream};
use crate::variants::neutral::{initiate_communication, start_communication};
use crate::variants::{create_panel, Action, DefinitionBlock, LabelBlock, Message, MessageKind, Panel};

/// Attempts per memory chunk before the read fails.
const READ_ATTEMPTS: u32 = 3;

/// One logged-in conversation with a panel.
///
/// Requests of the same command class are serialized; the reply matcher
/// is registered before the request is written.
pub struct PanelComm {
    config: PanelConfig,
    manager: MessageManager,
    connection: Connection,
    panel: Arc<dyn Panel>,
    identity: Option<PanelIdentity>,
    locks: [Mutex<()>; 16],
}

impl PanelComm {
    /// Wrap a freshly opened stream. Until [`PanelComm::login`] succeeds only
    /// the handshake frames decode.
    pub async fn open(
        stream: Box<dyn PanelStream>,
        config: PanelConfig,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        let manager = MessageManager::new(config.queue_high_water);
        let panel = manager.parser().await;
        let connection = Connection::open(stream, Default::default(), manager.sink(), state);
        connection.set_variable_framing(panel.variable_framing());
        Self {
            config,
            manager,
            connection,
            panel,
            identity: None,
            locks: std::array::from_fn(|_| Mutex::new(())),
        }
    }

    pub fn manager(&self) -> &MessageManager {
        &self.manager
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn panel(&self) -> Arc<dyn Panel> {
        self.panel.clone()
    }

    pub fn identity(&self) -> Option<&PanelIdentity> {
        self.identity.as_ref()
    }

    /// Send `frame` and wait for the reply `accept` picks, or an `ErrorMessage`.
    async fn request<F>(&self, frame: Bytes, accept: F, limit: Duration, what: &str) -> Result<Message>
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        let class = usize::from(frame.first().copied().unwrap_or(0) >> 4);
        let _guard = self.locks[class].lock().await;
        let pending = self
            .manager
            .expect(move |m| m.kind == MessageKind::ErrorMessage || accept(m))
            .await;
        self.connection.send(frame).await?;
        let reply = pending.wait(limit, what).await?;
        match reply.error_code() {
            Some(code) => {
                debug!("{} refused: {}", what, code);
                Err(ParadoxError::ProtocolRefusal(code))
            }
            None => Ok(reply),
        }
    }

    /// Handshake, select the variant and log in.
    pub async fn login(&mut self) -> Result<PanelIdentity> {
        let limit = self.config.io_timeout;

        let initiate = self
            .request(
                initiate_communication()?,
                |m| m.kind == MessageKind::InitiateCommunicationResponse,
                limit,
                "InitiateCommunication",
            )
            .await
            .map_err(login_error)?;
        let serial_number = hex::encode(initiate.fields.bytes("serial_number")?);

        let start = self
            .request(
                start_communication()?,
                |m| m.kind == MessageKind::StartCommunicationResponse,
                limit,
                "StartCommunication",
            )
            .await
            .map_err(login_error)?;
        let product_id = start.fields.u8("product_id")?;
        let charmap = Charmap::new(&self.config.language)?;
        let panel = create_panel(product_id, charmap)?;
        self.manager.set_parser(panel.clone()).await;
        self.connection.set_variable_framing(panel.variable_framing());
        self.panel = panel;

        let identity = PanelIdentity {
            product: self.panel.product().map(|p| p.as_str()).unwrap_or("unknown").to_string(),
            product_id,
            panel_id: start.fields.int("panel_id")? as u16,
            firmware: firmware_string(start.fields.record("firmware")?),
            serial_number,
        };
        info!(
            "Panel {} (id {}, firmware {}, serial {})",
            identity.product, identity.panel_id, identity.firmware, identity.serial_number
        );

        let frame = self.panel.initialize_communication(
            &start.fields,
            &self.config.pc_password,
            self.config.user_code.as_deref(),
        )?;
        let confirmation = self
            .request(frame, |m| m.kind == MessageKind::LoginConfirmation, limit, "InitializeCommunication")
            .await
            .map_err(login_error)?;
        debug!("Login confirmed: {:?}", confirmation.fields.get("result"));

        if self.config.sync_time {
            let now = chrono::Local::now().naive_local();
            if let Err(e) = self.set_time(now).await {
                warn!("Could not set panel time: {}", e);
            }
        }

        self.identity = Some(identity.clone());
        Ok(identity)
    }

    /// Read `length` bytes of EEPROM from `address` in panel-sized chunks.
    pub async fn read_memory(&self, address: u32, length: usize) -> Result<Vec<u8>> {
        let chunk = self.panel.eeprom_chunk().max(1);
        let mut memory = Vec::with_capacity(length);
        let mut offset = 0usize;
        while offset < length {
            let n = chunk.min(length - offset);
            let at = address + offset as u32;
            let data = self.read_chunk(at, n).await?;
            memory.extend_from_slice(&data[..n.min(data.len())]);
            offset += n;
        }
        Ok(memory)
    }

    async fn read_chunk(&self, address: u32, length: usize) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let frame = self.panel.request_eeprom(address, length)?;
            let result = self
                .request(
                    frame,
                    move |m| {
                        m.kind == MessageKind::ReadEepromResponse && !m.is_ram() && m.address() == Some(address)
                    },
                    self.config.io_timeout,
                    "ReadEEPROM",
                )
                .await;
            match result {
                Ok(msg) => return Ok(msg.fields.bytes("data")?.to_vec()),
                Err(ParadoxError::Timeout { .. }) if attempt < READ_ATTEMPTS => {
                    debug!("EEPROM read at 0x{:05x} timed out, retrying", address);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read one polled RAM block.
    pub async fn read_ram(&self, address: u32) -> Result<Message> {
        let frame = self.panel.request_ram_block(address)?;
        self.request(
            frame,
            move |m| m.kind == MessageKind::ReadEepromResponse && m.is_ram() && m.address() == Some(address),
            self.config.io_timeout,
            "RAM block",
        )
        .await
    }

    /// Labels and definitions for every container the memory map names,
    /// cut to the configured limits.
    pub async fn read_inventory(&self) -> Result<Vec<Patch>> {
        let map = self.panel.eeprom_map().clone();
        let mut patches = Vec::new();
        for block in &map.labels {
            let count = inventory_count(&*self.panel, &self.config, block.container, block.count);
            patches.extend(self.read_labels(block, count).await?);
        }
        for block in &map.definitions {
            let count = inventory_count(&*self.panel, &self.config, block.container, block.count);
            patches.extend(self.read_definitions(block, count).await?);
        }
        Ok(patches)
    }

    async fn read_labels(&self, block: &LabelBlock, count: u32) -> Result<Vec<Patch>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        debug!("Loading {} {} labels", count, block.container);
        // Sparse label tables are read one label at a time.
        if block.stride as usize > self.panel.eeprom_chunk() {
            let mut memory = vec![0u8; block.span(count)];
            for i in 0..count {
                let start = (i * block.stride) as usize;
                let data = self.read_memory(block.address + start as u32, block.length).await?;
                memory[start..start + data.len()].copy_from_slice(&data);
            }
            return Ok(self.panel.update_labels(block, &memory, count));
        }
        let memory = self.read_memory(block.address, block.span(count)).await?;
        Ok(self.panel.update_labels(block, &memory, count))
    }

    async fn read_definitions(&self, block: &DefinitionBlock, count: u32) -> Result<Vec<Patch>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        debug!("Loading {} {} definitions", count, block.container);
        let memory = self.read_memory(block.address, block.span(count)).await?;
        Ok(self.panel.update_definitions(block, &memory, count)?)
    }

    /// Send an action; every frame must be answered within the action timeout.
    pub async fn perform_action(&self, action: &Action) -> Result<Vec<Message>> {
        let frames = self.panel.perform_action(action)?;
        let mut replies = Vec::with_capacity(frames.len());
        for frame in frames {
            let command = frame.first().copied().unwrap_or(0) >> 4;
            let reply = self
                .request(
                    frame,
                    move |m| m.command() == command && m.kind != MessageKind::LiveEvent,
                    self.config.action_timeout,
                    action.name(),
                )
                .await;
            match reply {
                Ok(msg) => replies.push(msg),
                Err(ParadoxError::Timeout { .. }) => {
                    return Err(ParadoxError::OperationFailed {
                        action: format!("{} action got no response", action.name()),
                    })
                }
                Err(e) => return Err(e),
            }
        }
        Ok(replies)
    }

    pub async fn set_time(&self, time: NaiveDateTime) -> Result<()> {
        let frame = self.panel.set_time_date(time)?;
        self.request(
            frame,
            |m| m.kind == MessageKind::SetTimeDateResponse,
            self.config.action_timeout,
            "SetTimeDate",
        )
        .await?;
        info!("Panel time set to {}", time);
        Ok(())
    }

    /// Read event-log records starting at `from`.
    pub async fn request_events(&self, from: u16) -> Result<Message> {
        let frame = self.panel.request_events(from)?;
        self.request(
            frame,
            |m| m.kind == MessageKind::RequestedEventResponse,
            self.config.io_timeout,
            "RequestedEvent",
        )
        .await
    }

    /// Tell the panel we are leaving and close the stream.
    pub async fn close(&self) {
        match self.panel.close_connection() {
            Ok(frame) => {
                if let Err(e) = self.connection.send(frame).await {
                    debug!("CloseConnection not sent: {}", e);
                }
            }
            Err(e) => debug!("No CloseConnection frame: {}", e),
        }
        self.manager.cancel_pending().await;
        self.connection.shutdown().await;
    }
}

/// Objects of `container` to download: the configured limit, and for zones
/// no more than status polling covers.
fn inventory_count(panel: &dyn Panel, config: &PanelConfig, container: Container, available: u32) -> u32 {
    let count = config.limits.cap(container, available);
    match panel.polled_zones() {
        Some(polled) if container == Container::Zone && count > polled => {
            warn!("Only zones 1 to {} report status, ignoring the other {}", polled, count - polled);
            polled
        }
        _ => count,
    }
}

/// Refusals during the handshake that no retry can fix become `LoginFailed`.
fn login_error(e: ParadoxError) -> ParadoxError {
    match e {
        ParadoxError::ProtocolRefusal(code) if code.is_login_fatal() => {
            ParadoxError::LoginFailed(code)
        }
        other => other,
    }
}

fn firmware_string(firmware: &Record) -> String {
    let part = |name: &str| firmware.get(name).and_then(Value::as_u64).unwrap_or(0);
    format!("{}.{}.{}", part("version"), part("revision"), part("build"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::value::record;
    use crate::config::InventoryLimits;
    use crate::constants::ProductId;
    use crate::variants::EvoPanel;

    #[test]
    fn test_login_error_classification() {
        assert!(matches!(
            login_error(ParadoxError::ProtocolRefusal(PanelErrorCode::InvalidPcPassword)),
            ParadoxError::LoginFailed(PanelErrorCode::InvalidPcPassword)
        ));
        assert!(matches!(
            login_error(ParadoxError::ProtocolRefusal(PanelErrorCode::PanelNotConnected)),
            ParadoxError::ProtocolRefusal(_)
        ));
        assert!(matches!(login_error(ParadoxError::Disconnected), ParadoxError::Disconnected));
    }

    #[test]
    fn test_zone_inventory_stops_at_polled_range() {
        let evo192 = EvoPanel::new(ProductId::Evo192, Charmap::default());
        let evo48 = EvoPanel::new(ProductId::Evo48, Charmap::default());
        let unlimited = PanelConfig::default();
        assert_eq!(inventory_count(&evo192, &unlimited, Container::Zone, 192), 96);
        assert_eq!(inventory_count(&evo48, &unlimited, Container::Zone, 48), 48);
        assert_eq!(inventory_count(&evo192, &unlimited, Container::User, 999), 999);

        let limited = PanelConfig::builder()
            .limits(InventoryLimits {
                zones: Some(10),
                ..Default::default()
            })
            .build();
        assert_eq!(inventory_count(&evo192, &limited, Container::Zone, 192), 10);
    }

    #[test]
    fn test_firmware_string() {
        let firmware = record([("version", 7u8), ("revision", 50u8), ("build", 3u8)]);
        assert_eq!(firmware_string(&firmware), "7.50.3");
    }
}
