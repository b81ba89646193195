// MIT License - Copyright (c) 2026 Peter Wright
// Session lifecycle, reconnection and the public panel API

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::codec::value::Record;
use crate::comm::PanelComm;
use crate::config::PanelConfig;
use crate::constants::{ArmMode, DoorCommand, PanicType, PartitionCommand, PgmCommand, ZoneFlagTarget, ZoneOperation};
use crate::devices::partition::with_derived_state;
use crate::devices::{Module, Partition, Pgm, SystemStatus, User, Zone};
use crate::error::{ParadoxError, Result};
use crate::event::{event_channel, ConnectionState, EventReceiver, EventSender, PanelEvent, PanelIdentity};
use crate::event_map::Event;
use crate::store::{Container, Key, Patch, Store};
use crate::transport::{tcp, PanelStream};
use crate::variants::{Action, Message, MessageKind};

/// State shared between the coordinator handle and its session task.
struct Shared {
    config: PanelConfig,
    event_tx: EventSender,
    state_tx: watch::Sender<ConnectionState>,
    store: RwLock<Store>,
    /// The panel the store contents came from.
    last_panel: Mutex<Option<PanelIdentity>>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let old = self.state_tx.send_replace(state);
        if old != state {
            info!("Connection state {} -> {}", old, state);
            self.emit(PanelEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: PanelEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    /// Merge a patch and publish what changed. Partition patches get their
    /// derived state added first.
    fn apply(&self, store: &mut Store, mut patch: Patch) -> Result<()> {
        if patch.container == Container::Partition {
            patch.fields = with_derived_state(store.get(Container::Partition, &patch.key), &patch.fields);
        }
        if let Some(changes) = store.apply(patch)? {
            debug!("{} {} changed: {} field(s)", changes.container, changes.key, changes.changes.len());
            self.emit(PanelEvent::Change(changes));
        }
        Ok(())
    }

    /// Record the panel just logged in to. Objects of a different panel are
    /// dropped so the inventory starts from an empty store.
    async fn adopt_panel(&self, identity: &PanelIdentity) {
        let mut last = self.last_panel.lock().await;
        if let Some(previous) = last.as_ref() {
            if previous.panel_id != identity.panel_id || previous.product != identity.product {
                info!(
                    "Panel changed from {} (id {}) to {} (id {}), discarding stored objects",
                    previous.product, previous.panel_id, identity.product, identity.panel_id
                );
                self.store.write().await.clear();
            }
        }
        *last = Some(identity.clone());
    }

    async fn load_inventory(&self, comm: &PanelComm) -> Result<()> {
        self.set_state(ConnectionState::DownloadingInventory);
        let patches = comm.read_inventory().await?;
        let mut store = self.store.write().await;
        store.unlock_definitions();
        let count = patches.len();
        for patch in patches {
            self.apply(&mut store, patch)?;
        }
        store.lock_definitions();
        info!("Inventory loaded: {} objects", count);
        Ok(())
    }

    async fn poll(&self, comm: &PanelComm) -> Result<()> {
        let panel = comm.panel();
        for block in panel.ram_blocks() {
            let msg = comm.read_ram(block.address).await?;
            let mut store = self.store.write().await;
            let patches = panel.handle_status_frame(&msg, &store)?;
            for patch in patches {
                self.apply(&mut store, patch)?;
            }
        }
        Ok(())
    }

    /// Returns the reason when the message ends the session.
    async fn handle_unsolicited(&self, comm: &PanelComm, msg: &Message) -> Result<Option<String>> {
        match msg.kind {
            MessageKind::LiveEvent => {
                let mut store = self.store.write().await;
                let events = comm.panel().process_event(msg, &*store)?;
                for event in events {
                    debug!("Live event: {}", event.message);
                    for patch in event.changes.clone() {
                        self.apply(&mut store, patch)?;
                    }
                    self.emit(PanelEvent::Live(event));
                }
                Ok(None)
            }
            MessageKind::ErrorMessage => match msg.error_code() {
                Some(code) if code.ends_session() => {
                    warn!("Panel is closing the session: {}", code);
                    Ok(Some(code.as_str().to_string()))
                }
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }

    /// Reload labels and definitions after an immutable field changed.
    async fn recover(&self, comm: &PanelComm, cause: &ParadoxError) -> Result<()> {
        warn!("{}, downloading inventory again", cause);
        self.load_inventory(comm).await?;
        self.set_state(ConnectionState::Running);
        self.emit(PanelEvent::InventoryComplete);
        Ok(())
    }
}

struct Session {
    comm: Arc<PanelComm>,
    stop: watch::Sender<bool>,
    ended: watch::Receiver<Option<String>>,
    task: JoinHandle<()>,
}

/// The main public API for talking to a Paradox panel.
///
/// # Example
///
/// ```no_run
/// use paradox_bridge::{ArmMode, PanelConfig, PanelCoordinator, PanelEvent};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = PanelConfig::builder()
///         .host("192.168.0.50")
///         .port(10000)
///         .pc_password("0000")
///         .build();
///
///     let panel = PanelCoordinator::new(config)?;
///     let mut events = panel.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             if let PanelEvent::Live(event) = event {
///                 println!("{}", event.message);
///             }
///         }
///     });
///
///     panel.connect().await?;
///     for zone in panel.zones().await {
///         println!("Zone {}: {} (open={})", zone.id, zone.label, zone.is_open());
///     }
///     panel.arm(1, ArmMode::Stay).await?;
///
///     tokio::signal::ctrl_c().await?;
///     panel.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct PanelCoordinator {
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
    stop_tx: watch::Sender<bool>,
}

impl PanelCoordinator {
    pub fn new(config: PanelConfig) -> Result<Self> {
        config.validate()?;
        let (event_tx, _) = event_channel(config.event_capacity);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (stop_tx, _) = watch::channel(false);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                event_tx,
                state_tx,
                store: RwLock::new(Store::new()),
                last_panel: Mutex::new(None),
            }),
            session: Mutex::new(None),
            stop_tx,
        })
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.shared.event_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn config(&self) -> &PanelConfig {
        &self.shared.config
    }

    /// Connect over TCP to the configured serial bridge.
    pub async fn connect(&self) -> Result<PanelIdentity> {
        let config = &self.shared.config;
        let limit = config.io_timeout.max(config.action_timeout);
        self.connect_with(&mut || tcp::connect(&config.host, config.port, limit)).await
    }

    /// Open a stream with `connector`, then log in over it.
    async fn connect_with<C, F, S>(&self, connector: &mut C) -> Result<PanelIdentity>
    where
        C: FnMut() -> F,
        F: Future<Output = Result<S>>,
        S: PanelStream,
    {
        self.end_session().await;
        self.shared.set_state(ConnectionState::Connecting);
        match connector().await {
            Ok(stream) => self.connect_stream(stream).await,
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Log in over an already open byte stream, load the inventory and start
    /// polling.
    pub async fn connect_stream<S: PanelStream>(&self, stream: S) -> Result<PanelIdentity> {
        self.end_session().await;
        let shared = &self.shared;
        shared.set_state(ConnectionState::Connecting);
        let mut comm = PanelComm::open(Box::new(stream), shared.config.clone(), shared.state_tx.subscribe()).await;

        shared.set_state(ConnectionState::LoggingIn);
        let identity = match comm.login().await {
            Ok(identity) => identity,
            Err(e) => {
                error!("Login failed: {}", e);
                comm.close().await;
                shared.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        shared.adopt_panel(&identity).await;
        shared.emit(PanelEvent::Connected(identity.clone()));
        let comm = Arc::new(comm);

        // Registered before the download so events raised meanwhile are kept.
        let (unsolicited_tx, unsolicited_rx) = mpsc::unbounded_channel();
        comm.manager()
            .register_persistent(
                |m: &Message| matches!(m.kind, MessageKind::LiveEvent | MessageKind::ErrorMessage),
                move |m: &Message| unsolicited_tx.send(m.clone()).map_err(|_| ParadoxError::ChannelClosed),
            )
            .await;

        if let Err(e) = shared.load_inventory(&comm).await {
            error!("Inventory download failed: {}", e);
            comm.close().await;
            shared.set_state(ConnectionState::Disconnected);
            return Err(e);
        }
        shared.set_state(ConnectionState::Running);
        shared.emit(PanelEvent::InventoryComplete);

        let (stop, stop_rx) = watch::channel(false);
        let (ended_tx, ended) = watch::channel(None);
        let task = tokio::spawn(run_session(
            shared.clone(),
            comm.clone(),
            unsolicited_rx,
            stop_rx,
            ended_tx,
        ));
        *self.session.lock().await = Some(Session {
            comm,
            stop,
            ended,
            task,
        });
        Ok(identity)
    }

    /// Keep a session up, reconnecting with exponential back-off, until
    /// [`PanelCoordinator::disconnect`] is called or an error no retry can fix.
    pub async fn run(&self) -> Result<()> {
        let config = &self.shared.config;
        let limit = config.io_timeout.max(config.action_timeout);
        self.run_with(|| tcp::connect(&config.host, config.port, limit)).await
    }

    /// [`PanelCoordinator::run`] over streams opened by `connector`.
    pub async fn run_with<C, F, S>(&self, mut connector: C) -> Result<()>
    where
        C: FnMut() -> F,
        F: Future<Output = Result<S>>,
        S: PanelStream,
    {
        self.stop_tx.send_replace(false);
        let mut stop = self.stop_tx.subscribe();
        let mut attempt = 0u32;
        loop {
            if *stop.borrow() {
                return Ok(());
            }
            match self.connect_with(&mut connector).await {
                Ok(_) => {
                    attempt = 0;
                    let reason = self.session_ended().await;
                    if *stop.borrow() {
                        return Ok(());
                    }
                    warn!("Session ended: {}", reason);
                }
                Err(e) if e.is_retryable() => warn!("Connection attempt failed: {}", e),
                Err(e) => return Err(e),
            }
            let delay = self.shared.config.reconnect_delay(attempt);
            attempt = attempt.saturating_add(1);
            info!("Reconnecting in {:.1}s", delay.as_secs_f64());
            tokio::select! {
                _ = sleep(delay) => {}
                _ = stop.changed() => return Ok(()),
            }
        }
    }

    /// Resolves with the reason once the current session ends.
    async fn session_ended(&self) -> String {
        let ended = self.session.lock().await.as_ref().map(|s| s.ended.clone());
        let Some(mut ended) = ended else {
            return "no session".to_string();
        };
        loop {
            if let Some(reason) = ended.borrow().clone() {
                return reason;
            }
            if ended.changed().await.is_err() {
                return "session task stopped".to_string();
            }
        }
    }

    /// Close the session and stop [`PanelCoordinator::run`].
    pub async fn disconnect(&self) {
        info!("Disconnecting from panel");
        self.stop_tx.send_replace(true);
        self.end_session().await;
    }

    async fn end_session(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };
        let _ = session.stop.send(true);
        if let Err(e) = session.task.await {
            debug!("Session task: {}", e);
        }
    }

    async fn comm(&self) -> Result<Arc<PanelComm>> {
        let session = self.session.lock().await;
        match session.as_ref() {
            Some(s) if self.state() == ConnectionState::Running && !s.comm.connection().is_lost() => {
                Ok(s.comm.clone())
            }
            _ => Err(ParadoxError::Disconnected),
        }
    }

    pub async fn identity(&self) -> Option<PanelIdentity> {
        let session = self.session.lock().await;
        session.as_ref().and_then(|s| s.comm.identity().cloned())
    }

    // --- Commands ---

    /// Send a logical action through the connected variant.
    pub async fn perform(&self, action: Action) -> Result<Vec<Message>> {
        let comm = self.comm().await?;
        info!("Performing {} action", action.name());
        comm.perform_action(&action).await
    }

    pub async fn arm(&self, partition: u32, mode: ArmMode) -> Result<()> {
        self.partition_command(partition, mode.command()).await
    }

    pub async fn disarm(&self, partition: u32) -> Result<()> {
        self.partition_command(partition, PartitionCommand::Disarm).await
    }

    pub async fn partition_command(&self, partition: u32, command: PartitionCommand) -> Result<()> {
        self.perform(Action::Partition(BTreeMap::from([(partition, command)])))
            .await
            .map(drop)
    }

    pub async fn bypass(&self, zone: u32, bypass: bool) -> Result<()> {
        let operation = if bypass { ZoneOperation::Set } else { ZoneOperation::Clear };
        self.perform(Action::Zone {
            zones: vec![zone],
            flag: ZoneFlagTarget::Bypassed,
            operation,
        })
        .await
        .map(drop)
    }

    pub async fn clear_alarm_memory(&self, zone: u32) -> Result<()> {
        self.perform(Action::Zone {
            zones: vec![zone],
            flag: ZoneFlagTarget::AlarmMemory,
            operation: ZoneOperation::Clear,
        })
        .await
        .map(drop)
    }

    pub async fn pgm(&self, output: u32, command: PgmCommand) -> Result<()> {
        self.perform(Action::Pgm {
            pgms: vec![output],
            command,
        })
        .await
        .map(drop)
    }

    pub async fn door(&self, door: u32, command: DoorCommand, user: u16) -> Result<()> {
        self.perform(Action::Door {
            doors: vec![door],
            command,
            user,
        })
        .await
        .map(drop)
    }

    pub async fn panic(&self, partition: u32, panic: PanicType, user: u16) -> Result<()> {
        self.perform(Action::Panic {
            partitions: vec![partition],
            panic,
            user,
        })
        .await
        .map(drop)
    }

    pub async fn set_time(&self, time: NaiveDateTime) -> Result<()> {
        self.comm().await?.set_time(time).await
    }

    /// Read and render event-log records starting at event number `from`.
    pub async fn request_events(&self, from: u16) -> Result<Vec<Event>> {
        let comm = self.comm().await?;
        let msg = comm.request_events(from).await?;
        let store = self.shared.store.read().await;
        Ok(comm.panel().process_event(&msg, &*store)?)
    }

    // --- Store views ---

    pub async fn partitions(&self) -> Vec<Partition> {
        self.indexed(Container::Partition, Partition::from_record).await
    }

    pub async fn partition(&self, id: u32) -> Option<Partition> {
        let store = self.shared.store.read().await;
        store
            .get(Container::Partition, &Key::Index(id))
            .map(|rec| Partition::from_record(id, rec))
    }

    pub async fn zones(&self) -> Vec<Zone> {
        self.indexed(Container::Zone, Zone::from_record).await
    }

    pub async fn zone(&self, id: u32) -> Option<Zone> {
        let store = self.shared.store.read().await;
        store.get(Container::Zone, &Key::Index(id)).map(|rec| Zone::from_record(id, rec))
    }

    pub async fn pgms(&self) -> Vec<Pgm> {
        self.indexed(Container::Pgm, Pgm::from_record).await
    }

    pub async fn users(&self) -> Vec<User> {
        self.indexed(Container::User, User::from_record).await
    }

    pub async fn modules(&self) -> Vec<Module> {
        self.indexed(Container::Module, Module::from_record).await
    }

    pub async fn system(&self) -> SystemStatus {
        let store = self.shared.store.read().await;
        let entry = |name: &str| store.get(Container::System, &Key::from(name));
        SystemStatus::from_records(entry("troubles"), entry("power"), entry("date"), entry("events"))
    }

    /// A copy of one raw store object.
    pub async fn object(&self, container: Container, key: &Key) -> Option<Record> {
        self.shared.store.read().await.get(container, key).cloned()
    }

    async fn indexed<T>(&self, container: Container, view: fn(u32, &Record) -> T) -> Vec<T> {
        let store = self.shared.store.read().await;
        store
            .objects(container)
            .filter_map(|(key, rec)| key.index().map(|id| view(id, rec)))
            .collect()
    }
}

impl Drop for PanelCoordinator {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Ok(mut session) = self.session.try_lock() {
            if let Some(session) = session.take() {
                let _ = session.stop.send(true);
            }
        }
    }
}

async fn run_session(
    shared: Arc<Shared>,
    comm: Arc<PanelComm>,
    mut unsolicited: mpsc::UnboundedReceiver<Message>,
    mut stop: watch::Receiver<bool>,
    ended: watch::Sender<Option<String>>,
) {
    let reason = session_loop(&shared, &comm, &mut unsolicited, &mut stop).await;
    match &reason {
        Some(reason) => warn!("Leaving session: {}", reason),
        None => info!("Leaving session"),
    }
    shared.set_state(ConnectionState::Disconnecting);
    comm.close().await;
    shared.set_state(ConnectionState::Disconnected);
    shared.emit(PanelEvent::Disconnected { reason: reason.clone() });
    let _ = ended.send(Some(reason.unwrap_or_else(|| "shutdown".to_string())));
}

/// Poll and handle unsolicited frames until the session ends. `None` means an
/// orderly shutdown.
async fn session_loop(
    shared: &Shared,
    comm: &PanelComm,
    unsolicited: &mut mpsc::UnboundedReceiver<Message>,
    stop: &mut watch::Receiver<bool>,
) -> Option<String> {
    let mut ticker = interval(shared.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut failures = 0u32;
    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    return None;
                }
            }
            reason = comm.connection().closed() => return Some(reason),
            Some(msg) = unsolicited.recv() => {
                match shared.handle_unsolicited(comm, &msg).await {
                    Ok(Some(reason)) => return Some(reason),
                    Ok(None) => {}
                    Err(e @ ParadoxError::InvariantViolation { .. }) => {
                        if let Err(e) = shared.recover(comm, &e).await {
                            return Some(format!("inventory reload failed: {e}"));
                        }
                    }
                    Err(e) => warn!("Unsolicited {} not handled: {}", msg.kind, e),
                }
            }
            _ = ticker.tick() => {
                match shared.poll(comm).await {
                    Ok(()) => failures = 0,
                    Err(e @ ParadoxError::InvariantViolation { .. }) => {
                        if let Err(e) = shared.recover(comm, &e).await {
                            return Some(format!("inventory reload failed: {e}"));
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        warn!("Status poll failed ({}/{}): {}", failures, shared.config.max_poll_failures, e);
                        if failures >= shared.config.max_poll_failures {
                            return Some(format!("{failures} consecutive poll failures"));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::value::{record, RecordExt};

    fn shared() -> Shared {
        let (event_tx, _) = event_channel(16);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Shared {
            config: PanelConfig::default(),
            event_tx,
            state_tx,
            store: RwLock::new(Store::new()),
            last_panel: Mutex::new(None),
        }
    }

    fn identity(panel_id: u16, product: &str) -> PanelIdentity {
        PanelIdentity {
            product: product.to_string(),
            product_id: 5,
            panel_id,
            firmware: "7.50.3".to_string(),
            serial_number: "0a1b2c3d".to_string(),
        }
    }

    #[tokio::test]
    async fn test_partition_patch_gets_pending_state() {
        let shared = shared();
        let mut rx = shared.event_tx.subscribe();
        let mut store = shared.store.write().await;

        shared
            .apply(&mut store, Patch::new(Container::Partition, 1, record([("arm", false)])))
            .unwrap();
        shared
            .apply(
                &mut store,
                Patch::new(Container::Partition, 1, record([("arm", true), ("exit_delay", true)])),
            )
            .unwrap();

        let rec = store.get(Container::Partition, &Key::Index(1)).unwrap();
        assert_eq!(rec.field("current_state").unwrap().as_str(), Some("pending"));
        assert_eq!(rec.field("target_state").unwrap().as_str(), Some("armed_away"));

        let mut changes = Vec::new();
        while let Ok(PanelEvent::Change(cs)) = rx.try_recv() {
            changes.push(cs);
        }
        assert_eq!(changes.len(), 2);
        let fields: Vec<_> = changes[1].changes.iter().map(|c| c.field.as_str()).collect();
        assert!(fields.contains(&"current_state"));
        assert!(fields.contains(&"exit_delay"));
    }

    #[tokio::test]
    async fn test_idempotent_patch_is_silent() {
        let shared = shared();
        let mut rx = shared.event_tx.subscribe();
        let mut store = shared.store.write().await;
        let patch = Patch::new(Container::Zone, 3, record([("open", true)]));
        shared.apply(&mut store, patch.clone()).unwrap();
        shared.apply(&mut store, patch).unwrap();
        assert!(matches!(rx.try_recv(), Ok(PanelEvent::Change(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_other_panel_clears_store() {
        let shared = shared();
        let zone = || Patch::new(Container::Zone, 1, record([("label", "Hall")]));
        shared.adopt_panel(&identity(0x1234, "DIGIPLEX_EVO_192")).await;
        shared.apply(&mut *shared.store.write().await, zone()).unwrap();

        shared.adopt_panel(&identity(0x1234, "DIGIPLEX_EVO_192")).await;
        assert!(!shared.store.read().await.is_empty());

        shared.adopt_panel(&identity(0x9999, "DIGIPLEX_EVO_192")).await;
        assert!(shared.store.read().await.is_empty());

        shared.apply(&mut *shared.store.write().await, zone()).unwrap();
        shared.adopt_panel(&identity(0x9999, "DIGIPLEX_EVO_96")).await;
        assert!(shared.store.read().await.is_empty());
    }

    #[test]
    fn test_state_change_is_published_once() {
        let shared = shared();
        let mut rx = shared.event_tx.subscribe();
        shared.set_state(ConnectionState::Connecting);
        shared.set_state(ConnectionState::Connecting);
        assert!(matches!(
            rx.try_recv(),
            Ok(PanelEvent::StateChanged(ConnectionState::Connecting))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_commands_need_a_session() {
        let panel = PanelCoordinator::new(PanelConfig::default()).unwrap();
        assert!(matches!(panel.disarm(1).await, Err(ParadoxError::Disconnected)));
        assert!(panel.partitions().await.is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = PanelConfig::builder().pc_password("12").build();
        assert!(matches!(PanelCoordinator::new(config), Err(ParadoxError::Config(_))));
    }
}
