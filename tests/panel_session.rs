// MIT License - Copyright (c) 2026 Peter Wright
// End-to-end sessions against a simulated EVO panel

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};

use paradox_bridge::codec::checksum;
use paradox_bridge::{
    ArmMode, ConnectionState, Container, EventReceiver, InventoryLimits, Key, PanelConfig, PanelCoordinator,
    PanelErrorCode, PanelEvent, ParadoxError, PartitionState, Value,
};

const EVO192: u8 = 5;
const PARTITION_LABELS: usize = 0x3A6B;
const PARTITION_STRIDE: usize = 0x6B;
const ZONE_LABELS: usize = 0x0430;
const ZONE_DEFINITIONS: usize = 0x1F00;
const PGM_LABELS: usize = 0x8082;

fn seal(mut body: Vec<u8>) -> Vec<u8> {
    body.push(checksum(&body));
    body
}

#[derive(Clone)]
struct Behaviour {
    panel_id: u16,
    reject_login: Option<u8>,
    ignore_actions: bool,
    ignore_polls: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            panel_id: 0x1234,
            reject_login: None,
            ignore_actions: false,
            ignore_polls: false,
        }
    }
}

struct Memory {
    eeprom: Vec<u8>,
    ram: Vec<[u8; 64]>,
}

fn put_label(eeprom: &mut [u8], address: usize, label: &str) {
    let mut raw = [b' '; 16];
    raw[..label.len()].copy_from_slice(label.as_bytes());
    eeprom[address..address + 16].copy_from_slice(&raw);
}

fn memory() -> Memory {
    let mut eeprom = vec![0u8; 0x40000];
    put_label(&mut eeprom, PARTITION_LABELS, "First floor");
    put_label(&mut eeprom, PARTITION_LABELS + PARTITION_STRIDE, "Garage");
    let zones = ["Front door", "Hall", "Kitchen", "Back door", "Living room", "Attic", "Cellar", "Porch"];
    for (i, label) in zones.iter().enumerate() {
        put_label(&mut eeprom, ZONE_LABELS + 16 * i, label);
        // Entry delay zone in partition 1
        eeprom[ZONE_DEFINITIONS + 4 * i] = 1;
        eeprom[ZONE_DEFINITIONS + 4 * i + 1] = 1;
    }
    put_label(&mut eeprom, PGM_LABELS, "Gate");
    put_label(&mut eeprom, PGM_LABELS + 16, "Lights");

    let mut ram = vec![[0u8; 64]; 6];
    // Block 1: zone 5 open.
    ram[1][14] = 1 << 4;
    Memory { eeprom, ram }
}

fn initiate_response() -> Vec<u8> {
    let mut body = vec![0u8; 36];
    body[0] = 0x72;
    body[1] = 0xFF;
    body[7] = EVO192;
    body[12..16].copy_from_slice(&[0x0a, 0x1b, 0x2c, 0x3d]);
    seal(body)
}

fn start_response(panel_id: u16) -> Vec<u8> {
    let mut body = vec![0u8; 36];
    body[4] = EVO192;
    body[5..8].copy_from_slice(&[7, 50, 3]);
    body[8..10].copy_from_slice(&panel_id.to_be_bytes());
    seal(body)
}

fn memory_response(frame: &[u8], memory: &Memory) -> Vec<u8> {
    let control = frame[2];
    let address = (usize::from(frame[4]) << 8) | usize::from(frame[5]);
    let length = usize::from(frame[6]);
    let data: Vec<u8> = if control & 0x80 != 0 {
        memory.ram[address][..length].to_vec()
    } else {
        let full = (usize::from(control & 0x03) << 16) | address;
        memory.eeprom[full..full + length].to_vec()
    };
    let mut body = vec![frame[0], (7 + data.len()) as u8, control, frame[3], frame[4], frame[5]];
    body.extend(data);
    seal(body)
}

fn respond(frame: &[u8], behaviour: &Behaviour, memory: &Memory) -> Option<Vec<u8>> {
    match frame[0] {
        0x72 => Some(initiate_response()),
        0x5F => Some(start_response(behaviour.panel_id)),
        0x00 => Some(match behaviour.reject_login {
            Some(code) => seal(vec![0x70, 0x04, code]),
            None => seal(vec![0x10, 0x06, 0x00, 0x00, 0x00]),
        }),
        b if b >> 4 == 0x5 && frame[2] & 0x80 != 0 && behaviour.ignore_polls => None,
        b if b >> 4 == 0x5 => Some(memory_response(frame, memory)),
        0x40 if behaviour.ignore_actions => None,
        0x40 => Some(seal(vec![0x40, 0x04, frame[2]])),
        0xD0 => Some(seal(vec![0xD0, 0x03])),
        0x30 => Some(seal(vec![0x30, 0x03])),
        _ => None,
    }
}

async fn read_request(reader: &mut ReadHalf<DuplexStream>) -> Option<Vec<u8>> {
    let mut frame = vec![0u8; 2];
    reader.read_exact(&mut frame).await.ok()?;
    let total = match frame[0] {
        0x72 | 0x5F | 0x00 => 37,
        _ => usize::from(frame[1]),
    };
    frame.resize(total.max(2), 0);
    reader.read_exact(&mut frame[2..]).await.ok()?;
    Some(frame)
}

struct FakePanel {
    writer: Arc<Mutex<WriteHalf<DuplexStream>>>,
    requests: Arc<StdMutex<Vec<Vec<u8>>>>,
}

impl FakePanel {
    fn start(behaviour: Behaviour) -> (Self, DuplexStream) {
        let (near, far) = tokio::io::duplex(8192);
        let (mut reader, writer) = tokio::io::split(far);
        let writer = Arc::new(Mutex::new(writer));
        let requests = Arc::new(StdMutex::new(Vec::new()));

        let out = writer.clone();
        let log = requests.clone();
        tokio::spawn(async move {
            let memory = memory();
            while let Some(frame) = read_request(&mut reader).await {
                log.lock().unwrap().push(frame.clone());
                if let Some(reply) = respond(&frame, &behaviour, &memory) {
                    if out.lock().await.write_all(&reply).await.is_err() {
                        break;
                    }
                }
            }
        });
        (Self { writer, requests }, near)
    }

    async fn inject(&self, frame: &[u8]) {
        self.writer.lock().await.write_all(frame).await.unwrap();
    }

    fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().unwrap().clone()
    }
}

fn limits(zones: Option<u32>) -> InventoryLimits {
    InventoryLimits {
        partitions: Some(2),
        zones,
        pgms: Some(2),
        users: Some(0),
        doors: Some(0),
        modules: Some(0),
    }
}

fn builder() -> paradox_bridge::PanelConfigBuilder {
    PanelConfig::builder()
        .pc_password("1234")
        .poll_interval(Duration::from_secs(3600))
        .io_timeout(Duration::from_millis(500))
        .action_timeout(Duration::from_millis(300))
        .limits(limits(Some(8)))
}

fn config() -> PanelConfig {
    builder().build()
}

async fn next_matching<F>(rx: &mut EventReceiver, mut pred: F) -> PanelEvent
where
    F: FnMut(&PanelEvent) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event did not arrive")
}

fn zone_open_change(zone: u32, open: bool) -> impl FnMut(&PanelEvent) -> bool {
    move |event| match event {
        PanelEvent::Change(cs) => {
            cs.key.index() == Some(zone)
                && cs.changes.iter().any(|c| c.field == "open" && c.new == Value::Bool(open))
        }
        _ => false,
    }
}

/// A live event of `group` for `zone` in partition 1.
fn zone_event(group: u8, zone: u8, label: &str) -> Vec<u8> {
    let mut body = vec![0xe2, 0xff, 0xad, 0x06, 0x14, 0x13, 0x01, 0x04, 0x0e, 0x10];
    body.extend([group, 0x01, zone, 0x00]);
    body.extend([0x00, 0x00, 0x00, 0x00]);
    body.push(0x02);
    let mut raw = [b' '; 16];
    raw[..label.len()].copy_from_slice(label.as_bytes());
    body.extend(raw);
    body.push(0x00);
    seal(body)
}

fn zone_ok_frame() -> Vec<u8> {
    zone_event(0x00, 5, "Living room")
}

fn will_disconnect() -> Vec<u8> {
    seal(vec![0x70, 0x04, PanelErrorCode::PanelWillDisconnect.code()])
}

fn is_inventory_complete(event: &PanelEvent) -> bool {
    matches!(event, PanelEvent::InventoryComplete)
}

fn is_disconnected(event: &PanelEvent) -> bool {
    matches!(event, PanelEvent::Disconnected { .. })
}

async fn connected() -> (PanelCoordinator, FakePanel, EventReceiver) {
    let (fake, stream) = FakePanel::start(Behaviour::default());
    let panel = PanelCoordinator::new(config()).unwrap();
    let mut rx = panel.subscribe();
    panel.connect_stream(stream).await.unwrap();
    next_matching(&mut rx, zone_open_change(5, true)).await;
    (panel, fake, rx)
}

#[tokio::test]
async fn test_login_inventory_and_poll() {
    let (fake, stream) = FakePanel::start(Behaviour::default());
    let panel = PanelCoordinator::new(config()).unwrap();
    let mut rx = panel.subscribe();

    let identity = panel.connect_stream(stream).await.unwrap();
    assert_eq!(identity.product, "DIGIPLEX_EVO_192");
    assert_eq!(identity.panel_id, 0x1234);
    assert_eq!(identity.firmware, "7.50.3");
    assert_eq!(identity.serial_number, "0a1b2c3d");
    assert_eq!(panel.state(), ConnectionState::Running);

    next_matching(&mut rx, zone_open_change(5, true)).await;

    let partition = panel.partition(1).await.unwrap();
    assert_eq!(partition.label, "First floor");
    let zone = panel.zone(5).await.unwrap();
    assert_eq!(zone.label, "Living room");
    assert_eq!(zone.key, "Living_room");
    assert_eq!(zone.definition, 1);
    assert!(zone.is_open());
    assert_eq!(panel.zones().await.len(), 8);
    assert_eq!(panel.pgms().await.len(), 2);

    let object = panel
        .object(paradox_bridge::Container::Partition, &paradox_bridge::Key::Index(1))
        .await
        .unwrap();
    assert_eq!(object.get("current_state"), Some(&Value::from("disarmed")));

    // The login frame carries the BCD-encoded PC password.
    let login = fake.requests().into_iter().find(|f| f[0] == 0x00).unwrap();
    assert_eq!(&login[10..12], &[0x12, 0x34]);
}

#[tokio::test]
async fn test_live_event_updates_store() {
    let (panel, fake, mut rx) = connected().await;

    fake.inject(&zone_ok_frame()).await;
    let event = next_matching(&mut rx, |e| matches!(e, PanelEvent::Live(_))).await;
    let PanelEvent::Live(event) = event else { unreachable!() };
    assert_eq!(event.message, "Zone Living room OK in partition First floor");

    assert!(!panel.zone(5).await.unwrap().is_open());
}

#[tokio::test]
async fn test_arm_sends_partition_action() {
    let (panel, fake, _rx) = connected().await;

    panel.arm(1, ArmMode::Away).await.unwrap();
    let frame = fake.requests().into_iter().find(|f| f[0] == 0x40).unwrap();
    assert_eq!(frame.len(), 15);
    assert_eq!(frame[1], 0x0f);
    assert_eq!(frame[2], 0x00);
    // Partition 1 takes the low nibble of the last command byte.
    assert_eq!(frame[12], 0x20);
}

#[tokio::test]
async fn test_unanswered_action_fails() {
    let (fake, stream) = FakePanel::start(Behaviour {
        ignore_actions: true,
        ..Default::default()
    });
    let panel = PanelCoordinator::new(config()).unwrap();
    panel.connect_stream(stream).await.unwrap();

    let result = panel.pgm(1, paradox_bridge::PgmCommand::On).await;
    assert!(matches!(result, Err(ParadoxError::OperationFailed { .. })));
    assert!(fake.requests().iter().any(|f| f[0] == 0x40));
    assert_eq!(panel.state(), ConnectionState::Running);
}

#[tokio::test]
async fn test_wrong_password_fails_login() {
    let (_fake, stream) = FakePanel::start(Behaviour {
        reject_login: Some(PanelErrorCode::InvalidPcPassword.code()),
        ..Default::default()
    });
    let panel = PanelCoordinator::new(config()).unwrap();

    let result = panel.connect_stream(stream).await;
    assert!(matches!(
        result,
        Err(ParadoxError::LoginFailed(PanelErrorCode::InvalidPcPassword))
    ));
    assert!(!result.unwrap_err().is_retryable());
    assert_eq!(panel.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_panel_initiated_close_ends_session() {
    let (panel, fake, mut rx) = connected().await;

    fake.inject(&will_disconnect()).await;
    let event = next_matching(&mut rx, is_disconnected).await;
    assert!(matches!(event, PanelEvent::Disconnected { reason: Some(_) }));
    assert_eq!(panel.state(), ConnectionState::Disconnected);
    assert!(matches!(panel.disarm(1).await, Err(ParadoxError::Disconnected)));
}

#[tokio::test]
async fn test_disconnect_sends_close_connection() {
    let (panel, fake, mut rx) = connected().await;

    panel.disconnect().await;
    let event = next_matching(&mut rx, |e| matches!(e, PanelEvent::Disconnected { .. })).await;
    assert!(matches!(event, PanelEvent::Disconnected { reason: None }));
    assert_eq!(panel.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let close = fake.requests().into_iter().last().unwrap();
    assert_eq!(close, vec![0x70, 0x04, 0x05, 0x79]);
}

#[tokio::test]
async fn test_zone_open_event_shows_in_zone_list() {
    let (panel, fake, mut rx) = connected().await;
    assert!(!panel.zone(3).await.unwrap().is_open());

    fake.inject(&zone_event(0x01, 3, "Kitchen")).await;
    next_matching(&mut rx, zone_open_change(3, true)).await;

    let open: Vec<u32> = panel.zones().await.into_iter().filter(|z| z.is_open()).map(|z| z.id).collect();
    assert_eq!(open, vec![3, 5]);
}

#[tokio::test]
async fn test_zone_alarm_triggers_partition() {
    let (_panel, fake, mut rx) = connected().await;

    fake.inject(&zone_event(24, 3, "Kitchen")).await;
    let event = next_matching(&mut rx, |e| match e {
        PanelEvent::Change(cs) => {
            cs.container == Container::Partition
                && cs.get("current_state").is_some_and(|c| c.new == Value::from("triggered"))
        }
        _ => false,
    })
    .await;
    let PanelEvent::Change(cs) = event else { unreachable!() };
    assert_eq!(cs.key, Key::Index(1));
    assert_eq!(cs.get("current_state").unwrap().new, Value::from("triggered"));
    assert_eq!(cs.get("target_state").unwrap().new, Value::from("triggered"));
    assert_eq!(cs.get("audible_alarm").unwrap().new, Value::Bool(true));
}

#[tokio::test]
async fn test_same_panel_keeps_store_on_reconnect() {
    let (panel, _first, mut rx) = connected().await;
    while rx.try_recv().is_ok() {}

    let (_second, stream) = FakePanel::start(Behaviour::default());
    panel.connect_stream(stream).await.unwrap();
    next_matching(&mut rx, is_inventory_complete).await;

    // Labels are already known, so the download changes nothing.
    while let Ok(event) = rx.try_recv() {
        if let PanelEvent::Change(cs) = event {
            assert!(cs.get("label").is_none(), "label of {} {} rewritten", cs.container, cs.key);
        }
    }
    assert_eq!(panel.zone(5).await.unwrap().label, "Living room");
}

#[tokio::test]
async fn test_other_panel_replaces_store_on_reconnect() {
    let (panel, _first, mut rx) = connected().await;
    while rx.try_recv().is_ok() {}

    let (_second, stream) = FakePanel::start(Behaviour {
        panel_id: 0x9999,
        ..Default::default()
    });
    let identity = panel.connect_stream(stream).await.unwrap();
    assert_eq!(identity.panel_id, 0x9999);

    // Every object is new again, so labels are reported without a previous value.
    let event = next_matching(&mut rx, |e| match e {
        PanelEvent::Change(cs) => {
            cs.container == Container::Zone && cs.key == Key::Index(5) && cs.get("label").is_some()
        }
        _ => false,
    })
    .await;
    let PanelEvent::Change(cs) = event else { unreachable!() };
    let label = cs.get("label").unwrap();
    assert_eq!(label.old, None);
    assert_eq!(label.new, Value::from("Living room"));
}

#[tokio::test]
async fn test_evo192_inventory_covers_polled_zones() {
    let (_fake, stream) = FakePanel::start(Behaviour::default());
    let panel = PanelCoordinator::new(builder().limits(limits(None)).build()).unwrap();
    panel.connect_stream(stream).await.unwrap();

    assert_eq!(panel.zones().await.len(), 96);
    assert!(panel.zone(96).await.is_some());
    assert!(panel.zone(97).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_poll_failures_end_session() {
    let (_fake, stream) = FakePanel::start(Behaviour {
        ignore_polls: true,
        ..Default::default()
    });
    let config = builder()
        .poll_interval(Duration::from_secs(1))
        .max_poll_failures(3)
        .build();
    let panel = PanelCoordinator::new(config).unwrap();
    let mut rx = panel.subscribe();
    panel.connect_stream(stream).await.unwrap();

    let started = Instant::now();
    let event = next_matching(&mut rx, is_disconnected).await;
    let PanelEvent::Disconnected { reason: Some(reason) } = event else {
        panic!("session ended without a reason");
    };
    assert!(reason.contains("3 consecutive poll failures"), "{reason}");
    // Ticks at 0 s, 1 s and 2 s, each read timing out after 500 ms.
    assert!(started.elapsed() >= Duration::from_millis(2500));
    assert_eq!(panel.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_run_backs_off_between_attempts() {
    let config = builder()
        .reconnect_backoff(Duration::from_secs(1), Duration::from_secs(60))
        .build();
    let panel = PanelCoordinator::new(config).unwrap();
    let attempts: Arc<StdMutex<Vec<Instant>>> = Arc::default();

    let log = attempts.clone();
    let result = panel
        .run_with(move || {
            let mut log = log.lock().unwrap();
            log.push(Instant::now());
            let error = if log.len() == 10 {
                ParadoxError::Config("giving up".to_string())
            } else {
                ParadoxError::Io(io::Error::from(io::ErrorKind::ConnectionRefused))
            };
            std::future::ready(Err::<tokio::io::DuplexStream, _>(error))
        })
        .await;
    assert!(matches!(result, Err(ParadoxError::Config(_))));
    assert_eq!(panel.state(), ConnectionState::Disconnected);

    let attempts = attempts.lock().unwrap();
    let gaps: Vec<u64> = attempts
        .windows(2)
        .map(|w| (w[1] - w[0]).as_secs_f64().round() as u64)
        .collect();
    assert_eq!(gaps, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
}

#[tokio::test]
async fn test_run_reconnects_after_panel_closes_session() {
    let (first, first_stream) = FakePanel::start(Behaviour::default());
    let (second, second_stream) = FakePanel::start(Behaviour::default());
    let streams = Arc::new(StdMutex::new(VecDeque::from([first_stream, second_stream])));

    let config = builder()
        .reconnect_backoff(Duration::from_millis(10), Duration::from_millis(50))
        .build();
    let panel = Arc::new(PanelCoordinator::new(config).unwrap());
    let mut rx = panel.subscribe();
    let runner = tokio::spawn({
        let panel = panel.clone();
        async move {
            panel
                .run_with(move || {
                    let next = streams.lock().unwrap().pop_front();
                    std::future::ready(next.ok_or_else(|| ParadoxError::Config("no more panels".to_string())))
                })
                .await
        }
    });

    next_matching(&mut rx, is_inventory_complete).await;
    first.inject(&will_disconnect()).await;
    next_matching(&mut rx, is_disconnected).await;
    next_matching(&mut rx, is_inventory_complete).await;

    assert_eq!(panel.state(), ConnectionState::Running);
    assert!(second.requests().iter().any(|f| f[0] == 0x00));
    assert_eq!(panel.partition(1).await.unwrap().current_state, PartitionState::Disarmed);

    panel.disconnect().await;
    assert!(runner.await.unwrap().is_ok());
}
