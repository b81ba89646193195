// MIT License - Copyright (c) 2026 Peter Wright
// MQTT bridge

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use clap::Parser;
use rumqttc::{AsyncClient, Event as MqttEvent, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use paradox_bridge::{
    ArmMode, ChangeSet, ConnectionState, Container, DoorCommand, Event, InventoryLimits, Key, PanelConfig,
    PanelCoordinator, PanelEvent, PanelIdentity, PanicType, PgmCommand,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "paradox2mqtt")]
#[command(about = "Bridge between a Paradox alarm panel and MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    panel: PanelToml,
    mqtt: MqttToml,
    #[serde(default)]
    limits: LimitsToml,
}

#[derive(Debug, Deserialize)]
struct PanelToml {
    /// Host of the serial-over-IP bridge (ser2net, IP150 in serial mode, ...)
    host: String,
    #[serde(default = "default_panel_port")]
    port: u16,
    #[serde(default = "default_pc_password")]
    pc_password: String,
    #[serde(default)]
    user_code: Option<String>,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default = "default_poll_interval")]
    poll_interval_secs: u64,
    #[serde(default = "default_action_timeout")]
    action_timeout_ms: u64,
    #[serde(default = "default_io_timeout")]
    io_timeout_ms: u64,
    #[serde(default = "default_reconnect_base")]
    reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max")]
    reconnect_max_secs: u64,
    #[serde(default = "default_max_poll_failures")]
    max_poll_failures: u32,
    #[serde(default)]
    sync_time: bool,
}

fn default_panel_port() -> u16 {
    10000
}
fn default_pc_password() -> String {
    "0000".to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_poll_interval() -> u64 {
    5
}
fn default_action_timeout() -> u64 {
    2000
}
fn default_io_timeout() -> u64 {
    1000
}
fn default_reconnect_base() -> u64 {
    1000
}
fn default_reconnect_max() -> u64 {
    60
}
fn default_max_poll_failures() -> u32 {
    3
}

/// Per-container caps on the inventory download.
#[derive(Debug, Default, Deserialize)]
struct LimitsToml {
    partitions: Option<u32>,
    zones: Option<u32>,
    pgms: Option<u32>,
    users: Option<u32>,
    doors: Option<u32>,
    modules: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_topic_prefix")]
    topic_prefix: String,
}

fn default_client_id() -> String {
    "paradox2mqtt".to_string()
}
fn default_topic_prefix() -> String {
    "paradox".to_string()
}

fn build_panel_config(config: &Config) -> Result<PanelConfig> {
    let panel = &config.panel;
    let limits = &config.limits;
    let mut builder = PanelConfig::builder()
        .host(&panel.host)
        .port(panel.port)
        .pc_password(&panel.pc_password)
        .language(&panel.language)
        .poll_interval(Duration::from_secs(panel.poll_interval_secs))
        .action_timeout(Duration::from_millis(panel.action_timeout_ms))
        .io_timeout(Duration::from_millis(panel.io_timeout_ms))
        .reconnect_backoff(
            Duration::from_millis(panel.reconnect_base_ms),
            Duration::from_secs(panel.reconnect_max_secs),
        )
        .max_poll_failures(panel.max_poll_failures)
        .sync_time(panel.sync_time)
        .limits(InventoryLimits {
            partitions: limits.partitions,
            zones: limits.zones,
            pgms: limits.pgms,
            users: limits.users,
            doors: limits.doors,
            modules: limits.modules,
        });
    if let Some(code) = &panel.user_code {
        builder = builder.user_code(code);
    }
    let panel_config = builder.build();
    panel_config.validate().context("Invalid [panel] settings")?;
    Ok(panel_config)
}

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

/// Retained on `<prefix>/interface`.
#[derive(Serialize)]
struct MqttInterfaceState<'a> {
    now: u64,
    state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    panel: Option<PanelIdentity>,
}

/// Published on `<prefix>/events`.
#[derive(Serialize)]
struct MqttLiveEvent<'a> {
    now: u64,
    #[serde(flatten)]
    event: &'a Event,
}

/// Published on `<prefix>/control/result` for every command.
#[derive(Serialize)]
struct MqttCmdAck {
    now: u64,
    op: &'static str,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

fn default_arm_mode() -> ArmMode {
    ArmMode::Away
}
fn default_true() -> bool {
    true
}
fn default_user() -> u16 {
    1
}

/// Inbound command on `<prefix>/control`.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
enum MqttCommand {
    Arm {
        partition: u32,
        #[serde(default = "default_arm_mode")]
        mode: ArmMode,
    },
    Disarm {
        partition: u32,
    },
    Bypass {
        zone: u32,
        #[serde(default = "default_true")]
        bypass: bool,
    },
    ClearAlarmMemory {
        zone: u32,
    },
    Pgm {
        pgm: u32,
        command: PgmCommand,
    },
    Door {
        door: u32,
        command: DoorCommand,
        #[serde(default = "default_user")]
        user: u16,
    },
    Panic {
        partition: u32,
        panic: PanicType,
        #[serde(default = "default_user")]
        user: u16,
    },
    /// Without a time the host clock is used.
    SetTime {
        #[serde(default)]
        time: Option<NaiveDateTime>,
    },
    RequestEvents {
        from: u16,
    },
}

impl MqttCommand {
    fn op(&self) -> &'static str {
        match self {
            Self::Arm { .. } => "arm",
            Self::Disarm { .. } => "disarm",
            Self::Bypass { .. } => "bypass",
            Self::ClearAlarmMemory { .. } => "clear_alarm_memory",
            Self::Pgm { .. } => "pgm",
            Self::Door { .. } => "door",
            Self::Panic { .. } => "panic",
            Self::SetTime { .. } => "set_time",
            Self::RequestEvents { .. } => "request_events",
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

fn state_topic(prefix: &str, container: Container, key: &str, field: &str) -> String {
    format!("{prefix}/states/{container}/{key}/{field}")
}

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize, retain: bool) {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, retain, json).await {
                error!("Failed to publish to {topic}: {e}");
            }
        }
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

async fn publish_interface(
    client: &AsyncClient,
    prefix: &str,
    panel: &PanelCoordinator,
    state: ConnectionState,
    reason: Option<&str>,
) {
    let msg = MqttInterfaceState {
        now: now_epoch_ms(),
        state,
        reason,
        panel: panel.identity().await,
    };
    publish_json(client, &format!("{prefix}/interface"), &msg, true).await;
}

/// Topic segment for an object: its label key once the inventory named it.
async fn topic_key(panel: &PanelCoordinator, container: Container, key: &Key) -> String {
    panel
        .object(container, key)
        .await
        .and_then(|obj| obj.get("key").and_then(|k| k.as_str()).map(str::to_string))
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| key.to_string())
}

async fn publish_changes(client: &AsyncClient, prefix: &str, panel: &PanelCoordinator, changes: &ChangeSet) {
    let key = topic_key(panel, changes.container, &changes.key).await;
    for change in &changes.changes {
        let topic = state_topic(prefix, changes.container, &key, &change.field);
        publish_json(client, &topic, &change.new, true).await;
    }
}

async fn handle_panel_event(event: PanelEvent, client: &AsyncClient, prefix: &str, panel: &PanelCoordinator) {
    match event {
        PanelEvent::StateChanged(state) => {
            publish_interface(client, prefix, panel, state, None).await;
        }
        PanelEvent::Connected(identity) => {
            info!("Panel connected: {} firmware {}", identity.product, identity.firmware);
        }
        PanelEvent::InventoryComplete => {
            info!("Inventory complete, publishing live state");
        }
        PanelEvent::Change(changes) => {
            publish_changes(client, prefix, panel, &changes).await;
        }
        PanelEvent::Live(event) => {
            debug!("Event: {}", event.message);
            let msg = MqttLiveEvent {
                now: now_epoch_ms(),
                event: &event,
            };
            publish_json(client, &format!("{prefix}/events"), &msg, false).await;
        }
        PanelEvent::Disconnected { reason } => {
            publish_interface(client, prefix, panel, ConnectionState::Disconnected, reason.as_deref()).await;
        }
    }
}

// ---------------------------------------------------------------------------
// MQTT command handler
// ---------------------------------------------------------------------------

async fn handle_command(cmd: MqttCommand, client: &AsyncClient, prefix: &str, panel: &PanelCoordinator) {
    let op = cmd.op();
    let mut data = None;
    let result = match cmd {
        MqttCommand::Arm { partition, mode } => panel.arm(partition, mode).await,
        MqttCommand::Disarm { partition } => panel.disarm(partition).await,
        MqttCommand::Bypass { zone, bypass } => panel.bypass(zone, bypass).await,
        MqttCommand::ClearAlarmMemory { zone } => panel.clear_alarm_memory(zone).await,
        MqttCommand::Pgm { pgm, command } => panel.pgm(pgm, command).await,
        MqttCommand::Door { door, command, user } => panel.door(door, command, user).await,
        MqttCommand::Panic { partition, panic, user } => panel.panic(partition, panic, user).await,
        MqttCommand::SetTime { time } => {
            let time = time.unwrap_or_else(|| chrono::Local::now().naive_local());
            panel.set_time(time).await
        }
        MqttCommand::RequestEvents { from } => match panel.request_events(from).await {
            Ok(events) => {
                data = serde_json::to_value(&events).ok();
                Ok(())
            }
            Err(e) => Err(e),
        },
    };
    let error = match result {
        Ok(()) => {
            info!("{op}: success");
            None
        }
        Err(e) => {
            error!("{op} failed: {e}");
            Some(e.to_string())
        }
    };
    let ack = MqttCmdAck {
        now: now_epoch_ms(),
        op,
        success: error.is_none(),
        error,
        data,
    };
    publish_json(client, &format!("{prefix}/control/result"), &ack, false).await;
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn load_config(path: &str) -> Result<Config> {
    let text = std::fs::read_to_string(path).context("Failed to read config file")?;
    toml::from_str(&text).context("Failed to parse config file")
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=paradox_bridge=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        let panel_config = build_panel_config(&config)?;
        let (mqtt_host, mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;
        let prefix = config.mqtt.topic_prefix.trim_end_matches('/').to_string();
        let control_topic = format!("{prefix}/control");

        let panel = Arc::new(PanelCoordinator::new(panel_config)?);

        // Set up MQTT
        let mut mqtt_opts = MqttOptions::new(&config.mqtt.client_id, &mqtt_host, mqtt_port);
        mqtt_opts.set_keep_alive(Duration::from_secs(30));
        mqtt_opts.set_last_will(rumqttc::LastWill::new(
            format!("{prefix}/interface"),
            r#"{"state":"disconnected"}"#,
            QoS::AtLeastOnce,
            true,
        ));
        let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

        // Task 1: panel events to MQTT
        let mut event_rx = panel.subscribe();
        let panel_events = Arc::clone(&panel);
        let client_events = client.clone();
        let prefix_events = prefix.clone();
        let event_handle = tokio::spawn(async move {
            loop {
                match event_rx.recv().await {
                    Ok(event) => handle_panel_event(event, &client_events, &prefix_events, &panel_events).await,
                    Err(RecvError::Lagged(n)) => warn!("Event receiver lagged, missed {n} events"),
                    Err(RecvError::Closed) => {
                        info!("Event channel closed");
                        break;
                    }
                }
            }
        });

        // Task 2: MQTT event loop (receives messages, handles commands)
        let panel_cmds = Arc::clone(&panel);
        let client_cmds = client.clone();
        let prefix_cmds = prefix.clone();
        let mqtt_handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => {
                        // rumqttc does not resubscribe after a broker reconnect.
                        info!("MQTT: connected, subscribing to {control_topic}");
                        if let Err(e) = client_cmds.subscribe(&control_topic, QoS::AtLeastOnce).await {
                            error!("Failed to subscribe to {control_topic}: {e}");
                        }
                    }
                    Ok(MqttEvent::Incoming(Packet::Publish(msg))) if msg.topic == control_topic => {
                        let payload = String::from_utf8_lossy(&msg.payload);
                        match serde_json::from_str::<MqttCommand>(&payload) {
                            Ok(cmd) => {
                                info!("MQTT command received: {payload}");
                                let panel = Arc::clone(&panel_cmds);
                                let client = client_cmds.clone();
                                let prefix = prefix_cmds.clone();
                                tokio::spawn(async move {
                                    handle_command(cmd, &client, &prefix, &panel).await;
                                });
                            }
                            Err(e) => warn!("Failed to parse MQTT command: {e}"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT event loop error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        // Task 3: panel session with reconnects
        let panel_run = Arc::clone(&panel);
        let mut run_handle = tokio::spawn(async move { panel_run.run().await });

        info!("MQTT bridge running. Send SIGHUP to restart, SIGINT/SIGTERM to stop.");
        let mut finished = None;
        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                false
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading config and restarting connections...");
                true
            }
            result = &mut run_handle => {
                finished = Some(result);
                false
            }
        };

        panel.disconnect().await;
        let outcome = match finished {
            Some(result) => result,
            None => run_handle.await,
        };
        event_handle.abort();
        mqtt_handle.abort();
        if let Err(e) = client.disconnect().await {
            debug!("MQTT disconnect: {e}");
        }

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e).context("Panel session stopped"),
            Err(e) => warn!("Panel task ended abnormally: {e}"),
        }

        if !restart {
            break;
        }

        // Reload config from disk; keep previous config on failure
        info!("Reloading config from {}", cli.config);
        match load_config(&cli.config).and_then(|new_config| {
            build_panel_config(&new_config)?;
            parse_mqtt_url(&new_config.mqtt.url)?;
            Ok(new_config)
        }) {
            Ok(new_config) => {
                config = new_config;
                info!("Config reloaded successfully");
            }
            Err(e) => warn!("Failed to reload config, keeping previous: {e:#}"),
        }

        info!("Reconnecting...");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;

    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mqtt_url() {
        assert_eq!(parse_mqtt_url("mqtt://broker:1883").unwrap(), ("broker".to_string(), 1883));
        assert_eq!(parse_mqtt_url("10.0.0.2:8883").unwrap(), ("10.0.0.2".to_string(), 8883));
        assert!(parse_mqtt_url("mqtt://broker").is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config: Config = toml::from_str(
            r#"
            [panel]
            host = "192.168.1.20"

            [mqtt]
            url = "mqtt://localhost:1883"
            "#,
        )
        .unwrap();
        let panel = build_panel_config(&config).unwrap();
        assert_eq!(panel.port, 10000);
        assert_eq!(panel.pc_password, "0000");
        assert_eq!(panel.poll_interval, Duration::from_secs(5));
        assert_eq!(panel.reconnect_max, Duration::from_secs(60));
        assert_eq!(config.mqtt.topic_prefix, "paradox");
        assert_eq!(panel.limits, InventoryLimits::default());
    }

    #[test]
    fn test_bad_password_is_rejected() {
        let config: Config = toml::from_str(
            r#"
            [panel]
            host = "panel"
            pc_password = "12"

            [mqtt]
            url = "mqtt://localhost:1883"
            "#,
        )
        .unwrap();
        assert!(build_panel_config(&config).is_err());
    }

    #[test]
    fn test_parse_commands() {
        let cmd: MqttCommand = serde_json::from_str(r#"{"op":"arm","partition":2,"mode":"stay"}"#).unwrap();
        assert_eq!(
            cmd,
            MqttCommand::Arm {
                partition: 2,
                mode: ArmMode::Stay
            }
        );
        let cmd: MqttCommand = serde_json::from_str(r#"{"op":"bypass","zone":7}"#).unwrap();
        assert_eq!(cmd, MqttCommand::Bypass { zone: 7, bypass: true });
        let cmd: MqttCommand = serde_json::from_str(r#"{"op":"pgm","pgm":3,"command":"on_override"}"#).unwrap();
        assert_eq!(cmd.op(), "pgm");
        assert!(serde_json::from_str::<MqttCommand>(r#"{"op":"reboot"}"#).is_err());
    }

    #[test]
    fn test_state_topic() {
        assert_eq!(
            state_topic("paradox", Container::Zone, "Living_room", "open"),
            "paradox/states/zone/Living_room/open"
        );
    }
}
