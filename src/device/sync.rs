//! DeviceSyncer: periodic polling of one remote device
//!
//! A single owner loop holds the snapshot and the connection state. The
//! interval timer and finished polls both arrive as events on that loop, so
//! nothing else mutates state. Polls run as spawned tasks and may overlap;
//! each carries the sequence number it was issued with and results older
//! than the last applied one are dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{self, MissedTickBehavior};

use crate::config::Config;
use crate::device::client::DeviceClient;
use crate::error::SyncError;
use crate::models::{CommandResult, ConnectionStatus, DeviceState, SecurityAlert, SyncSnapshot};

/// Syncer timing and target
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub device_id: String,
    pub poll_interval: Duration,
    /// Delay before the extra poll that follows an accepted command
    pub follow_up_delay: Duration,
    pub night_mode: bool,
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            device_id: config.device.device_id.clone(),
            poll_interval: config.device.poll_interval(),
            follow_up_delay: config.device.follow_up_delay(),
            night_mode: config.security.night_mode,
        }
    }
}

/// Events published to the UI layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncEvent {
    Connected,
    Disconnected { reason: String },
    StateUpdated { seq: u64, stale_keys: Vec<String> },
    CommandSent { command: String, message: String },
    CommandFailed { command: String, message: String },
    SecurityAlert(SecurityAlert),
}

#[derive(Debug)]
enum PollOutcome {
    /// Liveness probe failed, state was not read
    Unreachable,
    Fetched(Result<DeviceState, SyncError>),
}

#[derive(Debug)]
enum Inbox {
    PollFinished { seq: u64, outcome: PollOutcome },
    PollNow,
    SetNightMode(bool),
}

// ============================================================================
// Owner state
// ============================================================================

struct SyncState {
    snapshot: SyncSnapshot,
    issued_seq: u64,
}

impl SyncState {
    fn new(device_id: &str, fallback: DeviceState, night_mode: bool) -> Self {
        Self {
            snapshot: SyncSnapshot::initial(device_id, fallback, night_mode),
            issued_seq: 0,
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.issued_seq += 1;
        self.issued_seq
    }

    /// Anything but a confirmed connection re-probes before reading
    fn needs_probe(&self) -> bool {
        !self.snapshot.status.connected()
    }

    /// Apply a finished poll. Returns the events it produced; empty when the result was stale.
    fn apply(&mut self, seq: u64, outcome: PollOutcome) -> Vec<SyncEvent> {
        if seq <= self.snapshot.last_seq {
            tracing::debug!(
                "[DeviceSync] Discarding poll #{} (already applied #{})",
                seq,
                self.snapshot.last_seq
            );
            return Vec::new();
        }
        self.snapshot.last_seq = seq;

        let mut events = Vec::new();
        match outcome {
            PollOutcome::Unreachable => {
                events.extend(self.transition(ConnectionStatus::Disconnected, "liveness probe failed"));
            }
            PollOutcome::Fetched(Err(e)) => {
                // Last-known state stays in place
                events.extend(self.transition(ConnectionStatus::Disconnected, &e.to_string()));
            }
            PollOutcome::Fetched(Ok(state)) => {
                events.extend(self.transition(ConnectionStatus::Connected, ""));

                let stale_keys = if self.snapshot.is_fallback {
                    Vec::new()
                } else {
                    state.stale_keys(&self.snapshot.state)
                };
                if !stale_keys.is_empty() {
                    tracing::debug!("[DeviceSync] Poll #{} has stale readings: {:?}", seq, stale_keys);
                }

                self.snapshot.state = state;
                self.snapshot.is_fallback = false;
                self.snapshot.stale_keys = stale_keys.clone();
                self.snapshot.updated_at = Some(Utc::now());
                events.push(SyncEvent::StateUpdated { seq, stale_keys });
                events.extend(self.check_security());
            }
        }
        events
    }

    fn set_night_mode(&mut self, enabled: bool) -> Option<SyncEvent> {
        if self.snapshot.night_mode != enabled {
            tracing::info!(
                "[DeviceSync] Night mode {} for {}",
                if enabled { "enabled" } else { "disabled" },
                self.snapshot.device_id
            );
        }
        self.snapshot.night_mode = enabled;
        self.check_security()
    }

    /// Raise an alert once per door reading that is `OPEN` while night mode is on
    fn check_security(&mut self) -> Option<SyncEvent> {
        let open_door = self
            .snapshot
            .state
            .get("Door")
            .filter(|reading| self.snapshot.night_mode && !self.snapshot.is_fallback && reading.value == "OPEN");

        let Some(reading) = open_door else {
            self.snapshot.security_alert = None;
            return None;
        };

        let alert = SecurityAlert::door_opened(reading);
        let already_raised = self
            .snapshot
            .security_alert
            .as_ref()
            .is_some_and(|current| current.timestamp == alert.timestamp);
        self.snapshot.security_alert = Some(alert.clone());

        if already_raised {
            return None;
        }
        tracing::warn!("[DeviceSync] SECURITY ALERT for {}: {}", self.snapshot.device_id, alert.message);
        Some(SyncEvent::SecurityAlert(alert))
    }

    fn transition(&mut self, to: ConnectionStatus, reason: &str) -> Option<SyncEvent> {
        let from = self.snapshot.status;
        if from == to {
            return None;
        }
        self.snapshot.status = to;
        self.snapshot.connected = to.connected();

        match to {
            ConnectionStatus::Connected => {
                tracing::info!("[DeviceSync] {} connected (was {})", self.snapshot.device_id, from);
                Some(SyncEvent::Connected)
            }
            ConnectionStatus::Disconnected => {
                tracing::warn!(
                    "[DeviceSync] {} disconnected (was {}): {}",
                    self.snapshot.device_id,
                    from,
                    reason
                );
                Some(SyncEvent::Disconnected {
                    reason: reason.to_string(),
                })
            }
            ConnectionStatus::Unknown => None,
        }
    }
}

// ============================================================================
// Syncer
// ============================================================================

/// Background synchronization service for one device
pub struct DeviceSyncer {
    client: Arc<DeviceClient>,
    options: SyncOptions,
    state: SyncState,
    inbox_tx: mpsc::Sender<Inbox>,
    snapshot_tx: watch::Sender<SyncSnapshot>,
    events_tx: broadcast::Sender<SyncEvent>,
}

impl DeviceSyncer {
    /// Start the poll loop and return a handle to it
    pub fn spawn(client: Arc<DeviceClient>, options: SyncOptions) -> SyncHandle {
        let (inbox_tx, inbox_rx) = mpsc::channel(64);
        let state = SyncState::new(&options.device_id, client.fallback_state(), options.night_mode);
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot.clone());
        let (events_tx, _) = broadcast::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = SyncHandle {
            client: client.clone(),
            device_id: options.device_id.clone(),
            follow_up_delay: options.follow_up_delay,
            inbox_tx: inbox_tx.clone(),
            snapshot_rx,
            events_tx: events_tx.clone(),
            shutdown_tx: Arc::new(shutdown_tx),
        };

        let syncer = Self {
            client,
            state,
            options,
            inbox_tx,
            snapshot_tx,
            events_tx,
        };
        tokio::spawn(syncer.run(inbox_rx, shutdown_rx));

        handle
    }

    async fn run(mut self, mut inbox_rx: mpsc::Receiver<Inbox>, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::info!(
            "[DeviceSync] Starting sync for {} (interval: {:?})",
            self.options.device_id,
            self.options.poll_interval
        );

        // First tick fires immediately: the initial probe
        let mut ticker = time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.issue_poll(),
                Some(msg) = inbox_rx.recv() => self.handle(msg),
                _ = shutdown_rx.changed() => break,
            }
        }

        tracing::info!("[DeviceSync] Stopped sync for {}", self.options.device_id);
    }

    fn handle(&mut self, msg: Inbox) {
        match msg {
            Inbox::PollNow => self.issue_poll(),
            Inbox::SetNightMode(enabled) => {
                let event = self.state.set_night_mode(enabled);
                self.snapshot_tx.send_replace(self.state.snapshot.clone());
                if let Some(event) = event {
                    let _ = self.events_tx.send(event);
                }
            }
            Inbox::PollFinished { seq, outcome } => {
                let applied_before = self.state.snapshot.last_seq;
                let events = self.state.apply(seq, outcome);
                if self.state.snapshot.last_seq == applied_before {
                    return;
                }
                self.snapshot_tx.send_replace(self.state.snapshot.clone());
                for event in events {
                    let _ = self.events_tx.send(event);
                }
            }
        }
    }

    fn issue_poll(&mut self) {
        let seq = self.state.next_seq();
        let probe_first = self.state.needs_probe();
        let client = self.client.clone();
        let device_id = self.options.device_id.clone();
        let inbox_tx = self.inbox_tx.clone();

        tracing::debug!("[DeviceSync] Poll #{} for {} (probe: {})", seq, device_id, probe_first);

        tokio::spawn(async move {
            let outcome = if probe_first && !client.probe().await {
                PollOutcome::Unreachable
            } else {
                PollOutcome::Fetched(client.try_fetch_state(&device_id).await)
            };
            // Loop may have stopped meanwhile
            let _ = inbox_tx.send(Inbox::PollFinished { seq, outcome }).await;
        });
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable access to a running syncer
#[derive(Clone)]
pub struct SyncHandle {
    client: Arc<DeviceClient>,
    device_id: String,
    follow_up_delay: Duration,
    inbox_tx: mpsc::Sender<Inbox>,
    snapshot_rx: watch::Receiver<SyncSnapshot>,
    events_tx: broadcast::Sender<SyncEvent>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl SyncHandle {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn client(&self) -> &Arc<DeviceClient> {
        &self.client
    }

    /// Copy of the current view
    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.snapshot_rx.borrow().status
    }

    pub fn watch(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.inbox_tx.is_closed()
    }

    /// Ask for an immediate poll. False when the loop has stopped.
    pub async fn refresh(&self) -> bool {
        self.inbox_tx.send(Inbox::PollNow).await.is_ok()
    }

    /// Flip the night-mode switch. False when the loop has stopped.
    pub async fn set_night_mode(&self, enabled: bool) -> bool {
        self.inbox_tx.send(Inbox::SetNightMode(enabled)).await.is_ok()
    }

    /// Dispatch a command to the device, at most once.
    ///
    /// Refused locally while not connected. An accepted command schedules one
    /// follow-up poll.
    pub async fn send_command(&self, command: &str) -> CommandResult {
        if !self.status().connected() {
            let result = CommandResult::failed("Device is not connected");
            self.publish_command(command, &result);
            return result;
        }

        let result = self.client.send_command(&self.device_id, command).await;
        self.publish_command(command, &result);

        if result.ok {
            let inbox_tx = self.inbox_tx.clone();
            let delay = self.follow_up_delay;
            tokio::spawn(async move {
                time::sleep(delay).await;
                let _ = inbox_tx.send(Inbox::PollNow).await;
            });
        }

        result
    }

    /// Cancel the poll timer. In-flight requests finish but their results are dropped.
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    fn publish_command(&self, command: &str, result: &CommandResult) {
        let event = if result.ok {
            tracing::info!("[DeviceSync] Command {} sent to {}", command, self.device_id);
            SyncEvent::CommandSent {
                command: command.to_string(),
                message: result.message.clone(),
            }
        } else {
            tracing::warn!(
                "[DeviceSync] Command {} for {} failed: {}",
                command,
                self.device_id,
                result.message
            );
            SyncEvent::CommandFailed {
                command: command.to_string(),
                message: result.message.clone(),
            }
        };
        let _ = self.events_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::hub::{self, HubState};
    use crate::models::SensorReading;
    use axum::{routing::get, Json, Router};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn reading_state(value: &str, ts: &str) -> DeviceState {
        [("Door".to_string(), SensorReading::new(value, ts))]
            .into_iter()
            .collect()
    }

    fn sync_state(night_mode: bool) -> SyncState {
        let fallback = [("Door".to_string(), SensorReading::new("CLOSED", "2030-01-01T00:00:00Z"))]
            .into_iter()
            .collect();
        SyncState::new("E1", fallback, night_mode)
    }

    fn door(state: &SyncState) -> &str {
        &state.snapshot.state.get("Door").unwrap().value
    }

    // ------------------------------------------------------------------------
    // Owner state
    // ------------------------------------------------------------------------

    #[test]
    fn test_first_successful_poll_connects() {
        let mut state = sync_state(false);
        assert!(state.needs_probe());

        let seq = state.next_seq();
        let events = state.apply(seq, PollOutcome::Fetched(Ok(reading_state("OPEN", "2024-01-01T00:00:00Z"))));

        assert_eq!(
            events,
            vec![
                SyncEvent::Connected,
                SyncEvent::StateUpdated { seq: 1, stale_keys: vec![] }
            ]
        );
        assert_eq!(state.snapshot.status, ConnectionStatus::Connected);
        assert!(state.snapshot.connected);
        assert!(!state.needs_probe());
        assert!(!state.snapshot.is_fallback);
        assert_eq!(door(&state), "OPEN");
    }

    #[test]
    fn test_failed_probe_goes_offline() {
        let mut state = sync_state(false);
        let seq = state.next_seq();
        let events = state.apply(seq, PollOutcome::Unreachable);

        assert!(matches!(events.as_slice(), [SyncEvent::Disconnected { .. }]));
        assert!(!state.snapshot.connected);
        // Offline from startup still shows every known key
        assert!(state.snapshot.is_fallback);
        assert_eq!(door(&state), "CLOSED");

        // Still unreachable: no repeated notification
        let seq = state.next_seq();
        assert!(state.apply(seq, PollOutcome::Unreachable).is_empty());
    }

    #[test]
    fn test_failed_poll_keeps_last_known_state() {
        let mut state = sync_state(false);
        let seq = state.next_seq();
        state.apply(seq, PollOutcome::Fetched(Ok(reading_state("OPEN", "2024-01-01T00:00:00Z"))));

        let seq = state.next_seq();
        let events = state.apply(
            seq,
            PollOutcome::Fetched(Err(SyncError::Protocol("HTTP status 500".to_string()))),
        );

        assert_eq!(
            events,
            vec![SyncEvent::Disconnected {
                reason: "Protocol error: HTTP status 500".to_string()
            }]
        );
        assert_eq!(state.snapshot.status, ConnectionStatus::Disconnected);
        assert_eq!(door(&state), "OPEN");
        assert!(state.needs_probe());
    }

    #[test]
    fn test_stale_arrivals_are_discarded() {
        let mut state = sync_state(false);
        let older = state.next_seq();
        let newer = state.next_seq();

        state.apply(newer, PollOutcome::Fetched(Ok(reading_state("CLOSED", "2024-01-01T00:00:10Z"))));
        let events = state.apply(older, PollOutcome::Fetched(Ok(reading_state("OPEN", "2024-01-01T00:00:00Z"))));

        assert!(events.is_empty());
        assert_eq!(state.snapshot.last_seq, newer);
        assert_eq!(door(&state), "CLOSED");
    }

    #[test]
    fn test_backwards_timestamps_are_flagged_not_filtered() {
        let mut state = sync_state(false);
        let seq = state.next_seq();
        state.apply(seq, PollOutcome::Fetched(Ok(reading_state("OPEN", "2024-01-01T00:00:10Z"))));

        let seq = state.next_seq();
        let events = state.apply(seq, PollOutcome::Fetched(Ok(reading_state("CLOSED", "2024-01-01T00:00:00Z"))));

        assert_eq!(
            events,
            vec![SyncEvent::StateUpdated { seq: 2, stale_keys: vec!["Door".to_string()] }]
        );
        // Snapshot is replaced wholesale
        assert_eq!(door(&state), "CLOSED");
        assert_eq!(state.snapshot.stale_keys, vec!["Door".to_string()]);
    }

    #[test]
    fn test_first_read_is_not_compared_to_fallback() {
        let mut state = sync_state(false);
        let seq = state.next_seq();
        let events = state.apply(seq, PollOutcome::Fetched(Ok(reading_state("OPEN", "2024-01-01T00:00:00Z"))));

        assert_eq!(
            events,
            vec![
                SyncEvent::Connected,
                SyncEvent::StateUpdated { seq: 1, stale_keys: vec![] }
            ]
        );
    }

    #[test]
    fn test_open_door_in_night_mode_raises_alert_once() {
        let mut state = sync_state(true);
        let seq = state.next_seq();
        let events = state.apply(seq, PollOutcome::Fetched(Ok(reading_state("OPEN", "2024-01-01T23:00:00Z"))));

        let alert = state.snapshot.security_alert.clone().unwrap();
        assert_eq!(alert.timestamp, "2024-01-01T23:00:00Z");
        assert_eq!(events.last(), Some(&SyncEvent::SecurityAlert(alert)));

        // Same reading polled again: alert stays up, no new event
        let seq = state.next_seq();
        let events = state.apply(seq, PollOutcome::Fetched(Ok(reading_state("OPEN", "2024-01-01T23:00:00Z"))));
        assert_eq!(events, vec![SyncEvent::StateUpdated { seq: 2, stale_keys: vec![] }]);
        assert!(state.snapshot.security_alert.is_some());

        // Door reopened later: a new alert
        let seq = state.next_seq();
        let events = state.apply(seq, PollOutcome::Fetched(Ok(reading_state("OPEN", "2024-01-01T23:30:00Z"))));
        assert!(matches!(events.last(), Some(SyncEvent::SecurityAlert(_))));

        let seq = state.next_seq();
        state.apply(seq, PollOutcome::Fetched(Ok(reading_state("CLOSED", "2024-01-01T23:40:00Z"))));
        assert!(state.snapshot.security_alert.is_none());
    }

    #[test]
    fn test_open_door_without_night_mode_is_quiet() {
        let mut state = sync_state(false);
        let seq = state.next_seq();
        let events = state.apply(seq, PollOutcome::Fetched(Ok(reading_state("OPEN", "2024-01-01T23:00:00Z"))));

        assert!(!events.iter().any(|e| matches!(e, SyncEvent::SecurityAlert(_))));
        assert!(state.snapshot.security_alert.is_none());
    }

    #[test]
    fn test_toggling_night_mode() {
        let mut state = sync_state(false);
        // Fallback door is never an intrusion
        assert_eq!(state.set_night_mode(true), None);

        let seq = state.next_seq();
        state.apply(seq, PollOutcome::Fetched(Ok(reading_state("CLOSED", "2024-01-01T22:00:00Z"))));
        state.set_night_mode(false);

        let seq = state.next_seq();
        state.apply(seq, PollOutcome::Fetched(Ok(reading_state("OPEN", "2024-01-01T23:00:00Z"))));
        assert!(state.snapshot.security_alert.is_none());

        // Switched on while the door is already open
        assert!(matches!(state.set_night_mode(true), Some(SyncEvent::SecurityAlert(_))));
        assert!(state.snapshot.night_mode);

        assert_eq!(state.set_night_mode(false), None);
        assert!(state.snapshot.security_alert.is_none());
    }

    // ------------------------------------------------------------------------
    // Running loop
    // ------------------------------------------------------------------------

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn spawn_syncer(addr: SocketAddr, extension: &str) -> SyncHandle {
        spawn_syncer_every(addr, extension, Duration::from_millis(50))
    }

    fn spawn_syncer_every(addr: SocketAddr, extension: &str, poll_interval: Duration) -> SyncHandle {
        let config = DeviceConfig {
            base_url: format!("http://{}/api", addr),
            endpoint_extension: extension.to_string(),
            request_timeout_ms: 1_000,
            probe_timeout_ms: 500,
            ..DeviceConfig::default()
        };
        let client = Arc::new(DeviceClient::new(&config).unwrap());
        DeviceSyncer::spawn(
            client,
            SyncOptions {
                device_id: "E1".to_string(),
                poll_interval,
                follow_up_delay: Duration::from_millis(10),
                night_mode: false,
            },
        )
    }

    fn door_value(snapshot: &SyncSnapshot) -> Option<&str> {
        snapshot.state.get("Door").map(|r| r.value.as_str())
    }

    async fn wait_for(handle: &SyncHandle, pred: impl Fn(&SyncSnapshot) -> bool) -> SyncSnapshot {
        let mut rx = handle.watch();
        time::timeout(Duration::from_secs(5), async {
            loop {
                if pred(&rx.borrow_and_update()) {
                    return rx.borrow().clone();
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("snapshot condition not reached")
    }

    #[tokio::test]
    async fn test_syncer_tracks_hub_state() {
        let hub_state = HubState::default();
        hub_state.report("E1", "Door", "OPEN").await;
        let handle = spawn_syncer(serve(hub::routes("php").with_state(hub_state.clone())).await, "php");

        let snapshot = wait_for(&handle, |s| s.connected && !s.is_fallback).await;
        assert_eq!(door_value(&snapshot), Some("OPEN"));

        hub_state.report("E1", "Door", "CLOSED").await;
        let snapshot = wait_for(&handle, |s| door_value(s) == Some("CLOSED")).await;
        assert_eq!(snapshot.status, ConnectionStatus::Connected);

        handle.stop();
    }

    #[tokio::test]
    async fn test_command_publishes_event_and_reaches_hub() {
        let hub_state = HubState::default();
        hub_state.report("E1", "Light", "OFF").await;
        let handle = spawn_syncer(serve(hub::routes("php").with_state(hub_state.clone())).await, "php");
        wait_for(&handle, |s| s.connected).await;

        let mut events = handle.subscribe();
        let result = handle.send_command("RELAY1_ON").await;
        assert!(result.ok, "{}", result.message);

        let event = time::timeout(Duration::from_secs(2), async {
            loop {
                match events.recv().await.unwrap() {
                    e @ SyncEvent::CommandSent { .. } => return e,
                    _ => continue,
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(
            event,
            SyncEvent::CommandSent {
                command: "RELAY1_ON".to_string(),
                message: "Command queued".to_string()
            }
        );

        let pending = hub_state.drain("E1").await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].command, "RELAY1_ON");

        handle.stop();
    }

    #[tokio::test]
    async fn test_accepted_command_schedules_follow_up_poll() {
        let hub_state = HubState::default();
        hub_state.report("E1", "Light", "OFF").await;
        // Next tick is a minute away: only the follow-up poll can pick up the change
        let handle = spawn_syncer_every(
            serve(hub::routes("php").with_state(hub_state.clone())).await,
            "php",
            Duration::from_secs(60),
        );
        wait_for(&handle, |s| s.connected && !s.is_fallback).await;

        hub_state.report("E1", "Light", "ON").await;
        let result = handle.send_command("RELAY1_ON").await;
        assert!(result.ok, "{}", result.message);

        let snapshot = time::timeout(
            Duration::from_secs(2),
            wait_for(&handle, |s| s.state.get("Light").map(|r| r.value.as_str()) == Some("ON")),
        )
        .await
        .expect("follow-up poll did not run");
        assert_eq!(snapshot.last_seq, 2);

        handle.stop();
    }

    #[tokio::test]
    async fn test_refresh_polls_immediately() {
        let hub_state = HubState::default();
        hub_state.report("E1", "Door", "CLOSED").await;
        let handle = spawn_syncer_every(
            serve(hub::routes("php").with_state(hub_state.clone())).await,
            "php",
            Duration::from_secs(60),
        );
        wait_for(&handle, |s| s.connected && !s.is_fallback).await;

        hub_state.report("E1", "Door", "OPEN").await;
        assert!(handle.refresh().await);

        let snapshot = time::timeout(Duration::from_secs(2), wait_for(&handle, |s| door_value(s) == Some("OPEN")))
            .await
            .expect("refresh did not poll");
        assert_eq!(snapshot.last_seq, 2);

        handle.stop();
    }

    #[tokio::test]
    async fn test_night_mode_alert_reaches_subscribers() {
        let hub_state = HubState::default();
        hub_state.report("E1", "Door", "OPEN").await;
        let handle = spawn_syncer(serve(hub::routes("php").with_state(hub_state)).await, "php");
        wait_for(&handle, |s| s.connected && !s.is_fallback).await;
        assert!(handle.snapshot().security_alert.is_none());

        let mut events = handle.subscribe();
        assert!(handle.set_night_mode(true).await);

        let event = time::timeout(Duration::from_secs(2), async {
            loop {
                if let SyncEvent::SecurityAlert(alert) = events.recv().await.unwrap() {
                    return alert;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event.sensor, "Door");
        assert!(event.message.starts_with("Door opened during night mode at "));

        let snapshot = wait_for(&handle, |s| s.night_mode).await;
        assert_eq!(snapshot.security_alert, Some(event));

        handle.stop();
    }

    #[tokio::test]
    async fn test_command_refused_while_offline() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let handle = spawn_syncer(addr, "php");
        wait_for(&handle, |s| s.status == ConnectionStatus::Disconnected).await;

        let result = handle.send_command("FAN_ON").await;
        assert_eq!(result, CommandResult::failed("Device is not connected"));

        handle.stop();
    }

    #[tokio::test]
    async fn test_reconnects_after_probe_recovers() {
        let online = Arc::new(AtomicBool::new(false));
        let flag = online.clone();
        let router = Router::new()
            .route(
                "/api/test",
                get(move || {
                    let status = if flag.load(Ordering::SeqCst) { "success" } else { "error" };
                    async move { Json(serde_json::json!({ "status": status })) }
                }),
            )
            .route(
                "/api/get_status",
                get(|| async { Json(serde_json::json!({"Fan": {"value": "ON", "timestamp": "2024-01-01 00:00:00"}})) }),
            );
        let handle = spawn_syncer(serve(router).await, "");
        let mut events = handle.subscribe();

        wait_for(&handle, |s| s.status == ConnectionStatus::Disconnected).await;
        online.store(true, Ordering::SeqCst);
        let snapshot = wait_for(&handle, |s| s.connected).await;
        assert_eq!(snapshot.state.get("Fan").unwrap().value, "ON");

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event);
        }
        let disconnected_at = kinds
            .iter()
            .position(|e| matches!(e, SyncEvent::Disconnected { .. }))
            .unwrap();
        let connected_at = kinds.iter().position(|e| *e == SyncEvent::Connected).unwrap();
        assert!(disconnected_at < connected_at);

        handle.stop();
    }

    #[tokio::test]
    async fn test_stop_cancels_polling() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/api/test",
            get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Json(serde_json::json!({"status": "error"})) }
            }),
        );
        let handle = spawn_syncer(serve(router).await, "");
        wait_for(&handle, |s| s.status == ConnectionStatus::Disconnected).await;

        handle.stop();
        time::timeout(Duration::from_secs(2), async {
            while handle.is_running() {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // Let any in-flight probe land, then nothing new may arrive
        time::sleep(Duration::from_millis(100)).await;
        let after_stop = hits.load(Ordering::SeqCst);
        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(hits.load(Ordering::SeqCst), after_stop);
        assert!(!handle.refresh().await);
    }
}
