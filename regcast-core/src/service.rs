//! The synchronisation service.
//!
//! [`SyncService`] owns every piece of mutable state behind one coarse
//! [`RwLock`]: the simulated devices, the subscription registry and the
//! generic channel cache. Two periodic loops run against it:
//!
//! 1. the **simulation** loop advances every device once per
//!    `simulation_tick` (100 ms by default);
//! 2. the **broadcast** loop checks every `broadcast_tick` (10 ms) which
//!    subscribers are due and sends them their delta.
//!
//! Control requests arrive through [`SyncService::handle_message`]. Both
//! loops and every connection share one [`CancellationToken`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::value::RawValue;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::channel::ChannelName;
use crate::channel_store::ChannelStore;
use crate::delta;
use crate::error::RegcastError;
use crate::message::{
    ERR_CHANNEL_NOT_FOUND, ERR_UNKNOWN_TYPE, InspectChannels, InspectReport, Request, RequestKind,
    Response, ResponseKind, to_raw,
};
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::scheduler::{self, BroadcastStats};
use crate::simulation::Simulation;
use crate::store::RegisterStore;
use crate::transport::TransportHandle;

// ── ServiceConfig ────────────────────────────────────────────────

/// Configuration for [`SyncService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Period of the simulation loop.
    pub simulation_tick: Duration,
    /// Period of the broadcast scheduler.
    pub broadcast_tick: Duration,
    /// Devices created at startup, ids `1..=device_count`.
    pub device_count: u32,
    /// Registers per device (1..=65536).
    pub registers_per_device: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            simulation_tick: Duration::from_millis(100),
            broadcast_tick: Duration::from_millis(10),
            device_count: 2,
            registers_per_device: 10_000,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), RegcastError> {
        if self.simulation_tick.is_zero() || self.broadcast_tick.is_zero() {
            return Err(RegcastError::InvalidConfig(
                "tick periods must be non-zero".into(),
            ));
        }
        if self.registers_per_device == 0 || self.registers_per_device > delta::MAX_REGISTERS {
            return Err(RegcastError::InvalidConfig(format!(
                "registers_per_device must be in 1..={}, got {}",
                delta::MAX_REGISTERS,
                self.registers_per_device
            )));
        }
        Ok(())
    }
}

// ── SharedState ──────────────────────────────────────────────────

/// Everything guarded by the service lock.
#[derive(Debug, Default)]
pub struct SharedState {
    pub store: RegisterStore,
    pub registry: SubscriptionRegistry,
    pub channels: ChannelStore,
}

// ── SyncService ──────────────────────────────────────────────────

/// Register simulation and per-subscriber delta broadcaster.
#[derive(Debug)]
pub struct SyncService {
    state: RwLock<SharedState>,
    simulation: Simulation,
    config: ServiceConfig,
}

/// Join handles of the two periodic loops started by [`SyncService::spawn`].
#[derive(Debug)]
pub struct ServiceTasks {
    pub simulation: JoinHandle<()>,
    pub broadcast: JoinHandle<()>,
}

impl ServiceTasks {
    /// Wait for both loops to exit.
    pub async fn join(self) {
        let _ = tokio::join!(self.simulation, self.broadcast);
    }
}

impl SyncService {
    /// Create a service with randomly initialised devices.
    pub fn new(config: ServiceConfig) -> Result<Self, RegcastError> {
        config.validate()?;
        let store = RegisterStore::random(
            config.device_count,
            config.registers_per_device,
            &mut rand::rng(),
        )?;
        Ok(Self::with_store(store, config))
    }

    /// Create a service over an existing store. `device_count` and
    /// `registers_per_device` in `config` are ignored.
    pub fn with_store(store: RegisterStore, config: ServiceConfig) -> Self {
        Self {
            state: RwLock::new(SharedState {
                store,
                ..SharedState::default()
            }),
            simulation: Simulation::new(config.simulation_tick),
            config,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    // ── Periodic tasks ───────────────────────────────────────────

    /// Start the simulation and broadcast loops. Both exit once
    /// `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> ServiceTasks {
        let simulation = tokio::spawn(Arc::clone(&self).simulation_loop(cancel.clone()));
        let broadcast = tokio::spawn(self.broadcast_loop(cancel));
        ServiceTasks {
            simulation,
            broadcast,
        }
    }

    async fn simulation_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.simulation_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            period_ms = self.config.simulation_tick.as_millis() as u64,
            dt_factor = self.simulation.dt_factor(),
            "simulation loop started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let changed = self.advance_all().await;
                    trace!(changed, "simulation tick");
                }
            }
        }

        info!("simulation loop stopped");
    }

    async fn broadcast_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.broadcast_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            period_ms = self.config.broadcast_tick.as_millis() as u64,
            "broadcast loop started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                now = ticker.tick() => {
                    let stats = self.broadcast_at(now).await;
                    if !stats.is_idle() {
                        trace!(
                            due = stats.due,
                            deltas = stats.deltas_sent,
                            bytes = stats.bytes_sent,
                            pruned = stats.pruned,
                            "broadcast tick"
                        );
                    }
                }
            }
        }

        info!("broadcast loop stopped");
    }

    /// Advance every device by one simulation tick. Returns the total
    /// number of registers whose published value changed.
    pub async fn advance_all(&self) -> usize {
        let mut state = self.state.write().await;
        let simulation = self.simulation;
        state
            .store
            .ids()
            .into_iter()
            .filter_map(|id| {
                let device = state.store.get_mut(id)?;
                Some(simulation.advance(device))
            })
            .sum()
    }

    /// Run one broadcast tick as of `now`.
    pub async fn broadcast_at(&self, now: Instant) -> BroadcastStats {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let stats = scheduler::broadcast_due(&state.store, &mut state.registry, now);
        if stats.pruned > 0 {
            debug!(pruned = stats.pruned, "pruned closed subscribers");
        }
        stats
    }

    // ── Control operations ───────────────────────────────────────

    /// Parse and dispatch one inbound control message from `client_id`.
    ///
    /// The connection's id always wins over any `clientId` in the
    /// message. The returned response carries the request's `requestId`.
    pub async fn handle_message(
        &self,
        client_id: &str,
        text: &str,
        transport: &TransportHandle,
    ) -> Response {
        let request: Request = match serde_json::from_str(text) {
            Ok(r) => r,
            Err(e) => {
                debug!(client_id, "rejecting malformed message: {e}");
                return Response::error(format!("unmarshal error: {e}"));
            }
        };

        let response = match request.kind {
            RequestKind::Subscribe => {
                self.subscribe(client_id, &request.channel, Arc::clone(transport), request.fps)
                    .await
            }
            RequestKind::Unsubscribe => self.unsubscribe(client_id, &request.channel).await,
            RequestKind::Publish => self
                .publish(&request.channel, request.data)
                .await
                .unwrap_or_else(|e| Response::error(e.to_string())),
            RequestKind::Get => self.get(&request.channel).await,
            RequestKind::Inspect => self
                .inspect()
                .await
                .unwrap_or_else(|e| Response::error(e.to_string())),
            RequestKind::Unknown => Response::error(ERR_UNKNOWN_TYPE),
        };

        response.with_request_id(request.request_id)
    }

    /// Subscribe `client_id` to `channel` at `fps`.
    ///
    /// Device channels get a binary snapshot of the current state, and
    /// the new subscription is primed with it, all under the write lock
    /// so no broadcast tick can run in between. Generic channels get the
    /// cached payload as a `data` message when one exists.
    pub async fn subscribe(
        &self,
        client_id: &str,
        channel: &str,
        transport: TransportHandle,
        fps: i64,
    ) -> Response {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let sub = state.registry.subscribe(Subscription::new(
            client_id,
            channel,
            Arc::clone(&transport),
            fps,
            Instant::now(),
        ));

        match ChannelName::parse(channel) {
            ChannelName::Device(id) => match state.store.published(id) {
                Ok(current) => {
                    if let Err(e) = transport.send_binary(delta::snapshot(&current)) {
                        warn!(client_id, channel, "snapshot send failed: {e}");
                    }
                    sub.last_known_state = Some(current);
                }
                Err(e) => warn!(client_id, channel, "subscribed without snapshot: {e}"),
            },
            ChannelName::Generic => {
                if let Some(payload) = state.channels.get(channel) {
                    let cached = Response::data(channel, payload.to_owned()).to_json();
                    match cached.map(|text| transport.send_text(text)) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(client_id, channel, "cached value send failed: {e}"),
                        Err(e) => warn!(client_id, channel, "cached value encode failed: {e}"),
                    }
                }
            }
        }

        debug!(
            client_id,
            channel,
            interval_ms = sub.target_interval.as_millis() as u64,
            "subscribed"
        );
        Response::new(ResponseKind::Subscribed, channel)
    }

    /// Remove every subscription of `client_id` on `channel`.
    pub async fn unsubscribe(&self, client_id: &str, channel: &str) -> Response {
        let removed = self.state.write().await.registry.unsubscribe(client_id, channel);
        debug!(client_id, channel, removed, "unsubscribed");
        Response::new(ResponseKind::Unsubscribed, channel)
    }

    /// Cache `data` for `channel` and push it to every subscriber.
    /// A missing payload is stored as JSON `null`.
    pub async fn publish(
        &self,
        channel: &str,
        data: Option<Box<RawValue>>,
    ) -> Result<Response, RegcastError> {
        let payload = match data {
            Some(raw) => raw,
            None => to_raw(&())?,
        };

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let stats = state.channels.publish(&mut state.registry, channel, payload)?;
        debug!(
            channel,
            delivered = stats.delivered,
            pruned = stats.pruned,
            "published"
        );
        Ok(Response::new(ResponseKind::Published, channel))
    }

    /// Cached payload of a generic channel, or a `channel not found`
    /// error.
    pub async fn get(&self, channel: &str) -> Response {
        let state = self.state.read().await;
        match state.channels.get(channel) {
            Some(payload) => Response::data(channel, payload.to_owned()),
            None => Response::error(ERR_CHANNEL_NOT_FOUND),
        }
    }

    /// Subscriber counts and cached payloads.
    pub async fn inspect(&self) -> Result<Response, RegcastError> {
        let report = self.report().await;
        Ok(Response {
            data: Some(to_raw(&report)?),
            ..Response::new(ResponseKind::Inspect, "")
        })
    }

    pub async fn report(&self) -> InspectReport {
        let state = self.state.read().await;
        InspectReport {
            channels: InspectChannels {
                subscriber_counts: state.registry.subscriber_counts(),
                data_store: state.channels.preview(),
            },
            total_channels: state.registry.channel_count(),
            total_data: state.channels.len(),
        }
    }

    /// Remove every subscription held by `client_id`. Called when its
    /// connection closes.
    pub async fn drop_client(&self, client_id: &str) -> usize {
        let removed = self.state.write().await.registry.remove_client(client_id);
        if removed > 0 {
            debug!(client_id, removed, "dropped client subscriptions");
        }
        removed
    }

    /// Current published vector of device `id`.
    pub async fn published(&self, id: u32) -> Result<Vec<u8>, RegcastError> {
        self.state.read().await.store.published(id)
    }

    /// Total subscriptions across all channels.
    pub async fn subscription_count(&self) -> usize {
        self.state.read().await.registry.len()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Device, Register};
    use crate::transport::{ChannelTransport, Frame};
    use bytes::Bytes;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn service_with(values: &[u8], drifts: &[f64]) -> SyncService {
        let registers = values
            .iter()
            .zip(drifts)
            .map(|(&v, &d)| Register::new(v, d))
            .collect();
        let mut store = RegisterStore::new();
        store.insert(Device::new(1, registers)).unwrap();
        SyncService::with_store(store, ServiceConfig::default())
    }

    fn scenario_service() -> SyncService {
        service_with(&[10, 20, 30, 40, 50], &[0.1, 0.1, 1.0, 0.1, 0.1])
    }

    fn client() -> (TransportHandle, UnboundedReceiver<Frame>) {
        let (t, rx) = ChannelTransport::new();
        (t as TransportHandle, rx)
    }

    fn next_binary(rx: &mut UnboundedReceiver<Frame>) -> Bytes {
        match rx.try_recv().unwrap() {
            Frame::Binary(b) => b,
            Frame::Text(t) => panic!("expected binary, got {t}"),
        }
    }

    fn next_text(rx: &mut UnboundedReceiver<Frame>) -> String {
        match rx.try_recv().unwrap() {
            Frame::Text(t) => t,
            Frame::Binary(b) => panic!("expected text, got {b:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_then_single_pair() {
        let svc = scenario_service();
        let (t, mut rx) = client();

        let resp = svc.subscribe("a", "device_1", t, 10).await;
        assert_eq!(resp.kind, ResponseKind::Subscribed);
        assert_eq!(
            &next_binary(&mut rx)[..],
            &[0x02, 0x00, 0x00, 0x05, 0x0A, 0x14, 0x1E, 0x28, 0x32]
        );

        assert_eq!(svc.advance_all().await, 1);
        tokio::time::advance(Duration::from_millis(100)).await;
        let stats = svc.broadcast_at(Instant::now()).await;
        assert_eq!(stats.deltas_sent, 1);
        assert_eq!(&next_binary(&mut rx)[..], &[0x01, 0x02, 0x00, 0x1F]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_subscriber_waits_for_its_cadence() {
        let svc = service_with(&[10, 20], &[1.0, 1.0]);
        let (fast, mut rx_fast) = client();
        let (slow, mut rx_slow) = client();
        svc.subscribe("fast", "device_1", fast, 10).await;
        svc.subscribe("slow", "device_1", slow, 2).await;
        next_binary(&mut rx_fast);
        next_binary(&mut rx_slow);

        for _ in 0..4 {
            svc.advance_all().await;
            tokio::time::advance(Duration::from_millis(100)).await;
            svc.broadcast_at(Instant::now()).await;
        }
        assert_eq!(std::iter::from_fn(|| rx_fast.try_recv().ok()).count(), 4);
        assert!(rx_slow.try_recv().is_err());

        svc.advance_all().await;
        tokio::time::advance(Duration::from_millis(100)).await;
        svc.broadcast_at(Instant::now()).await;
        // One delta covering five ticks of drift.
        let mut state = vec![10, 20];
        delta::apply(&mut state, &next_binary(&mut rx_slow)).unwrap();
        assert_eq!(state, svc.published(1).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_device_subscribes_without_snapshot() {
        let svc = scenario_service();
        let (t, mut rx) = client();
        let resp = svc.subscribe("a", "device_7", t, 10).await;
        assert_eq!(resp.kind, ResponseKind::Subscribed);
        assert!(rx.try_recv().is_err());
        assert_eq!(svc.subscription_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_subscribe_primes_each_entry() {
        let svc = scenario_service();
        let (t, mut rx) = client();
        svc.subscribe("a", "device_1", Arc::clone(&t), 10).await;
        svc.subscribe("a", "device_1", t, 10).await;
        next_binary(&mut rx);
        next_binary(&mut rx);

        let state = svc.state.read().await;
        let subs = state.registry.subscribers("device_1");
        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|s| s.last_known_state.is_some()));
    }

    #[tokio::test]
    async fn publish_reaches_subscribers_and_late_joiner_gets_cache() {
        let svc = scenario_service();
        let (a, mut rx_a) = client();
        let (b, mut rx_b) = client();
        svc.subscribe("a", "room1", a, 0).await;
        svc.subscribe("b", "room1", b, 0).await;
        assert!(rx_a.try_recv().is_err());

        let payload = RawValue::from_string(r#"{"msg":"hi"}"#.into()).unwrap();
        let resp = svc.publish("room1", Some(payload)).await.unwrap();
        assert_eq!(resp.kind, ResponseKind::Published);

        let expected = r#"{"type":"data","requestId":0,"channel":"room1","data":{"msg":"hi"}}"#;
        assert_eq!(next_text(&mut rx_a), expected);
        assert_eq!(next_text(&mut rx_b), expected);

        let (c, mut rx_c) = client();
        svc.subscribe("c", "room1", c, 0).await;
        assert_eq!(next_text(&mut rx_c), expected);
    }

    #[tokio::test]
    async fn publish_without_data_stores_null() {
        let svc = scenario_service();
        svc.publish("empty", None).await.unwrap();
        let resp = svc.get("empty").await;
        assert_eq!(resp.kind, ResponseKind::Data);
        assert_eq!(resp.data.unwrap().get(), "null");
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_that_client() {
        let svc = scenario_service();
        let (a, _rx_a) = client();
        let (b, _rx_b) = client();
        svc.subscribe("a", "room1", a, 0).await;
        svc.subscribe("b", "room1", b, 0).await;

        let resp = svc.unsubscribe("a", "room1").await;
        assert_eq!(resp.kind, ResponseKind::Unsubscribed);
        let report = svc.report().await;
        assert_eq!(report.channels.subscriber_counts.get("room1"), Some(&1));
    }

    #[tokio::test]
    async fn drop_client_clears_every_channel() {
        let svc = scenario_service();
        let (a, _rx_a) = client();
        svc.subscribe("a", "room1", Arc::clone(&a), 0).await;
        svc.subscribe("a", "device_1", a, 5).await;
        assert_eq!(svc.drop_client("a").await, 2);
        assert_eq!(svc.report().await.total_channels, 0);
    }

    #[tokio::test]
    async fn handle_message_dispatch() {
        let svc = scenario_service();
        let (t, _rx) = client();

        let resp = svc
            .handle_message("a", r#"{"type":"get","channel":"nope","requestId":9}"#, &t)
            .await;
        assert_eq!(resp.error.as_deref(), Some(ERR_CHANNEL_NOT_FOUND));
        assert_eq!(resp.request_id, 9);

        let resp = svc
            .handle_message("a", r#"{"type":"dance","requestId":3}"#, &t)
            .await;
        assert_eq!(resp.error.as_deref(), Some(ERR_UNKNOWN_TYPE));
        assert_eq!(resp.request_id, 3);

        let resp = svc.handle_message("a", "{oops", &t).await;
        assert!(resp.is_error());
        assert!(resp.error.unwrap().starts_with("unmarshal error: "));

        let resp = svc
            .handle_message(
                "a",
                r#"{"type":"publish","channel":"r","data":[1,2],"requestId":1}"#,
                &t,
            )
            .await;
        assert_eq!(resp.kind, ResponseKind::Published);
        let resp = svc
            .handle_message("a", r#"{"type":"get","channel":"r","requestId":2}"#, &t)
            .await;
        assert_eq!(resp.data.unwrap().get(), "[1,2]");
    }

    #[tokio::test]
    async fn connection_id_overrides_message_client_id() {
        let svc = scenario_service();
        let (t, _rx) = client();
        svc.handle_message(
            "conn-1",
            r#"{"type":"subscribe","clientId":"spoof","channel":"room"}"#,
            &t,
        )
        .await;
        svc.handle_message(
            "conn-2",
            r#"{"type":"unsubscribe","clientId":"conn-1","channel":"room"}"#,
            &t,
        )
        .await;
        let state = svc.state.read().await;
        assert_eq!(state.registry.subscribers("room")[0].client_id, "conn-1");
    }

    #[tokio::test]
    async fn inspect_reports_counts_and_cache() {
        let svc = scenario_service();
        let (t, _rx) = client();
        svc.subscribe("a", "device_1", t, 10).await;
        svc.publish("room", Some(RawValue::from_string("42".into()).unwrap()))
            .await
            .unwrap();

        let resp = svc.inspect().await.unwrap();
        assert_eq!(resp.kind, ResponseKind::Inspect);
        let report: InspectReport = serde_json::from_str(resp.data.unwrap().get()).unwrap();
        assert_eq!(report.total_channels, 1);
        assert_eq!(report.total_data, 1);
        assert_eq!(report.channels.data_store.get("room").unwrap(), "42");
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_loops_deliver_and_stop_on_cancel() {
        let svc = Arc::new(service_with(&[10, 20, 30], &[1.0, -1.0, 1.0]));
        let (t, mut rx) = client();
        svc.subscribe("a", "device_1", t, 10).await;
        let mut mirror = vec![0; 3];
        delta::apply(&mut mirror, &next_binary(&mut rx)).unwrap();

        let cancel = CancellationToken::new();
        let tasks = Arc::clone(&svc).spawn(cancel.clone());
        tokio::time::sleep(Duration::from_millis(550)).await;
        cancel.cancel();
        tasks.join().await;

        let mut deltas = 0;
        while let Ok(frame) = rx.try_recv() {
            let Frame::Binary(b) = frame else {
                panic!("unexpected text frame");
            };
            delta::apply(&mut mirror, &b).unwrap();
            deltas += 1;
        }
        assert!(deltas >= 4, "only {deltas} deltas");
        // The last simulation tick may land after the last broadcast.
        let published = svc.published(1).await.unwrap();
        assert!(mirror.iter().zip(&published).all(|(m, p)| m.abs_diff(*p) <= 1));
    }

    #[test]
    fn config_validation() {
        assert!(ServiceConfig::default().validate().is_ok());
        let zero_tick = ServiceConfig {
            broadcast_tick: Duration::ZERO,
            ..ServiceConfig::default()
        };
        assert!(zero_tick.validate().is_err());
        let too_many = ServiceConfig {
            registers_per_device: 70_000,
            ..ServiceConfig::default()
        };
        assert!(too_many.validate().is_err());
        assert!(SyncService::new(too_many).is_err());
    }
}
