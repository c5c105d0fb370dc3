//! Relay Transport (component F): the persistent bidirectional connection to
//! the relay, with reconnect backoff + jitter and a circuit breaker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::adapter::MultiplexerAdapter;
use crate::bus::EventBus;
use crate::error::{AgentError, Result};
use crate::event::{DisconnectReason, Event};
use crate::message::{self, Message};
use crate::time::now_ms;

/// Connection phase, per the state diagram in the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub relay_url: String,
    pub token: String,
    pub machine_id: String,
    pub label: String,
    pub reconnect_enabled: bool,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub circuit_breaker_duration: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            relay_url: "wss://relay.sessioncast.io/ws".to_string(),
            token: String::new(),
            machine_id: String::new(),
            label: String::new(),
            reconnect_enabled: true,
            initial_delay: Duration::from_millis(2000),
            max_delay: Duration::from_millis(60_000),
            max_attempts: 5,
            circuit_breaker_duration: Duration::from_secs(120),
        }
    }
}

/// `base * 2^(attempts-1)`, capped at `max`. Pure and jitter-free so the
/// monotonicity law can be checked exactly.
pub fn compute_base_delay(attempts: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 1u64.checked_shl(attempts.saturating_sub(1)).unwrap_or(u64::MAX);
    let scaled = (initial.as_millis() as u64).saturating_mul(factor);
    Duration::from_millis(scaled.min(max.as_millis() as u64))
}

/// `compute_base_delay` plus additive jitter uniform in `[0, delay/4]`.
fn compute_jittered_delay(attempts: u32, cfg: &TransportConfig) -> Duration {
    let base = compute_base_delay(attempts, cfg.initial_delay, cfg.max_delay);
    let jitter_max = base.as_millis() as u64 / 4;
    let jitter = if jitter_max == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_max)
    };
    base + Duration::from_millis(jitter)
}

#[derive(Default)]
struct ReconnectState {
    attempts: u32,
    circuit_open_until: Option<Instant>,
}

impl ReconnectState {
    /// Record a connection failure. Returns the delay to wait before the
    /// next attempt, or `None` if the circuit breaker just opened.
    fn record_failure(&mut self, now: Instant, cfg: &TransportConfig) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts > cfg.max_attempts {
            self.circuit_open_until = Some(now + cfg.circuit_breaker_duration);
            self.attempts = 0;
            None
        } else {
            Some(compute_jittered_delay(self.attempts, cfg))
        }
    }

    fn record_success(&mut self) {
        self.attempts = 0;
        self.circuit_open_until = None;
    }

    fn circuit_open(&self, now: Instant) -> bool {
        self.circuit_open_until.map_or(false, |until| until > now)
    }
}

/// Maintains the persistent connection to the relay.
///
/// `connect()`'s returned `Result` is this transport's "completion" for the
/// caller-initiated attempt — background reconnect attempts scheduled after
/// a failure run detached and report their outcome only through bus events,
/// matching the specification's "only the first connect() completes
/// exceptionally" rule without a separately managed completion handle.
pub struct RelayTransport {
    config: TransportConfig,
    adapter: Arc<dyn MultiplexerAdapter>,
    bus: Arc<EventBus>,
    phase: Mutex<Phase>,
    reconnect: Mutex<ReconnectState>,
    outbound_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    io_tasks: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
    closing: AtomicBool,
}

impl RelayTransport {
    pub fn new(config: TransportConfig, adapter: Arc<dyn MultiplexerAdapter>, bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            config,
            adapter,
            bus,
            phase: Mutex::new(Phase::Disconnected),
            reconnect: Mutex::new(ReconnectState::default()),
            outbound_tx: Mutex::new(None),
            io_tasks: Mutex::new(None),
            closing: AtomicBool::new(false),
        })
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == Phase::Connected
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock().unwrap() = phase;
    }

    /// Connect to the relay. Idempotent while already connected/connecting.
    /// Rejects with `CircuitBreaker` during the cooldown window opened by a
    /// prior reconnect exhaustion.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        {
            let mut rc = self.reconnect.lock().unwrap();
            let now = Instant::now();
            if rc.circuit_open(now) {
                return Err(AgentError::CircuitBreaker);
            }
            if rc.circuit_open_until.is_some() {
                rc.circuit_open_until = None;
            }
        }
        match self.phase() {
            Phase::Connected | Phase::Connecting => return Ok(()),
            _ => {}
        }
        self.set_phase(Phase::Connecting);
        self.attempt_connect_once().await
    }

    async fn attempt_connect_once(self: &Arc<Self>) -> Result<()> {
        match tokio_tungstenite::connect_async(&self.config.relay_url).await {
            Ok((ws_stream, _response)) => {
                self.on_open(ws_stream).await;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %self.config.relay_url, "relay connect failed");
                self.handle_connect_failure().await;
                Err(AgentError::Transport(e.to_string()))
            }
        }
    }

    async fn on_open<S>(self: &Arc<Self>, ws_stream: S)
    where
        S: futures_util::Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
            + Send
            + 'static,
    {
        self.reconnect.lock().unwrap().record_success();
        self.set_phase(Phase::Connected);

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *self.outbound_tx.lock().unwrap() = Some(tx.clone());

        let register = Message::Register {
            machine_id: self.config.machine_id.clone(),
            label: self.config.label.clone(),
            token: self.config.token.clone(),
            role: "host".to_string(),
        };
        if let Ok(text) = message::encode(&register) {
            let _ = tx.send(text);
        }

        self.bus.publish(Event::Connected { timestamp: now_ms() }).await;

        let writer_handle = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if write.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let reader_transport = self.clone();
        let reader_handle = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => reader_transport.handle_inbound(&text).await,
                    Ok(WsMessage::Close(_)) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "relay socket read error");
                        break;
                    }
                    _ => {}
                }
            }
            reader_transport.on_close().await;
        });

        *self.io_tasks.lock().unwrap() = Some((writer_handle, reader_handle));
    }

    async fn handle_inbound(self: &Arc<Self>, text: &str) {
        match message::decode(text) {
            Ok(Message::Ping {}) => self.send(Message::Pong {}).await,
            Ok(Message::Keys { session_name, keys, enter }) => {
                self.bus
                    .publish(Event::KeysReceived {
                        session: session_name,
                        keys,
                        press_enter: enter,
                        timestamp: now_ms(),
                    })
                    .await;
            }
            Ok(Message::Resize { session_name, cols, rows }) => {
                self.bus
                    .publish(Event::ResizeRequest { session: session_name, cols, rows, timestamp: now_ms() })
                    .await;
            }
            Ok(Message::CreateSession { session_name, work_dir }) => {
                self.adapter.create_session(&session_name, work_dir.as_deref()).await;
                self.bus
                    .publish(Event::SessionCreated { session: session_name, timestamp: now_ms() })
                    .await;
            }
            Ok(Message::KillSession { session_name }) => {
                self.bus
                    .publish(Event::SessionKilled { session: session_name, timestamp: now_ms() })
                    .await;
            }
            Ok(Message::Error { code, message }) => {
                self.bus.publish(Event::Error { code, message, timestamp: now_ms() }).await;
            }
            Ok(other) => {
                tracing::debug!(type_tag = other.type_tag(), "unhandled inbound message type");
            }
            Err(e) => {
                tracing::debug!(error = %e, "failed to decode inbound frame");
            }
        }
    }

    /// Best-effort send: drops (with a warning) if not connected. Never
    /// blocks or queues.
    pub async fn send(&self, message: Message) {
        if !self.is_connected() {
            tracing::warn!(type_tag = message.type_tag(), "dropping send: not connected");
            return;
        }
        match message::encode(&message) {
            Ok(text) => {
                let tx = self.outbound_tx.lock().unwrap().clone();
                if let Some(tx) = tx {
                    let _ = tx.send(text);
                }
            }
            Err(e) => tracing::warn!(error = %e, "dropping send: encode failed"),
        }
    }

    async fn on_close(self: &Arc<Self>) {
        let was_closing = self.phase() == Phase::Closing;
        *self.outbound_tx.lock().unwrap() = None;
        self.set_phase(Phase::Disconnected);

        if was_closing {
            self.bus
                .publish(Event::Disconnected {
                    reason: DisconnectReason::Normal,
                    detail: "local close".to_string(),
                    timestamp: now_ms(),
                })
                .await;
            return;
        }

        self.bus
            .publish(Event::Disconnected {
                reason: DisconnectReason::ConnectionLost,
                detail: "remote closed the connection".to_string(),
                timestamp: now_ms(),
            })
            .await;
        self.schedule_reconnect().await;
    }

    async fn handle_connect_failure(self: &Arc<Self>) {
        self.set_phase(Phase::Disconnected);
        self.bus
            .publish(Event::Error {
                code: "WS_ERROR".to_string(),
                message: "relay connect failed".to_string(),
                timestamp: now_ms(),
            })
            .await;
        self.schedule_reconnect().await;
    }

    async fn schedule_reconnect(self: &Arc<Self>) {
        if !self.config.reconnect_enabled || self.closing.load(Ordering::SeqCst) {
            return;
        }
        let delay = {
            let mut rc = self.reconnect.lock().unwrap();
            rc.record_failure(Instant::now(), &self.config)
        };
        match delay {
            None => {
                tracing::info!("reconnect attempts exhausted, circuit breaker open");
                self.bus
                    .publish(Event::Disconnected {
                        reason: DisconnectReason::CircuitBreaker,
                        detail: "max reconnect attempts exceeded".to_string(),
                        timestamp: now_ms(),
                    })
                    .await;
            }
            Some(delay) => {
                tracing::info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                let this = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if this.closing.load(Ordering::SeqCst) {
                        return;
                    }
                    this.set_phase(Phase::Connecting);
                    let _ = this.attempt_connect_once().await;
                });
            }
        }
    }

    /// Local, intentional disconnect. Does not reconnect.
    pub async fn disconnect(&self) {
        self.set_phase(Phase::Closing);
        let tx = self.outbound_tx.lock().unwrap().take();
        drop(tx);
    }

    /// `Closing`, tear down the socket, cancel reconnect, 5s grace for the
    /// reader/writer tasks to notice and exit before they're aborted.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.disconnect().await;

        let tasks = self.io_tasks.lock().unwrap().take();
        let Some((writer, reader)) = tasks else { return };

        let abort_writer = writer.abort_handle();
        let abort_reader = reader.abort_handle();
        let grace = tokio::time::sleep(Duration::from_secs(5));
        tokio::pin!(grace);
        let joined = futures_util::future::join(writer, reader);
        tokio::select! {
            _ = joined => {}
            _ = &mut grace => {
                tracing::warn!("relay transport close() grace period elapsed; aborting io tasks");
                abort_writer.abort();
                abort_reader.abort();
            }
        }
    }
}
