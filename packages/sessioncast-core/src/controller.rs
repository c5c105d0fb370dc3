//! Session Controller (component G): composes the adapter, capture engine,
//! and transport, translating between relay control events and local
//! multiplexer operations.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::adapter::{MultiplexerAdapter, SpecialKey};
use crate::bus::EventBus;
use crate::capture::{CaptureConfig, CaptureEngine, Sink};
use crate::event::Event;
use crate::message::Message;
use crate::time::now_ms;
use crate::transport::RelayTransport;

pub struct SessionControllerConfig {
    /// Whether a locally initiated `createSession` also starts streaming.
    pub auto_stream_on_create: bool,
}

impl Default for SessionControllerConfig {
    fn default() -> Self {
        Self { auto_stream_on_create: true }
    }
}

/// Wires A (adapter) / C (capture engine) / F (transport) together behind
/// the event bus (E). Constructing one subscribes its event handlers
/// immediately; they stay registered for the controller's lifetime.
pub struct SessionController {
    adapter: Arc<dyn MultiplexerAdapter>,
    capture: Arc<CaptureEngine>,
    transport: Arc<RelayTransport>,
    streaming: Mutex<HashSet<String>>,
    config: SessionControllerConfig,
}

impl SessionController {
    pub fn new(
        adapter: Arc<dyn MultiplexerAdapter>,
        capture: Arc<CaptureEngine>,
        transport: Arc<RelayTransport>,
        bus: Arc<EventBus>,
        config: SessionControllerConfig,
    ) -> Arc<Self> {
        let controller = Arc::new(Self {
            adapter,
            capture,
            transport,
            streaming: Mutex::new(HashSet::new()),
            config,
        });
        controller.clone().wire_handlers(bus);
        controller
    }

    fn wire_handlers(self: Arc<Self>, bus: Arc<EventBus>) {
        let c = self.clone();
        bus.subscribe(crate::event::EventKind::KeysReceived, move |event| {
            if let Event::KeysReceived { session, keys, press_enter, .. } = event {
                let c = c.clone();
                tokio::spawn(async move {
                    if press_enter {
                        c.adapter.send_keys_with_enter(&session, &keys).await;
                    } else {
                        c.adapter.send_keys(&session, &keys, true).await;
                    }
                });
            }
        });

        let c = self.clone();
        bus.subscribe(crate::event::EventKind::ResizeRequest, move |event| {
            if let Event::ResizeRequest { session, cols, rows, .. } = event {
                let c = c.clone();
                tokio::spawn(async move {
                    c.adapter.resize(&session, cols, rows).await;
                });
            }
        });

        // Every SessionCreated delivered on the bus is treated as relay-
        // initiated here (the transport has already run the adapter's
        // create_session before publishing it, or the session already
        // existed); `auto_stream_on_create` only scopes the separate
        // `create_session_locally` entry point below.
        let c = self.clone();
        bus.subscribe(crate::event::EventKind::SessionCreated, move |event| {
            if let Event::SessionCreated { session, .. } = event {
                let c = c.clone();
                tokio::spawn(async move {
                    if c.transport.is_connected() && !c.is_streaming(&session) {
                        c.start_streaming(&session);
                    }
                });
            }
        });

        let c = self.clone();
        bus.subscribe(crate::event::EventKind::SessionKilled, move |event| {
            if let Event::SessionKilled { session, .. } = event {
                let c = c.clone();
                tokio::spawn(async move {
                    c.stop_streaming(&session).await;
                    c.adapter.kill_session(&session).await;
                });
            }
        });
    }

    pub fn is_streaming(&self, session: &str) -> bool {
        self.streaming.lock().unwrap().contains(session)
    }

    /// Register a capture sink for `session` that forwards each frame as an
    /// outbound `Screen`/`ScreenGz` message, base64-encoded per the wire
    /// contract.
    pub fn start_streaming(self: &Arc<Self>, session: &str) {
        if self.is_streaming(session) {
            return;
        }
        self.streaming.lock().unwrap().insert(session.to_string());

        let transport = self.transport.clone();
        let sink: Sink = Arc::new(move |frame| {
            let transport = transport.clone();
            tokio::spawn(async move {
                let message = if let Some(bytes) = frame.compressed.as_ref() {
                    Message::ScreenGz {
                        session_name: frame.session.clone(),
                        screen: BASE64.encode(bytes),
                    }
                } else {
                    Message::Screen {
                        session_name: frame.session.clone(),
                        screen: BASE64.encode(frame.raw_text.as_bytes()),
                    }
                };
                transport.send(message).await;
            });
        });
        self.capture.start(session, sink);
    }

    /// Idempotently stop streaming for `session`.
    pub async fn stop_streaming(&self, session: &str) {
        self.streaming.lock().unwrap().remove(session);
        self.capture.stop(session).await;
    }

    /// A locally initiated `createSession` — not relay-driven (e.g. a future
    /// host-side command). Streaming only starts here when
    /// `auto_stream_on_create` is set; the bus-delivered `SessionCreated`
    /// path above always streams once connected, regardless of this flag.
    pub async fn create_session_locally(self: &Arc<Self>, bus: &EventBus, session: &str, work_dir: Option<&str>) {
        self.adapter.create_session(session, work_dir).await;
        if self.config.auto_stream_on_create && self.transport.is_connected() && !self.is_streaming(session) {
            self.start_streaming(session);
        }
        bus.publish(Event::SessionCreated {
            session: session.to_string(),
            timestamp: now_ms(),
        })
        .await;
    }

    pub fn capture_config_defaults() -> CaptureConfig {
        CaptureConfig::default()
    }

    /// Resolve a string alias to a canonical special key, for callers
    /// dispatching a raw key name rather than a parsed `SpecialKey`.
    pub fn resolve_special_key(alias: &str) -> Option<SpecialKey> {
        SpecialKey::resolve(alias)
    }
}
