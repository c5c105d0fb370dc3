//! SessionCast Agent core: the runtime that keeps a message-oriented tunnel
//! open to a relay while driving N independent adaptive screen-capture loops
//! for local tmux sessions, reconciling relay-originated control messages
//! back onto the local multiplexer.
//!
//! This crate is the core described in the specification — transport,
//! codec, capture engine, session controller, event bus. It does not own a
//! CLI, a logging sink, or the `tmux` binary itself; those are external
//! collaborators (see `sessioncast-agent`).

pub mod adapter;
pub mod bus;
pub mod capture;
pub mod compressor;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod frame;
pub mod message;
pub mod time;
pub mod transport;

use std::sync::Arc;

use adapter::{MultiplexerAdapter, TmuxAdapter};
use bus::{DeliveryMode, EventBus};
use capture::CaptureEngine;
use config::Config;
use controller::{SessionController, SessionControllerConfig};
use error::Result;
use transport::RelayTransport;

/// The composed client: transport + capture engine + event bus + session
/// controller, wired together per the configuration.
pub struct Agent {
    pub bus: Arc<EventBus>,
    pub transport: Arc<RelayTransport>,
    pub capture: Arc<CaptureEngine>,
    pub controller: Arc<SessionController>,
}

impl Agent {
    /// Build the composed client from a validated `Config` and an adapter
    /// (normally a real `TmuxAdapter`; tests pass a `FakeAdapter`).
    pub fn new(config: &Config, adapter: Arc<dyn MultiplexerAdapter>) -> Result<Self> {
        config.validate()?;

        let bus = Arc::new(EventBus::new(DeliveryMode::Async));
        let transport = RelayTransport::new(config.transport_config(), adapter.clone(), bus.clone());
        let capture = Arc::new(CaptureEngine::new(
            adapter.clone(),
            config.capture_config(),
            config.compression.threshold,
        ));
        let controller = SessionController::new(
            adapter,
            capture.clone(),
            transport.clone(),
            bus.clone(),
            SessionControllerConfig { auto_stream_on_create: config.agent.auto_stream_on_create },
        );

        Ok(Self { bus, transport, capture, controller })
    }

    /// Convenience constructor using the real `tmux`-backed adapter.
    pub fn with_tmux(config: &Config) -> Result<Self> {
        Self::new(config, Arc::new(TmuxAdapter::new()))
    }

    pub async fn connect(&self) -> Result<()> {
        self.transport.connect().await
    }

    /// Reverse-construction-order shutdown: stop streaming, close the
    /// capture engine, close the transport, close the bus.
    pub async fn close(&self) {
        self.capture.stop_all().await;
        self.capture.close().await;
        self.transport.close().await;
        self.bus.close().await;
    }
}

