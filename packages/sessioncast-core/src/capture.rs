//! Capture Engine (component C): one adaptive polling loop per streaming
//! session, with change detection, idle back-off, and a force-send keepalive.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::adapter::MultiplexerAdapter;
use crate::compressor::FrameCompressor;
use crate::frame::{ScreenFrame, DEFAULT_COLS, DEFAULT_ROWS};
use crate::time::now_ms;

/// A sink that consumes frames as they're captured. Invoked on the capture
/// task's own worker; panics are caught and logged, never propagated.
pub type Sink = Arc<dyn Fn(ScreenFrame) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    pub active_interval: Duration,
    pub idle_interval: Duration,
    pub idle_threshold: Duration,
    pub force_send_interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            active_interval: Duration::from_millis(50),
            idle_interval: Duration::from_millis(200),
            idle_threshold: Duration::from_secs(2),
            force_send_interval: Duration::from_secs(10),
        }
    }
}

struct TaskState {
    last_raw_text: String,
    last_change_ts: Instant,
    last_send_ts: Instant,
    is_idle: bool,
}

struct TaskHandle {
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
    join: JoinHandle<()>,
}

/// Drives one adaptive polling loop per streaming session.
///
/// Each session owns exactly one task and its `TaskState` is local to that
/// task (never shared), which is what gives "at most one tick in flight per
/// session" for free rather than needing a per-session lock.
pub struct CaptureEngine {
    adapter: Arc<dyn MultiplexerAdapter>,
    compressor: FrameCompressor,
    config: Arc<RwLock<CaptureConfig>>,
    tasks: Mutex<HashMap<String, TaskHandle>>,
}

impl CaptureEngine {
    pub fn new(adapter: Arc<dyn MultiplexerAdapter>, config: CaptureConfig, compression_threshold: usize) -> Self {
        Self {
            adapter,
            compressor: FrameCompressor::new(compression_threshold),
            config: Arc::new(RwLock::new(config)),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the live configuration. Applied starting the next tick of
    /// every running session.
    pub fn set_config(&self, config: CaptureConfig) {
        *self.config.write().unwrap() = config;
    }

    pub fn is_capturing(&self, session: &str) -> bool {
        self.tasks.lock().unwrap().contains_key(session)
    }

    /// Start the polling loop for `session`. A no-op (logged) if already
    /// capturing — callers should `stop` first to restart with fresh state.
    pub fn start(&self, session: &str, sink: Sink) {
        let mut tasks = self.tasks.lock().unwrap();
        if tasks.contains_key(session) {
            tracing::warn!(session, "capture engine: start() called while already capturing");
            return;
        }

        let running = Arc::new(AtomicBool::new(true));
        let notify = Arc::new(Notify::new());
        let adapter = self.adapter.clone();
        let compressor = self.compressor.clone();
        let config = self.config.clone();
        let session_owned = session.to_string();

        let task_running = running.clone();
        let task_notify = notify.clone();
        let join = tokio::spawn(async move {
            let now = Instant::now();
            let mut state = TaskState {
                last_raw_text: String::new(),
                last_change_ts: now,
                last_send_ts: now,
                is_idle: false,
            };

            loop {
                if !task_running.load(Ordering::SeqCst) {
                    break;
                }

                let interval = tick(
                    &adapter,
                    &compressor,
                    *config.read().unwrap(),
                    &mut state,
                    &session_owned,
                    &sink,
                    &task_running,
                )
                .await;

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = task_notify.notified() => break,
                }
            }
        });

        tasks.insert(
            session.to_string(),
            TaskHandle { running, notify, join },
        );
    }

    /// Stop the session's loop. Cancels a pending tick immediately; an
    /// in-progress tick observes `running == false` and skips its sink
    /// delivery. Guarantees no further sink invocations for this session
    /// once it returns.
    pub async fn stop(&self, session: &str) {
        let handle = { self.tasks.lock().unwrap().remove(session) };
        if let Some(handle) = handle {
            handle.running.store(false, Ordering::SeqCst);
            handle.notify.notify_one();
            let _ = handle.join.await;
        }
    }

    /// Stop every active session.
    pub async fn stop_all(&self) {
        let names: Vec<String> = self.tasks.lock().unwrap().keys().cloned().collect();
        for name in names {
            self.stop(&name).await;
        }
    }

    /// `stopAll`, then a 5-second grace for workers to drain, then a hard
    /// abort of anything still running.
    pub async fn close(&self) {
        let handles: Vec<TaskHandle> = {
            let mut tasks = self.tasks.lock().unwrap();
            std::mem::take(&mut *tasks).into_values().collect()
        };
        for h in &handles {
            h.running.store(false, Ordering::SeqCst);
            h.notify.notify_one();
        }

        let abort_handles: Vec<_> = handles.iter().map(|h| h.join.abort_handle()).collect();
        let grace = tokio::time::sleep(Duration::from_secs(5));
        tokio::pin!(grace);
        let joined = futures_util::future::join_all(handles.into_iter().map(|h| h.join));
        tokio::select! {
            _ = joined => {}
            _ = &mut grace => {
                tracing::warn!("capture engine close() grace period elapsed; aborting remaining tasks");
                for ah in abort_handles {
                    ah.abort();
                }
            }
        }
    }
}

/// One poll-and-maybe-deliver cycle. Returns the interval to sleep before the
/// next tick.
#[allow(clippy::too_many_arguments)]
async fn tick(
    adapter: &Arc<dyn MultiplexerAdapter>,
    compressor: &FrameCompressor,
    config: CaptureConfig,
    state: &mut TaskState,
    session: &str,
    sink: &Sink,
    running: &Arc<AtomicBool>,
) -> Duration {
    let Some(content) = adapter.capture_pane_for_stream(session).await else {
        return if state.is_idle { config.idle_interval } else { config.active_interval };
    };

    if !running.load(Ordering::SeqCst) {
        return config.idle_interval;
    }

    let now = Instant::now();
    let changed = content != state.last_raw_text;
    let force = now.duration_since(state.last_send_ts) >= config.force_send_interval;

    if changed {
        state.last_raw_text = content.clone();
        state.last_change_ts = now;
        state.is_idle = false;
    } else if now.duration_since(state.last_change_ts) >= config.idle_threshold {
        state.is_idle = true;
    }

    if changed || force {
        let frame = compressor.compress_frame(session, &content, DEFAULT_COLS, DEFAULT_ROWS, now_ms());
        deliver(sink, frame);
        state.last_send_ts = now;
    }

    if state.is_idle { config.idle_interval } else { config.active_interval }
}

fn deliver(sink: &Sink, frame: ScreenFrame) {
    let sink = sink.clone();
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| sink(frame)));
    if let Err(panic) = result {
        let msg = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic payload>".to_string());
        tracing::warn!(%msg, "capture sink panicked; swallowed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::FakeAdapter;
    use std::sync::atomic::AtomicUsize;

    fn counting_sink() -> (Sink, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let sink: Sink = Arc::new(move |_frame| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        (sink, count)
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_always_sends_then_idles_out() {
        let adapter = Arc::new(FakeAdapter::new());
        adapter.seed_session("s1", "ready\n");
        let engine = CaptureEngine::new(
            adapter,
            CaptureConfig {
                active_interval: Duration::from_millis(50),
                idle_interval: Duration::from_millis(200),
                idle_threshold: Duration::from_millis(300),
                force_send_interval: Duration::from_secs(10),
            },
            crate::compressor::DEFAULT_THRESHOLD,
        );
        let (sink, count) = counting_sink();
        engine.start("s1", sink);

        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1, "unchanged content sends nothing further before force-send");

        engine.stop("s1").await;
    }

    #[tokio::test(start_paused = true)]
    async fn force_send_fires_after_interval_elapses() {
        let adapter = Arc::new(FakeAdapter::new());
        adapter.seed_session("s1", "ready\n");
        let engine = CaptureEngine::new(
            adapter,
            CaptureConfig {
                active_interval: Duration::from_millis(50),
                idle_interval: Duration::from_millis(200),
                idle_threshold: Duration::from_millis(300),
                force_send_interval: Duration::from_secs(10),
            },
            crate::compressor::DEFAULT_THRESHOLD,
        );
        let (sink, count) = counting_sink();
        engine.start("s1", sink);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(count.load(Ordering::SeqCst) >= 2, "force-send must fire once the interval elapses");

        engine.stop("s1").await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_delivery() {
        let adapter = Arc::new(FakeAdapter::new());
        adapter.seed_session("s1", "ready\n");
        let engine = CaptureEngine::new(adapter, CaptureConfig::default(), crate::compressor::DEFAULT_THRESHOLD);
        let (sink, count) = counting_sink();
        engine.start("s1", sink);
        tokio::time::advance(Duration::from_millis(10)).await;
        engine.stop("s1").await;
        let after_stop = count.load(Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
        assert!(!engine.is_capturing("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn null_capture_reschedules_without_state_change() {
        let adapter = Arc::new(FakeAdapter::new());
        // no seeded session -> capture_pane_for_stream returns None every tick
        let engine = CaptureEngine::new(adapter, CaptureConfig::default(), crate::compressor::DEFAULT_THRESHOLD);
        let (sink, count) = counting_sink();
        engine.start("missing", sink);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        engine.stop("missing").await;
    }

    #[tokio::test(start_paused = true)]
    async fn is_capturing_reflects_start_and_stop() {
        let adapter = Arc::new(FakeAdapter::new());
        adapter.seed_session("s1", "x");
        let engine = CaptureEngine::new(adapter, CaptureConfig::default(), crate::compressor::DEFAULT_THRESHOLD);
        let (sink, _count) = counting_sink();
        assert!(!engine.is_capturing("s1"));
        engine.start("s1", sink);
        assert!(engine.is_capturing("s1"));
        engine.stop("s1").await;
        assert!(!engine.is_capturing("s1"));
    }
}
