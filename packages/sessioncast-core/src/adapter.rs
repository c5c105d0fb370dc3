//! Multiplexer Adapter (component A): invokes the `tmux` binary as an
//! external process and translates its text output into typed results.
//!
//! Every operation is argv-only (no shell), bounded by a 10-second wall-clock
//! timeout, with stderr captured alongside stdout for substring matching
//! (`"can't find session"`, `"no server running"`). Per the redesign note in
//! the specification's security caveat, user-supplied key text is passed
//! through unmodified — no character stripping — relying entirely on
//! argv-only invocation to avoid shell injection. The previous generation's
//! blanket stripping of `"'`$` was both incomplete and lossy and is
//! intentionally not reproduced here.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::message::SessionSummary;

const SUBPROCESS_TIMEOUT: Duration = Duration::from_secs(10);

/// Canonical tmux special-key tokens (the set the specification names).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKey {
    Enter,
    Escape,
    Tab,
    Space,
    BSpace,
    Dc,
    CtrlC,
    CtrlD,
    CtrlZ,
    CtrlL,
    CtrlA,
    CtrlE,
    CtrlK,
    CtrlU,
    CtrlW,
    CtrlR,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PPage,
    NPage,
    F(u8),
}

impl SpecialKey {
    /// The token tmux's `send-keys` expects.
    pub fn as_tmux_token(&self) -> String {
        match self {
            SpecialKey::Enter => "Enter".to_string(),
            SpecialKey::Escape => "Escape".to_string(),
            SpecialKey::Tab => "Tab".to_string(),
            SpecialKey::Space => "Space".to_string(),
            SpecialKey::BSpace => "BSpace".to_string(),
            SpecialKey::Dc => "DC".to_string(),
            SpecialKey::CtrlC => "C-c".to_string(),
            SpecialKey::CtrlD => "C-d".to_string(),
            SpecialKey::CtrlZ => "C-z".to_string(),
            SpecialKey::CtrlL => "C-l".to_string(),
            SpecialKey::CtrlA => "C-a".to_string(),
            SpecialKey::CtrlE => "C-e".to_string(),
            SpecialKey::CtrlK => "C-k".to_string(),
            SpecialKey::CtrlU => "C-u".to_string(),
            SpecialKey::CtrlW => "C-w".to_string(),
            SpecialKey::CtrlR => "C-r".to_string(),
            SpecialKey::Up => "Up".to_string(),
            SpecialKey::Down => "Down".to_string(),
            SpecialKey::Left => "Left".to_string(),
            SpecialKey::Right => "Right".to_string(),
            SpecialKey::Home => "Home".to_string(),
            SpecialKey::End => "End".to_string(),
            SpecialKey::PPage => "PPage".to_string(),
            SpecialKey::NPage => "NPage".to_string(),
            SpecialKey::F(n) => format!("F{n}"),
        }
    }

    /// Resolve a string alias (case-insensitively) to a canonical key.
    /// Accepts the common aliases named in the specification
    /// (`ENTER|RETURN|CR`, `ESC|ESCAPE`, `BACKSPACE|BS|BSPACE`,
    /// `DEL|DELETE|DC`, `CTRL_C|C_C|CTRLC`, ...) plus the canonical tokens
    /// themselves.
    pub fn resolve(alias: &str) -> Option<SpecialKey> {
        let upper = alias.to_ascii_uppercase();
        Some(match upper.as_str() {
            "ENTER" | "RETURN" | "CR" => SpecialKey::Enter,
            "ESC" | "ESCAPE" => SpecialKey::Escape,
            "TAB" => SpecialKey::Tab,
            "SPACE" => SpecialKey::Space,
            "BACKSPACE" | "BS" | "BSPACE" => SpecialKey::BSpace,
            "DEL" | "DELETE" | "DC" => SpecialKey::Dc,
            "CTRL_C" | "C_C" | "CTRLC" | "C-C" => SpecialKey::CtrlC,
            "CTRL_D" | "C_D" | "CTRLD" | "C-D" => SpecialKey::CtrlD,
            "CTRL_Z" | "C_Z" | "CTRLZ" | "C-Z" => SpecialKey::CtrlZ,
            "CTRL_L" | "C_L" | "CTRLL" | "C-L" => SpecialKey::CtrlL,
            "CTRL_A" | "C_A" | "CTRLA" | "C-A" => SpecialKey::CtrlA,
            "CTRL_E" | "C_E" | "CTRLE" | "C-E" => SpecialKey::CtrlE,
            "CTRL_K" | "C_K" | "CTRLK" | "C-K" => SpecialKey::CtrlK,
            "CTRL_U" | "C_U" | "CTRLU" | "C-U" => SpecialKey::CtrlU,
            "CTRL_W" | "C_W" | "CTRLW" | "C-W" => SpecialKey::CtrlW,
            "CTRL_R" | "C_R" | "CTRLR" | "C-R" => SpecialKey::CtrlR,
            "UP" => SpecialKey::Up,
            "DOWN" => SpecialKey::Down,
            "LEFT" => SpecialKey::Left,
            "RIGHT" => SpecialKey::Right,
            "HOME" => SpecialKey::Home,
            "END" => SpecialKey::End,
            "PPAGE" | "PAGEUP" => SpecialKey::PPage,
            "NPAGE" | "PAGEDOWN" => SpecialKey::NPage,
            other if other.len() <= 3 && other.starts_with('F') => {
                other[1..].parse::<u8>().ok().map(SpecialKey::F)?
            }
            _ => return None,
        })
    }
}

/// Subprocess-invocation adapter to the local terminal multiplexer.
///
/// Implementors MUST NOT interpolate session names or key text into a shell
/// string; every operation passes an argv vector directly to the multiplexer
/// binary.
#[async_trait]
pub trait MultiplexerAdapter: Send + Sync {
    async fn list_sessions(&self) -> Vec<SessionSummary>;
    async fn session_exists(&self, name: &str) -> bool;
    async fn create_session(&self, name: &str, work_dir: Option<&str>);
    async fn kill_session(&self, name: &str);
    async fn send_keys(&self, target: &str, text: &str, literal: bool);
    async fn send_special_key(&self, target: &str, key: SpecialKey);
    async fn send_keys_with_enter(&self, target: &str, text: &str);
    async fn capture_pane(&self, name: &str, with_escapes: bool) -> Option<String>;
    async fn capture_pane_for_stream(&self, name: &str) -> Option<String>;
    async fn resize(&self, name: &str, cols: u32, rows: u32);
    async fn get_pane_work_dir(&self, name: &str) -> Option<String>;
}

/// Spawn `tmux <args>`, argv-only, merging a combined stdout+stderr capture
/// for substring inspection. Returns `None` only when the process could not
/// be spawned or exceeded the wall-clock timeout (in which case it is
/// killed); a completed invocation always yields `Some((success, text))`
/// regardless of exit status, since several callers (`session_exists`,
/// `list_sessions`) need to inspect output on the failure path too.
async fn run_raw(args: &[&str]) -> Option<(bool, String)> {
    let mut cmd = Command::new("tmux");
    cmd.args(args);
    cmd.kill_on_drop(true);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let child = cmd.spawn().ok()?;
    match tokio::time::timeout(SUBPROCESS_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.is_empty() {
                combined.push('\n');
                combined.push_str(&stderr);
            }
            Some((output.status.success(), combined))
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, args = ?args, "tmux subprocess I/O failure");
            None
        }
        Err(_) => {
            tracing::warn!(args = ?args, "tmux subprocess timed out, killed");
            None
        }
    }
}

/// `run_raw`, but treat a non-zero exit as a failure too (null result).
async fn run_ok(args: &[&str]) -> Option<String> {
    match run_raw(args).await {
        Some((true, text)) => Some(text),
        _ => None,
    }
}

/// Parse one `tmux list-sessions` line: `name: N windows (created ...) (attached)?`.
///
/// `name` is the text up to the first `:`. `N` is the integer preceding
/// ` windows`/` window`, defaulting to 1 if absent or unparsable. `attached`
/// iff the line contains `(attached)`. Any parse failure yields a minimal
/// record `(line, 1, false)` rather than dropping the line.
fn parse_session_line(line: &str) -> SessionSummary {
    let Some(colon) = line.find(':') else {
        return SessionSummary {
            name: line.to_string(),
            windows: 1,
            attached: false,
        };
    };
    let name = line[..colon].to_string();
    let attached = line.contains("(attached)");

    let windows_prefix = if line.contains(" windows") {
        line.split(" windows").next()
    } else if line.contains(" window") {
        line.split(" window").next()
    } else {
        None
    };
    let windows = windows_prefix
        .and_then(|prefix| prefix.rsplit(' ').next())
        .and_then(|tok| tok.parse::<u32>().ok())
        .unwrap_or(1);

    SessionSummary { name, windows, attached }
}

/// Real `tmux`-backed adapter.
pub struct TmuxAdapter;

impl TmuxAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TmuxAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MultiplexerAdapter for TmuxAdapter {
    async fn list_sessions(&self) -> Vec<SessionSummary> {
        let Some((_, text)) = run_raw(&["list-sessions"]).await else {
            return Vec::new();
        };
        if text.contains("no server running") {
            return Vec::new();
        }
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(parse_session_line)
            .collect()
    }

    async fn session_exists(&self, name: &str) -> bool {
        match run_raw(&["has-session", "-t", name]).await {
            Some((_, text)) => !text.contains("can't find session"),
            None => false,
        }
    }

    async fn create_session(&self, name: &str, work_dir: Option<&str>) {
        if self.session_exists(name).await {
            tracing::warn!(session = name, "create_session: session already exists, no-op");
            return;
        }
        let mut args = vec!["new-session", "-d", "-s", name];
        if let Some(dir) = work_dir {
            args.push("-c");
            args.push(dir);
        }
        let _ = run_ok(&args).await;
    }

    async fn kill_session(&self, name: &str) {
        let _ = run_ok(&["kill-session", "-t", name]).await;
    }

    async fn send_keys(&self, target: &str, text: &str, literal: bool) {
        let mut args = vec!["send-keys", "-t", target];
        if literal {
            args.push("-l");
        }
        args.push(text);
        let _ = run_ok(&args).await;
    }

    async fn send_special_key(&self, target: &str, key: SpecialKey) {
        let token = key.as_tmux_token();
        let _ = run_ok(&["send-keys", "-t", target, &token]).await;
    }

    async fn send_keys_with_enter(&self, target: &str, text: &str) {
        self.send_keys(target, text, true).await;
        self.send_special_key(target, SpecialKey::Enter).await;
    }

    async fn capture_pane(&self, name: &str, with_escapes: bool) -> Option<String> {
        let mut args = vec!["capture-pane", "-t", name, "-p"];
        if with_escapes {
            args.push("-e");
        }
        run_ok(&args).await
    }

    async fn capture_pane_for_stream(&self, name: &str) -> Option<String> {
        let content = self.capture_pane(name, true).await?;
        Some(format!("{}{}", crate::frame::CLEAR_HOME_PREFIX, content))
    }

    async fn resize(&self, name: &str, cols: u32, rows: u32) {
        let _ = run_ok(&[
            "resize-window",
            "-t",
            name,
            "-x",
            &cols.to_string(),
            "-y",
            &rows.to_string(),
        ])
        .await;
    }

    async fn get_pane_work_dir(&self, name: &str) -> Option<String> {
        let out = run_ok(&["display-message", "-t", name, "-p", "#{pane_current_path}"]).await?;
        let trimmed = out.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// A deterministic, in-memory stand-in for [`TmuxAdapter`] used by the
/// scenario tests. Not cfg-gated so integration tests outside this crate can
/// construct it too.
pub mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{MultiplexerAdapter, SpecialKey};
    use crate::message::SessionSummary;

    #[derive(Debug, Clone)]
    struct FakeSession {
        windows: u32,
        attached: bool,
        pane: String,
        work_dir: Option<String>,
    }

    /// Records every call made against it (`calls`) and serves canned pane
    /// content, so a test can both assert on adapter interactions and drive
    /// the capture/controller layers above it deterministically.
    pub struct FakeAdapter {
        sessions: Mutex<HashMap<String, FakeSession>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeAdapter {
        pub fn new() -> Self {
            Self {
                sessions: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Seed a session as if `tmux new-session` had already run.
        pub fn seed_session(&self, name: &str, pane: &str) {
            self.sessions.lock().unwrap().insert(
                name.to_string(),
                FakeSession {
                    windows: 1,
                    attached: false,
                    pane: pane.to_string(),
                    work_dir: None,
                },
            );
        }

        /// Overwrite the pane content returned for `name`'s next capture.
        pub fn set_pane(&self, name: &str, pane: &str) {
            if let Some(s) = self.sessions.lock().unwrap().get_mut(name) {
                s.pane = pane.to_string();
            }
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    impl Default for FakeAdapter {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl MultiplexerAdapter for FakeAdapter {
        async fn list_sessions(&self) -> Vec<SessionSummary> {
            self.record("list_sessions");
            self.sessions
                .lock()
                .unwrap()
                .iter()
                .map(|(name, s)| SessionSummary {
                    name: name.clone(),
                    windows: s.windows,
                    attached: s.attached,
                })
                .collect()
        }

        async fn session_exists(&self, name: &str) -> bool {
            self.record(format!("session_exists({name})"));
            self.sessions.lock().unwrap().contains_key(name)
        }

        async fn create_session(&self, name: &str, work_dir: Option<&str>) {
            self.record(format!("create_session({name})"));
            self.sessions.lock().unwrap().entry(name.to_string()).or_insert(FakeSession {
                windows: 1,
                attached: false,
                pane: String::new(),
                work_dir: work_dir.map(|s| s.to_string()),
            });
        }

        async fn kill_session(&self, name: &str) {
            self.record(format!("kill_session({name})"));
            self.sessions.lock().unwrap().remove(name);
        }

        async fn send_keys(&self, target: &str, text: &str, literal: bool) {
            self.record(format!("send_keys({target},{text},literal={literal})"));
        }

        async fn send_special_key(&self, target: &str, key: SpecialKey) {
            self.record(format!("send_special_key({target},{})", key.as_tmux_token()));
        }

        async fn send_keys_with_enter(&self, target: &str, text: &str) {
            self.send_keys(target, text, true).await;
            self.send_special_key(target, SpecialKey::Enter).await;
        }

        async fn capture_pane(&self, name: &str, _with_escapes: bool) -> Option<String> {
            self.record(format!("capture_pane({name})"));
            self.sessions.lock().unwrap().get(name).map(|s| s.pane.clone())
        }

        async fn capture_pane_for_stream(&self, name: &str) -> Option<String> {
            let content = self.capture_pane(name, true).await?;
            Some(format!("{}{}", crate::frame::CLEAR_HOME_PREFIX, content))
        }

        async fn resize(&self, name: &str, cols: u32, rows: u32) {
            self.record(format!("resize({name},{cols},{rows})"));
        }

        async fn get_pane_work_dir(&self, name: &str) -> Option<String> {
            self.record(format!("get_pane_work_dir({name})"));
            self.sessions.lock().unwrap().get(name).and_then(|s| s.work_dir.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_session_line() {
        let s = parse_session_line(
            "main: 3 windows (created Mon Jan 26 19:54:13 2026) (attached)",
        );
        assert_eq!(s.name, "main");
        assert_eq!(s.windows, 3);
        assert!(s.attached);
    }

    #[test]
    fn parses_unattached_singular_window() {
        let s = parse_session_line("work: 1 window (created Mon Jan 26 19:54:13 2026)");
        assert_eq!(s.name, "work");
        assert_eq!(s.windows, 1);
        assert!(!s.attached);
    }

    #[test]
    fn singular_window_count_is_not_mistaken_for_trailing_text() {
        // `line.split(" windows").next()` is `Some(whole_line)` even when
        // " windows" is absent, so a naive `.or_else` fallback to the
        // singular split never actually runs: it would instead take the
        // whole line's last whitespace token ("2023") as the window count.
        let s = parse_session_line("solo: 1 window 2023");
        assert_eq!(s.name, "solo");
        assert_eq!(s.windows, 1);
    }

    #[test]
    fn falls_back_to_minimal_record_on_parse_failure() {
        let s = parse_session_line("garbage-no-colon");
        assert_eq!(s.name, "garbage-no-colon");
        assert_eq!(s.windows, 1);
        assert!(!s.attached);
    }

    #[test]
    fn special_key_alias_resolution_is_case_insensitive() {
        assert_eq!(SpecialKey::resolve("enter"), Some(SpecialKey::Enter));
        assert_eq!(SpecialKey::resolve("RETURN"), Some(SpecialKey::Enter));
        assert_eq!(SpecialKey::resolve("Cr"), Some(SpecialKey::Enter));
        assert_eq!(SpecialKey::resolve("ctrl_c"), Some(SpecialKey::CtrlC));
        assert_eq!(SpecialKey::resolve("bs"), Some(SpecialKey::BSpace));
        assert_eq!(SpecialKey::resolve("f5"), Some(SpecialKey::F(5)));
        assert_eq!(SpecialKey::resolve("nonsense"), None);
    }

    #[test]
    fn special_key_tmux_tokens_match_spec_set() {
        assert_eq!(SpecialKey::Enter.as_tmux_token(), "Enter");
        assert_eq!(SpecialKey::CtrlC.as_tmux_token(), "C-c");
        assert_eq!(SpecialKey::Dc.as_tmux_token(), "DC");
        assert_eq!(SpecialKey::F(12).as_tmux_token(), "F12");
    }
}
