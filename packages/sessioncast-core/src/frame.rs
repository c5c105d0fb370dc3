//! Screen frame: the immutable record captured per tick and handed to a sink.

/// Clear-screen-and-home prefix prepended to every captured frame so each
/// frame is a complete repaint (no diffing on the viewer side).
pub const CLEAR_HOME_PREFIX: &str = "\x1b[2J\x1b[H";

/// Default terminal dimensions when the adapter can't determine the real ones.
pub const DEFAULT_COLS: u32 = 80;
pub const DEFAULT_ROWS: u32 = 24;

/// One screen snapshot emitted upstream. Always self-contained: `raw_text`
/// begins with [`CLEAR_HOME_PREFIX`] so a viewer can render it with no prior
/// state.
#[derive(Debug, Clone)]
pub struct ScreenFrame {
    pub session: String,
    pub raw_text: String,
    pub compressed: Option<Vec<u8>>,
    pub timestamp: u64,
    pub cols: u32,
    pub rows: u32,
}

impl ScreenFrame {
    /// True iff this frame carries a compressed payload instead of raw text.
    ///
    /// Invariant: when true, `compressed` is `Some` and strictly shorter than
    /// the UTF-8 encoding of `raw_text`.
    pub fn is_compressed(&self) -> bool {
        self.compressed.is_some()
    }

    pub fn raw_len(&self) -> usize {
        self.raw_text.len()
    }
}
