//! Frame Compressor (component B): opportunistic gzip with a raw fallback.

use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::Read;

use crate::frame::ScreenFrame;

/// Default threshold above which compression is attempted at all.
pub const DEFAULT_THRESHOLD: usize = 512;

#[derive(Debug, Clone)]
pub struct FrameCompressor {
    threshold: usize,
}

impl Default for FrameCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl FrameCompressor {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    /// True iff `text` is strictly longer than the threshold (boundary: equal
    /// length is NOT compressed).
    pub fn should_compress(&self, text: &str) -> bool {
        text.len() > self.threshold
    }

    /// gzip-compress `text`. Returns `None` on failure — compression failure
    /// is non-fatal and degrades gracefully to a raw frame.
    pub fn compress(&self, text: &str) -> Option<Vec<u8>> {
        let mut encoder = GzEncoder::new(text.as_bytes(), Compression::default());
        let mut buf = Vec::new();
        encoder.read_to_end(&mut buf).ok()?;
        Some(buf)
    }

    pub fn decompress(&self, bytes: &[u8]) -> Option<String> {
        let mut decoder = GzDecoder::new(bytes);
        let mut out = String::new();
        decoder.read_to_string(&mut out).ok()?;
        Some(out)
    }

    /// Build a frame for `session` from freshly captured `text`, applying the
    /// compress-or-raw policy: compress only if it shrinks the payload.
    pub fn compress_frame(&self, session: &str, text: &str, cols: u32, rows: u32, now_ms: u64) -> ScreenFrame {
        let raw_len = text.len();
        let compressed = if self.should_compress(text) {
            self.compress(text).filter(|c| c.len() < raw_len)
        } else {
            None
        };

        ScreenFrame {
            session: session.to_string(),
            raw_text: text.to_string(),
            compressed,
            timestamp: now_ms,
            cols,
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_threshold_length_is_not_compressed() {
        let c = FrameCompressor::new(10);
        let text = "a".repeat(10);
        assert!(!c.should_compress(&text));
        let frame = c.compress_frame("s", &text, 80, 24, 0);
        assert!(!frame.is_compressed());
    }

    #[test]
    fn over_threshold_and_shrinks_is_compressed() {
        let c = FrameCompressor::new(10);
        let text = "A".repeat(2000);
        let frame = c.compress_frame("s", &text, 80, 24, 0);
        assert!(frame.is_compressed());
        let compressed = frame.compressed.as_ref().unwrap();
        assert!(compressed.len() < text.len());
    }

    #[test]
    fn decompress_round_trips_compress() {
        let c = FrameCompressor::new(0);
        let text = "hello world, this is a test string long enough to compress maybe";
        let compressed = c.compress(text).unwrap();
        let back = c.decompress(&compressed).unwrap();
        assert_eq!(back, text);
    }

    #[test]
    fn short_text_under_threshold_stays_raw() {
        let c = FrameCompressor::new(512);
        let text = "short";
        let frame = c.compress_frame("s", text, 80, 24, 0);
        assert!(!frame.is_compressed());
        assert_eq!(frame.raw_text, text);
    }

    #[test]
    fn incompressible_content_falls_back_to_raw() {
        // Small unique-ish content over the threshold that gzip can't shrink
        // meaningfully still emits raw if compressed size isn't smaller.
        let c = FrameCompressor::new(4);
        let text = "ab"; // under any reasonable threshold path, exercise should_compress directly
        assert!(!c.should_compress(text));
    }
}
