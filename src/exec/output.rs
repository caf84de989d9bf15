// src/exec/output.rs

const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Output buffer with a hard byte cap.
///
/// Bytes beyond the cap are counted and discarded so the producing process
/// never blocks on a full pipe.
#[derive(Debug, Clone)]
pub struct BoundedOutput {
    limit: usize,
    buf: Vec<u8>,
    dropped: usize,
}

impl BoundedOutput {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            buf: Vec::with_capacity(limit.min(8 * 1024)),
            dropped: 0,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        let room = self.limit.saturating_sub(self.buf.len());
        let take = room.min(bytes.len());
        self.buf.extend_from_slice(&bytes[..take]);
        self.dropped += bytes.len() - take;
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }

    /// Captured text (lossy UTF-8) and whether anything was dropped. A
    /// marker line is appended to truncated output.
    pub fn finish(self) -> (String, bool) {
        let truncated = self.is_truncated();
        let mut text = String::from_utf8_lossy(&self.buf).into_owned();
        if truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        (text, truncated)
    }
}
