//! Sentinel framing for the script engine.

use super::Framer;

/// Collects output until a token-qualified marker is seen.
///
/// Everything before the marker is the call's output. A marker immediately
/// followed by another digit belongs to a different token (`X_3` vs `X_31`)
/// and is skipped.
#[derive(Debug)]
pub struct SentinelFramer {
    marker: Vec<u8>,
    buffer: Vec<u8>,
    /// Offset up to which the buffer has been searched without a match.
    scanned: usize,
}

impl SentinelFramer {
    /// Build the marker for a token: `<sentinel>_<token>`.
    pub fn marker(sentinel: &str, token: u64) -> String {
        format!("{}_{}", sentinel, token)
    }

    /// Create a framer waiting for `marker`.
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into().into_bytes(),
            buffer: Vec::new(),
            scanned: 0,
        }
    }

    /// Bytes received so far.
    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    fn find_marker(&self) -> Option<usize> {
        let len = self.marker.len();
        if len == 0 || self.buffer.len() < len {
            return None;
        }
        // A marker may straddle the previous chunk boundary.
        let start = self.scanned.saturating_sub(len - 1);
        let mut from = start;
        while let Some(offset) = self.buffer[from..]
            .windows(len)
            .position(|window| window == self.marker.as_slice())
        {
            let pos = from + offset;
            let next = self.buffer.get(pos + len);
            if !next.is_some_and(u8::is_ascii_digit) {
                return Some(pos);
            }
            from = pos + 1;
        }
        None
    }
}

impl Framer for SentinelFramer {
    type Output = String;

    fn feed(&mut self, chunk: &[u8]) -> Option<String> {
        self.buffer.extend_from_slice(chunk);
        match self.find_marker() {
            Some(pos) => Some(String::from_utf8_lossy(&self.buffer[..pos]).trim().to_string()),
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_format() {
        assert_eq!(SentinelFramer::marker("__DONE__", 7), "__DONE___7");
    }

    #[test]
    fn test_output_before_marker() {
        let mut framer = SentinelFramer::new("__DONE___1");
        assert_eq!(framer.feed(b"hello\nworld\n"), None);
        assert_eq!(
            framer.feed(b"__DONE___1\n").as_deref(),
            Some("hello\nworld")
        );
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let mut framer = SentinelFramer::new("__DONE___12");
        assert_eq!(framer.feed(b"result\n__DO"), None);
        assert_eq!(framer.feed(b"NE__"), None);
        assert_eq!(framer.feed(b"_12\n").as_deref(), Some("result"));
    }

    #[test]
    fn test_no_sentinel_fragment_leaks() {
        let mut framer = SentinelFramer::new("__DONE___2");
        let output = framer.feed(b"  value  \n__DONE___2\n").unwrap();
        assert_eq!(output, "value");
        assert!(!output.contains("__DONE"));
    }

    #[test]
    fn test_longer_token_is_not_a_match() {
        let mut framer = SentinelFramer::new("__DONE___3");
        assert_eq!(framer.feed(b"a\n__DONE___31\n"), None);
        assert_eq!(
            framer.feed(b"b\n__DONE___3\n").as_deref(),
            Some("a\n__DONE___31\nb")
        );
    }

    #[test]
    fn test_empty_output() {
        let mut framer = SentinelFramer::new("M_1");
        assert_eq!(framer.feed(b"M_1\n").as_deref(), Some(""));
        assert_eq!(framer.received(), 4);
    }
}
