//! Terminal output sink.
//!
//! Transcripts and captured module stdout/stderr are written here. The CLI
//! uses [`StdoutSink`]; embedders and tests use [`BufferSink`].

use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

pub trait OutputSink: Send + Sync {
    /// Append raw text.
    fn write(&self, text: &str);

    /// Append text followed by a line break.
    fn writeln(&self, text: &str) {
        self.write(text);
        self.write("\n");
    }
}

pub type SharedSink = Arc<dyn OutputSink>;

/// Writes straight to the process stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = stdout.write_all(text.as_bytes()).and_then(|_| stdout.flush()) {
            tracing::warn!(error = %e, "Failed to write to stdout");
        }
    }
}

/// Collects everything in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct BufferSink {
    buf: Arc<Mutex<String>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buf.lock().clone()
    }

    pub fn clear(&self) {
        self.buf.lock().clear();
    }
}

impl OutputSink for BufferSink {
    fn write(&self, text: &str) {
        self.buf.lock().push_str(text);
    }
}

/// Incremental UTF-8 decoder for one output stream.
///
/// Modules write arbitrary byte chunks, so a multi-byte character may be
/// split across two writes. The incomplete tail is held back until the next
/// chunk; invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub(crate) struct StreamDecoder {
    pending: Vec<u8>,
}

impl StreamDecoder {
    pub(crate) fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let tail = rest.to_vec();
        self.pending = tail;
        out
    }

    /// Flush whatever is left, replacing an incomplete sequence.
    pub(crate) fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_sink_collects() {
        let sink = BufferSink::new();
        let shared: SharedSink = Arc::new(sink.clone());

        shared.write("$ crystal");
        shared.writeln(" --version");
        shared.writeln("");

        assert_eq!(sink.contents(), "$ crystal --version\n\n");
        sink.clear();
        assert!(sink.contents().is_empty());
    }

    #[test]
    fn test_decoder_joins_split_characters() {
        let mut decoder = StreamDecoder::default();
        let bytes = "héllo".as_bytes();

        let first = decoder.decode(&bytes[..2]);
        let second = decoder.decode(&bytes[2..]);

        assert_eq!(first, "h");
        assert_eq!(second, "éllo");
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = StreamDecoder::default();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(decoder.decode(b"\xe2\x82"), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }
}
