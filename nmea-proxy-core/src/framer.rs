//! Reassembly of CRLF terminated telegrams from a TCP byte stream.
//!
//! Sensors write telegrams in arbitrary chunks; the Aanderaa meter even
//! sends them one character at a time, padded with NUL bytes. The framer
//! appends every chunk to a per-connection buffer and releases the buffer
//! once it ends with `\r\n`. A released buffer holding several telegrams
//! (bulk delivery) is split at each `\r\n`, so the telegrams seen by the
//! parser do not depend on how the stream was chunked.
//!
//! There is no re-synchronisation: the buffer is only released when a
//! terminator is its last two bytes, and a stream that never sends one
//! grows the buffer without bound.

/// Telegram terminator
pub const TERMINATOR: &[u8; 2] = b"\r\n";

/// Per-connection telegram buffer.
#[derive(Debug, Default, Clone)]
pub struct TelegramFramer {
    buffer: Vec<u8>,
}

impl TelegramFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the telegrams completed by it, in order.
    ///
    /// Each telegram keeps its terminator. NUL padding is replaced by
    /// spaces.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        if !self.buffer.ends_with(TERMINATOR) {
            return Vec::new();
        }

        let mut released = std::mem::take(&mut self.buffer);
        for b in released.iter_mut() {
            if *b == 0 {
                *b = b' ';
            }
        }
        split_telegrams(&released)
    }

    /// Number of bytes waiting for a terminator.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial telegram, e.g. when the connection is replaced.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Split a terminated buffer after every `\r\n`.
fn split_telegrams(data: &[u8]) -> Vec<Vec<u8>> {
    let mut telegrams = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + 1 < data.len() {
        if data[i] == b'\r' && data[i + 1] == b'\n' {
            telegrams.push(data[start..i + 2].to_vec());
            start = i + 2;
            i += 2;
        } else {
            i += 1;
        }
    }
    telegrams
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &[u8] =
        b"0701 \x000116 \x000906 \x000366\r\n0701 \x000106 \x000912 \x000366\r\n0699 0111 0915 0366\r\n";

    fn frame_with_chunk_size(data: &[u8], size: usize) -> Vec<Vec<u8>> {
        let mut framer = TelegramFramer::new();
        data.chunks(size).flat_map(|c| framer.push(c)).collect()
    }

    #[test]
    fn test_partial_is_retained() {
        let mut framer = TelegramFramer::new();
        assert!(framer.push(b"0701 0116").is_empty());
        assert_eq!(framer.buffered_len(), 9);
        assert!(framer.push(b" 0906 0366\r").is_empty());
        assert_eq!(
            framer.push(b"\n"),
            vec![b"0701 0116 0906 0366\r\n".to_vec()]
        );
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn test_nul_replaced_by_space() {
        let mut framer = TelegramFramer::new();
        let telegrams = framer.push(b"0701 \x000116\r\n");
        assert_eq!(telegrams, vec![b"0701  0116\r\n".to_vec()]);
    }

    #[test]
    fn test_release_waits_for_trailing_terminator() {
        let mut framer = TelegramFramer::new();
        assert!(framer.push(b"a\r\nb").is_empty());
        assert_eq!(framer.buffered_len(), 4);
        assert_eq!(
            framer.push(b"\r\n"),
            vec![b"a\r\n".to_vec(), b"b\r\n".to_vec()]
        );
    }

    #[test]
    fn test_lone_cr_or_lf_is_not_a_terminator() {
        let mut framer = TelegramFramer::new();
        assert!(framer.push(b"abc\n").is_empty());
        assert!(framer.push(b"def\r").is_empty());
        assert_eq!(framer.push(b"\r\n"), vec![b"abc\ndef\r\r\n".to_vec()]);
    }

    #[test]
    fn test_chunking_invariance() {
        let bulk = frame_with_chunk_size(STREAM, STREAM.len());
        assert_eq!(bulk.len(), 3);
        assert_eq!(bulk[0], b"0701  0116  0906  0366\r\n");

        for size in [1, 2, 3, 5, 7, 23, 64] {
            assert_eq!(frame_with_chunk_size(STREAM, size), bulk, "chunk size {}", size);
        }
    }
}
