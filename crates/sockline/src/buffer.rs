//! The receive buffer shared by every read operation

use bytes::{Bytes, BytesMut};

/// Position of a stop sequence found in the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    /// Index of the first byte of the match
    pub start: usize,
    /// Index of the last byte of the match
    pub end: usize,
}

impl Match {
    /// Number of bytes to extract so the match is the tail of the segment
    pub fn segment_len(&self) -> usize {
        self.end + 1
    }
}

/// FIFO accumulator of bytes received but not yet handed to the caller
///
/// Data is only ever appended at the tail and taken from the head.
#[derive(Debug, Default)]
pub struct Buffer {
    inner: BytesMut,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    pub fn append(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    /// Remove and return up to `n` bytes from the head
    ///
    /// Returns `None` when nothing is buffered. When fewer than `n` bytes are
    /// available all of them are returned.
    pub fn extract(&mut self, n: usize) -> Option<Bytes> {
        if self.inner.is_empty() {
            return None;
        }
        let n = n.min(self.inner.len());
        Some(self.inner.split_to(n).freeze())
    }

    /// Earliest occurrence of any of `stops`, by start index
    ///
    /// When two sequences start at the same index the one listed first wins.
    /// Empty sequences never match.
    pub fn find_earliest<S: AsRef<[u8]>>(&self, stops: &[S]) -> Option<Match> {
        let mut best: Option<Match> = None;
        for stop in stops {
            let stop = stop.as_ref();
            if stop.is_empty() {
                continue;
            }
            if let Some(start) = find(&self.inner, stop) {
                if best.is_none_or(|b| start < b.start) {
                    best = Some(Match {
                        start,
                        end: start + stop.len() - 1,
                    });
                }
            }
        }
        best
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
