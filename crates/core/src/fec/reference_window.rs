//! Reference window: retained clones of recently delivered in-order data.
//!
//! Delivered segments are normally released once their payload is copied to
//! the upper layer. While FEC is enabled, a clone of each in-order segment's
//! payload handle is retained past delivery so a later parity packet can XOR
//! against it. The window is a byte-bounded FIFO: entries are evicted whole
//! from the head, oldest first, and the retained bytes are never handed out
//! for delivery again.

use std::collections::VecDeque;

use crate::segment::{copy_range, Segment};
use crate::seq::SeqNum;

pub(crate) struct ReferenceWindow {
    segments: VecDeque<Segment>,
    /// Sum of payload lengths across `segments`.
    bytes: usize,
    limit: usize,
    evictions: u64,
}

impl ReferenceWindow {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            segments: VecDeque::new(),
            bytes: 0,
            limit,
            evictions: 0,
        }
    }

    /// Retain one in-order data segment at the moment it transitions to
    /// delivered. Must be called once per segment, in delivery order. The
    /// payload handle is cloned; no bytes are copied.
    pub(crate) fn retain(&mut self, segment: &Segment) {
        if segment.payload.is_empty() {
            return;
        }
        self.bytes += segment.payload.len();
        self.segments.push_back(segment.clone());

        // Evict whole entries from the head until the rest of the window
        // fits the soft limit. The newest entry is never split, so the
        // window may transiently hold up to limit + one segment.
        while let Some(head) = self.segments.front() {
            let head_len = head.payload.len();
            if self.bytes - head_len < self.limit {
                break;
            }
            self.bytes -= head_len;
            self.segments.pop_front();
            self.evictions += 1;
        }
        tracing::trace!(
            retained = self.segments.len(),
            bytes = self.bytes,
            "reference window retain"
        );
    }

    /// Yield up to `want` contiguous payload bytes starting at `from` into
    /// `sink`. Stops at a gap, at a RST/SYN segment, or after `want` bytes.
    pub(crate) fn read_into<F>(&self, from: SeqNum, want: usize, sink: &mut F) -> usize
    where
        F: FnMut(SeqNum, &[u8]),
    {
        copy_range(self.segments.iter(), from, want, sink)
    }

    /// Drop all retained references.
    pub(crate) fn purge(&mut self) {
        self.segments.clear();
        self.bytes = 0;
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    #[allow(dead_code)] // used in tests, handy when debugging retention
    pub(crate) fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[allow(dead_code)] // used in tests, may feed telemetry later
    pub(crate) fn evictions(&self) -> u64 {
        self.evictions
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.segments.len()
    }
}
