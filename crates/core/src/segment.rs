//! Segment records shared between the engine and its host transport.
//!
//! Payload and option buffers are `bytes::Bytes`, so cloning a segment (or
//! retaining it in the reference window) bumps a refcount instead of copying
//! bytes. Ownership forms a forest: the delivery queue and the FEC window may
//! both hold handles to the same payload, and dropping either side is safe.

use bytes::Bytes;

use crate::seq::{seq_gt, seq_leq, SeqNum};

/// TCP-style control flag bits carried on a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentFlags(u8);

impl SegmentFlags {
    pub const SYN: SegmentFlags = SegmentFlags(0x01);
    pub const FIN: SegmentFlags = SegmentFlags(0x02);
    pub const RST: SegmentFlags = SegmentFlags(0x04);
    pub const ACK: SegmentFlags = SegmentFlags(0x08);
    pub const PSH: SegmentFlags = SegmentFlags(0x10);

    pub fn empty() -> Self {
        SegmentFlags(0)
    }

    pub fn contains(&self, other: SegmentFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: SegmentFlags) {
        self.0 |= other.0;
    }

    pub fn intersects(&self, other: SegmentFlags) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for SegmentFlags {
    type Output = SegmentFlags;

    fn bitor(self, rhs: SegmentFlags) -> SegmentFlags {
        SegmentFlags(self.0 | rhs.0)
    }
}

/// A parsed transport segment as the host hands it to the engine.
#[derive(Debug, Clone)]
pub struct Segment {
    /// First stream byte carried by this segment.
    pub seq: SeqNum,
    /// Acknowledgment number from the segment header.
    pub ack_seq: SeqNum,
    pub flags: SegmentFlags,
    /// Raw option bytes (kind/len encoded), excluding the fixed header.
    pub options: Bytes,
    pub payload: Bytes,
    /// Set when the checksum has already been validated (or derived data
    /// makes validation unnecessary, as for synthetic recovered segments).
    pub checksum_verified: bool,
}

impl Segment {
    /// End of the segment's sequence range. SYN and FIN each occupy one
    /// sequence number but contribute no payload bytes.
    pub fn end_seq(&self) -> SeqNum {
        let mut end = self.seq.wrapping_add(self.payload.len() as u32);
        if self.flags.contains(SegmentFlags::SYN) {
            end = end.wrapping_add(1);
        }
        if self.flags.contains(SegmentFlags::FIN) {
            end = end.wrapping_add(1);
        }
        end
    }

    /// End of the payload bytes, ignoring SYN/FIN sequence consumption.
    pub fn data_end(&self) -> SeqNum {
        self.seq.wrapping_add(self.payload.len() as u32)
    }
}

/// Walks an ordered run of segments and feeds up to `want` contiguous payload
/// bytes starting at `from` into `sink`, invoked as `sink(seq, bytes)`.
///
/// Segments wholly before `from` are skipped; if `from` falls in the interior
/// of a segment the walk starts at the matching offset. The walk stops at a
/// sequence gap, at a segment carrying RST or SYN, or once `want` bytes have
/// been yielded. Returns the number of bytes yielded.
pub(crate) fn copy_range<'a, I, F>(segments: I, from: SeqNum, want: usize, sink: &mut F) -> usize
where
    I: IntoIterator<Item = &'a Segment>,
    F: FnMut(SeqNum, &[u8]),
{
    let mut expected = from;
    let mut yielded = 0usize;

    for seg in segments {
        if yielded == want {
            break;
        }
        if seq_leq(seg.data_end(), expected) {
            continue;
        }
        if seg.flags.intersects(SegmentFlags::RST | SegmentFlags::SYN) {
            break;
        }
        if seq_gt(seg.seq, expected) {
            // Gap in the run.
            break;
        }
        let offset = expected.wrapping_sub(seg.seq) as usize;
        let avail = seg.payload.len() - offset;
        let take = avail.min(want - yielded);
        sink(expected, &seg.payload[offset..offset + take]);
        expected = expected.wrapping_add(take as u32);
        yielded += take;
    }

    yielded
}
