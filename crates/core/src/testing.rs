//! In-memory test doubles: a mock host transport and an oracle parity
//! encoder mirroring the sender-side coding the engine decodes against.

use bytes::Bytes;

use crate::fec::{wire, FecFlags};
use crate::segment::{Segment, SegmentFlags};
use crate::seq::{seq_lt, SeqNum, SeqRange};
use crate::transport::{TransportContext, TxSegment};

/// A plain ACK-flagged data segment.
pub(crate) fn seg(seq: SeqNum, payload: &[u8]) -> Segment {
    Segment {
        seq,
        ack_seq: 0,
        flags: SegmentFlags::ACK,
        options: Bytes::new(),
        payload: Bytes::copy_from_slice(payload),
        checksum_verified: true,
    }
}

/// A parity segment carrying the long-form ENCODED option over
/// `[enc_seq, enc_seq + enc_len)`.
pub(crate) fn parity_segment(enc_seq: SeqNum, enc_len: u32, payload: &[u8]) -> Segment {
    let mut options = vec![wire::TCPOPT_NOP, wire::TCPOPT_NOP];
    options.extend_from_slice(&wire::encode_long(FecFlags::ENCODED, enc_seq, enc_len));
    Segment {
        seq: 0,
        ack_seq: 0,
        flags: SegmentFlags::ACK,
        options: Bytes::from(options),
        payload: Bytes::copy_from_slice(payload),
        checksum_verified: true,
    }
}

/// Oracle encoder: XOR the segments' payload bytes into an MSS-sized parity
/// block, each byte at its offset within its block, skipping unencoded
/// blocks (`skip` per encoded block).
pub(crate) fn xor_parity(
    segments: &[&Segment],
    enc_seq: SeqNum,
    mss: usize,
    skip: usize,
) -> Vec<u8> {
    let span = mss * (skip + 1);
    let mut parity = vec![0u8; mss];
    for segment in segments {
        let rel = segment.seq.wrapping_sub(enc_seq) as usize;
        for (i, byte) in segment.payload.iter().enumerate() {
            let off = (rel + i) % span;
            if off < mss {
                parity[off] ^= byte;
            }
        }
    }
    parity
}

/// Host transport double recording every effect the engine applies.
#[derive(Default)]
pub(crate) struct MockTransport {
    pub rcv_nxt: SeqNum,
    pub snd_nxt: SeqNum,
    pub high_seq: SeqNum,
    pub sacks: Vec<SeqRange>,
    pub ooo: Vec<Segment>,
    pub write_queue: Vec<TxSegment>,
    pub retransmit_hint: Option<SeqNum>,
    pub retransmit_high: Option<SeqNum>,
    /// What the congestion module answers when asked for a threshold.
    pub cc_ssthresh: u32,
    /// What the engine recorded via `set_ssthresh`.
    pub ssthresh: u32,
    pub cwnd: u32,
    pub in_loss_recovery: bool,
    pub undo_disabled: bool,
    pub ecn_cwr_demand_cleared: bool,
    pub delivered: Vec<Segment>,
    pub immediate_ack_requested: bool,
}

impl TransportContext for MockTransport {
    fn rcv_nxt(&self) -> SeqNum {
        self.rcv_nxt
    }

    fn snd_nxt(&self) -> SeqNum {
        self.snd_nxt
    }

    fn high_seq(&self) -> SeqNum {
        self.high_seq
    }

    fn set_high_seq(&mut self, seq: SeqNum) {
        self.high_seq = seq;
    }

    fn sack_blocks(&self) -> &[SeqRange] {
        &self.sacks
    }

    fn ooo_segments(&self) -> &[Segment] {
        &self.ooo
    }

    fn write_queue_mut(&mut self) -> &mut [TxSegment] {
        &mut self.write_queue
    }

    fn update_retransmit_hint(&mut self, seq: SeqNum) {
        self.retransmit_hint = Some(match self.retransmit_hint {
            Some(hint) if seq_lt(hint, seq) => hint,
            _ => seq,
        });
    }

    fn raise_retransmit_high(&mut self, seq: SeqNum) {
        self.retransmit_high = Some(match self.retransmit_high {
            Some(high) if seq_lt(seq, high) => high,
            _ => seq,
        });
    }

    fn ssthresh(&mut self) -> u32 {
        self.cc_ssthresh
    }

    fn set_ssthresh(&mut self, ssthresh: u32) {
        self.ssthresh = ssthresh;
    }

    fn cwnd(&self) -> u32 {
        self.cwnd
    }

    fn set_cwnd(&mut self, cwnd: u32) {
        self.cwnd = cwnd;
    }

    fn in_loss_recovery(&self) -> bool {
        self.in_loss_recovery
    }

    fn disable_undo(&mut self) {
        self.undo_disabled = true;
    }

    fn clear_ecn_cwr_demand(&mut self) {
        self.ecn_cwr_demand_cleared = true;
    }

    fn deliver_recovered(&mut self, segment: Segment) {
        self.delivered.push(segment);
    }

    fn request_immediate_ack(&mut self) {
        self.immediate_ack_requested = true;
    }
}
