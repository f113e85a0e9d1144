//! Host-transport capability set.
//!
//! The FEC engine never reaches into the transport through globals; every
//! entry point receives a [`TransportContext`] carrying exactly the
//! capabilities the engine consumes: the in-order cursor, the out-of-order
//! reassembly queue, SACK state, the retransmission queue, and the
//! congestion-control hooks. The host implements this trait once per
//! connection; tests implement it with an in-memory mock.
//!
//! All calls happen under the connection's serialization discipline (the
//! host holds its per-connection lock across receive processing), so no
//! method here needs interior synchronization.

use crate::segment::Segment;
use crate::seq::{SeqNum, SeqRange};

/// One entry of the sender's retransmission queue, as visible to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxSegment {
    pub range: SeqRange,
    /// Acknowledged via a selective-ACK block.
    pub sacked: bool,
    /// Already marked lost by the retransmission machinery.
    pub lost: bool,
}

impl TxSegment {
    pub fn new(range: SeqRange) -> Self {
        Self {
            range,
            sacked: false,
            lost: false,
        }
    }
}

/// Capabilities the engine consumes from (and effects it applies to) the
/// host transport. See the module docs for the serialization contract.
pub trait TransportContext {
    /// Next expected in-order stream byte on the receive side.
    fn rcv_nxt(&self) -> SeqNum;

    /// Next sequence number the send side will use.
    fn snd_nxt(&self) -> SeqNum;

    /// High-water mark gating one congestion reduction per loss episode.
    fn high_seq(&self) -> SeqNum;

    fn set_high_seq(&mut self, seq: SeqNum);

    /// Current selective-ACK blocks, ordered by sequence number.
    fn sack_blocks(&self) -> &[SeqRange];

    /// The out-of-order reassembly queue, ordered by sequence number.
    /// Read-only: the engine XORs out of these segments but never removes
    /// or rewrites them.
    fn ooo_segments(&self) -> &[Segment];

    /// The sender's retransmission queue. The engine only flips `lost` on
    /// entries fully covered by a peer-asserted loss range.
    fn write_queue_mut(&mut self) -> &mut [TxSegment];

    /// Move the retransmit-hint pointer back to `seq` if it currently points
    /// past it.
    fn update_retransmit_hint(&mut self, seq: SeqNum);

    /// Raise the retransmit high mark to at least `seq`.
    fn raise_retransmit_high(&mut self, seq: SeqNum);

    /// Ask the congestion-control module for the slow-start threshold it
    /// wants after a loss event. The engine does not assume any particular
    /// algorithm; it applies `cwnd := min(cwnd, ssthresh)`.
    fn ssthresh(&mut self) -> u32;

    fn set_ssthresh(&mut self, ssthresh: u32);

    fn cwnd(&self) -> u32;

    fn set_cwnd(&mut self, cwnd: u32);

    /// Whether the sender is already inside a loss-recovery phase.
    fn in_loss_recovery(&self) -> bool;

    /// Forbid undoing the congestion window reduction for this episode.
    fn disable_undo(&mut self);

    /// Drop any pending ECN CWR demand (the peer has acknowledged our
    /// recovery advertisement).
    fn clear_ecn_cwr_demand(&mut self);

    /// Hand a synthetic recovered segment to the established-state receive
    /// path, as if it had just arrived from the network.
    fn deliver_recovered(&mut self, segment: Segment);

    /// Request that an ACK be emitted immediately rather than delayed.
    fn request_immediate_ack(&mut self);
}
