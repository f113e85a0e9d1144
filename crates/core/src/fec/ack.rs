//! ACK reaction and loss signaling.
//!
//! Incoming ACKs may carry FEC flags: the peer telling us it recovered data
//! (we owe a congestion response plus a CWR echo), that it failed to recover
//! (we should mark the asserted range lost and retransmit early), or echoing
//! a recovery advertisement of ours. Outgoing ACKs carry our own pending
//! flags; the host transport's ACK builder calls [`build_outgoing`] to fetch
//! the option bytes.

use crate::fec::{wire, FecFlags, FecOption};
use crate::seq::{seq_gt, seq_lt, SeqNum, SeqRange};
use crate::transport::TransportContext;

/// What an incoming ACK's FEC flags amounted to, as reported to the host's
/// ACK processing (invoked before its SACK pass).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckReaction {
    /// Nothing for the caller to act on.
    None,
    /// The ACK carried a loss indication; the host should treat the ACK as
    /// it would one signaling loss (skip dubious fast-path shortcuts).
    LossIndicated,
}

/// Outgoing FEC option bytes for the host's ACK builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutgoingOption {
    buf: [u8; wire::FEC_OPT_LEN_LONG],
    len: usize,
}

impl OutgoingOption {
    fn short(flags: FecFlags) -> Self {
        let mut buf = [0u8; wire::FEC_OPT_LEN_LONG];
        buf[..wire::FEC_OPT_LEN_SHORT].copy_from_slice(&wire::encode_short(flags));
        Self {
            buf,
            len: wire::FEC_OPT_LEN_SHORT,
        }
    }

    fn long(flags: FecFlags, seq: SeqNum, len24: u32) -> Self {
        Self {
            buf: wire::encode_long(flags, seq, len24),
            len: wire::FEC_OPT_LEN_LONG,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// React to the FEC flags of one incoming ACK. `flags` is the connection's
/// pending-advertisement state; `ack_seq` the ACK's cumulative number.
pub(crate) fn process_incoming(
    flags: &mut FecFlags,
    ctx: &mut dyn TransportContext,
    opt: &FecOption,
    ack_seq: SeqNum,
) -> AckReaction {
    // A cumulative ACK past high_seq closes the current reduction episode
    // and re-arms the once-per-episode gate.
    if flags.contains(FecFlags::RECOVERY_CWR) && seq_gt(ack_seq, ctx.high_seq()) {
        flags.remove(FecFlags::RECOVERY_CWR);
    }

    let mut reaction = AckReaction::None;

    if opt.flags.contains(FecFlags::RECOVERY_CWR) {
        // The peer has reduced its window in response to our recovery
        // advertisement; stop advertising.
        flags.remove(FecFlags::RECOVERY_SUCCESSFUL);
        ctx.clear_ecn_cwr_demand();
    }

    if opt.flags.contains(FecFlags::RECOVERY_FAILED) && opt.lost_len > 0 {
        let lost = SeqRange::with_len(opt.lost_seq, opt.lost_len);
        let marked = mark_peer_asserted_loss(ctx, lost);
        tracing::debug!(
            lost_seq = opt.lost_seq,
            lost_len = opt.lost_len,
            marked,
            "peer asserted FEC loss range"
        );
        reaction = AckReaction::LossIndicated;
    }

    if opt.flags.contains(FecFlags::RECOVERY_SUCCESSFUL) {
        apply_peer_recovery(flags, ctx, ack_seq);
        reaction = AckReaction::LossIndicated;
    }

    reaction
}

/// Mark every unacked retransmission-queue segment lying fully inside the
/// peer-asserted loss range as lost, unless already SACKed or marked.
/// Returns the number of newly marked segments.
fn mark_peer_asserted_loss(ctx: &mut dyn TransportContext, lost: SeqRange) -> usize {
    let mut newly_lost = 0usize;
    let mut earliest: Option<SeqNum> = None;

    for entry in ctx.write_queue_mut().iter_mut() {
        if !lost.contains_range(&entry.range) || entry.sacked || entry.lost {
            continue;
        }
        entry.lost = true;
        newly_lost += 1;
        earliest = Some(match earliest {
            Some(seq) if seq_lt(seq, entry.range.start) => seq,
            _ => entry.range.start,
        });
    }

    if let Some(seq) = earliest {
        ctx.update_retransmit_hint(seq);
        ctx.raise_retransmit_high(lost.end);
    }
    newly_lost
}

/// The peer recovered data we sent: reduce the congestion window, at most
/// once per loss episode. Returns whether a fresh reduction was taken.
fn apply_peer_recovery(
    flags: &mut FecFlags,
    ctx: &mut dyn TransportContext,
    ack_seq: SeqNum,
) -> bool {
    if !seq_gt(ack_seq, ctx.high_seq()) || flags.contains(FecFlags::RECOVERY_CWR) {
        return false;
    }
    if ctx.in_loss_recovery() {
        // An ongoing recovery phase already owns the window; just make sure
        // its reduction cannot be undone afterwards.
        ctx.disable_undo();
        return false;
    }

    let ssthresh = ctx.ssthresh();
    ctx.set_ssthresh(ssthresh);
    let cwnd = ctx.cwnd().min(ssthresh);
    ctx.set_cwnd(cwnd);
    let snd_nxt = ctx.snd_nxt();
    ctx.set_high_seq(snd_nxt);
    ctx.disable_undo();
    flags.insert(FecFlags::RECOVERY_CWR);
    tracing::debug!(cwnd, ssthresh, high_seq = snd_nxt, "cwnd reduced after peer FEC recovery");
    true
}

/// Produce the FEC option for the next outgoing ACK.
///
/// While a recovery failure is pending the long form carries the tail-loss
/// range `[rcv_nxt, rcv_nxt + lost_len)` and the pending failure is
/// consumed. Otherwise the short form advertises whatever flags are set
/// (RECOVERY_SUCCESSFUL until echoed, RECOVERY_CWR while the episode is
/// open).
pub(crate) fn build_outgoing(
    flags: &mut FecFlags,
    lost_len: &mut u32,
    rcv_nxt: SeqNum,
) -> OutgoingOption {
    if flags.contains(FecFlags::RECOVERY_FAILED) {
        let option = OutgoingOption::long(*flags, rcv_nxt, *lost_len);
        flags.remove(FecFlags::RECOVERY_FAILED);
        *lost_len = 0;
        return option;
    }
    OutgoingOption::short(*flags)
}
