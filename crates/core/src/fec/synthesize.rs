//! Fabrication of synthetic recovered segments.
//!
//! A recovered block re-enters the transport through the normal
//! established-state receive path, dressed up as a segment that "arrived"
//! from the peer: headers are cloned from the parity segment (inheriting
//! option layout, addressing and timestamps), the FEC option is rewritten
//! from its long form to the short form, and the payload is replaced with
//! the reconstructed bytes.

use bytes::Bytes;

use crate::fec::decode::RecoveredBlock;
use crate::fec::{wire, FecError};
use crate::segment::Segment;
use crate::seq::{seq_geq, seq_leq, seq_lt, SeqRange};

/// Build the synthetic segment for one recovered block.
///
/// The block's tail is trimmed against the current selective-ACK ranges so
/// the peer is not flooded with duplicate SACKs for bytes it already knows
/// we hold. Returns `Ok(None)` when trimming consumes the entire block.
pub(crate) fn synthesize(
    parity: &Segment,
    block: &RecoveredBlock,
    sacks: &[SeqRange],
) -> Result<Option<Segment>, FecError> {
    let seq = block.seq;
    let mut end = seq.wrapping_add(block.bytes.len() as u32);

    // A SACK block covering [end - k, end) shaves k bytes off the tail.
    // Re-scan after each cut: another block may now cover the new tail.
    loop {
        let mut trimmed = false;
        for sack in sacks {
            if sack.is_empty() {
                continue;
            }
            if seq_lt(sack.start, end) && seq_geq(sack.end, end) && seq_lt(seq, end) {
                end = if seq_leq(sack.start, seq) {
                    seq
                } else {
                    sack.start
                };
                trimmed = true;
            }
        }
        if !trimmed {
            break;
        }
    }

    let rec_len = end.wrapping_sub(seq) as usize;
    if rec_len == 0 {
        tracing::debug!(seq, "recovered block fully covered by SACK, dropping");
        return Ok(None);
    }

    let mut options = parity.options.to_vec();
    wire::rewrite_long_to_short(&mut options)?;

    Ok(Some(Segment {
        seq,
        ack_seq: parity.ack_seq,
        flags: parity.flags,
        options: Bytes::from(options),
        payload: Bytes::copy_from_slice(&block.bytes[..rec_len]),
        // Derived from already-validated segments; the in-order path must
        // not checksum it again.
        checksum_verified: true,
    }))
}
