//! XOR recovery kernel.
//!
//! A parity payload is the XOR of the MSS-sized blocks of its encoded range
//! `[enc_seq, enc_seq + enc_len)`, aligned to `enc_seq`. The parity payload
//! length defines the MSS for the episode. Under the interleaved scheme the
//! sender XORs only every other block, so consecutive encoded blocks sit one
//! block span apart on the wire.
//!
//! Decoding XORs every byte the receiver still holds — reference window
//! first, out-of-order queue after the first gap — into an accumulator at
//! the byte's offset within its block. What remains in the accumulator is
//! exactly the missing data, provided at most one MSS-equivalent of encoded
//! bytes is unaccounted for.

use crate::fec::reference_window::ReferenceWindow;
use crate::fec::{CodingType, FecError};
use crate::segment::{copy_range, Segment};
use crate::seq::{seq_geq, seq_gt, seq_lt, SeqNum};

/// A reconstructed run of stream bytes, ready for the synthesizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecoveredBlock {
    pub seq: SeqNum,
    pub bytes: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DecodeOutcome {
    /// Every encoded byte is already present; the parity is redundant.
    NoLoss,
    /// The missing bytes were reconstructed. One block for the contiguous
    /// scheme; the interleaved scheme may split the recovered MSS across two
    /// disjoint ranges separated by the skipped block.
    Recovered(Vec<RecoveredBlock>),
    /// More than one block's worth of encoded bytes is missing.
    Unrecovered,
}

pub(crate) fn decode(
    window: &ReferenceWindow,
    ooo: &[Segment],
    coding: CodingType,
    enc_seq: SeqNum,
    enc_len: u32,
    parity: &[u8],
) -> Result<DecodeOutcome, FecError> {
    let mss = parity.len();
    if mss == 0 {
        return Err(FecError::MalformedOption("empty parity payload"));
    }
    let skip = coding.block_skip();
    let span = mss * (skip + 1);
    let enc_end = enc_seq.wrapping_add(enc_len);

    // Working accumulator, seeded with the parity bytes. Fallible allocation:
    // the receive path may run under memory pressure and must degrade to
    // "unrecovered" rather than abort.
    let mut acc = Vec::new();
    acc.try_reserve_exact(mss)
        .map_err(|_| FecError::Allocation(mss))?;
    acc.extend_from_slice(parity);

    let mut fold = |seq: SeqNum, bytes: &[u8]| {
        let rel = seq.wrapping_sub(enc_seq) as usize;
        for (i, byte) in bytes.iter().enumerate() {
            let off = (rel + i) % span;
            if off < mss {
                acc[off] ^= byte;
            }
        }
    };

    // Walk the reference window block by block from the base of the encoded
    // range. A short read means the first missing byte has been found.
    let mut next = enc_seq;
    loop {
        if seq_geq(next, enc_end) {
            return Ok(DecodeOutcome::NoLoss);
        }
        let remaining = enc_end.wrapping_sub(next) as usize;
        let want = mss.min(remaining);
        let got = window.read_into(next, want, &mut fold);
        next = next.wrapping_add(got as u32);
        if got < want {
            break;
        }
        next = next.wrapping_add((mss * skip) as u32);
    }
    let gap_start = next;

    // The gap ends at the first byte the out-of-order queue can supply.
    let mut gap_end = enc_end;
    for seg in ooo {
        if seg.payload.is_empty() || seq_gt(seg.seq, enc_end) {
            continue;
        }
        if seq_gt(seg.data_end(), gap_start) {
            let first = if seq_lt(seg.seq, gap_start) {
                gap_start
            } else {
                seg.seq
            };
            if seq_lt(first, gap_end) {
                gap_end = first;
            }
            break;
        }
    }

    // Everything encoded past the gap must be supplied by the out-of-order
    // queue; a second gap makes the episode unrecoverable.
    let mut pos = gap_end;
    while seq_lt(pos, enc_end) {
        let rel = pos.wrapping_sub(enc_seq) as usize;
        let off = rel % span;
        if off >= mss {
            pos = pos.wrapping_add((span - off) as u32);
            continue;
        }
        let remaining = enc_end.wrapping_sub(pos) as usize;
        let want = (mss - off).min(remaining);
        let got = copy_range(ooo.iter(), pos, want, &mut fold);
        if got < want {
            tracing::debug!(
                gap_start,
                second_gap_at = pos.wrapping_add(got as u32),
                "parity decode found a second gap"
            );
            return Ok(DecodeOutcome::Unrecovered);
        }
        pos = pos.wrapping_add(want as u32);
    }

    // Carve the gap into its encoded sub-ranges. Each stays within one
    // block, so each maps to a disjoint accumulator slice.
    let mut missing: Vec<(SeqNum, usize, usize)> = Vec::new();
    let mut missing_total = 0usize;
    let mut pos = gap_start;
    while seq_lt(pos, gap_end) {
        let rel = pos.wrapping_sub(enc_seq) as usize;
        let off = rel % span;
        if off >= mss {
            pos = pos.wrapping_add((span - off) as u32);
            continue;
        }
        let block_left = mss - off;
        let gap_left = gap_end.wrapping_sub(pos) as usize;
        let len = block_left.min(gap_left);
        missing_total += len;
        if missing_total > mss || missing.len() == 2 {
            tracing::debug!(enc_seq, enc_len, "more than one block missing");
            return Ok(DecodeOutcome::Unrecovered);
        }
        missing.push((pos, len, off));
        pos = pos.wrapping_add(len as u32);
    }

    if missing.is_empty() {
        // The gap covered only skipped (unencoded) bytes.
        return Ok(DecodeOutcome::NoLoss);
    }

    let mut blocks: Vec<RecoveredBlock> = Vec::new();
    for (seq, len, off) in missing {
        match blocks.last_mut() {
            Some(prev) if prev.seq.wrapping_add(prev.bytes.len() as u32) == seq => {
                prev.bytes.extend_from_slice(&acc[off..off + len]);
            }
            _ => blocks.push(RecoveredBlock {
                seq,
                bytes: acc[off..off + len].to_vec(),
            }),
        }
    }
    Ok(DecodeOutcome::Recovered(blocks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentFlags;
    use crate::testing::{seg, xor_parity};
    use bytes::Bytes;

    fn window_with(segments: &[Segment]) -> ReferenceWindow {
        let mut window = ReferenceWindow::new(64 * 1024);
        for segment in segments {
            window.retain(segment);
        }
        window
    }

    #[test]
    fn no_loss_over_two_segments() {
        // MSS = 4, parity over [0, 8).
        let s1 = seg(0, b"abcd");
        let s2 = seg(4, b"efgh");
        let parity = xor_parity(&[&s1, &s2], 0, 4, 0);
        assert_eq!(parity, b"\x04\x04\x04\x0c");

        let window = window_with(&[s1, s2]);
        let outcome = decode(&window, &[], CodingType::XorAll, 0, 8, &parity).unwrap();
        assert_eq!(outcome, DecodeOutcome::NoLoss);
    }

    #[test]
    fn recovers_single_missing_block() {
        let s1 = seg(0, b"abcd");
        let s2 = seg(4, b"efgh");
        let parity = xor_parity(&[&s1, &s2], 0, 4, 0);

        let window = window_with(&[s1]);
        let outcome = decode(&window, &[], CodingType::XorAll, 0, 8, &parity).unwrap();
        assert_eq!(
            outcome,
            DecodeOutcome::Recovered(vec![RecoveredBlock {
                seq: 4,
                bytes: b"efgh".to_vec(),
            }])
        );
    }

    #[test]
    fn recovers_interleaved_block() {
        // enc covers the odd blocks [0, 4) and [8, 12); [4, 8) is skipped.
        let s1 = seg(0, b"abcd");
        let s3 = seg(8, b"ijkl");
        let parity = xor_parity(&[&s1, &s3], 0, 4, 1);

        // S1 and the skipped S2 were delivered in order; S3 is lost.
        let window = window_with(&[s1, seg(4, b"efgh")]);
        let outcome = decode(&window, &[], CodingType::XorSkip1, 0, 12, &parity).unwrap();
        assert_eq!(
            outcome,
            DecodeOutcome::Recovered(vec![RecoveredBlock {
                seq: 8,
                bytes: b"ijkl".to_vec(),
            }])
        );
    }

    #[test]
    fn two_missing_blocks_fail() {
        let s1 = seg(0, b"abcd");
        let s2 = seg(4, b"efgh");
        let s3 = seg(8, b"ijkl");
        let parity = xor_parity(&[&s1, &s2, &s3], 0, 4, 0);

        let window = window_with(&[s1]);
        let outcome = decode(&window, &[], CodingType::XorAll, 0, 12, &parity).unwrap();
        assert_eq!(outcome, DecodeOutcome::Unrecovered);
    }

    #[test]
    fn head_loss_filled_from_ooo_queue() {
        // S1 lost, S2 arrived out of order: parity + S2 rebuild S1.
        let s1 = seg(0, b"abcd");
        let s2 = seg(4, b"efgh");
        let parity = xor_parity(&[&s1, &s2], 0, 4, 0);

        let window = ReferenceWindow::new(64 * 1024);
        let outcome = decode(&window, &[s2], CodingType::XorAll, 0, 8, &parity).unwrap();
        assert_eq!(
            outcome,
            DecodeOutcome::Recovered(vec![RecoveredBlock {
                seq: 0,
                bytes: b"abcd".to_vec(),
            }])
        );
    }

    #[test]
    fn middle_loss_with_ooo_tail() {
        // Three blocks; the middle one is lost, the tail sits in the OOO queue.
        let s1 = seg(0, b"abcd");
        let s2 = seg(4, b"efgh");
        let s3 = seg(8, b"ijkl");
        let parity = xor_parity(&[&s1, &s2, &s3], 0, 4, 0);

        let window = window_with(&[s1]);
        let outcome = decode(&window, &[s3], CodingType::XorAll, 0, 12, &parity).unwrap();
        assert_eq!(
            outcome,
            DecodeOutcome::Recovered(vec![RecoveredBlock {
                seq: 4,
                bytes: b"efgh".to_vec(),
            }])
        );
    }

    #[test]
    fn interleaved_straddle_recovers_two_ranges() {
        // Encoded blocks [0,4), [8,12), [16,20); skip blocks [4,8), [12,16).
        // Delivered in order through byte 10; wire bytes [10, 18) lost;
        // [18, 20) arrived out of order. The missing encoded bytes are the
        // tail of block 1 ([10,12)) and the head of block 2 ([16,18)).
        let b0 = seg(0, b"aabb");
        let b1 = seg(8, b"ccdd");
        let b2 = seg(16, b"eeff");
        let parity = xor_parity(&[&b0, &b1, &b2], 0, 4, 1);

        let window = window_with(&[b0, seg(4, b"ssss"), seg(8, b"cc")]);
        let ooo = [seg(18, b"ff")];
        let outcome = decode(&window, &ooo, CodingType::XorSkip1, 0, 20, &parity).unwrap();
        assert_eq!(
            outcome,
            DecodeOutcome::Recovered(vec![
                RecoveredBlock {
                    seq: 10,
                    bytes: b"dd".to_vec(),
                },
                RecoveredBlock {
                    seq: 16,
                    bytes: b"ee".to_vec(),
                },
            ])
        );
    }

    #[test]
    fn final_block_may_be_short() {
        // enc_len = 6 with MSS 4: second block is 2 bytes.
        let s1 = seg(0, b"abcd");
        let s2 = seg(4, b"ef");
        let parity = xor_parity(&[&s1, &s2], 0, 4, 0);

        let window = window_with(&[s1]);
        let outcome = decode(&window, &[], CodingType::XorAll, 0, 6, &parity).unwrap();
        assert_eq!(
            outcome,
            DecodeOutcome::Recovered(vec![RecoveredBlock {
                seq: 4,
                bytes: b"ef".to_vec(),
            }])
        );
    }

    #[test]
    fn rst_in_window_aborts_like_a_gap() {
        let s1 = seg(0, b"abcd");
        let mut s2 = seg(4, b"efgh");
        s2.flags.insert(SegmentFlags::RST);
        let s3 = seg(8, b"ijkl");
        let parity = xor_parity(&[&s1, &seg(4, b"efgh"), &s3], 0, 4, 0);

        // The RST segment terminates the walk, leaving two blocks unread.
        let window = window_with(&[s1, s2, s3]);
        let outcome = decode(&window, &[], CodingType::XorAll, 0, 12, &parity).unwrap();
        assert_eq!(outcome, DecodeOutcome::Unrecovered);
    }

    #[test]
    fn empty_parity_is_malformed() {
        let window = ReferenceWindow::new(1024);
        assert!(matches!(
            decode(&window, &[], CodingType::XorAll, 0, 8, &[]),
            Err(FecError::MalformedOption(_))
        ));
    }

    #[test]
    fn randomized_single_loss_oracle() {
        use rand::{rngs::StdRng, Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(0xFEC);
        let mss = 12usize;
        for lost in 0..5usize {
            let segments: Vec<Segment> = (0..5)
                .map(|i| {
                    let payload: Vec<u8> = (0..mss).map(|_| rng.gen()).collect();
                    Segment {
                        payload: Bytes::from(payload),
                        ..seg((i * mss) as u32, b"")
                    }
                })
                .collect();
            let refs: Vec<&Segment> = segments.iter().collect();
            let parity = xor_parity(&refs, 0, mss, 0);

            let window = window_with(&segments[..lost]);
            let ooo: Vec<Segment> = segments[lost + 1..].to_vec();
            let outcome = decode(
                &window,
                &ooo,
                CodingType::XorAll,
                0,
                (5 * mss) as u32,
                &parity,
            )
            .unwrap();
            assert_eq!(
                outcome,
                DecodeOutcome::Recovered(vec![RecoveredBlock {
                    seq: (lost * mss) as u32,
                    bytes: segments[lost].payload.to_vec(),
                }]),
                "lost block {lost}"
            );
        }
    }
}
