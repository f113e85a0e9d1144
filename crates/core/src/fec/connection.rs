//! Per-connection FEC state and entry points.
//!
//! One [`ConnectionFec`] lives inside each connection that negotiated FEC
//! during its handshake. The host transport calls into it at four points of
//! its input path: when an in-order data segment is delivered (retention),
//! when a segment carries the ENCODED flag (decode), when an ACK carries FEC
//! flags (congestion reaction), and when building an outgoing ACK (flag
//! advertisement). All calls run under the connection's own serialization;
//! nothing here blocks.

use crate::fec::ack::{self, AckReaction, OutgoingOption};
use crate::fec::decode::{decode, DecodeOutcome};
use crate::fec::reference_window::ReferenceWindow;
use crate::fec::synthesize::synthesize;
use crate::fec::{wire, CodingType, DecodeStatus, FecConfig, FecError, FecFlags};
use crate::segment::Segment;
use crate::seq::{seq_leq, SeqNum};
use crate::transport::TransportContext;

/// Counters exposed for telemetry.
#[derive(Debug, Clone, Copy, Default)]
pub struct FecStats {
    /// Parity segments handed to the decode engine.
    pub parity_received: u64,
    /// Decodes that found nothing missing.
    pub no_loss: u64,
    /// Synthetic segments delivered to the in-order path.
    pub recovered_segments: u64,
    /// Decode episodes that ended unrecovered.
    pub recovery_failures: u64,
    /// Segments dropped for protocol violations.
    pub dropped_segments: u64,
    /// Congestion-window reductions taken on peer recovery advertisements.
    pub cwnd_reductions: u64,
}

/// How the host should proceed with a segment it offered to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentDisposition {
    /// Not a parity segment; route it through the normal receive path.
    PassThrough,
    /// The engine consumed the segment as parity.
    Consumed(DecodeStatus),
    /// Protocol violation; discard the segment.
    Dropped,
}

pub struct ConnectionFec {
    coding: CodingType,
    /// Pending outbound advertisement and episode bookkeeping bits.
    flags: FecFlags,
    window: ReferenceWindow,
    /// Tail-loss byte count for the next RECOVERY_FAILED advertisement.
    lost_len: u32,
    consecutive_alloc_failures: u8,
    option_violation_warned: bool,
    config: FecConfig,
    stats: FecStats,
}

impl ConnectionFec {
    pub fn new(coding: CodingType) -> Self {
        Self::with_config(coding, FecConfig::default())
    }

    pub fn with_config(coding: CodingType, config: FecConfig) -> Self {
        Self {
            coding,
            flags: FecFlags::empty(),
            window: ReferenceWindow::new(config.rcv_queue_limit),
            lost_len: 0,
            consecutive_alloc_failures: 0,
            option_violation_warned: false,
            config,
            stats: FecStats::default(),
        }
    }

    /// State for a connection that did not negotiate FEC.
    pub fn disabled() -> Self {
        Self::new(CodingType::None)
    }

    pub fn is_enabled(&self) -> bool {
        self.coding != CodingType::None
    }

    pub fn coding(&self) -> CodingType {
        self.coding
    }

    pub fn stats(&self) -> &FecStats {
        &self.stats
    }

    /// Bytes currently held by the reference window.
    pub fn retained_bytes(&self) -> usize {
        self.window.bytes()
    }

    /// Adopt the coding scheme negotiated during connection establishment.
    pub fn enable(&mut self, coding: CodingType) {
        if coding == CodingType::None {
            self.disable();
            return;
        }
        self.coding = coding;
        self.window.purge();
    }

    /// Tear FEC down on this connection and release every retained
    /// reference. Safe to call at any serialization point.
    pub fn disable(&mut self) {
        if self.is_enabled() {
            tracing::debug!(retained = self.window.bytes(), "disabling FEC");
        }
        self.coding = CodingType::None;
        self.window.purge();
        self.flags = FecFlags::empty();
        self.lost_len = 0;
    }

    /// State for a connection accepted from a listening socket: the child
    /// inherits the listener's coding type with a fresh window.
    pub fn inherit(parent: &ConnectionFec) -> Self {
        Self::with_config(parent.coding, parent.config.clone())
    }

    /// Called once when the accepted connection enters its established
    /// state: anchor `high_seq` so that the first peer recovery triggers
    /// exactly one window reduction instead of being treated as a
    /// duplicate.
    pub fn on_accept(&mut self, ctx: &mut dyn TransportContext) {
        let snd_nxt = ctx.snd_nxt();
        ctx.set_high_seq(snd_nxt);
    }

    /// The transport is pruning receive buffers under memory pressure;
    /// holding FEC references would defeat the prune.
    pub fn on_memory_pressure(&mut self) {
        if self.is_enabled() {
            tracing::debug!("receive-buffer prune, disabling FEC");
            self.disable();
        }
    }

    /// Called exactly once per in-order data segment at the moment it is
    /// delivered to the upper layer, in delivery order — including segments
    /// drained from the out-of-order queue, before `rcv_nxt` advances past
    /// them.
    pub fn on_in_order_delivery(&mut self, segment: &Segment) {
        if self.is_enabled() {
            self.window.retain(segment);
        }
    }

    /// Offer an incoming data-path segment to the engine.
    ///
    /// Segments without a FEC option pass through untouched (some senders
    /// omit the option on FIN ACKs; normal processing must resume for
    /// them). Segments with ENCODED set are consumed as parity.
    pub fn on_segment(
        &mut self,
        ctx: &mut dyn TransportContext,
        segment: &Segment,
    ) -> SegmentDisposition {
        let opt = match wire::parse(&segment.options) {
            Ok(Some(opt)) => opt,
            Ok(None) => return SegmentDisposition::PassThrough,
            Err(err) => {
                self.warn_option_violation(&err);
                self.stats.dropped_segments += 1;
                return SegmentDisposition::Dropped;
            }
        };
        if !opt.flags.contains(FecFlags::ENCODED) {
            return SegmentDisposition::PassThrough;
        }
        if !self.is_enabled() {
            // Parity for a scheme this connection never negotiated.
            self.warn_option_violation(&FecError::MalformedOption(
                "parity segment on a connection without FEC",
            ));
            self.stats.dropped_segments += 1;
            return SegmentDisposition::Dropped;
        }

        self.stats.parity_received += 1;
        let rcv_nxt = ctx.rcv_nxt();
        let enc_end = opt.enc_seq.wrapping_add(opt.enc_len);
        if seq_leq(enc_end, rcv_nxt) {
            // Every encoded byte is already in order; the implicit ACK from
            // normal receive processing is answer enough.
            self.stats.no_loss += 1;
            return SegmentDisposition::Consumed(DecodeStatus::NoLoss);
        }

        let outcome = decode(
            &self.window,
            ctx.ooo_segments(),
            self.coding,
            opt.enc_seq,
            opt.enc_len,
            &segment.payload,
        );

        match outcome {
            Ok(DecodeOutcome::NoLoss) => {
                self.consecutive_alloc_failures = 0;
                self.stats.no_loss += 1;
                SegmentDisposition::Consumed(DecodeStatus::NoLoss)
            }
            Ok(DecodeOutcome::Recovered(blocks)) => {
                self.consecutive_alloc_failures = 0;
                let mut synthetic = Vec::with_capacity(blocks.len());
                for block in &blocks {
                    match synthesize(segment, block, ctx.sack_blocks()) {
                        Ok(Some(seg)) => synthetic.push(seg),
                        Ok(None) => {}
                        Err(err) => {
                            self.warn_option_violation(&err);
                        }
                    }
                }
                if synthetic.is_empty() {
                    // Trimming against SACK consumed everything.
                    self.stats.no_loss += 1;
                    return SegmentDisposition::Consumed(DecodeStatus::NoLoss);
                }
                for seg in synthetic {
                    tracing::debug!(seq = seg.seq, len = seg.payload.len(), "delivering recovered segment");
                    self.stats.recovered_segments += 1;
                    ctx.deliver_recovered(seg);
                }
                self.flags.insert(FecFlags::RECOVERY_SUCCESSFUL);
                SegmentDisposition::Consumed(DecodeStatus::LossRecovered)
            }
            Ok(DecodeOutcome::Unrecovered) => {
                self.consecutive_alloc_failures = 0;
                self.stats.recovery_failures += 1;
                self.flags.insert(FecFlags::RECOVERY_FAILED);
                self.lost_len = enc_end.wrapping_sub(rcv_nxt);
                ctx.request_immediate_ack();
                SegmentDisposition::Consumed(DecodeStatus::LossUnrecovered)
            }
            Err(FecError::Allocation(bytes)) => {
                // Transient: give up on this episode without telling the
                // peer; its retransmission timers cover the loss. Repeated
                // failures mean the engine is fighting memory pressure, so
                // stop retaining references at all.
                tracing::warn!(bytes, "decode buffer allocation failed");
                self.consecutive_alloc_failures += 1;
                if self.consecutive_alloc_failures >= self.config.alloc_failure_disable_threshold {
                    self.disable();
                }
                SegmentDisposition::Consumed(DecodeStatus::LossUnrecovered)
            }
            Err(err) => {
                self.warn_option_violation(&err);
                self.stats.dropped_segments += 1;
                SegmentDisposition::Dropped
            }
        }
    }

    /// React to the FEC flags of an incoming ACK. The host invokes this from
    /// its ACK-processing path, before SACK processing.
    pub fn on_ack(&mut self, ctx: &mut dyn TransportContext, segment: &Segment) -> AckReaction {
        if !self.is_enabled() {
            return AckReaction::None;
        }
        let opt = match wire::parse(&segment.options) {
            Ok(Some(opt)) => opt,
            Ok(None) => return AckReaction::None,
            Err(err) => {
                self.warn_option_violation(&err);
                return AckReaction::None;
            }
        };
        let had_cwr = self.flags.contains(FecFlags::RECOVERY_CWR);
        let reaction = ack::process_incoming(&mut self.flags, ctx, &opt, segment.ack_seq);
        if !had_cwr && self.flags.contains(FecFlags::RECOVERY_CWR) {
            self.stats.cwnd_reductions += 1;
        }
        reaction
    }

    /// The FEC option for the next outgoing ACK, or `None` while FEC is
    /// disabled. A pending RECOVERY_FAILED advertisement is consumed here.
    pub fn build_outgoing_option(&mut self, rcv_nxt: SeqNum) -> Option<OutgoingOption> {
        if !self.is_enabled() {
            return None;
        }
        Some(ack::build_outgoing(&mut self.flags, &mut self.lost_len, rcv_nxt))
    }

    fn warn_option_violation(&mut self, err: &FecError) {
        if !self.option_violation_warned {
            self.option_violation_warned = true;
            tracing::warn!(%err, "FEC protocol violation (further occurrences suppressed)");
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_flags(&self) -> FecFlags {
        self.flags
    }
}
