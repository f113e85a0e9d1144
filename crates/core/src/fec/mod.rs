//! Receiver-side forward error correction.
//!
//! The sender occasionally transmits a parity segment whose payload is the
//! XOR of several recent data segments. When a data segment is lost, this
//! module reconstructs the missing bytes from the parity plus the surviving
//! segments, avoiding a round-trip retransmission:
//!
//! ```text
//! incoming segment -> option decode -> [ENCODED] decode engine
//!        -> (reference window ∪ out-of-order queue) -> recovered block
//!        -> synthesizer -> in-order receive path -> ACK
//! ```
//!
//! The engine is a sidecar to the host transport's input path; see
//! [`crate::transport::TransportContext`] for the boundary.

pub(crate) mod ack;
pub mod connection;
pub(crate) mod decode;
pub(crate) mod reference_window;
pub(crate) mod synthesize;
pub mod wire;

pub use ack::{AckReaction, OutgoingOption};
pub use connection::{ConnectionFec, FecStats, SegmentDisposition};

use crate::seq::SeqNum;

/// Soft byte limit on the reference window of retained delivered segments.
pub const FEC_RCV_QUEUE_LIMIT: usize = 16 * 1024;

/// Coding scheme negotiated for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodingType {
    /// FEC disabled.
    #[default]
    None,
    /// Parity covers every MSS block of the encoded range.
    XorAll,
    /// Parity covers every other MSS block, skipping one between each.
    XorSkip1,
}

impl CodingType {
    /// Unencoded MSS blocks between consecutive encoded blocks.
    pub fn block_skip(&self) -> usize {
        match self {
            CodingType::None | CodingType::XorAll => 0,
            CodingType::XorSkip1 => 1,
        }
    }

    /// Map a negotiated handshake value. Unknown encodings are rejected so
    /// the connection falls back to plain operation.
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(CodingType::None),
            1 => Some(CodingType::XorAll),
            2 => Some(CodingType::XorSkip1),
            _ => None,
        }
    }
}

/// FEC option flag bits (8-bit wire field, also used as per-connection
/// pending-advertisement state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FecFlags(u8);

impl FecFlags {
    /// The segment's payload is parity over the encoded range.
    pub const ENCODED: FecFlags = FecFlags(0x01);
    /// Sender of this ACK recovered data via FEC; peer should reduce cwnd.
    pub const RECOVERY_SUCCESSFUL: FecFlags = FecFlags(0x02);
    /// Echo of RECOVERY_SUCCESSFUL: "I have reduced cwnd".
    pub const RECOVERY_CWR: FecFlags = FecFlags(0x04);
    /// Sender could not recover; a loss range follows.
    pub const RECOVERY_FAILED: FecFlags = FecFlags(0x08);

    pub fn empty() -> Self {
        FecFlags(0)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        FecFlags(bits)
    }

    pub fn contains(&self, other: FecFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: FecFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: FecFlags) {
        self.0 &= !other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for FecFlags {
    type Output = FecFlags;

    fn bitor(self, rhs: FecFlags) -> FecFlags {
        FecFlags(self.0 | rhs.0)
    }
}

/// Parsed FEC option of one incoming segment. Lives only while that segment
/// is being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FecOption {
    pub flags: FecFlags,
    /// Base of the encoded range (long form with ENCODED).
    pub enc_seq: SeqNum,
    /// Length of the encoded range in bytes.
    pub enc_len: u32,
    /// Sender-asserted loss range (long form with RECOVERY_FAILED).
    pub lost_seq: SeqNum,
    pub lost_len: u32,
}

/// Outcome of processing one parity segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Every encoded byte was already accounted for; nothing to do.
    NoLoss,
    /// A missing block was reconstructed and handed to the in-order path.
    LossRecovered,
    /// More than one block is missing; the peer is told via RECOVERY_FAILED.
    LossUnrecovered,
}

/// Engine configuration. Defaults match the protocol constants.
#[derive(Debug, Clone)]
pub struct FecConfig {
    /// Soft byte limit for the reference window.
    pub rcv_queue_limit: usize,
    /// Consecutive allocation failures tolerated before FEC is disabled on
    /// the connection.
    pub alloc_failure_disable_threshold: u8,
}

impl Default for FecConfig {
    fn default() -> Self {
        Self {
            rcv_queue_limit: FEC_RCV_QUEUE_LIMIT,
            alloc_failure_disable_threshold: 2,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FecError {
    #[error("failed to allocate decode working buffer of {0} bytes")]
    Allocation(usize),

    #[error("malformed FEC option: {0}")]
    MalformedOption(&'static str),

    #[error("segment options carry no FEC option where one is required")]
    MissingOption,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coding_type_from_wire() {
        assert_eq!(CodingType::from_wire(0), Some(CodingType::None));
        assert_eq!(CodingType::from_wire(1), Some(CodingType::XorAll));
        assert_eq!(CodingType::from_wire(2), Some(CodingType::XorSkip1));
        assert_eq!(CodingType::from_wire(3), None);
    }

    #[test]
    fn flag_set_operations() {
        let mut flags = FecFlags::empty();
        assert!(flags.is_empty());
        flags.insert(FecFlags::ENCODED | FecFlags::RECOVERY_CWR);
        assert!(flags.contains(FecFlags::ENCODED));
        assert!(flags.contains(FecFlags::RECOVERY_CWR));
        assert!(!flags.contains(FecFlags::RECOVERY_FAILED));
        flags.remove(FecFlags::ENCODED);
        assert!(!flags.contains(FecFlags::ENCODED));
        assert_eq!(flags.bits(), FecFlags::RECOVERY_CWR.bits());
    }
}
