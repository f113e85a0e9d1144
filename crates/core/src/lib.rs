//! Receiver-side forward error correction for a reliable stream transport.
//!
//! The engine sits beside the host transport's input path: parity segments
//! divert into [`fec::ConnectionFec`], recovered data re-enters the normal
//! in-order receive routine, and recovery outcomes travel back to the sender
//! as flags on ordinary ACKs. See the `fec` module docs for the data flow.

pub mod fec;
pub mod segment;
pub mod seq;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use fec::{
    AckReaction, CodingType, ConnectionFec, DecodeStatus, FecConfig, FecError, FecFlags,
    FecOption, FecStats, OutgoingOption, SegmentDisposition, FEC_RCV_QUEUE_LIMIT,
};
pub use segment::{Segment, SegmentFlags};
pub use seq::{SeqNum, SeqRange};
pub use transport::{TransportContext, TxSegment};
