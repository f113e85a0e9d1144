//! Wire codec for the FEC transport option.
//!
//! The option rides in a TCP experimental option (kind 254) tagged with a
//! 16-bit magic. Two forms exist, both network byte order:
//!
//! ```text
//! short (5 bytes):  [kind=254][len=5][magic:16][flags:8]
//! long (12 bytes):  [kind=254][len=12][magic:16][flags:8][seq:32][len24:24]
//! ```
//!
//! The long form's trailing `seq`/`len24` pair is the encoded range
//! (`enc_seq`/`enc_len`) normally, or the asserted loss range
//! (`lost_seq`/`lost_len`) when RECOVERY_FAILED is set. Ordinary segments and
//! synthetic recovered segments carry the short form.

use crate::fec::{FecError, FecFlags, FecOption};
use crate::seq::SeqNum;

pub const TCPOPT_EOL: u8 = 0;
pub const TCPOPT_NOP: u8 = 1;
pub const TCPOPT_EXP: u8 = 254;

/// Experiment identifier distinguishing the FEC option from other users of
/// the experimental kind.
pub const FEC_MAGIC: u16 = 0xFEC0;

pub const FEC_OPT_LEN_SHORT: usize = 5;
pub const FEC_OPT_LEN_LONG: usize = 12;

/// Largest value representable in the 24-bit length field.
pub const MAX_LEN24: u32 = 0x00FF_FFFF;

/// Scan a raw option list for the FEC option.
///
/// Returns `Ok(None)` when no FEC option is present (the segment is routed
/// normally). Returns an error for a structurally broken option list or a
/// FEC option whose form does not match its flags; callers drop such
/// segments.
pub fn parse(options: &[u8]) -> Result<Option<FecOption>, FecError> {
    let mut idx = 0usize;
    while idx < options.len() {
        match options[idx] {
            TCPOPT_EOL => break,
            TCPOPT_NOP => {
                idx += 1;
            }
            kind => {
                if idx + 1 >= options.len() {
                    return Err(FecError::MalformedOption("option kind without length"));
                }
                let len = options[idx + 1] as usize;
                if len < 2 || idx + len > options.len() {
                    return Err(FecError::MalformedOption("option length out of bounds"));
                }
                if kind == TCPOPT_EXP && len >= 4 {
                    let magic = u16::from_be_bytes([options[idx + 2], options[idx + 3]]);
                    if magic == FEC_MAGIC {
                        return parse_body(&options[idx..idx + len]).map(Some);
                    }
                }
                idx += len;
            }
        }
    }
    Ok(None)
}

fn parse_body(opt: &[u8]) -> Result<FecOption, FecError> {
    let mut parsed = FecOption::default();
    match opt.len() {
        FEC_OPT_LEN_SHORT => {
            parsed.flags = FecFlags::from_bits(opt[4]);
        }
        FEC_OPT_LEN_LONG => {
            parsed.flags = FecFlags::from_bits(opt[4]);
            let seq = u32::from_be_bytes([opt[5], opt[6], opt[7], opt[8]]);
            let len = u32::from_be_bytes([0, opt[9], opt[10], opt[11]]);
            if parsed.flags.contains(FecFlags::RECOVERY_FAILED) {
                parsed.lost_seq = seq;
                parsed.lost_len = len;
            } else {
                parsed.enc_seq = seq;
                parsed.enc_len = len;
            }
        }
        _ => return Err(FecError::MalformedOption("unexpected FEC option length")),
    }
    if parsed.flags.contains(FecFlags::ENCODED) && parsed.enc_len == 0 {
        // ENCODED is meaningless without a valid encoded-range descriptor.
        return Err(FecError::MalformedOption("ENCODED without encoded range"));
    }
    Ok(parsed)
}

/// Build a short-form option carrying only flags.
pub fn encode_short(flags: FecFlags) -> [u8; FEC_OPT_LEN_SHORT] {
    let magic = FEC_MAGIC.to_be_bytes();
    [
        TCPOPT_EXP,
        FEC_OPT_LEN_SHORT as u8,
        magic[0],
        magic[1],
        flags.bits(),
    ]
}

/// Build a long-form option. `len24` is truncated to the 24-bit field.
pub fn encode_long(flags: FecFlags, seq: SeqNum, len24: u32) -> [u8; FEC_OPT_LEN_LONG] {
    let magic = FEC_MAGIC.to_be_bytes();
    let seq = seq.to_be_bytes();
    let len = (len24 & MAX_LEN24).to_be_bytes();
    [
        TCPOPT_EXP,
        FEC_OPT_LEN_LONG as u8,
        magic[0],
        magic[1],
        flags.bits(),
        seq[0],
        seq[1],
        seq[2],
        seq[3],
        len[1],
        len[2],
        len[3],
    ]
}

/// Rewrite a long-form FEC option to the short form in place.
///
/// Clears ENCODED, preserves the other flag bits, shrinks the declared
/// length to 5 and pads the seven freed bytes with NOPs so the overall
/// header length is unchanged. Used when fabricating a synthetic recovered
/// segment out of the parity segment's header.
pub fn rewrite_long_to_short(options: &mut [u8]) -> Result<(), FecError> {
    let mut idx = 0usize;
    while idx < options.len() {
        match options[idx] {
            TCPOPT_EOL => break,
            TCPOPT_NOP => {
                idx += 1;
            }
            kind => {
                if idx + 1 >= options.len() {
                    return Err(FecError::MalformedOption("option kind without length"));
                }
                let len = options[idx + 1] as usize;
                if len < 2 || idx + len > options.len() {
                    return Err(FecError::MalformedOption("option length out of bounds"));
                }
                if kind == TCPOPT_EXP && len >= 4 {
                    let magic = u16::from_be_bytes([options[idx + 2], options[idx + 3]]);
                    if magic == FEC_MAGIC {
                        if len != FEC_OPT_LEN_LONG {
                            return Err(FecError::MalformedOption(
                                "rewrite requires the long option form",
                            ));
                        }
                        options[idx + 1] = FEC_OPT_LEN_SHORT as u8;
                        let mut flags = FecFlags::from_bits(options[idx + 4]);
                        flags.remove(FecFlags::ENCODED);
                        options[idx + 4] = flags.bits();
                        for pad in &mut options[idx + FEC_OPT_LEN_SHORT..idx + FEC_OPT_LEN_LONG] {
                            *pad = TCPOPT_NOP;
                        }
                        return Ok(());
                    }
                }
                idx += len;
            }
        }
    }
    Err(FecError::MissingOption)
}
