//! # Control Datagram Format
//!
//! One datagram per scored sample:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                 Record Length (u32, big-endian)               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                 UTF-8 record (Record Length bytes) ...        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The record is colon-separated:
//! `ts:score:score:fec_rec:lost:rssi:snr:antennas:penalty:fec_change[:code]`.
//! The score is written twice; receivers in the field expect both slots.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::scorer::ScoredOutput;

/// Size of the length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Fields in a record without a keyframe code.
const BASE_FIELDS: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram too short: {0} bytes")]
    Truncated(usize),
    #[error("length prefix {declared} does not match payload of {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("record is not valid UTF-8")]
    Utf8,
    #[error("unexpected field count {0}")]
    FieldCount(usize),
    #[error("field {index} ({value:?}) is not a number")]
    BadField { index: usize, value: String },
    #[error("score fields disagree: {0} vs {1}")]
    ScoreMismatch(i64, i64),
}

/// Render the colon-separated text record.
pub fn encode_record(out: &ScoredOutput) -> String {
    let mut record = format!(
        "{}:{}:{}:{}:{}:{}:{}:{}:{}:{}",
        out.timestamp,
        out.final_score,
        out.final_score,
        out.fec_rec_packets,
        out.lost_packets,
        out.best_rssi,
        out.best_snr,
        out.num_antennas,
        out.penalty,
        out.fec_change,
    );
    if let Some(code) = &out.keyframe_code {
        record.push(':');
        record.push_str(code);
    }
    record
}

/// Length-prefixed datagram ready for the socket.
pub fn encode_datagram(out: &ScoredOutput) -> Bytes {
    let record = encode_record(out);
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + record.len());
    buf.put_u32(record.len() as u32);
    buf.put_slice(record.as_bytes());
    buf.freeze()
}

/// Parse a datagram produced by [`encode_datagram`].
pub fn decode_datagram(mut data: &[u8]) -> Result<ScoredOutput, WireError> {
    if data.len() < LENGTH_PREFIX_LEN {
        return Err(WireError::Truncated(data.len()));
    }
    let declared = data.get_u32() as usize;
    if declared != data.len() {
        return Err(WireError::LengthMismatch {
            declared,
            actual: data.len(),
        });
    }
    let record = std::str::from_utf8(data).map_err(|_| WireError::Utf8)?;
    decode_record(record)
}

/// Parse the text record (without length prefix).
pub fn decode_record(record: &str) -> Result<ScoredOutput, WireError> {
    let fields: Vec<&str> = record.split(':').collect();
    if fields.len() != BASE_FIELDS && fields.len() != BASE_FIELDS + 1 {
        return Err(WireError::FieldCount(fields.len()));
    }

    let score = parse_field::<i64>(&fields, 1)?;
    let score_again = parse_field::<i64>(&fields, 2)?;
    if score != score_again {
        return Err(WireError::ScoreMismatch(score, score_again));
    }

    Ok(ScoredOutput {
        timestamp: parse_field(&fields, 0)?,
        final_score: score,
        fec_rec_packets: parse_field(&fields, 3)?,
        lost_packets: parse_field(&fields, 4)?,
        best_rssi: parse_field(&fields, 5)?,
        best_snr: parse_field(&fields, 6)?,
        num_antennas: parse_field(&fields, 7)?,
        penalty: parse_field(&fields, 8)?,
        fec_change: parse_field(&fields, 9)?,
        keyframe_code: fields.get(BASE_FIELDS).map(|c| c.to_string()),
    })
}

fn parse_field<T: std::str::FromStr>(fields: &[&str], index: usize) -> Result<T, WireError> {
    fields[index].parse().map_err(|_| WireError::BadField {
        index,
        value: fields[index].to_string(),
    })
}
