//! Binary layout of one persisted secret.
//!
//! ```text
//! +----------+--------------+-----+----------------------+
//! | id (32)  | reveal (15)  | len | IV || ciphertext     |
//! +----------+--------------+-----+----------------------+
//! ```
//!
//! Records are written back to back with no delimiters, so a shard can only
//! be walked sequentially from offset 0.

use std::io::{self, Read};

use chrono::{DateTime, Utc};

use super::error::{CodecError, Result, StoreError};
use super::model::{SecretId, SecretRecord, ID_LEN, MAX_CIPHERTEXT_LEN};

/// Width of the encoded reveal timestamp.
pub const TIME_LEN: usize = 15;

/// Width of the ciphertext length field.
pub const LEN_FIELD: usize = 1;

/// Fixed prefix of every record: id, timestamp, length byte.
pub const HEADER_LEN: usize = ID_LEN + TIME_LEN + LEN_FIELD;

const TIME_VERSION: u8 = 1;

/// Seconds between 0001-01-01T00:00:00Z and the Unix epoch.
const UNIX_TO_INTERNAL: i64 = 62_135_596_800;

/// Zone offset value meaning "UTC".
const UTC_OFFSET: i16 = -1;

/// Encode a UTC instant as `version | secs since year 1 (i64) | nanos (u32) | offset (i16)`.
pub fn encode_time(t: DateTime<Utc>) -> [u8; TIME_LEN] {
    let secs = t.timestamp() + UNIX_TO_INTERNAL;
    // chrono reports leap seconds as nanos >= 1e9.
    let nanos = t.timestamp_subsec_nanos().min(999_999_999);

    let mut buf = [0u8; TIME_LEN];
    buf[0] = TIME_VERSION;
    buf[1..9].copy_from_slice(&secs.to_be_bytes());
    buf[9..13].copy_from_slice(&nanos.to_be_bytes());
    buf[13..15].copy_from_slice(&UTC_OFFSET.to_be_bytes());
    buf
}

/// Decode the 15-byte timestamp. Non-UTC offsets are accepted and normalized.
pub fn decode_time(buf: &[u8; TIME_LEN]) -> std::result::Result<DateTime<Utc>, CodecError> {
    if buf[0] != TIME_VERSION {
        return Err(CodecError::Timestamp(format!(
            "unsupported version {}",
            buf[0]
        )));
    }

    let mut secs = [0u8; 8];
    secs.copy_from_slice(&buf[1..9]);
    let mut nanos = [0u8; 4];
    nanos.copy_from_slice(&buf[9..13]);

    let secs = i64::from_be_bytes(secs);
    let nanos = u32::from_be_bytes(nanos);
    if nanos >= 1_000_000_000 {
        return Err(CodecError::Timestamp(format!("nanoseconds out of range: {nanos}")));
    }

    secs.checked_sub(UNIX_TO_INTERNAL)
        .and_then(|unix| DateTime::from_timestamp(unix, nanos))
        .ok_or_else(|| CodecError::Timestamp(format!("seconds out of range: {secs}")))
}

/// Serialize a record into its on-disk bytes.
pub fn encode_record(record: &SecretRecord) -> std::result::Result<Vec<u8>, CodecError> {
    let ct_len = record.ciphertext.len();
    if ct_len > MAX_CIPHERTEXT_LEN {
        return Err(CodecError::Oversized(ct_len));
    }

    let mut out = Vec::with_capacity(HEADER_LEN + ct_len);
    out.extend_from_slice(record.id.as_bytes());
    out.extend_from_slice(&encode_time(record.reveal_at));
    out.push(ct_len as u8);
    out.extend_from_slice(&record.ciphertext);
    Ok(out)
}

/// Fixed-width prefix of a record. The timestamp stays raw until asked for,
/// so scans can skip non-matching records without decoding them.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub id: SecretId,
    reveal_at: [u8; TIME_LEN],
    pub ciphertext_len: u8,
}

impl RecordHeader {
    pub fn reveal_at(&self) -> std::result::Result<DateTime<Utc>, CodecError> {
        decode_time(&self.reveal_at)
    }

    /// Total on-disk size of the record this header starts.
    pub fn record_len(&self) -> u64 {
        (HEADER_LEN + self.ciphertext_len as usize) as u64
    }
}

/// Read one record header. A short read yields [`CodecError::Truncated`].
pub fn read_header<R: Read>(reader: &mut R) -> Result<RecordHeader> {
    let mut buf = [0u8; HEADER_LEN];
    read_full(reader, &mut buf)?;

    let mut id = [0u8; ID_LEN];
    id.copy_from_slice(&buf[..ID_LEN]);
    let mut reveal_at = [0u8; TIME_LEN];
    reveal_at.copy_from_slice(&buf[ID_LEN..ID_LEN + TIME_LEN]);

    Ok(RecordHeader {
        id: SecretId::from_bytes(id),
        reveal_at,
        ciphertext_len: buf[HEADER_LEN - 1],
    })
}

/// Read exactly `len` ciphertext bytes following a header.
pub fn read_body<R: Read>(reader: &mut R, len: u8) -> Result<Vec<u8>> {
    let mut body = vec![0u8; len as usize];
    read_full(reader, &mut body)?;
    Ok(body)
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => StoreError::Decode(CodecError::Truncated),
        _ => StoreError::Storage(e),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use chrono::{Duration, TimeZone};

    use super::*;

    fn record(ciphertext: Vec<u8>) -> SecretRecord {
        SecretRecord {
            id: SecretId::generate(),
            reveal_at: Utc.with_ymd_and_hms(2030, 6, 1, 12, 30, 0).unwrap()
                + Duration::nanoseconds(123_456_789),
            ciphertext,
        }
    }

    #[test]
    fn record_layout() {
        let rec = record(vec![7u8; 40]);
        let bytes = encode_record(&rec).unwrap();
        assert_eq!(bytes.len(), ID_LEN + TIME_LEN + LEN_FIELD + 40);
        assert_eq!(&bytes[..ID_LEN], rec.id.as_bytes());
        assert_eq!(bytes[HEADER_LEN - 1], 40);
        assert_eq!(&bytes[HEADER_LEN..], &[7u8; 40][..]);
    }

    #[test]
    fn header_and_body_decode() {
        let rec = record(vec![1, 2, 3, 4]);
        let bytes = encode_record(&rec).unwrap();
        let mut cur = Cursor::new(bytes);

        let header = read_header(&mut cur).unwrap();
        assert_eq!(header.id, rec.id);
        assert_eq!(header.reveal_at().unwrap(), rec.reveal_at);
        assert_eq!(header.record_len(), (HEADER_LEN + 4) as u64);

        let body = read_body(&mut cur, header.ciphertext_len).unwrap();
        assert_eq!(body, rec.ciphertext);
    }

    #[test]
    fn max_ciphertext_accepted_and_oversize_rejected() {
        assert!(encode_record(&record(vec![0u8; MAX_CIPHERTEXT_LEN])).is_ok());
        assert!(matches!(
            encode_record(&record(vec![0u8; MAX_CIPHERTEXT_LEN + 1])),
            Err(CodecError::Oversized(256))
        ));
    }

    #[test]
    fn short_header_is_truncated() {
        let mut cur = Cursor::new(vec![0u8; HEADER_LEN - 1]);
        assert!(matches!(
            read_header(&mut cur),
            Err(StoreError::Decode(CodecError::Truncated))
        ));
    }

    #[test]
    fn short_body_is_truncated() {
        let mut cur = Cursor::new(vec![0u8; 3]);
        assert!(matches!(
            read_body(&mut cur, 10),
            Err(StoreError::Decode(CodecError::Truncated))
        ));
    }

    #[test]
    fn time_layout() {
        let t = Utc.timestamp_opt(0, 5).unwrap();
        let buf = encode_time(t);
        assert_eq!(buf[0], 1);
        assert_eq!(&buf[1..9], &UNIX_TO_INTERNAL.to_be_bytes());
        assert_eq!(&buf[9..13], &5u32.to_be_bytes());
        assert_eq!(&buf[13..15], &[0xff, 0xff]);
        assert_eq!(decode_time(&buf).unwrap(), t);
    }

    #[test]
    fn time_with_zone_offset_is_normalized() {
        let t = Utc.with_ymd_and_hms(2031, 1, 2, 3, 4, 5).unwrap();
        let mut buf = encode_time(t);
        buf[13..15].copy_from_slice(&120i16.to_be_bytes());
        assert_eq!(decode_time(&buf).unwrap(), t);
    }

    #[test]
    fn bad_time_version_rejected() {
        let mut buf = encode_time(Utc::now());
        buf[0] = 2;
        assert!(matches!(decode_time(&buf), Err(CodecError::Timestamp(_))));
    }

    #[test]
    fn bad_nanos_rejected() {
        let mut buf = encode_time(Utc::now());
        buf[9..13].copy_from_slice(&1_000_000_000u32.to_be_bytes());
        assert!(matches!(decode_time(&buf), Err(CodecError::Timestamp(_))));
    }
}
