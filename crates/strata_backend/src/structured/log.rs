//! Append-only store log: record framing, checksums, replay.
//!
//! Each store of a structured database is one log file of records:
//!
//! ```text
//! +-------+-------------+-----------+---------+
//! | magic | payload len | crc32     | payload |
//! | 4 B   | 4 B LE      | 4 B LE    | ...     |
//! +-------+-------------+-----------+---------+
//! ```
//!
//! The payload starts with a record type byte. Replay stops at the first
//! torn or checksum-corrupt record; the valid prefix length is reported so
//! the caller can truncate the tail before appending again.

use crate::error::BackendResult;
use std::fs::File;
use std::io::Write;

/// Magic bytes identifying a log record.
pub const LOG_MAGIC: [u8; 4] = *b"SLG1";

/// Size of the record envelope preceding the payload.
const ENVELOPE_LEN: usize = 12;

/// Record type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RecordType {
    Put = 1,
    Remove = 2,
}

impl RecordType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Put),
            2 => Some(Self::Remove),
            _ => None,
        }
    }
}

/// A stored payload: serialized text, or a binary frame when the store
/// accepts binary natively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Text-serialized value (see `strata_codec::serialize`).
    Text(String),
    /// Compact binary frame (see `strata_codec::encode_frame`).
    Frame(Vec<u8>),
}

/// One replayable log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Insert or replace the value under a key.
    Put {
        /// Entry key.
        key: String,
        /// Entry payload.
        payload: Payload,
    },
    /// Delete the entry under a key.
    Remove {
        /// Entry key.
        key: String,
    },
}

impl LogRecord {
    fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::Put { key, payload } => {
                buf.push(RecordType::Put as u8);
                let (flag, bytes): (u8, &[u8]) = match payload {
                    Payload::Text(s) => (0, s.as_bytes()),
                    Payload::Frame(b) => (1, b),
                };
                buf.push(flag);
                push_len_prefixed(&mut buf, key.as_bytes());
                push_len_prefixed(&mut buf, bytes);
            }
            Self::Remove { key } => {
                buf.push(RecordType::Remove as u8);
                push_len_prefixed(&mut buf, key.as_bytes());
            }
        }
        buf
    }

    fn decode_payload(payload: &[u8]) -> Option<Self> {
        let mut cursor = 0usize;
        let record_type = RecordType::from_byte(*payload.first()?)?;
        cursor += 1;

        match record_type {
            RecordType::Put => {
                let is_frame = *payload.get(cursor)? != 0;
                cursor += 1;
                let key = read_len_prefixed(payload, &mut cursor)?;
                let value = read_len_prefixed(payload, &mut cursor)?;
                let key = String::from_utf8(key).ok()?;
                let payload = if is_frame {
                    Payload::Frame(value)
                } else {
                    Payload::Text(String::from_utf8(value).ok()?)
                };
                Some(Self::Put { key, payload })
            }
            RecordType::Remove => {
                let key = String::from_utf8(read_len_prefixed(payload, &mut cursor)?).ok()?;
                Some(Self::Remove { key })
            }
        }
    }
}

fn push_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn read_len_prefixed(payload: &[u8], cursor: &mut usize) -> Option<Vec<u8>> {
    let len_bytes = payload.get(*cursor..*cursor + 4)?;
    let len = u32::from_le_bytes(len_bytes.try_into().ok()?) as usize;
    *cursor += 4;
    let data = payload.get(*cursor..*cursor + len)?;
    *cursor += len;
    Some(data.to_vec())
}

/// Appends a record to the log file and flushes it.
///
/// # Errors
///
/// Returns an error on I/O failure.
pub fn append_record(file: &mut File, record: &LogRecord) -> BackendResult<()> {
    let payload = record.encode_payload();
    let mut buf = Vec::with_capacity(ENVELOPE_LEN + payload.len());
    buf.extend_from_slice(&LOG_MAGIC);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&compute_crc32(&payload).to_le_bytes());
    buf.extend_from_slice(&payload);

    file.write_all(&buf)?;
    file.flush()?;
    Ok(())
}

/// Result of replaying a log file.
pub struct Replay {
    /// The decoded records, in write order.
    pub records: Vec<LogRecord>,
    /// Length of the valid prefix. Shorter than the file when the tail is
    /// torn or corrupt; the caller truncates before appending.
    pub valid_len: u64,
}

/// Replays every valid record from raw log bytes.
///
/// Stops at the first torn or corrupt record rather than failing: a
/// half-written tail from a crash must not take the store down.
#[must_use]
pub fn replay(data: &[u8]) -> Replay {
    let mut records = Vec::new();
    let mut offset = 0usize;

    loop {
        let Some(envelope) = data.get(offset..offset + ENVELOPE_LEN) else {
            break;
        };
        if envelope[..4] != LOG_MAGIC {
            break;
        }
        let payload_len = u32::from_le_bytes(envelope[4..8].try_into().unwrap_or_default()) as usize;
        let expected_crc = u32::from_le_bytes(envelope[8..12].try_into().unwrap_or_default());

        let Some(payload) = data.get(offset + ENVELOPE_LEN..offset + ENVELOPE_LEN + payload_len)
        else {
            break;
        };
        if compute_crc32(payload) != expected_crc {
            break;
        }
        let Some(record) = LogRecord::decode_payload(payload) else {
            break;
        };

        records.push(record);
        offset += ENVELOPE_LEN + payload_len;
    }

    Replay {
        records,
        valid_len: offset as u64,
    }
}

/// Computes the CRC32 checksum (IEEE polynomial) of the data.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        let idx = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[idx];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn write_records(records: &[LogRecord]) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        for record in records {
            append_record(&mut file, record).unwrap();
        }
        let mut data = Vec::new();
        std::fs::File::open(&path)
            .unwrap()
            .read_to_end(&mut data)
            .unwrap();
        data
    }

    #[test]
    fn crc32_known_value() {
        // Standard CRC32 check value.
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn replay_returns_records_in_order() {
        let records = vec![
            LogRecord::Put {
                key: "a".into(),
                payload: Payload::Text("1".into()),
            },
            LogRecord::Remove { key: "a".into() },
            LogRecord::Put {
                key: "b".into(),
                payload: Payload::Frame(vec![1, 2, 3]),
            },
        ];
        let data = write_records(&records);
        let replay = replay(&data);
        assert_eq!(replay.records, records);
        assert_eq!(replay.valid_len, data.len() as u64);
    }

    #[test]
    fn torn_tail_stops_replay() {
        let records = vec![
            LogRecord::Put {
                key: "a".into(),
                payload: Payload::Text("1".into()),
            },
            LogRecord::Put {
                key: "b".into(),
                payload: Payload::Text("2".into()),
            },
        ];
        let mut data = write_records(&records);
        let full_len = data.len();
        // Tear the last record in half.
        data.truncate(full_len - 3);

        let replay = replay(&data);
        assert_eq!(replay.records.len(), 1);
        assert!(replay.valid_len < data.len() as u64);
    }

    #[test]
    fn corrupt_checksum_stops_replay() {
        let records = vec![
            LogRecord::Put {
                key: "a".into(),
                payload: Payload::Text("1".into()),
            },
            LogRecord::Put {
                key: "b".into(),
                payload: Payload::Text("2".into()),
            },
        ];
        let mut data = write_records(&records);
        // Flip a byte in the second record's payload.
        let last = data.len() - 1;
        data[last] ^= 0xFF;

        let replay = replay(&data);
        assert_eq!(replay.records.len(), 1);
    }

    #[test]
    fn empty_log_replays_empty() {
        let replay = replay(&[]);
        assert!(replay.records.is_empty());
        assert_eq!(replay.valid_len, 0);
    }
}
