//! Log entry, log header and checkpoint record codecs.

use crate::error::{TcblError, TcblResult};

/// Size of the log header at offset 0 of every log file.
/// checkpoint_seq (8) + newlen (8) = 16 bytes
pub const LOG_HEADER_SIZE: u64 = 16;

/// Size of the fixed part of a log entry, before the page payload.
/// offset (8) + newlen (8) + flag (8) = 24 bytes
pub const ENTRY_PREFIX_SIZE: usize = 24;

/// Size of the checkpoint coordinator record.
pub const CHECKPOINT_RECORD_SIZE: usize = 8;

/// Sequence number assumed when the coordinator file is empty.
pub const INITIAL_CHECKPOINT_SEQ: u64 = 1;

/// Role of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum EntryFlag {
    /// Plain page write inside a transaction.
    None = 0,
    /// Last page write of a transaction.
    Commit = 1,
    /// Marks a log that has been replayed into the data file and retired.
    Checkpoint = 2,
}

impl EntryFlag {
    /// Converts a raw flag word to a flag.
    pub fn from_u64(v: u64) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Commit),
            2 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts the flag to its raw word.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self as u64
    }
}

/// One transactional page write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Page-aligned byte offset in the logical file.
    pub offset: u64,
    /// Logical file length as of this write.
    pub newlen: u64,
    /// Entry role.
    pub flag: EntryFlag,
    /// Page contents, exactly one page long.
    pub data: Vec<u8>,
}

impl LogEntry {
    /// Creates a plain page write.
    #[must_use]
    pub fn write(offset: u64, newlen: u64, data: Vec<u8>) -> Self {
        Self {
            offset,
            newlen,
            flag: EntryFlag::None,
            data,
        }
    }

    /// Creates the zero-offset marker appended by a checkpoint.
    #[must_use]
    pub fn checkpoint_marker(page_size: usize) -> Self {
        Self {
            offset: 0,
            newlen: 0,
            flag: EntryFlag::Checkpoint,
            data: vec![0; page_size],
        }
    }

    /// Returns true if this entry ends a transaction.
    #[must_use]
    pub fn is_commit(&self) -> bool {
        self.flag == EntryFlag::Commit
    }

    /// Returns true if this entry marks a retired log.
    #[must_use]
    pub fn is_checkpoint(&self) -> bool {
        self.flag == EntryFlag::Checkpoint
    }

    /// Number of payload bytes a checkpoint copies into the data file.
    ///
    /// The last page of a file may be only partially inside it.
    #[must_use]
    pub fn applied_len(&self, page_size: usize) -> usize {
        let remaining = self.newlen.saturating_sub(self.offset);
        usize::try_from(remaining).map_or(page_size, |r| r.min(page_size))
    }
}

/// Header stored at offset 0 of a log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    /// Checkpoint generation this log belongs to.
    pub checkpoint_seq: u64,
    /// Logical file length when this log was started.
    pub newlen: u64,
}

impl LogHeader {
    /// Serializes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; LOG_HEADER_SIZE as usize] {
        let mut buf = [0u8; LOG_HEADER_SIZE as usize];
        buf[0..8].copy_from_slice(&self.checkpoint_seq.to_le_bytes());
        buf[8..16].copy_from_slice(&self.newlen.to_le_bytes());
        buf
    }

    /// Deserializes a header.
    pub fn decode(buf: &[u8]) -> TcblResult<Self> {
        if buf.len() != LOG_HEADER_SIZE as usize {
            return Err(TcblError::internal(format!(
                "log header is {} bytes, expected {LOG_HEADER_SIZE}",
                buf.len()
            )));
        }
        Ok(Self {
            checkpoint_seq: read_u64(buf, 0),
            newlen: read_u64(buf, 8),
        })
    }
}

/// Contents of the checkpoint coordinator file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointRecord {
    /// Sequence of the most recently completed checkpoint.
    pub checkpoint_seq: u64,
}

impl CheckpointRecord {
    /// Serializes the record.
    #[must_use]
    pub fn encode(&self) -> [u8; CHECKPOINT_RECORD_SIZE] {
        self.checkpoint_seq.to_le_bytes()
    }

    /// Deserializes a record.
    pub fn decode(buf: &[u8]) -> TcblResult<Self> {
        if buf.len() != CHECKPOINT_RECORD_SIZE {
            return Err(TcblError::internal(format!(
                "checkpoint record is {} bytes, expected {CHECKPOINT_RECORD_SIZE}",
                buf.len()
            )));
        }
        Ok(Self {
            checkpoint_seq: read_u64(buf, 0),
        })
    }
}

/// Encodes and decodes fixed-size log entries for one page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryCodec {
    page_size: usize,
}

impl EntryCodec {
    /// Creates a codec for `page_size`-byte payloads.
    #[must_use]
    pub const fn new(page_size: usize) -> Self {
        Self { page_size }
    }

    /// Returns the payload size.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the encoded size of one entry.
    #[must_use]
    pub const fn entry_size(&self) -> usize {
        ENTRY_PREFIX_SIZE + self.page_size
    }

    /// Returns the encoded size of one entry as a file offset delta.
    #[must_use]
    pub const fn entry_len(&self) -> u64 {
        self.entry_size() as u64
    }

    /// Serializes `entry` into `buf`, which must be `entry_size()` long.
    ///
    /// A short payload is zero-padded to the page size.
    pub fn encode_into(&self, entry: &LogEntry, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&entry.offset.to_le_bytes());
        buf[8..16].copy_from_slice(&entry.newlen.to_le_bytes());
        buf[16..24].copy_from_slice(&entry.flag.as_u64().to_le_bytes());
        let payload = &mut buf[ENTRY_PREFIX_SIZE..];
        let n = entry.data.len().min(self.page_size);
        payload[..n].copy_from_slice(&entry.data[..n]);
        payload[n..].fill(0);
    }

    /// Serializes `entry` into a new buffer.
    #[must_use]
    pub fn encode(&self, entry: &LogEntry) -> Vec<u8> {
        let mut buf = vec![0u8; self.entry_size()];
        self.encode_into(entry, &mut buf);
        buf
    }

    /// Deserializes one entry.
    pub fn decode(&self, buf: &[u8]) -> TcblResult<LogEntry> {
        if buf.len() != self.entry_size() {
            return Err(TcblError::internal(format!(
                "log entry is {} bytes, expected {}",
                buf.len(),
                self.entry_size()
            )));
        }
        let raw_flag = read_u64(buf, 16);
        let flag = EntryFlag::from_u64(raw_flag)
            .ok_or_else(|| TcblError::internal(format!("unknown log entry flag {raw_flag}")))?;
        Ok(LogEntry {
            offset: read_u64(buf, 0),
            newlen: read_u64(buf, 8),
            flag,
            data: buf[ENTRY_PREFIX_SIZE..].to_vec(),
        })
    }
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_size_includes_prefix() {
        let codec = EntryCodec::new(64);
        assert_eq!(codec.entry_size(), 88);
        assert_eq!(codec.entry_len(), 88);
    }

    #[test]
    fn entry_roundtrip_is_byte_exact() {
        let codec = EntryCodec::new(64);
        let entry = LogEntry {
            offset: 128,
            newlen: 200,
            flag: EntryFlag::Commit,
            data: (0..64).collect(),
        };
        let bytes = codec.encode(&entry);
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(codec.encode(&decoded), bytes);
    }

    #[test]
    fn entry_layout_is_little_endian() {
        let codec = EntryCodec::new(64);
        let bytes = codec.encode(&LogEntry::write(0x0102, 0x0304, vec![0xAB; 64]));
        assert_eq!(&bytes[0..8], &[0x02, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&bytes[8..16], &[0x04, 0x03, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&bytes[16..24], &[0; 8]);
        assert!(bytes[24..].iter().all(|b| *b == 0xAB));
    }

    #[test]
    fn short_payload_is_zero_padded() {
        let codec = EntryCodec::new(64);
        let bytes = codec.encode(&LogEntry::write(0, 3, vec![1, 2, 3]));
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(&decoded.data[..3], &[1, 2, 3]);
        assert!(decoded.data[3..].iter().all(|b| *b == 0));
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let codec = EntryCodec::new(64);
        let mut bytes = codec.encode(&LogEntry::write(0, 64, vec![0; 64]));
        bytes[16] = 9;
        assert!(matches!(
            codec.decode(&bytes),
            Err(TcblError::InternalError { .. })
        ));
    }

    #[test]
    fn wrong_length_is_rejected() {
        let codec = EntryCodec::new(64);
        assert!(codec.decode(&[0u8; 10]).is_err());
        assert!(LogHeader::decode(&[0u8; 15]).is_err());
        assert!(CheckpointRecord::decode(&[0u8; 9]).is_err());
    }

    #[test]
    fn header_and_checkpoint_record_roundtrip() {
        let header = LogHeader {
            checkpoint_seq: 7,
            newlen: 640,
        };
        assert_eq!(LogHeader::decode(&header.encode()).unwrap(), header);

        let record = CheckpointRecord { checkpoint_seq: 7 };
        assert_eq!(CheckpointRecord::decode(&record.encode()).unwrap(), record);
    }

    #[test]
    fn checkpoint_marker_shape() {
        let marker = LogEntry::checkpoint_marker(64);
        assert!(marker.is_checkpoint());
        assert!(!marker.is_commit());
        assert_eq!(marker.offset, 0);
        assert_eq!(marker.data.len(), 64);
    }

    #[test]
    fn applied_len_clamps_to_logical_end() {
        let full = LogEntry::write(64, 256, vec![0; 64]);
        assert_eq!(full.applied_len(64), 64);

        let partial = LogEntry::write(192, 200, vec![0; 64]);
        assert_eq!(partial.applied_len(64), 8);

        let past_end = LogEntry::write(128, 64, vec![0; 64]);
        assert_eq!(past_end.applied_len(64), 0);
    }

    #[test]
    fn flag_words() {
        for flag in [EntryFlag::None, EntryFlag::Commit, EntryFlag::Checkpoint] {
            assert_eq!(EntryFlag::from_u64(flag.as_u64()), Some(flag));
        }
        assert_eq!(EntryFlag::from_u64(3), None);
    }
}
