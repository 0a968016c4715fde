use xxhash_rust::xxh3::Xxh3;

use crate::error::{CtfError, Result};
use crate::schema::StoreMode;

/// Magic bytes opening every CTF buffer.
pub const MAGIC: &[u8; 8] = b"CTFBLK\r\n";

/// Buffer format version written by this crate and the only one it reads.
pub const FORMAT_VERSION: u16 = 1;

/// Fixed size of the CTF header in bytes.
///   magic[8] + version:u16 + flags:u16 + column_count:u16 + group_count:u16
///   + schema_fingerprint:u64 + dictionary_id:u64 + payload_len:u64
///   + layout_checksum:u64
///   = 8 + 2 + 2 + 2 + 2 + 8 + 8 + 8 + 8 = 48
pub const HEADER_SIZE: usize = 48;

/// Offset of the layout checksum inside the header.
pub const LAYOUT_CHECKSUM_AT: usize = 40;

/// Size of each directory entry in bytes.
///   offset:u64 + meta_len:u32 + payload_len:u32 + element_count:u32
///   + mode:u8 + flags:u8 + reserved[2] + checksum:u64 + reserved[8]
///   = 8 + 4 + 4 + 4 + 1 + 1 + 2 + 8 + 8 = 40
pub const DIR_ENTRY_SIZE: usize = 40;

/// Upper bound on columns per schema (the header stores the count as u16).
pub const MAX_COLUMNS: usize = u16::MAX as usize;

// ── Flags ──────────────────────────────────────────────────────────────────

/// Header flag: entropy columns were coded with an external dictionary.
pub const FLAG_EXTERNAL_DICTIONARY: u16 = 1 << 0;

/// Directory flag: the block's meta region carries an embedded frequency table.
pub const BLOCK_FLAG_EMBEDDED_TABLE: u8 = 1 << 0;

/// Byte size of the group-count table for `group_count` groups, padded to 8.
pub fn group_table_size(group_count: usize) -> usize {
    (group_count * 4 + 7) & !7
}

/// Offset of the first payload byte for a schema of the given shape.
pub fn payload_start(group_count: usize, column_count: usize) -> usize {
    HEADER_SIZE + group_table_size(group_count) + column_count * DIR_ENTRY_SIZE
}

// ── Header ─────────────────────────────────────────────────────────────────

/// Decoded representation of the 48-byte CTF header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtfHeader {
    pub version: u16,
    pub flags: u16,
    pub column_count: u16,
    pub group_count: u16,
    /// xxh3 fingerprint of the schema the buffer was encoded with.
    pub schema_fingerprint: u64,
    /// Identity of the external dictionary, zero when tables are embedded.
    pub dictionary_id: u64,
    /// Bytes of payload following the directory.
    pub payload_len: u64,
}

impl CtfHeader {
    /// Serialize to exactly `HEADER_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..8].copy_from_slice(MAGIC);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[10..12].copy_from_slice(&self.flags.to_le_bytes());
        buf[12..14].copy_from_slice(&self.column_count.to_le_bytes());
        buf[14..16].copy_from_slice(&self.group_count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.schema_fingerprint.to_le_bytes());
        buf[24..32].copy_from_slice(&self.dictionary_id.to_le_bytes());
        buf[32..40].copy_from_slice(&self.payload_len.to_le_bytes());
        // layout_checksum is filled in once the directory is final
        buf
    }

    /// Deserialize from the front of `buf`, checking length, magic and version.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(CtfError::truncated(format!(
                "{} bytes supplied, header needs {}",
                buf.len(),
                HEADER_SIZE
            )));
        }
        if &buf[..8] != MAGIC {
            return Err(CtfError::BadMagic("CTF buffer"));
        }
        let header = Self {
            version: read_u16(buf, 8),
            flags: read_u16(buf, 10),
            column_count: read_u16(buf, 12),
            group_count: read_u16(buf, 14),
            schema_fingerprint: read_u64(buf, 16),
            dictionary_id: read_u64(buf, 24),
            payload_len: read_u64(buf, 32),
        };
        if header.version != FORMAT_VERSION {
            return Err(CtfError::VersionMismatch {
                found: header.version,
                supported: FORMAT_VERSION,
            });
        }
        Ok(header)
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    /// Offset of the first payload byte.
    pub fn payload_start(&self) -> usize {
        payload_start(self.group_count as usize, self.column_count as usize)
    }
}

/// xxh3-64 over everything before the payload except the checksum slot
/// itself: header fields, group counts and directory. Block checksums do not
/// cover element counts, so this is what catches a rewritten count.
///
/// `buf` must hold at least `payload_start` bytes.
pub fn layout_checksum(buf: &[u8], payload_start: usize) -> u64 {
    let mut h = Xxh3::new();
    h.update(&buf[..LAYOUT_CHECKSUM_AT]);
    h.update(&buf[HEADER_SIZE..payload_start]);
    h.digest()
}

/// Stored layout checksum of a buffer holding at least a full header.
pub(crate) fn stored_layout_checksum(buf: &[u8]) -> u64 {
    read_u64(buf, LAYOUT_CHECKSUM_AT)
}

// ── Directory entry ────────────────────────────────────────────────────────

/// One entry in the column directory: locates and describes a column block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirEntry {
    /// Byte offset of the block relative to the payload start.
    pub offset: u64,
    /// Bytes of codec side data stored before the payload.
    pub meta_len: u32,
    /// Bytes of encoded payload following the meta region.
    pub payload_len: u32,
    /// Number of elements in the column.
    pub element_count: u32,
    /// Store mode id (see [`StoreMode::id`]).
    pub mode: u8,
    pub flags: u8,
    /// xxh3-64 of the block region (meta followed by payload).
    pub checksum: u64,
}

impl DirEntry {
    /// Total bytes occupied by the block region.
    pub fn block_len(&self) -> u64 {
        self.meta_len as u64 + self.payload_len as u64
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn store_mode(&self) -> Result<StoreMode> {
        StoreMode::from_id(self.mode)
            .ok_or_else(|| CtfError::CorruptBlock(format!("unknown store mode id {}", self.mode)))
    }

    /// Serialize to exactly `DIR_ENTRY_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut buf = [0u8; DIR_ENTRY_SIZE];
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.meta_len.to_le_bytes());
        buf[12..16].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[16..20].copy_from_slice(&self.element_count.to_le_bytes());
        buf[20] = self.mode;
        buf[21] = self.flags;
        // buf[22..24] reserved
        buf[24..32].copy_from_slice(&self.checksum.to_le_bytes());
        // buf[32..40] reserved
        buf
    }

    /// Deserialize from the first `DIR_ENTRY_SIZE` bytes of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < DIR_ENTRY_SIZE {
            return Err(CtfError::truncated("directory entry"));
        }
        Ok(Self {
            offset: read_u64(buf, 0),
            meta_len: read_u32(buf, 8),
            payload_len: read_u32(buf, 12),
            element_count: read_u32(buf, 16),
            mode: buf[20],
            flags: buf[21],
            checksum: read_u64(buf, 24),
        })
    }
}

// Callers guarantee `buf` holds `at + N` bytes.

pub(crate) fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

pub(crate) fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_rejects_short_buffer_as_truncated() {
        let err = CtfHeader::from_bytes(&MAGIC[..]).unwrap_err();
        assert!(matches!(err, CtfError::TruncatedBuffer(_)));
    }

    #[test]
    fn header_rejects_foreign_magic() {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..8].copy_from_slice(b"PK\x03\x04\0\0\0\0");
        assert!(matches!(
            CtfHeader::from_bytes(&buf),
            Err(CtfError::BadMagic(_))
        ));
    }

    #[test]
    fn header_rejects_other_versions() {
        let header = CtfHeader {
            version: FORMAT_VERSION + 1,
            flags: 0,
            column_count: 1,
            group_count: 1,
            schema_fingerprint: 7,
            dictionary_id: 0,
            payload_len: 0,
        };
        let err = CtfHeader::from_bytes(&header.to_bytes()).unwrap_err();
        assert!(matches!(err, CtfError::VersionMismatch { found: 2, .. }));
    }

    #[test]
    fn group_table_is_padded_to_eight_bytes() {
        assert_eq!(group_table_size(0), 0);
        assert_eq!(group_table_size(1), 8);
        assert_eq!(group_table_size(2), 8);
        assert_eq!(group_table_size(3), 16);
    }
}
