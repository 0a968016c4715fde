use xxhash_rust::xxh3::xxh3_64;

use crate::codec::BlockMeta;
use crate::error::{CtfError, Result};
use crate::format::{
    layout_checksum, read_u32, stored_layout_checksum, CtfHeader, DirEntry,
    BLOCK_FLAG_EMBEDDED_TABLE, DIR_ENTRY_SIZE, HEADER_SIZE,
};

/// Read-only view over an encoded CTF buffer.
///
/// # Open sequence
/// 1. Validate the 48-byte header (length, magic, version).
/// 2. Verify the layout checksum over header, group counts and directory.
/// 3. Read the group-count table and the column directory.
/// 4. Check that every declared block lies inside the supplied bytes.
///
/// Nothing is copied: the view borrows the caller's bytes, which may be a
/// slice of a larger shared or memory-mapped region, and never writes
/// through them.
#[derive(Debug, Clone)]
pub struct CtfView<'a> {
    bytes: &'a [u8],
    header: CtfHeader,
    group_counts: Vec<u32>,
    entries: Vec<DirEntry>,
}

/// One column block as laid out in the buffer.
#[derive(Debug, Clone)]
pub struct ColumnBlock<'a> {
    pub entry: DirEntry,
    pub meta: &'a [u8],
    pub payload: &'a [u8],
}

impl ColumnBlock<'_> {
    pub fn block_meta(&self) -> BlockMeta {
        BlockMeta {
            sidecar: self.meta.to_vec(),
            embedded_table: self.entry.has_flag(BLOCK_FLAG_EMBEDDED_TABLE),
        }
    }
}

impl<'a> CtfView<'a> {
    pub fn open(bytes: &'a [u8]) -> Result<Self> {
        let header = CtfHeader::from_bytes(bytes)?;
        let payload_start = header.payload_start();
        if bytes.len() < payload_start {
            return Err(CtfError::truncated(format!(
                "{} bytes supplied, header and directory need {payload_start}",
                bytes.len()
            )));
        }
        let stored = stored_layout_checksum(bytes);
        let actual = layout_checksum(bytes, payload_start);
        if stored != actual {
            return Err(CtfError::CorruptBlock(format!(
                "header/directory checksum {actual:016x} does not match stored {stored:016x}"
            )));
        }

        let group_counts: Vec<u32> = (0..header.group_count as usize)
            .map(|g| read_u32(bytes, HEADER_SIZE + g * 4))
            .collect();

        let dir_at = payload_start - header.column_count as usize * DIR_ENTRY_SIZE;
        let entries = (0..header.column_count as usize)
            .map(|i| DirEntry::from_bytes(&bytes[dir_at + i * DIR_ENTRY_SIZE..]))
            .collect::<Result<Vec<_>>>()?;

        let available = (bytes.len() - payload_start) as u64;
        for (i, e) in entries.iter().enumerate() {
            let end = e
                .offset
                .checked_add(e.block_len())
                .ok_or_else(|| CtfError::CorruptBlock(format!("column {i} extent overflows")))?;
            if end > available {
                return Err(CtfError::truncated(format!(
                    "column {i} ends at payload byte {end}, only {available} present"
                )));
            }
            if end > header.payload_len {
                return Err(CtfError::CorruptBlock(format!(
                    "column {i} ends at payload byte {end}, past declared payload of {}",
                    header.payload_len
                )));
            }
        }
        if header.payload_len > available {
            return Err(CtfError::truncated(format!(
                "payload declares {} bytes, only {available} present",
                header.payload_len
            )));
        }

        Ok(Self {
            bytes,
            header,
            group_counts,
            entries,
        })
    }

    pub fn header(&self) -> &CtfHeader {
        &self.header
    }

    pub fn group_counts(&self) -> &[u32] {
        &self.group_counts
    }

    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    pub fn column_count(&self) -> usize {
        self.entries.len()
    }

    /// Logical size of the buffer: header, group counts, directory, payload.
    pub fn size(&self) -> usize {
        self.header.payload_start() + self.header.payload_len as usize
    }

    /// Total bytes of block meta and payload.
    pub fn encoded_size(&self) -> u64 {
        self.entries.iter().map(|e| e.block_len()).sum()
    }

    /// Locate column `index`, verifying its checksum.
    pub fn block(&self, index: usize) -> Result<ColumnBlock<'a>> {
        let entry = self.entries.get(index).ok_or_else(|| {
            CtfError::SchemaMismatch(format!(
                "column {index} outside buffer of {} columns",
                self.entries.len()
            ))
        })?;
        let start = self.header.payload_start() + entry.offset as usize;
        let mid = start + entry.meta_len as usize;
        let end = mid + entry.payload_len as usize;
        // open() proved every extent in range
        let bytes: &'a [u8] = self.bytes;

        let actual = xxh3_64(&bytes[start..end]);
        if actual != entry.checksum {
            return Err(CtfError::ChecksumMismatch {
                column: index,
                expected: entry.checksum,
                actual,
            });
        }

        Ok(ColumnBlock {
            entry: entry.clone(),
            meta: &bytes[start..mid],
            payload: &bytes[mid..end],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::BlockBuilder;
    use crate::schema::{Schema, StoreMode, Width};

    fn encoded() -> Vec<u8> {
        let schema = Schema::builder("VIEW")
            .group("g")
            .column("a", Width::U8, StoreMode::Store)
            .column("b", Width::U16, StoreMode::Store)
            .build()
            .unwrap();
        let mut b = BlockBuilder::begin_encode(&schema, &[2, 2], &[2, 4], 1.0, 0).unwrap();
        let meta = BlockMeta::default();
        b.append_column_block(0, StoreMode::Store, &meta, &[1, 2]).unwrap();
        b.append_column_block(1, StoreMode::Store, &meta, &[3, 0, 4, 0]).unwrap();
        b.finish().unwrap()
    }

    #[test]
    fn open_reads_directory_without_copying() {
        let bytes = encoded();
        let view = CtfView::open(&bytes).unwrap();
        assert_eq!(view.column_count(), 2);
        assert_eq!(view.group_counts(), &[2]);
        assert_eq!(view.size(), bytes.len());
        assert_eq!(view.encoded_size(), 6);

        let block = view.block(1).unwrap();
        assert_eq!(block.payload, &[3, 0, 4, 0]);
        assert!(block.meta.is_empty());
        assert_eq!(block.entry.element_count, 2);
        assert_eq!(block.payload.as_ptr(), bytes[bytes.len() - 4..].as_ptr());
    }

    #[test]
    fn flipped_payload_byte_fails_checksum() {
        let mut bytes = encoded();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let view = CtfView::open(&bytes).unwrap();
        assert!(view.block(0).is_ok());
        assert!(matches!(
            view.block(1),
            Err(CtfError::ChecksumMismatch { column: 1, .. })
        ));
    }

    #[test]
    fn every_short_prefix_is_truncated() {
        let bytes = encoded();
        for cut in HEADER_SIZE..bytes.len() {
            let err = CtfView::open(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(err, CtfError::TruncatedBuffer(_)),
                "cut at {cut}: {err}"
            );
        }
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut bytes = encoded();
        let size = bytes.len();
        bytes.extend_from_slice(&[0xAA; 16]);
        let view = CtfView::open(&bytes).unwrap();
        assert_eq!(view.size(), size);
        assert_eq!(view.block(0).unwrap().payload, &[1, 2]);
    }

    #[test]
    fn foreign_bytes_are_bad_magic() {
        let bytes = vec![0u8; 128];
        assert!(matches!(CtfView::open(&bytes), Err(CtfError::BadMagic(_))));
    }
}
