use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::codec::BlockMeta;
use crate::error::{try_reserve, CtfError, Result};
use crate::format::{
    group_table_size, layout_checksum, payload_start, CtfHeader, DirEntry,
    BLOCK_FLAG_EMBEDDED_TABLE, DIR_ENTRY_SIZE, FLAG_EXTERNAL_DICTIONARY, FORMAT_VERSION,
    HEADER_SIZE, LAYOUT_CHECKSUM_AT,
};
use crate::schema::{Schema, StoreMode};

/// Reserved byte range of one column, relative to the payload start.
#[derive(Debug, Clone, Copy)]
struct Region {
    offset: usize,
    reserved: usize,
}

/// Write-once builder for one CTF buffer.
///
/// # Build contract
/// [`begin_encode`] preallocates the whole buffer and reserves a region per
/// column. Call [`append_column_block`] once per column, in any order, then
/// [`finish`] (or [`compactify`] followed by [`into_bytes`]).
///
/// # Layout while building
/// ```text
/// [HEADER: 48 bytes] [GROUP COUNTS] [DIRECTORY: 40 bytes × columns]
/// [REGION 0 ...padding] [REGION 1 ...padding] ... [REGION N-1 ...padding]
/// ← compactify(): slide every block down, rewrite offsets, cut the tail
/// ```
///
/// A block larger than its reservation is not an error: the buffer grows and
/// later regions shift up. That path copies, so it is logged as a sign of a
/// miscalibrated memory margin factor.
///
/// [`begin_encode`]: BlockBuilder::begin_encode
/// [`append_column_block`]: BlockBuilder::append_column_block
/// [`finish`]: BlockBuilder::finish
/// [`compactify`]: BlockBuilder::compactify
/// [`into_bytes`]: BlockBuilder::into_bytes
#[derive(Debug)]
pub struct BlockBuilder {
    buf: Vec<u8>,
    header: CtfHeader,
    group_counts: Vec<u32>,
    column_names: Vec<String>,
    column_counts: Vec<u32>,
    entries: Vec<DirEntry>,
    written: Vec<bool>,
    regions: Vec<Region>,
    payload_start: usize,
    capacity: usize,
    relocations: usize,
}

impl BlockBuilder {
    /// Start a buffer for `schema` holding `column_counts[i]` elements in
    /// column `i`. `estimates[i]` is the expected encoded size of column `i`;
    /// each region reserves `ceil(estimate * margin)` bytes.
    pub fn begin_encode(
        schema: &Schema,
        column_counts: &[usize],
        estimates: &[usize],
        margin: f64,
        dictionary_id: u64,
    ) -> Result<Self> {
        let n = schema.columns().len();
        if column_counts.len() != n || estimates.len() != n {
            return Err(CtfError::SchemaMismatch(format!(
                "{} counts and {} estimates supplied for {} columns",
                column_counts.len(),
                estimates.len(),
                n
            )));
        }
        if !margin.is_finite() || margin <= 0.0 {
            return Err(CtfError::InvalidConfig(format!("memory margin factor {margin}")));
        }

        let mut counts32 = Vec::with_capacity(n);
        for (spec, &count) in schema.columns().iter().zip(column_counts) {
            let c = u32::try_from(count).map_err(|_| {
                CtfError::ArityMismatch(format!("column '{}' has {count} elements", spec.name))
            })?;
            counts32.push(c);
        }

        let mut group_counts = vec![None::<u32>; schema.groups().len()];
        for (spec, &count) in schema.columns().iter().zip(&counts32) {
            match group_counts[spec.group] {
                None => group_counts[spec.group] = Some(count),
                Some(expected) if expected != count => {
                    return Err(CtfError::ArityMismatch(format!(
                        "column '{}' has {count} elements, group '{}' has {expected}",
                        spec.name,
                        schema.groups()[spec.group].name
                    )))
                }
                Some(_) => {}
            }
        }
        let group_counts: Vec<u32> = group_counts.into_iter().map(|c| c.unwrap_or(0)).collect();

        let mut regions = Vec::with_capacity(n);
        let mut offset = 0usize;
        for &estimate in estimates {
            let reserved = (estimate as f64 * margin).ceil() as usize;
            regions.push(Region { offset, reserved });
            offset = offset
                .checked_add(reserved)
                .ok_or(CtfError::AllocationFailure(usize::MAX))?;
        }

        let payload_start = payload_start(group_counts.len(), n);
        let capacity = payload_start
            .checked_add(offset)
            .ok_or(CtfError::AllocationFailure(usize::MAX))?;
        let mut buf = Vec::new();
        try_reserve(&mut buf, capacity)?;
        buf.resize(capacity, 0);

        let flags = if dictionary_id != 0 {
            FLAG_EXTERNAL_DICTIONARY
        } else {
            0
        };
        let header = CtfHeader {
            version: FORMAT_VERSION,
            flags,
            column_count: n as u16,
            group_count: group_counts.len() as u16,
            schema_fingerprint: schema.fingerprint(),
            dictionary_id,
            payload_len: offset as u64,
        };

        debug!(
            schema = schema.name(),
            columns = n,
            capacity,
            margin,
            "began CTF buffer"
        );

        Ok(Self {
            buf,
            header,
            group_counts,
            column_names: schema.columns().iter().map(|c| c.name.clone()).collect(),
            column_counts: counts32,
            entries: vec![DirEntry::default(); n],
            written: vec![false; n],
            regions,
            payload_start,
            capacity,
            relocations: 0,
        })
    }

    /// Store one encoded column into its region.
    pub fn append_column_block(
        &mut self,
        index: usize,
        mode: StoreMode,
        meta: &BlockMeta,
        payload: &[u8],
    ) -> Result<()> {
        if index >= self.regions.len() {
            return Err(CtfError::SchemaMismatch(format!(
                "column index {index} outside schema of {} columns",
                self.regions.len()
            )));
        }
        if self.written[index] {
            return Err(CtfError::DuplicateColumn(index));
        }
        let too_large = || CtfError::CorruptBlock(format!("column {index} block exceeds 4 GiB"));
        let meta_len = u32::try_from(meta.sidecar.len()).map_err(|_| too_large())?;
        let payload_len = u32::try_from(payload.len()).map_err(|_| too_large())?;
        let block_len = meta.sidecar.len() + payload.len();

        if block_len > self.regions[index].reserved {
            self.grow_region(index, block_len)?;
        }

        let start = self.payload_start + self.regions[index].offset;
        let mid = start + meta.sidecar.len();
        self.buf[start..mid].copy_from_slice(&meta.sidecar);
        self.buf[mid..mid + payload.len()].copy_from_slice(payload);

        self.entries[index] = DirEntry {
            offset: self.regions[index].offset as u64,
            meta_len,
            payload_len,
            element_count: self.column_counts[index],
            mode: mode.id(),
            flags: if meta.embedded_table {
                BLOCK_FLAG_EMBEDDED_TABLE
            } else {
                0
            },
            checksum: xxh3_64(&self.buf[start..start + block_len]),
        };
        self.written[index] = true;
        Ok(())
    }

    /// Enlarge region `index` to `needed` bytes, shifting every later region.
    fn grow_region(&mut self, index: usize, needed: usize) -> Result<()> {
        let region = self.regions[index];
        let extra = needed - region.reserved;
        let tail_start = self.payload_start + region.offset + region.reserved;
        let old_len = self.buf.len();

        try_reserve(&mut self.buf, extra)?;
        self.buf.resize(old_len + extra, 0);
        self.buf.copy_within(tail_start..old_len, tail_start + extra);
        self.buf[tail_start..tail_start + extra].fill(0);

        self.regions[index].reserved = needed;
        for j in index + 1..self.regions.len() {
            self.regions[j].offset += extra;
            if self.written[j] {
                self.entries[j].offset += extra as u64;
            }
        }
        self.relocations += 1;
        warn!(
            column = %self.column_names[index],
            reserved = region.reserved,
            needed,
            "CTF column block outgrew its reservation; raise the memory margin factor"
        );
        Ok(())
    }

    /// Remove all padding: blocks become contiguous in schema order and the
    /// buffer is cut to exactly [`size`](Self::size) bytes. Idempotent.
    pub fn compactify(&mut self) {
        let mut cursor = 0usize;
        for i in 0..self.regions.len() {
            let len = if self.written[i] {
                self.entries[i].block_len() as usize
            } else {
                0
            };
            let src = self.payload_start + self.regions[i].offset;
            let dst = self.payload_start + cursor;
            if len > 0 && src != dst {
                self.buf.copy_within(src..src + len, dst);
            }
            self.regions[i] = Region {
                offset: cursor,
                reserved: len,
            };
            if self.written[i] {
                self.entries[i].offset = cursor as u64;
            }
            cursor += len;
        }
        self.buf.truncate(self.payload_start + cursor);
        self.header.payload_len = cursor as u64;
        self.write_directory();
    }

    fn write_directory(&mut self) {
        self.buf[..HEADER_SIZE].copy_from_slice(&self.header.to_bytes());
        let groups_at = HEADER_SIZE;
        let groups_len = group_table_size(self.group_counts.len());
        self.buf[groups_at..groups_at + groups_len].fill(0);
        for (g, count) in self.group_counts.iter().enumerate() {
            let at = groups_at + g * 4;
            self.buf[at..at + 4].copy_from_slice(&count.to_le_bytes());
        }
        let dir_at = groups_at + groups_len;
        for (i, entry) in self.entries.iter().enumerate() {
            let at = dir_at + i * DIR_ENTRY_SIZE;
            self.buf[at..at + DIR_ENTRY_SIZE].copy_from_slice(&entry.to_bytes());
        }
        let sum = layout_checksum(&self.buf, self.payload_start);
        self.buf[LAYOUT_CHECKSUM_AT..HEADER_SIZE].copy_from_slice(&sum.to_le_bytes());
    }

    /// Current logical size in bytes; after [`compactify`](Self::compactify)
    /// this is header + group counts + directory + block bytes, nothing else.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Bytes preallocated by [`begin_encode`](Self::begin_encode).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of times a block outgrew its reservation.
    pub fn relocations(&self) -> usize {
        self.relocations
    }

    /// Bytes of header, group counts and directory.
    pub fn header_size(&self) -> usize {
        self.payload_start
    }

    pub fn is_written(&self, index: usize) -> bool {
        self.written.get(index).copied().unwrap_or(false)
    }

    /// Read-only access to the buffer as it stands.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Hand out the buffer as it stands. Call after [`compactify`](Self::compactify).
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Verify every column was written, compact, and return the buffer.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        if let Some(i) = self.written.iter().position(|w| !w) {
            return Err(CtfError::MissingColumn(self.column_names[i].clone()));
        }
        self.compactify();
        Ok(self.buf)
    }
}
