//! Schema-driven encode/decode of whole frames.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::codec::{codec_for, decode_block, encode_block, BlockMeta, ColumnContext};
use crate::container::BlockBuilder;
use crate::dictionary::{Dictionary, DictionarySource};
use crate::error::{CtfError, Result};
use crate::format::CtfHeader;
use crate::frame::{ColumnData, Frame};
use crate::metrics::{ColumnReport, DecodeReport, EncodeReport};
use crate::schema::{ColumnSpec, Schema, StoreMode};
use crate::table::FrequencyTable;
use crate::view::CtfView;

/// Tunables that never change the encoded bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct CoderOptions {
    /// Preallocation multiplier applied to every column's size estimate.
    pub memory_margin_factor: f64,
    /// 0 = quiet, 1 = per-column sizes, 2 = also the block directory.
    pub verbosity: u8,
    /// Encode and decode columns on the rayon pool.
    pub parallel: bool,
}

impl Default for CoderOptions {
    fn default() -> Self {
        Self {
            memory_margin_factor: 1.0,
            verbosity: 0,
            parallel: false,
        }
    }
}

impl CoderOptions {
    pub fn validate(&self) -> Result<()> {
        check_margin(self.memory_margin_factor)
    }
}

fn check_margin(factor: f64) -> Result<()> {
    if factor.is_finite() && factor > 0.0 {
        Ok(())
    } else {
        Err(CtfError::InvalidConfig(format!(
            "memory margin factor must be finite and positive, got {factor}"
        )))
    }
}

/// An encoded buffer, already compacted to its exact size.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub bytes: Vec<u8>,
    pub report: EncodeReport,
}

#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub frame: Frame,
    pub report: DecodeReport,
}

/// Encoder/decoder bound to one schema and one dictionary source.
///
/// # Encode sequence
/// 1. Match frame columns to the schema by name and width.
/// 2. Check group arity and every `counted_by` relation.
/// 3. Preallocate the buffer from per-column estimates × margin factor.
/// 4. Code every column independently (in parallel when enabled).
/// 5. Append the blocks, compact, hand out the buffer.
///
/// Calls take `&self`; only reconfiguration needs `&mut self`, so a coder
/// behind an `Arc` serves concurrent calls and cannot be reconfigured under
/// them.
#[derive(Debug, Clone)]
pub struct CtfCoder {
    schema: Arc<Schema>,
    dictionary: DictionarySource,
    options: CoderOptions,
}

impl CtfCoder {
    /// Bind a coder, checking that an external dictionary fits `schema`.
    pub fn configure(dictionary: DictionarySource, schema: Arc<Schema>) -> Result<Self> {
        if let Some(dict) = dictionary.dictionary() {
            dict.validate_against(&schema)?;
        }
        debug!(
            schema = schema.name(),
            dictionary = format_args!("{:016x}", dictionary.id()),
            "configured CTF coder"
        );
        Ok(Self {
            schema,
            dictionary,
            options: CoderOptions::default(),
        })
    }

    /// Replace dictionary and schema. On error the coder is left unchanged.
    pub fn reconfigure(&mut self, dictionary: DictionarySource, schema: Arc<Schema>) -> Result<()> {
        let options = self.options.clone();
        *self = Self::configure(dictionary, schema)?;
        self.options = options;
        Ok(())
    }

    /// Builder-style option override.
    pub fn with_options(mut self, options: CoderOptions) -> Result<Self> {
        options.validate()?;
        self.options = options;
        Ok(self)
    }

    pub fn set_memory_margin_factor(&mut self, factor: f64) -> Result<()> {
        check_margin(factor)?;
        self.options.memory_margin_factor = factor;
        Ok(())
    }

    pub fn set_verbosity(&mut self, level: u8) {
        self.options.verbosity = level;
    }

    pub fn set_parallel(&mut self, parallel: bool) {
        self.options.parallel = parallel;
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn dictionary(&self) -> &DictionarySource {
        &self.dictionary
    }

    pub fn options(&self) -> &CoderOptions {
        &self.options
    }

    fn external(&self) -> Option<&Dictionary> {
        self.dictionary.dictionary().map(|d| d.as_ref())
    }

    fn context<'a>(&'a self, index: usize, spec: &'a ColumnSpec) -> ColumnContext<'a> {
        let mut ctx = ColumnContext::new(&spec.name, spec.width);
        ctx.coding = self.external().and_then(|d| d.coding(index));
        ctx
    }

    // ── Encode ─────────────────────────────────────────────────────────────

    pub fn encode(&self, frame: &Frame) -> Result<EncodedFrame> {
        let started = Instant::now();
        let schema = &*self.schema;

        if let Some(extra) = frame.names().find(|n| schema.column_index(n).is_none()) {
            return Err(CtfError::SchemaMismatch(format!(
                "column '{extra}' is not part of schema '{}'",
                schema.name()
            )));
        }

        let mut columns: Vec<&ColumnData> = Vec::with_capacity(schema.columns().len());
        for spec in schema.columns() {
            let data = frame
                .get(&spec.name)
                .ok_or_else(|| CtfError::MissingColumn(spec.name.clone()))?;
            if data.width() != spec.width {
                return Err(CtfError::SchemaMismatch(format!(
                    "column '{}' is {}-bit, schema declares {}-bit",
                    spec.name,
                    data.width().bits(),
                    spec.width.bits()
                )));
            }
            columns.push(data);
        }

        let group_counts = group_counts(schema, |i| columns[i].len())?;
        schema.check_relations(&group_counts, |c| columns[c].sum())?;

        let counts: Vec<usize> = columns.iter().map(|c| c.len()).collect();
        let estimates: Vec<usize> = schema
            .columns()
            .iter()
            .enumerate()
            .map(|(i, spec)| self.estimate(i, spec, counts[i]))
            .collect();
        let mut builder = BlockBuilder::begin_encode(
            schema,
            &counts,
            &estimates,
            self.options.memory_margin_factor,
            self.dictionary.id(),
        )?;

        let encode_one = |i: usize| -> Result<(BlockMeta, Vec<u8>)> {
            let spec = &schema.columns()[i];
            let symbols = columns[i].to_symbols();
            encode_block(codec_for(spec.mode), &symbols, &self.context(i, spec))
        };
        let blocks: Vec<(BlockMeta, Vec<u8>)> = if self.options.parallel {
            (0..columns.len()).into_par_iter().map(encode_one).collect::<Result<_>>()?
        } else {
            (0..columns.len()).map(encode_one).collect::<Result<_>>()?
        };

        let mut reports = Vec::with_capacity(blocks.len());
        for (i, (meta, payload)) in blocks.iter().enumerate() {
            let spec = &schema.columns()[i];
            builder.append_column_block(i, spec.mode, meta, payload)?;
            reports.push(ColumnReport {
                name: spec.name.clone(),
                mode: spec.mode,
                elements: counts[i],
                raw_bytes: counts[i] * spec.width.bytes(),
                encoded_bytes: meta.sidecar.len() + payload.len(),
            });
        }

        let preallocated = builder.capacity();
        let relocations = builder.relocations();
        let bytes = builder.finish()?;

        let report = EncodeReport {
            raw_bytes: reports.iter().map(|r| r.raw_bytes).sum(),
            encoded_bytes: bytes.len(),
            preallocated,
            relocations,
            elapsed: started.elapsed(),
            columns: reports,
        };
        self.log_encode(&report);
        Ok(EncodedFrame { bytes, report })
    }

    /// Expected block size of column `index` holding `count` elements.
    fn estimate(&self, index: usize, spec: &ColumnSpec, count: usize) -> usize {
        if count == 0 {
            return 0;
        }
        let raw = count * spec.width.bytes();
        match spec.mode {
            StoreMode::Entropy => match self.external().and_then(|d| d.table(index)) {
                Some(table) if table.total() > 0 => {
                    let bits = table.entropy_bits().ceil() as usize + 1;
                    (count * bits).div_ceil(8)
                }
                Some(_) => raw,
                None => {
                    let distinct = count.min(1 << spec.width.bits().min(16));
                    raw + FrequencyTable::serialized_bound(distinct, spec.width.bits())
                }
            },
            StoreMode::Pack => raw + 11,
            StoreMode::Store => raw,
            StoreMode::Zstd | StoreMode::Lz4 => raw + raw / 255 + 32,
        }
    }

    fn log_encode(&self, report: &EncodeReport) {
        if self.options.verbosity == 0 {
            return;
        }
        for c in &report.columns {
            info!(
                schema = self.schema.name(),
                column = %c.name,
                mode = ?c.mode,
                elements = c.elements,
                raw = c.raw_bytes,
                encoded = c.encoded_bytes,
                ratio = format_args!("{:.2}", c.ratio()),
                "CTF column"
            );
        }
        info!(
            schema = self.schema.name(),
            raw = report.raw_bytes,
            encoded = report.encoded_bytes,
            preallocated = report.preallocated,
            relocations = report.relocations,
            elapsed_us = report.elapsed.as_micros() as u64,
            "CTF encoded"
        );
    }

    // ── Decode ─────────────────────────────────────────────────────────────

    /// Decode a buffer produced by [`encode`](Self::encode) with the same
    /// schema. The bytes are only borrowed for the duration of the call.
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedFrame> {
        let started = Instant::now();
        let schema = &*self.schema;
        let view = CtfView::open(bytes)?;
        self.check_header(view.header())?;
        if self.options.verbosity >= 2 {
            dump_directory(&view);
        }

        let group_counts: Vec<u64> = view.group_counts().iter().map(|&c| c as u64).collect();
        for (i, (spec, entry)) in schema.columns().iter().zip(view.entries()).enumerate() {
            if entry.store_mode()? != spec.mode {
                return Err(CtfError::SchemaMismatch(format!(
                    "column {i} '{}' stored as {:?}, schema declares {:?}",
                    spec.name,
                    entry.store_mode()?,
                    spec.mode
                )));
            }
            if entry.element_count as u64 != group_counts[spec.group] {
                return Err(CtfError::ArityMismatch(format!(
                    "column '{}' holds {} elements, group '{}' has {}",
                    spec.name,
                    entry.element_count,
                    schema.groups()[spec.group].name,
                    group_counts[spec.group]
                )));
            }
        }

        let decode_one = |i: usize| -> Result<ColumnData> {
            let spec = &schema.columns()[i];
            let block = view.block(i)?;
            let symbols = decode_block(
                codec_for(spec.mode),
                block.payload,
                &self.context(i, spec),
                &block.block_meta(),
                block.entry.element_count as usize,
            )?;
            Ok(ColumnData::from_symbols(spec.width, symbols))
        };
        let n = schema.columns().len();
        let columns: Vec<ColumnData> = if self.options.parallel {
            (0..n).into_par_iter().map(decode_one).collect::<Result<_>>()?
        } else {
            (0..n).map(decode_one).collect::<Result<_>>()?
        };

        schema.check_relations(&group_counts, |c| columns[c].sum())?;

        let raw_bytes = columns
            .iter()
            .zip(schema.columns())
            .map(|(c, spec)| c.len() * spec.width.bytes())
            .sum();
        let mut frame = Frame::new();
        for (spec, data) in schema.columns().iter().zip(columns) {
            frame.insert(spec.name.clone(), data);
        }

        let report = DecodeReport {
            encoded_bytes: view.size(),
            raw_bytes,
            group_counts: view.group_counts().to_vec(),
            elapsed: started.elapsed(),
        };
        if self.options.verbosity >= 1 {
            info!(
                schema = schema.name(),
                encoded = report.encoded_bytes,
                raw = report.raw_bytes,
                elapsed_us = report.elapsed.as_micros() as u64,
                "CTF decoded"
            );
        }
        Ok(DecodedFrame { frame, report })
    }

    fn check_header(&self, header: &CtfHeader) -> Result<()> {
        let schema = &*self.schema;
        if header.schema_fingerprint != schema.fingerprint()
            || header.column_count as usize != schema.columns().len()
            || header.group_count as usize != schema.groups().len()
        {
            return Err(CtfError::SchemaMismatch(format!(
                "buffer schema {:016x} ({} columns) is not '{}' {:016x} ({} columns)",
                header.schema_fingerprint,
                header.column_count,
                schema.name(),
                schema.fingerprint(),
                schema.columns().len()
            )));
        }
        // A buffer without a dictionary id carries its own tables and decodes
        // with any source. Without an external dictionary, entropy blocks
        // report MissingDictionary column by column.
        let ours = self.dictionary.id();
        if header.dictionary_id != 0 && ours != 0 && header.dictionary_id != ours {
            return Err(CtfError::SchemaMismatch(format!(
                "buffer encoded with dictionary {:016x}, coder holds {ours:016x}",
                header.dictionary_id
            )));
        }
        Ok(())
    }
}

/// Element count of every group, from the lengths of its columns.
fn group_counts(schema: &Schema, len_of: impl Fn(usize) -> usize) -> Result<Vec<u64>> {
    schema
        .groups()
        .iter()
        .enumerate()
        .map(|(g, group)| {
            let mut count = None;
            for (i, spec) in schema.group_columns(g) {
                let len = len_of(i);
                match count {
                    None => count = Some(len),
                    Some(expected) if expected != len => {
                        return Err(CtfError::ArityMismatch(format!(
                            "column '{}' has {len} elements, group '{}' has {expected}",
                            spec.name, group.name
                        )))
                    }
                    Some(_) => {}
                }
            }
            Ok(count.unwrap_or(0) as u64)
        })
        .collect()
}

fn dump_directory(view: &CtfView<'_>) {
    let h = view.header();
    info!(
        version = h.version,
        columns = h.column_count,
        groups = h.group_count,
        dictionary = format_args!("{:016x}", h.dictionary_id),
        payload = h.payload_len,
        "CTF header"
    );
    for (i, e) in view.entries().iter().enumerate() {
        info!(
            column = i,
            offset = e.offset,
            meta = e.meta_len,
            payload = e.payload_len,
            elements = e.element_count,
            mode = e.mode,
            flags = e.flags,
            "CTF block"
        );
    }
}
