//! Pre-trained per-column coding tables and their on-disk artifact.
//!
//! # Artifact layout
//! ```text
//! magic[8] = "CTFDICT\0"   version:u16   column_count:u16
//! name_len:u16  schema name bytes
//! per column: present:u8 [serialized FrequencyTable]
//! trailer: xxh3-64 of every preceding byte (also the dictionary identity)
//! ```
//! The whole artifact may be gzip-wrapped; [`Dictionary::load`] detects the
//! gzip magic and unwraps it transparently.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{CtfError, Result};
use crate::format::{read_u16, read_u64};
use crate::frame::Frame;
use crate::huffman::HuffmanCode;
use crate::schema::Schema;
use crate::table::FrequencyTable;

pub const DICT_MAGIC: &[u8; 8] = b"CTFDICT\0";

/// Artifact version written by this crate and the only one it reads.
pub const DICT_VERSION: u16 = 1;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A column's table together with the prefix code derived from it.
#[derive(Debug, Clone)]
pub(crate) struct ColumnCoding {
    pub(crate) table: FrequencyTable,
    pub(crate) code: HuffmanCode,
}

/// Immutable set of per-column frequency tables.
///
/// Prefix codes are derived once at construction, so a dictionary shared
/// behind an `Arc` serves any number of concurrent coders without locking.
#[derive(Debug, Clone)]
pub struct Dictionary {
    schema_name: String,
    columns: Vec<Option<ColumnCoding>>,
    id: u64,
}

impl Dictionary {
    /// Build a dictionary from one optional table per schema column.
    pub fn new(schema_name: impl Into<String>, tables: Vec<Option<FrequencyTable>>) -> Result<Self> {
        let schema_name = schema_name.into();
        if tables.len() > u16::MAX as usize || schema_name.len() > u16::MAX as usize {
            return Err(CtfError::InvalidConfig("dictionary too large".into()));
        }
        let columns: Vec<Option<ColumnCoding>> = tables
            .into_iter()
            .map(|t| {
                t.map(|table| ColumnCoding {
                    code: HuffmanCode::from_table(&table),
                    table,
                })
            })
            .collect();
        let mut dict = Self {
            schema_name,
            columns,
            id: 0,
        };
        dict.id = xxh3_64(&dict.body_bytes());
        Ok(dict)
    }

    /// Read and validate a dictionary artifact (plain or gzip-wrapped).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut raw = Vec::new();
        File::open(path)?.read_to_end(&mut raw)?;
        if raw.starts_with(&GZIP_MAGIC) {
            let mut plain = Vec::new();
            GzDecoder::new(raw.as_slice())
                .read_to_end(&mut plain)
                .map_err(|e| CtfError::CorruptDictionary(format!("gzip: {e}")))?;
            raw = plain;
        }
        let dict = Self::from_bytes(&raw)?;
        debug!(
            path = %path.display(),
            schema = %dict.schema_name,
            id = format_args!("{:016x}", dict.id),
            "loaded CTF dictionary"
        );
        Ok(dict)
    }

    /// Parse an artifact from memory.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let corrupt = |msg: &str| CtfError::CorruptDictionary(msg.to_string());

        if buf.len() < DICT_MAGIC.len() || &buf[..8] != DICT_MAGIC {
            return Err(CtfError::BadMagic("CTF dictionary artifact"));
        }
        if buf.len() < 14 {
            return Err(corrupt("artifact shorter than its fixed header"));
        }
        let version = read_u16(buf, 8);
        if version != DICT_VERSION {
            return Err(CtfError::UnsupportedVersion {
                found: version,
                supported: DICT_VERSION,
            });
        }
        if buf.len() < 14 + 8 {
            return Err(corrupt("artifact has no checksum trailer"));
        }
        let (body, trailer) = buf.split_at(buf.len() - 8);
        let declared = read_u64(trailer, 0);
        let actual = xxh3_64(body);
        if declared != actual {
            return Err(CtfError::CorruptDictionary(format!(
                "checksum mismatch: trailer {declared:016x}, content {actual:016x}"
            )));
        }

        let column_count = read_u16(body, 10) as usize;
        let name_len = read_u16(body, 12) as usize;
        let mut pos = 14;
        let name_bytes = body
            .get(pos..pos + name_len)
            .ok_or_else(|| corrupt("truncated schema name"))?;
        let schema_name = String::from_utf8(name_bytes.to_vec())
            .map_err(|_| corrupt("schema name is not UTF-8"))?;
        pos += name_len;

        let mut tables = Vec::with_capacity(column_count.min(body.len()));
        for column in 0..column_count {
            let present = *body
                .get(pos)
                .ok_or_else(|| corrupt("truncated column table list"))?;
            pos += 1;
            match present {
                0 => tables.push(None),
                1 => {
                    let table = FrequencyTable::read_from(body, &mut pos).map_err(|e| {
                        CtfError::CorruptDictionary(format!("column {column}: {e}"))
                    })?;
                    if table.is_empty() {
                        return Err(CtfError::CorruptDictionary(format!(
                            "column {column}: table has no symbols"
                        )));
                    }
                    tables.push(Some(table));
                }
                other => {
                    return Err(CtfError::CorruptDictionary(format!(
                        "column {column}: invalid presence byte {other}"
                    )))
                }
            }
        }
        if pos != body.len() {
            return Err(CtfError::CorruptDictionary(format!(
                "{} trailing bytes after the last table",
                body.len() - pos
            )));
        }
        Self::new(schema_name, tables)
    }

    fn body_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(DICT_MAGIC);
        out.extend_from_slice(&DICT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.columns.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.schema_name.len() as u16).to_le_bytes());
        out.extend_from_slice(self.schema_name.as_bytes());
        for column in &self.columns {
            match column {
                Some(c) => {
                    out.push(1);
                    c.table.write_to(&mut out);
                }
                None => out.push(0),
            }
        }
        out
    }

    /// Serialize to the artifact format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.body_bytes();
        let checksum = xxh3_64(&out);
        out.extend_from_slice(&checksum.to_le_bytes());
        out
    }

    /// Write the artifact to `path`, optionally gzip-wrapped.
    pub fn save(&self, path: impl AsRef<Path>, compress: bool) -> Result<()> {
        let bytes = self.to_bytes();
        let file = File::create(path)?;
        if compress {
            let mut enc = GzEncoder::new(file, Compression::default());
            enc.write_all(&bytes)?;
            enc.finish()?.flush()?;
        } else {
            let mut file = file;
            file.write_all(&bytes)?;
            file.flush()?;
        }
        Ok(())
    }

    /// Identity recorded in every buffer encoded with this dictionary.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn table(&self, column: usize) -> Option<&FrequencyTable> {
        self.columns.get(column)?.as_ref().map(|c| &c.table)
    }

    pub(crate) fn coding(&self, column: usize) -> Option<&ColumnCoding> {
        self.columns.get(column)?.as_ref()
    }

    /// Check that this dictionary was built for `schema`.
    pub fn validate_against(&self, schema: &Schema) -> Result<()> {
        let mismatch = |msg: String| CtfError::SchemaMismatch(format!("dictionary: {msg}"));

        if self.schema_name != schema.name() {
            return Err(mismatch(format!(
                "built for schema '{}', coder uses '{}'",
                self.schema_name,
                schema.name()
            )));
        }
        if self.columns.len() != schema.columns().len() {
            return Err(mismatch(format!(
                "{} columns, schema has {}",
                self.columns.len(),
                schema.columns().len()
            )));
        }
        for (i, spec) in schema.columns().iter().enumerate() {
            match (&self.columns[i], spec.mode.uses_dictionary()) {
                (None, true) => {
                    return Err(mismatch(format!("no table for entropy column '{}'", spec.name)))
                }
                (Some(_), false) => {
                    return Err(mismatch(format!(
                        "table supplied for non-entropy column '{}'",
                        spec.name
                    )))
                }
                (Some(c), true) if !c.table.is_empty() && c.table.max() > spec.width.max_symbol() => {
                    return Err(mismatch(format!(
                        "column '{}' table bound {} exceeds {}-bit width",
                        spec.name,
                        c.table.max(),
                        spec.width.bits()
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

// ── Dictionary source ──────────────────────────────────────────────────────

/// Where entropy tables come from.
#[derive(Debug, Clone, Default)]
pub enum DictionarySource {
    /// Build tables from the data at encode time and embed them in the blocks.
    #[default]
    None,
    /// A pre-trained, shared dictionary.
    External(Arc<Dictionary>),
}

impl DictionarySource {
    pub fn none() -> Self {
        DictionarySource::None
    }

    /// Interpret a workflow option: empty or `"none"` selects embedded
    /// tables, anything else is a path to load.
    pub fn from_option(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("none") {
            Ok(DictionarySource::None)
        } else {
            Ok(DictionarySource::External(Arc::new(Dictionary::load(value)?)))
        }
    }

    pub fn dictionary(&self) -> Option<&Arc<Dictionary>> {
        match self {
            DictionarySource::None => None,
            DictionarySource::External(d) => Some(d),
        }
    }

    /// Identity written to buffer headers (zero for embedded tables).
    pub fn id(&self) -> u64 {
        self.dictionary().map(|d| d.id()).unwrap_or(0)
    }
}

impl From<Dictionary> for DictionarySource {
    fn from(d: Dictionary) -> Self {
        DictionarySource::External(Arc::new(d))
    }
}

impl From<Arc<Dictionary>> for DictionarySource {
    fn from(d: Arc<Dictionary>) -> Self {
        DictionarySource::External(d)
    }
}

// ── Training ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Columns whose observed span `max - min + 1` is at most this value get
    /// frequency 1 for every unseen symbol inside the span, keeping in-range
    /// values encodable. Zero disables smoothing.
    pub smooth_span: u64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self { smooth_span: 4096 }
    }
}

/// Accumulates symbol statistics over many frames of one schema.
pub struct DictionaryBuilder {
    schema: Arc<Schema>,
    counts: Vec<BTreeMap<u64, u64>>,
    frames: u64,
}

impl DictionaryBuilder {
    pub fn new(schema: Arc<Schema>) -> Self {
        let counts = vec![BTreeMap::new(); schema.columns().len()];
        Self {
            schema,
            counts,
            frames: 0,
        }
    }

    /// Add every entropy column of `frame` to the statistics.
    pub fn add_frame(&mut self, frame: &Frame) -> Result<()> {
        for (i, spec) in self.schema.columns().iter().enumerate() {
            if !spec.mode.uses_dictionary() {
                continue;
            }
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
            let counts = &mut self.counts[i];
            for s in data.to_symbols() {
                *counts.entry(s).or_insert(0) += 1;
            }
        }
        self.frames += 1;
        Ok(())
    }

    /// Frames accumulated so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn build(&self, options: &TrainOptions) -> Result<Dictionary> {
        let mut tables = Vec::with_capacity(self.counts.len());
        for (i, spec) in self.schema.columns().iter().enumerate() {
            if !spec.mode.uses_dictionary() {
                tables.push(None);
                continue;
            }
            if self.counts[i].is_empty() {
                return Err(CtfError::InvalidConfig(format!(
                    "column '{}' carried no values in {} training frames",
                    spec.name, self.frames
                )));
            }
            let mut counts = self.counts[i].clone();
            if let (Some((&lo, _)), Some((&hi, _))) = (counts.first_key_value(), counts.last_key_value()) {
                let span = hi - lo;
                if options.smooth_span > 0 && span < options.smooth_span {
                    for s in lo..=hi {
                        counts.entry(s).or_insert(1);
                    }
                }
            }
            let table = FrequencyTable::from_counts(&counts);
            debug!(
                column = %spec.name,
                symbols = table.len(),
                entropy_bits = table.entropy_bits(),
                "trained column table"
            );
            tables.push(Some(table));
        }
        Dictionary::new(self.schema.name(), tables)
    }
}
