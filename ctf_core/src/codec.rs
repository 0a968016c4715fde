use crate::codecs::{EntropyCodec, Lz4Codec, PackCodec, StoreCodec, ZstdCodec};
use crate::dictionary::ColumnCoding;
use crate::error::{CtfError, Result};
use crate::schema::{StoreMode, Width};
use crate::table::FrequencyTable;

/// Per-block side data written and read by the codec.
///
/// For Store, Zstd and Lz4 blocks the sidecar is empty. Entropy blocks coded
/// without an external dictionary carry their frequency table here, and Pack
/// blocks carry their offset and bit width, which makes every block
/// decodable on its own.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct BlockMeta {
    pub sidecar: Vec<u8>,
    /// The sidecar holds a serialized [`FrequencyTable`].
    pub embedded_table: bool,
}

/// What a codec knows about the column it is working on.
#[derive(Debug, Clone, Copy)]
pub struct ColumnContext<'a> {
    pub name: &'a str,
    pub width: Width,
    pub(crate) coding: Option<&'a ColumnCoding>,
}

impl<'a> ColumnContext<'a> {
    /// Context without an external table.
    pub fn new(name: &'a str, width: Width) -> Self {
        Self {
            name,
            width,
            coding: None,
        }
    }

    /// The external dictionary table for this column, if any.
    pub fn table(&self) -> Option<&'a FrequencyTable> {
        self.coding.map(|c| &c.table)
    }

    pub(crate) fn out_of_range(&self, symbol: u64) -> CtfError {
        CtfError::SymbolOutOfRange {
            column: self.name.to_string(),
            symbol,
        }
    }

    /// Reject the first symbol that does not fit the column width.
    pub(crate) fn check_width(&self, symbols: &[u64]) -> Result<()> {
        let max = self.width.max_symbol();
        match symbols.iter().find(|&&s| s > max) {
            Some(&s) => Err(self.out_of_range(s)),
            None => Ok(()),
        }
    }
}

/// Column compression abstraction.
///
/// Each `ColumnCodec` implementation:
/// - Is identified by the [`StoreMode`] recorded in the block's directory entry.
/// - Codes one column independently: blocks share no state, so columns can be
///   encoded and decoded in any order or in parallel.
/// - May write side data into `BlockMeta.sidecar`; it is stored in front of
///   the payload and handed back verbatim on decode.
pub trait ColumnCodec: Send + Sync {
    fn mode(&self) -> StoreMode;

    /// Human-readable name for reports.
    fn name(&self) -> &'static str;

    /// Encode one column's symbols.
    fn encode_column(
        &self,
        symbols: &[u64],
        ctx: &ColumnContext<'_>,
        meta: &mut BlockMeta,
    ) -> Result<Vec<u8>>;

    /// Decode exactly `count` symbols.
    fn decode_column(
        &self,
        payload: &[u8],
        ctx: &ColumnContext<'_>,
        meta: &BlockMeta,
        count: usize,
    ) -> Result<Vec<u64>>;
}

static ENTROPY: EntropyCodec = EntropyCodec;
static PACK: PackCodec = PackCodec;
static STORE: StoreCodec = StoreCodec;
static ZSTD: ZstdCodec = ZstdCodec;
static LZ4: Lz4Codec = Lz4Codec;

/// Resolve the codec for a store mode.
pub fn codec_for(mode: StoreMode) -> &'static dyn ColumnCodec {
    match mode {
        StoreMode::Entropy => &ENTROPY,
        StoreMode::Pack => &PACK,
        StoreMode::Store => &STORE,
        StoreMode::Zstd => &ZSTD,
        StoreMode::Lz4 => &LZ4,
    }
}

/// Encode a column, producing a zero-length block for an empty column
/// whatever the mode.
pub fn encode_block(
    codec: &dyn ColumnCodec,
    symbols: &[u64],
    ctx: &ColumnContext<'_>,
) -> Result<(BlockMeta, Vec<u8>)> {
    let mut meta = BlockMeta::default();
    if symbols.is_empty() {
        return Ok((meta, Vec::new()));
    }
    let payload = codec.encode_column(symbols, ctx, &mut meta)?;
    Ok((meta, payload))
}

/// Mirror of [`encode_block`].
pub fn decode_block(
    codec: &dyn ColumnCodec,
    payload: &[u8],
    ctx: &ColumnContext<'_>,
    meta: &BlockMeta,
    count: usize,
) -> Result<Vec<u64>> {
    if count == 0 {
        if !payload.is_empty() || !meta.sidecar.is_empty() {
            return Err(CtfError::CorruptBlock(format!(
                "empty column '{}' carries {} bytes",
                ctx.name,
                payload.len() + meta.sidecar.len()
            )));
        }
        return Ok(Vec::new());
    }
    let symbols = codec.decode_column(payload, ctx, meta, count)?;
    if symbols.len() != count {
        return Err(CtfError::CorruptBlock(format!(
            "column '{}' decoded {} of {} elements",
            ctx.name,
            symbols.len(),
            count
        )));
    }
    Ok(symbols)
}
