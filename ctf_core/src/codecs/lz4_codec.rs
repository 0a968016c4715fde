use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use crate::codec::{BlockMeta, ColumnCodec, ColumnContext};
use crate::error::{CtfError, Result};
use crate::schema::StoreMode;

use super::{from_le_bytes, to_le_bytes};

/// LZ4 over the column's little-endian bytes.
///
/// Fastest decode of the compressing modes; best for hot columns where decode
/// latency matters more than size.
pub struct Lz4Codec;

impl ColumnCodec for Lz4Codec {
    fn mode(&self) -> StoreMode {
        StoreMode::Lz4
    }

    fn name(&self) -> &'static str {
        "lz4"
    }

    fn encode_column(
        &self,
        symbols: &[u64],
        ctx: &ColumnContext<'_>,
        _meta: &mut BlockMeta,
    ) -> Result<Vec<u8>> {
        ctx.check_width(symbols)?;
        Ok(compress_prepend_size(&to_le_bytes(symbols, ctx.width)))
    }

    fn decode_column(
        &self,
        payload: &[u8],
        ctx: &ColumnContext<'_>,
        _meta: &BlockMeta,
        count: usize,
    ) -> Result<Vec<u64>> {
        let bad = |msg: String| CtfError::CorruptBlock(format!("column '{}': {msg}", ctx.name));
        let expected = count.saturating_mul(ctx.width.bytes());
        let declared = payload
            .get(..4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
            .ok_or_else(|| CtfError::truncated(format!("column '{}': lz4 size prefix", ctx.name)))?;
        if declared != expected {
            return Err(bad(format!("lz4 frame holds {declared} bytes, expected {expected}")));
        }
        let raw = decompress_size_prepended(payload).map_err(|e| bad(format!("lz4: {e}")))?;
        from_le_bytes(&raw, ctx.width, count)
    }
}
