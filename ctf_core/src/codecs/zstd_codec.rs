use crate::codec::{BlockMeta, ColumnCodec, ColumnContext};
use crate::error::{CtfError, Result};
use crate::schema::StoreMode;

use super::{from_le_bytes, to_le_bytes};

/// Compression level used for every Zstd block. Not recorded in the buffer.
pub const ZSTD_LEVEL: i32 = 3;

/// Zstandard over the column's little-endian bytes.
///
/// Best for: wide columns with long repeated runs, where a per-symbol code
/// cannot exploit the repetition.
pub struct ZstdCodec;

impl ColumnCodec for ZstdCodec {
    fn mode(&self) -> StoreMode {
        StoreMode::Zstd
    }

    fn name(&self) -> &'static str {
        "zstd"
    }

    fn encode_column(
        &self,
        symbols: &[u64],
        ctx: &ColumnContext<'_>,
        _meta: &mut BlockMeta,
    ) -> Result<Vec<u8>> {
        ctx.check_width(symbols)?;
        let raw = to_le_bytes(symbols, ctx.width);
        Ok(zstd::bulk::compress(&raw, ZSTD_LEVEL)?)
    }

    fn decode_column(
        &self,
        payload: &[u8],
        ctx: &ColumnContext<'_>,
        _meta: &BlockMeta,
        count: usize,
    ) -> Result<Vec<u64>> {
        // The expected raw size doubles as the decompression bound, so a
        // corrupt frame cannot make us allocate more than the column needs.
        let expected = count.saturating_mul(ctx.width.bytes());
        let raw = zstd::bulk::decompress(payload, expected)
            .map_err(|e| CtfError::CorruptBlock(format!("column '{}': zstd: {e}", ctx.name)))?;
        from_le_bytes(&raw, ctx.width, count).map_err(|e| match e {
            CtfError::TruncatedBuffer(msg) => CtfError::CorruptBlock(msg),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Width;

    #[test]
    fn repetitive_column_shrinks() {
        let ctx = ColumnContext::new("orbit", Width::U32);
        let input: Vec<u64> = (0..4096).map(|i| (i % 4) as u64).collect();
        let mut meta = BlockMeta::default();
        let payload = ZstdCodec.encode_column(&input, &ctx, &mut meta).unwrap();
        assert!(payload.len() < input.len());
        let out = ZstdCodec
            .decode_column(&payload, &ctx, &meta, input.len())
            .unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn blocks_use_the_fixed_level() {
        let ctx = ColumnContext::new("energy", Width::U16);
        let input: Vec<u64> = (0..2000).map(|i| (i * 7 % 300) as u64).collect();
        let mut meta = BlockMeta::default();
        let payload = crate::codec::codec_for(StoreMode::Zstd)
            .encode_column(&input, &ctx, &mut meta)
            .unwrap();
        let expected = zstd::bulk::compress(&to_le_bytes(&input, Width::U16), ZSTD_LEVEL).unwrap();
        assert_eq!(payload, expected);
    }
}
