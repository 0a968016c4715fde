use crate::codec::{BlockMeta, ColumnCodec, ColumnContext};
use crate::error::Result;
use crate::schema::StoreMode;

use super::{from_le_bytes, to_le_bytes};

/// No-op codec: stores values verbatim as little-endian integers.
///
/// Useful for:
/// - Verifying the container round-trip independently of any coding.
/// - Columns with near-uniform distributions where coding cannot win.
pub struct StoreCodec;

impl ColumnCodec for StoreCodec {
    fn mode(&self) -> StoreMode {
        StoreMode::Store
    }

    fn name(&self) -> &'static str {
        "store"
    }

    fn encode_column(
        &self,
        symbols: &[u64],
        ctx: &ColumnContext<'_>,
        _meta: &mut BlockMeta,
    ) -> Result<Vec<u8>> {
        ctx.check_width(symbols)?;
        Ok(to_le_bytes(symbols, ctx.width))
    }

    fn decode_column(
        &self,
        payload: &[u8],
        ctx: &ColumnContext<'_>,
        _meta: &BlockMeta,
        count: usize,
    ) -> Result<Vec<u64>> {
        from_le_bytes(payload, ctx.width, count)
    }
}
