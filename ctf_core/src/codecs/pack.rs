use crate::bits::{read_varint, write_varint, BitReader, BitWriter};
use crate::codec::{BlockMeta, ColumnCodec, ColumnContext};
use crate::error::{CtfError, Result};
use crate::schema::StoreMode;

/// Fixed-width bit packing of `value - min`.
///
/// Sidecar: `min` as a varint followed by one byte holding the bit width.
/// Suited to narrow flag/status columns where a table would cost more than
/// it saves.
pub struct PackCodec;

impl ColumnCodec for PackCodec {
    fn mode(&self) -> StoreMode {
        StoreMode::Pack
    }

    fn name(&self) -> &'static str {
        "pack"
    }

    fn encode_column(
        &self,
        symbols: &[u64],
        ctx: &ColumnContext<'_>,
        meta: &mut BlockMeta,
    ) -> Result<Vec<u8>> {
        ctx.check_width(symbols)?;
        let min = symbols.iter().copied().min().unwrap_or(0);
        let max = symbols.iter().copied().max().unwrap_or(0);
        let bits = 64 - (max - min).leading_zeros();

        write_varint(&mut meta.sidecar, min);
        meta.sidecar.push(bits as u8);

        let total_bits = symbols.len() as u64 * bits as u64;
        let mut w = BitWriter::with_capacity(total_bits.div_ceil(8) as usize);
        for &s in symbols {
            w.write(s - min, bits);
        }
        Ok(w.finish())
    }

    fn decode_column(
        &self,
        payload: &[u8],
        ctx: &ColumnContext<'_>,
        meta: &BlockMeta,
        count: usize,
    ) -> Result<Vec<u64>> {
        let bad = |msg: &str| CtfError::CorruptBlock(format!("column '{}': {msg}", ctx.name));
        let mut pos = 0;
        let min = read_varint(&meta.sidecar, &mut pos).ok_or_else(|| bad("truncated pack offset"))?;
        let bits = *meta.sidecar.get(pos).ok_or_else(|| bad("missing pack width"))? as u32;
        if pos + 1 != meta.sidecar.len() || bits > ctx.width.bits() {
            return Err(bad("malformed pack parameters"));
        }

        let needed = (count as u64 * bits as u64).div_ceil(8);
        if (payload.len() as u64) < needed {
            return Err(CtfError::truncated(format!(
                "column '{}': {} of {needed} packed bytes",
                ctx.name,
                payload.len()
            )));
        }
        if payload.len() as u64 > needed {
            return Err(bad(&format!(
                "{} packed bytes left over after {count} values",
                payload.len() as u64 - needed
            )));
        }

        let max = ctx.width.max_symbol();
        let mut r = BitReader::new(payload);
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let v = min
                .checked_add(r.read(bits)?)
                .filter(|&v| v <= max)
                .ok_or_else(|| bad("packed value exceeds column width"))?;
            out.push(v);
        }
        r.finish().map_err(|e| bad(&e.to_string()))?;
        Ok(out)
    }
}
