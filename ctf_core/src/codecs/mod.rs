mod entropy;
mod lz4_codec;
mod pack;
mod store;
mod zstd_codec;

pub use entropy::EntropyCodec;
pub use lz4_codec::Lz4Codec;
pub use pack::PackCodec;
pub use store::StoreCodec;
pub use zstd_codec::ZstdCodec;

use crate::error::{CtfError, Result};
use crate::schema::Width;

/// Little-endian bytes of `symbols` at `width`.
pub(crate) fn to_le_bytes(symbols: &[u64], width: Width) -> Vec<u8> {
    let n = width.bytes();
    let mut out = Vec::with_capacity(symbols.len() * n);
    for &s in symbols {
        out.extend_from_slice(&s.to_le_bytes()[..n]);
    }
    out
}

/// Parse exactly `count` little-endian values of `width` from `bytes`.
pub(crate) fn from_le_bytes(bytes: &[u8], width: Width, count: usize) -> Result<Vec<u64>> {
    let n = width.bytes();
    let expected = count
        .checked_mul(n)
        .ok_or_else(|| CtfError::CorruptBlock(format!("{count} elements overflow")))?;
    if bytes.len() < expected {
        return Err(CtfError::truncated(format!(
            "{} bytes for {count} {}-bit values",
            bytes.len(),
            width.bits()
        )));
    }
    if bytes.len() > expected {
        return Err(CtfError::CorruptBlock(format!(
            "{} bytes left over after {count} values",
            bytes.len() - expected
        )));
    }
    Ok(bytes
        .chunks_exact(n)
        .map(|c| {
            let mut b = [0u8; 8];
            b[..n].copy_from_slice(c);
            u64::from_le_bytes(b)
        })
        .collect())
}
