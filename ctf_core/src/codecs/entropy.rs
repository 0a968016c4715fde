use crate::codec::{BlockMeta, ColumnCodec, ColumnContext};
use crate::error::{CtfError, Result};
use crate::huffman::HuffmanCode;
use crate::schema::StoreMode;
use crate::table::FrequencyTable;

/// Canonical prefix coding of a column.
///
/// With an external dictionary the column's pre-trained code is used and the
/// block carries no side data. Without one, a table is counted from the data
/// itself and embedded in the sidecar; a block that embeds its table always
/// decodes with that table.
pub struct EntropyCodec;

impl ColumnCodec for EntropyCodec {
    fn mode(&self) -> StoreMode {
        StoreMode::Entropy
    }

    fn name(&self) -> &'static str {
        "entropy"
    }

    fn encode_column(
        &self,
        symbols: &[u64],
        ctx: &ColumnContext<'_>,
        meta: &mut BlockMeta,
    ) -> Result<Vec<u8>> {
        if let Some(coding) = ctx.coding {
            meta.embedded_table = false;
            return coding.code.encode(symbols).map_err(|s| ctx.out_of_range(s));
        }

        ctx.check_width(symbols)?;
        let table = FrequencyTable::from_symbols(symbols);
        table.write_to(&mut meta.sidecar);
        meta.embedded_table = true;
        HuffmanCode::from_table(&table)
            .encode(symbols)
            .map_err(|s| ctx.out_of_range(s))
    }

    fn decode_column(
        &self,
        payload: &[u8],
        ctx: &ColumnContext<'_>,
        meta: &BlockMeta,
        count: usize,
    ) -> Result<Vec<u64>> {
        if meta.embedded_table {
            let mut pos = 0;
            let table = FrequencyTable::read_from(&meta.sidecar, &mut pos)
                .map_err(|e| CtfError::CorruptBlock(format!("column '{}' table: {e}", ctx.name)))?;
            if pos != meta.sidecar.len() {
                return Err(CtfError::CorruptBlock(format!(
                    "column '{}' table followed by {} stray bytes",
                    ctx.name,
                    meta.sidecar.len() - pos
                )));
            }
            if !table.is_empty() && table.max() > ctx.width.max_symbol() {
                return Err(CtfError::CorruptBlock(format!(
                    "column '{}' table exceeds {}-bit width",
                    ctx.name,
                    ctx.width.bits()
                )));
            }
            return HuffmanCode::from_table(&table).decode(payload, count);
        }

        match ctx.coding {
            Some(coding) => coding.code.decode(payload, count),
            None => Err(CtfError::MissingDictionary(ctx.name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_block, encode_block};
    use crate::dictionary::Dictionary;
    use crate::schema::Width;

    #[test]
    fn embedded_table_round_trip() {
        let ctx = ColumnContext::new("energy", Width::U16);
        let input = vec![3, 3, 3, 17, 900, 3, 17];
        let (meta, payload) = encode_block(&EntropyCodec, &input, &ctx).unwrap();
        assert!(meta.embedded_table);
        // 7 symbols of a 3-symbol alphabet fit in two bytes
        assert!(payload.len() <= 2);
        let out = decode_block(&EntropyCodec, &payload, &ctx, &meta, input.len()).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn external_table_rejects_unknown_symbols() {
        let table = FrequencyTable::new(0, 10, vec![(1, 5), (2, 5)]).unwrap();
        let dict = Dictionary::new("T", vec![Some(table)]).unwrap();
        let ctx = ColumnContext {
            name: "c",
            width: Width::U8,
            coding: dict.coding(0),
        };
        let mut meta = BlockMeta::default();
        let err = EntropyCodec.encode_column(&[1, 2, 3], &ctx, &mut meta).unwrap_err();
        assert!(matches!(err, CtfError::SymbolOutOfRange { symbol: 3, .. }));
    }

    #[test]
    fn external_block_without_dictionary_is_refused() {
        let ctx = ColumnContext::new("c", Width::U8);
        let err = EntropyCodec
            .decode_column(&[0], &ctx, &BlockMeta::default(), 1)
            .unwrap_err();
        assert!(matches!(err, CtfError::MissingDictionary(_)));
    }
}
