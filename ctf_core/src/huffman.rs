//! Canonical, length-limited prefix codes derived from a [`FrequencyTable`].
//!
//! The code is a pure function of the table: lengths come from a Huffman tree
//! built with ties broken by symbol order, are limited to [`MAX_CODE_LEN`]
//! bits, and are then reassigned by descending frequency so that encoder and
//! decoder derive identical codes from the same table.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::bits::{BitReader, BitWriter};
use crate::error::{CtfError, Result};
use crate::table::FrequencyTable;

/// Longest code emitted.
pub const MAX_CODE_LEN: u32 = 32;

/// Alphabets narrower than this use a direct-indexed encode table.
const DENSE_SPAN: u64 = 1 << 16;

/// Marks an unused slot in the dense encode table.
const ABSENT: u8 = u8::MAX;

#[derive(Debug, Clone)]
enum EncodeTable {
    Dense { base: u64, codes: Vec<(u32, u8)> },
    Sparse(Vec<(u64, u32, u8)>),
}

/// Encoder and decoder state of one column's prefix code.
#[derive(Debug, Clone)]
pub struct HuffmanCode {
    encode: EncodeTable,
    /// Symbols ordered by (code length, symbol).
    sorted: Vec<u64>,
    first_code: [u64; MAX_CODE_LEN as usize + 1],
    first_index: [usize; MAX_CODE_LEN as usize + 1],
    count: [u64; MAX_CODE_LEN as usize + 1],
    min_len: u32,
    max_len: u32,
}

impl HuffmanCode {
    pub fn from_table(table: &FrequencyTable) -> Self {
        let lengths = code_lengths(table.entries());

        let mut order: Vec<usize> = (0..lengths.len()).collect();
        order.sort_by_key(|&i| (lengths[i], table.entries()[i].0));

        let mut count = [0u64; MAX_CODE_LEN as usize + 1];
        for &l in &lengths {
            count[l as usize] += 1;
        }

        let mut first_code = [0u64; MAX_CODE_LEN as usize + 1];
        let mut first_index = [0usize; MAX_CODE_LEN as usize + 1];
        let mut code = 0u64;
        let mut index = count[0] as usize;
        for l in 1..=MAX_CODE_LEN as usize {
            code = (code + if l > 1 { count[l - 1] } else { 0 }) << 1;
            first_code[l] = code;
            first_index[l] = index;
            index += count[l] as usize;
        }

        let mut codes: Vec<(u64, u32, u8)> = Vec::with_capacity(lengths.len());
        let mut next = first_code;
        for &i in &order {
            let l = lengths[i] as usize;
            let c = if l == 0 { 0 } else { next[l] };
            next[l] += 1;
            codes.push((table.entries()[i].0, c as u32, l as u8));
        }
        let sorted: Vec<u64> = codes.iter().map(|c| c.0).collect();

        let encode = if !table.is_empty() && table.max() - table.min() < DENSE_SPAN {
            let base = table.min();
            let mut dense = vec![(0u32, ABSENT); (table.max() - base + 1) as usize];
            for &(s, c, l) in &codes {
                dense[(s - base) as usize] = (c, l);
            }
            EncodeTable::Dense { base, codes: dense }
        } else {
            let mut by_symbol = codes;
            by_symbol.sort_unstable_by_key(|c| c.0);
            EncodeTable::Sparse(by_symbol)
        };

        let min_len = lengths.iter().copied().min().unwrap_or(0);
        let max_len = lengths.iter().copied().max().unwrap_or(0);
        Self {
            encode,
            sorted,
            first_code,
            first_index,
            count,
            min_len,
            max_len,
        }
    }

    /// Number of symbols the code can represent.
    pub fn alphabet_len(&self) -> usize {
        self.sorted.len()
    }

    pub fn max_len(&self) -> u32 {
        self.max_len
    }

    fn lookup(&self, symbol: u64) -> Option<(u32, u32)> {
        match &self.encode {
            EncodeTable::Dense { base, codes } => {
                let idx = symbol.checked_sub(*base)?;
                let &(c, l) = codes.get(usize::try_from(idx).ok()?)?;
                (l != ABSENT).then_some((c, l as u32))
            }
            EncodeTable::Sparse(codes) => {
                let i = codes.binary_search_by_key(&symbol, |c| c.0).ok()?;
                Some((codes[i].1, codes[i].2 as u32))
            }
        }
    }

    /// Exact encoded size in bits, or the first symbol outside the alphabet.
    pub fn encoded_bits(&self, symbols: &[u64]) -> std::result::Result<u64, u64> {
        symbols.iter().try_fold(0u64, |acc, &s| {
            self.lookup(s).map(|(_, l)| acc + l as u64).ok_or(s)
        })
    }

    /// Encode `symbols`; the first symbol outside the alphabet is returned as
    /// the error value.
    pub fn encode(&self, symbols: &[u64]) -> std::result::Result<Vec<u8>, u64> {
        let bits = self.encoded_bits(symbols)?;
        let mut w = BitWriter::with_capacity(bits.div_ceil(8) as usize);
        for &s in symbols {
            // encoded_bits() already proved every symbol present
            let (c, l) = self.lookup(s).ok_or(s)?;
            w.write(c as u64, l);
        }
        Ok(w.finish())
    }

    /// Decode exactly `count` symbols from `payload`.
    pub fn decode(&self, payload: &[u8], count: usize) -> Result<Vec<u64>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if self.sorted.is_empty() {
            return Err(CtfError::CorruptBlock(format!(
                "{count} symbols declared for an empty alphabet"
            )));
        }
        if self.max_len == 0 {
            if !payload.is_empty() {
                return Err(CtfError::CorruptBlock(format!(
                    "{} payload bytes for a single-symbol alphabet",
                    payload.len()
                )));
            }
            let mut out = Vec::new();
            out.try_reserve_exact(count)
                .map_err(|_| CtfError::AllocationFailure(count * 8))?;
            out.resize(count, self.sorted[0]);
            return Ok(out);
        }
        if (payload.len() as u64 * 8) < count as u64 * self.min_len as u64 {
            return Err(CtfError::truncated(format!(
                "{} payload bytes cannot hold {count} codes",
                payload.len()
            )));
        }

        let mut out = Vec::with_capacity(count);
        let mut r = BitReader::new(payload);
        for _ in 0..count {
            let window = r.peek(self.max_len);
            let mut found = None;
            for l in self.min_len..=self.max_len {
                let li = l as usize;
                if self.count[li] == 0 {
                    continue;
                }
                let c = window >> (self.max_len - l);
                if c >= self.first_code[li] && c - self.first_code[li] < self.count[li] {
                    found = Some((l, self.first_index[li] + (c - self.first_code[li]) as usize));
                    break;
                }
            }
            match found {
                Some((l, idx)) => {
                    r.consume(l)?;
                    out.push(self.sorted[idx]);
                }
                None if r.remaining() < self.max_len as u64 => {
                    return Err(CtfError::truncated("bitstream ended inside a code"));
                }
                None => return Err(CtfError::CorruptBlock("bit pattern matches no code".into())),
            }
        }
        r.finish()?;
        Ok(out)
    }
}

/// Code length per table entry (same order as `entries`).
fn code_lengths(entries: &[(u64, u32)]) -> Vec<u32> {
    let n = entries.len();
    if n <= 1 {
        return vec![0; n];
    }

    // Huffman tree: leaves 0..n, internal nodes n..2n-1; ties go to the
    // lower node index so the tree only depends on the table.
    let mut parent = vec![0usize; 2 * n - 1];
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> = entries
        .iter()
        .enumerate()
        .map(|(i, &(_, f))| Reverse((f as u64, i)))
        .collect();
    let mut next = n;
    while heap.len() > 1 {
        let Some(Reverse((wa, a))) = heap.pop() else { break };
        let Some(Reverse((wb, b))) = heap.pop() else { break };
        parent[a] = next;
        parent[b] = next;
        heap.push(Reverse((wa + wb, next)));
        next += 1;
    }
    let root = next - 1;
    let mut depth = vec![0u32; 2 * n - 1];
    for i in (0..root).rev() {
        depth[i] = depth[parent[i]] + 1;
    }

    // Limit to MAX_CODE_LEN by redistributing Kraft mass.
    let mut bl_count = [0u64; MAX_CODE_LEN as usize + 1];
    for &d in &depth[..n] {
        bl_count[d.min(MAX_CODE_LEN) as usize] += 1;
    }
    let max = MAX_CODE_LEN as usize;
    let mut total: u64 = (1..=max).map(|l| bl_count[l] << (max - l)).sum();
    while total > 1u64 << max {
        bl_count[max] -= 1;
        for l in (1..max).rev() {
            if bl_count[l] != 0 {
                bl_count[l] -= 1;
                bl_count[l + 1] += 2;
                break;
            }
        }
        total -= 1;
    }

    // Shortest lengths go to the most frequent symbols.
    let mut by_freq: Vec<usize> = (0..n).collect();
    by_freq.sort_by_key(|&i| (Reverse(entries[i].1), entries[i].0));
    let mut lengths = vec![0u32; n];
    let mut slots = by_freq.into_iter();
    for l in 1..=max {
        for _ in 0..bl_count[l] {
            if let Some(i) = slots.next() {
                lengths[i] = l as u32;
            }
        }
    }
    lengths
}
