//! Per-column symbol frequency tables.

use std::collections::BTreeMap;

use crate::bits::{read_varint, varint_max_len, write_varint};

/// Symbol frequencies of one column over a declared alphabet `[min, max]`.
///
/// Entries are strictly ascending by symbol and every frequency is non-zero,
/// so the table's alphabet is exactly the set of listed symbols. An empty
/// table is legal and describes a column that never carries data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyTable {
    min: u64,
    max: u64,
    entries: Vec<(u64, u32)>,
}

impl FrequencyTable {
    /// Build a table from explicit entries, validating its consistency.
    pub fn new(min: u64, max: u64, entries: Vec<(u64, u32)>) -> Result<Self, String> {
        let table = Self { min, max, entries };
        table.validate()?;
        Ok(table)
    }

    /// Count the symbols of one column.
    pub fn from_symbols(symbols: &[u64]) -> Self {
        let mut sorted = symbols.to_vec();
        sorted.sort_unstable();
        let mut counts: Vec<(u64, u64)> = Vec::new();
        for s in sorted {
            match counts.last_mut() {
                Some((last, n)) if *last == s => *n += 1,
                _ => counts.push((s, 1)),
            }
        }
        Self::from_sorted_counts(counts)
    }

    /// Build from accumulated 64-bit counts, scaling them into `u32` while
    /// keeping every observed symbol representable.
    pub fn from_counts(counts: &BTreeMap<u64, u64>) -> Self {
        Self::from_sorted_counts(counts.iter().map(|(&s, &n)| (s, n)).filter(|&(_, n)| n > 0).collect())
    }

    fn from_sorted_counts(counts: Vec<(u64, u64)>) -> Self {
        let peak = counts.iter().map(|&(_, n)| n).max().unwrap_or(0);
        let divisor = if peak > u32::MAX as u64 {
            peak.div_ceil(u32::MAX as u64)
        } else {
            1
        };
        let entries: Vec<(u64, u32)> = counts
            .into_iter()
            .map(|(s, n)| (s, (n / divisor).max(1) as u32))
            .collect();
        let min = entries.first().map(|e| e.0).unwrap_or(0);
        let max = entries.last().map(|e| e.0).unwrap_or(0);
        Self { min, max, entries }
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn entries(&self) -> &[(u64, u32)] {
        &self.entries
    }

    /// Number of symbols in the alphabet.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(|&(_, f)| f as u64).sum()
    }

    pub fn contains(&self, symbol: u64) -> bool {
        self.entries.binary_search_by_key(&symbol, |e| e.0).is_ok()
    }

    /// Shannon entropy of the table in bits per symbol.
    pub fn entropy_bits(&self) -> f64 {
        let total = self.total() as f64;
        if total == 0.0 {
            return 0.0;
        }
        self.entries
            .iter()
            .map(|&(_, f)| {
                let p = f as f64 / total;
                -p * p.log2()
            })
            .sum()
    }

    fn validate(&self) -> Result<(), String> {
        if self.min > self.max {
            return Err(format!("min {} exceeds max {}", self.min, self.max));
        }
        let alphabet = (self.max - self.min) as u128 + 1;
        if self.entries.len() as u128 > alphabet {
            return Err(format!(
                "{} entries declared for an alphabet of {} symbols",
                self.entries.len(),
                alphabet
            ));
        }
        let mut prev: Option<u64> = None;
        for &(s, f) in &self.entries {
            if s < self.min || s > self.max {
                return Err(format!("symbol {s} outside [{}, {}]", self.min, self.max));
            }
            if prev.is_some_and(|p| p >= s) {
                return Err(format!("symbol {s} out of order"));
            }
            if f == 0 {
                return Err(format!("symbol {s} has zero frequency"));
            }
            prev = Some(s);
        }
        Ok(())
    }

    // ── Serialization ──────────────────────────────────────────────────────

    /// Append the table as varints: min, max, entry count, then per entry the
    /// gap to the previous symbol (first gap relative to `min`) and frequency.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        write_varint(out, self.min);
        write_varint(out, self.max);
        write_varint(out, self.entries.len() as u64);
        let mut prev = self.min;
        for &(s, f) in &self.entries {
            write_varint(out, s - prev);
            write_varint(out, f as u64);
            prev = s;
        }
    }

    /// Parse a table written by [`FrequencyTable::write_to`] at `*pos`.
    pub fn read_from(buf: &[u8], pos: &mut usize) -> Result<Self, String> {
        let min = next_varint(buf, pos, "min")?;
        let max = next_varint(buf, pos, "max")?;
        let count = next_varint(buf, pos, "entry count")?;
        // every entry occupies at least two bytes
        let remaining = buf.len().saturating_sub(*pos) as u64;
        if count > remaining / 2 {
            return Err(format!("{count} entries declared but only {remaining} bytes follow"));
        }
        let mut entries = Vec::with_capacity(count as usize);
        let mut prev = min;
        for _ in 0..count {
            let gap = next_varint(buf, pos, "symbol")?;
            let freq = next_varint(buf, pos, "frequency")?;
            let s = prev
                .checked_add(gap)
                .ok_or_else(|| "symbol overflows u64".to_string())?;
            let f = u32::try_from(freq).map_err(|_| format!("frequency {freq} exceeds u32"))?;
            entries.push((s, f));
            prev = s;
        }
        Self::new(min, max, entries)
    }

    /// Upper bound of the serialized size of a table built from `count`
    /// symbols of `bits` width.
    pub fn serialized_bound(count: usize, bits: u32) -> usize {
        let sym = varint_max_len(bits);
        3 * varint_max_len(64) + count * (sym + varint_max_len(32))
    }
}

fn next_varint(buf: &[u8], pos: &mut usize, what: &str) -> Result<u64, String> {
    read_varint(buf, pos).ok_or_else(|| format!("truncated {what}"))
}
