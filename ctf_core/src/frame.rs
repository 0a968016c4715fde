//! Typed column arrays and the named set of them that makes up one frame.

use crate::schema::Width;

/// One fixed-width integer array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnData {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
}

impl ColumnData {
    pub fn empty(width: Width) -> Self {
        match width {
            Width::U8 => ColumnData::U8(Vec::new()),
            Width::U16 => ColumnData::U16(Vec::new()),
            Width::U32 => ColumnData::U32(Vec::new()),
            Width::U64 => ColumnData::U64(Vec::new()),
        }
    }

    pub fn width(&self) -> Width {
        match self {
            ColumnData::U8(_) => Width::U8,
            ColumnData::U16(_) => Width::U16,
            ColumnData::U32(_) => Width::U32,
            ColumnData::U64(_) => Width::U64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::U8(v) => v.len(),
            ColumnData::U16(v) => v.len(),
            ColumnData::U32(v) => v.len(),
            ColumnData::U64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widen every element to a `u64` symbol.
    pub fn to_symbols(&self) -> Vec<u64> {
        match self {
            ColumnData::U8(v) => v.iter().map(|&x| x as u64).collect(),
            ColumnData::U16(v) => v.iter().map(|&x| x as u64).collect(),
            ColumnData::U32(v) => v.iter().map(|&x| x as u64).collect(),
            ColumnData::U64(v) => v.clone(),
        }
    }

    /// Sum of all elements, saturating at `u64::MAX`.
    pub fn sum(&self) -> u64 {
        fn fold<T: Copy + Into<u64>>(v: &[T]) -> u64 {
            v.iter().fold(0u64, |acc, &x| acc.saturating_add(x.into()))
        }
        match self {
            ColumnData::U8(v) => fold(v),
            ColumnData::U16(v) => fold(v),
            ColumnData::U32(v) => fold(v),
            ColumnData::U64(v) => fold(v),
        }
    }

    /// Narrow decoded symbols back to `width`. Codecs only produce symbols
    /// that fit, so truncation never discards bits here.
    pub fn from_symbols(width: Width, symbols: Vec<u64>) -> Self {
        match width {
            Width::U8 => ColumnData::U8(symbols.into_iter().map(|s| s as u8).collect()),
            Width::U16 => ColumnData::U16(symbols.into_iter().map(|s| s as u16).collect()),
            Width::U32 => ColumnData::U32(symbols.into_iter().map(|s| s as u32).collect()),
            Width::U64 => ColumnData::U64(symbols),
        }
    }
}

impl From<Vec<u8>> for ColumnData {
    fn from(v: Vec<u8>) -> Self {
        ColumnData::U8(v)
    }
}

impl From<Vec<u16>> for ColumnData {
    fn from(v: Vec<u16>) -> Self {
        ColumnData::U16(v)
    }
}

impl From<Vec<u32>> for ColumnData {
    fn from(v: Vec<u32>) -> Self {
        ColumnData::U32(v)
    }
}

impl From<Vec<u64>> for ColumnData {
    fn from(v: Vec<u64>) -> Self {
        ColumnData::U64(v)
    }
}

/// Named columns of one processing interval.
///
/// Insertion order is kept; decoded frames come back in schema order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    columns: Vec<(String, ColumnData)>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the column `name`.
    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<ColumnData>) {
        let name = name.into();
        let data = data.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = data,
            None => self.columns.push((name, data)),
        }
    }

    /// Builder-style [`Frame::insert`].
    pub fn with(mut self, name: impl Into<String>, data: impl Into<ColumnData>) -> Self {
        self.insert(name, data);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ColumnData> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    /// Remove and return the column `name`.
    pub fn take(&mut self, name: &str) -> Option<ColumnData> {
        let pos = self.columns.iter().position(|(n, _)| n == name)?;
        Some(self.columns.remove(pos).1)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnData)> {
        self.columns.iter().map(|(n, d)| (n.as_str(), d))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_existing_column() {
        let mut f = Frame::new().with("a", vec![1u8, 2]).with("b", vec![3u16]);
        f.insert("a", vec![9u8]);
        assert_eq!(f.len(), 2);
        assert_eq!(f.get("a"), Some(&ColumnData::U8(vec![9])));
        assert_eq!(f.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn symbols_round_trip_through_width() {
        let col = ColumnData::U16(vec![0, 1, u16::MAX]);
        let back = ColumnData::from_symbols(Width::U16, col.to_symbols());
        assert_eq!(back, col);
        assert_eq!(col.sum(), 1 + u16::MAX as u64);
    }
}
