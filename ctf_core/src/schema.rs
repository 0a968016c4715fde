//! Column and group descriptions that fix the layout of one detector's frame.

use xxhash_rust::xxh3::Xxh3;

use crate::error::{CtfError, Result};
use crate::format::MAX_COLUMNS;

/// Fixed width of every element in a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    U8,
    U16,
    U32,
    U64,
}

impl Width {
    pub fn bits(self) -> u32 {
        match self {
            Width::U8 => 8,
            Width::U16 => 16,
            Width::U32 => 32,
            Width::U64 => 64,
        }
    }

    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    /// Largest symbol representable at this width.
    pub fn max_symbol(self) -> u64 {
        match self {
            Width::U64 => u64::MAX,
            w => (1u64 << w.bits()) - 1,
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Width::U8 => 1,
            Width::U16 => 2,
            Width::U32 => 4,
            Width::U64 => 8,
        }
    }
}

/// How a column's symbols are stored in its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreMode {
    /// Canonical prefix code driven by a frequency table.
    #[default]
    Entropy,
    /// `value - min` bit-packed at the minimal width.
    Pack,
    /// Raw little-endian values.
    Store,
    /// Raw little-endian values compressed with zstd.
    Zstd,
    /// Raw little-endian values compressed with lz4.
    Lz4,
}

impl StoreMode {
    pub const ALL: [StoreMode; 5] = [
        StoreMode::Entropy,
        StoreMode::Pack,
        StoreMode::Store,
        StoreMode::Zstd,
        StoreMode::Lz4,
    ];

    /// Stable id written into the directory.
    pub fn id(self) -> u8 {
        match self {
            StoreMode::Entropy => 0,
            StoreMode::Pack => 1,
            StoreMode::Store => 2,
            StoreMode::Zstd => 3,
            StoreMode::Lz4 => 4,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.id() == id)
    }

    pub fn uses_dictionary(self) -> bool {
        self == StoreMode::Entropy
    }
}

/// One named column of a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    /// Index into [`Schema::groups`].
    pub group: usize,
    pub width: Width,
    pub mode: StoreMode,
}

/// A set of columns sharing one element count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub name: String,
    /// Column (of another group) whose values sum to this group's count.
    pub counted_by: Option<usize>,
}

/// Ordered column layout of one detector's frame.
///
/// Built once with [`SchemaBuilder`] and shared behind an `Arc`; the
/// fingerprint is recorded in every buffer so that a buffer is never decoded
/// against a different layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: String,
    groups: Vec<GroupSpec>,
    columns: Vec<ColumnSpec>,
    fingerprint: u64,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            groups: Vec::new(),
            columns: Vec::new(),
            counted_by: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> &[GroupSpec] {
        &self.groups
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&ColumnSpec> {
        self.columns.get(index)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn group_index(&self, name: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.name == name)
    }

    /// Columns belonging to group `group`, in schema order.
    pub fn group_columns(&self, group: usize) -> impl Iterator<Item = (usize, &ColumnSpec)> {
        self.columns
            .iter()
            .enumerate()
            .filter(move |(_, c)| c.group == group)
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Check that every group's count agrees with the column that counts it.
    ///
    /// `sum_of` returns the sum of a column's values.
    pub(crate) fn check_relations(
        &self,
        group_counts: &[u64],
        mut sum_of: impl FnMut(usize) -> u64,
    ) -> Result<()> {
        for (g, group) in self.groups.iter().enumerate() {
            if let Some(c) = group.counted_by {
                let total = sum_of(c);
                if total != group_counts[g] {
                    return Err(CtfError::ArityMismatch(format!(
                        "column '{}' sums to {} but group '{}' has {} entries",
                        self.columns[c].name, total, group.name, group_counts[g]
                    )));
                }
            }
        }
        Ok(())
    }

    fn compute_fingerprint(name: &str, groups: &[GroupSpec], columns: &[ColumnSpec]) -> u64 {
        let mut h = Xxh3::new();
        h.update(name.as_bytes());
        h.update(&[0]);
        for g in groups {
            h.update(g.name.as_bytes());
            h.update(&[0]);
            let counted = g.counted_by.map(|c| c as u64 + 1).unwrap_or(0);
            h.update(&counted.to_le_bytes());
        }
        for c in columns {
            h.update(c.name.as_bytes());
            h.update(&[0, c.width.id(), c.mode.id()]);
            h.update(&(c.group as u64).to_le_bytes());
        }
        h.digest()
    }
}

/// Incremental [`Schema`] construction.
///
/// ```
/// use ctf_core::{Schema, StoreMode, Width};
///
/// let schema = Schema::builder("CPV")
///     .group("triggers")
///     .column("entries", Width::U16, StoreMode::Entropy)
///     .group_counted_by("clusters", "entries")
///     .column("energy", Width::U16, StoreMode::Entropy)
///     .build()
///     .unwrap();
/// assert_eq!(schema.columns().len(), 2);
/// ```
pub struct SchemaBuilder {
    name: String,
    groups: Vec<GroupSpec>,
    columns: Vec<ColumnSpec>,
    counted_by: Vec<Option<String>>,
}

impl SchemaBuilder {
    /// Start a new group; subsequent columns belong to it.
    pub fn group(mut self, name: impl Into<String>) -> Self {
        self.groups.push(GroupSpec {
            name: name.into(),
            counted_by: None,
        });
        self.counted_by.push(None);
        self
    }

    /// Start a new group whose count equals the sum of `counter`'s values.
    pub fn group_counted_by(mut self, name: impl Into<String>, counter: impl Into<String>) -> Self {
        self.groups.push(GroupSpec {
            name: name.into(),
            counted_by: None,
        });
        self.counted_by.push(Some(counter.into()));
        self
    }

    pub fn column(mut self, name: impl Into<String>, width: Width, mode: StoreMode) -> Self {
        self.columns.push(ColumnSpec {
            name: name.into(),
            group: self.groups.len().wrapping_sub(1),
            width,
            mode,
        });
        self
    }

    pub fn build(self) -> Result<Schema> {
        let invalid = |msg: String| CtfError::InvalidConfig(format!("schema '{}': {msg}", self.name));

        if self.columns.is_empty() {
            return Err(invalid("no columns".into()));
        }
        if self.columns.len() > MAX_COLUMNS || self.groups.len() > MAX_COLUMNS {
            return Err(invalid("too many columns".into()));
        }
        for (i, c) in self.columns.iter().enumerate() {
            if c.group >= self.groups.len() {
                return Err(invalid(format!("column '{}' declared before any group", c.name)));
            }
            if self.columns[..i].iter().any(|o| o.name == c.name) {
                return Err(invalid(format!("duplicate column '{}'", c.name)));
            }
        }
        for (i, g) in self.groups.iter().enumerate() {
            if self.groups[..i].iter().any(|o| o.name == g.name) {
                return Err(invalid(format!("duplicate group '{}'", g.name)));
            }
            if !self.columns.iter().any(|c| c.group == i) {
                return Err(invalid(format!("group '{}' has no columns", g.name)));
            }
        }

        let mut groups = self.groups.clone();
        for (g, counter) in self.counted_by.iter().enumerate() {
            let Some(counter) = counter else { continue };
            let c = self
                .columns
                .iter()
                .position(|c| &c.name == counter)
                .ok_or_else(|| invalid(format!("unknown counting column '{counter}'")))?;
            if self.columns[c].group == g {
                return Err(invalid(format!(
                    "group '{}' cannot be counted by its own column",
                    groups[g].name
                )));
            }
            groups[g].counted_by = Some(c);
        }

        let fingerprint = Schema::compute_fingerprint(&self.name, &groups, &self.columns);
        Ok(Schema {
            name: self.name,
            groups,
            columns: self.columns,
            fingerprint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_group_schema(mode: StoreMode) -> Schema {
        Schema::builder("TEST")
            .group("triggers")
            .column("entries", Width::U16, StoreMode::Entropy)
            .group_counted_by("hits", "entries")
            .column("value", Width::U32, mode)
            .build()
            .unwrap()
    }

    #[test]
    fn fingerprint_depends_on_layout() {
        let a = two_group_schema(StoreMode::Entropy);
        let b = two_group_schema(StoreMode::Pack);
        assert_eq!(a.fingerprint(), two_group_schema(StoreMode::Entropy).fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn counted_by_resolves_to_column_index() {
        let s = two_group_schema(StoreMode::Entropy);
        assert_eq!(s.groups()[1].counted_by, Some(0));
        assert_eq!(s.group_columns(1).map(|(i, _)| i).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn builder_rejects_bad_layouts() {
        assert!(Schema::builder("X")
            .column("orphan", Width::U8, StoreMode::Store)
            .build()
            .is_err());
        assert!(Schema::builder("X")
            .group("g")
            .column("a", Width::U8, StoreMode::Store)
            .column("a", Width::U8, StoreMode::Store)
            .build()
            .is_err());
        assert!(Schema::builder("X")
            .group("g")
            .column("a", Width::U8, StoreMode::Store)
            .group_counted_by("h", "missing")
            .column("b", Width::U8, StoreMode::Store)
            .build()
            .is_err());
    }

    #[test]
    fn store_mode_ids_round_trip() {
        for mode in StoreMode::ALL {
            assert_eq!(StoreMode::from_id(mode.id()), Some(mode));
        }
        assert_eq!(StoreMode::from_id(200), None);
    }
}
