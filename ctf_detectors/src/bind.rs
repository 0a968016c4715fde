//! Typed access to named frame columns.

use ctf_core::{ColumnData, CtfError, Frame, Result};

/// Element types a [`ColumnData`] can be unwrapped into.
pub(crate) trait Element: Sized {
    fn unwrap_column(data: ColumnData) -> std::result::Result<Vec<Self>, ColumnData>;
}

macro_rules! element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            fn unwrap_column(data: ColumnData) -> std::result::Result<Vec<Self>, ColumnData> {
                match data {
                    ColumnData::$variant(v) => Ok(v),
                    other => Err(other),
                }
            }
        }
    };
}

element!(u8, U8);
element!(u16, U16);
element!(u32, U32);

/// Remove column `name` from `frame` as a `Vec<T>`.
pub(crate) fn take<T: Element>(frame: &mut Frame, name: &str) -> Result<Vec<T>> {
    let data = frame
        .take(name)
        .ok_or_else(|| CtfError::MissingColumn(name.to_string()))?;
    T::unwrap_column(data).map_err(|other| {
        CtfError::SchemaMismatch(format!(
            "column '{name}' holds {}-bit values",
            other.width().bits()
        ))
    })
}

/// Fail unless every entry column has `expected` elements.
pub(crate) fn check_lengths(group: &str, expected: usize, lengths: &[(&str, usize)]) -> Result<()> {
    match lengths.iter().find(|(_, len)| *len != expected) {
        Some((name, len)) => Err(CtfError::ArityMismatch(format!(
            "{group} column '{name}' holds {len} values, expected {expected}"
        ))),
        None => Ok(()),
    }
}
