//! Trigger records shared by every detector, and their incremental columns.
//!
//! Orbits are stored as increments over the previous trigger, and bunch
//! crossings as increments too while the orbit stays the same. A new orbit
//! restarts the bunch crossing as an absolute value. Entry ranges are not
//! stored at all: only the per-trigger count goes into the buffer, and the
//! first entry is rebuilt as a running sum.

use ctf_core::{CtfError, Frame, Result};

use crate::bind::take;

pub const BC_INC: &str = "bc_inc";
pub const ORBIT_INC: &str = "orbit_inc";
pub const ENTRIES: &str = "entries";

/// One trigger and the range of entries (clusters, cells) it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerRecord {
    pub bc: u16,
    pub orbit: u32,
    pub first_entry: u32,
    pub n_entries: u32,
}

impl TriggerRecord {
    /// Entry index range of this trigger.
    pub fn entries(&self) -> std::ops::Range<usize> {
        let first = self.first_entry as usize;
        first..first + self.n_entries as usize
    }
}

/// Build `triggers` with cumulative first entries from `(bc, orbit, n)` tuples.
pub fn chain(records: impl IntoIterator<Item = (u16, u32, u32)>) -> Vec<TriggerRecord> {
    let mut first_entry = 0u32;
    records
        .into_iter()
        .map(|(bc, orbit, n_entries)| {
            let t = TriggerRecord {
                bc,
                orbit,
                first_entry,
                n_entries,
            };
            first_entry = first_entry.wrapping_add(n_entries);
            t
        })
        .collect()
}

/// Write the three trigger columns into `frame`.
///
/// `total_entries` is the length of the entry arrays; the triggers must
/// cover exactly `0..total_entries`, in order and without gaps.
pub(crate) fn insert_triggers(
    frame: &mut Frame,
    triggers: &[TriggerRecord],
    total_entries: usize,
) -> Result<()> {
    let mut bc_inc = Vec::with_capacity(triggers.len());
    let mut orbit_inc = Vec::with_capacity(triggers.len());
    let mut entries = Vec::with_capacity(triggers.len());

    let (mut prev_bc, mut prev_orbit) = (0u16, 0u32);
    let mut expected_first = 0u64;
    for (k, t) in triggers.iter().enumerate() {
        if t.first_entry as u64 != expected_first {
            return Err(CtfError::ArityMismatch(format!(
                "trigger {k} starts at entry {}, previous triggers end at {expected_first}",
                t.first_entry
            )));
        }
        let n = u16::try_from(t.n_entries).map_err(|_| CtfError::SymbolOutOfRange {
            column: ENTRIES.to_string(),
            symbol: t.n_entries as u64,
        })?;
        expected_first += t.n_entries as u64;

        let d_orbit = t.orbit.wrapping_sub(prev_orbit);
        orbit_inc.push(d_orbit);
        bc_inc.push(if d_orbit == 0 {
            t.bc.wrapping_sub(prev_bc)
        } else {
            t.bc
        });
        entries.push(n);
        prev_bc = t.bc;
        prev_orbit = t.orbit;
    }
    if expected_first != total_entries as u64 {
        return Err(CtfError::ArityMismatch(format!(
            "triggers reference {expected_first} entries, {total_entries} supplied"
        )));
    }

    frame.insert(BC_INC, bc_inc);
    frame.insert(ORBIT_INC, orbit_inc);
    frame.insert(ENTRIES, entries);
    Ok(())
}

/// Inverse of [`insert_triggers`].
pub(crate) fn take_triggers(frame: &mut Frame) -> Result<Vec<TriggerRecord>> {
    let bc_inc: Vec<u16> = take(frame, BC_INC)?;
    let orbit_inc: Vec<u32> = take(frame, ORBIT_INC)?;
    let entries: Vec<u16> = take(frame, ENTRIES)?;
    if bc_inc.len() != orbit_inc.len() || bc_inc.len() != entries.len() {
        return Err(CtfError::ArityMismatch(format!(
            "trigger columns hold {}, {} and {} values",
            bc_inc.len(),
            orbit_inc.len(),
            entries.len()
        )));
    }

    let (mut bc, mut orbit) = (0u16, 0u32);
    let mut first_entry = 0u32;
    let mut out = Vec::with_capacity(entries.len());
    for ((&d_bc, &d_orbit), &n) in bc_inc.iter().zip(&orbit_inc).zip(&entries) {
        if d_orbit == 0 {
            bc = bc.wrapping_add(d_bc);
        } else {
            orbit = orbit.wrapping_add(d_orbit);
            bc = d_bc;
        }
        out.push(TriggerRecord {
            bc,
            orbit,
            first_entry,
            n_entries: n as u32,
        });
        first_entry = first_entry.checked_add(n as u32).ok_or_else(|| {
            CtfError::ArityMismatch("trigger entry counts overflow".into())
        })?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_restart_on_new_orbit() {
        let triggers = chain([(100, 7, 2), (340, 7, 0), (12, 9, 1), (12, 9, 3)]);
        let mut frame = Frame::new();
        insert_triggers(&mut frame, &triggers, 6).unwrap();

        assert_eq!(frame.get(ORBIT_INC), Some(&vec![7u32, 0, 2, 0].into()));
        assert_eq!(frame.get(BC_INC), Some(&vec![100u16, 240, 12, 0].into()));
        assert_eq!(take_triggers(&mut frame).unwrap(), triggers);
    }

    #[test]
    fn gaps_between_triggers_are_rejected() {
        let mut triggers = chain([(1, 1, 2), (2, 1, 2)]);
        triggers[1].first_entry = 3;
        let err = insert_triggers(&mut Frame::new(), &triggers, 5).unwrap_err();
        assert!(matches!(err, CtfError::ArityMismatch(_)));
    }

    #[test]
    fn entry_total_must_match_arrays() {
        let triggers = chain([(1, 1, 2)]);
        let err = insert_triggers(&mut Frame::new(), &triggers, 3).unwrap_err();
        assert!(matches!(err, CtfError::ArityMismatch(_)));
    }

    #[test]
    fn entry_count_beyond_column_width() {
        let triggers = chain([(1, 1, 70_000)]);
        let err = insert_triggers(&mut Frame::new(), &triggers, 70_000).unwrap_err();
        assert!(matches!(err, CtfError::SymbolOutOfRange { symbol: 70_000, .. }));
    }

    #[test]
    fn orbit_wraps() {
        let triggers = chain([(5, u32::MAX, 0), (6, 1, 0)]);
        let mut frame = Frame::new();
        insert_triggers(&mut frame, &triggers, 0).unwrap();
        assert_eq!(frame.get(ORBIT_INC), Some(&vec![u32::MAX, 2].into()));
        assert_eq!(take_triggers(&mut frame).unwrap(), triggers);
    }
}
