//! PHOS: triggers and calorimeter cells.

use ctf_core::{CtfRecords, Frame, RecordCoder, Result, Schema, StoreMode, Width};
use tracing::trace;

use crate::bind::{check_lengths, take};
use crate::trigger::{insert_triggers, take_triggers, TriggerRecord, BC_INC, ENTRIES, ORBIT_INC};

pub const SCHEMA_NAME: &str = "PHOS";

const ABS_ID: &str = "abs_id";
const TIME: &str = "time";
const ENERGY: &str = "energy";
const KIND: &str = "kind";

/// One read-out cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cell {
    /// Absolute channel number.
    pub abs_id: u16,
    /// Signed time offset; stored as its two's complement bit pattern.
    pub time: i16,
    pub energy: u16,
    /// High gain, low gain or TRU.
    pub kind: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PhosTimeframe {
    pub triggers: Vec<TriggerRecord>,
    pub cells: Vec<Cell>,
}

pub type PhosCoder = RecordCoder<PhosTimeframe>;

pub fn schema() -> Result<Schema> {
    Schema::builder(SCHEMA_NAME)
        .group("triggers")
        .column(BC_INC, Width::U16, StoreMode::Entropy)
        .column(ORBIT_INC, Width::U32, StoreMode::Entropy)
        .column(ENTRIES, Width::U16, StoreMode::Entropy)
        .group_counted_by("cells", ENTRIES)
        .column(ABS_ID, Width::U16, StoreMode::Entropy)
        .column(TIME, Width::U16, StoreMode::Entropy)
        .column(ENERGY, Width::U16, StoreMode::Entropy)
        .column(KIND, Width::U8, StoreMode::Entropy)
        .build()
}

impl CtfRecords for PhosTimeframe {
    fn schema() -> Result<Schema> {
        schema()
    }

    fn to_frame(&self) -> Result<Frame> {
        let mut frame = Frame::new();
        insert_triggers(&mut frame, &self.triggers, self.cells.len())?;
        let c = &self.cells;
        frame.insert(ABS_ID, c.iter().map(|c| c.abs_id).collect::<Vec<_>>());
        frame.insert(TIME, c.iter().map(|c| c.time as u16).collect::<Vec<_>>());
        frame.insert(ENERGY, c.iter().map(|c| c.energy).collect::<Vec<_>>());
        frame.insert(KIND, c.iter().map(|c| c.kind).collect::<Vec<_>>());
        trace!(
            triggers = self.triggers.len(),
            cells = self.cells.len(),
            "PHOS timeframe to columns"
        );
        Ok(frame)
    }

    fn from_frame(mut frame: Frame) -> Result<Self> {
        let triggers = take_triggers(&mut frame)?;
        let abs_id: Vec<u16> = take(&mut frame, ABS_ID)?;
        let time: Vec<u16> = take(&mut frame, TIME)?;
        let energy: Vec<u16> = take(&mut frame, ENERGY)?;
        let kind: Vec<u8> = take(&mut frame, KIND)?;

        let total = triggers.last().map(|t| t.entries().end).unwrap_or(0);
        check_lengths(
            "cell",
            total,
            &[
                (ABS_ID, abs_id.len()),
                (TIME, time.len()),
                (ENERGY, energy.len()),
                (KIND, kind.len()),
            ],
        )?;

        let cells = (0..total)
            .map(|i| Cell {
                abs_id: abs_id[i],
                time: time[i] as i16,
                energy: energy[i],
                kind: kind[i],
            })
            .collect();
        Ok(Self { triggers, cells })
    }
}

impl PhosTimeframe {
    pub fn cells_of(&self, k: usize) -> &[Cell] {
        match self.triggers.get(k) {
            Some(t) => self.cells.get(t.entries()).unwrap_or(&[]),
            None => &[],
        }
    }
}
