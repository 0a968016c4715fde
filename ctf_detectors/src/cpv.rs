//! CPV: triggers and reconstructed clusters.

use ctf_core::{CtfRecords, Frame, RecordCoder, Result, Schema, StoreMode, Width};
use tracing::trace;

use crate::bind::{check_lengths, take};
use crate::trigger::{insert_triggers, take_triggers, TriggerRecord, BC_INC, ENTRIES, ORBIT_INC};

pub const SCHEMA_NAME: &str = "CPV";

const POS_X: &str = "pos_x";
const POS_Z: &str = "pos_z";
const ENERGY: &str = "energy";
const STATUS: &str = "status";

/// Compressed cluster as stored in the timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cluster {
    pub pos_x: u8,
    pub pos_z: u8,
    pub energy: u16,
    pub status: u8,
}

/// Every trigger of one timeframe with the clusters they own.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CpvTimeframe {
    pub triggers: Vec<TriggerRecord>,
    pub clusters: Vec<Cluster>,
}

pub type CpvCoder = RecordCoder<CpvTimeframe>;

/// `status` is a handful of flag bits, packed rather than entropy coded.
pub fn schema() -> Result<Schema> {
    Schema::builder(SCHEMA_NAME)
        .group("triggers")
        .column(BC_INC, Width::U16, StoreMode::Entropy)
        .column(ORBIT_INC, Width::U32, StoreMode::Entropy)
        .column(ENTRIES, Width::U16, StoreMode::Entropy)
        .group_counted_by("clusters", ENTRIES)
        .column(POS_X, Width::U8, StoreMode::Entropy)
        .column(POS_Z, Width::U8, StoreMode::Entropy)
        .column(ENERGY, Width::U16, StoreMode::Entropy)
        .column(STATUS, Width::U8, StoreMode::Pack)
        .build()
}

impl CtfRecords for CpvTimeframe {
    fn schema() -> Result<Schema> {
        schema()
    }

    fn to_frame(&self) -> Result<Frame> {
        let mut frame = Frame::new();
        insert_triggers(&mut frame, &self.triggers, self.clusters.len())?;
        let c = &self.clusters;
        frame.insert(POS_X, c.iter().map(|c| c.pos_x).collect::<Vec<_>>());
        frame.insert(POS_Z, c.iter().map(|c| c.pos_z).collect::<Vec<_>>());
        frame.insert(ENERGY, c.iter().map(|c| c.energy).collect::<Vec<_>>());
        frame.insert(STATUS, c.iter().map(|c| c.status).collect::<Vec<_>>());
        trace!(
            triggers = self.triggers.len(),
            clusters = self.clusters.len(),
            "CPV timeframe to columns"
        );
        Ok(frame)
    }

    fn from_frame(mut frame: Frame) -> Result<Self> {
        let triggers = take_triggers(&mut frame)?;
        let pos_x: Vec<u8> = take(&mut frame, POS_X)?;
        let pos_z: Vec<u8> = take(&mut frame, POS_Z)?;
        let energy: Vec<u16> = take(&mut frame, ENERGY)?;
        let status: Vec<u8> = take(&mut frame, STATUS)?;

        let total = triggers.last().map(|t| t.entries().end).unwrap_or(0);
        check_lengths(
            "cluster",
            total,
            &[
                (POS_X, pos_x.len()),
                (POS_Z, pos_z.len()),
                (ENERGY, energy.len()),
                (STATUS, status.len()),
            ],
        )?;

        let clusters = (0..total)
            .map(|i| Cluster {
                pos_x: pos_x[i],
                pos_z: pos_z[i],
                energy: energy[i],
                status: status[i],
            })
            .collect();
        Ok(Self { triggers, clusters })
    }
}

impl CpvTimeframe {
    /// Clusters belonging to trigger `k`.
    pub fn clusters_of(&self, k: usize) -> &[Cluster] {
        match self.triggers.get(k) {
            Some(t) => self.clusters.get(t.entries()).unwrap_or(&[]),
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::chain;
    use ctf_core::{CtfError, DictionarySource};

    fn cluster(i: u8) -> Cluster {
        Cluster {
            pos_x: i,
            pos_z: 60 - i,
            energy: i as u16 * 97,
            status: i % 3,
        }
    }

    #[test]
    fn three_triggers_seven_clusters() {
        let tf = CpvTimeframe {
            triggers: chain([(100, 1, 2), (900, 1, 0), (40, 2, 5)]),
            clusters: (0..7).map(cluster).collect(),
        };
        let mut coder = CpvCoder::new(DictionarySource::none()).unwrap();
        coder.coder_mut().set_memory_margin_factor(1.5).unwrap();

        let enc = coder.encode(&tf).unwrap();
        assert!(enc.report.encoded_bytes < enc.report.preallocated);
        let (out, report) = coder.decode(&enc.bytes).unwrap();
        assert_eq!(report.group_counts, vec![3, 7]);
        assert_eq!(out, tf);
        assert_eq!(out.clusters_of(2), &tf.clusters[2..7]);
        assert!(out.clusters_of(1).is_empty());
    }

    #[test]
    fn clusters_not_covered_by_triggers() {
        let tf = CpvTimeframe {
            triggers: chain([(1, 1, 2)]),
            clusters: (0..3).map(cluster).collect(),
        };
        let coder = CpvCoder::new(DictionarySource::none()).unwrap();
        assert!(matches!(coder.encode(&tf), Err(CtfError::ArityMismatch(_))));
    }

    #[test]
    fn frame_with_wrong_width_is_rejected() {
        let mut frame = CpvTimeframe::default().to_frame().unwrap();
        frame.insert(ENERGY, Vec::<u32>::new());
        assert!(matches!(
            CpvTimeframe::from_frame(frame),
            Err(CtfError::SchemaMismatch(_))
        ));
    }
}
