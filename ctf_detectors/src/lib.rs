mod bind;
pub mod cpv;
pub mod phos;
pub mod synth;
pub mod trigger;

use std::fmt;
use std::str::FromStr;

use ctf_core::{CtfRecords, Frame, Result, Schema};

pub use cpv::{Cluster, CpvCoder, CpvTimeframe};
pub use phos::{Cell, PhosCoder, PhosTimeframe};
pub use trigger::TriggerRecord;

/// Detectors with a CTF adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Detector {
    Cpv,
    Phos,
}

impl Detector {
    pub const ALL: [Detector; 2] = [Detector::Cpv, Detector::Phos];

    pub fn name(self) -> &'static str {
        match self {
            Detector::Cpv => cpv::SCHEMA_NAME,
            Detector::Phos => phos::SCHEMA_NAME,
        }
    }

    pub fn schema(self) -> Result<Schema> {
        match self {
            Detector::Cpv => cpv::schema(),
            Detector::Phos => phos::schema(),
        }
    }

    /// Deterministic synthetic timeframe with `triggers` triggers.
    pub fn synth(self, triggers: usize, seed: u64) -> Timeframe {
        match self {
            Detector::Cpv => Timeframe::Cpv(synth::cpv_timeframe(triggers, seed)),
            Detector::Phos => Timeframe::Phos(synth::phos_timeframe(triggers, seed)),
        }
    }

    /// Rebuild typed records from a decoded frame.
    pub fn records(self, frame: Frame) -> Result<Timeframe> {
        Ok(match self {
            Detector::Cpv => Timeframe::Cpv(CpvTimeframe::from_frame(frame)?),
            Detector::Phos => Timeframe::Phos(PhosTimeframe::from_frame(frame)?),
        })
    }
}

impl fmt::Display for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Detector {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Detector::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown detector '{s}'. Valid options: cpv, phos"))
    }
}

/// Typed timeframe of any supported detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timeframe {
    Cpv(CpvTimeframe),
    Phos(PhosTimeframe),
}

impl Timeframe {
    pub fn detector(&self) -> Detector {
        match self {
            Timeframe::Cpv(_) => Detector::Cpv,
            Timeframe::Phos(_) => Detector::Phos,
        }
    }

    pub fn triggers(&self) -> &[TriggerRecord] {
        match self {
            Timeframe::Cpv(tf) => &tf.triggers,
            Timeframe::Phos(tf) => &tf.triggers,
        }
    }

    /// Clusters or cells, depending on the detector.
    pub fn entry_count(&self) -> usize {
        match self {
            Timeframe::Cpv(tf) => tf.clusters.len(),
            Timeframe::Phos(tf) => tf.cells.len(),
        }
    }

    pub fn to_frame(&self) -> Result<Frame> {
        match self {
            Timeframe::Cpv(tf) => tf.to_frame(),
            Timeframe::Phos(tf) => tf.to_frame(),
        }
    }

    /// Debug rendering of the entries owned by trigger `k`.
    pub fn entries_of(&self, k: usize) -> Vec<String> {
        match self {
            Timeframe::Cpv(tf) => tf.clusters_of(k).iter().map(|c| format!("{c:?}")).collect(),
            Timeframe::Phos(tf) => tf.cells_of(k).iter().map(|c| format!("{c:?}")).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_detector_names() {
        assert_eq!("cpv".parse::<Detector>().unwrap(), Detector::Cpv);
        assert_eq!("PHOS".parse::<Detector>().unwrap(), Detector::Phos);
        assert!("tof".parse::<Detector>().is_err());
        assert_eq!(Detector::Phos.to_string(), "PHOS");
    }

    #[test]
    fn schemas_build_and_differ() {
        let cpv = Detector::Cpv.schema().unwrap();
        let phos = Detector::Phos.schema().unwrap();
        assert_ne!(cpv.fingerprint(), phos.fingerprint());
    }

    #[test]
    fn synth_frame_maps_back_to_records() {
        for d in Detector::ALL {
            let tf = d.synth(40, 1);
            assert_eq!(tf.detector(), d);
            let back = d.records(tf.to_frame().unwrap()).unwrap();
            assert_eq!(back, tf);
        }
    }
}
