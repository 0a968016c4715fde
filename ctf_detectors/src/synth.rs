//! Deterministic synthetic timeframes for tests, benchmarks and the CLI.
//!
//! The distributions are shaped like real data (skewed energies, bursts of
//! triggers inside one orbit, mostly-zero status words) so that compression
//! ratios measured on them mean something. The same seed always produces the
//! same timeframe.

use crate::cpv::{Cluster, CpvTimeframe};
use crate::phos::{Cell, PhosTimeframe};
use crate::trigger::{chain, TriggerRecord};

/// Bunch crossings per LHC orbit.
pub const BC_PER_ORBIT: u16 = 3564;

const PHOS_CHANNELS: u64 = 12544;

/// Simple LCG; no external dep.
#[derive(Debug, Clone)]
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed ^ 0x9E37_79B9_7F4A_7C15)
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    /// Uniform in `0..n`.
    pub fn below(&mut self, n: u64) -> u64 {
        self.next_u64() % n.max(1)
    }

    /// Skewed towards zero: product of two uniforms in `0..n`.
    pub fn skewed(&mut self, n: u64) -> u64 {
        self.below(n) * self.below(n) / n.max(1)
    }
}

/// `count` triggers in increasing (orbit, bc) order; `entries` draws the
/// number of entries of each.
fn triggers(rng: &mut Lcg, count: usize, mut entries: impl FnMut(&mut Lcg) -> u32) -> Vec<TriggerRecord> {
    let mut orbit = 0x1_0000 + rng.below(1 << 20) as u32;
    let mut bc = rng.below(BC_PER_ORBIT as u64) as u16;
    let mut tuples = Vec::with_capacity(count);
    for _ in 0..count {
        let step = 1 + rng.below(400) as u16;
        if rng.below(3) == 0 || bc + step >= BC_PER_ORBIT {
            orbit += 1 + rng.below(3) as u32;
            bc = rng.below(200) as u16;
        } else {
            bc += step;
        }
        tuples.push((bc, orbit, entries(rng)));
    }
    chain(tuples)
}

pub fn cpv_timeframe(trigger_count: usize, seed: u64) -> CpvTimeframe {
    let mut rng = Lcg::new(seed);
    let triggers = triggers(&mut rng, trigger_count, |r| (r.below(4) * r.below(4)) as u32);
    let total = triggers.last().map(|t| t.entries().end).unwrap_or(0);
    let clusters = (0..total)
        .map(|_| Cluster {
            pos_x: rng.below(128) as u8,
            pos_z: rng.below(60) as u8,
            energy: (rng.skewed(2048) + rng.below(16)) as u16,
            status: if rng.below(8) == 0 { 1 + rng.below(3) as u8 } else { 0 },
        })
        .collect();
    CpvTimeframe { triggers, clusters }
}

pub fn phos_timeframe(trigger_count: usize, seed: u64) -> PhosTimeframe {
    let mut rng = Lcg::new(seed);
    let triggers = triggers(&mut rng, trigger_count, |r| (r.below(20) * r.below(4)) as u32);
    let mut cells = Vec::new();
    for t in &triggers {
        // Showers light up neighbouring channels.
        let centre = rng.below(PHOS_CHANNELS);
        for _ in 0..t.n_entries {
            let abs_id = 1 + (centre + rng.below(64)) % PHOS_CHANNELS;
            let time = rng.below(120) as i16 + rng.below(120) as i16 - 120;
            let kind = match rng.below(16) {
                0 => 2,
                1..=3 => 1,
                _ => 0,
            };
            cells.push(Cell {
                abs_id: abs_id as u16,
                time,
                energy: (rng.skewed(4096) + rng.below(8)) as u16,
                kind,
            });
        }
    }
    PhosTimeframe { triggers, cells }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_timeframe() {
        assert_eq!(cpv_timeframe(50, 7), cpv_timeframe(50, 7));
        assert_ne!(cpv_timeframe(50, 7), cpv_timeframe(50, 8));
        assert_eq!(phos_timeframe(50, 7), phos_timeframe(50, 7));
    }

    #[test]
    fn triggers_are_ordered_and_cover_entries() {
        let tf = phos_timeframe(200, 3);
        let mut prev = (0u32, 0u16);
        for t in &tf.triggers {
            assert!(t.bc < BC_PER_ORBIT);
            assert!((t.orbit, t.bc) > prev);
            prev = (t.orbit, t.bc);
        }
        let total = tf.triggers.last().unwrap().entries().end;
        assert_eq!(total, tf.cells.len());
    }
}
