//! Detector timeframes through the full coder, with embedded tables and with
//! a dictionary trained on synthetic data.
use std::sync::Arc;

use ctf_core::{CtfCoder, CtfError, DictionaryBuilder, DictionarySource, TrainOptions};
use ctf_detectors::synth;
use ctf_detectors::trigger::chain;
use ctf_detectors::{Cluster, CpvCoder, CpvTimeframe, Detector, PhosCoder};
use proptest::prelude::*;

fn trained(detector: Detector, seeds: std::ops::Range<u64>) -> DictionarySource {
    let schema = Arc::new(detector.schema().unwrap());
    let mut builder = DictionaryBuilder::new(schema);
    for seed in seeds {
        builder
            .add_frame(&detector.synth(500, seed).to_frame().unwrap())
            .unwrap();
    }
    builder.build(&TrainOptions::default()).unwrap().into()
}

#[test]
fn test_every_detector_round_trips() {
    for detector in Detector::ALL {
        let schema = Arc::new(detector.schema().unwrap());
        let coder = CtfCoder::configure(DictionarySource::none(), schema).unwrap();
        let tf = detector.synth(1000, 42);
        let enc = coder.encode(&tf.to_frame().unwrap()).unwrap();
        let dec = coder.decode(&enc.bytes).unwrap();
        assert_eq!(detector.records(dec.frame).unwrap(), tf);
        eprintln!(
            "{detector}: {} triggers, {} entries, ratio {:.2}x",
            tf.triggers().len(),
            tf.entry_count(),
            enc.report.ratio()
        );
        assert!(enc.report.ratio() > 1.0, "{detector} should compress");
    }
}

#[test]
fn test_trained_dictionary_on_training_data() {
    let source = trained(Detector::Phos, 0..4);
    let coder = PhosCoder::new(source).unwrap();
    for seed in 0..4 {
        let tf = synth::phos_timeframe(500, seed);
        let enc = coder.encode(&tf).unwrap();
        assert_eq!(coder.decode(&enc.bytes).unwrap().0, tf);
    }
}

#[test]
fn test_cpv_dictionary_rejects_phos_schema() {
    let source = trained(Detector::Cpv, 0..1);
    assert!(matches!(
        PhosCoder::new(source),
        Err(CtfError::SchemaMismatch(_))
    ));
}

fn cluster_strategy() -> impl Strategy<Value = Cluster> {
    (any::<u8>(), any::<u8>(), any::<u16>(), 0u8..8).prop_map(|(pos_x, pos_z, energy, status)| {
        Cluster {
            pos_x,
            pos_z,
            energy,
            status,
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_cpv_round_trip(
        shape in prop::collection::vec((any::<u16>(), 0u32..4, 0u32..6), 0..30),
        pool in prop::collection::vec(cluster_strategy(), 0..180),
        parallel in any::<bool>(),
    ) {
        // Orbits ascend by the drawn increments; clusters are taken from the
        // pool and recycled when it runs out.
        let mut orbit = 0u32;
        let tuples: Vec<(u16, u32, u32)> = shape
            .iter()
            .map(|&(bc, d_orbit, n)| {
                orbit += d_orbit;
                (bc, orbit, n)
            })
            .collect();
        let triggers = chain(tuples);
        let total = triggers.last().map(|t| t.entries().end).unwrap_or(0);
        let clusters = (0..total)
            .map(|i| pool.get(i % pool.len().max(1)).copied().unwrap_or_default())
            .collect();
        let tf = CpvTimeframe { triggers, clusters };

        let mut coder = CpvCoder::new(DictionarySource::none()).unwrap();
        coder.coder_mut().set_parallel(parallel);
        let enc = coder.encode(&tf).unwrap();
        let (out, report) = coder.decode(&enc.bytes).unwrap();
        prop_assert_eq!(report.group_counts, vec![tf.triggers.len() as u32, total as u32]);
        prop_assert_eq!(out, tf);
    }
}
