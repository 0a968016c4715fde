//! Integration tests: whole frames through `CtfCoder`, the buffer layout seen
//! through `CtfView`, and dictionary artifacts on disk.
//!
//! The recurring fixture is a two-group trigger/cluster schema:
//!  1. `triggers` carries per-trigger columns, among them `entries`
//!  2. `clusters` is counted by `entries`, so its length is their sum
use std::sync::Arc;

use ctf_core::format::{layout_checksum, payload_start, HEADER_SIZE, LAYOUT_CHECKSUM_AT};
use ctf_core::{
    CtfCoder, CtfError, CtfView, Dictionary, DictionaryBuilder, DictionarySource, Frame, Schema,
    StoreMode, TrainOptions, Width,
};
use proptest::prelude::*;

/// Deterministic LCG stream.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

// ── helpers ───────────────────────────────────────────────────────────────

fn trigger_schema(cluster_mode: StoreMode) -> Arc<Schema> {
    Arc::new(
        Schema::builder("TEST")
            .group("triggers")
            .column("bc_inc", Width::U16, StoreMode::Entropy)
            .column("orbit_inc", Width::U32, StoreMode::Entropy)
            .column("entries", Width::U16, StoreMode::Entropy)
            .group_counted_by("clusters", "entries")
            .column("pos_x", Width::U8, cluster_mode)
            .column("pos_z", Width::U8, cluster_mode)
            .column("energy", Width::U16, cluster_mode)
            .column("status", Width::U8, StoreMode::Pack)
            .build()
            .unwrap(),
    )
}

/// `entries` gives the cluster count of every trigger.
fn trigger_frame(entries: &[u16], seed: u64) -> Frame {
    let mut rng = Lcg(seed);
    let n = entries.len();
    let clusters: usize = entries.iter().map(|&e| e as usize).sum();
    Frame::new()
        .with("bc_inc", (0..n).map(|_| rng.below(3564) as u16).collect::<Vec<_>>())
        .with("orbit_inc", (0..n).map(|_| rng.below(2) as u32).collect::<Vec<_>>())
        .with("entries", entries.to_vec())
        .with("pos_x", (0..clusters).map(|_| rng.below(128) as u8).collect::<Vec<_>>())
        .with("pos_z", (0..clusters).map(|_| rng.below(60) as u8).collect::<Vec<_>>())
        .with(
            "energy",
            (0..clusters).map(|_| (rng.below(64) * rng.below(64)) as u16).collect::<Vec<_>>(),
        )
        .with("status", (0..clusters).map(|_| rng.below(4) as u8).collect::<Vec<_>>())
}

fn random_entries(triggers: usize, seed: u64) -> Vec<u16> {
    let mut rng = Lcg(seed);
    (0..triggers).map(|_| rng.below(12) as u16).collect()
}

fn none_coder(schema: Arc<Schema>) -> CtfCoder {
    CtfCoder::configure(DictionarySource::none(), schema).unwrap()
}

/// A frame seen during training, so every symbol is in the dictionary.
fn training_frame(seed: u64) -> Frame {
    trigger_frame(&random_entries(200, seed), seed)
}

fn train(schema: &Arc<Schema>, seeds: &[u64], options: &TrainOptions) -> Dictionary {
    let mut builder = DictionaryBuilder::new(schema.clone());
    for &seed in seeds {
        builder.add_frame(&training_frame(seed)).unwrap();
    }
    builder.build(options).unwrap()
}

// ── round trips ────────────────────────────────────────────────────────────

#[test]
fn test_roundtrip_every_store_mode() {
    for mode in StoreMode::ALL {
        let schema = trigger_schema(mode);
        let coder = none_coder(schema);
        let frame = trigger_frame(&random_entries(300, 7), 11);
        let enc = coder.encode(&frame).unwrap();
        let dec = coder.decode(&enc.bytes).unwrap();
        assert_eq!(dec.frame, frame, "{mode:?} round-trip should be exact");
        eprintln!("{mode:?} ratio: {:.2}x", enc.report.ratio());
    }
}

#[test]
fn test_roundtrip_with_trained_dictionary() {
    let schema = trigger_schema(StoreMode::Entropy);
    let dict = train(&schema, &[1, 2, 3, 4], &TrainOptions::default());
    let coder = CtfCoder::configure(dict.into(), schema.clone()).unwrap();

    let frame = training_frame(3);
    let enc = coder.encode(&frame).unwrap();
    let view = CtfView::open(&enc.bytes).unwrap();
    assert_ne!(view.header().dictionary_id, 0);
    assert_eq!(coder.decode(&enc.bytes).unwrap().frame, frame);

    // Entropy blocks lean on the dictionary, so they are smaller than the
    // self-describing ones.
    let embedded = none_coder(schema).encode(&frame).unwrap();
    assert!(enc.bytes.len() < embedded.bytes.len());
}

#[test]
fn test_empty_frame_round_trip() {
    let schema = trigger_schema(StoreMode::Entropy);
    let coder = none_coder(schema.clone());
    let frame = trigger_frame(&[], 0);
    let enc = coder.encode(&frame).unwrap();
    assert_eq!(
        enc.bytes.len(),
        payload_start(schema.groups().len(), schema.columns().len())
    );
    let dec = coder.decode(&enc.bytes).unwrap();
    assert_eq!(dec.frame, frame);
    assert_eq!(dec.report.group_counts, vec![0, 0]);
}

/// Triggers present but none of them with clusters.
#[test]
fn test_empty_counted_group() {
    let coder = none_coder(trigger_schema(StoreMode::Entropy));
    let frame = trigger_frame(&[0, 0, 0, 0], 3);
    let enc = coder.encode(&frame).unwrap();
    assert_eq!(coder.decode(&enc.bytes).unwrap().frame, frame);
}

// ── layout ─────────────────────────────────────────────────────────────────

#[test]
fn test_buffer_is_minimal() {
    let schema = trigger_schema(StoreMode::Entropy);
    let coder = none_coder(schema.clone());
    let enc = coder.encode(&trigger_frame(&random_entries(64, 5), 5)).unwrap();
    let view = CtfView::open(&enc.bytes).unwrap();

    let mut expected_offset = 0u64;
    for entry in view.entries() {
        assert_eq!(entry.offset, expected_offset, "blocks must be contiguous");
        expected_offset += entry.block_len();
    }
    let header = payload_start(schema.groups().len(), schema.columns().len());
    assert_eq!(enc.bytes.len(), header + view.encoded_size() as usize);
    assert_eq!(view.size(), enc.bytes.len());
}

/// Triggers = 3, clusters = 7, embedded tables, margin 1.5.
#[test]
fn test_three_triggers_seven_clusters() {
    let mut coder = none_coder(trigger_schema(StoreMode::Entropy));
    coder.set_memory_margin_factor(1.5).unwrap();
    let frame = trigger_frame(&[2, 0, 5], 21);

    let enc = coder.encode(&frame).unwrap();
    assert!(
        enc.report.encoded_bytes < enc.report.preallocated,
        "compaction should cut the buffer below its reservation: {} vs {}",
        enc.report.encoded_bytes,
        enc.report.preallocated
    );
    assert_eq!(enc.report.relocations, 0);

    let dec = coder.decode(&enc.bytes).unwrap();
    assert_eq!(dec.report.group_counts, vec![3, 7]);
    assert_eq!(dec.frame.get("entries"), frame.get("entries"));
    assert_eq!(dec.frame.get("energy"), frame.get("energy"));
    assert_eq!(dec.frame, frame);
}

#[test]
fn test_margin_and_parallelism_do_not_change_bytes() {
    let schema = trigger_schema(StoreMode::Entropy);
    let frame = trigger_frame(&random_entries(500, 77), 77);
    let reference = none_coder(schema.clone()).encode(&frame).unwrap().bytes;

    for (margin, parallel) in [(0.01, false), (0.5, true), (1.0, true), (4.0, false)] {
        let mut coder = none_coder(schema.clone());
        coder.set_memory_margin_factor(margin).unwrap();
        coder.set_parallel(parallel);
        let enc = coder.encode(&frame).unwrap();
        assert_eq!(enc.bytes, reference, "margin {margin}, parallel {parallel}");
        if margin < 0.1 {
            assert!(enc.report.relocations > 0, "tiny margin should force relocation");
        }
        assert_eq!(coder.decode(&enc.bytes).unwrap().frame, frame);
    }
}

// ── failures ───────────────────────────────────────────────────────────────

#[test]
fn test_truncation_at_every_offset() {
    let coder = none_coder(trigger_schema(StoreMode::Entropy));
    let bytes = coder
        .encode(&trigger_frame(&random_entries(20, 8), 8))
        .unwrap()
        .bytes;
    for cut in 0..bytes.len() {
        let err = coder.decode(&bytes[..cut]).unwrap_err();
        assert!(
            matches!(err, CtfError::TruncatedBuffer(_)),
            "cut at {cut} of {}: {err}",
            bytes.len()
        );
    }
}

#[test]
fn test_corrupted_payload_is_detected() {
    let coder = none_coder(trigger_schema(StoreMode::Entropy));
    let mut bytes = coder
        .encode(&trigger_frame(&random_entries(20, 9), 9))
        .unwrap()
        .bytes;
    let last = bytes.len() - 1;
    bytes[last] ^= 0x5a;
    assert!(matches!(
        coder.decode(&bytes),
        Err(CtfError::ChecksumMismatch { .. })
    ));
}

/// Rewrite the single group count and the directory element count of a
/// one-column buffer, optionally resealing the layout checksum.
fn rewrite_count(bytes: &mut [u8], count: u32, reseal: bool) {
    let start = payload_start(1, 1);
    bytes[HEADER_SIZE..HEADER_SIZE + 4].copy_from_slice(&count.to_le_bytes());
    let entry = start - 40;
    bytes[entry + 16..entry + 20].copy_from_slice(&count.to_le_bytes());
    if reseal {
        let sum = layout_checksum(bytes, start);
        bytes[LAYOUT_CHECKSUM_AT..HEADER_SIZE].copy_from_slice(&sum.to_le_bytes());
    }
}

#[test]
fn test_lowered_element_count_is_rejected() {
    for mode in StoreMode::ALL {
        let schema = Arc::new(
            Schema::builder("ONE")
                .group("g")
                .column("a", Width::U8, mode)
                .build()
                .unwrap(),
        );
        let coder = none_coder(schema);
        let frame = Frame::new().with("a", vec![1u8, 2, 3, 4, 1, 2, 3, 4]);
        let bytes = coder.encode(&frame).unwrap().bytes;

        let mut unsealed = bytes.clone();
        rewrite_count(&mut unsealed, 4, false);
        assert!(
            matches!(coder.decode(&unsealed), Err(CtfError::CorruptBlock(_))),
            "{mode:?}: layout checksum must catch the rewrite"
        );

        let mut resealed = bytes.clone();
        rewrite_count(&mut resealed, 4, true);
        let res = coder.decode(&resealed);
        assert!(res.is_err(), "{mode:?}: shortened column decoded as {res:?}");
    }
}

#[test]
fn test_dictionary_mismatch() {
    let schema = trigger_schema(StoreMode::Entropy);
    let a = train(&schema, &[1, 2], &TrainOptions::default());
    let b = train(&schema, &[3, 4], &TrainOptions::default());
    assert_ne!(a.id(), b.id());

    let frame = training_frame(1);
    let bytes = CtfCoder::configure(a.into(), schema.clone())
        .unwrap()
        .encode(&frame)
        .unwrap()
        .bytes;

    let wrong = CtfCoder::configure(b.into(), schema.clone()).unwrap();
    assert!(matches!(wrong.decode(&bytes), Err(CtfError::SchemaMismatch(_))));

    let without = none_coder(schema);
    assert!(matches!(
        without.decode(&bytes),
        Err(CtfError::MissingDictionary(_))
    ));
}

#[test]
fn test_symbol_outside_dictionary_alphabet() {
    let schema = Arc::new(
        Schema::builder("NARROW")
            .group("g")
            .column("v", Width::U8, StoreMode::Entropy)
            .build()
            .unwrap(),
    );
    let mut builder = DictionaryBuilder::new(schema.clone());
    builder
        .add_frame(&Frame::new().with("v", vec![1u8, 2, 2, 3]))
        .unwrap();
    let dict = builder.build(&TrainOptions { smooth_span: 0 }).unwrap();
    let coder = CtfCoder::configure(dict.into(), schema).unwrap();

    let err = coder
        .encode(&Frame::new().with("v", vec![1u8, 9]))
        .unwrap_err();
    assert!(matches!(err, CtfError::SymbolOutOfRange { symbol: 9, .. }));
}

#[test]
fn test_dictionary_for_other_schema_is_rejected() {
    let schema = trigger_schema(StoreMode::Entropy);
    let dict = train(&schema, &[1], &TrainOptions::default());
    let other = trigger_schema(StoreMode::Store);
    assert!(matches!(
        CtfCoder::configure(dict.into(), other),
        Err(CtfError::SchemaMismatch(_))
    ));
}

// ── dictionary artifacts ───────────────────────────────────────────────────

#[test]
fn test_dictionary_artifact_plain_and_gzip() {
    let schema = trigger_schema(StoreMode::Entropy);
    let dict = train(&schema, &[10, 11], &TrainOptions::default());
    let dir = tempfile::tempdir().unwrap();

    for compress in [false, true] {
        let path = dir.path().join(format!("ctf_dict_{compress}.bin"));
        dict.save(&path, compress).unwrap();
        let raw = std::fs::read(&path).unwrap();
        assert_eq!(raw.starts_with(&[0x1f, 0x8b]), compress);

        let loaded = Dictionary::load(&path).unwrap();
        assert_eq!(loaded.id(), dict.id());
        assert_eq!(loaded.to_bytes(), dict.to_bytes());

        let source = DictionarySource::from_option(path.to_str().unwrap()).unwrap();
        let coder = CtfCoder::configure(source, schema.clone()).unwrap();
        let frame = training_frame(11);
        let enc = coder.encode(&frame).unwrap();
        assert_eq!(coder.decode(&enc.bytes).unwrap().frame, frame);
    }
}

#[test]
fn test_corrupt_dictionary_artifacts() {
    let schema = trigger_schema(StoreMode::Entropy);
    let bytes = train(&schema, &[5], &TrainOptions::default()).to_bytes();
    let dir = tempfile::tempdir().unwrap();

    let mut flipped = bytes.clone();
    flipped[20] ^= 0x01;
    let path = dir.path().join("flipped.bin");
    std::fs::write(&path, &flipped).unwrap();
    assert!(matches!(
        Dictionary::load(&path),
        Err(CtfError::CorruptDictionary(_))
    ));

    let mut future = bytes.clone();
    future[8] = 2;
    assert!(matches!(
        Dictionary::from_bytes(&future),
        Err(CtfError::UnsupportedVersion { found: 2, .. })
    ));

    assert!(matches!(
        Dictionary::from_bytes(b"not a dictionary at all"),
        Err(CtfError::BadMagic(_))
    ));

    let missing = dir.path().join("missing.bin");
    assert!(matches!(Dictionary::load(&missing), Err(CtfError::Io(_))));
}

#[test]
fn test_none_option_selects_embedded_tables() {
    assert!(DictionarySource::from_option("none").unwrap().dictionary().is_none());
    assert!(DictionarySource::from_option("").unwrap().dictionary().is_none());
}

// ── properties ─────────────────────────────────────────────────────────────

fn mode_strategy() -> impl Strategy<Value = StoreMode> {
    prop::sample::select(StoreMode::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_roundtrip_any_frame(
        entries in prop::collection::vec(0u16..6, 0..40),
        seed in any::<u64>(),
        mode in mode_strategy(),
        parallel in any::<bool>(),
    ) {
        let mut coder = none_coder(trigger_schema(mode));
        coder.set_parallel(parallel);
        let frame = trigger_frame(&entries, seed);
        let enc = coder.encode(&frame).unwrap();
        let dec = coder.decode(&enc.bytes).unwrap();
        prop_assert_eq!(dec.frame, frame);
    }

    #[test]
    fn prop_wide_values_round_trip(values in prop::collection::vec(any::<u64>(), 0..200)) {
        let schema = Arc::new(
            Schema::builder("WIDE")
                .group("g")
                .column("v", Width::U64, StoreMode::Entropy)
                .column("w", Width::U64, StoreMode::Pack)
                .build()
                .unwrap(),
        );
        let coder = none_coder(schema);
        let frame = Frame::new().with("v", values.clone()).with("w", values);
        let enc = coder.encode(&frame).unwrap();
        prop_assert_eq!(coder.decode(&enc.bytes).unwrap().frame, frame);
    }
}
