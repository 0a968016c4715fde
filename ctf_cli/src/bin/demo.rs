//! CTF Demo
//!
//! Synthesizes a run of CPV and PHOS timeframes, encodes them with the CTF
//! column codec (embedded tables and a trained dictionary), and compares the
//! result with gzip and zstd applied to the same column bytes. Then inspects
//! one buffer and measures sequential versus parallel throughput.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use flate2::write::GzEncoder;
use flate2::Compression as GzCompression;

use ctf_core::format::BLOCK_FLAG_EMBEDDED_TABLE;
use ctf_core::{
    CodecMetrics, CoderOptions, CtfCoder, CtfView, DictionaryBuilder, DictionarySource, Frame,
    TrainOptions,
};
use ctf_detectors::{Detector, Timeframe};

// ── constants ──────────────────────────────────────────────────────────────

const TIMEFRAMES: u64 = 16;
const TRIGGERS_PER_TF: usize = 4000;
const BENCH_ITERS: usize = 10;

// ── data ───────────────────────────────────────────────────────────────────

fn timeframes(detector: Detector) -> Vec<Timeframe> {
    (0..TIMEFRAMES)
        .map(|seed| detector.synth(TRIGGERS_PER_TF, seed))
        .collect()
}

/// Column values laid out back to back at their declared widths, the input a
/// general-purpose compressor would see.
fn column_bytes(frame: &Frame) -> Vec<u8> {
    let mut out = Vec::new();
    for (_, data) in frame.iter() {
        let width = data.width().bytes();
        for s in data.to_symbols() {
            out.extend_from_slice(&s.to_le_bytes()[..width]);
        }
    }
    out
}

fn gzip_len(raw: &[u8]) -> Result<usize> {
    let mut enc = GzEncoder::new(Vec::new(), GzCompression::default());
    enc.write_all(raw)?;
    Ok(enc.finish()?.len())
}

fn zstd_len(raw: &[u8]) -> Result<usize> {
    Ok(zstd::bulk::compress(raw, 3)?.len())
}

// ── timing ─────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const U: &[&str] = &["B", "KB", "MB", "GB"];
    let mut v = n as f64;
    let mut u = 0;
    while v >= 1024.0 && u < U.len() - 1 { v /= 1024.0; u += 1; }
    if u == 0 { format!("{n} B") } else { format!("{v:.2} {}", U[u]) }
}

fn fmt_duration(d: Duration) -> String {
    let ms = d.as_secs_f64() * 1000.0;
    if ms < 1.0 {
        format!("{:.1} µs", ms * 1000.0)
    } else if ms < 1000.0 {
        format!("{ms:.1} ms")
    } else {
        format!("{:.2} s", d.as_secs_f64())
    }
}

fn speedup(slow: Duration, fast: Duration) -> f64 {
    slow.as_secs_f64() / fast.as_secs_f64().max(1e-9)
}

// ── coders ─────────────────────────────────────────────────────────────────

fn coder(detector: Detector, source: DictionarySource, parallel: bool) -> Result<CtfCoder> {
    let schema = Arc::new(detector.schema()?);
    Ok(CtfCoder::configure(source, schema)?.with_options(CoderOptions {
        parallel,
        ..CoderOptions::default()
    })?)
}

fn train(detector: Detector, frames: &[Frame]) -> Result<DictionarySource> {
    let mut builder = DictionaryBuilder::new(Arc::new(detector.schema()?));
    for f in frames {
        builder.add_frame(f)?;
    }
    Ok(builder.build(&TrainOptions::default())?.into())
}

/// Encode every frame, check the round trip, and return total encoded bytes.
fn encode_all(coder: &CtfCoder, frames: &[Frame], metrics: &mut CodecMetrics) -> Result<u64> {
    let mut total = 0u64;
    for f in frames {
        let enc = coder.encode(f)?;
        metrics.record_encode(&enc.report);
        let dec = coder.decode(&enc.bytes)?;
        metrics.record_decode(&dec.report);
        anyhow::ensure!(&dec.frame == f, "round-trip mismatch");
        total += enc.bytes.len() as u64;
    }
    Ok(total)
}

// ── demo runner ────────────────────────────────────────────────────────────

struct Row {
    detector: Detector,
    raw: u64,
    embedded: u64,
    trained: u64,
    gzip: u64,
    zstd: u64,
}

fn run() -> Result<()> {
    println!();
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║           CTF · Compact Timeframe entropy codec · Demo           ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    // ── Phase 0: Data Generation ─────────────────────────────────────────────
    section("0 · DATA GENERATION");
    let mut data = Vec::new();
    for detector in Detector::ALL {
        let t0 = Instant::now();
        let tfs = timeframes(detector);
        let frames = tfs.iter().map(|t| t.to_frame()).collect::<ctf_core::Result<Vec<_>>>()?;
        let entries: usize = tfs.iter().map(|t| t.entry_count()).sum();
        println!(
            "  {:<5} {} timeframes × {} triggers, {} entries  ({})",
            detector,
            TIMEFRAMES,
            format_number(TRIGGERS_PER_TF as u64),
            format_number(entries as u64),
            fmt_duration(t0.elapsed())
        );
        if let Some(first) = tfs.first() {
            for line in first.entries_of(0).iter().take(2) {
                println!("        {line}");
            }
        }
        data.push((detector, frames));
    }

    // ── Phase 1: Compression ─────────────────────────────────────────────────
    section("1 · COMPRESSION");
    let mut rows = Vec::new();
    for (detector, frames) in &data {
        let detector = *detector;
        let mut raw = 0u64;
        let mut gzip = 0u64;
        let mut zstd = 0u64;
        for f in frames {
            let bytes = column_bytes(f);
            raw += bytes.len() as u64;
            gzip += gzip_len(&bytes)? as u64;
            zstd += zstd_len(&bytes)? as u64;
        }
        let mut m = CodecMetrics::new();
        let embedded = encode_all(&coder(detector, DictionarySource::none(), true)?, frames, &mut m)?;
        let trained_src = train(detector, frames)?;
        let trained = encode_all(&coder(detector, trained_src, true)?, frames, &mut m)?;
        rows.push(Row { detector, raw, embedded, trained, gzip, zstd });
    }

    println!(
        "  {:<6} {:>10}  {:>16}  {:>16}  {:>16}  {:>16}",
        "", "raw", "CTF embedded", "CTF dictionary", "gzip", "zstd -3"
    );
    println!("  {}", "─".repeat(90));
    for r in &rows {
        let cell = |n: u64| format!("{} {:>5.2}x", human_bytes(n), r.raw as f64 / n.max(1) as f64);
        println!(
            "  {:<6} {:>10}  {:>16}  {:>16}  {:>16}  {:>16}",
            r.detector.name(),
            human_bytes(r.raw),
            cell(r.embedded),
            cell(r.trained),
            cell(r.gzip),
            cell(r.zstd)
        );
    }
    println!();
    println!("  The dictionary was trained on the same timeframes it encodes; every");
    println!("  buffer above was decoded again and compared with its input.");

    // ── Phase 2: Inspection ──────────────────────────────────────────────────
    section("2 · BUFFER INSPECTION (PHOS, timeframe 0, embedded tables)");
    let (detector, frames) = &data[1];
    let phos = coder(*detector, DictionarySource::none(), false)?;
    let enc = phos.encode(&frames[0])?;
    let view = CtfView::open(&enc.bytes)?;
    let header = view.header();
    println!("  schema fingerprint : {:016x}", header.schema_fingerprint);
    println!("  group counts       : {:?}", view.group_counts());
    println!("  buffer size        : {}", human_bytes(view.size() as u64));
    println!();
    println!(
        "  {:<10} {:>8}  {:>10}  {:>10}  {:>10}  {:>6}",
        "column", "mode", "elements", "meta", "payload", "table"
    );
    println!("  {}", "─".repeat(64));
    for (spec, e) in phos.schema().columns().iter().zip(view.entries()) {
        println!(
            "  {:<10} {:>8}  {:>10}  {:>10}  {:>10}  {:>6}",
            spec.name,
            format!("{:?}", spec.mode),
            format_number(e.element_count as u64),
            human_bytes(e.meta_len as u64),
            human_bytes(e.payload_len as u64),
            if e.has_flag(BLOCK_FLAG_EMBEDDED_TABLE) { "yes" } else { "-" }
        );
    }

    // ── Phase 3: Throughput ──────────────────────────────────────────────────
    section("3 · THROUGHPUT · sequential vs parallel columns");
    println!(
        "  {:<6} {:<11} {:>12}  {:>12}  {:>12}",
        "", "", "encode MB/s", "decode MB/s", "wall time"
    );
    println!("  {}", "─".repeat(60));
    for (detector, frames) in &data {
        let mut walls = Vec::new();
        for parallel in [false, true] {
            let c = coder(*detector, DictionarySource::none(), parallel)?;
            let mut m = CodecMetrics::new();
            let t0 = Instant::now();
            for _ in 0..BENCH_ITERS {
                encode_all(&c, &frames[..4], &mut m)?;
            }
            let wall = t0.elapsed();
            println!(
                "  {:<6} {:<11} {:>12.1}  {:>12.1}  {:>12}",
                detector.name(),
                if parallel { "parallel" } else { "sequential" },
                m.encode_throughput(),
                m.decode_throughput(),
                fmt_duration(wall)
            );
            walls.push(wall);
        }
        println!("  {:<18} speedup {:.2}x", "", speedup(walls[0], walls[1]));
    }

    // ── Summary ───────────────────────────────────────────────────────────────
    section("SUMMARY");
    for r in &rows {
        println!(
            "  {:<6} CTF {:.2}x with a dictionary, {:.2}x embedded; zstd {:.2}x, gzip {:.2}x",
            r.detector.name(),
            r.raw as f64 / r.trained.max(1) as f64,
            r.raw as f64 / r.embedded.max(1) as f64,
            r.raw as f64 / r.zstd.max(1) as f64,
            r.raw as f64 / r.gzip.max(1) as f64
        );
    }
    println!();
    Ok(())
}

// ── small helpers ──────────────────────────────────────────────────────────

fn section(title: &str) {
    println!();
    println!("━━━ {title} {}", "━".repeat(70usize.saturating_sub(title.len() + 5)));
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 { out.push(','); }
        out.push(c);
    }
    out.chars().rev().collect()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
