use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ctf_core::format::BLOCK_FLAG_EMBEDDED_TABLE;
use ctf_core::{
    CodecMetrics, CoderOptions, CtfCoder, CtfView, DictionaryBuilder, DictionarySource,
    TrainOptions,
};
use ctf_detectors::Detector;

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "ctf",
    about = "Compact Timeframe codec: synthesize, decode, inspect and train CTF buffers",
    version
)]
struct Cli {
    /// Log filter, e.g. "debug" or "ctf_core=trace" (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate synthetic timeframes and write them as encoded CTF buffers
    Synth {
        /// Detector: cpv | phos
        detector: Detector,
        /// Output file, or directory when --frames > 1
        output: PathBuf,
        /// Triggers per timeframe
        #[arg(short, long, default_value_t = 1000)]
        triggers: usize,
        /// Seed of the first timeframe; later ones use seed + i
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Number of timeframes to write
        #[arg(short, long, default_value_t = 1)]
        frames: usize,
        #[command(flatten)]
        coder: CoderArgs,
    },
    /// Decode a CTF buffer and summarize its records
    Decode {
        detector: Detector,
        file: PathBuf,
        /// Print every trigger and its entries
        #[arg(long)]
        dump: bool,
        #[command(flatten)]
        coder: CoderArgs,
    },
    /// Print the header and directory of a CTF buffer
    Inspect {
        file: PathBuf,
        /// Print per-block details
        #[arg(long)]
        blocks: bool,
    },
    /// Build a dictionary from the statistics of existing CTF buffers
    Train {
        detector: Detector,
        /// Destination dictionary artifact
        output: PathBuf,
        /// CTF buffers to learn from
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Give every unseen symbol inside spans up to this size frequency 1
        #[arg(long, default_value_t = TrainOptions::default().smooth_span)]
        smooth_span: u64,
        /// gzip-wrap the artifact
        #[arg(long)]
        gzip: bool,
        /// Dictionary the input buffers were encoded with ("none" for embedded tables)
        #[arg(long = "ctf-dict", default_value = "none")]
        dict: String,
    },
    /// Measure encode/decode throughput on synthetic timeframes
    Bench {
        detector: Detector,
        #[arg(short, long, default_value_t = 10_000)]
        triggers: usize,
        #[arg(short, long, default_value_t = 20)]
        iters: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[command(flatten)]
        coder: CoderArgs,
    },
}

/// Options shared by every command that runs the coder.
#[derive(clap::Args)]
struct CoderArgs {
    /// Dictionary artifact, or "none" to embed tables in every buffer
    #[arg(long = "ctf-dict", alias = "dict", default_value = "none")]
    dict: String,
    /// Memory allocation margin factor
    #[arg(long = "mem-factor", default_value_t = 1.0)]
    mem_factor: f64,
    /// 1 = per-column sizes, 2 = also the block directory
    #[arg(short, long, default_value_t = 0)]
    verbosity: u8,
    /// Encode and decode columns in parallel
    #[arg(long)]
    parallel: bool,
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_coder(detector: Detector, args: &CoderArgs) -> anyhow::Result<CtfCoder> {
    let source = DictionarySource::from_option(&args.dict)
        .with_context(|| format!("loading dictionary {:?}", args.dict))?;
    let schema = Arc::new(detector.schema()?);
    let coder = CtfCoder::configure(source, schema)
        .with_context(|| format!("configuring {detector} coder"))?
        .with_options(CoderOptions {
            memory_margin_factor: args.mem_factor,
            verbosity: args.verbosity,
            parallel: args.parallel,
        })?;
    Ok(coder)
}

fn read_buffer(path: &Path) -> anyhow::Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("reading CTF buffer {:?}", path))
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_synth(
    detector: Detector,
    output: PathBuf,
    triggers: usize,
    seed: u64,
    frames: usize,
    args: &CoderArgs,
) -> anyhow::Result<()> {
    let coder = build_coder(detector, args)?;
    if frames > 1 {
        fs::create_dir_all(&output)
            .with_context(|| format!("creating output directory {:?}", output))?;
    }

    let mut metrics = CodecMetrics::new();
    for i in 0..frames {
        let tf = detector.synth(triggers, seed + i as u64);
        let encoded = coder.encode(&tf.to_frame()?)?;
        let path = if frames > 1 {
            output.join(format!("{}_{:04}.ctf", detector.name().to_lowercase(), i))
        } else {
            output.clone()
        };
        fs::write(&path, &encoded.bytes).with_context(|| format!("writing {:?}", path))?;
        debug!(
            path = %path.display(),
            triggers = tf.triggers().len(),
            entries = tf.entry_count(),
            bytes = encoded.bytes.len(),
            "wrote timeframe"
        );
        metrics.record_encode(&encoded.report);
    }

    eprintln!("  detector    : {}", detector);
    eprintln!("  timeframes  : {}", frames);
    eprintln!("  raw size    : {}", human_bytes(metrics.raw_bytes));
    eprintln!("  encoded     : {}", human_bytes(metrics.encoded_bytes));
    eprintln!("  ratio       : {:.2}x", metrics.ratio());
    eprintln!("  relocations : {}", metrics.relocations);
    eprintln!("  elapsed     : {:.3}s", metrics.encode_time.as_secs_f64());
    Ok(())
}

fn run_decode(detector: Detector, file: PathBuf, dump: bool, args: &CoderArgs) -> anyhow::Result<()> {
    let coder = build_coder(detector, args)?;
    let bytes = read_buffer(&file)?;
    let decoded = coder
        .decode(&bytes)
        .with_context(|| format!("decoding {:?} as {detector}", file))?;
    let tf = detector.records(decoded.frame)?;

    eprintln!("  triggers    : {}", tf.triggers().len());
    eprintln!("  entries     : {}", tf.entry_count());
    eprintln!("  encoded     : {}", human_bytes(decoded.report.encoded_bytes as u64));
    eprintln!("  raw size    : {}", human_bytes(decoded.report.raw_bytes as u64));
    eprintln!(
        "  elapsed     : {:.3}ms",
        decoded.report.elapsed.as_secs_f64() * 1000.0
    );

    if dump {
        for (k, t) in tf.triggers().iter().enumerate() {
            println!(
                "trigger {:>6}  orbit {:>10}  bc {:>4}  entries {}..{}",
                k,
                t.orbit,
                t.bc,
                t.first_entry,
                t.entries().end
            );
            for line in tf.entries_of(k) {
                println!("    {}", line);
            }
        }
    }
    Ok(())
}

fn run_inspect(file: PathBuf, show_blocks: bool) -> anyhow::Result<()> {
    let bytes = read_buffer(&file)?;
    let view = CtfView::open(&bytes).with_context(|| format!("parsing {:?}", file))?;
    let h = view.header();

    println!("=== CTF buffer: {:?} ===", file);
    println!();
    println!("  format version : {}", h.version);
    println!("  schema         : {:016x}", h.schema_fingerprint);
    match Detector::ALL
        .into_iter()
        .find(|d| d.schema().map(|s| s.fingerprint()).ok() == Some(h.schema_fingerprint))
    {
        Some(d) => println!("  detector       : {}", d),
        None => println!("  detector       : unknown"),
    }
    if h.dictionary_id == 0 {
        println!("  dictionary     : none (embedded tables)");
    } else {
        println!("  dictionary     : {:016x}", h.dictionary_id);
    }
    println!("  columns        : {}", h.column_count);
    println!("  group counts   : {:?}", view.group_counts());
    println!("  payload        : {}", human_bytes(h.payload_len));
    println!("  buffer size    : {}", human_bytes(view.size() as u64));
    println!("  file on disk   : {}", human_bytes(bytes.len() as u64));

    if show_blocks {
        println!();
        println!(
            "  {:>6}  {:>10}  {:>8}  {:>10}  {:>10}  {:>8}  {:>5}  {:>16}",
            "column", "offset", "meta", "payload", "elements", "mode", "table", "checksum"
        );
        println!("  {}", "-".repeat(88));
        for (i, e) in view.entries().iter().enumerate() {
            let mode = e
                .store_mode()
                .map(|m| format!("{:?}", m))
                .unwrap_or_else(|_| format!("?{}", e.mode));
            println!(
                "  {:>6}  {:>10}  {:>8}  {:>10}  {:>10}  {:>8}  {:>5}  {:016x}",
                i,
                e.offset,
                e.meta_len,
                e.payload_len,
                e.element_count,
                mode,
                if e.has_flag(BLOCK_FLAG_EMBEDDED_TABLE) { "yes" } else { "-" },
                e.checksum
            );
        }
    }
    Ok(())
}

fn run_train(
    detector: Detector,
    output: PathBuf,
    files: Vec<PathBuf>,
    smooth_span: u64,
    gzip: bool,
    dict: String,
) -> anyhow::Result<()> {
    let args = CoderArgs {
        dict,
        mem_factor: 1.0,
        verbosity: 0,
        parallel: true,
    };
    let coder = build_coder(detector, &args)?;
    let mut builder = DictionaryBuilder::new(coder.schema().clone());

    for file in &files {
        let bytes = read_buffer(file)?;
        let decoded = coder
            .decode(&bytes)
            .with_context(|| format!("decoding {:?} as {detector}", file))?;
        builder.add_frame(&decoded.frame)?;
    }

    let dictionary = builder.build(&TrainOptions { smooth_span })?;
    dictionary
        .save(&output, gzip)
        .with_context(|| format!("writing dictionary {:?}", output))?;
    info!(
        frames = builder.frames(),
        id = %format!("{:016x}", dictionary.id()),
        "trained {detector} dictionary"
    );

    println!("  dictionary  : {:?}", output);
    println!("  id          : {:016x}", dictionary.id());
    println!("  frames      : {}", builder.frames());
    for (i, spec) in coder.schema().columns().iter().enumerate() {
        if let Some(t) = dictionary.table(i) {
            println!(
                "  {:<12}: {:>6} symbols in [{}, {}], {:.2} bits/symbol",
                spec.name,
                t.len(),
                t.min(),
                t.max(),
                t.entropy_bits()
            );
        }
    }
    Ok(())
}

fn run_bench(
    detector: Detector,
    triggers: usize,
    iters: usize,
    seed: u64,
    args: &CoderArgs,
) -> anyhow::Result<()> {
    let coder = build_coder(detector, args)?;
    let tf = detector.synth(triggers, seed);
    let frame = tf.to_frame()?;

    eprintln!(
        "benchmarking {} iterations of {} triggers / {} entries...",
        iters,
        tf.triggers().len(),
        tf.entry_count()
    );

    let t0 = Instant::now();
    let mut metrics = CodecMetrics::new();
    let mut last = None;
    for _ in 0..iters {
        let encoded = coder.encode(&frame)?;
        metrics.record_encode(&encoded.report);
        let decoded = coder.decode(&encoded.bytes)?;
        metrics.record_decode(&decoded.report);
        anyhow::ensure!(decoded.frame == frame, "round-trip mismatch");
        last = Some(encoded.report);
    }
    let elapsed = t0.elapsed();

    println!();
    println!("=== {} CTF benchmark ===", detector);
    println!("  {}", metrics.summary());
    println!("  wall time   : {:.3}s", elapsed.as_secs_f64());
    if let Some(report) = last {
        println!();
        println!(
            "  {:<12}  {:>8}  {:>10}  {:>10}  {:>7}",
            "column", "mode", "raw", "encoded", "ratio"
        );
        for c in &report.columns {
            println!(
                "  {:<12}  {:>8}  {:>10}  {:>10}  {:>6.2}x",
                c.name,
                format!("{:?}", c.mode),
                human_bytes(c.raw_bytes as u64),
                human_bytes(c.encoded_bytes as u64),
                c.ratio()
            );
        }
    }
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    match cli.command {
        Commands::Synth {
            detector,
            output,
            triggers,
            seed,
            frames,
            coder,
        } => run_synth(detector, output, triggers, seed, frames, &coder),
        Commands::Decode {
            detector,
            file,
            dump,
            coder,
        } => run_decode(detector, file, dump, &coder),
        Commands::Inspect { file, blocks } => run_inspect(file, blocks),
        Commands::Train {
            detector,
            output,
            files,
            smooth_span,
            gzip,
            dict,
        } => run_train(detector, output, files, smooth_span, gzip, dict),
        Commands::Bench {
            detector,
            triggers,
            iters,
            seed,
            coder,
        } => run_bench(detector, triggers, iters, seed, &coder),
    }
}
