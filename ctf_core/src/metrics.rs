use std::fmt;
use std::time::Duration;

use crate::schema::StoreMode;

/// Size accounting for one encoded column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnReport {
    pub name: String,
    pub mode: StoreMode,
    pub elements: usize,
    /// Bytes the column occupies as a plain array.
    pub raw_bytes: usize,
    /// Block bytes in the buffer, sidecar included.
    pub encoded_bytes: usize,
}

impl ColumnReport {
    /// `raw / encoded`; 0 for an empty column.
    pub fn ratio(&self) -> f64 {
        ratio(self.raw_bytes, self.encoded_bytes)
    }
}

/// Outcome of one [`CtfCoder::encode`](crate::CtfCoder::encode) call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeReport {
    pub raw_bytes: usize,
    /// Final buffer length, header and directory included.
    pub encoded_bytes: usize,
    /// Bytes reserved up front from the memory margin factor.
    pub preallocated: usize,
    /// Blocks that outgrew their reservation.
    pub relocations: usize,
    pub elapsed: Duration,
    pub columns: Vec<ColumnReport>,
}

impl EncodeReport {
    pub fn ratio(&self) -> f64 {
        ratio(self.raw_bytes, self.encoded_bytes)
    }
}

/// Outcome of one [`CtfCoder::decode`](crate::CtfCoder::decode) call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeReport {
    pub encoded_bytes: usize,
    pub raw_bytes: usize,
    /// Element count of every group, in schema order.
    pub group_counts: Vec<u32>,
    pub elapsed: Duration,
}

fn ratio(raw: usize, encoded: usize) -> f64 {
    if encoded == 0 {
        0.0
    } else {
        raw as f64 / encoded as f64
    }
}

fn mb_per_s(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        0.0
    } else {
        bytes as f64 / 1e6 / secs
    }
}

// ── Accumulator ────────────────────────────────────────────────────────────

/// Running totals over many encode/decode calls.
///
/// Owned and threaded by the caller; the library keeps no global counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodecMetrics {
    pub encode_calls: u64,
    pub decode_calls: u64,
    pub raw_bytes: u64,
    pub encoded_bytes: u64,
    /// Raw bytes produced by recorded decodes.
    pub decoded_raw_bytes: u64,
    pub relocations: u64,
    pub encode_time: Duration,
    pub decode_time: Duration,
}

impl CodecMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_encode(&mut self, report: &EncodeReport) {
        self.encode_calls += 1;
        self.raw_bytes += report.raw_bytes as u64;
        self.encoded_bytes += report.encoded_bytes as u64;
        self.relocations += report.relocations as u64;
        self.encode_time += report.elapsed;
    }

    pub fn record_decode(&mut self, report: &DecodeReport) {
        self.decode_calls += 1;
        self.decoded_raw_bytes += report.raw_bytes as u64;
        self.decode_time += report.elapsed;
    }

    pub fn ratio(&self) -> f64 {
        ratio(self.raw_bytes as usize, self.encoded_bytes as usize)
    }

    /// Encode throughput over raw bytes, in MB/s.
    pub fn encode_throughput(&self) -> f64 {
        mb_per_s(self.raw_bytes, self.encode_time)
    }

    /// Decode throughput over decoded raw bytes, in MB/s.
    pub fn decode_throughput(&self) -> f64 {
        mb_per_s(self.decoded_raw_bytes, self.decode_time)
    }

    /// One-line human-readable summary.
    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CodecMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} encodes ({:.1} MB/s), {} decodes ({:.1} MB/s), {} -> {} bytes ({:.2}x), {} relocations",
            self.encode_calls,
            self.encode_throughput(),
            self.decode_calls,
            self.decode_throughput(),
            self.raw_bytes,
            self.encoded_bytes,
            self.ratio(),
            self.relocations
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_reports() {
        let mut m = CodecMetrics::new();
        let enc = EncodeReport {
            raw_bytes: 1000,
            encoded_bytes: 250,
            relocations: 1,
            elapsed: Duration::from_millis(2),
            ..Default::default()
        };
        m.record_encode(&enc);
        m.record_encode(&enc);
        m.record_decode(&DecodeReport {
            raw_bytes: 1000,
            elapsed: Duration::from_millis(1),
            ..Default::default()
        });
        assert_eq!(m.encode_calls, 2);
        assert_eq!(m.raw_bytes, 2000);
        assert_eq!(m.relocations, 2);
        assert!((m.ratio() - 4.0).abs() < 1e-12);
        assert!(m.decode_throughput() > 0.0);
        assert!(m.summary().contains("2 encodes"));
    }

    #[test]
    fn decode_throughput_counts_only_decoded_bytes() {
        let mut m = CodecMetrics::new();
        m.record_encode(&EncodeReport {
            raw_bytes: 8_000_000,
            elapsed: Duration::from_secs(1),
            ..Default::default()
        });
        assert_eq!(m.decode_throughput(), 0.0);

        m.record_decode(&DecodeReport {
            raw_bytes: 2_000_000,
            elapsed: Duration::from_secs(1),
            ..Default::default()
        });
        assert_eq!(m.decoded_raw_bytes, 2_000_000);
        assert!((m.decode_throughput() - 2.0).abs() < 1e-9);
        assert!((m.encode_throughput() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn empty_column_ratio_is_zero() {
        let r = ColumnReport {
            name: "x".into(),
            mode: StoreMode::Entropy,
            elements: 0,
            raw_bytes: 0,
            encoded_bytes: 0,
        };
        assert_eq!(r.ratio(), 0.0);
    }
}
