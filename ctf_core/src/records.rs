use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::coder::{CtfCoder, EncodedFrame};
use crate::dictionary::DictionarySource;
use crate::error::Result;
use crate::frame::{ColumnData, Frame};
use crate::metrics::DecodeReport;
use crate::schema::Schema;

/// A typed record set that maps onto the named columns of one schema.
///
/// Implementors own the mapping in both directions; the coder only ever sees
/// the [`Frame`].
pub trait CtfRecords: Sized {
    /// The column layout shared by every value of this type.
    fn schema() -> Result<Schema>;

    fn to_frame(&self) -> Result<Frame>;

    fn from_frame(frame: Frame) -> Result<Self>;
}

/// [`CtfCoder`] specialised to one record type.
#[derive(Debug, Clone)]
pub struct RecordCoder<R> {
    coder: CtfCoder,
    _records: PhantomData<fn() -> R>,
}

impl<R: CtfRecords> RecordCoder<R> {
    pub fn new(dictionary: DictionarySource) -> Result<Self> {
        let coder = CtfCoder::configure(dictionary, Arc::new(R::schema()?))?;
        Ok(Self {
            coder,
            _records: PhantomData,
        })
    }

    pub fn coder(&self) -> &CtfCoder {
        &self.coder
    }

    /// Access for option setters and reconfiguration.
    pub fn coder_mut(&mut self) -> &mut CtfCoder {
        &mut self.coder
    }

    pub fn encode(&self, records: &R) -> Result<EncodedFrame> {
        self.coder.encode(&records.to_frame()?)
    }

    /// Decode one buffer. An empty input is a timeframe with no data: it
    /// yields empty records instead of a truncation error.
    pub fn decode(&self, bytes: &[u8]) -> Result<(R, DecodeReport)> {
        if bytes.is_empty() {
            debug!(schema = self.coder.schema().name(), "empty input, emitting empty records");
            return Ok((R::from_frame(self.empty_frame())?, self.empty_report()));
        }
        let decoded = self.coder.decode(bytes)?;
        Ok((R::from_frame(decoded.frame)?, decoded.report))
    }

    fn empty_frame(&self) -> Frame {
        let mut frame = Frame::new();
        for spec in self.coder.schema().columns() {
            frame.insert(spec.name.clone(), ColumnData::empty(spec.width));
        }
        frame
    }

    fn empty_report(&self) -> DecodeReport {
        DecodeReport {
            group_counts: vec![0; self.coder.schema().groups().len()],
            ..DecodeReport::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CtfError;
    use crate::schema::{StoreMode, Width};

    #[derive(Debug, PartialEq)]
    struct Samples(Vec<u16>);

    impl CtfRecords for Samples {
        fn schema() -> Result<Schema> {
            Schema::builder("SAMPLES")
                .group("samples")
                .column("value", Width::U16, StoreMode::Entropy)
                .build()
        }

        fn to_frame(&self) -> Result<Frame> {
            Ok(Frame::new().with("value", self.0.clone()))
        }

        fn from_frame(mut frame: Frame) -> Result<Self> {
            match frame.take("value") {
                Some(crate::frame::ColumnData::U16(v)) => Ok(Samples(v)),
                _ => Err(CtfError::MissingColumn("value".into())),
            }
        }
    }

    #[test]
    fn typed_round_trip() {
        let coder = RecordCoder::<Samples>::new(DictionarySource::none()).unwrap();
        let input = Samples(vec![7, 7, 7, 9, 1000, 7]);
        let enc = coder.encode(&input).unwrap();
        let (out, report) = coder.decode(&enc.bytes).unwrap();
        assert_eq!(out, input);
        assert_eq!(report.group_counts, vec![6]);
    }

    #[test]
    fn empty_input_decodes_to_empty_records() {
        let coder = RecordCoder::<Samples>::new(DictionarySource::none()).unwrap();
        let (out, report) = coder.decode(&[]).unwrap();
        assert_eq!(out, Samples(vec![]));
        assert_eq!(report.group_counts, vec![0]);
        assert_eq!(report.raw_bytes, 0);

        // The raw coder still treats a missing header as truncation.
        assert!(matches!(
            coder.coder().decode(&[]),
            Err(CtfError::TruncatedBuffer(_))
        ));
    }
}
