pub mod bits;
pub mod codec;
pub mod codecs;
pub mod coder;
pub mod container;
pub mod dictionary;
pub mod error;
pub mod format;
pub mod frame;
pub mod huffman;
pub mod metrics;
pub mod records;
pub mod schema;
pub mod table;
pub mod view;

pub use codec::{codec_for, BlockMeta, ColumnCodec, ColumnContext};
pub use coder::{CoderOptions, CtfCoder, DecodedFrame, EncodedFrame};
pub use container::BlockBuilder;
pub use dictionary::{Dictionary, DictionaryBuilder, DictionarySource, TrainOptions};
pub use error::{CtfError, ErrorKind, Result};
pub use format::{CtfHeader, DirEntry, DIR_ENTRY_SIZE, FORMAT_VERSION, HEADER_SIZE, MAGIC};
pub use frame::{ColumnData, Frame};
pub use metrics::{CodecMetrics, ColumnReport, DecodeReport, EncodeReport};
pub use records::{CtfRecords, RecordCoder};
pub use schema::{ColumnSpec, GroupSpec, Schema, SchemaBuilder, StoreMode, Width};
pub use table::FrequencyTable;
pub use view::{ColumnBlock, CtfView};
