// Parquet encoding shared by every table write

use ::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use ::parquet::arrow::ArrowWriter;
use ::parquet::basic::{Compression, ZstdLevel};
use ::parquet::file::properties::WriterProperties;
use arrow::array::RecordBatch;
use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

use crate::Result;

/// Knobs for encoding table data files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParquetOptions {
    pub row_group_size: usize,
    pub zstd_level: i32,
}

impl Default for ParquetOptions {
    fn default() -> Self {
        Self {
            row_group_size: 32 * 1024,
            zstd_level: 3,
        }
    }
}

impl ParquetOptions {
    fn writer_properties(&self) -> WriterProperties {
        let level = ZstdLevel::try_new(self.zstd_level).unwrap_or_default();
        WriterProperties::builder()
            .set_compression(Compression::ZSTD(level))
            .set_max_row_group_size(self.row_group_size.max(1))
            .set_created_by(format!("medallion version {}", env!("CARGO_PKG_VERSION")))
            .build()
    }
}

/// Encode `batch` as one in-memory Parquet file.
pub fn write_parquet(batch: &RecordBatch, options: &ParquetOptions) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut writer =
        ArrowWriter::try_new(&mut buffer, batch.schema(), Some(options.writer_properties()))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(buffer)
}

/// Decode a whole Parquet file into one batch.
///
/// Files written with zero rows still carry their schema, so the result is
/// an empty batch rather than an error.
pub fn read_parquet(bytes: Bytes) -> Result<RecordBatch> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
    // Schema metadata rides along from the writing batch; drop it so batches
    // from different files compare and concatenate cleanly.
    let schema = Arc::new(builder.schema().as_ref().clone().with_metadata(HashMap::new()));
    let reader = builder.build()?;

    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(concat_batches(&schema, &batches)?)
}

/// Arrow schema of a Parquet file, without decoding any rows.
pub fn read_parquet_schema(bytes: Bytes) -> Result<SchemaRef> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
    Ok(Arc::new(
        builder.schema().as_ref().clone().with_metadata(HashMap::new()),
    ))
}
