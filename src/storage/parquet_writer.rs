//! Parquet encoding for committed tables

use crate::Result;
use arrow_array::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties, WriterVersion};

/// Encodes one table's rows of a commit as a single Parquet file
#[derive(Debug, Clone)]
pub struct ParquetWriter {
    props: WriterProperties,
}

impl ParquetWriter {
    pub fn new() -> Self {
        Self {
            props: Self::build_writer_properties(),
        }
    }

    fn build_writer_properties() -> WriterProperties {
        WriterProperties::builder()
            .set_writer_version(WriterVersion::PARQUET_2_0)
            // ZSTD at the codec default level
            .set_compression(Compression::ZSTD(ZstdLevel::default()))
            // Metric names and label strings repeat heavily
            .set_dictionary_enabled(true)
            .set_max_row_group_size(500_000)
            // Min/max fingerprint and timestamp per page for later pruning
            .set_statistics_enabled(EnabledStatistics::Page)
            .build()
    }

    /// Write a record batch to Parquet bytes
    pub fn write_batch(&self, batch: &RecordBatch) -> Result<Bytes> {
        let mut buffer = Vec::new();
        {
            let mut writer =
                ArrowWriter::try_new(&mut buffer, batch.schema(), Some(self.props.clone()))?;
            writer.write(batch)?;
            writer.close()?;
        }
        Ok(Bytes::from(buffer))
    }
}

impl Default for ParquetWriter {
    fn default() -> Self {
        Self::new()
    }
}
