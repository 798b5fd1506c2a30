use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};

/// Compressed block storage for snapshot blobs.
#[derive(Serialize, Deserialize)]
pub struct CompressedBlock {
    pub data: Vec<u8>,
    pub original_size: usize,
    pub compression: CompressionType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionType {
    None,
    /// Fast compression, ratio 2-3x.
    Lz4,
    /// Better ratio (3-5x), slower.
    Zstd,
    /// Balanced.
    Snappy,
}

impl CompressedBlock {
    pub fn compress(data: &[u8], compression: CompressionType) -> Result<Self> {
        let compressed = match compression {
            CompressionType::None => data.to_vec(),

            CompressionType::Lz4 => lz4_flex::compress_prepend_size(data),

            CompressionType::Zstd => zstd::encode_all(data, 3)
                .map_err(|e| Error::Internal(format!("zstd compression failed: {}", e)))?,

            CompressionType::Snappy => {
                let mut encoder = snap::raw::Encoder::new();
                encoder
                    .compress_vec(data)
                    .map_err(|e| Error::Internal(format!("snappy compression failed: {}", e)))?
            }
        };

        Ok(CompressedBlock {
            data: compressed,
            original_size: data.len(),
            compression,
        })
    }

    pub fn decompress(&self) -> Result<Vec<u8>> {
        let decompressed = match self.compression {
            CompressionType::None => self.data.clone(),

            CompressionType::Lz4 => lz4_flex::decompress_size_prepended(&self.data)
                .map_err(|e| Error::Internal(format!("lz4 decompression failed: {}", e)))?,

            CompressionType::Zstd => zstd::decode_all(self.data.as_slice())
                .map_err(|e| Error::Internal(format!("zstd decompression failed: {}", e)))?,

            CompressionType::Snappy => {
                let mut decoder = snap::raw::Decoder::new();
                decoder
                    .decompress_vec(&self.data)
                    .map_err(|e| Error::Internal(format!("snappy decompression failed: {}", e)))?
            }
        };
        if decompressed.len() != self.original_size {
            return Err(Error::Internal(format!(
                "decompressed size {} does not match recorded {}",
                decompressed.len(),
                self.original_size
            )));
        }
        Ok(decompressed)
    }
}
