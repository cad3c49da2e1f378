use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use crate::{AppError, AppResult};

/// Payload compression seam for the frame codec.
///
/// `decompress(compress(x)) == x` must hold for any byte sequence; the codec
/// applies compression before encryption on the way out and the inverse order
/// on the way in.
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> AppResult<Vec<u8>>;
    fn decompress(&self, data: &[u8]) -> AppResult<Vec<u8>>;
}

/// LZ4 block compression with a length prefix.
#[derive(Debug, Default)]
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn compress(&self, data: &[u8]) -> AppResult<Vec<u8>> {
        Ok(compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8]) -> AppResult<Vec<u8>> {
        decompress_size_prepended(data).map_err(|e| AppError::DecompressPayload(e.to_string()))
    }
}
