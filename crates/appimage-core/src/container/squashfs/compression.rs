use std::{fmt, io::Read};

use flate2::read::ZlibDecoder;

use crate::error::{AppImageError, Result};

/// Compressors a SquashFS 4.0 superblock can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Lzma,
    Lzo,
    Xz,
    Lz4,
    Zstd,
}

impl TryFrom<u16> for Compression {
    type Error = AppImageError;

    fn try_from(id: u16) -> Result<Self> {
        match id {
            1 => Ok(Compression::Gzip),
            2 => Ok(Compression::Lzma),
            3 => Ok(Compression::Lzo),
            4 => Ok(Compression::Xz),
            5 => Ok(Compression::Lz4),
            6 => Ok(Compression::Zstd),
            other => Err(AppImageError::NotSupported(format!(
                "SquashFS compression id {other}"
            ))),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Compression::Gzip => "gzip",
            Compression::Lzma => "lzma",
            Compression::Lzo => "lzo",
            Compression::Xz => "xz",
            Compression::Lz4 => "lz4",
            Compression::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

/// Drains `reader` into a buffer, refusing output larger than `max_len`.
fn read_bounded<R: Read>(reader: R, max_len: usize, codec: Compression) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(max_len);
    reader
        .take(max_len as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|err| AppImageError::SquashfsError(format!("{codec} stream is corrupt: {err}")))?;
    if out.len() > max_len {
        return Err(AppImageError::SquashfsError(format!(
            "{codec} block decompresses beyond {max_len} bytes"
        )));
    }
    Ok(out)
}

impl Compression {
    /// Whether this build can decode the compressor.
    pub fn is_supported(&self) -> bool {
        match self {
            Compression::Gzip => true,
            Compression::Lzma | Compression::Xz => cfg!(feature = "xz"),
            Compression::Zstd => cfg!(feature = "zstd"),
            Compression::Lzo | Compression::Lz4 => false,
        }
    }

    fn unsupported(&self) -> AppImageError {
        AppImageError::NotSupported(format!("{self} compressed SquashFS images"))
    }

    /// Decompresses one block, whose output must not exceed `max_len` bytes.
    pub fn decompress(&self, input: &[u8], max_len: usize) -> Result<Vec<u8>> {
        match self {
            Compression::Gzip => read_bounded(ZlibDecoder::new(input), max_len, *self),
            #[cfg(feature = "xz")]
            Compression::Xz => read_bounded(xz2::read::XzDecoder::new(input), max_len, *self),
            #[cfg(feature = "xz")]
            Compression::Lzma => {
                let stream = xz2::stream::Stream::new_lzma_decoder(u64::MAX).map_err(|err| {
                    AppImageError::SquashfsError(format!("failed to set up lzma decoder: {err}"))
                })?;
                read_bounded(
                    xz2::read::XzDecoder::new_stream(input, stream),
                    max_len,
                    *self,
                )
            }
            #[cfg(feature = "zstd")]
            Compression::Zstd => zstd::bulk::decompress(input, max_len).map_err(|err| {
                AppImageError::SquashfsError(format!("zstd stream is corrupt: {err}"))
            }),
            #[allow(unreachable_patterns)]
            _ => Err(self.unsupported()),
        }
    }
}
