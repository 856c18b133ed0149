use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use super::{compression::Compression, le_u16};
use crate::{
    error::{AppImageError, Result},
    source::ImageSource,
};

/// Maximum uncompressed size of a metadata block.
pub const METADATA_BLOCK_SIZE: usize = 8192;

const UNCOMPRESSED_BIT: u16 = 0x8000;
const CACHE_LIMIT: usize = 256;

/// A decoded metadata block and the on-disk position of the block after it.
#[derive(Debug)]
pub struct MetadataBlock {
    pub data: Vec<u8>,
    pub next: u64,
}

/// Reads and caches metadata blocks.
pub struct MetadataReader {
    source: ImageSource,
    compression: Compression,
    cache: Mutex<HashMap<u64, Arc<MetadataBlock>>>,
}

impl MetadataReader {
    pub fn new(source: ImageSource, compression: Compression) -> Self {
        Self {
            source,
            compression,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Decodes the metadata block whose header sits at `pos`.
    pub fn block(&self, pos: u64) -> Result<Arc<MetadataBlock>> {
        if let Some(block) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pos)
        {
            return Ok(block.clone());
        }

        let header = self.source.read_vec(pos, 2).map_err(|err| {
            AppImageError::SquashfsError(format!("metadata block header at {pos}: {err}"))
        })?;
        let header = le_u16(&header);
        let stored = header & UNCOMPRESSED_BIT != 0;
        let len = (header & !UNCOMPRESSED_BIT) as usize;
        if len == 0 || len > METADATA_BLOCK_SIZE {
            return Err(AppImageError::SquashfsError(format!(
                "metadata block at {pos} has invalid length {len}"
            )));
        }

        let raw = self.source.read_vec(pos + 2, len).map_err(|err| {
            AppImageError::SquashfsError(format!("metadata block at {pos}: {err}"))
        })?;
        let data = if stored {
            raw
        } else {
            self.compression.decompress(&raw, METADATA_BLOCK_SIZE)?
        };

        let block = Arc::new(MetadataBlock {
            data,
            next: pos + 2 + len as u64,
        });

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.len() >= CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(pos, block.clone());
        Ok(block)
    }

    /// Opens a cursor at `offset` bytes into the block at `table + block_start`.
    pub fn cursor(&self, table: u64, block_start: u64, offset: usize) -> Result<MetadataCursor<'_>> {
        let pos = table.checked_add(block_start).ok_or_else(|| {
            AppImageError::SquashfsError("metadata reference overflows".into())
        })?;
        let block = self.block(pos)?;
        if offset > block.data.len() {
            return Err(AppImageError::SquashfsError(format!(
                "offset {offset} beyond metadata block of {} bytes",
                block.data.len()
            )));
        }
        Ok(MetadataCursor {
            reader: self,
            block,
            offset,
        })
    }
}

/// Sequential reader over a metadata stream that crosses block boundaries.
pub struct MetadataCursor<'a> {
    reader: &'a MetadataReader,
    block: Arc<MetadataBlock>,
    offset: usize,
}

impl MetadataCursor<'_> {
    pub fn read(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            if self.offset == self.block.data.len() {
                self.block = self.reader.block(self.block.next)?;
                self.offset = 0;
            }
            let available = &self.block.data[self.offset..];
            let n = available.len().min(buf.len());
            buf[..n].copy_from_slice(&available[..n]);
            self.offset += n;
            buf = &mut buf[n..];
        }
        Ok(())
    }

    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read(&mut buf)?;
        Ok(buf)
    }

    pub fn u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn stored_block(data: &[u8]) -> Vec<u8> {
        let mut out = ((data.len() as u16) | UNCOMPRESSED_BIT).to_le_bytes().to_vec();
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn test_cursor_crosses_blocks() {
        let mut image = stored_block(&[1, 2, 3]);
        image.extend(stored_block(&[4, 5, 6, 7]));
        let reader = MetadataReader::new(ImageSource::from_bytes(image), Compression::Gzip);

        let mut cursor = reader.cursor(0, 0, 1).unwrap();
        assert_eq!(cursor.read_vec(5).unwrap(), vec![2, 3, 4, 5, 6]);
        assert_eq!(cursor.read_vec(1).unwrap(), vec![7]);
        assert_eq!(cursor.read_vec(1).unwrap_err().kind(), ErrorKind::SquashfsError);
    }

    #[test]
    fn test_invalid_block_length() {
        let reader = MetadataReader::new(
            ImageSource::from_bytes(vec![0, 0, 1, 2]),
            Compression::Gzip,
        );
        assert_eq!(reader.block(0).unwrap_err().kind(), ErrorKind::SquashfsError);
    }

    #[test]
    fn test_offset_beyond_block() {
        let reader = MetadataReader::new(
            ImageSource::from_bytes(stored_block(&[1, 2])),
            Compression::Gzip,
        );
        assert!(reader.cursor(0, 0, 3).is_err());
    }
}
