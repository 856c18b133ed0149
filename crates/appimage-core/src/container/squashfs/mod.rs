//! Read-only SquashFS 4.0 reader for Type 2 payloads.

mod compression;
mod directory;
mod inode;
mod metadata;
mod superblock;

use std::io::{self, Read};

use tracing::debug;

pub use self::compression::Compression;
pub(crate) use self::{
    directory::DirEntry,
    inode::{Inode, InodeKind},
};
use self::{
    directory::read_listing,
    inode::read_inode,
    metadata::MetadataReader,
    superblock::{Superblock, SUPERBLOCK_SIZE},
};
use crate::{
    error::{AppImageError, Result},
    source::ImageSource,
};

const DATA_UNCOMPRESSED_BIT: u32 = 1 << 24;
const FRAGMENT_ENTRY_SIZE: u64 = 16;
const FRAGMENTS_PER_BLOCK: u32 = 512;

pub(crate) fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

pub(crate) fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

pub(crate) fn le_u64(b: &[u8]) -> u64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&b[..8]);
    u64::from_le_bytes(a)
}

fn squashfs_io(what: &str) -> impl Fn(io::Error) -> AppImageError + '_ {
    move |err| AppImageError::SquashfsError(format!("{what}: {err}"))
}

pub struct SquashfsReader {
    source: ImageSource,
    superblock: Superblock,
    meta: MetadataReader,
}

impl SquashfsReader {
    pub fn open(source: ImageSource) -> Result<Self> {
        let mut raw = [0u8; SUPERBLOCK_SIZE];
        source
            .read_exact_at(&mut raw, 0)
            .map_err(squashfs_io("reading superblock"))?;
        let superblock = Superblock::parse(&raw, source.len())?;

        debug!(
            compression = %superblock.compression,
            block_size = superblock.block_size,
            inodes = superblock.inode_count,
            fragments = superblock.fragment_count,
            compressor_options = superblock.has_compressor_options(),
            "opened SquashFS image"
        );

        if !superblock.compression.is_supported() {
            return Err(AppImageError::NotSupported(format!(
                "{} compressed SquashFS images",
                superblock.compression
            )));
        }

        let meta = MetadataReader::new(source.clone(), superblock.compression);
        Ok(Self {
            source,
            superblock,
            meta,
        })
    }

    pub fn compression(&self) -> Compression {
        self.superblock.compression
    }

    pub fn block_size(&self) -> u32 {
        self.superblock.block_size
    }

    pub(crate) fn root_ref(&self) -> u64 {
        self.superblock.root_inode
    }

    pub(crate) fn inode(&self, inode_ref: u64) -> Result<Inode> {
        read_inode(
            &self.meta,
            self.superblock.inode_table,
            inode_ref,
            self.superblock.block_size,
        )
    }

    pub(crate) fn read_dir(&self, inode: &Inode) -> Result<Vec<DirEntry>> {
        match inode.kind {
            InodeKind::Directory {
                block_start,
                offset,
                listing_size,
            } => read_listing(
                &self.meta,
                self.superblock.directory_table,
                block_start,
                offset,
                listing_size,
            ),
            _ => Err(AppImageError::SquashfsError(format!(
                "inode {} is not a directory",
                inode.inode_number
            ))),
        }
    }

    /// Looks up fragment `index`, returning its on-disk start and size word.
    fn fragment(&self, index: u32) -> Result<(u64, u32)> {
        if index >= self.superblock.fragment_count {
            return Err(AppImageError::SquashfsError(format!(
                "fragment {index} out of range ({} fragments)",
                self.superblock.fragment_count
            )));
        }

        let pointer_pos = self.superblock.fragment_table
            + u64::from(index / FRAGMENTS_PER_BLOCK) * 8;
        let pointer = self
            .source
            .read_vec(pointer_pos, 8)
            .map_err(squashfs_io("reading fragment index"))?;
        let block = le_u64(&pointer);

        let offset = u64::from(index % FRAGMENTS_PER_BLOCK) * FRAGMENT_ENTRY_SIZE;
        let mut cur = self.meta.cursor(0, block, offset as usize)?;
        let start = cur.u64()?;
        let size = cur.u32()?;
        Ok((start, size))
    }

    /// Reads one data or fragment block given its size word.
    fn data_block(&self, pos: u64, size_word: u32) -> Result<Vec<u8>> {
        let on_disk = size_word & !DATA_UNCOMPRESSED_BIT;
        if on_disk > self.superblock.block_size {
            return Err(AppImageError::SquashfsError(format!(
                "data block at {pos} is {on_disk} bytes, larger than the block size"
            )));
        }

        let raw = self
            .source
            .read_vec(pos, on_disk as usize)
            .map_err(squashfs_io("reading data block"))?;
        if size_word & DATA_UNCOMPRESSED_BIT != 0 {
            Ok(raw)
        } else {
            self.superblock
                .compression
                .decompress(&raw, self.superblock.block_size as usize)
        }
    }

    pub(crate) fn file_reader(&self, inode: &Inode) -> Result<SquashfsFileReader<'_>> {
        match &inode.kind {
            InodeKind::File {
                blocks_start,
                file_size,
                fragment,
                block_sizes,
            } => Ok(SquashfsFileReader {
                reader: self,
                block_sizes: block_sizes.clone(),
                fragment: *fragment,
                file_size: *file_size,
                next_block: 0,
                data_pos: *blocks_start,
                produced: 0,
                buf: Vec::new(),
                buf_pos: 0,
            }),
            _ => Err(AppImageError::InvalidParameter(format!(
                "inode {} is not a regular file",
                inode.inode_number
            ))),
        }
    }
}

/// Streams a regular file's data blocks followed by its fragment tail.
pub struct SquashfsFileReader<'a> {
    reader: &'a SquashfsReader,
    block_sizes: Vec<u32>,
    fragment: Option<(u32, u32)>,
    file_size: u64,
    next_block: usize,
    data_pos: u64,
    produced: u64,
    buf: Vec<u8>,
    buf_pos: usize,
}

impl SquashfsFileReader<'_> {
    fn fill(&mut self) -> Result<()> {
        let block_size = u64::from(self.reader.block_size());
        let remaining = self.file_size - self.produced;

        let chunk = if let Some(&word) = self.block_sizes.get(self.next_block) {
            self.next_block += 1;
            let expected = remaining.min(block_size) as usize;
            if word == 0 {
                vec![0u8; expected]
            } else {
                let mut data = self.reader.data_block(self.data_pos, word)?;
                self.data_pos += u64::from(word & !DATA_UNCOMPRESSED_BIT);
                if data.len() < expected {
                    return Err(AppImageError::SquashfsError(format!(
                        "data block {} holds {} bytes, expected {expected}",
                        self.next_block - 1,
                        data.len()
                    )));
                }
                data.truncate(expected);
                data
            }
        } else {
            let (index, offset) = self.fragment.ok_or_else(|| {
                AppImageError::SquashfsError(format!(
                    "file ends {remaining} bytes early with no fragment"
                ))
            })?;
            let (start, word) = self.reader.fragment(index)?;
            let block = self.reader.data_block(start, word)?;
            let offset = offset as usize;
            let tail = block
                .get(offset..offset.saturating_add(remaining as usize))
                .ok_or_else(|| {
                    AppImageError::SquashfsError(format!(
                        "fragment {index} too small for tail at offset {offset}"
                    ))
                })?;
            self.fragment = None;
            tail.to_vec()
        };

        self.produced += chunk.len() as u64;
        self.buf = chunk;
        self.buf_pos = 0;
        Ok(())
    }
}

impl Read for SquashfsFileReader<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        while self.buf_pos == self.buf.len() {
            if self.produced >= self.file_size {
                return Ok(0);
            }
            self.fill().map_err(AppImageError::into_io)?;
        }

        let n = out.len().min(self.buf.len() - self.buf_pos);
        out[..n].copy_from_slice(&self.buf[self.buf_pos..self.buf_pos + n]);
        self.buf_pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ErrorKind, testing::SquashfsBuilder};

    fn open(builder: SquashfsBuilder) -> SquashfsReader {
        SquashfsReader::open(ImageSource::from_bytes(builder.build())).unwrap()
    }

    fn read_path(reader: &SquashfsReader, path: &str) -> Vec<u8> {
        let mut inode = reader.inode(reader.root_ref()).unwrap();
        for name in path.split('/') {
            let entry = reader
                .read_dir(&inode)
                .unwrap()
                .into_iter()
                .find(|e| e.name == name)
                .unwrap();
            inode = reader.inode(entry.inode_ref).unwrap();
        }
        let mut out = Vec::new();
        reader
            .file_reader(&inode)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 253) as u8).collect()
    }

    #[test]
    fn test_uncompressed_blocks_and_fragment() {
        let data = pattern(4096 * 2 + 100);
        let reader = open(SquashfsBuilder::new().file("dir/file.bin", &data));
        assert_eq!(read_path(&reader, "dir/file.bin"), data);
    }

    #[test]
    fn test_zlib_blocks_and_tail_block() {
        let data = pattern(4096 * 3 + 1);
        let reader = open(
            SquashfsBuilder::new()
                .compress_data(true)
                .compress_metadata(true)
                .fragments(false)
                .file("a", &data),
        );
        assert_eq!(reader.compression(), Compression::Gzip);
        assert_eq!(read_path(&reader, "a"), data);
    }

    #[test]
    fn test_sparse_block() {
        let mut data = vec![0u8; 4096];
        data.extend(pattern(50));
        let reader = open(SquashfsBuilder::new().sparse_zero_blocks(true).file("s", &data));
        assert_eq!(read_path(&reader, "s"), data);
    }

    #[test]
    fn test_extended_inodes() {
        let reader = open(
            SquashfsBuilder::new()
                .extended_inodes(true)
                .file("x/y/z.txt", b"deep")
                .symlink("x/link", "y/z.txt"),
        );
        assert_eq!(read_path(&reader, "x/y/z.txt"), b"deep");

        let root = reader.inode(reader.root_ref()).unwrap();
        let x = reader.read_dir(&root).unwrap();
        let x = reader.inode(x[0].inode_ref).unwrap();
        let link = reader
            .read_dir(&x)
            .unwrap()
            .into_iter()
            .find(|e| e.name == "link")
            .unwrap();
        assert_eq!(
            reader.inode(link.inode_ref).unwrap().kind,
            InodeKind::Symlink {
                target: "y/z.txt".into()
            }
        );
    }

    #[test]
    fn test_listing_spans_metadata_blocks() {
        let mut builder = SquashfsBuilder::new().compress_metadata(true);
        for i in 0..600 {
            builder = builder.file(&format!("many/file-with-a-longish-name-{i:04}"), b"x");
        }
        let reader = open(builder);

        let root = reader.inode(reader.root_ref()).unwrap();
        let many = reader.read_dir(&root).unwrap();
        let many = reader.inode(many[0].inode_ref).unwrap();
        let entries = reader.read_dir(&many).unwrap();
        assert_eq!(entries.len(), 600);
        assert_eq!(read_path(&reader, "many/file-with-a-longish-name-0599"), b"x");
    }

    #[test]
    fn test_bad_magic_and_version() {
        let mut image = SquashfsBuilder::new().file("a", b"a").build();
        image[0] = b'x';
        let err = SquashfsReader::open(ImageSource::from_bytes(image)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::SquashfsError);

        let mut image = SquashfsBuilder::new().file("a", b"a").build();
        image[28] = 3;
        let err = SquashfsReader::open(ImageSource::from_bytes(image)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::SquashfsError);
    }

    #[test]
    fn test_truncated_image() {
        let image = SquashfsBuilder::new().file("a", &pattern(9000)).build();
        let truncated = image[..image.len() / 2].to_vec();
        let err = SquashfsReader::open(ImageSource::from_bytes(truncated))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::SquashfsError);
    }

    #[test]
    fn test_unsupported_compressor() {
        let mut image = SquashfsBuilder::new().file("a", b"a").build();
        // lzo
        image[20] = 3;
        let err = SquashfsReader::open(ImageSource::from_bytes(image)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }
}
