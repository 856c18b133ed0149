use super::{compression::Compression, le_u16, le_u32, le_u64};
use crate::{
    error::{AppImageError, Result},
    format::SQUASHFS_MAGIC_BYTES,
};

pub const SUPERBLOCK_SIZE: usize = 96;

const MIN_BLOCK_SIZE: u32 = 4 * 1024;
const MAX_BLOCK_SIZE: u32 = 1024 * 1024;

/// Superblock flag: compressor options follow the superblock.
pub const FLAG_COMPRESSOR_OPTIONS: u16 = 0x0400;

#[derive(Debug, Clone)]
pub struct Superblock {
    pub inode_count: u32,
    pub block_size: u32,
    pub fragment_count: u32,
    pub compression: Compression,
    pub flags: u16,
    pub root_inode: u64,
    pub bytes_used: u64,
    pub inode_table: u64,
    pub directory_table: u64,
    pub fragment_table: u64,
}

impl Superblock {
    pub fn parse(b: &[u8; SUPERBLOCK_SIZE], image_len: u64) -> Result<Self> {
        if b[0..4] != SQUASHFS_MAGIC_BYTES {
            return Err(AppImageError::SquashfsError("bad superblock magic".into()));
        }

        let major = le_u16(&b[28..]);
        let minor = le_u16(&b[30..]);
        if (major, minor) != (4, 0) {
            return Err(AppImageError::SquashfsError(format!(
                "unsupported version {major}.{minor}"
            )));
        }

        let block_size = le_u32(&b[12..]);
        let block_log = le_u16(&b[22..]);
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size)
            || !block_size.is_power_of_two()
            || u32::from(block_log) != block_size.trailing_zeros()
        {
            return Err(AppImageError::SquashfsError(format!(
                "invalid block size {block_size} (log {block_log})"
            )));
        }

        let sb = Superblock {
            inode_count: le_u32(&b[4..]),
            block_size,
            fragment_count: le_u32(&b[16..]),
            compression: Compression::try_from(le_u16(&b[20..]))?,
            flags: le_u16(&b[24..]),
            root_inode: le_u64(&b[32..]),
            bytes_used: le_u64(&b[40..]),
            inode_table: le_u64(&b[64..]),
            directory_table: le_u64(&b[72..]),
            fragment_table: le_u64(&b[80..]),
        };

        if sb.bytes_used > image_len {
            return Err(AppImageError::SquashfsError(format!(
                "image claims {} bytes but only {image_len} are present",
                sb.bytes_used
            )));
        }
        for (name, start) in [
            ("inode table", sb.inode_table),
            ("directory table", sb.directory_table),
        ] {
            if start < SUPERBLOCK_SIZE as u64 || start >= sb.bytes_used {
                return Err(AppImageError::SquashfsError(format!(
                    "{name} start {start} lies outside the image"
                )));
            }
        }
        if sb.inode_table > sb.directory_table {
            return Err(AppImageError::SquashfsError(
                "inode table follows directory table".into(),
            ));
        }

        Ok(sb)
    }

    pub fn has_compressor_options(&self) -> bool {
        self.flags & FLAG_COMPRESSOR_OPTIONS != 0
    }
}
