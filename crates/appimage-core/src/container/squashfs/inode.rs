use super::metadata::MetadataReader;
use crate::error::{AppImageError, Result};

pub const NO_FRAGMENT: u32 = 0xFFFF_FFFF;

pub const BASIC_DIR: u16 = 1;
pub const BASIC_FILE: u16 = 2;
pub const BASIC_SYMLINK: u16 = 3;
pub const EXT_DIR: u16 = 8;
pub const EXT_FILE: u16 = 9;
pub const EXT_SYMLINK: u16 = 10;

/// Splits an inode reference into (metadata block start, offset within block).
pub fn split_ref(inode_ref: u64) -> (u64, usize) {
    (inode_ref >> 16, (inode_ref & 0xFFFF) as usize)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InodeKind {
    Directory {
        block_start: u32,
        offset: u16,
        /// Listing size in bytes, including the three bytes SquashFS adds.
        listing_size: u32,
    },
    File {
        blocks_start: u64,
        file_size: u64,
        fragment: Option<(u32, u32)>,
        block_sizes: Vec<u32>,
    },
    Symlink {
        target: String,
    },
    /// Device, FIFO and socket inodes.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub inode_type: u16,
    pub mode: u16,
    pub inode_number: u32,
    pub kind: InodeKind,
}

fn file_blocks(file_size: u64, block_size: u32, has_fragment: bool) -> Result<usize> {
    let block_size = u64::from(block_size);
    let count = if has_fragment {
        file_size / block_size
    } else {
        file_size.div_ceil(block_size)
    };
    usize::try_from(count)
        .map_err(|_| AppImageError::SquashfsError(format!("file of {file_size} bytes is too large")))
}

/// Reads the inode at `inode_ref` from the inode table.
pub fn read_inode(
    meta: &MetadataReader,
    inode_table: u64,
    inode_ref: u64,
    block_size: u32,
) -> Result<Inode> {
    let (block, offset) = split_ref(inode_ref);
    let mut cur = meta.cursor(inode_table, block, offset)?;

    let inode_type = cur.u16()?;
    let mode = cur.u16()?;
    let _uid = cur.u16()?;
    let _gid = cur.u16()?;
    let _mtime = cur.u32()?;
    let inode_number = cur.u32()?;

    let kind = match inode_type {
        BASIC_DIR => {
            let block_start = cur.u32()?;
            let _nlink = cur.u32()?;
            let listing_size = u32::from(cur.u16()?);
            let offset = cur.u16()?;
            let _parent = cur.u32()?;
            InodeKind::Directory {
                block_start,
                offset,
                listing_size,
            }
        }
        EXT_DIR => {
            let _nlink = cur.u32()?;
            let listing_size = cur.u32()?;
            let block_start = cur.u32()?;
            let _parent = cur.u32()?;
            let _index_count = cur.u16()?;
            let offset = cur.u16()?;
            let _xattr = cur.u32()?;
            InodeKind::Directory {
                block_start,
                offset,
                listing_size,
            }
        }
        BASIC_FILE | EXT_FILE => {
            let (blocks_start, fragment, frag_offset, file_size) = if inode_type == BASIC_FILE {
                let blocks_start = u64::from(cur.u32()?);
                let fragment = cur.u32()?;
                let frag_offset = cur.u32()?;
                let file_size = u64::from(cur.u32()?);
                (blocks_start, fragment, frag_offset, file_size)
            } else {
                let blocks_start = cur.u64()?;
                let file_size = cur.u64()?;
                let _sparse = cur.u64()?;
                let _nlink = cur.u32()?;
                let fragment = cur.u32()?;
                let frag_offset = cur.u32()?;
                let _xattr = cur.u32()?;
                (blocks_start, fragment, frag_offset, file_size)
            };

            let has_fragment = fragment != NO_FRAGMENT;
            let count = file_blocks(file_size, block_size, has_fragment)?;
            let mut block_sizes = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                block_sizes.push(cur.u32()?);
            }

            InodeKind::File {
                blocks_start,
                file_size,
                fragment: has_fragment.then_some((fragment, frag_offset)),
                block_sizes,
            }
        }
        BASIC_SYMLINK | EXT_SYMLINK => {
            let _nlink = cur.u32()?;
            let target_size = cur.u32()?;
            if target_size > 4096 {
                return Err(AppImageError::SquashfsError(format!(
                    "symlink target of {target_size} bytes"
                )));
            }
            let target = cur.read_vec(target_size as usize)?;
            let target = String::from_utf8(target).map_err(|_| {
                AppImageError::StringError(format!("symlink target of inode {inode_number}"))
            })?;
            InodeKind::Symlink { target }
        }
        4..=7 | 11..=14 => InodeKind::Other,
        other => {
            return Err(AppImageError::SquashfsError(format!(
                "unknown inode type {other}"
            )))
        }
    };

    Ok(Inode {
        inode_type,
        mode,
        inode_number,
        kind,
    })
}
