use super::metadata::MetadataReader;
use crate::error::{AppImageError, Result};

/// SquashFS counts three bytes for the implicit `.` and `..` entries.
const LISTING_BIAS: u32 = 3;
const HEADER_SIZE: u32 = 12;
const ENTRY_SIZE: u32 = 8;
const MAX_ENTRIES_PER_HEADER: u32 = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub inode_ref: u64,
    pub inode_type: u16,
}

/// Reads a whole directory listing.
pub fn read_listing(
    meta: &MetadataReader,
    directory_table: u64,
    block_start: u32,
    offset: u16,
    listing_size: u32,
) -> Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    if listing_size <= LISTING_BIAS {
        return Ok(entries);
    }

    let mut remaining = listing_size - LISTING_BIAS;
    let mut cur = meta.cursor(directory_table, u64::from(block_start), offset as usize)?;

    let consume = |remaining: &mut u32, n: u32| -> Result<()> {
        *remaining = remaining.checked_sub(n).ok_or_else(|| {
            AppImageError::SquashfsError("directory listing overruns its size".into())
        })?;
        Ok(())
    };

    while remaining > 0 {
        consume(&mut remaining, HEADER_SIZE)?;
        let count = cur.u32()? + 1;
        let start = cur.u32()?;
        let _base_inode = cur.u32()?;
        if count > MAX_ENTRIES_PER_HEADER {
            return Err(AppImageError::SquashfsError(format!(
                "directory header claims {count} entries"
            )));
        }

        for _ in 0..count {
            consume(&mut remaining, ENTRY_SIZE)?;
            let entry_offset = cur.u16()?;
            let _inode_delta = cur.u16()?;
            let inode_type = cur.u16()?;
            let name_len = u32::from(cur.u16()?) + 1;
            consume(&mut remaining, name_len)?;

            let name = cur.read_vec(name_len as usize)?;
            let name = String::from_utf8(name).map_err(|err| {
                AppImageError::StringError(format!(
                    "non UTF-8 entry name {:?}",
                    String::from_utf8_lossy(err.as_bytes())
                ))
            })?;
            if name.contains('/') || name == "." || name == ".." {
                return Err(AppImageError::SquashfsError(format!(
                    "invalid entry name {name:?}"
                )));
            }

            entries.push(DirEntry {
                name,
                inode_ref: (u64::from(start) << 16) | u64::from(entry_offset),
                inode_type,
            });
        }
    }

    Ok(entries)
}
