//! Payload format detection.

use std::{fmt, io};

use serde::Serialize;
use tracing::trace;

use crate::source::ReadAt;

/// SquashFS superblock magic (`hsqs`).
pub const SQUASHFS_MAGIC_BYTES: [u8; 4] = *b"hsqs";

/// ISO9660 standard identifier found in every volume descriptor.
pub const ISO9660_MAGIC_BYTES: [u8; 5] = *b"CD001";

/// Distance from the start of an ISO9660 volume to the identifier of its first descriptor.
pub const ISO9660_MAGIC_OFFSET: u64 = 32769;

/// Size of the ISO9660 system area, where hybrid images keep their ELF runtime.
pub const ISO9660_SYSTEM_AREA: u64 = 32768;

/// AppImage runtime magic (`AI` + type byte) stored in the ELF identification padding.
pub const APPIMAGE_MAGIC_BYTES: [u8; 2] = [0x41, 0x49];
pub const APPIMAGE_MAGIC_OFFSET: u64 = 8;

/// AppImage payload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Format {
    /// ISO9660 payload.
    Type1,
    /// SquashFS payload.
    Type2,
    Unknown,
}

impl Format {
    pub fn as_number(&self) -> Option<u8> {
        match self {
            Format::Type1 => Some(1),
            Format::Type2 => Some(2),
            Format::Unknown => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Type1 => write!(f, "Type 1 (ISO9660)"),
            Format::Type2 => write!(f, "Type 2 (SquashFS)"),
            Format::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Result of payload classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub format: Format,
    /// Offset of the container volume within the host file.
    pub payload_offset: u64,
}

/// Reads `N` bytes at `offset`, or `None` when the window extends past `file_size`.
fn window<const N: usize>(
    source: &dyn ReadAt,
    file_size: u64,
    offset: u64,
) -> io::Result<Option<[u8; N]>> {
    match offset.checked_add(N as u64) {
        Some(end) if end <= file_size => {
            let mut buf = [0u8; N];
            source.read_exact_at(&mut buf, offset)?;
            Ok(Some(buf))
        }
        _ => Ok(None),
    }
}

/// Classifies the payload that follows the ELF runtime.
///
/// A SquashFS superblock at `elf_end` yields [`Format::Type2`]. An ISO9660 descriptor at
/// `elf_end + 32769` yields [`Format::Type1`]. Hybrid ISO images carry the runtime inside the
/// system area, so an ELF ending within the first 32 KiB with the descriptor at absolute byte
/// 32769 is also Type 1, with the volume starting at 0. Anything else is
/// [`Format::Unknown`]; windows that fall past the end of the file never match.
pub fn classify(source: &dyn ReadAt, file_size: u64, elf_end: u64) -> io::Result<Classification> {
    let unknown = Classification {
        format: Format::Unknown,
        payload_offset: elf_end,
    };

    if window::<4>(source, file_size, elf_end)? == Some(SQUASHFS_MAGIC_BYTES) {
        trace!(offset = elf_end, "found SquashFS superblock");
        return Ok(Classification {
            format: Format::Type2,
            payload_offset: elf_end,
        });
    }

    let Some(iso_at) = elf_end.checked_add(ISO9660_MAGIC_OFFSET) else {
        return Ok(unknown);
    };
    if window::<5>(source, file_size, iso_at)? == Some(ISO9660_MAGIC_BYTES) {
        trace!(offset = elf_end, "found ISO9660 volume after ELF");
        return Ok(Classification {
            format: Format::Type1,
            payload_offset: elf_end,
        });
    }

    if elf_end <= ISO9660_SYSTEM_AREA
        && window::<5>(source, file_size, ISO9660_MAGIC_OFFSET)? == Some(ISO9660_MAGIC_BYTES)
    {
        trace!("found hybrid ISO9660 volume");
        return Ok(Classification {
            format: Format::Type1,
            payload_offset: 0,
        });
    }

    Ok(unknown)
}

/// Returns the type byte of the `AI` runtime magic, if present.
pub fn runtime_type(source: &dyn ReadAt, file_size: u64) -> io::Result<Option<u8>> {
    Ok(window::<3>(source, file_size, APPIMAGE_MAGIC_OFFSET)?
        .filter(|magic| magic[..2] == APPIMAGE_MAGIC_BYTES)
        .map(|magic| magic[2]))
}
