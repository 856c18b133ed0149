//! ELF header parsing, used to find where the runtime ends and the embedded image begins.

use std::io;

use tracing::trace;

use crate::{
    error::{AppImageError, ErrorContext, Result},
    source::ReadAt,
};

/// Magic bytes for ELF executables.
pub const ELF_MAGIC_BYTES: [u8; 4] = [0x7f, 0x45, 0x4c, 0x46];

const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;
const EV_CURRENT: u8 = 1;
const SHT_NOBITS: u32 = 8;

/// Upper bound on section or program header table size we are willing to read.
const MAX_TABLE_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Elf32,
    Elf64,
}

#[derive(Debug, Clone, Copy)]
struct Endian {
    big: bool,
}

impl Endian {
    fn u16(self, b: &[u8]) -> u16 {
        let b = [b[0], b[1]];
        if self.big {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        let b = [b[0], b[1], b[2], b[3]];
        if self.big {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        }
    }

    fn u64(self, b: &[u8]) -> u64 {
        let mut a = [0u8; 8];
        a.copy_from_slice(&b[..8]);
        if self.big {
            u64::from_be_bytes(a)
        } else {
            u64::from_le_bytes(a)
        }
    }
}

/// The parts of the ELF file header that describe file layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfHeader {
    pub is_64bit: bool,
    pub big_endian: bool,
    pub header_size: u64,
    pub shoff: u64,
    pub shentsize: u64,
    pub shnum: u64,
    pub phoff: u64,
    pub phentsize: u64,
    pub phnum: u64,
}

fn read_exact(source: &dyn ReadAt, buf: &mut [u8], offset: u64, what: &str) -> Result<()> {
    source
        .read_exact_at(buf, offset)
        .with_context(|| format!("reading {what} at offset {offset}"))
}

fn table_end(offset: u64, entsize: u64, count: u64, what: &str) -> Result<u64> {
    entsize
        .checked_mul(count)
        .and_then(|len| offset.checked_add(len))
        .ok_or_else(|| AppImageError::ElfError(format!("{what} extends past addressable range")))
}

/// Parses the ELF identification and file header.
///
/// # Errors
///
/// * [`AppImageError::InvalidFormat`] if the magic does not match.
/// * [`AppImageError::ElfError`] for unsupported class, data encoding or version.
/// * [`AppImageError::IoError`] if the header is truncated.
pub fn read_header(source: &dyn ReadAt) -> Result<ElfHeader> {
    let mut ident = [0u8; 16];
    let mut magic = [0u8; 4];
    match source.read_exact_at(&mut magic, 0) {
        Ok(()) if magic == ELF_MAGIC_BYTES => {}
        Ok(()) => return Err(AppImageError::InvalidFormat("not an ELF file".into())),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(AppImageError::InvalidFormat(
                "file too small to be an ELF file".into(),
            ))
        }
        Err(err) => return Err(AppImageError::io("reading ELF magic", err)),
    }
    read_exact(source, &mut ident, 0, "ELF identification")?;

    let class = match ident[4] {
        ELFCLASS32 => Class::Elf32,
        ELFCLASS64 => Class::Elf64,
        other => return Err(AppImageError::ElfError(format!("unknown ELF class {other}"))),
    };
    let endian = match ident[5] {
        ELFDATA2LSB => Endian { big: false },
        ELFDATA2MSB => Endian { big: true },
        other => {
            return Err(AppImageError::ElfError(format!(
                "unknown ELF data encoding {other}"
            )))
        }
    };
    if ident[6] != EV_CURRENT {
        return Err(AppImageError::ElfError(format!(
            "unsupported ELF version {}",
            ident[6]
        )));
    }

    let header = match class {
        Class::Elf32 => {
            let mut h = [0u8; 52];
            read_exact(source, &mut h, 0, "ELF header")?;
            ElfHeader {
                is_64bit: false,
                big_endian: endian.big,
                phoff: endian.u32(&h[28..]) as u64,
                shoff: endian.u32(&h[32..]) as u64,
                header_size: endian.u16(&h[40..]) as u64,
                phentsize: endian.u16(&h[42..]) as u64,
                phnum: endian.u16(&h[44..]) as u64,
                shentsize: endian.u16(&h[46..]) as u64,
                shnum: endian.u16(&h[48..]) as u64,
            }
        }
        Class::Elf64 => {
            let mut h = [0u8; 64];
            read_exact(source, &mut h, 0, "ELF header")?;
            ElfHeader {
                is_64bit: true,
                big_endian: endian.big,
                phoff: endian.u64(&h[32..]),
                shoff: endian.u64(&h[40..]),
                header_size: endian.u16(&h[52..]) as u64,
                phentsize: endian.u16(&h[54..]) as u64,
                phnum: endian.u16(&h[56..]) as u64,
                shentsize: endian.u16(&h[58..]) as u64,
                shnum: endian.u16(&h[60..]) as u64,
            }
        }
    };

    let min_ph = if header.is_64bit { 56 } else { 32 };
    if header.shnum > 0 {
        check_section_entry_size(&header)?;
    }
    if header.phnum > 0 && header.phentsize < min_ph {
        return Err(AppImageError::ElfError(format!(
            "program header entry size {} is too small",
            header.phentsize
        )));
    }

    Ok(header)
}

fn check_section_entry_size(header: &ElfHeader) -> Result<()> {
    let min_sh = if header.is_64bit { 64 } else { 40 };
    if header.shentsize < min_sh {
        return Err(AppImageError::ElfError(format!(
            "section header entry size {} is too small",
            header.shentsize
        )));
    }
    Ok(())
}

fn read_table(
    source: &dyn ReadAt,
    offset: u64,
    entsize: u64,
    count: u64,
    what: &str,
) -> Result<Vec<u8>> {
    let end = table_end(offset, entsize, count, what)?;
    let len = end - offset;
    if len > MAX_TABLE_BYTES {
        return Err(AppImageError::ElfError(format!(
            "{what} of {len} bytes is implausibly large"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    read_exact(source, &mut buf, offset, what)?;
    Ok(buf)
}

/// Computes the offset at which ELF-described content ends.
///
/// This is the maximum of the header size, the end of the section header table, the end of
/// every section that occupies file space, and the end of every program segment's file image.
pub fn elf_end_offset(source: &dyn ReadAt) -> Result<u64> {
    let header = read_header(source)?;
    let endian = Endian {
        big: header.big_endian,
    };

    let mut shnum = header.shnum;
    if shnum == 0 && header.shoff != 0 && header.shentsize > 0 {
        // extended numbering keeps the real count in section 0's sh_size
        check_section_entry_size(&header)?;
        let first = read_table(source, header.shoff, header.shentsize, 1, "section header 0")?;
        shnum = if header.is_64bit {
            endian.u64(&first[32..])
        } else {
            endian.u32(&first[20..]) as u64
        };
    }

    let mut end = header.header_size;

    if shnum > 0 {
        check_section_entry_size(&header)?;
        end = end.max(table_end(
            header.shoff,
            header.shentsize,
            shnum,
            "section header table",
        )?);

        let table = read_table(
            source,
            header.shoff,
            header.shentsize,
            shnum,
            "section header table",
        )?;
        for entry in table.chunks_exact(header.shentsize as usize) {
            let sh_type = endian.u32(&entry[4..]);
            if sh_type == SHT_NOBITS {
                continue;
            }
            let (offset, size) = if header.is_64bit {
                (endian.u64(&entry[24..]), endian.u64(&entry[32..]))
            } else {
                (endian.u32(&entry[16..]) as u64, endian.u32(&entry[20..]) as u64)
            };
            end = end.max(table_end(offset, 1, size, "section")?);
        }
    }

    if header.phnum > 0 {
        let table = read_table(
            source,
            header.phoff,
            header.phentsize,
            header.phnum,
            "program header table",
        )?;
        end = end.max(table_end(
            header.phoff,
            header.phentsize,
            header.phnum,
            "program header table",
        )?);
        for entry in table.chunks_exact(header.phentsize as usize) {
            let (offset, filesz) = if header.is_64bit {
                (endian.u64(&entry[8..]), endian.u64(&entry[32..]))
            } else {
                (endian.u32(&entry[4..]) as u64, endian.u32(&entry[16..]) as u64)
            };
            end = end.max(table_end(offset, 1, filesz, "segment")?);
        }
    }

    trace!(
        end,
        shnum,
        phnum = header.phnum,
        is_64bit = header.is_64bit,
        "computed ELF end offset"
    );
    Ok(end)
}
