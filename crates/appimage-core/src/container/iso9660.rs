//! Read-only ISO9660 reader for Type 1 payloads.
//!
//! Rock Ridge names, symlinks, continuation areas and deep directory relocation are honoured.

use std::io::{self, Read};

use tracing::{debug, trace};

use crate::{
    error::{AppImageError, Result},
    format::ISO9660_MAGIC_BYTES,
    source::ImageSource,
};

pub const SECTOR_SIZE: u64 = 2048;

const FIRST_DESCRIPTOR_SECTOR: u64 = 16;
const MAX_DESCRIPTORS: u64 = 64;
const DESCRIPTOR_PRIMARY: u8 = 1;
const DESCRIPTOR_TERMINATOR: u8 = 255;

const MIN_RECORD_LEN: usize = 34;
const ROOT_RECORD_OFFSET: usize = 156;
const FLAG_DIRECTORY: u8 = 0x02;
const MAX_DIRECTORY_BYTES: u32 = 16 * 1024 * 1024;
const READ_CHUNK: usize = 64 * 1024;

const SL_CONTINUE: u8 = 0x01;
const SL_CURRENT: u8 = 0x02;
const SL_PARENT: u8 = 0x04;
const SL_ROOT: u8 = 0x08;
const NM_CONTINUE: u8 = 0x01;
const NM_SPECIAL: u8 = 0x06;
const MAX_CONTINUATIONS: usize = 16;

fn iso_io(what: &str) -> impl Fn(io::Error) -> AppImageError + '_ {
    move |err| AppImageError::FilesystemError(format!("{what}: {err}"))
}

/// Decodes a both-endian u16, rejecting mismatched halves.
fn both_u16(b: &[u8], field: &str) -> Result<u16> {
    let le = u16::from_le_bytes([b[0], b[1]]);
    let be = u16::from_be_bytes([b[2], b[3]]);
    if le != be {
        return Err(AppImageError::FilesystemError(format!(
            "{field}: little-endian {le} disagrees with big-endian {be}"
        )));
    }
    Ok(le)
}

/// Decodes a both-endian u32, rejecting mismatched halves.
fn both_u32(b: &[u8], field: &str) -> Result<u32> {
    let le = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    let be = u32::from_be_bytes([b[4], b[5], b[6], b[7]]);
    if le != be {
        return Err(AppImageError::FilesystemError(format!(
            "{field}: little-endian {le} disagrees with big-endian {be}"
        )));
    }
    Ok(le)
}

/// Strips the version suffix and a trailing dot from a plain ISO9660 identifier.
fn normalize_name(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    let name = name.split(';').next().unwrap_or_default();
    name.strip_suffix('.').unwrap_or(name).to_string()
}

/// One directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoRecord {
    pub name: String,
    pub extent: u32,
    pub size: u32,
    pub is_dir: bool,
    /// Rock Ridge symlink target.
    pub symlink: Option<String>,
    /// Whether the name came from a Rock Ridge NM entry.
    pub rock_ridge_name: bool,
}

/// Location of a SUSP continuation area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Continuation {
    block: u32,
    offset: u32,
    len: u32,
}

/// Rock Ridge data gathered from a system use area and its continuations.
#[derive(Debug, Default)]
struct SystemUse {
    name: Option<String>,
    symlink: Option<String>,
    /// CL: the directory was relocated to this extent.
    child_link: Option<u32>,
    /// RE: this is the relocated copy, listed under its real parent through CL.
    relocated: bool,
}

#[derive(Default)]
struct SystemUseParser {
    out: SystemUse,
    name: String,
    name_done: bool,
    target: String,
    target_continued: bool,
    has_target: bool,
}

/// Assembles SL component records into a path.
fn push_symlink_components(target: &mut String, data: &[u8], continued: &mut bool) {
    let mut i = 0;
    while i + 2 <= data.len() {
        let flags = data[i];
        let len = data[i + 1] as usize;
        let end = (i + 2 + len).min(data.len());
        let content = &data[i + 2..end];
        i = end;

        if flags & SL_ROOT != 0 {
            target.clear();
            target.push('/');
            *continued = false;
            continue;
        }
        if !*continued && !target.is_empty() && !target.ends_with('/') {
            target.push('/');
        }
        if flags & SL_CURRENT != 0 {
            target.push('.');
        } else if flags & SL_PARENT != 0 {
            target.push_str("..");
        } else {
            target.push_str(&String::from_utf8_lossy(content));
        }
        *continued = flags & SL_CONTINUE != 0;
    }
}

impl SystemUseParser {
    /// Consumes one system use area, returning the continuation it points to, if any.
    fn feed(&mut self, su: &[u8]) -> Result<Option<Continuation>> {
        let mut continuation = None;
        let mut i = 0;
        while i + 4 <= su.len() {
            let sig = &su[i..i + 2];
            let len = su[i + 2] as usize;
            if len < 4 || i + len > su.len() {
                break;
            }
            let body = &su[i + 4..i + len];

            match sig {
                b"NM" if !self.name_done && !body.is_empty() => {
                    let flags = body[0];
                    if flags & NM_SPECIAL == 0 {
                        self.name.push_str(&String::from_utf8_lossy(&body[1..]));
                        self.out.name = Some(self.name.clone());
                    }
                    self.name_done = flags & NM_CONTINUE == 0;
                }
                b"SL" if !body.is_empty() => {
                    push_symlink_components(
                        &mut self.target,
                        &body[1..],
                        &mut self.target_continued,
                    );
                    self.has_target = true;
                }
                b"CE" if body.len() >= 24 => {
                    continuation = Some(Continuation {
                        block: both_u32(&body[0..8], "continuation block")?,
                        offset: both_u32(&body[8..16], "continuation offset")?,
                        len: both_u32(&body[16..24], "continuation length")?,
                    });
                }
                b"CL" if body.len() >= 8 => {
                    self.out.child_link = Some(both_u32(&body[0..8], "child link")?);
                }
                b"RE" => self.out.relocated = true,
                b"ST" => break,
                _ => {}
            }
            i += len;
        }
        Ok(continuation)
    }

    fn finish(mut self) -> SystemUse {
        if self.has_target {
            self.out.symlink = Some(self.target);
        }
        self.out
    }
}

/// The fixed fields of a directory record and its system use area.
struct RawRecord<'a> {
    extent: u32,
    size: u32,
    is_dir: bool,
    name: &'a [u8],
    system_use: &'a [u8],
}

impl RawRecord<'_> {
    /// `.` and `..` are stored as the single bytes 0 and 1.
    fn is_special(&self) -> bool {
        self.name == [0] || self.name == [1]
    }
}

/// Splits the directory record at the start of `r`.
fn split_record(r: &[u8]) -> Result<RawRecord<'_>> {
    let len = r[0] as usize;
    if len < MIN_RECORD_LEN || len > r.len() {
        return Err(AppImageError::FilesystemError(format!(
            "directory record of {len} bytes is malformed"
        )));
    }
    let r = &r[..len];

    let name_len = r[32] as usize;
    if 33 + name_len > len {
        return Err(AppImageError::FilesystemError(
            "record name overruns the record".into(),
        ));
    }
    let su_start = (33 + name_len + (1 - name_len % 2)).min(len);

    Ok(RawRecord {
        extent: both_u32(&r[2..10], "record extent")?,
        size: both_u32(&r[10..18], "record size")?,
        is_dir: r[25] & FLAG_DIRECTORY != 0,
        name: &r[33..33 + name_len],
        system_use: &r[su_start..],
    })
}

pub struct IsoReader {
    source: ImageSource,
    block_size: u64,
    root: IsoRecord,
}

impl IsoReader {
    pub fn open(source: ImageSource) -> Result<Self> {
        let mut primary = None;
        for index in 0..MAX_DESCRIPTORS {
            let sector = (FIRST_DESCRIPTOR_SECTOR + index) * SECTOR_SIZE;
            let d = source
                .read_vec(sector, SECTOR_SIZE as usize)
                .map_err(iso_io("reading volume descriptor"))?;
            if d[1..6] != ISO9660_MAGIC_BYTES {
                return Err(AppImageError::FilesystemError(format!(
                    "volume descriptor {index} lacks the CD001 identifier"
                )));
            }
            match d[0] {
                DESCRIPTOR_PRIMARY if primary.is_none() => primary = Some(d),
                DESCRIPTOR_TERMINATOR => break,
                other => trace!(descriptor = other, "skipping volume descriptor"),
            }
        }
        let pvd = primary.ok_or_else(|| {
            AppImageError::FilesystemError("no primary volume descriptor".into())
        })?;

        let block_size = u64::from(both_u16(&pvd[128..132], "logical block size")?);
        if !matches!(block_size, 512 | 1024 | 2048) {
            return Err(AppImageError::FilesystemError(format!(
                "unsupported logical block size {block_size}"
            )));
        }

        let path_table_size = u64::from(both_u32(&pvd[132..140], "path table size")?);
        let l_table = u64::from(u32::from_le_bytes([pvd[140], pvd[141], pvd[142], pvd[143]]));
        let m_table = u64::from(u32::from_be_bytes([pvd[148], pvd[149], pvd[150], pvd[151]]));
        for (name, location) in [("L path table", l_table), ("M path table", m_table)] {
            let end = location * block_size + path_table_size;
            if location == 0 || end > source.len() {
                return Err(AppImageError::FilesystemError(format!(
                    "{name} at block {location} lies outside the image"
                )));
            }
        }

        let root = split_record(&pvd[ROOT_RECORD_OFFSET..ROOT_RECORD_OFFSET + MIN_RECORD_LEN])?;
        if !root.is_dir {
            return Err(AppImageError::FilesystemError(
                "root record is not a directory".into(),
            ));
        }
        let root = IsoRecord {
            name: String::new(),
            extent: root.extent,
            size: root.size,
            is_dir: true,
            symlink: None,
            rock_ridge_name: false,
        };
        let volume_id = String::from_utf8_lossy(&pvd[40..72]).trim_end().to_string();

        debug!(volume_id = %volume_id, block_size, "opened ISO9660 volume");

        let reader = Self {
            source,
            block_size,
            root,
        };
        reader.check_extent(&reader.root)?;
        Ok(reader)
    }

    pub fn root(&self) -> &IsoRecord {
        &self.root
    }

    fn check_extent(&self, record: &IsoRecord) -> Result<u64> {
        let start = u64::from(record.extent) * self.block_size;
        if start + u64::from(record.size) > self.source.len() {
            return Err(AppImageError::FilesystemError(format!(
                "extent of {:?} lies outside the image",
                record.name
            )));
        }
        Ok(start)
    }

    /// Reads the system use area of a record, following CE continuation areas.
    fn system_use(&self, first: &[u8]) -> Result<SystemUse> {
        let mut parser = SystemUseParser::default();
        let mut next = parser.feed(first)?;
        let mut hops = 0;
        while let Some(ce) = next {
            hops += 1;
            if hops > MAX_CONTINUATIONS || u64::from(ce.len) > self.block_size {
                return Err(AppImageError::FilesystemError(format!(
                    "continuation area at block {} is malformed",
                    ce.block
                )));
            }
            let at = u64::from(ce.block) * self.block_size + u64::from(ce.offset);
            let area = self
                .source
                .read_vec(at, ce.len as usize)
                .map_err(iso_io("reading continuation area"))?;
            next = parser.feed(&area)?;
        }
        Ok(parser.finish())
    }

    /// Size of the directory at `extent`, taken from its `.` record.
    fn relocated_dir_size(&self, extent: u32) -> Result<u32> {
        let at = u64::from(extent) * self.block_size;
        let sector = self
            .source
            .read_vec(at, SECTOR_SIZE.min(self.source.len().saturating_sub(at)) as usize)
            .map_err(iso_io("reading relocated directory"))?;
        if sector.is_empty() {
            return Err(AppImageError::FilesystemError(format!(
                "relocated directory at block {extent} lies outside the image"
            )));
        }
        let dot = split_record(&sector)?;
        if !dot.is_special() || !dot.is_dir {
            return Err(AppImageError::FilesystemError(format!(
                "relocated directory at block {extent} does not start with its own record"
            )));
        }
        Ok(dot.size)
    }

    /// Builds the record at the start of `r`; `None` for `.`, `..` and relocated copies.
    fn resolve_record(&self, r: &[u8]) -> Result<Option<IsoRecord>> {
        let raw = split_record(r)?;
        if raw.is_special() {
            return Ok(None);
        }
        let su = self.system_use(raw.system_use)?;
        if su.relocated {
            return Ok(None);
        }

        let rock_ridge_name = su.name.is_some();
        let name = su.name.unwrap_or_else(|| normalize_name(raw.name));
        let record = match su.child_link {
            Some(extent) => IsoRecord {
                size: self.relocated_dir_size(extent)?,
                name,
                extent,
                is_dir: true,
                symlink: None,
                rock_ridge_name,
            },
            None => IsoRecord {
                name,
                extent: raw.extent,
                size: raw.size,
                is_dir: raw.is_dir,
                symlink: su.symlink,
                rock_ridge_name,
            },
        };
        Ok(Some(record))
    }

    pub fn read_dir(&self, dir: &IsoRecord) -> Result<Vec<IsoRecord>> {
        if !dir.is_dir {
            return Err(AppImageError::FilesystemError(format!(
                "{:?} is not a directory",
                dir.name
            )));
        }
        if dir.size > MAX_DIRECTORY_BYTES {
            return Err(AppImageError::FilesystemError(format!(
                "directory {:?} of {} bytes is too large",
                dir.name, dir.size
            )));
        }

        let start = self.check_extent(dir)?;
        let data = self
            .source
            .read_vec(start, dir.size as usize)
            .map_err(iso_io("reading directory"))?;

        let sector = SECTOR_SIZE as usize;
        let mut records = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let len = data[pos] as usize;
            if len == 0 {
                // Records never straddle sectors; the rest of this one is padding.
                pos = (pos / sector + 1) * sector;
                continue;
            }
            let sector_end = ((pos / sector + 1) * sector).min(data.len());
            if let Some(record) = self.resolve_record(&data[pos..sector_end])? {
                records.push(record);
            }
            pos += len;
        }
        Ok(records)
    }

    /// Finds `name` in `dir`. Rock Ridge names match exactly, plain names case-insensitively.
    pub fn find(&self, dir: &IsoRecord, name: &str) -> Result<Option<IsoRecord>> {
        let records = self.read_dir(dir)?;
        Ok(records.into_iter().find(|r| {
            if r.rock_ridge_name {
                r.name == name
            } else {
                r.name.eq_ignore_ascii_case(name)
            }
        }))
    }

    pub fn file_reader(&self, record: &IsoRecord) -> Result<IsoFileReader<'_>> {
        if record.is_dir {
            return Err(AppImageError::InvalidParameter(format!(
                "{:?} is a directory",
                record.name
            )));
        }
        let pos = self.check_extent(record)?;
        Ok(IsoFileReader {
            reader: self,
            pos,
            remaining: u64::from(record.size),
        })
    }
}

/// Streams a file extent sector by sector.
pub struct IsoFileReader<'a> {
    reader: &'a IsoReader,
    pos: u64,
    remaining: u64,
}

impl Read for IsoFileReader<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || out.is_empty() {
            return Ok(0);
        }
        let to_sector_end = SECTOR_SIZE - self.pos % SECTOR_SIZE;
        let mut n = self.remaining.min(out.len() as u64).min(READ_CHUNK as u64);
        if n > to_sector_end {
            n -= (n - to_sector_end) % SECTOR_SIZE;
        }
        let n = n as usize;

        self.reader.source.read_exact_at(&mut out[..n], self.pos)?;
        self.pos += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}
