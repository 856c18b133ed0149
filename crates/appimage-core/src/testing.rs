//! In-memory image builders for tests.

use std::{
    collections::BTreeMap,
    io::{Cursor, Write},
};

use flate2::{write::ZlibEncoder, Compression as Level};
use image::{DynamicImage, ImageFormat, RgbaImage};

#[derive(Clone, Copy)]
struct Endian {
    big: bool,
}

impl Endian {
    fn u16(self, buf: &mut [u8], at: usize, v: u16) {
        let b = if self.big { v.to_be_bytes() } else { v.to_le_bytes() };
        buf[at..at + 2].copy_from_slice(&b);
    }

    fn u32(self, buf: &mut [u8], at: usize, v: u32) {
        let b = if self.big { v.to_be_bytes() } else { v.to_le_bytes() };
        buf[at..at + 4].copy_from_slice(&b);
    }

    fn u64(self, buf: &mut [u8], at: usize, v: u64) {
        let b = if self.big { v.to_be_bytes() } else { v.to_le_bytes() };
        buf[at..at + 8].copy_from_slice(&b);
    }
}

/// Builds minimal ELF files with chosen program headers and sections.
pub struct ElfBuilder {
    is_64: bool,
    big: bool,
    segments: Vec<(u64, u64)>,
    sections: Vec<(u32, u64, u64)>,
    shoff: Option<u64>,
    runtime: Option<u8>,
}

impl ElfBuilder {
    pub fn new() -> Self {
        Self {
            is_64: true,
            big: false,
            segments: Vec::new(),
            sections: Vec::new(),
            shoff: None,
            runtime: None,
        }
    }

    pub fn class32(mut self) -> Self {
        self.is_64 = false;
        self
    }

    pub fn big_endian(mut self) -> Self {
        self.big = true;
        self
    }

    pub fn segment(mut self, offset: u64, filesz: u64) -> Self {
        self.segments.push((offset, filesz));
        self
    }

    pub fn section(mut self, sh_type: u32, offset: u64, size: u64) -> Self {
        self.sections.push((sh_type, offset, size));
        self
    }

    pub fn section_table_at(mut self, offset: u64) -> Self {
        self.shoff = Some(offset);
        self
    }

    /// Stamps the `AI` runtime magic with type byte `kind`.
    pub fn runtime_magic(mut self, kind: u8) -> Self {
        self.runtime = Some(kind);
        self
    }

    /// Produces the file, zero padded to at least `total_len` bytes.
    pub fn build(self, total_len: usize) -> Vec<u8> {
        let e = Endian { big: self.big };
        let (ehsize, phentsize, shentsize) = if self.is_64 { (64, 56, 64) } else { (52, 32, 40) };

        let phnum = self.segments.len();
        let phoff = if phnum > 0 { ehsize } else { 0 };
        let shnum = if self.sections.is_empty() && self.shoff.is_none() {
            0
        } else {
            self.sections.len() + 1
        };
        let shoff = if shnum > 0 {
            self.shoff.map(|o| o as usize).unwrap_or_else(|| {
                let content = self
                    .segments
                    .iter()
                    .map(|(o, s)| o + s)
                    .chain(self.sections.iter().map(|(_, o, s)| o + s))
                    .max()
                    .unwrap_or(0) as usize;
                content.max(phoff + phnum * phentsize).next_multiple_of(8)
            })
        } else {
            0
        };

        let needed = total_len
            .max(ehsize)
            .max(phoff + phnum * phentsize)
            .max(shoff + shnum * shentsize);
        let mut buf = vec![0u8; needed];

        buf[..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        buf[4] = if self.is_64 { 2 } else { 1 };
        buf[5] = if self.big { 2 } else { 1 };
        buf[6] = 1;
        if let Some(kind) = self.runtime {
            buf[8..11].copy_from_slice(&[0x41, 0x49, kind]);
        }
        e.u16(&mut buf, 16, 2);
        e.u16(&mut buf, 18, 62);
        e.u32(&mut buf, 20, 1);

        if self.is_64 {
            e.u64(&mut buf, 32, phoff as u64);
            e.u64(&mut buf, 40, shoff as u64);
            e.u16(&mut buf, 52, ehsize as u16);
            e.u16(&mut buf, 54, phentsize as u16);
            e.u16(&mut buf, 56, phnum as u16);
            e.u16(&mut buf, 58, shentsize as u16);
            e.u16(&mut buf, 60, shnum as u16);
        } else {
            e.u32(&mut buf, 28, phoff as u32);
            e.u32(&mut buf, 32, shoff as u32);
            e.u16(&mut buf, 40, ehsize as u16);
            e.u16(&mut buf, 42, phentsize as u16);
            e.u16(&mut buf, 44, phnum as u16);
            e.u16(&mut buf, 46, shentsize as u16);
            e.u16(&mut buf, 48, shnum as u16);
        }

        for (i, (offset, filesz)) in self.segments.iter().enumerate() {
            let at = phoff + i * phentsize;
            e.u32(&mut buf, at, 1);
            if self.is_64 {
                e.u64(&mut buf, at + 8, *offset);
                e.u64(&mut buf, at + 32, *filesz);
                e.u64(&mut buf, at + 40, *filesz);
            } else {
                e.u32(&mut buf, at + 4, *offset as u32);
                e.u32(&mut buf, at + 16, *filesz as u32);
                e.u32(&mut buf, at + 20, *filesz as u32);
            }
        }

        // section 0 stays null
        for (i, (sh_type, offset, size)) in self.sections.iter().enumerate() {
            let at = shoff + (i + 1) * shentsize;
            e.u32(&mut buf, at + 4, *sh_type);
            if self.is_64 {
                e.u64(&mut buf, at + 24, *offset);
                e.u64(&mut buf, at + 32, *size);
            } else {
                e.u32(&mut buf, at + 16, *offset as u32);
                e.u32(&mut buf, at + 20, *size as u32);
            }
        }

        buf
    }
}

/// A 4 KiB runtime carrying the `AI` magic for `kind`.
pub fn runtime(kind: u8) -> Vec<u8> {
    ElfBuilder::new()
        .runtime_magic(kind)
        .segment(0, 4096)
        .build(4096)
}

enum Node {
    Dir(BTreeMap<String, Node>),
    File { data: Vec<u8>, mode: u16 },
    Symlink(String),
}

fn insert(root: &mut BTreeMap<String, Node>, path: &str, node: Node) {
    let mut parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    let Some(name) = parts.pop() else {
        return;
    };
    let mut dir = root;
    for part in parts {
        let entry = dir
            .entry(part.to_string())
            .or_insert_with(|| Node::Dir(BTreeMap::new()));
        dir = match entry {
            Node::Dir(children) => children,
            _ => panic!("{part} is not a directory"),
        };
    }
    match (dir.get_mut(name), node) {
        (Some(Node::Dir(_)), Node::Dir(_)) => {}
        (_, node) => {
            dir.insert(name.to_string(), node);
        }
    }
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Level::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

const SQFS_METADATA: usize = 8192;

/// Accumulates a metadata stream and splits it into on-disk blocks.
struct MetadataWriter {
    compress: bool,
    disk: Vec<u8>,
    pending: Vec<u8>,
    block_starts: Vec<u64>,
}

impl MetadataWriter {
    fn new(compress: bool) -> Self {
        Self {
            compress,
            disk: Vec::new(),
            pending: Vec::new(),
            block_starts: Vec::new(),
        }
    }

    /// (start of the current block relative to the table, offset in the block)
    fn position(&self) -> (u64, u16) {
        (self.disk.len() as u64, self.pending.len() as u16)
    }

    fn write(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        while self.pending.len() >= SQFS_METADATA {
            let block: Vec<u8> = self.pending.drain(..SQFS_METADATA).collect();
            self.flush_block(&block);
        }
    }

    fn flush_block(&mut self, block: &[u8]) {
        self.block_starts.push(self.disk.len() as u64);
        let packed = self.compress.then(|| zlib(block)).filter(|c| c.len() < block.len());
        match packed {
            Some(c) => {
                self.disk.extend_from_slice(&(c.len() as u16).to_le_bytes());
                self.disk.extend_from_slice(&c);
            }
            None => {
                self.disk
                    .extend_from_slice(&(block.len() as u16 | 0x8000).to_le_bytes());
                self.disk.extend_from_slice(block);
            }
        }
    }

    fn finish(mut self) -> (Vec<u8>, Vec<u64>) {
        if !self.pending.is_empty() {
            let block = std::mem::take(&mut self.pending);
            self.flush_block(&block);
        }
        (self.disk, self.block_starts)
    }
}

struct Written {
    inode_ref: u64,
    inode_number: u32,
    basic_type: u16,
}

struct FileData {
    blocks_start: u64,
    sizes: Vec<u32>,
    fragment: Option<(u32, u32)>,
}

/// Builds SquashFS 4.0 images with gzip (zlib) compression.
pub struct SquashfsBuilder {
    root: BTreeMap<String, Node>,
    block_size: u32,
    compress_data: bool,
    compress_metadata: bool,
    fragments: bool,
    sparse: bool,
    extended: bool,
}

impl SquashfsBuilder {
    pub fn new() -> Self {
        Self {
            root: BTreeMap::new(),
            block_size: 4096,
            compress_data: false,
            compress_metadata: false,
            fragments: true,
            sparse: false,
            extended: false,
        }
    }

    pub fn compress_data(mut self, on: bool) -> Self {
        self.compress_data = on;
        self
    }

    pub fn compress_metadata(mut self, on: bool) -> Self {
        self.compress_metadata = on;
        self
    }

    pub fn fragments(mut self, on: bool) -> Self {
        self.fragments = on;
        self
    }

    pub fn sparse_zero_blocks(mut self, on: bool) -> Self {
        self.sparse = on;
        self
    }

    pub fn extended_inodes(mut self, on: bool) -> Self {
        self.extended = on;
        self
    }

    pub fn file(self, path: &str, data: &[u8]) -> Self {
        self.file_with_mode(path, data, 0o644)
    }

    pub fn executable(self, path: &str, data: &[u8]) -> Self {
        self.file_with_mode(path, data, 0o755)
    }

    pub fn file_with_mode(mut self, path: &str, data: &[u8], mode: u16) -> Self {
        insert(
            &mut self.root,
            path,
            Node::File {
                data: data.to_vec(),
                mode,
            },
        );
        self
    }

    pub fn dir(mut self, path: &str) -> Self {
        insert(&mut self.root, path, Node::Dir(BTreeMap::new()));
        self
    }

    pub fn symlink(mut self, path: &str, target: &str) -> Self {
        insert(&mut self.root, path, Node::Symlink(target.to_string()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut image = vec![0u8; 96];
        let mut fragment_blocks: Vec<(u64, u32)> = Vec::new();
        let mut fragment_buf: Vec<u8> = Vec::new();
        let mut file_data: Vec<FileData> = Vec::new();

        // data blocks, in the same pre-order walk used for inode numbering
        fn collect_files<'a>(dir: &'a BTreeMap<String, Node>, out: &mut Vec<&'a [u8]>) {
            for node in dir.values() {
                match node {
                    Node::File { data, .. } => out.push(data),
                    Node::Dir(children) => collect_files(children, out),
                    Node::Symlink(_) => {}
                }
            }
        }
        let mut files = Vec::new();
        collect_files(&self.root, &mut files);

        let bs = self.block_size as usize;
        for data in files {
            let blocks_start = image.len() as u64;
            let mut sizes = Vec::new();
            let full = if self.fragments { data.len() / bs } else { data.len().div_ceil(bs) };
            for i in 0..full {
                let chunk = &data[i * bs..((i + 1) * bs).min(data.len())];
                if self.sparse && chunk.iter().all(|b| *b == 0) {
                    sizes.push(0);
                    continue;
                }
                let (bytes, word) = self.pack_block(chunk);
                image.extend_from_slice(&bytes);
                sizes.push(word);
            }

            let tail = &data[full * bs..];
            let fragment = if self.fragments && !tail.is_empty() {
                if fragment_buf.len() + tail.len() > bs {
                    let (bytes, word) = self.pack_block(&fragment_buf);
                    fragment_blocks.push((image.len() as u64, word));
                    image.extend_from_slice(&bytes);
                    fragment_buf.clear();
                }
                let entry = (fragment_blocks.len() as u32, fragment_buf.len() as u32);
                fragment_buf.extend_from_slice(tail);
                Some(entry)
            } else {
                None
            };

            file_data.push(FileData {
                blocks_start,
                sizes,
                fragment,
            });
        }
        if !fragment_buf.is_empty() {
            let (bytes, word) = self.pack_block(&fragment_buf);
            fragment_blocks.push((image.len() as u64, word));
            image.extend_from_slice(&bytes);
        }

        let mut inodes = MetadataWriter::new(self.compress_metadata);
        let mut dirs = MetadataWriter::new(self.compress_metadata);
        let mut next_number = 1u32;
        let mut next_file = 0usize;
        let root = self.write_dir(
            &self.root,
            &mut inodes,
            &mut dirs,
            &mut next_number,
            &file_data,
            &mut next_file,
        );

        let (inode_disk, _) = inodes.finish();
        let (dir_disk, _) = dirs.finish();
        let inode_table = image.len() as u64;
        image.extend_from_slice(&inode_disk);
        let directory_table = image.len() as u64;
        image.extend_from_slice(&dir_disk);

        let fragment_table = if fragment_blocks.is_empty() {
            u64::MAX
        } else {
            let mut entries = MetadataWriter::new(self.compress_metadata);
            for (start, word) in &fragment_blocks {
                entries.write(&start.to_le_bytes());
                entries.write(&word.to_le_bytes());
                entries.write(&0u32.to_le_bytes());
            }
            let (disk, starts) = entries.finish();
            let base = image.len() as u64;
            image.extend_from_slice(&disk);
            let index = image.len() as u64;
            for start in starts {
                image.extend_from_slice(&(base + start).to_le_bytes());
            }
            index
        };

        let mut ids = MetadataWriter::new(false);
        ids.write(&0u32.to_le_bytes());
        let (id_disk, _) = ids.finish();
        let id_block = image.len() as u64;
        image.extend_from_slice(&id_disk);
        let id_table = image.len() as u64;
        image.extend_from_slice(&id_block.to_le_bytes());

        let bytes_used = image.len() as u64;
        let e = Endian { big: false };
        let sb = &mut image[..96];
        sb[..4].copy_from_slice(b"hsqs");
        e.u32(sb, 4, next_number - 1);
        e.u32(sb, 12, self.block_size);
        e.u32(sb, 16, fragment_blocks.len() as u32);
        e.u16(sb, 20, 1);
        e.u16(sb, 22, self.block_size.trailing_zeros() as u16);
        e.u16(sb, 26, 1);
        e.u16(sb, 28, 4);
        e.u16(sb, 30, 0);
        e.u64(sb, 32, root.inode_ref);
        e.u64(sb, 40, bytes_used);
        e.u64(sb, 48, id_table);
        e.u64(sb, 56, u64::MAX);
        e.u64(sb, 64, inode_table);
        e.u64(sb, 72, directory_table);
        e.u64(sb, 80, fragment_table);
        e.u64(sb, 88, u64::MAX);

        image
    }

    fn pack_block(&self, chunk: &[u8]) -> (Vec<u8>, u32) {
        if self.compress_data {
            let c = zlib(chunk);
            if c.len() < chunk.len() {
                let word = c.len() as u32;
                return (c, word);
            }
        }
        (chunk.to_vec(), chunk.len() as u32 | (1 << 24))
    }

    fn inode_header(buf: &mut Vec<u8>, inode_type: u16, mode: u16, number: u32) {
        buf.extend_from_slice(&inode_type.to_le_bytes());
        buf.extend_from_slice(&mode.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&number.to_le_bytes());
    }

    fn emit_inode(inodes: &mut MetadataWriter, bytes: &[u8]) -> u64 {
        let (block, offset) = inodes.position();
        inodes.write(bytes);
        (block << 16) | u64::from(offset)
    }

    fn write_dir(
        &self,
        children: &BTreeMap<String, Node>,
        inodes: &mut MetadataWriter,
        dirs: &mut MetadataWriter,
        next_number: &mut u32,
        file_data: &[FileData],
        next_file: &mut usize,
    ) -> Written {
        let number = *next_number;
        *next_number += 1;

        let mut written = Vec::new();
        for (name, node) in children {
            let w = match node {
                Node::Dir(sub) => {
                    self.write_dir(sub, inodes, dirs, next_number, file_data, next_file)
                }
                Node::File { data, mode } => {
                    let n = *next_number;
                    *next_number += 1;
                    let fd = &file_data[*next_file];
                    *next_file += 1;
                    let (fragment, frag_offset) = fd.fragment.unwrap_or((u32::MAX, 0));

                    let mut buf = Vec::new();
                    if self.extended {
                        Self::inode_header(&mut buf, 9, *mode, n);
                        buf.extend_from_slice(&fd.blocks_start.to_le_bytes());
                        buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
                        buf.extend_from_slice(&0u64.to_le_bytes());
                        buf.extend_from_slice(&1u32.to_le_bytes());
                        buf.extend_from_slice(&fragment.to_le_bytes());
                        buf.extend_from_slice(&frag_offset.to_le_bytes());
                        buf.extend_from_slice(&u32::MAX.to_le_bytes());
                    } else {
                        Self::inode_header(&mut buf, 2, *mode, n);
                        buf.extend_from_slice(&(fd.blocks_start as u32).to_le_bytes());
                        buf.extend_from_slice(&fragment.to_le_bytes());
                        buf.extend_from_slice(&frag_offset.to_le_bytes());
                        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
                    }
                    for size in &fd.sizes {
                        buf.extend_from_slice(&size.to_le_bytes());
                    }
                    Written {
                        inode_ref: Self::emit_inode(inodes, &buf),
                        inode_number: n,
                        basic_type: 2,
                    }
                }
                Node::Symlink(target) => {
                    let n = *next_number;
                    *next_number += 1;
                    let mut buf = Vec::new();
                    Self::inode_header(&mut buf, if self.extended { 10 } else { 3 }, 0o777, n);
                    buf.extend_from_slice(&1u32.to_le_bytes());
                    buf.extend_from_slice(&(target.len() as u32).to_le_bytes());
                    buf.extend_from_slice(target.as_bytes());
                    if self.extended {
                        buf.extend_from_slice(&u32::MAX.to_le_bytes());
                    }
                    Written {
                        inode_ref: Self::emit_inode(inodes, &buf),
                        inode_number: n,
                        basic_type: 3,
                    }
                }
            };
            written.push((name, w));
        }

        // listing, grouped under headers sharing one inode metadata block
        let (listing_block, listing_offset) = dirs.position();
        let mut listing = Vec::new();
        let mut i = 0;
        while i < written.len() {
            let block = written[i].1.inode_ref >> 16;
            let base = written[i].1.inode_number;
            let mut j = i;
            while j < written.len() && j - i < 256 && written[j].1.inode_ref >> 16 == block {
                j += 1;
            }
            listing.extend_from_slice(&((j - i - 1) as u32).to_le_bytes());
            listing.extend_from_slice(&(block as u32).to_le_bytes());
            listing.extend_from_slice(&base.to_le_bytes());
            for (name, w) in &written[i..j] {
                let delta = (w.inode_number as i64 - base as i64) as i16;
                listing.extend_from_slice(&((w.inode_ref & 0xFFFF) as u16).to_le_bytes());
                listing.extend_from_slice(&delta.to_le_bytes());
                listing.extend_from_slice(&w.basic_type.to_le_bytes());
                listing.extend_from_slice(&((name.len() - 1) as u16).to_le_bytes());
                listing.extend_from_slice(name.as_bytes());
            }
            i = j;
        }
        dirs.write(&listing);
        let listing_size = listing.len() as u32 + 3;

        let mut buf = Vec::new();
        if self.extended || listing_size > u32::from(u16::MAX) {
            Self::inode_header(&mut buf, 8, 0o755, number);
            buf.extend_from_slice(&2u32.to_le_bytes());
            buf.extend_from_slice(&listing_size.to_le_bytes());
            buf.extend_from_slice(&(listing_block as u32).to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&0u16.to_le_bytes());
            buf.extend_from_slice(&listing_offset.to_le_bytes());
            buf.extend_from_slice(&u32::MAX.to_le_bytes());
        } else {
            Self::inode_header(&mut buf, 1, 0o755, number);
            buf.extend_from_slice(&(listing_block as u32).to_le_bytes());
            buf.extend_from_slice(&2u32.to_le_bytes());
            buf.extend_from_slice(&(listing_size as u16).to_le_bytes());
            buf.extend_from_slice(&listing_offset.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
        }

        Written {
            inode_ref: Self::emit_inode(inodes, &buf),
            inode_number: number,
            basic_type: 1,
        }
    }
}

const ISO_SECTOR: usize = 2048;

struct IsoDir {
    path: Vec<String>,
    children: Vec<(String, IsoItem)>,
    extent: u32,
    size: u32,
    parent: usize,
}

enum IsoItem {
    Dir(usize),
    File(usize),
    Symlink(String),
}

/// Builds ISO9660 volumes, with Rock Ridge NM and SL entries unless plain names are requested.
pub struct IsoBuilder {
    root: BTreeMap<String, Node>,
    rock_ridge: bool,
    system_area: Vec<u8>,
}

impl IsoBuilder {
    pub fn new() -> Self {
        Self {
            root: BTreeMap::new(),
            rock_ridge: true,
            system_area: Vec::new(),
        }
    }

    /// Records only upper-case ISO9660 identifiers with `;1` versions.
    pub fn plain_names(mut self) -> Self {
        self.rock_ridge = false;
        self
    }

    /// Places `elf` in the system area, producing a hybrid image.
    pub fn hybrid(mut self, elf: Vec<u8>) -> Self {
        assert!(elf.len() <= 16 * ISO_SECTOR);
        self.system_area = elf;
        self
    }

    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        insert(
            &mut self.root,
            path,
            Node::File {
                data: data.to_vec(),
                mode: 0o644,
            },
        );
        self
    }

    pub fn symlink(mut self, path: &str, target: &str) -> Self {
        assert!(self.rock_ridge, "symlinks need Rock Ridge");
        insert(&mut self.root, path, Node::Symlink(target.to_string()));
        self
    }

    fn identifier(name: &str, is_dir: bool) -> Vec<u8> {
        let mut id = name.to_ascii_uppercase();
        if !is_dir {
            id.push_str(";1");
        }
        id.into_bytes()
    }

    fn system_use(&self, name: &str, symlink: Option<&str>) -> Vec<u8> {
        let mut su = Vec::new();
        if !self.rock_ridge {
            return su;
        }
        su.extend_from_slice(b"NM");
        su.push((5 + name.len()) as u8);
        su.push(1);
        su.push(0);
        su.extend_from_slice(name.as_bytes());

        if let Some(target) = symlink {
            let mut components = Vec::new();
            if target.starts_with('/') {
                components.extend_from_slice(&[0x08, 0]);
            }
            for part in target.split('/').filter(|p| !p.is_empty()) {
                match part {
                    "." => components.extend_from_slice(&[0x02, 0]),
                    ".." => components.extend_from_slice(&[0x04, 0]),
                    _ => {
                        components.push(0);
                        components.push(part.len() as u8);
                        components.extend_from_slice(part.as_bytes());
                    }
                }
            }
            su.extend_from_slice(b"SL");
            su.push((5 + components.len()) as u8);
            su.push(1);
            su.push(0);
            su.extend_from_slice(&components);
        }
        su
    }

    pub fn record(identifier: &[u8], extent: u32, size: u32, is_dir: bool, su: &[u8]) -> Vec<u8> {
        let pad = usize::from(identifier.len() % 2 == 0);
        let mut len = 33 + identifier.len() + pad + su.len();
        len += len % 2;
        let mut r = vec![0u8; len];
        r[0] = len as u8;
        r[2..6].copy_from_slice(&extent.to_le_bytes());
        r[6..10].copy_from_slice(&extent.to_be_bytes());
        r[10..14].copy_from_slice(&size.to_le_bytes());
        r[14..18].copy_from_slice(&size.to_be_bytes());
        r[25] = if is_dir { 0x02 } else { 0 };
        r[28..30].copy_from_slice(&1u16.to_le_bytes());
        r[30..32].copy_from_slice(&1u16.to_be_bytes());
        r[32] = identifier.len() as u8;
        r[33..33 + identifier.len()].copy_from_slice(identifier);
        let su_at = 33 + identifier.len() + pad;
        r[su_at..su_at + su.len()].copy_from_slice(su);
        r
    }

    /// Packs records into sectors without straddling boundaries.
    pub fn pack(records: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        for r in records {
            let used = out.len() % ISO_SECTOR;
            if used + r.len() > ISO_SECTOR {
                out.resize(out.len() + ISO_SECTOR - used, 0);
            }
            out.extend_from_slice(r);
        }
        let total = out.len().max(1).next_multiple_of(ISO_SECTOR);
        out.resize(total, 0);
        out
    }

    pub fn build(self) -> Vec<u8> {
        // breadth-first directory list
        let mut dirs: Vec<IsoDir> = Vec::new();
        let mut files: Vec<Vec<u8>> = Vec::new();
        let mut queue: Vec<(Vec<String>, &BTreeMap<String, Node>, usize)> =
            vec![(Vec::new(), &self.root, 0)];
        let mut qi = 0;
        while qi < queue.len() {
            let (path, children, parent) = (queue[qi].0.clone(), queue[qi].1, queue[qi].2);
            let index = dirs.len();
            let mut items = Vec::new();
            for (name, node) in children {
                let item = match node {
                    Node::Dir(sub) => {
                        let mut child_path = path.clone();
                        child_path.push(name.clone());
                        queue.push((child_path, sub, index));
                        IsoItem::Dir(queue.len() - 1)
                    }
                    Node::File { data, .. } => {
                        files.push(data.clone());
                        IsoItem::File(files.len() - 1)
                    }
                    Node::Symlink(target) => IsoItem::Symlink(target.clone()),
                };
                items.push((name.clone(), item));
            }
            dirs.push(IsoDir {
                path,
                children: items,
                extent: 0,
                size: 0,
                parent,
            });
            qi += 1;
        }

        // sizes do not depend on extents, so lay out with placeholders first
        let placeholder = |dir: &IsoDir, builder: &IsoBuilder| -> usize {
            let mut records = vec![
                Self::record(&[0], 0, 0, true, &[]),
                Self::record(&[1], 0, 0, true, &[]),
            ];
            for (name, item) in &dir.children {
                let (is_dir, link) = match item {
                    IsoItem::Dir(_) => (true, None),
                    IsoItem::File(_) => (false, None),
                    IsoItem::Symlink(t) => (false, Some(t.as_str())),
                };
                let su = builder.system_use(name, link);
                records.push(Self::record(&Self::identifier(name, is_dir), 0, 0, is_dir, &su));
            }
            Self::pack(&records).len()
        };

        let path_table_len: usize = dirs
            .iter()
            .map(|d| {
                let id_len = d.path.last().map_or(1, |n| n.len());
                8 + id_len + id_len % 2
            })
            .sum();
        let path_table_sectors = path_table_len.div_ceil(ISO_SECTOR).max(1);
        let l_table = 18;
        let m_table = l_table + path_table_sectors;
        let mut next = m_table + path_table_sectors;

        for i in 0..dirs.len() {
            let size = placeholder(&dirs[i], &self);
            dirs[i].extent = next as u32;
            dirs[i].size = size as u32;
            next += size / ISO_SECTOR;
        }
        let mut file_extents = Vec::new();
        for data in &files {
            file_extents.push(next as u32);
            next += data.len().div_ceil(ISO_SECTOR);
        }

        let total_sectors = next;
        let mut image = vec![0u8; total_sectors * ISO_SECTOR];
        image[..self.system_area.len()].copy_from_slice(&self.system_area);

        for dir in &dirs {
            let parent = &dirs[dir.parent];
            let mut records = vec![
                Self::record(&[0], dir.extent, dir.size, true, &[]),
                Self::record(&[1], parent.extent, parent.size, true, &[]),
            ];
            for (name, item) in &dir.children {
                let record = match item {
                    IsoItem::Dir(i) => {
                        let d = &dirs[*i];
                        let su = self.system_use(name, None);
                        Self::record(&Self::identifier(name, true), d.extent, d.size, true, &su)
                    }
                    IsoItem::File(i) => {
                        let su = self.system_use(name, None);
                        Self::record(
                            &Self::identifier(name, false),
                            file_extents[*i],
                            files[*i].len() as u32,
                            false,
                            &su,
                        )
                    }
                    IsoItem::Symlink(target) => {
                        let su = self.system_use(name, Some(target));
                        Self::record(&Self::identifier(name, false), 0, 0, false, &su)
                    }
                };
                records.push(record);
            }
            let packed = Self::pack(&records);
            let at = dir.extent as usize * ISO_SECTOR;
            image[at..at + packed.len()].copy_from_slice(&packed);
        }
        for (data, extent) in files.iter().zip(&file_extents) {
            let at = *extent as usize * ISO_SECTOR;
            image[at..at + data.len()].copy_from_slice(data);
        }

        let mut l = Vec::new();
        let mut m = Vec::new();
        for dir in &dirs {
            let id = dir.path.last().map_or(vec![0], |n| Self::identifier(n, true));
            let parent = dir.parent as u16 + 1;
            for (table, big) in [(&mut l, false), (&mut m, true)] {
                table.push(id.len() as u8);
                table.push(0);
                if big {
                    table.extend_from_slice(&dir.extent.to_be_bytes());
                    table.extend_from_slice(&parent.to_be_bytes());
                } else {
                    table.extend_from_slice(&dir.extent.to_le_bytes());
                    table.extend_from_slice(&parent.to_le_bytes());
                }
                table.extend_from_slice(&id);
                if id.len() % 2 == 1 {
                    table.push(0);
                }
            }
        }
        image[l_table * ISO_SECTOR..l_table * ISO_SECTOR + l.len()].copy_from_slice(&l);
        image[m_table * ISO_SECTOR..m_table * ISO_SECTOR + m.len()].copy_from_slice(&m);

        let pvd = &mut image[16 * ISO_SECTOR..17 * ISO_SECTOR];
        pvd[0] = 1;
        pvd[1..6].copy_from_slice(b"CD001");
        pvd[6] = 1;
        pvd[40..72].copy_from_slice(&[b' '; 32]);
        pvd[40..46].copy_from_slice(b"APPDIR");
        pvd[80..84].copy_from_slice(&(total_sectors as u32).to_le_bytes());
        pvd[84..88].copy_from_slice(&(total_sectors as u32).to_be_bytes());
        pvd[120..122].copy_from_slice(&1u16.to_le_bytes());
        pvd[122..124].copy_from_slice(&1u16.to_be_bytes());
        pvd[124..126].copy_from_slice(&1u16.to_le_bytes());
        pvd[126..128].copy_from_slice(&1u16.to_be_bytes());
        pvd[128..130].copy_from_slice(&(ISO_SECTOR as u16).to_le_bytes());
        pvd[130..132].copy_from_slice(&(ISO_SECTOR as u16).to_be_bytes());
        pvd[132..136].copy_from_slice(&(l.len() as u32).to_le_bytes());
        pvd[136..140].copy_from_slice(&(l.len() as u32).to_be_bytes());
        pvd[140..144].copy_from_slice(&(l_table as u32).to_le_bytes());
        pvd[148..152].copy_from_slice(&(m_table as u32).to_be_bytes());
        let root = Self::record(&[0], dirs[0].extent, dirs[0].size, true, &[]);
        pvd[156..190].copy_from_slice(&root);
        pvd[881] = 1;

        let terminator = &mut image[17 * ISO_SECTOR..18 * ISO_SECTOR];
        terminator[0] = 255;
        terminator[1..6].copy_from_slice(b"CD001");
        terminator[6] = 1;

        image
    }
}

/// A complete Type 2 AppImage: runtime followed by `payload`.
pub fn type2_appimage(payload: SquashfsBuilder) -> Vec<u8> {
    let mut image = runtime(2);
    image.extend(payload.build());
    image
}

/// A complete Type 1 AppImage with the runtime ahead of the volume.
pub fn type1_appimage(payload: IsoBuilder) -> Vec<u8> {
    let mut image = runtime(1);
    image.extend(payload.build());
    image
}

/// A hybrid Type 1 AppImage with the runtime inside the system area.
pub fn hybrid_type1_appimage(payload: IsoBuilder) -> Vec<u8> {
    payload.hybrid(runtime(1)).build()
}

/// A transparent PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(RgbaImage::new(width, height))
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
