//! Uniform read-only view over the ISO9660 and SquashFS payloads.
//!
//! Paths are `/`-separated and relative to the container root; a leading `/`, empty
//! components and `.` are ignored. Symlinks in intermediate components are always
//! followed, and the final component is followed only by the `*_follow` lookups.

pub mod iso9660;
pub mod squashfs;

use std::{
    collections::{HashSet, VecDeque},
    io::Read,
};

use serde::Serialize;
use tracing::trace;

use self::{
    iso9660::{IsoFileReader, IsoReader, IsoRecord},
    squashfs::{InodeKind, SquashfsFileReader, SquashfsReader},
};
use crate::{
    error::{AppImageError, Result},
    format::Format,
    source::ImageSource,
};

/// Maximum number of symlinks followed while resolving one path.
pub const MAX_SYMLINK_HOPS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    Symlink { target: String },
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Locator {
    Iso(IsoRecord),
    Squashfs(u64),
}

impl Locator {
    /// On-disk position of the entry, shared by every name that points at the same data.
    fn position(&self) -> u64 {
        match self {
            Locator::Iso(record) => u64::from(record.extent),
            Locator::Squashfs(inode_ref) => *inode_ref,
        }
    }
}

/// A file, directory or link inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    /// Path relative to the container root, without a leading `/`. Empty for the root.
    pub path: String,
    pub size: u64,
    #[serde(flatten)]
    pub kind: EntryKind,
    /// Permission bits, when the container records them.
    pub mode: Option<u32>,
    #[serde(skip)]
    locator: Locator,
}

impl Entry {
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn symlink_target(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Symlink { target } => Some(target),
            _ => None,
        }
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

fn components(path: &str) -> VecDeque<String> {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(str::to_string)
        .collect()
}

pub enum Container {
    Iso9660(IsoReader),
    Squashfs(SquashfsReader),
}

impl Container {
    /// Opens the container of `format` that starts at offset 0 of `source`.
    pub fn open(source: ImageSource, format: Format) -> Result<Self> {
        match format {
            Format::Type1 => Ok(Container::Iso9660(IsoReader::open(source)?)),
            Format::Type2 => Ok(Container::Squashfs(SquashfsReader::open(source)?)),
            Format::Unknown => Err(AppImageError::InvalidFormat(
                "no ISO9660 or SquashFS payload".into(),
            )),
        }
    }

    pub fn root(&self) -> Result<Entry> {
        match self {
            Container::Iso9660(iso) => Ok(iso_entry(String::new(), iso.root().clone())),
            Container::Squashfs(sqfs) => sqfs_entry(sqfs, String::new(), sqfs.root_ref()),
        }
    }

    /// Lists the direct children of the directory `dir`.
    pub fn read_dir(&self, dir: &Entry) -> Result<Vec<Entry>> {
        if !dir.is_dir() {
            return Err(AppImageError::InvalidParameter(format!(
                "{:?} is not a directory",
                dir.path
            )));
        }

        match (self, &dir.locator) {
            (Container::Iso9660(iso), Locator::Iso(record)) => Ok(iso
                .read_dir(record)?
                .into_iter()
                .map(|r| iso_entry(join(&dir.path, &r.name), r))
                .collect()),
            (Container::Squashfs(sqfs), Locator::Squashfs(inode_ref)) => {
                let inode = sqfs.inode(*inode_ref)?;
                sqfs.read_dir(&inode)?
                    .into_iter()
                    .map(|e| sqfs_entry(sqfs, join(&dir.path, &e.name), e.inode_ref))
                    .collect()
            }
            _ => Err(AppImageError::InvalidParameter(
                "entry belongs to a different container".into(),
            )),
        }
    }

    fn child(&self, dir: &Entry, name: &str) -> Result<Option<Entry>> {
        let path = join(&dir.path, name);
        match (self, &dir.locator) {
            (Container::Iso9660(iso), Locator::Iso(record)) => {
                Ok(iso.find(record, name)?.map(|r| iso_entry(path, r)))
            }
            (Container::Squashfs(sqfs), Locator::Squashfs(inode_ref)) => {
                let inode = sqfs.inode(*inode_ref)?;
                sqfs.read_dir(&inode)?
                    .into_iter()
                    .find(|e| e.name == name)
                    .map(|e| sqfs_entry(sqfs, path, e.inode_ref))
                    .transpose()
            }
            _ => Err(AppImageError::InvalidParameter(
                "entry belongs to a different container".into(),
            )),
        }
    }

    fn resolve(&self, path: &str, follow_final: bool) -> Result<Entry> {
        let not_found = || AppImageError::NotFound(format!("{path:?} does not exist"));

        let mut pending = components(path);
        let mut stack = vec![self.root()?];
        let mut hops = 0;

        while let Some(component) = pending.pop_front() {
            if component == ".." {
                if stack.len() > 1 {
                    stack.pop();
                }
                continue;
            }

            let Some(dir) = stack.last().filter(|e| e.is_dir()) else {
                return Err(not_found());
            };
            let child = self.child(dir, &component)?.ok_or_else(not_found)?;

            if let Some(target) = child.symlink_target() {
                if !pending.is_empty() || follow_final {
                    hops += 1;
                    if hops > MAX_SYMLINK_HOPS {
                        return Err(AppImageError::NotFound(format!(
                            "too many levels of symbolic links resolving {path:?}"
                        )));
                    }
                    trace!(link = %child.path, target, "following symlink");
                    if target.starts_with('/') {
                        stack.truncate(1);
                    }
                    let mut next = components(target);
                    next.append(&mut pending);
                    pending = next;
                    continue;
                }
            }
            stack.push(child);
        }

        stack.pop().ok_or_else(not_found)
    }

    /// Looks up `path` without following a symlink in the final component.
    pub fn lookup(&self, path: &str) -> Result<Entry> {
        self.resolve(path, false)
    }

    /// Looks up `path`, following symlinks all the way.
    pub fn lookup_follow(&self, path: &str) -> Result<Entry> {
        self.resolve(path, true)
    }

    /// Lists the directory at `path`, following symlinks.
    pub fn list(&self, path: &str) -> Result<Vec<Entry>> {
        let dir = self.lookup_follow(path)?;
        if !dir.is_dir() {
            return Err(AppImageError::NotFound(format!(
                "{path:?} is not a directory"
            )));
        }
        self.read_dir(&dir)
    }

    /// Every entry below the root, depth first, without following symlinks.
    pub fn walk(&self) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        let root = self.root()?;
        let mut visited = HashSet::from([root.locator.position()]);
        let mut pending = vec![root];
        while let Some(dir) = pending.pop() {
            let mut children = self.read_dir(&dir)?;
            children.sort_by(|a, b| b.path.cmp(&a.path));
            for child in children {
                if child.is_dir() {
                    if !visited.insert(child.locator.position()) {
                        return Err(AppImageError::FilesystemError(format!(
                            "directory {:?} is reachable more than once",
                            child.path
                        )));
                    }
                    pending.push(child.clone());
                }
                out.push(child);
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    /// Opens a stream over the regular file `entry`.
    pub fn open_entry(&self, entry: &Entry) -> Result<EntryReader<'_>> {
        if !entry.is_file() {
            return Err(AppImageError::InvalidParameter(format!(
                "{:?} is not a regular file",
                entry.path
            )));
        }
        match (self, &entry.locator) {
            (Container::Iso9660(iso), Locator::Iso(record)) => {
                Ok(EntryReader::Iso(iso.file_reader(record)?))
            }
            (Container::Squashfs(sqfs), Locator::Squashfs(inode_ref)) => {
                let inode = sqfs.inode(*inode_ref)?;
                Ok(EntryReader::Squashfs(sqfs.file_reader(&inode)?))
            }
            _ => Err(AppImageError::InvalidParameter(
                "entry belongs to a different container".into(),
            )),
        }
    }

    /// Opens the regular file at `path`, following symlinks.
    pub fn open_file(&self, path: &str) -> Result<(Entry, EntryReader<'_>)> {
        let entry = self.lookup_follow(path)?;
        if !entry.is_file() {
            return Err(AppImageError::NotFound(format!(
                "{path:?} is not a regular file"
            )));
        }
        let reader = self.open_entry(&entry)?;
        Ok((entry, reader))
    }

    /// Reads the whole regular file at `path`.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let (entry, mut reader) = self.open_file(path)?;
        let mut data = Vec::with_capacity(entry.size.min(16 * 1024 * 1024) as usize);
        reader
            .read_to_end(&mut data)
            .map_err(|err| AppImageError::io(format!("reading {path:?}"), err))?;
        Ok(data)
    }
}

fn iso_entry(path: String, record: IsoRecord) -> Entry {
    let kind = match (&record.symlink, record.is_dir) {
        (Some(target), _) => EntryKind::Symlink {
            target: target.clone(),
        },
        (None, true) => EntryKind::Directory,
        (None, false) => EntryKind::File,
    };
    let size = match &kind {
        EntryKind::File => u64::from(record.size),
        EntryKind::Symlink { target } => target.len() as u64,
        _ => 0,
    };
    Entry {
        path,
        size,
        kind,
        mode: None,
        locator: Locator::Iso(record),
    }
}

fn sqfs_entry(sqfs: &SquashfsReader, path: String, inode_ref: u64) -> Result<Entry> {
    let inode = sqfs.inode(inode_ref)?;
    let (kind, size) = match inode.kind {
        InodeKind::Directory { .. } => (EntryKind::Directory, 0),
        InodeKind::File { file_size, .. } => (EntryKind::File, file_size),
        InodeKind::Symlink { target } => {
            let size = target.len() as u64;
            (EntryKind::Symlink { target }, size)
        }
        InodeKind::Other => (EntryKind::Other, 0),
    };
    Ok(Entry {
        path,
        size,
        kind,
        mode: Some(u32::from(inode.mode & 0o7777)),
        locator: Locator::Squashfs(inode_ref),
    })
}

/// Stream over a regular file in either container type.
pub enum EntryReader<'a> {
    Iso(IsoFileReader<'a>),
    Squashfs(SquashfsFileReader<'a>),
}

impl Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            EntryReader::Iso(r) => r.read(buf),
            EntryReader::Squashfs(r) => r.read(buf),
        }
    }
}
