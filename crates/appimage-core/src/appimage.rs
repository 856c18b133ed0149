//! The [`AppImage`] handle: a validated AppImage file with lazily built container access.

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use appimage_utils::{
    fs::copy_atomic,
    hash::{md5_hex, md5_reader},
    path::path_to_uri,
};
use serde::Serialize;
use tracing::{debug, trace};

use crate::{
    container::{Container, Entry},
    elf::elf_end_offset,
    error::{from_fs_error, AppImageError, ErrorContext, Result},
    format::{classify, runtime_type, Format},
    source::{ImageSource, PositionalReader, ReadAt},
};

/// Freedesktop-style identifier for `path`: the MD5 of its `file://` URI.
///
/// The path is canonicalized when it exists so every spelling of the same file maps to one
/// identifier.
pub fn identifier_for_path<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();
    let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    md5_hex(path_to_uri(path))
}

struct Inspection {
    path: PathBuf,
    file: File,
    size: u64,
    elf_end: u64,
    format: Format,
    payload_offset: u64,
    runtime_type: Option<u8>,
}

fn inspect(path: &Path) -> Result<Inspection> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(AppImageError::PathNotFound(path.to_path_buf()))
        }
        Err(err) => {
            return Err(AppImageError::io(
                format!("reading metadata of {}", path.display()),
                err,
            ))
        }
    };
    if !metadata.is_file() {
        return Err(AppImageError::NotARegularFile(path.to_path_buf()));
    }

    let path = fs::canonicalize(path)
        .with_context(|| format!("resolving {}", path.display()))?;
    let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
    let size = metadata.len();

    let elf_end = elf_end_offset(&file)?;
    if elf_end == 0 || elf_end > size {
        return Err(AppImageError::NoEmbeddedImage {
            path,
            offset: elf_end,
            size,
        });
    }

    let classification = classify(&file, size, elf_end)
        .with_context(|| format!("reading payload magic of {}", path.display()))?;
    let runtime_type = runtime_type(&file, size)
        .with_context(|| format!("reading runtime magic of {}", path.display()))?;

    debug!(
        path = %path.display(),
        size,
        elf_end,
        format = %classification.format,
        payload_offset = classification.payload_offset,
        "inspected AppImage"
    );

    Ok(Inspection {
        path,
        file,
        size,
        elf_end,
        format: classification.format,
        payload_offset: classification.payload_offset,
        runtime_type,
    })
}

/// Detects the payload format of the ELF file at `path`.
///
/// Unlike [`AppImage::open`], an unrecognised payload is reported as [`Format::Unknown`]
/// rather than an error.
pub fn detect_format<P: AsRef<Path>>(path: P) -> Result<Format> {
    inspect(path.as_ref()).map(|inspection| inspection.format)
}

/// Summary of an opened AppImage.
#[derive(Debug, Clone, Serialize)]
pub struct AppImageInfo {
    pub path: PathBuf,
    pub size: u64,
    pub format: Format,
    pub format_number: Option<u8>,
    pub runtime_type: Option<u8>,
    pub offset: u64,
    pub payload_offset: u64,
    pub identifier: String,
}

/// An opened AppImage.
///
/// Layout facts are computed once at construction; the digest, identifier and container
/// reader are built on first use. The handle is `Send + Sync`: all file access uses
/// positional reads.
pub struct AppImage {
    path: PathBuf,
    size: u64,
    elf_end: u64,
    format: Format,
    payload_offset: u64,
    runtime_type: Option<u8>,
    file: Arc<File>,
    md5: OnceLock<String>,
    identifier: OnceLock<String>,
    container: OnceLock<Container>,
}

impl AppImage {
    /// Opens and validates the AppImage at `path`.
    ///
    /// # Errors
    ///
    /// * [`AppImageError::PathNotFound`] if nothing exists at `path`.
    /// * [`AppImageError::NotARegularFile`] for directories and special files.
    /// * [`AppImageError::InvalidFormat`] if the file is not ELF or the payload is not
    ///   recognised.
    /// * [`AppImageError::ElfError`] for malformed ELF headers.
    /// * [`AppImageError::NoEmbeddedImage`] if the ELF end offset is 0 or past the file end.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let inspection = inspect(path.as_ref())?;
        if inspection.format == Format::Unknown {
            return Err(AppImageError::InvalidFormat(format!(
                "no ISO9660 or SquashFS image follows the runtime of {}",
                inspection.path.display()
            )));
        }

        Ok(Self {
            path: inspection.path,
            size: inspection.size,
            elf_end: inspection.elf_end,
            format: inspection.format,
            payload_offset: inspection.payload_offset,
            runtime_type: inspection.runtime_type,
            file: Arc::new(inspection.file),
            md5: OnceLock::new(),
            identifier: OnceLock::new(),
            container: OnceLock::new(),
        })
    }

    /// Canonical absolute path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Offset at which the ELF runtime ends.
    pub fn offset(&self) -> u64 {
        self.elf_end
    }

    /// Offset at which the container volume begins.
    pub fn payload_offset(&self) -> u64 {
        self.payload_offset
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Type byte of the `AI` runtime magic, when the runtime carries one.
    pub fn runtime_type(&self) -> Option<u8> {
        self.runtime_type
    }

    /// MD5 of the whole file as lowercase hex.
    ///
    /// The digest is read through the handle opened by [`AppImage::open`], so it describes
    /// the same content the container reads even if the path is replaced afterwards.
    pub fn md5(&self) -> Result<&str> {
        if let Some(digest) = self.md5.get() {
            return Ok(digest);
        }
        let digest = md5_reader(PositionalReader::new(&*self.file, 0), &self.path)?;
        trace!(path = %self.path.display(), digest = %digest, "computed digest");
        Ok(self.md5.get_or_init(|| digest))
    }

    /// Path-derived identity used to name integration artifacts.
    pub fn identifier(&self) -> &str {
        self.identifier
            .get_or_init(|| md5_hex(path_to_uri(&self.path)))
    }

    pub fn info(&self) -> AppImageInfo {
        AppImageInfo {
            path: self.path.clone(),
            size: self.size,
            format: self.format,
            format_number: self.format.as_number(),
            runtime_type: self.runtime_type,
            offset: self.elf_end,
            payload_offset: self.payload_offset,
            identifier: self.identifier().to_string(),
        }
    }

    /// The payload container, opened on first use.
    pub fn container(&self) -> Result<&Container> {
        if let Some(container) = self.container.get() {
            return Ok(container);
        }
        let source = ImageSource::new(self.file.clone() as Arc<dyn ReadAt>, self.payload_offset)
            .with_context(|| format!("sizing {}", self.path.display()))?;
        let container = Container::open(source, self.format)?;
        Ok(self.container.get_or_init(|| container))
    }

    /// Reads the whole file at `source` inside the payload.
    pub fn read_file(&self, source: &str) -> Result<Vec<u8>> {
        self.container()?.read_file(source)
    }

    /// Extracts the file at `source` inside the payload to `target`.
    ///
    /// `target` is replaced atomically: on failure it keeps its previous state and no
    /// partially written file is left behind.
    pub fn extract_file<P: AsRef<Path>>(&self, source: &str, target: P) -> Result<u64> {
        let target = target.as_ref();
        let (entry, mut reader) = self.container()?.open_file(source)?;
        let mode = entry.mode.map_or(0o644, |mode| mode & 0o777);

        let written = copy_atomic(&mut reader, target, mode).map_err(from_fs_error)?;
        debug!(
            source,
            target = %target.display(),
            bytes = written,
            "extracted file"
        );
        Ok(written)
    }

    /// Every entry in the payload, sorted by path.
    pub fn files(&self) -> Result<Vec<Entry>> {
        self.container()?.walk()
    }

    /// Entries directly inside the payload directory `dir`.
    pub fn list(&self, dir: &str) -> Result<Vec<Entry>> {
        let mut entries = self.container()?.list(dir)?;
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}
