use std::{
    fs::{self, Permissions},
    io::{self, Read, Write},
    os::unix::fs::PermissionsExt,
    path::Path,
};

use tempfile::NamedTempFile;

use crate::error::{FileSystemError, FileSystemResult};

pub trait FileSystemProvider {
    /// Removes the specified file or directory safely.
    ///
    /// If the path does not exist, this function returns `Ok(())` without error. Directories
    /// are removed recursively. Symlinks are removed, never followed.
    ///
    /// # Errors
    ///
    /// Returns a [`FileSystemError::File`] if the removal fails for any reason other than
    /// the path not existing (e.g., permission denied).
    fn safe_remove<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<()>;

    /// Creates a directory structure if it doesn't exist.
    ///
    /// # Errors
    ///
    /// * [`FileSystemError::Directory`] if the directory could not be created.
    /// * [`FileSystemError::NotADirectory`] if the path exists but is not a directory.
    fn ensure_dir_exists<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<()>;

    /// Streams `reader` into `path` through a temporary file in the same directory and
    /// renames it into place, so `path` either keeps its previous content or receives the
    /// complete new content.
    ///
    /// Missing parent directories are created. The final file gets the given `mode`.
    ///
    /// # Returns
    ///
    /// The number of bytes written.
    ///
    /// # Errors
    ///
    /// * [`FileSystemError::Directory`] if the parent directory cannot be created.
    /// * [`FileSystemError::File`] if the temporary file cannot be created, written or
    ///   renamed. The temporary file is removed in every failure case.
    fn copy_atomic<P: AsRef<Path>, R: Read>(
        &self,
        reader: &mut R,
        path: P,
        mode: u32,
    ) -> FileSystemResult<u64>;
}

#[derive(Default, Clone)]
pub struct StandardFileSystemProvider;

impl FileSystemProvider for StandardFileSystemProvider {
    fn safe_remove<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<()> {
        let path = path.as_ref();

        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(FileSystemError::File {
                    path: path.to_path_buf(),
                    action: "inspect",
                    source: err,
                })
            }
        };

        let result = if metadata.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };

        result.map_err(|err| FileSystemError::File {
            path: path.to_path_buf(),
            action: "remove",
            source: err,
        })
    }

    fn ensure_dir_exists<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path).map_err(|err| FileSystemError::Directory {
                path: path.to_path_buf(),
                action: "create",
                source: err,
            })?;
        } else if !path.is_dir() {
            return Err(FileSystemError::NotADirectory {
                path: path.to_path_buf(),
            });
        }

        Ok(())
    }

    fn copy_atomic<P: AsRef<Path>, R: Read>(
        &self,
        reader: &mut R,
        path: P,
        mode: u32,
    ) -> FileSystemResult<u64> {
        let path = path.as_ref();
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        self.ensure_dir_exists(parent)?;

        let file_err = |action: &'static str| {
            move |err: io::Error| FileSystemError::File {
                path: path.to_path_buf(),
                action,
                source: err,
            }
        };

        let mut tmp = NamedTempFile::new_in(parent).map_err(file_err("create"))?;
        let written = io::copy(reader, tmp.as_file_mut()).map_err(file_err("write"))?;
        tmp.as_file_mut().flush().map_err(file_err("write"))?;
        tmp.as_file()
            .set_permissions(Permissions::from_mode(mode))
            .map_err(file_err("set permissions on"))?;
        tmp.persist(path)
            .map_err(|err| file_err("replace")(err.error))?;

        Ok(written)
    }
}

/// Creates a directory structure if it doesn't exist.
///
/// See [`FileSystemProvider::ensure_dir_exists`] for detailed documentation.
pub fn ensure_dir_exists<P: AsRef<Path>>(path: P) -> FileSystemResult<()> {
    StandardFileSystemProvider.ensure_dir_exists(path)
}

/// Removes the specified file or directory safely.
///
/// See [`FileSystemProvider::safe_remove`] for detailed documentation.
pub fn safe_remove<P: AsRef<Path>>(path: P) -> FileSystemResult<()> {
    StandardFileSystemProvider.safe_remove(path)
}

/// Atomically replaces `path` with the bytes read from `reader`.
///
/// See [`FileSystemProvider::copy_atomic`] for detailed documentation.
pub fn copy_atomic<P: AsRef<Path>, R: Read>(
    reader: &mut R,
    path: P,
    mode: u32,
) -> FileSystemResult<u64> {
    StandardFileSystemProvider.copy_atomic(reader, path, mode)
}

/// Atomically replaces `path` with `contents`, using mode `0644`.
pub fn write_atomic<P: AsRef<Path>>(path: P, contents: &[u8]) -> FileSystemResult<()> {
    let mut contents = contents;
    StandardFileSystemProvider
        .copy_atomic(&mut contents, path, 0o644)
        .map(|_| ())
}

/// Recursively visits every non-directory entry below `dir`.
///
/// Symlinked directories are reported as entries and not descended into.
///
/// # Errors
///
/// * [`FileSystemError::NotADirectory`] if `dir` is not a directory.
/// * [`FileSystemError::Directory`] if a directory cannot be read.
/// * Any error returned by `action`.
pub fn walk_dir<P, F, E>(dir: P, action: &mut F) -> Result<(), E>
where
    P: AsRef<Path>,
    F: FnMut(&Path) -> Result<(), E>,
    E: From<FileSystemError>,
{
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(FileSystemError::NotADirectory {
            path: dir.to_path_buf(),
        }
        .into());
    }

    let read_err = |err: io::Error| FileSystemError::Directory {
        path: dir.to_path_buf(),
        action: "read",
        source: err,
    };

    for entry in fs::read_dir(dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(read_err)?;

        if file_type.is_dir() {
            walk_dir(&path, action)?;
        } else {
            action(&path)?;
        }
    }

    Ok(())
}
