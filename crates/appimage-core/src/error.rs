//! Error types for the core crate.

use std::{fmt, io, path::PathBuf};

use appimage_config::error::ConfigError;
use appimage_utils::error::{FileSystemError, HashError};
use miette::Diagnostic;
use thiserror::Error;

/// Coarse classification of an [`AppImageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    IoError,
    InvalidFormat,
    ElfError,
    FilesystemError,
    SquashfsError,
    NotSupported,
    InvalidParameter,
    NotFound,
    PermissionDenied,
    OperationFailed,
    StringError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors that can occur while inspecting or integrating an AppImage.
#[derive(Error, Diagnostic, Debug)]
pub enum AppImageError {
    #[error("Error while {action}: {source}")]
    #[diagnostic(code(appimage_core::io))]
    IoError {
        action: String,
        source: io::Error,
    },

    #[error("Permission denied while {action}")]
    #[diagnostic(
        code(appimage_core::permission_denied),
        help("Check that you have access to the file and its parent directories")
    )]
    PermissionDenied {
        action: String,
        source: io::Error,
    },

    #[error("No such file: {}", .0.display())]
    #[diagnostic(code(appimage_core::path_not_found))]
    PathNotFound(PathBuf),

    #[error("Not a regular file: {}", .0.display())]
    #[diagnostic(code(appimage_core::not_a_regular_file))]
    NotARegularFile(PathBuf),

    #[error("Invalid format: {0}")]
    #[diagnostic(
        code(appimage_core::invalid_format),
        help("The file does not look like an AppImage")
    )]
    InvalidFormat(String),

    #[error("Malformed ELF: {0}")]
    #[diagnostic(code(appimage_core::elf))]
    ElfError(String),

    #[error("No embedded image found in {} (ELF ends at {offset}, file is {size} bytes)", path.display())]
    #[diagnostic(code(appimage_core::no_embedded_image))]
    NoEmbeddedImage {
        path: PathBuf,
        offset: u64,
        size: u64,
    },

    #[error("ISO9660 error: {0}")]
    #[diagnostic(code(appimage_core::iso9660))]
    FilesystemError(String),

    #[error("SquashFS error: {0}")]
    #[diagnostic(code(appimage_core::squashfs))]
    SquashfsError(String),

    #[error("Not supported: {0}")]
    #[diagnostic(code(appimage_core::not_supported))]
    NotSupported(String),

    #[error("Invalid parameter: {0}")]
    #[diagnostic(code(appimage_core::invalid_parameter))]
    InvalidParameter(String),

    #[error("Not found: {0}")]
    #[diagnostic(code(appimage_core::not_found))]
    NotFound(String),

    #[error("Operation failed: {0}")]
    #[diagnostic(
        code(appimage_core::operation_failed),
        help("Some integration files may need to be removed manually")
    )]
    OperationFailed(String),

    #[error("Invalid string: {0}")]
    #[diagnostic(code(appimage_core::string))]
    StringError(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    FileSystem(#[from] FileSystemError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

impl AppImageError {
    /// Maps this error onto its [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppImageError::IoError { .. } => ErrorKind::IoError,
            AppImageError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            AppImageError::PathNotFound(_) => ErrorKind::NotFound,
            AppImageError::NotARegularFile(_) => ErrorKind::InvalidParameter,
            AppImageError::InvalidFormat(_) | AppImageError::NoEmbeddedImage { .. } => {
                ErrorKind::InvalidFormat
            }
            AppImageError::ElfError(_) => ErrorKind::ElfError,
            AppImageError::FilesystemError(_) => ErrorKind::FilesystemError,
            AppImageError::SquashfsError(_) => ErrorKind::SquashfsError,
            AppImageError::NotSupported(_) => ErrorKind::NotSupported,
            AppImageError::InvalidParameter(_) | AppImageError::Config(_) => {
                ErrorKind::InvalidParameter
            }
            AppImageError::NotFound(_) => ErrorKind::NotFound,
            AppImageError::OperationFailed(_) => ErrorKind::OperationFailed,
            AppImageError::StringError(_) => ErrorKind::StringError,
            AppImageError::FileSystem(err) => {
                match err.io_error().map(io::Error::kind) {
                    Some(io::ErrorKind::PermissionDenied) => ErrorKind::PermissionDenied,
                    _ => ErrorKind::IoError,
                }
            }
        }
    }

    /// Wraps an I/O error, classifying permission failures.
    pub fn io(action: impl Into<String>, source: io::Error) -> Self {
        let action = action.into();
        if source.kind() == io::ErrorKind::PermissionDenied {
            return AppImageError::PermissionDenied { action, source };
        }

        // errors raised by container streams travel through io::Error
        let nested = source
            .get_ref()
            .is_some_and(|inner| inner.is::<AppImageError>());
        if !nested {
            return AppImageError::IoError { action, source };
        }
        match source.into_inner().map(|inner| inner.downcast::<AppImageError>()) {
            Some(Ok(err)) => *err,
            _ => AppImageError::OperationFailed(action),
        }
    }

    /// Converts this error into an [`io::Error`] so it can cross a [`std::io::Read`] boundary.
    pub(crate) fn into_io(self) -> io::Error {
        io::Error::other(self)
    }
}

impl From<HashError> for AppImageError {
    fn from(err: HashError) -> Self {
        match err {
            HashError::ReadFailed { path, source } => {
                AppImageError::io(format!("hashing {}", path.display()), source)
            }
        }
    }
}

/// A specialized Result type for AppImage operations.
pub type Result<T> = std::result::Result<T, AppImageError>;

/// Extension trait for adding context to I/O errors.
pub trait ErrorContext<T> {
    /// Adds context to an error, describing what action was being performed.
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String;
}

impl<T> ErrorContext<T> for io::Result<T> {
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String,
    {
        self.map_err(|err| AppImageError::io(context(), err))
    }
}

/// Unwraps a [`FileSystemError`] whose I/O source carries an [`AppImageError`] raised while
/// streaming container data.
pub(crate) fn from_fs_error(err: FileSystemError) -> AppImageError {
    match err {
        FileSystemError::File {
            path,
            action,
            source,
        } if source.get_ref().is_some_and(|inner| inner.is::<AppImageError>()) => {
            AppImageError::io(format!("{action} {}", path.display()), source)
        }
        other => AppImageError::FileSystem(other),
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_with_context_classifies_permission_denied() {
        let result: io::Result<()> = Err(io::Error::from(io::ErrorKind::PermissionDenied));
        let err = result.with_context(|| "writing desktop entry".into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(err.to_string(), "Permission denied while writing desktop entry");
    }

    #[test]
    fn test_with_context_plain_io() {
        let result: io::Result<()> = Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        let err = result.with_context(|| "reading ELF header".into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoError);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_io_unwraps_nested_error() {
        let nested = AppImageError::SquashfsError("bad block".into()).into_io();
        let err = AppImageError::io("extracting", nested);
        assert_eq!(err.kind(), ErrorKind::SquashfsError);
    }

    #[test]
    fn test_from_fs_error_unwraps_stream_error() {
        let fs_err = FileSystemError::File {
            path: PathBuf::from("/tmp/out"),
            action: "write",
            source: AppImageError::NotFound("x".into()).into_io(),
        };
        assert_eq!(from_fs_error(fs_err).kind(), ErrorKind::NotFound);

        let fs_err = FileSystemError::File {
            path: PathBuf::from("/tmp/out"),
            action: "create",
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(from_fs_error(fs_err).kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            AppImageError::PathNotFound("/x".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            AppImageError::NoEmbeddedImage {
                path: "/x".into(),
                offset: 0,
                size: 0
            }
            .kind(),
            ErrorKind::InvalidFormat
        );
        assert_eq!(
            AppImageError::NotARegularFile("/x".into()).kind(),
            ErrorKind::InvalidParameter
        );
    }
}
