//! AppImage inspection, extraction and desktop integration.
//!
//! An [`AppImage`] is an ELF runtime followed by an embedded filesystem image: ISO9660 for
//! Type 1 and SquashFS for Type 2. This crate locates the image, reads files out of it
//! without mounting, and integrates the application into the user's desktop.
//!
//! # Example
//!
//! ```no_run
//! use appimage_core::{AppImage, IntegrationManager, Result};
//!
//! fn install(path: &str) -> Result<()> {
//!     let appimage = AppImage::open(path)?;
//!     println!("{} is {}", appimage.path().display(), appimage.format());
//!
//!     let manager = IntegrationManager::new()?;
//!     if manager.should_integrate(&appimage)? {
//!         manager.integrate(&appimage)?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Log messages are emitted with `tracing`. Embedders without a subscriber of their own can
//! register a [`LogSink`] and install [`SinkLayer`] to receive them.

pub mod appimage;
pub mod container;
pub mod elf;
pub mod error;
pub mod format;
pub mod integration;
pub mod source;

#[cfg(test)]
mod testing;

pub use appimage_events::{
    clear_log_sink, set_log_level, set_log_sink, LogLevel, LogRecord, LogSink, SinkLayer,
};
pub use appimage::{detect_format, identifier_for_path, AppImage, AppImageInfo};
pub use container::{Container, Entry, EntryKind};
pub use error::{AppImageError, ErrorContext, ErrorKind, Result};
pub use format::Format;
pub use integration::{IntegrationManager, IntegrationRecord};
