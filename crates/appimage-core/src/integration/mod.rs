//! Desktop integration: deploying an AppImage's desktop entry, icons, MIME packages and
//! thumbnails into the user's XDG directories, and removing them again.
//!
//! Every artifact carries the `<vendor>_<identifier>` prefix, where the identifier is derived
//! from the AppImage's path, so the artifacts of one AppImage can always be found again.

pub mod deploy;
pub mod desktop_entry;
pub mod icon;
pub mod resources;
pub mod thumbnail;

use std::{
    fs,
    path::{Path, PathBuf},
};

use appimage_config::{
    config::{get_config, Config, DEFAULT_VENDOR_PREFIX},
    error::ConfigError,
};
use appimage_utils::{
    fs::{safe_remove, walk_dir},
    string::sanitize_for_path,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use self::{
    deploy::Deployment,
    desktop_entry::{DesktopEntry, EntryEditor},
    resources::{find_desktop_entry, find_icons, find_mime_packages, thumbnail_source, Resource},
    thumbnail::{thumbnail_paths, write_thumbnails},
};
use crate::{
    appimage::{identifier_for_path, AppImage},
    error::{AppImageError, ErrorContext, Result},
};

/// What an integration put on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrationRecord {
    pub identifier: String,
    pub vendor_prefix: String,
    pub desktop_entry: Option<PathBuf>,
    pub artifacts: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct IntegrationManager {
    data_home: PathBuf,
    cache_home: PathBuf,
    vendor_prefix: String,
    thumbnails: bool,
    mime_packages: bool,
}

impl IntegrationManager {
    /// Creates a manager from the global configuration.
    pub fn new() -> Result<Self> {
        Self::from_config(&get_config())
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            data_home: config.get_data_home()?,
            cache_home: config.get_cache_home()?,
            vendor_prefix: config.vendor_prefix().to_string(),
            thumbnails: config.thumbnails_enabled(),
            mime_packages: config.mime_packages_enabled(),
        })
    }

    /// Creates a manager writing below explicit data and cache directories.
    pub fn with_dirs<D: Into<PathBuf>, C: Into<PathBuf>>(data_home: D, cache_home: C) -> Self {
        Self {
            data_home: data_home.into(),
            cache_home: cache_home.into(),
            vendor_prefix: DEFAULT_VENDOR_PREFIX.to_string(),
            thumbnails: true,
            mime_packages: true,
        }
    }

    pub fn with_vendor_prefix(mut self, prefix: &str) -> Result<Self> {
        if prefix.is_empty() || sanitize_for_path(prefix) != prefix {
            return Err(ConfigError::InvalidVendorPrefix(prefix.to_string()).into());
        }
        self.vendor_prefix = prefix.to_string();
        Ok(self)
    }

    pub fn with_thumbnails(mut self, enabled: bool) -> Self {
        self.thumbnails = enabled;
        self
    }

    pub fn with_mime_packages(mut self, enabled: bool) -> Self {
        self.mime_packages = enabled;
        self
    }

    pub fn data_home(&self) -> &Path {
        &self.data_home
    }

    pub fn cache_home(&self) -> &Path {
        &self.cache_home
    }

    pub fn vendor_prefix(&self) -> &str {
        &self.vendor_prefix
    }

    fn prefix(&self, identifier: &str) -> String {
        format!("{}_{identifier}", self.vendor_prefix)
    }

    fn applications_dir(&self) -> PathBuf {
        self.data_home.join("applications")
    }

    /// Files directly inside `dir` whose names start with `prefix`. A missing `dir` is empty.
    fn prefixed_files(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
            let entry = entry.with_context(|| format!("reading {}", dir.display()))?;
            if entry.file_name().to_string_lossy().starts_with(prefix) {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }

    fn desktop_files(&self, identifier: &str) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}-", self.prefix(identifier));
        Ok(Self::prefixed_files(&self.applications_dir(), &prefix)?
            .into_iter()
            .filter(|path| path.extension().is_some_and(|ext| ext == "desktop"))
            .collect())
    }

    /// Every artifact on disk that belongs to `identifier`, sorted.
    fn artifacts(&self, identifier: &str) -> Result<Vec<PathBuf>> {
        let prefix = self.prefix(identifier);
        let mut found = Self::prefixed_files(&self.applications_dir(), &prefix)?;
        found.extend(Self::prefixed_files(
            &self.data_home.join("mime").join("packages"),
            &prefix,
        )?);

        let icons = self.data_home.join("icons");
        if icons.is_dir() {
            walk_dir(&icons, &mut |path: &Path| -> Result<()> {
                if path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with(&prefix))
                {
                    found.push(path.to_path_buf());
                }
                Ok(())
            })?;
        }

        found.extend(
            thumbnail_paths(&self.cache_home, identifier)
                .into_iter()
                .filter(|path| path.exists()),
        );
        found.sort();
        Ok(found)
    }

    /// Whether a desktop entry for `appimage` exists.
    pub fn is_integrated(&self, appimage: &AppImage) -> Result<bool> {
        Ok(!self.desktop_files(appimage.identifier())?.is_empty())
    }

    /// The artifacts of an existing integration, or `None` if `appimage` is not integrated.
    pub fn integration_record(&self, appimage: &AppImage) -> Result<Option<IntegrationRecord>> {
        let identifier = appimage.identifier();
        let Some(desktop_entry) = self.desktop_files(identifier)?.into_iter().next() else {
            return Ok(None);
        };
        Ok(Some(IntegrationRecord {
            identifier: identifier.to_string(),
            vendor_prefix: self.vendor_prefix.clone(),
            desktop_entry: Some(desktop_entry),
            artifacts: self.artifacts(identifier)?,
        }))
    }

    fn load_desktop_entry(&self, appimage: &AppImage) -> Result<DesktopEntry> {
        let container = appimage.container()?;
        let entry = find_desktop_entry(container)?;
        let data = container.read_file(&entry.path)?;
        let text = String::from_utf8(data).map_err(|_| {
            AppImageError::StringError(format!("{} is not valid UTF-8", entry.path))
        })?;
        DesktopEntry::parse(&text)
    }

    /// Whether the AppImage's desktop entry asks to be shown in menus.
    ///
    /// False for entries marked `X-AppImage-Integrate=false`, `NoDisplay=true` or
    /// `Terminal=true`.
    pub fn should_integrate(&self, appimage: &AppImage) -> Result<bool> {
        let entry = self.load_desktop_entry(appimage)?;
        let opted_out = entry.flag("X-AppImage-Integrate") == Some(false)
            || entry.flag("NoDisplay") == Some(true)
            || entry.flag("Terminal") == Some(true);
        Ok(!opted_out)
    }

    /// Integrates `appimage` into the desktop.
    ///
    /// Already integrated AppImages are left untouched and their existing record is
    /// returned. If any artifact fails to deploy, everything written so far is removed again
    /// before the error is returned.
    ///
    /// # Errors
    ///
    /// * [`AppImageError::NotSupported`] if the entry opts out of integration.
    /// * [`AppImageError::NotFound`] if there is no desktop entry or it has no `Name`.
    /// * [`AppImageError::InvalidParameter`] for entries without `Exec`.
    /// * [`AppImageError::OperationFailed`] if a failed attempt could not be rolled back.
    pub fn integrate(&self, appimage: &AppImage) -> Result<IntegrationRecord> {
        let identifier = appimage.identifier();
        if let Some(record) = self.integration_record(appimage)? {
            debug!(identifier, "already integrated");
            return Ok(record);
        }

        let mut entry = self.load_desktop_entry(appimage)?;
        if entry.flag("X-AppImage-Integrate") == Some(false) {
            return Err(AppImageError::NotSupported(
                "the desktop entry sets X-AppImage-Integrate=false".into(),
            ));
        }
        if entry.flag("NoDisplay") == Some(true) {
            return Err(AppImageError::NotSupported(
                "the desktop entry sets NoDisplay=true".into(),
            ));
        }

        let appimage_path = appimage.path().to_str().ok_or_else(|| {
            AppImageError::StringError(format!(
                "{} is not valid UTF-8",
                appimage.path().display()
            ))
        })?;
        let desktop_path = self.applications_dir().join(format!(
            "{}-{}.desktop",
            self.prefix(identifier),
            sanitize_for_path(entry.name()?)
        ));

        let editor = EntryEditor {
            appimage_path,
            vendor_prefix: &self.vendor_prefix,
            identifier,
        };
        let icon = entry.icon().map(str::to_string);
        editor.apply(&mut entry)?;

        let container = appimage.container()?;
        let icons = match &icon {
            Some(icon) => find_icons(container, icon, &editor)?,
            None => Vec::new(),
        };
        match &icon {
            None => warn!(identifier, "desktop entry has no Icon"),
            Some(icon) if icons.is_empty() => warn!(identifier, icon = %icon, "no icon found"),
            Some(_) => {}
        }
        let mime_packages = if self.mime_packages {
            find_mime_packages(container, &editor)?
        } else {
            Vec::new()
        };

        let mut deployment = Deployment::new();
        let deployed = self.deploy(
            &mut deployment,
            identifier,
            &icons,
            &mime_packages,
            &desktop_path,
            &entry,
        );
        if let Err(err) = deployed {
            warn!(identifier, error = %err, "integration failed, rolling back");
            deployment.rollback()?;
            return Err(err);
        }

        info!(
            identifier,
            desktop_entry = %desktop_path.display(),
            artifacts = deployment.written().len(),
            "integrated AppImage"
        );
        Ok(IntegrationRecord {
            identifier: identifier.to_string(),
            vendor_prefix: self.vendor_prefix.clone(),
            desktop_entry: Some(desktop_path),
            artifacts: deployment.into_written(),
        })
    }

    /// Writes the artifacts; the desktop entry goes last so it only appears once everything
    /// it references exists.
    fn deploy(
        &self,
        deployment: &mut Deployment,
        identifier: &str,
        icons: &[Resource],
        mime_packages: &[Resource],
        desktop_path: &Path,
        entry: &DesktopEntry,
    ) -> Result<()> {
        for icon in icons {
            deployment.write(&self.data_home.join(&icon.target), &icon.data, 0o644)?;
        }
        for package in mime_packages {
            deployment.write(&self.data_home.join(&package.target), &package.data, 0o644)?;
        }
        if self.thumbnails {
            if let Some(icon) = thumbnail_source(icons) {
                write_thumbnails(deployment, &self.cache_home, identifier, &icon.data);
            }
        }
        deployment.write(desktop_path, entry.to_string().as_bytes(), 0o755)
    }

    /// Removes every artifact of `appimage`. Returns the removed paths.
    pub fn unintegrate(&self, appimage: &AppImage) -> Result<Vec<PathBuf>> {
        self.unintegrate_identifier(appimage.identifier())
    }

    /// Like [`Self::unintegrate`], for an AppImage that may no longer exist.
    pub fn unintegrate_path<P: AsRef<Path>>(&self, path: P) -> Result<Vec<PathBuf>> {
        self.unintegrate_identifier(&identifier_for_path(path))
    }

    fn unintegrate_identifier(&self, identifier: &str) -> Result<Vec<PathBuf>> {
        let artifacts = self.artifacts(identifier)?;
        for path in &artifacts {
            safe_remove(path)?;
            debug!(path = %path.display(), "removed artifact");
        }
        if !artifacts.is_empty() {
            info!(identifier, removed = artifacts.len(), "unintegrated AppImage");
        }
        Ok(artifacts)
    }
}
