//! Locating the desktop entry, icons and MIME packages inside a payload.

use std::{path::PathBuf, sync::LazyLock};

use appimage_utils::string::sanitize_for_path;
use regex::{Captures, Regex};
use tracing::{debug, warn};

use super::{
    desktop_entry::EntryEditor,
    icon::{hicolor_size_dir, png_dimensions, IconFormat},
};
use crate::{
    container::{Container, Entry},
    error::{AppImageError, ErrorKind, Result},
};

const ICON_THEME_ROOT: &str = "usr/share/icons/";
const MIME_PACKAGES_DIR: &str = "usr/share/mime/packages";
const ROOT_ICON_EXTENSIONS: &[&str] = &["png", "svg", "svgz", "xpm"];
const DIR_ICON: &str = ".DirIcon";

static MIME_ICON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(<icon\s+name=")([^"]*)(")"#).expect("unable to compile mime icon regex")
});

/// A file read from the payload together with its destination relative to the data home.
#[derive(Debug, Clone)]
pub struct Resource {
    pub source: String,
    pub target: PathBuf,
    pub data: Vec<u8>,
}

/// Follows `entry` if it is a symlink; `None` unless it ends at a regular file.
fn regular_file(container: &Container, entry: &Entry) -> Result<Option<Entry>> {
    if entry.is_file() {
        return Ok(Some(entry.clone()));
    }
    if entry.symlink_target().is_none() {
        return Ok(None);
    }
    match container.lookup_follow(&entry.path) {
        Ok(resolved) if resolved.is_file() => Ok(Some(resolved)),
        Ok(_) => Ok(None),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %entry.path, "dangling symlink");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// The first `*.desktop` file, by name, at the payload root.
pub fn find_desktop_entry(container: &Container) -> Result<Entry> {
    let root = container.root()?;
    let mut children = container.read_dir(&root)?;
    children.sort_by(|a, b| a.path.cmp(&b.path));

    for child in children.iter().filter(|c| c.name().ends_with(".desktop")) {
        if let Some(entry) = regular_file(container, child)? {
            debug!(path = %child.path, "found desktop entry");
            return Ok(entry);
        }
    }
    Err(AppImageError::NotFound(
        "no desktop entry at the payload root".into(),
    ))
}

/// Finds the icons for the desktop entry's `icon` value.
///
/// Theme icons under `usr/share/icons/**/apps/` win; otherwise a root-level `<icon>.<ext>`,
/// and finally `.DirIcon`.
pub fn find_icons(
    container: &Container,
    icon: &str,
    editor: &EntryEditor<'_>,
) -> Result<Vec<Resource>> {
    if icon.contains('/') {
        return Err(AppImageError::InvalidParameter(format!(
            "icon name {icon:?} must not contain '/'"
        )));
    }

    let themed = theme_icons(container, icon, editor)?;
    if !themed.is_empty() {
        return Ok(themed);
    }

    for ext in ROOT_ICON_EXTENSIONS {
        let path = format!("{icon}.{ext}");
        let Some(entry) = optional(container.lookup_follow(&path))? else {
            continue;
        };
        if entry.is_file() {
            if let Some(resource) = loose_icon(container, &entry, icon, editor)? {
                return Ok(vec![resource]);
            }
        }
    }

    if let Some(entry) = optional(container.lookup_follow(DIR_ICON))? {
        if entry.is_file() {
            if let Some(resource) = loose_icon(container, &entry, icon, editor)? {
                return Ok(vec![resource]);
            }
        }
    }

    Ok(Vec::new())
}

fn theme_icons(
    container: &Container,
    icon: &str,
    editor: &EntryEditor<'_>,
) -> Result<Vec<Resource>> {
    let mut found = Vec::new();
    for entry in container.walk()? {
        let Some(relative) = entry.path.strip_prefix("usr/share/") else {
            continue;
        };
        if !entry.path.starts_with(ICON_THEME_ROOT) {
            continue;
        }
        let Some((dir, name)) = relative.rsplit_once('/') else {
            continue;
        };
        let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
        if stem != icon || !dir.ends_with("/apps") {
            continue;
        }
        let Some(file) = regular_file(container, &entry)? else {
            continue;
        };

        found.push(Resource {
            data: container.read_file(&file.path)?,
            target: PathBuf::from(dir).join(editor.icon_name(name)),
            source: entry.path.clone(),
        });
    }
    Ok(found)
}

/// A root-level icon, placed in the hicolor directory matching its size.
fn loose_icon(
    container: &Container,
    entry: &Entry,
    icon: &str,
    editor: &EntryEditor<'_>,
) -> Result<Option<Resource>> {
    let data = container.read_file(&entry.path)?;
    let Some(format) = IconFormat::detect(&data, entry.name()) else {
        warn!(path = %entry.path, "skipping icon of unknown format");
        return Ok(None);
    };
    let Some(size_dir) = hicolor_size_dir(format, &data) else {
        warn!(path = %entry.path, "skipping icon with unreadable dimensions");
        return Ok(None);
    };

    let file_name = format!("{}.{}", editor.icon_name(icon), format.extension());
    Ok(Some(Resource {
        source: entry.path.clone(),
        target: PathBuf::from("icons/hicolor")
            .join(size_dir)
            .join("apps")
            .join(file_name),
        data,
    }))
}

/// Picks the icon rendered into thumbnails: the largest PNG, else the first icon.
pub fn thumbnail_source(icons: &[Resource]) -> Option<&Resource> {
    icons
        .iter()
        .filter_map(|icon| png_dimensions(&icon.data).map(|(w, h)| (icon, w as u64 * h as u64)))
        .max_by_key(|(_, area)| *area)
        .map(|(icon, _)| icon)
        .or_else(|| icons.first())
}

/// MIME packages under `usr/share/mime/packages`, icon references rewritten.
pub fn find_mime_packages(
    container: &Container,
    editor: &EntryEditor<'_>,
) -> Result<Vec<Resource>> {
    let Some(mut entries) = optional(container.list(MIME_PACKAGES_DIR))? else {
        return Ok(Vec::new());
    };
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut packages = Vec::new();
    for entry in entries.iter().filter(|e| e.name().ends_with(".xml")) {
        let Some(file) = regular_file(container, entry)? else {
            continue;
        };
        let data = container.read_file(&file.path)?;
        let xml = String::from_utf8(data).map_err(|_| {
            AppImageError::StringError(format!("{} is not valid UTF-8", entry.path))
        })?;

        packages.push(Resource {
            source: entry.path.clone(),
            target: PathBuf::from("mime/packages").join(format!(
                "{}_{}_{}",
                editor.vendor_prefix,
                editor.identifier,
                sanitize_for_path(entry.name())
            )),
            data: rewrite_mime_icons(&xml, editor).into_bytes(),
        });
    }
    Ok(packages)
}

/// Points every `<icon name="X"/>` at the prefixed icon name.
pub fn rewrite_mime_icons(xml: &str, editor: &EntryEditor<'_>) -> String {
    MIME_ICON_RE
        .replace_all(xml, |caps: &Captures| {
            format!("{}{}{}", &caps[1], editor.icon_name(&caps[2]), &caps[3])
        })
        .into_owned()
}
