use std::path::Path;

use appimage_core::{AppImage, Entry, EntryKind, Result};
use nu_ansi_term::Color::{Blue, Cyan};
use tracing::info;

use crate::utils::{print_json, Colored};

fn display_entry(entry: &Entry) {
    match &entry.kind {
        EntryKind::Directory => info!("{}/", Colored(Blue, &entry.path)),
        EntryKind::Symlink { target } => {
            info!("{} -> {}", Colored(Cyan, &entry.path), target)
        }
        EntryKind::File | EntryKind::Other => info!("{}", entry.path),
    }
}

pub fn list_files(path: &Path, dir: Option<&str>, recursive: bool, json: bool) -> Result<()> {
    let appimage = AppImage::open(path)?;
    let dir = dir.unwrap_or("").trim_matches('/');

    let entries = if recursive {
        let prefix = format!("{dir}/");
        appimage
            .files()?
            .into_iter()
            .filter(|entry| dir.is_empty() || entry.path.starts_with(&prefix))
            .collect()
    } else {
        appimage.list(dir)?
    };

    if json {
        return print_json(&entries);
    }
    entries.iter().for_each(display_entry);
    Ok(())
}
