use std::path::Path;

use appimage_core::{AppImage, Result};
use appimage_utils::bytes::format_bytes;
use nu_ansi_term::Color::{Cyan, Green};
use serde_json::json;
use tracing::info;

use crate::utils::{print_json, Colored};

pub fn extract_file(path: &Path, source: &str, target: &Path, json: bool) -> Result<()> {
    let appimage = AppImage::open(path)?;
    let written = appimage.extract_file(source, target)?;

    if json {
        return print_json(&json!({
            "source": source,
            "target": target,
            "bytes": written,
        }));
    }
    info!(
        "Extracted {} to {} ({})",
        Colored(Cyan, source),
        Colored(Green, target.display()),
        format_bytes(written, 2)
    );
    Ok(())
}
