use std::path::Path;

use appimage_core::{AppImage, Result};
use appimage_utils::bytes::format_bytes;
use nu_ansi_term::Color::{Blue, Cyan, Green, LightRed};
use serde::Serialize;
use tracing::{debug, info};

use crate::utils::{print_json, Colored};

/// A single property of an AppImage, selected by subcommand.
pub enum Property {
    Format,
    Size,
    Md5,
    Offset,
}

#[derive(Serialize)]
struct PropertyOutput<'a, T: Serialize> {
    path: &'a Path,
    #[serde(flatten)]
    value: T,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum PropertyValue {
    Format(Option<u8>),
    Size(u64),
    Md5(String),
    Offset(u64),
}

pub fn show_info(path: &Path, json: bool) -> Result<()> {
    let appimage = AppImage::open(path)?;
    let info = appimage.info();
    debug!(path = %path.display(), format = %info.format, "inspected AppImage");

    if json {
        return print_json(&info);
    }

    info!("{}: {}", Colored(Cyan, "Path"), info.path.display());
    info!("{}: {}", Colored(Cyan, "Format"), Colored(Green, info.format));
    if let Some(runtime) = info.runtime_type {
        info!("{}: {}", Colored(Cyan, "Runtime type"), runtime);
    }
    info!(
        "{}: {} ({} bytes)",
        Colored(Cyan, "Size"),
        Colored(LightRed, format_bytes(info.size, 2)),
        info.size
    );
    info!("{}: {}", Colored(Cyan, "Image offset"), info.offset);
    if info.payload_offset != info.offset {
        info!("{}: {}", Colored(Cyan, "Payload offset"), info.payload_offset);
    }
    info!("{}: {}", Colored(Cyan, "MD5"), Colored(Blue, appimage.md5()?));
    info!("{}: {}", Colored(Cyan, "Identifier"), info.identifier);
    Ok(())
}

pub fn show_property(path: &Path, property: Property, json: bool) -> Result<()> {
    let appimage = AppImage::open(path)?;
    let value = match property {
        Property::Format => PropertyValue::Format(appimage.format().as_number()),
        Property::Size => PropertyValue::Size(appimage.size()),
        Property::Md5 => PropertyValue::Md5(appimage.md5()?.to_string()),
        Property::Offset => PropertyValue::Offset(appimage.offset()),
    };

    if json {
        return print_json(&PropertyOutput { path, value });
    }

    match value {
        PropertyValue::Format(Some(number)) => info!("{number}"),
        PropertyValue::Format(None) => info!("{}", appimage.format()),
        PropertyValue::Size(size) | PropertyValue::Offset(size) => info!("{size}"),
        PropertyValue::Md5(digest) => info!("{digest}"),
    }
    Ok(())
}
