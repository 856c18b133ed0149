//! Freedesktop thumbnails for integrated AppImages.

use std::{
    io::Cursor,
    path::{Path, PathBuf},
};

use image::ImageFormat;
use tracing::{debug, warn};

use super::{deploy::Deployment, icon::fit_image};

/// Thumbnail flavours and their edge length in pixels.
pub const THUMBNAIL_SIZES: &[(&str, u32)] = &[("normal", 128), ("large", 256)];

pub fn thumbnail_paths(cache_home: &Path, identifier: &str) -> Vec<PathBuf> {
    THUMBNAIL_SIZES
        .iter()
        .map(|(flavour, _)| {
            cache_home
                .join("thumbnails")
                .join(flavour)
                .join(format!("{identifier}.png"))
        })
        .collect()
}

/// Scales `icon` to `size` and encodes it as PNG. `None` if the icon cannot be decoded.
pub fn render(icon: &[u8], size: u32) -> Option<Vec<u8>> {
    let image = image::load_from_memory(icon).ok()?;
    let mut out = Cursor::new(Vec::new());
    fit_image(image, size)
        .write_to(&mut out, ImageFormat::Png)
        .ok()?;
    Some(out.into_inner())
}

/// Writes both thumbnails for `identifier`. Failures are logged, never returned.
pub fn write_thumbnails(
    deployment: &mut Deployment,
    cache_home: &Path,
    identifier: &str,
    icon: &[u8],
) {
    for ((flavour, size), path) in THUMBNAIL_SIZES
        .iter()
        .zip(thumbnail_paths(cache_home, identifier))
    {
        let data = match render(icon, *size) {
            Some(data) => data,
            None => {
                warn!(flavour = %flavour, "icon could not be decoded, using it unchanged as thumbnail");
                icon.to_vec()
            }
        };
        match deployment.write(&path, &data, 0o600) {
            Ok(()) => debug!(path = %path.display(), "wrote thumbnail"),
            Err(err) => warn!(path = %path.display(), error = %err, "failed to write thumbnail"),
        }
    }
}
