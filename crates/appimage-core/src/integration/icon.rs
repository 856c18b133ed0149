use std::io::Cursor;

use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat, ImageReader};

/// Icon sizes with a hicolor theme directory.
pub const SUPPORTED_DIMENSIONS: &[(u32, u32)] = &[
    (16, 16),
    (24, 24),
    (32, 32),
    (48, 48),
    (64, 64),
    (72, 72),
    (80, 80),
    (96, 96),
    (128, 128),
    (192, 192),
    (256, 256),
    (512, 512),
];

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const XPM_MAGIC: &[u8] = b"/* XPM */";

pub fn find_nearest_supported_dimension(width: u32, height: u32) -> (u32, u32) {
    SUPPORTED_DIMENSIONS
        .iter()
        .min_by_key(|&&(w, h)| {
            let width_diff = (w as i64 - width as i64).abs();
            let height_diff = (h as i64 - height as i64).abs();
            width_diff + height_diff
        })
        .cloned()
        .unwrap_or((width, height))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconFormat {
    Png,
    Svg,
    Svgz,
    Xpm,
}

impl IconFormat {
    /// Sniffs the icon format from its content, falling back to the file name.
    pub fn detect(data: &[u8], name: &str) -> Option<Self> {
        if data.starts_with(PNG_MAGIC) {
            return Some(IconFormat::Png);
        }
        if data.starts_with(XPM_MAGIC) {
            return Some(IconFormat::Xpm);
        }
        let lower = name.to_ascii_lowercase();
        if data.starts_with(GZIP_MAGIC) && lower.ends_with(".svgz") {
            return Some(IconFormat::Svgz);
        }
        let head = String::from_utf8_lossy(&data[..data.len().min(1024)]);
        if head.contains("<svg") {
            return Some(IconFormat::Svg);
        }

        match lower.rsplit_once('.').map(|(_, ext)| ext) {
            Some("svg") => Some(IconFormat::Svg),
            Some("svgz") => Some(IconFormat::Svgz),
            Some("xpm") => Some(IconFormat::Xpm),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            IconFormat::Png => "png",
            IconFormat::Svg => "svg",
            IconFormat::Svgz => "svgz",
            IconFormat::Xpm => "xpm",
        }
    }
}

/// Reads the pixel dimensions of a raster icon without decoding it.
pub fn png_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    ImageReader::with_format(Cursor::new(data), ImageFormat::Png)
        .into_dimensions()
        .ok()
}

/// Name of the hicolor size directory an icon belongs in: `48x48` or `scalable`.
///
/// PNGs are mapped to the nearest supported size. XPM icons cannot be measured and are
/// placed in `48x48`. `None` for a PNG whose header cannot be read.
pub fn hicolor_size_dir(format: IconFormat, data: &[u8]) -> Option<String> {
    match format {
        IconFormat::Svg | IconFormat::Svgz => Some("scalable".to_string()),
        IconFormat::Xpm => Some("48x48".to_string()),
        IconFormat::Png => {
            let (width, height) = png_dimensions(data)?;
            let (w, h) = find_nearest_supported_dimension(width, height);
            Some(format!("{w}x{h}"))
        }
    }
}

/// Scales `image` to fit a `size` x `size` box, keeping its aspect ratio.
pub fn fit_image(image: DynamicImage, size: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width == size && height == size {
        image
    } else {
        image.resize(size, size, FilterType::Lanczos3)
    }
}
