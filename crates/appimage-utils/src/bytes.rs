/// Formats a byte count with binary units (B, KiB, MiB, ...).
///
/// # Example
///
/// ```
/// use appimage_utils::bytes::format_bytes;
///
/// assert_eq!(format_bytes(3 * 1024 * 1024 / 2, 2), "1.50 MiB");
/// ```
pub fn format_bytes(bytes: u64, precision: usize) -> String {
    const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

    let mut value = bytes as f64;
    let mut idx = 0;
    while value >= 1024.0 && idx < UNITS.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }

    format!("{value:.precision$} {}", UNITS[idx])
}
