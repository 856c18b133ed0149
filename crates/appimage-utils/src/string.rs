/// Replaces every character outside `[A-Za-z0-9._-]` with `_`.
///
/// Used to turn arbitrary display names into file-name fragments.
pub fn sanitize_for_path(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
