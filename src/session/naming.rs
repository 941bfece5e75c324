//! File and folder name sanitization
//!
//! Remote backends and Windows both reject a handful of characters and names,
//! so every path segment the engine builds passes through here.

const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Replace characters that are invalid in file names and guard reserved names
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if INVALID_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let mut result = replaced
        .trim_end_matches(|c| c == ' ' || c == '.')
        .to_string();

    let base = result.split('.').next().unwrap_or("").to_uppercase();
    if RESERVED_NAMES.contains(&base.as_str()) {
        result.insert(0, '_');
    }

    if result.is_empty() {
        result.push('_');
    }
    result
}

/// Folder segment: sanitized, with whitespace runs collapsed to `_`
pub fn sanitize_segment(name: &str) -> String {
    let joined = name.split_whitespace().collect::<Vec<_>>().join("_");
    sanitize_filename(&joined)
}

/// Default document name for an order id
pub fn document_file_name(order_id: &str) -> String {
    sanitize_filename(&format!("Invoice_{}.pdf", order_id.trim()))
}
