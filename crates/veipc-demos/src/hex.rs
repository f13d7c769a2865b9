//! Hex dumps for log lines.

use std::fmt::Write;

/// Bytes shown per frame before the dump is cut off.
pub const HEX_PREVIEW_LIMIT: usize = 64;

/// Formats up to `limit` bytes as space-separated lowercase hex, followed by
/// `...` when `data` was longer.
pub fn format_hex(data: &[u8], limit: usize) -> String {
    let shown = &data[..data.len().min(limit)];
    let mut out = String::with_capacity(shown.len() * 3 + 3);
    for (i, byte) in shown.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        // Writing to a String cannot fail.
        let _ = write!(out, "{byte:02x}");
    }
    if data.len() > limit {
        out.push_str(" ...");
    }
    out
}
