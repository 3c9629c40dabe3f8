//! Byte-size helpers for attachment listings.

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Render a byte count in IEC units with at most two decimals, trailing zeros trimmed.
pub fn human_size(bytes: u64) -> String {
    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        return format!("{bytes} B");
    }

    let precision = if value >= 10.0 { 1 } else { 2 };
    let rendered = format!("{value:.precision$}");
    let rendered = rendered.trim_end_matches('0').trim_end_matches('.');
    format!("{rendered} {}", UNITS[unit])
}

/// Decoded size of a base64 payload of `encoded_len` characters, ignoring padding.
///
/// Used to estimate payload size before decoding a pasted data URI.
pub fn base64_decoded_len(encoded_len: usize, padding: usize) -> u64 {
    let decoded = (encoded_len / 4 * 3 + (encoded_len % 4).saturating_sub(1)).saturating_sub(padding);
    decoded as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_size_scales_units() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(1023), "1023 B");
        assert_eq!(human_size(1024), "1 KiB");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(10 * 1024), "10 KiB");
        assert_eq!(human_size(5 * 1024 * 1024 + 512 * 1024), "5.5 MiB");
    }

    #[test]
    fn base64_length_estimate_matches_decoder() {
        // "iVBORw0KGgo=" decodes to the 8-byte PNG signature.
        assert_eq!(base64_decoded_len(12, 1), 8);
        // "R0lGODlh" decodes to "GIF89a".
        assert_eq!(base64_decoded_len(8, 0), 6);
        // Unpadded two-character tail carries one byte.
        assert_eq!(base64_decoded_len(6, 0), 4);
    }
}
