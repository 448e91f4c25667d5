//! Utility helpers shared across the stack.
//!
//! - [`generate_custom_enum!`](crate::generate_custom_enum) for forward-compatible
//!   BACnet enumerations
//! - hex rendering of frames for trace logging

#[cfg(not(feature = "std"))]
use alloc::{format, string::String};

pub mod enum_macros;

/// Longest prefix of a frame rendered by [`hex_preview`].
pub const PREVIEW_LIMIT: usize = 32;

/// Compact hex rendering of a frame for log lines.
///
/// Frames longer than [`PREVIEW_LIMIT`] are cut and suffixed with the total
/// length.
pub fn hex_preview(data: &[u8]) -> String {
    if data.len() <= PREVIEW_LIMIT {
        hex::encode(data)
    } else {
        format!(
            "{}.. ({} bytes)",
            hex::encode(&data[..PREVIEW_LIMIT]),
            data.len()
        )
    }
}

/// Multi-line hex dump with offsets and an ASCII column.
pub fn hex_dump(data: &[u8], prefix: &str) -> String {
    let mut result = String::new();

    for (i, chunk) in data.chunks(16).enumerate() {
        result.push_str(prefix);
        result.push_str(&format!("{:04X}: ", i * 16));

        for (j, byte) in chunk.iter().enumerate() {
            if j == 8 {
                result.push(' ');
            }
            result.push_str(&format!("{:02X} ", byte));
        }
        for j in chunk.len()..16 {
            if j == 8 {
                result.push(' ');
            }
            result.push_str("   ");
        }

        result.push_str(" |");
        for byte in chunk {
            if byte.is_ascii_graphic() || *byte == b' ' {
                result.push(*byte as char);
            } else {
                result.push('.');
            }
        }
        result.push_str("|\n");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_preview_short_frame() {
        assert_eq!(hex_preview(&[0x10, 0x08]), "1008");
    }

    #[test]
    fn test_hex_preview_truncates() {
        let data = [0xAAu8; 40];
        let preview = hex_preview(&data);
        assert!(preview.starts_with(&"aa".repeat(PREVIEW_LIMIT)));
        assert!(preview.ends_with("(40 bytes)"));
    }

    #[test]
    fn test_hex_dump_layout() {
        let dump = hex_dump(b"BACnet", "  ");
        assert!(dump.starts_with("  0000: 42 41 43 6E 65 74"));
        assert!(dump.trim_end().ends_with("|BACnet|"));
    }
}
