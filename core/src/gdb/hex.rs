//! Hex helpers for packet payloads.

use std::fmt::Write;

pub fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

pub fn digit(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}

/// Decodes pairs of hex digits. Fails on odd length or a non-hex byte.
pub fn decode(text: &[u8]) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    text.chunks_exact(2)
        .map(|pair| Some(digit(pair[0])? << 4 | digit(pair[1])?))
        .collect()
}

/// Parses a big-endian hex number of at most 32 bits, as used for
/// addresses and lengths.
pub fn parse_u32(text: &[u8]) -> Option<u32> {
    if text.is_empty() {
        return None;
    }
    text.iter().try_fold(0u32, |value, &c| {
        let d = digit(c)? as u32;
        value.checked_mul(16)?.checked_add(d)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex() {
        assert_eq!(encode(&[0x00, 0xab, 0x7f]), "00ab7f");
        assert_eq!(decode(b"00aB7f"), Some(vec![0x00, 0xab, 0x7f]));
        assert_eq!(decode(b"abc"), None);
        assert_eq!(decode(b"zz"), None);
        assert_eq!(parse_u32(b"80000000"), Some(0x8000_0000));
        assert_eq!(parse_u32(b"0000000004"), Some(4));
        assert_eq!(parse_u32(b"100000000"), None);
        assert_eq!(parse_u32(b""), None);
        assert_eq!(parse_u32(b"12g"), None);
    }
}
