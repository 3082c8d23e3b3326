//! Modified UTF-8, the string encoding of the log and directory files.
//!
//! It differs from standard UTF-8 in two ways: U+0000 is written as the
//! two bytes `C0 80`, and characters outside the BMP are written as a
//! surrogate pair with each half encoded on three bytes.

use crate::error::{CodecError, CodecResult};

/// Returns the encoded length of `s` in modified UTF-8.
#[must_use]
pub fn encoded_len(s: &str) -> usize {
    s.encode_utf16().map(unit_len).sum()
}

fn unit_len(unit: u16) -> usize {
    match unit {
        0x0001..=0x007F => 1,
        0x0000 | 0x0080..=0x07FF => 2,
        _ => 3,
    }
}

/// Appends the modified UTF-8 bytes of `s` to `out`.
pub fn encode_into(s: &str, out: &mut Vec<u8>) {
    for unit in s.encode_utf16() {
        match unit_len(unit) {
            1 => out.push(unit as u8),
            2 => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
}

/// Decodes modified UTF-8 bytes.
///
/// `pos` is only used for error reporting.
///
/// # Errors
///
/// Returns [`CodecError::InvalidUtf8`] on malformed sequences or unpaired
/// surrogates.
pub fn decode(bytes: &[u8], pos: usize) -> CodecResult<String> {
    let invalid = || CodecError::InvalidUtf8 { pos };
    let continuation = |b: Option<&u8>| match b {
        Some(&b) if b & 0xC0 == 0x80 => Ok(u16::from(b & 0x3F)),
        _ => Err(invalid()),
    };

    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let lead = bytes[i];
        if lead & 0x80 == 0 {
            units.push(u16::from(lead));
            i += 1;
        } else if lead & 0xE0 == 0xC0 {
            let low = continuation(bytes.get(i + 1))?;
            units.push((u16::from(lead & 0x1F) << 6) | low);
            i += 2;
        } else if lead & 0xF0 == 0xE0 {
            let mid = continuation(bytes.get(i + 1))?;
            let low = continuation(bytes.get(i + 2))?;
            units.push((u16::from(lead & 0x0F) << 12) | (mid << 6) | low);
            i += 3;
        } else {
            return Err(invalid());
        }
    }
    String::from_utf16(&units).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode(s: &str) -> Vec<u8> {
        let mut out = Vec::new();
        encode_into(s, &mut out);
        out
    }

    #[test]
    fn ascii_is_unchanged() {
        assert_eq!(encode("room/temp"), b"room/temp");
    }

    #[test]
    fn nul_uses_two_bytes() {
        assert_eq!(encode("a\0b"), vec![b'a', 0xC0, 0x80, b'b']);
        assert_eq!(encoded_len("\0"), 2);
    }

    #[test]
    fn bmp_characters_match_standard_utf8() {
        assert_eq!(encode("é"), "é".as_bytes());
        assert_eq!(encode("€"), "€".as_bytes());
    }

    #[test]
    fn supplementary_characters_become_surrogate_pairs() {
        let encoded = encode("😀");
        assert_eq!(encoded, vec![0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]);
        assert_eq!(encoded_len("😀"), 6);
    }

    #[test]
    fn rejects_truncated_sequence() {
        assert_eq!(decode(&[0xE2, 0x82], 7), Err(CodecError::InvalidUtf8 { pos: 7 }));
    }

    #[test]
    fn rejects_unpaired_surrogate() {
        assert!(decode(&[0xED, 0xA0, 0xBD], 0).is_err());
    }

    proptest! {
        #[test]
        fn any_string_survives(s in any::<String>()) {
            let encoded = encode(&s);
            prop_assert_eq!(encoded.len(), encoded_len(&s));
            prop_assert!(!encoded.contains(&0));
            prop_assert_eq!(decode(&encoded, 0).unwrap(), s);
        }
    }
}
