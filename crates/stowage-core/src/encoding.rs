//! Detection of payloads that were stored base64-encoded by mistake.
//!
//! The check is a heuristic: only the first [`BASE64_SNIFF_WINDOW`] bytes
//! (after dropping line breaks) are inspected. Binary content whose leading
//! bytes happen to be base64 characters is a known false positive; the window
//! is kept as is so results stay comparable with rows certified earlier.

use std::borrow::Cow;

use base64::Engine;

use crate::defaults::BASE64_SNIFF_WINDOW;
use crate::Result;

fn is_alphabet(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/'
}

fn is_line_break(b: &u8) -> bool {
    *b == b'\n' || *b == b'\r'
}

/// Return true if the leading window of `data` is well-formed base64 text.
pub fn looks_base64(data: &[u8]) -> bool {
    let window: Vec<u8> = data
        .iter()
        .filter(|b| !is_line_break(b))
        .take(BASE64_SNIFF_WINDOW)
        .copied()
        .collect();
    if window.is_empty() {
        return false;
    }

    let body_len = window
        .iter()
        .position(|b| *b == b'=')
        .unwrap_or(window.len());
    let (body, padding) = window.split_at(body_len);

    body.iter().copied().all(is_alphabet)
        && padding.len() <= 2
        && padding.iter().all(|b| *b == b'=')
}

/// Decode `data` if it looks base64-encoded, otherwise return it unchanged.
pub fn decode_if_encoded(data: &[u8]) -> Result<Cow<'_, [u8]>> {
    if !looks_base64(data) {
        return Ok(Cow::Borrowed(data));
    }
    let compact: Vec<u8> = data.iter().filter(|b| !is_line_break(b)).copied().collect();
    let decoded = base64::engine::general_purpose::STANDARD.decode(compact)?;
    Ok(Cow::Owned(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn encode(data: &[u8]) -> Vec<u8> {
        base64::engine::general_purpose::STANDARD
            .encode(data)
            .into_bytes()
    }

    #[test]
    fn test_hundred_byte_padded_buffer_is_base64() {
        // 73 input bytes encode to exactly 100 characters ending in "=="
        let encoded = encode(&[0xAB; 73]);
        assert_eq!(encoded.len(), 100);
        assert!(encoded.ends_with(b"=="));
        assert!(looks_base64(&encoded));
    }

    #[test]
    fn test_null_byte_in_window_is_not_base64() {
        let mut data = vec![b'A'; 100];
        data[10] = 0;
        assert!(!looks_base64(&data));
    }

    #[test]
    fn test_null_byte_after_window_is_ignored() {
        let mut data = vec![b'A'; 100];
        data[80] = 0;
        assert!(looks_base64(&data));
    }

    #[test]
    fn test_empty_is_not_base64() {
        assert!(!looks_base64(b""));
        assert!(!looks_base64(b"\r\n\n"));
    }

    #[test]
    fn test_line_breaks_are_skipped() {
        let wrapped = b"QUJD\nREVG\r\nR0hJ\n";
        assert!(looks_base64(wrapped));
    }

    #[test]
    fn test_padding_only_at_tail() {
        assert!(looks_base64(b"QQ=="));
        assert!(!looks_base64(b"QQ=A"));
        assert!(!looks_base64(b"Q==="));
    }

    #[test]
    fn test_png_header_is_not_base64() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        assert!(!looks_base64(&png));
    }

    #[test]
    fn test_short_ascii_word_is_false_positive() {
        // Documented trade-off: plain words are valid base64 characters.
        assert!(looks_base64(b"Hello"));
    }

    #[test]
    fn test_decode_raw_binary_unchanged() {
        let raw = [0x00, 0xFF, 0x10, 0x80, b'%'];
        let out = decode_if_encoded(&raw).unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(&out[..], &raw[..]);
    }

    #[test]
    fn test_decode_encoded_binary() {
        let original: Vec<u8> = (0u8..=255).collect();
        let mut encoded = encode(&original);
        encoded.push(b'\n');
        let out = decode_if_encoded(&encoded).unwrap();
        assert_eq!(&out[..], original.as_slice());
    }

    #[test]
    fn test_decode_malformed_tail_is_encoding_error() {
        let mut data = vec![b'A'; 70];
        data.push(b'!');
        assert!(looks_base64(&data));
        assert!(matches!(decode_if_encoded(&data), Err(Error::Encoding(_))));
    }
}
