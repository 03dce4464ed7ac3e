//! Base64 helpers tolerant of the wild variety found in share links:
//! standard or URL-safe alphabets, with or without padding.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;

use rp_core::error::{ProbeError, Result};

/// Decodes base64 regardless of alphabet and padding.
pub fn decode_any(input: &str) -> Result<Vec<u8>> {
    let input = input.trim();
    for engine in [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD] {
        if let Ok(bytes) = engine.decode(input) {
            return Ok(bytes);
        }
    }
    Err(ProbeError::bad_link("invalid base64"))
}

/// Decodes base64 into UTF-8 text.
pub fn decode_any_str(input: &str) -> Result<String> {
    String::from_utf8(decode_any(input)?).map_err(|_| ProbeError::bad_link("base64 is not utf-8"))
}

/// Canonical encoder for re-emitted links: URL-safe, unpadded.
pub fn encode_url(input: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// Standard-alphabet encoder used where the ecosystem expects `+/`
/// (the vmess JSON body).
pub fn encode_std(input: &[u8]) -> String {
    STANDARD.encode(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_alphabet_and_padding() {
        // "maybe?~" exercises both alphabets once encoded.
        let raw = b"\xfa\x10\xff>ok";
        for encoded in [
            STANDARD.encode(raw),
            STANDARD_NO_PAD.encode(raw),
            URL_SAFE.encode(raw),
            URL_SAFE_NO_PAD.encode(raw),
        ] {
            assert_eq!(decode_any(&encoded).unwrap(), raw);
        }
    }

    #[test]
    fn rejects_junk() {
        assert!(decode_any("!!!not base64!!!").is_err());
    }

    #[test]
    fn str_decoding_requires_utf8() {
        let encoded = STANDARD.encode([0xff, 0xfe]);
        assert!(decode_any_str(&encoded).is_err());
    }
}
