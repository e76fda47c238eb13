// Byte-level reversible mapping used by the GPT-2/BART family of tokenizers
//
// Every byte value 0..=255 is assigned a printable character so arbitrary UTF-8
// (or invalid byte sequences) can be represented as vocabulary text:
// - printable Latin-1 bytes map to themselves ('!'..='~', '¡'..='¬', '®'..='ÿ')
// - the remaining 68 bytes map to U+0100 onwards, in byte order
//
// Example: the space byte 0x20 becomes 'Ġ' (U+0120), newline 0x0A becomes 'Ċ'.

use once_cell::sync::Lazy;
use std::collections::HashMap;

static BYTE_ENCODER: Lazy<[char; 256]> = Lazy::new(build_byte_encoder);

static BYTE_DECODER: Lazy<HashMap<char, u8>> = Lazy::new(|| {
    BYTE_ENCODER
        .iter()
        .enumerate()
        .map(|(byte, &ch)| (ch, byte as u8))
        .collect()
});

fn build_byte_encoder() -> [char; 256] {
    let is_printable = |b: u32| {
        (u32::from('!')..=u32::from('~')).contains(&b)
            || (u32::from('¡')..=u32::from('¬')).contains(&b)
            || (u32::from('®')..=u32::from('ÿ')).contains(&b)
    };

    let mut table = ['\0'; 256];
    let mut next_shifted = 0u32;
    for byte in 0u32..256 {
        let code_point = if is_printable(byte) {
            byte
        } else {
            let shifted = 256 + next_shifted;
            next_shifted += 1;
            shifted
        };
        // All code points are below U+0200, which are valid scalar values
        table[byte as usize] = char::from_u32(code_point).unwrap_or(char::REPLACEMENT_CHARACTER);
    }
    table
}

/// Character representing `byte` in vocabulary text
#[inline]
#[must_use = "returns the mapped character"]
pub fn byte_to_char(byte: u8) -> char {
    BYTE_ENCODER[byte as usize]
}

/// Byte represented by `ch`, or `None` for characters outside the table
#[inline]
#[must_use = "returns the mapped byte, if any"]
pub fn char_to_byte(ch: char) -> Option<u8> {
    BYTE_DECODER.get(&ch).copied()
}

/// Map the UTF-8 bytes of `text` into vocabulary characters
#[must_use = "returns the byte-encoded string"]
pub fn encode_bytes(text: &str) -> String {
    text.bytes().map(byte_to_char).collect()
}

/// Reverse [`encode_bytes`]; characters outside the table contribute no bytes
#[must_use = "returns the decoded bytes"]
pub fn decode_chars(text: &str) -> Vec<u8> {
    text.chars().filter_map(char_to_byte).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_mapping_is_a_bijection() {
        let chars: HashSet<char> = (0u8..=255).map(byte_to_char).collect();
        assert_eq!(chars.len(), 256);
        for byte in 0u8..=255 {
            assert_eq!(char_to_byte(byte_to_char(byte)), Some(byte));
        }
    }

    #[test]
    fn test_known_code_points() {
        assert_eq!(byte_to_char(b' '), 'Ġ');
        assert_eq!(byte_to_char(b'\n'), 'Ċ');
        assert_eq!(byte_to_char(b'a'), 'a');
        assert_eq!(byte_to_char(0), 'Ā');
    }

    #[test]
    fn test_plain_space_is_outside_table() {
        assert_eq!(char_to_byte(' '), None);
    }

    #[test]
    fn test_utf8_round_trip() {
        let text = "naïve café 東京";
        let encoded = encode_bytes(text);
        assert!(!encoded.contains(' '));
        assert_eq!(String::from_utf8(decode_chars(&encoded)).unwrap(), text);
    }
}
