//! MacRoman text encoding.
//!
//! The server speaks MacRoman everywhere: names, bubbles, console text and
//! the identification block. Bytes below `0x80` are ASCII; the upper half
//! maps through [`HIGH`].

const HIGH: [char; 128] = [
    'Ä', 'Å', 'Ç', 'É', 'Ñ', 'Ö', 'Ü', 'á', 'à', 'â', 'ä', 'ã', 'å', 'ç', 'é', 'è', //
    'ê', 'ë', 'í', 'ì', 'î', 'ï', 'ñ', 'ó', 'ò', 'ô', 'ö', 'õ', 'ú', 'ù', 'û', 'ü', //
    '†', '°', '¢', '£', '§', '•', '¶', 'ß', '®', '©', '™', '´', '¨', '≠', 'Æ', 'Ø', //
    '∞', '±', '≤', '≥', '¥', 'µ', '∂', '∑', '∏', 'π', '∫', 'ª', 'º', 'Ω', 'æ', 'ø', //
    '¿', '¡', '¬', '√', 'ƒ', '≈', '∆', '«', '»', '…', '\u{A0}', 'À', 'Ã', 'Õ', 'Œ', 'œ', //
    '–', '—', '“', '”', '‘', '’', '÷', '◊', 'ÿ', 'Ÿ', '⁄', '€', '‹', '›', 'ﬁ', 'ﬂ', //
    '‡', '·', '‚', '„', '‰', 'Â', 'Ê', 'Á', 'Ë', 'È', 'Í', 'Î', 'Ï', 'Ì', 'Ó', 'Ô', //
    '\u{F8FF}', 'Ò', 'Ú', 'Û', 'Ù', 'ı', 'ˆ', '˜', '¯', '˘', '˙', '˚', '¸', '˝', '˛', 'ˇ', //
];

/// Replacement byte for characters MacRoman cannot represent.
pub const REPLACEMENT: u8 = b'?';

pub fn decode_char(byte: u8) -> char {
    if byte < 0x80 {
        byte as char
    } else {
        HIGH[(byte - 0x80) as usize]
    }
}

pub fn encode_char(c: char) -> Option<u8> {
    if c.is_ascii() {
        return Some(c as u8);
    }
    HIGH.iter().position(|&h| h == c).map(|i| 0x80 + i as u8)
}

/// Decodes MacRoman bytes into a UTF-8 string. Every byte has a mapping,
/// so decoding never fails.
pub fn decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| decode_char(b)).collect()
}

/// Encodes a string as MacRoman, substituting [`REPLACEMENT`] for
/// characters outside the repertoire.
pub fn encode(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| encode_char(c).unwrap_or(REPLACEMENT))
        .collect()
}

/// True when every character of `s` survives an encode/decode round-trip.
pub fn is_representable(s: &str) -> bool {
    s.chars().all(|c| encode_char(c).is_some())
}
