use std::io;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bepp::{self, ThinkTarget};
use crate::bytes::{read_cstring, write_cstring, Bytes};

pub const BUBBLE_TYPE_MASK: u8 = 0x3F;
pub const BUBBLE_HAS_LANGUAGE: u8 = 0x40;
pub const BUBBLE_FAR: u8 = 0x80;
pub const LANGUAGE_MASK: u8 = 0x3F;
pub const CODE_SHIFT: u8 = 6;
pub const MAX_LANGUAGE: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BubbleType {
    Normal,
    Whisper,
    Yell,
    Thought,
    RealAction,
    Monster,
    PlayerAction,
    Ponder,
    Narrate,
}

impl BubbleType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Normal,
            1 => Self::Whisper,
            2 => Self::Yell,
            3 => Self::Thought,
            4 => Self::RealAction,
            5 => Self::Monster,
            6 => Self::PlayerAction,
            7 => Self::Ponder,
            8 => Self::Narrate,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// How well the listener understands the speaker's language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BubbleCode {
    Known,
    ShortUnknown,
    MediumUnknown,
    LongUnknown,
}

impl BubbleCode {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => Self::Known,
            1 => Self::ShortUnknown,
            2 => Self::MediumUnknown,
            _ => Self::LongUnknown,
        }
    }

    pub fn is_known(self) -> bool {
        self == Self::Known
    }
}

/// A bubble record as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BubbleRecord {
    pub index: u8,
    pub type_byte: u8,
    pub language_byte: Option<u8>,
    pub anchor: Option<(i16, i16)>,
    pub text: Vec<u8>,
}

impl BubbleRecord {
    pub fn bubble_type(&self) -> Option<BubbleType> {
        BubbleType::from_u8(self.type_byte & BUBBLE_TYPE_MASK)
    }

    pub fn language(&self) -> u8 {
        self.language_byte.map_or(0, |b| (b & LANGUAGE_MASK).min(MAX_LANGUAGE))
    }

    pub fn code(&self) -> BubbleCode {
        self.language_byte
            .map_or(BubbleCode::Known, |b| BubbleCode::from_bits(b >> CODE_SHIFT))
    }
}

impl Bytes for BubbleRecord {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        writer.write_u8(self.index)?;
        writer.write_u8(self.type_byte)?;
        if self.type_byte & BUBBLE_HAS_LANGUAGE != 0 {
            writer.write_u8(self.language_byte.unwrap_or(0))?;
        }
        if self.type_byte & BUBBLE_FAR != 0 {
            let (h, v) = self.anchor.unwrap_or((0, 0));
            writer.write_i16::<BigEndian>(h)?;
            writer.write_i16::<BigEndian>(v)?;
        }
        write_cstring(writer, &self.text)
    }

    fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        let index = reader.read_u8()?;
        let type_byte = reader.read_u8()?;
        let language_byte = if type_byte & BUBBLE_HAS_LANGUAGE != 0 {
            Some(reader.read_u8()?)
        } else {
            None
        };
        let anchor = if type_byte & BUBBLE_FAR != 0 {
            Some((
                reader.read_i16::<BigEndian>()?,
                reader.read_i16::<BigEndian>()?,
            ))
        } else {
            None
        };
        let text = read_cstring(reader)?;
        Ok(Self {
            index,
            type_byte,
            language_byte,
            anchor,
            text,
        })
    }
}

/// A live bubble held by the world.
#[derive(Debug, Clone, PartialEq)]
pub struct Bubble {
    pub index: u8,
    pub kind: BubbleType,
    pub language: u8,
    pub code: BubbleCode,
    pub far: bool,
    pub anchor_h: i16,
    pub anchor_v: i16,
    /// Tag-stripped text. Empty when the language is not understood and
    /// only the bubble shape should be shown.
    pub text: String,
    pub think_target: ThinkTarget,
    pub created_frame: u64,
}

impl Bubble {
    /// Builds a bubble from its wire record. Unknown bubble types yield `None`.
    pub fn from_record(record: &BubbleRecord, frame: u64) -> Option<Self> {
        let kind = record.bubble_type()?;
        let code = record.code();
        let message = bepp::parse(&record.text);
        let mut think_target = message.think_target;
        let keep_text = code.is_known() || kind == BubbleType::Yell;
        let text = if keep_text { message.text.clone() } else { String::new() };
        if kind == BubbleType::Thought && think_target == ThinkTarget::None {
            if let Some(speaker) = message.first(bepp::TAG_PLAYER_NAME) {
                think_target = bepp::think_suffix(speaker).1;
            }
        }
        let (anchor_h, anchor_v) = record.anchor.unwrap_or((0, 0));
        Some(Self {
            index: record.index,
            kind,
            language: record.language(),
            code,
            far: record.anchor.is_some(),
            anchor_h,
            anchor_v,
            text,
            think_target,
            created_frame: frame,
        })
    }

    pub fn is_alive(&self, frame: u64, life_frames: u64) -> bool {
        frame.saturating_sub(self.created_frame) < life_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn record(type_byte: u8, language_byte: Option<u8>, text: &[u8]) -> BubbleRecord {
        BubbleRecord {
            index: 3,
            type_byte,
            language_byte,
            anchor: (type_byte & BUBBLE_FAR != 0).then_some((-40, 25)),
            text: text.to_vec(),
        }
    }

    #[test]
    fn wire_record_with_language_and_anchor() {
        let rec = record(
            BubbleType::Yell.as_u8() | BUBBLE_HAS_LANGUAGE | BUBBLE_FAR,
            Some((2 << CODE_SHIFT) | 5),
            b"HEY",
        );
        let mut buf = Vec::new();
        rec.write_to(&mut buf).unwrap();
        assert_eq!(buf, vec![3, 0xC2, 0x85, 0xFF, 0xD8, 0, 25, b'H', b'E', b'Y', 0]);
        let back = BubbleRecord::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back, rec);
        assert_eq!(back.language(), 5);
        assert_eq!(back.code(), BubbleCode::MediumUnknown);
    }

    #[test]
    fn unknown_language_drops_text_except_yells() {
        let lang = Some((1 << CODE_SHIFT) | 3);
        let says = record(BUBBLE_HAS_LANGUAGE, lang, b"secret");
        let yell = record(BubbleType::Yell.as_u8() | BUBBLE_HAS_LANGUAGE, lang, b"LOUD");
        assert_eq!(Bubble::from_record(&says, 0).unwrap().text, "");
        assert_eq!(Bubble::from_record(&yell, 0).unwrap().text, "LOUD");
    }

    #[test]
    fn far_bubble_keeps_anchor() {
        let rec = record(BubbleType::Narrate.as_u8() | BUBBLE_FAR, None, b"far away");
        let bubble = Bubble::from_record(&rec, 7).unwrap();
        assert!(bubble.far);
        assert_eq!((bubble.anchor_h, bubble.anchor_v), (-40, 25));
        assert_eq!(bubble.created_frame, 7);
    }

    #[test]
    fn thought_target_from_tag() {
        let mut text = vec![0xC2, b't', b'c'];
        text.extend_from_slice(b"we ride at dawn");
        let rec = record(BubbleType::Thought.as_u8(), None, &text);
        let bubble = Bubble::from_record(&rec, 0).unwrap();
        assert_eq!(bubble.think_target, ThinkTarget::Clan);
        assert_eq!(bubble.text, "we ride at dawn");
    }

    #[test]
    fn lifetime_in_frames() {
        let rec = record(0, None, b"hi");
        let bubble = Bubble::from_record(&rec, 10).unwrap();
        assert!(bubble.is_alive(29, 20));
        assert!(!bubble.is_alive(30, 20));
        assert!(Bubble::from_record(&record(0x3F, None, b""), 0).is_none());
    }
}
