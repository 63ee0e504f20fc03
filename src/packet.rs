use std::fmt;
use std::io::{self, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bytes::{fixed_cstring, read_macroman, write_macroman, Bytes};
use crate::consts::{
    CHALLENGE_SIZE, MSG_CHALLENGE, MSG_DRAW_STATE, MSG_IDENTIFIERS, MSG_INFO_TEXT, MSG_INPUT,
    MSG_LOGON,
};
use crate::crypto::{obfuscate, obfuscate_login};
use crate::draw::{DrawState, PictureRecord};
use crate::error::DecodeError;
use crate::framing::tag_of;
use crate::movie::{GameState, MobileEntry};

/// Every message the core understands, live or replayed.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    DrawState(DrawState),
    GameState(GameState),
    MobileTable(Vec<MobileEntry>),
    PictureTable(Vec<PictureRecord>),
    InfoText(Vec<u8>),
    Challenge(Challenge),
    LogonResp(LogonResponse),
    Identifiers(Identifiers),
}

impl Frame {
    pub fn name(&self) -> &'static str {
        match self {
            Frame::DrawState(_) => "draw state",
            Frame::GameState(_) => "game state",
            Frame::MobileTable(_) => "mobile table",
            Frame::PictureTable(_) => "picture table",
            Frame::InfoText(_) => "info text",
            Frame::Challenge(_) => "challenge",
            Frame::LogonResp(_) => "logon response",
            Frame::Identifiers(_) => "identifiers",
        }
    }
}

/// Decodes a live payload (tag included). When `encrypted` is set the
/// draw-state body is deobfuscated first.
pub fn decode_live(payload: &[u8], encrypted: bool) -> Result<Frame, DecodeError> {
    let tag = tag_of(payload).ok_or(DecodeError::Truncated("tag"))?;
    let body = &payload[2..];
    match tag {
        MSG_DRAW_STATE if encrypted => {
            let mut plain = body.to_vec();
            obfuscate(&mut plain);
            Ok(Frame::DrawState(DrawState::decode(&plain)?))
        }
        MSG_DRAW_STATE => Ok(Frame::DrawState(DrawState::decode(body)?)),
        MSG_INFO_TEXT => Ok(Frame::InfoText(fixed_cstring(body).to_vec())),
        MSG_CHALLENGE => Ok(Frame::Challenge(Challenge::decode(payload)?)),
        MSG_LOGON => Ok(Frame::LogonResp(LogonResponse::decode(payload)?)),
        MSG_IDENTIFIERS => Ok(Frame::Identifiers(Identifiers::decode(payload)?)),
        other => Err(DecodeError::UnexpectedTag(other)),
    }
}

/// Builds a live draw-state payload, the inverse of [`decode_live`].
pub fn encode_draw_state(state: &DrawState, encrypted: bool) -> Result<Vec<u8>, DecodeError> {
    let mut body = state.encode()?;
    if encrypted {
        obfuscate(&mut body);
    }
    let mut out = Vec::with_capacity(body.len() + 2);
    out.extend_from_slice(&MSG_DRAW_STATE.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

pub fn encode_info_text(text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 3);
    out.extend_from_slice(&MSG_INFO_TEXT.to_be_bytes());
    out.extend_from_slice(text);
    out.push(0);
    out
}

/// Outcome of a login attempt, as reported by the server's tag-13 reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoginResult {
    Ok,
    Obsolete(i16),
    ServerShuttingDown,
    BadCharacterName,
    BadPassword,
    IncompatibleVersion,
    NoSlotAvailable,
    AlreadyOnline,
    AccountSuspended,
    Unknown(i16),
}

impl LoginResult {
    pub fn from_code(code: i16) -> Self {
        match code {
            0 => Self::Ok,
            -30972 | -30973 => Self::Obsolete(code),
            -30974 => Self::ServerShuttingDown,
            -30975 => Self::BadCharacterName,
            -30976 => Self::BadPassword,
            -30977 => Self::IncompatibleVersion,
            -30978 => Self::NoSlotAvailable,
            -30979 => Self::AlreadyOnline,
            -30980 => Self::AccountSuspended,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> i16 {
        match self {
            Self::Ok => 0,
            Self::Obsolete(code) | Self::Unknown(code) => code,
            Self::ServerShuttingDown => -30974,
            Self::BadCharacterName => -30975,
            Self::BadPassword => -30976,
            Self::IncompatibleVersion => -30977,
            Self::NoSlotAvailable => -30978,
            Self::AlreadyOnline => -30979,
            Self::AccountSuspended => -30980,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    pub fn is_obsolete(self) -> bool {
        matches!(self, Self::Obsolete(_))
    }
}

impl fmt::Display for LoginResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "login accepted"),
            Self::Obsolete(_) => write!(f, "this client version is obsolete"),
            Self::ServerShuttingDown => write!(f, "the server is shutting down"),
            Self::BadCharacterName => write!(f, "no character by that name"),
            Self::BadPassword => write!(f, "incorrect password"),
            Self::IncompatibleVersion => write!(f, "client and server versions are incompatible"),
            Self::NoSlotAvailable => write!(f, "the server has no room for another player"),
            Self::AlreadyOnline => write!(f, "that character is already playing"),
            Self::AccountSuspended => write!(f, "the account is suspended"),
            Self::Unknown(code) => write!(f, "unknown login error {code}"),
        }
    }
}

/// Tag 19: the client's versions and identification block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identifiers {
    pub client_version: u32,
    pub images_version: u32,
    pub sounds_version: u32,
    pub ethernet: [u8; 6],
    pub username: String,
    pub hostname: String,
    pub boot_path: String,
    pub language: u8,
}

impl Identifiers {
    /// The wire payload, tag included and obfuscated from byte 16.
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        out.write_u16::<BigEndian>(MSG_IDENTIFIERS)?;
        out.write_u16::<BigEndian>(0)?;
        self.write_to(&mut out)?;
        obfuscate_login(&mut out);
        Ok(out)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let plain = deobfuscated(payload, MSG_IDENTIFIERS)?;
        let mut cursor = Cursor::new(&plain[4..]);
        Ok(Self::read_from(&mut cursor)?)
    }
}

impl Bytes for Identifiers {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        writer.write_u32::<BigEndian>(self.client_version)?;
        writer.write_u32::<BigEndian>(self.images_version)?;
        writer.write_u32::<BigEndian>(self.sounds_version)?;
        writer.write_all(&[0u8; 8])?;
        writer.write_all(&self.ethernet)?;
        write_macroman(writer, &self.username)?;
        write_macroman(writer, &self.hostname)?;
        write_macroman(writer, &self.boot_path)?;
        writer.write_u8(self.language)
    }

    fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        let client_version = reader.read_u32::<BigEndian>()?;
        let images_version = reader.read_u32::<BigEndian>()?;
        let sounds_version = reader.read_u32::<BigEndian>()?;
        let mut reserved = [0u8; 8];
        reader.read_exact(&mut reserved)?;
        let mut ethernet = [0u8; 6];
        reader.read_exact(&mut ethernet)?;
        Ok(Self {
            client_version,
            images_version,
            sounds_version,
            ethernet,
            username: read_macroman(reader)?,
            hostname: read_macroman(reader)?,
            boot_path: read_macroman(reader)?,
            language: reader.read_u8()?,
        })
    }
}

/// Tag 18: the server's login challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Challenge {
    pub server_version: u32,
    pub challenge: [u8; CHALLENGE_SIZE],
}

impl Challenge {
    const MIN_SIZE: usize = 8 + CHALLENGE_SIZE;

    /// Reads the server version from bytes 4..8 and the challenge from the
    /// last 16 bytes, whatever sits between them.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if tag_of(payload) != Some(MSG_CHALLENGE) {
            return Err(DecodeError::UnexpectedTag(tag_of(payload).unwrap_or(0)));
        }
        if payload.len() < Self::MIN_SIZE {
            return Err(DecodeError::Truncated("challenge"));
        }
        let server_version = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let mut challenge = [0u8; CHALLENGE_SIZE];
        challenge.copy_from_slice(&payload[payload.len() - CHALLENGE_SIZE..]);
        Ok(Self {
            server_version,
            challenge,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::MIN_SIZE);
        out.extend_from_slice(&MSG_CHALLENGE.to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.server_version.to_be_bytes());
        out.extend_from_slice(&self.challenge);
        out
    }
}

/// Tag 13 from the client: versions, character name and challenge answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub client_version: u32,
    pub images_version: u32,
    pub sounds_version: u32,
    pub name: String,
    pub answer: [u8; CHALLENGE_SIZE],
}

impl LoginRequest {
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        out.write_u16::<BigEndian>(MSG_LOGON)?;
        out.write_u16::<BigEndian>(0)?;
        out.write_u32::<BigEndian>(self.client_version)?;
        out.write_u32::<BigEndian>(self.images_version)?;
        out.write_u32::<BigEndian>(self.sounds_version)?;
        write_macroman(&mut out, &self.name)?;
        out.extend_from_slice(&self.answer);
        obfuscate_login(&mut out);
        Ok(out)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let plain = deobfuscated(payload, MSG_LOGON)?;
        let mut cursor = Cursor::new(&plain[4..]);
        let client_version = cursor.read_u32::<BigEndian>()?;
        let images_version = cursor.read_u32::<BigEndian>()?;
        let sounds_version = cursor.read_u32::<BigEndian>()?;
        let name = read_macroman(&mut cursor)?;
        let mut answer = [0u8; CHALLENGE_SIZE];
        cursor.read_exact(&mut answer)?;
        Ok(Self {
            client_version,
            images_version,
            sounds_version,
            name,
            answer,
        })
    }
}

pub const LOGON_FLAG_ENCRYPTED: u16 = 0x0001;

/// Tag 13 from the server: the result code and, on success, session flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogonResponse {
    pub result: LoginResult,
    pub encrypted: bool,
}

impl LogonResponse {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut cursor = Cursor::new(payload);
        let tag = cursor.read_u16::<BigEndian>()?;
        if tag != MSG_LOGON {
            return Err(DecodeError::UnexpectedTag(tag));
        }
        let result = LoginResult::from_code(cursor.read_i16::<BigEndian>()?);
        let flags = cursor.read_u16::<BigEndian>().unwrap_or(0);
        Ok(Self {
            result,
            encrypted: flags & LOGON_FLAG_ENCRYPTED != 0,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6);
        out.extend_from_slice(&MSG_LOGON.to_be_bytes());
        out.extend_from_slice(&self.result.code().to_be_bytes());
        let flags = if self.encrypted { LOGON_FLAG_ENCRYPTED } else { 0 };
        out.extend_from_slice(&flags.to_be_bytes());
        out
    }
}

pub const INPUT_FLAG_MOUSE_DOWN: u16 = 0x0001;

/// Tag 3: one tick of player input.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InputPacket {
    pub mouse_h: i16,
    pub mouse_v: i16,
    pub flags: u16,
    pub ack_frame: u32,
    pub resend_frame: u32,
    pub command_num: u32,
    pub command: String,
}

impl InputPacket {
    pub fn mouse_down(&self) -> bool {
        self.flags & INPUT_FLAG_MOUSE_DOWN != 0
    }

    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(24 + self.command.len());
        out.write_u16::<BigEndian>(MSG_INPUT)?;
        self.write_to(&mut out)?;
        obfuscate_login(&mut out);
        Ok(out)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let plain = deobfuscated(payload, MSG_INPUT)?;
        Ok(Self::read_from(&mut Cursor::new(&plain[2..]))?)
    }
}

impl Bytes for InputPacket {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        writer.write_i16::<BigEndian>(self.mouse_h)?;
        writer.write_i16::<BigEndian>(self.mouse_v)?;
        writer.write_u16::<BigEndian>(self.flags)?;
        writer.write_u32::<BigEndian>(self.ack_frame)?;
        writer.write_u32::<BigEndian>(self.resend_frame)?;
        writer.write_u32::<BigEndian>(self.command_num)?;
        write_macroman(writer, &self.command)
    }

    fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        Ok(Self {
            mouse_h: reader.read_i16::<BigEndian>()?,
            mouse_v: reader.read_i16::<BigEndian>()?,
            flags: reader.read_u16::<BigEndian>()?,
            ack_frame: reader.read_u32::<BigEndian>()?,
            resend_frame: reader.read_u32::<BigEndian>()?,
            command_num: reader.read_u32::<BigEndian>()?,
            command: read_macroman(reader)?,
        })
    }
}

fn deobfuscated(payload: &[u8], expected: u16) -> Result<Vec<u8>, DecodeError> {
    match tag_of(payload) {
        Some(tag) if tag == expected => {}
        Some(tag) => return Err(DecodeError::UnexpectedTag(tag)),
        None => return Err(DecodeError::Truncated("tag")),
    }
    let mut plain = payload.to_vec();
    obfuscate_login(&mut plain);
    Ok(plain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{answer_challenge, PasswordHash};

    #[test]
    fn result_codes() {
        assert!(LoginResult::from_code(-30972).is_obsolete());
        assert!(LoginResult::from_code(-30973).is_obsolete());
        assert_eq!(LoginResult::from_code(-30976), LoginResult::BadPassword);
        assert_eq!(LoginResult::from_code(-1), LoginResult::Unknown(-1));
        assert!(LoginResult::from_code(0).is_ok());
        for code in [-30980, -30979, -30978, -30977, -30975, -30974, -30973, -5] {
            assert_eq!(LoginResult::from_code(code).code(), code);
        }
        assert_eq!(
            LoginResult::AlreadyOnline.to_string(),
            "that character is already playing"
        );
    }

    #[test]
    fn challenge_reads_version_and_trailing_bytes() {
        let mut payload = vec![0x00, 0x12, 0, 0, 0, 0, 0x05, 0x40];
        payload.extend_from_slice(&[0xAA; 4]);
        payload.extend(0u8..16);
        let challenge = Challenge::decode(&payload).unwrap();
        assert_eq!(challenge.server_version, 1344);
        assert_eq!(challenge.challenge[0], 0);
        assert_eq!(challenge.challenge[15], 15);
        assert_eq!(
            Challenge::decode(&payload[..20]),
            Err(DecodeError::Truncated("challenge"))
        );
    }

    #[test]
    fn login_request_is_obfuscated_past_header() {
        let hash = PasswordHash::of("hunter2");
        let challenge: [u8; 16] = core::array::from_fn(|i| i as u8);
        let req = LoginRequest {
            client_version: 1353,
            images_version: 400,
            sounds_version: 300,
            name: "Hero".into(),
            answer: answer_challenge(&challenge, &hash).unwrap(),
        };
        let wire = req.encode().unwrap();
        assert_eq!(&wire[..4], &[0x00, 0x0D, 0, 0]);
        assert_eq!(&wire[4..8], &1353u32.to_be_bytes());
        assert_ne!(&wire[16..20], b"Hero");
        assert_eq!(wire.len(), 16 + 5 + 16);
        assert_eq!(LoginRequest::decode(&wire).unwrap(), req);
        // identical inputs give identical ciphertext
        assert_eq!(req.encode().unwrap(), wire);
    }

    #[test]
    fn identifiers_layout() {
        let ids = Identifiers {
            client_version: 1353,
            images_version: 1,
            sounds_version: 2,
            ethernet: [0; 6],
            username: "me".into(),
            hostname: "host".into(),
            boot_path: "/".into(),
            language: 0,
        };
        let wire = ids.encode().unwrap();
        assert_eq!(tag_of(&wire), Some(MSG_IDENTIFIERS));
        assert_eq!(wire.len(), 4 + 12 + 8 + 6 + 3 + 5 + 2 + 1);
        assert_eq!(Identifiers::decode(&wire).unwrap(), ids);
        match decode_live(&wire, false).unwrap() {
            Frame::Identifiers(got) => assert_eq!(got, ids),
            other => panic!("unexpected {}", other.name()),
        }
    }

    #[test]
    fn logon_response_flags_are_optional() {
        let short = [0x00, 0x0D, 0x87, 0x00];
        let resp = LogonResponse::decode(&short).unwrap();
        assert_eq!(resp.result, LoginResult::BadPassword);
        assert!(!resp.encrypted);
        let full = LogonResponse {
            result: LoginResult::Ok,
            encrypted: true,
        };
        assert_eq!(LogonResponse::decode(&full.encode()).unwrap(), full);
    }

    #[test]
    fn input_packet_layout() {
        let input = InputPacket {
            mouse_h: -5,
            mouse_v: 7,
            flags: INPUT_FLAG_MOUSE_DOWN,
            ack_frame: 10,
            resend_frame: 0,
            command_num: 3,
            command: "/who".into(),
        };
        let wire = input.encode().unwrap();
        assert_eq!(&wire[..8], &[0x00, 0x03, 0xFF, 0xFB, 0x00, 0x07, 0x00, 0x01]);
        assert_eq!(&wire[8..12], &10u32.to_be_bytes());
        assert_eq!(wire.len(), 20 + 5);
        let back = InputPacket::decode(&wire).unwrap();
        assert!(back.mouse_down());
        assert_eq!(back, input);
    }

    #[test]
    fn encrypted_draw_state_round_trips() {
        let state = crate::draw::tests::sample();
        let plain = encode_draw_state(&state, false).unwrap();
        let secret = encode_draw_state(&state, true).unwrap();
        assert_ne!(plain, secret);
        assert_eq!(&secret[..2], &[0x00, 0x02]);
        assert_eq!(decode_live(&secret, true).unwrap(), Frame::DrawState(state));
    }

    #[test]
    fn unknown_tag_is_reported() {
        assert_eq!(
            decode_live(&[0x00, 0x63, 1, 2], false),
            Err(DecodeError::UnexpectedTag(99))
        );
        assert_eq!(
            decode_live(&encode_info_text(b"hi"), false),
            Ok(Frame::InfoText(b"hi".to_vec()))
        );
    }
}
