//! The draw-state message (tag 2): the server's per-tick world delta.
//!
//! ```text
//! u8   reserved
//! u32  ack frame
//! u32  resend frame
//! u8   descriptor count, then descriptor records
//! 7×u8 hp, hp max, sp, sp max, balance, balance max, lighting flags
//! u8   picture count (255 = keep previous, then u8 new count)
//!      bit-packed pictures: 14 id, 11 h, 11 v, MSB first, byte aligned
//! u8   mobile count, then 7-byte mobile records
//!      tail blocks {u8 kind, u16 length, body} until kind 0
//! ```
//!
//! Decoding is lossless: [`DrawState::encode`] reproduces the bytes
//! [`DrawState::decode`] was given for any well-formed message.

use std::io::{self, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bits::{BitReader, BitWriter};
use crate::bubble::BubbleRecord;
use crate::bytes::{read_cstring, write_cstring, Bytes};
use crate::consts::{MAX_COLORS, PICTURE_AGAIN, POSE_DEAD};
use crate::error::DecodeError;
use crate::inventory::{self, InvCommand};

pub const PICT_ID_BITS: u32 = 14;
pub const PICT_COORD_BITS: u32 = 11;

pub const TAIL_END: u8 = 0;
pub const TAIL_BUBBLES: u8 = 1;
pub const TAIL_INVENTORY: u8 = 2;
pub const TAIL_SOUNDS: u8 = 3;
pub const TAIL_INFO_TEXT: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MobileKind {
    Player,
    Monster,
    Npc,
}

impl MobileKind {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Player,
            2 => Self::Npc,
            _ => Self::Monster,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Player => 0,
            Self::Monster => 1,
            Self::Npc => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorRecord {
    pub index: u8,
    pub kind: u8,
    pub pict_id: u16,
    pub name: Vec<u8>,
    pub colors: Vec<u8>,
}

impl Bytes for DescriptorRecord {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        writer.write_u8(self.index)?;
        writer.write_u8(self.kind)?;
        writer.write_u16::<BigEndian>(self.pict_id)?;
        write_cstring(writer, &self.name)?;
        writer.write_u8(self.colors.len() as u8)?;
        writer.write_all(&self.colors)
    }

    fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        let index = reader.read_u8()?;
        let kind = reader.read_u8()?;
        let pict_id = reader.read_u16::<BigEndian>()?;
        let name = read_cstring(reader)?;
        let count = reader.read_u8()? as usize;
        if count > MAX_COLORS {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "descriptor color count out of range",
            ));
        }
        let mut colors = vec![0u8; count];
        reader.read_exact(&mut colors)?;
        Ok(Self {
            index,
            kind,
            pict_id,
            name,
            colors,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    pub hp: u8,
    pub hp_max: u8,
    pub sp: u8,
    pub sp_max: u8,
    pub balance: u8,
    pub balance_max: u8,
    pub lighting: u8,
}

impl Bytes for Stats {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        writer.write_all(&[
            self.hp,
            self.hp_max,
            self.sp,
            self.sp_max,
            self.balance,
            self.balance_max,
            self.lighting,
        ])
    }

    fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        let mut b = [0u8; 7];
        reader.read_exact(&mut b)?;
        Ok(Self {
            hp: b[0],
            hp_max: b[1],
            sp: b[2],
            sp_max: b[3],
            balance: b[4],
            balance_max: b[5],
            lighting: b[6],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureRecord {
    pub id: u16,
    pub h: i16,
    pub v: i16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PictureList {
    /// Replaces the previous frame's pictures.
    Fresh(Vec<PictureRecord>),
    /// Keeps every previous picture and appends these.
    Again(Vec<PictureRecord>),
}

impl PictureList {
    pub fn records(&self) -> &[PictureRecord] {
        match self {
            Self::Fresh(r) | Self::Again(r) => r,
        }
    }
}

impl Default for PictureList {
    fn default() -> Self {
        Self::Fresh(Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MobileRecord {
    pub index: u8,
    pub state: u8,
    pub h: i16,
    pub v: i16,
    pub colors: u8,
}

impl MobileRecord {
    pub fn is_dead(&self) -> bool {
        self.state == POSE_DEAD
    }
}

impl Bytes for MobileRecord {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        writer.write_u8(self.index)?;
        writer.write_u8(self.state)?;
        writer.write_i16::<BigEndian>(self.h)?;
        writer.write_i16::<BigEndian>(self.v)?;
        writer.write_u8(self.colors)
    }

    fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        Ok(Self {
            index: reader.read_u8()?,
            state: reader.read_u8()?,
            h: reader.read_i16::<BigEndian>()?,
            v: reader.read_i16::<BigEndian>()?,
            colors: reader.read_u8()?,
        })
    }
}

/// One block of the variable-length tail. The body is kept raw so unknown
/// kinds survive re-encoding; known kinds decode on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailBlock {
    pub kind: u8,
    pub body: Vec<u8>,
}

impl TailBlock {
    pub fn bubbles(records: &[BubbleRecord]) -> io::Result<Self> {
        let mut body = Vec::new();
        for rec in records {
            rec.write_to(&mut body)?;
        }
        Ok(Self {
            kind: TAIL_BUBBLES,
            body,
        })
    }

    pub fn inventory(cmds: &[InvCommand]) -> io::Result<Self> {
        let mut body = Vec::new();
        inventory::write_commands(&mut body, cmds)?;
        Ok(Self {
            kind: TAIL_INVENTORY,
            body,
        })
    }

    pub fn sounds(ids: &[u16]) -> io::Result<Self> {
        let mut body = vec![ids.len() as u8];
        for &id in ids {
            body.write_u16::<BigEndian>(id)?;
        }
        Ok(Self {
            kind: TAIL_SOUNDS,
            body,
        })
    }

    pub fn info_text(text: &[u8]) -> Self {
        let mut body = text.to_vec();
        body.push(0);
        Self {
            kind: TAIL_INFO_TEXT,
            body,
        }
    }

    pub fn decode_bubbles(&self) -> Result<Vec<BubbleRecord>, DecodeError> {
        let mut cursor = Cursor::new(&self.body[..]);
        let mut out = Vec::new();
        while (cursor.position() as usize) < self.body.len() {
            out.push(BubbleRecord::read_from(&mut cursor)?);
        }
        Ok(out)
    }

    pub fn decode_inventory(&self) -> Result<Vec<InvCommand>, DecodeError> {
        inventory::read_commands(&mut Cursor::new(&self.body[..])).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => DecodeError::Truncated("inventory"),
            _ => DecodeError::Malformed("inventory command"),
        })
    }

    pub fn decode_sounds(&self) -> Result<Vec<u16>, DecodeError> {
        let mut cursor = Cursor::new(&self.body[..]);
        let count = cursor.read_u8()?;
        (0..count)
            .map(|_| Ok(cursor.read_u16::<BigEndian>()?))
            .collect()
    }

    pub fn info_text_bytes(&self) -> &[u8] {
        crate::bytes::fixed_cstring(&self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DrawState {
    pub reserved: u8,
    pub ack_frame: u32,
    pub resend_frame: u32,
    pub descriptors: Vec<DescriptorRecord>,
    pub stats: Stats,
    pub pictures: PictureList,
    pub mobiles: Vec<MobileRecord>,
    pub tail: Vec<TailBlock>,
}

impl DrawState {
    /// Decodes a draw-state body (the bytes after the tag).
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut cursor = Cursor::new(data);
        let reserved = cursor.read_u8()?;
        let ack_frame = cursor.read_u32::<BigEndian>()?;
        let resend_frame = cursor.read_u32::<BigEndian>()?;

        let count = cursor.read_u8()?;
        let descriptors = (0..count)
            .map(|_| DescriptorRecord::read_from(&mut cursor))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| DecodeError::Truncated("descriptor table"))?;

        let stats = Stats::read_from(&mut cursor).map_err(|_| DecodeError::Truncated("stats"))?;

        let pictures = match cursor.read_u8()? {
            PICTURE_AGAIN => {
                let count = cursor.read_u8()?;
                PictureList::Again(read_pictures(&mut cursor, data, count)?)
            }
            count => PictureList::Fresh(read_pictures(&mut cursor, data, count)?),
        };

        let count = cursor.read_u8()?;
        let mobiles = (0..count)
            .map(|_| MobileRecord::read_from(&mut cursor))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| DecodeError::Truncated("mobile table"))?;

        let mut tail = Vec::new();
        loop {
            let kind = match cursor.read_u8() {
                Ok(TAIL_END) | Err(_) => break,
                Ok(kind) => kind,
            };
            let len = cursor
                .read_u16::<BigEndian>()
                .map_err(|_| DecodeError::Truncated("tail block length"))?;
            let mut body = vec![0u8; len as usize];
            cursor
                .read_exact(&mut body)
                .map_err(|_| DecodeError::Truncated("tail block"))?;
            tail.push(TailBlock { kind, body });
        }

        Ok(Self {
            reserved,
            ack_frame,
            resend_frame,
            descriptors,
            stats,
            pictures,
            mobiles,
            tail,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::new();
        self.encode_into(&mut out)
            .map_err(|_| DecodeError::Malformed("draw state"))?;
        Ok(out)
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.write_u8(self.reserved)?;
        out.write_u32::<BigEndian>(self.ack_frame)?;
        out.write_u32::<BigEndian>(self.resend_frame)?;
        out.write_u8(self.descriptors.len() as u8)?;
        for d in &self.descriptors {
            d.write_to(out)?;
        }
        self.stats.write_to(out)?;
        let records = match &self.pictures {
            PictureList::Again(r) => {
                out.write_u8(PICTURE_AGAIN)?;
                r
            }
            PictureList::Fresh(r) => {
                if r.len() >= PICTURE_AGAIN as usize {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "too many pictures for one frame",
                    ));
                }
                r
            }
        };
        out.write_u8(records.len() as u8)?;
        out.extend_from_slice(&write_pictures(records));
        out.write_u8(self.mobiles.len() as u8)?;
        for m in &self.mobiles {
            m.write_to(out)?;
        }
        for block in &self.tail {
            out.write_u8(block.kind)?;
            out.write_u16::<BigEndian>(block.body.len() as u16)?;
            out.extend_from_slice(&block.body);
        }
        out.write_u8(TAIL_END)
    }

    pub fn tail_of(&self, kind: u8) -> impl Iterator<Item = &TailBlock> {
        self.tail.iter().filter(move |b| b.kind == kind)
    }
}

fn read_pictures(
    cursor: &mut Cursor<&[u8]>,
    data: &[u8],
    count: u8,
) -> Result<Vec<PictureRecord>, DecodeError> {
    let start = cursor.position() as usize;
    let mut bits = BitReader::new(&data[start..]);
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = bits.read(PICT_ID_BITS)? as u16;
        let h = bits.read_signed(PICT_COORD_BITS)? as i16;
        let v = bits.read_signed(PICT_COORD_BITS)? as i16;
        out.push(PictureRecord { id, h, v });
    }
    cursor.set_position((start + bits.aligned_len()) as u64);
    Ok(out)
}

fn write_pictures(records: &[PictureRecord]) -> Vec<u8> {
    let mut bits = BitWriter::new();
    for p in records {
        bits.write(p.id as u32, PICT_ID_BITS);
        bits.write_signed(p.h as i32, PICT_COORD_BITS);
        bits.write_signed(p.v as i32, PICT_COORD_BITS);
    }
    bits.finish()
}
