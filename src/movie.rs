//! Movie (replay) files: a 24-byte header followed by frames, each a
//! 12-byte frame header, optional login blocks and a draw-state payload.
//!
//! ```text
//! frame := u32 signature, u32 index, u16 payload size, u16 flags
//!          [game-state block]     if flags & GAME_STATE
//!          [mobile-table block]   if flags & MOBILE_DATA
//!          [picture-table block]  if flags & PICTURE_TABLE
//!          payload (the tag-2 body, never obfuscated)
//! ```

use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::time::Instant;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bytes::{fixed_cstring, read_cstring, write_cstring, Bytes};
use crate::catalog::ImageCatalog;
use crate::consts::{
    MAX_COLORS, MAX_DESCRIPTORS, MAX_NAME_LEN, MOBILE_LAYOUT_MIN_VERSION, MOVIE_HEADER_SIZE,
    MOVIE_LEGACY_SCALE_THRESHOLD, MOVIE_MIN_VERSION, MOVIE_SIGNATURE, MOVIE_VERSION,
};
use crate::draw::{DrawState, PictureRecord};
use crate::error::DecodeError;
use crate::packet::Frame;
use crate::pipeline::Presentation;
use crate::snapshot::WorldSnapshot;
use crate::world::World;

#[derive(thiserror::Error, Debug)]
pub enum MovieError {
    #[error("not a movie file (signature {0:#010x})")]
    BadSignature(u32),
    #[error("movie version {0} is too old to play")]
    VersionTooOld(u16),
    #[error("no mobile table layout for movie version {0}")]
    UnsupportedLayout(u32),
    #[error("movie i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("movie frame is malformed: {0}")]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovieHeader {
    pub version: u16,
    pub header_len: u16,
    pub frame_count: u32,
    /// Seconds since 1904-01-01.
    pub start_time: u32,
    pub revision: u32,
    pub oldest_reader: u32,
}

impl MovieHeader {
    pub fn new(start_time: u32) -> Self {
        Self {
            version: MOVIE_VERSION,
            header_len: MOVIE_HEADER_SIZE,
            frame_count: 0,
            start_time,
            revision: 0,
            oldest_reader: MOVIE_MIN_VERSION as u32,
        }
    }

    /// Reads and validates a header, leaving the reader at the first frame.
    pub fn read(reader: &mut impl Read) -> Result<Self, MovieError> {
        let signature = reader.read_u32::<BigEndian>()?;
        if signature != MOVIE_SIGNATURE {
            return Err(MovieError::BadSignature(signature));
        }
        let mut version = reader.read_u16::<BigEndian>()?;
        if version >= MOVIE_LEGACY_SCALE_THRESHOLD {
            version /= 100;
        }
        if version < MOVIE_MIN_VERSION {
            return Err(MovieError::VersionTooOld(version));
        }
        let header_len = reader.read_u16::<BigEndian>()?;
        let header = Self {
            version,
            header_len,
            frame_count: reader.read_u32::<BigEndian>()?,
            start_time: reader.read_u32::<BigEndian>()?,
            revision: reader.read_u32::<BigEndian>()?,
            oldest_reader: reader.read_u32::<BigEndian>()?,
        };
        if header_len > MOVIE_HEADER_SIZE {
            let extra = (header_len - MOVIE_HEADER_SIZE) as u64;
            io::copy(&mut reader.take(extra), &mut io::sink())?;
        }
        Ok(header)
    }

    pub fn write(&self, writer: &mut impl Write) -> io::Result<()> {
        writer.write_u32::<BigEndian>(MOVIE_SIGNATURE)?;
        writer.write_u16::<BigEndian>(self.version)?;
        writer.write_u16::<BigEndian>(MOVIE_HEADER_SIZE)?;
        writer.write_u32::<BigEndian>(self.frame_count)?;
        writer.write_u32::<BigEndian>(self.start_time)?;
        writer.write_u32::<BigEndian>(self.revision)?;
        writer.write_u32::<BigEndian>(self.oldest_reader)
    }
}

/// Byte offset of the frame count inside the file header.
const FRAME_COUNT_OFFSET: u64 = 8;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameFlags(u16);

impl FrameFlags {
    /// Declared by recorders; carried through without interpretation.
    pub const STALE: Self = Self(0x0001);
    pub const MOBILE_DATA: Self = Self(0x0002);
    pub const GAME_STATE: Self = Self(0x0004);
    pub const PICTURE_TABLE: Self = Self(0x0008);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl std::fmt::Debug for FrameFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FrameFlags({:#06x})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub signature: u32,
    pub index: u32,
    pub size: u16,
    pub flags: FrameFlags,
}

impl Bytes for FrameHeader {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        writer.write_u32::<BigEndian>(self.signature)?;
        writer.write_u32::<BigEndian>(self.index)?;
        writer.write_u16::<BigEndian>(self.size)?;
        writer.write_u16::<BigEndian>(self.flags.bits())
    }

    fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        Ok(Self {
            signature: reader.read_u32::<BigEndian>()?,
            index: reader.read_u32::<BigEndian>()?,
            size: reader.read_u16::<BigEndian>()?,
            flags: FrameFlags::from_bits(reader.read_u16::<BigEndian>()?),
        })
    }
}

/// Where the per-mobile fields sit inside a mobile-table record. The
/// record grew several times; each version range has its own layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MobileLayout {
    pub size: usize,
    pub colors: usize,
    pub num_colors: usize,
    pub name: usize,
    pub bubble: usize,
}

impl MobileLayout {
    pub fn for_version(version: u32) -> Result<Self, MovieError> {
        let (size, colors, num_colors, name, bubble) = match version {
            v if v < MOBILE_LAYOUT_MIN_VERSION => return Err(MovieError::UnsupportedLayout(v)),
            v if v < 98 => (126, 10, 40, 44, 96),
            v if v < 106 => (130, 12, 42, 46, 100),
            v if v < 114 => (142, 16, 46, 50, 108),
            v if v < 142 => (150, 20, 52, 56, 112),
            _ => (156, 24, 56, 60, 116),
        };
        Ok(Self {
            size,
            colors,
            num_colors,
            name,
            bubble,
        })
    }
}

/// One record of a mobile table: a descriptor and its pose.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MobileEntry {
    pub index: u32,
    pub pict_id: u16,
    pub kind: u8,
    pub state: u8,
    pub colors: u8,
    pub h: i16,
    pub v: i16,
    pub color_table: Vec<u8>,
    pub name: Vec<u8>,
    pub bubble_counter: i32,
}

impl MobileEntry {
    fn read(reader: &mut impl Read, index: u32, layout: &MobileLayout) -> io::Result<Self> {
        let mut buf = vec![0u8; layout.size];
        reader.read_exact(&mut buf)?;
        let be16 = |at: usize| [buf[at], buf[at + 1]];
        let count = (buf[layout.num_colors] as usize)
            .min(MAX_COLORS)
            .min(layout.num_colors - layout.colors);
        let mut bubble = [0u8; 4];
        bubble.copy_from_slice(&buf[layout.bubble..layout.bubble + 4]);
        Ok(Self {
            index,
            pict_id: u16::from_be_bytes(be16(0)),
            kind: buf[2],
            state: buf[4],
            colors: buf[5],
            h: i16::from_be_bytes(be16(6)),
            v: i16::from_be_bytes(be16(8)),
            color_table: buf[layout.colors..layout.colors + count].to_vec(),
            name: fixed_cstring(&buf[layout.name..layout.name + MAX_NAME_LEN]).to_vec(),
            bubble_counter: i32::from_be_bytes(bubble),
        })
    }

    fn write(&self, writer: &mut impl Write, layout: &MobileLayout) -> io::Result<()> {
        let mut buf = vec![0u8; layout.size];
        buf[0..2].copy_from_slice(&self.pict_id.to_be_bytes());
        buf[2] = self.kind;
        buf[4] = self.state;
        buf[5] = self.colors;
        buf[6..8].copy_from_slice(&self.h.to_be_bytes());
        buf[8..10].copy_from_slice(&self.v.to_be_bytes());
        let count = self
            .color_table
            .len()
            .min(MAX_COLORS)
            .min(layout.num_colors - layout.colors);
        buf[layout.colors..layout.colors + count].copy_from_slice(&self.color_table[..count]);
        buf[layout.num_colors] = count as u8;
        // keep room for the terminator
        let name_len = self.name.len().min(MAX_NAME_LEN - 1);
        buf[layout.name..layout.name + name_len].copy_from_slice(&self.name[..name_len]);
        buf[layout.bubble..layout.bubble + 4].copy_from_slice(&self.bubble_counter.to_be_bytes());
        writer.write_i32::<BigEndian>(self.index as i32)?;
        writer.write_all(&buf)
    }
}

const MOBILE_TABLE_END: i32 = -1;
const PICTURE_TABLE_RESERVED: usize = 4;

/// Reads entries up to the `-1` terminator. A table holds at most one entry
/// per descriptor slot; anything else is `InvalidData`.
pub fn read_mobile_table(
    reader: &mut impl Read,
    layout: &MobileLayout,
) -> io::Result<Vec<MobileEntry>> {
    let mut entries = Vec::new();
    loop {
        let index = reader.read_i32::<BigEndian>()?;
        if index == MOBILE_TABLE_END {
            return Ok(entries);
        }
        if !(0..MAX_DESCRIPTORS as i32).contains(&index) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("mobile table index {index} out of range"),
            ));
        }
        if entries.len() == MAX_DESCRIPTORS {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "mobile table has no terminator",
            ));
        }
        entries.push(MobileEntry::read(reader, index as u32, layout)?);
    }
}

pub fn write_mobile_table(
    writer: &mut impl Write,
    entries: &[MobileEntry],
    layout: &MobileLayout,
) -> io::Result<()> {
    for entry in entries {
        entry.write(writer, layout)?;
    }
    writer.write_i32::<BigEndian>(MOBILE_TABLE_END)
}

pub fn read_picture_table(reader: &mut impl Read) -> io::Result<Vec<PictureRecord>> {
    let count = reader.read_u16::<BigEndian>()?;
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        records.push(PictureRecord {
            id: reader.read_u16::<BigEndian>()?,
            h: reader.read_i16::<BigEndian>()?,
            v: reader.read_i16::<BigEndian>()?,
        });
    }
    let mut reserved = [0u8; PICTURE_TABLE_RESERVED];
    reader.read_exact(&mut reserved)?;
    Ok(records)
}

pub fn write_picture_table(writer: &mut impl Write, records: &[PictureRecord]) -> io::Result<()> {
    writer.write_u16::<BigEndian>(records.len() as u16)?;
    for r in records {
        writer.write_u16::<BigEndian>(r.id)?;
        writer.write_i16::<BigEndian>(r.h)?;
        writer.write_i16::<BigEndian>(r.v)?;
    }
    writer.write_all(&[0u8; PICTURE_TABLE_RESERVED])
}

/// The login snapshot a recording starts from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameState {
    pub info_text: Vec<u8>,
    pub pictures: Vec<PictureRecord>,
    pub mobiles: Vec<MobileEntry>,
}

impl GameState {
    /// Reads a `{u32 size, body}` block. The body is parsed leniently: a
    /// section that does not parse ends the block, and trailing bytes are
    /// skipped.
    pub fn read(reader: &mut impl Read, layout: &MobileLayout) -> io::Result<Self> {
        let size = reader.read_u32::<BigEndian>()?;
        let mut body = Vec::new();
        reader.take(size as u64).read_to_end(&mut body)?;
        if body.len() < size as usize {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let mut cursor = Cursor::new(&body[..]);
        let mut state = Self {
            info_text: read_cstring(&mut cursor).unwrap_or_default(),
            ..Self::default()
        };
        match read_picture_table(&mut cursor) {
            Ok(pictures) => state.pictures = pictures,
            Err(e) => {
                log::debug!("game state has no picture table: {e}");
                return Ok(state);
            }
        }
        match read_mobile_table(&mut cursor, layout) {
            Ok(mobiles) => state.mobiles = mobiles,
            Err(e) => log::debug!("game state has no mobile table: {e}"),
        }
        let rest = body.len() as u64 - cursor.position();
        if rest > 0 {
            log::trace!("skipping {rest} trailing game state bytes");
        }
        Ok(state)
    }

    pub fn write(&self, writer: &mut impl Write, layout: &MobileLayout) -> io::Result<()> {
        let mut body = Vec::new();
        write_cstring(&mut body, &self.info_text)?;
        write_picture_table(&mut body, &self.pictures)?;
        write_mobile_table(&mut body, &self.mobiles, layout)?;
        writer.write_u32::<BigEndian>(body.len() as u32)?;
        writer.write_all(&body)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovieFrame {
    pub header: FrameHeader,
    pub game_state: Option<GameState>,
    pub mobiles: Option<Vec<MobileEntry>>,
    pub pictures: Option<Vec<PictureRecord>>,
    pub payload: Vec<u8>,
}

impl MovieFrame {
    pub fn is_stale(&self) -> bool {
        self.header.flags.contains(FrameFlags::STALE)
    }

    /// The login blocks carried by this frame, in the order they apply.
    pub fn blocks(&self) -> Vec<Frame> {
        let mut out = Vec::new();
        if let Some(gs) = &self.game_state {
            out.push(Frame::GameState(gs.clone()));
        }
        if let Some(mobiles) = &self.mobiles {
            out.push(Frame::MobileTable(mobiles.clone()));
        }
        if let Some(pictures) = &self.pictures {
            out.push(Frame::PictureTable(pictures.clone()));
        }
        out
    }

    pub fn draw_state(&self) -> Result<DrawState, DecodeError> {
        DrawState::decode(&self.payload)
    }
}

/// A reader that can hand back the bytes of a frame it failed to parse.
struct Rewind<R> {
    inner: R,
    pending: VecDeque<u8>,
    taken: Vec<u8>,
    tracking: bool,
}

impl<R: Read> Rewind<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            pending: VecDeque::new(),
            taken: Vec::new(),
            tracking: false,
        }
    }

    fn track(&mut self) {
        self.taken.clear();
        self.tracking = true;
    }

    fn commit(&mut self) {
        self.taken.clear();
        self.tracking = false;
    }

    /// Makes everything read since `track` readable again.
    fn rewind(&mut self) {
        self.tracking = false;
        for b in self.taken.drain(..).rev() {
            self.pending.push_front(b);
        }
    }
}

impl<R: Read> Read for Rewind<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = if self.pending.is_empty() {
            self.inner.read(buf)?
        } else {
            self.pending.read(buf)?
        };
        if self.tracking {
            self.taken.extend_from_slice(&buf[..n]);
        }
        Ok(n)
    }
}

/// Reads frames from a movie. Signature mismatches are resynchronised by
/// scanning for the next frame signature, as are frames whose blocks do not
/// parse; a truncated frame ends the movie.
pub struct MovieReader<R> {
    reader: Rewind<R>,
    header: MovieHeader,
    layout: MobileLayout,
    done: bool,
    skipped: u64,
}

impl<R: Read> MovieReader<R> {
    pub fn new(mut reader: R) -> Result<Self, MovieError> {
        let header = MovieHeader::read(&mut reader)?;
        let layout = MobileLayout::for_version(header.version as u32)?;
        log::debug!(
            "movie version {} with {} frames",
            header.version,
            header.frame_count
        );
        Ok(Self {
            reader: Rewind::new(reader),
            header,
            layout,
            done: false,
            skipped: 0,
        })
    }

    pub fn header(&self) -> &MovieHeader {
        &self.header
    }

    pub fn layout(&self) -> &MobileLayout {
        &self.layout
    }

    /// Bytes discarded while resynchronising.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped
    }

    pub fn next_frame(&mut self) -> Result<Option<MovieFrame>, MovieError> {
        while !self.done {
            match self.read_frame() {
                Ok(frame) => {
                    self.reader.commit();
                    return Ok(Some(frame));
                }
                Err(MovieError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.done = true;
                }
                Err(MovieError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                    // rescan from the byte after the bad frame's signature
                    log::warn!("dropping corrupt movie frame: {e}");
                    self.reader.rewind();
                    self.skipped += 4;
                }
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    fn sync(&mut self) -> io::Result<u32> {
        let mut window = self.reader.read_u32::<BigEndian>()?;
        let mut skipped = 0u64;
        while window != MOVIE_SIGNATURE {
            window = (window << 8) | self.reader.read_u8()? as u32;
            skipped += 1;
        }
        if skipped > 0 {
            log::warn!("movie out of sync, skipped {skipped} bytes");
            self.skipped += skipped;
        }
        Ok(window)
    }

    fn read_frame(&mut self) -> Result<MovieFrame, MovieError> {
        let signature = self.sync()?;
        self.reader.track();
        let header = FrameHeader {
            signature,
            index: self.reader.read_u32::<BigEndian>()?,
            size: self.reader.read_u16::<BigEndian>()?,
            flags: FrameFlags::from_bits(self.reader.read_u16::<BigEndian>()?),
        };
        let game_state = if header.flags.contains(FrameFlags::GAME_STATE) {
            Some(GameState::read(&mut self.reader, &self.layout)?)
        } else {
            None
        };
        let mobiles = if header.flags.contains(FrameFlags::MOBILE_DATA) {
            Some(read_mobile_table(&mut self.reader, &self.layout)?)
        } else {
            None
        };
        let pictures = if header.flags.contains(FrameFlags::PICTURE_TABLE) {
            Some(read_picture_table(&mut self.reader)?)
        } else {
            None
        };
        let mut payload = vec![0u8; header.size as usize];
        self.reader.read_exact(&mut payload)?;
        Ok(MovieFrame {
            header,
            game_state,
            mobiles,
            pictures,
            payload,
        })
    }
}

impl<R: Read> Iterator for MovieReader<R> {
    type Item = Result<MovieFrame, MovieError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

/// A fully read movie.
#[derive(Debug, Clone)]
pub struct Movie {
    pub header: MovieHeader,
    pub frames: Vec<MovieFrame>,
}

impl Movie {
    pub fn read(reader: impl Read) -> Result<Self, MovieError> {
        let mut reader = MovieReader::new(reader)?;
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame()? {
            frames.push(frame);
        }
        if frames.len() as u32 != reader.header().frame_count {
            log::info!(
                "movie header claims {} frames, read {}",
                reader.header().frame_count,
                frames.len()
            );
        }
        Ok(Self {
            header: *reader.header(),
            frames,
        })
    }
}

/// Writes a movie as frames arrive. Login blocks queue up and are written
/// in front of the next recorded frame.
pub struct MovieRecorder<W: Write + Seek> {
    writer: W,
    layout: MobileLayout,
    game_state: Option<GameState>,
    mobiles: Option<Vec<MobileEntry>>,
    pictures: Option<Vec<PictureRecord>>,
    frames: u32,
}

impl<W: Write + Seek> MovieRecorder<W> {
    pub fn new(writer: W, start_time: u32) -> Result<Self, MovieError> {
        Self::with_version(writer, start_time, MOVIE_VERSION)
    }

    pub fn with_version(mut writer: W, start_time: u32, version: u16) -> Result<Self, MovieError> {
        if version < MOVIE_MIN_VERSION {
            return Err(MovieError::VersionTooOld(version));
        }
        let header = MovieHeader {
            version,
            ..MovieHeader::new(start_time)
        };
        header.write(&mut writer)?;
        Ok(Self {
            writer,
            layout: MobileLayout::for_version(version as u32)?,
            game_state: None,
            mobiles: None,
            pictures: None,
            frames: 0,
        })
    }

    pub fn queue_game_state(&mut self, state: GameState) {
        self.game_state = Some(state);
    }

    /// Queues a game state carrying everything `world` currently shows, so
    /// a recording started mid-session plays back from the same picture.
    pub fn queue_world(&mut self, world: &World) {
        if world.is_initialized() {
            self.queue_game_state(world.login_state());
        }
    }

    pub fn queue_mobile_table(&mut self, entries: Vec<MobileEntry>) {
        self.mobiles = Some(entries);
    }

    pub fn queue_picture_table(&mut self, records: Vec<PictureRecord>) {
        self.pictures = Some(records);
    }

    pub fn frame_count(&self) -> u32 {
        self.frames
    }

    /// Records one draw-state body (the bytes after the tag).
    pub fn record(&mut self, payload: &[u8]) -> Result<(), MovieError> {
        self.write_frame(payload, FrameFlags::empty())
    }

    pub fn record_stale(&mut self, payload: &[u8]) -> Result<(), MovieError> {
        self.write_frame(payload, FrameFlags::STALE)
    }

    fn write_frame(&mut self, payload: &[u8], mut flags: FrameFlags) -> Result<(), MovieError> {
        let size = u16::try_from(payload.len())
            .map_err(|_| DecodeError::Malformed("movie payload larger than 64k"))?;
        let game_state = self.game_state.take();
        let mobiles = self.mobiles.take();
        let pictures = self.pictures.take();
        if game_state.is_some() {
            flags.insert(FrameFlags::GAME_STATE);
        }
        if mobiles.is_some() {
            flags.insert(FrameFlags::MOBILE_DATA);
        }
        if pictures.is_some() {
            flags.insert(FrameFlags::PICTURE_TABLE);
        }
        let mut buf = Vec::with_capacity(payload.len() + 12);
        FrameHeader {
            signature: MOVIE_SIGNATURE,
            index: self.frames,
            size,
            flags,
        }
        .write_to(&mut buf)?;
        if let Some(gs) = &game_state {
            gs.write(&mut buf, &self.layout)?;
        }
        if let Some(entries) = &mobiles {
            write_mobile_table(&mut buf, entries, &self.layout)?;
        }
        if let Some(records) = &pictures {
            write_picture_table(&mut buf, records)?;
        }
        buf.extend_from_slice(payload);
        self.writer.write_all(&buf)?;
        self.frames += 1;
        Ok(())
    }

    /// Patches the frame count into the header and hands back the writer.
    pub fn finish(mut self) -> Result<W, MovieError> {
        let end = self.writer.stream_position()?;
        self.writer.seek(SeekFrom::Start(FRAME_COUNT_OFFSET))?;
        self.writer.write_u32::<BigEndian>(self.frames)?;
        self.writer.seek(SeekFrom::Start(end))?;
        self.writer.flush()?;
        log::debug!("movie recorder wrote {} frames", self.frames);
        Ok(self.writer)
    }
}

/// Plays a movie through a [`World`], exactly as a live session would feed it.
pub struct MoviePlayer<R> {
    reader: MovieReader<R>,
    world: World,
    played: u32,
    last: Option<FrameHeader>,
}

impl<R: Read> MoviePlayer<R> {
    pub fn new(reader: MovieReader<R>, mut world: World) -> Self {
        world.begin();
        Self {
            reader,
            world,
            played: 0,
            last: None,
        }
    }

    pub fn open(source: R, catalog: std::sync::Arc<dyn ImageCatalog>) -> Result<Self, MovieError> {
        Ok(Self::new(MovieReader::new(source)?, World::new(catalog)))
    }

    pub fn header(&self) -> &MovieHeader {
        self.reader.header()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn frames_played(&self) -> u32 {
        self.played
    }

    /// Flags of the most recently played frame.
    pub fn last_flags(&self) -> Option<FrameFlags> {
        self.last.map(|h| h.flags)
    }

    /// Plays the next frame. Returns its header, or `None` at the end.
    pub fn step(&mut self, now: Instant) -> Result<Option<FrameHeader>, MovieError> {
        let Some(frame) = self.reader.next_frame()? else {
            return Ok(None);
        };
        for block in frame.blocks() {
            if let Err(e) = self.world.apply_frame(&block, now) {
                log::warn!("movie frame {}: {} rejected: {e}", frame.header.index, block.name());
            }
        }
        match frame.draw_state() {
            Ok(ds) => {
                if let Err(e) = self.world.apply_draw_state(&ds, now) {
                    log::warn!("movie frame {} rejected: {e}", frame.header.index);
                }
            }
            Err(e) => log::warn!("movie frame {} dropped: {e}", frame.header.index),
        }
        self.played += 1;
        self.last = Some(frame.header);
        Ok(Some(frame.header))
    }

    /// Plays every remaining frame and returns how many were played.
    pub fn play_to_end(&mut self, now: Instant) -> Result<u32, MovieError> {
        while self.step(now)?.is_some() {}
        Ok(self.played)
    }

    pub fn snapshot(&self, now: Instant, pres: &Presentation) -> WorldSnapshot {
        self.world.snapshot(now, pres)
    }
}
