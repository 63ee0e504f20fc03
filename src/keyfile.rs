//! The resource map at the front of the image and sound key files. Only
//! the version record is read here; the archives themselves belong to the
//! image and audio collaborators.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bytes::Bytes;

const MAP_MAGIC: u16 = 0xFFFF;
const MAP_RESERVED: usize = 6;

/// `'Vers'`
pub const TYPE_VERSION: u32 = 0x5665_7273;

#[derive(thiserror::Error, Debug)]
pub enum KeyFileError {
    #[error("key file i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("not a key file (map header {0:#06x})")]
    NotAKeyFile(u16),
    #[error("key file has no resource {kind:#010x}/{id}")]
    Missing { kind: u32, id: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceEntry {
    pub offset: u32,
    pub size: u32,
    pub kind: u32,
    pub id: u32,
}

impl Bytes for ResourceEntry {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        writer.write_u32::<BigEndian>(self.offset)?;
        writer.write_u32::<BigEndian>(self.size)?;
        writer.write_u32::<BigEndian>(self.kind)?;
        writer.write_u32::<BigEndian>(self.id)
    }

    fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        Ok(Self {
            offset: reader.read_u32::<BigEndian>()?,
            size: reader.read_u32::<BigEndian>()?,
            kind: reader.read_u32::<BigEndian>()?,
            id: reader.read_u32::<BigEndian>()?,
        })
    }
}

pub struct KeyFile<R> {
    reader: R,
    entries: Vec<ResourceEntry>,
}

impl<R: Read + Seek> KeyFile<R> {
    pub fn open(mut reader: R) -> Result<Self, KeyFileError> {
        reader.seek(SeekFrom::Start(0))?;
        let magic = reader.read_u16::<BigEndian>()?;
        if magic != MAP_MAGIC {
            return Err(KeyFileError::NotAKeyFile(magic));
        }
        let count = reader.read_u32::<BigEndian>()?;
        let mut reserved = [0u8; MAP_RESERVED];
        reader.read_exact(&mut reserved)?;
        let entries = (0..count)
            .map(|_| ResourceEntry::read_from(&mut reader))
            .collect::<io::Result<Vec<_>>>()?;
        log::trace!("key file map has {count} entries");
        Ok(Self { reader, entries })
    }

    pub fn entries(&self) -> &[ResourceEntry] {
        &self.entries
    }

    pub fn find(&self, kind: u32, id: u32) -> Option<&ResourceEntry> {
        self.entries.iter().find(|e| e.kind == kind && e.id == id)
    }

    pub fn read(&mut self, kind: u32, id: u32) -> Result<Vec<u8>, KeyFileError> {
        let entry = *self
            .find(kind, id)
            .ok_or(KeyFileError::Missing { kind, id })?;
        self.reader.seek(SeekFrom::Start(entry.offset as u64))?;
        let mut data = vec![0u8; entry.size as usize];
        self.reader.read_exact(&mut data)?;
        Ok(data)
    }

    /// The archive version. Old archives stored a single byte, which is
    /// shifted into the major position.
    pub fn version(&mut self) -> Result<u32, KeyFileError> {
        let data = self.read(TYPE_VERSION, 0)?;
        let raw = (&data[..]).read_u32::<BigEndian>()?;
        Ok(if raw <= 0xFF { raw << 8 } else { raw })
    }
}

pub fn read_key_file_version(path: impl AsRef<Path>) -> Result<u32, KeyFileError> {
    let file = File::open(path.as_ref())?;
    KeyFile::open(BufReader::new(file))?.version()
}
