//! The packed asset file format.
//!
//! Little-endian throughout:
//!
//! ```text
//! [header]
//!   magic u32            "jfd " as a FourCC
//!   version u32
//!   flags u32
//!   entry_count u32
//! [entry, repeated entry_count times]
//!   magic u32            "entr"
//!   total_entry_size u32 chunk header + filename + payload
//!   asset_type u32
//!   filename_size u32
//!   entry_data_size u32
//!   filename bytes       UTF-8, not NUL-terminated
//!   payload bytes        raw asset bytes (PNG, SPIR-V, TTF, WAV, material)
//! ```
//!
//! Both magics are validated on read; any mismatch invalidates the whole
//! file.

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

pub const fn fourcc(bytes: [u8; 4]) -> u32 {
    (bytes[0] as u32)
        | ((bytes[1] as u32) << 8)
        | ((bytes[2] as u32) << 16)
        | ((bytes[3] as u32) << 24)
}

pub const ARCHIVE_MAGIC: u32 = fourcc(*b"jfd ");
pub const ENTRY_MAGIC: u32 = fourcc(*b"entr");

/// Written as octal in the original tooling; the value on disk is 8.
pub const ARCHIVE_VERSION: u32 = 0o10;

/// Size of the fixed-width part of an entry.
pub const ENTRY_HEADER_SIZE: u32 = 20;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AssetType {
    Invalid = 0,
    Bitmap = 2,
    Shader = 3,
    Font = 4,
    Sound = 5,
    Material = 6,
}

pub const ASSET_TYPE_COUNT: usize = 7;

impl AssetType {
    pub fn from_u32(value: u32) -> Option<AssetType> {
        match value {
            2 => Some(AssetType::Bitmap),
            3 => Some(AssetType::Shader),
            4 => Some(AssetType::Font),
            5 => Some(AssetType::Sound),
            6 => Some(AssetType::Material),
            _ => None,
        }
    }

    /// The packer's extension map. Anything else is skipped.
    pub fn from_extension(extension: &str) -> AssetType {
        match extension {
            "ttf" => AssetType::Font,
            "wav" => AssetType::Sound,
            "png" => AssetType::Bitmap,
            "spv" => AssetType::Shader,
            _ => AssetType::Invalid,
        }
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Bad archive magic: expected {expected:#010x}, found {found:#010x}.")]
    BadMagic { expected: u32, found: u32 },
    #[error("Bad entry magic at entry {index}: found {found:#010x}.")]
    BadEntryMagic { index: u32, found: u32 },
    #[error("Entry {index} reports inconsistent sizes.")]
    BadEntrySize { index: u32 },
    #[error("Entry {index} has an unknown asset type {value}.")]
    UnknownAssetType { index: u32, value: u32 },
    #[error("Entry {index} has a non-UTF-8 filename.")]
    BadFilename { index: u32 },
    #[error("Archive is truncated.")]
    Truncated,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One entry's metadata; the payload stays in the archive's raw bytes and is
/// sliced out on demand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub asset_type: AssetType,
    pub data_offset: usize,
    pub data_size: usize,
}

/// A parsed archive. Owns the raw file bytes for the life of the catalog so
/// entry payloads can be handed out as slices without copying.
#[derive(Debug, Default)]
pub struct Archive {
    pub version: u32,
    pub flags: u32,
    pub entries: Vec<ArchiveEntry>,
    raw: Vec<u8>,
}

impl Archive {
    pub fn open(path: &Path) -> Result<Archive, ArchiveError> {
        Archive::read(fs::read(path)?)
    }

    pub fn read(raw: Vec<u8>) -> Result<Archive, ArchiveError> {
        let mut cursor = Cursor::new(raw.as_slice());

        let magic = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        if magic != ARCHIVE_MAGIC {
            return Err(ArchiveError::BadMagic {
                expected: ARCHIVE_MAGIC,
                found: magic,
            });
        }

        let version = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        if version != ARCHIVE_VERSION {
            log::warn!(
                "Archive version {} does not match the expected {}.",
                version,
                ARCHIVE_VERSION
            );
        }

        let flags = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let entry_count = cursor.read_u32::<LittleEndian>().map_err(truncated)?;

        let mut entries = Vec::with_capacity(entry_count as usize);
        for index in 0..entry_count {
            let magic = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
            if magic != ENTRY_MAGIC {
                return Err(ArchiveError::BadEntryMagic {
                    index,
                    found: magic,
                });
            }

            let total_entry_size = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
            let asset_type_value = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
            let filename_size = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
            let entry_data_size = cursor.read_u32::<LittleEndian>().map_err(truncated)?;

            if total_entry_size != ENTRY_HEADER_SIZE + filename_size + entry_data_size {
                return Err(ArchiveError::BadEntrySize { index });
            }

            let asset_type = AssetType::from_u32(asset_type_value).ok_or(
                ArchiveError::UnknownAssetType {
                    index,
                    value: asset_type_value,
                },
            )?;

            let mut filename = vec![0u8; filename_size as usize];
            cursor.read_exact(&mut filename).map_err(truncated)?;
            let name =
                String::from_utf8(filename).map_err(|_| ArchiveError::BadFilename { index })?;

            let data_offset = cursor.position() as usize;
            let data_size = entry_data_size as usize;
            if data_offset + data_size > raw.len() {
                return Err(ArchiveError::Truncated);
            }
            cursor.set_position((data_offset + data_size) as u64);

            entries.push(ArchiveEntry {
                name,
                asset_type,
                data_offset,
                data_size,
            });
        }

        Ok(Archive {
            version,
            flags,
            entries,
            raw,
        })
    }

    pub fn entry_data(&self, entry: &ArchiveEntry) -> &[u8] {
        &self.raw[entry.data_offset..entry.data_offset + entry.data_size]
    }
}

fn truncated(_: std::io::Error) -> ArchiveError {
    ArchiveError::Truncated
}

/// An entry queued for writing.
#[derive(Clone, Debug)]
pub struct PendingEntry {
    pub name: String,
    pub asset_type: AssetType,
    pub data: Vec<u8>,
}

/// Writes a complete archive. The inverse of [`Archive::read`] for any set of
/// non-empty entries with unique names.
pub fn write_archive<W: Write>(writer: &mut W, entries: &[PendingEntry]) -> Result<(), ArchiveError> {
    writer.write_u32::<LittleEndian>(ARCHIVE_MAGIC)?;
    writer.write_u32::<LittleEndian>(ARCHIVE_VERSION)?;
    writer.write_u32::<LittleEndian>(0)?;
    writer.write_u32::<LittleEndian>(entries.len() as u32)?;

    for entry in entries {
        let filename = entry.name.as_bytes();
        let total_entry_size = ENTRY_HEADER_SIZE + filename.len() as u32 + entry.data.len() as u32;

        writer.write_u32::<LittleEndian>(ENTRY_MAGIC)?;
        writer.write_u32::<LittleEndian>(total_entry_size)?;
        writer.write_u32::<LittleEndian>(entry.asset_type as u32)?;
        writer.write_u32::<LittleEndian>(filename.len() as u32)?;
        writer.write_u32::<LittleEndian>(entry.data.len() as u32)?;
        writer.write_all(filename)?;
        writer.write_all(&entry.data)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(name: &str, asset_type: AssetType, data: Vec<u8>) -> PendingEntry {
        PendingEntry {
            name: name.into(),
            asset_type,
            data,
        }
    }

    #[test]
    fn archive_round_trips() {
        let entries = vec![
            pending("a", AssetType::Bitmap, vec![1u8; 16]),
            pending("b", AssetType::Shader, vec![2u8; 1024]),
            pending("c", AssetType::Font, vec![3u8; 2048]),
            pending("d", AssetType::Sound, vec![4u8; 512]),
        ];

        let mut bytes = Vec::new();
        write_archive(&mut bytes, &entries).unwrap();

        let archive = Archive::read(bytes).unwrap();
        assert_eq!(archive.version, 8);
        assert_eq!(archive.entries.len(), 4);

        for (written, read) in entries.iter().zip(&archive.entries) {
            assert_eq!(written.name, read.name);
            assert_eq!(written.asset_type, read.asset_type);
            assert_eq!(written.data, archive.entry_data(read));
        }
    }

    #[test]
    fn header_layout_is_bit_exact() {
        let mut bytes = Vec::new();
        write_archive(
            &mut bytes,
            &[pending("x", AssetType::Material, vec![0xAB, 0xCD])],
        )
        .unwrap();

        // "jfd " little-endian, version 8 (written as 010 octal), flags,
        // entry count.
        assert_eq!(&bytes[0..4], b"jfd ");
        assert_eq!(&bytes[4..8], &8u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &0u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &1u32.to_le_bytes());

        assert_eq!(&bytes[16..20], b"entr");
        // 20 header bytes + 1 filename byte + 2 payload bytes.
        assert_eq!(&bytes[20..24], &23u32.to_le_bytes());
        assert_eq!(&bytes[24..28], &6u32.to_le_bytes());
        assert_eq!(&bytes[28..32], &1u32.to_le_bytes());
        assert_eq!(&bytes[32..36], &2u32.to_le_bytes());
        assert_eq!(&bytes[36..37], b"x");
        assert_eq!(&bytes[37..39], &[0xAB, 0xCD]);
    }

    #[test]
    fn empty_archives_load_successfully() {
        let mut bytes = Vec::new();
        write_archive(&mut bytes, &[]).unwrap();

        let archive = Archive::read(bytes).unwrap();
        assert!(archive.entries.is_empty());
    }

    #[test]
    fn bad_header_magic_invalidates_the_file() {
        let mut bytes = Vec::new();
        write_archive(&mut bytes, &[]).unwrap();
        bytes[0] = b'X';

        assert!(matches!(
            Archive::read(bytes),
            Err(ArchiveError::BadMagic { .. })
        ));
    }

    #[test]
    fn bad_entry_magic_invalidates_the_file() {
        let mut bytes = Vec::new();
        write_archive(&mut bytes, &[pending("a", AssetType::Bitmap, vec![1])]).unwrap();
        bytes[16] = b'X';

        assert!(matches!(
            Archive::read(bytes),
            Err(ArchiveError::BadEntryMagic { index: 0, .. })
        ));
    }

    #[test]
    fn truncated_payloads_are_rejected() {
        let mut bytes = Vec::new();
        write_archive(&mut bytes, &[pending("a", AssetType::Bitmap, vec![1u8; 64])]).unwrap();
        bytes.truncate(bytes.len() - 8);

        assert!(matches!(Archive::read(bytes), Err(ArchiveError::Truncated)));
    }

    #[test]
    fn extension_map_matches_the_packer_contract() {
        assert_eq!(AssetType::from_extension("ttf"), AssetType::Font);
        assert_eq!(AssetType::from_extension("wav"), AssetType::Sound);
        assert_eq!(AssetType::from_extension("png"), AssetType::Bitmap);
        assert_eq!(AssetType::from_extension("spv"), AssetType::Shader);
        assert_eq!(AssetType::from_extension("txt"), AssetType::Invalid);
    }
}
