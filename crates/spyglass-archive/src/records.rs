// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed-layout little-endian records of the container format.

pub(crate) const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4b50;
pub(crate) const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4b50;
pub(crate) const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;

/// Version 2.0: deflate.
pub(crate) const VERSION_NEEDED: u16 = 20;
/// Unix host, format version 2.0.
pub(crate) const VERSION_MADE_BY: u16 = (3 << 8) | 20;
/// General purpose bit 3: sizes and CRC follow the data.
pub(crate) const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// General purpose bit 11: names are UTF-8.
pub(crate) const FLAG_UTF8: u16 = 1 << 11;

fn u16_at(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn u32_at(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Header written before each entry's data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name_len: u16,
    pub extra_len: u16,
}

impl LocalFileHeader {
    pub const SIZE: usize = 30;

    pub fn encode(&self, name: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + name.len());
        out.extend_from_slice(&LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.method.to_le_bytes());
        out.extend_from_slice(&self.mod_time.to_le_bytes());
        out.extend_from_slice(&self.mod_date.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        out.extend_from_slice(&self.name_len.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name);
        out
    }

    /// Parses the fixed part. `None` when the signature does not match.
    pub fn decode(buf: &[u8; Self::SIZE]) -> Option<Self> {
        if u32_at(buf, 0) != LOCAL_FILE_HEADER_SIGNATURE {
            return None;
        }
        Some(Self {
            version_needed: u16_at(buf, 4),
            flags: u16_at(buf, 6),
            method: u16_at(buf, 8),
            mod_time: u16_at(buf, 10),
            mod_date: u16_at(buf, 12),
            crc32: u32_at(buf, 14),
            compressed_size: u32_at(buf, 18),
            uncompressed_size: u32_at(buf, 22),
            name_len: u16_at(buf, 26),
            extra_len: u16_at(buf, 28),
        })
    }
}

/// One central directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CentralDirectoryRecord {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number_start: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub local_header_offset: u32,
    pub name: Vec<u8>,
}

impl CentralDirectoryRecord {
    pub const SIZE: usize = 46;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + self.name.len());
        out.extend_from_slice(&CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.version_made_by.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.method.to_le_bytes());
        out.extend_from_slice(&self.mod_time.to_le_bytes());
        out.extend_from_slice(&self.mod_date.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        out.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra length
        out.extend_from_slice(&0u16.to_le_bytes()); // comment length
        out.extend_from_slice(&self.disk_number_start.to_le_bytes());
        out.extend_from_slice(&self.internal_attributes.to_le_bytes());
        out.extend_from_slice(&self.external_attributes.to_le_bytes());
        out.extend_from_slice(&self.local_header_offset.to_le_bytes());
        out.extend_from_slice(&self.name);
        out
    }

    /// Parses one record from the start of `buf`, returning it and the
    /// number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Option<(Self, usize)> {
        if buf.len() < Self::SIZE || u32_at(buf, 0) != CENTRAL_DIRECTORY_SIGNATURE {
            return None;
        }
        let name_len = usize::from(u16_at(buf, 28));
        let extra_len = usize::from(u16_at(buf, 30));
        let comment_len = usize::from(u16_at(buf, 32));
        let total = Self::SIZE + name_len + extra_len + comment_len;
        if buf.len() < total {
            return None;
        }
        let record = Self {
            version_made_by: u16_at(buf, 4),
            version_needed: u16_at(buf, 6),
            flags: u16_at(buf, 8),
            method: u16_at(buf, 10),
            mod_time: u16_at(buf, 12),
            mod_date: u16_at(buf, 14),
            crc32: u32_at(buf, 16),
            compressed_size: u32_at(buf, 20),
            uncompressed_size: u32_at(buf, 24),
            disk_number_start: u16_at(buf, 34),
            internal_attributes: u16_at(buf, 36),
            external_attributes: u32_at(buf, 38),
            local_header_offset: u32_at(buf, 42),
            name: buf[Self::SIZE..Self::SIZE + name_len].to_vec(),
        };
        Some((record, total))
    }
}

/// The record terminating the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub directory_disk: u16,
    pub entries_on_disk: u16,
    pub total_entries: u16,
    pub directory_size: u32,
    pub directory_offset: u32,
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub const SIZE: usize = 22;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + self.comment.len());
        out.extend_from_slice(&END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.disk_number.to_le_bytes());
        out.extend_from_slice(&self.directory_disk.to_le_bytes());
        out.extend_from_slice(&self.entries_on_disk.to_le_bytes());
        out.extend_from_slice(&self.total_entries.to_le_bytes());
        out.extend_from_slice(&self.directory_size.to_le_bytes());
        out.extend_from_slice(&self.directory_offset.to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.comment);
        out
    }

    /// Parses a record starting at `buf[0]`. The comment is truncated to the
    /// bytes available, since trailing data may follow the record.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE || u32_at(buf, 0) != END_OF_CENTRAL_DIRECTORY_SIGNATURE {
            return None;
        }
        let comment_len = usize::from(u16_at(buf, 20));
        let comment_end = (Self::SIZE + comment_len).min(buf.len());
        Some(Self {
            disk_number: u16_at(buf, 4),
            directory_disk: u16_at(buf, 6),
            entries_on_disk: u16_at(buf, 8),
            total_entries: u16_at(buf, 10),
            directory_size: u32_at(buf, 12),
            directory_offset: u32_at(buf, 16),
            comment: buf[Self::SIZE..comment_end].to_vec(),
        })
    }

    /// Finds the last record whose signature appears in `tail`, scanning
    /// backwards. Returns the record and its offset within `tail`.
    pub fn find_in(tail: &[u8]) -> Option<(Self, usize)> {
        if tail.len() < Self::SIZE {
            return None;
        }
        let signature = END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes();
        (0..=tail.len() - Self::SIZE)
            .rev()
            .filter(|&pos| tail[pos..pos + 4] == signature)
            .find_map(|pos| Self::decode(&tail[pos..]).map(|record| (record, pos)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_header_layout() {
        let header = LocalFileHeader {
            version_needed: VERSION_NEEDED,
            flags: FLAG_UTF8,
            method: 8,
            mod_time: 1,
            mod_date: 2,
            crc32: 0xdead_beef,
            compressed_size: 10,
            uncompressed_size: 20,
            name_len: 3,
            extra_len: 0,
        };
        let bytes = header.encode(b"a/b");
        assert_eq!(bytes.len(), LocalFileHeader::SIZE + 3);
        assert_eq!(&bytes[..4], &[0x50, 0x4b, 0x03, 0x04]);
        let fixed: [u8; LocalFileHeader::SIZE] = bytes[..LocalFileHeader::SIZE].try_into().unwrap();
        assert_eq!(LocalFileHeader::decode(&fixed), Some(header));
    }

    #[test]
    fn central_record_roundtrip() {
        let record = CentralDirectoryRecord {
            version_made_by: VERSION_MADE_BY,
            version_needed: VERSION_NEEDED,
            flags: FLAG_UTF8,
            method: 0,
            mod_time: 0,
            mod_date: 33,
            crc32: 7,
            compressed_size: 5,
            uncompressed_size: 5,
            disk_number_start: 0,
            internal_attributes: 0,
            external_attributes: 0o100644 << 16,
            local_header_offset: 99,
            name: b"logs.sqlite".to_vec(),
        };
        let bytes = record.encode();
        let (decoded, consumed) = CentralDirectoryRecord::decode(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn end_record_found_before_trailing_bytes() {
        let record = EndOfCentralDirectory {
            disk_number: 0,
            directory_disk: 0,
            entries_on_disk: 2,
            total_entries: 2,
            directory_size: 100,
            directory_offset: 200,
            comment: b"hi".to_vec(),
        };
        let mut tail = vec![0u8; 17];
        tail.extend(record.encode());
        tail.extend_from_slice(b"trailing garbage");
        let (found, pos) = EndOfCentralDirectory::find_in(&tail).unwrap();
        assert_eq!(pos, 17);
        assert_eq!(found, record);
    }

    #[test]
    fn end_record_missing() {
        assert!(EndOfCentralDirectory::find_in(&[0u8; 64]).is_none());
        assert!(EndOfCentralDirectory::find_in(&[0u8; 4]).is_none());
    }
}
