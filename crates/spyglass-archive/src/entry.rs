// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Archive entry metadata.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// How an entry's bytes are encoded in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    /// Bytes stored verbatim (method 0).
    Stored,
    /// Raw deflate stream (method 8).
    Deflate,
}

impl CompressionMethod {
    pub(crate) fn code(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
        }
    }

    pub(crate) fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(CompressionMethod::Stored),
            8 => Some(CompressionMethod::Deflate),
            _ => None,
        }
    }
}

/// One entry as described by the central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub(crate) path: String,
    /// Name exactly as stored, which need not be UTF-8.
    pub(crate) name: Vec<u8>,
    pub(crate) method: CompressionMethod,
    pub(crate) crc32: u32,
    pub(crate) compressed_size: u64,
    pub(crate) uncompressed_size: u64,
    /// Absolute file offset of the local header.
    pub(crate) header_offset: u64,
    pub(crate) dos_time: u16,
    pub(crate) dos_date: u16,
}

impl Entry {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn raw_name(&self) -> &[u8] {
        &self.name
    }

    pub fn method(&self) -> CompressionMethod {
        self.method
    }

    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    pub fn is_directory(&self) -> bool {
        self.path.ends_with('/')
    }

    /// Modification time, at the two-second resolution the format keeps.
    pub fn modified(&self) -> Option<NaiveDateTime> {
        from_dos(self.dos_time, self.dos_date)
    }
}

/// Encodes a timestamp as DOS `(time, date)`. Dates before 1980 clamp to 1980-01-01.
pub(crate) fn to_dos(dt: NaiveDateTime) -> (u16, u16) {
    if dt.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    let time = ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
    let date =
        (((dt.year() - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
    (time, date)
}

pub(crate) fn from_dos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let year = 1980 + i32::from(date >> 9);
    let month = u32::from((date >> 5) & 0x0f);
    let day = u32::from(date & 0x1f);
    let hour = u32::from(time >> 11);
    let minute = u32::from((time >> 5) & 0x3f);
    let second = u32::from(time & 0x1f) * 2;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dos_time_roundtrip_at_two_second_resolution() {
        let dt = NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_opt(15, 9, 27)
            .unwrap();
        let (time, date) = to_dos(dt);
        let back = from_dos(time, date).unwrap();
        assert_eq!(back, dt.with_second(26).unwrap());
    }

    #[test]
    fn dos_time_clamps_old_dates() {
        let dt = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let (time, date) = to_dos(dt);
        assert_eq!(
            from_dos(time, date).unwrap().date(),
            NaiveDate::from_ymd_opt(1980, 1, 1).unwrap()
        );
    }

    #[test]
    fn method_codes() {
        assert_eq!(CompressionMethod::from_code(0), Some(CompressionMethod::Stored));
        assert_eq!(CompressionMethod::from_code(8), Some(CompressionMethod::Deflate));
        assert_eq!(CompressionMethod::from_code(12), None);
        assert_eq!(CompressionMethod::Deflate.code(), 8);
    }
}
