// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Archive reading and writing.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use flate2::{Compression, Crc};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use spyglass_core::SpyglassError;
use tracing::{debug, warn};

use crate::entry::{CompressionMethod, Entry, to_dos};
use crate::records::{
    CentralDirectoryRecord, EndOfCentralDirectory, FLAG_DATA_DESCRIPTOR, FLAG_UTF8,
    LocalFileHeader, VERSION_MADE_BY, VERSION_NEEDED,
};

/// Chunk size used when streaming entry data.
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Largest trailing window searched for the end-of-central-directory record:
/// the fixed record plus a maximal comment, with some slack.
const END_RECORD_SEARCH_WINDOW: u64 = 66_000;

/// Upper bound on the output buffer reserved from a recorded entry size.
const MAX_PREALLOCATION: u64 = 8 * 1024 * 1024;

/// How an [`Archive`] was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Existing archive, read only.
    Read,
    /// New archive; the destination must not exist.
    Create,
    /// Existing archive; new entries are appended.
    Update,
}

/// An open archive. Owns its file handle until [`Archive::close`] or drop.
pub struct Archive {
    path: PathBuf,
    file: File,
    mode: AccessMode,
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    comment: Vec<u8>,
    /// Where the next entry (or the directory, on close) is written.
    write_offset: u64,
    dirty: bool,
    closed: bool,
}

fn unreadable(e: io::Error) -> SpyglassError {
    SpyglassError::UnreadableArchive(e.to_string())
}

fn unwritable(e: io::Error) -> SpyglassError {
    SpyglassError::UnwritableArchive(e.to_string())
}

fn fits_u32(value: u64, what: &str) -> Result<u32, SpyglassError> {
    u32::try_from(value)
        .map_err(|_| SpyglassError::UnwritableArchive(format!("{what} exceeds 4 GiB")))
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

/// A byte range of the archive file read with positional reads, so shared
/// readers never move each other's file cursor.
struct FileRange<'a> {
    file: &'a File,
    pos: u64,
    end: u64,
}

impl<'a> FileRange<'a> {
    fn new(file: &'a File, start: u64, len: u64) -> Self {
        Self {
            file,
            pos: start,
            end: start.saturating_add(len),
        }
    }
}

impl Read for FileRange<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.end.saturating_sub(self.pos);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = read_at(self.file, &mut buf[..len], self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

/// Counts bytes passed through to the inner writer.
struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Archive {
    /// Opens an archive in the given mode.
    pub fn open(path: impl AsRef<Path>, mode: AccessMode) -> Result<Self, SpyglassError> {
        let path = path.as_ref().to_path_buf();
        match mode {
            AccessMode::Read => {
                let file = File::open(&path).map_err(unreadable)?;
                Self::load(path, file, mode)
            }
            AccessMode::Update => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(&path)
                    .map_err(unwritable)?;
                Self::load(path, file, mode)
            }
            AccessMode::Create => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .map_err(|e| match e.kind() {
                        io::ErrorKind::AlreadyExists => SpyglassError::UnwritableArchive(format!(
                            "destination {} already exists",
                            path.display()
                        )),
                        _ => unwritable(e),
                    })?;
                debug!(path = %path.display(), "archive created");
                Ok(Self {
                    path,
                    file,
                    mode,
                    entries: Vec::new(),
                    index: HashMap::new(),
                    comment: Vec::new(),
                    write_offset: 0,
                    dirty: true,
                    closed: false,
                })
            }
        }
    }

    /// Creates a new archive at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SpyglassError> {
        Self::open(path, AccessMode::Create)
    }

    /// Reads the central directory without touching entry bodies.
    fn load(path: PathBuf, mut file: File, mode: AccessMode) -> Result<Self, SpyglassError> {
        let file_len = file.metadata().map_err(unreadable)?.len();
        let window = file_len.min(END_RECORD_SEARCH_WINDOW);
        let tail_start = file_len - window;
        let mut tail = vec![0u8; window as usize];
        file.seek(SeekFrom::Start(tail_start)).map_err(unreadable)?;
        file.read_exact(&mut tail).map_err(unreadable)?;

        let (end, pos_in_tail) =
            EndOfCentralDirectory::find_in(&tail).ok_or(SpyglassError::NotAnArchive)?;
        let end_offset = tail_start + pos_in_tail as u64;

        if end.total_entries == u16::MAX || end.directory_offset == u32::MAX {
            return Err(SpyglassError::UnreadableArchive(
                "zip64 archives are not supported".into(),
            ));
        }

        let directory_size = u64::from(end.directory_size);
        let directory_end = u64::from(end.directory_offset) + directory_size;
        if directory_end > end_offset {
            return Err(SpyglassError::UnreadableArchive(
                "central directory overlaps the end record".into(),
            ));
        }
        // Bytes prepended to the archive shift every recorded offset.
        let base = end_offset - directory_end;
        let directory_start = base + u64::from(end.directory_offset);

        let mut directory = vec![0u8; directory_size as usize];
        file.seek(SeekFrom::Start(directory_start))
            .map_err(unreadable)?;
        file.read_exact(&mut directory).map_err(unreadable)?;

        let mut entries = Vec::with_capacity(usize::from(end.total_entries));
        let mut index = HashMap::new();
        let mut cursor = 0usize;
        for _ in 0..end.total_entries {
            let (record, consumed) = CentralDirectoryRecord::decode(&directory[cursor..])
                .ok_or_else(|| {
                    SpyglassError::UnreadableArchive(format!(
                        "malformed central directory record at offset {}",
                        directory_start + cursor as u64
                    ))
                })?;
            cursor += consumed;

            // Lookups go by the lossy name; extraction compares raw bytes.
            let path = String::from_utf8_lossy(&record.name).into_owned();
            let method = CompressionMethod::from_code(record.method).ok_or_else(|| {
                SpyglassError::CorruptedEntry { path: path.clone() }
            })?;
            index.entry(path.clone()).or_insert(entries.len());
            entries.push(Entry {
                path,
                name: record.name,
                method,
                crc32: record.crc32,
                compressed_size: u64::from(record.compressed_size),
                uncompressed_size: u64::from(record.uncompressed_size),
                header_offset: base + u64::from(record.local_header_offset),
                dos_time: record.mod_time,
                dos_date: record.mod_date,
            });
        }

        debug!(
            path = %path.display(),
            entries = entries.len(),
            "archive directory loaded"
        );
        Ok(Self {
            path,
            file,
            mode,
            entries,
            index,
            comment: end.comment,
            write_offset: directory_start,
            dirty: false,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Entries in directory order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// The first entry named `path`.
    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.index.get(path).map(|&i| &self.entries[i])
    }

    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// Sets the archive comment written on close.
    pub fn set_comment(&mut self, comment: impl Into<Vec<u8>>) -> Result<(), SpyglassError> {
        self.ensure_writable()?;
        let comment = comment.into();
        if comment.len() > usize::from(u16::MAX) {
            return Err(SpyglassError::InvalidArgument(
                "archive comment longer than 65535 bytes".into(),
            ));
        }
        self.comment = comment;
        self.dirty = true;
        Ok(())
    }

    /// Reads and verifies an entry's full contents.
    pub fn read(&self, entry: &Entry) -> Result<Vec<u8>, SpyglassError> {
        let capacity = entry
            .uncompressed_size
            .min(entry.compressed_size.saturating_mul(4))
            .min(MAX_PREALLOCATION);
        let mut out = Vec::with_capacity(capacity as usize);
        self.extract(entry, &mut out, DEFAULT_BUFFER_SIZE)?;
        Ok(out)
    }

    /// Reads and verifies the first entry named `path`, if present.
    pub fn read_path(&self, path: &str) -> Result<Option<Vec<u8>>, SpyglassError> {
        match self.get(path) {
            Some(entry) => self.read(entry).map(Some),
            None => Ok(None),
        }
    }

    /// Streams an entry's uncompressed bytes into `writer` in `buffer_size`
    /// chunks, returning the verified CRC-32.
    ///
    /// The local header is checked against the directory record and the
    /// CRC-32 and size of the decoded bytes against the stored values; any
    /// mismatch is reported as [`SpyglassError::CorruptedEntry`]. Bytes may
    /// already have been written to `writer` when that happens.
    ///
    /// Reads are positional, so one archive can be read from several
    /// threads at once.
    pub fn extract<W: Write>(
        &self,
        entry: &Entry,
        mut writer: W,
        buffer_size: usize,
    ) -> Result<u32, SpyglassError> {
        if buffer_size == 0 {
            return Err(SpyglassError::InvalidBufferSize(buffer_size));
        }
        let corrupted = || SpyglassError::CorruptedEntry {
            path: entry.path.clone(),
        };

        let file_len = self.file.metadata().map_err(unreadable)?.len();
        let mut fixed = [0u8; LocalFileHeader::SIZE];
        FileRange::new(&self.file, entry.header_offset, LocalFileHeader::SIZE as u64)
            .read_exact(&mut fixed)
            .map_err(unreadable)?;
        let header = LocalFileHeader::decode(&fixed).ok_or_else(corrupted)?;

        let mut name = vec![0u8; usize::from(header.name_len)];
        FileRange::new(
            &self.file,
            entry.header_offset + LocalFileHeader::SIZE as u64,
            name.len() as u64,
        )
        .read_exact(&mut name)
        .map_err(unreadable)?;
        if name != entry.name || header.method != entry.method.code() {
            return Err(corrupted());
        }
        // Sizes and CRC live in a trailing descriptor when bit 3 is set.
        if header.flags & FLAG_DATA_DESCRIPTOR == 0
            && (header.crc32 != entry.crc32
                || u64::from(header.compressed_size) != entry.compressed_size
                || u64::from(header.uncompressed_size) != entry.uncompressed_size)
        {
            warn!(path = %entry.path, "local header disagrees with the central directory");
            return Err(corrupted());
        }
        let data_start = entry.header_offset
            + LocalFileHeader::SIZE as u64
            + u64::from(header.name_len)
            + u64::from(header.extra_len);
        if data_start + entry.compressed_size > file_len {
            return Err(SpyglassError::UnreadableArchive(format!(
                "entry `{}` extends past the end of the file",
                entry.path
            )));
        }

        let raw = FileRange::new(&self.file, data_start, entry.compressed_size);
        let mut source: Box<dyn Read + '_> = match entry.method {
            CompressionMethod::Stored => Box::new(raw),
            CompressionMethod::Deflate => Box::new(DeflateDecoder::new(raw)),
        };

        let mut hasher = Crc::new();
        let mut total = 0u64;
        let mut buf = vec![0u8; buffer_size];
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return Err(corrupted()),
            };
            hasher.update(&buf[..n]);
            total += n as u64;
            if total > entry.uncompressed_size {
                return Err(corrupted());
            }
            writer.write_all(&buf[..n])?;
        }

        let crc = hasher.sum();
        if total != entry.uncompressed_size || crc != entry.crc32 {
            warn!(path = %entry.path, "archive entry failed verification");
            return Err(corrupted());
        }
        Ok(crc)
    }

    /// Adds an entry from an in-memory buffer.
    pub fn add_bytes(
        &mut self,
        path: &str,
        data: &[u8],
        method: CompressionMethod,
    ) -> Result<&Entry, SpyglassError> {
        self.add_entry(path, Cursor::new(data), method, DEFAULT_BUFFER_SIZE)
    }

    /// Adds an entry by streaming `reader` in `buffer_size` chunks.
    ///
    /// The local header is written first with placeholder sizes and patched
    /// once the data has been written.
    pub fn add_entry<R: Read>(
        &mut self,
        path: &str,
        mut reader: R,
        method: CompressionMethod,
        buffer_size: usize,
    ) -> Result<&Entry, SpyglassError> {
        self.ensure_writable()?;
        if buffer_size == 0 {
            return Err(SpyglassError::InvalidBufferSize(buffer_size));
        }
        if path.is_empty() || path.len() > usize::from(u16::MAX) {
            return Err(SpyglassError::InvalidArgument(format!(
                "invalid entry path `{path}`"
            )));
        }

        let header_offset = self.write_offset;
        fits_u32(header_offset, "archive size")?;
        let (dos_time, dos_date) = to_dos(Utc::now().naive_utc());
        let name = path.as_bytes();
        let mut header = LocalFileHeader {
            version_needed: VERSION_NEEDED,
            flags: FLAG_UTF8,
            method: method.code(),
            mod_time: dos_time,
            mod_date: dos_date,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            name_len: name.len() as u16,
            extra_len: 0,
        };

        self.file
            .seek(SeekFrom::Start(header_offset))
            .map_err(unwritable)?;
        self.file
            .write_all(&header.encode(name))
            .map_err(unwritable)?;

        let mut hasher = Crc::new();
        let mut uncompressed = 0u64;
        let mut buf = vec![0u8; buffer_size];
        let mut sink = CountingWriter {
            inner: &mut self.file,
            count: 0,
        };
        let compressed = match method {
            CompressionMethod::Stored => {
                loop {
                    let n = match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    };
                    hasher.update(&buf[..n]);
                    uncompressed += n as u64;
                    sink.write_all(&buf[..n]).map_err(unwritable)?;
                }
                sink.count
            }
            CompressionMethod::Deflate => {
                let mut encoder = DeflateEncoder::new(&mut sink, Compression::default());
                loop {
                    let n = match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    };
                    hasher.update(&buf[..n]);
                    uncompressed += n as u64;
                    encoder.write_all(&buf[..n]).map_err(unwritable)?;
                }
                encoder.finish().map_err(unwritable)?;
                sink.count
            }
        };

        header.crc32 = hasher.sum();
        header.compressed_size = fits_u32(compressed, "entry size")?;
        header.uncompressed_size = fits_u32(uncompressed, "entry size")?;
        let data_end = header_offset + (LocalFileHeader::SIZE + name.len()) as u64 + compressed;

        self.file
            .seek(SeekFrom::Start(header_offset))
            .map_err(unwritable)?;
        self.file
            .write_all(&header.encode(name))
            .map_err(unwritable)?;
        self.write_offset = data_end;
        self.dirty = true;

        let entry = Entry {
            path: path.to_string(),
            name: name.to_vec(),
            method,
            crc32: header.crc32,
            compressed_size: compressed,
            uncompressed_size: uncompressed,
            header_offset,
            dos_time,
            dos_date,
        };
        let position = self.entries.len();
        self.index.entry(entry.path.clone()).or_insert(position);
        self.entries.push(entry);
        Ok(&self.entries[position])
    }

    /// Writes the central directory and end record (when anything changed)
    /// and releases the file.
    pub fn close(mut self) -> Result<(), SpyglassError> {
        self.finalize()
    }

    fn ensure_writable(&self) -> Result<(), SpyglassError> {
        match self.mode {
            AccessMode::Read => Err(SpyglassError::UnwritableArchive(format!(
                "{} was opened read-only",
                self.path.display()
            ))),
            _ if self.closed => Err(SpyglassError::UnwritableArchive(
                "archive already closed".into(),
            )),
            _ => Ok(()),
        }
    }

    fn finalize(&mut self) -> Result<(), SpyglassError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.mode == AccessMode::Read || !self.dirty {
            return Ok(());
        }
        if self.entries.len() >= usize::from(u16::MAX) {
            return Err(SpyglassError::UnwritableArchive(
                "too many entries for a non-zip64 archive".into(),
            ));
        }

        let directory_offset = self.write_offset;
        let mut directory = Vec::new();
        for entry in &self.entries {
            let record = CentralDirectoryRecord {
                version_made_by: VERSION_MADE_BY,
                version_needed: VERSION_NEEDED,
                flags: FLAG_UTF8,
                method: entry.method.code(),
                mod_time: entry.dos_time,
                mod_date: entry.dos_date,
                crc32: entry.crc32,
                compressed_size: fits_u32(entry.compressed_size, "entry size")?,
                uncompressed_size: fits_u32(entry.uncompressed_size, "entry size")?,
                disk_number_start: 0,
                internal_attributes: 0,
                external_attributes: 0o100644 << 16,
                local_header_offset: fits_u32(entry.header_offset, "archive size")?,
                name: entry.name.clone(),
            };
            directory.extend(record.encode());
        }
        let end = EndOfCentralDirectory {
            disk_number: 0,
            directory_disk: 0,
            entries_on_disk: self.entries.len() as u16,
            total_entries: self.entries.len() as u16,
            directory_size: fits_u32(directory.len() as u64, "central directory")?,
            directory_offset: fits_u32(directory_offset, "archive size")?,
            comment: self.comment.clone(),
        };
        directory.extend(end.encode());

        self.file
            .seek(SeekFrom::Start(directory_offset))
            .map_err(unwritable)?;
        self.file.write_all(&directory).map_err(unwritable)?;
        self.file
            .set_len(directory_offset + directory.len() as u64)
            .map_err(unwritable)?;
        self.file.sync_all().map_err(unwritable)?;
        debug!(
            path = %self.path.display(),
            entries = self.entries.len(),
            "archive directory written"
        );
        Ok(())
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            warn!(path = %self.path.display(), error = %e, "failed to finalize archive on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn write_then_read_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pulse");

        let mut archive = Archive::create(&path).unwrap();
        archive
            .add_bytes("info.json", br#"{"version":"3.6.0"}"#, CompressionMethod::Deflate)
            .unwrap();
        archive
            .add_bytes("blobs/empty", b"", CompressionMethod::Stored)
            .unwrap();
        archive.close().unwrap();

        let archive = Archive::open(&path, AccessMode::Read).unwrap();
        assert_eq!(archive.entries().len(), 2);
        assert_eq!(
            archive.read_path("info.json").unwrap().unwrap(),
            br#"{"version":"3.6.0"}"#
        );
        assert_eq!(archive.read_path("blobs/empty").unwrap().unwrap(), b"");
        assert!(archive.read_path("missing").unwrap().is_none());
    }

    #[test]
    fn create_refuses_existing_destination() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exists.zip");
        std::fs::write(&path, b"x").unwrap();
        let result = Archive::create(&path);
        assert!(matches!(result, Err(SpyglassError::UnwritableArchive(_))));
    }

    #[test]
    fn read_mode_refuses_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.zip");
        Archive::create(&path).unwrap().close().unwrap();

        let mut archive = Archive::open(&path, AccessMode::Read).unwrap();
        let result = archive.add_bytes("a", b"a", CompressionMethod::Stored);
        assert!(matches!(result, Err(SpyglassError::UnwritableArchive(_))));
    }

    #[test]
    fn empty_archive_is_valid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.zip");
        Archive::create(&path).unwrap().close().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 22);
        let archive = Archive::open(&path, AccessMode::Read).unwrap();
        assert!(archive.entries().is_empty());
    }

    #[test]
    fn non_archive_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, vec![b'a'; 1000]).unwrap();
        assert!(matches!(
            Archive::open(&path, AccessMode::Read),
            Err(SpyglassError::NotAnArchive)
        ));
    }

    #[test]
    fn missing_file_is_unreadable() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Archive::open(dir.path().join("nope.zip"), AccessMode::Read),
            Err(SpyglassError::UnreadableArchive(_))
        ));
    }

    #[test]
    fn flipped_data_byte_reports_corrupted_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.zip");
        let payload = sample(4096);
        let mut archive = Archive::create(&path).unwrap();
        archive
            .add_bytes("data.bin", &payload, CompressionMethod::Stored)
            .unwrap();
        archive
            .add_bytes("other.bin", b"intact", CompressionMethod::Stored)
            .unwrap();
        archive.close().unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let data_offset = LocalFileHeader::SIZE + "data.bin".len() + 100;
        bytes[data_offset] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let archive = Archive::open(&path, AccessMode::Read).unwrap();
        let entry = archive.get("data.bin").unwrap().clone();
        assert!(matches!(
            archive.read(&entry),
            Err(SpyglassError::CorruptedEntry { path }) if path == "data.bin"
        ));
        // Other entries remain readable.
        assert_eq!(archive.read_path("other.bin").unwrap().unwrap(), b"intact");
    }

    #[test]
    fn zero_buffer_size_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("buf.zip");
        let mut archive = Archive::create(&path).unwrap();
        let result = archive.add_entry("a", Cursor::new(b"a"), CompressionMethod::Stored, 0);
        assert!(matches!(result, Err(SpyglassError::InvalidBufferSize(0))));
        archive.add_bytes("a", b"a", CompressionMethod::Stored).unwrap();
        archive.close().unwrap();

        let archive = Archive::open(&path, AccessMode::Read).unwrap();
        let entry = archive.get("a").unwrap().clone();
        assert!(matches!(
            archive.extract(&entry, Vec::new(), 0),
            Err(SpyglassError::InvalidBufferSize(0))
        ));
    }

    #[test]
    fn duplicate_names_resolve_to_first() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dup.zip");
        let mut archive = Archive::create(&path).unwrap();
        archive.add_bytes("same", b"first", CompressionMethod::Stored).unwrap();
        archive.add_bytes("same", b"second", CompressionMethod::Deflate).unwrap();
        archive.close().unwrap();

        let archive = Archive::open(&path, AccessMode::Read).unwrap();
        assert_eq!(archive.entries().len(), 2);
        assert_eq!(archive.read_path("same").unwrap().unwrap(), b"first");
    }

    #[test]
    fn update_appends_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("update.zip");
        let mut archive = Archive::create(&path).unwrap();
        archive.add_bytes("one", b"1", CompressionMethod::Stored).unwrap();
        archive.close().unwrap();

        let mut archive = Archive::open(&path, AccessMode::Update).unwrap();
        archive
            .add_bytes("two", &sample(50_000), CompressionMethod::Deflate)
            .unwrap();
        archive.close().unwrap();

        let archive = Archive::open(&path, AccessMode::Read).unwrap();
        let names: Vec<_> = archive.entries().iter().map(Entry::path).collect();
        assert_eq!(names, vec!["one", "two"]);
        assert_eq!(archive.read_path("one").unwrap().unwrap(), b"1");
        assert_eq!(archive.read_path("two").unwrap().unwrap(), sample(50_000));
    }

    #[test]
    fn prepended_and_appended_bytes_are_tolerated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("inner.zip");
        let mut archive = Archive::create(&path).unwrap();
        archive.set_comment("spyglass export").unwrap();
        archive
            .add_bytes("logs.sqlite", &sample(3000), CompressionMethod::Deflate)
            .unwrap();
        archive.close().unwrap();

        let mut wrapped = b"#!/bin/sh\nexit 0\n".to_vec();
        wrapped.extend(std::fs::read(&path).unwrap());
        wrapped.extend_from_slice(b"appended");
        let wrapped_path = dir.path().join("wrapped.zip");
        std::fs::write(&wrapped_path, wrapped).unwrap();

        let archive = Archive::open(&wrapped_path, AccessMode::Read).unwrap();
        assert_eq!(archive.comment(), b"spyglass export");
        assert_eq!(
            archive.read_path("logs.sqlite").unwrap().unwrap(),
            sample(3000)
        );
    }

    #[test]
    fn truncated_entry_is_unreadable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trunc.zip");
        let mut archive = Archive::create(&path).unwrap();
        archive
            .add_bytes("big", &sample(10_000), CompressionMethod::Stored)
            .unwrap();
        archive.close().unwrap();

        let archive = Archive::open(&path, AccessMode::Read).unwrap();
        let entry = archive.get("big").unwrap().clone();
        drop(archive);

        // Keep the directory and end record but cut the data short by
        // rewriting the file with the entry body truncated in place.
        let bytes = std::fs::read(&path).unwrap();
        let tail = bytes[bytes.len() - 22..].to_vec();
        std::fs::write(&path, [&bytes[..100], &tail[..]].concat()).unwrap();
        match Archive::open(&path, AccessMode::Read) {
            Ok(archive) => assert!(archive.read(&entry).is_err()),
            Err(e) => assert!(matches!(
                e,
                SpyglassError::UnreadableArchive(_) | SpyglassError::NotAnArchive
            )),
        }
    }
}
