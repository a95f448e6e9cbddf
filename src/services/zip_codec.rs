//! Deterministic zip packaging of in-memory entries.
//!
//! Packaging happens in two steps. `encode_entry` does the CPU-bound part
//! (checksum and deflate) once per entry; `EncodedArchive` then only lays
//! out headers around the encoded payloads. Given the same encoded entries
//! and timestamp, `segments` always yields the same bytes, which is what
//! lets the archive controller measure first and transmit second.

use crate::models::archive::DownloadedEntry;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Datelike, Timelike, Utc};
use flate2::{Compression, write::DeflateEncoder};
use std::{
    io::{self, Write},
    sync::Arc,
};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_SIG: u32 = 0x0605_4b50;
const VERSION: u16 = 20;
const FLAG_UTF8: u16 = 1 << 11;
const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;
const MAX_ENTRIES: usize = u16::MAX as usize;

/// MS-DOS date and time fields used by zip headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DosTimestamp {
    time: u16,
    date: u16,
}

impl DosTimestamp {
    /// DOS timestamps start in 1980; earlier instants clamp to 1980-01-01.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        if at.year() < 1980 {
            return Self {
                time: 0,
                date: (1 << 5) | 1,
            };
        }
        let year = (at.year() - 1980).min(127) as u16;
        Self {
            time: ((at.hour() as u16) << 11) | ((at.minute() as u16) << 5) | (at.second() as u16 / 2),
            date: (year << 9) | ((at.month() as u16) << 5) | at.day() as u16,
        }
    }
}

/// An entry with its checksum computed and its payload in final form.
#[derive(Debug)]
pub struct EncodedEntry {
    name: String,
    method: u16,
    crc: u32,
    uncompressed: u32,
    data: Bytes,
}

/// Checksum and, when it saves space, deflate one entry.
///
/// `level` 0 stores the entry; 1-9 are deflate levels. This is CPU-bound
/// and belongs on a blocking thread for anything but tiny inputs.
pub fn encode_entry(entry: DownloadedEntry, level: u32) -> io::Result<EncodedEntry> {
    let level = level.min(9);
    let uncompressed = to_u32(entry.buffer.len() as u64, &entry.name)?;
    let crc = crc32fast::hash(&entry.buffer);

    if level > 0 && !entry.buffer.is_empty() {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level));
        encoder.write_all(&entry.buffer)?;
        let compressed = encoder.finish()?;
        if compressed.len() < entry.buffer.len() {
            return Ok(EncodedEntry {
                name: entry.name,
                method: METHOD_DEFLATE,
                crc,
                uncompressed,
                data: Bytes::from(compressed),
            });
        }
    }

    Ok(EncodedEntry {
        name: entry.name,
        method: METHOD_STORED,
        crc,
        uncompressed,
        data: entry.buffer,
    })
}

/// Refuse archives with more entries than a classic end record can count.
pub fn check_entry_count(count: usize) -> io::Result<()> {
    if count > MAX_ENTRIES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("zip archives hold at most {} entries", MAX_ENTRIES),
        ));
    }
    Ok(())
}

/// Encoded entries ready to be laid out any number of times.
#[derive(Clone)]
pub struct EncodedArchive {
    entries: Arc<[EncodedEntry]>,
    modified: DosTimestamp,
}

impl EncodedArchive {
    pub fn new(entries: Vec<EncodedEntry>, modified: DosTimestamp) -> io::Result<Self> {
        check_entry_count(entries.len())?;
        Ok(Self {
            entries: entries.into(),
            modified,
        })
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Byte chunks of the archive, in order. Producing them copies no
    /// payload and compresses nothing.
    pub fn segments(&self) -> ZipSegments {
        ZipSegments {
            archive: self.clone(),
            next_entry: 0,
            offset: 0,
            central: BytesMut::new(),
            pending: None,
            finished: false,
        }
    }

    /// Total archive size, computed by running the layout once.
    pub fn measure(&self) -> io::Result<u64> {
        self.segments()
            .try_fold(0u64, |total, segment| Ok(total + segment?.len() as u64))
    }
}

pub struct ZipSegments {
    archive: EncodedArchive,
    next_entry: usize,
    offset: u64,
    central: BytesMut,
    pending: Option<Bytes>,
    finished: bool,
}

impl ZipSegments {
    fn next_entry_segment(&mut self, index: usize) -> io::Result<Bytes> {
        let entries = self.archive.entries.clone();
        let entry = &entries[index];
        let name = entry.name.as_bytes();
        let name_len = u16::try_from(name.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("entry name `{}` is too long", entry.name),
            )
        })?;
        let compressed = to_u32(entry.data.len() as u64, &entry.name)?;
        let header_offset = to_u32(self.offset, &entry.name)?;
        let modified = self.archive.modified;

        let mut header = BytesMut::with_capacity(30 + name.len());
        header.put_u32_le(LOCAL_HEADER_SIG);
        header.put_u16_le(VERSION);
        header.put_u16_le(FLAG_UTF8);
        header.put_u16_le(entry.method);
        header.put_u16_le(modified.time);
        header.put_u16_le(modified.date);
        header.put_u32_le(entry.crc);
        header.put_u32_le(compressed);
        header.put_u32_le(entry.uncompressed);
        header.put_u16_le(name_len);
        header.put_u16_le(0);
        header.put_slice(name);

        let central = &mut self.central;
        central.put_u32_le(CENTRAL_HEADER_SIG);
        central.put_u16_le(VERSION);
        central.put_u16_le(VERSION);
        central.put_u16_le(FLAG_UTF8);
        central.put_u16_le(entry.method);
        central.put_u16_le(modified.time);
        central.put_u16_le(modified.date);
        central.put_u32_le(entry.crc);
        central.put_u32_le(compressed);
        central.put_u32_le(entry.uncompressed);
        central.put_u16_le(name_len);
        central.put_u16_le(0); // extra
        central.put_u16_le(0); // comment
        central.put_u16_le(0); // disk start
        central.put_u16_le(0); // internal attributes
        central.put_u32_le(0); // external attributes
        central.put_u32_le(header_offset);
        central.put_slice(name);

        self.offset += (header.len() + entry.data.len()) as u64;
        self.pending = Some(entry.data.clone());
        Ok(header.freeze())
    }

    fn central_directory(&mut self) -> io::Result<Bytes> {
        let entries = self.archive.entries.len() as u16;
        let size = to_u32(self.central.len() as u64, "central directory")?;
        let offset = to_u32(self.offset, "central directory")?;

        let mut tail = std::mem::take(&mut self.central);
        tail.put_u32_le(END_OF_CENTRAL_SIG);
        tail.put_u16_le(0);
        tail.put_u16_le(0);
        tail.put_u16_le(entries);
        tail.put_u16_le(entries);
        tail.put_u32_le(size);
        tail.put_u32_le(offset);
        tail.put_u16_le(0);
        Ok(tail.freeze())
    }
}

impl Iterator for ZipSegments {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(data) = self.pending.take() {
            return Some(Ok(data));
        }
        if self.finished {
            return None;
        }
        if self.next_entry < self.archive.entries.len() {
            let index = self.next_entry;
            self.next_entry += 1;
            let segment = self.next_entry_segment(index);
            if segment.is_err() {
                self.finished = true;
            }
            return Some(segment);
        }
        self.finished = true;
        Some(self.central_directory())
    }
}

/// Zip64 is not produced; anything past the classic limits is refused.
fn to_u32(value: u64, what: &str) -> io::Result<u32> {
    u32::try_from(value).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("`{}` exceeds the 4 GiB zip limit", what),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::key::ObjectKey;
    use chrono::TimeZone;
    use flate2::read::DeflateDecoder;
    use std::io::Read;

    fn entry(name: &str, data: &[u8]) -> DownloadedEntry {
        DownloadedEntry {
            buffer: Bytes::copy_from_slice(data),
            name: name.to_string(),
            source_key: ObjectKey::normalize(name),
        }
    }

    fn stamp() -> DosTimestamp {
        DosTimestamp::from_datetime(Utc.with_ymd_and_hms(2024, 5, 17, 13, 45, 30).unwrap())
    }

    fn archive(entries: Vec<DownloadedEntry>, level: u32) -> EncodedArchive {
        let encoded = entries
            .into_iter()
            .map(|entry| encode_entry(entry, level).unwrap())
            .collect();
        EncodedArchive::new(encoded, stamp()).unwrap()
    }

    fn collect(archive: &EncodedArchive) -> Vec<u8> {
        archive
            .segments()
            .flat_map(|segment| segment.unwrap().to_vec())
            .collect()
    }

    fn u16_at(buf: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([buf[at], buf[at + 1]])
    }

    fn u32_at(buf: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
    }

    /// Walk the central directory and return (name, method, payload) triples.
    fn read_archive(archive: &[u8]) -> Vec<(String, u16, Vec<u8>)> {
        let eocd = archive.len() - 22;
        assert_eq!(u32_at(archive, eocd), END_OF_CENTRAL_SIG);
        let count = u16_at(archive, eocd + 10) as usize;
        let mut cursor = u32_at(archive, eocd + 16) as usize;

        let mut out = Vec::new();
        for _ in 0..count {
            assert_eq!(u32_at(archive, cursor), CENTRAL_HEADER_SIG);
            let method = u16_at(archive, cursor + 10);
            let compressed = u32_at(archive, cursor + 20) as usize;
            let name_len = u16_at(archive, cursor + 28) as usize;
            let local = u32_at(archive, cursor + 42) as usize;
            let name = String::from_utf8(archive[cursor + 46..cursor + 46 + name_len].to_vec())
                .unwrap();

            assert_eq!(u32_at(archive, local), LOCAL_HEADER_SIG);
            let data_start = local + 30 + u16_at(archive, local + 26) as usize;
            let raw = &archive[data_start..data_start + compressed];
            let payload = if method == METHOD_DEFLATE {
                let mut inflated = Vec::new();
                DeflateDecoder::new(raw).read_to_end(&mut inflated).unwrap();
                inflated
            } else {
                raw.to_vec()
            };
            out.push((name, method, payload));
            cursor += 46 + name_len;
        }
        out
    }

    #[test]
    fn measured_size_matches_transmitted_bytes() {
        for level in [0, 1, 6, 9] {
            let archive = archive(
                vec![
                    entry("a.txt", &b"hello hello hello hello".repeat(50)),
                    entry("b.bin", &[7u8; 3]),
                    entry("empty.txt", b""),
                ],
                level,
            );
            assert_eq!(archive.measure().unwrap(), collect(&archive).len() as u64);
            assert_eq!(collect(&archive), collect(&archive), "layout is deterministic");
        }
    }

    #[test]
    fn stored_archive_round_trips() {
        let archive = archive(
            vec![entry("docs/readme.md", b"# hi"), entry("ünïcode.txt", b"x")],
            0,
        );
        let entries = read_archive(&collect(&archive));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (String::from("docs/readme.md"), METHOD_STORED, b"# hi".to_vec()));
        assert_eq!(entries[1].0, "ünïcode.txt");
    }

    #[test]
    fn compressible_entries_are_deflated() {
        let text = b"the quick brown fox ".repeat(100);
        let archive = archive(vec![entry("fox.txt", &text), entry("tiny", b"ab")], 6);
        let entries = read_archive(&collect(&archive));
        assert_eq!(entries[0].1, METHOD_DEFLATE);
        assert_eq!(entries[0].2, text);
        // Deflating two bytes only grows them, so they stay stored.
        assert_eq!(entries[1].1, METHOD_STORED);
    }

    #[test]
    fn segments_reuse_the_encoded_payload() {
        let encoded = encode_entry(entry("fox.txt", &b"fox ".repeat(500)), 9).unwrap();
        let payload = encoded.data.clone();
        let archive = EncodedArchive::new(vec![encoded], stamp()).unwrap();

        let segments: Vec<Bytes> = archive.segments().map(|s| s.unwrap()).collect();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].as_ptr(), payload.as_ptr());
    }

    #[test]
    fn empty_archive_is_just_an_end_record() {
        let archive = archive(Vec::new(), 6);
        assert_eq!(archive.measure().unwrap(), 22);
        assert!(read_archive(&collect(&archive)).is_empty());
    }

    #[test]
    fn entry_count_is_capped() {
        assert!(check_entry_count(MAX_ENTRIES).is_ok());
        let err = check_entry_count(MAX_ENTRIES + 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn dos_timestamps() {
        let at = DosTimestamp::from_datetime(Utc.with_ymd_and_hms(1980, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(at, DosTimestamp { time: 0, date: 33 });
        let before = DosTimestamp::from_datetime(Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(before, at);
    }
}
