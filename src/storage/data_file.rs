// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::RecordLocation;
use crate::{coding::DecodeError, file::DATA_FILE_MAGIC_BYTES, Checksum};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

/// Magic + file number
pub const DATA_FILE_HEADER_LEN: u64 = 8;

/// Tag + namespace id + payload length
const FRAME_HEADER_LEN: usize = 9;

const FRAME_TRAILER_LEN: usize = 8;

/// Frame holding an encoded document
pub const TAG_RECORD: u8 = 0;

/// Frame removing an earlier record
pub const TAG_TOMBSTONE: u8 = 1;

/// A decoded data file frame
#[derive(Debug)]
pub struct Frame {
    pub tag: u8,
    pub ns_id: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    /// On-disk size of a frame with `payload_len` bytes of payload.
    #[must_use]
    pub fn disk_size(payload_len: usize) -> u64 {
        (FRAME_HEADER_LEN + payload_len + FRAME_TRAILER_LEN) as u64
    }

    /// Serializes the frame including its checksum.
    pub fn encode(tag: u8, ns_id: u32, payload: &[u8]) -> crate::Result<Vec<u8>> {
        let len = u32::try_from(payload.len())
            .map_err(|_| crate::coding::EncodeError::TooLarge("record"))?;

        let mut header = [0u8; FRAME_HEADER_LEN];
        header[0] = tag;
        BigEndian::write_u32(&mut header[1..5], ns_id);
        BigEndian::write_u32(&mut header[5..9], len);

        let checksum = Checksum::of(&[&header, payload]);

        let mut bytes = Vec::with_capacity(FRAME_HEADER_LEN + payload.len() + FRAME_TRAILER_LEN);
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(payload);
        bytes.write_u64::<BigEndian>(checksum.into_u64())?;

        Ok(bytes)
    }

    /// Encodes a tombstone payload.
    #[must_use]
    pub fn tombstone_payload(target: RecordLocation) -> [u8; 12] {
        let mut payload = [0u8; 12];
        BigEndian::write_u32(&mut payload[0..4], target.file);
        BigEndian::write_u64(&mut payload[4..12], target.offset);
        payload
    }

    /// Decodes a tombstone payload.
    pub fn tombstone_target(&self) -> Option<RecordLocation> {
        let bytes = self.payload.get(0..12)?;
        let file = BigEndian::read_u32(bytes.get(0..4)?);
        let offset = BigEndian::read_u64(bytes.get(4..12)?);
        Some(RecordLocation::new(file, offset))
    }
}

/// Reads one frame, verifying its checksum.
///
/// Returns `Ok(None)` on a clean end of file.
fn read_frame<R: Read>(reader: &mut R) -> crate::Result<Option<Frame>> {
    let mut header = [0u8; FRAME_HEADER_LEN];

    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let tag = header[0];
    let ns_id = BigEndian::read_u32(&header[1..5]);
    let len = BigEndian::read_u32(&header[5..9]) as usize;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    let mut trailer = [0u8; FRAME_TRAILER_LEN];
    reader.read_exact(&mut trailer)?;

    let expected = Checksum::from_raw(BigEndian::read_u64(&trailer));
    Checksum::of(&[&header, &payload]).check(expected)?;

    if tag != TAG_RECORD && tag != TAG_TOMBSTONE {
        return Err(DecodeError::InvalidTag(("FrameTag", tag)).into());
    }

    Ok(Some(Frame {
        tag,
        ns_id,
        payload,
    }))
}

/// Result of scanning a data file from start to end
pub struct ScannedFile {
    /// Valid frames with their locations
    pub frames: Vec<(RecordLocation, Frame)>,

    /// Length of the valid prefix of the file
    pub valid_len: u64,

    /// Whether garbage follows the valid prefix
    pub torn: bool,
}

/// Reads every valid frame of a data file.
///
/// Scanning ends at the first torn or corrupt frame; everything
/// behind it is reported as invalid.
pub fn scan(path: &Path, file_no: u32) -> crate::Result<ScannedFile> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut header = [0u8; DATA_FILE_HEADER_LEN as usize];
    reader.read_exact(&mut header)?;

    if header[0..4] != DATA_FILE_MAGIC_BYTES {
        return Err(DecodeError::InvalidHeader("DataFile").into());
    }

    if BigEndian::read_u32(&header[4..8]) != file_no {
        return Err(DecodeError::InvalidHeader("DataFileNumber").into());
    }

    let mut frames = vec![];
    let mut offset = DATA_FILE_HEADER_LEN;

    loop {
        match read_frame(&mut reader) {
            Ok(Some(frame)) => {
                let next = offset + Frame::disk_size(frame.payload.len());
                frames.push((RecordLocation::new(file_no, offset), frame));
                offset = next;
            }
            Ok(None) => break,
            Err(crate::Error::Io(e)) if e.kind() != std::io::ErrorKind::UnexpectedEof => {
                return Err(e.into());
            }
            Err(e) => {
                log::warn!(
                    "ignoring {} invalid trailing byte(s) of {} at offset {offset}: {e}",
                    file_len - offset,
                    path.display(),
                );
                break;
            }
        }
    }

    Ok(ScannedFile {
        frames,
        valid_len: offset,
        torn: offset < file_len,
    })
}

/// Reads the frame at `offset` with positional I/O.
pub fn read_frame_at(file: &File, offset: u64) -> crate::Result<Frame> {
    let mut reader = PositionalReader { file, offset };

    read_frame(&mut reader)?.ok_or(crate::Error::RecordNotFound)
}

struct PositionalReader<'a> {
    file: &'a File,
    offset: u64,
}

impl Read for PositionalReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        #[cfg(unix)]
        let bytes_read = {
            use std::os::unix::fs::FileExt;
            self.file.read_at(buf, self.offset)?
        };

        #[cfg(windows)]
        let bytes_read = {
            use std::os::windows::fs::FileExt;
            self.file.seek_read(buf, self.offset)?
        };

        self.offset += bytes_read as u64;
        Ok(bytes_read)
    }
}

/// Appends frames to the active data file
pub struct DataFileWriter {
    file_no: u32,
    path: PathBuf,
    writer: BufWriter<File>,
    offset: u64,
}

impl DataFileWriter {
    /// Creates a new data file.
    pub fn create(path: PathBuf, file_no: u32) -> crate::Result<Self> {
        log::debug!("creating data file {}", path.display());

        let mut writer = BufWriter::new(File::create_new(&path)?);
        writer.write_all(&DATA_FILE_MAGIC_BYTES)?;
        writer.write_u32::<BigEndian>(file_no)?;

        Ok(Self {
            file_no,
            path,
            writer,
            offset: DATA_FILE_HEADER_LEN,
        })
    }

    /// Reopens an existing data file for appending, cutting off anything
    /// behind its valid prefix.
    pub fn open_append(path: PathBuf, file_no: u32, valid_len: u64) -> crate::Result<Self> {
        let mut file = std::fs::OpenOptions::new().write(true).open(&path)?;

        if file.metadata()?.len() != valid_len {
            log::warn!("truncating {} to {valid_len} bytes", path.display());
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        file.seek(SeekFrom::Start(valid_len))?;

        Ok(Self {
            file_no,
            path,
            writer: BufWriter::new(file),
            offset: valid_len,
        })
    }

    /// Number of the file being written.
    #[must_use]
    pub fn file_no(&self) -> u32 {
        self.file_no
    }

    /// Current end of the file.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Appends an encoded frame, returning its location.
    pub fn append(&mut self, frame: &[u8]) -> crate::Result<RecordLocation> {
        let location = RecordLocation::new(self.file_no, self.offset);
        self.writer.write_all(frame)?;
        self.offset += frame.len() as u64;
        Ok(location)
    }

    /// Hands buffered bytes to the OS.
    pub fn flush(&mut self) -> crate::Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes and fsyncs the file.
    pub fn sync(&mut self) -> crate::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        log::trace!("synced {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_log::test;

    #[test]
    fn frame_roundtrip() -> crate::Result<()> {
        let bytes = Frame::encode(TAG_RECORD, 7, b"payload")?;
        assert_eq!(Frame::disk_size(7), bytes.len() as u64);

        let frame = read_frame(&mut Cursor::new(bytes))?.expect("should exist");
        assert_eq!(TAG_RECORD, frame.tag);
        assert_eq!(7, frame.ns_id);
        assert_eq!(b"payload".as_slice(), frame.payload);

        Ok(())
    }

    #[test]
    fn frame_checksum_mismatch() -> crate::Result<()> {
        let mut bytes = Frame::encode(TAG_RECORD, 7, b"payload")?;
        bytes[FRAME_HEADER_LEN] ^= 0xFF;

        assert!(matches!(
            read_frame(&mut Cursor::new(bytes)),
            Err(crate::Error::ChecksumMismatch { .. })
        ));

        Ok(())
    }

    #[test]
    fn tombstone_payload_roundtrip() {
        let target = RecordLocation::new(3, 4_096);
        let frame = Frame {
            tag: TAG_TOMBSTONE,
            ns_id: 1,
            payload: Frame::tombstone_payload(target).to_vec(),
        };
        assert_eq!(Some(target), frame.tombstone_target());
    }

    #[test]
    fn data_file_write_scan_read() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("shop.0");

        let mut writer = DataFileWriter::create(path.clone(), 0)?;
        let a = writer.append(&Frame::encode(TAG_RECORD, 1, b"a")?)?;
        let b = writer.append(&Frame::encode(TAG_RECORD, 1, b"bb")?)?;
        writer.sync()?;

        assert_eq!(RecordLocation::new(0, DATA_FILE_HEADER_LEN), a);

        let scanned = scan(&path, 0)?;
        assert!(!scanned.torn);
        assert_eq!(vec![a, b], scanned.frames.iter().map(|(l, _)| *l).collect::<Vec<_>>());

        let file = File::open(&path)?;
        assert_eq!(b"bb".as_slice(), read_frame_at(&file, b.offset)?.payload);

        Ok(())
    }

    #[test]
    fn data_file_torn_tail() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("shop.0");

        let mut writer = DataFileWriter::create(path.clone(), 0)?;
        writer.append(&Frame::encode(TAG_RECORD, 1, b"complete")?)?;
        let good_len = writer.offset();
        let torn = Frame::encode(TAG_RECORD, 1, b"torn in half")?;
        writer.append(&torn[..torn.len() / 2])?;
        writer.sync()?;
        drop(writer);

        let scanned = scan(&path, 0)?;
        assert!(scanned.torn);
        assert_eq!(1, scanned.frames.len());
        assert_eq!(good_len, scanned.valid_len);

        let writer = DataFileWriter::open_append(path.clone(), 0, scanned.valid_len)?;
        assert_eq!(good_len, writer.offset());
        assert_eq!(good_len, std::fs::metadata(&path)?.len());

        Ok(())
    }

    #[test]
    fn data_file_wrong_number() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("shop.0");
        DataFileWriter::create(path.clone(), 0)?.sync()?;

        assert!(matches!(
            scan(&path, 1),
            Err(crate::Error::Decode(DecodeError::InvalidHeader(
                "DataFileNumber"
            )))
        ));

        Ok(())
    }
}
