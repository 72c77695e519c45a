/*
    MediaBay
    https://github.com/dbalsom/mediabay

    Copyright 2024 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/file_parsers/td0.rs

    A parser for the Teledisk (TD0) disk image format.

    The proprietary format used by the Teledisk disk copying software, published by Sydex in the
    1980s. This utility was quite popular for early disk archival efforts, and many Teledisk images
    exist in the wild.

    Teledisk disk images can be optionally encoded with 'advanced compression' which is a form of
    LZHUF compression. Images are always written back uncompressed.
*/
use std::{fs::File, path::Path};

use binrw::{binrw, BinRead, BinWrite};
use bitflags::bitflags;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::{
    diskimage::{ImageDescriptor, ImageOpenOptions, MediaImage},
    file_parsers::{compression::lzhuf, FormatCaps, ImageFormat},
    io::{Cursor, Read, ReadSeek, Seek, SeekFrom, Write},
    sector_map::{SectorEntry, SectorFlags, SectorMap, TrackEntry},
    util::overwrite_file,
    DiskCh,
    DiskChsn,
    DiskDataEncoding,
    DiskDataRate,
    MediaError,
    StandardFormat,
};

pub const TD0_HEADER_LEN: usize = 12;
pub const COMMENT_HEADER_SIZE: usize = 10;
/// Advanced compression in images older than 2.0 used a different scheme.
pub const TD0_MIN_COMPRESSED_VERSION: u8 = 20;
pub const TD0_WRITE_VERSION: u8 = 21;
const END_OF_TRACKS: u8 = 0xFF;
const FM_FLAG: u8 = 0x80;
const COMMENT_FLAG: u8 = 0x80;

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Td0SectorFlags: u8 {
        const DUPLICATED = 0b0000_0001;
        const CRC_ERROR  = 0b0000_0010;
        const DELETED    = 0b0000_0100;
        const SKIPPED    = 0b0001_0000;
        const NO_DATA    = 0b0010_0000;
        const NO_ID      = 0b0100_0000;
    }
}

#[derive(Clone, Debug)]
#[binrw]
#[brw(little)]
pub struct TelediskHeader {
    pub id: [u8; 2],
    pub sequence: u8,
    pub check_sequence: u8,
    pub version: u8,
    pub data_rate: u8,
    pub drive_type: u8,
    pub stepping: u8,
    pub allocation_flag: u8,
    pub heads: u8,
    pub crc: u16,
}

impl TelediskHeader {
    fn is_compressed(&self) -> bool {
        &self.id == b"td"
    }

    fn has_comment(&self) -> bool {
        self.stepping & COMMENT_FLAG != 0
    }

    fn compute_crc(&self) -> Result<u16, MediaError> {
        let mut out = Cursor::new(Vec::new());
        self.write(&mut out)?;
        Ok(td0_crc(&out.get_ref()[0..10], 0))
    }
}

/// Teledisk comment block header
/// 'length' bytes of comment data line records follow the header, as nul-terminated strings.
#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct CommentHeader {
    pub crc: u16,
    pub length: u16,
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct TrackHeader {
    pub sectors: u8,
    pub cylinder: u8,
    pub head: u8,
    pub crc: u8,
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct SectorHeader {
    pub cylinder: u8,
    pub head: u8,
    pub sector_id: u8,
    pub sector_size: u8,
    pub flags: u8,
    pub crc: u8,
}

/// The comment block of a Teledisk image. The timestamp is stored as (years since 1900, month
/// 0-11, day, hour, minute, second).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Td0Comment {
    pub timestamp: [u8; 6],
    pub text: String,
}

impl Td0Comment {
    pub fn new(text: &str, created: NaiveDateTime) -> Self {
        Td0Comment {
            timestamp: td0_timestamp(created),
            text: text.to_string(),
        }
    }

    /// The creation time recorded in the comment block, if it names a valid date.
    pub fn created(&self) -> Option<NaiveDateTime> {
        let [year, month, day, hour, minute, second] = self.timestamp;
        NaiveDate::from_ymd_opt(1900 + year as i32, month as u32 + 1, day as u32)?.and_hms_opt(
            hour as u32,
            minute as u32,
            second as u32,
        )
    }
}

fn td0_timestamp(time: NaiveDateTime) -> [u8; 6] {
    [
        (time.year() - 1900).clamp(0, u8::MAX as i32) as u8,
        time.month0() as u8,
        time.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
    ]
}

fn td0_crc(data: &[u8], input_crc: u16) -> u16 {
    let mut crc = input_crc;

    for byte in data.iter() {
        crc ^= (*byte as u16) << 8;
        for _j in 0..8 {
            crc = (crc << 1) ^ if crc & 0x8000 != 0 { 0xA097 } else { 0 };
        }
    }
    crc
}

fn rate_from_code(code: u8) -> Result<DiskDataRate, MediaError> {
    match code & 0x7F {
        0 => Ok(DiskDataRate::Rate250Kbps),
        1 => Ok(DiskDataRate::Rate300Kbps),
        2 => Ok(DiskDataRate::Rate500Kbps),
        _ => {
            log::error!("rate_from_code(): Unknown data rate code {:02X}", code);
            Err(MediaError::malformed(format!("unknown Teledisk data rate {}", code)))
        }
    }
}

fn rate_to_code(rate: DiskDataRate) -> Result<u8, MediaError> {
    match rate {
        DiskDataRate::Rate250Kbps => Ok(0),
        DiskDataRate::Rate300Kbps => Ok(1),
        DiskDataRate::Rate500Kbps => Ok(2),
        _ => Err(MediaError::UnsupportedFormat),
    }
}

/// Teledisk records the BIOS drive type the image was read on.
fn drive_type_for(format: StandardFormat) -> u8 {
    match format {
        StandardFormat::PcFloppy160
        | StandardFormat::PcFloppy180
        | StandardFormat::PcFloppy320
        | StandardFormat::PcFloppy360 => 1,
        StandardFormat::PcFloppy1200 => 2,
        StandardFormat::PcFloppy640 | StandardFormat::PcFloppy720 => 3,
        StandardFormat::PcFloppy1440 | StandardFormat::Dmf1024 | StandardFormat::Dmf2048 => 4,
        StandardFormat::PcFloppy1250 => 5,
        StandardFormat::PcFloppy2880 => 6,
    }
}

fn read_bytes(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>, MediaError> {
    let mut buf = vec![0u8; len];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| MediaError::malformed("Teledisk data ends mid-record"))?;
    Ok(buf)
}

/// Expand a sector data block into `size` bytes.
fn decode_sector_data(encoding: u8, block: &[u8], size: usize) -> Result<Vec<u8>, MediaError> {
    let short = || MediaError::malformed("Teledisk sector data block is truncated");
    let mut data = Vec::with_capacity(size);

    match encoding {
        0 => {
            data.extend_from_slice(block.get(..size).ok_or_else(short)?);
        }
        1 => {
            // u16 repeat count of a two byte pattern
            let header = block.get(..4).ok_or_else(short)?;
            let count = u16::from_le_bytes([header[0], header[1]]) as usize;
            for _ in 0..count.min(size / 2) {
                data.extend_from_slice(&header[2..4]);
            }
        }
        2 => {
            let mut pos = 0;
            while data.len() < size {
                let kind = *block.get(pos).ok_or_else(short)?;
                let count = *block.get(pos + 1).ok_or_else(short)? as usize;
                pos += 2;
                if kind == 0 {
                    data.extend_from_slice(block.get(pos..pos + count).ok_or_else(short)?);
                    pos += count;
                }
                else {
                    let len = 1usize << kind;
                    let pattern = block.get(pos..pos + len).ok_or_else(short)?;
                    for _ in 0..count {
                        data.extend_from_slice(pattern);
                    }
                    pos += len;
                }
            }
        }
        _ => {
            log::error!("decode_sector_data(): Unsupported sector data encoding {}", encoding);
            return Err(MediaError::malformed(format!("unknown sector encoding {}", encoding)));
        }
    }

    data.resize(size, 0);
    Ok(data)
}

pub struct Td0Format;

impl Td0Format {
    pub(crate) fn extensions() -> Vec<&'static str> {
        vec!["td0"]
    }

    pub(crate) fn capabilities() -> FormatCaps {
        FormatCaps::CAP_WRITE
            | FormatCaps::CAP_CREATE
            | FormatCaps::CAP_SECTOR_IDS
            | FormatCaps::CAP_DATA_CRC
            | FormatCaps::CAP_DATA_DELETED
            | FormatCaps::CAP_COMMENT
            | FormatCaps::CAP_TRACK_ENCODING
            | FormatCaps::CAP_COMPRESSION
    }

    pub(crate) fn detect<RS: ReadSeek>(image: &mut RS) -> bool {
        let mut detected = false;
        _ = image.seek(SeekFrom::Start(0));

        if let Ok(file_header) = TelediskHeader::read(image) {
            if &file_header.id == b"TD" || &file_header.id == b"td" {
                detected = true;
            }
        }

        _ = image.seek(SeekFrom::Start(0));
        detected
    }

    /// Parse a Teledisk image into its header, optional comment and sector map.
    pub(crate) fn parse(
        image_data: &[u8],
    ) -> Result<(TelediskHeader, Option<Td0Comment>, SectorMap), MediaError> {
        if image_data.len() < TD0_HEADER_LEN {
            log::trace!("Image is too small to be a Teledisk image.");
            return Err(MediaError::UnknownFormat);
        }

        let file_header = TelediskHeader::read(&mut Cursor::new(image_data))?;
        if &file_header.id != b"TD" && &file_header.id != b"td" {
            return Err(MediaError::UnknownFormat);
        }

        let header_crc = td0_crc(&image_data[0..10], 0);
        log::trace!(
            "Detected Teledisk Image, version {}.{}, compressed: {} comment_block: {} crc: {:04X}/{:04X}",
            file_header.version / 10,
            file_header.version % 10,
            file_header.is_compressed(),
            file_header.has_comment(),
            file_header.crc,
            header_crc
        );
        if file_header.crc != header_crc {
            return Err(MediaError::malformed("Teledisk header CRC mismatch"));
        }

        let body = if file_header.is_compressed() {
            if file_header.version < TD0_MIN_COMPRESSED_VERSION {
                log::error!(
                    "Td0Format::parse(): Compressed image version {} predates advanced compression",
                    file_header.version
                );
                return Err(MediaError::UnsupportedFormat);
            }
            let expanded = lzhuf::expand(&image_data[TD0_HEADER_LEN..], false)?;
            log::trace!(
                "Decompressed {} bytes to {} bytes",
                image_data.len() - TD0_HEADER_LEN,
                expanded.len()
            );
            expanded
        }
        else {
            image_data[TD0_HEADER_LEN..].to_vec()
        };

        let mut cursor = Cursor::new(body.as_slice());

        let comment = if file_header.has_comment() {
            let comment_header = CommentHeader::read(&mut cursor)?;
            let comment_data = read_bytes(&mut cursor, comment_header.length as usize)?;

            let calculated_crc = td0_crc(&body[2..COMMENT_HEADER_SIZE], 0);
            let calculated_crc = td0_crc(&comment_data, calculated_crc);
            if comment_header.crc != calculated_crc {
                log::warn!(
                    "Comment block header crc: {:04X} calculated_crc: {:04X}",
                    comment_header.crc,
                    calculated_crc
                );
            }

            // Comment block consists of nul-terminated strings. Convert nul terminators to newlines.
            let text: String = comment_data
                .iter()
                .map(|&b| if b == 0 { '\n' } else { b as char })
                .collect();
            let text = text.trim_end_matches('\n').to_string();
            log::trace!("Comment block data: {}", text);

            Some(Td0Comment {
                timestamp: [
                    comment_header.year,
                    comment_header.month,
                    comment_header.day,
                    comment_header.hour,
                    comment_header.minute,
                    comment_header.second,
                ],
                text,
            })
        }
        else {
            None
        };

        let data_rate = rate_from_code(file_header.data_rate)?;
        let mut map = SectorMap::default();

        loop {
            let track_spt = *body
                .get(cursor.position() as usize)
                .ok_or_else(|| MediaError::malformed("Teledisk image has no end of tracks marker"))?;
            if track_spt == END_OF_TRACKS {
                break;
            }

            let track_header = TrackHeader::read(&mut cursor)?;
            let fm = (file_header.data_rate & FM_FLAG != 0) || (track_header.head & FM_FLAG != 0);
            let ch = DiskCh::new(track_header.cylinder as u16, track_header.head & 0x01);

            let mut sectors: Vec<SectorEntry> = Vec::with_capacity(track_header.sectors as usize);
            for _ in 0..track_header.sectors {
                let sector_header = SectorHeader::read(&mut cursor)?;
                let flags = Td0SectorFlags::from_bits_truncate(sector_header.flags);
                let size = DiskChsn::n_to_bytes(sector_header.sector_size);

                let (data, mut map_flags) = if flags.intersects(Td0SectorFlags::SKIPPED | Td0SectorFlags::NO_DATA) {
                    if flags.contains(Td0SectorFlags::SKIPPED) {
                        (vec![0xF6; size], SectorFlags::empty())
                    }
                    else {
                        (vec![0; size], SectorFlags::NO_DATA)
                    }
                }
                else {
                    let mut len_bytes = [0u8; 2];
                    cursor
                        .read_exact(&mut len_bytes)
                        .map_err(|_| MediaError::malformed("Teledisk data ends mid-record"))?;
                    let block_len = u16::from_le_bytes(len_bytes) as usize;
                    let block = read_bytes(&mut cursor, block_len)?;
                    let (&encoding, payload) = block
                        .split_first()
                        .ok_or_else(|| MediaError::malformed("empty Teledisk sector data block"))?;
                    (decode_sector_data(encoding, payload, size)?, SectorFlags::empty())
                };

                if flags.contains(Td0SectorFlags::CRC_ERROR) {
                    map_flags |= SectorFlags::DATA_ERROR;
                }
                if flags.contains(Td0SectorFlags::DELETED) {
                    map_flags |= SectorFlags::DELETED;
                }
                if flags.contains(Td0SectorFlags::NO_ID) {
                    log::trace!("Td0Format::parse(): Dropping sector without ID on track {}", ch);
                    continue;
                }
                if sectors.iter().any(|s| s.chsn.s() == sector_header.sector_id) {
                    log::trace!(
                        "Td0Format::parse(): Dropping duplicate sector {} on track {}",
                        sector_header.sector_id,
                        ch
                    );
                    continue;
                }

                sectors.push(SectorEntry {
                    chsn: DiskChsn::new(
                        sector_header.cylinder as u16,
                        sector_header.head,
                        sector_header.sector_id,
                        sector_header.sector_size,
                    ),
                    data,
                    flags: map_flags,
                });
            }

            log::trace!("Td0Format::parse(): Track {} with {} sectors", ch, sectors.len());
            map.add_track(TrackEntry {
                ch,
                encoding: if fm { DiskDataEncoding::Fm } else { DiskDataEncoding::Mfm },
                data_rate,
                sectors,
            });
        }

        Ok((file_header, comment, map))
    }

    /// Serialize an uncompressed Teledisk image.
    pub(crate) fn serialize(
        header: &TelediskHeader,
        comment: Option<&Td0Comment>,
        map: &SectorMap,
    ) -> Result<Vec<u8>, MediaError> {
        let mut header = header.clone();
        header.id = *b"TD";
        header.stepping &= !COMMENT_FLAG;
        if comment.is_some() {
            header.stepping |= COMMENT_FLAG;
        }
        if let Some((rate, encoding)) = map.track_format() {
            header.data_rate = rate_to_code(rate)? | if encoding == DiskDataEncoding::Fm { FM_FLAG } else { 0 };
        }
        header.crc = header.compute_crc()?;

        let mut out = Cursor::new(Vec::new());
        header.write(&mut out)?;

        if let Some(comment) = comment {
            let text: Vec<u8> = comment
                .text
                .bytes()
                .map(|b| if b == b'\n' { 0 } else { b })
                .chain(std::iter::once(0))
                .collect();
            let mut comment_header = CommentHeader {
                crc: 0,
                length: text.len() as u16,
                year: comment.timestamp[0],
                month: comment.timestamp[1],
                day: comment.timestamp[2],
                hour: comment.timestamp[3],
                minute: comment.timestamp[4],
                second: comment.timestamp[5],
            };
            let mut header_bytes = Cursor::new(Vec::new());
            comment_header.write(&mut header_bytes)?;
            let crc = td0_crc(&header_bytes.get_ref()[2..], 0);
            comment_header.crc = td0_crc(&text, crc);
            comment_header.write(&mut out)?;
            out.write_all(&text)?;
        }

        for track in map.tracks() {
            let head = track.ch.h() | if track.encoding == DiskDataEncoding::Fm { FM_FLAG } else { 0 };
            let id = [track.sectors.len() as u8, track.ch.c() as u8, head];
            TrackHeader {
                sectors: id[0],
                cylinder: id[1],
                head: id[2],
                crc: td0_crc(&id, 0) as u8,
            }
            .write(&mut out)?;

            for sector in &track.sectors {
                let mut flags = Td0SectorFlags::empty();
                if sector.flags.contains(SectorFlags::DATA_ERROR) {
                    flags |= Td0SectorFlags::CRC_ERROR;
                }
                if sector.flags.contains(SectorFlags::DELETED) {
                    flags |= Td0SectorFlags::DELETED;
                }
                let has_data = !sector.flags.contains(SectorFlags::NO_DATA);
                if !has_data {
                    flags |= Td0SectorFlags::NO_DATA;
                }

                SectorHeader {
                    cylinder: sector.chsn.c() as u8,
                    head: sector.chsn.h(),
                    sector_id: sector.chsn.s(),
                    sector_size: sector.chsn.n(),
                    flags: flags.bits(),
                    crc: if has_data { td0_crc(&sector.data, 0) as u8 } else { 0 },
                }
                .write(&mut out)?;

                if has_data {
                    out.write_all(&(sector.data.len() as u16 + 1).to_le_bytes())?;
                    out.write_all(&[0])?;
                    out.write_all(&sector.data)?;
                }
            }
        }
        out.write_all(&[END_OF_TRACKS, 0, 0, 0])?;

        Ok(out.into_inner())
    }
}

/// A Teledisk image. The whole image is decoded into memory on open and written back,
/// uncompressed, on flush.
pub struct Td0Image {
    file: File,
    header: TelediskHeader,
    comment: Option<Td0Comment>,
    map: SectorMap,
    dirty: bool,
    descriptor: ImageDescriptor,
}

impl Td0Image {
    pub(crate) fn open(mut file: File, path: &Path, _opts: &ImageOpenOptions, read_only: bool) -> Result<Td0Image, MediaError> {
        let mut image_data = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut image_data)?;

        let (header, comment, map) = Td0Format::parse(&image_data)?;
        let geometry = map
            .geometry()
            .ok_or_else(|| MediaError::malformed("Teledisk image contains no sectors"))?;

        let mut descriptor = ImageDescriptor::new(ImageFormat::Td0, path, geometry);
        descriptor.byte_size = image_data.len() as u64;
        descriptor.write_protected = read_only;
        descriptor.standard_format = StandardFormat::from_size(geometry.total_bytes() as usize).first().copied();

        Ok(Td0Image {
            file,
            header,
            comment,
            map,
            dirty: false,
            descriptor,
        })
    }

    /// Create a freshly formatted Teledisk image of a standard floppy format.
    pub fn create(path: &Path, format: StandardFormat, comment: Option<&str>) -> Result<(), MediaError> {
        let chsn = format.chsn();
        let header = TelediskHeader {
            id: *b"TD",
            sequence: 0,
            check_sequence: 0,
            version: TD0_WRITE_VERSION,
            data_rate: rate_to_code(format.data_rate())?,
            drive_type: drive_type_for(format),
            stepping: 0,
            allocation_flag: 0,
            heads: chsn.h(),
            crc: 0,
        };
        let comment = comment.map(|text| Td0Comment::new(text, chrono::Local::now().naive_local()));
        let map = SectorMap::from_standard(format, 0xF6);
        let bytes = Td0Format::serialize(&header, comment.as_ref(), &map)?;

        let mut file = File::create(path).map_err(|e| MediaError::unwritable(path, e))?;
        file.write_all(&bytes)?;
        Ok(())
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_ref().map(|c| c.text.as_str())
    }

    pub fn sector_map(&self) -> &SectorMap {
        &self.map
    }
}

impl MediaImage for Td0Image {
    fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    fn read_block(&mut self, lba: u64) -> Result<Vec<u8>, MediaError> {
        self.descriptor.check_read(lba)?;
        let chs = self.descriptor.geometry.lba_to_chs(lba)?;
        self.map.read_sector(chs)
    }

    fn write_block(&mut self, lba: u64, data: &[u8]) -> Result<(), MediaError> {
        self.descriptor.check_write(lba, data)?;
        let chs = self.descriptor.geometry.lba_to_chs(lba)?;
        self.map.write_sector(chs, data)?;
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MediaError> {
        if !self.dirty {
            return Ok(());
        }
        let bytes = Td0Format::serialize(&self.header, self.comment.as_ref(), &self.map)?;
        overwrite_file(&mut self.file, &bytes)?;
        self.descriptor.byte_size = bytes.len() as u64;
        self.dirty = false;
        log::debug!("Td0Image::flush(): Wrote {} bytes", bytes.len());
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_crc() {
        // Header of a 360K image written by Teledisk 2.15
        let header = [0x54, 0x44, 0x00, 0x00, 0x15, 0x00, 0x01, 0x00, 0x00, 0x02];
        let crc = td0_crc(&header, 0);
        let mut bytes = header.to_vec();
        bytes.extend_from_slice(&crc.to_le_bytes());
        let parsed = TelediskHeader::read(&mut Cursor::new(bytes.as_slice())).unwrap();
        assert_eq!(parsed.compute_crc().unwrap(), crc);
    }

    #[test]
    fn sector_encodings() {
        assert_eq!(decode_sector_data(0, &[1, 2, 3, 4], 4).unwrap(), vec![1, 2, 3, 4]);
        // 3 repetitions of AA 55, zero padded
        assert_eq!(
            decode_sector_data(1, &[3, 0, 0xAA, 0x55], 8).unwrap(),
            vec![0xAA, 0x55, 0xAA, 0x55, 0xAA, 0x55, 0, 0]
        );
        // two literal bytes, then a 2-byte pattern repeated 3 times
        assert_eq!(
            decode_sector_data(2, &[0, 2, 9, 8, 1, 3, 0xE5, 0xF6], 8).unwrap(),
            vec![9, 8, 0xE5, 0xF6, 0xE5, 0xF6, 0xE5, 0xF6]
        );
        assert!(matches!(
            decode_sector_data(2, &[0, 4, 1], 8),
            Err(MediaError::MalformedHeader(_))
        ));
    }

    #[test]
    fn comment_timestamp_fields() {
        let time = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap().and_hms_opt(12, 30, 5).unwrap();
        let comment = Td0Comment::new("disk", time);
        assert_eq!(comment.timestamp, [124, 0, 31, 12, 30, 5]);
        assert_eq!(comment.created(), Some(time));

        let bogus = Td0Comment {
            timestamp: [124, 12, 40, 0, 0, 0],
            text: String::new(),
        };
        assert_eq!(bogus.created(), None);
    }

    #[test]
    fn serialize_parse_with_comment() {
        let header = TelediskHeader {
            id: *b"TD",
            sequence: 0,
            check_sequence: 0,
            version: TD0_WRITE_VERSION,
            data_rate: 0,
            drive_type: 1,
            stepping: 0,
            allocation_flag: 0,
            heads: 2,
            crc: 0,
        };
        let mut map = SectorMap::from_standard(StandardFormat::PcFloppy360, 0xF6);
        map.write_sector(crate::DiskChs::new(39, 1, 9), &[0x42; 512]).unwrap();
        let comment = Td0Comment {
            timestamp: [124, 0, 1, 12, 0, 0],
            text: "line one\nline two".to_string(),
        };

        let bytes = Td0Format::serialize(&header, Some(&comment), &map).unwrap();
        let (parsed_header, parsed_comment, parsed_map) = Td0Format::parse(&bytes).unwrap();
        assert!(parsed_header.has_comment());
        assert_eq!(parsed_comment, Some(comment));
        assert_eq!(parsed_map.geometry().unwrap().get(), (40, 2, 9, 512));
        assert_eq!(
            parsed_map.read_sector(crate::DiskChs::new(39, 1, 9)).unwrap(),
            vec![0x42; 512]
        );
    }

    #[test]
    fn old_compressed_images_are_rejected() {
        let mut bytes = vec![b't', b'd', 0, 0, 11, 0, 1, 0, 0, 2];
        let crc = td0_crc(&bytes, 0);
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes.extend_from_slice(&[0xFF, 0, 0, 0]);
        assert!(matches!(Td0Format::parse(&bytes), Err(MediaError::UnsupportedFormat)));
    }
}
