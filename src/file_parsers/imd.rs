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

    src/file_parsers/imd.rs

    A parser for the ImageDisk (IMD) disk image format.

    ImageDisk images begin with an ASCII header line and free-form comment
    terminated by 0x1A, followed by a sequence of track records. Each track
    carries its own data rate and encoding, a sector numbering map, optional
    cylinder and head maps, and one data record per sector.
*/
use std::{fs::File, path::Path};

use binrw::{binrw, BinRead, BinReaderExt, BinWrite};
use chrono::NaiveDateTime;
use regex::Regex;

use crate::{
    diskimage::{ImageDescriptor, ImageOpenOptions, MediaImage},
    file_parsers::{FormatCaps, ImageFormat},
    io::{Cursor, ReadSeek, Seek, SeekFrom, Write},
    sector_map::{SectorEntry, SectorFlags, SectorMap, TrackEntry},
    util::{overwrite_file, read_ascii},
    DiskCh,
    DiskChsn,
    DiskDataEncoding,
    DiskDataRate,
    MediaError,
    StandardFormat,
    ASCII_EOF,
};

pub const IMD_HEADER_REX: &str = r"(?s)IMD (?<v_major>\d)\.(?<v_minor>\d{2}): (?<day>\d{2})/(?<month>\d{2})/(?<year>\d{4}) (?<hh>\d{2}):(?<mm>\d{2}):(?<ss>\d{2})(?<comment>.*)?";

const HEAD_MAP_FLAG: u8 = 0x40;
const CYLINDER_MAP_FLAG: u8 = 0x80;
const SECTOR_SIZE_MAP: u8 = 0xFF;

pub struct ImdFormat;

#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct ImdTrack {
    pub mode: u8,
    c: u8,
    h: u8,
    sector_ct: u8,
    sector_size: u8,
}

impl ImdTrack {
    pub fn c(&self) -> u8 {
        self.c
    }
    pub fn h(&self) -> u8 {
        self.h & 0x0F
    }
    pub fn is_valid(&self) -> bool {
        self.mode < 6 && (self.h & !0xC0) < 2 && (self.sector_size < 7 || self.has_sector_size_map())
    }
    pub fn has_head_map(&self) -> bool {
        self.h & HEAD_MAP_FLAG != 0
    }
    pub fn has_cylinder_map(&self) -> bool {
        self.h & CYLINDER_MAP_FLAG != 0
    }
    pub fn has_sector_size_map(&self) -> bool {
        self.sector_size == SECTOR_SIZE_MAP
    }
    pub fn sector_size(&self) -> Option<usize> {
        (self.sector_size < 7).then(|| DiskChsn::n_to_bytes(self.sector_size))
    }
}

fn imd_mode_to_rate(mode: u8) -> Option<(DiskDataRate, DiskDataEncoding)> {
    match mode {
        0 => Some((DiskDataRate::Rate500Kbps, DiskDataEncoding::Fm)),
        1 => Some((DiskDataRate::Rate300Kbps, DiskDataEncoding::Fm)),
        2 => Some((DiskDataRate::Rate250Kbps, DiskDataEncoding::Fm)),
        3 => Some((DiskDataRate::Rate500Kbps, DiskDataEncoding::Mfm)),
        4 => Some((DiskDataRate::Rate300Kbps, DiskDataEncoding::Mfm)),
        5 => Some((DiskDataRate::Rate250Kbps, DiskDataEncoding::Mfm)),
        _ => None,
    }
}

fn imd_rate_to_mode(rate: DiskDataRate, encoding: DiskDataEncoding) -> Option<u8> {
    let base = match rate {
        DiskDataRate::Rate500Kbps => 0,
        DiskDataRate::Rate300Kbps => 1,
        DiskDataRate::Rate250Kbps => 2,
        _ => return None,
    };
    Some(match encoding {
        DiskDataEncoding::Fm => base,
        DiskDataEncoding::Mfm => base + 3,
    })
}

/// Decode one sector data record. Record types 1-8 encode the combinations of normal or
/// compressed data, with or without a deleted address mark and a data error.
fn read_record<RS: ReadSeek>(marker: u8, size: usize, source: &mut RS) -> Result<(Vec<u8>, SectorFlags), MediaError> {
    if marker == 0 {
        return Ok((vec![0; size], SectorFlags::NO_DATA));
    }
    if marker > 8 {
        log::error!("read_record(): Invalid sector data record type {:02X}", marker);
        return Err(MediaError::malformed(format!("invalid IMD data record {}", marker)));
    }

    let kind = marker - 1;
    let data = if kind & 0x01 != 0 {
        let byte: u8 = source.read_le()?;
        vec![byte; size]
    }
    else {
        let mut data = vec![0; size];
        source.read_exact(&mut data)?;
        data
    };

    let mut flags = SectorFlags::empty();
    if kind & 0x02 != 0 {
        flags |= SectorFlags::DELETED;
    }
    if kind & 0x04 != 0 {
        flags |= SectorFlags::DATA_ERROR;
    }
    Ok((data, flags))
}

fn write_record<W: Write>(sector: &SectorEntry, out: &mut W) -> Result<(), MediaError> {
    if sector.flags.contains(SectorFlags::NO_DATA) {
        out.write_all(&[0])?;
        return Ok(());
    }

    let mut marker = 1;
    if sector.flags.contains(SectorFlags::DELETED) {
        marker += 2;
    }
    if sector.flags.contains(SectorFlags::DATA_ERROR) {
        marker += 4;
    }

    match sector.data.first() {
        Some(&first) if sector.data.iter().all(|&b| b == first) => {
            out.write_all(&[marker + 1, first])?;
        }
        _ => {
            out.write_all(&[marker])?;
            out.write_all(&sector.data)?;
        }
    }
    Ok(())
}

const IMD_TIMESTAMP_FMT: &str = "%d/%m/%Y %H:%M:%S";

/// Format the time as the `dd/mm/yyyy hh:mm:ss` stamp of an IMD header line.
fn imd_timestamp(time: NaiveDateTime) -> String {
    time.format(IMD_TIMESTAMP_FMT).to_string()
}

impl ImdFormat {
    pub(crate) fn capabilities() -> FormatCaps {
        FormatCaps::CAP_WRITE
            | FormatCaps::CAP_CREATE
            | FormatCaps::CAP_SECTOR_IDS
            | FormatCaps::CAP_DATA_CRC
            | FormatCaps::CAP_DATA_DELETED
            | FormatCaps::CAP_COMMENT
            | FormatCaps::CAP_TRACK_ENCODING
            | FormatCaps::CAP_TRACK_DATA_RATE
    }

    pub(crate) fn extensions() -> Vec<&'static str> {
        vec!["imd"]
    }

    pub(crate) fn detect<RS: ReadSeek>(image: &mut RS) -> bool {
        let mut detected = false;
        _ = image.seek(SeekFrom::Start(0));

        if let (Some(header_str), _) = read_ascii(image, Some(ASCII_EOF), Some(4096)) {
            if let Ok(re) = Regex::new(IMD_HEADER_REX) {
                detected = re.is_match(&header_str);
            }
        }

        _ = image.seek(SeekFrom::Start(0));
        detected
    }

    /// Parse an IMD image into its header text (header line and comment) and a sector map.
    pub(crate) fn parse<RS: ReadSeek>(read_buf: &mut RS) -> Result<(String, SectorMap), MediaError> {
        read_buf.seek(SeekFrom::Start(0))?;

        let (header_str, terminator) = read_ascii(read_buf, Some(ASCII_EOF), None);
        let header_str = header_str.ok_or_else(|| MediaError::malformed("missing IMD header"))?;
        if terminator != ASCII_EOF {
            return Err(MediaError::malformed("IMD header is not terminated"));
        }

        let re = Regex::new(IMD_HEADER_REX).map_err(|e| MediaError::malformed(e.to_string()))?;
        let caps = re
            .captures(&header_str)
            .ok_or_else(|| MediaError::malformed("invalid IMD header line"))?;
        log::trace!(
            "parse(): Detected IMD header version: {}.{} comment: {}",
            &caps["v_major"],
            &caps["v_minor"],
            caps.name("comment").map(|c| c.as_str().trim()).unwrap_or("None")
        );

        let mut map = SectorMap::default();
        let mut header_offset = read_buf.stream_position()?;

        while let Ok(track_header) = ImdTrack::read(read_buf) {
            log::trace!("parse(): Track header: {:?} @ {:X}", &track_header, header_offset);
            if !track_header.is_valid() {
                log::error!("parse(): Invalid track header at offset {:X}", header_offset);
                return Err(MediaError::malformed("invalid IMD track header"));
            }

            let sector_ct = track_header.sector_ct as usize;
            let mut sector_numbers = vec![0; sector_ct];
            let mut cylinder_map = vec![track_header.c(); sector_ct];
            let mut head_map = vec![track_header.h(); sector_ct];

            read_buf.read_exact(&mut sector_numbers)?;
            if track_header.has_cylinder_map() {
                read_buf.read_exact(&mut cylinder_map)?;
            }
            if track_header.has_head_map() {
                read_buf.read_exact(&mut head_map)?;
            }

            // Note: This is listed as a 'proposed extension' in the IMD docs but apparently there
            // are images like this in the wild.
            let sector_sizes: Vec<usize> = if track_header.has_sector_size_map() {
                let mut raw = vec![0u8; sector_ct * 2];
                read_buf.read_exact(&mut raw)?;
                raw.chunks_exact(2)
                    .map(|s| u16::from_le_bytes([s[0], s[1]]) as usize)
                    .collect()
            }
            else {
                let size = track_header
                    .sector_size()
                    .ok_or_else(|| MediaError::malformed("invalid IMD sector size"))?;
                vec![size; sector_ct]
            };

            let (data_rate, encoding) = imd_mode_to_rate(track_header.mode)
                .ok_or_else(|| MediaError::malformed("invalid IMD track mode"))?;

            let mut sectors = Vec::with_capacity(sector_ct);
            for s in 0..sector_ct {
                let marker: u8 = read_buf.read_le()?;
                let (data, flags) = read_record(marker, sector_sizes[s], read_buf)?;
                sectors.push(SectorEntry {
                    chsn: DiskChsn::new(
                        cylinder_map[s] as u16,
                        head_map[s],
                        sector_numbers[s],
                        DiskChsn::bytes_to_n(sector_sizes[s]),
                    ),
                    data,
                    flags,
                });
            }

            header_offset = read_buf.stream_position()?;
            if sectors.is_empty() {
                continue;
            }
            map.add_track(TrackEntry {
                ch: DiskCh::new(track_header.c() as u16, track_header.h()),
                encoding,
                data_rate,
                sectors,
            });
        }

        Ok((header_str, map))
    }

    pub(crate) fn serialize(header_text: &str, map: &SectorMap) -> Result<Vec<u8>, MediaError> {
        let mut out = Cursor::new(Vec::new());
        out.write_all(header_text.as_bytes())?;
        out.write_all(&[ASCII_EOF])?;

        for track in map.tracks() {
            let mode = imd_rate_to_mode(track.data_rate, track.encoding).ok_or_else(|| {
                log::error!("serialize(): No IMD mode for {} {}", track.data_rate, track.encoding);
                MediaError::UnsupportedFormat
            })?;

            let cylinder_map: Vec<u8> = track.sectors.iter().map(|s| s.chsn.c() as u8).collect();
            let head_map: Vec<u8> = track.sectors.iter().map(|s| s.chsn.h()).collect();
            let need_cylinder_map = cylinder_map.iter().any(|&c| c as u16 != track.ch.c());
            let need_head_map = head_map.iter().any(|&h| h != track.ch.h());
            let first_n = track.sectors.first().map(|s| s.chsn.n()).unwrap_or(2);
            let need_size_map = track.sectors.iter().any(|s| s.chsn.n() != first_n);

            let mut h = track.ch.h();
            if need_cylinder_map {
                h |= CYLINDER_MAP_FLAG;
            }
            if need_head_map {
                h |= HEAD_MAP_FLAG;
            }

            ImdTrack {
                mode,
                c: track.ch.c() as u8,
                h,
                sector_ct: track.sectors.len() as u8,
                sector_size: if need_size_map { SECTOR_SIZE_MAP } else { first_n },
            }
            .write(&mut out)?;

            let numbers: Vec<u8> = track.sectors.iter().map(|s| s.chsn.s()).collect();
            out.write_all(&numbers)?;
            if need_cylinder_map {
                out.write_all(&cylinder_map)?;
            }
            if need_head_map {
                out.write_all(&head_map)?;
            }
            if need_size_map {
                for sector in &track.sectors {
                    out.write_all(&(sector.chsn.n_size() as u16).to_le_bytes())?;
                }
            }

            for sector in &track.sectors {
                write_record(sector, &mut out)?;
            }
        }

        Ok(out.into_inner())
    }
}

pub struct ImdImage {
    file: File,
    header_text: String,
    map: SectorMap,
    dirty: bool,
    descriptor: ImageDescriptor,
}

impl ImdImage {
    pub(crate) fn open(mut file: File, path: &Path, _opts: &ImageOpenOptions, read_only: bool) -> Result<ImdImage, MediaError> {
        let (header_text, map) = ImdFormat::parse(&mut file)?;
        let geometry = map
            .geometry()
            .ok_or_else(|| MediaError::malformed("IMD image contains no sectors"))?;
        let file_len = file.seek(SeekFrom::End(0))?;

        let mut descriptor = ImageDescriptor::new(ImageFormat::Imd, path, geometry);
        descriptor.byte_size = file_len;
        descriptor.write_protected = read_only;
        descriptor.standard_format = StandardFormat::from_size(geometry.total_bytes() as usize).first().copied();

        Ok(ImdImage {
            file,
            header_text,
            map,
            dirty: false,
            descriptor,
        })
    }

    /// Create a freshly formatted IMD image of a standard floppy format.
    pub fn create(path: &Path, format: StandardFormat, comment: Option<&str>) -> Result<(), MediaError> {
        let mut header_text = format!("IMD 1.18: {}\r\n", imd_timestamp(chrono::Local::now().naive_local()));
        if let Some(comment) = comment {
            header_text.push_str(comment);
        }
        let map = SectorMap::from_standard(format, 0xF6);
        let bytes = ImdFormat::serialize(&header_text, &map)?;

        let mut file = File::create(path).map_err(|e| MediaError::unwritable(path, e))?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// The creation time recorded in the header line.
    pub fn created(&self) -> Option<NaiveDateTime> {
        let stamp = self.header_text.split_once(": ")?.1.get(..19)?;
        NaiveDateTime::parse_from_str(stamp, IMD_TIMESTAMP_FMT).ok()
    }

    /// The comment text following the header line.
    pub fn comment(&self) -> Option<&str> {
        let comment = self.header_text.split_once('\n').map(|(_, c)| c.trim())?;
        (!comment.is_empty()).then_some(comment)
    }

    pub fn sector_map(&self) -> &SectorMap {
        &self.map
    }
}

impl MediaImage for ImdImage {
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
        let bytes = ImdFormat::serialize(&self.header_text, &self.map)?;
        overwrite_file(&mut self.file, &bytes)?;
        self.descriptor.byte_size = bytes.len() as u64;
        self.dirty = false;
        log::debug!("ImdImage::flush(): Wrote {} bytes", bytes.len());
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiskChs;

    #[test]
    fn timestamp_format() {
        let t = chrono::NaiveDate::from_ymd_opt(2000, 2, 29)
            .and_then(|d| d.and_hms_opt(1, 2, 3))
            .unwrap();
        assert_eq!(imd_timestamp(t), "29/02/2000 01:02:03");
        assert_eq!(NaiveDateTime::parse_from_str("29/02/2000 01:02:03", IMD_TIMESTAMP_FMT), Ok(t));
    }

    #[test]
    fn record_types() {
        let mut src = Cursor::new(vec![0xE5]);
        let (data, flags) = read_record(8, 4, &mut src).unwrap();
        assert_eq!(data, vec![0xE5; 4]);
        assert_eq!(flags, SectorFlags::DELETED | SectorFlags::DATA_ERROR);

        let mut src = Cursor::new(vec![1, 2, 3, 4]);
        let (data, flags) = read_record(5, 4, &mut src).unwrap();
        assert_eq!(data, vec![1, 2, 3, 4]);
        assert_eq!(flags, SectorFlags::DATA_ERROR);

        let mut src = Cursor::new(vec![]);
        assert_eq!(read_record(0, 4, &mut src).unwrap().1, SectorFlags::NO_DATA);
        assert!(read_record(9, 4, &mut src).is_err());
    }

    #[test]
    fn serialize_parse() {
        let mut map = SectorMap::from_standard(StandardFormat::PcFloppy720, 0xF6);
        let data: Vec<u8> = (0..512).map(|i| i as u8).collect();
        map.write_sector(DiskChs::new(79, 1, 9), &data).unwrap();

        let header = "IMD 1.18: 01/02/2024 10:20:30\r\nA test image";
        let bytes = ImdFormat::serialize(header, &map).unwrap();
        // Formatted sectors are stored compressed.
        assert!(bytes.len() < 160 * (5 + 9 + 9 * 2) + 600);

        let (text, parsed) = ImdFormat::parse(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(text, header);
        assert_eq!(parsed.geometry().unwrap().get(), (80, 2, 9, 512));
        assert_eq!(parsed.read_sector(DiskChs::new(79, 1, 9)).unwrap(), data);
        assert_eq!(parsed.track_format(), Some((DiskDataRate::Rate250Kbps, DiskDataEncoding::Mfm)));
    }
}
