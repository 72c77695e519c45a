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

    src/file_parsers/f86.rs

    A parser for the 86f disk image format. (F is prepended due to inability to
    start identifiers with numbers in Rust.)

    86f format images are an internal bitstream-level format used by the 86Box emulator.
    Each track stores raw MFM bitcells; sector access is provided by scanning the
    bitstream for address marks. Images are always written back in absolute
    bitcell mode.
*/
use std::{fs::File, path::Path};

use binrw::{binrw, BinRead, BinWrite};
use bit_vec::BitVec;

use crate::{
    bitstream::mfm::{self, SectorHeader, FORMAT_FILL_BYTE},
    diskimage::{ImageDescriptor, ImageOpenOptions, MediaImage, TrackData},
    file_parsers::{FormatCaps, ImageFormat},
    io::{Cursor, ReadSeek, Seek, SeekFrom, Write},
    util::overwrite_file,
    DiskCh,
    DiskChs,
    DiskChsn,
    DiskDataEncoding,
    DiskDataRate,
    DiskGeometry,
    MediaError,
    StandardFormat,
};

pub const F86_TRACK_TABLE_LEN_PER_HEAD: usize = 256;
pub const F86_HEADER_LEN: usize = 8;

pub const F86_DISK_HAS_SURFACE_DESC: u16 = 0b0000_0001;
pub const F86_DISK_HOLE_MASK: u16 = 0b0000_0110;
pub const F86_DISK_SIDES: u16 = 0b0000_1000;
pub const F86_DISK_WRITE_PROTECT: u16 = 0b0001_0000;
pub const F86_DISK_RPM_SLOWDOWN: u16 = 0b0110_0000;
pub const F86_DISK_BITCELL_MODE: u16 = 0b1000_0000;
pub const F86_DISK_TYPE: u16 = 0b0000_0001_0000_0000;
pub const F86_DISK_REVERSE_ENDIAN: u16 = 0b0000_1000_0000_0000;
pub const F86_DISK_SPEEDUP_FLAG: u16 = 0b0001_0000_0000_0000;

#[derive(Debug)]
#[binrw]
#[brw(little)]
struct FileHeader {
    id: [u8; 4],       // “86BF”
    minor_version: u8, // 0C (12)
    major_version: u8, // 02 (2) -> 2.12
    flags: u16,
}

impl FileHeader {
    fn new(flags: u16) -> Self {
        Self {
            id: *b"86BF",
            minor_version: 0x0C,
            major_version: 0x02,
            flags,
        }
    }
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
struct TrackHeader {
    flags: u16,
    index_hole: u32,
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
struct TrackHeaderBitCells {
    flags: u16,
    bit_cells: i32,
    index_hole: u32,
}

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Clone, Copy)]
enum F86TimeShift {
    ZeroPercent,
    SlowOnePercent,
    SlowOneAndAHalfPercent,
    SlowTwoPercent,
    FastOnePercent,
    FastOneAndAHalfPercent,
    FastTwoPercent,
}

impl F86TimeShift {
    fn adjust(&self, value: f64) -> f64 {
        value
            * match self {
                F86TimeShift::ZeroPercent => 1.0,
                F86TimeShift::SlowOnePercent => 1.01,
                F86TimeShift::SlowOneAndAHalfPercent => 1.015,
                F86TimeShift::SlowTwoPercent => 1.02,
                F86TimeShift::FastOnePercent => 1.0 / 1.01,
                F86TimeShift::FastOneAndAHalfPercent => 1.0 / 1.015,
                F86TimeShift::FastTwoPercent => 1.0 / 1.02,
            }
    }
}

fn f86_disk_time_shift(flags: u16) -> F86TimeShift {
    match ((flags & F86_DISK_RPM_SLOWDOWN) >> 5, flags & F86_DISK_SPEEDUP_FLAG != 0) {
        (0b01, false) => F86TimeShift::SlowOnePercent,
        (0b10, false) => F86TimeShift::SlowOneAndAHalfPercent,
        (0b11, false) => F86TimeShift::SlowTwoPercent,
        (0b01, true) => F86TimeShift::FastOnePercent,
        (0b10, true) => F86TimeShift::FastOneAndAHalfPercent,
        (0b11, true) => F86TimeShift::FastTwoPercent,
        _ => F86TimeShift::ZeroPercent,
    }
}

fn f86_track_data_rate(flags: u16) -> Option<DiskDataRate> {
    match flags & 0x07 {
        0b000 => Some(DiskDataRate::Rate500Kbps),
        0b001 => Some(DiskDataRate::Rate300Kbps),
        0b010 => Some(DiskDataRate::Rate250Kbps),
        0b011 => Some(DiskDataRate::Rate1000Kbps),
        _ => None,
    }
}

fn f86_rate_bits(rate: DiskDataRate) -> Option<u16> {
    match rate {
        DiskDataRate::Rate500Kbps => Some(0b000),
        DiskDataRate::Rate300Kbps => Some(0b001),
        DiskDataRate::Rate250Kbps => Some(0b010),
        DiskDataRate::Rate1000Kbps => Some(0b011),
        _ => None,
    }
}

fn f86_track_encoding(flags: u16) -> Option<DiskDataEncoding> {
    match (flags >> 3) & 0x03 {
        0b00 => Some(DiskDataEncoding::Fm),
        0b01 => Some(DiskDataEncoding::Mfm),
        _ => None,
    }
}

fn f86_track_rpm(flags: u16) -> Option<u32> {
    match (flags >> 5) & 0x07 {
        0b000 => Some(300),
        0b001 => Some(360),
        _ => None,
    }
}

/// The nominal bitcell count of a track at the given rate and rotation speed. The count is rounded
/// down to a multiple of 16 before any extra bitcells are added.
fn f86_track_bit_length(
    encoding: DiskDataEncoding,
    data_rate: DiskDataRate,
    rpm: u32,
    time_shift: F86TimeShift,
    extra_bitcells: i32,
) -> usize {
    let mut rate = u32::from(data_rate) as f64 / 1000.0;
    if matches!(encoding, DiskDataEncoding::Fm) {
        rate /= 2.0;
    }

    let mut size = (100000.0 / 250.0) * rate;
    size = (size * 300.0) / rpm as f64;
    size = time_shift.adjust(size);
    ((size as usize) >> 4 << 4).saturating_add_signed(extra_bitcells as isize)
}

struct F86Track {
    ch: DiskCh,
    flags: u16,
    index_hole: u32,
    encoding: DiskDataEncoding,
    data_rate: DiskDataRate,
    bits: BitVec,
    /// Surface description bits, written back unchanged.
    surface: Option<Vec<u8>>,
    sectors: Vec<SectorHeader>,
    /// Indices into `sectors` of the sectors with valid IDs, in sector ID order, one per ID.
    logical: Vec<usize>,
}

impl F86Track {
    fn new(ch: DiskCh, flags: u16, index_hole: u32, bits: BitVec, surface: Option<Vec<u8>>) -> Result<Self, MediaError> {
        let encoding = f86_track_encoding(flags).ok_or_else(|| {
            log::error!("Unsupported data encoding: {:04X}", flags);
            MediaError::UnsupportedFormat
        })?;
        let data_rate = f86_track_data_rate(flags).ok_or_else(|| {
            log::error!("Unsupported data rate: {:04X}", flags);
            MediaError::UnsupportedFormat
        })?;

        let mut track = F86Track {
            ch,
            flags,
            index_hole,
            encoding,
            data_rate,
            bits,
            surface,
            sectors: Vec::new(),
            logical: Vec::new(),
        };
        track.rescan();
        Ok(track)
    }

    fn rescan(&mut self) {
        self.sectors = match self.encoding {
            DiskDataEncoding::Mfm => mfm::scan_sectors(&self.bits),
            DiskDataEncoding::Fm => Vec::new(),
        };
        let mut logical: Vec<usize> = (0..self.sectors.len()).filter(|&i| self.sectors[i].id_crc_valid).collect();
        logical.sort_by_key(|&i| self.sectors[i].chsn.s());
        logical.dedup_by_key(|i| self.sectors[*i].chsn.s());
        self.logical = logical;
        log::trace!(
            "F86Track::rescan(): Track {} has {} sector IDs",
            self.ch,
            self.sectors.len()
        );
    }

    /// Find logical sector `s` (1-based) of the track: the s-th distinct valid sector ID in
    /// ascending order.
    fn find(&self, chs: DiskChs) -> Result<&SectorHeader, MediaError> {
        (chs.s() as usize)
            .checked_sub(1)
            .and_then(|ordinal| self.logical.get(ordinal))
            .map(|&i| &self.sectors[i])
            .ok_or_else(|| MediaError::SectorNotFound(format!("no logical sector {} on track {}", chs.s(), self.ch)))
    }
}

pub struct F86Format;

impl F86Format {
    pub(crate) fn extensions() -> Vec<&'static str> {
        vec!["86f"]
    }

    pub(crate) fn capabilities() -> FormatCaps {
        FormatCaps::CAP_WRITE
            | FormatCaps::CAP_CREATE
            | FormatCaps::CAP_SECTOR_IDS
            | FormatCaps::CAP_DATA_CRC
            | FormatCaps::CAP_DATA_DELETED
            | FormatCaps::CAP_TRACK_ENCODING
            | FormatCaps::CAP_TRACK_DATA_RATE
            | FormatCaps::CAP_BITSTREAM
    }

    pub(crate) fn detect<RS: ReadSeek>(image: &mut RS) -> bool {
        if image.seek(SeekFrom::Start(0)).is_err() {
            return false;
        }
        let detected = match FileHeader::read(image) {
            Ok(header) => &header.id == b"86BF" && header.minor_version == 0x0C && header.major_version == 0x02,
            Err(_) => false,
        };
        _ = image.seek(SeekFrom::Start(0));
        detected
    }

    fn load<RS: ReadSeek>(read_buf: &mut RS) -> Result<(u16, Vec<F86Track>), MediaError> {
        read_buf.seek(SeekFrom::Start(0))?;
        let header = FileHeader::read(read_buf)?;
        let stream_len = read_buf.seek(SeekFrom::End(0))?;

        let has_surface_desc = header.flags & F86_DISK_HAS_SURFACE_DESC != 0;
        if (header.flags & F86_DISK_HOLE_MASK) >> 1 > 1 {
            log::error!("Extended density images not supported.");
            return Err(MediaError::UnsupportedFormat);
        }
        if header.flags & F86_DISK_TYPE != 0 {
            log::error!("Images with Zoned RPM unsupported.");
            return Err(MediaError::UnsupportedFormat);
        }
        if header.flags & F86_DISK_REVERSE_ENDIAN != 0 {
            log::error!("Big-endian 86f images are not supported.");
            return Err(MediaError::UnsupportedFormat);
        }

        let heads: usize = if header.flags & F86_DISK_SIDES != 0 { 2 } else { 1 };
        let extra_bitcell_mode = header.flags & F86_DISK_BITCELL_MODE != 0;
        let time_shift = f86_disk_time_shift(header.flags);
        let absolute_bitcell_count = extra_bitcell_mode
            && header.flags & F86_DISK_RPM_SLOWDOWN == 0
            && header.flags & F86_DISK_SPEEDUP_FLAG != 0;
        log::debug!(
            "F86Format::load(): flags {:04X} heads {} time shift {:?} absolute bitcells: {}",
            header.flags,
            heads,
            time_shift,
            absolute_bitcell_count
        );

        // The offset table holds 256 entries per head. Unused entries are zero.
        read_buf.seek(SeekFrom::Start(F86_HEADER_LEN as u64))?;
        let mut table = vec![0u8; F86_TRACK_TABLE_LEN_PER_HEAD * heads * 4];
        read_buf.read_exact(&mut table)?;
        let offsets: Vec<u64> = table
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64)
            .take_while(|&o| o != 0)
            .collect();

        if offsets.is_empty() {
            return Err(MediaError::malformed("86f image has no tracks"));
        }

        let mut tracks = Vec::with_capacity(offsets.len());
        for (i, &offset) in offsets.iter().enumerate() {
            let end = offsets.get(i + 1).copied().unwrap_or(stream_len);
            if end <= offset || end > stream_len {
                log::error!("F86Format::load(): Bad track offset {:X} (next {:X})", offset, end);
                return Err(MediaError::malformed("86f track offset table is inconsistent"));
            }
            let header_len = if extra_bitcell_mode { 10 } else { 6 };
            if end - offset < header_len {
                log::error!(
                    "F86Format::load(): Track {} is {} bytes, shorter than its header",
                    i,
                    end - offset
                );
                return Err(MediaError::malformed("86f track entry is shorter than its header"));
            }
            read_buf.seek(SeekFrom::Start(offset))?;

            let (flags, extra_bitcells, index_hole) = if extra_bitcell_mode {
                let th = TrackHeaderBitCells::read(read_buf)?;
                (th.flags, th.bit_cells, th.index_hole)
            }
            else {
                let th = TrackHeader::read(read_buf)?;
                (th.flags, 0, th.index_hole)
            };

            let raw_track_size = (end - offset) as usize - header_len as usize;
            let data_size = if has_surface_desc { raw_track_size / 2 } else { raw_track_size };
            let mut data = vec![0u8; data_size];
            read_buf.read_exact(&mut data)?;
            let surface = if has_surface_desc {
                let mut surface = vec![0u8; data_size];
                read_buf.read_exact(&mut surface)?;
                Some(surface)
            }
            else {
                None
            };

            let rpm = f86_track_rpm(flags).ok_or_else(|| {
                log::error!("Unsupported RPM: {:04X}", flags);
                MediaError::UnsupportedFormat
            })?;
            let encoding = f86_track_encoding(flags).ok_or(MediaError::UnsupportedFormat)?;
            let rate = f86_track_data_rate(flags).ok_or(MediaError::UnsupportedFormat)?;

            let bitcell_ct = if absolute_bitcell_count {
                if extra_bitcells < 0 || extra_bitcells as usize > data_size * 8 {
                    log::error!(
                        "Absolute bitcell count {} exceeds track data of {} bytes",
                        extra_bitcells,
                        data_size
                    );
                    return Err(MediaError::malformed("86f absolute bitcell count exceeds track data"));
                }
                extra_bitcells as usize
            }
            else {
                let calculated = f86_track_bit_length(encoding, rate, rpm, time_shift, extra_bitcells);
                if calculated > data_size * 8 {
                    log::warn!(
                        "Calculated bitcell count {} exceeds track data of {} bits",
                        calculated,
                        data_size * 8
                    );
                }
                calculated.min(data_size * 8)
            };

            let mut bits = BitVec::from_bytes(&data);
            bits.truncate(bitcell_ct);

            let ch = DiskCh::new((i / heads) as u16, (i % heads) as u8);
            tracks.push(F86Track::new(ch, flags, index_hole, bits, surface)?);
        }

        Ok((header.flags, tracks))
    }

    /// Serialize tracks in absolute bitcell mode.
    fn serialize(disk_flags: u16, tracks: &[F86Track]) -> Result<Vec<u8>, MediaError> {
        let heads = if disk_flags & F86_DISK_SIDES != 0 { 2 } else { 1 };
        if tracks.len() > F86_TRACK_TABLE_LEN_PER_HEAD * heads {
            return Err(MediaError::ParameterError);
        }

        let flags = (disk_flags & !(F86_DISK_RPM_SLOWDOWN | F86_DISK_SPEEDUP_FLAG | F86_DISK_BITCELL_MODE))
            | F86_DISK_BITCELL_MODE
            | F86_DISK_SPEEDUP_FLAG;
        let has_surface = flags & F86_DISK_HAS_SURFACE_DESC != 0;

        let mut out = Cursor::new(Vec::new());
        FileHeader::new(flags).write(&mut out)?;

        let table_len = F86_TRACK_TABLE_LEN_PER_HEAD * heads * 4;
        let mut offset = (F86_HEADER_LEN + table_len) as u32;
        let mut table = Vec::with_capacity(table_len);
        let mut body = Cursor::new(Vec::new());

        for track in tracks {
            table.extend_from_slice(&offset.to_le_bytes());

            let mut data = track.bits.to_bytes();
            if data.len() % 2 != 0 {
                data.push(0);
            }
            TrackHeaderBitCells {
                flags: track.flags,
                bit_cells: track.bits.len() as i32,
                index_hole: track.index_hole,
            }
            .write(&mut body)?;
            body.write_all(&data)?;
            let mut written = 10 + data.len();

            if has_surface {
                let mut surface = track.surface.clone().unwrap_or_default();
                surface.resize(data.len(), 0);
                body.write_all(&surface)?;
                written += surface.len();
            }
            offset += written as u32;
        }
        table.resize(table_len, 0);

        out.write_all(&table)?;
        out.write_all(body.get_ref())?;
        Ok(out.into_inner())
    }
}

pub struct F86Image {
    file: File,
    disk_flags: u16,
    heads: u8,
    tracks: Vec<F86Track>,
    dirty: bool,
    descriptor: ImageDescriptor,
}

impl F86Image {
    pub(crate) fn open(mut file: File, path: &Path, _opts: &ImageOpenOptions, read_only: bool) -> Result<F86Image, MediaError> {
        let (disk_flags, tracks) = F86Format::load(&mut file)?;
        let heads: u8 = if disk_flags & F86_DISK_SIDES != 0 { 2 } else { 1 };
        let byte_size = file.seek(SeekFrom::End(0))?;

        let spt = tracks
            .iter()
            .map(|t| t.logical.len())
            .max()
            .unwrap_or(0);
        let sector_size = tracks
            .iter()
            .flat_map(|t| t.sectors.first())
            .map(|h| h.chsn.n_size())
            .next()
            .unwrap_or(crate::DEFAULT_SECTOR_SIZE);
        let cylinders = tracks.len().div_ceil(heads as usize);
        let geometry = DiskGeometry::new(cylinders as u32, heads as u32, spt as u32, sector_size);
        log::debug!("F86Image::open(): {} tracks, geometry {}", tracks.len(), geometry);

        let mut descriptor = ImageDescriptor::new(ImageFormat::F86, path, geometry);
        descriptor.byte_size = byte_size;
        descriptor.write_protected = read_only || disk_flags & F86_DISK_WRITE_PROTECT != 0;
        descriptor.standard_format = StandardFormat::from_size(geometry.total_bytes() as usize).first().copied();

        Ok(F86Image {
            file,
            disk_flags,
            heads,
            tracks,
            dirty: false,
            descriptor,
        })
    }

    /// Create an 86f image of freshly formatted tracks for a standard floppy format.
    pub fn create(path: &Path, format: StandardFormat) -> Result<(), MediaError> {
        let chsn = format.chsn();
        let hole = match format.data_rate() {
            DiskDataRate::Rate250Kbps | DiskDataRate::Rate300Kbps => 0,
            DiskDataRate::Rate500Kbps => 1 << 1,
            _ => {
                log::error!("F86Image::create(): Extended density formats are not supported");
                return Err(MediaError::UnsupportedFormat);
            }
        };
        let rate_bits = f86_rate_bits(format.data_rate()).ok_or(MediaError::UnsupportedFormat)?;
        let rpm_bits = if format.rpm() == 360 { 1 << 5 } else { 0 };
        let track_flags = rate_bits | (1 << 3) | rpm_bits;
        let bitcell_ct = format.bitcell_ct();

        let mut tracks = Vec::with_capacity(chsn.c() as usize * chsn.h() as usize);
        for c in 0..chsn.c() {
            for h in 0..chsn.h() {
                let ids: Vec<DiskChsn> = (1..=chsn.s()).map(|s| DiskChsn::new(c, h, s, chsn.n())).collect();
                let formatted = mfm::format_track_as_bytes(bitcell_ct, &ids, FORMAT_FILL_BYTE, format.gap3())?;
                let bits = mfm::encode_track(&formatted, bitcell_ct);
                tracks.push(F86Track::new(DiskCh::new(c, h), track_flags, 0, bits, None)?);
            }
        }

        let sides = if chsn.h() > 1 { F86_DISK_SIDES } else { 0 };
        let bytes = F86Format::serialize(hole | sides, &tracks)?;
        let mut file = File::create(path).map_err(|e| MediaError::unwritable(path, e))?;
        file.write_all(&bytes)?;
        Ok(())
    }

    fn track_index(&self, ch: DiskCh) -> Result<usize, MediaError> {
        let idx = ch.c() as usize * self.heads as usize + ch.h() as usize;
        if ch.h() >= self.heads || idx >= self.tracks.len() {
            return Err(MediaError::SectorNotFound(format!("no track {}", ch)));
        }
        Ok(idx)
    }

    fn locate(&self, lba: u64) -> Result<(usize, DiskChs), MediaError> {
        let chs = self.descriptor.geometry.lba_to_chs(lba)?;
        Ok((self.track_index(chs.ch())?, chs))
    }
}

impl MediaImage for F86Image {
    fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    fn read_block(&mut self, lba: u64) -> Result<Vec<u8>, MediaError> {
        self.descriptor.check_read(lba)?;
        let (idx, chs) = self.locate(lba)?;
        let track = &self.tracks[idx];
        let header = track.find(chs)?;
        let field = header
            .data
            .ok_or_else(|| MediaError::SectorNotFound(format!("sector {} has no data field", chs)))?;

        let (data, crc_ok) = mfm::read_data(&track.bits, &field, header.chsn.n_size())?;
        if !crc_ok {
            log::debug!("F86Image::read_block(): Data CRC error in sector {}", chs);
            return Err(MediaError::CrcError);
        }
        Ok(data)
    }

    fn write_block(&mut self, lba: u64, data: &[u8]) -> Result<(), MediaError> {
        self.descriptor.check_write(lba, data)?;
        let (idx, chs) = self.locate(lba)?;
        let track = &mut self.tracks[idx];
        let header = *track.find(chs)?;
        let field = header
            .data
            .ok_or_else(|| MediaError::SectorNotFound(format!("sector {} has no data field", chs)))?;
        if header.chsn.n_size() != data.len() {
            return Err(MediaError::ParameterError);
        }

        mfm::write_data(&mut track.bits, &field, data)?;
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MediaError> {
        if !self.dirty {
            return Ok(());
        }
        let bytes = F86Format::serialize(self.disk_flags, &self.tracks)?;
        overwrite_file(&mut self.file, &bytes)?;
        self.descriptor.byte_size = bytes.len() as u64;
        self.dirty = false;
        log::debug!("F86Image::flush(): Wrote {} bytes", bytes.len());
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn read_track(&mut self, ch: DiskCh) -> Result<TrackData, MediaError> {
        let track = &self.tracks[self.track_index(ch)?];
        Ok(TrackData {
            ch,
            encoding: track.encoding,
            data_rate: track.data_rate,
            bits: track.bits.clone(),
        })
    }

    fn write_track(&mut self, data: TrackData) -> Result<(), MediaError> {
        if self.descriptor.write_protected {
            return Err(MediaError::WriteProtected);
        }
        let idx = self.track_index(data.ch)?;
        let rate_bits = f86_rate_bits(data.data_rate).ok_or(MediaError::UnsupportedFormat)?;
        let encoding_bits = match data.encoding {
            DiskDataEncoding::Fm => 0,
            DiskDataEncoding::Mfm => 1 << 3,
        };

        let track = &mut self.tracks[idx];
        track.flags = (track.flags & !0x1F) | rate_bits | encoding_bits;
        track.encoding = data.encoding;
        track.data_rate = data.data_rate;
        track.bits = data.bits;
        track.rescan();
        self.dirty = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_lengths() {
        let mfm = DiskDataEncoding::Mfm;
        assert_eq!(
            f86_track_bit_length(mfm, DiskDataRate::Rate250Kbps, 300, F86TimeShift::ZeroPercent, 0),
            100_000
        );
        assert_eq!(
            f86_track_bit_length(mfm, DiskDataRate::Rate500Kbps, 360, F86TimeShift::ZeroPercent, 0),
            166_656
        );
        assert_eq!(
            f86_track_bit_length(mfm, DiskDataRate::Rate250Kbps, 300, F86TimeShift::SlowOneAndAHalfPercent, 0),
            101_488
        );
        assert_eq!(
            f86_track_bit_length(DiskDataEncoding::Fm, DiskDataRate::Rate250Kbps, 300, F86TimeShift::ZeroPercent, 8),
            50_008
        );
    }

    #[test]
    fn time_shift_flags() {
        assert!(matches!(f86_disk_time_shift(0), F86TimeShift::ZeroPercent));
        assert!(matches!(f86_disk_time_shift(0b0100_0000), F86TimeShift::SlowOneAndAHalfPercent));
        assert!(matches!(
            f86_disk_time_shift(0b0110_0000 | F86_DISK_SPEEDUP_FLAG),
            F86TimeShift::FastTwoPercent
        ));
    }

    #[test]
    fn formatted_image_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.86f");
        F86Image::create(&path, StandardFormat::PcFloppy360).unwrap();

        let mut file = File::open(&path).unwrap();
        assert!(F86Format::detect(&mut file));
        let (flags, tracks) = F86Format::load(&mut file).unwrap();
        assert_ne!(flags & F86_DISK_SIDES, 0);
        assert_eq!(tracks.len(), 80);
        assert_eq!(tracks[3].ch, DiskCh::new(1, 1));
        assert_eq!(tracks[3].bits.len(), 100_000);
        assert_eq!(tracks[3].sectors.len(), 9);
        assert!(tracks[3].sectors.iter().all(|s| s.id_crc_valid && s.data.is_some()));
    }

    #[test]
    fn zero_based_ids_follow_id_order() {
        let ids: Vec<DiskChsn> = [2u8, 0, 3, 1].iter().map(|&s| DiskChsn::new(0, 0, s, 2)).collect();
        let formatted = mfm::format_track_as_bytes(100_000, &ids, 0xE5, 0x50).unwrap();
        let bits = mfm::encode_track(&formatted, 100_000);
        // MFM at 250 Kbps.
        let track = F86Track::new(DiskCh::new(0, 0), 0x0A, 0, bits, None).unwrap();

        for s in 1..=4u8 {
            assert_eq!(track.find(DiskChs::new(0, 0, s)).unwrap().chsn.s(), s - 1);
        }
        assert!(matches!(
            track.find(DiskChs::new(0, 0, 5)),
            Err(MediaError::SectorNotFound(_))
        ));
    }

    #[test]
    fn short_track_entry_is_malformed() {
        let mut image = Vec::new();
        FileHeader::new(0).write(&mut Cursor::new(&mut image)).unwrap();
        let mut table = vec![0u8; F86_TRACK_TABLE_LEN_PER_HEAD * 4];
        table[0..4].copy_from_slice(&1032u32.to_le_bytes());
        table[4..8].copy_from_slice(&1036u32.to_le_bytes());
        image.extend_from_slice(&table);
        image.resize(1036 + 6 + 64, 0);

        assert!(matches!(
            F86Format::load(&mut Cursor::new(image)),
            Err(MediaError::MalformedHeader(_))
        ));
    }

    #[test]
    fn extended_density_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ed.86f");
        assert!(matches!(
            F86Image::create(&path, StandardFormat::PcFloppy2880),
            Err(MediaError::UnsupportedFormat)
        ));
        assert!(!path.exists());
    }
}
