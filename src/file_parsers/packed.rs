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


    src/file_parsers/packed.rs

    Compressed raw floppy images: CopyQM and FDF. Both are unpacked in full
    into a flat sector image when opened, and are always write protected.

    CopyQM: a 133-byte header starting with "CQ", then a comment, then a
    stream of blocks. Each block starts with a signed 16-bit length. A
    positive length is followed by that many literal bytes; a negative one
    by a single byte repeated -length times. Space the stream never reaches
    reads as the format fill byte.

    FDF: a 128-byte header starting with "\x1AFDF", then blocks each with a
    5-byte header of a flag, an unused word and the block length. A zero
    flag marks a literal block. Any other flag marks a block of runs: a
    count byte whose high bit selects one repeated byte over count literal
    bytes. A flag of 0xFF ends the stream. FDF images have no geometry of
    their own and are resolved like a headerless image.
*/
use std::{fs::File, path::Path};

use binrw::{binrw, BinRead, BinReaderExt};

use crate::{
    bitstream::mfm::FORMAT_FILL_BYTE,
    diskimage::{ImageDescriptor, ImageOpenOptions, MediaImage},
    file_parsers::{FormatCaps, ImageFormat},
    geometry::{resolve_floppy, FloppyResolveOptions},
    io::{Cursor, Read, ReadSeek, Seek, SeekFrom},
    DiskGeometry,
    MediaError,
    DEFAULT_SECTOR_SIZE,
};

pub const COPYQM_HEADER_LEN: usize = 133;
pub const FDF_HEADER_LEN: usize = 128;
pub const FDF_SIGNATURE: &[u8; 4] = b"\x1AFDF";
const FDF_END_OF_STREAM: u8 = 0xFF;
/// Unpacked images larger than this are rejected. The largest PC floppy is 2.88MB.
pub const PACKED_MAX_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct CopyQmHeader {
    pub signature: [u8; 2],
    #[brw(pad_before = 1)]
    pub sector_size: u16,
    #[brw(pad_before = 6)]
    pub total_sectors: u16,
    #[brw(pad_before = 3)]
    pub sectors_per_track: u16,
    pub heads: u16,
    #[brw(pad_before = 0x47)]
    pub tracks: u8,
    #[brw(pad_before = 0x13)]
    pub comment_len: u16,
    #[brw(pad_before = 3)]
    pub interleave: u8,
    #[brw(pad_before = 1)]
    pub skew: i8,
}

impl CopyQmHeader {
    fn geometry(&self) -> Result<DiskGeometry, MediaError> {
        let size = self.sector_size as usize;
        if !size.is_power_of_two() || !(128..=8192).contains(&size) {
            log::error!("CopyQmHeader::geometry(): Unsupported sector size {}", size);
            return Err(MediaError::UnsupportedSectorSize(size));
        }
        let geometry = DiskGeometry::new(
            self.tracks as u32,
            self.heads as u32,
            self.sectors_per_track as u32,
            size,
        );
        if geometry.total_sectors() == 0 || geometry.total_bytes() > PACKED_MAX_BYTES as u64 {
            log::error!("CopyQmHeader::geometry(): Unusable geometry {}", geometry);
            return Err(MediaError::malformed(format!("CopyQM geometry {} is not a floppy", geometry)));
        }
        Ok(geometry)
    }
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
struct FdfBlockHeader {
    flag: u8,
    _reserved: u16,
    len: u16,
}

pub struct CopyQmFormat;

impl CopyQmFormat {
    pub(crate) fn extensions() -> Vec<&'static str> {
        vec!["cqm"]
    }

    pub(crate) fn capabilities() -> FormatCaps {
        FormatCaps::CAP_COMPRESSION | FormatCaps::CAP_COMMENT | FormatCaps::CAP_FIXED_GEOMETRY
    }

    /// The two-byte signature is weak, so the header must also describe a usable geometry.
    pub(crate) fn detect<RS: ReadSeek>(image: &mut RS) -> bool {
        let detected = image.seek(SeekFrom::Start(0)).is_ok()
            && CopyQmHeader::read(image).is_ok_and(|header| {
                matches!(&header.signature, b"CQ" | b"cq") && header.geometry().is_ok()
            });
        _ = image.seek(SeekFrom::Start(0));
        detected
    }

    /// Unpack the block stream following the header and comment into `out_len` bytes.
    pub fn unpack<R: Read + Seek>(source: &mut R, out_len: usize) -> Result<Vec<u8>, MediaError> {
        let mut out = Vec::with_capacity(out_len);

        while out.len() < out_len {
            let Ok(len) = source.read_le::<i16>()
            else {
                break;
            };
            let room = out_len - out.len();
            if len < 0 {
                let Ok(fill) = source.read_le::<u8>()
                else {
                    log::warn!("CopyQmFormat::unpack(): Stream ends inside a repeat block");
                    break;
                };
                out.resize(out.len() + (len.unsigned_abs() as usize).min(room), fill);
            }
            else if len > 0 {
                let mut literal = Vec::with_capacity(len as usize);
                source.by_ref().take(len as u64).read_to_end(&mut literal)?;
                if literal.len() < len as usize {
                    log::warn!("CopyQmFormat::unpack(): Stream ends inside a literal block");
                }
                literal.truncate(room);
                out.extend_from_slice(&literal);
            }
        }

        if out.len() < out_len {
            log::debug!(
                "CopyQmFormat::unpack(): Stream covers {} of {} bytes, filling the rest",
                out.len(),
                out_len
            );
            out.resize(out_len, FORMAT_FILL_BYTE);
        }
        Ok(out)
    }
}

pub struct FdfFormat;

impl FdfFormat {
    pub(crate) fn extensions() -> Vec<&'static str> {
        vec!["fdf"]
    }

    pub(crate) fn capabilities() -> FormatCaps {
        FormatCaps::CAP_COMPRESSION
    }

    pub(crate) fn detect<RS: ReadSeek>(image: &mut RS) -> bool {
        let mut signature = [0u8; 4];
        let detected = image.seek(SeekFrom::Start(0)).is_ok()
            && image.read_exact(&mut signature).is_ok()
            && &signature == FDF_SIGNATURE;
        _ = image.seek(SeekFrom::Start(0));
        detected
    }

    /// Unpack the block stream that follows the header.
    pub fn unpack<R: Read + Seek>(source: &mut R) -> Result<Vec<u8>, MediaError> {
        let truncated = || MediaError::malformed("FDF block runs past the end of the image");
        let mut out = Vec::new();

        while let Ok(block) = FdfBlockHeader::read(source) {
            if block.flag == FDF_END_OF_STREAM {
                break;
            }

            let mut remaining = block.len as usize;
            if block.flag == 0 {
                let start = out.len();
                out.resize(start + remaining, 0);
                source.read_exact(&mut out[start..]).map_err(|_| truncated())?;
            }
            else {
                while remaining > 0 {
                    let run: u8 = source.read_le().map_err(|_| truncated())?;
                    let count = (run & 0x7F) as usize;
                    remaining -= 1;

                    if run & 0x80 != 0 {
                        let byte: u8 = source.read_le().map_err(|_| truncated())?;
                        remaining = remaining.checked_sub(1).ok_or_else(truncated)?;
                        out.resize(out.len() + count, byte);
                    }
                    else {
                        remaining = remaining.checked_sub(count).ok_or_else(truncated)?;
                        let start = out.len();
                        out.resize(start + count, 0);
                        source.read_exact(&mut out[start..]).map_err(|_| truncated())?;
                    }
                }
            }

            if out.len() > PACKED_MAX_BYTES {
                log::error!("FdfFormat::unpack(): Image unpacks to more than {} bytes", PACKED_MAX_BYTES);
                return Err(MediaError::malformed("FDF image is too large for a floppy"));
            }
        }
        Ok(out)
    }
}

/// A CopyQM or FDF image, held unpacked in memory.
pub struct PackedImage {
    data: Vec<u8>,
    comment: Option<String>,
    descriptor: ImageDescriptor,
}

impl PackedImage {
    pub(crate) fn open(mut file: File, path: &Path, opts: &ImageOpenOptions, _read_only: bool) -> Result<PackedImage, MediaError> {
        let file_len = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::with_capacity(file_len as usize);
        file.read_to_end(&mut bytes)?;
        let mut cursor = Cursor::new(bytes);

        let (format, data, geometry, comment) = if FdfFormat::detect(&mut cursor) {
            cursor.seek(SeekFrom::Start(FDF_HEADER_LEN as u64))?;
            let data = FdfFormat::unpack(&mut cursor)?;
            let boot_sector = data.get(..DEFAULT_SECTOR_SIZE);
            let resolved = resolve_floppy(
                data.len() as u64,
                boot_sector,
                FloppyResolveOptions {
                    explicit:  opts.geometry,
                    check_bpb: true,
                },
            )?;
            (ImageFormat::Fdf, data, resolved.geometry, None)
        }
        else if CopyQmFormat::detect(&mut cursor) {
            let header = CopyQmHeader::read(&mut cursor)?;
            log::trace!("PackedImage::open(): CopyQM header: {:?}", header);
            let geometry = header.geometry()?;

            cursor.seek(SeekFrom::Start(COPYQM_HEADER_LEN as u64))?;
            let mut comment = Vec::new();
            cursor.by_ref().take(header.comment_len as u64).read_to_end(&mut comment)?;
            let comment = String::from_utf8_lossy(&comment).trim_end_matches('\0').trim().to_string();

            let data = CopyQmFormat::unpack(&mut cursor, geometry.total_bytes() as usize)?;
            (ImageFormat::CopyQm, data, geometry, (!comment.is_empty()).then_some(comment))
        }
        else {
            return Err(MediaError::UnsupportedFormat);
        };

        log::debug!(
            "PackedImage::open(): {} unpacked to {} bytes, geometry {}",
            format,
            data.len(),
            geometry
        );

        let mut descriptor = ImageDescriptor::new(format, path, geometry);
        descriptor.byte_size = file_len;
        descriptor.write_protected = true;

        Ok(PackedImage {
            data,
            comment,
            descriptor,
        })
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }
}

impl MediaImage for PackedImage {
    fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    fn read_block(&mut self, lba: u64) -> Result<Vec<u8>, MediaError> {
        self.descriptor.check_read(lba)?;
        let size = self.descriptor.sector_size();
        let start = lba as usize * size;
        self.data
            .get(start..start + size)
            .map(|sector| sector.to_vec())
            .ok_or_else(|| MediaError::SectorNotFound(format!("LBA {} lies past the unpacked data", lba)))
    }

    fn write_block(&mut self, lba: u64, data: &[u8]) -> Result<(), MediaError> {
        self.descriptor.check_write(lba, data)
    }

    fn flush(&mut self) -> Result<(), MediaError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copyqm_blocks_unpack() {
        // 3 literal bytes, a run of 4, then a run longer than the space left.
        let stream = [3, 0, 1, 2, 3, 0xFC, 0xFF, 9, 0xF6, 0xFF, 7];
        let out = CopyQmFormat::unpack(&mut Cursor::new(stream.to_vec()), 12).unwrap();
        assert_eq!(out, vec![1, 2, 3, 9, 9, 9, 9, 7, 7, 7, 7, 7]);
    }

    #[test]
    fn copyqm_short_stream_fills() {
        let out = CopyQmFormat::unpack(&mut Cursor::new(vec![2, 0, 0xAA, 0xBB]), 5).unwrap();
        assert_eq!(out, vec![0xAA, 0xBB, FORMAT_FILL_BYTE, FORMAT_FILL_BYTE, FORMAT_FILL_BYTE]);
    }

    #[test]
    fn copyqm_header_fields() {
        let mut header = vec![0u8; COPYQM_HEADER_LEN];
        header[0..3].copy_from_slice(b"CQ\x14");
        header[0x03..0x05].copy_from_slice(&512u16.to_le_bytes());
        header[0x0B..0x0D].copy_from_slice(&720u16.to_le_bytes());
        header[0x10..0x12].copy_from_slice(&9u16.to_le_bytes());
        header[0x12..0x14].copy_from_slice(&2u16.to_le_bytes());
        header[0x5B] = 40;
        header[0x6F..0x71].copy_from_slice(&5u16.to_le_bytes());
        header[0x74] = 1;

        let parsed = CopyQmHeader::read(&mut Cursor::new(header)).unwrap();
        assert_eq!(parsed.total_sectors, 720);
        assert_eq!(parsed.comment_len, 5);
        assert_eq!(parsed.interleave, 1);
        assert_eq!(parsed.geometry().unwrap().get(), (40, 2, 9, 512));
    }

    #[test]
    fn fdf_blocks_unpack() {
        let mut stream = Vec::new();
        // A literal block.
        stream.extend_from_slice(&[0, 0, 0, 3, 0, 1, 2, 3]);
        // A run block: 2 literal bytes, then 5 repeats of 0xE5.
        stream.extend_from_slice(&[1, 0, 0, 5, 0, 0x02, 8, 9, 0x85, 0xE5]);
        stream.extend_from_slice(&[FDF_END_OF_STREAM, 0, 0, 0, 0]);
        // Anything after the end marker is ignored.
        stream.extend_from_slice(&[0, 0, 0, 1, 0, 0x77]);

        let out = FdfFormat::unpack(&mut Cursor::new(stream)).unwrap();
        assert_eq!(out, vec![1, 2, 3, 8, 9, 0xE5, 0xE5, 0xE5, 0xE5, 0xE5]);
    }

    #[test]
    fn fdf_inconsistent_run_is_malformed() {
        // The run claims 4 literal bytes but the block holds 2.
        let stream = vec![1, 0, 0, 3, 0, 0x04, 1, 2];
        assert!(matches!(
            FdfFormat::unpack(&mut Cursor::new(stream)),
            Err(MediaError::MalformedHeader(_))
        ));
    }
}
