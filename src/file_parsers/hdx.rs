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

    src/file_parsers/hdx.rs

    HDX hard disk images: a 40-byte little-endian header starting with a
    64-bit signature, followed directly by the sector data.
*/
use std::{fs::File, path::Path};

use binrw::{binrw, BinRead, BinWrite};

use crate::{
    diskimage::{ImageDescriptor, ImageOpenOptions, MediaImage},
    file_parsers::{raw::write_zeroes, FormatCaps, ImageFormat},
    geometry::check_capacity,
    io::{Read, ReadSeek, Seek, SeekFrom, Write},
    progress::ProgressCallback,
    util::get_length,
    DiskGeometry,
    MediaError,
    DEFAULT_SECTOR_SIZE,
};

pub const HDX_SIGNATURE: u64 = 0xD778_A820_4444_5459;
pub const HDX_HEADER_LEN: u64 = 0x28;

#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct HdxHeader {
    #[br(assert(signature == HDX_SIGNATURE, "bad HDX signature"))]
    pub signature: u64,
    pub data_size: u64,
    pub sector_size: u32,
    pub sectors: u32,
    pub heads: u32,
    pub cylinders: u32,
    pub reserved: [u32; 2],
}

pub struct HdxFormat;

impl HdxFormat {
    pub(crate) fn extensions() -> Vec<&'static str> {
        vec!["hdx"]
    }

    pub(crate) fn capabilities() -> FormatCaps {
        FormatCaps::CAP_WRITE | FormatCaps::CAP_CREATE | FormatCaps::CAP_FIXED_GEOMETRY
    }

    pub(crate) fn detect<RS: ReadSeek>(image: &mut RS) -> bool {
        if image.seek(SeekFrom::Start(0)).is_err() {
            return false;
        }
        HdxHeader::read(image).is_ok()
    }
}

pub struct HdxImage {
    file: File,
    descriptor: ImageDescriptor,
}

impl HdxImage {
    pub(crate) fn open(
        mut file: File,
        path: &Path,
        _opts: &ImageOpenOptions,
        read_only: bool,
    ) -> Result<HdxImage, MediaError> {
        let file_len = get_length(&mut file)?;
        let header = HdxHeader::read(&mut file)?;
        log::trace!("HdxImage::open(): Read header: {:?}", header);

        if header.sector_size as usize != DEFAULT_SECTOR_SIZE {
            log::error!("HdxImage::open(): Unsupported sector size {}", header.sector_size);
            return Err(MediaError::UnsupportedSectorSize(header.sector_size as usize));
        }
        if header.sectors == 0 || header.heads == 0 || header.cylinders == 0 {
            return Err(MediaError::malformed("HDX header has a zero geometry field"));
        }

        let geometry = DiskGeometry::new(header.cylinders, header.heads, header.sectors, DEFAULT_SECTOR_SIZE);
        geometry.validate_len(file_len.saturating_sub(HDX_HEADER_LEN))?;

        let mut descriptor = ImageDescriptor::new(ImageFormat::Hdx, path, geometry);
        descriptor.byte_size = file_len;
        descriptor.write_protected = read_only;

        Ok(HdxImage { file, descriptor })
    }

    pub fn create(path: &Path, geometry: DiskGeometry, progress: Option<ProgressCallback>) -> Result<(), MediaError> {
        if geometry.sector_size != DEFAULT_SECTOR_SIZE {
            return Err(MediaError::UnsupportedSectorSize(geometry.sector_size));
        }
        check_capacity(ImageFormat::Hdx, geometry.total_bytes())?;

        let header = HdxHeader {
            signature: HDX_SIGNATURE,
            data_size: geometry.total_bytes(),
            sector_size: DEFAULT_SECTOR_SIZE as u32,
            sectors: geometry.sectors,
            heads: geometry.heads,
            cylinders: geometry.cylinders,
            reserved: [0; 2],
        };

        let mut file = File::create(path).map_err(|e| MediaError::unwritable(path, e))?;
        header.write(&mut file)?;
        write_zeroes(&mut file, geometry.total_bytes(), progress)?;
        file.flush()?;
        Ok(())
    }
}

impl MediaImage for HdxImage {
    fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    fn read_block(&mut self, lba: u64) -> Result<Vec<u8>, MediaError> {
        self.descriptor.check_read(lba)?;
        let mut buf = vec![0u8; DEFAULT_SECTOR_SIZE];
        self.file
            .seek(SeekFrom::Start(HDX_HEADER_LEN + lba * DEFAULT_SECTOR_SIZE as u64))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_block(&mut self, lba: u64, data: &[u8]) -> Result<(), MediaError> {
        self.descriptor.check_write(lba, data)?;
        self.file
            .seek(SeekFrom::Start(HDX_HEADER_LEN + lba * DEFAULT_SECTOR_SIZE as u64))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MediaError> {
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Cursor;

    #[test]
    fn header_is_0x28_bytes_and_detected() {
        let header = HdxHeader {
            signature: HDX_SIGNATURE,
            data_size: 512 * 17 * 4 * 10,
            sector_size: 512,
            sectors: 17,
            heads: 4,
            cylinders: 10,
            reserved: [0; 2],
        };
        let mut out = Cursor::new(Vec::new());
        header.write(&mut out).unwrap();
        assert_eq!(out.get_ref().len() as u64, HDX_HEADER_LEN);
        assert_eq!(&out.get_ref()[0..8], &[0x59, 0x54, 0x44, 0x44, 0x20, 0xA8, 0x78, 0xD7]);
        assert!(HdxFormat::detect(&mut out));

        let mut junk = Cursor::new(vec![0u8; 64]);
        assert!(!HdxFormat::detect(&mut junk));
    }
}
