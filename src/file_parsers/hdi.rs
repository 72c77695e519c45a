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

    src/file_parsers/hdi.rs

    HDI hard disk images. A little-endian header of eight 32-bit fields,
    padded out to the data base offset (0x1000 for images we create),
    followed by the sector data. HDI has no signature and is recognized by
    its extension.
*/
use std::{fs::File, path::Path};

use binrw::{binrw, BinRead, BinWrite};

use crate::{
    diskimage::{ImageDescriptor, ImageOpenOptions, MediaImage},
    file_parsers::{raw::write_zeroes, FormatCaps, ImageFormat},
    geometry::{check_capacity, HDI_MAX_BYTES},
    io::{Read, Seek, SeekFrom, Write},
    progress::ProgressCallback,
    util::get_length,
    DiskGeometry,
    MediaError,
    DEFAULT_SECTOR_SIZE,
};

pub const HDI_HEADER_BASE: u32 = 0x1000;

#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct HdiHeader {
    pub reserved: u32,
    pub disk_type: u32,
    pub base: u32,
    pub data_size: u32,
    pub sector_size: u32,
    pub sectors: u32,
    pub heads: u32,
    pub cylinders: u32,
}

impl HdiHeader {
    fn for_geometry(geometry: &DiskGeometry) -> Result<HdiHeader, MediaError> {
        let data_size = geometry.total_bytes();
        if data_size > HDI_MAX_BYTES {
            return Err(MediaError::SizeExceeded {
                requested: data_size,
                limit:     HDI_MAX_BYTES,
            });
        }
        Ok(HdiHeader {
            reserved: 0,
            disk_type: 0,
            base: HDI_HEADER_BASE,
            data_size: data_size as u32,
            sector_size: DEFAULT_SECTOR_SIZE as u32,
            sectors: geometry.sectors,
            heads: geometry.heads,
            cylinders: geometry.cylinders,
        })
    }
}

pub struct HdiFormat;

impl HdiFormat {
    pub(crate) fn extensions() -> Vec<&'static str> {
        vec!["hdi"]
    }

    pub(crate) fn capabilities() -> FormatCaps {
        FormatCaps::CAP_WRITE | FormatCaps::CAP_CREATE | FormatCaps::CAP_FIXED_GEOMETRY
    }
}

pub struct HdiImage {
    file: File,
    base: u64,
    descriptor: ImageDescriptor,
}

impl HdiImage {
    pub(crate) fn open(
        mut file: File,
        path: &Path,
        _opts: &ImageOpenOptions,
        read_only: bool,
    ) -> Result<HdiImage, MediaError> {
        let file_len = get_length(&mut file)?;
        let header = HdiHeader::read(&mut file)?;
        log::trace!("HdiImage::open(): Read header: {:?}", header);

        if header.sector_size as usize != DEFAULT_SECTOR_SIZE {
            log::error!("HdiImage::open(): Unsupported sector size {}", header.sector_size);
            return Err(MediaError::UnsupportedSectorSize(header.sector_size as usize));
        }
        if header.sectors == 0 || header.heads == 0 || header.cylinders == 0 {
            return Err(MediaError::malformed("HDI header has a zero geometry field"));
        }

        let geometry = DiskGeometry::new(header.cylinders, header.heads, header.sectors, DEFAULT_SECTOR_SIZE);
        let base = header.base as u64;
        if file_len < base {
            return Err(MediaError::malformed("HDI data base lies past the end of the file"));
        }
        geometry.validate_len(file_len - base)?;

        let mut descriptor = ImageDescriptor::new(ImageFormat::Hdi, path, geometry);
        descriptor.byte_size = file_len;
        descriptor.write_protected = read_only;

        Ok(HdiImage { file, base, descriptor })
    }

    /// Create an HDI image with the given geometry. The size is checked against the 4GB limit of
    /// the format before the file is created.
    pub fn create(path: &Path, geometry: DiskGeometry, progress: Option<ProgressCallback>) -> Result<(), MediaError> {
        if geometry.sector_size != DEFAULT_SECTOR_SIZE {
            return Err(MediaError::UnsupportedSectorSize(geometry.sector_size));
        }
        check_capacity(ImageFormat::Hdi, geometry.total_bytes())?;
        let header = HdiHeader::for_geometry(&geometry)?;

        let mut file = File::create(path).map_err(|e| MediaError::unwritable(path, e))?;
        header.write(&mut file)?;
        let header_len = file.stream_position()?;
        write_zeroes(&mut file, HDI_HEADER_BASE as u64 - header_len, None)?;
        write_zeroes(&mut file, geometry.total_bytes(), progress)?;
        file.flush()?;
        Ok(())
    }
}

impl MediaImage for HdiImage {
    fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    fn read_block(&mut self, lba: u64) -> Result<Vec<u8>, MediaError> {
        self.descriptor.check_read(lba)?;
        let mut buf = vec![0u8; DEFAULT_SECTOR_SIZE];
        self.file
            .seek(SeekFrom::Start(self.base + lba * DEFAULT_SECTOR_SIZE as u64))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_block(&mut self, lba: u64, data: &[u8]) -> Result<(), MediaError> {
        self.descriptor.check_write(lba, data)?;
        self.file
            .seek(SeekFrom::Start(self.base + lba * DEFAULT_SECTOR_SIZE as u64))?;
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
    fn header_layout() {
        let header = HdiHeader::for_geometry(&DiskGeometry::new(615, 4, 17, 512)).unwrap();
        let mut out = Cursor::new(Vec::new());
        header.write(&mut out).unwrap();
        let bytes = out.into_inner();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[8..12], &0x1000u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &(615u32 * 4 * 17 * 512).to_le_bytes());
        assert_eq!(&bytes[16..20], &512u32.to_le_bytes());
        assert_eq!(&bytes[28..32], &615u32.to_le_bytes());
    }

    #[test]
    fn oversized_geometry_is_rejected() {
        let geometry = DiskGeometry::new(16383, 16, 63, 512);
        assert!(geometry.total_bytes() > HDI_MAX_BYTES);
        assert!(matches!(
            HdiHeader::for_geometry(&geometry),
            Err(MediaError::SizeExceeded { .. })
        ));
    }
}
