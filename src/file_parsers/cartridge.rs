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

    src/file_parsers/cartridge.rs

    PCjr cartridge ROM images in the JRC container: a 512-byte header
    beginning with a fixed signature, with the ROM load segment at offset
    0x1CE, followed by the ROM contents. Cartridges are read-only media.
*/
use std::{fs::File, path::Path};

use crate::{
    diskimage::{ImageDescriptor, ImageOpenOptions, MediaImage},
    file_parsers::{FormatCaps, ImageFormat},
    io::{Read, ReadSeek, SeekFrom},
    util::get_length,
    DiskGeometry,
    MediaError,
    DEFAULT_SECTOR_SIZE,
};

pub const JRC_SIGNATURE: &[u8] = b"PCjr Cartridge image file";
pub const JRC_HEADER_LEN: usize = 512;
pub const JRC_SEGMENT_OFFSET: usize = 0x1CE;

pub struct CartridgeFormat;

impl CartridgeFormat {
    pub(crate) fn extensions() -> Vec<&'static str> {
        vec!["jrc"]
    }

    pub(crate) fn capabilities() -> FormatCaps {
        FormatCaps::empty()
    }

    pub(crate) fn detect<RS: ReadSeek>(image: &mut RS) -> bool {
        let mut signature = [0u8; JRC_SIGNATURE.len()];
        let detected = image.seek(SeekFrom::Start(0)).is_ok()
            && image.read_exact(&mut signature).is_ok()
            && signature == JRC_SIGNATURE;
        _ = image.seek(SeekFrom::Start(0));
        detected
    }
}

pub struct CartridgeImage {
    rom: Vec<u8>,
    segment: u16,
    descriptor: ImageDescriptor,
}

impl CartridgeImage {
    pub(crate) fn open(mut file: File, path: &Path, _opts: &ImageOpenOptions, _read_only: bool) -> Result<CartridgeImage, MediaError> {
        let file_len = get_length(&mut file)?;
        if file_len <= JRC_HEADER_LEN as u64 {
            return Err(MediaError::malformed("cartridge image holds no ROM data"));
        }

        let mut header = [0u8; JRC_HEADER_LEN];
        file.read_exact(&mut header)?;
        if !header.starts_with(JRC_SIGNATURE) {
            return Err(MediaError::malformed("missing JRC signature"));
        }
        let segment = u16::from_le_bytes([header[JRC_SEGMENT_OFFSET], header[JRC_SEGMENT_OFFSET + 1]]);

        let mut rom = Vec::with_capacity(file_len as usize - JRC_HEADER_LEN);
        file.read_to_end(&mut rom)?;
        log::debug!(
            "CartridgeImage::open(): {} byte ROM loads at segment {:04X}",
            rom.len(),
            segment
        );

        let sectors = (rom.len() as u64).div_ceil(DEFAULT_SECTOR_SIZE as u64);
        let mut descriptor = ImageDescriptor::new(
            ImageFormat::Cartridge,
            path,
            DiskGeometry::linear(sectors, DEFAULT_SECTOR_SIZE),
        );
        descriptor.byte_size = file_len;
        descriptor.write_protected = true;

        Ok(CartridgeImage {
            rom,
            segment,
            descriptor,
        })
    }

    /// The segment the ROM is mapped at.
    pub fn load_segment(&self) -> u16 {
        self.segment
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }
}

impl MediaImage for CartridgeImage {
    fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    /// Return a 512-byte window of the ROM. The last block is padded with 0xFF, as unmapped ROM
    /// space reads.
    fn read_block(&mut self, lba: u64) -> Result<Vec<u8>, MediaError> {
        self.descriptor.check_read(lba)?;
        let start = lba as usize * DEFAULT_SECTOR_SIZE;
        let end = (start + DEFAULT_SECTOR_SIZE).min(self.rom.len());
        let mut buf = self.rom[start..end].to_vec();
        buf.resize(DEFAULT_SECTOR_SIZE, 0xFF);
        Ok(buf)
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
    use crate::io::{Cursor, Write};

    fn jrc(rom: &[u8], segment: u16) -> Vec<u8> {
        let mut image = vec![0u8; JRC_HEADER_LEN];
        image[..JRC_SIGNATURE.len()].copy_from_slice(JRC_SIGNATURE);
        image[JRC_SEGMENT_OFFSET..JRC_SEGMENT_OFFSET + 2].copy_from_slice(&segment.to_le_bytes());
        image.extend_from_slice(rom);
        image
    }

    #[test]
    fn detect_signature() {
        assert!(CartridgeFormat::detect(&mut Cursor::new(jrc(&[0x55, 0xAA], 0xD000))));
        assert!(!CartridgeFormat::detect(&mut Cursor::new(vec![0u8; 1024])));
    }

    #[test]
    fn rom_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("basic.jrc");
        let mut rom = vec![0x55, 0xAA, 0x10];
        rom.resize(700, 0xCB);
        File::create(&path).unwrap().write_all(&jrc(&rom, 0xE800)).unwrap();

        let file = File::open(&path).unwrap();
        let mut image = CartridgeImage::open(file, &path, &ImageOpenOptions::default(), false).unwrap();
        assert_eq!(image.load_segment(), 0xE800);
        assert_eq!(image.geometry().total_sectors(), 2);
        assert!(image.is_write_protected());

        let block = image.read_block(1).unwrap();
        assert_eq!(block[187], 0xCB);
        assert_eq!(block[188], 0xFF);
        assert!(matches!(
            image.write_block(0, &[0u8; 512]),
            Err(MediaError::WriteProtected)
        ));
    }
}
