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

    src/file_parsers/cassette.rs

    Cassette tape images. Two representations are supported:
     * CAS: the demodulated bit stream, packed MSB first.
     * PCM: unsigned 8-bit mono samples; a sample at or above the midpoint
       reads as a one.

    A tape is sequential media. The whole tape is held in memory with a
    play/record head position. Block access is also offered over the raw
    tape bytes for tools that want to inspect or patch an image.
*/
use std::{fs::File, path::Path};

use crate::{
    diskimage::{ImageDescriptor, ImageOpenOptions, MediaImage},
    file_parsers::{FormatCaps, ImageFormat},
    io::{Read, Seek, SeekFrom, Write},
    util::overwrite_file,
    DiskGeometry,
    MediaError,
    DEFAULT_SECTOR_SIZE,
};

pub const PCM_MIDPOINT: u8 = 0x80;
pub const PCM_HIGH: u8 = 0xC0;
pub const PCM_LOW: u8 = 0x40;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TapeEncoding {
    Bits,
    Pcm,
}

impl TapeEncoding {
    pub fn for_path(path: &Path) -> TapeEncoding {
        match path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()) {
            Some(ext) if ext == "pcm" => TapeEncoding::Pcm,
            _ => TapeEncoding::Bits,
        }
    }
}

pub struct CassetteFormat;

impl CassetteFormat {
    pub(crate) fn extensions() -> Vec<&'static str> {
        vec!["cas", "pcm"]
    }

    pub(crate) fn capabilities() -> FormatCaps {
        FormatCaps::CAP_WRITE | FormatCaps::CAP_CREATE
    }
}

pub struct CassetteImage {
    file: File,
    encoding: TapeEncoding,
    tape: Vec<u8>,
    /// Head position, in bits for CAS tapes and in samples for PCM tapes.
    position: u64,
    dirty: bool,
    descriptor: ImageDescriptor,
}

impl CassetteImage {
    pub(crate) fn open(mut file: File, path: &Path, _opts: &ImageOpenOptions, read_only: bool) -> Result<CassetteImage, MediaError> {
        let encoding = TapeEncoding::for_path(path);
        let mut tape = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut tape)?;
        log::debug!("CassetteImage::open(): {:?} tape of {} bytes", encoding, tape.len());

        let mut descriptor = ImageDescriptor::new(ImageFormat::Cassette, path, Self::geometry_for(tape.len()));
        descriptor.byte_size = tape.len() as u64;
        descriptor.write_protected = read_only;

        Ok(CassetteImage {
            file,
            encoding,
            tape,
            position: 0,
            dirty: false,
            descriptor,
        })
    }

    /// Create a blank tape of `len` bytes. PCM tapes are filled with silence at the midpoint.
    pub fn create(path: &Path, len: u64) -> Result<(), MediaError> {
        let fill = match TapeEncoding::for_path(path) {
            TapeEncoding::Bits => 0,
            TapeEncoding::Pcm => PCM_MIDPOINT,
        };
        let mut file = File::create(path).map_err(|e| MediaError::unwritable(path, e))?;
        file.write_all(&vec![fill; len as usize])?;
        file.flush()?;
        Ok(())
    }

    fn geometry_for(len: usize) -> DiskGeometry {
        DiskGeometry::linear((len as u64).div_ceil(DEFAULT_SECTOR_SIZE as u64), DEFAULT_SECTOR_SIZE)
    }

    pub fn encoding(&self) -> TapeEncoding {
        self.encoding
    }

    /// Tape length in bits (CAS) or samples (PCM).
    pub fn len(&self) -> u64 {
        match self.encoding {
            TapeEncoding::Bits => self.tape.len() as u64 * 8,
            TapeEncoding::Pcm => self.tape.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tape.is_empty()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }

    pub fn seek(&mut self, position: u64) {
        self.position = position.min(self.len());
    }

    /// Read the bit under the head and advance. Returns `None` at the end of the tape.
    pub fn read_bit(&mut self) -> Option<bool> {
        if self.position >= self.len() {
            return None;
        }
        let bit = match self.encoding {
            TapeEncoding::Bits => {
                let byte = self.tape[(self.position / 8) as usize];
                byte & (0x80 >> (self.position % 8)) != 0
            }
            TapeEncoding::Pcm => self.tape[self.position as usize] >= PCM_MIDPOINT,
        };
        self.position += 1;
        Some(bit)
    }

    /// Record a bit at the head and advance. Recording past the end extends the tape.
    pub fn write_bit(&mut self, bit: bool) -> Result<(), MediaError> {
        if self.descriptor.write_protected {
            return Err(MediaError::WriteProtected);
        }
        match self.encoding {
            TapeEncoding::Bits => {
                let index = (self.position / 8) as usize;
                if index >= self.tape.len() {
                    self.tape.resize(index + 1, 0);
                }
                let mask = 0x80 >> (self.position % 8);
                if bit {
                    self.tape[index] |= mask;
                }
                else {
                    self.tape[index] &= !mask;
                }
            }
            TapeEncoding::Pcm => {
                let index = self.position as usize;
                if index >= self.tape.len() {
                    self.tape.resize(index + 1, PCM_MIDPOINT);
                }
                self.tape[index] = if bit { PCM_HIGH } else { PCM_LOW };
            }
        }
        self.position += 1;
        self.dirty = true;
        self.descriptor.geometry = Self::geometry_for(self.tape.len());
        Ok(())
    }
}

impl MediaImage for CassetteImage {
    fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    fn read_block(&mut self, lba: u64) -> Result<Vec<u8>, MediaError> {
        self.descriptor.check_read(lba)?;
        let start = lba as usize * DEFAULT_SECTOR_SIZE;
        let end = (start + DEFAULT_SECTOR_SIZE).min(self.tape.len());
        let mut buf = self.tape[start..end].to_vec();
        buf.resize(DEFAULT_SECTOR_SIZE, 0);
        Ok(buf)
    }

    fn write_block(&mut self, lba: u64, data: &[u8]) -> Result<(), MediaError> {
        self.descriptor.check_write(lba, data)?;
        let start = lba as usize * DEFAULT_SECTOR_SIZE;
        let end = (start + DEFAULT_SECTOR_SIZE).min(self.tape.len());
        self.tape[start..end].copy_from_slice(&data[..end - start]);
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MediaError> {
        if !self.dirty {
            return Ok(());
        }
        overwrite_file(&mut self.file, &self.tape)?;
        self.descriptor.byte_size = self.tape.len() as u64;
        self.dirty = false;
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(path: &Path) -> CassetteImage {
        let file = File::options().read(true).write(true).open(path).unwrap();
        CassetteImage::open(file, path, &ImageOpenOptions::default(), false).unwrap()
    }

    #[test]
    fn cas_bits_msb_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tape.cas");
        std::fs::write(&path, [0b1010_0000]).unwrap();

        let mut tape = open(&path);
        assert_eq!(tape.len(), 8);
        let bits: Vec<bool> = std::iter::from_fn(|| tape.read_bit()).collect();
        assert_eq!(bits, vec![true, false, true, false, false, false, false, false]);
        assert_eq!(tape.read_bit(), None);
    }

    #[test]
    fn record_extends_tape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tape.pcm");
        CassetteImage::create(&path, 2).unwrap();

        let mut tape = open(&path);
        assert_eq!(tape.encoding(), TapeEncoding::Pcm);
        tape.seek(1);
        for bit in [true, true, false] {
            tape.write_bit(bit).unwrap();
        }
        tape.flush().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![PCM_MIDPOINT, PCM_HIGH, PCM_HIGH, PCM_LOW]);

        let mut tape = open(&path);
        tape.rewind();
        assert_eq!(tape.read_bit(), Some(true));
        assert_eq!(tape.read_bit(), Some(true));
    }
}
