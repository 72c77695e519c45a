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

    src/boot_sector/bpb.rs

    Routines for reading and writing the BIOS Parameter block.
    This structure was present from DOS 2.0 onwards, although it was expanded
    with almost every DOS release. The BPB is used to encode metadata about the
    diskette media type and filesystem.

    A raw sector image has no header, so when the drive's "check BPB" option is
    enabled the BPB is the only place an explicit geometry can come from.
*/

use crate::StandardFormat;
use binrw::{binrw, BinRead, BinWrite};
use std::io::Cursor;

// Offset of the bios parameter block in the boot sector.
pub const BPB_OFFSET: u64 = 0x0B;

const VALID_SECTOR_SIZES: [u16; 5] = [128, 256, 512, 1024, 2048];

#[derive(Debug, Default, Clone)]
#[binrw]
#[brw(little)]
pub struct BiosParameterBlock2 {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub number_of_fats: u8,
    pub root_entries: u16,
    pub total_sectors: u16,
    pub media_descriptor: u8,
    pub sectors_per_fat: u16,
}

/// BIOS Parameter Block extensions introduced in MS-DOS 3.0
#[derive(Debug, Default, Clone)]
#[binrw]
#[brw(little)]
pub struct BiosParameterBlock3 {
    pub sectors_per_track: u16,
    pub number_of_heads:   u16,
    pub hidden_sectors:    u32,
}

/// The combined BPB as found at offset 0x0B of a DOS 3.0+ boot sector.
#[derive(Debug, Default, Clone)]
#[binrw]
#[brw(little)]
pub struct BiosParameterBlock {
    pub v2: BiosParameterBlock2,
    pub v3: BiosParameterBlock3,
}

impl BiosParameterBlock {
    /// Read the BPB from a boot sector. Returns None if the sector is too short.
    pub fn from_boot_sector(sector: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(sector);
        cursor.set_position(BPB_OFFSET);
        BiosParameterBlock::read(&mut cursor).ok()
    }

    /// Write the BPB into a boot sector buffer.
    pub fn write_to_boot_sector(&self, sector: &mut [u8]) -> Result<(), binrw::Error> {
        let mut cursor = Cursor::new(sector);
        cursor.set_position(BPB_OFFSET);
        self.write(&mut cursor)
    }

    /// Check that the BPB describes a geometry a floppy drive could hold.
    /// We accept the BPB when:
    ///  - the sector size is a power of two between 128 and 2048 bytes
    ///  - it reports one or two sides
    ///  - the total sector count divides evenly into tracks of the reported sides and sectors
    pub fn has_valid_geometry(&self) -> bool {
        let sides = self.v3.number_of_heads;
        let spt = self.v3.sectors_per_track;
        let total = self.v2.total_sectors;

        if !VALID_SECTOR_SIZES.contains(&self.v2.bytes_per_sector) {
            return false;
        }
        if !(1..=2).contains(&sides) {
            return false;
        }
        if spt == 0 || spt > 63 || total == 0 {
            return false;
        }
        total % spt == 0 && total % sides == 0 && (total / spt) % sides == 0
    }

    /// Return the floppy geometry (cylinders, heads, sectors per track, sector size) reported
    /// by the BPB, if it is valid.
    pub fn geometry(&self) -> Option<(u32, u32, u32, usize)> {
        if !self.has_valid_geometry() {
            return None;
        }
        let heads = self.v3.number_of_heads as u32;
        let spt = self.v3.sectors_per_track as u32;
        let cylinders = self.v2.total_sectors as u32 / spt / heads;
        Some((cylinders, heads, spt, self.v2.bytes_per_sector as usize))
    }

    /// Try to match the BPB to one of the [`StandardFormat`]s. This is the only way to tell
    /// apart the two DMF variants, which differ only in cluster size.
    pub fn standard_format(&self) -> Option<StandardFormat> {
        let (c, h, s, size) = self.geometry()?;
        let total = c as usize * h as usize * s as usize * size;
        let candidates = StandardFormat::from_size(total);

        candidates
            .iter()
            .find(|f| {
                let chsn = f.chsn();
                chsn.c() as u32 == c
                    && chsn.h() as u32 == h
                    && chsn.s() as u32 == s
                    && f.sectors_per_cluster() == self.v2.sectors_per_cluster
            })
            .or_else(|| {
                candidates.iter().find(|f| {
                    let chsn = f.chsn();
                    chsn.c() as u32 == c && chsn.h() as u32 == h && chsn.s() as u32 == s
                })
            })
            .copied()
    }
}

impl From<StandardFormat> for BiosParameterBlock {
    fn from(format: StandardFormat) -> Self {
        let chsn = format.chsn();
        let total_sectors = chsn.c() as u16 * chsn.h() as u16 * chsn.s() as u16;
        let (root_entries, media_descriptor, sectors_per_fat) = match format {
            StandardFormat::PcFloppy160 => (0x40, 0xFE, 1),
            StandardFormat::PcFloppy180 => (0x40, 0xFC, 2),
            StandardFormat::PcFloppy320 => (0x70, 0xFF, 1),
            StandardFormat::PcFloppy360 => (0x70, 0xFD, 2),
            StandardFormat::PcFloppy640 => (0x70, 0xFB, 2),
            StandardFormat::PcFloppy720 => (0x70, 0xF9, 3),
            StandardFormat::PcFloppy1200 => (0xE0, 0xF9, 7),
            StandardFormat::PcFloppy1250 => (0xC0, 0xFE, 2),
            StandardFormat::PcFloppy1440 => (0xE0, 0xF0, 9),
            StandardFormat::Dmf1024 => (0x10, 0xF0, 5),
            StandardFormat::Dmf2048 => (0x10, 0xF0, 3),
            StandardFormat::PcFloppy2880 => (0xF0, 0xF0, 9),
        };

        BiosParameterBlock {
            v2: BiosParameterBlock2 {
                bytes_per_sector: format.sector_size() as u16,
                sectors_per_cluster: format.sectors_per_cluster(),
                reserved_sectors: 1,
                number_of_fats: 2,
                root_entries,
                total_sectors,
                media_descriptor,
                sectors_per_fat,
            },
            v3: BiosParameterBlock3 {
                sectors_per_track: chsn.s() as u16,
                number_of_heads:   chsn.h() as u16,
                hidden_sectors:    0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn standard_bpbs_identify_their_format() {
        for format in StandardFormat::iter() {
            let bpb = BiosParameterBlock::from(format);
            assert!(bpb.has_valid_geometry(), "{} produced an invalid BPB", format);
            assert_eq!(bpb.standard_format(), Some(format));
        }
    }

    #[test]
    fn rejects_bad_sides() {
        let mut bpb = BiosParameterBlock::from(StandardFormat::PcFloppy1440);
        bpb.v3.number_of_heads = 3;
        assert!(!bpb.has_valid_geometry());
        assert!(bpb.geometry().is_none());
    }

    #[test]
    fn boot_sector_round_trip() {
        let mut sector = [0u8; 512];
        BiosParameterBlock::from(StandardFormat::Dmf2048)
            .write_to_boot_sector(&mut sector)
            .unwrap();
        let bpb = BiosParameterBlock::from_boot_sector(&sector).unwrap();
        assert_eq!(bpb.geometry(), Some((80, 2, 21, 512)));
        assert_eq!(bpb.standard_format(), Some(StandardFormat::Dmf2048));
    }
}
