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
*/

//! The `chs` module defines structures for working with Cylinder-Head-Sector (CHS)
//! addressing and sector IDs, and the [`SectorAddress`] callers use to name a sector.

use crate::MAXIMUM_SECTOR_SIZE;
use std::fmt::Display;

/// A structure representing a cylinder and head pair.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiskCh {
    c: u16,
    h: u8,
}

impl From<(u16, u8)> for DiskCh {
    fn from((c, h): (u16, u8)) -> Self {
        Self { c, h }
    }
}

impl Display for DiskCh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{} h:{}]", self.c, self.h)
    }
}

impl DiskCh {
    pub fn new(c: u16, h: u8) -> Self {
        Self { c, h }
    }
    #[inline]
    pub fn c(&self) -> u16 {
        self.c
    }
    #[inline]
    pub fn h(&self) -> u8 {
        self.h
    }
}

/// A structure representing a cylinder, head and sector ID. Sector IDs are 1-based.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiskChs {
    c: u16,
    h: u8,
    s: u8,
}

impl Default for DiskChs {
    fn default() -> Self {
        Self { c: 0, h: 0, s: 1 }
    }
}

impl From<(u16, u8, u8)> for DiskChs {
    fn from((c, h, s): (u16, u8, u8)) -> Self {
        Self { c, h, s }
    }
}

impl From<DiskChs> for (u16, u8, u8) {
    fn from(chs: DiskChs) -> Self {
        (chs.c, chs.h, chs.s)
    }
}

impl Display for DiskChs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{} h:{} s:{}]", self.c, self.h, self.s)
    }
}

impl DiskChs {
    pub fn new(c: u16, h: u8, s: u8) -> Self {
        Self { c, h, s }
    }
    #[inline]
    pub fn c(&self) -> u16 {
        self.c
    }
    #[inline]
    pub fn h(&self) -> u8 {
        self.h
    }
    #[inline]
    pub fn s(&self) -> u8 {
        self.s
    }
    #[inline]
    pub fn ch(&self) -> DiskCh {
        DiskCh::new(self.c, self.h)
    }
}

/// A structure representing the four components of a sector ID as recorded in a sector header:
///  - Cylinder (c)
///  - Head (h)
///  - Sector ID (s)
///  - Sector Size (n)
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiskChsn {
    chs: DiskChs,
    n:   u8,
}

impl Default for DiskChsn {
    fn default() -> Self {
        Self {
            chs: DiskChs::default(),
            n:   2,
        }
    }
}

impl From<(u16, u8, u8, u8)> for DiskChsn {
    fn from((c, h, s, n): (u16, u8, u8, u8)) -> Self {
        Self {
            chs: DiskChs::from((c, h, s)),
            n,
        }
    }
}

impl Display for DiskChsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{:2} h:{} s:{:3} n:{}]", self.c(), self.h(), self.s(), self.n)
    }
}

impl DiskChsn {
    pub fn new(c: u16, h: u8, s: u8, n: u8) -> Self {
        Self {
            chs: DiskChs::from((c, h, s)),
            n,
        }
    }
    #[inline]
    pub fn c(&self) -> u16 {
        self.chs.c()
    }
    #[inline]
    pub fn h(&self) -> u8 {
        self.chs.h()
    }
    #[inline]
    pub fn s(&self) -> u8 {
        self.chs.s()
    }
    #[inline]
    pub fn n(&self) -> u8 {
        self.n
    }
    #[inline]
    pub fn chs(&self) -> DiskChs {
        self.chs
    }
    /// Return the size of the 'n' parameter in bytes.
    /// The formula for calculating size from n is (128 * 2^n)
    /// We enforce a maximum size of 8192 bytes for a single sector.
    #[inline]
    pub fn n_size(&self) -> usize {
        Self::n_to_bytes(self.n)
    }

    #[inline]
    pub fn n_to_bytes(n: u8) -> usize {
        std::cmp::min(MAXIMUM_SECTOR_SIZE, 128usize.overflowing_shl(n as u32).0)
    }

    /// Convert a size in bytes into a sector size field value (n)
    #[inline]
    pub fn bytes_to_n(size: usize) -> u8 {
        let mut n = 0;
        let mut size = size;
        while size > 128 {
            size >>= 1;
            n += 1;
        }
        n
    }
}

/// The address of a sector as requested by a disk controller.
/// Controllers for older buses address sectors by CHS, while IDE LBA mode, ATAPI and SCSI use
/// a linear block address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SectorAddress {
    Chs(DiskChs),
    Lba(u64),
}

impl From<DiskChs> for SectorAddress {
    fn from(chs: DiskChs) -> Self {
        SectorAddress::Chs(chs)
    }
}

impl From<u64> for SectorAddress {
    fn from(lba: u64) -> Self {
        SectorAddress::Lba(lba)
    }
}

impl Display for SectorAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SectorAddress::Chs(chs) => write!(f, "{}", chs),
            SectorAddress::Lba(lba) => write!(f, "[lba:{}]", lba),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_size_codes() {
        assert_eq!(DiskChsn::n_to_bytes(0), 128);
        assert_eq!(DiskChsn::n_to_bytes(2), 512);
        assert_eq!(DiskChsn::n_to_bytes(3), 1024);
        assert_eq!(DiskChsn::n_to_bytes(7), MAXIMUM_SECTOR_SIZE);
        assert_eq!(DiskChsn::bytes_to_n(512), 2);
        assert_eq!(DiskChsn::bytes_to_n(1024), 3);
    }

    #[test]
    fn display() {
        assert_eq!(DiskChs::new(79, 1, 18).to_string(), "[c:79 h:1 s:18]");
        assert_eq!(SectorAddress::Lba(12).to_string(), "[lba:12]");
    }
}
