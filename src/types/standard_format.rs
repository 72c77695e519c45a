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

    types/standard_format.rs

    Represents information about standard (non-copy-protected) disk formats,
    such as those that can be represented with a raw sector image (IMG), and
    the fixed media sizes of ZIP and magneto-optical cartridges.

    mediabay recognizes the following floppy formats:

        PC   160K  DD Single-Sided 5.25"
        PC   180K  DD Single-Sided 5.25"
        PC   320K  DD Double-Sided 5.25"
        PC   360K  DD Double-Sided 5.25"
        PC   640K  DD Double-Sided 3.5"  (8 sectors per track)
        PC   720K  DD Double-Sided 3.5"
        PC   1.2M  HD Double-Sided 5.25"
        PC   1.25M HD Double-Sided 3.5"  (77 tracks, 1024 byte sectors)
        PC   1.44M HD Double-Sided 3.5"
        DMF  1.68M HD Double-Sided 3.5"  (1024 and 2048 byte clusters)
        PC   2.88M ED Double-Sided 3.5"
*/

//! The `standard_format` module defines the [StandardFormat] enum that defines parameters for
//! several standard PC disk formats, and [RemovableFormat] for fixed-size removable media.

use crate::{
    types::{DiskDataEncoding, DiskDataRate},
    DiskChs,
    DiskChsn,
};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};
use strum::{EnumIter, IntoEnumIterator};

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StandardFormat {
    PcFloppy160,
    PcFloppy180,
    PcFloppy320,
    PcFloppy360,
    PcFloppy640,
    PcFloppy720,
    PcFloppy1200,
    PcFloppy1250,
    PcFloppy1440,
    Dmf1024,
    Dmf2048,
    PcFloppy2880,
}

impl Display for StandardFormat {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let str = match self {
            StandardFormat::PcFloppy160 => "160K 5.25\" DD",
            StandardFormat::PcFloppy180 => "180K 5.25\" DD",
            StandardFormat::PcFloppy320 => "320K 5.25\" DD",
            StandardFormat::PcFloppy360 => "360K 5.25\" DD",
            StandardFormat::PcFloppy640 => "640K 3.5\" DD",
            StandardFormat::PcFloppy720 => "720K 3.5\" DD",
            StandardFormat::PcFloppy1200 => "1.2M 5.25\" HD",
            StandardFormat::PcFloppy1250 => "1.25M 3.5\" HD",
            StandardFormat::PcFloppy1440 => "1.44M 3.5\" HD",
            StandardFormat::Dmf1024 => "1.68M DMF (1024 byte clusters)",
            StandardFormat::Dmf2048 => "1.68M DMF (2048 byte clusters)",
            StandardFormat::PcFloppy2880 => "2.88M 3.5\" ED",
        };
        write!(f, "{}", str)
    }
}

impl FromStr for StandardFormat {
    type Err = String;

    /// Parse a format name such as `1440k` or `dmf1024`, so that a configuration file or
    /// command line can name a floppy format.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        match lower.strip_prefix("pc_").unwrap_or(lower.as_str()) {
            "160k" => Ok(StandardFormat::PcFloppy160),
            "180k" => Ok(StandardFormat::PcFloppy180),
            "320k" => Ok(StandardFormat::PcFloppy320),
            "360k" => Ok(StandardFormat::PcFloppy360),
            "640k" => Ok(StandardFormat::PcFloppy640),
            "720k" => Ok(StandardFormat::PcFloppy720),
            "1200k" => Ok(StandardFormat::PcFloppy1200),
            "1250k" => Ok(StandardFormat::PcFloppy1250),
            "1440k" => Ok(StandardFormat::PcFloppy1440),
            "dmf1024" => Ok(StandardFormat::Dmf1024),
            "dmf2048" => Ok(StandardFormat::Dmf2048),
            "2880k" => Ok(StandardFormat::PcFloppy2880),
            _ => Err(format!("Invalid format: {}", s)),
        }
    }
}

impl StandardFormat {
    /// Returns the geometry corresponding to the `StandardFormat` as a `DiskChsn` struct.
    pub fn chsn(&self) -> DiskChsn {
        match self {
            StandardFormat::PcFloppy160 => DiskChsn::new(40, 1, 8, 2),
            StandardFormat::PcFloppy180 => DiskChsn::new(40, 1, 9, 2),
            StandardFormat::PcFloppy320 => DiskChsn::new(40, 2, 8, 2),
            StandardFormat::PcFloppy360 => DiskChsn::new(40, 2, 9, 2),
            StandardFormat::PcFloppy640 => DiskChsn::new(80, 2, 8, 2),
            StandardFormat::PcFloppy720 => DiskChsn::new(80, 2, 9, 2),
            StandardFormat::PcFloppy1200 => DiskChsn::new(80, 2, 15, 2),
            StandardFormat::PcFloppy1250 => DiskChsn::new(77, 2, 8, 3),
            StandardFormat::PcFloppy1440 => DiskChsn::new(80, 2, 18, 2),
            StandardFormat::Dmf1024 | StandardFormat::Dmf2048 => DiskChsn::new(80, 2, 21, 2),
            StandardFormat::PcFloppy2880 => DiskChsn::new(80, 2, 36, 2),
        }
    }

    pub fn chs(&self) -> DiskChs {
        self.chsn().chs()
    }

    pub fn sectors_per_track(&self) -> u8 {
        self.chsn().s()
    }

    /// Return the sector size in bytes corresponding to the `StandardFormat`.
    pub fn sector_size(&self) -> usize {
        self.chsn().n_size()
    }

    pub fn encoding(&self) -> DiskDataEncoding {
        DiskDataEncoding::Mfm
    }

    pub fn data_rate(&self) -> DiskDataRate {
        match self {
            StandardFormat::PcFloppy160
            | StandardFormat::PcFloppy180
            | StandardFormat::PcFloppy320
            | StandardFormat::PcFloppy360
            | StandardFormat::PcFloppy640
            | StandardFormat::PcFloppy720 => DiskDataRate::Rate250Kbps,
            StandardFormat::PcFloppy1200
            | StandardFormat::PcFloppy1250
            | StandardFormat::PcFloppy1440
            | StandardFormat::Dmf1024
            | StandardFormat::Dmf2048 => DiskDataRate::Rate500Kbps,
            StandardFormat::PcFloppy2880 => DiskDataRate::Rate1000Kbps,
        }
    }

    /// Returns the nominal rotational speed of a drive reading this format.
    pub fn rpm(&self) -> u32 {
        match self {
            StandardFormat::PcFloppy1200 | StandardFormat::PcFloppy1250 => 360,
            _ => 300,
        }
    }

    /// Return the number of MFM bitcells on one revolution of a track of this format.
    pub fn bitcell_ct(&self) -> usize {
        let rate = u32::from(self.data_rate()) as usize * 2;
        rate * 60 / self.rpm() as usize
    }

    /// Return a standard default GAP3 value corresponding to the `StandardFormat`.
    pub fn gap3(&self) -> usize {
        match self {
            StandardFormat::PcFloppy1200 => 0x54,
            StandardFormat::PcFloppy1250 => 0x74,
            StandardFormat::PcFloppy1440 => 0x6C,
            StandardFormat::Dmf1024 | StandardFormat::Dmf2048 => 0x08,
            StandardFormat::PcFloppy2880 => 0x53,
            _ => 0x50,
        }
    }

    /// Return the FAT cluster size in sectors recorded in the BPB of a disk in this format.
    pub fn sectors_per_cluster(&self) -> u8 {
        match self {
            StandardFormat::PcFloppy1200 | StandardFormat::PcFloppy1440 | StandardFormat::PcFloppy2880 => 1,
            StandardFormat::PcFloppy1250 => 1,
            StandardFormat::Dmf2048 => 4,
            _ => 2,
        }
    }

    /// Return the size in bytes of a raw sector image corresponding to the `StandardFormat`.
    pub fn disk_size(&self) -> usize {
        let chsn = self.chsn();
        chsn.c() as usize * chsn.h() as usize * chsn.s() as usize * chsn.n_size()
    }

    /// Return all formats whose raw image size equals `size`.
    /// The two DMF variants share a size, so more than one format may match.
    pub fn from_size(size: usize) -> Vec<StandardFormat> {
        StandardFormat::iter().filter(|f| f.disk_size() == size).collect()
    }
}

impl TryFrom<usize> for StandardFormat {
    type Error = &'static str;

    /// Resolve a raw image size to a format. DMF images resolve to the 1024 byte cluster
    /// variant; only the BPB can tell the two apart.
    fn try_from(size: usize) -> Result<Self, Self::Error> {
        StandardFormat::from_size(size)
            .first()
            .copied()
            .ok_or("Invalid size")
    }
}

impl From<StandardFormat> for DiskChsn {
    fn from(format: StandardFormat) -> Self {
        format.chsn()
    }
}

/// Removable media with a fixed number of sectors: ZIP disks and magneto-optical cartridges.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RemovableFormat {
    Zip100,
    Zip250,
    Mo35In128M,
    Mo35In230M,
    Mo35In540M,
    Mo35In640M,
    Mo35In1300M,
    Mo35In2300M,
    Mo525In600M,
    Mo525In650M,
    Mo525In1000M,
    Mo525In1300M,
}

impl RemovableFormat {
    /// Return (sector count, sector size).
    pub fn layout(&self) -> (u64, usize) {
        match self {
            RemovableFormat::Zip100 => (96 * 64 * 32, 512),
            RemovableFormat::Zip250 => (489_532, 512),
            RemovableFormat::Mo35In128M => (248_826, 512),
            RemovableFormat::Mo35In230M => (446_325, 512),
            RemovableFormat::Mo35In540M => (1_041_500, 512),
            RemovableFormat::Mo35In640M => (310_352, 2048),
            RemovableFormat::Mo35In1300M => (605_846, 2048),
            RemovableFormat::Mo35In2300M => (1_063_146, 2048),
            RemovableFormat::Mo525In600M => (573_624, 512),
            RemovableFormat::Mo525In650M => (314_568, 1024),
            RemovableFormat::Mo525In1000M => (904_995, 512),
            RemovableFormat::Mo525In1300M => (637_041, 1024),
        }
    }

    pub fn is_zip(&self) -> bool {
        matches!(self, RemovableFormat::Zip100 | RemovableFormat::Zip250)
    }

    pub fn size(&self) -> u64 {
        let (sectors, sector_size) = self.layout();
        sectors * sector_size as u64
    }

    pub fn from_size(size: u64, zip: bool) -> Option<RemovableFormat> {
        RemovableFormat::iter().find(|f| f.is_zip() == zip && f.size() == size)
    }
}
