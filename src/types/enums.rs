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

    enums.rs

    Defines common enum types
*/
use std::{
    fmt,
    fmt::{Display, Formatter},
};

use strum::EnumIter;

/// The type of data encoding used by a floppy track.
/// * Fm: Frequency Modulation encoding. Used by older 8" diskettes, and 'duplication mark' tracks
///   on some 3.5" and 5.25" diskettes.
/// * Mfm: Modified Frequency Modulation encoding. Used by almost all PC 5.25" and 3.5" diskettes.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiskDataEncoding {
    Fm,
    #[default]
    Mfm,
}

impl Display for DiskDataEncoding {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            DiskDataEncoding::Fm => write!(f, "FM"),
            DiskDataEncoding::Mfm => write!(f, "MFM"),
        }
    }
}

/// The data rate of a floppy track, before any RPM adjustment.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiskDataRate {
    RateNonstandard(u32),
    #[default]
    Rate250Kbps,
    Rate300Kbps,
    Rate500Kbps,
    Rate1000Kbps,
}

impl From<u32> for DiskDataRate {
    fn from(rate: u32) -> Self {
        match rate {
            250_000 => DiskDataRate::Rate250Kbps,
            300_000 => DiskDataRate::Rate300Kbps,
            500_000 => DiskDataRate::Rate500Kbps,
            1_000_000 => DiskDataRate::Rate1000Kbps,
            _ => DiskDataRate::RateNonstandard(rate),
        }
    }
}

impl From<DiskDataRate> for u32 {
    fn from(rate: DiskDataRate) -> Self {
        match rate {
            DiskDataRate::RateNonstandard(rate) => rate,
            DiskDataRate::Rate250Kbps => 250_000,
            DiskDataRate::Rate300Kbps => 300_000,
            DiskDataRate::Rate500Kbps => 500_000,
            DiskDataRate::Rate1000Kbps => 1_000_000,
        }
    }
}

impl Display for DiskDataRate {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            DiskDataRate::RateNonstandard(rate) => write!(f, "{}Kbps", rate / 1000),
            DiskDataRate::Rate250Kbps => write!(f, "250Kbps"),
            DiskDataRate::Rate300Kbps => write!(f, "300Kbps"),
            DiskDataRate::Rate500Kbps => write!(f, "500Kbps"),
            DiskDataRate::Rate1000Kbps => write!(f, "1000Kbps"),
        }
    }
}

/// The kind of drive a [`crate::slot::MediaSlot`] emulates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DriveType {
    Floppy,
    HardDisk,
    CdRom,
    MagnetoOptical,
    Zip,
    Cassette,
    Cartridge,
}

impl DriveType {
    /// Return true if media may be inserted and ejected while the machine runs.
    pub fn is_removable(&self) -> bool {
        !matches!(self, DriveType::HardDisk)
    }

    /// Return true if this drive type is attached to a controller bus at all.
    /// Cassette and cartridge ports are wired directly to the machine.
    pub fn needs_bus(&self) -> bool {
        !matches!(self, DriveType::Cassette | DriveType::Cartridge)
    }
}

impl Display for DriveType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            DriveType::Floppy => write!(f, "Floppy"),
            DriveType::HardDisk => write!(f, "Hard disk"),
            DriveType::CdRom => write!(f, "CD-ROM"),
            DriveType::MagnetoOptical => write!(f, "Magneto-optical"),
            DriveType::Zip => write!(f, "ZIP"),
            DriveType::Cassette => write!(f, "Cassette"),
            DriveType::Cartridge => write!(f, "Cartridge"),
        }
    }
}

/// The controller bus a drive is attached to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BusType {
    Floppy,
    MfmRll,
    Xta,
    Esdi,
    Ide,
    Atapi,
    Scsi,
    Usb,
}

impl Display for BusType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            BusType::Floppy => write!(f, "Floppy"),
            BusType::MfmRll => write!(f, "MFM/RLL"),
            BusType::Xta => write!(f, "XTA"),
            BusType::Esdi => write!(f, "ESDI"),
            BusType::Ide => write!(f, "IDE"),
            BusType::Atapi => write!(f, "ATAPI"),
            BusType::Scsi => write!(f, "SCSI"),
            BusType::Usb => write!(f, "USB"),
        }
    }
}
