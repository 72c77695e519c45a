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

    src/file_parsers/mod.rs

    The closed set of image formats served by the engine, their capability
    flags, and content-first format detection.
*/
use std::{
    fmt::{self, Display, Formatter},
    path::Path,
};

use bitflags::bitflags;
use strum::{EnumIter, IntoEnumIterator};

use crate::{io::ReadSeek, util::get_length, DriveType, MediaError, DEFAULT_SECTOR_SIZE};

pub mod cartridge;
pub mod cassette;
pub mod compression;
pub mod cue;
pub mod f86;
pub mod hdi;
pub mod hdx;
pub mod imd;
pub mod packed;
pub mod pcjs;
pub mod raw;
pub mod td0;
pub mod vhd;

bitflags! {
    /// Bit flags representing the capabilities of a specific image format.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    #[rustfmt::skip]
    pub struct FormatCaps: u32 {
        const CAP_WRITE             = 0b0000_0000_0000_0001; // Sector writes can be persisted to the image
        const CAP_CREATE            = 0b0000_0000_0000_0010; // New images can be created
        const CAP_SECTOR_IDS        = 0b0000_0000_0000_0100; // Stores sector IDs independent of sector order
        const CAP_DATA_CRC          = 0b0000_0000_0000_1000; // Encodes sector data CRC status
        const CAP_DATA_DELETED      = 0b0000_0000_0001_0000; // Encodes 'Deleted address' marks
        const CAP_COMMENT           = 0b0000_0000_0010_0000; // Can store a text comment field
        const CAP_TRACK_ENCODING    = 0b0000_0000_0100_0000; // Can store per-track encoding type
        const CAP_TRACK_DATA_RATE   = 0b0000_0000_1000_0000; // Can store per-track data rate
        const CAP_BITSTREAM         = 0b0000_0001_0000_0000; // Stores the track surface as MFM bitcells
        const CAP_FIXED_GEOMETRY    = 0b0000_0010_0000_0000; // Header records an explicit CHS geometry
        const CAP_SPARSE            = 0b0000_0100_0000_0000; // Storage is allocated on first write
        const CAP_DIFFERENCING      = 0b0000_1000_0000_0000; // Image is a delta over a parent image
        const CAP_COMPRESSION       = 0b0001_0000_0000_0000; // Image data may be compressed
    }
}

/// The image formats understood by the engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ImageFormat {
    /// Headerless sector image, including ZIP (ZDI), MO (MDI), CD-ROM (ISO) and PC-98 (FDI, DDI)
    /// containers.
    Raw,
    /// 86Box surface image.
    F86,
    /// ImageDisk sector image.
    Imd,
    /// Teledisk sector image.
    Td0,
    Hdi,
    Hdx,
    VhdFixed,
    VhdDynamic,
    VhdDifferencing,
    Cassette,
    Cartridge,
    /// CopyQM compressed floppy image.
    CopyQm,
    /// FDF compressed floppy image.
    Fdf,
    /// PCjs JSON floppy image.
    Pcjs,
    /// CD-ROM image described by a CUE sheet.
    Cue,
}

impl Display for ImageFormat {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ImageFormat::Raw => write!(f, "Raw Sector Image"),
            ImageFormat::F86 => write!(f, "86F Surface Image"),
            ImageFormat::Imd => write!(f, "ImageDisk"),
            ImageFormat::Td0 => write!(f, "TeleDisk"),
            ImageFormat::Hdi => write!(f, "HDI"),
            ImageFormat::Hdx => write!(f, "HDX"),
            ImageFormat::VhdFixed => write!(f, "VHD (fixed)"),
            ImageFormat::VhdDynamic => write!(f, "VHD (dynamic)"),
            ImageFormat::VhdDifferencing => write!(f, "VHD (differencing)"),
            ImageFormat::Cassette => write!(f, "Cassette"),
            ImageFormat::Cartridge => write!(f, "PCjr Cartridge"),
            ImageFormat::CopyQm => write!(f, "CopyQM"),
            ImageFormat::Fdf => write!(f, "FDF"),
            ImageFormat::Pcjs => write!(f, "PCjs JSON"),
            ImageFormat::Cue => write!(f, "CUE/BIN"),
        }
    }
}

impl ImageFormat {
    /// Return the file extensions associated with the format.
    pub fn extensions(&self) -> Vec<&'static str> {
        match self {
            ImageFormat::Raw => raw::RawFormat::extensions(),
            ImageFormat::F86 => f86::F86Format::extensions(),
            ImageFormat::Imd => imd::ImdFormat::extensions(),
            ImageFormat::Td0 => td0::Td0Format::extensions(),
            ImageFormat::Hdi => hdi::HdiFormat::extensions(),
            ImageFormat::Hdx => hdx::HdxFormat::extensions(),
            ImageFormat::VhdFixed | ImageFormat::VhdDynamic | ImageFormat::VhdDifferencing => {
                vhd::VhdFormat::extensions()
            }
            ImageFormat::Cassette => cassette::CassetteFormat::extensions(),
            ImageFormat::Cartridge => cartridge::CartridgeFormat::extensions(),
            ImageFormat::CopyQm => packed::CopyQmFormat::extensions(),
            ImageFormat::Fdf => packed::FdfFormat::extensions(),
            ImageFormat::Pcjs => pcjs::PcjsFormat::extensions(),
            ImageFormat::Cue => cue::CueFormat::extensions(),
        }
    }

    /// Return the capability flags for this format.
    pub fn capabilities(&self) -> FormatCaps {
        match self {
            ImageFormat::Raw => raw::RawFormat::capabilities(),
            ImageFormat::F86 => f86::F86Format::capabilities(),
            ImageFormat::Imd => imd::ImdFormat::capabilities(),
            ImageFormat::Td0 => td0::Td0Format::capabilities(),
            ImageFormat::Hdi => hdi::HdiFormat::capabilities(),
            ImageFormat::Hdx => hdx::HdxFormat::capabilities(),
            ImageFormat::VhdFixed => vhd::VhdFormat::capabilities(),
            ImageFormat::VhdDynamic => vhd::VhdFormat::capabilities() | FormatCaps::CAP_SPARSE,
            ImageFormat::VhdDifferencing => {
                vhd::VhdFormat::capabilities() | FormatCaps::CAP_SPARSE | FormatCaps::CAP_DIFFERENCING
            }
            ImageFormat::Cassette => cassette::CassetteFormat::capabilities(),
            ImageFormat::Cartridge => cartridge::CartridgeFormat::capabilities(),
            ImageFormat::CopyQm => packed::CopyQmFormat::capabilities(),
            ImageFormat::Fdf => packed::FdfFormat::capabilities(),
            ImageFormat::Pcjs => pcjs::PcjsFormat::capabilities(),
            ImageFormat::Cue => cue::CueFormat::capabilities(),
        }
    }

    /// Return true for formats that only ever hold fixed disks.
    pub fn is_hard_disk_format(&self) -> bool {
        matches!(
            self,
            ImageFormat::Hdi
                | ImageFormat::Hdx
                | ImageFormat::VhdFixed
                | ImageFormat::VhdDynamic
                | ImageFormat::VhdDifferencing
        )
    }

    /// Return true for formats that only ever hold floppy disks.
    pub fn is_floppy_format(&self) -> bool {
        matches!(
            self,
            ImageFormat::F86
                | ImageFormat::Imd
                | ImageFormat::Td0
                | ImageFormat::CopyQm
                | ImageFormat::Fdf
                | ImageFormat::Pcjs
        )
    }

    /// Return true if an image of this format can be loaded into a drive of type `drive`.
    pub fn supports_drive(&self, drive: DriveType) -> bool {
        match self {
            ImageFormat::Raw => !matches!(drive, DriveType::Cassette | DriveType::Cartridge),
            ImageFormat::F86
            | ImageFormat::Imd
            | ImageFormat::Td0
            | ImageFormat::CopyQm
            | ImageFormat::Fdf
            | ImageFormat::Pcjs => drive == DriveType::Floppy,
            ImageFormat::Cue => drive == DriveType::CdRom,
            ImageFormat::Cassette => drive == DriveType::Cassette,
            ImageFormat::Cartridge => drive == DriveType::Cartridge,
            _ => drive == DriveType::HardDisk,
        }
    }

    /// Map a file extension to a format. The VHD variants share an extension, so "vhd" maps to
    /// [`ImageFormat::VhdDynamic`]; the actual variant is only known from the footer.
    pub fn from_extension(ext: &str) -> Option<ImageFormat> {
        let ext = ext.to_lowercase();
        if ext == "vhd" {
            return Some(ImageFormat::VhdDynamic);
        }
        ImageFormat::iter().find(|f| f.extensions().contains(&ext.as_str()))
    }

    /// Map the extension of `path` to a format.
    pub fn from_path(path: &Path) -> Option<ImageFormat> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(ImageFormat::from_extension)
    }
}

/// Returns a list of advertised file extensions supported by available image format parsers.
/// This is a convenience function for use in file dialogs.
pub fn supported_extensions() -> Vec<&'static str> {
    let mut extensions: Vec<&'static str> = ImageFormat::iter().flat_map(|f| f.extensions()).collect();
    extensions.dedup();
    extensions
}

/// Returns a list of image formats that support the specified capabilities.
pub fn formats_from_caps(caps: FormatCaps) -> Vec<ImageFormat> {
    ImageFormat::iter()
        .filter(|f| caps.is_empty() || f.capabilities().contains(caps))
        .collect()
}

/// Detect the format of an image. Content is checked first: signatures and self-validating
/// headers. Only formats without any signature (HDI, cassette and raw images) are then picked by
/// extension, and finally an unrecognized file that is a whole number of sectors is taken as a
/// raw sector image.
pub fn detect_format<RS: ReadSeek>(source: &mut RS, path: &Path) -> Result<ImageFormat, MediaError> {
    if f86::F86Format::detect(&mut *source) {
        return Ok(ImageFormat::F86);
    }
    if imd::ImdFormat::detect(&mut *source) {
        return Ok(ImageFormat::Imd);
    }
    if td0::Td0Format::detect(&mut *source) {
        return Ok(ImageFormat::Td0);
    }
    if let Some(format) = vhd::VhdFormat::detect(&mut *source) {
        return Ok(format);
    }
    if hdx::HdxFormat::detect(&mut *source) {
        return Ok(ImageFormat::Hdx);
    }
    if cartridge::CartridgeFormat::detect(&mut *source) {
        return Ok(ImageFormat::Cartridge);
    }
    if packed::FdfFormat::detect(&mut *source) {
        return Ok(ImageFormat::Fdf);
    }
    if packed::CopyQmFormat::detect(&mut *source) {
        return Ok(ImageFormat::CopyQm);
    }
    if pcjs::PcjsFormat::detect(&mut *source) {
        return Ok(ImageFormat::Pcjs);
    }
    if cue::CueFormat::detect(&mut *source) {
        return Ok(ImageFormat::Cue);
    }

    match ImageFormat::from_path(path) {
        Some(ImageFormat::Hdi) => return Ok(ImageFormat::Hdi),
        Some(ImageFormat::Cassette) => return Ok(ImageFormat::Cassette),
        Some(ImageFormat::Cartridge) => return Ok(ImageFormat::Cartridge),
        Some(ImageFormat::Raw) => return Ok(ImageFormat::Raw),
        Some(other) => {
            log::warn!(
                "detect_format(): {} has a {} extension but no valid header",
                path.display(),
                other
            );
            return Err(MediaError::UnknownFormat);
        }
        None => {}
    }

    let len = get_length(source)?;
    if len > 0 && len % DEFAULT_SECTOR_SIZE as u64 == 0 {
        log::debug!(
            "detect_format(): No signature found, treating {} as a raw sector image",
            path.display()
        );
        return Ok(ImageFormat::Raw);
    }

    log::error!("detect_format(): Unable to detect format of {}", path.display());
    Err(MediaError::UnknownFormat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Cursor;

    #[test]
    fn extension_mapping() {
        assert_eq!(ImageFormat::from_extension("IMD"), Some(ImageFormat::Imd));
        assert_eq!(ImageFormat::from_extension("td0"), Some(ImageFormat::Td0));
        assert_eq!(ImageFormat::from_extension("86f"), Some(ImageFormat::F86));
        assert_eq!(ImageFormat::from_extension("hdi"), Some(ImageFormat::Hdi));
        assert_eq!(ImageFormat::from_extension("vhd"), Some(ImageFormat::VhdDynamic));
        assert_eq!(ImageFormat::from_extension("zdi"), Some(ImageFormat::Raw));
        assert_eq!(ImageFormat::from_extension("fdi"), Some(ImageFormat::Raw));
        assert_eq!(ImageFormat::from_extension("cqm"), Some(ImageFormat::CopyQm));
        assert_eq!(ImageFormat::from_extension("CUE"), Some(ImageFormat::Cue));
        assert_eq!(ImageFormat::from_extension("json"), Some(ImageFormat::Pcjs));
        assert_eq!(ImageFormat::from_extension("xyz"), None);
    }

    #[test]
    fn drive_compatibility() {
        assert!(ImageFormat::Raw.supports_drive(DriveType::Floppy));
        assert!(ImageFormat::Raw.supports_drive(DriveType::CdRom));
        assert!(!ImageFormat::VhdDynamic.supports_drive(DriveType::Floppy));
        assert!(!ImageFormat::Imd.supports_drive(DriveType::HardDisk));
        assert!(ImageFormat::Cassette.supports_drive(DriveType::Cassette));
        assert!(ImageFormat::Cue.supports_drive(DriveType::CdRom));
        assert!(!ImageFormat::Cue.supports_drive(DriveType::HardDisk));
        assert!(ImageFormat::Fdf.supports_drive(DriveType::Floppy));
        assert!(!ImageFormat::Pcjs.supports_drive(DriveType::Zip));
    }

    #[test]
    fn caps_query() {
        let formats = formats_from_caps(FormatCaps::CAP_DIFFERENCING);
        assert_eq!(formats, vec![ImageFormat::VhdDifferencing]);
        assert!(formats_from_caps(FormatCaps::CAP_COMMENT).contains(&ImageFormat::Imd));
        assert!(formats_from_caps(FormatCaps::CAP_COMPRESSION).contains(&ImageFormat::CopyQm));
    }

    #[test]
    fn headerless_detection() {
        let mut cursor = Cursor::new(vec![0u8; 1024]);
        let format = detect_format(&mut cursor, Path::new("disk.bin")).unwrap();
        assert_eq!(format, ImageFormat::Raw);

        let mut cursor = Cursor::new(vec![0u8; 1000]);
        assert!(matches!(
            detect_format(&mut cursor, Path::new("disk.bin")),
            Err(MediaError::UnknownFormat)
        ));

        let mut cursor = Cursor::new(vec![0u8; 1024]);
        assert!(matches!(
            detect_format(&mut cursor, Path::new("disk.imd")),
            Err(MediaError::UnknownFormat)
        ));
    }
}
