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

    src/geometry.rs

    Geometry resolution: deriving cylinders, heads and sectors for an image
    from an explicit header, a boot sector BPB, the standard floppy size
    table, or the VHD CHS algorithm for hard disks. Also home to the
    per-format size ceilings checked when creating images.
*/

//! The `geometry` module resolves and validates the addressing geometry of disk images.
//!
//! Callers may address sectors either by CHS or by LBA. The two are related by
//! `lba = ((cylinder * heads) + head) * sectors_per_track + sector - 1`.

use std::fmt::{self, Display, Formatter};

use crate::{
    boot_sector::bpb::BiosParameterBlock,
    file_parsers::ImageFormat,
    DiskChs,
    MediaError,
    SectorAddress,
    StandardFormat,
    DEFAULT_SECTOR_SIZE,
};

/// Largest sector count the VHD CHS algorithm can express (65535 cylinders, 16 heads, 255 spt).
pub const GENERIC_HD_MAX_SECTORS: u64 = 65535 * 16 * 255;
/// Largest generic hard disk image we will create, about 127GB.
pub const GENERIC_HD_MAX_BYTES: u64 = GENERIC_HD_MAX_SECTORS * DEFAULT_SECTOR_SIZE as u64;
/// HDI images store their size in a 32-bit field.
pub const HDI_MAX_BYTES: u64 = u32::MAX as u64;

/// Where a resolved geometry came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GeometrySource {
    /// Supplied by the caller.
    Explicit,
    /// Read from the image's own header.
    Header,
    /// Read from the BIOS Parameter Block of a raw floppy image.
    Bpb,
    /// Matched from the image size against the table of standard floppy formats.
    SizeTable,
    /// Computed from the image size with the VHD CHS algorithm.
    Derived,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiskGeometry {
    pub cylinders:   u32,
    pub heads:       u32,
    pub sectors:     u32,
    pub sector_size: usize,
}

impl Default for DiskGeometry {
    fn default() -> Self {
        DiskGeometry::from(StandardFormat::PcFloppy1440)
    }
}

impl Display for DiskGeometry {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "[c:{} h:{} s:{} size:{}]",
            self.cylinders, self.heads, self.sectors, self.sector_size
        )
    }
}

impl From<StandardFormat> for DiskGeometry {
    fn from(format: StandardFormat) -> Self {
        let chsn = format.chsn();
        DiskGeometry {
            cylinders:   chsn.c() as u32,
            heads:       chsn.h() as u32,
            sectors:     chsn.s() as u32,
            sector_size: chsn.n_size(),
        }
    }
}

impl DiskGeometry {
    pub fn new(cylinders: u32, heads: u32, sectors: u32, sector_size: usize) -> Self {
        DiskGeometry {
            cylinders,
            heads,
            sectors,
            sector_size,
        }
    }

    /// Build an LBA-only geometry for media without meaningful CHS addressing, such as
    /// CD-ROM, magneto-optical or ZIP media. Each "track" holds one sector.
    pub fn linear(total_sectors: u64, sector_size: usize) -> Self {
        DiskGeometry {
            cylinders: total_sectors.min(u32::MAX as u64) as u32,
            heads: 1,
            sectors: 1,
            sector_size,
        }
    }

    /// Return the geometry as a tuple of (cylinders, heads, sectors, sector size).
    pub fn get(&self) -> (u32, u32, u32, usize) {
        (self.cylinders, self.heads, self.sectors, self.sector_size)
    }

    pub fn total_sectors(&self) -> u64 {
        self.cylinders as u64 * self.heads as u64 * self.sectors as u64
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_sectors() * self.sector_size as u64
    }

    pub fn track_ct(&self) -> usize {
        self.cylinders as usize * self.heads as usize
    }

    /// Convert a CHS address into an LBA. Sector IDs are 1-based.
    pub fn chs_to_lba(&self, chs: DiskChs) -> Result<u64, MediaError> {
        let (c, h, s) = (chs.c() as u64, chs.h() as u64, chs.s() as u64);
        if c >= self.cylinders as u64 || h >= self.heads as u64 || s == 0 || s > self.sectors as u64 {
            return Err(MediaError::SectorNotFound(format!("{} outside of {}", chs, self)));
        }
        Ok(((c * self.heads as u64) + h) * self.sectors as u64 + s - 1)
    }

    /// Convert an LBA into a CHS address.
    pub fn lba_to_chs(&self, lba: u64) -> Result<DiskChs, MediaError> {
        if lba >= self.total_sectors() {
            return Err(MediaError::SectorNotFound(format!("lba {} outside of {}", lba, self)));
        }
        let spt = self.sectors as u64;
        let heads = self.heads as u64;
        let c = lba / (spt * heads);
        let h = (lba / spt) % heads;
        let s = lba % spt + 1;

        if c > u16::MAX as u64 || s > u8::MAX as u64 {
            return Err(MediaError::SectorNotFound(format!(
                "lba {} cannot be expressed in CHS for {}",
                lba, self
            )));
        }
        Ok(DiskChs::new(c as u16, h as u8, s as u8))
    }

    /// Resolve either kind of [`SectorAddress`] into a bounds-checked LBA.
    pub fn resolve(&self, address: SectorAddress) -> Result<u64, MediaError> {
        match address {
            SectorAddress::Chs(chs) => self.chs_to_lba(chs),
            SectorAddress::Lba(lba) if lba < self.total_sectors() => Ok(lba),
            SectorAddress::Lba(lba) => Err(MediaError::SectorNotFound(format!("lba {} outside of {}", lba, self))),
        }
    }

    /// Check that the geometry addresses no more bytes than the image holds.
    pub fn validate_len(&self, data_len: u64) -> Result<(), MediaError> {
        if self.sectors == 0 || self.heads == 0 || self.cylinders == 0 {
            return Err(MediaError::malformed(format!("Degenerate geometry {}", self)));
        }
        if self.total_bytes() > data_len {
            log::error!(
                "validate_len(): Geometry {} requires {} bytes, but only {} are present",
                self,
                self.total_bytes(),
                data_len
            );
            return Err(MediaError::malformed(format!(
                "Geometry {} exceeds image data length of {} bytes",
                self, data_len
            )));
        }
        Ok(())
    }
}

/// Logical (cylinders, heads, sectors) of the XDF layouts: 5.25" HD and 3.5" HD. XDF tracks mix
/// sector sizes on the physical disk, but an XDF image stores each track as uniform 512-byte
/// sectors.
pub const XDF_LAYOUTS: [(u32, u32, u32); 2] = [(80, 2, 19), (80, 2, 23)];

/// Options controlling floppy geometry resolution.
#[derive(Copy, Clone, Debug, Default)]
pub struct FloppyResolveOptions {
    pub explicit:  Option<DiskGeometry>,
    pub check_bpb: bool,
}

/// The result of floppy geometry resolution.
#[derive(Copy, Clone, Debug)]
pub struct ResolvedFloppy {
    pub geometry: DiskGeometry,
    pub source:   GeometrySource,
    pub format:   Option<StandardFormat>,
}

/// Resolve the geometry of a headerless floppy image of `data_len` bytes.
///
/// An explicit geometry wins. Otherwise, when `check_bpb` is set and the first sector carries a
/// plausible boot sector, the BPB geometry is used. Failing both, the size must match one of the
/// standard formats exactly.
pub fn resolve_floppy(
    data_len: u64,
    boot_sector: Option<&[u8]>,
    opts: FloppyResolveOptions,
) -> Result<ResolvedFloppy, MediaError> {
    if let Some(geometry) = opts.explicit {
        geometry.validate_len(data_len)?;
        return Ok(ResolvedFloppy {
            geometry,
            source: GeometrySource::Explicit,
            format: None,
        });
    }

    if opts.check_bpb {
        if let Some(resolved) = boot_sector.and_then(|s| resolve_from_bpb(s, data_len)) {
            return Ok(resolved);
        }
    }

    let candidates = StandardFormat::from_size(data_len as usize);
    if candidates.is_empty() {
        if let Some(geometry) = xdf_geometry(data_len) {
            log::trace!("resolve_floppy(): Matched XDF layout {} from image size", geometry);
            return Ok(ResolvedFloppy {
                geometry,
                source: GeometrySource::SizeTable,
                format: None,
            });
        }
    }
    let format = match candidates.first() {
        Some(format) => *format,
        None => {
            log::error!("resolve_floppy(): No standard format is {} bytes long", data_len);
            return Err(MediaError::malformed(format!(
                "{} bytes does not match any standard floppy size",
                data_len
            )));
        }
    };

    log::trace!("resolve_floppy(): Guessed format {} from image size", format);
    Ok(ResolvedFloppy {
        geometry: DiskGeometry::from(format),
        source:   GeometrySource::SizeTable,
        format:   Some(format),
    })
}

fn xdf_geometry(data_len: u64) -> Option<DiskGeometry> {
    XDF_LAYOUTS
        .iter()
        .map(|&(c, h, s)| DiskGeometry::new(c, h, s, DEFAULT_SECTOR_SIZE))
        .find(|geometry| geometry.total_bytes() == data_len)
}

fn resolve_from_bpb(boot_sector: &[u8], data_len: u64) -> Option<ResolvedFloppy> {
    // A BPB is only meaningful if the sector starts with a jump instruction.
    if !matches!(boot_sector.first(), Some(0xE9) | Some(0xEB)) {
        log::trace!("resolve_from_bpb(): Boot sector does not start with a jump, ignoring BPB");
        return None;
    }

    let bpb = BiosParameterBlock::from_boot_sector(boot_sector)?;
    let (c, h, s, size) = match bpb.geometry() {
        Some(geometry) => geometry,
        None => {
            log::debug!("resolve_from_bpb(): BPB geometry is invalid: {:?}", bpb);
            return None;
        }
    };

    let geometry = DiskGeometry::new(c, h, s, size);
    if geometry.validate_len(data_len).is_err() {
        log::warn!(
            "resolve_from_bpb(): BPB geometry {} exceeds the image size, falling back to size table",
            geometry
        );
        return None;
    }

    log::trace!("resolve_from_bpb(): Using BPB geometry {}", geometry);
    Some(ResolvedFloppy {
        geometry,
        source: GeometrySource::Bpb,
        format: bpb.standard_format(),
    })
}

/// Compute a CHS geometry for a hard disk of `total_sectors` 512-byte sectors, following the
/// CHS algorithm used by VHD footers. The result may address slightly fewer sectors than
/// requested.
pub fn hd_chs_from_sectors(total_sectors: u64) -> DiskGeometry {
    let ts = total_sectors.min(GENERIC_HD_MAX_SECTORS);

    let (spt, heads, cth) = if ts >= 65535 * 16 * 63 {
        (255u64, 16u64, ts / 255)
    }
    else {
        let mut spt = 17u64;
        let mut cth = ts / spt;
        let mut heads = ((cth + 1023) / 1024).max(4);

        if cth >= heads * 1024 || heads > 16 {
            spt = 31;
            heads = 16;
            cth = ts / spt;
        }
        if cth >= heads * 1024 {
            spt = 63;
            heads = 16;
            cth = ts / spt;
        }
        (spt, heads, cth)
    };

    DiskGeometry::new((cth / heads) as u32, heads as u32, spt as u32, DEFAULT_SECTOR_SIZE)
}

/// Resolve the geometry of a hard disk image: an explicit geometry if supplied, else the VHD CHS
/// algorithm over the image size.
pub fn resolve_hard_disk(data_len: u64, explicit: Option<DiskGeometry>) -> Result<DiskGeometry, MediaError> {
    match explicit {
        Some(geometry) => {
            geometry.validate_len(data_len)?;
            Ok(geometry)
        }
        None => {
            if data_len % DEFAULT_SECTOR_SIZE as u64 != 0 {
                return Err(MediaError::malformed(format!(
                    "Hard disk image length {} is not a multiple of the sector size",
                    data_len
                )));
            }
            let geometry = hd_chs_from_sectors(data_len / DEFAULT_SECTOR_SIZE as u64);
            geometry.validate_len(data_len)?;
            Ok(geometry)
        }
    }
}

/// Check a requested image size against the ceiling for the image format. This is called before
/// any file is created, so a failure never leaves a partial image behind.
pub fn check_capacity(format: ImageFormat, bytes: u64) -> Result<(), MediaError> {
    let limit = match format {
        ImageFormat::Hdi => Some(HDI_MAX_BYTES),
        ImageFormat::Raw => Some(GENERIC_HD_MAX_BYTES),
        _ if format.is_hard_disk_format() => Some(GENERIC_HD_MAX_BYTES),
        _ => None,
    };

    // Ceiling first: an oversized request is a capacity error even when misaligned.
    if let Some(limit) = limit.filter(|&limit| bytes > limit) {
        log::error!(
            "check_capacity(): {} bytes exceeds the {} limit of {} bytes",
            bytes,
            format,
            limit
        );
        return Err(MediaError::SizeExceeded { requested: bytes, limit });
    }

    if bytes == 0 || bytes % DEFAULT_SECTOR_SIZE as u64 != 0 {
        log::error!("check_capacity(): Size {} is not a positive multiple of 512", bytes);
        return Err(MediaError::ParameterError);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot_sector::formatted_boot_sector;

    #[test]
    fn chs_lba_conversion() {
        let geom = DiskGeometry::from(StandardFormat::PcFloppy1440);
        assert_eq!(geom.chs_to_lba(DiskChs::new(0, 0, 1)).unwrap(), 0);
        assert_eq!(geom.chs_to_lba(DiskChs::new(0, 1, 1)).unwrap(), 18);
        assert_eq!(geom.chs_to_lba(DiskChs::new(1, 0, 1)).unwrap(), 36);
        assert_eq!(geom.chs_to_lba(DiskChs::new(79, 1, 18)).unwrap(), 2879);
        assert_eq!(geom.lba_to_chs(2879).unwrap(), DiskChs::new(79, 1, 18));
        assert_eq!(geom.lba_to_chs(37).unwrap(), DiskChs::new(1, 0, 2));

        assert!(geom.chs_to_lba(DiskChs::new(0, 0, 0)).is_err());
        assert!(geom.chs_to_lba(DiskChs::new(80, 0, 1)).is_err());
        assert!(geom.resolve(SectorAddress::Lba(2880)).is_err());
    }

    #[test]
    fn resolves_1440k_by_size() {
        let resolved = resolve_floppy(1_474_560, None, FloppyResolveOptions::default()).unwrap();
        assert_eq!(resolved.geometry.get(), (80, 2, 18, 512));
        assert_eq!(resolved.source, GeometrySource::SizeTable);
        assert_eq!(resolved.format, Some(StandardFormat::PcFloppy1440));
    }

    #[test]
    fn resolves_xdf_by_size() {
        let resolved = resolve_floppy(1_884_160, None, FloppyResolveOptions::default()).unwrap();
        assert_eq!(resolved.geometry.get(), (80, 2, 23, 512));
        assert_eq!(resolved.source, GeometrySource::SizeTable);
        assert_eq!(resolved.format, None);

        let resolved = resolve_floppy(1_556_480, None, FloppyResolveOptions::default()).unwrap();
        assert_eq!(resolved.geometry.get(), (80, 2, 19, 512));
    }

    #[test]
    fn unknown_size_is_malformed() {
        let err = resolve_floppy(1_474_561, None, FloppyResolveOptions::default()).unwrap_err();
        assert!(matches!(err, MediaError::MalformedHeader(_)));
    }

    #[test]
    fn bpb_distinguishes_dmf() {
        let sector = formatted_boot_sector(StandardFormat::Dmf2048);
        let opts = FloppyResolveOptions {
            check_bpb: true,
            ..Default::default()
        };
        let resolved = resolve_floppy(1_720_320, Some(&sector), opts).unwrap();
        assert_eq!(resolved.source, GeometrySource::Bpb);
        assert_eq!(resolved.format, Some(StandardFormat::Dmf2048));

        // Without the BPB check the size table picks the first DMF variant.
        let resolved = resolve_floppy(1_720_320, Some(&sector), FloppyResolveOptions::default()).unwrap();
        assert_eq!(resolved.format, Some(StandardFormat::Dmf1024));
    }

    #[test]
    fn bpb_larger_than_image_falls_back() {
        let sector = formatted_boot_sector(StandardFormat::PcFloppy1440);
        let opts = FloppyResolveOptions {
            check_bpb: true,
            ..Default::default()
        };
        let resolved = resolve_floppy(737_280, Some(&sector), opts).unwrap();
        assert_eq!(resolved.source, GeometrySource::SizeTable);
        assert_eq!(resolved.format, Some(StandardFormat::PcFloppy720));
    }

    #[test]
    fn explicit_geometry_must_fit() {
        let opts = FloppyResolveOptions {
            explicit: Some(DiskGeometry::new(80, 2, 18, 512)),
            ..Default::default()
        };
        assert!(matches!(
            resolve_floppy(737_280, None, opts),
            Err(MediaError::MalformedHeader(_))
        ));
    }

    #[test]
    fn vhd_chs_algorithm() {
        // 10MB: 20480 sectors
        let geom = hd_chs_from_sectors(20480);
        assert_eq!((geom.heads, geom.sectors), (4, 17));
        assert_eq!(geom.cylinders, 301);

        // 2GB
        let geom = hd_chs_from_sectors(4_194_304);
        assert_eq!((geom.heads, geom.sectors), (16, 63));
        assert_eq!(geom.cylinders, 4161);

        // Anything past the CHS limit is clamped to 65535/16/255
        let geom = hd_chs_from_sectors(u64::MAX);
        assert_eq!(geom.get(), (65535, 16, 255, 512));
    }

    #[test]
    fn capacity_limits() {
        assert!(check_capacity(ImageFormat::Hdi, 4 * 1024 * 1024 * 1024 - 512).is_ok());
        assert!(matches!(
            check_capacity(ImageFormat::Hdi, 4 * 1024 * 1024 * 1024 + 512),
            Err(MediaError::SizeExceeded { .. })
        ));
        assert!(check_capacity(ImageFormat::VhdDynamic, GENERIC_HD_MAX_BYTES).is_ok());
        assert!(matches!(
            check_capacity(ImageFormat::VhdFixed, 128 * 1024 * 1024 * 1024),
            Err(MediaError::SizeExceeded { .. })
        ));
        assert!(matches!(
            check_capacity(ImageFormat::Raw, 1000),
            Err(MediaError::ParameterError)
        ));
    }

    #[test]
    fn oversized_misaligned_request_is_a_capacity_error() {
        let err = check_capacity(ImageFormat::Hdi, 5_000_000_001).unwrap_err();
        assert!(matches!(
            err,
            MediaError::SizeExceeded {
                requested: 5_000_000_001,
                limit: HDI_MAX_BYTES
            }
        ));
        assert_eq!(err.class(), crate::ErrorClass::Capacity);
    }
}
