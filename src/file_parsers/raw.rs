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

    src/file_parsers/raw.rs

    Headerless sector images. Besides plain floppy and hard disk images this
    covers the ZIP (ZDI) and magneto-optical (MDI) containers, which carry an
    opaque 4K header, and CD-ROM ISO images.

    Two PC-98 floppy containers are also plain sector data behind a header:
    FDI, whose header has the same layout as an HDI header and records the
    geometry and data offset, and DDI, which has an opaque 0x2400 byte header.
*/
use std::{
    fs::File,
    path::Path,
};

use binrw::BinRead;

use crate::{
    diskimage::{ImageDescriptor, ImageOpenOptions, MediaImage},
    file_parsers::{
        hdi::{HdiHeader, HDI_HEADER_BASE},
        FormatCaps,
        ImageFormat,
    },
    geometry::{resolve_floppy, resolve_hard_disk, FloppyResolveOptions},
    io::{Read, Seek, SeekFrom, Write},
    progress::{ProgressCallback, ProgressReporter},
    util::get_length,
    DiskGeometry,
    DriveType,
    MediaError,
    RemovableFormat,
    DEFAULT_SECTOR_SIZE,
};

/// Size of the header preceding the data of ZDI and MDI images.
pub const CONTAINER_HEADER_LEN: u64 = 0x1000;
/// Size of the header preceding the data of DDI images.
pub const DDI_HEADER_LEN: u64 = 0x2400;
pub const CDROM_SECTOR_SIZE: usize = 2048;
/// Zero-fill writes are issued in chunks of this size, with a progress report after each.
pub const ZERO_CHUNK_LEN: usize = 1024 * 1024;

/// The container a raw image is stored in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RawContainer {
    Plain,
    /// ZIP disk image with a 4K header.
    Zdi,
    /// Magneto-optical disk image with a 4K header.
    Mdi,
    /// CD-ROM image of 2048-byte sectors. Always write protected.
    Iso,
    /// PC-98 floppy image with a geometry header.
    Fdi,
    /// PC-98 floppy image with an opaque header. Always write protected.
    Ddi,
}

impl RawContainer {
    /// The usual offset of the sector data. The data offset of an FDI image is recorded in its
    /// header and may differ.
    pub fn base_offset(&self) -> u64 {
        match self {
            RawContainer::Zdi | RawContainer::Mdi => CONTAINER_HEADER_LEN,
            RawContainer::Fdi => HDI_HEADER_BASE as u64,
            RawContainer::Ddi => DDI_HEADER_LEN,
            _ => 0,
        }
    }

    /// Pick a container from the file extension and the drive the image is loaded into.
    pub fn for_path(path: &Path, drive: Option<DriveType>) -> RawContainer {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "zdi" => RawContainer::Zdi,
            "mdi" => RawContainer::Mdi,
            "iso" => RawContainer::Iso,
            "fdi" => RawContainer::Fdi,
            "ddi" => RawContainer::Ddi,
            _ if drive == Some(DriveType::CdRom) => RawContainer::Iso,
            _ => RawContainer::Plain,
        }
    }
}

pub struct RawFormat;

impl RawFormat {
    pub(crate) fn extensions() -> Vec<&'static str> {
        vec!["img", "ima", "dsk", "flp", "vfd", "hdd", "im", "zdi", "mdi", "iso", "fdi", "ddi"]
    }

    pub(crate) fn capabilities() -> FormatCaps {
        FormatCaps::CAP_WRITE | FormatCaps::CAP_CREATE
    }
}

pub struct RawImage {
    file: File,
    container: RawContainer,
    base: u64,
    descriptor: ImageDescriptor,
}

impl RawImage {
    pub(crate) fn open(
        mut file: File,
        path: &Path,
        opts: &ImageOpenOptions,
        read_only: bool,
    ) -> Result<RawImage, MediaError> {
        let container = RawContainer::for_path(path, opts.drive_type);
        let file_len = get_length(&mut file)?;
        let fdi_header = match container {
            RawContainer::Fdi => Some(read_fdi_header(&mut file, file_len)?),
            _ => None,
        };
        let base = match &fdi_header {
            Some(header) => header.base as u64,
            None => container.base_offset(),
        };

        if file_len < base {
            log::error!("RawImage::open(): {} is too short to hold a container header", path.display());
            return Err(MediaError::malformed("image is shorter than its container header"));
        }
        let data_len = file_len - base;

        let mut descriptor = ImageDescriptor::new(ImageFormat::Raw, path, DiskGeometry::default());
        descriptor.byte_size = file_len;
        descriptor.write_protected = read_only || matches!(container, RawContainer::Iso | RawContainer::Ddi);

        match (container, opts.drive_type) {
            (RawContainer::Fdi | RawContainer::Ddi, Some(drive)) if drive != DriveType::Floppy => {
                log::error!("RawImage::open(): {:?} images hold floppy disks only", container);
                return Err(MediaError::UnsupportedOperation(format!(
                    "PC-98 floppy images cannot be loaded in a {} drive",
                    drive
                )));
            }
            (RawContainer::Fdi, _) => {
                let header = fdi_header.ok_or(MediaError::UnsupportedFormat)?;
                let geometry = DiskGeometry::new(
                    header.cylinders,
                    header.heads,
                    header.sectors,
                    header.sector_size as usize,
                );
                geometry.validate_len(data_len)?;
                descriptor.geometry = geometry;
            }
            (RawContainer::Ddi, _) => {
                let boot_sector = read_boot_sector(&mut file, base)?;
                let resolved = resolve_floppy(data_len, boot_sector.as_deref(), floppy_opts(opts))?;
                descriptor.geometry = resolved.geometry;
                descriptor.standard_format = resolved.format;
            }
            (RawContainer::Iso, _) => {
                if data_len == 0 || data_len % CDROM_SECTOR_SIZE as u64 != 0 {
                    return Err(MediaError::malformed(format!(
                        "ISO image length {} is not a multiple of {} bytes",
                        data_len, CDROM_SECTOR_SIZE
                    )));
                }
                descriptor.geometry = DiskGeometry::linear(data_len / CDROM_SECTOR_SIZE as u64, CDROM_SECTOR_SIZE);
            }
            (RawContainer::Zdi, _) | (_, Some(DriveType::Zip)) => {
                let format = removable_format(data_len, true)?;
                descriptor.geometry = removable_geometry(format);
                descriptor.removable_format = Some(format);
            }
            (RawContainer::Mdi, _) | (_, Some(DriveType::MagnetoOptical)) => {
                let format = removable_format(data_len, false)?;
                descriptor.geometry = removable_geometry(format);
                descriptor.removable_format = Some(format);
            }
            (_, Some(DriveType::HardDisk)) => {
                descriptor.geometry = resolve_hard_disk(data_len, opts.geometry)?;
            }
            (_, Some(DriveType::Floppy)) => {
                let resolved = resolve_floppy(data_len, read_boot_sector(&mut file, base)?.as_deref(), floppy_opts(opts))?;
                descriptor.geometry = resolved.geometry;
                descriptor.standard_format = resolved.format;
            }
            _ => {
                // No drive to go by: try the floppy sizes, then the removable media sizes, and
                // finally treat the image as a hard disk.
                let boot_sector = read_boot_sector(&mut file, base)?;
                if let Ok(resolved) = resolve_floppy(data_len, boot_sector.as_deref(), floppy_opts(opts)) {
                    descriptor.geometry = resolved.geometry;
                    descriptor.standard_format = resolved.format;
                }
                else if let Some(format) = RemovableFormat::from_size(data_len, true)
                    .or_else(|| RemovableFormat::from_size(data_len, false))
                {
                    descriptor.geometry = removable_geometry(format);
                    descriptor.removable_format = Some(format);
                }
                else {
                    descriptor.geometry = resolve_hard_disk(data_len, opts.geometry)?;
                }
            }
        }

        log::trace!(
            "RawImage::open(): {:?} container, geometry {}",
            container,
            descriptor.geometry
        );

        Ok(RawImage {
            file,
            container,
            base,
            descriptor,
        })
    }

    pub fn container(&self) -> RawContainer {
        self.container
    }

    fn block_offset(&self, lba: u64) -> u64 {
        self.base + lba * self.descriptor.sector_size() as u64
    }

    /// Create a zero-filled raw image of `data_len` bytes, preceded by the container header if
    /// the container has one.
    pub fn create(
        path: &Path,
        container: RawContainer,
        data_len: u64,
        progress: Option<ProgressCallback>,
    ) -> Result<(), MediaError> {
        match container {
            RawContainer::Iso => {
                return Err(MediaError::UnsupportedOperation(
                    "CD-ROM images cannot be created".to_string(),
                ))
            }
            RawContainer::Fdi | RawContainer::Ddi => {
                return Err(MediaError::UnsupportedOperation(
                    "PC-98 floppy containers cannot be created".to_string(),
                ))
            }
            _ => {}
        }

        let mut file = File::create(path).map_err(|e| MediaError::unwritable(path, e))?;
        write_zeroes(&mut file, container.base_offset(), None)?;
        write_zeroes(&mut file, data_len, progress)?;
        file.flush()?;
        Ok(())
    }
}

impl MediaImage for RawImage {
    fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    fn read_block(&mut self, lba: u64) -> Result<Vec<u8>, MediaError> {
        self.descriptor.check_read(lba)?;
        let mut buf = vec![0u8; self.descriptor.sector_size()];
        self.file.seek(SeekFrom::Start(self.block_offset(lba)))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_block(&mut self, lba: u64, data: &[u8]) -> Result<(), MediaError> {
        self.descriptor.check_write(lba, data)?;
        self.file.seek(SeekFrom::Start(self.block_offset(lba)))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MediaError> {
        self.file.flush()?;
        Ok(())
    }
}

fn floppy_opts(opts: &ImageOpenOptions) -> FloppyResolveOptions {
    FloppyResolveOptions {
        explicit:  opts.geometry,
        check_bpb: opts.check_bpb,
    }
}

fn read_boot_sector(file: &mut File, base: u64) -> Result<Option<Vec<u8>>, MediaError> {
    let mut sector = vec![0u8; DEFAULT_SECTOR_SIZE];
    file.seek(SeekFrom::Start(base))?;
    let read = file.read(&mut sector)?;
    Ok(if read == DEFAULT_SECTOR_SIZE { Some(sector) } else { None })
}

/// Read and sanity check the header of an FDI image.
fn read_fdi_header(file: &mut File, file_len: u64) -> Result<HdiHeader, MediaError> {
    file.seek(SeekFrom::Start(0))?;
    let header = HdiHeader::read(file)?;
    log::trace!("read_fdi_header(): {:?}", header);

    if header.cylinders == 0 || header.heads == 0 || header.sectors == 0 {
        return Err(MediaError::malformed("FDI header has a zero geometry field"));
    }
    if !header.sector_size.is_power_of_two() || !(128..=8192).contains(&header.sector_size) {
        log::error!("read_fdi_header(): Unsupported sector size {}", header.sector_size);
        return Err(MediaError::UnsupportedSectorSize(header.sector_size as usize));
    }
    if header.base as u64 > file_len {
        return Err(MediaError::malformed("FDI data offset lies past the end of the file"));
    }
    Ok(header)
}

fn removable_format(data_len: u64, zip: bool) -> Result<RemovableFormat, MediaError> {
    RemovableFormat::from_size(data_len, zip).ok_or_else(|| {
        log::error!(
            "removable_format(): {} bytes does not match any known {} media size",
            data_len,
            if zip { "ZIP" } else { "MO" }
        );
        MediaError::malformed(format!("{} bytes is not a known removable media size", data_len))
    })
}

fn removable_geometry(format: RemovableFormat) -> DiskGeometry {
    match format {
        RemovableFormat::Zip100 => DiskGeometry::new(96, 64, 32, DEFAULT_SECTOR_SIZE),
        _ => {
            let (sectors, sector_size) = format.layout();
            DiskGeometry::linear(sectors, sector_size)
        }
    }
}

/// Write `len` zero bytes to `writer` in [`ZERO_CHUNK_LEN`] chunks, reporting progress after
/// each chunk.
pub(crate) fn write_zeroes<W: Write>(
    writer: &mut W,
    len: u64,
    progress: Option<ProgressCallback>,
) -> Result<(), MediaError> {
    let chunk = vec![0u8; ZERO_CHUNK_LEN];
    let chunk_ct = len.div_ceil(ZERO_CHUNK_LEN as u64);
    let mut reporter = ProgressReporter::new(progress, chunk_ct);

    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(ZERO_CHUNK_LEN as u64) as usize;
        writer.write_all(&chunk[..n])?;
        remaining -= n as u64;
        reporter.step();
    }
    reporter.complete();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Cursor;
    use std::sync::{Arc, Mutex};

    #[test]
    fn container_selection() {
        assert_eq!(RawContainer::for_path(Path::new("a.ZDI"), None), RawContainer::Zdi);
        assert_eq!(RawContainer::for_path(Path::new("a.mdi"), None), RawContainer::Mdi);
        assert_eq!(RawContainer::for_path(Path::new("a.iso"), None), RawContainer::Iso);
        assert_eq!(
            RawContainer::for_path(Path::new("a.bin"), Some(DriveType::CdRom)),
            RawContainer::Iso
        );
        assert_eq!(RawContainer::for_path(Path::new("a.img"), None), RawContainer::Plain);
        assert_eq!(RawContainer::Zdi.base_offset(), 0x1000);
        assert_eq!(RawContainer::for_path(Path::new("a.FDI"), None), RawContainer::Fdi);
        assert_eq!(RawContainer::for_path(Path::new("a.ddi"), None), RawContainer::Ddi);
        assert_eq!(RawContainer::Ddi.base_offset(), 0x2400);
    }

    #[test]
    fn zip_geometry() {
        let format = RemovableFormat::from_size(96 * 64 * 32 * 512, true).unwrap();
        assert_eq!(removable_geometry(format).get(), (96, 64, 32, 512));
        assert!(removable_format(1_000_000, true).is_err());
    }

    #[test]
    fn zero_fill_reports_each_chunk() {
        let seen = Arc::new(Mutex::new(0usize));
        let sink = seen.clone();
        let cb: ProgressCallback = Arc::new(move |_| *sink.lock().unwrap() += 1);

        let mut out = Cursor::new(Vec::new());
        write_zeroes(&mut out, (ZERO_CHUNK_LEN * 2 + 512) as u64, Some(cb)).unwrap();
        assert_eq!(out.get_ref().len(), ZERO_CHUNK_LEN * 2 + 512);
        // ProgressSupport, three chunks, Complete
        assert_eq!(*seen.lock().unwrap(), 5);
    }
}
