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

    src/image_builder.rs

    Implements the Builder pattern for new disk images.

    Allows for creation of blank or pre-formatted images of every writable
    format. Requested sizes are checked against the format's capacity before
    the target file is created, and a failed creation removes whatever was
    written.
*/
use std::path::{Path, PathBuf};

use crate::{
    boot_sector::{bpb::BiosParameterBlock, formatted_boot_sector},
    file_parsers::{
        cassette::CassetteImage,
        f86::F86Image,
        hdi::HdiImage,
        hdx::HdxImage,
        imd::ImdImage,
        raw::{RawContainer, RawImage},
        td0::Td0Image,
        vhd,
        FormatCaps,
        ImageFormat,
    },
    geometry::{check_capacity, hd_chs_from_sectors},
    progress::ProgressCallback,
    DiskGeometry,
    DiskImage,
    DriveType,
    ImageOpenOptions,
    MediaError,
    MediaImage,
    RemovableFormat,
    StandardFormat,
    VhdBlockSize,
    DEFAULT_SECTOR_SIZE,
};

/// The size of an image to create.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SizeSpec {
    /// A standard floppy layout.
    Floppy(StandardFormat),
    /// An explicit hard disk geometry of 512-byte sectors.
    Chs { cylinders: u32, heads: u32, sectors: u32 },
    /// A byte size. Hard disk geometry is derived from it.
    Bytes(u64),
    /// A ZIP or magneto-optical cartridge.
    Removable(RemovableFormat),
}

/// What a [`SizeSpec`] resolves to for a given image format.
enum Layout {
    Floppy(StandardFormat),
    HardDisk(DiskGeometry),
    Removable(RemovableFormat),
    Tape(u64),
}

/// Implements the Builder pattern for new images.
#[derive(Default)]
pub struct ImageBuilder {
    #[doc = "The [`ImageFormat`] of the image to create."]
    pub format: Option<ImageFormat>,
    #[doc = "The size of the image to create."]
    pub size: Option<SizeSpec>,
    #[doc = "Write a DOS boot sector and empty FATs to new floppy images."]
    pub formatted: bool,
    #[doc = "Comment to store in formats that support one."]
    pub comment: Option<String>,
    #[doc = "Block size of dynamic and differencing VHD images."]
    pub block_size: VhdBlockSize,
    #[doc = "Parent image of a differencing VHD image."]
    pub parent: Option<PathBuf>,
    pub progress: Option<ProgressCallback>,
}

impl ImageBuilder {
    pub fn new() -> ImageBuilder {
        Default::default()
    }

    pub fn with_format(mut self, format: ImageFormat) -> ImageBuilder {
        self.format = Some(format);
        self
    }

    pub fn with_size(mut self, size: SizeSpec) -> ImageBuilder {
        self.size = Some(size);
        self
    }

    /// Set whether new floppy images should carry a boot sector and empty FATs.
    /// If this is not set, floppy images are created with their tracks formatted but their
    /// sectors blank.
    pub fn with_formatted(mut self, formatted: bool) -> ImageBuilder {
        self.formatted = formatted;
        self
    }

    pub fn with_comment(mut self, comment: &str) -> ImageBuilder {
        self.comment = Some(comment.to_string());
        self
    }

    pub fn with_block_size(mut self, block_size: VhdBlockSize) -> ImageBuilder {
        self.block_size = block_size;
        self
    }

    /// Set the parent of a differencing VHD image. The child takes its size from the parent.
    pub fn with_parent(mut self, parent: impl AsRef<Path>) -> ImageBuilder {
        self.parent = Some(parent.as_ref().to_path_buf());
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> ImageBuilder {
        self.progress = Some(callback);
        self
    }

    /// Create the image at `path` and open it.
    pub fn build(self, path: impl AsRef<Path>) -> Result<DiskImage, MediaError> {
        let path = path.as_ref();
        let Some(format) = self.format
        else {
            log::error!("ImageBuilder::build(): Image format not set");
            return Err(MediaError::ParameterError);
        };
        if !format.capabilities().contains(FormatCaps::CAP_CREATE) {
            return Err(MediaError::UnsupportedOperation(format!(
                "{} images cannot be created",
                format
            )));
        }

        let layout = self.layout(format, path)?;
        log::debug!("ImageBuilder::build(): Creating {} image {}", format, path.display());

        match self.create(format, &layout, path) {
            Ok(image) => Ok(image),
            Err(e) => {
                log::error!("ImageBuilder::build(): Creation of {} failed: {}", path.display(), e);
                if path.exists() {
                    if let Err(remove_err) = std::fs::remove_file(path) {
                        log::warn!(
                            "ImageBuilder::build(): Couldn't remove partial image {}: {}",
                            path.display(),
                            remove_err
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Resolve the size request for `format`, and check it against the format's capacity. Runs
    /// before anything touches the filesystem.
    fn layout(&self, format: ImageFormat, path: &Path) -> Result<Layout, MediaError> {
        if format == ImageFormat::VhdDifferencing {
            return match &self.parent {
                Some(parent) if parent.exists() => Ok(Layout::HardDisk(DiskGeometry::default())),
                Some(parent) => Err(MediaError::unreadable(
                    parent,
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                )),
                None => {
                    log::error!("ImageBuilder::layout(): Differencing images require a parent");
                    Err(MediaError::ParameterError)
                }
            };
        }

        let Some(size) = self.size
        else {
            log::error!("ImageBuilder::layout(): Image size not set");
            return Err(MediaError::ParameterError);
        };

        let layout = match (format, size) {
            (ImageFormat::F86 | ImageFormat::Imd | ImageFormat::Td0, SizeSpec::Floppy(floppy)) => Layout::Floppy(floppy),
            (ImageFormat::F86 | ImageFormat::Imd | ImageFormat::Td0, _) => {
                log::error!("ImageBuilder::layout(): {} images require a standard floppy format", format);
                return Err(MediaError::ParameterError);
            }
            (ImageFormat::Cassette, SizeSpec::Bytes(bytes)) => Layout::Tape(bytes),
            (ImageFormat::Cassette, _) => return Err(MediaError::ParameterError),
            (ImageFormat::Raw, SizeSpec::Floppy(floppy)) => Layout::Floppy(floppy),
            (ImageFormat::Raw, SizeSpec::Removable(removable)) => {
                let container = RawContainer::for_path(path, None);
                if (container == RawContainer::Zdi && !removable.is_zip())
                    || (container == RawContainer::Mdi && removable.is_zip())
                {
                    log::error!(
                        "ImageBuilder::layout(): {:?} media does not fit a {:?} container",
                        removable,
                        container
                    );
                    return Err(MediaError::ParameterError);
                }
                Layout::Removable(removable)
            }
            (_, SizeSpec::Removable(_) | SizeSpec::Floppy(_)) => {
                log::error!("ImageBuilder::layout(): {} images hold hard disks only", format);
                return Err(MediaError::ParameterError);
            }
            (_, SizeSpec::Chs {
                cylinders,
                heads,
                sectors,
            }) => {
                if cylinders == 0 || heads == 0 || sectors == 0 {
                    return Err(MediaError::ParameterError);
                }
                Layout::HardDisk(DiskGeometry::new(cylinders, heads, sectors, DEFAULT_SECTOR_SIZE))
            }
            (_, SizeSpec::Bytes(bytes)) => {
                check_capacity(format, bytes)?;
                let geometry = hd_chs_from_sectors(bytes / DEFAULT_SECTOR_SIZE as u64);
                if format != ImageFormat::VhdFixed
                    && format != ImageFormat::VhdDynamic
                    && geometry.total_bytes() != bytes
                {
                    log::warn!(
                        "ImageBuilder::layout(): {} bytes rounded down to geometry {}",
                        bytes,
                        geometry
                    );
                }
                Layout::HardDisk(geometry)
            }
        };

        if let Layout::HardDisk(geometry) = &layout {
            check_capacity(format, geometry.total_bytes())?;
        }
        Ok(layout)
    }

    fn create(&self, format: ImageFormat, layout: &Layout, path: &Path) -> Result<DiskImage, MediaError> {
        let progress = self.progress.clone();
        let mut open_opts = ImageOpenOptions::new();

        match (format, layout) {
            (ImageFormat::Raw, Layout::Floppy(floppy)) => {
                let container = match RawContainer::for_path(path, None) {
                    container @ (RawContainer::Fdi | RawContainer::Ddi) => container,
                    _ => RawContainer::Plain,
                };
                RawImage::create(path, container, floppy.disk_size() as u64, progress)?;
                open_opts = open_opts.with_drive_type(DriveType::Floppy);
            }
            (ImageFormat::Raw, Layout::Removable(removable)) => {
                let container = RawContainer::for_path(path, None);
                RawImage::create(path, container, removable.size(), progress)?;
                let drive = if removable.is_zip() { DriveType::Zip } else { DriveType::MagnetoOptical };
                open_opts = open_opts.with_drive_type(drive);
            }
            (ImageFormat::Raw, Layout::HardDisk(geometry)) => {
                RawImage::create(path, RawContainer::Plain, geometry.total_bytes(), progress)?;
                open_opts = open_opts
                    .with_drive_type(DriveType::HardDisk)
                    .with_geometry(*geometry);
            }
            (ImageFormat::F86, Layout::Floppy(floppy)) => F86Image::create(path, *floppy)?,
            (ImageFormat::Imd, Layout::Floppy(floppy)) => ImdImage::create(path, *floppy, self.comment.as_deref())?,
            (ImageFormat::Td0, Layout::Floppy(floppy)) => Td0Image::create(path, *floppy, self.comment.as_deref())?,
            (ImageFormat::Hdi, Layout::HardDisk(geometry)) => HdiImage::create(path, *geometry, progress)?,
            (ImageFormat::Hdx, Layout::HardDisk(geometry)) => HdxImage::create(path, *geometry, progress)?,
            (ImageFormat::VhdFixed, Layout::HardDisk(geometry)) => {
                vhd::create_fixed(path, self.vhd_size(geometry), geometry, progress)?
            }
            (ImageFormat::VhdDynamic, Layout::HardDisk(geometry)) => {
                vhd::create_dynamic(path, self.vhd_size(geometry), geometry, self.block_size)?
            }
            (ImageFormat::VhdDifferencing, _) => {
                let parent = self.parent.as_deref().ok_or(MediaError::ParameterError)?;
                vhd::create_differencing(path, parent, self.block_size)?
            }
            (ImageFormat::Cassette, Layout::Tape(bytes)) => CassetteImage::create(path, *bytes)?,
            _ => return Err(MediaError::ParameterError),
        }

        let mut image = DiskImage::open(path, &open_opts)?;
        if let (true, Layout::Floppy(floppy)) = (self.formatted, layout) {
            format_fat(&mut image, *floppy)?;
            image.flush()?;
        }
        Ok(image)
    }

    /// VHD images store their size separately from their geometry. Byte sizes keep the size
    /// that was asked for, rounded to whole sectors.
    fn vhd_size(&self, geometry: &DiskGeometry) -> u64 {
        match self.size {
            Some(SizeSpec::Bytes(bytes)) => bytes,
            _ => geometry.total_bytes(),
        }
    }
}

/// Write a boot sector, empty FATs and an empty root directory, as DOS FORMAT would.
fn format_fat(image: &mut DiskImage, format: StandardFormat) -> Result<(), MediaError> {
    let boot_sector = formatted_boot_sector(format);
    let bpb = BiosParameterBlock::from(format);
    let sector_size = format.sector_size();

    image.write_block(0, &boot_sector)?;

    let fat_start = bpb.v2.reserved_sectors as u64;
    let fat_len = bpb.v2.sectors_per_fat as u64;
    let root_len = (bpb.v2.root_entries as u64 * 32).div_ceil(sector_size as u64);
    let system_end = fat_start + fat_len * bpb.v2.number_of_fats as u64 + root_len;

    for lba in fat_start..system_end {
        let mut sector = vec![0u8; sector_size];
        if lba < fat_start + fat_len * bpb.v2.number_of_fats as u64 && (lba - fat_start) % fat_len == 0 {
            sector[0] = bpb.v2.media_descriptor;
            sector[1] = 0xFF;
            sector[2] = 0xFF;
        }
        image.write_block(lba, &sector)?;
    }
    log::debug!(
        "format_fat(): Wrote boot sector, {} FATs and {} root directory sectors",
        bpb.v2.number_of_fats,
        root_len
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::HDI_MAX_BYTES;

    #[test]
    fn missing_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = ImageBuilder::new()
            .with_size(SizeSpec::Floppy(StandardFormat::PcFloppy360))
            .build(dir.path().join("a.img"));
        assert!(matches!(result, Err(MediaError::ParameterError)));
    }

    #[test]
    fn floppy_formats_need_floppy_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.imd");
        let result = ImageBuilder::new()
            .with_format(ImageFormat::Imd)
            .with_size(SizeSpec::Bytes(1024 * 1024))
            .build(&path);
        assert!(matches!(result, Err(MediaError::ParameterError)));
        assert!(!path.exists());
    }

    #[test]
    fn oversized_hdi_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.hdi");
        let result = ImageBuilder::new()
            .with_format(ImageFormat::Hdi)
            .with_size(SizeSpec::Chs {
                cylinders: 8400,
                heads:     16,
                sectors:   63,
            })
            .build(&path);
        assert!(8400u64 * 16 * 63 * 512 > HDI_MAX_BYTES);
        assert!(matches!(result, Err(MediaError::SizeExceeded { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn cartridges_cannot_be_created() {
        let dir = tempfile::tempdir().unwrap();
        let result = ImageBuilder::new()
            .with_format(ImageFormat::Cartridge)
            .with_size(SizeSpec::Bytes(512))
            .build(dir.path().join("a.jrc"));
        assert!(matches!(result, Err(MediaError::UnsupportedOperation(_))));
    }

    #[test]
    fn formatted_raw_floppy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dos.img");
        let mut image = ImageBuilder::new()
            .with_format(ImageFormat::Raw)
            .with_size(SizeSpec::Floppy(StandardFormat::PcFloppy720))
            .with_formatted(true)
            .build(&path)
            .unwrap();

        assert_eq!(image.geometry().get(), (80, 2, 9, 512));
        let boot = image.read_block(0).unwrap();
        assert_eq!(&boot[510..512], &[0x55, 0xAA]);
        // 720K: one reserved sector, two FATs of three sectors each.
        assert_eq!(&image.read_block(1).unwrap()[0..3], &[0xF9, 0xFF, 0xFF]);
        assert_eq!(&image.read_block(4).unwrap()[0..3], &[0xF9, 0xFF, 0xFF]);
        assert_eq!(&image.read_block(2).unwrap()[0..3], &[0, 0, 0]);
    }
}
