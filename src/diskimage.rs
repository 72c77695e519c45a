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

    src/diskimage.rs

    The open image: a closed set of codecs behind one enum, the descriptor
    every codec exposes, and the options used to open one.
*/
use std::{
    fmt::{self, Debug, Formatter},
    fs::{File, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
    time::SystemTime,
};

use bit_vec::BitVec;

use crate::{
    file_parsers::{
        cartridge::CartridgeImage,
        cassette::CassetteImage,
        cue::CueImage,
        detect_format,
        f86::F86Image,
        hdi::HdiImage,
        hdx::HdxImage,
        imd::ImdImage,
        packed::PackedImage,
        pcjs::PcjsImage,
        raw::RawImage,
        td0::Td0Image,
        vhd::{StaleChainPolicy, VhdImage},
        ImageFormat,
    },
    progress::ProgressCallback,
    DiskCh,
    DiskDataEncoding,
    DiskDataRate,
    DiskGeometry,
    DriveType,
    MediaError,
    RemovableFormat,
    StandardFormat,
};

/// Describes an open image. Fixed for the lifetime of the image, except for the write protect
/// flag.
#[derive(Clone, Debug)]
pub struct ImageDescriptor {
    pub format: ImageFormat,
    pub path: PathBuf,
    /// Size of the backing file in bytes.
    pub byte_size: u64,
    pub geometry: DiskGeometry,
    /// Image-level write protection: a read-only host file, or a format that cannot be written.
    pub write_protected: bool,
    pub modified: Option<SystemTime>,
    /// The standard floppy format the image was resolved to, if any.
    pub standard_format: Option<StandardFormat>,
    pub removable_format: Option<RemovableFormat>,
}

impl ImageDescriptor {
    pub(crate) fn new(format: ImageFormat, path: &Path, geometry: DiskGeometry) -> Self {
        ImageDescriptor {
            format,
            path: path.to_path_buf(),
            byte_size: 0,
            geometry,
            write_protected: false,
            modified: std::fs::metadata(path).and_then(|m| m.modified()).ok(),
            standard_format: None,
            removable_format: None,
        }
    }

    pub fn sector_size(&self) -> usize {
        self.geometry.sector_size
    }

    /// Check a block read request against the geometry.
    pub(crate) fn check_read(&self, lba: u64) -> Result<(), MediaError> {
        if lba >= self.geometry.total_sectors() {
            return Err(MediaError::SectorNotFound(format!(
                "LBA {} is beyond the end of the media ({} sectors)",
                lba,
                self.geometry.total_sectors()
            )));
        }
        Ok(())
    }

    /// Check a block write request against the geometry, sector size and write protection.
    pub(crate) fn check_write(&self, lba: u64, data: &[u8]) -> Result<(), MediaError> {
        if self.write_protected {
            return Err(MediaError::WriteProtected);
        }
        self.check_read(lba)?;
        if data.len() != self.sector_size() {
            log::error!(
                "check_write(): Buffer of {} bytes does not match sector size {}",
                data.len(),
                self.sector_size()
            );
            return Err(MediaError::ParameterError);
        }
        Ok(())
    }
}

/// Options used when opening an image, in the manner of [`std::fs::OpenOptions`].
#[derive(Clone, Default)]
pub struct ImageOpenOptions {
    /// Open the image read-only.
    pub write_protect: bool,
    /// Consult the BIOS Parameter Block of headerless floppy images.
    pub check_bpb: bool,
    /// Geometry to use for headerless images instead of guessing one.
    pub geometry: Option<DiskGeometry>,
    /// The drive the image is being loaded into, if known. Selects how headerless images are
    /// interpreted.
    pub drive_type: Option<DriveType>,
    pub stale_chain: StaleChainPolicy,
    /// When a stale differencing chain cannot be repaired, open the image write protected
    /// instead of failing.
    pub allow_read_only_fallback: bool,
    pub progress: Option<ProgressCallback>,
}

impl Debug for ImageOpenOptions {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("ImageOpenOptions")
            .field("write_protect", &self.write_protect)
            .field("check_bpb", &self.check_bpb)
            .field("geometry", &self.geometry)
            .field("drive_type", &self.drive_type)
            .field("stale_chain", &self.stale_chain)
            .field("allow_read_only_fallback", &self.allow_read_only_fallback)
            .finish()
    }
}

impl ImageOpenOptions {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_write_protect(mut self, state: bool) -> Self {
        self.write_protect = state;
        self
    }

    pub fn with_check_bpb(mut self, state: bool) -> Self {
        self.check_bpb = state;
        self
    }

    pub fn with_geometry(mut self, geometry: DiskGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_drive_type(mut self, drive_type: DriveType) -> Self {
        self.drive_type = Some(drive_type);
        self
    }

    pub fn with_stale_chain_policy(mut self, policy: StaleChainPolicy) -> Self {
        self.stale_chain = policy;
        self
    }

    pub fn with_read_only_fallback(mut self, state: bool) -> Self {
        self.allow_read_only_fallback = state;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }
}

/// A track of MFM bitcells from a surface image.
#[derive(Clone, Debug)]
pub struct TrackData {
    pub ch: DiskCh,
    pub encoding: DiskDataEncoding,
    pub data_rate: DiskDataRate,
    pub bits: BitVec,
}

/// The operations every image codec provides.
pub trait MediaImage {
    fn descriptor(&self) -> &ImageDescriptor;

    fn geometry(&self) -> DiskGeometry {
        self.descriptor().geometry
    }

    fn is_write_protected(&self) -> bool {
        self.descriptor().write_protected
    }

    /// Read one logical block (sector) by linear address.
    fn read_block(&mut self, lba: u64) -> Result<Vec<u8>, MediaError>;

    /// Write one logical block. `data` must be exactly one sector long.
    fn write_block(&mut self, lba: u64, data: &[u8]) -> Result<(), MediaError>;

    /// Persist any pending writes to the backing file.
    fn flush(&mut self) -> Result<(), MediaError>;

    /// Return true if there are writes not yet persisted.
    fn is_dirty(&self) -> bool {
        false
    }

    /// Read a whole track surface. Only surface images support this.
    fn read_track(&mut self, _ch: DiskCh) -> Result<TrackData, MediaError> {
        Err(MediaError::UnsupportedOperation(format!(
            "{} images have no track surface",
            self.descriptor().format
        )))
    }

    /// Replace a whole track surface. Only surface images support this.
    fn write_track(&mut self, _track: TrackData) -> Result<(), MediaError> {
        Err(MediaError::UnsupportedOperation(format!(
            "{} images have no track surface",
            self.descriptor().format
        )))
    }
}

/// An open image of one of the supported formats. The variant is chosen when the image is opened
/// and does not change.
pub enum DiskImage {
    Raw(RawImage),
    F86(F86Image),
    Imd(ImdImage),
    Td0(Td0Image),
    Hdi(HdiImage),
    Hdx(HdxImage),
    Vhd(VhdImage),
    Cassette(CassetteImage),
    Cartridge(CartridgeImage),
    Packed(PackedImage),
    Pcjs(PcjsImage),
    Cue(CueImage),
}

macro_rules! dispatch {
    ($self:ident, $image:ident => $body:expr) => {
        match $self {
            DiskImage::Raw($image) => $body,
            DiskImage::F86($image) => $body,
            DiskImage::Imd($image) => $body,
            DiskImage::Td0($image) => $body,
            DiskImage::Hdi($image) => $body,
            DiskImage::Hdx($image) => $body,
            DiskImage::Vhd($image) => $body,
            DiskImage::Cassette($image) => $body,
            DiskImage::Cartridge($image) => $body,
            DiskImage::Packed($image) => $body,
            DiskImage::Pcjs($image) => $body,
            DiskImage::Cue($image) => $body,
        }
    };
}

impl DiskImage {
    /// Open the image at `path`, detecting its format from its content.
    ///
    /// Unless `write_protect` is requested the file is opened for writing. A file the host will
    /// not let us write is still opened, but write protected.
    pub fn open(path: impl AsRef<Path>, options: &ImageOpenOptions) -> Result<DiskImage, MediaError> {
        let path = path.as_ref();
        let (mut file, read_only) = open_backing_file(path, options.write_protect)?;

        let format = detect_format(&mut file, path)?;
        log::debug!("DiskImage::open(): Detected {} for {}", format, path.display());

        if let Some(drive) = options.drive_type {
            if !format.supports_drive(drive) {
                log::error!("DiskImage::open(): {} images cannot be loaded in a {} drive", format, drive);
                return Err(MediaError::UnsupportedOperation(format!(
                    "{} images cannot be loaded in a {} drive",
                    format, drive
                )));
            }
        }

        let image = match format {
            ImageFormat::Raw => DiskImage::Raw(RawImage::open(file, path, options, read_only)?),
            ImageFormat::F86 => DiskImage::F86(F86Image::open(file, path, options, read_only)?),
            ImageFormat::Imd => DiskImage::Imd(ImdImage::open(file, path, options, read_only)?),
            ImageFormat::Td0 => DiskImage::Td0(Td0Image::open(file, path, options, read_only)?),
            ImageFormat::Hdi => DiskImage::Hdi(HdiImage::open(file, path, options, read_only)?),
            ImageFormat::Hdx => DiskImage::Hdx(HdxImage::open(file, path, options, read_only)?),
            ImageFormat::VhdFixed | ImageFormat::VhdDynamic | ImageFormat::VhdDifferencing => {
                DiskImage::Vhd(VhdImage::open(file, path, options, read_only)?)
            }
            ImageFormat::Cassette => DiskImage::Cassette(CassetteImage::open(file, path, options, read_only)?),
            ImageFormat::Cartridge => DiskImage::Cartridge(CartridgeImage::open(file, path, options, read_only)?),
            ImageFormat::CopyQm | ImageFormat::Fdf => {
                DiskImage::Packed(PackedImage::open(file, path, options, read_only)?)
            }
            ImageFormat::Pcjs => DiskImage::Pcjs(PcjsImage::open(file, path, options, read_only)?),
            ImageFormat::Cue => DiskImage::Cue(CueImage::open(file, path, options, read_only)?),
        };

        log::debug!(
            "DiskImage::open(): Opened {} geometry {}{}",
            path.display(),
            image.geometry(),
            if image.is_write_protected() { " (write protected)" } else { "" }
        );
        Ok(image)
    }

    pub fn format(&self) -> ImageFormat {
        self.descriptor().format
    }

    pub fn path(&self) -> &Path {
        &self.descriptor().path
    }

    /// Flush pending writes and release the image.
    pub fn close(mut self) -> Result<(), MediaError> {
        self.flush()
    }
}

impl MediaImage for DiskImage {
    fn descriptor(&self) -> &ImageDescriptor {
        dispatch!(self, image => image.descriptor())
    }

    fn read_block(&mut self, lba: u64) -> Result<Vec<u8>, MediaError> {
        dispatch!(self, image => image.read_block(lba))
    }

    fn write_block(&mut self, lba: u64, data: &[u8]) -> Result<(), MediaError> {
        if self.is_write_protected() {
            return Err(MediaError::WriteProtected);
        }
        dispatch!(self, image => image.write_block(lba, data))
    }

    fn flush(&mut self) -> Result<(), MediaError> {
        dispatch!(self, image => image.flush())
    }

    fn is_dirty(&self) -> bool {
        dispatch!(self, image => image.is_dirty())
    }

    fn read_track(&mut self, ch: DiskCh) -> Result<TrackData, MediaError> {
        dispatch!(self, image => image.read_track(ch))
    }

    fn write_track(&mut self, track: TrackData) -> Result<(), MediaError> {
        if self.is_write_protected() {
            return Err(MediaError::WriteProtected);
        }
        dispatch!(self, image => image.write_track(track))
    }
}

/// Open the backing file of an image. Returns the file and whether it was opened read-only.
pub(crate) fn open_backing_file(path: &Path, read_only: bool) -> Result<(File, bool), MediaError> {
    if !read_only {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => return Ok((file, false)),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                log::warn!(
                    "open_backing_file(): {} is not writable, opening write protected",
                    path.display()
                );
            }
            Err(e) => return Err(MediaError::unreadable(path, e)),
        }
    }

    let file = File::open(path).map_err(|e| MediaError::unreadable(path, e))?;
    Ok((file, true))
}
