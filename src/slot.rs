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

    src/slot.rs

    A media slot is one emulated drive: its drive type, the image loaded in
    it, and the per-drive settings that affect how the image is served.
*/
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    diskimage::TrackData,
    timing::{RpmClass, TimingModel},
    DiskCh,
    DiskGeometry,
    DiskImage,
    DriveType,
    ImageOpenOptions,
    MediaError,
    MediaImage,
    SectorAddress,
    StaleChainPolicy,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    ReadWrite,
    WriteProtected,
}

/// The data of a sector read, and the time the access would take on real hardware.
#[derive(Clone, Debug)]
pub struct SectorResult {
    pub data:  Vec<u8>,
    pub delay: Duration,
}

pub struct MediaSlot {
    drive_type: DriveType,
    image: Option<DiskImage>,
    /// Write protection requested by the user, independent of the image.
    write_protect: bool,
    rpm_class: RpmClass,
    turbo: bool,
    check_bpb: bool,
    stale_chain: StaleChainPolicy,
    allow_read_only_fallback: bool,
}

impl MediaSlot {
    pub fn new(drive_type: DriveType) -> Self {
        MediaSlot {
            drive_type,
            image: None,
            write_protect: false,
            rpm_class: RpmClass::Perfect,
            turbo: false,
            check_bpb: true,
            stale_chain: StaleChainPolicy::Report,
            allow_read_only_fallback: false,
        }
    }

    pub fn drive_type(&self) -> DriveType {
        self.drive_type
    }

    pub fn state(&self) -> SlotState {
        match &self.image {
            None => SlotState::Empty,
            Some(_) if self.is_write_protected() => SlotState::WriteProtected,
            Some(_) => SlotState::ReadWrite,
        }
    }

    pub fn image(&self) -> Option<&DiskImage> {
        self.image.as_ref()
    }

    /// Path of the loaded image.
    pub fn path(&self) -> Option<&Path> {
        self.image.as_ref().map(|i| i.path())
    }

    /// Load the image at `path`. A loaded image is ejected first; if its final flush fails the
    /// slot is left empty and the error is returned without loading the new image.
    pub fn insert(&mut self, path: impl AsRef<Path>, write_protect: bool) -> Result<(), MediaError> {
        let path = path.as_ref();
        if self.image.is_some() {
            self.eject()?;
        }

        let options = ImageOpenOptions::new()
            .with_drive_type(self.drive_type)
            .with_check_bpb(self.check_bpb)
            .with_stale_chain_policy(self.stale_chain)
            .with_read_only_fallback(self.allow_read_only_fallback);
        let image = DiskImage::open(path, &options)?;

        log::debug!(
            "MediaSlot::insert(): Loaded {} ({}) into {} drive",
            path.display(),
            image.format(),
            self.drive_type
        );
        self.write_protect = write_protect;
        self.image = Some(image);
        Ok(())
    }

    /// Flush and unload the image. The slot is empty afterwards even if the flush failed, in
    /// which case the flush error is returned. Returns the path of the ejected image.
    pub fn eject(&mut self) -> Result<Option<PathBuf>, MediaError> {
        let Some(image) = self.image.take()
        else {
            return Ok(None);
        };
        let path = image.path().to_path_buf();
        log::debug!("MediaSlot::eject(): Ejecting {}", path.display());
        image.close()?;
        Ok(Some(path))
    }

    /// Effective write protection: the user's flag, or protection imposed by the image itself.
    pub fn is_write_protected(&self) -> bool {
        self.write_protect || self.image.as_ref().is_some_and(|i| i.is_write_protected())
    }

    pub fn set_write_protect(&mut self, state: bool) {
        self.write_protect = state;
    }

    pub fn rpm_class(&self) -> RpmClass {
        self.rpm_class
    }

    pub fn set_rpm_class(&mut self, rpm_class: RpmClass) {
        self.rpm_class = rpm_class;
    }

    pub fn turbo(&self) -> bool {
        self.turbo
    }

    pub fn set_turbo(&mut self, state: bool) {
        self.turbo = state;
    }

    pub fn set_check_bpb(&mut self, state: bool) {
        self.check_bpb = state;
    }

    pub fn set_stale_chain_policy(&mut self, policy: StaleChainPolicy, allow_read_only_fallback: bool) {
        self.stale_chain = policy;
        self.allow_read_only_fallback = allow_read_only_fallback;
    }

    fn image_mut(&mut self) -> Result<&mut DiskImage, MediaError> {
        self.image.as_mut().ok_or(MediaError::EmptySlot)
    }

    pub fn geometry(&self) -> Result<DiskGeometry, MediaError> {
        self.image.as_ref().map(|i| i.geometry()).ok_or(MediaError::EmptySlot)
    }

    /// The timing model for the current media and settings. Only floppy drives have rotational
    /// timing; other drives complete immediately.
    pub fn timing(&self) -> Option<TimingModel> {
        if self.drive_type != DriveType::Floppy {
            return None;
        }
        let format = self.image.as_ref().and_then(|i| i.descriptor().standard_format);
        Some(TimingModel::for_format(format, self.rpm_class, self.turbo))
    }

    pub fn read_sector(&mut self, address: SectorAddress) -> Result<SectorResult, MediaError> {
        let timing = self.timing();
        let image = self.image_mut()?;
        let geometry = image.geometry();
        let lba = geometry.resolve(address)?;
        let data = image.read_block(lba)?;

        let delay = timing
            .map(|t| t.sector_latency(geometry.sectors))
            .unwrap_or(Duration::ZERO);
        Ok(SectorResult { data, delay })
    }

    pub fn write_sector(&mut self, address: SectorAddress, data: &[u8]) -> Result<Duration, MediaError> {
        if self.image.is_none() {
            return Err(MediaError::EmptySlot);
        }
        if self.is_write_protected() {
            return Err(MediaError::WriteProtected);
        }
        let timing = self.timing();
        let image = self.image_mut()?;
        let geometry = image.geometry();
        let lba = geometry.resolve(address)?;
        image.write_block(lba, data)?;

        Ok(timing
            .map(|t| t.sector_latency(geometry.sectors))
            .unwrap_or(Duration::ZERO))
    }

    pub fn read_track(&mut self, ch: DiskCh) -> Result<(TrackData, Duration), MediaError> {
        let timing = self.timing();
        let track = self.image_mut()?.read_track(ch)?;
        Ok((track, timing.map(|t| t.track_latency()).unwrap_or(Duration::ZERO)))
    }

    pub fn flush(&mut self) -> Result<(), MediaError> {
        match &mut self.image {
            Some(image) => image.flush(),
            None => Ok(()),
        }
    }
}
