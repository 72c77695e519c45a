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

//! # mediabay
//!
//! mediabay is the storage media layer of a PC emulator. It opens, interprets and serves I/O
//! against the disk image formats an emulated machine's drives may be loaded with, and presents
//! them to emulated disk controllers through a uniform sector interface.
//!
//! Supported image formats:
//!  * Raw sector images (IMG, IMA, DSK, ZIP/ZDI, MO/MDI and ISO containers)
//!  * 86Box 86F surface images
//!  * ImageDisk (IMD) and Teledisk (TD0, including advanced compression)
//!  * HDI and HDX fixed-geometry hard disk images
//!  * VHD fixed, dynamic and differencing images
//!  * Cassette and PCjr cartridge images
//!
//! The main entry point for an emulator is [`engine::StorageEngine`], which owns one
//! [`slot::MediaSlot`] per configured drive, validates bus attachments, and applies media
//! changes requested from a UI thread through a request queue.
//!
//! Images can also be used directly through [`DiskImage`], and created with
//! [`image_builder::ImageBuilder`].

mod bitstream;
pub mod boot_sector;
pub mod bus;
pub mod config;
mod diskimage;
pub mod engine;
mod error;
pub mod file_parsers;
pub mod geometry;
mod io;
pub mod image_builder;
pub mod progress;
mod sector_map;
pub mod slot;
pub mod timing;
pub mod types;
pub mod util;

pub const MAXIMUM_SECTOR_SIZE: usize = 8192;
pub const DEFAULT_SECTOR_SIZE: usize = 512;
pub const ASCII_EOF: u8 = 0x1A;

pub use crate::{
    diskimage::{DiskImage, ImageDescriptor, ImageOpenOptions, MediaImage, TrackData},
    error::{ErrorClass, MediaError},
    file_parsers::{
        vhd::{ChainReport, StaleChainPolicy, StaleLink, VhdBlockSize},
        ImageFormat,
    },
    geometry::DiskGeometry,
    progress::{ProgressCallback, ProgressStatus},
    types::{
        chs::{DiskCh, DiskChs, DiskChsn, SectorAddress},
        enums::{BusType, DiskDataEncoding, DiskDataRate, DriveType},
        standard_format::{RemovableFormat, StandardFormat},
    },
};

pub mod prelude {
    pub use crate::{
        bus::{BusAttachment, BusRegistry},
        engine::{MediaChangeEvent, MediaRequest, RequestSender, SlotId, StorageEngine},
        image_builder::{ImageBuilder, SizeSpec},
        slot::{MediaSlot, SlotState},
        timing::{RpmClass, TimingModel},
        BusType,
        DiskCh,
        DiskChs,
        DiskChsn,
        DiskGeometry,
        DiskImage,
        DriveType,
        ImageFormat,
        ImageOpenOptions,
        MediaError,
        MediaImage,
        SectorAddress,
        StandardFormat,
    };
}
