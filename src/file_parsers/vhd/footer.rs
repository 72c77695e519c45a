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

    src/file_parsers/vhd/footer.rs

    The 512-byte VHD footer ("hard disk footer"), present at the end of every
    VHD and copied to the start of dynamic and differencing images.
*/
use std::time::SystemTime;

use binrw::{binrw, BinRead, BinWrite};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::{
    io::{Cursor, Read, Seek, SeekFrom},
    util::to_y2k_seconds,
    DiskGeometry,
    MediaError,
    DEFAULT_SECTOR_SIZE,
};

pub const FOOTER_LEN: usize = 512;
pub const FOOTER_COOKIE: &[u8; 8] = b"conectix";
const FOOTER_CHECKSUM_OFFSET: usize = 64;

pub const VHD_FEATURES_RESERVED: u32 = 0x0000_0002;
pub const VHD_FORMAT_VERSION: u32 = 0x0001_0000;
pub const VHD_FIXED_DATA_OFFSET: u64 = u64::MAX;
pub const VHD_CREATOR_APP: &[u8; 4] = b"mvhd";
pub const VHD_CREATOR_VERSION: u32 = 0x000E_0000;
pub const VHD_CREATOR_HOST: &[u8; 4] = b"Wi2k";

/// The disk type field of the footer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum VhdDiskType {
    Fixed = 2,
    Dynamic = 3,
    Differencing = 4,
}

impl TryFrom<u32> for VhdDiskType {
    type Error = MediaError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        VhdDiskType::from_u32(value).ok_or_else(|| {
            log::error!("VhdDiskType::try_from(): Unsupported disk type {}", value);
            MediaError::UnsupportedFormat
        })
    }
}

#[derive(Clone, Debug)]
#[binrw]
#[brw(big)]
pub struct VhdFooter {
    pub cookie: [u8; 8],
    pub features: u32,
    pub format_version: u32,
    pub data_offset: u64,
    pub timestamp: u32,
    pub creator_app: [u8; 4],
    pub creator_version: u32,
    pub creator_host: [u8; 4],
    pub original_size: u64,
    pub current_size: u64,
    pub cylinders: u16,
    pub heads: u8,
    pub sectors: u8,
    pub disk_type: u32,
    pub checksum: u32,
    pub uuid: [u8; 16],
    pub saved_state: u8,
}

impl VhdFooter {
    /// Build a footer for a new image. The checksum is filled in.
    pub fn new(disk_type: VhdDiskType, size: u64, geometry: &DiskGeometry, uuid: [u8; 16]) -> Result<Self, MediaError> {
        if geometry.cylinders > u16::MAX as u32 || geometry.heads > u8::MAX as u32 || geometry.sectors > u8::MAX as u32 {
            log::error!("VhdFooter::new(): Geometry {} cannot be stored in a VHD footer", geometry);
            return Err(MediaError::ParameterError);
        }

        let mut footer = VhdFooter {
            cookie: *FOOTER_COOKIE,
            features: VHD_FEATURES_RESERVED,
            format_version: VHD_FORMAT_VERSION,
            data_offset: match disk_type {
                VhdDiskType::Fixed => VHD_FIXED_DATA_OFFSET,
                _ => FOOTER_LEN as u64,
            },
            timestamp: to_y2k_seconds(SystemTime::now()),
            creator_app: *VHD_CREATOR_APP,
            creator_version: VHD_CREATOR_VERSION,
            creator_host: *VHD_CREATOR_HOST,
            original_size: size,
            current_size: size,
            cylinders: geometry.cylinders as u16,
            heads: geometry.heads as u8,
            sectors: geometry.sectors as u8,
            disk_type: disk_type as u32,
            checksum: 0,
            uuid,
            saved_state: 0,
        };
        footer.checksum = footer.compute_checksum()?;
        Ok(footer)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MediaError> {
        let mut cursor = Cursor::new(bytes);
        Ok(VhdFooter::read(&mut cursor)?)
    }

    /// Serialize the footer, zero padded to 512 bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MediaError> {
        let mut cursor = Cursor::new(vec![0u8; FOOTER_LEN]);
        self.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    pub fn compute_checksum(&self) -> Result<u32, MediaError> {
        let mut bytes = self.to_bytes()?;
        bytes[FOOTER_CHECKSUM_OFFSET..FOOTER_CHECKSUM_OFFSET + 4].fill(0);
        Ok(checksum(&bytes))
    }

    /// Return true if the cookie and checksum are both valid.
    pub fn is_valid(&self) -> bool {
        &self.cookie == FOOTER_COOKIE && self.compute_checksum().is_ok_and(|c| c == self.checksum)
    }

    pub fn disk_type(&self) -> Result<VhdDiskType, MediaError> {
        VhdDiskType::try_from(self.disk_type)
    }

    pub fn geometry(&self) -> DiskGeometry {
        DiskGeometry::new(
            self.cylinders as u32,
            self.heads as u32,
            self.sectors as u32,
            DEFAULT_SECTOR_SIZE,
        )
    }

    /// Read the footer of a VHD. The copy at the end of the file is authoritative; if it is
    /// damaged, the copy at the start of a dynamic image is used instead.
    pub fn read_from<RS: Read + Seek>(source: &mut RS) -> Result<VhdFooter, MediaError> {
        let len = source.seek(SeekFrom::End(0))?;
        if len < FOOTER_LEN as u64 {
            return Err(MediaError::malformed("file is too short to hold a VHD footer"));
        }

        let mut buf = vec![0u8; FOOTER_LEN];
        source.seek(SeekFrom::Start(len - FOOTER_LEN as u64))?;
        source.read_exact(&mut buf)?;
        let footer = VhdFooter::from_bytes(&buf)?;
        if footer.is_valid() {
            return Ok(footer);
        }

        source.seek(SeekFrom::Start(0))?;
        source.read_exact(&mut buf)?;
        let copy = VhdFooter::from_bytes(&buf)?;
        if copy.is_valid() && copy.disk_type != VhdDiskType::Fixed as u32 {
            log::warn!("VhdFooter::read_from(): Trailing footer is damaged, using the copy at offset 0");
            return Ok(copy);
        }

        if &footer.cookie == FOOTER_COOKIE {
            log::error!("VhdFooter::read_from(): Footer checksum mismatch");
            return Err(MediaError::malformed("VHD footer checksum mismatch"));
        }
        Err(MediaError::malformed("no VHD footer found"))
    }
}

/// One's complement of the sum of all bytes, as used by both VHD header structures.
pub(crate) fn checksum(bytes: &[u8]) -> u32 {
    !bytes.iter().fold(0u32, |sum, &b| sum.wrapping_add(b as u32))
}

/// Generate a random (version 4) UUID for a new image.
pub(crate) fn new_uuid() -> [u8; 16] {
    let mut uuid: [u8; 16] = rand::random();
    uuid[6] = (uuid[6] & 0x0F) | 0x40;
    uuid[8] = (uuid[8] & 0x3F) | 0x80;
    uuid
}
