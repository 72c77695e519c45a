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

    src/file_parsers/vhd/sparse.rs

    The 1024-byte dynamic disk header ("cxsparse"), its parent locator
    entries, and the block allocation table.
*/
use std::path::{Component, Path, PathBuf};

use binrw::{binrw, BinRead, BinWrite};

use crate::{
    file_parsers::vhd::footer::checksum,
    io::{Cursor, Read, Seek, SeekFrom, Write},
    MediaError,
    DEFAULT_SECTOR_SIZE,
};

pub const SPARSE_HEADER_LEN: usize = 1024;
pub const SPARSE_COOKIE: &[u8; 8] = b"cxsparse";
const SPARSE_CHECKSUM_OFFSET: usize = 36;
pub const SPARSE_HEADER_VERSION: u32 = 0x0001_0000;
/// The BAT immediately follows the sparse header in images we create.
pub const BAT_OFFSET: u64 = 1536;
pub const BAT_UNALLOCATED: u32 = 0xFFFF_FFFF;

/// Absolute Windows path, UTF-16LE.
pub const PLATFORM_CODE_W2KU: u32 = 0x5732_6B75;
/// Relative Windows path, UTF-16LE.
pub const PLATFORM_CODE_W2RU: u32 = 0x5732_7275;

pub const PARENT_LOCATOR_CT: usize = 8;
pub const PARENT_NAME_LEN: usize = 512;

/// Block size of a dynamic or differencing image.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VhdBlockSize {
    /// 2MB blocks (4096 sectors).
    #[default]
    Large,
    /// 512KB blocks (1024 sectors).
    Small,
}

impl VhdBlockSize {
    pub fn bytes(&self) -> u32 {
        match self {
            VhdBlockSize::Large => 2 * 1024 * 1024,
            VhdBlockSize::Small => 512 * 1024,
        }
    }

    pub fn sectors(&self) -> u32 {
        self.bytes() / DEFAULT_SECTOR_SIZE as u32
    }
}

#[derive(Clone, Debug, Default)]
#[binrw]
#[brw(big)]
pub struct ParentLocator {
    pub platform_code: u32,
    pub data_space: u32,
    pub data_len: u32,
    pub reserved: u32,
    pub data_offset: u64,
}

#[derive(Clone, Debug)]
#[binrw]
#[brw(big)]
pub struct SparseHeader {
    pub cookie: [u8; 8],
    pub data_offset: u64,
    pub table_offset: u64,
    pub header_version: u32,
    pub max_table_entries: u32,
    pub block_size: u32,
    pub checksum: u32,
    pub parent_uuid: [u8; 16],
    pub parent_timestamp: u32,
    pub reserved: u32,
    pub parent_name: [u8; PARENT_NAME_LEN],
    pub parent_locators: [ParentLocator; PARENT_LOCATOR_CT],
}

impl SparseHeader {
    /// Build the header of a new dynamic image with `block_ct` blocks.
    pub fn new(block_ct: u32, block_size: VhdBlockSize) -> Self {
        SparseHeader {
            cookie: *SPARSE_COOKIE,
            data_offset: u64::MAX,
            table_offset: BAT_OFFSET,
            header_version: SPARSE_HEADER_VERSION,
            max_table_entries: block_ct,
            block_size: block_size.bytes(),
            checksum: 0,
            parent_uuid: [0; 16],
            parent_timestamp: 0,
            reserved: 0,
            parent_name: [0; PARENT_NAME_LEN],
            parent_locators: Default::default(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MediaError> {
        let mut cursor = Cursor::new(bytes);
        Ok(SparseHeader::read(&mut cursor)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MediaError> {
        let mut cursor = Cursor::new(vec![0u8; SPARSE_HEADER_LEN]);
        self.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    pub fn compute_checksum(&self) -> Result<u32, MediaError> {
        let mut bytes = self.to_bytes()?;
        bytes[SPARSE_CHECKSUM_OFFSET..SPARSE_CHECKSUM_OFFSET + 4].fill(0);
        Ok(checksum(&bytes))
    }

    pub fn update_checksum(&mut self) -> Result<(), MediaError> {
        self.checksum = self.compute_checksum()?;
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        &self.cookie == SPARSE_COOKIE && self.compute_checksum().is_ok_and(|c| c == self.checksum)
    }

    pub fn read_at<RS: Read + Seek>(source: &mut RS, offset: u64) -> Result<SparseHeader, MediaError> {
        let mut buf = vec![0u8; SPARSE_HEADER_LEN];
        source.seek(SeekFrom::Start(offset))?;
        source.read_exact(&mut buf)?;
        let header = SparseHeader::from_bytes(&buf)?;

        if &header.cookie != SPARSE_COOKIE {
            return Err(MediaError::malformed("missing cxsparse cookie"));
        }
        if !header.is_valid() {
            log::error!("SparseHeader::read_at(): Dynamic header checksum mismatch");
            return Err(MediaError::malformed("VHD dynamic header checksum mismatch"));
        }
        if header.block_size == 0 || header.block_size % DEFAULT_SECTOR_SIZE as u32 != 0 {
            return Err(MediaError::malformed(format!(
                "invalid VHD block size {}",
                header.block_size
            )));
        }
        Ok(header)
    }

    pub fn write_at<W: Write + Seek>(&self, dest: &mut W, offset: u64) -> Result<(), MediaError> {
        dest.seek(SeekFrom::Start(offset))?;
        dest.write_all(&self.to_bytes()?)?;
        Ok(())
    }

    pub fn sectors_per_block(&self) -> u32 {
        self.block_size / DEFAULT_SECTOR_SIZE as u32
    }

    /// Length of a block's sector bitmap, padded to a whole sector.
    pub fn bitmap_len(&self) -> u64 {
        let bytes = (self.sectors_per_block() as u64).div_ceil(8);
        bytes.div_ceil(DEFAULT_SECTOR_SIZE as u64) * DEFAULT_SECTOR_SIZE as u64
    }

    /// Return the parent file name stored in the header.
    pub fn parent_name(&self) -> Option<String> {
        let units: Vec<u16> = self
            .parent_name
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .take_while(|&u| u != 0)
            .collect();
        let name = String::from_utf16_lossy(&units);
        if name.is_empty() {
            None
        }
        else {
            Some(name)
        }
    }

    pub fn set_parent_name(&mut self, name: &str) {
        self.parent_name = [0; PARENT_NAME_LEN];
        for (i, unit) in name.encode_utf16().take(PARENT_NAME_LEN / 2).enumerate() {
            self.parent_name[i * 2..i * 2 + 2].copy_from_slice(&unit.to_be_bytes());
        }
    }

    /// Return the locators with a platform code we can interpret, W2ku before W2ru.
    pub fn locators(&self) -> Vec<&ParentLocator> {
        let mut locators: Vec<&ParentLocator> = self
            .parent_locators
            .iter()
            .filter(|l| matches!(l.platform_code, PLATFORM_CODE_W2KU | PLATFORM_CODE_W2RU))
            .collect();
        locators.sort_by_key(|l| l.platform_code != PLATFORM_CODE_W2KU);
        locators
    }
}

/// Read the block allocation table.
pub fn read_bat<RS: Read + Seek>(source: &mut RS, header: &SparseHeader) -> Result<Vec<u32>, MediaError> {
    let mut buf = vec![0u8; header.max_table_entries as usize * 4];
    source.seek(SeekFrom::Start(header.table_offset))?;
    source.read_exact(&mut buf)?;
    Ok(buf
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Read the path stored by a parent locator.
pub fn read_locator<RS: Read + Seek>(source: &mut RS, locator: &ParentLocator) -> Result<String, MediaError> {
    let mut buf = vec![0u8; locator.data_len as usize];
    source.seek(SeekFrom::Start(locator.data_offset))?;
    source.read_exact(&mut buf)?;
    let units: Vec<u16> = buf
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

pub fn encode_locator_path(path: &str) -> Vec<u8> {
    path.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

/// Space reserved in the file for locator data of `len` bytes.
pub fn locator_space(len: usize) -> u32 {
    ((len / DEFAULT_SECTOR_SIZE + 1) * DEFAULT_SECTOR_SIZE) as u32
}

/// Express `target` relative to the directory `base`, in the backslash separated form stored
/// by W2ru locators.
pub fn relative_locator_path(base: &Path, target: &Path) -> String {
    let base: Vec<Component> = base.components().collect();
    let target: Vec<Component> = target.components().collect();
    let common = base.iter().zip(target.iter()).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<String> = Vec::new();
    if common == base.len() {
        parts.push(".".to_string());
    }
    for _ in common..base.len() {
        parts.push("..".to_string());
    }
    for component in &target[common..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }
    parts.join("\\")
}

/// Convert a path read from a locator into a host path.
pub fn locator_to_host_path(locator: &str) -> PathBuf {
    locator
        .split(['\\', '/'])
        .filter(|s| !s.is_empty())
        .fold(
            if locator.starts_with('/') { PathBuf::from("/") } else { PathBuf::new() },
            |path, part| path.join(part),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_and_checksum() {
        let mut header = SparseHeader::new(5, VhdBlockSize::Large);
        header.set_parent_name("parent.vhd");
        header.update_checksum().unwrap();
        let bytes = header.to_bytes().unwrap();

        assert_eq!(bytes.len(), SPARSE_HEADER_LEN);
        assert_eq!(&bytes[0..8], b"cxsparse");
        assert_eq!(&bytes[8..16], &[0xFF; 8]);
        assert_eq!(&bytes[16..24], &1536u64.to_be_bytes());
        assert_eq!(&bytes[28..32], &5u32.to_be_bytes());
        assert_eq!(&bytes[32..36], &0x0020_0000u32.to_be_bytes());
        assert_eq!(&bytes[64..66], &[0x00, b'p']);

        let parsed = SparseHeader::from_bytes(&bytes).unwrap();
        assert!(parsed.is_valid());
        assert_eq!(parsed.parent_name().as_deref(), Some("parent.vhd"));
        assert_eq!(parsed.bitmap_len(), 512);
        assert_eq!(parsed.sectors_per_block(), 4096);
    }

    #[test]
    fn small_blocks() {
        assert_eq!(VhdBlockSize::Small.sectors(), 1024);
        let header = SparseHeader::new(1, VhdBlockSize::Small);
        assert_eq!(header.bitmap_len(), 512);
    }

    #[test]
    fn relative_paths() {
        assert_eq!(
            relative_locator_path(Path::new("/vm/disks"), Path::new("/vm/disks/base.vhd")),
            ".\\base.vhd"
        );
        assert_eq!(
            relative_locator_path(Path::new("/vm/disks/child"), Path::new("/vm/disks/base.vhd")),
            "..\\base.vhd"
        );
        assert_eq!(
            locator_to_host_path("..\\base.vhd"),
            Path::new("..").join("base.vhd")
        );
    }

    #[test]
    fn locator_space_is_padded() {
        assert_eq!(locator_space(10), 512);
        assert_eq!(locator_space(512), 1024);
        assert_eq!(encode_locator_path("ab"), vec![b'a', 0, b'b', 0]);
    }
}
