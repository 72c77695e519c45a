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

    src/file_parsers/vhd/create.rs

    Creation of fixed, dynamic and differencing VHD images, and conversion
    of raw hard disk images to fixed VHDs.
*/
use std::{
    fs::{File, OpenOptions},
    path::Path,
};

use crate::{
    file_parsers::{
        raw::write_zeroes,
        vhd::{
            footer::{new_uuid, VhdDiskType, VhdFooter},
            sparse::{
                encode_locator_path,
                locator_space,
                relative_locator_path,
                ParentLocator,
                SparseHeader,
                VhdBlockSize,
                BAT_OFFSET,
                PLATFORM_CODE_W2KU,
                PLATFORM_CODE_W2RU,
            },
        },
        ImageFormat,
    },
    geometry::{check_capacity, hd_chs_from_sectors},
    io::{Seek, SeekFrom, Write},
    progress::ProgressCallback,
    util::{file_modified, get_length, to_y2k_seconds},
    DiskGeometry,
    MediaError,
    DEFAULT_SECTOR_SIZE,
};

/// Number of empty sectors written after the BAT and after the parent locator data.
const PADDING_SECTORS: u64 = 5;

/// Create a fixed VHD of `size` bytes. The data area is zero filled in 1MB chunks, with progress
/// reported after each chunk.
pub fn create_fixed(
    path: &Path,
    size: u64,
    geometry: &DiskGeometry,
    progress: Option<ProgressCallback>,
) -> Result<(), MediaError> {
    check_capacity(ImageFormat::VhdFixed, size)?;
    let footer = VhdFooter::new(VhdDiskType::Fixed, size, geometry, new_uuid())?;

    let mut file = File::create(path).map_err(|e| MediaError::unwritable(path, e))?;
    write_zeroes(&mut file, size, progress)?;
    file.write_all(&footer.to_bytes()?)?;
    file.flush()?;
    Ok(())
}

/// Create an empty dynamic VHD of `size` bytes.
pub fn create_dynamic(path: &Path, size: u64, geometry: &DiskGeometry, block_size: VhdBlockSize) -> Result<(), MediaError> {
    check_capacity(ImageFormat::VhdDynamic, size)?;
    let footer = VhdFooter::new(VhdDiskType::Dynamic, size, geometry, new_uuid())?;
    let mut header = SparseHeader::new(block_count(size, block_size), block_size);
    header.update_checksum()?;

    let mut file = File::create(path).map_err(|e| MediaError::unwritable(path, e))?;
    write_sparse_layout(&mut file, &footer, &header, &[])?;
    Ok(())
}

/// Create a differencing VHD over `parent`. The child takes its size and geometry from the
/// parent, and records the parent's UUID, name, modification time and location.
pub fn create_differencing(path: &Path, parent: &Path, block_size: VhdBlockSize) -> Result<(), MediaError> {
    let mut parent_file = File::open(parent).map_err(|e| MediaError::unreadable(parent, e))?;
    let parent_footer = VhdFooter::read_from(&mut parent_file)?;
    drop(parent_file);

    let parent_abs = parent.canonicalize().map_err(|e| MediaError::unreadable(parent, e))?;
    let parent_timestamp = to_y2k_seconds(file_modified(&parent_abs)?);

    let size = parent_footer.current_size;
    let footer = VhdFooter::new(VhdDiskType::Differencing, size, &parent_footer.geometry(), new_uuid())?;
    let mut header = SparseHeader::new(block_count(size, block_size), block_size);
    header.parent_uuid = parent_footer.uuid;
    header.parent_timestamp = parent_timestamp;
    if let Some(name) = parent_abs.file_name() {
        header.set_parent_name(&name.to_string_lossy());
    }

    // The child does not exist yet, so resolve its directory rather than the child itself.
    let child_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.canonicalize(),
        _ => std::env::current_dir(),
    }
    .map_err(|e| MediaError::unwritable(path, e))?;

    let absolute = encode_locator_path(&parent_abs.to_string_lossy());
    let relative = encode_locator_path(&relative_locator_path(&child_dir, &parent_abs));

    let locator_base = locator_offset(&header);
    let w2ku = ParentLocator {
        platform_code: PLATFORM_CODE_W2KU,
        data_space: locator_space(absolute.len()),
        data_len: absolute.len() as u32,
        reserved: 0,
        data_offset: locator_base,
    };
    let w2ru = ParentLocator {
        platform_code: PLATFORM_CODE_W2RU,
        data_space: locator_space(relative.len()),
        data_len: relative.len() as u32,
        reserved: 0,
        data_offset: locator_base + w2ku.data_space as u64,
    };
    let mut locator_data = Vec::new();
    locator_data.extend_from_slice(&absolute);
    locator_data.resize(w2ku.data_space as usize, 0);
    locator_data.extend_from_slice(&relative);
    locator_data.resize((w2ku.data_space + w2ru.data_space) as usize, 0);

    header.parent_locators[0] = w2ku;
    header.parent_locators[1] = w2ru;
    header.update_checksum()?;

    log::debug!(
        "create_differencing(): {} over {} (timestamp {})",
        path.display(),
        parent_abs.display(),
        parent_timestamp
    );

    let mut file = File::create(path).map_err(|e| MediaError::unwritable(path, e))?;
    write_sparse_layout(&mut file, &footer, &header, &locator_data)?;
    Ok(())
}

/// Turn a raw hard disk image into a fixed VHD by appending a footer. Without an explicit
/// geometry the image size must be exactly addressable by the VHD CHS algorithm.
pub fn convert_raw_to_vhd(path: &Path, geometry: Option<DiskGeometry>) -> Result<(), MediaError> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| MediaError::unwritable(path, e))?;
    let size = get_length(&mut file)?;

    if size == 0 || size % DEFAULT_SECTOR_SIZE as u64 != 0 {
        return Err(MediaError::malformed(format!(
            "raw image length {} is not a whole number of sectors",
            size
        )));
    }
    if VhdFooter::read_from(&mut file).is_ok_and(|f| f.is_valid()) {
        return Err(MediaError::UnsupportedOperation(format!(
            "{} already has a VHD footer",
            path.display()
        )));
    }
    check_capacity(ImageFormat::VhdFixed, size)?;

    let geometry = geometry.unwrap_or_else(|| hd_chs_from_sectors(size / DEFAULT_SECTOR_SIZE as u64));
    if geometry.total_bytes() != size {
        log::error!(
            "convert_raw_to_vhd(): Geometry {} does not address exactly {} bytes",
            geometry,
            size
        );
        return Err(MediaError::malformed(format!(
            "image size {} does not match geometry {}",
            size, geometry
        )));
    }

    let footer = VhdFooter::new(VhdDiskType::Fixed, size, &geometry, new_uuid())?;
    file.seek(SeekFrom::End(0))?;
    file.write_all(&footer.to_bytes()?)?;
    file.flush()?;
    Ok(())
}

fn block_count(size: u64, block_size: VhdBlockSize) -> u32 {
    size.div_ceil(block_size.bytes() as u64) as u32
}

fn bat_sectors(header: &SparseHeader) -> u64 {
    (header.max_table_entries as u64 * 4).div_ceil(DEFAULT_SECTOR_SIZE as u64)
}

fn locator_offset(header: &SparseHeader) -> u64 {
    BAT_OFFSET + (bat_sectors(header) + PADDING_SECTORS) * DEFAULT_SECTOR_SIZE as u64
}

/// Write footer copy, sparse header, empty BAT, padding, optional locator data (and its
/// padding), and the trailing footer.
fn write_sparse_layout<W: Write + Seek>(
    out: &mut W,
    footer: &VhdFooter,
    header: &SparseHeader,
    locator_data: &[u8],
) -> Result<(), MediaError> {
    let footer_bytes = footer.to_bytes()?;
    out.seek(SeekFrom::Start(0))?;
    out.write_all(&footer_bytes)?;
    out.write_all(&header.to_bytes()?)?;

    let bat_len = bat_sectors(header) * DEFAULT_SECTOR_SIZE as u64;
    out.write_all(&vec![0xFF; bat_len as usize])?;
    write_zeroes(out, PADDING_SECTORS * DEFAULT_SECTOR_SIZE as u64, None)?;

    if !locator_data.is_empty() {
        out.write_all(locator_data)?;
        write_zeroes(out, PADDING_SECTORS * DEFAULT_SECTOR_SIZE as u64, None)?;
    }

    out.write_all(&footer_bytes)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{file_parsers::vhd::sparse::read_bat, io::Cursor};

    #[test]
    fn sparse_layout() {
        let geometry = hd_chs_from_sectors(20480);
        let footer = VhdFooter::new(VhdDiskType::Dynamic, 20480 * 512, &geometry, new_uuid()).unwrap();
        let mut header = SparseHeader::new(block_count(20480 * 512, VhdBlockSize::Large), VhdBlockSize::Large);
        header.update_checksum().unwrap();

        let mut out = Cursor::new(Vec::new());
        write_sparse_layout(&mut out, &footer, &header, &[]).unwrap();
        let bytes = out.get_ref();

        // footer + header + one BAT sector + padding + footer
        assert_eq!(bytes.len(), 512 + 1024 + 512 + 5 * 512 + 512);
        assert_eq!(&bytes[0..512], &bytes[bytes.len() - 512..]);
        assert_eq!(&bytes[512..520], b"cxsparse");

        let bat = read_bat(&mut out, &header).unwrap();
        assert_eq!(bat, vec![0xFFFF_FFFF; 5]);
    }

    #[test]
    fn block_counts() {
        assert_eq!(block_count(10 * 1024 * 1024, VhdBlockSize::Large), 5);
        assert_eq!(block_count(10 * 1024 * 1024 + 1, VhdBlockSize::Large), 6);
        assert_eq!(block_count(10 * 1024 * 1024, VhdBlockSize::Small), 20);
    }
}
