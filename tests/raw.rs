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

    tests/raw.rs

    Tests for headerless sector images and their containers.
*/
mod common;

use common::*;
use mediabay::{boot_sector::formatted_boot_sector, file_parsers::raw::CONTAINER_HEADER_LEN, prelude::*, RemovableFormat};

#[test]
fn headerless_144m_resolves_to_standard_geometry() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "disk.img");
    std::fs::write(&path, vec![0u8; 1_474_560]).unwrap();

    let image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    assert_eq!(image.format(), ImageFormat::Raw);
    assert_eq!(image.geometry().get(), (80, 2, 18, 512));
    assert_eq!(image.descriptor().standard_format, Some(StandardFormat::PcFloppy1440));
}

#[test]
fn dmf_variants_resolve_by_bpb() {
    init();
    let dir = tempfile::tempdir().unwrap();

    for format in [StandardFormat::Dmf1024, StandardFormat::Dmf2048] {
        let path = scratch_path(&dir, "dmf.img");
        let mut data = vec![0u8; format.disk_size()];
        let boot = formatted_boot_sector(format);
        data[..boot.len()].copy_from_slice(&boot);
        std::fs::write(&path, data).unwrap();

        let opts = ImageOpenOptions::new()
            .with_drive_type(DriveType::Floppy)
            .with_check_bpb(true);
        let image = DiskImage::open(&path, &opts).unwrap();
        assert_eq!(image.geometry().get(), (80, 2, 21, 512));
        assert_eq!(image.descriptor().standard_format, Some(format));
    }
}

#[test]
fn bpb_ignored_unless_requested() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "odd.img");

    // A 360K BPB on a 720K image: the BPB geometry fits inside the image, so it wins only when
    // BPB checking is on.
    let mut data = vec![0u8; StandardFormat::PcFloppy720.disk_size()];
    let boot = formatted_boot_sector(StandardFormat::PcFloppy360);
    data[..boot.len()].copy_from_slice(&boot);
    std::fs::write(&path, data).unwrap();

    let floppy = ImageOpenOptions::new().with_drive_type(DriveType::Floppy);
    let image = DiskImage::open(&path, &floppy).unwrap();
    assert_eq!(image.geometry().get(), (80, 2, 9, 512));

    let image = DiskImage::open(&path, &floppy.with_check_bpb(true)).unwrap();
    assert_eq!(image.geometry().get(), (40, 2, 9, 512));
}

#[test]
fn raw_write_read_survives_reopen() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "rw.img");
    let mut image = ImageBuilder::new()
        .with_format(ImageFormat::Raw)
        .with_size(SizeSpec::Floppy(StandardFormat::PcFloppy1200))
        .build(&path)
        .unwrap();

    let lbas = [0, 14, 15, 1000, 2399];
    write_read_blocks(&mut image, &lbas);
    image.close().unwrap();

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    verify_blocks(&mut image, &lbas);
    assert!(matches!(image.read_block(2400), Err(MediaError::SectorNotFound(_))));
}

#[test]
fn write_protected_open_mutates_nothing() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "wp.img");
    std::fs::write(&path, vec![0u8; 368_640]).unwrap();
    let before = compute_file_hash(&path);

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new().with_write_protect(true)).unwrap();
    assert!(image.is_write_protected());
    assert!(matches!(
        image.write_block(3, &[0xE5; 512]),
        Err(MediaError::WriteProtected)
    ));
    image.close().unwrap();
    assert_eq!(compute_file_hash(&path), before);
}

#[test]
fn zip_container_has_header() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "disk.zdi");
    let mut image = ImageBuilder::new()
        .with_format(ImageFormat::Raw)
        .with_size(SizeSpec::Removable(RemovableFormat::Zip100))
        .build(&path)
        .unwrap();

    assert_eq!(image.geometry().get(), (96, 64, 32, 512));
    assert_eq!(image.descriptor().removable_format, Some(RemovableFormat::Zip100));
    image.write_block(0, &[0x42; 512]).unwrap();
    image.close().unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len() as u64, CONTAINER_HEADER_LEN + RemovableFormat::Zip100.size());
    assert_eq!(bytes[CONTAINER_HEADER_LEN as usize], 0x42);
    assert_eq!(bytes[CONTAINER_HEADER_LEN as usize - 1], 0);
}

#[test]
fn iso_is_always_write_protected() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "cd.iso");
    std::fs::write(&path, vec![0u8; 2048 * 32]).unwrap();

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new().with_drive_type(DriveType::CdRom)).unwrap();
    assert_eq!(image.geometry().sector_size, 2048);
    assert_eq!(image.geometry().total_sectors(), 32);
    assert!(image.is_write_protected());
    assert!(matches!(
        image.write_block(0, &[0u8; 2048]),
        Err(MediaError::WriteProtected)
    ));
}

#[test]
fn raw_hard_disk_capacity() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "huge.img");
    let result = ImageBuilder::new()
        .with_format(ImageFormat::Raw)
        .with_size(SizeSpec::Bytes(128 * 1024 * 1024 * 1024))
        .build(&path);
    assert!(matches!(result, Err(MediaError::SizeExceeded { .. })));
    assert_eq!(result.err().map(|e| e.class()), Some(mediabay::ErrorClass::Capacity));
    assert!(!path.exists());
}

/// A PC-98 2HD floppy: 77 cylinders, 2 heads, 8 sectors of 1024 bytes.
fn fdi_image(base: u32) -> Vec<u8> {
    let data_size: u32 = 77 * 2 * 8 * 1024;
    let mut bytes = Vec::new();
    for field in [0u32, 0x90, base, data_size, 1024, 8, 2, 77] {
        bytes.extend_from_slice(&field.to_le_bytes());
    }
    bytes.resize(base as usize, 0);
    for lba in 0..(77 * 2 * 8) {
        bytes.extend_from_slice(&pattern_sector(lba, 1024));
    }
    bytes
}

#[test]
fn fdi_geometry_comes_from_its_header() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "pc98.fdi");
    std::fs::write(&path, fdi_image(0x1000)).unwrap();

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    assert_eq!(image.format(), ImageFormat::Raw);
    assert_eq!(image.geometry().get(), (77, 2, 8, 1024));
    assert!(!image.is_write_protected());
    verify_blocks(&mut image, &[0, 15, 1231]);

    image.write_block(3, &pattern_sector(900, 1024)).unwrap();
    image.close().unwrap();
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[0x1000 + 3 * 1024..0x1000 + 4 * 1024], &pattern_sector(900, 1024)[..]);
}

#[test]
fn fdi_honors_its_recorded_data_offset() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "offset.fdi");
    std::fs::write(&path, fdi_image(0x200)).unwrap();

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    verify_blocks(&mut image, &[0, 1, 1000]);
}

#[test]
fn fdi_with_short_data_is_malformed() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "short.fdi");
    let mut bytes = fdi_image(0x1000);
    bytes.truncate(0x1000 + 1024 * 100);
    std::fs::write(&path, bytes).unwrap();

    let err = DiskImage::open(&path, &ImageOpenOptions::new()).err().unwrap();
    assert!(matches!(err, MediaError::MalformedHeader(_)));
}

#[test]
fn ddi_skips_its_header_and_is_read_only() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "disk.ddi");
    let mut bytes = vec![0xAAu8; 0x2400];
    for lba in 0..1440 {
        bytes.extend_from_slice(&pattern_sector(lba, 512));
    }
    std::fs::write(&path, bytes).unwrap();

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    assert_eq!(image.geometry().get(), (80, 2, 9, 512));
    assert!(image.is_write_protected());
    verify_blocks(&mut image, &[0, 9, 1439]);
    assert!(matches!(
        image.write_block(0, &[0u8; 512]),
        Err(MediaError::WriteProtected)
    ));
}

#[test]
fn xdf_images_resolve_to_their_logical_layout() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "xdf.img");
    std::fs::write(&path, vec![0u8; 80 * 2 * 23 * 512]).unwrap();

    let opts = ImageOpenOptions::new().with_drive_type(DriveType::Floppy);
    let mut image = DiskImage::open(&path, &opts).unwrap();
    assert_eq!(image.geometry().get(), (80, 2, 23, 512));
    assert_eq!(image.descriptor().standard_format, None);
    write_read_blocks(&mut image, &[0, 22, 23, 3679]);
}
