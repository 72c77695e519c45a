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

    tests/imd.rs

    Tests for ImageDisk images.
*/
mod common;

use common::*;
use mediabay::prelude::*;

fn create(dir: &tempfile::TempDir, format: StandardFormat) -> std::path::PathBuf {
    let path = scratch_path(dir, "disk.imd");
    ImageBuilder::new()
        .with_format(ImageFormat::Imd)
        .with_size(SizeSpec::Floppy(format))
        .with_comment("Created by test")
        .build(&path)
        .unwrap();
    path
}

#[test]
fn imd_write_survives_flush_and_reopen() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = create(&dir, StandardFormat::PcFloppy360);

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    assert_eq!(image.format(), ImageFormat::Imd);
    assert_eq!(image.geometry().get(), (40, 2, 9, 512));
    // Freshly formatted sectors hold the format fill byte.
    assert_eq!(image.read_block(100).unwrap(), vec![0xF6; 512]);

    let lbas = [0, 8, 9, 17, 719];
    write_read_blocks(&mut image, &lbas);
    assert!(image.is_dirty());
    image.close().unwrap();

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    assert!(!image.is_dirty());
    verify_blocks(&mut image, &lbas);
    assert_eq!(image.read_block(100).unwrap(), vec![0xF6; 512]);
}

#[test]
fn imd_comment_is_preserved() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = create(&dir, StandardFormat::PcFloppy720);

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    image.write_block(3, &pattern_sector(3, 512)).unwrap();
    image.close().unwrap();

    let image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    let DiskImage::Imd(inner) = &image
    else {
        panic!("expected a ImageDisk image");
    };
    assert_eq!(inner.comment(), Some("Created by test"));
}

#[test]
fn imd_high_density_geometry() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = create(&dir, StandardFormat::PcFloppy1440);

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    assert_eq!(image.geometry().get(), (80, 2, 18, 512));
    let chs = image.geometry().resolve(SectorAddress::Chs(DiskChs::new(79, 1, 18))).unwrap();
    assert_eq!(chs, 2879);
    write_read_blocks(&mut image, &[chs]);
}

#[test]
fn imd_write_protect() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = create(&dir, StandardFormat::PcFloppy360);
    let before = compute_file_hash(&path);

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new().with_write_protect(true)).unwrap();
    assert!(matches!(
        image.write_block(0, &[0u8; 512]),
        Err(MediaError::WriteProtected)
    ));
    image.close().unwrap();
    assert_eq!(compute_file_hash(&path), before);
}

#[test]
fn imd_rejects_floppy_drive_mismatch() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = create(&dir, StandardFormat::PcFloppy360);
    let opts = ImageOpenOptions::new().with_drive_type(DriveType::HardDisk);
    assert!(matches!(
        DiskImage::open(&path, &opts),
        Err(MediaError::UnsupportedOperation(_))
    ));
}

/// Build an IMD image of 250 kbps MFM tracks, each holding 512-byte sectors numbered with the
/// given IDs in the given physical order. Every sector is filled with its own ID.
fn imd_with_sector_ids(cylinders: u8, ids: &[u8]) -> Vec<u8> {
    let mut bytes = b"IMD 1.18: 01/01/2024 00:00:00\r\nhand built\x1A".to_vec();
    for c in 0..cylinders {
        bytes.extend_from_slice(&[5, c, 0, ids.len() as u8, 2]);
        bytes.extend_from_slice(ids);
        for &id in ids {
            // Alternate full and compressed records.
            if id % 2 == 0 {
                bytes.push(0x01);
                bytes.extend_from_slice(&[id; 512]);
            }
            else {
                bytes.extend_from_slice(&[0x02, id]);
            }
        }
    }
    bytes
}

#[test]
fn imd_zero_based_sector_ids_are_reachable() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "zero.imd");
    std::fs::write(&path, imd_with_sector_ids(2, &[0, 1, 2, 3, 4, 5, 6, 7, 8])).unwrap();

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    assert_eq!(image.geometry().get(), (2, 1, 9, 512));
    for lba in 0..18u64 {
        assert_eq!(image.read_block(lba).unwrap(), vec![(lba % 9) as u8; 512], "lba {}", lba);
    }

    // Writes land on the sector the block maps to, and survive a round trip.
    image.write_block(9, &pattern_sector(9, 512)).unwrap();
    image.close().unwrap();
    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    assert_eq!(image.read_block(9).unwrap(), pattern_sector(9, 512));
    assert_eq!(image.read_block(10).unwrap(), vec![1; 512]);
}

#[test]
fn imd_interleaved_sector_ids_read_in_id_order() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "interleave.imd");
    std::fs::write(&path, imd_with_sector_ids(1, &[1, 6, 2, 7, 3, 8, 4, 9, 5])).unwrap();

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    assert_eq!(image.geometry().get(), (1, 1, 9, 512));
    for lba in 0..9u64 {
        assert_eq!(image.read_block(lba).unwrap(), vec![lba as u8 + 1; 512], "lba {}", lba);
    }
}
