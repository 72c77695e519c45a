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

    tests/hdi.rs

    Tests for HDI and HDX fixed-geometry hard disk images.
*/
mod common;

use common::*;
use mediabay::{geometry::HDI_MAX_BYTES, prelude::*, ErrorClass};

#[test]
fn hdi_over_4g_fails_without_a_file() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "big.hdi");

    let result = ImageBuilder::new()
        .with_format(ImageFormat::Hdi)
        .with_size(SizeSpec::Bytes((HDI_MAX_BYTES / 512 + 1024) * 512))
        .build(&path);
    let err = result.err().unwrap();
    assert!(matches!(err, MediaError::SizeExceeded { .. }));
    assert_eq!(err.class(), ErrorClass::Capacity);
    assert!(!path.exists());
}

#[test]
fn hdi_over_4g_unaligned_is_still_a_capacity_error() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "odd.hdi");

    let result = ImageBuilder::new()
        .with_format(ImageFormat::Hdi)
        .with_size(SizeSpec::Bytes(5_000_000_001))
        .build(&path);
    let err = result.err().unwrap();
    assert!(matches!(err, MediaError::SizeExceeded { requested: 5_000_000_001, .. }));
    assert_eq!(err.class(), ErrorClass::Capacity);
    assert!(!path.exists());
}

#[test]
fn hdi_round_trip() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "disk.hdi");

    let mut image = ImageBuilder::new()
        .with_format(ImageFormat::Hdi)
        .with_size(SizeSpec::Chs {
            cylinders: 40,
            heads:     4,
            sectors:   17,
        })
        .build(&path)
        .unwrap();
    assert_eq!(image.format(), ImageFormat::Hdi);
    assert_eq!(image.geometry().get(), (40, 4, 17, 512));
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0x1000 + 40 * 4 * 17 * 512);

    let lbas = [0, 16, 17, 2719];
    write_read_blocks(&mut image, &lbas);
    image.close().unwrap();

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    verify_blocks(&mut image, &lbas);
    let chs = image.geometry().resolve(SectorAddress::Chs(DiskChs::new(0, 1, 1))).unwrap();
    assert_eq!(chs, 17);
}

#[test]
fn hdi_rejects_foreign_sector_size() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "odd.hdi");

    let mut header = Vec::new();
    for field in [0u32, 0, 0x1000, 40 * 4 * 17 * 256, 256, 17, 4, 40] {
        header.extend_from_slice(&field.to_le_bytes());
    }
    header.resize(0x1000 + 40 * 4 * 17 * 256, 0);
    std::fs::write(&path, header).unwrap();

    assert!(matches!(
        DiskImage::open(&path, &ImageOpenOptions::new()),
        Err(MediaError::UnsupportedSectorSize(256))
    ));
}

#[test]
fn hdx_round_trip() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "disk.hdx");

    let mut image = ImageBuilder::new()
        .with_format(ImageFormat::Hdx)
        .with_size(SizeSpec::Chs {
            cylinders: 30,
            heads:     2,
            sectors:   17,
        })
        .build(&path)
        .unwrap();
    assert_eq!(image.format(), ImageFormat::Hdx);
    write_read_blocks(&mut image, &[0, 1019]);
    image.close().unwrap();

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    assert_eq!(image.geometry().get(), (30, 2, 17, 512));
    verify_blocks(&mut image, &[0, 1019]);
}
