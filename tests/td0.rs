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

    tests/td0.rs

    Tests for Teledisk images.
*/
mod common;

use common::*;
use mediabay::prelude::*;

fn create(dir: &tempfile::TempDir, format: StandardFormat) -> std::path::PathBuf {
    let path = scratch_path(dir, "disk.td0");
    ImageBuilder::new()
        .with_format(ImageFormat::Td0)
        .with_size(SizeSpec::Floppy(format))
        .with_comment("Created by test")
        .build(&path)
        .unwrap();
    path
}

#[test]
fn td0_write_survives_flush_and_reopen() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = create(&dir, StandardFormat::PcFloppy360);

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    assert_eq!(image.format(), ImageFormat::Td0);
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
fn td0_comment_is_preserved() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = create(&dir, StandardFormat::PcFloppy720);

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    image.write_block(3, &pattern_sector(3, 512)).unwrap();
    image.close().unwrap();

    let image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    let DiskImage::Td0(inner) = &image
    else {
        panic!("expected a Teledisk image");
    };
    assert_eq!(inner.comment(), Some("Created by test"));
}

#[test]
fn td0_high_density_geometry() {
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
fn td0_write_protect() {
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
fn td0_rejects_floppy_drive_mismatch() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = create(&dir, StandardFormat::PcFloppy360);
    let opts = ImageOpenOptions::new().with_drive_type(DriveType::HardDisk);
    assert!(matches!(
        DiskImage::open(&path, &opts),
        Err(MediaError::UnsupportedOperation(_))
    ));
}
