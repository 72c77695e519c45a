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

    tests/f86.rs

    Tests for 86F surface images.
*/
mod common;

use common::*;
use mediabay::{prelude::*, DiskDataEncoding, DiskDataRate};

fn create(dir: &tempfile::TempDir, format: StandardFormat) -> std::path::PathBuf {
    let path = scratch_path(dir, "disk.86f");
    ImageBuilder::new()
        .with_format(ImageFormat::F86)
        .with_size(SizeSpec::Floppy(format))
        .build(&path)
        .unwrap();
    path
}

#[test]
fn f86_sector_writes_survive_flush_and_reopen() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = create(&dir, StandardFormat::PcFloppy360);

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    assert_eq!(image.format(), ImageFormat::F86);
    assert_eq!(image.geometry().get(), (40, 2, 9, 512));
    assert_eq!(image.read_block(42).unwrap(), vec![0xF6; 512]);

    let lbas = [0, 1, 8, 9, 400, 719];
    write_read_blocks(&mut image, &lbas);
    image.close().unwrap();

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    verify_blocks(&mut image, &lbas);
    // Untouched neighbours are intact.
    assert_eq!(image.read_block(2).unwrap(), vec![0xF6; 512]);
}

#[test]
fn f86_tracks_are_served_as_bitstreams() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = create(&dir, StandardFormat::PcFloppy1200);

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    let track = image.read_track(DiskCh::new(5, 1)).unwrap();
    assert_eq!(track.ch, DiskCh::new(5, 1));
    assert_eq!(track.encoding, DiskDataEncoding::Mfm);
    assert_eq!(track.data_rate, DiskDataRate::Rate500Kbps);
    // 500Kbps at 360 RPM
    assert_eq!(track.bits.len(), StandardFormat::PcFloppy1200.bitcell_ct());

    assert!(matches!(
        image.read_track(DiskCh::new(80, 0)),
        Err(MediaError::SectorNotFound(_))
    ));
}

#[test]
fn f86_track_writes_replace_sectors() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = create(&dir, StandardFormat::PcFloppy720);

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    image.write_block(0, &pattern_sector(0, 512)).unwrap();
    let track0 = image.read_track(DiskCh::new(0, 0)).unwrap();
    // Copy track 0 over track 3: its sectors now carry cylinder 0 IDs, but logical sectors
    // follow sector ID order only, so they read back with track 0's data.
    let mut copy = track0.clone();
    copy.ch = DiskCh::new(3, 0);
    image.write_track(copy).unwrap();
    let geometry = image.geometry();
    let lba = geometry.chs_to_lba(DiskChs::new(3, 0, 1)).unwrap();
    assert_eq!(image.read_block(lba).unwrap(), pattern_sector(0, 512));
    image.close().unwrap();

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    assert_eq!(image.read_block(lba).unwrap(), pattern_sector(0, 512));
}

#[test]
fn f86_extended_density_is_unsupported() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "ed.86f");
    let result = ImageBuilder::new()
        .with_format(ImageFormat::F86)
        .with_size(SizeSpec::Floppy(StandardFormat::PcFloppy2880))
        .build(&path);
    assert!(matches!(result, Err(MediaError::UnsupportedFormat)));
    assert!(!path.exists());
}
