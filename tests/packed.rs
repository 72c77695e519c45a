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


    tests/packed.rs

    Tests for CopyQM and FDF compressed floppy images.
*/
mod common;

use common::*;
use mediabay::{
    boot_sector::formatted_boot_sector,
    file_parsers::packed::{COPYQM_HEADER_LEN, FDF_HEADER_LEN, FDF_SIGNATURE},
    prelude::*,
};

fn copyqm_header(cylinders: u8, heads: u16, sectors: u16, comment: &str) -> Vec<u8> {
    let mut header = vec![0u8; COPYQM_HEADER_LEN];
    header[0..3].copy_from_slice(b"CQ\x14");
    header[0x03..0x05].copy_from_slice(&512u16.to_le_bytes());
    header[0x10..0x12].copy_from_slice(&sectors.to_le_bytes());
    header[0x12..0x14].copy_from_slice(&heads.to_le_bytes());
    header[0x5B] = cylinders;
    header[0x6F..0x71].copy_from_slice(&(comment.len() as u16).to_le_bytes());
    header[0x74] = 1;
    header.extend_from_slice(comment.as_bytes());
    header
}

/// CopyQM repeat blocks covering `count` bytes of `byte`.
fn copyqm_repeat(byte: u8, mut count: usize) -> Vec<u8> {
    let mut out = Vec::new();
    while count > 0 {
        let run = count.min(i16::MAX as usize);
        out.extend_from_slice(&(-(run as i16)).to_le_bytes());
        out.push(byte);
        count -= run;
    }
    out
}

/// FDF run blocks covering `count` bytes of `byte`.
fn fdf_repeat(byte: u8, mut count: usize) -> Vec<u8> {
    let mut out = Vec::new();
    while count > 0 {
        let mut block = Vec::new();
        while count > 0 && block.len() < 2000 {
            let run = count.min(0x7F);
            block.extend_from_slice(&[0x80 | run as u8, byte]);
            count -= run;
        }
        out.extend_from_slice(&[1, 0, 0]);
        out.extend_from_slice(&(block.len() as u16).to_le_bytes());
        out.extend_from_slice(&block);
    }
    out
}

#[test]
fn copyqm_unpacks_with_comment() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "disk.cqm");

    let first = pattern_sector(0, 512);
    let mut image = copyqm_header(40, 2, 9, "packed by hand");
    image.extend_from_slice(&512i16.to_le_bytes());
    image.extend_from_slice(&first);
    image.extend_from_slice(&copyqm_repeat(0xE5, 512 * 100));
    std::fs::write(&path, image).unwrap();

    let opts = ImageOpenOptions::new().with_drive_type(DriveType::Floppy);
    let DiskImage::Packed(mut packed) = DiskImage::open(&path, &opts).unwrap()
    else {
        panic!("expected a packed image");
    };
    assert_eq!(packed.descriptor().format, ImageFormat::CopyQm);
    assert_eq!(packed.geometry().get(), (40, 2, 9, 512));
    assert_eq!(packed.comment(), Some("packed by hand"));
    assert!(packed.is_write_protected());

    assert_eq!(packed.read_block(0).unwrap(), first);
    assert_eq!(packed.read_block(100).unwrap(), vec![0xE5; 512]);
    // Past the end of the stream the format fill byte reads back.
    assert_eq!(packed.read_block(719).unwrap(), vec![0xF6; 512]);
    assert!(matches!(
        packed.write_block(1, &[0; 512]),
        Err(MediaError::WriteProtected)
    ));
}

#[test]
fn copyqm_bad_sector_size_is_not_detected() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "odd.cqm");
    let mut image = copyqm_header(40, 2, 9, "");
    image[0x03..0x05].copy_from_slice(&500u16.to_le_bytes());
    std::fs::write(&path, image).unwrap();

    assert!(matches!(
        DiskImage::open(&path, &ImageOpenOptions::new()),
        Err(MediaError::UnknownFormat)
    ));
}

#[test]
fn fdf_geometry_comes_from_its_boot_sector() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "disk.fdf");

    let format = StandardFormat::PcFloppy360;
    let boot = formatted_boot_sector(format);
    let mut image = vec![0u8; FDF_HEADER_LEN];
    image[..4].copy_from_slice(FDF_SIGNATURE);
    image.extend_from_slice(&[0, 0, 0]);
    image.extend_from_slice(&(boot.len() as u16).to_le_bytes());
    image.extend_from_slice(&boot);
    image.extend_from_slice(&fdf_repeat(0x00, format.disk_size() - boot.len()));
    image.extend_from_slice(&[0xFF, 0, 0, 0, 0]);
    std::fs::write(&path, image).unwrap();

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    assert_eq!(image.format(), ImageFormat::Fdf);
    assert_eq!(image.geometry().get(), (40, 2, 9, 512));
    assert!(image.is_write_protected());
    assert_eq!(image.read_block(0).unwrap(), boot);
    assert_eq!(image.read_block(719).unwrap(), vec![0; 512]);
}

#[test]
fn packed_images_refuse_other_drives() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "disk.cqm");
    std::fs::write(&path, copyqm_header(40, 2, 9, "")).unwrap();

    let opts = ImageOpenOptions::new().with_drive_type(DriveType::HardDisk);
    assert!(matches!(
        DiskImage::open(&path, &opts),
        Err(MediaError::UnsupportedOperation(_))
    ));
}
