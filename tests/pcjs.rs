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


    tests/pcjs.rs

    Tests for PCjs JSON floppy images.
*/
mod common;

use common::*;
use mediabay::prelude::*;
use serde_json::{json, Value};

/// A single-sided, single-track document with `sectors` 512-byte sectors. Each sector's first
/// word holds its sector ID.
fn pcjs_document(sectors: u8) -> String {
    let track: Vec<Value> = (1..=sectors)
        .map(|s| json!({ "c": 0, "h": 0, "s": s, "l": 512, "d": [s as u32 * 0x0101_0101, 0] }))
        .collect();
    json!({
        "imageInfo": {
            "type": "CHS",
            "cylinders": 1,
            "heads": 1,
            "trackDefault": sectors,
            "sectorDefault": 512,
            "diskSize": sectors as u32 * 512,
            "checksum": 0
        },
        "diskData": [[track]]
    })
    .to_string()
}

#[test]
fn pcjs_sectors_read_back() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "disk.json");
    std::fs::write(&path, pcjs_document(8)).unwrap();

    let mut image = DiskImage::open(&path, &ImageOpenOptions::new()).unwrap();
    assert_eq!(image.format(), ImageFormat::Pcjs);
    assert_eq!(image.geometry().get(), (1, 1, 8, 512));
    assert!(image.is_write_protected());

    for lba in 0..8u64 {
        let sector = image.read_block(lba).unwrap();
        assert_eq!(&sector[..4], &[lba as u8 + 1; 4], "lba {}", lba);
        assert!(sector[4..].iter().all(|&b| b == 0));
    }
    assert!(matches!(
        image.write_block(0, &[0; 512]),
        Err(MediaError::WriteProtected)
    ));
}

#[test]
fn pcjs_without_disk_data_is_malformed() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir, "info.json");
    let text = json!({
        "imageInfo": { "cylinders": 1, "heads": 1, "trackDefault": 8, "sectorDefault": 512 }
    })
    .to_string();
    std::fs::write(&path, text).unwrap();

    assert!(matches!(
        DiskImage::open(&path, &ImageOpenOptions::new()),
        Err(MediaError::MalformedHeader(_))
    ));
}
