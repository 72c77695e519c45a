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

    tests/common/mod.rs

    Common support routines for tests
*/
#![allow(dead_code)]

use mediabay::prelude::*;

use hex::encode;
use sha1::{Digest, Sha1};
use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn compute_file_hash<P: AsRef<Path>>(path: P) -> String {
    let file_buf = std::fs::read(path).unwrap();
    compute_slice_hash(&file_buf)
}

pub fn compute_slice_hash(slice: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(slice);
    let result = hasher.finalize();

    encode(result)
}

/// A recognizable sector payload for a given LBA.
pub fn pattern_sector(lba: u64, size: usize) -> Vec<u8> {
    (0..size).map(|i| (lba as usize * 7 + i) as u8).collect()
}

/// Write a pattern to each of the given LBAs, then read them back.
pub fn write_read_blocks(image: &mut DiskImage, lbas: &[u64]) {
    let size = image.geometry().sector_size;
    for &lba in lbas {
        image.write_block(lba, &pattern_sector(lba, size)).unwrap();
    }
    for &lba in lbas {
        assert_eq!(image.read_block(lba).unwrap(), pattern_sector(lba, size), "lba {}", lba);
    }
}

/// Check the given LBAs hold their patterns.
pub fn verify_blocks(image: &mut DiskImage, lbas: &[u64]) {
    let size = image.geometry().sector_size;
    for &lba in lbas {
        assert_eq!(image.read_block(lba).unwrap(), pattern_sector(lba, size), "lba {}", lba);
    }
}

pub fn scratch_path(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

/// Move a file's modification time back by `secs` seconds.
pub fn age_file(path: &Path, secs: u64) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    let modified = file.metadata().unwrap().modified().unwrap_or(SystemTime::now());
    file.set_modified(modified - Duration::from_secs(secs)).unwrap();
}
