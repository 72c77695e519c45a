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

    src/boot_sector/mod.rs

    Routines for reading and creating DOS boot sectors.
*/

pub mod bpb;

use crate::{boot_sector::bpb::BiosParameterBlock, StandardFormat};

/// A short jump over the BPB followed by a NOP, as written by DOS FORMAT.
const BOOT_JUMP: [u8; 3] = [0xEB, 0x3C, 0x90];
const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const CREATOR_TAG: &[u8; 8] = b"MEDIABAY";

/// Build a boot sector for a freshly formatted disk of the given format. The sector holds a
/// jump, an OEM creator tag, a BPB describing the format, and the 0x55AA signature.
pub fn formatted_boot_sector(format: StandardFormat) -> Vec<u8> {
    let mut sector = vec![0u8; format.sector_size()];
    sector[0..3].copy_from_slice(&BOOT_JUMP);
    sector[3..11].copy_from_slice(CREATOR_TAG);

    if let Err(e) = BiosParameterBlock::from(format).write_to_boot_sector(&mut sector) {
        log::error!("formatted_boot_sector(): Couldn't write BPB: {}", e);
    }

    sector[510..512].copy_from_slice(&BOOT_SIGNATURE);
    sector
}

/// Return true if the sector ends in a valid boot signature.
pub fn has_boot_signature(sector: &[u8]) -> bool {
    sector.len() >= 512 && sector[510..512] == BOOT_SIGNATURE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatted_sector_has_signature_and_bpb() {
        let sector = formatted_boot_sector(StandardFormat::PcFloppy720);
        assert!(has_boot_signature(&sector));
        let bpb = BiosParameterBlock::from_boot_sector(&sector).unwrap();
        assert_eq!(bpb.geometry(), Some((80, 2, 9, 512)));
    }
}
