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

    src/bitstream/mfm.rs

    MFM encoding and decoding of IBM System/34 formatted tracks held in a
    BitVec. Provides track formatting for newly created surface images, a
    sector scanner, and in-place sector rewrites with correct clock bits and
    CRC.
*/
use bit_vec::BitVec;

use crate::{util::crc_ibm_3740, DiskChsn, MediaError};

pub const MFM_BYTE_LEN: usize = 16;
/// The number of bitcells occupied by three A1 sync bytes.
pub const MFM_SYNC_LEN: usize = 48;

pub const GAP_BYTE: u8 = 0x4E;
pub const SYNC_BYTE: u8 = 0x00;
pub const FORMAT_FILL_BYTE: u8 = 0xF6;
pub const SYNC_LEN: usize = 12;
pub const IBM_GAP4A: usize = 80;
pub const IBM_GAP1: usize = 50;
pub const IBM_GAP2: usize = 22;

pub const IAM_MARKER_BYTES: [u8; 4] = [0xC2, 0xC2, 0xC2, 0xFC];
pub const IDAM_MARKER_BYTES: [u8; 4] = [0xA1, 0xA1, 0xA1, 0xFE];
pub const DAM_MARKER_BYTES: [u8; 4] = [0xA1, 0xA1, 0xA1, 0xFB];
pub const DDAM_MARKER_BYTES: [u8; 4] = [0xA1, 0xA1, 0xA1, 0xF8];

/// Three A1 bytes encoded with their missing clock bit (0x4489 each).
pub const A1_SYNC_MARKER: u64 = 0x4489_4489_4489;
const A1_SYNC_MASK: u64 = 0xFFFF_FFFF_FFFF;

// Index of the suppressed clock bit within the 16 bitcells of an A1 or C2 mark byte.
const A1_MISSING_CLOCK: usize = 10;
const C2_MISSING_CLOCK: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrackMarker {
    Iam,
    Idam,
    Dam,
    Ddam,
}

/// A track laid out as decoded bytes, with the byte offsets of each address mark.
pub struct FormattedTrack {
    pub bytes:   Vec<u8>,
    pub markers: Vec<(TrackMarker, usize)>,
}

/// The location of a sector's data field within a track bitstream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DataField {
    /// Bit index of the first A1 sync byte of the data address mark.
    pub offset:  usize,
    pub deleted: bool,
}

/// A sector ID found on a track, and its data field if one followed it.
#[derive(Copy, Clone, Debug)]
pub struct SectorHeader {
    pub chsn:         DiskChsn,
    pub id_crc_valid: bool,
    pub data:         Option<DataField>,
}

/// MFM-encode `data`. `prev_bit` is the last data bit preceding the buffer on the track, which
/// determines the first clock bit.
pub fn encode(data: &[u8], prev_bit: bool) -> BitVec {
    let mut bits = BitVec::with_capacity(data.len() * MFM_BYTE_LEN);
    let mut previous = prev_bit;

    for &byte in data {
        for i in 0..8 {
            let bit = byte & (0x80 >> i) != 0;
            // A clock bit is only written between two zero data bits.
            bits.push(!bit && !previous);
            bits.push(bit);
            previous = bit;
        }
    }
    bits
}

/// Decode the byte whose 16 bitcells start at `index`. Returns None past the end of the track.
pub fn decode_byte(bits: &BitVec, index: usize) -> Option<u8> {
    if index + MFM_BYTE_LEN > bits.len() {
        return None;
    }
    let mut byte = 0u8;
    for k in 0..8 {
        byte = (byte << 1) | bits[index + k * 2 + 1] as u8;
    }
    Some(byte)
}

/// Decode `buf.len()` bytes starting at bit `index`. Returns the number of bytes decoded.
pub fn decode_buf(bits: &BitVec, index: usize, buf: &mut [u8]) -> usize {
    for (i, byte) in buf.iter_mut().enumerate() {
        match decode_byte(bits, index + i * MFM_BYTE_LEN) {
            Some(b) => *byte = b,
            None => return i,
        }
    }
    buf.len()
}

/// Find the next run of three A1 sync marks at or after bit `start`. Returns the bit index of the
/// first A1.
pub fn find_sync(bits: &BitVec, start: usize) -> Option<usize> {
    let mut shift_reg: u64 = 0;
    for bi in start..bits.len() {
        shift_reg = (shift_reg << 1) | bits[bi] as u64;
        if bi + 1 - start >= MFM_SYNC_LEN && (shift_reg & A1_SYNC_MASK) == A1_SYNC_MARKER {
            return Some(bi + 1 - MFM_SYNC_LEN);
        }
    }
    None
}

/// Lay out a standard IBM track: gap 4a, sync, IAM and gap 1, then an ID field and data field per
/// sector, and gap 4b to the end of the track. Sector data is filled with `fill`.
pub fn format_track_as_bytes(
    bitcell_ct: usize,
    sectors: &[DiskChsn],
    fill: u8,
    gap3: usize,
) -> Result<FormattedTrack, MediaError> {
    let track_byte_ct = bitcell_ct.div_ceil(MFM_BYTE_LEN);
    let mut bytes: Vec<u8> = Vec::with_capacity(track_byte_ct);
    let mut markers = Vec::new();

    bytes.extend_from_slice(&[GAP_BYTE; IBM_GAP4A]);
    bytes.extend_from_slice(&[SYNC_BYTE; SYNC_LEN]);
    markers.push((TrackMarker::Iam, bytes.len()));
    bytes.extend_from_slice(&IAM_MARKER_BYTES);
    bytes.extend_from_slice(&[GAP_BYTE; IBM_GAP1]);

    for sector in sectors {
        bytes.extend_from_slice(&[SYNC_BYTE; SYNC_LEN]);
        markers.push((TrackMarker::Idam, bytes.len()));
        let idam_crc_offset = bytes.len();
        bytes.extend_from_slice(&IDAM_MARKER_BYTES);
        bytes.extend_from_slice(&[sector.c() as u8, sector.h(), sector.s(), sector.n()]);
        let crc = crc_ibm_3740(&bytes[idam_crc_offset..], None);
        bytes.extend_from_slice(&crc.to_be_bytes());

        bytes.extend_from_slice(&[GAP_BYTE; IBM_GAP2]);
        bytes.extend_from_slice(&[SYNC_BYTE; SYNC_LEN]);

        markers.push((TrackMarker::Dam, bytes.len()));
        let dam_crc_offset = bytes.len();
        bytes.extend_from_slice(&DAM_MARKER_BYTES);
        bytes.extend(std::iter::repeat(fill).take(sector.n_size()));
        let crc = crc_ibm_3740(&bytes[dam_crc_offset..], None);
        bytes.extend_from_slice(&crc.to_be_bytes());

        bytes.extend(std::iter::repeat(GAP_BYTE).take(gap3));
    }

    if bytes.len() > track_byte_ct {
        log::error!(
            "format_track_as_bytes(): Formatted track of {} bytes does not fit in {} bitcells",
            bytes.len(),
            bitcell_ct
        );
        return Err(MediaError::ParameterError);
    }
    bytes.resize(track_byte_ct, GAP_BYTE);

    Ok(FormattedTrack { bytes, markers })
}

/// MFM-encode a formatted track, suppressing the clock bits of its address marks, and trim it to
/// `bitcell_ct` bitcells.
pub fn encode_track(track: &FormattedTrack, bitcell_ct: usize) -> BitVec {
    let mut bits = encode(&track.bytes, false);

    for (marker, offset) in &track.markers {
        let missing_clock = match marker {
            TrackMarker::Iam => C2_MISSING_CLOCK,
            _ => A1_MISSING_CLOCK,
        };
        for k in 0..3 {
            bits.set((offset + k) * MFM_BYTE_LEN + missing_clock, false);
        }
    }

    bits.truncate(bitcell_ct);
    bits
}

/// Scan a track for sector IDs and their data fields.
pub fn scan_sectors(bits: &BitVec) -> Vec<SectorHeader> {
    let mut sectors = Vec::new();
    let mut pending: Option<SectorHeader> = None;
    let mut cursor = 0;

    while let Some(pos) = find_sync(bits, cursor) {
        let mark_idx = pos + MFM_SYNC_LEN;
        match decode_byte(bits, mark_idx) {
            Some(0xFE) => {
                if let Some(header) = pending.take() {
                    sectors.push(header);
                }
                let mut id = [0u8; 6];
                if decode_buf(bits, mark_idx + MFM_BYTE_LEN, &mut id) < id.len() {
                    break;
                }
                let mut crc_bytes = IDAM_MARKER_BYTES.to_vec();
                crc_bytes.extend_from_slice(&id[0..4]);
                let crc = crc_ibm_3740(&crc_bytes, None);
                let recorded = u16::from_be_bytes([id[4], id[5]]);

                pending = Some(SectorHeader {
                    chsn: DiskChsn::new(id[0] as u16, id[1], id[2], id[3]),
                    id_crc_valid: crc == recorded,
                    data: None,
                });
                cursor = mark_idx + MFM_BYTE_LEN * 7;
            }
            Some(mark @ (0xFB | 0xF8)) => {
                let mut skip = MFM_BYTE_LEN;
                if let Some(mut header) = pending.take() {
                    header.data = Some(DataField {
                        offset:  pos,
                        deleted: mark == 0xF8,
                    });
                    skip += (header.chsn.n_size() + 2) * MFM_BYTE_LEN;
                    sectors.push(header);
                }
                cursor = mark_idx + skip;
            }
            _ => cursor = pos + MFM_BYTE_LEN,
        }
    }

    if let Some(header) = pending.take() {
        sectors.push(header);
    }
    sectors
}

/// Read `size` bytes of data from a data field. Returns the data and whether its CRC was valid.
pub fn read_data(bits: &BitVec, field: &DataField, size: usize) -> Result<(Vec<u8>, bool), MediaError> {
    let data_idx = field.offset + MFM_SYNC_LEN + MFM_BYTE_LEN;
    let mut buf = vec![0u8; size + 2];
    if decode_buf(bits, data_idx, &mut buf) < buf.len() {
        return Err(MediaError::SectorNotFound(format!(
            "data field at bit {} runs past the end of the track",
            field.offset
        )));
    }

    let recorded = u16::from_be_bytes([buf[size], buf[size + 1]]);
    buf.truncate(size);
    let crc = crc_ibm_3740(&buf, Some(crc_ibm_3740(&mark_bytes(field), None)));

    Ok((buf, crc == recorded))
}

/// Re-encode the data of a data field in place, with a fresh CRC. The clock bit of the byte
/// following the field is corrected so the bitstream stays valid MFM.
pub fn write_data(bits: &mut BitVec, field: &DataField, data: &[u8]) -> Result<(), MediaError> {
    let start = field.offset + MFM_SYNC_LEN + MFM_BYTE_LEN;
    let crc = crc_ibm_3740(data, Some(crc_ibm_3740(&mark_bytes(field), None)));

    let mut buf = Vec::with_capacity(data.len() + 2);
    buf.extend_from_slice(data);
    buf.extend_from_slice(&crc.to_be_bytes());

    let encoded = encode(&buf, bits[start - 1]);
    if start + encoded.len() > bits.len() {
        return Err(MediaError::SectorNotFound(format!(
            "data field at bit {} runs past the end of the track",
            field.offset
        )));
    }

    for (i, bit) in encoded.iter().enumerate() {
        bits.set(start + i, bit);
    }

    let next = start + encoded.len();
    if next + 1 < bits.len() {
        let clock = !bits[next - 1] && !bits[next + 1];
        bits.set(next, clock);
    }
    Ok(())
}

fn mark_bytes(field: &DataField) -> [u8; 4] {
    if field.deleted {
        DDAM_MARKER_BYTES
    }
    else {
        DAM_MARKER_BYTES
    }
}
