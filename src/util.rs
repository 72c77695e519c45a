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

    src/util.rs

    Miscellaneous helpers for stream handling, checksums and host file
    metadata.
*/
use std::{
    fs::File,
    path::Path,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::{
    io::{Read, Seek, SeekFrom, Write},
    MediaError,
    ASCII_EOF,
};

pub(crate) fn get_length<T: Seek>(source: &mut T) -> Result<u64, crate::io::Error> {
    // Seek to the end of the source
    let length = source.seek(SeekFrom::End(0))?;
    // Seek back to the beginning of the source
    source.seek(SeekFrom::Start(0))?;
    Ok(length)
}

/// Read ASCII characters from `source` until `terminator`, a non-ASCII byte, end of stream or
/// `max_len` characters. Returns the string read (if any) and the byte that stopped the read.
pub(crate) fn read_ascii<T: Read>(source: &mut T, terminator: Option<u8>, max_len: Option<usize>) -> (Option<String>, u8) {
    let mut string = String::new();
    let terminator = terminator.unwrap_or(ASCII_EOF);
    let mut terminating_byte = 0;

    for (i, byte) in source.bytes().enumerate() {
        match byte {
            Ok(b) => {
                if b == terminator || !b.is_ascii() {
                    terminating_byte = b;
                    break;
                }
                else {
                    string.push(b as char);
                }
            }
            Err(_) => return (None, 0),
        }

        if i + 1 == max_len.unwrap_or(usize::MAX) {
            break;
        }
    }

    if string.is_empty() {
        (None, terminating_byte)
    }
    else {
        (Some(string), terminating_byte)
    }
}

/// CRC-16/IBM-3740 (CCITT polynomial 0x1021, initial value 0xFFFF), as used by the IBM System/34
/// floppy track format. Pass a previous result as `start` to continue a running CRC.
pub fn crc_ibm_3740(data: &[u8], start: Option<u16>) -> u16 {
    let mut crc = start.unwrap_or(0xFFFF);
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}

/// Replace the contents of `file` with `bytes`. The new contents are written before the file is
/// truncated, so a failed write never leaves a shortened image behind.
pub(crate) fn overwrite_file(file: &mut File, bytes: &[u8]) -> Result<(), MediaError> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(bytes)?;
    file.set_len(bytes.len() as u64)?;
    file.flush()?;
    Ok(())
}

/// Return the host file modification time of `path`.
pub(crate) fn file_modified(path: &Path) -> Result<SystemTime, MediaError> {
    let meta = std::fs::metadata(path).map_err(|e| MediaError::unreadable(path, e))?;
    meta.modified().map_err(|e| MediaError::unreadable(path, e))
}

/// Set the host file modification time of an open file.
pub(crate) fn set_file_modified(file: &File, time: SystemTime) -> Result<(), MediaError> {
    file.set_modified(time)?;
    Ok(())
}

/// Seconds between the Unix epoch and 2000-01-01 00:00:00 UTC.
pub const Y2K_UNIX_OFFSET: u64 = 946_684_800;

/// Convert a [`SystemTime`] into seconds since 2000-01-01 00:00:00 UTC, saturating at the
/// bounds of a u32.
pub fn to_y2k_seconds(time: SystemTime) -> u32 {
    let unix = time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    unix.saturating_sub(Y2K_UNIX_OFFSET).min(u32::MAX as u64) as u32
}

/// Convert seconds since 2000-01-01 00:00:00 UTC into a [`SystemTime`].
pub fn from_y2k_seconds(secs: u32) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(Y2K_UNIX_OFFSET + secs as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Cursor;

    #[test]
    fn crc_of_idam() {
        // ID field for C=0 H=0 R=1 N=2
        let crc = crc_ibm_3740(&[0xA1, 0xA1, 0xA1, 0xFE, 0x00, 0x00, 0x01, 0x02], None);
        assert_eq!(crc, 0xCA6F);
        // A running CRC over the same bytes matches.
        let partial = crc_ibm_3740(&[0xA1, 0xA1, 0xA1, 0xFE], None);
        assert_eq!(crc_ibm_3740(&[0x00, 0x00, 0x01, 0x02], Some(partial)), 0xCA6F);
    }

    #[test]
    fn ascii_stops_at_eof_marker() {
        let mut cursor = Cursor::new(b"IMD 1.18: comment\x1A\x05".to_vec());
        let (text, term) = read_ascii(&mut cursor, None, None);
        assert_eq!(text.as_deref(), Some("IMD 1.18: comment"));
        assert_eq!(term, ASCII_EOF);
    }

    #[test]
    fn overwrite_shrinks_to_new_contents() {
        let mut file = tempfile::tempfile().unwrap();
        overwrite_file(&mut file, &[0xAA; 1024]).unwrap();
        overwrite_file(&mut file, &[0x55; 100]).unwrap();
        assert_eq!(file.metadata().unwrap().len(), 100);

        let mut contents = Vec::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_end(&mut contents).unwrap();
        assert!(contents.iter().all(|&b| b == 0x55));
    }

    #[test]
    fn y2k_epoch_conversion() {
        let t = from_y2k_seconds(86_400);
        assert_eq!(to_y2k_seconds(t), 86_400);
        assert_eq!(to_y2k_seconds(UNIX_EPOCH), 0);
    }
}
