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


    src/file_parsers/cue.rs

    CUE sheets describing CD-ROM images held in one or more BIN files. The
    sheet is parsed in full, and the first track, which must be a data track,
    is served as a linear run of 2048-byte blocks read from its BIN file.
    Raw 2352-byte sectors are stripped of their sync, header and (for mode 2
    XA) subheader on the way out. CUE images are always write protected.
*/
use std::{
    fs::File,
    path::{Path, PathBuf},
};

use regex::Regex;

use crate::{
    diskimage::{ImageDescriptor, ImageOpenOptions, MediaImage},
    file_parsers::{raw::CDROM_SECTOR_SIZE, FormatCaps, ImageFormat},
    io::{Read, ReadSeek, Seek, SeekFrom},
    util::get_length,
    DiskGeometry,
    MediaError,
};

const CUE_MAX_BYTES: u64 = 64 * 1024;
const DETECT_WINDOW: u64 = 4096;
const FRAMES_PER_SECOND: u32 = 75;
const CUE_TOKEN_REX: &str = r#""([^"]*)"|(\S+)"#;
const CUE_DETECT_REX: &str = r"(?mi)^\s*FILE\s+.+\s+\w+\s*$[\s\S]*^\s*TRACK\s+\d+\s+\S+";

/// The sector layout of a track.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CueTrackMode {
    Audio,
    Mode1Cooked,
    Mode1Raw,
    Mode2Cooked,
    Mode2Form,
    Mode2Raw,
}

impl CueTrackMode {
    fn from_token(token: &str) -> Option<CueTrackMode> {
        match token.to_ascii_uppercase().as_str() {
            "AUDIO" => Some(CueTrackMode::Audio),
            "MODE1/2048" => Some(CueTrackMode::Mode1Cooked),
            "MODE1/2352" => Some(CueTrackMode::Mode1Raw),
            "MODE2/2048" => Some(CueTrackMode::Mode2Cooked),
            "MODE2/2336" => Some(CueTrackMode::Mode2Form),
            "MODE2/2352" => Some(CueTrackMode::Mode2Raw),
            _ => None,
        }
    }

    /// Bytes each sector of the track occupies in its file.
    pub fn stored_size(&self) -> u64 {
        match self {
            CueTrackMode::Mode1Cooked | CueTrackMode::Mode2Cooked => 2048,
            CueTrackMode::Mode2Form => 2336,
            CueTrackMode::Audio | CueTrackMode::Mode1Raw | CueTrackMode::Mode2Raw => 2352,
        }
    }

    /// Offset of the 2048 bytes of user data within a stored sector. Audio tracks have none.
    pub fn user_data_offset(&self) -> Option<u64> {
        match self {
            CueTrackMode::Audio => None,
            CueTrackMode::Mode1Cooked | CueTrackMode::Mode2Cooked => Some(0),
            CueTrackMode::Mode2Form => Some(8),
            CueTrackMode::Mode1Raw => Some(16),
            CueTrackMode::Mode2Raw => Some(24),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CueTrack {
    pub number: u8,
    pub mode: CueTrackMode,
    pub file: PathBuf,
    /// INDEX 00, in frames from the start of the file.
    pub index0: Option<u32>,
    /// INDEX 01, in frames from the start of the file.
    pub index1: u32,
    /// PREGAP length in frames. Pregap sectors are not stored in the file.
    pub pregap: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CueSheet {
    pub tracks: Vec<CueTrack>,
}

/// Parse an "mm:ss:ff" time into frames.
fn parse_msf(token: &str) -> Option<u32> {
    let mut fields = token.split(':').map(|f| f.parse::<u32>().ok());
    let (m, s, f) = (fields.next()??, fields.next()??, fields.next()??);
    if fields.next().is_some() || s >= 60 || f >= FRAMES_PER_SECOND {
        return None;
    }
    Some((m * 60 + s) * FRAMES_PER_SECOND + f)
}

impl CueSheet {
    /// Parse a cue sheet. FILE names are resolved against `base_dir`.
    pub fn parse(text: &str, base_dir: &Path) -> Result<CueSheet, MediaError> {
        let re = Regex::new(CUE_TOKEN_REX).map_err(|e| MediaError::malformed(e.to_string()))?;
        let mut sheet = CueSheet::default();
        let mut file: Option<PathBuf> = None;
        let mut current: Option<(u8, CueTrackMode, PathBuf, u32)> = None;
        let mut index0 = None;
        let mut index1 = None;

        let bad_line = |n: usize, line: &str| {
            log::error!("CueSheet::parse(): Malformed line {}: {}", n + 1, line.trim());
            MediaError::malformed(format!("malformed cue sheet line {}", n + 1))
        };

        for (n, line) in text.lines().enumerate() {
            let tokens: Vec<&str> = re
                .captures_iter(line)
                .filter_map(|c| c.get(1).or_else(|| c.get(2)))
                .map(|m| m.as_str())
                .collect();
            let Some(keyword) = tokens.first()
            else {
                continue;
            };

            match keyword.to_ascii_uppercase().as_str() {
                "FILE" => {
                    let (Some(name), Some(kind)) = (tokens.get(1), tokens.get(2))
                    else {
                        return Err(bad_line(n, line));
                    };
                    if !kind.eq_ignore_ascii_case("BINARY") {
                        log::warn!("CueSheet::parse(): FILE type {} is read as BINARY", kind);
                    }
                    file = Some(base_dir.join(name));
                }
                "TRACK" => {
                    sheet.finish_track(current.take(), index0.take(), index1.take())?;
                    let number = tokens.get(1).and_then(|t| t.parse::<u8>().ok());
                    let mode = tokens.get(2).and_then(|t| CueTrackMode::from_token(t));
                    let (Some(number), Some(mode)) = (number, mode)
                    else {
                        return Err(bad_line(n, line));
                    };
                    let Some(file) = file.clone()
                    else {
                        log::error!("CueSheet::parse(): TRACK {} precedes any FILE", number);
                        return Err(MediaError::malformed("cue sheet TRACK without a FILE"));
                    };
                    current = Some((number, mode, file, 0));
                }
                "INDEX" => {
                    let number = tokens.get(1).and_then(|t| t.parse::<u8>().ok());
                    let frames = tokens.get(2).and_then(|t| parse_msf(t));
                    match (number, frames, current.is_some()) {
                        (Some(0), Some(frames), true) => index0 = Some(frames),
                        (Some(1), Some(frames), true) => index1 = Some(frames),
                        (Some(_), Some(_), true) => {}
                        _ => return Err(bad_line(n, line)),
                    }
                }
                "PREGAP" => {
                    let frames = tokens.get(1).and_then(|t| parse_msf(t));
                    match (frames, current.as_mut()) {
                        (Some(frames), Some(track)) => track.3 = frames,
                        _ => return Err(bad_line(n, line)),
                    }
                }
                // CATALOG, TITLE, PERFORMER, REM, FLAGS, POSTGAP and the like carry nothing we serve.
                _ => {}
            }
        }
        sheet.finish_track(current, index0, index1)?;

        match sheet.tracks.first() {
            None => Err(MediaError::malformed("cue sheet lists no tracks")),
            Some(track) if track.number != 1 => {
                log::error!("CueSheet::parse(): First track is numbered {}", track.number);
                Err(MediaError::malformed("cue sheet does not start with track 1"))
            }
            Some(_) => Ok(sheet),
        }
    }

    fn finish_track(
        &mut self,
        track: Option<(u8, CueTrackMode, PathBuf, u32)>,
        index0: Option<u32>,
        index1: Option<u32>,
    ) -> Result<(), MediaError> {
        let Some((number, mode, file, pregap)) = track
        else {
            return Ok(());
        };
        let Some(index1) = index1
        else {
            log::error!("CueSheet::finish_track(): Track {} has no INDEX 01", number);
            return Err(MediaError::malformed(format!("cue track {} has no INDEX 01", number)));
        };
        if self.tracks.last().is_some_and(|t| t.number >= number) {
            return Err(MediaError::malformed(format!("cue track {} is out of order", number)));
        }
        self.tracks.push(CueTrack {
            number,
            mode,
            file,
            index0,
            index1,
            pregap,
        });
        Ok(())
    }

    /// The byte range within its file of the track at `index`. A track ends where the next track
    /// in the same file begins, or at the end of the file.
    pub fn track_extent(&self, index: usize, file_len: u64) -> Option<(u64, u64)> {
        let track = self.tracks.get(index)?;
        let start = track.index1 as u64 * track.mode.stored_size();
        let end = match self.tracks.get(index + 1) {
            Some(next) if next.file == track.file => {
                next.index0.unwrap_or(next.index1) as u64 * track.mode.stored_size()
            }
            _ => file_len,
        };
        (end > start).then_some((start, end.min(file_len)))
    }
}

pub struct CueFormat;

impl CueFormat {
    pub(crate) fn extensions() -> Vec<&'static str> {
        vec!["cue"]
    }

    pub(crate) fn capabilities() -> FormatCaps {
        FormatCaps::empty()
    }

    pub(crate) fn detect<RS: ReadSeek>(image: &mut RS) -> bool {
        let mut window = Vec::new();
        if image.seek(SeekFrom::Start(0)).is_err()
            || image.by_ref().take(DETECT_WINDOW).read_to_end(&mut window).is_err()
        {
            return false;
        }
        _ = image.seek(SeekFrom::Start(0));

        let Ok(text) = std::str::from_utf8(&window)
        else {
            return false;
        };
        Regex::new(CUE_DETECT_REX).is_ok_and(|re| re.is_match(text))
    }
}

/// A cue sheet and the BIN file holding its first track.
pub struct CueImage {
    sheet: CueSheet,
    bin: File,
    start: u64,
    mode: CueTrackMode,
    descriptor: ImageDescriptor,
}

impl CueImage {
    pub(crate) fn open(mut file: File, path: &Path, _opts: &ImageOpenOptions, _read_only: bool) -> Result<CueImage, MediaError> {
        let cue_len = get_length(&mut file)?;
        if cue_len > CUE_MAX_BYTES {
            return Err(MediaError::malformed("cue sheet is too large"));
        }
        let mut text = String::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_string(&mut text)?;

        let base_dir = path.parent().unwrap_or(Path::new(""));
        let sheet = CueSheet::parse(&text, base_dir)?;
        let track = sheet
            .tracks
            .first()
            .ok_or_else(|| MediaError::malformed("cue sheet lists no tracks"))?;
        if track.mode.user_data_offset().is_none() {
            log::error!("CueImage::open(): First track of {} is an audio track", path.display());
            return Err(MediaError::UnsupportedFormat);
        }

        let mut bin = File::open(&track.file).map_err(|e| {
            log::error!("CueImage::open(): Can't open {}: {}", track.file.display(), e);
            MediaError::Io(e)
        })?;
        let bin_len = get_length(&mut bin)?;
        let (start, end) = sheet
            .track_extent(0, bin_len)
            .ok_or_else(|| MediaError::malformed("first cue track holds no sectors"))?;
        let blocks = (end - start) / track.mode.stored_size();
        if blocks == 0 {
            return Err(MediaError::malformed("first cue track holds no sectors"));
        }

        log::debug!(
            "CueImage::open(): {} tracks, data track {:?} of {} blocks in {}",
            sheet.tracks.len(),
            track.mode,
            blocks,
            track.file.display()
        );

        let mut descriptor = ImageDescriptor::new(
            ImageFormat::Cue,
            path,
            DiskGeometry::linear(blocks, CDROM_SECTOR_SIZE),
        );
        descriptor.byte_size = bin_len;
        descriptor.write_protected = true;

        let mode = track.mode;
        Ok(CueImage {
            sheet,
            bin,
            start,
            mode,
            descriptor,
        })
    }

    pub fn sheet(&self) -> &CueSheet {
        &self.sheet
    }
}

impl MediaImage for CueImage {
    fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    fn read_block(&mut self, lba: u64) -> Result<Vec<u8>, MediaError> {
        self.descriptor.check_read(lba)?;
        let offset = self.mode.user_data_offset().unwrap_or(0);
        let mut buf = vec![0u8; CDROM_SECTOR_SIZE];
        self.bin
            .seek(SeekFrom::Start(self.start + lba * self.mode.stored_size() + offset))?;
        self.bin.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_block(&mut self, lba: u64, data: &[u8]) -> Result<(), MediaError> {
        self.descriptor.check_write(lba, data)
    }

    fn flush(&mut self) -> Result<(), MediaError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Cursor;

    const SHEET: &str = "REM GENRE Misc\r\n\
        FILE \"My Game (Disc 1).bin\" BINARY\r\n\
        \x20 TRACK 01 MODE1/2352\r\n\
        \x20   INDEX 01 00:00:00\r\n\
        \x20 TRACK 02 AUDIO\r\n\
        \x20   PREGAP 00:02:00\r\n\
        \x20   INDEX 00 00:10:00\r\n\
        \x20   INDEX 01 00:12:00\r\n";

    #[test]
    fn sheet_tracks() {
        let sheet = CueSheet::parse(SHEET, Path::new("/discs")).unwrap();
        assert_eq!(sheet.tracks.len(), 2);
        assert_eq!(sheet.tracks[0].file, Path::new("/discs/My Game (Disc 1).bin"));
        assert_eq!(sheet.tracks[0].mode, CueTrackMode::Mode1Raw);
        assert_eq!(sheet.tracks[1].mode, CueTrackMode::Audio);
        assert_eq!(sheet.tracks[1].pregap, 150);
        assert_eq!(sheet.tracks[1].index0, Some(750));
        assert_eq!(sheet.tracks[1].index1, 900);

        // Track 1 runs up to track 2's INDEX 00.
        assert_eq!(sheet.track_extent(0, 100_000_000), Some((0, 750 * 2352)));
        assert_eq!(sheet.track_extent(1, 1_000_000), None);
    }

    #[test]
    fn msf() {
        assert_eq!(parse_msf("01:02:03"), Some((62 * 75) + 3));
        assert_eq!(parse_msf("00:60:00"), None);
        assert_eq!(parse_msf("00:00:75"), None);
        assert_eq!(parse_msf("00:00"), None);
    }

    #[test]
    fn sheet_errors() {
        let no_file = "TRACK 01 MODE1/2048\n INDEX 01 00:00:00\n";
        assert!(matches!(CueSheet::parse(no_file, Path::new("")), Err(MediaError::MalformedHeader(_))));

        let no_index = "FILE a.bin BINARY\nTRACK 01 MODE1/2048\n";
        assert!(matches!(CueSheet::parse(no_index, Path::new("")), Err(MediaError::MalformedHeader(_))));

        let second_first = "FILE a.bin BINARY\nTRACK 02 MODE1/2048\n INDEX 01 00:00:00\n";
        assert!(matches!(
            CueSheet::parse(second_first, Path::new("")),
            Err(MediaError::MalformedHeader(_))
        ));

        let bad_mode = "FILE a.bin BINARY\nTRACK 01 CDG\n INDEX 01 00:00:00\n";
        assert!(matches!(CueSheet::parse(bad_mode, Path::new("")), Err(MediaError::MalformedHeader(_))));
    }

    #[test]
    fn detection() {
        assert!(CueFormat::detect(&mut Cursor::new(SHEET.as_bytes().to_vec())));
        assert!(!CueFormat::detect(&mut Cursor::new(b"FILE only\n".to_vec())));
        assert!(!CueFormat::detect(&mut Cursor::new(vec![0u8; 2048])));
    }
}
