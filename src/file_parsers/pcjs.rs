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


    src/file_parsers/pcjs.rs

    PCjs JSON disk images. The document carries an "imageInfo" object with
    the nominal geometry and a "diskData" array indexed [cylinder][head]
    [sector]. Each sector object records its ID (c, h, s), its length (l)
    and its contents (d) as an array of 32-bit little-endian words. When the
    array is shorter than the sector, its last word repeats to the end.

    PCjs images are read only.
*/
use std::{fs::File, path::Path};

use serde_json::Value;

use crate::{
    diskimage::{ImageDescriptor, ImageOpenOptions, MediaImage},
    file_parsers::{FormatCaps, ImageFormat},
    io::{Read, ReadSeek, Seek, SeekFrom},
    sector_map::{SectorEntry, SectorFlags, SectorMap, TrackEntry},
    DiskCh,
    DiskChsn,
    DiskDataEncoding,
    MediaError,
    StandardFormat,
    MAXIMUM_SECTOR_SIZE,
};

/// Documents larger than this are rejected without parsing.
pub const PCJS_MAX_BYTES: u64 = 64 * 1024 * 1024;
const DETECT_WINDOW: usize = 4096;

/// The nominal geometry recorded in the "imageInfo" object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PcjsInfo {
    pub cylinders: u32,
    pub heads: u32,
    pub sectors_per_track: u32,
    pub sector_size: usize,
    pub disk_size: Option<u64>,
    pub checksum: Option<i64>,
}

pub struct PcjsFormat;

impl PcjsFormat {
    pub(crate) fn extensions() -> Vec<&'static str> {
        vec!["json"]
    }

    pub(crate) fn capabilities() -> FormatCaps {
        FormatCaps::CAP_SECTOR_IDS
    }

    /// A PCjs document is a JSON object with an "imageInfo" or "diskData" key near its start.
    pub(crate) fn detect<RS: ReadSeek>(image: &mut RS) -> bool {
        let mut window = Vec::with_capacity(DETECT_WINDOW);
        let detected = image.seek(SeekFrom::Start(0)).is_ok()
            && image.by_ref().take(DETECT_WINDOW as u64).read_to_end(&mut window).is_ok()
            && window.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{')
            && (window.windows(11).any(|w| w == b"\"imageInfo\"")
                || window.windows(10).any(|w| w == b"\"diskData\""));
        _ = image.seek(SeekFrom::Start(0));
        detected
    }

    pub(crate) fn parse(text: &str) -> Result<(PcjsInfo, SectorMap), MediaError> {
        let doc: Value = serde_json::from_str(text).map_err(|e| {
            log::error!("PcjsFormat::parse(): Invalid JSON: {}", e);
            MediaError::malformed(format!("invalid PCjs JSON: {}", e))
        })?;

        let info = parse_image_info(&doc)?;
        log::trace!("PcjsFormat::parse(): {:?}", info);

        let disk_data = doc
            .get("diskData")
            .and_then(Value::as_array)
            .ok_or_else(|| MediaError::malformed("PCjs image has no diskData array"))?;

        let rate = StandardFormat::from_size(
            info.cylinders as usize * info.heads as usize * info.sectors_per_track as usize * info.sector_size,
        )
        .first()
        .map(|f| f.data_rate())
        .unwrap_or_default();

        let mut map = SectorMap::default();
        for (c, cylinder) in disk_data.iter().enumerate() {
            let heads = cylinder
                .as_array()
                .ok_or_else(|| MediaError::malformed(format!("diskData[{}] is not an array", c)))?;

            for (h, head) in heads.iter().enumerate() {
                let entries = head
                    .as_array()
                    .ok_or_else(|| MediaError::malformed(format!("diskData[{}][{}] is not an array", c, h)))?;

                let sectors = entries.iter().map(parse_sector).collect::<Result<Vec<_>, _>>()?;
                if sectors.is_empty() {
                    continue;
                }
                map.add_track(TrackEntry {
                    ch: DiskCh::new(c as u16, h as u8),
                    encoding: DiskDataEncoding::Mfm,
                    data_rate: rate,
                    sectors,
                });
            }
        }

        Ok((info, map))
    }
}

fn number(object: &Value, key: &str) -> Option<i64> {
    object.get(key).and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
}

fn required(object: &Value, key: &str, context: &str) -> Result<i64, MediaError> {
    number(object, key).ok_or_else(|| {
        log::error!("PcjsFormat::parse(): {} is missing the number \"{}\"", context, key);
        MediaError::malformed(format!("{} is missing \"{}\"", context, key))
    })
}

fn parse_image_info(doc: &Value) -> Result<PcjsInfo, MediaError> {
    let info = doc
        .get("imageInfo")
        .filter(|v| v.is_object())
        .ok_or_else(|| MediaError::malformed("PCjs image has no imageInfo object"))?;

    let field = |key: &str| -> Result<u32, MediaError> {
        u32::try_from(required(info, key, "imageInfo")?)
            .map_err(|_| MediaError::malformed(format!("imageInfo \"{}\" is out of range", key)))
    };

    Ok(PcjsInfo {
        cylinders: field("cylinders")?,
        heads: field("heads")?,
        sectors_per_track: field("trackDefault")?,
        sector_size: field("sectorDefault")? as usize,
        disk_size: number(info, "diskSize").and_then(|n| u64::try_from(n).ok()),
        checksum: number(info, "checksum"),
    })
}

fn parse_sector(sector: &Value) -> Result<SectorEntry, MediaError> {
    let id = |key: &str| -> Result<u8, MediaError> {
        u8::try_from(required(sector, key, "sector")?)
            .map_err(|_| MediaError::malformed(format!("sector \"{}\" is out of range", key)))
    };
    let (c, h, s) = (id("c")?, id("h")?, id("s")?);

    let len = required(sector, "l", "sector")?;
    let size = usize::try_from(len).unwrap_or(0);
    if !size.is_power_of_two() || !(128..=MAXIMUM_SECTOR_SIZE).contains(&size) {
        log::error!("parse_sector(): Sector {}/{}/{} has unsupported length {}", c, h, s, len);
        return Err(MediaError::UnsupportedSectorSize(size));
    }

    let words = sector
        .get("d")
        .and_then(Value::as_array)
        .ok_or_else(|| MediaError::malformed(format!("sector {}/{}/{} has no data array", c, h, s)))?;
    if words.len() > size / 4 {
        log::error!(
            "parse_sector(): Sector {}/{}/{} holds {} words, more than its length allows",
            c,
            h,
            s,
            words.len()
        );
        return Err(MediaError::malformed(format!("sector {}/{}/{} data overruns its length", c, h, s)));
    }

    let mut data = Vec::with_capacity(size);
    for word in words {
        let value = word
            .as_i64()
            .ok_or_else(|| MediaError::malformed(format!("sector {}/{}/{} data is not numeric", c, h, s)))?;
        data.extend_from_slice(&(value as u32).to_le_bytes());
    }
    // The last word repeats to fill the sector.
    let pattern = data.len().checked_sub(4).map(|i| [data[i], data[i + 1], data[i + 2], data[i + 3]]);
    let pattern = pattern.unwrap_or_default();
    while data.len() < size {
        data.extend_from_slice(&pattern);
    }

    Ok(SectorEntry {
        chsn: DiskChsn::new(c as u16, h, s, DiskChsn::bytes_to_n(size)),
        data,
        flags: SectorFlags::empty(),
    })
}

pub struct PcjsImage {
    info: PcjsInfo,
    map: SectorMap,
    descriptor: ImageDescriptor,
}

impl PcjsImage {
    pub(crate) fn open(mut file: File, path: &Path, _opts: &ImageOpenOptions, _read_only: bool) -> Result<PcjsImage, MediaError> {
        let file_len = file.seek(SeekFrom::End(0))?;
        if file_len > PCJS_MAX_BYTES {
            log::error!("PcjsImage::open(): {} bytes is too large for a PCjs image", file_len);
            return Err(MediaError::malformed("PCjs image is too large"));
        }
        file.seek(SeekFrom::Start(0))?;
        let mut text = String::with_capacity(file_len as usize);
        file.read_to_string(&mut text)?;

        let (info, map) = PcjsFormat::parse(&text)?;
        let geometry = map
            .geometry()
            .ok_or_else(|| MediaError::malformed("PCjs image contains no sectors"))?;
        if geometry.get() != (info.cylinders, info.heads, info.sectors_per_track, info.sector_size) {
            log::warn!(
                "PcjsImage::open(): diskData geometry {} differs from imageInfo {}/{}/{}/{}",
                geometry,
                info.cylinders,
                info.heads,
                info.sectors_per_track,
                info.sector_size
            );
        }

        let mut descriptor = ImageDescriptor::new(ImageFormat::Pcjs, path, geometry);
        descriptor.byte_size = file_len;
        descriptor.write_protected = true;
        descriptor.standard_format = StandardFormat::from_size(geometry.total_bytes() as usize).first().copied();

        Ok(PcjsImage {
            info,
            map,
            descriptor,
        })
    }

    pub fn info(&self) -> &PcjsInfo {
        &self.info
    }

    pub fn sector_map(&self) -> &SectorMap {
        &self.map
    }
}

impl MediaImage for PcjsImage {
    fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    fn read_block(&mut self, lba: u64) -> Result<Vec<u8>, MediaError> {
        self.descriptor.check_read(lba)?;
        let chs = self.descriptor.geometry.lba_to_chs(lba)?;
        self.map.read_sector(chs)
    }

    fn write_block(&mut self, lba: u64, data: &[u8]) -> Result<(), MediaError> {
        self.descriptor.check_write(lba, data)
    }

    fn flush(&mut self) -> Result<(), MediaError> {
        Ok(())
    }
}
