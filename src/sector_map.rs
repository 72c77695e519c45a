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

    src/sector_map.rs

    An in-memory table of tracks and sectors, used by sector-level image
    formats (IMD and TD0) which must be fully decoded before block access can
    be offered.
*/
use bitflags::bitflags;

use crate::{
    DiskCh,
    DiskChs,
    DiskChsn,
    DiskDataEncoding,
    DiskDataRate,
    DiskGeometry,
    MediaError,
    StandardFormat,
};

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct SectorFlags: u8 {
        const DELETED    = 0b0000_0001;
        const DATA_ERROR = 0b0000_0010;
        const NO_DATA    = 0b0000_0100;
    }
}

#[derive(Clone, Debug)]
pub struct SectorEntry {
    pub chsn:  DiskChsn,
    pub data:  Vec<u8>,
    pub flags: SectorFlags,
}

#[derive(Clone, Debug)]
pub struct TrackEntry {
    pub ch:        DiskCh,
    pub encoding:  DiskDataEncoding,
    pub data_rate: DiskDataRate,
    pub sectors:   Vec<SectorEntry>,
}

/// Tracks in the order they were decoded. Each track also carries its logical sector table:
/// indices into `sectors`, ordered by sector ID with duplicate IDs dropped. Logical sector `s`
/// (1-based) of a track is entry `s - 1` of that table, whatever the physical IDs are.
#[derive(Clone, Debug, Default)]
pub struct SectorMap {
    tracks: Vec<TrackEntry>,
    logical: Vec<Vec<usize>>,
}

impl SectorMap {
    /// Build a map of freshly formatted tracks for a standard floppy format.
    pub fn from_standard(format: StandardFormat, fill: u8) -> SectorMap {
        let chsn = format.chsn();
        let mut map = SectorMap::default();

        for c in 0..chsn.c() {
            for h in 0..chsn.h() {
                let sectors = (1..=chsn.s())
                    .map(|s| SectorEntry {
                        chsn:  DiskChsn::new(c, h, s, chsn.n()),
                        data:  vec![fill; chsn.n_size()],
                        flags: SectorFlags::empty(),
                    })
                    .collect();
                map.add_track(TrackEntry {
                    ch: DiskCh::new(c, h),
                    encoding: format.encoding(),
                    data_rate: format.data_rate(),
                    sectors,
                });
            }
        }
        map
    }

    pub fn add_track(&mut self, track: TrackEntry) {
        let mut order: Vec<usize> = (0..track.sectors.len()).collect();
        order.sort_by_key(|&i| track.sectors[i].chsn.s());
        order.dedup_by_key(|i| track.sectors[*i].chsn.s());
        if order.len() != track.sectors.len() {
            log::warn!(
                "add_track(): Track {} has {} duplicate sector ID(s)",
                track.ch,
                track.sectors.len() - order.len()
            );
        }
        self.logical.push(order);
        self.tracks.push(track);
    }

    pub fn tracks(&self) -> &[TrackEntry] {
        &self.tracks
    }

    pub fn track(&self, ch: DiskCh) -> Option<&TrackEntry> {
        self.tracks.iter().find(|t| t.ch == ch)
    }

    /// Resolve a logical address to (track index, sector index).
    fn locate(&self, chs: DiskChs) -> Result<(usize, usize), MediaError> {
        let not_found = || MediaError::SectorNotFound(format!("no logical sector {}", chs));
        let ti = self.tracks.iter().position(|t| t.ch == chs.ch()).ok_or_else(not_found)?;
        let ordinal = (chs.s() as usize).checked_sub(1).ok_or_else(not_found)?;
        let si = *self.logical[ti].get(ordinal).ok_or_else(not_found)?;
        Ok((ti, si))
    }

    /// Derive the logical geometry of the image: cylinder and head counts from the highest track
    /// seen, sectors per track from the fullest track, and sector size from the first sector.
    pub fn geometry(&self) -> Option<DiskGeometry> {
        let first = self.tracks.iter().flat_map(|t| t.sectors.first()).next()?;
        let cylinders = self.tracks.iter().map(|t| t.ch.c() as u32).max()? + 1;
        let heads = self.tracks.iter().map(|t| t.ch.h() as u32).max()? + 1;
        let sectors = self.logical.iter().map(|order| order.len() as u32).max()?;

        Some(DiskGeometry::new(cylinders, heads, sectors, first.chsn.n_size()))
    }

    /// Return the data rate and encoding of the first track, if any.
    pub fn track_format(&self) -> Option<(DiskDataRate, DiskDataEncoding)> {
        self.tracks.first().map(|t| (t.data_rate, t.encoding))
    }

    fn find(&self, chs: DiskChs) -> Result<&SectorEntry, MediaError> {
        let (ti, si) = self.locate(chs)?;
        Ok(&self.tracks[ti].sectors[si])
    }

    /// Read a sector by track and logical sector number.
    pub fn read_sector(&self, chs: DiskChs) -> Result<Vec<u8>, MediaError> {
        let sector = self.find(chs)?;
        if sector.flags.contains(SectorFlags::NO_DATA) {
            return Err(MediaError::SectorNotFound(format!("sector {} has no data", chs)));
        }
        if sector.flags.contains(SectorFlags::DATA_ERROR) {
            log::debug!("read_sector(): Sector {} has a data CRC error", chs);
            return Err(MediaError::CrcError);
        }
        Ok(sector.data.clone())
    }

    /// Write a sector by track and logical sector number. A successful write clears any error or
    /// missing data condition recorded for the sector.
    pub fn write_sector(&mut self, chs: DiskChs, data: &[u8]) -> Result<(), MediaError> {
        let (ti, si) = self.locate(chs)?;
        let sector = &mut self.tracks[ti].sectors[si];
        let size = sector.chsn.n_size();
        if data.len() != size {
            log::error!(
                "write_sector(): Data length {} does not match sector size {}",
                data.len(),
                size
            );
            return Err(MediaError::ParameterError);
        }

        sector.data.clear();
        sector.data.extend_from_slice(data);
        sector.flags.remove(SectorFlags::DATA_ERROR | SectorFlags::NO_DATA);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_map_geometry() {
        let map = SectorMap::from_standard(StandardFormat::PcFloppy1200, 0xF6);
        assert_eq!(map.geometry().unwrap().get(), (80, 2, 15, 512));
        assert_eq!(map.tracks().len(), 160);
    }

    #[test]
    fn read_write_by_id() {
        let mut map = SectorMap::from_standard(StandardFormat::PcFloppy360, 0xF6);
        let chs = DiskChs::new(10, 1, 9);
        map.write_sector(chs, &[0x55; 512]).unwrap();
        assert_eq!(map.read_sector(chs).unwrap(), vec![0x55; 512]);
        assert!(matches!(
            map.read_sector(DiskChs::new(10, 1, 10)),
            Err(MediaError::SectorNotFound(_))
        ));
        assert!(matches!(
            map.write_sector(chs, &[0u8; 256]),
            Err(MediaError::ParameterError)
        ));
    }

    fn track_with_ids(c: u16, ids: &[u8]) -> TrackEntry {
        TrackEntry {
            ch: DiskCh::new(c, 0),
            encoding: DiskDataEncoding::Mfm,
            data_rate: DiskDataRate::Rate250Kbps,
            sectors: ids
                .iter()
                .map(|&id| SectorEntry {
                    chsn:  DiskChsn::new(c, 0, id, 2),
                    data:  vec![id; 512],
                    flags: SectorFlags::empty(),
                })
                .collect(),
        }
    }

    #[test]
    fn zero_based_ids_are_all_reachable() {
        let mut map = SectorMap::default();
        map.add_track(track_with_ids(0, &[0, 1, 2, 3, 4, 5, 6, 7, 8]));
        map.add_track(track_with_ids(1, &[0, 1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(map.geometry().unwrap().get(), (2, 1, 9, 512));

        assert_eq!(map.read_sector(DiskChs::new(0, 0, 1)).unwrap(), vec![0; 512]);
        assert_eq!(map.read_sector(DiskChs::new(1, 0, 9)).unwrap(), vec![8; 512]);
        assert!(matches!(
            map.read_sector(DiskChs::new(0, 0, 10)),
            Err(MediaError::SectorNotFound(_))
        ));
    }

    #[test]
    fn interleaved_and_gapped_ids_follow_id_order() {
        let mut map = SectorMap::default();
        map.add_track(track_with_ids(0, &[0xC5, 0xC1, 0xC3, 0xC1]));
        assert_eq!(map.geometry().unwrap().sectors, 3);

        assert_eq!(map.read_sector(DiskChs::new(0, 0, 1)).unwrap(), vec![0xC1; 512]);
        assert_eq!(map.read_sector(DiskChs::new(0, 0, 2)).unwrap(), vec![0xC3; 512]);
        map.write_sector(DiskChs::new(0, 0, 3), &[0x11; 512]).unwrap();
        assert_eq!(map.tracks()[0].sectors[0].data, vec![0x11; 512]);
    }

    #[test]
    fn error_flags() {
        let mut map = SectorMap::from_standard(StandardFormat::PcFloppy360, 0xF6);
        map.tracks[0].sectors[0].flags = SectorFlags::DATA_ERROR;
        assert!(matches!(map.read_sector(DiskChs::new(0, 0, 1)), Err(MediaError::CrcError)));
        map.write_sector(DiskChs::new(0, 0, 1), &[0; 512]).unwrap();
        assert!(map.read_sector(DiskChs::new(0, 0, 1)).is_ok());
    }
}
