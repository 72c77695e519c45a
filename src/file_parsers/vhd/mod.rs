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

    src/file_parsers/vhd/mod.rs

    Connectix / Microsoft Virtual Hard Disk images: fixed, dynamic and
    differencing.
*/
mod chain;
mod create;
mod footer;
mod sparse;

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use crate::{
    diskimage::{open_backing_file, ImageDescriptor, ImageOpenOptions, MediaImage},
    file_parsers::{FormatCaps, ImageFormat},
    io::{Read, ReadSeek, Seek, SeekFrom, Write},
    util::get_length,
    MediaError,
    DEFAULT_SECTOR_SIZE,
};

pub use chain::{repair_chain, validate_chain, ChainReport, StaleChainPolicy, StaleLink, MAX_CHAIN_DEPTH};
pub use create::{convert_raw_to_vhd, create_differencing, create_dynamic, create_fixed};
pub use footer::{VhdDiskType, VhdFooter, FOOTER_LEN};
pub use sparse::{SparseHeader, VhdBlockSize, BAT_UNALLOCATED};

pub struct VhdFormat;

impl VhdFormat {
    pub(crate) fn extensions() -> Vec<&'static str> {
        vec!["vhd"]
    }

    pub(crate) fn capabilities() -> FormatCaps {
        FormatCaps::CAP_WRITE | FormatCaps::CAP_CREATE | FormatCaps::CAP_FIXED_GEOMETRY
    }

    /// Return the VHD variant of `source` if it carries a valid footer.
    pub(crate) fn detect<RS: ReadSeek>(source: &mut RS) -> Option<ImageFormat> {
        let footer = VhdFooter::read_from(source).ok();
        _ = source.seek(SeekFrom::Start(0));

        match footer?.disk_type().ok()? {
            VhdDiskType::Fixed => Some(ImageFormat::VhdFixed),
            VhdDiskType::Dynamic => Some(ImageFormat::VhdDynamic),
            VhdDiskType::Differencing => Some(ImageFormat::VhdDifferencing),
        }
    }
}

/// Block allocation state of a dynamic or differencing image.
struct SparseState {
    header: SparseHeader,
    bat: Vec<u32>,
    /// Offset of the trailing footer. New blocks are appended here.
    footer_offset: u64,
    /// Sector bitmap of the most recently accessed block.
    bitmap: Option<(usize, Vec<u8>)>,
    parent_path: Option<PathBuf>,
    parent: Option<Box<VhdImage>>,
}

pub struct VhdImage {
    file: File,
    footer: VhdFooter,
    sparse: Option<SparseState>,
    depth: usize,
    descriptor: ImageDescriptor,
}

impl VhdImage {
    pub(crate) fn open(
        mut file: File,
        path: &Path,
        opts: &ImageOpenOptions,
        read_only: bool,
    ) -> Result<VhdImage, MediaError> {
        let mut protect = read_only;
        let footer = VhdFooter::read_from(&mut file)?;
        if footer.disk_type()? == VhdDiskType::Differencing {
            let report = validate_chain(path)?;
            if !report.is_consistent() {
                protect |= Self::apply_stale_policy(path, report, opts, read_only)?;
            }
        }

        VhdImage::load(file, path, protect, 0)
    }

    /// Decide how to continue with a chain that has stale links. Returns true if the image must
    /// be opened write protected.
    fn apply_stale_policy(
        path: &Path,
        report: ChainReport,
        opts: &ImageOpenOptions,
        read_only: bool,
    ) -> Result<bool, MediaError> {
        match opts.stale_chain {
            StaleChainPolicy::Report => {
                log::warn!("VhdImage::open(): {}", report);
                Err(MediaError::StaleParentTimestamp(Box::new(report)))
            }
            StaleChainPolicy::Continue => {
                log::warn!(
                    "VhdImage::open(): Continuing with stale chain, {} opened write protected",
                    path.display()
                );
                Ok(true)
            }
            StaleChainPolicy::Repair => {
                let result = if read_only {
                    Err(MediaError::RepairFailed(format!("{} is not writable", path.display())))
                }
                else {
                    repair_chain(path, opts.progress.clone()).map(|_| ())
                };

                match result {
                    Ok(()) => Ok(false),
                    Err(MediaError::RepairFailed(reason)) if opts.allow_read_only_fallback => {
                        log::warn!(
                            "VhdImage::open(): Repair failed ({}), opening {} write protected",
                            reason,
                            path.display()
                        );
                        Ok(true)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn load(mut file: File, path: &Path, write_protected: bool, depth: usize) -> Result<VhdImage, MediaError> {
        if depth > MAX_CHAIN_DEPTH {
            return Err(MediaError::malformed("differencing chain too deep"));
        }

        let file_len = get_length(&mut file)?;
        let footer = VhdFooter::read_from(&mut file)?;
        let disk_type = footer.disk_type()?;
        let geometry = footer.geometry();
        log::debug!(
            "VhdImage::load(): {:?} image of {} bytes, geometry {}",
            disk_type,
            footer.current_size,
            geometry
        );

        if geometry.total_bytes() > footer.current_size {
            log::error!(
                "VhdImage::load(): Geometry {} addresses more than the disk size {}",
                geometry,
                footer.current_size
            );
            return Err(MediaError::malformed("VHD geometry exceeds the disk size"));
        }

        let sparse = match disk_type {
            VhdDiskType::Fixed => {
                if file_len < footer.current_size + FOOTER_LEN as u64 {
                    return Err(MediaError::malformed("fixed VHD is shorter than its disk size"));
                }
                None
            }
            VhdDiskType::Dynamic | VhdDiskType::Differencing => {
                let header = SparseHeader::read_at(&mut file, footer.data_offset)?;
                let bat = sparse::read_bat(&mut file, &header)?;
                let blocks_needed = footer.current_size.div_ceil(header.block_size as u64);
                if (bat.len() as u64) < blocks_needed {
                    log::error!(
                        "VhdImage::load(): BAT has {} entries, {} needed",
                        bat.len(),
                        blocks_needed
                    );
                    return Err(MediaError::malformed("VHD block table is too small for the disk size"));
                }

                let parent_path = match disk_type {
                    VhdDiskType::Differencing => Some(chain::resolve_parent(path, &mut file, &header)?),
                    _ => None,
                };

                Some(SparseState {
                    header,
                    bat,
                    footer_offset: file_len.saturating_sub(FOOTER_LEN as u64),
                    bitmap: None,
                    parent_path,
                    parent: None,
                })
            }
        };

        let format = match disk_type {
            VhdDiskType::Fixed => ImageFormat::VhdFixed,
            VhdDiskType::Dynamic => ImageFormat::VhdDynamic,
            VhdDiskType::Differencing => ImageFormat::VhdDifferencing,
        };
        let mut descriptor = ImageDescriptor::new(format, path, geometry);
        descriptor.byte_size = file_len;
        descriptor.write_protected = write_protected;

        Ok(VhdImage {
            file,
            footer,
            sparse,
            depth,
            descriptor,
        })
    }

    pub fn footer(&self) -> &VhdFooter {
        &self.footer
    }

    pub fn sparse_header(&self) -> Option<&SparseHeader> {
        self.sparse.as_ref().map(|s| &s.header)
    }

    /// Path of the parent image, for differencing images.
    pub fn parent_path(&self) -> Option<&Path> {
        self.sparse.as_ref().and_then(|s| s.parent_path.as_deref())
    }

    /// Return true if the block containing `lba` has been allocated in this image.
    pub fn is_allocated(&self, lba: u64) -> bool {
        match &self.sparse {
            Some(sparse) => {
                let block = (lba / sparse.header.sectors_per_block() as u64) as usize;
                sparse.bat.get(block).is_some_and(|&e| e != BAT_UNALLOCATED)
            }
            None => true,
        }
    }

    fn read_parent(&mut self, lba: u64) -> Result<Vec<u8>, MediaError> {
        let depth = self.depth;
        let Some(sparse) = self.sparse.as_mut()
        else {
            return Ok(vec![0; DEFAULT_SECTOR_SIZE]);
        };
        let Some(parent_path) = sparse.parent_path.as_ref()
        else {
            return Ok(vec![0; DEFAULT_SECTOR_SIZE]);
        };

        if sparse.parent.is_none() {
            log::trace!("VhdImage::read_parent(): Opening parent {}", parent_path.display());
            let (file, _) = open_backing_file(parent_path, true)?;
            let parent = VhdImage::load(file, parent_path, true, depth + 1)?;
            if parent.footer.current_size != self.footer.current_size {
                log::error!(
                    "VhdImage::read_parent(): Parent size {} does not match child size {}",
                    parent.footer.current_size,
                    self.footer.current_size
                );
                return Err(MediaError::malformed("parent image size does not match"));
            }
            sparse.parent = Some(Box::new(parent));
        }

        match sparse.parent.as_mut() {
            Some(parent) => parent.read_block(lba),
            None => Ok(vec![0; DEFAULT_SECTOR_SIZE]),
        }
    }

    /// Load the sector bitmap of `block` into the cache.
    fn load_bitmap(file: &mut File, sparse: &mut SparseState, block: usize) -> Result<(), MediaError> {
        if matches!(&sparse.bitmap, Some((cached, _)) if *cached == block) {
            return Ok(());
        }
        let mut bitmap = vec![0u8; sparse.header.bitmap_len() as usize];
        file.seek(SeekFrom::Start(sparse.bat[block] as u64 * DEFAULT_SECTOR_SIZE as u64))?;
        file.read_exact(&mut bitmap)?;
        sparse.bitmap = Some((block, bitmap));
        Ok(())
    }

    /// Append a new zeroed block, point the BAT at it and move the footer past it.
    fn allocate_block(&mut self, block: usize) -> Result<(), MediaError> {
        let Some(sparse) = self.sparse.as_mut()
        else {
            return Ok(());
        };

        let offset = sparse.footer_offset;
        let block_len = sparse.header.bitmap_len() + sparse.header.block_size as u64;
        log::trace!("VhdImage::allocate_block(): Block {} at offset {:#X}", block, offset);

        self.file.seek(SeekFrom::Start(offset))?;
        crate::file_parsers::raw::write_zeroes(&mut self.file, block_len, None)?;
        self.file.write_all(&self.footer.to_bytes()?)?;

        let entry = (offset / DEFAULT_SECTOR_SIZE as u64) as u32;
        self.file
            .seek(SeekFrom::Start(sparse.header.table_offset + block as u64 * 4))?;
        self.file.write_all(&entry.to_be_bytes())?;

        sparse.bat[block] = entry;
        sparse.footer_offset = offset + block_len;
        sparse.bitmap = Some((block, vec![0u8; sparse.header.bitmap_len() as usize]));
        self.descriptor.byte_size = sparse.footer_offset + FOOTER_LEN as u64;
        Ok(())
    }
}

fn bitmap_bit(bitmap: &[u8], sector: usize) -> bool {
    bitmap[sector / 8] & (0x80 >> (sector % 8)) != 0
}

impl MediaImage for VhdImage {
    fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    fn read_block(&mut self, lba: u64) -> Result<Vec<u8>, MediaError> {
        self.descriptor.check_read(lba)?;

        let Some(sparse) = self.sparse.as_mut()
        else {
            let mut buf = vec![0u8; DEFAULT_SECTOR_SIZE];
            self.file.seek(SeekFrom::Start(lba * DEFAULT_SECTOR_SIZE as u64))?;
            self.file.read_exact(&mut buf)?;
            return Ok(buf);
        };

        let spb = sparse.header.sectors_per_block() as u64;
        let block = (lba / spb) as usize;
        let sector = (lba % spb) as usize;
        let differencing = sparse.parent_path.is_some();

        if sparse.bat[block] == BAT_UNALLOCATED {
            return self.read_parent(lba);
        }
        if differencing {
            VhdImage::load_bitmap(&mut self.file, sparse, block)?;
            let present = sparse
                .bitmap
                .as_ref()
                .is_some_and(|(_, bitmap)| bitmap_bit(bitmap, sector));
            if !present {
                return self.read_parent(lba);
            }
        }

        let offset = sparse.bat[block] as u64 * DEFAULT_SECTOR_SIZE as u64
            + sparse.header.bitmap_len()
            + sector as u64 * DEFAULT_SECTOR_SIZE as u64;
        let mut buf = vec![0u8; DEFAULT_SECTOR_SIZE];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_block(&mut self, lba: u64, data: &[u8]) -> Result<(), MediaError> {
        self.descriptor.check_write(lba, data)?;

        let (block, sector) = match &self.sparse {
            Some(sparse) => {
                let spb = sparse.header.sectors_per_block() as u64;
                ((lba / spb) as usize, (lba % spb) as usize)
            }
            None => {
                self.file.seek(SeekFrom::Start(lba * DEFAULT_SECTOR_SIZE as u64))?;
                self.file.write_all(data)?;
                return Ok(());
            }
        };

        if !self.is_allocated(lba) {
            self.allocate_block(block)?;
        }

        let Some(sparse) = self.sparse.as_mut()
        else {
            return Ok(());
        };
        let block_offset = sparse.bat[block] as u64 * DEFAULT_SECTOR_SIZE as u64;
        let offset = block_offset + sparse.header.bitmap_len() + sector as u64 * DEFAULT_SECTOR_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;

        VhdImage::load_bitmap(&mut self.file, sparse, block)?;
        if let Some((_, bitmap)) = sparse.bitmap.as_mut() {
            if !bitmap_bit(bitmap, sector) {
                bitmap[sector / 8] |= 0x80 >> (sector % 8);
                let byte_offset = block_offset + (sector / 8) as u64;
                self.file.seek(SeekFrom::Start(byte_offset))?;
                self.file.write_all(&bitmap[sector / 8..sector / 8 + 1])?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MediaError> {
        self.file.flush()?;
        Ok(())
    }
}
