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

    src/file_parsers/vhd/chain.rs

    Validation and repair of differencing image chains.

    A differencing image records the modification time of its parent at the
    moment the child was created. If the parent is modified afterwards, the
    sectors the child did not override no longer match what the child was
    created against, and the chain must be either explicitly accepted or
    repaired before use.
*/
use std::{
    collections::HashSet,
    fmt::{self, Display, Formatter},
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use crate::{
    file_parsers::vhd::{
        footer::{VhdDiskType, VhdFooter},
        sparse::{locator_to_host_path, read_locator, SparseHeader},
    },
    progress::{ProgressCallback, ProgressReporter},
    util::{file_modified, set_file_modified, to_y2k_seconds},
    MediaError,
};

/// Differencing chains deeper than this are assumed to be cyclic.
pub const MAX_CHAIN_DEPTH: usize = 64;

/// How to proceed when a differencing image's parent has changed since the child was created.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StaleChainPolicy {
    /// Refuse to open the image and return the chain report.
    #[default]
    Report,
    /// Open the chain as-is. The differencing image is opened write protected.
    Continue,
    /// Rewrite the recorded timestamps so the chain is consistent again, then open it.
    Repair,
}

/// A parent link whose recorded timestamp does not match the parent file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaleLink {
    pub child: PathBuf,
    pub parent: PathBuf,
    /// Parent timestamp stored in the child, in seconds since 2000-01-01.
    pub recorded: u32,
    /// Current parent modification time, in seconds since 2000-01-01.
    pub actual: u32,
}

/// The result of walking a differencing chain from a child to its root image.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainReport {
    /// The image the chain was walked from.
    pub image: PathBuf,
    /// Every image in the chain, child first, root last.
    pub chain: Vec<PathBuf>,
    pub stale: Vec<StaleLink>,
}

impl ChainReport {
    pub fn is_consistent(&self) -> bool {
        self.stale.is_empty()
    }
}

impl Display for ChainReport {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}: chain of {} image(s)", self.image.display(), self.chain.len())?;
        for link in &self.stale {
            write!(
                f,
                "\n  {} records parent {} at {} but it was modified at {}",
                link.child.display(),
                link.parent.display(),
                link.recorded,
                link.actual
            )?;
        }
        Ok(())
    }
}

/// Read the footer and, for dynamic and differencing images, the sparse header of a VHD.
pub(crate) fn read_headers(file: &mut File) -> Result<(VhdFooter, Option<SparseHeader>), MediaError> {
    let footer = VhdFooter::read_from(file)?;
    let sparse = match footer.disk_type()? {
        VhdDiskType::Fixed => None,
        _ => Some(SparseHeader::read_at(file, footer.data_offset)?),
    };
    Ok((footer, sparse))
}

/// Find the parent of a differencing image: the absolute locator, then the relative locator
/// (against the child's directory), then the stored parent name beside the child.
pub(crate) fn resolve_parent(child: &Path, file: &mut File, header: &SparseHeader) -> Result<PathBuf, MediaError> {
    let child_dir = child.parent().unwrap_or_else(|| Path::new(""));
    let mut candidates: Vec<PathBuf> = Vec::new();

    for locator in header.locators() {
        match read_locator(file, locator) {
            Ok(text) if !text.is_empty() => {
                let path = locator_to_host_path(&text);
                if path.is_absolute() {
                    candidates.push(path);
                }
                else {
                    candidates.push(child_dir.join(path));
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("resolve_parent(): Unreadable parent locator: {}", e),
        }
    }
    if let Some(name) = header.parent_name() {
        if let Some(file_name) = Path::new(&name).file_name() {
            candidates.push(child_dir.join(file_name));
        }
    }

    for candidate in &candidates {
        if candidate.is_file() {
            log::trace!("resolve_parent(): Parent of {} is {}", child.display(), candidate.display());
            return Ok(candidate.clone());
        }
    }

    let missing = candidates.into_iter().next().unwrap_or_else(|| child.to_path_buf());
    log::error!("resolve_parent(): Parent of {} not found", child.display());
    Err(MediaError::unreadable(
        missing,
        std::io::Error::new(std::io::ErrorKind::NotFound, "parent image not found"),
    ))
}

/// Walk the chain from `path` to its root, checking every parent link.
///
/// A missing parent is an IO error and a parent whose UUID does not match the one recorded by
/// its child is a format error. Timestamp mismatches are collected in the returned report.
pub fn validate_chain(path: impl AsRef<Path>) -> Result<ChainReport, MediaError> {
    let path = path.as_ref();
    let mut report = ChainReport {
        image: path.to_path_buf(),
        ..Default::default()
    };
    let mut visited = HashSet::new();
    let mut current = path.to_path_buf();

    loop {
        if !visited.insert(current.canonicalize().unwrap_or_else(|_| current.clone()))
            || report.chain.len() >= MAX_CHAIN_DEPTH
        {
            log::error!("validate_chain(): Chain from {} loops", path.display());
            return Err(MediaError::malformed("differencing chain loops back on itself"));
        }
        report.chain.push(current.clone());

        let mut file = File::open(&current).map_err(|e| MediaError::unreadable(&current, e))?;
        let (footer, sparse) = read_headers(&mut file)?;

        let header = match (footer.disk_type()?, sparse) {
            (VhdDiskType::Differencing, Some(header)) => header,
            _ => break,
        };

        let parent = resolve_parent(&current, &mut file, &header)?;
        let mut parent_file = File::open(&parent).map_err(|e| MediaError::unreadable(&parent, e))?;
        let parent_footer = VhdFooter::read_from(&mut parent_file)?;

        if parent_footer.uuid != header.parent_uuid {
            log::error!(
                "validate_chain(): {} does not have the UUID recorded by {}",
                parent.display(),
                current.display()
            );
            return Err(MediaError::malformed(format!(
                "parent {} UUID does not match the differencing image",
                parent.display()
            )));
        }

        let actual = to_y2k_seconds(file_modified(&parent)?);
        if actual != header.parent_timestamp {
            log::warn!(
                "validate_chain(): {} records parent timestamp {} but {} was modified at {}",
                current.display(),
                header.parent_timestamp,
                parent.display(),
                actual
            );
            report.stale.push(StaleLink {
                child: current.clone(),
                parent: parent.clone(),
                recorded: header.parent_timestamp,
                actual,
            });
        }

        current = parent;
    }

    Ok(report)
}

/// Rewrite the recorded parent timestamp of every stale link in the chain from `path`, so that a
/// following [`validate_chain`] reports the chain as consistent. Returns the report of what was
/// repaired.
///
/// Repairing a link modifies the child image, which may itself be the parent of the next link
/// toward `path`; its modification time is restored afterwards so that link is not broken.
pub fn repair_chain(path: impl AsRef<Path>, progress: Option<ProgressCallback>) -> Result<ChainReport, MediaError> {
    let path = path.as_ref();
    let report = validate_chain(path)?;
    let mut reporter = ProgressReporter::new(progress, report.stale.len() as u64);

    for link in &report.stale {
        repair_link(link).map_err(|e| {
            log::error!("repair_chain(): Failed to repair {}: {}", link.child.display(), e);
            MediaError::RepairFailed(format!("{}: {}", link.child.display(), e))
        })?;
        reporter.step();
    }

    let after = validate_chain(path)?;
    if !after.is_consistent() {
        return Err(MediaError::RepairFailed(format!(
            "{} link(s) remain stale after repair",
            after.stale.len()
        )));
    }

    reporter.complete();
    Ok(report)
}

fn repair_link(link: &StaleLink) -> Result<(), MediaError> {
    let child_modified = file_modified(&link.child)?;
    let actual = to_y2k_seconds(file_modified(&link.parent)?);

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&link.child)
        .map_err(|e| MediaError::unwritable(&link.child, e))?;

    let footer = VhdFooter::read_from(&mut file)?;
    let mut header = SparseHeader::read_at(&mut file, footer.data_offset)?;
    header.parent_timestamp = actual;
    header.update_checksum()?;
    header.write_at(&mut file, footer.data_offset)?;
    file.sync_all()?;

    set_file_modified(&file, child_modified)?;
    log::debug!(
        "repair_link(): {} now records parent timestamp {}",
        link.child.display(),
        actual
    );
    Ok(())
}
