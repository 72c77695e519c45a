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

    src/config.rs

    Machine storage configuration: the drives a machine has, where they are
    attached, and the media they start with.
*/
use std::path::PathBuf;

use crate::{bus::BusAttachment, timing::RpmClass, DriveType, StaleChainPolicy};

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DriveConfig {
    pub drive_type: DriveType,
    pub attachment: Option<BusAttachment>,
    /// Image to load when the machine starts.
    pub image: Option<PathBuf>,
    pub write_protect: bool,
    pub turbo: bool,
    pub rpm_class: RpmClass,
    pub check_bpb: bool,
    pub stale_chain: StaleChainPolicy,
    pub allow_read_only_fallback: bool,
}

impl Default for DriveConfig {
    fn default() -> Self {
        DriveConfig {
            drive_type: DriveType::Floppy,
            attachment: None,
            image: None,
            write_protect: false,
            turbo: false,
            rpm_class: RpmClass::Perfect,
            check_bpb: true,
            stale_chain: StaleChainPolicy::Report,
            allow_read_only_fallback: false,
        }
    }
}

impl DriveConfig {
    pub fn new(drive_type: DriveType) -> Self {
        DriveConfig {
            drive_type,
            ..Default::default()
        }
    }

    pub fn with_attachment(mut self, attachment: BusAttachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn with_image(mut self, path: impl Into<PathBuf>, write_protect: bool) -> Self {
        self.image = Some(path.into());
        self.write_protect = write_protect;
        self
    }

    pub fn with_turbo(mut self, state: bool) -> Self {
        self.turbo = state;
        self
    }

    pub fn with_rpm_class(mut self, rpm_class: RpmClass) -> Self {
        self.rpm_class = rpm_class;
        self
    }

    pub fn with_check_bpb(mut self, state: bool) -> Self {
        self.check_bpb = state;
        self
    }

    pub fn with_stale_chain_policy(mut self, policy: StaleChainPolicy, allow_read_only_fallback: bool) -> Self {
        self.stale_chain = policy;
        self.allow_read_only_fallback = allow_read_only_fallback;
        self
    }
}

/// The storage devices of one machine, in slot order.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MachineStorageConfig {
    pub drives: Vec<DriveConfig>,
}

impl MachineStorageConfig {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_drive(mut self, drive: DriveConfig) -> Self {
        self.drives.push(drive);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BusType;

    #[test]
    fn builder_defaults() {
        let config = MachineStorageConfig::new()
            .with_drive(DriveConfig::new(DriveType::Floppy).with_attachment(BusAttachment::new(BusType::Floppy, 0, 0)))
            .with_drive(
                DriveConfig::new(DriveType::HardDisk)
                    .with_attachment(BusAttachment::new(BusType::Ide, 0, 0))
                    .with_image("c.vhd", false),
            );

        assert_eq!(config.drives.len(), 2);
        assert!(config.drives[0].check_bpb);
        assert_eq!(config.drives[0].stale_chain, StaleChainPolicy::Report);
        assert_eq!(config.drives[1].image, Some(PathBuf::from("c.vhd")));
    }
}
