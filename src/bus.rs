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

    src/bus.rs

    The registry of controller bus attachments. Each drive slot that sits on
    a bus is bound to a unique (bus, controller, channel) tuple. IDE and
    ATAPI devices share the same controller and channel space.
*/
use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
};

use crate::{engine::SlotId, BusType, DriveType, MediaError};

/// SCSI ID occupied by the host adapter.
pub const SCSI_HOST_ID: u8 = 7;

/// Where a drive is attached: bus type, controller index and channel (or SCSI ID).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BusAttachment {
    pub bus: BusType,
    pub controller: u8,
    pub channel: u8,
}

impl BusAttachment {
    pub fn new(bus: BusType, controller: u8, channel: u8) -> Self {
        BusAttachment {
            bus,
            controller,
            channel,
        }
    }

    /// The key attachments conflict on. ATAPI devices live on IDE channels.
    fn key(&self) -> (BusType, u8, u8) {
        let bus = match self.bus {
            BusType::Atapi => BusType::Ide,
            other => other,
        };
        (bus, self.controller, self.channel)
    }
}

impl Display for BusAttachment {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{} controller {} channel {}", self.bus, self.controller, self.channel)
    }
}

/// Return (controllers, channels per controller) for a bus, or `None` for buses no drive can be
/// attached to.
pub fn bus_capacity(bus: BusType) -> Option<(u8, u8)> {
    match bus {
        BusType::Floppy => Some((1, 4)),
        BusType::MfmRll | BusType::Xta | BusType::Esdi => Some((1, 2)),
        BusType::Ide | BusType::Atapi => Some((4, 2)),
        BusType::Scsi => Some((4, 16)),
        BusType::Usb => None,
    }
}

/// Return true if a drive of type `drive` can ever be attached to `bus`.
pub fn bus_supports_drive(bus: BusType, drive: DriveType) -> bool {
    match bus {
        BusType::Floppy => drive == DriveType::Floppy,
        BusType::MfmRll | BusType::Xta | BusType::Esdi | BusType::Ide => drive == DriveType::HardDisk,
        BusType::Atapi => matches!(drive, DriveType::CdRom | DriveType::Zip | DriveType::MagnetoOptical),
        BusType::Scsi => matches!(
            drive,
            DriveType::HardDisk | DriveType::CdRom | DriveType::Zip | DriveType::MagnetoOptical
        ),
        BusType::Usb => false,
    }
}

#[derive(Debug, Default)]
pub struct BusRegistry {
    bindings: HashMap<(BusType, u8, u8), (SlotId, BusAttachment)>,
}

impl BusRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Bind `slot`, a drive of type `drive`, to `attachment`.
    ///
    /// Unsupported bus and drive combinations are rejected before capacity is considered. An
    /// attachment already bound to another slot is a conflict, and the existing binding is left
    /// unchanged. A slot that is already attached elsewhere is moved.
    pub fn attach(&mut self, slot: SlotId, drive: DriveType, attachment: BusAttachment) -> Result<(), MediaError> {
        if !bus_supports_drive(attachment.bus, drive) {
            log::error!("BusRegistry::attach(): {} drive cannot be attached to {}", drive, attachment.bus);
            return Err(MediaError::UnsupportedOperation(format!(
                "a {} drive cannot be attached to a {} bus",
                drive, attachment.bus
            )));
        }

        let Some((controllers, channels)) = bus_capacity(attachment.bus)
        else {
            return Err(MediaError::UnsupportedOperation(format!(
                "{} is not supported",
                attachment.bus
            )));
        };
        if attachment.controller >= controllers || attachment.channel >= channels {
            log::error!(
                "BusRegistry::attach(): {} exceeds capacity of {} controller(s) x {} channel(s)",
                attachment,
                controllers,
                channels
            );
            return Err(MediaError::BusCapacityExceeded(format!(
                "{} exceeds {} controller(s) x {} channel(s)",
                attachment, controllers, channels
            )));
        }
        if attachment.bus == BusType::Scsi && attachment.channel == SCSI_HOST_ID {
            return Err(MediaError::AttachmentConflict(format!(
                "SCSI ID {} is reserved for the host adapter",
                SCSI_HOST_ID
            )));
        }

        if let Some((owner, existing)) = self.bindings.get(&attachment.key()) {
            if *owner != slot {
                log::error!("BusRegistry::attach(): {} is already bound to slot {}", existing, owner);
                return Err(MediaError::AttachmentConflict(format!(
                    "{} is already bound to slot {}",
                    existing, owner
                )));
            }
        }

        self.detach(slot);
        self.bindings.insert(attachment.key(), (slot, attachment));
        log::debug!("BusRegistry::attach(): Slot {} attached at {}", slot, attachment);
        Ok(())
    }

    /// Remove the attachment of `slot`, returning it if there was one.
    pub fn detach(&mut self, slot: SlotId) -> Option<BusAttachment> {
        let key = self
            .bindings
            .iter()
            .find(|(_, (owner, _))| *owner == slot)
            .map(|(key, _)| *key)?;
        self.bindings.remove(&key).map(|(_, attachment)| attachment)
    }

    /// Return the slot bound at `attachment`.
    pub fn lookup(&self, attachment: BusAttachment) -> Option<SlotId> {
        self.bindings.get(&attachment.key()).map(|(slot, _)| *slot)
    }

    pub fn attachment_of(&self, slot: SlotId) -> Option<BusAttachment> {
        self.bindings
            .values()
            .find(|(owner, _)| *owner == slot)
            .map(|(_, attachment)| *attachment)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_binding_conflicts() {
        let mut registry = BusRegistry::new();
        let ide = BusAttachment::new(BusType::Ide, 2, 1);
        registry.attach(SlotId(0), DriveType::HardDisk, ide).unwrap();
        assert!(matches!(
            registry.attach(SlotId(1), DriveType::HardDisk, ide),
            Err(MediaError::AttachmentConflict(_))
        ));
        assert_eq!(registry.lookup(ide), Some(SlotId(0)));
    }

    #[test]
    fn atapi_shares_ide_channels() {
        let mut registry = BusRegistry::new();
        registry
            .attach(SlotId(0), DriveType::HardDisk, BusAttachment::new(BusType::Ide, 0, 0))
            .unwrap();
        assert!(matches!(
            registry.attach(SlotId(1), DriveType::CdRom, BusAttachment::new(BusType::Atapi, 0, 0)),
            Err(MediaError::AttachmentConflict(_))
        ));
        registry
            .attach(SlotId(1), DriveType::CdRom, BusAttachment::new(BusType::Atapi, 0, 1))
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn capacity_limits() {
        let mut registry = BusRegistry::new();
        assert!(matches!(
            registry.attach(SlotId(0), DriveType::HardDisk, BusAttachment::new(BusType::Ide, 4, 0)),
            Err(MediaError::BusCapacityExceeded(_))
        ));
        assert!(matches!(
            registry.attach(SlotId(0), DriveType::Floppy, BusAttachment::new(BusType::Floppy, 0, 4)),
            Err(MediaError::BusCapacityExceeded(_))
        ));
        assert!(matches!(
            registry.attach(SlotId(0), DriveType::HardDisk, BusAttachment::new(BusType::Scsi, 0, 7)),
            Err(MediaError::AttachmentConflict(_))
        ));
        registry
            .attach(SlotId(0), DriveType::HardDisk, BusAttachment::new(BusType::Scsi, 3, 15))
            .unwrap();
    }

    #[test]
    fn unsupported_combinations_ignore_capacity() {
        let mut registry = BusRegistry::new();
        for attachment in [
            BusAttachment::new(BusType::Esdi, 9, 9),
            BusAttachment::new(BusType::Ide, 0, 0),
            BusAttachment::new(BusType::Usb, 0, 0),
        ] {
            assert!(matches!(
                registry.attach(SlotId(0), DriveType::Floppy, attachment),
                Err(MediaError::UnsupportedOperation(_))
            ));
        }
        assert!(matches!(
            registry.attach(SlotId(0), DriveType::HardDisk, BusAttachment::new(BusType::Floppy, 0, 0)),
            Err(MediaError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn reattach_moves_slot() {
        let mut registry = BusRegistry::new();
        let first = BusAttachment::new(BusType::Floppy, 0, 0);
        let second = BusAttachment::new(BusType::Floppy, 0, 1);
        registry.attach(SlotId(0), DriveType::Floppy, first).unwrap();
        registry.attach(SlotId(0), DriveType::Floppy, second).unwrap();
        assert_eq!(registry.lookup(first), None);
        assert_eq!(registry.attachment_of(SlotId(0)), Some(second));
        assert_eq!(registry.detach(SlotId(0)), Some(second));
        assert!(registry.is_empty());
    }
}
