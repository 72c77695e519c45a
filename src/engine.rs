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

    src/engine.rs

    The storage engine owns the media slots and bus attachments of one
    machine. The emulation thread calls it synchronously for sector I/O and
    drains the media request queue between instructions; a UI thread holds
    the sending end of that queue. Media changes are announced to
    controllers as MediaChangeEvents.
*/
use std::{
    fmt::{self, Display, Formatter},
    path::{Path, PathBuf},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::{
    bus::{BusAttachment, BusRegistry},
    config::MachineStorageConfig,
    diskimage::TrackData,
    file_parsers::vhd,
    image_builder::{ImageBuilder, SizeSpec},
    progress::ProgressCallback,
    slot::{MediaSlot, SectorResult},
    timing::RpmClass,
    ChainReport,
    DiskCh,
    DiskImage,
    DriveType,
    ImageFormat,
    MediaError,
    SectorAddress,
};

/// Index of a slot in a [`StorageEngine`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotId(pub usize);

impl Display for SlotId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A media change requested from outside the emulation thread.
#[derive(Clone, Debug, PartialEq)]
pub enum MediaRequest {
    Insert {
        slot: SlotId,
        path: PathBuf,
        write_protect: bool,
    },
    Eject {
        slot: SlotId,
    },
    SetTurbo {
        slot: SlotId,
        state: bool,
    },
    SetRpmClass {
        slot: SlotId,
        rpm_class: RpmClass,
    },
    SetCheckBpb {
        slot: SlotId,
        state: bool,
    },
    SetWriteProtect {
        slot: SlotId,
        state: bool,
    },
}

/// Notification that the media in a slot changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaChangeEvent {
    Inserted { slot: SlotId, path: PathBuf },
    Ejected { slot: SlotId, path: PathBuf },
    WriteProtectChanged { slot: SlotId, state: bool },
}

impl MediaChangeEvent {
    pub fn slot(&self) -> SlotId {
        match self {
            MediaChangeEvent::Inserted { slot, .. }
            | MediaChangeEvent::Ejected { slot, .. }
            | MediaChangeEvent::WriteProtectChanged { slot, .. } => *slot,
        }
    }
}

pub type ChangeCallback = Box<dyn FnMut(&MediaChangeEvent) + Send>;
pub type RequestReply = Receiver<Result<(), MediaError>>;

struct QueuedRequest {
    request: MediaRequest,
    reply: Option<Sender<Result<(), MediaError>>>,
}

/// The sending end of the media request queue, handed to the UI thread.
pub struct RequestSender {
    tx: Sender<QueuedRequest>,
}

impl RequestSender {
    /// Queue a request without waiting for its result.
    pub fn send(&self, request: MediaRequest) -> Result<(), MediaError> {
        self.enqueue(request, None)
    }

    /// Queue a request. The result is delivered on the returned channel once the engine has
    /// serviced it.
    pub fn send_with_reply(&self, request: MediaRequest) -> Result<RequestReply, MediaError> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.enqueue(request, Some(reply_tx))?;
        Ok(reply_rx)
    }

    fn enqueue(&self, request: MediaRequest, reply: Option<Sender<Result<(), MediaError>>>) -> Result<(), MediaError> {
        self.tx
            .send(QueuedRequest { request, reply })
            .map_err(|_| MediaError::UnsupportedOperation("the storage engine has shut down".to_string()))
    }
}

pub struct StorageEngine {
    slots: Vec<MediaSlot>,
    bus: BusRegistry,
    request_tx: Sender<QueuedRequest>,
    request_rx: Receiver<QueuedRequest>,
    subscribers: Vec<Sender<MediaChangeEvent>>,
    callback: Option<ChangeCallback>,
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    pub fn new() -> Self {
        let (request_tx, request_rx) = crossbeam_channel::unbounded();
        StorageEngine {
            slots: Vec::new(),
            bus: BusRegistry::new(),
            request_tx,
            request_rx,
            subscribers: Vec::new(),
            callback: None,
        }
    }

    /// Build an engine from a machine configuration: create the slots, attach them, apply their
    /// settings and load their initial media. Any failure aborts construction.
    pub fn from_config(config: &MachineStorageConfig) -> Result<Self, MediaError> {
        let mut engine = StorageEngine::new();
        for drive in &config.drives {
            let id = engine.add_slot(drive.drive_type, drive.attachment)?;
            let slot = engine.slot_mut(id)?;
            slot.set_turbo(drive.turbo);
            slot.set_rpm_class(drive.rpm_class);
            slot.set_check_bpb(drive.check_bpb);
            slot.set_stale_chain_policy(drive.stale_chain, drive.allow_read_only_fallback);

            if let Some(path) = &drive.image {
                engine.insert_image(id, path, drive.write_protect)?;
            }
        }
        log::debug!("StorageEngine::from_config(): Created {} slot(s)", engine.slots.len());
        Ok(engine)
    }

    /// Add a drive. Drives wired directly to the machine (cassette, cartridge) take no bus
    /// attachment.
    pub fn add_slot(&mut self, drive_type: DriveType, attachment: Option<BusAttachment>) -> Result<SlotId, MediaError> {
        let id = SlotId(self.slots.len());
        if let Some(attachment) = attachment {
            if !drive_type.needs_bus() {
                return Err(MediaError::UnsupportedOperation(format!(
                    "{} drives are not attached to a bus",
                    drive_type
                )));
            }
            self.bus.attach(id, drive_type, attachment)?;
        }
        self.slots.push(MediaSlot::new(drive_type));
        Ok(id)
    }

    pub fn slot_ct(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, id: SlotId) -> Result<&MediaSlot, MediaError> {
        self.slots.get(id.0).ok_or(MediaError::ParameterError)
    }

    fn slot_mut(&mut self, id: SlotId) -> Result<&mut MediaSlot, MediaError> {
        self.slots.get_mut(id.0).ok_or(MediaError::ParameterError)
    }

    pub fn bus(&self) -> &BusRegistry {
        &self.bus
    }

    /// Attach an existing slot to a bus, or move it.
    pub fn attach(&mut self, id: SlotId, attachment: BusAttachment) -> Result<(), MediaError> {
        let drive_type = self.slot(id)?.drive_type();
        self.bus.attach(id, drive_type, attachment)
    }

    /// Subscribe to media change events.
    pub fn subscribe(&mut self) -> Receiver<MediaChangeEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn set_change_callback(&mut self, callback: ChangeCallback) {
        self.callback = Some(callback);
    }

    fn notify(&mut self, event: MediaChangeEvent) {
        log::trace!("StorageEngine::notify(): {:?}", event);
        if let Some(callback) = &mut self.callback {
            callback(&event);
        }
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Return a sender for the media request queue.
    pub fn request_sender(&self) -> RequestSender {
        RequestSender {
            tx: self.request_tx.clone(),
        }
    }

    /// Apply all queued media requests in the order they were sent. Returns the number of
    /// requests serviced.
    pub fn service_requests(&mut self) -> usize {
        let mut serviced = 0;
        loop {
            let queued = match self.request_rx.try_recv() {
                Ok(queued) => queued,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };
            let result = self.apply(queued.request);
            if let Err(e) = &result {
                log::warn!("StorageEngine::service_requests(): Request failed: {}", e);
            }
            if let Some(reply) = queued.reply {
                // The requester may have stopped waiting.
                _ = reply.send(result);
            }
            serviced += 1;
        }
        serviced
    }

    pub fn apply(&mut self, request: MediaRequest) -> Result<(), MediaError> {
        match request {
            MediaRequest::Insert {
                slot,
                path,
                write_protect,
            } => self.insert_image(slot, path, write_protect),
            MediaRequest::Eject { slot } => self.eject(slot),
            MediaRequest::SetTurbo { slot, state } => self.set_turbo(slot, state),
            MediaRequest::SetRpmClass { slot, rpm_class } => self.set_rpm_class(slot, rpm_class),
            MediaRequest::SetCheckBpb { slot, state } => self.set_check_bpb(slot, state),
            MediaRequest::SetWriteProtect { slot, state } => self.set_write_protect(slot, state),
        }
    }

    /// Return a slot other than `except` whose media involves `path`: the slot has `path` loaded,
    /// `path` is a parent somewhere in the loaded image's chain, or the loaded image is a parent
    /// in the chain of `path`. Paths are compared in canonical form.
    fn slot_using(&self, path: &Path, except: Option<SlotId>) -> Option<SlotId> {
        let target = canonical(path);
        let target_chain = chain_members(path);
        self.slots.iter().enumerate().find_map(|(i, slot)| {
            if except == Some(SlotId(i)) {
                return None;
            }
            let loaded = slot.path()?;
            let loaded_top = canonical(loaded);
            let conflict = loaded_top == target
                || target_chain.contains(&loaded_top)
                || chain_members(loaded).contains(&target);
            conflict.then_some(SlotId(i))
        })
    }

    pub fn insert_image(&mut self, id: SlotId, path: impl AsRef<Path>, write_protect: bool) -> Result<(), MediaError> {
        let path = path.as_ref();
        self.slot(id)?;
        if let Some(owner) = self.slot_using(path, Some(id)) {
            log::error!(
                "StorageEngine::insert_image(): {} is in use by the media in slot {}",
                path.display(),
                owner
            );
            return Err(MediaError::ImageInUse(path.to_path_buf()));
        }

        self.eject(id)?;
        self.slot_mut(id)?.insert(path, write_protect)?;
        self.notify(MediaChangeEvent::Inserted {
            slot: id,
            path: path.to_path_buf(),
        });
        Ok(())
    }

    /// Flush and unload the media in a slot. The slot is empty afterwards even if the final
    /// flush failed.
    pub fn eject(&mut self, id: SlotId) -> Result<(), MediaError> {
        let slot = self.slot_mut(id)?;
        let Some(path) = slot.path().map(Path::to_path_buf)
        else {
            return Ok(());
        };
        let result = slot.eject();
        self.notify(MediaChangeEvent::Ejected { slot: id, path });
        result.map(|_| ())
    }

    pub fn set_turbo(&mut self, id: SlotId, state: bool) -> Result<(), MediaError> {
        self.slot_mut(id)?.set_turbo(state);
        Ok(())
    }

    pub fn set_rpm_class(&mut self, id: SlotId, rpm_class: RpmClass) -> Result<(), MediaError> {
        self.slot_mut(id)?.set_rpm_class(rpm_class);
        Ok(())
    }

    /// Takes effect on the next insert.
    pub fn set_check_bpb(&mut self, id: SlotId, state: bool) -> Result<(), MediaError> {
        self.slot_mut(id)?.set_check_bpb(state);
        Ok(())
    }

    pub fn set_write_protect(&mut self, id: SlotId, state: bool) -> Result<(), MediaError> {
        let slot = self.slot_mut(id)?;
        let before = slot.is_write_protected();
        slot.set_write_protect(state);
        let after = slot.is_write_protected();
        if before != after {
            self.notify(MediaChangeEvent::WriteProtectChanged { slot: id, state: after });
        }
        Ok(())
    }

    pub fn is_write_protected(&self, id: SlotId) -> Result<bool, MediaError> {
        Ok(self.slot(id)?.is_write_protected())
    }

    pub fn read_sector(&mut self, id: SlotId, address: impl Into<SectorAddress>) -> Result<SectorResult, MediaError> {
        self.slot_mut(id)?.read_sector(address.into())
    }

    /// Write a sector, returning the expected completion delay.
    pub fn write_sector(
        &mut self,
        id: SlotId,
        address: impl Into<SectorAddress>,
        data: &[u8],
    ) -> Result<Duration, MediaError> {
        self.slot_mut(id)?.write_sector(address.into(), data)
    }

    pub fn read_track(&mut self, id: SlotId, c: u16, h: u8) -> Result<(TrackData, Duration), MediaError> {
        self.slot_mut(id)?.read_track(DiskCh::new(c, h))
    }

    /// Return (cylinders, heads, sectors per track, sector size) of the media in a slot.
    pub fn geometry(&self, id: SlotId) -> Result<(u32, u32, u32, usize), MediaError> {
        Ok(self.slot(id)?.geometry()?.get())
    }

    /// Create a new image. The target must not be loaded in any slot.
    pub fn create_image(
        &self,
        path: impl AsRef<Path>,
        format: ImageFormat,
        size: SizeSpec,
        options: ImageBuilder,
    ) -> Result<DiskImage, MediaError> {
        let path = path.as_ref();
        if self.slot_using(path, None).is_some() {
            return Err(MediaError::ImageInUse(path.to_path_buf()));
        }
        options.with_format(format).with_size(size).build(path)
    }

    pub fn validate_chain(&self, path: impl AsRef<Path>) -> Result<ChainReport, MediaError> {
        vhd::validate_chain(path)
    }

    /// Repair the recorded parent timestamps of a differencing chain. None of the images in the
    /// chain may be loaded.
    pub fn repair_chain(
        &self,
        path: impl AsRef<Path>,
        progress: Option<ProgressCallback>,
    ) -> Result<ChainReport, MediaError> {
        let path = path.as_ref();
        let report = vhd::validate_chain(path)?;
        if let Some(busy) = report.chain.iter().find(|p| self.slot_using(p, None).is_some()) {
            return Err(MediaError::ImageInUse(busy.clone()));
        }
        vhd::repair_chain(path, progress)
    }

    /// Flush every loaded image.
    pub fn flush_all(&mut self) -> Result<(), MediaError> {
        for slot in &mut self.slots {
            slot.flush()?;
        }
        Ok(())
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// The canonical paths of the parents `path` depends on, nearest first. Images that are not
/// differencing VHDs, and chains that can't be walked, have none.
fn chain_members(path: &Path) -> Vec<PathBuf> {
    let is_vhd = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| vhd::VhdFormat::extensions().contains(&ext.to_ascii_lowercase().as_str()));
    if !is_vhd {
        return Vec::new();
    }
    match vhd::validate_chain(path) {
        Ok(report) => report.chain.iter().skip(1).map(|p| canonical(p)).collect(),
        Err(_) => Vec::new(),
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if let Err(e) = slot.eject() {
                log::error!("StorageEngine::drop(): Flushing slot {} failed: {}", i, e);
            }
        }
    }
}
