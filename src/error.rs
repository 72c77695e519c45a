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

    src/error.rs

    The error type returned by every fallible mediabay operation, and the
    broad classes errors fall into for presentation to the user.
*/
use std::{
    fmt::{self, Display, Formatter},
    path::PathBuf,
};

use thiserror::Error;

use crate::file_parsers::vhd::ChainReport;

/// The broad class of a [`MediaError`].
///
/// IO and Format errors abort the requested operation and are meant to be shown to the user
/// verbatim. Consistency errors raised when opening a differencing VHD may be resolved by an
/// explicit user decision. Capacity errors raised at image creation are always detected before
/// anything is written.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Io,
    Format,
    Capacity,
    Consistency,
    UnsupportedOperation,
}

impl Display for ErrorClass {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ErrorClass::Io => write!(f, "IO error"),
            ErrorClass::Format => write!(f, "Format error"),
            ErrorClass::Capacity => write!(f, "Capacity error"),
            ErrorClass::Consistency => write!(f, "Consistency error"),
            ErrorClass::UnsupportedOperation => write!(f, "Unsupported operation"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Unable to read image file {}: {source}", .path.display())]
    UnreadableFile {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unable to write to {}: {reason}", .path.display())]
    UnwritableTarget { path: PathBuf, reason: String },
    #[error("The media is write protected")]
    WriteProtected,
    #[error("An IO error occurred reading or writing the disk image: {0}")]
    Io(#[from] std::io::Error),
    #[error("The image header is malformed: {0}")]
    MalformedHeader(String),
    #[error("Unsupported sector size: {0} bytes")]
    UnsupportedSectorSize(usize),
    #[error("Unknown disk image format")]
    UnknownFormat,
    #[error("Unsupported disk image format for requested operation")]
    UnsupportedFormat,
    #[error("A CRC error was detected in the disk image")]
    CrcError,
    #[error("The requested sector could not be found: {0}")]
    SectorNotFound(String),
    #[error("Requested image size of {requested} bytes exceeds the maximum of {limit} bytes")]
    SizeExceeded { requested: u64, limit: u64 },
    #[error("Bus capacity exceeded: {0}")]
    BusCapacityExceeded(String),
    #[error("Differencing image {} records a stale timestamp for {} parent(s)", .0.image.display(), .0.stale.len())]
    StaleParentTimestamp(Box<ChainReport>),
    #[error("Attachment conflict: {0}")]
    AttachmentConflict(String),
    #[error("Unable to repair differencing chain: {0}")]
    RepairFailed(String),
    #[error("Image {} is already loaded in another drive", .0.display())]
    ImageInUse(PathBuf),
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("No media is loaded in the drive")]
    EmptySlot,
    #[error("Invalid parameters were specified to a library function")]
    ParameterError,
}

impl MediaError {
    pub fn class(&self) -> ErrorClass {
        use MediaError::*;
        match self {
            UnreadableFile { .. } | UnwritableTarget { .. } | WriteProtected | Io(_) => ErrorClass::Io,
            MalformedHeader(_)
            | UnsupportedSectorSize(_)
            | UnknownFormat
            | UnsupportedFormat
            | CrcError
            | SectorNotFound(_) => ErrorClass::Format,
            SizeExceeded { .. } | BusCapacityExceeded(_) => ErrorClass::Capacity,
            StaleParentTimestamp(_) | AttachmentConflict(_) | RepairFailed(_) | ImageInUse(_) => {
                ErrorClass::Consistency
            }
            UnsupportedOperation(_) | EmptySlot | ParameterError => ErrorClass::UnsupportedOperation,
        }
    }

    pub(crate) fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MediaError::UnreadableFile {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn unwritable(path: impl Into<PathBuf>, reason: impl Display) -> Self {
        MediaError::UnwritableTarget {
            path:   path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        MediaError::MalformedHeader(reason.into())
    }
}

impl From<binrw::Error> for MediaError {
    fn from(err: binrw::Error) -> Self {
        match err {
            binrw::Error::Io(e) => MediaError::Io(e),
            other => MediaError::MalformedHeader(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_taxonomy() {
        assert_eq!(MediaError::WriteProtected.class(), ErrorClass::Io);
        assert_eq!(MediaError::UnsupportedSectorSize(1024).class(), ErrorClass::Format);
        assert_eq!(
            MediaError::SizeExceeded {
                requested: 2,
                limit:     1,
            }
            .class(),
            ErrorClass::Capacity
        );
        assert_eq!(
            MediaError::AttachmentConflict("ide".into()).class(),
            ErrorClass::Consistency
        );
        assert_eq!(
            MediaError::UnsupportedOperation("usb".into()).class(),
            ErrorClass::UnsupportedOperation
        );
    }

    #[test]
    fn binrw_io_errors_stay_io() {
        let err: MediaError = binrw::Error::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)).into();
        assert!(matches!(err, MediaError::Io(_)));

        let err: MediaError = binrw::Error::AssertFail {
            pos:     0,
            message: "bad".into(),
        }
        .into();
        assert!(matches!(err, MediaError::MalformedHeader(_)));
    }
}
