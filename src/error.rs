//! Typed errors for the cluster-wipe engine.
//!
//! `ConcurrentAllocation` is deliberately absent: a cluster getting stolen by
//! another process mid-wipe is not a failure, it is handled in-band by
//! recursive subdivision in `engine::defrag`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WipeError {
    #[error("filesystem on {path} is not supported for cluster-level wiping: {reason}")]
    UnsupportedFilesystem { path: String, reason: String },

    #[error("access denied on {path}: {source}")]
    AccessDenied {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("{path} is locked by another process")]
    Locked { path: String },

    #[error("{path} is a broken symlink")]
    BrokenSymlink { path: String },

    #[error("no space left while wiping {path}")]
    SpaceExhausted { path: String },

    #[error("out of file handles")]
    OutOfFileHandles,

    #[error("IOCTL buffer too small for {path} after escalation to {last_tried} bytes")]
    BufferTooSmall { path: String, last_tried: usize },

    #[error("path {path} is on the configured whitelist")]
    Whitelisted { path: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type WipeResult<T> = Result<T, WipeError>;

impl WipeError {
    /// True when the caller should fall back to the portable
    /// `content_wipe`/`name_wipe` path rather than aborting outright.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            WipeError::Locked { .. } | WipeError::AccessDenied { .. }
        )
    }

    pub fn broken_symlink(path: impl Into<String>) -> Self {
        WipeError::BrokenSymlink { path: path.into() }
    }
}

/// Classifies a raw `io::Error` encountered mid-wipe into the handling the
/// driver should apply, mirroring the winerror/errno dispatch in the
/// original wipe routines (locked handle, broken link, disk full).
pub fn classify_io_error(path: &str, err: std::io::Error) -> WipeError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::NotFound => WipeError::PathNotFound(path.to_string()),
        ErrorKind::PermissionDenied => WipeError::AccessDenied {
            path: path.to_string(),
            source: err,
        },
        _ => {
            #[cfg(unix)]
            {
                if err.raw_os_error() == Some(libc::ENOSPC) || err.raw_os_error() == Some(libc::EFBIG)
                {
                    return WipeError::SpaceExhausted {
                        path: path.to_string(),
                    };
                }
                if err.raw_os_error() == Some(libc::EMFILE) {
                    return WipeError::OutOfFileHandles;
                }
            }
            WipeError::Io(err)
        }
    }
}
