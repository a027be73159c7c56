//! Portable content-overwrite fallback, used when the cluster-level
//! engine is unavailable (non-admin on Windows, or any POSIX target).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tracing::instrument;

use crate::error::{classify_io_error, WipeError, WipeResult};
use crate::fs_ops::getsize;

const FALLBACK_BLOCK: usize = 4 * 1024;

/// Overwrites exactly `getsize(path)` bytes of `path` with zeros, flushes,
/// and optionally truncates to zero length.
///
/// A symlink whose target no longer exists has nothing to overwrite;
/// callers are expected to swallow [`WipeError::BrokenSymlink`] and unlink
/// the link itself instead.
#[instrument(fields(path = %path.display()))]
pub fn wipe_contents(path: &Path, truncate: bool) -> WipeResult<u64> {
    if let Ok(meta) = std::fs::symlink_metadata(path) {
        if meta.file_type().is_symlink() && std::fs::metadata(path).is_err() {
            return Err(WipeError::broken_symlink(path.to_string_lossy().to_string()));
        }
    }

    let size = getsize(path)?;

    let mut file = match OpenOptions::new().write(true).open(path) {
        Ok(f) => f,
        Err(_) => {
            strip_read_only(path)?;
            OpenOptions::new()
                .write(true)
                .open(path)
                .map_err(|e| classify_io_error(&path.to_string_lossy(), e))?
        }
    };

    let zeros = vec![0u8; FALLBACK_BLOCK];
    let mut written = 0u64;
    while written < size {
        let chunk = (size - written).min(FALLBACK_BLOCK as u64) as usize;
        file.write_all(&zeros[..chunk])
            .map_err(|e| classify_io_error(&path.to_string_lossy(), e))?;
        written += chunk as u64;
    }
    file.flush().map_err(|e| classify_io_error(&path.to_string_lossy(), e))?;
    file.sync_all().map_err(|e| classify_io_error(&path.to_string_lossy(), e))?;

    if truncate {
        file.set_len(0).map_err(|e| classify_io_error(&path.to_string_lossy(), e))?;
    }
    Ok(written)
}

fn strip_read_only(path: &Path) -> WipeResult<()> {
    let mut perms = std::fs::metadata(path)
        .map_err(|e| classify_io_error(&path.to_string_lossy(), e))?
        .permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
    std::fs::set_permissions(path, perms).map_err(|e| classify_io_error(&path.to_string_lossy(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrites_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, vec![0xAAu8; 10_000]).unwrap();

        let written = wipe_contents(&path, true).unwrap();
        assert_eq!(written, 10_000);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    #[cfg(unix)]
    fn broken_symlink_reports_dedicated_error() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("dangling");
        std::os::unix::fs::symlink(dir.path().join("gone"), &link).unwrap();

        let err = wipe_contents(&link, false).unwrap_err();
        assert!(matches!(err, WipeError::BrokenSymlink { .. }));
    }

    #[test]
    fn leaves_size_unchanged_without_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, vec![0x11u8; 5_000]).unwrap();

        wipe_contents(&path, false).unwrap();
        let content = std::fs::read(&path).unwrap();
        assert_eq!(content.len(), 5_000);
        assert!(content.iter().all(|&b| b == 0));
    }
}
