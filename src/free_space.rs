//! Free-space filler: overwrites a partition's unallocated clusters with
//! zeros by growing temporary files until the filesystem runs out of
//! room, so data left behind by earlier deletions cannot be recovered.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, instrument, warn};

use crate::error::{classify_io_error, WipeError, WipeResult};
use crate::fs_ops::free_space;

/// FAT32's maximum file size is 4 GiB minus one sector's worth of slack.
pub const FAT32_MAX_FILE_SIZE: u64 = 4 * 1024 * 1024 * 1024 - 65536;

const FREE_FILL_BLOCK: usize = 64 * 1024;
const MAX_SUFFIX_LEN: usize = 185;
const MIN_SUFFIX_LEN: usize = 5;
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct FillProgress {
    pub phase: u32,
    pub done_fraction: f64,
    pub eta_seconds: Option<u64>,
}

fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

struct TempFileGuard {
    path: PathBuf,
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        // Truncating first (File::create reopens with O_TRUNC) releases
        // the clusters back to the filesystem without requiring the
        // original write handle to still be open.
        let _ = std::fs::File::create(&self.path);
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove free-space temp file");
            }
        }
    }
}

fn create_unique_temp(dir: &Path) -> WipeResult<(File, TempFileGuard)> {
    let mut suffix_len = MAX_SUFFIX_LEN;
    loop {
        let name = format!(".clustershred-fill-{}", random_suffix(suffix_len));
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, TempFileGuard { path })),
            Err(e) => {
                let retryable = matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::InvalidInput
                ) || e.raw_os_error() == Some(libc_enametoolong());
                if retryable && suffix_len > MIN_SUFFIX_LEN {
                    suffix_len = (suffix_len.saturating_sub(5)).max(MIN_SUFFIX_LEN);
                    continue;
                }
                return Err(classify_io_error(&path.to_string_lossy(), e));
            }
        }
    }
}

#[cfg(unix)]
fn libc_enametoolong() -> i32 {
    libc::ENAMETOOLONG
}
#[cfg(not(unix))]
fn libc_enametoolong() -> i32 {
    -1
}

fn is_fat32(dir: &Path) -> bool {
    #[cfg(windows)]
    {
        crate::engine::volume::platform_volume_io()
            .volume_info(&dir.to_string_lossy())
            .map(|i| i.file_system.is_fat32())
            .unwrap_or(false)
    }
    #[cfg(not(windows))]
    {
        let _ = dir;
        false
    }
}

/// Overwrites all free clusters under `dir`'s partition with zeros,
/// calling `on_progress` no more often than every two seconds of wall
/// time. Returns the total number of bytes written.
#[instrument(skip(on_progress), fields(dir = %dir.display()))]
pub fn wipe_path(dir: &Path, mut on_progress: impl FnMut(FillProgress)) -> WipeResult<u64> {
    let start_free = free_space(dir)?;
    let start = Instant::now();
    let mut last_report = Instant::now() - PROGRESS_INTERVAL;
    let fat32 = is_fat32(dir);

    let mut total_written = 0u64;
    let mut block_size = FREE_FILL_BLOCK;
    // All temporaries stay open (and undeleted) for the whole run — an
    // early delete would return its clusters to the free pool and the
    // next file would just recycle them, never reaching the rest of the
    // partition's free space.
    let mut temps: Vec<TempFileGuard> = Vec::new();

    'files: loop {
        let (mut file, guard) = match create_unique_temp(dir) {
            Ok(v) => v,
            Err(WipeError::OutOfFileHandles) => break 'files,
            Err(e) => {
                drop(temps);
                return Err(e);
            }
        };
        temps.push(guard);

        let mut file_len = 0u64;
        let zeros = vec![0u8; block_size];

        loop {
            if fat32 && file_len + block_size as u64 > FAT32_MAX_FILE_SIZE {
                break; // rotate to a new file
            }
            match file.write_all(&zeros[..block_size]) {
                Ok(()) => {
                    file_len += block_size as u64;
                    total_written += block_size as u64;
                }
                Err(e) if e.raw_os_error() == Some(enospc()) => {
                    if block_size <= 1 {
                        let _ = file.flush();
                        sync_fs(&file);
                        break 'files;
                    }
                    block_size = (block_size / 2).max(1);
                    debug!(block_size, "ENOSPC, halving write block");
                    continue;
                }
                Err(e) => {
                    drop(temps);
                    return Err(classify_io_error(&dir.to_string_lossy(), e));
                }
            }

            if last_report.elapsed() >= PROGRESS_INTERVAL {
                let remaining_free = start_free.saturating_sub(total_written);
                let rate = total_written as f64 / start.elapsed().as_secs_f64().max(0.001);
                let eta = if rate > 0.0 {
                    Some((remaining_free as f64 / rate).round() as u64)
                } else {
                    None
                };
                on_progress(FillProgress {
                    phase: 1,
                    done_fraction: total_written as f64 / (start_free as f64 + 1.0),
                    eta_seconds: eta,
                });
                last_report = Instant::now();

                if crate::is_interrupted() {
                    let _ = file.flush();
                    sync_fs(&file);
                    break 'files;
                }
            }
        }

        let _ = file.flush();
        sync_fs(&file);
    }

    on_progress(FillProgress {
        phase: 1,
        done_fraction: 1.0,
        eta_seconds: Some(0),
    });
    // Temporaries are truncated to zero length (cheap, releases their
    // clusters back to the pool we just zeroed) then dropped, which
    // removes them via `TempFileGuard`.
    drop(temps);
    Ok(total_written)
}

#[cfg(unix)]
fn enospc() -> i32 {
    libc::ENOSPC
}
#[cfg(not(unix))]
fn enospc() -> i32 {
    -1
}

#[cfg(unix)]
fn sync_fs(file: &File) {
    use std::os::unix::io::AsRawFd;
    unsafe {
        libc::fsync(file.as_raw_fd());
    }
    unsafe {
        libc::sync();
    }
}

#[cfg(not(unix))]
fn sync_fs(file: &File) {
    let _ = file.sync_all();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_a_small_tmpdir_and_reports_completion() {
        let dir = tempfile::tempdir().unwrap();
        let mut last_fraction = 0.0;
        let written = wipe_path(dir.path(), |p| {
            assert!(p.done_fraction >= last_fraction);
            last_fraction = p.done_fraction;
        })
        .unwrap();
        assert!(written > 0 || last_fraction >= 0.99);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
