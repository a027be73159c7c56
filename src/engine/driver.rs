//! `file_wipe`: the state machine that classifies a file, picks a wipe
//! strategy, and cleans up every handle on every exit path.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info, instrument, warn};

use crate::engine::defrag::{defrag_wipe, ConcurrencyInjector};
use crate::engine::direct::direct_wipe;
use crate::engine::extents::{check_extents, extents_a_minus_b, logical_ranges_to_extents, Extent};
use crate::engine::volume::{FileToken, VolumeInfo, VolumeIo, VolumeToken};
use crate::error::{WipeError, WipeResult};
use crate::name_wipe::{MAX_ATTEMPTS, PASS_ONE_SHRINK, PASS_ONE_START_LEN, PASS_TWO_START_LEN};

/// Cost-model factor from the original bridging heuristic: the amortized
/// expense of one extra allocated cluster forced onto the defrag pass by
/// choosing the bridged extent list over the original.
const BRIDGE_PENALTY_PER_EXTRA_ALLOCATED: i64 = 10;

const POLL_TIMEOUT: Duration = Duration::from_secs(7);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipeStrategy {
    DirectOnly,
    DirectThenDefrag,
    SpecialDefrag,
}

#[derive(Debug)]
pub struct WipeOutcome {
    pub strategy: WipeStrategy,
    pub bytes_written: u64,
    /// Clusters that stayed allocated to someone else through the whole
    /// defrag pass — not an error, just residue the OS will zero-pad.
    pub residue_clusters: u64,
}

struct FileGuard<'v> {
    volume: &'v dyn VolumeIo,
    file: Option<FileToken>,
}

impl Drop for FileGuard<'_> {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = self.volume.close_file(file);
        }
    }
}

struct VolumeGuard<'v> {
    volume: &'v dyn VolumeIo,
    token: Option<VolumeToken>,
}

impl Drop for VolumeGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            let _ = self.volume.close_volume(token);
        }
    }
}

fn random_name(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len.max(1))
        .map(char::from)
        .collect()
}

/// Renames `path` through one pass of random names via the volume's own
/// `rename`, shrinking or growing the candidate name's length on failure
/// the same way [`crate::name_wipe::wipe_name`]'s portable fallback does.
fn rename_pass(volume: &dyn VolumeIo, path: &Path, mut len: usize, shrink: bool) -> WipeResult<PathBuf> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let current = path.to_path_buf();

    for attempt in 0..MAX_ATTEMPTS {
        let candidate = dir.join(random_name(len));
        match volume.rename(&current, &candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) => {
                debug!(attempt, len, error = %e, "volume rename attempt failed");
                if shrink {
                    len = len.saturating_sub(PASS_ONE_SHRINK).max(1);
                } else {
                    len += 1;
                }
                if attempt == MAX_ATTEMPTS - 1 {
                    return Err(e);
                }
            }
        }
    }
    Ok(current)
}

/// Two-pass random rename over the volume abstraction, mirroring
/// [`crate::name_wipe::wipe_name`]'s algorithm so the cluster-level path
/// also scrubs the directory entry before unlinking.
fn volume_wipe_name(volume: &dyn VolumeIo, path: &Path) -> WipeResult<PathBuf> {
    let after_pass_one = rename_pass(volume, path, PASS_ONE_START_LEN, true)?;
    rename_pass(volume, &after_pass_one, PASS_TWO_START_LEN, false)
}

fn classify(info: &VolumeInfo, path: &Path) -> WipeResult<()> {
    if !info.drive_kind.is_supported() || !info.file_system.is_supported() {
        return Err(WipeError::UnsupportedFilesystem {
            path: path.to_string_lossy().to_string(),
            reason: format!("{:?} on {:?}", info.file_system, info.drive_kind),
        });
    }
    Ok(())
}

/// Blocks (cooperatively, via short sleeps) until the clusters in `extents`
/// show more free than allocated, or `POLL_TIMEOUT` elapses. A timeout is
/// not a failure: the defrag pass below simply skips whatever is still
/// allocated.
fn poll_clusters_freed(volume: &dyn VolumeIo, volume_token: VolumeToken, extents: &[Extent]) -> WipeResult<bool> {
    let deadline = Instant::now() + POLL_TIMEOUT;
    loop {
        let bitmap = volume.volume_bitmap(volume_token)?;
        let (free, allocated) = check_extents(extents, &bitmap, None);
        if free > allocated {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Picks bridged vs. original extents per the cost model: `cost = (|orig|
/// - |bridged|) - penalty * extra_allocated_in_bridged`; bridged wins when
/// `cost > 0`.
fn choose_bridged_or_original(
    bitmap: &crate::engine::extents::VolumeBitmap,
    original: &[Extent],
    bridged: &[Extent],
) -> Vec<Extent> {
    let orig_len: u64 = original.iter().map(|e| e.len()).sum();
    let bridged_len: u64 = bridged.iter().map(|e| e.len()).sum();
    let (_, orig_allocated) = check_extents(original, bitmap, None);
    let (_, bridged_allocated) = check_extents(bridged, bitmap, None);
    let extra_allocated = bridged_allocated.saturating_sub(orig_allocated) as i64;

    let cost = (orig_len as i64 - bridged_len as i64) - BRIDGE_PENALTY_PER_EXTRA_ALLOCATED * extra_allocated;
    if cost > 0 {
        bridged.to_vec()
    } else {
        original.to_vec()
    }
}

/// Wipes the clusters backing `path` and removes the file.
///
/// `drive_root` is the volume root (e.g. `"C:"`) used to open the raw
/// volume device; `tmp_dir` is where the defrag strategy's donor files
/// are created, and must be on the same volume as `path`.
#[instrument(skip(volume, injector), fields(path = %path.display()))]
pub fn file_wipe(
    volume: &dyn VolumeIo,
    drive_root: &str,
    path: &Path,
    tmp_dir: &Path,
    injector: Option<&dyn ConcurrencyInjector>,
) -> WipeResult<WipeOutcome> {
    let info = volume.volume_info(drive_root)?;
    classify(&info, path)?;
    let cluster_size = info.cluster_size();

    let _ = volume.strip_read_only(path);

    let file = volume.open_file_readwrite(path)?;
    let mut file_guard = FileGuard {
        volume,
        file: Some(file),
    };

    let attrs = volume.file_attributes(file, path)?;
    let size = volume.file_size(file)?;
    let pointers = volume.retrieval_pointers(file)?;
    let orig_extents = logical_ranges_to_extents(&pointers, false);
    let is_special = attrs.is_special();

    let outcome = if !is_special {
        let bytes_written = direct_wipe(volume, file, cluster_size, size, &orig_extents)?;

        let new_pointers = volume.retrieval_pointers(file)?;
        let new_extents = logical_ranges_to_extents(&new_pointers, false);
        let residue_extents = extents_a_minus_b(&orig_extents, &new_extents);

        if residue_extents.is_empty() {
            WipeOutcome {
                strategy: WipeStrategy::DirectOnly,
                bytes_written,
                residue_clusters: 0,
            }
        } else {
            let volume_token = volume.open_volume(drive_root)?;
            let mut volume_guard = VolumeGuard {
                volume,
                token: Some(volume_token),
            };
            let mut residue_clusters = 0u64;
            for extent in residue_extents {
                let residue = defrag_wipe(volume, volume_token, cluster_size, tmp_dir, extent, injector)?;
                residue_clusters += residue.iter().map(|e| e.len()).sum::<u64>();
            }
            if let Some(t) = volume_guard.token.take() {
                let _ = volume.close_volume(t);
            }
            WipeOutcome {
                strategy: WipeStrategy::DirectThenDefrag,
                bytes_written,
                residue_clusters,
            }
        }
    } else {
        let bridged_extents = logical_ranges_to_extents(&pointers, true);

        let volume_token = volume.open_volume(drive_root)?;
        let mut volume_guard = VolumeGuard {
            volume,
            token: Some(volume_token),
        };

        volume.set_end_of_file(file, 0)?;
        if !poll_clusters_freed(volume, volume_token, &orig_extents)? {
            warn!(path = %path.display(), "clusters did not free within poll timeout, defrag will skip residents");
        }

        let bitmap = volume.volume_bitmap(volume_token)?;
        let chosen = choose_bridged_or_original(&bitmap, &orig_extents, &bridged_extents);

        let mut residue_clusters = 0u64;
        for extent in chosen {
            let residue = defrag_wipe(volume, volume_token, cluster_size, tmp_dir, extent, injector)?;
            residue_clusters += residue.iter().map(|e| e.len()).sum::<u64>();
        }
        if let Some(t) = volume_guard.token.take() {
            let _ = volume.close_volume(t);
        }

        WipeOutcome {
            strategy: WipeStrategy::SpecialDefrag,
            bytes_written: 0,
            residue_clusters,
        }
    };

    if let Some(f) = file_guard.file.take() {
        let _ = volume.close_file(f);
    }
    drop(file_guard);

    let wiped_as = volume_wipe_name(volume, path)?;
    volume.delete_file(&wiped_as)?;

    info!(
        path = %path.display(),
        strategy = ?outcome.strategy,
        residue_clusters = outcome.residue_clusters,
        "file wiped"
    );
    Ok(outcome)
}
