//! Defrag wipe strategy: relocate already-zeroed donor clusters onto a
//! target extent via the move-file IOCTL, recursing to finer granularity
//! on partial failure or concurrent allocation.

use std::path::Path;

use tracing::{debug, trace};

use crate::engine::extents::{check_extents, split_extent, Extent, VolumeBitmap};
use crate::engine::volume::{VolumeIo, VolumeToken};
use crate::error::WipeResult;

/// An extent larger than four direct-wipe write chunks is subdivided up
/// front rather than attempted as one donor file.
const DIRECT_ATTEMPT_CEILING_BYTES: u64 = 4 * crate::engine::direct::WRITE_CHUNK_BYTES;

/// Test-only seam: lets a unit test simulate another process allocating a
/// cluster between the bitmap snapshot and the move attempt. The
/// production path always passes `None`.
pub trait ConcurrencyInjector: Send + Sync {
    /// Called immediately before each move attempt; may mutate volume
    /// state (e.g. via a `FakeVolume` handle captured by the closure).
    fn before_move(&self, extent: Extent);
}

/// Recursively wipes `extent` by relocating zeroed donor clusters onto it.
/// Returns the set of clusters that remained allocated (and therefore
/// unwiped) throughout, for the caller to fold into a "residue" report.
pub fn defrag_wipe(
    volume: &dyn VolumeIo,
    volume_token: VolumeToken,
    cluster_size: u64,
    tmp_dir: &Path,
    extent: Extent,
    injector: Option<&dyn ConcurrencyInjector>,
) -> WipeResult<Vec<Extent>> {
    if let Some(inj) = injector {
        inj.before_move(extent);
    }

    let bitmap = volume.volume_bitmap(volume_token)?;
    wipe_extent(volume, volume_token, cluster_size, tmp_dir, extent, &bitmap, injector)
}

fn wipe_extent(
    volume: &dyn VolumeIo,
    volume_token: VolumeToken,
    cluster_size: u64,
    tmp_dir: &Path,
    extent: Extent,
    bitmap: &VolumeBitmap,
    injector: Option<&dyn ConcurrencyInjector>,
) -> WipeResult<Vec<Extent>> {
    if extent.lcn_start >= extent.lcn_end && extent.len() == 0 {
        return Ok(Vec::new());
    }

    let (free, allocated) = check_extents(&[extent], bitmap, None);

    if free == 0 && allocated > 0 {
        trace!(start = extent.lcn_start, end = extent.lcn_end, "extent fully allocated, skipping");
        return Ok(vec![extent]);
    }

    let ceiling_clusters = (DIRECT_ATTEMPT_CEILING_BYTES / cluster_size).max(1);
    if allocated > 0 || extent.len() > ceiling_clusters {
        if extent.lcn_start >= extent.lcn_end {
            return Ok(vec![extent]);
        }
        let mut residue = Vec::new();
        for sub in split_extent(extent.lcn_start, extent.lcn_end) {
            residue.extend(wipe_extent(
                volume,
                volume_token,
                cluster_size,
                tmp_dir,
                sub,
                bitmap,
                injector,
            )?);
        }
        return Ok(residue);
    }

    // Whole extent is free: donate a freshly zeroed file's clusters onto it.
    let name = format!("~wip{:x}.tmp", extent.lcn_start);
    let (donor, donor_path) = volume.create_hidden_zero_file(tmp_dir, &name)?;
    let result = (|| -> WipeResult<Vec<Extent>> {
        volume.write_zeros(donor, 0, extent.len() * cluster_size)?;
        let donor_pointers = volume.retrieval_pointers(donor)?;
        let donor_extents = crate::engine::extents::logical_ranges_to_extents(&donor_pointers, false);

        let mut residue = Vec::new();
        let mut vcn_offset = 0u64;
        for donor_extent in donor_extents {
            let target = Extent::new(
                extent.lcn_start + vcn_offset,
                extent.lcn_start + vcn_offset + donor_extent.len() - 1,
            );
            vcn_offset += donor_extent.len();

            if donor_extent.lcn_start == target.lcn_start {
                continue;
            }

            if let Some(inj) = injector {
                inj.before_move(target);
            }

            let moved = volume.move_file(
                volume_token,
                donor,
                0,
                target.lcn_start,
                donor_extent.len(),
            )?;
            if !moved {
                debug!(start = target.lcn_start, end = target.lcn_end, "move failed, subdividing");
                if target.lcn_start < target.lcn_end {
                    let refreshed = volume.volume_bitmap(volume_token)?;
                    for sub in split_extent(target.lcn_start, target.lcn_end) {
                        residue.extend(wipe_extent(
                            volume,
                            volume_token,
                            cluster_size,
                            tmp_dir,
                            sub,
                            &refreshed,
                            injector,
                        )?);
                    }
                } else {
                    residue.push(target);
                }
            }
        }
        Ok(residue)
    })();

    let _ = volume.close_file(donor);
    let _ = volume.delete_file(&donor_path);

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::volume::fake::FakeVolume;
    use crate::engine::volume::FileAttributes;
    use std::path::Path;

    #[test]
    fn free_extent_gets_fully_wiped() {
        let vol = FakeVolume::new(4096, 64);
        let target = vol.find_free_extent(8).unwrap();
        let residue = defrag_wipe(&vol, 0, 4096, Path::new("C:\\tmp"), target, None).unwrap();
        assert!(residue.is_empty());
    }

    #[test]
    fn fully_allocated_extent_is_reported_as_residue() {
        let vol = FakeVolume::new(4096, 16);
        let occupied = Extent::new(0, 15);
        vol.create_file_with_extents(
            Path::new("C:\\tmp\\other.bin"),
            vec![occupied],
            FileAttributes::default(),
            &[0u8; 16 * 4096],
        );
        let residue = defrag_wipe(&vol, 0, 4096, Path::new("C:\\tmp"), occupied, None).unwrap();
        assert_eq!(residue.iter().map(|e| e.len()).sum::<u64>(), 16);
    }

    #[test]
    fn partial_allocation_subdivides_around_the_busy_cluster() {
        let vol = FakeVolume::new(4096, 32);
        // Occupy a single cluster in the middle of an otherwise free span.
        let busy = Extent::new(15, 15);
        vol.create_file_with_extents(
            Path::new("C:\\tmp\\busy.bin"),
            vec![busy],
            FileAttributes::default(),
            &[0u8; 4096],
        );
        let whole = Extent::new(10, 20);
        let residue = defrag_wipe(&vol, 0, 4096, Path::new("C:\\tmp"), whole, None).unwrap();
        assert!(residue.iter().any(|e| e.lcn_start <= 15 && e.lcn_end >= 15));
        assert!(!vol.is_free(15), "the busy cluster stays allocated to its owner");
    }
}
