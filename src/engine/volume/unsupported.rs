//! Stand-in `VolumeIo` for non-Windows targets. The Defragmentation API
//! this engine is built on is Windows-only; on other platforms every
//! cluster-level call reports unsupported so the crate still builds and
//! the portable paths (`content_wipe`, `name_wipe`, `free_space`) work.

use std::path::{Path, PathBuf};

use crate::engine::extents::{RetrievalPointer, VolumeBitmap};
use crate::error::{WipeError, WipeResult};

use super::{FileAttributes, FileToken, VolumeInfo, VolumeIo, VolumeToken};

pub struct UnsupportedVolumeIo;

fn unsupported(path: &str) -> WipeError {
    WipeError::UnsupportedFilesystem {
        path: path.to_string(),
        reason: "cluster-level wiping requires the Windows Defragmentation API".to_string(),
    }
}

impl VolumeIo for UnsupportedVolumeIo {
    fn volume_info(&self, drive_root: &str) -> WipeResult<VolumeInfo> {
        Err(unsupported(drive_root))
    }
    fn open_volume(&self, drive_root: &str) -> WipeResult<VolumeToken> {
        Err(unsupported(drive_root))
    }
    fn close_volume(&self, _volume: VolumeToken) -> WipeResult<()> {
        Ok(())
    }
    fn open_file_readwrite(&self, path: &Path) -> WipeResult<FileToken> {
        Err(unsupported(&path.to_string_lossy()))
    }
    fn close_file(&self, _file: FileToken) -> WipeResult<()> {
        Ok(())
    }
    fn file_attributes(&self, _file: FileToken, path: &Path) -> WipeResult<FileAttributes> {
        Err(unsupported(&path.to_string_lossy()))
    }
    fn file_size(&self, _file: FileToken) -> WipeResult<u64> {
        Err(unsupported(""))
    }
    fn retrieval_pointers(&self, _file: FileToken) -> WipeResult<Vec<RetrievalPointer>> {
        Err(unsupported(""))
    }
    fn volume_bitmap(&self, _volume: VolumeToken) -> WipeResult<VolumeBitmap> {
        Err(unsupported(""))
    }
    fn lock_file(&self, _file: FileToken) -> WipeResult<()> {
        Ok(())
    }
    fn write_zeros(&self, _file: FileToken, _offset: u64, _len: u64) -> WipeResult<u64> {
        Err(unsupported(""))
    }
    fn set_end_of_file(&self, _file: FileToken, _len: u64) -> WipeResult<()> {
        Err(unsupported(""))
    }
    fn flush(&self, _file: FileToken) -> WipeResult<()> {
        Ok(())
    }
    fn create_hidden_zero_file(&self, dir: &Path, _name: &str) -> WipeResult<(FileToken, PathBuf)> {
        Err(unsupported(&dir.to_string_lossy()))
    }
    fn move_file(
        &self,
        _volume: VolumeToken,
        _file: FileToken,
        _starting_vcn: u64,
        _target_lcn: u64,
        _cluster_count: u64,
    ) -> WipeResult<bool> {
        Err(unsupported(""))
    }
    fn delete_file(&self, path: &Path) -> WipeResult<()> {
        std::fs::remove_file(path).map_err(WipeError::Io)
    }
    fn strip_read_only(&self, path: &Path) -> WipeResult<()> {
        let mut perms = std::fs::metadata(path).map_err(WipeError::Io)?.permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        std::fs::set_permissions(path, perms).map_err(WipeError::Io)
    }
    fn rename(&self, from: &Path, to: &Path) -> WipeResult<()> {
        std::fs::rename(from, to).map_err(WipeError::Io)
    }
}
