//! Volume I/O adapter: the only layer that touches the operating system.
//! Everything above this trait (extent algebra, direct/defrag strategies,
//! the driver) is platform-agnostic and is unit-tested against
//! [`fake::FakeVolume`] instead of a real disk.

#[cfg(windows)]
pub mod windows;

#[cfg(not(windows))]
pub mod unsupported;

#[cfg(test)]
pub mod fake;

use std::path::Path;

use crate::engine::extents::{RetrievalPointer, VolumeBitmap};
use crate::error::WipeResult;

/// Opaque handle to an open file, interpreted only by the `VolumeIo` impl
/// that issued it (a raw `HANDLE` on Windows, an index into an in-memory
/// table for the fake backend).
pub type FileToken = u64;

/// Opaque handle to an open raw volume device.
pub type VolumeToken = u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileAttributes {
    pub compressed: bool,
    pub encrypted: bool,
    pub sparse: bool,
    pub read_only: bool,
}

impl FileAttributes {
    pub fn is_special(&self) -> bool {
        self.compressed || self.encrypted || self.sparse
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystemKind {
    Ntfs,
    Fat32,
    Fat16,
    ExFat,
    /// UDF, network, CD-ROM, or anything else this engine refuses to
    /// touch at the cluster level.
    Unsupported,
}

impl FileSystemKind {
    pub fn is_supported(&self) -> bool {
        !matches!(self, FileSystemKind::Unsupported)
    }

    pub fn is_fat32(&self) -> bool {
        matches!(self, FileSystemKind::Fat32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveKind {
    Fixed,
    Removable,
    Remote,
    CdRom,
    Unknown,
}

impl DriveKind {
    /// Mirrors the original pre-flight rejection of DRIVE_REMOTE /
    /// DRIVE_CDROM / DRIVE_UNKNOWN.
    pub fn is_supported(&self) -> bool {
        matches!(self, DriveKind::Fixed | DriveKind::Removable)
    }
}

#[derive(Debug, Clone)]
pub struct VolumeInfo {
    pub drive_name: String,
    pub file_system: FileSystemKind,
    pub drive_kind: DriveKind,
    pub sectors_per_cluster: u32,
    pub bytes_per_sector: u32,
    pub total_clusters: u64,
    pub free_clusters: u64,
}

impl VolumeInfo {
    pub fn cluster_size(&self) -> u64 {
        self.sectors_per_cluster as u64 * self.bytes_per_sector as u64
    }
}

/// Platform adapter for the cluster-level wipe engine. Every method maps
/// to one IOCTL or Win32 call in the Windows implementation; the fake
/// backend implements the same contract entirely in memory for tests.
pub trait VolumeIo: Send + Sync {
    fn volume_info(&self, drive_root: &str) -> WipeResult<VolumeInfo>;
    fn open_volume(&self, drive_root: &str) -> WipeResult<VolumeToken>;
    fn close_volume(&self, volume: VolumeToken) -> WipeResult<()>;

    fn open_file_readwrite(&self, path: &Path) -> WipeResult<FileToken>;
    fn close_file(&self, file: FileToken) -> WipeResult<()>;

    fn file_attributes(&self, file: FileToken, path: &Path) -> WipeResult<FileAttributes>;
    fn file_size(&self, file: FileToken) -> WipeResult<u64>;
    fn retrieval_pointers(&self, file: FileToken) -> WipeResult<Vec<RetrievalPointer>>;
    fn volume_bitmap(&self, volume: VolumeToken) -> WipeResult<VolumeBitmap>;

    fn lock_file(&self, file: FileToken) -> WipeResult<()>;
    fn write_zeros(&self, file: FileToken, offset: u64, len: u64) -> WipeResult<u64>;
    fn set_end_of_file(&self, file: FileToken, len: u64) -> WipeResult<()>;
    fn flush(&self, file: FileToken) -> WipeResult<()>;

    /// Creates a hidden, zero-length file used as a donor of clusters by
    /// the defrag strategy.
    fn create_hidden_zero_file(&self, dir: &Path, name: &str) -> WipeResult<(FileToken, std::path::PathBuf)>;

    /// Attempts to relocate `cluster_count` clusters of `file` starting at
    /// `starting_vcn` onto `target_lcn`. Returns `Ok(false)` (not an
    /// error) when the destination was already allocated by someone else
    /// — the caller subdivides and retries.
    fn move_file(
        &self,
        volume: VolumeToken,
        file: FileToken,
        starting_vcn: u64,
        target_lcn: u64,
        cluster_count: u64,
    ) -> WipeResult<bool>;

    fn delete_file(&self, path: &Path) -> WipeResult<()>;
    fn strip_read_only(&self, path: &Path) -> WipeResult<()>;
    fn rename(&self, from: &Path, to: &Path) -> WipeResult<()>;
}

/// Selects the production backend for the current platform. Non-Windows
/// targets get [`unsupported::UnsupportedVolumeIo`], which fails every
/// cluster-level call so that the portable fallbacks (`content_wipe`,
/// `name_wipe`, `free_space`) remain usable without a volume adapter.
pub fn platform_volume_io() -> Box<dyn VolumeIo> {
    #[cfg(windows)]
    {
        Box::new(windows::WindowsVolumeIo::new())
    }
    #[cfg(not(windows))]
    {
        Box::new(unsupported::UnsupportedVolumeIo)
    }
}
