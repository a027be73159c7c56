//! Windows implementation of [`VolumeIo`], built directly on the
//! Defragmentation API IOCTLs: `FSCTL_GET_RETRIEVAL_POINTERS`,
//! `FSCTL_GET_VOLUME_BITMAP`, `FSCTL_MOVE_FILE`.

use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::RawHandle;
use std::path::{Path, PathBuf};
use std::ptr;

use winapi::shared::minwindef::{DWORD, MAX_PATH};
use winapi::um::fileapi::{
    CreateFileW, DeleteFileW, GetDiskFreeSpaceW, GetDriveTypeW, GetFileAttributesW,
    GetVolumeInformationW, SetEndOfFile, SetFileAttributesW, SetFilePointerEx, OPEN_EXISTING,
    CREATE_ALWAYS,
};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::ioapiset::DeviceIoControl;
use winapi::um::winbase::{FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_NO_BUFFERING, MOVEFILE_REPLACE_EXISTING};
use winapi::um::winioctl::{FSCTL_GET_RETRIEVAL_POINTERS, FSCTL_GET_VOLUME_BITMAP, FSCTL_MOVE_FILE};
use winapi::um::winnt::{
    FILE_ATTRIBUTE_COMPRESSED, FILE_ATTRIBUTE_ENCRYPTED, FILE_ATTRIBUTE_HIDDEN,
    FILE_ATTRIBUTE_READONLY, FILE_ATTRIBUTE_SPARSE_FILE, FILE_SHARE_READ, FILE_SHARE_WRITE,
    GENERIC_READ, GENERIC_WRITE, LARGE_INTEGER,
};

use crate::engine::extents::{RetrievalPointer, VolumeBitmap};
use crate::error::WipeError;

use super::{DriveKind, FileAttributes, FileSystemKind, FileToken, VolumeInfo, VolumeIo, VolumeToken};

fn wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

fn last_error(context: &str) -> WipeError {
    WipeError::Io(std::io::Error::last_os_error()).context(context)
}

trait ErrContext {
    fn context(self, msg: &str) -> Self;
}
impl ErrContext for WipeError {
    fn context(self, msg: &str) -> Self {
        match self {
            WipeError::Io(e) => WipeError::Io(std::io::Error::new(e.kind(), format!("{msg}: {e}"))),
            other => other,
        }
    }
}

const WRITE_CHUNK: usize = 512 * 1024;

pub struct WindowsVolumeIo;

impl WindowsVolumeIo {
    pub fn new() -> Self {
        Self
    }

    fn open_raw(path: &str, creation: DWORD, flags: DWORD) -> std::io::Result<RawHandle> {
        let wpath = wide(path);
        let handle = unsafe {
            CreateFileW(
                wpath.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                ptr::null_mut(),
                creation,
                flags,
                ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(handle as RawHandle)
        }
    }

    fn set_file_pointer(handle: RawHandle, offset: u64) -> std::io::Result<()> {
        let mut li: LARGE_INTEGER = unsafe { std::mem::zeroed() };
        unsafe { *li.QuadPart_mut() = offset as i64 };
        let ok = unsafe {
            SetFilePointerEx(handle as *mut _, li, ptr::null_mut(), 0 /* FILE_BEGIN */)
        };
        if ok == 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl VolumeIo for WindowsVolumeIo {
    fn volume_info(&self, drive_root: &str) -> crate::error::WipeResult<VolumeInfo> {
        let root = wide(drive_root);

        let mut fs_name = [0u16; MAX_PATH];
        let mut sectors_per_cluster: DWORD = 0;
        let mut bytes_per_sector: DWORD = 0;
        let mut free_clusters: DWORD = 0;
        let mut total_clusters: DWORD = 0;

        let info_ok = unsafe {
            GetVolumeInformationW(
                root.as_ptr(),
                ptr::null_mut(),
                0,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                fs_name.as_mut_ptr(),
                fs_name.len() as DWORD,
            )
        };
        if info_ok == 0 {
            return Err(last_error("GetVolumeInformationW"));
        }

        let free_ok = unsafe {
            GetDiskFreeSpaceW(
                root.as_ptr(),
                &mut sectors_per_cluster,
                &mut bytes_per_sector,
                &mut free_clusters,
                &mut total_clusters,
            )
        };
        if free_ok == 0 {
            return Err(last_error("GetDiskFreeSpaceW"));
        }

        let fs_name_str = String::from_utf16_lossy(&fs_name)
            .trim_end_matches('\u{0}')
            .to_string();
        let file_system = match fs_name_str.as_str() {
            "NTFS" => FileSystemKind::Ntfs,
            "FAT32" => FileSystemKind::Fat32,
            "FAT" => FileSystemKind::Fat16,
            "exFAT" => FileSystemKind::ExFat,
            _ => FileSystemKind::Unsupported,
        };

        let drive_type = unsafe { GetDriveTypeW(root.as_ptr()) };
        let drive_kind = match drive_type {
            3 /* DRIVE_FIXED */ => DriveKind::Fixed,
            2 /* DRIVE_REMOVABLE */ => DriveKind::Removable,
            4 /* DRIVE_REMOTE */ => DriveKind::Remote,
            5 /* DRIVE_CDROM */ => DriveKind::CdRom,
            _ => DriveKind::Unknown,
        };

        Ok(VolumeInfo {
            drive_name: drive_root.to_string(),
            file_system,
            drive_kind,
            sectors_per_cluster,
            bytes_per_sector,
            total_clusters: total_clusters as u64,
            free_clusters: free_clusters as u64,
        })
    }

    fn open_volume(&self, drive_root: &str) -> crate::error::WipeResult<VolumeToken> {
        let letter = drive_root.trim_end_matches('\\');
        let path = format!("\\\\.\\{letter}");
        let handle = Self::open_raw(&path, OPEN_EXISTING, FILE_FLAG_NO_BUFFERING)
            .map_err(|e| WipeError::Io(e))?;
        Ok(handle as u64)
    }

    fn close_volume(&self, volume: VolumeToken) -> crate::error::WipeResult<()> {
        unsafe { CloseHandle(volume as *mut _) };
        Ok(())
    }

    fn open_file_readwrite(&self, path: &Path) -> crate::error::WipeResult<FileToken> {
        let handle = Self::open_raw(
            &path.to_string_lossy(),
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS,
        )
        .map_err(|e| WipeError::Io(e))?;
        Ok(handle as u64)
    }

    fn close_file(&self, file: FileToken) -> crate::error::WipeResult<()> {
        unsafe { CloseHandle(file as *mut _) };
        Ok(())
    }

    fn file_attributes(&self, file: FileToken, path: &Path) -> crate::error::WipeResult<FileAttributes> {
        let _ = file;
        let w = wide(&path.to_string_lossy());
        let attrs = unsafe { GetFileAttributesW(w.as_ptr()) };
        if attrs == u32::MAX {
            return Err(last_error("GetFileAttributesW"));
        }
        Ok(FileAttributes {
            compressed: attrs & FILE_ATTRIBUTE_COMPRESSED != 0,
            encrypted: attrs & FILE_ATTRIBUTE_ENCRYPTED != 0,
            sparse: attrs & FILE_ATTRIBUTE_SPARSE_FILE != 0,
            read_only: attrs & FILE_ATTRIBUTE_READONLY != 0,
        })
    }

    fn file_size(&self, file: FileToken) -> crate::error::WipeResult<u64> {
        use winapi::um::fileapi::GetFileSizeEx;
        let mut size: LARGE_INTEGER = unsafe { std::mem::zeroed() };
        let ok = unsafe { GetFileSizeEx(file as *mut _, &mut size) };
        if ok == 0 {
            return Err(last_error("GetFileSizeEx"));
        }
        Ok(unsafe { *size.QuadPart() } as u64)
    }

    fn retrieval_pointers(&self, file: FileToken) -> crate::error::WipeResult<Vec<RetrievalPointer>> {
        for &buf_size in &[4096usize, 32 * 1024, 256 * 1024, 2 * 1024 * 1024] {
            let mut input: i64 = 0; // starting VCN
            let mut buffer = vec![0u8; buf_size];
            let mut returned: DWORD = 0;
            let ok = unsafe {
                DeviceIoControl(
                    file as *mut _,
                    FSCTL_GET_RETRIEVAL_POINTERS,
                    &mut input as *mut _ as *mut _,
                    std::mem::size_of::<i64>() as DWORD,
                    buffer.as_mut_ptr() as *mut _,
                    buffer.len() as DWORD,
                    &mut returned,
                    ptr::null_mut(),
                )
            };
            if ok != 0 {
                return Ok(parse_retrieval_pointers(&buffer));
            }
            let err = unsafe { winapi::um::errhandlingapi::GetLastError() };
            match err {
                38 /* ERROR_HANDLE_EOF: empty file */ => return Ok(Vec::new()),
                122 | 234 /* buffer too small / more data */ => continue,
                _ => {
                    return Err(WipeError::BufferTooSmall {
                        path: String::new(),
                        last_tried: buf_size,
                    })
                }
            }
        }
        Err(WipeError::BufferTooSmall {
            path: String::new(),
            last_tried: 2 * 1024 * 1024,
        })
    }

    fn volume_bitmap(&self, volume: VolumeToken) -> crate::error::WipeResult<VolumeBitmap> {
        // First query with a small buffer just to learn total cluster
        // count via the returned BitmapSize, then re-query sized exactly.
        let mut input: i64 = 0;
        let mut probe = vec![0u8; 64];
        let mut returned: DWORD = 0;
        unsafe {
            DeviceIoControl(
                volume as *mut _,
                FSCTL_GET_VOLUME_BITMAP,
                &mut input as *mut _ as *mut _,
                std::mem::size_of::<i64>() as DWORD,
                probe.as_mut_ptr() as *mut _,
                probe.len() as DWORD,
                &mut returned,
                ptr::null_mut(),
            )
        };
        let bitmap_size_bits = i64::from_le_bytes(probe[8..16].try_into().unwrap()).max(0) as u64;
        let buf_size = (bitmap_size_bits / 8 + 16 + 64) as usize;

        let mut buffer = vec![0u8; buf_size.max(32)];
        let ok = unsafe {
            DeviceIoControl(
                volume as *mut _,
                FSCTL_GET_VOLUME_BITMAP,
                &mut input as *mut _ as *mut _,
                std::mem::size_of::<i64>() as DWORD,
                buffer.as_mut_ptr() as *mut _,
                buffer.len() as DWORD,
                &mut returned,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(last_error("FSCTL_GET_VOLUME_BITMAP"));
        }
        let bits = buffer[16..].to_vec();
        Ok(VolumeBitmap::from_bytes(bits, bitmap_size_bits))
    }

    fn lock_file(&self, file: FileToken) -> crate::error::WipeResult<()> {
        use winapi::um::fileapi::LockFile;
        let ok = unsafe { LockFile(file as *mut _, 0, 0, u32::MAX, u32::MAX) };
        if ok == 0 {
            return Err(last_error("LockFile"));
        }
        Ok(())
    }

    fn write_zeros(&self, file: FileToken, offset: u64, len: u64) -> crate::error::WipeResult<u64> {
        use winapi::um::fileapi::WriteFile;
        Self::set_file_pointer(file as RawHandle, offset).map_err(WipeError::Io)?;
        let zeros = vec![0u8; WRITE_CHUNK];
        let mut remaining = len;
        let mut written_total = 0u64;
        while remaining > 0 {
            let chunk = remaining.min(WRITE_CHUNK as u64) as usize;
            let mut written: DWORD = 0;
            let ok = unsafe {
                WriteFile(
                    file as *mut _,
                    zeros.as_ptr() as *const _,
                    chunk as DWORD,
                    &mut written,
                    ptr::null_mut(),
                )
            };
            if ok == 0 {
                return Err(last_error("WriteFile"));
            }
            written_total += written as u64;
            remaining -= written as u64;
        }
        Ok(written_total)
    }

    fn set_end_of_file(&self, file: FileToken, len: u64) -> crate::error::WipeResult<()> {
        Self::set_file_pointer(file as RawHandle, len).map_err(WipeError::Io)?;
        let ok = unsafe { SetEndOfFile(file as *mut _) };
        if ok == 0 {
            return Err(last_error("SetEndOfFile"));
        }
        Ok(())
    }

    fn flush(&self, file: FileToken) -> crate::error::WipeResult<()> {
        use winapi::um::fileapi::FlushFileBuffers;
        let ok = unsafe { FlushFileBuffers(file as *mut _) };
        if ok == 0 {
            return Err(last_error("FlushFileBuffers"));
        }
        Ok(())
    }

    fn create_hidden_zero_file(
        &self,
        dir: &Path,
        name: &str,
    ) -> crate::error::WipeResult<(FileToken, PathBuf)> {
        let path = dir.join(name);
        let handle = Self::open_raw(&path.to_string_lossy(), CREATE_ALWAYS, FILE_FLAG_BACKUP_SEMANTICS)
            .map_err(|e| WipeError::Io(e))?;
        unsafe {
            SetFileAttributesW(wide(&path.to_string_lossy()).as_ptr(), FILE_ATTRIBUTE_HIDDEN);
        }
        Ok((handle as u64, path))
    }

    fn move_file(
        &self,
        volume: VolumeToken,
        file: FileToken,
        starting_vcn: u64,
        target_lcn: u64,
        cluster_count: u64,
    ) -> crate::error::WipeResult<bool> {
        #[repr(C)]
        struct MoveFileData {
            file_handle: *mut winapi::ctypes::c_void,
            starting_vcn: i64,
            starting_lcn: i64,
            cluster_count: DWORD,
        }
        let mut data = MoveFileData {
            file_handle: file as *mut _,
            starting_vcn: starting_vcn as i64,
            starting_lcn: target_lcn as i64,
            cluster_count: cluster_count as DWORD,
        };
        let mut returned: DWORD = 0;
        let ok = unsafe {
            DeviceIoControl(
                volume as *mut _,
                FSCTL_MOVE_FILE,
                &mut data as *mut _ as *mut _,
                std::mem::size_of::<MoveFileData>() as DWORD,
                ptr::null_mut(),
                0,
                &mut returned,
                ptr::null_mut(),
            )
        };
        if ok != 0 {
            return Ok(true);
        }
        // Destination already claimed by another allocator: not a fatal
        // error, the caller subdivides and retries at finer granularity.
        Ok(false)
    }

    fn delete_file(&self, path: &Path) -> crate::error::WipeResult<()> {
        let w = wide(&path.to_string_lossy());
        let ok = unsafe { DeleteFileW(w.as_ptr()) };
        if ok == 0 {
            return Err(last_error("DeleteFileW"));
        }
        Ok(())
    }

    fn strip_read_only(&self, path: &Path) -> crate::error::WipeResult<()> {
        let w = wide(&path.to_string_lossy());
        let attrs = unsafe { GetFileAttributesW(w.as_ptr()) };
        if attrs == u32::MAX {
            return Err(last_error("GetFileAttributesW"));
        }
        let cleared = attrs & !FILE_ATTRIBUTE_READONLY;
        let ok = unsafe { SetFileAttributesW(w.as_ptr(), cleared) };
        if ok == 0 {
            return Err(last_error("SetFileAttributesW"));
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> crate::error::WipeResult<()> {
        use winapi::um::winbase::MoveFileExW;
        let from_w = wide(&from.to_string_lossy());
        let to_w = wide(&to.to_string_lossy());
        let ok = unsafe { MoveFileExW(from_w.as_ptr(), to_w.as_ptr(), MOVEFILE_REPLACE_EXISTING) };
        if ok == 0 {
            return Err(last_error("MoveFileExW"));
        }
        Ok(())
    }
}

/// Parses a `RETRIEVAL_POINTERS_BUFFER`: `u32` extent count at offset 0,
/// `u64` starting VCN at offset 8, then `(next_vcn: u64, lcn: i64)` pairs
/// every 16 bytes from offset 16.
fn parse_retrieval_pointers(buf: &[u8]) -> Vec<RetrievalPointer> {
    if buf.len() < 16 {
        return Vec::new();
    }
    let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let base = 16 + i * 16;
        if base + 16 > buf.len() {
            break;
        }
        let next_vcn = u64::from_le_bytes(buf[base..base + 8].try_into().unwrap());
        let lcn = i64::from_le_bytes(buf[base + 8..base + 16].try_into().unwrap());
        out.push(RetrievalPointer { next_vcn, lcn });
    }
    out
}

#[cfg(all(test, windows))]
mod tests {
    use super::*;

    #[test]
    fn parses_empty_buffer_as_no_extents() {
        assert!(parse_retrieval_pointers(&[]).is_empty());
    }

    #[test]
    fn parses_single_extent() {
        let mut buf = vec![0u8; 32];
        buf[0..4].copy_from_slice(&1u32.to_le_bytes());
        buf[16..24].copy_from_slice(&10u64.to_le_bytes());
        buf[24..32].copy_from_slice(&500i64.to_le_bytes());
        let parsed = parse_retrieval_pointers(&buf);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].next_vcn, 10);
        assert_eq!(parsed[0].lcn, 500);
    }
}
