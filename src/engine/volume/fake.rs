//! In-memory [`VolumeIo`] used by tests. Models just enough of an NTFS
//! volume — a cluster allocation bitmap and per-file extent lists backed
//! by byte buffers — to exercise the driver and the defrag strategy's
//! recursive subdivision without a real disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::engine::extents::{Extent, RetrievalPointer, VolumeBitmap};
use crate::error::{WipeError, WipeResult};

use super::{FileAttributes, FileSystemKind, DriveKind, FileToken, VolumeInfo, VolumeIo, VolumeToken};

struct FakeFile {
    path: PathBuf,
    extents: Vec<Extent>,
    cluster_size: u64,
    attrs: FileAttributes,
    deleted: bool,
}

struct Inner {
    cluster_size: u64,
    total_clusters: u64,
    allocated: Vec<bool>,
    data: HashMap<u64, Vec<u8>>, // lcn -> cluster_size bytes, only present if ever written
    files: HashMap<FileToken, FakeFile>,
    next_token: u64,
    /// One-shot set of clusters a "concurrent allocator" claims the
    /// instant `move_file` is next attempted against them.
    spiked: Vec<u64>,
}

pub struct FakeVolume {
    inner: Mutex<Inner>,
}

impl FakeVolume {
    pub fn new(cluster_size: u64, total_clusters: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                cluster_size,
                total_clusters,
                allocated: vec![false; total_clusters as usize],
                data: HashMap::new(),
                files: HashMap::new(),
                next_token: 1,
                spiked: Vec::new(),
            }),
        }
    }

    /// Registers a file already occupying `extents`, with `content`
    /// written into those clusters in order.
    pub fn create_file_with_extents(
        &self,
        path: &Path,
        extents: Vec<Extent>,
        attrs: FileAttributes,
        content: &[u8],
    ) -> FileToken {
        let mut inner = self.inner.lock().unwrap();
        let cluster_size = inner.cluster_size;
        let mut offset = 0usize;
        for ext in &extents {
            for lcn in ext.lcn_start..=ext.lcn_end {
                inner.allocated[lcn as usize] = true;
                let end = (offset + cluster_size as usize).min(content.len());
                let mut buf = vec![0u8; cluster_size as usize];
                if offset < content.len() {
                    buf[..end - offset].copy_from_slice(&content[offset..end]);
                }
                inner.data.insert(lcn, buf);
                offset += cluster_size as usize;
            }
        }
        let token = inner.next_token;
        inner.next_token += 1;
        inner.files.insert(
            token,
            FakeFile {
                path: path.to_path_buf(),
                extents,
                cluster_size,
                attrs,
                deleted: false,
            },
        );
        token
    }

    /// Causes the *next* `move_file` attempt touching `lcn` to fail, as
    /// though another process allocated it first.
    pub fn inject_concurrent_allocation(&self, lcn: u64) {
        self.inner.lock().unwrap().spiked.push(lcn);
    }

    pub fn is_free(&self, lcn: u64) -> bool {
        !self.inner.lock().unwrap().allocated[lcn as usize]
    }

    pub fn cluster_is_zero(&self, lcn: u64) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.data.get(&lcn) {
            Some(buf) => buf.iter().all(|&b| b == 0),
            None => true, // never written == implicitly zero
        }
    }

    /// Locates `count` contiguous free clusters, for tests that need a
    /// plausible `move_file` target without hand-picking an LCN.
    pub fn find_free_extent(&self, count: u64) -> Option<Extent> {
        let inner = self.inner.lock().unwrap();
        Self::find_free_run(&inner, count).map(|start| Extent::new(start, start + count - 1))
    }

    fn find_free_run(inner: &Inner, count: u64) -> Option<u64> {
        let mut run_start = None;
        let mut run_len = 0u64;
        for lcn in 0..inner.total_clusters {
            if !inner.allocated[lcn as usize] {
                if run_start.is_none() {
                    run_start = Some(lcn);
                }
                run_len += 1;
                if run_len >= count {
                    return run_start;
                }
            } else {
                run_start = None;
                run_len = 0;
            }
        }
        None
    }

    /// Grows `file` to cover `needed_clusters`, allocating the shortfall
    /// first-fit from free space — mirrors a real filesystem silently
    /// extending a file's allocation on a write or SetEndOfFile past EOF.
    fn extend_file(inner: &mut Inner, file: FileToken, needed_clusters: u64) -> WipeResult<()> {
        let current_clusters: u64 = inner
            .files
            .get(&file)
            .map(|f| f.extents.iter().map(|e| e.len()).sum())
            .unwrap_or(0);
        if needed_clusters <= current_clusters {
            return Ok(());
        }
        let shortfall = needed_clusters - current_clusters;
        let start = Self::find_free_run(inner, shortfall)
            .ok_or_else(|| WipeError::SpaceExhausted { path: String::new() })?;
        let cluster_size = inner.cluster_size;
        for lcn in start..start + shortfall {
            inner.allocated[lcn as usize] = true;
            inner.data.insert(lcn, vec![0u8; cluster_size as usize]);
        }
        if let Some(f) = inner.files.get_mut(&file) {
            f.extents.push(Extent::new(start, start + shortfall - 1));
        }
        Ok(())
    }
}

impl VolumeIo for FakeVolume {
    fn volume_info(&self, drive_root: &str) -> WipeResult<VolumeInfo> {
        let inner = self.inner.lock().unwrap();
        Ok(VolumeInfo {
            drive_name: drive_root.to_string(),
            file_system: FileSystemKind::Ntfs,
            drive_kind: DriveKind::Fixed,
            sectors_per_cluster: 1,
            bytes_per_sector: inner.cluster_size as u32,
            total_clusters: inner.total_clusters,
            free_clusters: inner.allocated.iter().filter(|&&a| !a).count() as u64,
        })
    }

    fn open_volume(&self, _drive_root: &str) -> WipeResult<VolumeToken> {
        Ok(0)
    }

    fn close_volume(&self, _volume: VolumeToken) -> WipeResult<()> {
        Ok(())
    }

    fn open_file_readwrite(&self, path: &Path) -> WipeResult<FileToken> {
        let inner = self.inner.lock().unwrap();
        inner
            .files
            .iter()
            .find(|(_, f)| f.path == path && !f.deleted)
            .map(|(tok, _)| *tok)
            .ok_or_else(|| WipeError::PathNotFound(path.to_string_lossy().to_string()))
    }

    fn close_file(&self, _file: FileToken) -> WipeResult<()> {
        Ok(())
    }

    fn file_attributes(&self, file: FileToken, _path: &Path) -> WipeResult<FileAttributes> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.files.get(&file).map(|f| f.attrs).unwrap_or_default())
    }

    fn file_size(&self, file: FileToken) -> WipeResult<u64> {
        let inner = self.inner.lock().unwrap();
        let f = inner.files.get(&file).ok_or(WipeError::PathNotFound(String::new()))?;
        Ok(f.extents.iter().map(|e| e.len()).sum::<u64>() * f.cluster_size)
    }

    fn retrieval_pointers(&self, file: FileToken) -> WipeResult<Vec<RetrievalPointer>> {
        let inner = self.inner.lock().unwrap();
        let f = inner.files.get(&file).ok_or(WipeError::PathNotFound(String::new()))?;
        let mut vcn = 0u64;
        let mut out = Vec::new();
        for ext in &f.extents {
            vcn += ext.len();
            out.push(RetrievalPointer::real(vcn, ext.lcn_start));
        }
        Ok(out)
    }

    fn volume_bitmap(&self, _volume: VolumeToken) -> WipeResult<VolumeBitmap> {
        let inner = self.inner.lock().unwrap();
        let mut bytes = vec![0u8; (inner.total_clusters as usize).div_ceil(8)];
        for (lcn, &alloc) in inner.allocated.iter().enumerate() {
            if alloc {
                bytes[lcn / 8] |= 1 << (lcn % 8);
            }
        }
        Ok(VolumeBitmap::from_bytes(bytes, inner.total_clusters))
    }

    fn lock_file(&self, _file: FileToken) -> WipeResult<()> {
        Ok(())
    }

    fn write_zeros(&self, file: FileToken, offset: u64, len: u64) -> WipeResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        let cluster_size = inner.cluster_size;
        if !inner.files.contains_key(&file) {
            return Err(WipeError::PathNotFound(String::new()));
        }
        let needed_clusters = (offset + len).div_ceil(cluster_size);
        Self::extend_file(&mut inner, file, needed_clusters)?;

        let extents = inner.files[&file].extents.clone();
        let mut remaining = len;
        let mut pos = offset;
        while remaining > 0 {
            let cluster_index = pos / cluster_size;
            let Some(lcn) = extents
                .iter()
                .flat_map(|e| e.lcn_start..=e.lcn_end)
                .nth(cluster_index as usize)
            else {
                break;
            };
            inner.data.insert(lcn, vec![0u8; cluster_size as usize]);
            let consumed = cluster_size - (pos % cluster_size);
            let consumed = consumed.min(remaining);
            pos += consumed;
            remaining -= consumed;
        }
        Ok(len - remaining)
    }

    fn set_end_of_file(&self, file: FileToken, len: u64) -> WipeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let cluster_size = inner.cluster_size;
        let needed_clusters = len.div_ceil(cluster_size);

        if needed_clusters == 0 {
            if let Some(f) = inner.files.get_mut(&file) {
                let freed: Vec<u64> = f.extents.iter().flat_map(|e| e.lcn_start..=e.lcn_end).collect();
                f.extents.clear();
                drop(f);
                for lcn in freed {
                    inner.allocated[lcn as usize] = false;
                }
            }
            return Ok(());
        }
        Self::extend_file(&mut inner, file, needed_clusters)
    }

    fn flush(&self, _file: FileToken) -> WipeResult<()> {
        Ok(())
    }

    fn create_hidden_zero_file(&self, dir: &Path, name: &str) -> WipeResult<(FileToken, PathBuf)> {
        let mut inner = self.inner.lock().unwrap();
        let token = inner.next_token;
        inner.next_token += 1;
        let path = dir.join(name);
        inner.files.insert(
            token,
            FakeFile {
                path: path.clone(),
                extents: Vec::new(),
                cluster_size: inner.cluster_size,
                attrs: FileAttributes::default(),
                deleted: false,
            },
        );
        Ok((token, path))
    }

    fn move_file(
        &self,
        _volume: VolumeToken,
        file: FileToken,
        starting_vcn: u64,
        target_lcn: u64,
        cluster_count: u64,
    ) -> WipeResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        let target_range: Vec<u64> = (target_lcn..target_lcn + cluster_count).collect();

        for lcn in &target_range {
            if let Some(pos) = inner.spiked.iter().position(|s| s == lcn) {
                inner.spiked.remove(pos);
                return Ok(false);
            }
            if inner.allocated[*lcn as usize] {
                return Ok(false);
            }
        }

        let cluster_size = inner.cluster_size;
        let f = inner
            .files
            .get(&file)
            .ok_or(WipeError::PathNotFound(String::new()))?;
        let source_lcns: Vec<u64> = f
            .extents
            .iter()
            .flat_map(|e| e.lcn_start..=e.lcn_end)
            .skip(starting_vcn as usize)
            .take(cluster_count as usize)
            .collect();

        let moved_data: Vec<Vec<u8>> = source_lcns
            .iter()
            .map(|lcn| inner.data.remove(lcn).unwrap_or_else(|| vec![0u8; cluster_size as usize]))
            .collect();

        for lcn in &source_lcns {
            inner.allocated[*lcn as usize] = false;
        }
        for (i, lcn) in target_range.iter().enumerate() {
            inner.allocated[*lcn as usize] = true;
            inner.data.insert(*lcn, moved_data[i].clone());
        }

        if let Some(f) = inner.files.get_mut(&file) {
            f.extents = vec![Extent::new(target_lcn, target_lcn + cluster_count - 1)];
        }

        Ok(true)
    }

    fn delete_file(&self, path: &Path) -> WipeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let token = inner
            .files
            .iter()
            .find(|(_, f)| f.path == path && !f.deleted)
            .map(|(t, _)| *t);
        if let Some(token) = token {
            let freed: Vec<u64> = inner.files[&token]
                .extents
                .iter()
                .flat_map(|e| e.lcn_start..=e.lcn_end)
                .collect();
            for lcn in freed {
                inner.allocated[lcn as usize] = false;
            }
            inner.files.get_mut(&token).unwrap().deleted = true;
        }
        Ok(())
    }

    fn strip_read_only(&self, _path: &Path) -> WipeResult<()> {
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> WipeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        for f in inner.files.values_mut() {
            if f.path == from {
                f.path = to.to_path_buf();
            }
        }
        Ok(())
    }
}
