//! Direct wipe strategy: overwrite a regular file's clusters in place.

use crate::engine::extents::Extent;
use crate::engine::volume::{FileToken, VolumeIo};
use crate::error::WipeResult;

/// Zero buffers are written in this size before the next `WriteFile` call;
/// matches the teacher's chunking for large sequential writes.
pub const WRITE_CHUNK_BYTES: u64 = 512 * 1024;

/// Overwrites `file`'s current on-disk content with zeros.
///
/// `extents` should be the file's current physical extents; an empty list
/// means the file's content is resident in filesystem metadata (small
/// FAT/NTFS files), in which case `file_size` bytes are written instead.
pub fn direct_wipe(
    volume: &dyn VolumeIo,
    file: FileToken,
    cluster_size: u64,
    file_size: u64,
    extents: &[Extent],
) -> WipeResult<u64> {
    let _ = volume.lock_file(file);

    let write_length = if extents.is_empty() {
        file_size
    } else {
        extents.iter().map(|e| e.len()).sum::<u64>() * cluster_size
    };

    let mut offset = 0u64;
    while offset < write_length {
        let remaining = write_length - offset;
        let chunk = remaining.min(WRITE_CHUNK_BYTES);
        let written = volume.write_zeros(file, offset, chunk)?;
        offset += written;
        if written == 0 {
            break;
        }
    }

    volume.flush(file)?;
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::volume::fake::FakeVolume;
    use crate::engine::volume::FileAttributes;
    use std::path::Path;

    #[test]
    fn wipes_full_extent_span() {
        let vol = FakeVolume::new(4096, 64);
        let extents = vec![Extent::new(0, 2)];
        let token = vol.create_file_with_extents(
            Path::new("C:\\tmp\\a.bin"),
            extents.clone(),
            FileAttributes::default(),
            &[0xAAu8; 12288],
        );

        let written = direct_wipe(&vol, token, 4096, 12288, &extents).unwrap();
        assert_eq!(written, 12288);
        for lcn in 0..3 {
            assert!(vol.cluster_is_zero(lcn));
        }
    }

    #[test]
    fn resident_file_uses_file_size_when_no_extents() {
        let vol = FakeVolume::new(4096, 8);
        let token = vol.create_file_with_extents(
            Path::new("C:\\tmp\\tiny.bin"),
            Vec::new(),
            FileAttributes::default(),
            &[],
        );
        // No backing extents yet: direct_wipe falls back to file_size as
        // the write length, and the fake volume auto-allocates a cluster
        // to satisfy the write, the same way a real filesystem would
        // extend a resident file's allocation on first write.
        let written = direct_wipe(&vol, token, 4096, 300, &[]).unwrap();
        assert_eq!(written, 300);
    }
}
