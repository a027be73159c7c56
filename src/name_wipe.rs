//! Name wipe: renames a file through two passes of random names before
//! unlinking, so the original filename leaves less residue in directory
//! entries and journal records.

use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, instrument};

use crate::error::{classify_io_error, WipeResult};

pub(crate) const PASS_ONE_START_LEN: usize = 226;
pub(crate) const PASS_ONE_SHRINK: usize = 10;
pub(crate) const PASS_TWO_START_LEN: usize = 1;
pub(crate) const MAX_ATTEMPTS: usize = 100;

fn random_name(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len.max(1))
        .map(char::from)
        .collect()
}

fn rename_pass(path: &Path, mut len: usize, shrink: bool) -> WipeResult<PathBuf> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut current = path.to_path_buf();

    for attempt in 0..MAX_ATTEMPTS {
        let candidate = dir.join(random_name(len));
        match std::fs::rename(&current, &candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) => {
                debug!(attempt, len, error = %e, "rename attempt failed");
                if shrink {
                    len = len.saturating_sub(PASS_ONE_SHRINK).max(1);
                } else {
                    len += 1;
                }
                if attempt == MAX_ATTEMPTS - 1 {
                    return Err(classify_io_error(&current.to_string_lossy(), e));
                }
            }
        }
    }
    Ok(current)
}

/// Renames `path` twice through random names and unlinks the result,
/// returning the path that was actually removed (useful for logging).
#[instrument(fields(path = %path.display()))]
pub fn wipe_name(path: &Path) -> WipeResult<PathBuf> {
    let after_pass_one = rename_pass(path, PASS_ONE_START_LEN, true)?;
    let after_pass_two = rename_pass(&after_pass_one, PASS_TWO_START_LEN, false)?;
    std::fs::remove_file(&after_pass_two).map_err(|e| classify_io_error(&after_pass_two.to_string_lossy(), e))?;
    Ok(after_pass_two)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renames_through_two_passes_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("secret.txt");
        std::fs::write(&original, b"hello").unwrap();

        let removed_as = wipe_name(&original).unwrap();
        assert!(!original.exists());
        assert!(!removed_as.exists());
        assert_ne!(removed_as, original);
    }
}
