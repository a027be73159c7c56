//! Cluster-level secure file-erasure engine for NTFS/FAT volumes, plus the
//! portable fallbacks (content overwrite, name wipe) used when the
//! cluster-level path is unavailable.

pub mod content_wipe;
pub mod engine;
pub mod error;
pub mod free_space;
pub mod fs_ops;
pub mod name_wipe;
pub mod options;
pub mod ui;

pub use content_wipe::wipe_contents;
pub use engine::{file_wipe, WipeOutcome};
pub use error::{WipeError, WipeResult};
pub use free_space::{wipe_path, FillProgress};
pub use fs_ops::delete;
pub use name_wipe::wipe_name;
pub use options::WipeOptions;

use std::sync::atomic::{AtomicBool, Ordering};

/// Set by the signal handler on Ctrl+C; consulted by `wipe_path` between
/// progress yields to honor cooperative cancellation.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

pub fn set_interrupted() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

pub fn reset_interrupted() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}
