//! Single-instance process lock.
//!
//! A PID file under the state directory prevents two site2rag processes from
//! sharing one output directory. A lock whose process no longer exists is
//! treated as stale and taken over.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use site2rag_shared::{Result, Site2RagError};

const LOCK_FILE_NAME: &str = "process.lock";

/// Held for the lifetime of a run; the file is removed on drop.
pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    /// Acquire the lock for a state directory, failing with
    /// [`Site2RagError::LockHeld`] when another live process holds it.
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir).map_err(|e| Site2RagError::io(state_dir, e))?;
        let path = state_dir.join(LOCK_FILE_NAME);

        if let Ok(existing) = std::fs::read_to_string(&path) {
            if let Ok(pid) = existing.trim().parse::<u32>() {
                if pid != std::process::id() && process_exists(pid) {
                    return Err(Site2RagError::LockHeld { pid });
                }
                warn!(pid, "removing stale process lock");
            }
        }

        std::fs::write(&path, std::process::id().to_string())
            .map_err(|e| Site2RagError::io(&path, e))?;
        debug!(path = %path.display(), "process lock acquired");

        Ok(Self { path })
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove process lock");
        }
    }
}

/// Whether a PID names a live process.
#[cfg(target_os = "linux")]
fn process_exists(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_exists(_pid: u32) -> bool {
    // Without a portable liveness probe, treat any recorded PID as live.
    true
}
