//! Single-flight guard per session. Two planners reading overlapping
//! state and then executing divergent plans against the same session can
//! race, so every `apply` holds an advisory file lock keyed by session
//! name from before observation until after execution.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use fs2::FileExt;
use tracing::debug;

use crate::error::ForemanError;

pub struct SessionLock {
    file: std::fs::File,
}

impl SessionLock {
    /// Non-blocking: a held lock means another apply is in flight and the
    /// caller should report that, not queue up behind it.
    pub fn acquire(dir: &Path, session: &str) -> Result<Self, ForemanError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.lock", session));

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(ForemanError::LockBusy(session.to_string()));
        }

        file.set_len(0)?;
        writeln!(file, "pid={}", std::process::id())?;
        debug!(session, path = %path.display(), "lock acquired");
        Ok(Self { file })
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
