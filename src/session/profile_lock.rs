use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

const LOCK_FILE: &str = "SingletonLock";

/// Clears the browser profile lock a crashed engine leaves behind.
#[derive(Debug, Clone)]
pub struct ProfileLock {
    session_dir: PathBuf,
}

impl ProfileLock {
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self { session_dir: session_dir.into() }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.session_dir.join(LOCK_FILE)
    }

    pub fn is_held(&self) -> bool {
        self.lock_path().exists()
    }

    /// Kill browser processes still bound to the profile and remove the lock
    /// file. Both steps are best effort.
    pub async fn clear_stale(&self) {
        kill_profile_processes(&self.session_dir).await;

        let path = self.lock_path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!("[LOCK] removed stale {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("[LOCK] no lock file at {}", path.display())
            }
            Err(e) => warn!("[LOCK] could not remove {}: {e}", path.display()),
        }
    }
}

#[cfg(unix)]
async fn kill_profile_processes(session_dir: &Path) {
    let pattern = format!("user-data-dir=.*{}", session_dir.display());
    match tokio::process::Command::new("pkill")
        .arg("-9")
        .arg("-f")
        .arg(&pattern)
        .status()
        .await
    {
        // pkill exits 1 when nothing matched.
        Ok(status) if status.success() => {
            warn!("[LOCK] killed lingering browser processes for {}", session_dir.display())
        }
        Ok(_) => debug!("[LOCK] no lingering browser processes"),
        Err(e) => warn!("[LOCK] pkill unavailable: {e}"),
    }
}

#[cfg(not(unix))]
async fn kill_profile_processes(_session_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clear_removes_lock_file() {
        let dir = std::env::temp_dir().join(format!("wa-gateway-lock-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let lock = ProfileLock::new(&dir);
        std::fs::write(lock.lock_path(), b"host-123").unwrap();
        assert!(lock.is_held());

        lock.clear_stale().await;
        assert!(!lock.is_held());

        // Missing lock is not an error.
        lock.clear_stale().await;
        let _ = std::fs::remove_dir_all(&dir);
    }
}
