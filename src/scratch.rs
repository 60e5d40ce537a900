//! Per-run scratch directory.
//!
//! All intermediate transforms, volumes and tag files live here. The
//! directory is removed when the [`ScratchDir`] is dropped, which covers
//! normal completion, early errors and cancellation alike.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;

#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
    counter: AtomicU64,
}

impl ScratchDir {
    /// Create `rot_<pid>_XXXX` under `base`, or under `$TMPDIR` / the system
    /// temp directory when no base is given.
    pub fn create(base: Option<&Path>) -> std::io::Result<Self> {
        let base = base.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&base)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("rot_{}_", std::process::id()))
            .tempdir_in(&base)?;
        tracing::debug!(path = %dir.path().display(), "scratch directory created");
        Ok(Self {
            dir,
            counter: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A fresh, not yet existing path ending in `suffix` (e.g. `.xfm`, `_blur.mnc`).
    pub fn file(&self, suffix: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.dir.path().join(format!("rot_{n}{suffix}"))
    }

    /// Remove the directory now and report failures instead of ignoring them.
    pub fn close(self) -> std::io::Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        tracing::debug!(path = %path.display(), "scratch directory removed");
        Ok(())
    }
}
