//! Health-state cache keyed by source-file modification time.
//!
//! Advisory validation of a large administration file is skipped when the
//! file has not changed since the last run; the cached verdict is
//! re-reported instead.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub struct HealthStateCache {
    dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
struct HealthState {
    modified_secs: u64,
    modified_nanos: u32,
    has_issues: bool,
}

impl HealthStateCache {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn state_path(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("administration");
        self.dir.join(format!("last-health_{stem}.json"))
    }

    fn current_mtime(source: &Path) -> Result<(u64, u32)> {
        let modified = fs::metadata(source)
            .and_then(|meta| meta.modified())
            .with_context(|| format!("failed to stat {}", source.display()))?;
        let since_epoch = modified
            .duration_since(UNIX_EPOCH)
            .context("file modification time predates the epoch")?;
        Ok((since_epoch.as_secs(), since_epoch.subsec_nanos()))
    }

    fn read_state(&self, source: &Path) -> Option<HealthState> {
        let body = fs::read_to_string(self.state_path(source)).ok()?;
        serde_json::from_str(&body).ok()
    }

    /// True when the file changed since the last [`Self::record`], or was
    /// never validated.
    ///
    /// # Errors
    /// Fails when the source file cannot be stat'ed.
    pub fn is_modified(&self, source: &Path) -> Result<bool> {
        let (secs, nanos) = Self::current_mtime(source)?;
        Ok(self.read_state(source).is_none_or(|state| {
            state.modified_secs != secs || state.modified_nanos != nanos
        }))
    }

    /// The verdict recorded for the file's current cached state, if any.
    #[must_use]
    pub fn last_state(&self, source: &Path) -> Option<bool> {
        self.read_state(source).map(|state| state.has_issues)
    }

    /// Records the validation verdict together with the file's current
    /// modification time.
    ///
    /// # Errors
    /// Fails when the source cannot be stat'ed or the state cannot be
    /// written.
    pub fn record(&self, source: &Path, has_issues: bool) -> Result<()> {
        let (modified_secs, modified_nanos) = Self::current_mtime(source)?;
        let state = HealthState {
            modified_secs,
            modified_nanos,
            has_issues,
        };
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create cache directory {}", self.dir.display()))?;
        let serialized = serde_json::to_string(&state).context("failed to serialize state")?;
        fs::write(self.state_path(source), serialized)
            .with_context(|| format!("failed to write health state for {}", source.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    #[test]
    fn unknown_files_count_as_modified() {
        let dir = must_ok(tempfile::tempdir());
        let source = dir.path().join("techniques.yaml");
        must_ok(fs::write(&source, "file_type: technique-administration\n"));

        let cache = HealthStateCache::new(dir.path().join("cache"));
        assert!(must_ok(cache.is_modified(&source)));
        assert_eq!(cache.last_state(&source), None);
    }

    #[test]
    fn recording_pins_the_current_mtime_and_verdict() {
        let dir = must_ok(tempfile::tempdir());
        let source = dir.path().join("techniques.yaml");
        must_ok(fs::write(&source, "file_type: technique-administration\n"));

        let cache = HealthStateCache::new(dir.path().join("cache"));
        must_ok(cache.record(&source, true));

        assert!(!must_ok(cache.is_modified(&source)));
        assert_eq!(cache.last_state(&source), Some(true));
    }

    #[test]
    fn touching_the_file_invalidates_the_state() {
        let dir = must_ok(tempfile::tempdir());
        let source = dir.path().join("techniques.yaml");
        must_ok(fs::write(&source, "file_type: technique-administration\n"));

        let cache = HealthStateCache::new(dir.path().join("cache"));
        must_ok(cache.record(&source, false));

        // Rewrite with different content; mtime granularity can be coarse,
        // so force a visibly different timestamp.
        must_ok(fs::write(&source, "file_type: technique-administration\nname: x\n"));
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(2);
        let file = must_ok(fs::File::options().append(true).open(&source));
        must_ok(file.set_modified(later));

        assert!(must_ok(cache.is_modified(&source)));
    }
}
