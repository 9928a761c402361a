//! Policy hot reload.
//!
//! The watcher compares the policy file's modification time once per cycle.
//! A changed file is parsed and validated; if that fails the caller keeps
//! running with the previous policy.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use pipescale_core::{ConfigResult, ControllerPolicy};

#[derive(Debug)]
pub struct PolicyWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl PolicyWatcher {
    /// Load the policy at `path` and start watching it.
    pub fn open(path: &Path) -> ConfigResult<(Self, ControllerPolicy)> {
        let last_modified = modified(path)?;
        let policy = ControllerPolicy::from_file(path)?;
        Ok((
            Self {
                path: path.to_path_buf(),
                last_modified: Some(last_modified),
            },
            policy,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload the policy if the file changed since the last check.
    ///
    /// `None` means unchanged. A file that changed but fails to load is
    /// reported once; the same modification time is not retried.
    pub fn check(&mut self) -> Option<ConfigResult<ControllerPolicy>> {
        let current = match modified(&self.path) {
            Ok(t) => t,
            Err(e) => return Some(Err(e)),
        };
        if self.last_modified == Some(current) {
            return None;
        }
        debug!(path = %self.path.display(), "policy file changed");
        self.last_modified = Some(current);
        Some(ControllerPolicy::from_file(&self.path))
    }
}

fn modified(path: &Path) -> ConfigResult<SystemTime> {
    Ok(std::fs::metadata(path)?.modified()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{File, FileTimes};
    use std::time::Duration;

    const POLICY: &str = r#"
[scaling]
cooldown = "30s"

[[pools]]
id = "bearing"
stream = "sensor_data"
group = "bearing_diagnosis"
"#;

    /// Rewrite the file and push its mtime forward so the change is visible
    /// even on coarse-grained filesystems.
    fn rewrite(path: &Path, content: &str, bump_secs: u64) {
        std::fs::write(path, content).unwrap();
        let file = File::options().write(true).open(path).unwrap();
        let t = SystemTime::now() + Duration::from_secs(bump_secs);
        file.set_times(FileTimes::new().set_modified(t)).unwrap();
    }

    #[test]
    fn unchanged_file_is_not_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, POLICY).unwrap();

        let (mut watcher, policy) = PolicyWatcher::open(&path).unwrap();
        assert_eq!(policy.scaling.cooldown, Duration::from_secs(30));
        assert!(watcher.check().is_none());
    }

    #[test]
    fn changed_file_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, POLICY).unwrap();
        let (mut watcher, _) = PolicyWatcher::open(&path).unwrap();

        rewrite(&path, &POLICY.replace("30s", "90s"), 10);

        let reloaded = watcher.check().unwrap().unwrap();
        assert_eq!(reloaded.scaling.cooldown, Duration::from_secs(90));
        assert!(watcher.check().is_none());
    }

    #[test]
    fn invalid_change_is_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, POLICY).unwrap();
        let (mut watcher, _) = PolicyWatcher::open(&path).unwrap();

        rewrite(&path, "[scaling]\nhigh_load_threshold = 0.1\nlow_load_threshold = 0.9\n", 10);

        assert!(watcher.check().unwrap().is_err());
        assert!(watcher.check().is_none());
    }

    #[test]
    fn missing_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PolicyWatcher::open(&dir.path().join("absent.toml")).is_err());
    }
}
