//! Content-addressed, dev-stage-only cache of successful task runs.
//!
//! One file per task at `<cache-dir>/<task_id>.txt` holding `"<key>,<unix
//! seconds>"`. Any record that fails to parse, has expired, or carries a
//! stale key is deleted on read rather than trusted — a crashed write leaves
//! behind garbage that the next read clears.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use crate::constants::CACHE_DIR_RELATIVE;

pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Resolves `~/.sql-scheduler/cache`, creating it if absent.
    pub fn resolve() -> anyhow::Result<Self> {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let dir = Path::new(&home).join(CACHE_DIR_RELATIVE);
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    #[cfg(test)]
    pub fn at(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn record_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", task_id.to_lowercase()))
    }

    /// Removes the whole cache directory tree, recreating it empty. Used by
    /// `--clear-cache`, which runs before any task is parsed.
    pub fn clear(&self) -> anyhow::Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn is_fresh(&self, task_id: &str, cache_key: &str, ttl: Duration) -> bool {
        let path = self.record_path(task_id);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return false,
        };
        let Some((stored_key, stored_time)) = contents.trim().split_once(',') else {
            let _ = fs::remove_file(&path);
            return false;
        };
        let Ok(stored_time) = stored_time.parse::<u64>() else {
            let _ = fs::remove_file(&path);
            return false;
        };
        let now = unix_seconds();
        if now.saturating_sub(stored_time) > ttl.as_secs() {
            let _ = fs::remove_file(&path);
            return false;
        }
        if stored_key != cache_key {
            let _ = fs::remove_file(&path);
            return false;
        }
        true
    }

    pub fn record(&self, task_id: &str, cache_key: &str) -> anyhow::Result<()> {
        let path = self.record_path(task_id);
        fs::write(path, format!("{},{}", cache_key, unix_seconds()))?;
        Ok(())
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// `cache_key = sha256(ddl_rewritten) || "_" || sha256(dml_rewritten)`.
pub fn cache_key(ddl_rewritten: &str, dml_rewritten: &str) -> String {
    format!("{}_{}", hex_sha256(ddl_rewritten), hex_sha256(dml_rewritten))
}

fn hex_sha256(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_record_is_not_fresh() {
        let dir = tempdir().unwrap();
        let cache = CacheStore::at(dir.path().to_path_buf());
        assert!(!cache.is_fresh("public.a", "key", Duration::from_secs(60)));
    }

    #[test]
    fn record_then_is_fresh_roundtrip() {
        let dir = tempdir().unwrap();
        let cache = CacheStore::at(dir.path().to_path_buf());
        cache.record("public.a", "key123").unwrap();
        assert!(cache.is_fresh("public.a", "key123", Duration::from_secs(60)));
    }

    #[test]
    fn mismatched_key_invalidates_and_deletes() {
        let dir = tempdir().unwrap();
        let cache = CacheStore::at(dir.path().to_path_buf());
        cache.record("public.a", "old_key").unwrap();
        assert!(!cache.is_fresh("public.a", "new_key", Duration::from_secs(60)));
        assert!(!cache.record_path("public.a").exists());
    }

    #[test]
    fn expired_record_invalidates() {
        let dir = tempdir().unwrap();
        let cache = CacheStore::at(dir.path().to_path_buf());
        let path = cache.record_path("public.a");
        let stale_time = unix_seconds() - 1000;
        fs::write(&path, format!("key,{stale_time}")).unwrap();
        assert!(!cache.is_fresh("public.a", "key", Duration::from_secs(10)));
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_record_is_deleted() {
        let dir = tempdir().unwrap();
        let cache = CacheStore::at(dir.path().to_path_buf());
        let path = cache.record_path("public.a");
        fs::write(&path, "garbage-not-parseable").unwrap();
        assert!(!cache.is_fresh("public.a", "key", Duration::from_secs(60)));
        assert!(!path.exists());
    }

    #[test]
    fn cache_key_changes_with_either_input() {
        let k1 = cache_key("ddl a", "dml a");
        let k2 = cache_key("ddl b", "dml a");
        let k3 = cache_key("ddl a", "dml b");
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
    }
}
