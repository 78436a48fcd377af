use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Retention limits for the daily files written by `tracing_appender`.
#[derive(Clone, Debug)]
pub struct LogRotationConfig {
    pub max_files: usize,
    pub max_age: Duration,
    pub max_total_bytes: u64,
}

impl Default for LogRotationConfig {
    fn default() -> Self {
        Self {
            max_files: 14,
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            max_total_bytes: 512 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LogRotationManager {
    config: LogRotationConfig,
}

struct LogFile {
    path: PathBuf,
    modified: SystemTime,
    len: u64,
}

impl LogRotationManager {
    pub fn new(config: LogRotationConfig) -> Self {
        Self { config }
    }

    /// Deletes files starting with `prefix` that exceed the age, size or count
    /// limits. The newest file is always kept. Returns the number removed.
    pub fn check_and_rotate(&self, log_dir: &Path, prefix: &str) -> std::io::Result<usize> {
        let mut files = Self::find_log_files(log_dir, prefix)?;
        // Newest first.
        files.sort_by(|a, b| b.modified.cmp(&a.modified));

        let now = SystemTime::now();
        let mut total: u64 = 0;
        let mut removed = 0;

        for (idx, file) in files.iter().enumerate() {
            total = total.saturating_add(file.len);
            if idx == 0 {
                continue;
            }
            let age = now.duration_since(file.modified).unwrap_or_default();
            let expired = age > self.config.max_age
                || total > self.config.max_total_bytes
                || idx >= self.config.max_files;
            if expired && fs::remove_file(&file.path).is_ok() {
                tracing::debug!("Removed old log file {}", file.path.display());
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn find_log_files(log_dir: &Path, prefix: &str) -> std::io::Result<Vec<LogFile>> {
        let mut files = Vec::new();
        if !log_dir.exists() {
            return Ok(files);
        }
        for entry in fs::read_dir(log_dir)? {
            let path = entry?.path();
            let matches = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with(prefix))
                .unwrap_or(false);
            if !matches || !path.is_file() {
                continue;
            }
            let Ok(meta) = fs::metadata(&path) else { continue };
            files.push(LogFile {
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                len: meta.len(),
                path,
            });
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_limit_keeps_newest() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("tempdir: {}", e),
        };
        for i in 0..4 {
            let path = dir.path().join(format!("chatrelay.log.2025-01-0{}", i + 1));
            if let Err(e) = fs::write(&path, b"line\n") {
                panic!("write: {}", e);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        if let Err(e) = fs::write(dir.path().join("other.txt"), b"x") {
            panic!("write: {}", e);
        }

        let manager = LogRotationManager::new(LogRotationConfig {
            max_files: 2,
            ..LogRotationConfig::default()
        });
        let removed = match manager.check_and_rotate(dir.path(), "chatrelay.log") {
            Ok(n) => n,
            Err(e) => panic!("rotate: {}", e),
        };
        assert_eq!(removed, 2);
        assert!(dir.path().join("chatrelay.log.2025-01-04").exists());
        assert!(dir.path().join("chatrelay.log.2025-01-03").exists());
        assert!(dir.path().join("other.txt").exists());
    }

    #[test]
    fn test_missing_dir_is_noop() {
        let manager = LogRotationManager::new(LogRotationConfig::default());
        let result = manager.check_and_rotate(Path::new("/nonexistent/chatrelay-logs"), "x");
        assert!(matches!(result, Ok(0)));
    }
}
