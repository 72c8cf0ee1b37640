use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct BackendConfig {
    pub root_dir: String,
    #[serde(default)]
    pub sync_to_disk: bool,
}

#[derive(Clone, Debug)]
pub struct Backend {
    root: PathBuf,
    sync_to_disk: bool,
}

impl Backend {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            root: PathBuf::from(&config.root_dir),
            sync_to_disk: config.sync_to_disk,
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    pub async fn read(&self, path: &str) -> Result<Vec<u8>, std::io::Error> {
        fs::read(self.full_path(path)).await
    }

    pub async fn read_to_string(&self, path: &str) -> Result<String, std::io::Error> {
        fs::read_to_string(self.full_path(path)).await
    }

    /// Opens a temporary sibling of `path`. Content written to it becomes visible at `path`
    /// only on [`StagedFile::commit`]; dropping it removes the temporary file.
    pub async fn stage(&self, path: &str) -> Result<StagedFile, std::io::Error> {
        let target = self.full_path(path);
        let parent = target
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        fs::create_dir_all(&parent).await?;

        let temp_file =
            tokio::task::spawn_blocking(move || tempfile::NamedTempFile::new_in(parent))
                .await
                .map_err(std::io::Error::other)??;
        let (file, temp_path) = temp_file.into_parts();

        Ok(StagedFile {
            file: fs::File::from_std(file),
            temp_path,
            target,
            sync_to_disk: self.sync_to_disk,
        })
    }

    /// Writes `data` to a temporary sibling file and renames it into place, so readers observe
    /// either nothing or the complete content.
    pub async fn write(&self, path: &str, data: &[u8]) -> Result<(), std::io::Error> {
        let mut staged = self.stage(path).await?;
        staged.write_all(data).await?;
        staged.commit().await
    }

    pub async fn exists(&self, path: &str) -> Result<bool, std::io::Error> {
        fs::try_exists(self.full_path(path)).await
    }

    pub async fn file_size(&self, path: &str) -> Result<u64, std::io::Error> {
        let metadata = fs::metadata(self.full_path(path)).await?;
        Ok(metadata.len())
    }

    pub async fn list_dir(&self, path: &str) -> Result<Vec<String>, std::io::Error> {
        let full_path = self.full_path(path);
        let mut entries = Vec::new();

        let mut read_dir = match fs::read_dir(full_path).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e),
        };

        while let Some(entry) = read_dir.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                entries.push(name.to_string());
            }
        }

        Ok(entries)
    }

    pub async fn open_file(&self, path: &str) -> Result<fs::File, std::io::Error> {
        fs::File::open(self.full_path(path)).await
    }
}

/// A file being written next to its final location.
pub struct StagedFile {
    file: fs::File,
    temp_path: TempPath,
    target: PathBuf,
    sync_to_disk: bool,
}

impl StagedFile {
    pub async fn write_all(&mut self, data: &[u8]) -> Result<(), std::io::Error> {
        self.file.write_all(data).await
    }

    /// Flushes the content and renames the file to its final path.
    pub async fn commit(mut self) -> Result<(), std::io::Error> {
        self.file.flush().await?;
        if self.sync_to_disk {
            self.file.sync_all().await?;
        }
        drop(self.file);

        let temp_path = self.temp_path;
        let target = self.target;
        tokio::task::spawn_blocking(move || temp_path.persist(target))
            .await
            .map_err(std::io::Error::other)??;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend(tmp_dir: &TempDir, sync_to_disk: bool) -> Backend {
        Backend::new(&BackendConfig {
            root_dir: tmp_dir.path().to_string_lossy().into_owned(),
            sync_to_disk,
        })
    }

    #[tokio::test]
    async fn test_new() {
        let config = BackendConfig {
            root_dir: "/test/path".to_string(),
            sync_to_disk: true,
        };
        let backend = Backend::new(&config);
        assert_eq!(backend.root, PathBuf::from("/test/path"));
        assert!(backend.sync_to_disk);
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp_dir = TempDir::new().unwrap();
        let backend = backend(&tmp_dir, false);

        backend.write("a/b/test.txt", b"hello world").await.unwrap();
        assert_eq!(backend.read("a/b/test.txt").await.unwrap(), b"hello world");
        assert_eq!(
            backend.read_to_string("a/b/test.txt").await.unwrap(),
            "hello world"
        );
        assert_eq!(backend.file_size("a/b/test.txt").await.unwrap(), 11);
        assert!(backend.exists("a/b/test.txt").await.unwrap());
        assert!(!backend.exists("a/b/missing.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_write_with_sync_to_disk_overwrites() {
        let tmp_dir = TempDir::new().unwrap();
        let backend = backend(&tmp_dir, true);

        backend.write("test.txt", b"first").await.unwrap();
        backend.write("test.txt", b"second").await.unwrap();
        assert_eq!(backend.read("test.txt").await.unwrap(), b"second");

        // no temporary file is left behind
        assert_eq!(backend.list_dir("").await.unwrap(), vec!["test.txt"]);
    }

    #[tokio::test]
    async fn test_dropped_staged_file_leaves_nothing() {
        let tmp_dir = TempDir::new().unwrap();
        let backend = backend(&tmp_dir, false);

        let mut staged = backend.stage("a/partial").await.unwrap();
        staged.write_all(b"half of it").await.unwrap();
        drop(staged);

        assert!(!backend.exists("a/partial").await.unwrap());
        assert!(backend.list_dir("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_dir_missing() {
        let tmp_dir = TempDir::new().unwrap();
        let backend = backend(&tmp_dir, false);

        assert!(backend.list_dir("nope").await.unwrap().is_empty());
    }
}
