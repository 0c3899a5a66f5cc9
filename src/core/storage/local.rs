use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use super::{FileInfo, PresignOperation, StorageBackend, StorageError};

/// Buckets as directories under `root`.
pub struct LocalStorage {
    root: PathBuf,
    base_url: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == "." || bucket == ".." {
            return Err(StorageError::InvalidKey(bucket.to_string()));
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key.trim_start_matches('/'));
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.trim_start_matches('/').is_empty() || key.contains('\\') || !clean {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.bucket_dir(bucket)?.join(relative))
    }
}

fn io_error(e: std::io::Error, bucket: &str, key: &str) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    } else {
        StorageError::Io(e.to_string())
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| io_error(e, bucket, key))
    }

    async fn write(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| io_error(e, bucket, key))
    }

    async fn list_files(&self, bucket: &str, prefix: &str) -> Result<Vec<FileInfo>, StorageError> {
        let dir = self.bucket_dir(bucket)?;
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let mut pending = vec![dir.clone()];
        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StorageError::Io(e.to_string()))?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&dir) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                    files.push(FileInfo { key, size });
                }
            }
        }
        files.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(files)
    }

    async fn presign_url(
        &self,
        bucket: &str,
        key: &str,
        operation: PresignOperation,
        expiry: Duration,
    ) -> Result<String, StorageError> {
        self.object_path(bucket, key)?;
        let expires = chrono::Utc::now()
            + chrono::Duration::from_std(expiry).unwrap_or_else(|_| chrono::Duration::zero());
        let key: Vec<String> = key
            .trim_start_matches('/')
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        Ok(format!(
            "{}/buckets/{}/{}?operation={}&expires={}",
            self.base_url,
            urlencoding::encode(bucket),
            key.join("/"),
            operation.as_str(),
            expires.timestamp()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://localhost:9001");

        storage
            .write("images", "uploads/cat.png", b"meow".to_vec())
            .await
            .unwrap();
        storage
            .write("images", "readme.txt", b"hi".to_vec())
            .await
            .unwrap();
        assert_eq!(
            storage.read("images", "uploads/cat.png").await.unwrap(),
            b"meow"
        );

        let all = storage.list_files("images", "").await.unwrap();
        let keys: Vec<&str> = all.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["readme.txt", "uploads/cat.png"]);
        assert_eq!(storage.list_files("images", "uploads/").await.unwrap().len(), 1);

        storage.delete("images", "uploads/cat.png").await.unwrap();
        assert!(matches!(
            storage.read("images", "uploads/cat.png").await,
            Err(StorageError::NotFound { .. })
        ));
        assert!(matches!(
            storage.delete("images", "uploads/cat.png").await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://localhost:9001");
        assert!(matches!(
            storage.write("images", "../escape", vec![]).await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            storage.read("..", "x").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(storage.list_files("missing", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn presign_points_at_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://localhost:9001/");
        let url = storage
            .presign_url("images", "a/b.png", PresignOperation::Write, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:9001/buckets/images/a/b.png?operation=write&expires="));
    }

    #[tokio::test]
    async fn presign_escapes_key_segments() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://localhost:9001");
        let url = storage
            .presign_url(
                "images",
                "summer 2024/cat?#1.png",
                PresignOperation::Read,
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert!(url.starts_with(
            "http://localhost:9001/buckets/images/summer%202024/cat%3F%231.png?operation=read&expires="
        ));
    }
}
