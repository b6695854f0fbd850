//! Filesystem-backed byte store for rendered artifacts and module records.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

use crate::application::repos::{ByteStore, StoreError};

const STAGING_SUFFIX: &str = ".tmp";

/// Byte store rooted at a directory.
///
/// Paths are relative and may not escape the root.
#[derive(Debug, Clone)]
pub struct FileByteStore {
    root: PathBuf,
}

impl FileByteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, stored_path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(stored_path.trim_start_matches('/'));
        if relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(StoreError::InvalidPath {
                path: stored_path.to_string(),
            });
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ByteStore for FileByteStore {
    async fn exists_file(&self, path: &str) -> Result<bool, StoreError> {
        let absolute = self.resolve(path)?;
        Ok(fs::try_exists(&absolute).await?)
    }

    /// Writes go to a sibling temp file first, so readers never observe a
    /// partially written artifact.
    async fn write_file(&self, path: &str, bytes: Bytes) -> Result<(), StoreError> {
        let absolute = self.resolve(path)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let staging =
            absolute.with_extension(format!("{}{STAGING_SUFFIX}", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&staging).await?;
        if let Err(err) = file.write_all(&bytes).await {
            drop(file);
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }
        file.flush().await?;
        drop(file);

        fs::rename(&staging, &absolute).await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Option<Bytes>, StoreError> {
        let absolute = self.resolve(path)?;
        match fs::read(&absolute).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_file(&self, path: &str) -> Result<bool, StoreError> {
        let absolute = self.resolve(path)?;
        match fs::remove_file(&absolute).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Staging files of in-flight writes are not listed.
    async fn list_files(&self, dir: &str) -> Result<Vec<String>, StoreError> {
        let absolute = self.resolve(dir)?;
        let mut entries = match fs::read_dir(&absolute).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str()
                && !name.ends_with(STAGING_SUFFIX)
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn write_read_delete() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileByteStore::new(dir.path());
        let path = "wcm/repositories/r/branches/b/pages/k/page.html";

        assert!(!store.exists_file(path).await.expect("exists"));
        assert_eq!(store.read_file(path).await.expect("read"), None);

        store
            .write_file(path, Bytes::from_static(b"<html></html>"))
            .await
            .expect("write");
        assert!(store.exists_file(path).await.expect("exists"));
        assert_eq!(
            store.read_file(path).await.expect("read"),
            Some(Bytes::from_static(b"<html></html>"))
        );

        assert!(store.delete_file(path).await.expect("delete"));
        assert!(!store.delete_file(path).await.expect("delete"));
    }

    #[tokio::test]
    async fn overwrite_replaces_content() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileByteStore::new(dir.path());
        store.write_file("a.txt", Bytes::from_static(b"one")).await.expect("write");
        store.write_file("a.txt", Bytes::from_static(b"two")).await.expect("write");
        assert_eq!(
            store.read_file("a.txt").await.expect("read"),
            Some(Bytes::from_static(b"two"))
        );
    }

    #[tokio::test]
    async fn leading_slash_is_relative_to_root() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileByteStore::new(dir.path());
        store.write_file("/x/y.txt", Bytes::from_static(b"y")).await.expect("write");
        assert!(dir.path().join("x/y.txt").exists());
    }

    #[tokio::test]
    async fn list_files_names_direct_children() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileByteStore::new(dir.path());
        store.write_file("d/b.json", Bytes::from_static(b"b")).await.expect("write");
        store.write_file("d/a.json", Bytes::from_static(b"a")).await.expect("write");
        store.write_file("d/sub/c.json", Bytes::from_static(b"c")).await.expect("write");
        std::fs::write(dir.path().join("d/x.1234.tmp"), b"partial").expect("staging");

        assert_eq!(
            store.list_files("d").await.expect("list"),
            vec!["a.json", "b.json", "sub"]
        );
        assert!(store.list_files("missing").await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileByteStore::new(dir.path());
        for path in ["../escape", "a/../../b", ""] {
            let err = store.read_file(path).await.expect_err("invalid path");
            assert!(matches!(err, StoreError::InvalidPath { .. }));
        }
    }
}
