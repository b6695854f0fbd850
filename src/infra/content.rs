//! TOML-file content store.
//!
//! Each repository branch is one file, `{root}/{repository}/{branch}.toml`,
//! holding an array of records:
//!
//! ```toml
//! [[records]]
//! id = "blog"
//! _type = "wcm:page"
//! uris = ["/blog/{slug}"]
//! template = "templates/blog.html"
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs;
use tracing::debug;

use crate::application::repos::{ContentStore, StoreError};
use crate::domain::entities::ContentRecord;
use crate::domain::types::BranchContext;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BranchFile {
    records: Vec<ContentRecord>,
}

#[derive(Debug, Clone)]
pub struct FileContentStore {
    root: PathBuf,
}

impl FileContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn branch_file(&self, ctx: &BranchContext) -> Result<PathBuf, StoreError> {
        for segment in [&ctx.repository_id, &ctx.branch_id] {
            if !is_plain_segment(segment) {
                return Err(StoreError::InvalidPath {
                    path: format!("{}/{}", ctx.repository_id, ctx.branch_id),
                });
            }
        }
        Ok(self
            .root
            .join(&ctx.repository_id)
            .join(format!("{}.toml", ctx.branch_id)))
    }

    /// Records in file order. A missing file is an empty branch.
    async fn load(&self, ctx: &BranchContext) -> Result<Vec<ContentRecord>, StoreError> {
        let path = self.branch_file(ctx)?;
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No content file for branch");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        let file: BranchFile = toml::from_str(&text)
            .map_err(|err| StoreError::decode(path.display().to_string(), err))?;
        Ok(file.records)
    }
}

fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\'])
}

#[async_trait]
impl ContentStore for FileContentStore {
    async fn query_by_type(
        &self,
        ctx: &BranchContext,
        type_qname: &str,
    ) -> Result<Vec<ContentRecord>, StoreError> {
        let mut records = self.load(ctx).await?;
        records.retain(|record| record.type_qname == type_qname);
        Ok(records)
    }

    async fn read_record(
        &self,
        ctx: &BranchContext,
        id: &str,
    ) -> Result<Option<ContentRecord>, StoreError> {
        Ok(self
            .load(ctx)
            .await?
            .into_iter()
            .find(|record| record.id == id))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::domain::entities::{PAGE_TYPE, TEMPLATE_TYPE};

    const BRANCH: &str = r#"
[[records]]
id = "blog"
_type = "wcm:page"
title = "Blog"
uris = ["/blog/{slug}"]
template = "tpl-blog"

[[records]]
id = "tpl-blog"
_type = "wcm:template"
path = "templates/blog.html"

[[records]]
id = "home"
_type = "wcm:page"
uris = ["/"]
template = "templates/home.html"
"#;

    fn ctx() -> BranchContext {
        BranchContext::new("example.com", "site", "master")
    }

    async fn store_with(contents: &str) -> (TempDir, FileContentStore) {
        let dir = TempDir::new().expect("tempdir");
        let repo = dir.path().join("site");
        std::fs::create_dir_all(&repo).expect("mkdir");
        std::fs::write(repo.join("master.toml"), contents).expect("write");
        let store = FileContentStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn queries_by_type_in_file_order() {
        let (_dir, store) = store_with(BRANCH).await;
        let pages = store.query_by_type(&ctx(), PAGE_TYPE).await.expect("query");
        let ids: Vec<_> = pages.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(ids, ["blog", "home"]);
        assert_eq!(pages[0].str_field("title"), Some("Blog"));
    }

    #[tokio::test]
    async fn reads_single_record() {
        let (_dir, store) = store_with(BRANCH).await;
        let template = store
            .read_record(&ctx(), "tpl-blog")
            .await
            .expect("read")
            .expect("present");
        assert_eq!(template.type_qname, TEMPLATE_TYPE);
        assert_eq!(template.path(), Some("templates/blog.html"));
        assert!(store.read_record(&ctx(), "nope").await.expect("read").is_none());
    }

    #[tokio::test]
    async fn missing_branch_is_empty() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileContentStore::new(dir.path());
        assert!(store.query_by_type(&ctx(), PAGE_TYPE).await.expect("query").is_empty());
    }

    #[tokio::test]
    async fn malformed_file_is_a_decode_error() {
        let (_dir, store) = store_with("[[records]\nid = ").await;
        let err = store.query_by_type(&ctx(), PAGE_TYPE).await.expect_err("decode");
        assert!(matches!(err, StoreError::Decode { .. }));
    }

    #[tokio::test]
    async fn traversal_in_branch_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileContentStore::new(dir.path());
        let ctx = BranchContext::new("example.com", "..", "master");
        let err = store.query_by_type(&ctx, PAGE_TYPE).await.expect_err("invalid");
        assert!(matches!(err, StoreError::InvalidPath { .. }));
    }
}
