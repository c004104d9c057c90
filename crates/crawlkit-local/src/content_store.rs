//! Hash-addressed filesystem store for large crawl blobs.
//!
//! Blobs live under one subdirectory per content kind, named by the 64-bit
//! xxhash of their UTF-8 bytes (16 lowercase hex chars). Files are
//! write-once: a store call whose target already exists is a no-op, so
//! identical content across URLs shares a single file and concurrent writers
//! cannot tear each other.

use crawlkit_core::{Error, Result};
use std::path::{Path, PathBuf};
use xxhash_rust::xxh64::xxh64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Cleaned,
    Markdown,
    Extracted,
    Screenshot,
}

impl ContentKind {
    pub const ALL: [ContentKind; 5] = [
        ContentKind::Html,
        ContentKind::Cleaned,
        ContentKind::Markdown,
        ContentKind::Extracted,
        ContentKind::Screenshot,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            ContentKind::Html => "html_content",
            ContentKind::Cleaned => "cleaned_html",
            ContentKind::Markdown => "markdown_content",
            ContentKind::Extracted => "extracted_content",
            ContentKind::Screenshot => "screenshots",
        }
    }
}

/// 16-char lowercase hex xxhash-64 of `content`. Deterministic over bytes.
pub fn content_hash(content: &str) -> String {
    format!("{:016x}", xxh64(content.as_bytes(), 0))
}

#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open (and create) the store rooted at `base`.
    pub fn new(base: &Path) -> Result<Self> {
        for kind in ContentKind::ALL {
            std::fs::create_dir_all(base.join(kind.dir_name()))
                .map_err(|e| Error::CacheIo(format!("create {}: {e}", kind.dir_name())))?;
        }
        Ok(Self {
            root: base.to_path_buf(),
        })
    }

    pub fn path_for(&self, kind: ContentKind, hash: &str) -> PathBuf {
        self.root.join(kind.dir_name()).join(hash)
    }

    /// Persist `content` and return its hash pointer.
    ///
    /// Empty content is encoded as the empty hash `""` and writes nothing.
    pub async fn store(&self, kind: ContentKind, content: &str) -> Result<String> {
        if content.is_empty() {
            return Ok(String::new());
        }
        let hash = content_hash(content);
        let path = self.path_for(kind, &hash);
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::CacheIo(e.to_string()))?
        {
            return Ok(hash);
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| Error::CacheIo(format!("write {}: {e}", path.display())))?;
        Ok(hash)
    }

    /// Load the blob for `hash`, or `None` when the pointer dangles.
    /// The empty hash loads as the empty string.
    pub async fn load(&self, kind: ContentKind, hash: &str) -> Result<Option<String>> {
        if hash.is_empty() {
            return Ok(Some(String::new()));
        }
        let path = self.path_for(kind, hash);
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::CacheIo(format!("read {}: {e}", path.display()))),
        }
    }

    /// Delete every stored blob, keeping the directory skeleton.
    pub async fn clear(&self) -> Result<()> {
        for kind in ContentKind::ALL {
            let dir = self.root.join(kind.dir_name());
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| Error::CacheIo(e.to_string()))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::CacheIo(e.to_string()))?
            {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_16_hex_chars_and_deterministic() {
        let h1 = content_hash("<html>hello</html>");
        let h2 = content_hash("<html>hello</html>");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);
        assert!(h1.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        assert_ne!(h1, content_hash("<html>bye</html>"));
    }

    #[tokio::test]
    async fn store_and_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::new(tmp.path()).unwrap();

        let hash = store.store(ContentKind::Html, "<p>hi</p>").await.unwrap();
        assert_eq!(hash, content_hash("<p>hi</p>"));
        assert_eq!(
            store.load(ContentKind::Html, &hash).await.unwrap().as_deref(),
            Some("<p>hi</p>")
        );
    }

    #[tokio::test]
    async fn identical_content_shares_one_blob() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::new(tmp.path()).unwrap();

        let h1 = store.store(ContentKind::Html, "same").await.unwrap();
        let h2 = store.store(ContentKind::Html, "same").await.unwrap();
        assert_eq!(h1, h2);

        let files: Vec<_> = std::fs::read_dir(tmp.path().join("html_content"))
            .unwrap()
            .collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn empty_content_stores_as_empty_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::new(tmp.path()).unwrap();

        let hash = store.store(ContentKind::Extracted, "").await.unwrap();
        assert_eq!(hash, "");
        assert_eq!(
            store.load(ContentKind::Extracted, "").await.unwrap().as_deref(),
            Some("")
        );
        assert!(std::fs::read_dir(tmp.path().join("extracted_content"))
            .unwrap()
            .next()
            .is_none());
    }

    #[tokio::test]
    async fn dangling_hash_loads_as_none_and_clear_empties() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::new(tmp.path()).unwrap();

        assert!(store
            .load(ContentKind::Markdown, "deadbeefdeadbeef")
            .await
            .unwrap()
            .is_none());

        store.store(ContentKind::Markdown, "# hi").await.unwrap();
        store.clear().await.unwrap();
        assert!(std::fs::read_dir(tmp.path().join("markdown_content"))
            .unwrap()
            .next()
            .is_none());
    }
}
