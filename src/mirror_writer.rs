//! C6 — Mirror Writer (SPEC_FULL.md §4, component C6).
//!
//! Takes a mirror-relative path (already computed by `rewrite.rs`) and a
//! byte body and writes it under the export root. Writes are
//! first-writer-wins: two URLs that hash to the same mirror path race,
//! and whichever gets there first keeps the file. Everyone else gets a
//! `WriteOutcome::Collision`, which the engine logs as a notice rather
//! than treating as a fatal error.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum WriteOutcome {
    Written,
    Collision,
    Failed(std::io::Error),
}

pub struct MirrorWriter {
    root: PathBuf,
    ignore_store_file_error: bool,
}

impl MirrorWriter {
    pub fn new(root: PathBuf, ignore_store_file_error: bool) -> Self {
        Self {
            root,
            ignore_store_file_error,
        }
    }

    /// Writes `bytes` to `relative_path` under the export root. Creates any
    /// missing parent directories. Never overwrites an existing file.
    pub async fn write(&self, relative_path: &Path, bytes: &[u8]) -> WriteOutcome {
        let full_path = self.root.join(relative_path);

        let parent = match full_path.parent() {
            Some(p) => p,
            None => {
                return WriteOutcome::Failed(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("mirror path has no parent: {}", full_path.display()),
                ))
            }
        };

        if let Err(err) = tokio::fs::create_dir_all(parent).await {
            return WriteOutcome::Failed(err);
        }

        let open_result = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full_path)
            .await;

        match open_result {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                if let Err(err) = file.write_all(bytes).await {
                    return WriteOutcome::Failed(err);
                }
                WriteOutcome::Written
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                tracing::debug!(path = %full_path.display(), "mirror path collision, keeping first writer");
                WriteOutcome::Collision
            }
            Err(err) => WriteOutcome::Failed(err),
        }
    }

    /// Writes `bytes`, logging and swallowing a failure when
    /// `--ignore-store-file-error` is set, or returning it for the caller
    /// to escalate otherwise.
    pub async fn write_or_notice(&self, relative_path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
        match self.write(relative_path, bytes).await {
            WriteOutcome::Written | WriteOutcome::Collision => Ok(()),
            WriteOutcome::Failed(err) => {
                if self.ignore_store_file_error {
                    tracing::warn!(
                        path = %relative_path.display(),
                        error = %err,
                        "failed to write mirror file, continuing (--ignore-store-file-error)"
                    );
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_creates_parent_dirs_and_succeeds() {
        let tmp = std::env::temp_dir().join(format!("sitecrawl-mirror-test-{}", std::process::id()));
        let writer = MirrorWriter::new(tmp.clone(), false);
        let outcome = writer.write(Path::new("a/b/c.html"), b"hello").await;
        assert!(matches!(outcome, WriteOutcome::Written));
        let content = tokio::fs::read(tmp.join("a/b/c.html")).await.unwrap();
        assert_eq!(content, b"hello");
        tokio::fs::remove_dir_all(&tmp).await.ok();
    }

    #[tokio::test]
    async fn second_write_to_same_path_collides() {
        let tmp = std::env::temp_dir().join(format!("sitecrawl-mirror-test2-{}", std::process::id()));
        let writer = MirrorWriter::new(tmp.clone(), false);
        let first = writer.write(Path::new("only.html"), b"first").await;
        let second = writer.write(Path::new("only.html"), b"second").await;
        assert!(matches!(first, WriteOutcome::Written));
        assert!(matches!(second, WriteOutcome::Collision));
        let content = tokio::fs::read(tmp.join("only.html")).await.unwrap();
        assert_eq!(content, b"first");
        tokio::fs::remove_dir_all(&tmp).await.ok();
    }
}
