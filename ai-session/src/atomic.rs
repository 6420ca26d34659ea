//! Atomic-write protocol shared by Session State Persistence and the
//! (root-crate) Storage Facade: write `target.tmp.<epoch>.<rand>`, flush,
//! rename over `target`. On failure the temp file is unlinked and `target`
//! is left untouched.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::Rng;
use tokio::fs;
use tokio::io::AsyncWriteExt;

fn temp_path(target: &Path) -> PathBuf {
    let epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let rand_suffix: u32 = rand::rng().random();
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "atomic".to_string());
    target.with_file_name(format!("{file_name}.tmp.{epoch}.{rand_suffix:x}"))
}

/// Write `contents` atomically to `target`, creating parent directories as
/// needed.
pub async fn write_atomic(target: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating parent dir for {}", target.display()))?;
    }

    let tmp = temp_path(target);
    let result = async {
        let mut file = fs::File::create(&tmp)
            .await
            .with_context(|| format!("creating temp file {}", tmp.display()))?;
        file.write_all(contents).await?;
        file.flush().await?;
        file.sync_all().await?;
        fs::rename(&tmp, target)
            .await
            .with_context(|| format!("renaming {} to {}", tmp.display(), target.display()))?;
        Ok::<(), anyhow::Error>(())
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&tmp).await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_and_renames() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("nested").join("file.json");
        write_atomic(&target, b"{\"a\":1}").await.unwrap();
        let contents = tokio::fs::read(&target).await.unwrap();
        assert_eq!(contents, b"{\"a\":1}");

        let leftover: Vec<_> = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftover.is_empty(), "temp file was not cleaned up");
    }

    #[tokio::test]
    async fn second_write_replaces_first_atomically() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("file.json");
        write_atomic(&target, b"first").await.unwrap();
        write_atomic(&target, b"second").await.unwrap();
        let contents = tokio::fs::read(&target).await.unwrap();
        assert_eq!(contents, b"second");
    }
}
